//! End-to-end priming tests.
//!
//! Each test stages a captured image, primes the rebuilt image and replays
//! the emitted commands through the reference emulator, then checks the
//! content and layouts the image ends up with.

mod common;

use ash::vk;
use common::{count_recorded, prime, Scene};
use vkprime_primer::state::{ImageAspect, ImageInfo, LinearLayout};
use vkprime_primer::PrimingStrategy;
use vkprime_protocol::vulkan_commands::{RecordedCommand, VulkanCommand};

fn repeat(texel: &[u8], count: usize) -> Vec<u8> {
    texel.iter().copied().cycle().take(texel.len() * count).collect()
}

#[test]
fn test_color_image_primed_by_copy() {
    let mut scene = Scene::new();
    let info = ImageInfo::new_2d(
        vk::Format::R8G8B8A8_UNORM,
        4,
        4,
        vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
    );
    let content = repeat(&[10, 20, 30, 40], 16);
    let image = scene.add_image(7, info, &[(ImageAspect::Color, content.clone())]);

    let mut primed = prime(&scene, image, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL, true);

    assert_eq!(primed.strategy, PrimingStrategy::ByCopy);
    assert_eq!(primed.emulator.data(image, ImageAspect::Color, 0, 0), content);
    assert_eq!(
        primed.emulator.layout(image, ImageAspect::Color, 0, 0),
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
    );
    assert!(primed.emulator.layout_errors().is_empty(), "{:?}", primed.emulator.layout_errors());
    assert_eq!(
        count_recorded(&primed.commands, |c| matches!(c, RecordedCommand::CopyBufferToImage { .. })),
        1
    );
    let level = primed.state.images[&image].level(ImageAspect::Color, 0, 0).expect("level");
    assert_eq!(level.layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
}

#[test]
fn test_every_mip_level_is_copied() {
    let mut scene = Scene::new();
    let mut info = ImageInfo::new_2d(vk::Format::R8_UINT, 8, 8, vk::ImageUsageFlags::TRANSFER_DST);
    info.mip_levels = 3;
    let image = scene.add_image(9, info, &[]);
    let mut expected = Vec::new();
    for level in 0..3u32 {
        let side = 8usize >> level;
        let data: Vec<u8> = (0..side * side).map(|i| (i as u8).wrapping_add(level as u8 * 100)).collect();
        let img = scene.old.image_mut(image).expect("image");
        assert!(img.set_level_data(ImageAspect::Color, 0, level, data.clone()));
        expected.push(data);
    }

    let mut primed = prime(&scene, image, vk::ImageLayout::GENERAL, true);

    for (level, data) in expected.iter().enumerate() {
        assert_eq!(&primed.emulator.data(image, ImageAspect::Color, 0, level as u32), data);
        assert_eq!(
            primed.emulator.layout(image, ImageAspect::Color, 0, level as u32),
            vk::ImageLayout::GENERAL
        );
    }
    assert!(primed.emulator.layout_errors().is_empty(), "{:?}", primed.emulator.layout_errors());
}

#[test]
fn test_small_scratch_buffer_splits_copies() {
    let mut scene = Scene::new();
    scene.config.scratch_buffer_size = 64;
    scene.config.scratch_buffer_alignment = 8;
    let info = ImageInfo::new_2d(vk::Format::R8G8B8A8_UINT, 8, 8, vk::ImageUsageFlags::TRANSFER_DST);
    let content: Vec<u8> = (0..256u32).map(|i| i as u8).collect();
    let image = scene.add_image(10, info, &[(ImageAspect::Color, content.clone())]);

    let mut primed = prime(&scene, image, vk::ImageLayout::TRANSFER_SRC_OPTIMAL, true);

    assert_eq!(primed.emulator.data(image, ImageAspect::Color, 0, 0), content);
    let copies = count_recorded(&primed.commands, |c| matches!(c, RecordedCommand::CopyBufferToImage { .. }));
    assert!(copies >= 4, "expected the level split over several batches, got {}", copies);
    assert!(primed.emulator.layout_errors().is_empty(), "{:?}", primed.emulator.layout_errors());
}

#[test]
fn test_half_float_color_primed_by_rendering() {
    let mut scene = Scene::new();
    let info = ImageInfo::new_2d(
        vk::Format::R16G16B16A16_SFLOAT,
        4,
        4,
        vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
    );
    let texel: Vec<u8> = [1.0f32, 0.5, 0.0, 1.0]
        .iter()
        .flat_map(|v| half::f16::from_f32(*v).to_le_bytes())
        .collect();
    let content = repeat(&texel, 16);
    let image = scene.add_image(11, info, &[(ImageAspect::Color, content.clone())]);

    let mut primed = prime(&scene, image, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL, true);

    assert_eq!(primed.strategy, PrimingStrategy::ByRendering);
    assert_eq!(primed.emulator.data(image, ImageAspect::Color, 0, 0), content);
    assert_eq!(
        primed.emulator.layout(image, ImageAspect::Color, 0, 0),
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
    );
    assert_eq!(primed.emulator.draws(), 1);
    assert!(primed.emulator.layout_errors().is_empty(), "{:?}", primed.emulator.layout_errors());
    assert!(primed.emulator.attachment_errors().is_empty(), "{:?}", primed.emulator.attachment_errors());
    assert!(primed.emulator.leaked_images(&scene.new).is_empty());
    assert_eq!(primed.emulator.live_views(), 0);
}

#[test]
fn test_render_reads_staging_as_input_attachments() {
    let mut scene = Scene::new();
    let info = ImageInfo::new_2d(vk::Format::R8G8B8A8_UNORM, 4, 4, vk::ImageUsageFlags::COLOR_ATTACHMENT);
    let image = scene.add_image(16, info, &[(ImageAspect::Color, repeat(&[1, 2, 3, 4], 16))]);

    let primed = prime(&scene, image, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL, true);

    assert_eq!(primed.strategy, PrimingStrategy::ByRendering);
    let staging_usage: Vec<vk::ImageUsageFlags> = primed
        .commands
        .iter()
        .filter_map(|c| match c {
            VulkanCommand::CreateImage { create_info, .. } => Some(vk::ImageUsageFlags::from_raw(create_info.usage)),
            _ => None,
        })
        .collect();
    assert_eq!(staging_usage.len(), 1);
    assert!(staging_usage[0].contains(vk::ImageUsageFlags::INPUT_ATTACHMENT));

    let passes: Vec<_> = primed
        .commands
        .iter()
        .filter_map(|c| match c {
            VulkanCommand::CreateRenderPass { attachments, subpasses, .. } => Some((attachments, subpasses)),
            _ => None,
        })
        .collect();
    assert_eq!(passes.len(), 1);
    let (attachments, subpasses) = passes[0];
    assert_eq!(attachments.len(), 2);
    assert_eq!(attachments[0].format, vk::Format::R32G32B32A32_UINT.as_raw());
    assert_eq!(attachments[0].initial_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL.as_raw());
    assert_eq!(subpasses[0].input_attachments.len(), 1);
    assert_eq!(subpasses[0].input_attachments[0].attachment, 0);
    assert_eq!(subpasses[0].color_attachments[0].attachment, 1);

    let input_writes = primed
        .commands
        .iter()
        .filter_map(|c| match c {
            VulkanCommand::UpdateDescriptorSets { writes, .. } => Some(writes),
            _ => None,
        })
        .flatten()
        .filter(|w| w.descriptor_type == vk::DescriptorType::INPUT_ATTACHMENT.as_raw())
        .count();
    assert_eq!(input_writes, 1);
    assert!(primed.emulator.attachment_errors().is_empty(), "{:?}", primed.emulator.attachment_errors());
}

#[test]
fn test_depth_stencil_primed_by_rendering() {
    let mut scene = Scene::new();
    let info = ImageInfo::new_2d(
        vk::Format::D24_UNORM_S8_UINT,
        16,
        16,
        vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
    );
    let depth: Vec<u8> = (0..256u32).flat_map(|i| (i << 8).to_le_bytes()).collect();
    let stencil: Vec<u8> = (0..=255u8).collect();
    let image = scene.add_image(
        12,
        info,
        &[(ImageAspect::Depth, depth.clone()), (ImageAspect::Stencil, stencil.clone())],
    );

    let mut primed = prime(&scene, image, vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL, true);

    assert_eq!(primed.strategy, PrimingStrategy::ByRendering);
    assert_eq!(primed.emulator.data(image, ImageAspect::Depth, 0, 0), depth);
    assert_eq!(primed.emulator.data(image, ImageAspect::Stencil, 0, 0), stencil);
    for aspect in [ImageAspect::Depth, ImageAspect::Stencil] {
        assert_eq!(
            primed.emulator.layout(image, aspect, 0, 0),
            vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL
        );
    }
    // One depth draw plus one per stencil bit plane.
    assert_eq!(primed.emulator.draws(), 9);
    assert_eq!(
        count_recorded(&primed.commands, |c| matches!(c, RecordedCommand::ClearAttachments { .. })),
        1
    );
    assert!(primed.emulator.layout_errors().is_empty(), "{:?}", primed.emulator.layout_errors());
    assert!(primed.emulator.attachment_errors().is_empty(), "{:?}", primed.emulator.attachment_errors());
    assert!(primed.emulator.leaked_images(&scene.new).is_empty());
}

#[test]
fn test_depth_only_primed_by_rendering() {
    let mut scene = Scene::new();
    let info = ImageInfo::new_2d(vk::Format::D16_UNORM, 4, 4, vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT);
    let depth: Vec<u8> = (0..16u16).flat_map(|i| (i * 4000).to_le_bytes()).collect();
    let image = scene.add_image(13, info, &[(ImageAspect::Depth, depth.clone())]);

    let mut primed = prime(&scene, image, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL, true);

    assert_eq!(primed.emulator.data(image, ImageAspect::Depth, 0, 0), depth);
    assert_eq!(primed.emulator.draws(), 1);
    assert!(primed.emulator.layout_errors().is_empty(), "{:?}", primed.emulator.layout_errors());
    assert!(primed.emulator.attachment_errors().is_empty(), "{:?}", primed.emulator.attachment_errors());
}

#[test]
fn test_storage_image_primed_by_store() {
    let mut scene = Scene::new();
    let info = ImageInfo::new_2d(vk::Format::R8G8B8A8_UINT, 4, 2, vk::ImageUsageFlags::STORAGE);
    let content: Vec<u8> = (0..32u8).collect();
    let image = scene.add_image(14, info, &[(ImageAspect::Color, content.clone())]);

    let mut primed = prime(&scene, image, vk::ImageLayout::GENERAL, true);

    assert_eq!(primed.strategy, PrimingStrategy::ByImageStore);
    assert_eq!(primed.emulator.data(image, ImageAspect::Color, 0, 0), content);
    assert_eq!(primed.emulator.layout(image, ImageAspect::Color, 0, 0), vk::ImageLayout::GENERAL);
    assert!(primed.emulator.dispatches() >= 1);
    assert!(primed.emulator.layout_errors().is_empty(), "{:?}", primed.emulator.layout_errors());
    assert!(primed.emulator.leaked_images(&scene.new).is_empty());
    assert_eq!(primed.emulator.live_views(), 0);
}

#[test]
fn test_linear_image_primed_by_preinitialization() {
    let mut scene = Scene::new();
    let mut info = ImageInfo::new_2d(vk::Format::R8G8B8A8_UNORM, 4, 4, vk::ImageUsageFlags::SAMPLED);
    info.tiling = vk::ImageTiling::LINEAR;
    info.initial_layout = vk::ImageLayout::PREINITIALIZED;
    let content: Vec<u8> = (0..64u8).rev().collect();
    let image = scene.add_image(15, info, &[(ImageAspect::Color, content.clone())]);
    let level = scene
        .old
        .image_mut(image)
        .expect("image")
        .level_mut(ImageAspect::Color, 0, 0)
        .expect("level");
    level.linear_layout = Some(LinearLayout {
        offset: 0,
        size: 64,
        row_pitch: 16,
        array_pitch: 64,
        depth_pitch: 64,
    });
    let memory = scene.bind_new_memory(image, 40, 64);

    let primed = prime(&scene, image, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL, true);

    assert_eq!(primed.strategy, PrimingStrategy::ByPreinitialization);
    assert_eq!(primed.emulator.memory(memory), content.as_slice());
    assert_eq!(
        primed.emulator.layout(image, ImageAspect::Color, 0, 0),
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
    );
    assert!(primed.emulator.layout_errors().is_empty(), "{:?}", primed.emulator.layout_errors());
    assert!(primed
        .commands
        .iter()
        .any(|c| matches!(c, VulkanCommand::UnmapMemory { memory: m, .. } if *m == memory)));
}

#[test]
fn test_device_data_round_trips_through_staging() {
    let mut scene = Scene::new();
    let info = ImageInfo::new_2d(vk::Format::R32_SFLOAT, 4, 4, vk::ImageUsageFlags::STORAGE);
    let image = scene.add_image(16, info, &[]);
    let seed: Vec<u8> = (0..16).flat_map(|i| (i as f32 * 0.25).to_le_bytes()).collect();
    assert!(scene
        .new
        .image_mut(image)
        .expect("image")
        .set_level_data(ImageAspect::Color, 0, 0, seed.clone()));

    let mut primed = prime(&scene, image, vk::ImageLayout::GENERAL, false);

    assert_eq!(primed.strategy, PrimingStrategy::ByImageStore);
    let staging = primed
        .commands
        .iter()
        .find_map(|c| match c {
            VulkanCommand::CreateImage { image: created, .. } if *created != image => Some(*created),
            _ => None,
        })
        .expect("staging image created");
    assert_eq!(primed.emulator.data(staging, ImageAspect::Color, 0, 0), seed);
    assert_eq!(primed.emulator.data(image, ImageAspect::Color, 0, 0), seed);
    assert_eq!(primed.emulator.dispatches(), 2);
    assert!(primed.emulator.is_destroyed(staging));
    assert!(primed.emulator.layout_errors().is_empty(), "{:?}", primed.emulator.layout_errors());
}
