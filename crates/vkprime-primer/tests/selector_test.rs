//! Strategy selection and the errors raised before any staging happens.

mod common;

use ash::vk;
use common::Scene;
use vkprime_primer::primer::select_strategy;
use vkprime_primer::state::{ImageAspect, ImageInfo};
use vkprime_primer::{ImagePrimer, PrimeError, PrimingStrategy, RecordingSink};

fn stage(scene: &Scene, image: vkprime_protocol::ReplayHandle, from_host_data: bool) -> Result<PrimingStrategy, PrimeError> {
    vkprime_common::init_test_logging();
    let sink = RecordingSink::new();
    let mut sb = scene.builder(sink);
    let primer = ImagePrimer::new();
    let range = sb.new_state().image(image)?.full_range();
    let mut data = primer.new_primeable_image_data(&mut sb, image, &[range], from_host_data)?;
    let strategy = data.strategy();
    data.free(&mut sb)?;
    primer.free(&mut sb)?;
    sb.finish()?;
    Ok(strategy)
}

#[test]
fn test_compressed_format_is_unsupported() {
    let mut scene = Scene::new();
    let info = ImageInfo::new_2d(vk::Format::BC1_RGBA_UNORM_BLOCK, 8, 8, vk::ImageUsageFlags::TRANSFER_DST);
    let image = scene.add_image(1, info, &[]);

    match stage(&scene, image, true) {
        Err(PrimeError::Unsupported { image: h, reason }) => {
            assert_eq!(h, image);
            assert!(reason.contains("compressed"), "reason: {}", reason);
        }
        other => panic!("expected Unsupported, got {:?}", other),
    }
}

#[test]
fn test_multi_planar_format_is_unsupported() {
    let mut scene = Scene::new();
    let info = ImageInfo::new_2d(vk::Format::G8_B8R8_2PLANE_420_UNORM, 8, 8, vk::ImageUsageFlags::TRANSFER_DST);
    let image = scene.add_image(2, info, &[]);

    match stage(&scene, image, true) {
        Err(PrimeError::Unsupported { reason, .. }) => assert!(reason.contains("multi-planar")),
        other => panic!("expected Unsupported, got {:?}", other),
    }
}

#[test]
fn test_sampled_only_image_has_no_strategy() {
    let mut scene = Scene::new();
    let info = ImageInfo::new_2d(vk::Format::R8G8B8A8_UNORM, 4, 4, vk::ImageUsageFlags::SAMPLED);
    let image = scene.add_image(3, info, &[]);

    match stage(&scene, image, true) {
        Err(PrimeError::NoViableStrategy(h)) => assert_eq!(h, image),
        other => panic!("expected NoViableStrategy, got {:?}", other),
    }
}

#[test]
fn test_missing_graphics_queue() {
    let mut scene = Scene::with_queue_caps(vk::QueueFlags::TRANSFER | vk::QueueFlags::COMPUTE);
    let info = ImageInfo::new_2d(vk::Format::D32_SFLOAT, 4, 4, vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT);
    let image = scene.add_image(4, info, &[(ImageAspect::Depth, vec![0; 64])]);

    match stage(&scene, image, true) {
        Err(PrimeError::NoQueue { image: h, capability }) => {
            assert_eq!(h, image);
            assert!(capability.contains("GRAPHICS"), "capability: {}", capability);
        }
        other => panic!("expected NoQueue, got {:?}", other),
    }
}

#[test]
fn test_device_data_needs_image_store() {
    let mut scene = Scene::new();
    let info = ImageInfo::new_2d(vk::Format::R8G8B8A8_UNORM, 4, 4, vk::ImageUsageFlags::TRANSFER_DST);
    let image = scene.add_image(5, info, &[]);

    match stage(&scene, image, false) {
        Err(PrimeError::NotImplemented(what)) => assert!(what.contains("buffer to image copy"), "{}", what),
        other => panic!("expected NotImplemented, got {:?}", other),
    }
}

#[test]
fn test_strategy_precedence() {
    let mut scene = Scene::new();
    let cases = [
        (
            vk::Format::R8G8B8A8_UNORM,
            vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::STORAGE | vk::ImageUsageFlags::COLOR_ATTACHMENT,
            PrimingStrategy::ByCopy,
        ),
        (
            vk::Format::R8G8B8A8_UNORM,
            vk::ImageUsageFlags::STORAGE | vk::ImageUsageFlags::COLOR_ATTACHMENT,
            PrimingStrategy::ByRendering,
        ),
        (
            vk::Format::D16_UNORM,
            vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            PrimingStrategy::ByRendering,
        ),
        (vk::Format::R32_UINT, vk::ImageUsageFlags::STORAGE, PrimingStrategy::ByImageStore),
    ];
    for (id, (format, usage, expected)) in cases.into_iter().enumerate() {
        let info = ImageInfo::new_2d(format, 4, 4, usage);
        let aspect = if format == vk::Format::D16_UNORM {
            ImageAspect::Depth
        } else {
            ImageAspect::Color
        };
        let size = 16 * vkprime_primer::format::element_size(format, aspect).expect("element size") as usize;
        let image = scene.add_image(100 + id as u64, info, &[(aspect, vec![1; size])]);
        match stage(&scene, image, true) {
            Ok(strategy) => assert_eq!(strategy, expected, "{:?} {:?}", format, usage),
            other => panic!("expected {:?}, got {:?}", expected, other),
        }
    }
}

#[test]
fn test_preinitialization_only_when_nothing_else_applies() {
    let linear = |usage| ImageInfo {
        tiling: vk::ImageTiling::LINEAR,
        initial_layout: vk::ImageLayout::PREINITIALIZED,
        ..ImageInfo::new_2d(vk::Format::R8G8B8A8_UNORM, 4, 4, usage)
    };
    let cases = [
        (vk::ImageUsageFlags::TRANSFER_DST, PrimingStrategy::ByCopy),
        (vk::ImageUsageFlags::COLOR_ATTACHMENT, PrimingStrategy::ByRendering),
        (vk::ImageUsageFlags::STORAGE, PrimingStrategy::ByImageStore),
        (vk::ImageUsageFlags::SAMPLED, PrimingStrategy::ByPreinitialization),
    ];
    for (usage, expected) in cases {
        assert_eq!(select_strategy(&linear(usage)), Some(expected), "{:?}", usage);
    }
}
