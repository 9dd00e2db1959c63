//! Scene files: a TOML description of one device and the captured images to
//! prime on it.
//!
//! ```toml
//! [device]
//! queue_families = [["GRAPHICS", "COMPUTE", "TRANSFER"]]
//!
//! [[image]]
//! id = 1
//! format = "R8G8B8A8_UNORM"
//! extent = [4, 4, 1]
//! usage = ["TRANSFER_DST", "SAMPLED"]
//! final_layout = "SHADER_READ_ONLY_OPTIMAL"
//! fill = { color = [10, 20, 30, 40] }
//! ```

use std::fmt;

use anyhow::{bail, Context};
use ash::vk;
use serde::Deserialize;
use tracing::debug;
use vkprime_primer::format;
use vkprime_primer::state::{
    BoundMemory, DeviceMemoryObject, DeviceObject, ImageAspect, ImageInfo, ImageObject, LinearLayout,
    MemoryType, PhysicalDeviceObject, QueueObject, State,
};
use vkprime_protocol::{ReplayHandle, ResourceType};

#[derive(Debug, Deserialize)]
pub struct SceneFile {
    #[serde(default)]
    pub device: DeviceDesc,
    #[serde(default, rename = "image")]
    pub images: Vec<ImageDesc>,
}

#[derive(Debug, Deserialize)]
pub struct DeviceDesc {
    /// Capability flags of each queue family; one queue is created per family
    #[serde(default = "default_queue_families")]
    pub queue_families: Vec<Vec<String>>,
}

impl Default for DeviceDesc {
    fn default() -> Self {
        Self {
            queue_families: default_queue_families(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ImageDesc {
    pub id: u64,
    pub format: String,
    pub extent: [u32; 3],
    #[serde(default = "default_one")]
    pub mip_levels: u32,
    #[serde(default = "default_one")]
    pub array_layers: u32,
    pub usage: Vec<String>,
    #[serde(default = "default_tiling")]
    pub tiling: String,
    #[serde(default = "default_final_layout")]
    pub final_layout: String,
    #[serde(default)]
    pub fill: Fill,
}

/// Byte pattern repeated over every subresource of an aspect.
#[derive(Debug, Default, Deserialize)]
pub struct Fill {
    pub color: Option<Vec<u8>>,
    pub depth: Option<Vec<u8>>,
    pub stencil: Option<Vec<u8>>,
}

impl Fill {
    fn pattern(&self, aspect: ImageAspect) -> Option<&[u8]> {
        match aspect {
            ImageAspect::Color => self.color.as_deref(),
            ImageAspect::Depth => self.depth.as_deref(),
            ImageAspect::Stencil => self.stencil.as_deref(),
        }
        .filter(|p| !p.is_empty())
    }
}

fn default_queue_families() -> Vec<Vec<String>> {
    vec![vec!["GRAPHICS".to_string(), "COMPUTE".to_string(), "TRANSFER".to_string()]]
}

fn default_one() -> u32 {
    1
}

fn default_tiling() -> String {
    "OPTIMAL".to_string()
}

fn default_final_layout() -> String {
    "GENERAL".to_string()
}

/// States built from a scene, plus the layout each image should end up in.
pub struct Scene {
    pub old: State,
    pub new: State,
    pub targets: Vec<(ReplayHandle, vk::ImageLayout)>,
}

const IMAGE_USAGES: &[vk::ImageUsageFlags] = &[
    vk::ImageUsageFlags::TRANSFER_SRC,
    vk::ImageUsageFlags::TRANSFER_DST,
    vk::ImageUsageFlags::SAMPLED,
    vk::ImageUsageFlags::STORAGE,
    vk::ImageUsageFlags::COLOR_ATTACHMENT,
    vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
    vk::ImageUsageFlags::INPUT_ATTACHMENT,
];

const QUEUE_CAPS: &[vk::QueueFlags] = &[
    vk::QueueFlags::GRAPHICS,
    vk::QueueFlags::COMPUTE,
    vk::QueueFlags::TRANSFER,
    vk::QueueFlags::SPARSE_BINDING,
];

const LAYOUTS: &[vk::ImageLayout] = &[
    vk::ImageLayout::GENERAL,
    vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
    vk::ImageLayout::PRESENT_SRC_KHR,
];

/// Look `name` up among `candidates` by their Vulkan enumerant name.
fn parse_named<T: fmt::Debug + Copy>(name: &str, candidates: &[T], what: &str) -> anyhow::Result<T> {
    candidates
        .iter()
        .copied()
        .find(|c| format!("{:?}", c) == name)
        .with_context(|| format!("unknown {} {:?}", what, name))
}

fn parse_format(name: &str) -> anyhow::Result<vk::Format> {
    let known: Vec<vk::Format> = format::known_formats().iter().map(|f| f.format).collect();
    parse_named(name, &known, "format")
}

impl SceneFile {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path).with_context(|| format!("reading scene {}", path))?;
        toml::from_str(&content).with_context(|| format!("parsing scene {}", path))
    }

    /// Build the captured (old) and rebuilt (new) states. With `device_data`
    /// the fill patterns go into the rebuilt images instead of the captured
    /// ones.
    pub fn build(&self, device_data: bool) -> anyhow::Result<Scene> {
        if self.device.queue_families.is_empty() {
            bail!("scene device has no queue families");
        }
        let physical = ReplayHandle::new(ResourceType::VkPhysicalDevice, 1);
        let device = ReplayHandle::new(ResourceType::VkDevice, 1);
        let mut base = State::default();

        let mut families = Vec::new();
        for caps in &self.device.queue_families {
            let mut flags = vk::QueueFlags::empty();
            for cap in caps {
                flags |= parse_named(cap, QUEUE_CAPS, "queue capability")?;
            }
            families.push(flags);
        }
        base.add_physical_device(PhysicalDeviceObject {
            handle: physical,
            memory_types: vec![
                MemoryType {
                    property_flags: vk::MemoryPropertyFlags::DEVICE_LOCAL,
                    heap_index: 0,
                },
                MemoryType {
                    property_flags: vk::MemoryPropertyFlags::HOST_VISIBLE
                        | vk::MemoryPropertyFlags::HOST_COHERENT,
                    heap_index: 1,
                },
            ],
            queue_family_flags: families.clone(),
        });
        base.add_device(DeviceObject {
            handle: device,
            physical_device: physical,
        });
        let mut queues = Vec::new();
        for family_index in 0..families.len() as u32 {
            let queue = ReplayHandle::new(ResourceType::VkQueue, family_index as u64 + 1);
            base.add_queue(QueueObject {
                handle: queue,
                device,
                family_index,
                index: 0,
            });
            queues.push(queue);
        }

        let mut scene = Scene {
            old: base.clone(),
            new: base,
            targets: Vec::new(),
        };
        for desc in &self.images {
            let handle = ReplayHandle::new(ResourceType::VkImage, desc.id);
            if scene.old.images.contains_key(&handle) {
                bail!("image id {} appears twice", desc.id);
            }
            let info = desc.info().with_context(|| format!("image {}", desc.id))?;
            let final_layout = parse_named(&desc.final_layout, LAYOUTS, "layout")?;

            let mut old = ImageObject::new(handle, device, info.clone());
            old.last_bound_queues = queues.clone();
            let mut new = ImageObject::new(handle, device, info.clone());
            let filled = if device_data { &mut new } else { &mut old };
            let linear_size = fill_image(filled, &desc.fill, info.tiling == vk::ImageTiling::LINEAR)?;

            if let Some(size) = linear_size {
                old.memory_requirements.size = size;
                let memory = ReplayHandle::new(ResourceType::VkDeviceMemory, desc.id);
                scene.new.add_memory(DeviceMemoryObject {
                    handle: memory,
                    device,
                    size,
                    memory_type_index: 1,
                });
                new.bound_memory = Some(BoundMemory { memory, offset: 0 });
            }
            debug!(image = %handle, format = ?info.format, "scene image loaded");
            scene.old.add_image(old);
            scene.new.add_image(new);
            scene.targets.push((handle, final_layout));
        }
        Ok(scene)
    }
}

impl ImageDesc {
    fn info(&self) -> anyhow::Result<ImageInfo> {
        let format = parse_format(&self.format)?;
        let mut usage = vk::ImageUsageFlags::empty();
        for u in &self.usage {
            usage |= parse_named(u, IMAGE_USAGES, "image usage")?;
        }
        let tiling = match self.tiling.as_str() {
            "OPTIMAL" => vk::ImageTiling::OPTIMAL,
            "LINEAR" => vk::ImageTiling::LINEAR,
            other => bail!("unknown tiling {:?}", other),
        };
        let [width, height, depth] = self.extent;
        if width == 0 || height == 0 || depth == 0 || self.mip_levels == 0 || self.array_layers == 0 {
            bail!("image extent, mip levels and array layers must be non-zero");
        }
        let mut info = ImageInfo::new_2d(format, width, height, usage);
        info.extent.depth = depth;
        if depth > 1 {
            info.image_type = vk::ImageType::TYPE_3D;
        }
        info.mip_levels = self.mip_levels;
        info.array_layers = self.array_layers;
        info.tiling = tiling;
        if tiling == vk::ImageTiling::LINEAR {
            info.initial_layout = vk::ImageLayout::PREINITIALIZED;
        }
        Ok(info)
    }
}

/// Fill every subresource of `image` with the aspect patterns. Linear images
/// get their subresources laid out back to back; the total size is returned.
fn fill_image(image: &mut ImageObject, fill: &Fill, linear: bool) -> anyhow::Result<Option<u64>> {
    let info = image.info.clone();
    let mut offset = 0u64;
    for aspect in ImageAspect::from_flags(image.aspect) {
        for layer in 0..info.array_layers {
            for level in 0..info.mip_levels {
                let size = format::level_size(&info, aspect, level)?.size;
                if let Some(pattern) = fill.pattern(aspect) {
                    let data: Vec<u8> = pattern.iter().copied().cycle().take(size as usize).collect();
                    image.set_level_data(aspect, layer, level, data);
                }
                if linear {
                    let extent = info.level_extent(level);
                    let element = format::element_size(info.format, aspect)? as u64;
                    if let Some(l) = image.level_mut(aspect, layer, level) {
                        l.linear_layout = Some(LinearLayout {
                            offset,
                            size,
                            row_pitch: extent.width as u64 * element,
                            array_pitch: size,
                            depth_pitch: extent.width as u64 * extent.height as u64 * element,
                        });
                    }
                }
                offset += size;
            }
        }
    }
    Ok(linear.then_some(offset))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENE: &str = r#"
[device]
queue_families = [["GRAPHICS", "COMPUTE", "TRANSFER"], ["TRANSFER"]]

[[image]]
id = 7
format = "R8G8B8A8_UNORM"
extent = [4, 4, 1]
mip_levels = 2
usage = ["TRANSFER_DST", "SAMPLED"]
final_layout = "SHADER_READ_ONLY_OPTIMAL"
fill = { color = [1, 2, 3, 4] }

[[image]]
id = 8
format = "R8G8B8A8_UNORM"
extent = [2, 2, 1]
usage = ["SAMPLED"]
tiling = "LINEAR"
fill = { color = [9] }
"#;

    #[test]
    fn test_scene_builds_states() {
        let file: SceneFile = toml::from_str(SCENE).expect("parse scene");
        let scene = file.build(false).expect("build scene");
        assert_eq!(scene.old.queues.len(), 2);
        assert_eq!(scene.targets.len(), 2);
        assert_eq!(scene.targets[0].1, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);

        let image = &scene.old.images[&scene.targets[0].0];
        assert_eq!(image.level(ImageAspect::Color, 0, 1).expect("level 1").data.len(), 16);
        assert!(scene.new.images[&scene.targets[0].0]
            .level(ImageAspect::Color, 0, 0)
            .expect("level 0")
            .data
            .is_empty());

        let linear = &scene.new.images[&scene.targets[1].0];
        assert_eq!(linear.info.initial_layout, vk::ImageLayout::PREINITIALIZED);
        assert!(linear.bound_memory.is_some());
    }

    #[test]
    fn test_device_data_fills_new_state() {
        let file: SceneFile = toml::from_str(SCENE).expect("parse scene");
        let scene = file.build(true).expect("build scene");
        let handle = scene.targets[0].0;
        assert!(scene.old.images[&handle].level(ImageAspect::Color, 0, 0).expect("level").data.is_empty());
        assert_eq!(
            scene.new.images[&handle].level(ImageAspect::Color, 0, 0).expect("level").data,
            [1u8, 2, 3, 4].repeat(16)
        );
    }

    #[test]
    fn test_unknown_names_are_rejected() {
        let file: SceneFile = toml::from_str(
            r#"
[[image]]
id = 1
format = "R8G8B8A8_UNROM"
extent = [1, 1, 1]
usage = []
"#,
        )
        .expect("parse scene");
        match file.build(false) {
            Err(e) => assert!(format!("{:#}", e).contains("unknown format"), "{:#}", e),
            Ok(_) => panic!("expected an unknown format error"),
        }
    }
}
