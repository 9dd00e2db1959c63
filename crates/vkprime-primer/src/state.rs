//! Object model of the replay state.
//!
//! Two instances exist while priming: the captured ("old") state, read only,
//! which owns the subresource contents, and the state being rebuilt ("new"),
//! which the [`StateBuilder`](crate::StateBuilder) keeps in sync with every
//! command it emits.

use std::collections::{BTreeMap, HashMap};

use ash::vk;
use vkprime_protocol::{ReplayHandle, ResourceType};

use crate::error::{PrimeError, Result};
use crate::format;

/// An individual data type within an image, addressed independently for
/// layout and content.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u32)]
pub enum ImageAspect {
    Color = vk::ImageAspectFlags::COLOR.as_raw(),
    Depth = vk::ImageAspectFlags::DEPTH.as_raw(),
    Stencil = vk::ImageAspectFlags::STENCIL.as_raw(),
}

impl ImageAspect {
    /// Every aspect set in `flags`, in bit order.
    pub fn from_flags(flags: vk::ImageAspectFlags) -> Vec<ImageAspect> {
        [ImageAspect::Color, ImageAspect::Depth, ImageAspect::Stencil]
            .into_iter()
            .filter(|a| flags.contains(a.flags()))
            .collect()
    }

    pub fn flags(self) -> vk::ImageAspectFlags {
        vk::ImageAspectFlags::from_raw(self as u32)
    }
}

impl From<ImageAspect> for vk::ImageAspectFlags {
    #[inline]
    fn from(val: ImageAspect) -> Self {
        val.flags()
    }
}

/// Creation parameters of an image.
#[derive(Debug, Clone)]
pub struct ImageInfo {
    pub flags: vk::ImageCreateFlags,
    pub image_type: vk::ImageType,
    pub format: vk::Format,
    pub extent: vk::Extent3D,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub samples: vk::SampleCountFlags,
    pub tiling: vk::ImageTiling,
    pub usage: vk::ImageUsageFlags,
    pub sharing_mode: vk::SharingMode,
    pub queue_family_indices: Vec<u32>,
    pub initial_layout: vk::ImageLayout,
}

impl ImageInfo {
    /// A single-sample, optimally tiled 2D image with one mip level and layer.
    pub fn new_2d(format: vk::Format, width: u32, height: u32, usage: vk::ImageUsageFlags) -> Self {
        Self {
            flags: vk::ImageCreateFlags::empty(),
            image_type: vk::ImageType::TYPE_2D,
            format,
            extent: vk::Extent3D { width, height, depth: 1 },
            mip_levels: 1,
            array_layers: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            tiling: vk::ImageTiling::OPTIMAL,
            usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            queue_family_indices: Vec::new(),
            initial_layout: vk::ImageLayout::UNDEFINED,
        }
    }

    /// Extent of mip `level`, never smaller than one texel per axis.
    pub fn level_extent(&self, level: u32) -> vk::Extent3D {
        format::mip_extent(self.extent, level)
    }
}

/// Placement of a linearly tiled subresource inside its bound memory.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearLayout {
    pub offset: u64,
    pub size: u64,
    pub row_pitch: u64,
    pub array_pitch: u64,
    pub depth_pitch: u64,
}

/// One (aspect, layer, level) subresource.
#[derive(Debug, Clone)]
pub struct ImageLevel {
    pub layout: vk::ImageLayout,
    /// Tightly packed texels in the aspect's own format
    pub data: Vec<u8>,
    pub linear_layout: Option<LinearLayout>,
}

#[derive(Debug, Clone, Default)]
pub struct ImageLayer {
    pub levels: BTreeMap<u32, ImageLevel>,
}

#[derive(Debug, Clone, Default)]
pub struct ImageAspectData {
    pub layers: BTreeMap<u32, ImageLayer>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryRequirements {
    pub size: u64,
    pub alignment: u64,
    pub memory_type_bits: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct BoundMemory {
    pub memory: ReplayHandle,
    pub offset: u64,
}

/// One sparse block bound to memory.
#[derive(Debug, Clone, Copy)]
pub struct SparseImageBinding {
    pub aspect: ImageAspect,
    pub layer: u32,
    pub level: u32,
    pub offset: vk::Offset3D,
    pub extent: vk::Extent3D,
}

#[derive(Debug, Clone)]
pub struct ImageObject {
    pub handle: ReplayHandle,
    pub device: ReplayHandle,
    pub info: ImageInfo,
    /// Aspects the format carries
    pub aspect: vk::ImageAspectFlags,
    pub aspects: BTreeMap<ImageAspect, ImageAspectData>,
    pub bound_memory: Option<BoundMemory>,
    pub memory_requirements: MemoryRequirements,
    pub sparse_bindings: Vec<SparseImageBinding>,
    /// Queues the image was most recently used on, most recent first
    pub last_bound_queues: Vec<ReplayHandle>,
}

impl ImageObject {
    /// Build an image whose every subresource sits in the initial layout with
    /// no content.
    pub fn new(handle: ReplayHandle, device: ReplayHandle, info: ImageInfo) -> Self {
        let aspect = format::aspects_of(info.format);
        let mut aspects = BTreeMap::new();
        for a in ImageAspect::from_flags(aspect) {
            let mut aspect_data = ImageAspectData::default();
            for layer in 0..info.array_layers {
                let mut image_layer = ImageLayer::default();
                for level in 0..info.mip_levels {
                    image_layer.levels.insert(
                        level,
                        ImageLevel {
                            layout: info.initial_layout,
                            data: Vec::new(),
                            linear_layout: None,
                        },
                    );
                }
                aspect_data.layers.insert(layer, image_layer);
            }
            aspects.insert(a, aspect_data);
        }
        let memory_requirements = MemoryRequirements {
            size: format::image_size(&info).unwrap_or(0),
            alignment: 256,
            memory_type_bits: u32::MAX,
        };
        Self {
            handle,
            device,
            info,
            aspect,
            aspects,
            bound_memory: None,
            memory_requirements,
            sparse_bindings: Vec::new(),
            last_bound_queues: Vec::new(),
        }
    }

    pub fn level(&self, aspect: ImageAspect, layer: u32, level: u32) -> Option<&ImageLevel> {
        self.aspects.get(&aspect)?.layers.get(&layer)?.levels.get(&level)
    }

    pub fn level_mut(&mut self, aspect: ImageAspect, layer: u32, level: u32) -> Option<&mut ImageLevel> {
        self.aspects
            .get_mut(&aspect)?
            .layers
            .get_mut(&layer)?
            .levels
            .get_mut(&level)
    }

    /// Replace the content of one subresource. Returns false if it does not exist.
    pub fn set_level_data(&mut self, aspect: ImageAspect, layer: u32, level: u32, data: Vec<u8>) -> bool {
        match self.level_mut(aspect, layer, level) {
            Some(l) => {
                l.data = data;
                true
            }
            None => false,
        }
    }

    /// The range covering every aspect, layer and level.
    pub fn full_range(&self) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange {
            aspect_mask: self.aspect,
            base_mip_level: 0,
            level_count: self.info.mip_levels,
            base_array_layer: 0,
            layer_count: self.info.array_layers,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MemoryType {
    pub property_flags: vk::MemoryPropertyFlags,
    pub heap_index: u32,
}

#[derive(Debug, Clone)]
pub struct PhysicalDeviceObject {
    pub handle: ReplayHandle,
    pub memory_types: Vec<MemoryType>,
    /// Capabilities of each queue family, by family index
    pub queue_family_flags: Vec<vk::QueueFlags>,
}

#[derive(Debug, Clone)]
pub struct DeviceObject {
    pub handle: ReplayHandle,
    pub physical_device: ReplayHandle,
}

#[derive(Debug, Clone)]
pub struct QueueObject {
    pub handle: ReplayHandle,
    pub device: ReplayHandle,
    pub family_index: u32,
    pub index: u32,
}

#[derive(Debug, Clone)]
pub struct DeviceMemoryObject {
    pub handle: ReplayHandle,
    pub device: ReplayHandle,
    pub size: u64,
    pub memory_type_index: u32,
}

#[derive(Debug, Clone)]
pub struct BufferObject {
    pub handle: ReplayHandle,
    pub device: ReplayHandle,
    pub size: u64,
    pub usage: vk::BufferUsageFlags,
    pub bound_memory: Option<BoundMemory>,
}

#[derive(Debug, Clone)]
pub struct ImageViewObject {
    pub handle: ReplayHandle,
    pub device: ReplayHandle,
    pub image: ReplayHandle,
    pub view_type: vk::ImageViewType,
    pub format: vk::Format,
    pub range: vk::ImageSubresourceRange,
}

/// Handle-addressed object graph.
#[derive(Debug, Clone, Default)]
pub struct State {
    pub physical_devices: HashMap<ReplayHandle, PhysicalDeviceObject>,
    pub devices: HashMap<ReplayHandle, DeviceObject>,
    pub queues: HashMap<ReplayHandle, QueueObject>,
    pub memories: HashMap<ReplayHandle, DeviceMemoryObject>,
    pub buffers: HashMap<ReplayHandle, BufferObject>,
    pub images: HashMap<ReplayHandle, ImageObject>,
    pub image_views: HashMap<ReplayHandle, ImageViewObject>,
    /// Every other live object, mapped to the device that owns it
    pub others: HashMap<ReplayHandle, ReplayHandle>,
}

impl State {
    /// Whether any object of the handle's kind uses its value.
    pub fn contains(&self, handle: ReplayHandle) -> bool {
        match handle.resource_type {
            ResourceType::None => handle.id == 0,
            ResourceType::VkPhysicalDevice => self.physical_devices.contains_key(&handle),
            ResourceType::VkDevice => self.devices.contains_key(&handle),
            ResourceType::VkQueue => self.queues.contains_key(&handle),
            ResourceType::VkDeviceMemory => self.memories.contains_key(&handle),
            ResourceType::VkBuffer => self.buffers.contains_key(&handle),
            ResourceType::VkImage => self.images.contains_key(&handle),
            ResourceType::VkImageView => self.image_views.contains_key(&handle),
            _ => self.others.contains_key(&handle),
        }
    }

    pub fn image(&self, handle: ReplayHandle) -> Result<&ImageObject> {
        self.images.get(&handle).ok_or_else(|| missing(handle))
    }

    pub fn image_mut(&mut self, handle: ReplayHandle) -> Result<&mut ImageObject> {
        self.images.get_mut(&handle).ok_or_else(|| missing(handle))
    }

    pub fn image_view(&self, handle: ReplayHandle) -> Result<&ImageViewObject> {
        self.image_views.get(&handle).ok_or_else(|| missing(handle))
    }

    pub fn queue(&self, handle: ReplayHandle) -> Result<&QueueObject> {
        self.queues.get(&handle).ok_or_else(|| missing(handle))
    }

    pub fn device(&self, handle: ReplayHandle) -> Result<&DeviceObject> {
        self.devices.get(&handle).ok_or_else(|| missing(handle))
    }

    pub fn physical_device_of(&self, device: ReplayHandle) -> Result<&PhysicalDeviceObject> {
        let physical = self.device(device)?.physical_device;
        self.physical_devices
            .get(&physical)
            .ok_or_else(|| missing(physical))
    }

    /// Capabilities of the family `queue` belongs to.
    pub fn queue_family_flags(&self, queue: ReplayHandle) -> Result<vk::QueueFlags> {
        let q = self.queue(queue)?;
        let physical = self.physical_device_of(q.device)?;
        Ok(physical
            .queue_family_flags
            .get(q.family_index as usize)
            .copied()
            .unwrap_or_default())
    }

    pub fn add_physical_device(&mut self, physical: PhysicalDeviceObject) {
        self.physical_devices.insert(physical.handle, physical);
    }

    pub fn add_device(&mut self, device: DeviceObject) {
        self.devices.insert(device.handle, device);
    }

    pub fn add_queue(&mut self, queue: QueueObject) {
        self.queues.insert(queue.handle, queue);
    }

    pub fn add_image(&mut self, image: ImageObject) {
        self.images.insert(image.handle, image);
    }

    pub fn add_memory(&mut self, memory: DeviceMemoryObject) {
        self.memories.insert(memory.handle, memory);
    }

}

fn missing(handle: ReplayHandle) -> PrimeError {
    PrimeError::MissingObject {
        kind: handle.resource_type,
        handle,
        which: "state",
    }
}
