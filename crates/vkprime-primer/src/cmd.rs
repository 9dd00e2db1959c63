//! Conversions from `ash` values to the serialized command vocabulary.

use ash::vk;
use vkprime_protocol::vulkan_commands::{
    RecordedCommand, SerializedBufferMemoryBarrier, SerializedImageCreateInfo,
    SerializedImageMemoryBarrier, SerializedImageSubresourceLayers,
    SerializedImageSubresourceRange, SerializedMemoryBarrier, SerializedRect2D,
    SerializedViewport,
};
use vkprime_protocol::ReplayHandle;

use crate::format;
use crate::state::ImageInfo;

/// Every access bit up to and including `MEMORY_WRITE`.
pub fn all_access() -> vk::AccessFlags {
    vk::AccessFlags::from_raw((vk::AccessFlags::MEMORY_WRITE.as_raw() << 1) - 1)
}

pub fn subresource_range(range: &vk::ImageSubresourceRange) -> SerializedImageSubresourceRange {
    SerializedImageSubresourceRange {
        aspect_mask: range.aspect_mask.as_raw(),
        base_mip_level: range.base_mip_level,
        level_count: range.level_count,
        base_array_layer: range.base_array_layer,
        layer_count: range.layer_count,
    }
}

pub fn range_from_serialized(range: &SerializedImageSubresourceRange) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::from_raw(range.aspect_mask),
        base_mip_level: range.base_mip_level,
        level_count: range.level_count,
        base_array_layer: range.base_array_layer,
        layer_count: range.layer_count,
    }
}

pub fn subresource_layers(
    aspect: vk::ImageAspectFlags,
    level: u32,
    layer: u32,
) -> SerializedImageSubresourceLayers {
    SerializedImageSubresourceLayers {
        aspect_mask: aspect.as_raw(),
        mip_level: level,
        base_array_layer: layer,
        layer_count: 1,
    }
}

/// Range covering one subresource.
pub fn single_range(aspect: vk::ImageAspectFlags, layer: u32, level: u32) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: aspect,
        base_mip_level: level,
        level_count: 1,
        base_array_layer: layer,
        layer_count: 1,
    }
}

/// Aspect mask a barrier on `aspect` must name. Combined depth/stencil images
/// need both bits in every barrier.
pub fn barrier_aspect_flags(image_format: vk::Format, aspect: vk::ImageAspectFlags) -> vk::ImageAspectFlags {
    let all = format::aspects_of(image_format);
    if all.contains(vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL)
        && aspect.intersects(vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL)
    {
        aspect | vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
    } else {
        aspect
    }
}

/// Layout transition with full access masks and no ownership change.
pub fn layout_barrier(
    image: ReplayHandle,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
    range: &vk::ImageSubresourceRange,
) -> SerializedImageMemoryBarrier {
    ownership_barrier(
        image,
        old_layout,
        new_layout,
        vk::QUEUE_FAMILY_IGNORED,
        vk::QUEUE_FAMILY_IGNORED,
        range,
    )
}

pub fn ownership_barrier(
    image: ReplayHandle,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
    src_queue_family_index: u32,
    dst_queue_family_index: u32,
    range: &vk::ImageSubresourceRange,
) -> SerializedImageMemoryBarrier {
    SerializedImageMemoryBarrier {
        src_access_mask: all_access().as_raw(),
        dst_access_mask: all_access().as_raw(),
        old_layout: old_layout.as_raw(),
        new_layout: new_layout.as_raw(),
        src_queue_family_index,
        dst_queue_family_index,
        image,
        subresource_range: subresource_range(range),
    }
}

pub fn buffer_barrier(
    buffer: ReplayHandle,
    src_access: vk::AccessFlags,
    dst_access: vk::AccessFlags,
    offset: u64,
    size: u64,
) -> SerializedBufferMemoryBarrier {
    SerializedBufferMemoryBarrier {
        src_access_mask: src_access.as_raw(),
        dst_access_mask: dst_access.as_raw(),
        src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
        dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
        buffer,
        offset,
        size,
    }
}

/// ALL_COMMANDS to ALL_COMMANDS barrier over the given image barriers.
pub fn image_barriers(barriers: Vec<SerializedImageMemoryBarrier>) -> RecordedCommand {
    RecordedCommand::PipelineBarrier {
        src_stage_mask: vk::PipelineStageFlags::ALL_COMMANDS.as_raw(),
        dst_stage_mask: vk::PipelineStageFlags::ALL_COMMANDS.as_raw(),
        dependency_flags: 0,
        memory_barriers: Vec::new(),
        buffer_memory_barriers: Vec::new(),
        image_memory_barriers: barriers,
    }
}

pub fn pipeline_barrier(
    src_stage: vk::PipelineStageFlags,
    dst_stage: vk::PipelineStageFlags,
    memory_barriers: Vec<SerializedMemoryBarrier>,
    buffer_memory_barriers: Vec<SerializedBufferMemoryBarrier>,
    image_memory_barriers: Vec<SerializedImageMemoryBarrier>,
) -> RecordedCommand {
    RecordedCommand::PipelineBarrier {
        src_stage_mask: src_stage.as_raw(),
        dst_stage_mask: dst_stage.as_raw(),
        dependency_flags: 0,
        memory_barriers,
        buffer_memory_barriers,
        image_memory_barriers,
    }
}

pub fn rect(width: u32, height: u32) -> SerializedRect2D {
    SerializedRect2D {
        offset: [0, 0],
        extent: [width, height],
    }
}

pub fn viewport(width: u32, height: u32) -> SerializedViewport {
    SerializedViewport {
        x: 0.0,
        y: 0.0,
        width: width as f32,
        height: height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

pub fn image_create_info(info: &ImageInfo) -> SerializedImageCreateInfo {
    SerializedImageCreateInfo {
        flags: info.flags.as_raw(),
        image_type: info.image_type.as_raw(),
        format: info.format.as_raw(),
        extent: [info.extent.width, info.extent.height, info.extent.depth],
        mip_levels: info.mip_levels,
        array_layers: info.array_layers,
        samples: info.samples.as_raw(),
        tiling: info.tiling.as_raw(),
        usage: info.usage.as_raw(),
        sharing_mode: info.sharing_mode.as_raw(),
        queue_family_indices: info.queue_family_indices.clone(),
        initial_layout: info.initial_layout.as_raw(),
    }
}

pub fn image_info_from_create(ci: &SerializedImageCreateInfo) -> ImageInfo {
    ImageInfo {
        flags: vk::ImageCreateFlags::from_raw(ci.flags),
        image_type: vk::ImageType::from_raw(ci.image_type),
        format: vk::Format::from_raw(ci.format),
        extent: vk::Extent3D {
            width: ci.extent[0],
            height: ci.extent[1],
            depth: ci.extent[2],
        },
        mip_levels: ci.mip_levels,
        array_layers: ci.array_layers,
        samples: vk::SampleCountFlags::from_raw(ci.samples),
        tiling: vk::ImageTiling::from_raw(ci.tiling),
        usage: vk::ImageUsageFlags::from_raw(ci.usage),
        sharing_mode: vk::SharingMode::from_raw(ci.sharing_mode),
        queue_family_indices: ci.queue_family_indices.clone(),
        initial_layout: vk::ImageLayout::from_raw(ci.initial_layout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_access_covers_memory_write() {
        let access = all_access();
        assert!(access.contains(vk::AccessFlags::MEMORY_WRITE));
        assert!(access.contains(vk::AccessFlags::INDIRECT_COMMAND_READ));
        assert!(!access.contains(vk::AccessFlags::from_raw(vk::AccessFlags::MEMORY_WRITE.as_raw() << 1)));
    }

    #[test]
    fn test_combined_depth_stencil_barrier_names_both_aspects() {
        let flags = barrier_aspect_flags(vk::Format::D24_UNORM_S8_UINT, vk::ImageAspectFlags::STENCIL);
        assert_eq!(flags, vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL);
        let flags = barrier_aspect_flags(vk::Format::D32_SFLOAT, vk::ImageAspectFlags::DEPTH);
        assert_eq!(flags, vk::ImageAspectFlags::DEPTH);
    }
}
