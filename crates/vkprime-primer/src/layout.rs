use std::collections::HashMap;

use ash::vk;

use crate::state::{ImageAspect, ImageObject};

/// Answers which layout a subresource is in, or should end up in.
pub trait LayoutInfo: Send + Sync {
    fn layout_of(&self, aspect: ImageAspect, layer: u32, level: u32) -> vk::ImageLayout;
}

/// The layouts an image's subresources had when the snapshot was taken.
/// Subresources the image does not have report `UNDEFINED`.
#[derive(Debug, Clone, Default)]
pub struct ImageLayouts {
    layouts: HashMap<(ImageAspect, u32, u32), vk::ImageLayout>,
}

impl ImageLayouts {
    pub fn snapshot(image: &ImageObject) -> Self {
        let mut layouts = HashMap::new();
        for (aspect, data) in &image.aspects {
            for (layer, l) in &data.layers {
                for (level, lv) in &l.levels {
                    layouts.insert((*aspect, *layer, *level), lv.layout);
                }
            }
        }
        Self { layouts }
    }
}

impl LayoutInfo for ImageLayouts {
    fn layout_of(&self, aspect: ImageAspect, layer: u32, level: u32) -> vk::ImageLayout {
        self.layouts
            .get(&(aspect, layer, level))
            .copied()
            .unwrap_or(vk::ImageLayout::UNDEFINED)
    }
}

/// One layout for every subresource.
#[derive(Debug, Clone, Copy)]
pub struct FixedLayout(pub vk::ImageLayout);

impl LayoutInfo for FixedLayout {
    fn layout_of(&self, _aspect: ImageAspect, _layer: u32, _level: u32) -> vk::ImageLayout {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ImageInfo;
    use vkprime_protocol::{ReplayHandle, ResourceType};

    #[test]
    fn test_snapshot_reads_per_subresource_layouts() {
        let mut info = ImageInfo::new_2d(vk::Format::R8G8B8A8_UNORM, 4, 4, vk::ImageUsageFlags::SAMPLED);
        info.mip_levels = 2;
        let mut image = ImageObject::new(ReplayHandle::new(ResourceType::VkImage, 3), ReplayHandle::null(), info);
        if let Some(l) = image.level_mut(ImageAspect::Color, 0, 1) {
            l.layout = vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL;
        }
        let layouts = ImageLayouts::snapshot(&image);
        assert_eq!(layouts.layout_of(ImageAspect::Color, 0, 0), vk::ImageLayout::UNDEFINED);
        assert_eq!(layouts.layout_of(ImageAspect::Color, 0, 1), vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert_eq!(layouts.layout_of(ImageAspect::Depth, 0, 0), vk::ImageLayout::UNDEFINED);
        assert_eq!(FixedLayout(vk::ImageLayout::GENERAL).layout_of(ImageAspect::Stencil, 5, 5), vk::ImageLayout::GENERAL);
    }
}
