//! Buffer to image copies of captured subresource content.
//!
//! A [`BufferImageCopySession`] gathers one [`CopyDescriptor`] per
//! (destination image, subresource or sparse block) and rolls them out as
//! scratch buffer uploads batched under the configured scratch buffer size.

use std::collections::BTreeMap;
use std::ops::Range;

use ash::vk;
use tracing::{debug, error};
use vkprime_protocol::vulkan_commands::{RecordedCommand, SerializedBufferImageCopy};
use vkprime_protocol::ReplayHandle;

use crate::builder::StateBuilder;
use crate::cmd;
use crate::error::{PrimeError, PrimeResultExt, Result};
use crate::format;
use crate::layout::LayoutInfo;
use crate::state::{ImageAspect, ImageObject};

/// Destination images for one source aspect.
#[derive(Debug, Clone)]
pub struct CopyDestination {
    pub aspect: ImageAspect,
    pub images: Vec<ReplayHandle>,
}

/// Which destination images receive the data of each source aspect.
#[derive(Debug, Clone)]
pub struct BufImgCopyJob {
    src_image: ReplayHandle,
    src_aspects_to_dsts: BTreeMap<ImageAspect, CopyDestination>,
}

impl BufImgCopyJob {
    pub fn new(src_image: ReplayHandle) -> Self {
        Self {
            src_image,
            src_aspects_to_dsts: BTreeMap::new(),
        }
    }

    pub fn src_image(&self) -> ReplayHandle {
        self.src_image
    }

    /// Register destinations for `src_aspect`. Every registration of a source
    /// aspect must name the same destination aspect.
    pub fn add_dst(
        &mut self,
        src_aspect: ImageAspect,
        dst_aspect: ImageAspect,
        dst_images: &[ReplayHandle],
    ) -> Result<()> {
        let dst = self
            .src_aspects_to_dsts
            .entry(src_aspect)
            .or_insert_with(|| CopyDestination {
                aspect: dst_aspect,
                images: Vec::new(),
            });
        if dst.aspect != dst_aspect {
            return Err(PrimeError::InvalidArgument(format!(
                "new dst aspect {:?} does not match the existing one {:?} for src aspect {:?}",
                dst_aspect, dst.aspect, src_aspect
            )));
        }
        dst.images.extend_from_slice(dst_images);
        Ok(())
    }

    pub fn destinations(&self) -> impl Iterator<Item = (&ImageAspect, &CopyDestination)> {
        self.src_aspects_to_dsts.iter()
    }
}

/// One region of a destination image and the bytes to place there.
#[derive(Debug, Clone)]
pub struct CopyDescriptor {
    pub dst_aspect: ImageAspect,
    pub layer: u32,
    pub level: u32,
    pub offset: vk::Offset3D,
    pub extent: vk::Extent3D,
    /// Bytes in the destination aspect's format, padded to eight
    pub content: Vec<u8>,
}

impl CopyDescriptor {
    pub fn size(&self) -> u64 {
        self.content.len() as u64
    }

    fn to_region(&self, buffer_offset: u64) -> SerializedBufferImageCopy {
        SerializedBufferImageCopy {
            buffer_offset,
            buffer_row_length: 0,
            buffer_image_height: 0,
            image_subresource: cmd::subresource_layers(self.dst_aspect.flags(), self.level, self.layer),
            image_offset: [self.offset.x, self.offset.y, self.offset.z],
            image_extent: [self.extent.width, self.extent.height, self.extent.depth],
        }
    }
}

pub struct BufferImageCopySession {
    job: BufImgCopyJob,
    copies: BTreeMap<ReplayHandle, Vec<CopyDescriptor>>,
    /// Position of each destination among the images of its aspect
    indices: BTreeMap<ReplayHandle, usize>,
    total_size: u64,
    max_piece_size: u64,
}

impl BufferImageCopySession {
    pub fn new(sb: &StateBuilder, job: BufImgCopyJob) -> Self {
        let config = sb.config();
        let alignment = config.scratch_buffer_alignment.max(1);
        let mut copies = BTreeMap::new();
        for (_, dst) in job.destinations() {
            for img in &dst.images {
                copies.insert(*img, Vec::new());
            }
        }
        Self {
            job,
            copies,
            indices: BTreeMap::new(),
            total_size: 0,
            max_piece_size: (config.scratch_buffer_size / alignment * alignment).max(alignment),
        }
    }

    pub fn job(&self) -> &BufImgCopyJob {
        &self.job
    }

    pub fn copies(&self) -> &BTreeMap<ReplayHandle, Vec<CopyDescriptor>> {
        &self.copies
    }

    pub fn index_of(&self, dst_image: ReplayHandle) -> usize {
        self.indices.get(&dst_image).copied().unwrap_or(0)
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Collect whole-level copies for every subresource in `range`.
    pub fn collect_copies_from_subresource_range(
        &mut self,
        sb: &StateBuilder,
        range: &vk::ImageSubresourceRange,
    ) -> Result<()> {
        let src = sb.old_state().image(self.job.src_image)?;
        for (aspect, layer, level) in walk_range(src, range) {
            let extent = src.info.level_extent(level);
            self.collect(sb, src, aspect, layer, level, vk::Offset3D::default(), extent);
        }
        Ok(())
    }

    /// Collect one copy per bound sparse block of the source image.
    pub fn collect_copies_from_sparse_image_bindings(&mut self, sb: &StateBuilder) -> Result<()> {
        let src = sb.old_state().image(self.job.src_image)?;
        for binding in &src.sparse_bindings {
            self.collect(
                sb,
                src,
                binding.aspect,
                binding.layer,
                binding.level,
                binding.offset,
                binding.extent,
            );
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn collect(
        &mut self,
        sb: &StateBuilder,
        src: &ImageObject,
        aspect: ImageAspect,
        layer: u32,
        level: u32,
        offset: vk::Offset3D,
        extent: vk::Extent3D,
    ) {
        let Some(dst) = self.job.src_aspects_to_dsts.get(&aspect) else {
            return;
        };
        for (index, dst_image) in dst.images.iter().enumerate() {
            let result = sb
                .new_state()
                .image(*dst_image)
                .and_then(|dst_obj| {
                    get_copy_and_data(dst_obj, dst.aspect, src, aspect, layer, level, offset, extent)
                })
                .and_then(|desc| split_oversized(desc, dst_format_of(sb, *dst_image), self.max_piece_size));
            match result {
                Ok(pieces) => {
                    for piece in pieces {
                        self.total_size += piece.size();
                        self.copies.entry(*dst_image).or_default().push(piece);
                    }
                    self.indices.insert(*dst_image, index);
                }
                Err(e) => {
                    error!(
                        image = %src.handle, ?aspect, layer, level,
                        "skipping subresource for buffer to image copy: {}", e
                    );
                }
            }
        }
    }

    /// Emit the copies: per destination image, one batched transition to
    /// TRANSFER_DST_OPTIMAL, the scratch buffer uploads, then one batched
    /// transition to the final layouts.
    pub fn rollout_buf_copies(
        &self,
        sb: &mut StateBuilder,
        queue: ReplayHandle,
        init_layouts: &dyn LayoutInfo,
        final_layouts: &dyn LayoutInfo,
    ) -> Result<()> {
        if self.total_size == 0 || self.copies.values().all(Vec::is_empty) {
            return Err(PrimeError::InvalidArgument(
                "no content for buffer to image copy".to_string(),
            ));
        }
        let max = sb.config().scratch_buffer_size;
        let alignment = sb.config().scratch_buffer_alignment;

        for (_, dst) in self.job.destinations() {
            for dst_image in &dst.images {
                let (format, layers, levels) = {
                    let img = sb.new_state().image(*dst_image)?;
                    (img.info.format, img.info.array_layers, img.info.mip_levels)
                };
                let aspect_mask = cmd::barrier_aspect_flags(format, dst.aspect.flags());

                let mut pre = Vec::new();
                let mut post = Vec::new();
                for layer in 0..layers {
                    for level in 0..levels {
                        let range = cmd::single_range(aspect_mask, layer, level);
                        pre.push(cmd::layout_barrier(
                            *dst_image,
                            init_layouts.layout_of(dst.aspect, layer, level),
                            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                            &range,
                        ));
                        post.push(cmd::layout_barrier(
                            *dst_image,
                            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                            final_layouts.layout_of(dst.aspect, layer, level),
                            &range,
                        ));
                    }
                }

                let mut task = sb.new_scratch_task_on_queue(queue)?;
                task.record_command(cmd::image_barriers(pre));
                task.commit(sb)
                    .context("committing pre-copy destination image layout transition")?;

                let copies = self.copies.get(dst_image).map(Vec::as_slice).unwrap_or(&[]);
                let sizes: Vec<u64> = copies.iter().map(CopyDescriptor::size).collect();
                for batch in plan_scratch_batches(&sizes, max, alignment) {
                    let mut content = Vec::new();
                    let mut regions = Vec::new();
                    for desc in &copies[batch] {
                        regions.push(desc.to_region(content.len() as u64));
                        content.extend_from_slice(&desc.content);
                    }
                    let size = content.len() as u64;
                    let mut task = sb.new_scratch_task_on_queue(queue)?;
                    let buffer = task.new_buffer(sb, &content, vk::BufferUsageFlags::TRANSFER_SRC)?;
                    task.record_command(cmd::pipeline_barrier(
                        vk::PipelineStageFlags::ALL_COMMANDS,
                        vk::PipelineStageFlags::ALL_COMMANDS,
                        Vec::new(),
                        vec![cmd::buffer_barrier(buffer, cmd::all_access(), cmd::all_access(), 0, size)],
                        Vec::new(),
                    ));
                    task.record_command(RecordedCommand::CopyBufferToImage {
                        src_buffer: buffer,
                        dst_image: *dst_image,
                        dst_image_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL.as_raw(),
                        regions,
                    });
                    task.record_command(cmd::pipeline_barrier(
                        vk::PipelineStageFlags::ALL_COMMANDS,
                        vk::PipelineStageFlags::ALL_COMMANDS,
                        Vec::new(),
                        Vec::new(),
                        Vec::new(),
                    ));
                    task.commit(sb).with_context(|| {
                        format!("committing buffer image copy task, scratch buffer size: {}", size)
                    })?;
                    debug!(image = %dst_image, size, "scratch buffer copy committed");
                }

                let mut task = sb.new_scratch_task_on_queue(queue)?;
                task.record_command(cmd::image_barriers(post));
                task.commit(sb)
                    .context("committing post-copy destination image layout transition")?;
            }
        }
        Ok(())
    }
}

fn dst_format_of(sb: &StateBuilder, image: ReplayHandle) -> vk::Format {
    sb.new_state()
        .images
        .get(&image)
        .map(|i| i.info.format)
        .unwrap_or(vk::Format::UNDEFINED)
}

/// Every (aspect, layer, level) of `image` inside `range`.
pub fn walk_range(
    image: &ImageObject,
    range: &vk::ImageSubresourceRange,
) -> Vec<(ImageAspect, u32, u32)> {
    let layer_count = if range.layer_count == vk::REMAINING_ARRAY_LAYERS {
        image.info.array_layers.saturating_sub(range.base_array_layer)
    } else {
        range.layer_count
    };
    let level_count = if range.level_count == vk::REMAINING_MIP_LEVELS {
        image.info.mip_levels.saturating_sub(range.base_mip_level)
    } else {
        range.level_count
    };
    let mut out = Vec::new();
    for aspect in ImageAspect::from_flags(range.aspect_mask & image.aspect) {
        for layer in range.base_array_layer..range.base_array_layer + layer_count {
            for level in range.base_mip_level..range.base_mip_level + level_count {
                out.push((aspect, layer, level));
            }
        }
    }
    out
}

/// Texels of a box inside one subresource's tightly packed data.
/// Whether `[start, start + len)` lies inside `[0, limit)`.
fn within(start: i32, len: u32, limit: u32) -> bool {
    u32::try_from(start)
        .ok()
        .and_then(|start| start.checked_add(len))
        .is_some_and(|end| end <= limit)
}

pub fn extract_region(
    data: &[u8],
    level_extent: vk::Extent3D,
    element_size: usize,
    offset: vk::Offset3D,
    extent: vk::Extent3D,
) -> Result<Vec<u8>> {
    let whole = offset.x == 0
        && offset.y == 0
        && offset.z == 0
        && extent.width == level_extent.width
        && extent.height == level_extent.height
        && extent.depth == level_extent.depth;
    let w = level_extent.width as usize;
    let h = level_extent.height as usize;
    let expected = w * h * level_extent.depth as usize * element_size;
    if data.len() < expected {
        return Err(PrimeError::DataConversion(format!(
            "subresource holds {} bytes, {} expected",
            data.len(),
            expected
        )));
    }
    if whole {
        return Ok(data[..expected].to_vec());
    }
    if !within(offset.x, extent.width, level_extent.width)
        || !within(offset.y, extent.height, level_extent.height)
        || !within(offset.z, extent.depth, level_extent.depth)
    {
        return Err(PrimeError::DataConversion(format!(
            "region {:?} + {:?} is outside the subresource",
            offset, extent
        )));
    }
    let row = extent.width as usize * element_size;
    let mut out = Vec::with_capacity(row * extent.height as usize * extent.depth as usize);
    for z in 0..extent.depth as usize {
        for y in 0..extent.height as usize {
            let texel = (offset.z as usize + z) * h * w + (offset.y as usize + y) * w + offset.x as usize;
            let start = texel * element_size;
            out.extend_from_slice(&data[start..start + row]);
        }
    }
    Ok(out)
}

/// Build the copy of one region of the source image's `src_aspect` into
/// `dst_aspect` of `dst`, converting to the destination's encoding where the
/// formats differ.
#[allow(clippy::too_many_arguments)]
pub fn get_copy_and_data(
    dst: &ImageObject,
    dst_aspect: ImageAspect,
    src: &ImageObject,
    src_aspect: ImageAspect,
    layer: u32,
    level: u32,
    offset: vk::Offset3D,
    extent: vk::Extent3D,
) -> Result<CopyDescriptor> {
    let src_format = src.info.format;
    let level_data = src
        .level(src_aspect, layer, level)
        .ok_or_else(|| PrimeError::DataConversion("subresource does not exist".to_string()))?;
    if level_data.data.is_empty() {
        return Err(PrimeError::DataConversion("subresource has no data".to_string()));
    }
    let element_size = format::element_size(src_format, src_aspect)? as usize;
    let region = extract_region(
        &level_data.data,
        src.info.level_extent(level),
        element_size,
        offset,
        extent,
    )?;

    let packed_depth = src_aspect == ImageAspect::Depth
        && matches!(
            src_format,
            vk::Format::D24_UNORM_S8_UINT | vk::Format::X8_D24_UNORM_PACK32
        );
    let mut content = if dst.info.format != src_format || packed_depth {
        format::unpack(&region, src_format, src_aspect)?.0
    } else {
        region
    };
    content.resize(content.len().next_multiple_of(8), 0);

    let expected = format::region_size(extent, dst.info.format, dst_aspect)?.aligned_size;
    if content.len() as u64 != expected {
        return Err(PrimeError::DataConversion(format!(
            "size of unpacked data does not match expectation, actual: {}, expected: {}, src format: {:?}, dst format: {:?}",
            content.len(),
            expected,
            src_format,
            dst.info.format
        )));
    }
    Ok(CopyDescriptor {
        dst_aspect,
        layer,
        level,
        offset,
        extent,
        content,
    })
}

/// Split a descriptor whose content exceeds `limit` into depth slices, or
/// rows of a slice, that each fit.
pub fn split_oversized(desc: CopyDescriptor, dst_format: vk::Format, limit: u64) -> Result<Vec<CopyDescriptor>> {
    if desc.size() <= limit {
        return Ok(vec![desc]);
    }
    let es = format::element_size(dst_format, desc.dst_aspect)? as u64;
    let row = desc.extent.width as u64 * es;
    let slice = row * desc.extent.height as u64;
    let budget = limit.saturating_sub(8);
    let piece = |z: u32, y: u32, depth: u32, height: u32| -> CopyDescriptor {
        let start = (z as u64 * slice + y as u64 * row) as usize;
        let len = (row * height as u64 * depth as u64) as usize;
        let mut content = desc.content[start..start + len].to_vec();
        content.resize(content.len().next_multiple_of(8), 0);
        CopyDescriptor {
            dst_aspect: desc.dst_aspect,
            layer: desc.layer,
            level: desc.level,
            offset: vk::Offset3D {
                x: desc.offset.x,
                y: desc.offset.y + y as i32,
                z: desc.offset.z + z as i32,
            },
            extent: vk::Extent3D {
                width: desc.extent.width,
                height,
                depth,
            },
            content,
        }
    };

    let mut pieces = Vec::new();
    if slice > 0 && slice <= budget {
        let per = (budget / slice) as u32;
        let mut z = 0;
        while z < desc.extent.depth {
            let depth = per.min(desc.extent.depth - z);
            pieces.push(piece(z, 0, depth, desc.extent.height));
            z += depth;
        }
    } else if row > 0 && row <= budget {
        let per = (budget / row) as u32;
        for z in 0..desc.extent.depth {
            let mut y = 0;
            while y < desc.extent.height {
                let height = per.min(desc.extent.height - y);
                pieces.push(piece(z, y, 1, height));
                y += height;
            }
        }
    } else {
        return Err(PrimeError::DataConversion(format!(
            "a single row of {} bytes does not fit the {} byte scratch buffer",
            row, limit
        )));
    }
    Ok(pieces)
}

/// Greedy batching of content pieces into scratch buffers: a batch always
/// takes its first piece, then keeps adding pieces while the running offset,
/// rounded up to `alignment`, stays within `max`.
pub fn plan_scratch_batches(sizes: &[u64], max: u64, alignment: u64) -> Vec<Range<usize>> {
    let alignment = alignment.max(1);
    let mut batches = Vec::new();
    let mut start = 0;
    while start < sizes.len() {
        let mut offset = sizes[start];
        let mut end = start + 1;
        while end < sizes.len() && (offset + sizes[end]).next_multiple_of(alignment) <= max {
            offset += sizes[end];
            end += 1;
        }
        batches.push(start..end);
        start = end;
    }
    batches
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batches_respect_limit_and_cover_everything() {
        // Small LCG so the sizes are varied but reproducible.
        let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
        let mut next = || {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            seed >> 33
        };
        let max = 4096;
        for _ in 0..200 {
            let n = (next() % 40) as usize;
            let sizes: Vec<u64> = (0..n).map(|_| (next() % 1024 + 1) * 8).collect();
            let batches = plan_scratch_batches(&sizes, max, 256);
            let mut covered = 0;
            for b in &batches {
                assert_eq!(b.start, covered);
                covered = b.end;
                let total: u64 = sizes[b.clone()].iter().sum();
                assert!(total.next_multiple_of(256) <= max, "batch {:?} of {:?}", b, sizes);
            }
            assert_eq!(covered, sizes.len());
        }
    }

    #[test]
    fn test_region_extraction_picks_rows() {
        // 4x2 image, one byte per texel
        let data: Vec<u8> = (0..8).collect();
        let level = vk::Extent3D { width: 4, height: 2, depth: 1 };
        let region = extract_region(
            &data,
            level,
            1,
            vk::Offset3D { x: 1, y: 0, z: 0 },
            vk::Extent3D { width: 2, height: 2, depth: 1 },
        )
        .expect("region");
        assert_eq!(region, vec![1, 2, 5, 6]);
    }

    #[test]
    fn test_region_extraction_rejects_wrapping_bounds() {
        let data: Vec<u8> = (0..8).collect();
        let level = vk::Extent3D { width: 4, height: 2, depth: 1 };
        let cases = [
            (vk::Offset3D { x: 2, y: 0, z: 0 }, vk::Extent3D { width: u32::MAX, height: 1, depth: 1 }),
            (vk::Offset3D { x: 0, y: i32::MAX, z: 0 }, vk::Extent3D { width: 1, height: u32::MAX, depth: 1 }),
            (vk::Offset3D { x: -1, y: 0, z: 0 }, vk::Extent3D { width: 1, height: 1, depth: 1 }),
        ];
        for (offset, extent) in cases {
            match extract_region(&data, level, 1, offset, extent) {
                Err(PrimeError::DataConversion(_)) => {}
                other => panic!("expected a bounds error for {:?} + {:?}, got {:?}", offset, extent, other),
            }
        }
    }

    #[test]
    fn test_oversized_descriptor_split_by_rows() {
        let desc = CopyDescriptor {
            dst_aspect: ImageAspect::Color,
            layer: 0,
            level: 0,
            offset: vk::Offset3D::default(),
            extent: vk::Extent3D { width: 16, height: 8, depth: 1 },
            content: (0..16 * 8 * 4).map(|i| i as u8).collect(),
        };
        let pieces = split_oversized(desc, vk::Format::R8G8B8A8_UNORM, 256).expect("split");
        assert!(pieces.iter().all(|p| p.size() <= 256));
        let rows: u32 = pieces.iter().map(|p| p.extent.height).sum();
        assert_eq!(rows, 8);
        assert_eq!(pieces[1].offset.y as u32, pieces[0].extent.height);
        assert_eq!(pieces[1].content[0], (pieces[0].extent.height * 64) as u8);
    }

    #[test]
    fn test_add_dst_rejects_conflicting_aspect() {
        let img = ReplayHandle::new(vkprime_protocol::ResourceType::VkImage, 1);
        let mut job = BufImgCopyJob::new(img);
        job.add_dst(ImageAspect::Depth, ImageAspect::Color, &[img]).expect("first");
        match job.add_dst(ImageAspect::Depth, ImageAspect::Depth, &[img]) {
            Err(PrimeError::InvalidArgument(_)) => {}
            other => panic!("expected InvalidArgument, got {:?}", other),
        }
    }
}
