//! Data staged for one image, ready to be primed into it.

use std::collections::BTreeMap;
use std::fmt;

use ash::vk;
use tracing::{debug, error, warn};
use vkprime_protocol::vulkan_commands::{MappedMemoryRange, VulkanCommand};
use vkprime_protocol::ReplayHandle;

use crate::builder::{Cleanup, StateBuilder, SubRangeTransition};
use crate::copy::{walk_range, BufferImageCopySession};
use crate::error::{PrimeError, PrimeResultExt, Result};
use crate::layout::LayoutInfo;
use crate::primer::ImagePrimer;
use crate::render::{RenderImage, RenderJob, RenderTarget};
use crate::state::ImageAspect;
use crate::store::ImageStoreJob;

/// How the data of an image gets into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimingStrategy {
    ByCopy,
    ByRendering,
    ByImageStore,
    ByPreinitialization,
}

impl fmt::Display for PrimingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PrimingStrategy::ByCopy => "buffer to image copy",
            PrimingStrategy::ByRendering => "rendering",
            PrimingStrategy::ByImageStore => "image store",
            PrimingStrategy::ByPreinitialization => "preinitialization",
        };
        f.write_str(name)
    }
}

pub struct ByCopy {
    pub(crate) copy_session: BufferImageCopySession,
    pub(crate) queue: ReplayHandle,
}

pub struct ByRendering {
    pub(crate) image: ReplayHandle,
    /// Canonical staging images of each aspect of the image
    pub(crate) staging_images: BTreeMap<ImageAspect, Vec<ReplayHandle>>,
    pub(crate) queue: ReplayHandle,
    pub(crate) free_callbacks: Vec<Cleanup>,
}

pub struct ByImageStore {
    pub(crate) image: ReplayHandle,
    pub(crate) queue: ReplayHandle,
    pub(crate) store_jobs: Vec<ImageStoreJob>,
    pub(crate) free_callbacks: Vec<Cleanup>,
}

pub struct ByPreinitialization {
    pub(crate) image: ReplayHandle,
    pub(crate) ranges: Vec<vk::ImageSubresourceRange>,
    pub(crate) queue: ReplayHandle,
}

/// Staged data of one image, built by
/// [`ImagePrimer::new_primeable_image_data`].
///
/// Call [`prime`](Self::prime) once, then [`free`](Self::free) once. Freeing
/// releases the staging resources after everything committed to the priming
/// queue so far has executed.
pub enum PrimeableImageData {
    ByCopy(ByCopy),
    ByRendering(ByRendering),
    ByImageStore(ByImageStore),
    ByPreinitialization(ByPreinitialization),
}

impl PrimeableImageData {
    pub fn strategy(&self) -> PrimingStrategy {
        match self {
            PrimeableImageData::ByCopy(_) => PrimingStrategy::ByCopy,
            PrimeableImageData::ByRendering(_) => PrimingStrategy::ByRendering,
            PrimeableImageData::ByImageStore(_) => PrimingStrategy::ByImageStore,
            PrimeableImageData::ByPreinitialization(_) => PrimingStrategy::ByPreinitialization,
        }
    }

    /// The queue priming commands are submitted to.
    pub fn priming_queue(&self) -> ReplayHandle {
        match self {
            PrimeableImageData::ByCopy(p) => p.queue,
            PrimeableImageData::ByRendering(p) => p.queue,
            PrimeableImageData::ByImageStore(p) => p.queue,
            PrimeableImageData::ByPreinitialization(p) => p.queue,
        }
    }

    /// Write the staged data into the image. Subresources are expected in
    /// the `src_layouts` layouts and are left in `dst_layouts`.
    pub fn prime(
        &mut self,
        sb: &mut StateBuilder,
        primer: &ImagePrimer,
        src_layouts: &dyn LayoutInfo,
        dst_layouts: &dyn LayoutInfo,
    ) -> Result<()> {
        match self {
            PrimeableImageData::ByCopy(p) => p
                .copy_session
                .rollout_buf_copies(sb, p.queue, src_layouts, dst_layouts)
                .with_context(|| {
                    format!(
                        "rolling out buffer to image copies for image {}",
                        p.copy_session.job().src_image()
                    )
                }),
            PrimeableImageData::ByRendering(p) => p.prime(sb, primer, dst_layouts),
            PrimeableImageData::ByImageStore(p) => p.prime(sb, primer, src_layouts, dst_layouts),
            PrimeableImageData::ByPreinitialization(p) => p.prime(sb, dst_layouts),
        }
    }

    /// Release the staging resources once the work already committed to the
    /// priming queue has executed.
    pub fn free(&mut self, sb: &mut StateBuilder) -> Result<()> {
        let queue = self.priming_queue();
        let callbacks = match self {
            PrimeableImageData::ByRendering(p) => std::mem::take(&mut p.free_callbacks),
            PrimeableImageData::ByImageStore(p) => std::mem::take(&mut p.free_callbacks),
            PrimeableImageData::ByCopy(_) | PrimeableImageData::ByPreinitialization(_) => Vec::new(),
        };
        sb.defer_until_all_committed_executed(queue, callbacks)
    }

    fn pending_callbacks(&self) -> usize {
        match self {
            PrimeableImageData::ByRendering(p) => p.free_callbacks.len(),
            PrimeableImageData::ByImageStore(p) => p.free_callbacks.len(),
            PrimeableImageData::ByCopy(_) | PrimeableImageData::ByPreinitialization(_) => 0,
        }
    }
}

impl fmt::Debug for PrimeableImageData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrimeableImageData")
            .field("strategy", &self.strategy())
            .field("queue", &self.priming_queue())
            .field("pending_callbacks", &self.pending_callbacks())
            .finish()
    }
}

impl Drop for PrimeableImageData {
    fn drop(&mut self) {
        let pending = self.pending_callbacks();
        if pending > 0 {
            warn!(
                strategy = %self.strategy(),
                pending,
                "primeable image data dropped without free, staging resources leak"
            );
        }
    }
}

impl ByRendering {
    fn prime(&mut self, sb: &mut StateBuilder, primer: &ImagePrimer, dst_layouts: &dyn LayoutInfo) -> Result<()> {
        let image = sb.new_state().image(self.image)?;
        let subresources = walk_range(image, &image.full_range());

        let mut task = sb.new_scratch_task_on_queue(self.queue)?;
        for (aspect, layer, level) in subresources {
            let Some(staging) = self.staging_images.get(&aspect) else {
                continue;
            };
            let job = RenderJob {
                inputs: staging
                    .iter()
                    .map(|s| RenderImage {
                        image: *s,
                        aspect: ImageAspect::Color,
                        layer,
                        level,
                        initial_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                        final_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    })
                    .collect(),
                target: RenderTarget {
                    image: self.image,
                    aspect,
                    layer,
                    level,
                    final_layout: dst_layouts.layout_of(aspect, layer, level),
                },
            };
            if let Err(e) = primer.render_handler().render(sb, &job, &mut task) {
                error!(
                    image = %self.image, ?aspect, layer, level,
                    "priming image data by rendering: {}", e
                );
            }
        }
        task.commit(sb)
            .with_context(|| format!("committing scratch task for priming image {} by rendering", self.image))
    }
}

impl ByImageStore {
    fn prime(
        &mut self,
        sb: &mut StateBuilder,
        primer: &ImagePrimer,
        src_layouts: &dyn LayoutInfo,
        dst_layouts: &dyn LayoutInfo,
    ) -> Result<()> {
        let image = sb.new_state().image(self.image)?;
        let mut to_general = Vec::new();
        let mut from_general = Vec::new();
        for (aspect, layer, level) in walk_range(image, &image.full_range()) {
            to_general.push(SubRangeTransition::single(
                aspect,
                layer,
                level,
                src_layouts.layout_of(aspect, layer, level),
                vk::ImageLayout::GENERAL,
                self.queue,
            ));
            from_general.push(SubRangeTransition::single(
                aspect,
                layer,
                level,
                vk::ImageLayout::GENERAL,
                dst_layouts.layout_of(aspect, layer, level),
                self.queue,
            ));
        }
        sb.change_image_sub_range_layout_and_ownership(self.image, &to_general)?;

        for job in &self.store_jobs {
            if let Err(e) = primer.store_handler().store(sb, job, self.queue) {
                let range = sb.new_state().image_view(job.output).map(|v| v.range).ok();
                error!(
                    image = %self.image,
                    ?range,
                    offset = ?job.offset,
                    extent = ?job.extent,
                    "priming image data by image store: {}", e
                );
            }
        }

        sb.change_image_sub_range_layout_and_ownership(self.image, &from_general)
    }
}

impl ByPreinitialization {
    fn prime(&mut self, sb: &mut StateBuilder, dst_layouts: &dyn LayoutInfo) -> Result<()> {
        let old_state = sb.old_state_arc();
        let old = old_state
            .image(self.image)
            .context("priming by preinitialization, image missing in old state")?;
        let new = sb
            .new_state()
            .image(self.image)
            .context("priming by preinitialization, image missing in new state")?;
        let bound = new.bound_memory.ok_or_else(|| {
            PrimeError::unsupported(self.image, "preinitialized image has no bound memory")
        })?;
        let device = new.device;
        let offset = bound.offset;
        let size = old.memory_requirements.size;

        sb.write(VulkanCommand::MapMemory {
            device,
            memory: bound.memory,
            offset,
            size,
            flags: 0,
        })?;

        let mut mapped = vec![0u8; size as usize];
        let mut transitions = Vec::new();
        for range in &self.ranges {
            for (aspect, layer, level) in walk_range(old, range) {
                let Some(data) = old.level(aspect, layer, level) else {
                    continue;
                };
                match data.linear_layout {
                    Some(linear) => {
                        let start = linear.offset as usize;
                        let end = start + data.data.len();
                        if end > mapped.len() {
                            error!(
                                image = %self.image, ?aspect, layer, level,
                                "subresource data ends at {} beyond the {} bytes bound", end, size
                            );
                        } else {
                            mapped[start..end].copy_from_slice(&data.data);
                        }
                    }
                    None => {
                        error!(image = %self.image, ?aspect, layer, level, "subresource has no linear layout");
                    }
                }
                transitions.push(SubRangeTransition::single(
                    aspect,
                    layer,
                    level,
                    vk::ImageLayout::PREINITIALIZED,
                    dst_layouts.layout_of(aspect, layer, level),
                    self.queue,
                ));
            }
        }

        sb.write(VulkanCommand::FlushMappedMemoryRanges {
            device,
            ranges: vec![MappedMemoryRange {
                memory: bound.memory,
                offset,
                size,
            }],
            data: vec![mapped],
        })?;
        sb.write(VulkanCommand::UnmapMemory {
            device,
            memory: bound.memory,
            written_data: None,
            offset,
        })?;
        debug!(image = %self.image, size, "preinitialized image memory written");

        sb.change_image_sub_range_layout_and_ownership(self.image, &transitions)
    }
}
