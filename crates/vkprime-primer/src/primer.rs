//! The image primer: picks a strategy for an image and stages its data.

use std::collections::BTreeMap;

use ash::vk;
use tracing::{debug, warn};
use vkprime_protocol::vulkan_commands::{SerializedComponentMapping, VulkanCommand};
use vkprime_protocol::{ReplayHandle, ResourceType};

use crate::builder::{Cleanup, StateBuilder, SubRangeTransition};
use crate::cmd;
use crate::copy::{walk_range, BufImgCopyJob, BufferImageCopySession};
use crate::error::{PrimeError, PrimeResultExt, Result};
use crate::format;
use crate::layout::{FixedLayout, ImageLayouts, LayoutInfo};
use crate::primeable::{
    ByCopy, ByImageStore, ByPreinitialization, ByRendering, PrimeableImageData, PrimingStrategy,
};
use crate::render::RenderHandler;
use crate::state::{ImageAspect, ImageInfo, ImageObject};
use crate::store::{ImageStoreHandler, ImageStoreJob};

/// Entry point of image priming. Owns the render and image store handlers,
/// whose per-device objects live until [`free`](Self::free).
#[derive(Default)]
pub struct ImagePrimer {
    render: RenderHandler,
    store: ImageStoreHandler,
}

impl ImagePrimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn render_handler(&self) -> &RenderHandler {
        &self.render
    }

    pub fn store_handler(&self) -> &ImageStoreHandler {
        &self.store
    }

    /// Destroy the cached pipelines, layouts and descriptor objects.
    pub fn free(&self, sb: &mut StateBuilder) -> Result<()> {
        self.render.free(sb)?;
        self.store.free(sb)
    }

    /// Pick the strategy `image` can be primed by and stage the content of
    /// `ranges` for it.
    ///
    /// With `from_host_data` the content comes from the captured image in the
    /// old state. Without it the content is whatever the new image holds on
    /// the device, which only image store priming can read back.
    pub fn new_primeable_image_data(
        &self,
        sb: &mut StateBuilder,
        image: ReplayHandle,
        ranges: &[vk::ImageSubresourceRange],
        from_host_data: bool,
    ) -> Result<PrimeableImageData> {
        let img = sb.new_state().image(image)?.clone();
        let format = img.info.format;
        if format::is_compressed(format) {
            return Err(PrimeError::unsupported(image, format!("compressed format {:?}", format)));
        }
        if format::is_multi_planar(format) {
            return Err(PrimeError::unsupported(image, format!("multi-planar format {:?}", format)));
        }

        let strategy = select_strategy(&img.info).ok_or(PrimeError::NoViableStrategy(image))?;
        if !from_host_data && strategy != PrimingStrategy::ByImageStore {
            return Err(PrimeError::NotImplemented(format!(
                "priming image {} by {} from device data",
                image, strategy
            )));
        }
        let queue = self.priming_queue(sb, &img, strategy)?;
        debug!(%image, %queue, %strategy, from_host_data, "building primeable image data");

        let data = match strategy {
            PrimingStrategy::ByCopy => self.new_by_copy(sb, &img, ranges, queue),
            PrimingStrategy::ByRendering => self.new_by_rendering(sb, &img, ranges, queue),
            PrimingStrategy::ByImageStore if from_host_data => {
                self.new_by_image_store(sb, &img, ranges, queue)
            }
            PrimingStrategy::ByImageStore => self.new_by_image_store_from_device(sb, &img, ranges, queue),
            PrimingStrategy::ByPreinitialization => Ok(PrimeableImageData::ByPreinitialization(
                ByPreinitialization {
                    image,
                    ranges: ranges.to_vec(),
                    queue,
                },
            )),
        };
        data.with_context(|| format!("building data for priming image {} by {}", image, strategy))
    }

    fn priming_queue(
        &self,
        sb: &StateBuilder,
        img: &ImageObject,
        strategy: PrimingStrategy,
    ) -> Result<ReplayHandle> {
        let flags = match strategy {
            PrimingStrategy::ByCopy | PrimingStrategy::ByPreinitialization => {
                vk::QueueFlags::TRANSFER | vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE
            }
            PrimingStrategy::ByRendering => vk::QueueFlags::GRAPHICS,
            PrimingStrategy::ByImageStore => vk::QueueFlags::COMPUTE,
        };
        let family_indices: &[u32] = if img.info.sharing_mode == vk::SharingMode::CONCURRENT {
            &img.info.queue_family_indices
        } else {
            &[]
        };
        let candidates = sb
            .old_state()
            .images
            .get(&img.handle)
            .map(|old| old.last_bound_queues.clone())
            .unwrap_or_default();
        sb.get_queue_for(flags, family_indices, img.device, &candidates)
            .ok_or_else(|| PrimeError::NoQueue {
                image: img.handle,
                capability: format!("{:?}", flags),
            })
    }

    fn new_by_copy(
        &self,
        sb: &mut StateBuilder,
        img: &ImageObject,
        ranges: &[vk::ImageSubresourceRange],
        queue: ReplayHandle,
    ) -> Result<PrimeableImageData> {
        let mut job = BufImgCopyJob::new(img.handle);
        for aspect in ImageAspect::from_flags(img.aspect) {
            job.add_dst(aspect, aspect, &[img.handle])?;
        }
        let copy_session = collect_copies(sb, job, img, ranges)?;
        Ok(PrimeableImageData::ByCopy(ByCopy { copy_session, queue }))
    }

    fn new_by_rendering(
        &self,
        sb: &mut StateBuilder,
        img: &ImageObject,
        ranges: &[vk::ImageSubresourceRange],
        queue: ReplayHandle,
    ) -> Result<PrimeableImageData> {
        let usage = vk::ImageUsageFlags::TRANSFER_DST
            | vk::ImageUsageFlags::INPUT_ATTACHMENT
            | vk::ImageUsageFlags::SAMPLED;
        let mut free_callbacks = Vec::new();
        let mut staging_images = BTreeMap::new();
        let mut job = BufImgCopyJob::new(img.handle);

        let staged = (|| -> Result<BufferImageCopySession> {
            for aspect in ImageAspect::from_flags(img.aspect) {
                let (images, cleanups) =
                    create_32bit_uint_color_staging_images_for_aspect(sb, img, aspect, usage)?;
                free_callbacks.extend(cleanups);
                job.add_dst(aspect, ImageAspect::Color, &images)?;
                staging_images.insert(aspect, images);
            }
            let session = collect_copies(sb, job, img, ranges)?;
            session
                .rollout_buf_copies(
                    sb,
                    queue,
                    &FixedLayout(vk::ImageLayout::UNDEFINED),
                    &FixedLayout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL),
                )
                .context("copying image data to staging images")?;
            Ok(session)
        })();

        match staged {
            Ok(_) => Ok(PrimeableImageData::ByRendering(ByRendering {
                image: img.handle,
                staging_images,
                queue,
                free_callbacks,
            })),
            Err(e) => Err(release_on_error(sb, queue, free_callbacks, e)),
        }
    }

    fn new_by_image_store(
        &self,
        sb: &mut StateBuilder,
        img: &ImageObject,
        ranges: &[vk::ImageSubresourceRange],
        queue: ReplayHandle,
    ) -> Result<PrimeableImageData> {
        let usage = vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::STORAGE;
        let mut free_callbacks = Vec::new();
        let mut job = BufImgCopyJob::new(img.handle);

        let staged = (|| -> Result<Vec<ImageStoreJob>> {
            for aspect in ImageAspect::from_flags(img.aspect) {
                let (images, cleanups) =
                    create_32bit_uint_color_staging_images_for_aspect(sb, img, aspect, usage)?;
                free_callbacks.extend(cleanups);
                job.add_dst(aspect, ImageAspect::Color, &images)?;
            }
            let session = collect_copies(sb, job, img, ranges)?;
            session
                .rollout_buf_copies(
                    sb,
                    queue,
                    &FixedLayout(vk::ImageLayout::UNDEFINED),
                    &FixedLayout(vk::ImageLayout::GENERAL),
                )
                .context("copying image data to staging images")?;

            let mut views = ViewCache::default();
            let mut jobs = Vec::new();
            for (src_aspect, dst) in session.job().destinations() {
                for staging in &dst.images {
                    let Some(copies) = session.copies().get(staging) else {
                        continue;
                    };
                    for copy in copies {
                        let input = views.get(sb, *staging, dst.aspect, copy.layer, copy.level, &mut free_callbacks)?;
                        let output = views.get(sb, img.handle, *src_aspect, copy.layer, copy.level, &mut free_callbacks)?;
                        jobs.push(ImageStoreJob {
                            input,
                            input_index: session.index_of(*staging) as u32,
                            output,
                            offset: copy.offset,
                            extent: copy.extent,
                        });
                    }
                }
            }
            Ok(jobs)
        })();

        match staged {
            Ok(store_jobs) => Ok(PrimeableImageData::ByImageStore(ByImageStore {
                image: img.handle,
                queue,
                store_jobs,
                free_callbacks,
            })),
            Err(e) => Err(release_on_error(sb, queue, free_callbacks, e)),
        }
    }

    /// Copy what the new image holds on the device into a staging image of
    /// the same format, and stage stores that write it back.
    fn new_by_image_store_from_device(
        &self,
        sb: &mut StateBuilder,
        img: &ImageObject,
        ranges: &[vk::ImageSubresourceRange],
        queue: ReplayHandle,
    ) -> Result<PrimeableImageData> {
        let mut free_callbacks = Vec::new();

        let staged = (|| -> Result<Vec<ImageStoreJob>> {
            let (staging, cleanup) = create_same_staging_image(sb, img, vk::ImageLayout::GENERAL, queue)?;
            free_callbacks.push(cleanup);

            let mut views = ViewCache::default();
            let mut jobs = Vec::new();
            let mut add_job = |sb: &mut StateBuilder,
                               callbacks: &mut Vec<Cleanup>,
                               aspect: ImageAspect,
                               layer: u32,
                               level: u32,
                               offset: vk::Offset3D,
                               extent: vk::Extent3D|
             -> Result<()> {
                let input = views.get(sb, staging, aspect, layer, level, callbacks)?;
                let output = views.get(sb, img.handle, aspect, layer, level, callbacks)?;
                jobs.push(ImageStoreJob {
                    input,
                    input_index: 0,
                    output,
                    offset,
                    extent,
                });
                Ok(())
            };
            for range in ranges {
                for (aspect, layer, level) in walk_range(img, range) {
                    let extent = img.info.level_extent(level);
                    add_job(sb, &mut free_callbacks, aspect, layer, level, vk::Offset3D::default(), extent)?;
                }
            }
            if img.info.flags.contains(vk::ImageCreateFlags::SPARSE_RESIDENCY) {
                for binding in &img.sparse_bindings {
                    add_job(
                        sb,
                        &mut free_callbacks,
                        binding.aspect,
                        binding.layer,
                        binding.level,
                        binding.offset,
                        binding.extent,
                    )?;
                }
            }

            let current = ImageLayouts::snapshot(sb.new_state().image(img.handle)?);
            let mut to_general = Vec::new();
            let mut back = Vec::new();
            for (aspect, layer, level) in walk_range(img, &img.full_range()) {
                let layout = current.layout_of(aspect, layer, level);
                to_general.push(SubRangeTransition::single(
                    aspect,
                    layer,
                    level,
                    layout,
                    vk::ImageLayout::GENERAL,
                    queue,
                ));
                // UNDEFINED is not a valid transition target.
                let layout = if layout == vk::ImageLayout::UNDEFINED {
                    vk::ImageLayout::GENERAL
                } else {
                    layout
                };
                back.push(SubRangeTransition::single(
                    aspect,
                    layer,
                    level,
                    vk::ImageLayout::GENERAL,
                    layout,
                    queue,
                ));
            }
            sb.change_image_sub_range_layout_and_ownership(img.handle, &to_general)
                .context("moving image to GENERAL layout before reading it back")?;
            for job in &jobs {
                let reversed = ImageStoreJob {
                    input: job.output,
                    output: job.input,
                    ..*job
                };
                self.store
                    .store(sb, &reversed, queue)
                    .context("storing device data into staging image")?;
            }
            sb.change_image_sub_range_layout_and_ownership(img.handle, &back)
                .context("restoring image layouts after reading it back")?;
            Ok(jobs)
        })();

        match staged {
            Ok(store_jobs) => Ok(PrimeableImageData::ByImageStore(ByImageStore {
                image: img.handle,
                queue,
                store_jobs,
                free_callbacks,
            })),
            Err(e) => Err(release_on_error(sb, queue, free_callbacks, e)),
        }
    }
}

/// The first strategy `info` allows, in order of preference.
pub fn select_strategy(info: &ImageInfo) -> Option<PrimingStrategy> {
    let usage = info.usage;
    if usage.contains(vk::ImageUsageFlags::TRANSFER_DST) && !format::is_depth_stencil(info.format) {
        Some(PrimingStrategy::ByCopy)
    } else if usage.intersects(
        vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
    ) {
        Some(PrimingStrategy::ByRendering)
    } else if usage.contains(vk::ImageUsageFlags::STORAGE) {
        Some(PrimingStrategy::ByImageStore)
    } else if info.tiling == vk::ImageTiling::LINEAR
        && info.initial_layout == vk::ImageLayout::PREINITIALIZED
    {
        Some(PrimingStrategy::ByPreinitialization)
    } else {
        None
    }
}

fn collect_copies(
    sb: &StateBuilder,
    job: BufImgCopyJob,
    img: &ImageObject,
    ranges: &[vk::ImageSubresourceRange],
) -> Result<BufferImageCopySession> {
    let mut session = BufferImageCopySession::new(sb, job);
    for range in ranges {
        session.collect_copies_from_subresource_range(sb, range)?;
    }
    if img.info.flags.contains(vk::ImageCreateFlags::SPARSE_RESIDENCY) {
        session.collect_copies_from_sparse_image_bindings(sb)?;
    }
    Ok(session)
}

/// Queue the release of whatever staging objects exist so far, then hand
/// back the error that stopped staging.
fn release_on_error(
    sb: &mut StateBuilder,
    queue: ReplayHandle,
    callbacks: Vec<Cleanup>,
    err: PrimeError,
) -> PrimeError {
    if let Err(cleanup_err) = sb.defer_until_all_committed_executed(queue, callbacks) {
        warn!(%queue, error = %cleanup_err, "releasing staging resources failed");
    }
    err
}

/// Create an image, back it with device memory and bind it. The returned
/// cleanup destroys both.
pub fn create_image_and_bind_memory(
    sb: &mut StateBuilder,
    device: ReplayHandle,
    info: &ImageInfo,
) -> Result<(ReplayHandle, Cleanup)> {
    let image = sb.new_unused_handle(ResourceType::VkImage)?;
    sb.write(VulkanCommand::CreateImage {
        device,
        image,
        create_info: cmd::image_create_info(info),
    })?;
    sb.write(VulkanCommand::GetImageMemoryRequirements { device, image })?;
    let requirements = sb.new_state().image(image)?.memory_requirements;

    let config = sb.config();
    let size = requirements
        .size
        .saturating_mul(config.staging_memory_factor)
        .max(config.min_staging_allocation);
    let memory_type_index = match sb.memory_type_index_for(
        device,
        requirements.memory_type_bits,
        vk::MemoryPropertyFlags::empty(),
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
    )? {
        Some(index) => index,
        None => {
            sb.write(VulkanCommand::DestroyImage { device, image })?;
            return Err(PrimeError::NoMemoryType { object: image });
        }
    };

    let memory = sb.new_unused_handle(ResourceType::VkDeviceMemory)?;
    sb.write(VulkanCommand::AllocateMemory {
        device,
        memory,
        alloc_size: size,
        memory_type_index,
    })?;
    sb.write(VulkanCommand::BindImageMemory {
        device,
        image,
        memory,
        memory_offset: 0,
    })?;

    let cleanup: Cleanup = Box::new(move |sb: &mut StateBuilder| {
        sb.write(VulkanCommand::DestroyImage { device, image })?;
        sb.write(VulkanCommand::FreeMemory { device, memory })
    });
    Ok((image, cleanup))
}

/// Staging images holding the canonical 32-bit encoding of `aspect` of
/// `img`, as many as one texel of the aspect needs.
pub fn create_32bit_uint_color_staging_images_for_aspect(
    sb: &mut StateBuilder,
    img: &ImageObject,
    aspect: ImageAspect,
    usage: vk::ImageUsageFlags,
) -> Result<(Vec<ReplayHandle>, Vec<Cleanup>)> {
    let count = format::staging_image_count(img.info.format, aspect)?;
    let info = ImageInfo {
        flags: vk::ImageCreateFlags::empty(),
        format: format::staging_format(aspect),
        samples: vk::SampleCountFlags::TYPE_1,
        tiling: vk::ImageTiling::OPTIMAL,
        usage,
        sharing_mode: vk::SharingMode::EXCLUSIVE,
        queue_family_indices: Vec::new(),
        initial_layout: vk::ImageLayout::UNDEFINED,
        ..img.info.clone()
    };

    let mut images = Vec::with_capacity(count as usize);
    let mut cleanups: Vec<Cleanup> = Vec::with_capacity(count as usize);
    for _ in 0..count {
        match create_image_and_bind_memory(sb, img.device, &info) {
            Ok((image, cleanup)) => {
                images.push(image);
                cleanups.push(cleanup);
            }
            Err(e) => {
                // Nothing has used them yet.
                for cleanup in cleanups {
                    if let Err(cleanup_err) = cleanup(sb) {
                        warn!(image = %img.handle, error = %cleanup_err, "destroying staging image failed");
                    }
                }
                return Err(e).with_context(|| {
                    format!("creating {:?} staging images for image {}", aspect, img.handle)
                });
            }
        }
    }
    Ok((images, cleanups))
}

/// A staging image with the same creation parameters as `img`, moved to
/// `layout` on `queue`.
pub fn create_same_staging_image(
    sb: &mut StateBuilder,
    img: &ImageObject,
    layout: vk::ImageLayout,
    queue: ReplayHandle,
) -> Result<(ReplayHandle, Cleanup)> {
    let info = ImageInfo {
        usage: img.info.usage | vk::ImageUsageFlags::STORAGE,
        sharing_mode: vk::SharingMode::EXCLUSIVE,
        queue_family_indices: Vec::new(),
        initial_layout: vk::ImageLayout::UNDEFINED,
        ..img.info.clone()
    };
    let (staging, cleanup) = create_image_and_bind_memory(sb, img.device, &info)?;
    let staging_obj = sb.new_state().image(staging)?.clone();
    let transitions: Vec<SubRangeTransition> = walk_range(&staging_obj, &staging_obj.full_range())
        .into_iter()
        .map(|(aspect, layer, level)| SubRangeTransition {
            old_queue: None,
            ..SubRangeTransition::single(aspect, layer, level, vk::ImageLayout::UNDEFINED, layout, queue)
        })
        .collect();
    if let Err(e) = sb.change_image_sub_range_layout_and_ownership(staging, &transitions) {
        return Err(release_on_error(sb, queue, vec![cleanup], e));
    }
    Ok((staging, cleanup))
}

/// A view of one subresource of `image`.
pub fn create_image_view_for_subresource(
    sb: &mut StateBuilder,
    image: ReplayHandle,
    aspect: ImageAspect,
    layer: u32,
    level: u32,
) -> Result<(ReplayHandle, Cleanup)> {
    let img = sb.new_state().image(image)?;
    let device = img.device;
    let format = img.info.format;
    let view_type = match img.info.image_type {
        vk::ImageType::TYPE_1D => vk::ImageViewType::TYPE_1D,
        vk::ImageType::TYPE_3D => vk::ImageViewType::TYPE_3D,
        _ => vk::ImageViewType::TYPE_2D,
    };
    let image_view = sb.new_unused_handle(ResourceType::VkImageView)?;
    let identity = vk::ComponentSwizzle::IDENTITY.as_raw();
    sb.write(VulkanCommand::CreateImageView {
        device,
        image_view,
        image,
        view_type: view_type.as_raw(),
        format: format.as_raw(),
        components: SerializedComponentMapping {
            r: identity,
            g: identity,
            b: identity,
            a: identity,
        },
        subresource_range: cmd::subresource_range(&cmd::single_range(aspect.flags(), layer, level)),
    })?;
    let cleanup: Cleanup = Box::new(move |sb: &mut StateBuilder| {
        sb.write(VulkanCommand::DestroyImageView { device, image_view })
    });
    Ok((image_view, cleanup))
}

/// Views created for store jobs, one per subresource.
#[derive(Default)]
struct ViewCache {
    views: BTreeMap<(ReplayHandle, ImageAspect, u32, u32), ReplayHandle>,
}

impl ViewCache {
    fn get(
        &mut self,
        sb: &mut StateBuilder,
        image: ReplayHandle,
        aspect: ImageAspect,
        layer: u32,
        level: u32,
        callbacks: &mut Vec<Cleanup>,
    ) -> Result<ReplayHandle> {
        if let Some(view) = self.views.get(&(image, aspect, layer, level)) {
            return Ok(*view);
        }
        let (view, cleanup) = create_image_view_for_subresource(sb, image, aspect, layer, level)?;
        callbacks.push(cleanup);
        self.views.insert((image, aspect, layer, level), view);
        Ok(view)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(format: vk::Format, usage: vk::ImageUsageFlags) -> ImageInfo {
        ImageInfo::new_2d(format, 4, 4, usage)
    }

    #[test]
    fn test_transfer_dst_color_is_primed_by_copy() {
        let usage = vk::ImageUsageFlags::TRANSFER_DST
            | vk::ImageUsageFlags::COLOR_ATTACHMENT
            | vk::ImageUsageFlags::STORAGE;
        assert_eq!(
            select_strategy(&info(vk::Format::R8G8B8A8_UNORM, usage)),
            Some(PrimingStrategy::ByCopy)
        );
    }

    #[test]
    fn test_depth_with_transfer_dst_is_rendered() {
        let usage = vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
        assert_eq!(
            select_strategy(&info(vk::Format::D24_UNORM_S8_UINT, usage)),
            Some(PrimingStrategy::ByRendering)
        );
    }

    #[test]
    fn test_storage_only_is_stored() {
        assert_eq!(
            select_strategy(&info(vk::Format::R32_SFLOAT, vk::ImageUsageFlags::STORAGE)),
            Some(PrimingStrategy::ByImageStore)
        );
    }

    #[test]
    fn test_linear_preinitialized_is_mapped() {
        let mut i = info(vk::Format::R8G8B8A8_UNORM, vk::ImageUsageFlags::SAMPLED);
        assert_eq!(select_strategy(&i), None);
        i.tiling = vk::ImageTiling::LINEAR;
        i.initial_layout = vk::ImageLayout::PREINITIALIZED;
        assert_eq!(select_strategy(&i), Some(PrimingStrategy::ByPreinitialization));
    }

    #[test]
    fn test_depth_transfer_dst_only_has_no_strategy() {
        let i = info(vk::Format::D32_SFLOAT, vk::ImageUsageFlags::TRANSFER_DST);
        assert_eq!(select_strategy(&i), None);
    }
}
