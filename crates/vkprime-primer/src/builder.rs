//! The state builder: the single point through which replay commands are
//! emitted, and the owner of per-queue scratch resources.

use std::collections::BTreeMap;
use std::sync::Arc;

use ash::vk;
use tracing::{debug, trace, warn};
use vkprime_core::{HandleAllocator, PrimerConfig};
use vkprime_protocol::vulkan_commands::VulkanCommand;
use vkprime_protocol::{ReplayHandle, ResourceType};

use crate::cmd;
use crate::error::Result;
use crate::sink::CommandSink;
use crate::state::{
    BoundMemory, BufferObject, DeviceMemoryObject, ImageAspect, ImageObject, ImageViewObject, State,
};
use crate::task::ScratchTask;

/// Host-side action run once the GPU work it depends on has retired.
pub type Cleanup = Box<dyn FnOnce(&mut StateBuilder) -> Result<()> + Send>;

/// One layout and queue ownership change over a subresource range.
#[derive(Debug, Clone, Copy)]
pub struct SubRangeTransition {
    pub aspect_mask: vk::ImageAspectFlags,
    pub base_mip_level: u32,
    pub level_count: u32,
    pub base_array_layer: u32,
    pub layer_count: u32,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    /// `None` when the range has no owner yet
    pub old_queue: Option<ReplayHandle>,
    pub new_queue: ReplayHandle,
}

impl SubRangeTransition {
    /// Transition of a single subresource that stays on `queue`.
    pub fn single(
        aspect: ImageAspect,
        layer: u32,
        level: u32,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
        queue: ReplayHandle,
    ) -> Self {
        Self {
            aspect_mask: aspect.flags(),
            base_mip_level: level,
            level_count: 1,
            base_array_layer: layer,
            layer_count: 1,
            old_layout,
            new_layout,
            old_queue: Some(queue),
            new_queue: queue,
        }
    }

    fn range(&self) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange {
            aspect_mask: self.aspect_mask,
            base_mip_level: self.base_mip_level,
            level_count: self.level_count,
            base_array_layer: self.base_array_layer,
            layer_count: self.layer_count,
        }
    }
}

/// Work submitted to a queue whose completion has not been waited on yet.
pub(crate) struct PendingWork {
    pub device: ReplayHandle,
    pub fence: ReplayHandle,
    pub command_pool: ReplayHandle,
    pub command_buffer: Option<ReplayHandle>,
    pub deferred: Vec<Cleanup>,
}

pub struct StateBuilder {
    old_state: Arc<State>,
    new_state: State,
    sink: Box<dyn CommandSink>,
    handles: HandleAllocator,
    config: PrimerConfig,
    /// queue -> scratch command pool
    scratch_pools: BTreeMap<ReplayHandle, ReplayHandle>,
    pending: BTreeMap<ReplayHandle, Vec<PendingWork>>,
}

impl StateBuilder {
    pub fn new(
        old_state: Arc<State>,
        new_state: State,
        sink: Box<dyn CommandSink>,
        config: PrimerConfig,
    ) -> Self {
        Self {
            old_state,
            new_state,
            sink,
            handles: HandleAllocator::default(),
            config,
            scratch_pools: BTreeMap::new(),
            pending: BTreeMap::new(),
        }
    }

    pub fn old_state(&self) -> &State {
        &self.old_state
    }

    /// Shared reference to the captured state, usable while the builder is
    /// borrowed mutably.
    pub fn old_state_arc(&self) -> Arc<State> {
        Arc::clone(&self.old_state)
    }

    pub fn new_state(&self) -> &State {
        &self.new_state
    }

    pub fn new_state_mut(&mut self) -> &mut State {
        &mut self.new_state
    }

    pub fn config(&self) -> &PrimerConfig {
        &self.config
    }

    /// Emit one command and mirror its effect on the new state.
    pub fn write(&mut self, command: VulkanCommand) -> Result<()> {
        trace!(command = command.name(), "emit");
        self.apply(&command);
        self.sink.write(command)?;
        Ok(())
    }

    pub fn marker(&mut self, label: &str) -> Result<()> {
        self.sink.marker(label)?;
        Ok(())
    }

    /// A handle of `kind` used by neither state.
    pub fn new_unused_handle(&mut self, kind: ResourceType) -> Result<ReplayHandle> {
        let old = &self.old_state;
        let new = &self.new_state;
        let handle = self
            .handles
            .alloc_unused(kind, |h| old.contains(h) || new.contains(h))?;
        Ok(handle)
    }

    pub fn new_scratch_task_on_queue(&mut self, queue: ReplayHandle) -> Result<ScratchTask> {
        let device = self.new_state.queue(queue)?.device;
        Ok(ScratchTask::new(queue, device))
    }

    /// The command pool scratch command buffers of `queue` come from.
    pub fn scratch_command_pool(&mut self, queue: ReplayHandle) -> Result<ReplayHandle> {
        if let Some(pool) = self.scratch_pools.get(&queue) {
            return Ok(*pool);
        }
        let q = self.new_state.queue(queue)?.clone();
        let pool = self.new_unused_handle(ResourceType::VkCommandPool)?;
        self.write(VulkanCommand::CreateCommandPool {
            device: q.device,
            command_pool: pool,
            queue_family_index: q.family_index,
            flags: (vk::CommandPoolCreateFlags::TRANSIENT
                | vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
                .as_raw(),
        })?;
        self.scratch_pools.insert(queue, pool);
        Ok(pool)
    }

    pub(crate) fn push_pending(&mut self, queue: ReplayHandle, work: PendingWork) {
        self.pending.entry(queue).or_default().push(work);
    }

    /// Wait for everything submitted on `queue`, release the submissions'
    /// fences and command buffers, then run their deferred callbacks in
    /// submission order.
    ///
    /// Every release and callback runs once even when an earlier one fails;
    /// the first failure is returned afterwards.
    pub fn flush_queue_scratch_resources(&mut self, queue: ReplayHandle) -> Result<()> {
        let works = match self.pending.remove(&queue) {
            Some(works) if !works.is_empty() => works,
            _ => return Ok(()),
        };
        let device = works[0].device;
        let mut first_err = None;
        if let Err(e) = self.write(VulkanCommand::WaitForFences {
            device,
            fences: works.iter().map(|w| w.fence).collect(),
            wait_all: true,
            timeout_ns: u64::MAX,
        }) {
            warn!(%queue, error = %e, "waiting for scratch fences failed");
            first_err.get_or_insert(e);
        }
        for work in works {
            if let Err(e) = self.write(VulkanCommand::DestroyFence {
                device: work.device,
                fence: work.fence,
            }) {
                warn!(%queue, fence = %work.fence, error = %e, "destroying scratch fence failed");
                first_err.get_or_insert(e);
            }
            if let Some(command_buffer) = work.command_buffer {
                if let Err(e) = self.write(VulkanCommand::FreeCommandBuffers {
                    device: work.device,
                    command_pool: work.command_pool,
                    command_buffers: vec![command_buffer],
                }) {
                    warn!(%queue, %command_buffer, error = %e, "freeing scratch command buffer failed");
                    first_err.get_or_insert(e);
                }
            }
            if let Err(e) = run_all(self, work.deferred) {
                warn!(%queue, error = %e, "deferred scratch callback failed");
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Run `callbacks` once all work committed to `queue` so far has retired.
    pub fn defer_until_all_committed_executed(
        &mut self,
        queue: ReplayHandle,
        callbacks: Vec<Cleanup>,
    ) -> Result<()> {
        if callbacks.is_empty() {
            return Ok(());
        }
        let mut task = match self.new_scratch_task_on_queue(queue) {
            Ok(task) => task,
            Err(e) => {
                // Nothing can wait for the queue, so release right away.
                if let Err(cleanup_err) = run_all(self, callbacks) {
                    warn!(%queue, error = %cleanup_err, "cleanup without a queue failed");
                }
                return Err(e);
            }
        };
        task.defer_until_executed(Box::new(move |sb: &mut StateBuilder| run_all(sb, callbacks)));
        task.commit(self)
    }

    /// Drain every queue and destroy the scratch command pools. Returns the
    /// rebuilt state.
    pub fn finish(mut self) -> Result<State> {
        let mut first_err = None;
        // Deferred callbacks may commit more work, so drain until quiet.
        while let Some(queue) = self.pending.keys().next().copied() {
            if let Err(e) = self.flush_queue_scratch_resources(queue) {
                first_err.get_or_insert(e);
            }
        }
        let pools = std::mem::take(&mut self.scratch_pools);
        for (queue, pool) in pools {
            let destroyed = self.new_state.queue(queue).map(|q| q.device).and_then(|device| {
                self.write(VulkanCommand::DestroyCommandPool {
                    device,
                    command_pool: pool,
                })
            });
            if let Err(e) = destroyed {
                warn!(%queue, error = %e, "destroying scratch command pool failed");
                first_err.get_or_insert(e);
            }
        }
        if let Some(e) = first_err {
            return Err(e);
        }
        debug!(
            images = self.new_state.images.len(),
            "state builder finished"
        );
        Ok(std::mem::take(&mut self.new_state))
    }

    /// Index of a memory type of `device` allowed by `type_bits` that has all
    /// `required` properties, preferring one with `preferred` as well.
    pub fn memory_type_index_for(
        &self,
        device: ReplayHandle,
        type_bits: u32,
        required: vk::MemoryPropertyFlags,
        preferred: vk::MemoryPropertyFlags,
    ) -> Result<Option<u32>> {
        let physical = self.new_state.physical_device_of(device)?;
        let allowed: Vec<(u32, vk::MemoryPropertyFlags)> = physical
            .memory_types
            .iter()
            .enumerate()
            .filter(|(i, _)| *i < 32 && type_bits & (1u32 << i) != 0)
            .filter(|(_, t)| t.property_flags.contains(required))
            .map(|(i, t)| (i as u32, t.property_flags))
            .collect();
        let best = allowed
            .iter()
            .find(|(_, flags)| flags.contains(preferred))
            .or_else(|| allowed.first())
            .map(|(i, _)| *i);
        Ok(best)
    }

    /// A queue of `device` whose family supports any of `flags`, picking from
    /// `candidates` first. A non-empty `family_indices` restricts the families.
    pub fn get_queue_for(
        &self,
        flags: vk::QueueFlags,
        family_indices: &[u32],
        device: ReplayHandle,
        candidates: &[ReplayHandle],
    ) -> Option<ReplayHandle> {
        let suitable = |queue: ReplayHandle| -> bool {
            let Ok(q) = self.new_state.queue(queue) else {
                return false;
            };
            if q.device != device {
                return false;
            }
            if !family_indices.is_empty() && !family_indices.contains(&q.family_index) {
                return false;
            }
            self.new_state
                .queue_family_flags(queue)
                .map(|f| f.intersects(flags))
                .unwrap_or(false)
        };
        if let Some(q) = candidates.iter().copied().find(|q| suitable(*q)) {
            return Some(q);
        }
        let mut all: Vec<ReplayHandle> = self.new_state.queues.keys().copied().collect();
        all.sort();
        all.into_iter().find(|q| suitable(*q))
    }

    /// Record the new layouts of single-subresource ranges in the new state.
    pub(crate) fn apply_layouts(&mut self, layouts: &[(ReplayHandle, ImageAspect, u32, u32, vk::ImageLayout)]) {
        for &(image, aspect, layer, level, layout) in layouts {
            if let Some(l) = self
                .new_state
                .images
                .get_mut(&image)
                .and_then(|img| img.level_mut(aspect, layer, level))
            {
                l.layout = layout;
            }
        }
    }

    /// Batch per-range layout and queue ownership changes of `image`.
    ///
    /// Ranges that stay within one queue family become a single barrier on the
    /// new queue. Ranges changing family get a release barrier on the old
    /// queue followed by an acquire barrier on the new one.
    pub fn change_image_sub_range_layout_and_ownership(
        &mut self,
        image: ReplayHandle,
        transitions: &[SubRangeTransition],
    ) -> Result<()> {
        if transitions.is_empty() {
            return Ok(());
        }
        let format = self.new_state.image(image)?.info.format;

        // (old queue, new queue) -> (release barriers, acquire barriers)
        type Barriers = Vec<vkprime_protocol::vulkan_commands::SerializedImageMemoryBarrier>;
        let mut groups: BTreeMap<(Option<ReplayHandle>, ReplayHandle), (Barriers, Barriers)> =
            BTreeMap::new();
        for t in transitions {
            let mut range = t.range();
            range.aspect_mask = cmd::barrier_aspect_flags(format, t.aspect_mask);
            let new_family = self.new_state.queue(t.new_queue)?.family_index;
            let old_family = match t.old_queue {
                Some(q) => Some(self.new_state.queue(q)?.family_index),
                None => None,
            };
            let entry = groups.entry((t.old_queue, t.new_queue)).or_default();
            match old_family {
                Some(old) if old != new_family => {
                    entry.0.push(cmd::ownership_barrier(
                        image, t.old_layout, t.new_layout, old, new_family, &range,
                    ));
                    entry.1.push(cmd::ownership_barrier(
                        image, t.old_layout, t.new_layout, old, new_family, &range,
                    ));
                }
                _ => {
                    entry
                        .1
                        .push(cmd::layout_barrier(image, t.old_layout, t.new_layout, &range));
                }
            }
        }

        for ((old_queue, new_queue), (release, acquire)) in groups {
            if let (Some(old_queue), false) = (old_queue, release.is_empty()) {
                let mut task = self.new_scratch_task_on_queue(old_queue)?;
                task.record_command(cmd::image_barriers(release));
                task.commit(self)?;
            }
            let mut task = self.new_scratch_task_on_queue(new_queue)?;
            task.record_command(cmd::image_barriers(acquire));
            task.commit(self)?;
        }
        Ok(())
    }

    fn apply(&mut self, command: &VulkanCommand) {
        let state = &mut self.new_state;
        match command {
            VulkanCommand::AllocateMemory {
                device,
                memory,
                alloc_size,
                memory_type_index,
            } => {
                state.memories.insert(
                    *memory,
                    DeviceMemoryObject {
                        handle: *memory,
                        device: *device,
                        size: *alloc_size,
                        memory_type_index: *memory_type_index,
                    },
                );
            }
            VulkanCommand::FreeMemory { memory, .. } => {
                state.memories.remove(memory);
            }
            VulkanCommand::CreateBuffer {
                device,
                buffer,
                size,
                usage,
                ..
            } => {
                state.buffers.insert(
                    *buffer,
                    BufferObject {
                        handle: *buffer,
                        device: *device,
                        size: *size,
                        usage: vk::BufferUsageFlags::from_raw(*usage),
                        bound_memory: None,
                    },
                );
            }
            VulkanCommand::DestroyBuffer { buffer, .. } => {
                state.buffers.remove(buffer);
            }
            VulkanCommand::BindBufferMemory {
                buffer,
                memory,
                memory_offset,
                ..
            } => {
                if let Some(b) = state.buffers.get_mut(buffer) {
                    b.bound_memory = Some(BoundMemory {
                        memory: *memory,
                        offset: *memory_offset,
                    });
                }
            }
            VulkanCommand::CreateImage {
                device,
                image,
                create_info,
            } => {
                let info = cmd::image_info_from_create(create_info);
                state.add_image(ImageObject::new(*image, *device, info));
            }
            VulkanCommand::DestroyImage { image, .. } => {
                state.images.remove(image);
            }
            VulkanCommand::BindImageMemory {
                image,
                memory,
                memory_offset,
                ..
            } => {
                if let Some(img) = state.images.get_mut(image) {
                    img.bound_memory = Some(BoundMemory {
                        memory: *memory,
                        offset: *memory_offset,
                    });
                }
            }
            VulkanCommand::CreateImageView {
                device,
                image_view,
                image,
                view_type,
                format,
                subresource_range,
                ..
            } => {
                state.image_views.insert(
                    *image_view,
                    ImageViewObject {
                        handle: *image_view,
                        device: *device,
                        image: *image,
                        view_type: vk::ImageViewType::from_raw(*view_type),
                        format: vk::Format::from_raw(*format),
                        range: cmd::range_from_serialized(subresource_range),
                    },
                );
            }
            VulkanCommand::DestroyImageView { image_view, .. } => {
                state.image_views.remove(image_view);
            }
            VulkanCommand::CreateShaderModule { device, shader_module: h, .. }
            | VulkanCommand::CreateDescriptorSetLayout { device, layout: h, .. }
            | VulkanCommand::CreatePipelineLayout { device, layout: h, .. }
            | VulkanCommand::CreateDescriptorPool { device, pool: h, .. }
            | VulkanCommand::CreateCommandPool { device, command_pool: h, .. }
            | VulkanCommand::CreateFence { device, fence: h, .. }
            | VulkanCommand::CreateRenderPass { device, render_pass: h, .. }
            | VulkanCommand::CreateFramebuffer { device, framebuffer: h, .. } => {
                state.others.insert(*h, *device);
            }
            VulkanCommand::CreateComputePipelines { device, pipelines: hs, .. }
            | VulkanCommand::CreateGraphicsPipelines { device, pipelines: hs, .. }
            | VulkanCommand::AllocateDescriptorSets { device, descriptor_sets: hs, .. }
            | VulkanCommand::AllocateCommandBuffers { device, command_buffers: hs, .. } => {
                for h in hs {
                    state.others.insert(*h, *device);
                }
            }
            VulkanCommand::DestroyShaderModule { shader_module: h, .. }
            | VulkanCommand::DestroyDescriptorSetLayout { layout: h, .. }
            | VulkanCommand::DestroyPipelineLayout { layout: h, .. }
            | VulkanCommand::DestroyPipeline { pipeline: h, .. }
            | VulkanCommand::DestroyDescriptorPool { pool: h, .. }
            | VulkanCommand::DestroyCommandPool { command_pool: h, .. }
            | VulkanCommand::DestroyFence { fence: h, .. }
            | VulkanCommand::DestroyRenderPass { render_pass: h, .. }
            | VulkanCommand::DestroyFramebuffer { framebuffer: h, .. } => {
                state.others.remove(h);
            }
            VulkanCommand::FreeDescriptorSets { descriptor_sets: hs, .. }
            | VulkanCommand::FreeCommandBuffers { command_buffers: hs, .. } => {
                for h in hs {
                    state.others.remove(h);
                }
            }
            _ => {}
        }
    }
}

impl Drop for StateBuilder {
    fn drop(&mut self) {
        let outstanding: usize = self.pending.values().map(Vec::len).sum();
        if outstanding > 0 {
            warn!(outstanding, "state builder dropped with unflushed scratch work");
        }
    }
}

/// Run every callback in order and return the first failure.
pub(crate) fn run_all(sb: &mut StateBuilder, callbacks: Vec<Cleanup>) -> Result<()> {
    let mut first_err = None;
    for callback in callbacks {
        if let Err(e) = callback(sb) {
            first_err.get_or_insert(e);
        }
    }
    match first_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
