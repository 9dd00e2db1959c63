//! Scratch tasks: one batch of recorded commands for one queue.

use ash::vk;
use tracing::{trace, warn};
use vkprime_protocol::vulkan_commands::{
    MappedMemoryRange, RecordedCommand, SerializedSubmitInfo, VulkanCommand,
};
use vkprime_protocol::{ReplayHandle, ResourceType};

use crate::builder::{run_all, Cleanup, PendingWork, StateBuilder};
use crate::error::{PrimeError, Result};
use crate::state::ImageAspect;

type TrackedLayout = (ReplayHandle, ImageAspect, u32, u32, vk::ImageLayout);

/// Commands recorded for a queue, submitted as one command buffer on
/// [`commit`](ScratchTask::commit).
///
/// `on_committed` callbacks run after the command buffer is allocated and
/// before it is recorded and submitted. `deferred` callbacks run once the
/// submission's fence has been waited on.
pub struct ScratchTask {
    queue: ReplayHandle,
    device: ReplayHandle,
    commands: Vec<RecordedCommand>,
    on_committed: Vec<Cleanup>,
    deferred: Vec<Cleanup>,
    layouts: Vec<TrackedLayout>,
}

impl ScratchTask {
    pub(crate) fn new(queue: ReplayHandle, device: ReplayHandle) -> Self {
        Self {
            queue,
            device,
            commands: Vec::new(),
            on_committed: Vec::new(),
            deferred: Vec::new(),
            layouts: Vec::new(),
        }
    }

    pub fn queue(&self) -> ReplayHandle {
        self.queue
    }

    pub fn device(&self) -> ReplayHandle {
        self.device
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Commands recorded so far, in order.
    pub fn commands(&self) -> &[RecordedCommand] {
        &self.commands
    }

    /// Append a command. Image barriers also update the layouts the task
    /// applies to the new state on commit.
    pub fn record_command(&mut self, command: RecordedCommand) {
        if let RecordedCommand::PipelineBarrier {
            image_memory_barriers,
            ..
        } = &command
        {
            for b in image_memory_barriers {
                let r = &b.subresource_range;
                let layout = vk::ImageLayout::from_raw(b.new_layout);
                for aspect in ImageAspect::from_flags(vk::ImageAspectFlags::from_raw(r.aspect_mask)) {
                    for layer in r.base_array_layer..r.base_array_layer.saturating_add(r.layer_count) {
                        for level in r.base_mip_level..r.base_mip_level.saturating_add(r.level_count) {
                            self.track_layout(b.image, aspect, layer, level, layout);
                        }
                    }
                }
            }
        }
        self.commands.push(command);
    }

    pub fn track_layout(
        &mut self,
        image: ReplayHandle,
        aspect: ImageAspect,
        layer: u32,
        level: u32,
        layout: vk::ImageLayout,
    ) {
        self.layouts.push((image, aspect, layer, level, layout));
    }

    /// Layout of a subresource as of the end of the commands recorded so far.
    pub fn layout_of(
        &self,
        sb: &StateBuilder,
        image: ReplayHandle,
        aspect: ImageAspect,
        layer: u32,
        level: u32,
    ) -> vk::ImageLayout {
        self.layouts
            .iter()
            .rev()
            .find(|(i, a, la, le, _)| *i == image && *a == aspect && *la == layer && *le == level)
            .map(|t| t.4)
            .or_else(|| {
                sb.new_state()
                    .images
                    .get(&image)
                    .and_then(|img| img.level(aspect, layer, level))
                    .map(|l| l.layout)
            })
            .unwrap_or(vk::ImageLayout::UNDEFINED)
    }

    pub fn do_on_committed(&mut self, callback: Cleanup) {
        self.on_committed.push(callback);
    }

    pub fn defer_until_executed(&mut self, callback: Cleanup) {
        self.deferred.push(callback);
    }

    /// Create a host-visible buffer filled with `data`. The buffer and its
    /// memory are destroyed once this task has executed.
    pub fn new_buffer(
        &mut self,
        sb: &mut StateBuilder,
        data: &[u8],
        usage: vk::BufferUsageFlags,
    ) -> Result<ReplayHandle> {
        let device = self.device;
        let size = (data.len() as u64).max(1);
        let buffer = sb.new_unused_handle(ResourceType::VkBuffer)?;
        let host = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        let memory_type_index = sb
            .memory_type_index_for(device, u32::MAX, host, host)?
            .ok_or(PrimeError::NoMemoryType { object: buffer })?;
        let memory = sb.new_unused_handle(ResourceType::VkDeviceMemory)?;

        sb.write(VulkanCommand::CreateBuffer {
            device,
            buffer,
            size,
            usage: usage.as_raw(),
            sharing_mode: vk::SharingMode::EXCLUSIVE.as_raw(),
            queue_family_indices: Vec::new(),
        })?;
        sb.write(VulkanCommand::AllocateMemory {
            device,
            memory,
            alloc_size: size,
            memory_type_index,
        })?;
        sb.write(VulkanCommand::BindBufferMemory {
            device,
            buffer,
            memory,
            memory_offset: 0,
        })?;
        sb.write(VulkanCommand::MapMemory {
            device,
            memory,
            offset: 0,
            size,
            flags: 0,
        })?;
        sb.write(VulkanCommand::FlushMappedMemoryRanges {
            device,
            ranges: vec![MappedMemoryRange {
                memory,
                offset: 0,
                size,
            }],
            data: vec![data.to_vec()],
        })?;
        sb.write(VulkanCommand::UnmapMemory {
            device,
            memory,
            written_data: None,
            offset: 0,
        })?;

        self.defer_until_executed(Box::new(move |sb: &mut StateBuilder| {
            sb.write(VulkanCommand::DestroyBuffer { device, buffer })?;
            sb.write(VulkanCommand::FreeMemory { device, memory })
        }));
        Ok(buffer)
    }

    /// Submit the recorded commands. On failure the deferred callbacks run
    /// immediately, since nothing they guard reached the queue.
    pub fn commit(self, sb: &mut StateBuilder) -> Result<()> {
        let ScratchTask {
            queue,
            device,
            commands,
            on_committed,
            deferred,
            layouts,
        } = self;
        match submit(sb, queue, device, commands, on_committed) {
            Ok((fence, command_pool, command_buffer)) => {
                sb.apply_layouts(&layouts);
                sb.push_pending(
                    queue,
                    PendingWork {
                        device,
                        fence,
                        command_pool,
                        command_buffer,
                        deferred,
                    },
                );
                Ok(())
            }
            Err(e) => {
                if let Err(cleanup_err) = run_all(sb, deferred) {
                    warn!(%queue, error = %cleanup_err, "cleanup after failed commit failed");
                }
                Err(e)
            }
        }
    }
}

fn submit(
    sb: &mut StateBuilder,
    queue: ReplayHandle,
    device: ReplayHandle,
    commands: Vec<RecordedCommand>,
    on_committed: Vec<Cleanup>,
) -> Result<(ReplayHandle, ReplayHandle, Option<ReplayHandle>)> {
    let command_pool = sb.scratch_command_pool(queue)?;
    let command_buffer = if commands.is_empty() {
        None
    } else {
        let cb = sb.new_unused_handle(ResourceType::VkCommandBuffer)?;
        sb.write(VulkanCommand::AllocateCommandBuffers {
            device,
            command_pool,
            level: vk::CommandBufferLevel::PRIMARY.as_raw() as u32,
            command_buffers: vec![cb],
        })?;
        Some(cb)
    };
    for callback in on_committed {
        callback(sb)?;
    }
    if let Some(cb) = command_buffer {
        trace!(%queue, commands = commands.len(), "recording scratch command buffer");
        sb.write(VulkanCommand::SubmitRecordedCommands {
            command_buffer: cb,
            commands,
        })?;
    }
    let fence = sb.new_unused_handle(ResourceType::VkFence)?;
    sb.write(VulkanCommand::CreateFence {
        device,
        fence,
        signaled: false,
    })?;
    sb.write(VulkanCommand::QueueSubmit {
        queue,
        submits: command_buffer
            .map(|cb| SerializedSubmitInfo {
                wait_semaphores: Vec::new(),
                wait_dst_stage_masks: Vec::new(),
                command_buffers: vec![cb],
                signal_semaphores: Vec::new(),
            })
            .into_iter()
            .collect(),
        fence: Some(fence),
    })?;
    Ok((fence, command_pool, command_buffer))
}
