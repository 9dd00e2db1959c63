use serde::{Deserialize, Serialize};

use crate::handle::ReplayHandle;

// ============================================================================
// Serialized Vulkan structures
//
// Enum and flag values are stored as their raw Vulkan integers so the stream
// stays independent of any particular binding crate.
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize,
         rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub struct MappedMemoryRange {
    pub memory: ReplayHandle,
    pub offset: u64,
    pub size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize,
         rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub struct SerializedDescriptorSetLayoutBinding {
    pub binding: u32,
    pub descriptor_type: i32,
    pub descriptor_count: u32,
    pub stage_flags: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize,
         rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub struct SerializedPushConstantRange {
    pub stage_flags: u32,
    pub offset: u32,
    pub size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize,
         rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub struct SerializedComputePipelineCreateInfo {
    pub stage: SerializedPipelineShaderStageCreateInfo,
    pub layout: ReplayHandle,
    pub flags: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize,
         rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub struct SerializedPipelineShaderStageCreateInfo {
    pub module: ReplayHandle,
    pub entry_point: String,
    pub stage: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize,
         rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub struct SerializedDescriptorPoolSize {
    pub descriptor_type: i32,
    pub descriptor_count: u32,
}

/// One descriptor write. Exactly one of `buffer_infos` / `image_infos` is
/// populated, matching `descriptor_type`.
#[derive(Debug, Clone, Serialize, Deserialize,
         rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub struct SerializedWriteDescriptorSet {
    pub dst_set: ReplayHandle,
    pub dst_binding: u32,
    pub dst_array_element: u32,
    pub descriptor_type: i32,
    pub buffer_infos: Vec<SerializedDescriptorBufferInfo>,
    pub image_infos: Vec<SerializedDescriptorImageInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize,
         rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub struct SerializedDescriptorBufferInfo {
    pub buffer: ReplayHandle,
    pub offset: u64,
    pub range: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize,
         rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub struct SerializedDescriptorImageInfo {
    pub sampler: Option<ReplayHandle>,
    pub image_view: ReplayHandle,
    pub image_layout: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize,
         rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub struct SerializedSubmitInfo {
    pub wait_semaphores: Vec<ReplayHandle>,
    pub wait_dst_stage_masks: Vec<u32>,
    pub command_buffers: Vec<ReplayHandle>,
    pub signal_semaphores: Vec<ReplayHandle>,
}

/// Commands recorded into a scratch command buffer, emitted as one batch when
/// the owning task is committed.
#[derive(Debug, Clone, Serialize, Deserialize,
         rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub enum RecordedCommand {
    BindPipeline {
        pipeline_bind_point: u32,
        pipeline: ReplayHandle,
    },
    BindDescriptorSets {
        pipeline_bind_point: u32,
        layout: ReplayHandle,
        first_set: u32,
        descriptor_sets: Vec<ReplayHandle>,
        dynamic_offsets: Vec<u32>,
    },
    PushConstants {
        layout: ReplayHandle,
        stage_flags: u32,
        offset: u32,
        values: Vec<u8>,
    },
    Dispatch {
        group_count_x: u32,
        group_count_y: u32,
        group_count_z: u32,
    },
    PipelineBarrier {
        src_stage_mask: u32,
        dst_stage_mask: u32,
        dependency_flags: u32,
        memory_barriers: Vec<SerializedMemoryBarrier>,
        buffer_memory_barriers: Vec<SerializedBufferMemoryBarrier>,
        image_memory_barriers: Vec<SerializedImageMemoryBarrier>,
    },
    CopyBufferToImage {
        src_buffer: ReplayHandle,
        dst_image: ReplayHandle,
        dst_image_layout: i32,
        regions: Vec<SerializedBufferImageCopy>,
    },

    // ── Rendering ───────────────────────────────────────────
    BeginRenderPass {
        render_pass: ReplayHandle,
        framebuffer: ReplayHandle,
        render_area: SerializedRect2D,
        clear_values: Vec<SerializedClearValue>,
        contents: u32,
    },
    EndRenderPass,
    Draw {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    SetViewport {
        first_viewport: u32,
        viewports: Vec<SerializedViewport>,
    },
    SetScissor {
        first_scissor: u32,
        scissors: Vec<SerializedRect2D>,
    },
    SetStencilWriteMask {
        face_mask: u32,
        write_mask: u32,
    },
    SetStencilReference {
        face_mask: u32,
        reference: u32,
    },
    ClearAttachments {
        attachments: Vec<SerializedClearAttachment>,
        rects: Vec<SerializedClearRect>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize,
         rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub struct SerializedMemoryBarrier {
    pub src_access_mask: u32,
    pub dst_access_mask: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize,
         rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub struct SerializedBufferMemoryBarrier {
    pub src_access_mask: u32,
    pub dst_access_mask: u32,
    pub src_queue_family_index: u32,
    pub dst_queue_family_index: u32,
    pub buffer: ReplayHandle,
    pub offset: u64,
    pub size: u64,
}

// ── Images, render passes and graphics pipelines ────────────

#[derive(Debug, Clone, Serialize, Deserialize,
         rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub struct SerializedImageCreateInfo {
    pub flags: u32,
    pub image_type: i32,
    pub format: i32,
    pub extent: [u32; 3],
    pub mip_levels: u32,
    pub array_layers: u32,
    pub samples: u32,
    pub tiling: i32,
    pub usage: u32,
    pub sharing_mode: i32,
    pub queue_family_indices: Vec<u32>,
    pub initial_layout: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize,
         rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub struct SerializedComponentMapping {
    pub r: i32,
    pub g: i32,
    pub b: i32,
    pub a: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize,
         rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub struct SerializedImageSubresourceRange {
    pub aspect_mask: u32,
    pub base_mip_level: u32,
    pub level_count: u32,
    pub base_array_layer: u32,
    pub layer_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize,
         rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub struct SerializedAttachmentDescription {
    pub flags: u32,
    pub format: i32,
    pub samples: u32,
    pub load_op: i32,
    pub store_op: i32,
    pub stencil_load_op: i32,
    pub stencil_store_op: i32,
    pub initial_layout: i32,
    pub final_layout: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize,
         rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub struct SerializedAttachmentReference {
    pub attachment: u32,
    pub layout: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize,
         rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub struct SerializedSubpassDescription {
    pub flags: u32,
    pub pipeline_bind_point: i32,
    pub input_attachments: Vec<SerializedAttachmentReference>,
    pub color_attachments: Vec<SerializedAttachmentReference>,
    pub resolve_attachments: Vec<SerializedAttachmentReference>,
    pub depth_stencil_attachment: Option<SerializedAttachmentReference>,
    pub preserve_attachments: Vec<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize,
         rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub struct SerializedSubpassDependency {
    pub src_subpass: u32,
    pub dst_subpass: u32,
    pub src_stage_mask: u32,
    pub dst_stage_mask: u32,
    pub src_access_mask: u32,
    pub dst_access_mask: u32,
    pub dependency_flags: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize,
         rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub struct SerializedVertexInputBindingDescription {
    pub binding: u32,
    pub stride: u32,
    pub input_rate: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize,
         rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub struct SerializedVertexInputAttributeDescription {
    pub location: u32,
    pub binding: u32,
    pub format: i32,
    pub offset: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize,
         rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub struct SerializedPipelineVertexInputStateCreateInfo {
    pub vertex_binding_descriptions: Vec<SerializedVertexInputBindingDescription>,
    pub vertex_attribute_descriptions: Vec<SerializedVertexInputAttributeDescription>,
}

#[derive(Debug, Clone, Serialize, Deserialize,
         rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub struct SerializedPipelineInputAssemblyStateCreateInfo {
    pub topology: i32,
    pub primitive_restart_enable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize,
         rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub struct SerializedViewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize,
         rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub struct SerializedRect2D {
    pub offset: [i32; 2],
    pub extent: [u32; 2],
}

#[derive(Debug, Clone, Serialize, Deserialize,
         rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub struct SerializedPipelineViewportStateCreateInfo {
    pub viewports: Vec<SerializedViewport>,
    pub scissors: Vec<SerializedRect2D>,
}

#[derive(Debug, Clone, Serialize, Deserialize,
         rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub struct SerializedPipelineRasterizationStateCreateInfo {
    pub depth_clamp_enable: bool,
    pub rasterizer_discard_enable: bool,
    pub polygon_mode: i32,
    pub cull_mode: u32,
    pub front_face: i32,
    pub depth_bias_enable: bool,
    pub depth_bias_constant_factor: f32,
    pub depth_bias_clamp: f32,
    pub depth_bias_slope_factor: f32,
    pub line_width: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize,
         rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub struct SerializedPipelineMultisampleStateCreateInfo {
    pub rasterization_samples: u32,
    pub sample_shading_enable: bool,
    pub min_sample_shading: f32,
    pub alpha_to_coverage_enable: bool,
    pub alpha_to_one_enable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize,
         rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub struct SerializedStencilOpState {
    pub fail_op: i32,
    pub pass_op: i32,
    pub depth_fail_op: i32,
    pub compare_op: i32,
    pub compare_mask: u32,
    pub write_mask: u32,
    pub reference: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize,
         rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub struct SerializedPipelineDepthStencilStateCreateInfo {
    pub depth_test_enable: bool,
    pub depth_write_enable: bool,
    pub depth_compare_op: i32,
    pub depth_bounds_test_enable: bool,
    pub stencil_test_enable: bool,
    pub front: SerializedStencilOpState,
    pub back: SerializedStencilOpState,
    pub min_depth_bounds: f32,
    pub max_depth_bounds: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize,
         rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub struct SerializedPipelineColorBlendAttachmentState {
    pub blend_enable: bool,
    pub src_color_blend_factor: i32,
    pub dst_color_blend_factor: i32,
    pub color_blend_op: i32,
    pub src_alpha_blend_factor: i32,
    pub dst_alpha_blend_factor: i32,
    pub alpha_blend_op: i32,
    pub color_write_mask: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize,
         rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub struct SerializedPipelineColorBlendStateCreateInfo {
    pub logic_op_enable: bool,
    pub logic_op: i32,
    pub attachments: Vec<SerializedPipelineColorBlendAttachmentState>,
    pub blend_constants: [f32; 4],
}

#[derive(Debug, Clone, Serialize, Deserialize,
         rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub struct SerializedPipelineDynamicStateCreateInfo {
    pub dynamic_states: Vec<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize,
         rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub struct SerializedGraphicsPipelineCreateInfo {
    pub flags: u32,
    pub stages: Vec<SerializedPipelineShaderStageCreateInfo>,
    pub vertex_input_state: SerializedPipelineVertexInputStateCreateInfo,
    pub input_assembly_state: SerializedPipelineInputAssemblyStateCreateInfo,
    pub viewport_state: Option<SerializedPipelineViewportStateCreateInfo>,
    pub rasterization_state: SerializedPipelineRasterizationStateCreateInfo,
    pub multisample_state: Option<SerializedPipelineMultisampleStateCreateInfo>,
    pub depth_stencil_state: Option<SerializedPipelineDepthStencilStateCreateInfo>,
    pub color_blend_state: Option<SerializedPipelineColorBlendStateCreateInfo>,
    pub dynamic_state: Option<SerializedPipelineDynamicStateCreateInfo>,
    pub layout: ReplayHandle,
    pub render_pass: ReplayHandle,
    pub subpass: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize,
         rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub struct SerializedImageMemoryBarrier {
    pub src_access_mask: u32,
    pub dst_access_mask: u32,
    pub old_layout: i32,
    pub new_layout: i32,
    pub src_queue_family_index: u32,
    pub dst_queue_family_index: u32,
    pub image: ReplayHandle,
    pub subresource_range: SerializedImageSubresourceRange,
}

#[derive(Debug, Clone, Serialize, Deserialize,
         rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub struct SerializedClearValue {
    pub data: [u8; 16],
}

#[derive(Debug, Clone, Serialize, Deserialize,
         rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub struct SerializedImageSubresourceLayers {
    pub aspect_mask: u32,
    pub mip_level: u32,
    pub base_array_layer: u32,
    pub layer_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize,
         rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub struct SerializedBufferImageCopy {
    pub buffer_offset: u64,
    pub buffer_row_length: u32,
    pub buffer_image_height: u32,
    pub image_subresource: SerializedImageSubresourceLayers,
    pub image_offset: [i32; 3],
    pub image_extent: [u32; 3],
}

#[derive(Debug, Clone, Serialize, Deserialize,
         rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub struct SerializedClearAttachment {
    pub aspect_mask: u32,
    pub color_attachment: u32,
    pub clear_value: SerializedClearValue,
}

#[derive(Debug, Clone, Serialize, Deserialize,
         rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub struct SerializedClearRect {
    pub rect: SerializedRect2D,
    pub base_array_layer: u32,
    pub layer_count: u32,
}

// ============================================================================
// Replay commands
// ============================================================================

/// One native API call of the rebuilt state, in emission order.
///
/// Creation commands name the handle the producer picked for the new object;
/// later commands refer to that handle directly.
#[derive(Debug, Clone, Serialize, Deserialize,
         rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub enum VulkanCommand {
    // ── Queue ───────────────────────────────────────────────
    QueueSubmit {
        queue: ReplayHandle,
        submits: Vec<SerializedSubmitInfo>,
        fence: Option<ReplayHandle>,
    },

    // ── Memory ──────────────────────────────────────────────
    AllocateMemory {
        device: ReplayHandle,
        memory: ReplayHandle,
        alloc_size: u64,
        memory_type_index: u32,
    },
    FreeMemory {
        device: ReplayHandle,
        memory: ReplayHandle,
    },
    MapMemory {
        device: ReplayHandle,
        memory: ReplayHandle,
        offset: u64,
        size: u64,
        flags: u32,
    },
    UnmapMemory {
        device: ReplayHandle,
        memory: ReplayHandle,
        /// Data written to the mapped region before unmapping, if not already flushed
        written_data: Option<Vec<u8>>,
        offset: u64,
    },
    FlushMappedMemoryRanges {
        device: ReplayHandle,
        ranges: Vec<MappedMemoryRange>,
        /// Contents of each flushed range
        data: Vec<Vec<u8>>,
    },

    // ── Buffer ──────────────────────────────────────────────
    CreateBuffer {
        device: ReplayHandle,
        buffer: ReplayHandle,
        size: u64,
        usage: u32,
        sharing_mode: i32,
        queue_family_indices: Vec<u32>,
    },
    DestroyBuffer {
        device: ReplayHandle,
        buffer: ReplayHandle,
    },
    BindBufferMemory {
        device: ReplayHandle,
        buffer: ReplayHandle,
        memory: ReplayHandle,
        memory_offset: u64,
    },

    // ── Image ───────────────────────────────────────────────
    CreateImage {
        device: ReplayHandle,
        image: ReplayHandle,
        create_info: SerializedImageCreateInfo,
    },
    DestroyImage {
        device: ReplayHandle,
        image: ReplayHandle,
    },
    GetImageMemoryRequirements {
        device: ReplayHandle,
        image: ReplayHandle,
    },
    BindImageMemory {
        device: ReplayHandle,
        image: ReplayHandle,
        memory: ReplayHandle,
        memory_offset: u64,
    },
    CreateImageView {
        device: ReplayHandle,
        image_view: ReplayHandle,
        image: ReplayHandle,
        view_type: i32,
        format: i32,
        components: SerializedComponentMapping,
        subresource_range: SerializedImageSubresourceRange,
    },
    DestroyImageView {
        device: ReplayHandle,
        image_view: ReplayHandle,
    },

    // ── Shaders and pipelines ───────────────────────────────
    CreateShaderModule {
        device: ReplayHandle,
        shader_module: ReplayHandle,
        /// SPIR-V words as little-endian bytes
        code: Vec<u8>,
    },
    DestroyShaderModule {
        device: ReplayHandle,
        shader_module: ReplayHandle,
    },
    CreateDescriptorSetLayout {
        device: ReplayHandle,
        layout: ReplayHandle,
        bindings: Vec<SerializedDescriptorSetLayoutBinding>,
    },
    DestroyDescriptorSetLayout {
        device: ReplayHandle,
        layout: ReplayHandle,
    },
    CreatePipelineLayout {
        device: ReplayHandle,
        layout: ReplayHandle,
        set_layouts: Vec<ReplayHandle>,
        push_constant_ranges: Vec<SerializedPushConstantRange>,
    },
    DestroyPipelineLayout {
        device: ReplayHandle,
        layout: ReplayHandle,
    },
    CreateComputePipelines {
        device: ReplayHandle,
        pipelines: Vec<ReplayHandle>,
        create_infos: Vec<SerializedComputePipelineCreateInfo>,
    },
    CreateGraphicsPipelines {
        device: ReplayHandle,
        pipelines: Vec<ReplayHandle>,
        create_infos: Vec<SerializedGraphicsPipelineCreateInfo>,
    },
    DestroyPipeline {
        device: ReplayHandle,
        pipeline: ReplayHandle,
    },

    // ── Descriptors ─────────────────────────────────────────
    CreateDescriptorPool {
        device: ReplayHandle,
        pool: ReplayHandle,
        max_sets: u32,
        pool_sizes: Vec<SerializedDescriptorPoolSize>,
        flags: u32,
    },
    DestroyDescriptorPool {
        device: ReplayHandle,
        pool: ReplayHandle,
    },
    AllocateDescriptorSets {
        device: ReplayHandle,
        descriptor_pool: ReplayHandle,
        descriptor_sets: Vec<ReplayHandle>,
        set_layouts: Vec<ReplayHandle>,
    },
    FreeDescriptorSets {
        device: ReplayHandle,
        descriptor_pool: ReplayHandle,
        descriptor_sets: Vec<ReplayHandle>,
    },
    UpdateDescriptorSets {
        device: ReplayHandle,
        writes: Vec<SerializedWriteDescriptorSet>,
    },

    // ── Command pools and buffers ───────────────────────────
    CreateCommandPool {
        device: ReplayHandle,
        command_pool: ReplayHandle,
        queue_family_index: u32,
        flags: u32,
    },
    DestroyCommandPool {
        device: ReplayHandle,
        command_pool: ReplayHandle,
    },
    AllocateCommandBuffers {
        device: ReplayHandle,
        command_pool: ReplayHandle,
        level: u32,
        command_buffers: Vec<ReplayHandle>,
    },
    FreeCommandBuffers {
        device: ReplayHandle,
        command_pool: ReplayHandle,
        command_buffers: Vec<ReplayHandle>,
    },
    /// Begin, record and end one command buffer in a single step.
    SubmitRecordedCommands {
        command_buffer: ReplayHandle,
        commands: Vec<RecordedCommand>,
    },

    // ── Fence ───────────────────────────────────────────────
    CreateFence {
        device: ReplayHandle,
        fence: ReplayHandle,
        signaled: bool,
    },
    DestroyFence {
        device: ReplayHandle,
        fence: ReplayHandle,
    },
    WaitForFences {
        device: ReplayHandle,
        fences: Vec<ReplayHandle>,
        wait_all: bool,
        timeout_ns: u64,
    },

    // ── Render pass and framebuffer ─────────────────────────
    CreateRenderPass {
        device: ReplayHandle,
        render_pass: ReplayHandle,
        attachments: Vec<SerializedAttachmentDescription>,
        subpasses: Vec<SerializedSubpassDescription>,
        dependencies: Vec<SerializedSubpassDependency>,
    },
    DestroyRenderPass {
        device: ReplayHandle,
        render_pass: ReplayHandle,
    },
    CreateFramebuffer {
        device: ReplayHandle,
        framebuffer: ReplayHandle,
        render_pass: ReplayHandle,
        attachments: Vec<ReplayHandle>,
        width: u32,
        height: u32,
        layers: u32,
    },
    DestroyFramebuffer {
        device: ReplayHandle,
        framebuffer: ReplayHandle,
    },
}

impl VulkanCommand {
    /// The Vulkan entry point this command replays, for logs and dumps.
    pub fn name(&self) -> &'static str {
        match self {
            Self::QueueSubmit { .. } => "vkQueueSubmit",
            Self::AllocateMemory { .. } => "vkAllocateMemory",
            Self::FreeMemory { .. } => "vkFreeMemory",
            Self::MapMemory { .. } => "vkMapMemory",
            Self::UnmapMemory { .. } => "vkUnmapMemory",
            Self::FlushMappedMemoryRanges { .. } => "vkFlushMappedMemoryRanges",
            Self::CreateBuffer { .. } => "vkCreateBuffer",
            Self::DestroyBuffer { .. } => "vkDestroyBuffer",
            Self::BindBufferMemory { .. } => "vkBindBufferMemory",
            Self::CreateImage { .. } => "vkCreateImage",
            Self::DestroyImage { .. } => "vkDestroyImage",
            Self::GetImageMemoryRequirements { .. } => "vkGetImageMemoryRequirements",
            Self::BindImageMemory { .. } => "vkBindImageMemory",
            Self::CreateImageView { .. } => "vkCreateImageView",
            Self::DestroyImageView { .. } => "vkDestroyImageView",
            Self::CreateShaderModule { .. } => "vkCreateShaderModule",
            Self::DestroyShaderModule { .. } => "vkDestroyShaderModule",
            Self::CreateDescriptorSetLayout { .. } => "vkCreateDescriptorSetLayout",
            Self::DestroyDescriptorSetLayout { .. } => "vkDestroyDescriptorSetLayout",
            Self::CreatePipelineLayout { .. } => "vkCreatePipelineLayout",
            Self::DestroyPipelineLayout { .. } => "vkDestroyPipelineLayout",
            Self::CreateComputePipelines { .. } => "vkCreateComputePipelines",
            Self::CreateGraphicsPipelines { .. } => "vkCreateGraphicsPipelines",
            Self::DestroyPipeline { .. } => "vkDestroyPipeline",
            Self::CreateDescriptorPool { .. } => "vkCreateDescriptorPool",
            Self::DestroyDescriptorPool { .. } => "vkDestroyDescriptorPool",
            Self::AllocateDescriptorSets { .. } => "vkAllocateDescriptorSets",
            Self::FreeDescriptorSets { .. } => "vkFreeDescriptorSets",
            Self::UpdateDescriptorSets { .. } => "vkUpdateDescriptorSets",
            Self::CreateCommandPool { .. } => "vkCreateCommandPool",
            Self::DestroyCommandPool { .. } => "vkDestroyCommandPool",
            Self::AllocateCommandBuffers { .. } => "vkAllocateCommandBuffers",
            Self::FreeCommandBuffers { .. } => "vkFreeCommandBuffers",
            Self::SubmitRecordedCommands { .. } => "vkRecordCommandBuffer",
            Self::CreateFence { .. } => "vkCreateFence",
            Self::DestroyFence { .. } => "vkDestroyFence",
            Self::WaitForFences { .. } => "vkWaitForFences",
            Self::CreateRenderPass { .. } => "vkCreateRenderPass",
            Self::DestroyRenderPass { .. } => "vkDestroyRenderPass",
            Self::CreateFramebuffer { .. } => "vkCreateFramebuffer",
            Self::DestroyFramebuffer { .. } => "vkDestroyFramebuffer",
        }
    }
}
