//! Priming by drawing: a full-screen quad whose fragment shader reads the
//! canonical staging images as input attachments of its subpass and writes
//! one subresource of the target.
//!
//! The attachments of a render pass are the staging images in binding order,
//! followed by the target.
//!
//! Color and depth targets take one draw. Stencil values cannot be written
//! by a fragment shader, so a stencil target takes eight draws, one per bit
//! plane, each replacing only that bit where the staged value has it set.

use std::sync::Arc;

use ash::vk;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::debug;
use vkprime_protocol::vulkan_commands::{
    RecordedCommand, SerializedAttachmentDescription, SerializedAttachmentReference,
    SerializedClearAttachment, SerializedClearRect, SerializedClearValue,
    SerializedComponentMapping, SerializedDescriptorImageInfo, SerializedDescriptorPoolSize,
    SerializedDescriptorSetLayoutBinding, SerializedGraphicsPipelineCreateInfo,
    SerializedPipelineColorBlendAttachmentState, SerializedPipelineColorBlendStateCreateInfo,
    SerializedPipelineDepthStencilStateCreateInfo, SerializedPipelineDynamicStateCreateInfo,
    SerializedPipelineInputAssemblyStateCreateInfo, SerializedPipelineMultisampleStateCreateInfo,
    SerializedPipelineRasterizationStateCreateInfo, SerializedPipelineShaderStageCreateInfo,
    SerializedPipelineVertexInputStateCreateInfo, SerializedPipelineViewportStateCreateInfo,
    SerializedPushConstantRange, SerializedStencilOpState, SerializedSubpassDescription,
    SerializedWriteDescriptorSet, VulkanCommand,
};
use vkprime_protocol::{ReplayHandle, ResourceType};

use crate::builder::StateBuilder;
use crate::cmd;
use crate::error::{PrimeError, PrimeResultExt, Result};
use crate::shaders;
use crate::state::{ImageAspect, ImageInfo};
use crate::store::drain;
use crate::task::ScratchTask;

const STENCIL_BIT_PLANES: u32 = 8;

/// A staging image read by a render, with the layout its subresources are in
/// before the render and the one they must be left in.
#[derive(Debug, Clone, Copy)]
pub struct RenderImage {
    pub image: ReplayHandle,
    pub aspect: ImageAspect,
    pub layer: u32,
    pub level: u32,
    pub initial_layout: vk::ImageLayout,
    pub final_layout: vk::ImageLayout,
}

/// The subresource a render writes. Its current layout is whatever the task
/// has left it in so far.
#[derive(Debug, Clone, Copy)]
pub struct RenderTarget {
    pub image: ReplayHandle,
    pub aspect: ImageAspect,
    pub layer: u32,
    pub level: u32,
    pub final_layout: vk::ImageLayout,
}

/// Draw the staged content of `inputs` into `target`.
#[derive(Debug, Clone)]
pub struct RenderJob {
    /// Staging images, one per staging slice of the texel
    pub inputs: Vec<RenderImage>,
    pub target: RenderTarget,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct DescriptorSetKey {
    device: ReplayHandle,
    input_count: u32,
    push_constant: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
enum ShaderKind {
    Vertex,
    Fragment { format: vk::Format, aspect: ImageAspect },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct ShaderKey {
    device: ReplayHandle,
    kind: ShaderKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct PipelineKey {
    descriptor_set: DescriptorSetKey,
    target_format: vk::Format,
    target_aspect: ImageAspect,
    target_samples: vk::SampleCountFlags,
}

/// Owns the cached layouts, shaders and pipelines of render priming.
#[derive(Default)]
pub struct RenderHandler {
    descriptor_set_layouts: DashMap<DescriptorSetKey, ReplayHandle>,
    pipeline_layouts: DashMap<DescriptorSetKey, ReplayHandle>,
    pipelines: DashMap<PipelineKey, ReplayHandle>,
    shaders: DashMap<ShaderKey, ReplayHandle>,
    /// Held while a render's descriptor set is written and its draws recorded
    submit_lock: Arc<Mutex<()>>,
}

/// Layout a target subresource must be in while it is drawn to.
fn attachment_layout(aspect: ImageAspect) -> vk::ImageLayout {
    match aspect {
        ImageAspect::Color => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        ImageAspect::Depth | ImageAspect::Stencil => vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    }
}

impl RenderHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the render of `job` into `task`. The transient objects of the
    /// render are destroyed once the task has executed.
    pub fn render(&self, sb: &mut StateBuilder, job: &RenderJob, task: &mut ScratchTask) -> Result<()> {
        if job.inputs.is_empty() {
            return Err(PrimeError::InvalidArgument("render job without input images".to_string()));
        }
        let target = job.target;
        let target_info = sb.new_state().image(target.image)?.info.clone();
        if target_info.image_type == vk::ImageType::TYPE_3D {
            return Err(PrimeError::unsupported(
                target.image,
                "rendering to 3D images is not supported",
            ));
        }
        let mut input_infos = Vec::with_capacity(job.inputs.len());
        for input in &job.inputs {
            let info = sb.new_state().image(input.image)?.info.clone();
            if info.image_type == vk::ImageType::TYPE_3D {
                return Err(PrimeError::unsupported(
                    input.image,
                    "rendering from 3D images is not supported",
                ));
            }
            input_infos.push(info);
        }

        let device = task.device();
        let output_barrier_aspect = cmd::barrier_aspect_flags(target_info.format, target.aspect.flags());
        let pre_render_layout = attachment_layout(target.aspect);
        let set_key = DescriptorSetKey {
            device,
            input_count: job.inputs.len() as u32,
            push_constant: target.aspect == ImageAspect::Stencil,
        };

        let (pool, desc_set) = self
            .create_descriptor_set(sb, set_key)
            .context("creating descriptor set for rendering")?;
        task.defer_until_executed(Box::new(move |sb: &mut StateBuilder| {
            sb.write(VulkanCommand::FreeDescriptorSets {
                device,
                descriptor_pool: pool,
                descriptor_sets: vec![desc_set],
            })?;
            sb.write(VulkanCommand::DestroyDescriptorPool { device, pool })
        }));

        let mut input_views = Vec::with_capacity(job.inputs.len());
        for (input, info) in job.inputs.iter().zip(&input_infos) {
            let view = create_view(sb, task, device, input.image, info, input.aspect.flags(), input.layer, input.level)
                .with_context(|| format!("creating image view for input image {}", input.image))?;
            input_views.push(view);
        }
        let output_view = create_view(
            sb,
            task,
            device,
            target.image,
            &target_info,
            output_barrier_aspect,
            target.layer,
            target.level,
        )
        .with_context(|| format!("creating image view for render target {}", target.image))?;

        let render_pass =
            self.create_render_pass(sb, device, &target_info, &input_infos, target.aspect, target.final_layout)?;
        task.defer_until_executed(Box::new(move |sb: &mut StateBuilder| {
            sb.write(VulkanCommand::DestroyRenderPass { device, render_pass })
        }));

        let extent = target_info.level_extent(target.level);
        let mut attachments = input_views.clone();
        attachments.push(output_view);
        let framebuffer = sb.new_unused_handle(ResourceType::VkFramebuffer)?;
        sb.write(VulkanCommand::CreateFramebuffer {
            device,
            framebuffer,
            render_pass,
            attachments,
            width: extent.width,
            height: extent.height,
            layers: 1,
        })?;
        task.defer_until_executed(Box::new(move |sb: &mut StateBuilder| {
            sb.write(VulkanCommand::DestroyFramebuffer { device, framebuffer })
        }));

        let pipeline_layout = self.get_or_create_pipeline_layout(sb, set_key)?;
        let pipeline_key = PipelineKey {
            descriptor_set: set_key,
            target_format: target_info.format,
            target_aspect: target.aspect,
            target_samples: target_info.samples,
        };
        let pipeline = self
            .get_or_create_graphics_pipeline(sb, pipeline_key, pipeline_layout, render_pass)
            .context("getting graphics pipeline")?;

        let guard = self.submit_lock.lock();

        let lock = Arc::clone(&self.submit_lock);
        task.do_on_committed(Box::new(move |sb: &mut StateBuilder| {
            let _guard = lock.lock();
            let writes = input_views
                .iter()
                .enumerate()
                .map(|(binding, view)| SerializedWriteDescriptorSet {
                    dst_set: desc_set,
                    dst_binding: binding as u32,
                    dst_array_element: 0,
                    descriptor_type: vk::DescriptorType::INPUT_ATTACHMENT.as_raw(),
                    buffer_infos: Vec::new(),
                    image_infos: vec![SerializedDescriptorImageInfo {
                        sampler: None,
                        image_view: *view,
                        image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL.as_raw(),
                    }],
                })
                .collect();
            sb.write(VulkanCommand::UpdateDescriptorSets { device, writes })
        }));

        let mut pre_barriers = Vec::new();
        let mut post_barriers = Vec::new();
        for (input, info) in job.inputs.iter().zip(&input_infos) {
            let range = vk::ImageSubresourceRange {
                aspect_mask: cmd::barrier_aspect_flags(info.format, input.aspect.flags()),
                base_mip_level: 0,
                level_count: info.mip_levels,
                base_array_layer: 0,
                layer_count: info.array_layers,
            };
            pre_barriers.push(cmd::layout_barrier(
                input.image,
                input.initial_layout,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                &range,
            ));
            if input.final_layout != vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL {
                post_barriers.push(cmd::layout_barrier(
                    input.image,
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    input.final_layout,
                    &range,
                ));
            }
        }
        let target_range = cmd::single_range(output_barrier_aspect, target.layer, target.level);
        let current = task.layout_of(sb, target.image, target.aspect, target.layer, target.level);
        pre_barriers.push(cmd::layout_barrier(target.image, current, pre_render_layout, &target_range));
        task.record_command(cmd::image_barriers(pre_barriers));

        let draw = DrawInfo {
            render_pass,
            framebuffer,
            desc_set,
            pipeline_layout,
            pipeline,
            aspect: target.aspect,
            width: extent.width,
            height: extent.height,
            stencil_bit: None,
            clear_stencil: false,
        };
        match target.aspect {
            ImageAspect::Color | ImageAspect::Depth => {
                begin_render_pass_and_draw(task, &draw);
                // The render pass leaves the attachment in the final layout.
                for aspect in ImageAspect::from_flags(output_barrier_aspect) {
                    task.track_layout(target.image, aspect, target.layer, target.level, target.final_layout);
                }
            }
            ImageAspect::Stencil => {
                for i in 0..STENCIL_BIT_PLANES {
                    task.record_command(cmd::image_barriers(vec![cmd::layout_barrier(
                        target.image,
                        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                        &target_range,
                    )]));
                    task.record_command(RecordedCommand::PushConstants {
                        layout: pipeline_layout,
                        stage_flags: vk::ShaderStageFlags::FRAGMENT.as_raw(),
                        offset: 0,
                        values: i.to_le_bytes().to_vec(),
                    });
                    begin_render_pass_and_draw(
                        task,
                        &DrawInfo {
                            stencil_bit: Some(i),
                            clear_stencil: i == 0,
                            ..draw
                        },
                    );
                }
                post_barriers.push(cmd::layout_barrier(
                    target.image,
                    vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                    target.final_layout,
                    &target_range,
                ));
            }
        }
        if !post_barriers.is_empty() {
            task.record_command(cmd::image_barriers(post_barriers));
        }
        drop(guard);

        debug!(
            image = %target.image,
            aspect = ?target.aspect,
            layer = target.layer,
            level = target.level,
            inputs = job.inputs.len(),
            "render recorded"
        );
        Ok(())
    }

    /// Destroy every cached object.
    pub fn free(&self, sb: &mut StateBuilder) -> Result<()> {
        for (key, pipeline) in drain(&self.pipelines) {
            sb.write(VulkanCommand::DestroyPipeline {
                device: key.descriptor_set.device,
                pipeline,
            })?;
        }
        for (key, layout) in drain(&self.pipeline_layouts) {
            sb.write(VulkanCommand::DestroyPipelineLayout {
                device: key.device,
                layout,
            })?;
        }
        for (key, layout) in drain(&self.descriptor_set_layouts) {
            sb.write(VulkanCommand::DestroyDescriptorSetLayout {
                device: key.device,
                layout,
            })?;
        }
        for (key, shader_module) in drain(&self.shaders) {
            sb.write(VulkanCommand::DestroyShaderModule {
                device: key.device,
                shader_module,
            })?;
        }
        Ok(())
    }

    fn create_descriptor_set(&self, sb: &mut StateBuilder, key: DescriptorSetKey) -> Result<(ReplayHandle, ReplayHandle)> {
        let set_layout = self.get_or_create_descriptor_set_layout(sb, key)?;
        let pool = sb.new_unused_handle(ResourceType::VkDescriptorPool)?;
        sb.write(VulkanCommand::CreateDescriptorPool {
            device: key.device,
            pool,
            max_sets: 1,
            pool_sizes: vec![SerializedDescriptorPoolSize {
                descriptor_type: vk::DescriptorType::INPUT_ATTACHMENT.as_raw(),
                descriptor_count: key.input_count,
            }],
            flags: vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET.as_raw(),
        })?;
        let set = sb.new_unused_handle(ResourceType::VkDescriptorSet)?;
        sb.write(VulkanCommand::AllocateDescriptorSets {
            device: key.device,
            descriptor_pool: pool,
            descriptor_sets: vec![set],
            set_layouts: vec![set_layout],
        })?;
        Ok((pool, set))
    }

    fn get_or_create_descriptor_set_layout(&self, sb: &mut StateBuilder, key: DescriptorSetKey) -> Result<ReplayHandle> {
        let layout = self.descriptor_set_layouts.entry(key).or_try_insert_with(|| {
            let layout = sb.new_unused_handle(ResourceType::VkDescriptorSetLayout)?;
            let bindings = (0..key.input_count)
                .map(|binding| SerializedDescriptorSetLayoutBinding {
                    binding,
                    descriptor_type: vk::DescriptorType::INPUT_ATTACHMENT.as_raw(),
                    descriptor_count: 1,
                    stage_flags: vk::ShaderStageFlags::FRAGMENT.as_raw(),
                })
                .collect();
            sb.write(VulkanCommand::CreateDescriptorSetLayout {
                device: key.device,
                layout,
                bindings,
            })?;
            Ok::<_, PrimeError>(layout)
        })?;
        Ok(*layout)
    }

    fn get_or_create_pipeline_layout(&self, sb: &mut StateBuilder, key: DescriptorSetKey) -> Result<ReplayHandle> {
        if let Some(layout) = self.pipeline_layouts.get(&key) {
            return Ok(*layout);
        }
        let set_layout = self.get_or_create_descriptor_set_layout(sb, key)?;
        let layout = self.pipeline_layouts.entry(key).or_try_insert_with(|| {
            let layout = sb.new_unused_handle(ResourceType::VkPipelineLayout)?;
            let push_constant_ranges = if key.push_constant {
                vec![SerializedPushConstantRange {
                    stage_flags: vk::ShaderStageFlags::FRAGMENT.as_raw(),
                    offset: 0,
                    size: shaders::STENCIL_PUSH_CONSTANT_SIZE,
                }]
            } else {
                Vec::new()
            };
            sb.write(VulkanCommand::CreatePipelineLayout {
                device: key.device,
                layout,
                set_layouts: vec![set_layout],
                push_constant_ranges,
            })?;
            Ok::<_, PrimeError>(layout)
        })?;
        Ok(*layout)
    }

    fn get_or_create_shader_module(&self, sb: &mut StateBuilder, key: ShaderKey) -> Result<ReplayHandle> {
        let module = self.shaders.entry(key).or_try_insert_with(|| {
            let code = match key.kind {
                ShaderKind::Vertex => shaders::quad_vertex_spirv()?,
                ShaderKind::Fragment { format, aspect } => shaders::render_fragment_spirv(format, aspect)?,
            };
            let shader_module = sb.new_unused_handle(ResourceType::VkShaderModule)?;
            sb.write(VulkanCommand::CreateShaderModule {
                device: key.device,
                shader_module,
                code,
            })?;
            Ok::<_, PrimeError>(shader_module)
        })?;
        Ok(*module)
    }

    fn create_render_pass(
        &self,
        sb: &mut StateBuilder,
        device: ReplayHandle,
        target: &ImageInfo,
        inputs: &[ImageInfo],
        aspect: ImageAspect,
        final_layout: vk::ImageLayout,
    ) -> Result<ReplayHandle> {
        let layout = attachment_layout(aspect);
        // Stencil takes several passes over the same attachment, so its layout
        // is only changed once the last pass is done.
        let (load_op, final_layout) = match aspect {
            ImageAspect::Color | ImageAspect::Depth => (vk::AttachmentLoadOp::DONT_CARE, final_layout),
            ImageAspect::Stencil => (vk::AttachmentLoadOp::LOAD, layout),
        };
        let input_layout = vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL.as_raw();
        let mut attachments: Vec<SerializedAttachmentDescription> = inputs
            .iter()
            .map(|input| SerializedAttachmentDescription {
                flags: 0,
                format: input.format.as_raw(),
                samples: input.samples.as_raw(),
                load_op: vk::AttachmentLoadOp::LOAD.as_raw(),
                // Later stencil passes load the same staging images again.
                store_op: vk::AttachmentStoreOp::STORE.as_raw(),
                stencil_load_op: vk::AttachmentLoadOp::DONT_CARE.as_raw(),
                stencil_store_op: vk::AttachmentStoreOp::DONT_CARE.as_raw(),
                initial_layout: input_layout,
                final_layout: input_layout,
            })
            .collect();
        let input_attachments = (0..inputs.len() as u32)
            .map(|attachment| SerializedAttachmentReference {
                attachment,
                layout: input_layout,
            })
            .collect();
        let reference = SerializedAttachmentReference {
            attachment: inputs.len() as u32,
            layout: layout.as_raw(),
        };
        let (color_attachments, depth_stencil_attachment) = match aspect {
            ImageAspect::Color => (vec![reference], None),
            ImageAspect::Depth | ImageAspect::Stencil => (Vec::new(), Some(reference)),
        };
        attachments.push(SerializedAttachmentDescription {
            flags: 0,
            format: target.format.as_raw(),
            samples: target.samples.as_raw(),
            load_op: load_op.as_raw(),
            store_op: vk::AttachmentStoreOp::STORE.as_raw(),
            // Kept through color and depth renders, which leave the
            // stencil test off.
            stencil_load_op: vk::AttachmentLoadOp::LOAD.as_raw(),
            stencil_store_op: vk::AttachmentStoreOp::STORE.as_raw(),
            initial_layout: layout.as_raw(),
            final_layout: final_layout.as_raw(),
        });
        let render_pass = sb.new_unused_handle(ResourceType::VkRenderPass)?;
        sb.write(VulkanCommand::CreateRenderPass {
            device,
            render_pass,
            attachments,
            subpasses: vec![SerializedSubpassDescription {
                flags: 0,
                pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS.as_raw(),
                input_attachments,
                color_attachments,
                resolve_attachments: Vec::new(),
                depth_stencil_attachment,
                preserve_attachments: Vec::new(),
            }],
            dependencies: Vec::new(),
        })?;
        Ok(render_pass)
    }

    fn get_or_create_graphics_pipeline(
        &self,
        sb: &mut StateBuilder,
        key: PipelineKey,
        layout: ReplayHandle,
        render_pass: ReplayHandle,
    ) -> Result<ReplayHandle> {
        if let Some(pipeline) = self.pipelines.get(&key) {
            return Ok(*pipeline);
        }
        let device = key.descriptor_set.device;
        let vertex = self.get_or_create_shader_module(
            sb,
            ShaderKey {
                device,
                kind: ShaderKind::Vertex,
            },
        )?;
        let fragment = self.get_or_create_shader_module(
            sb,
            ShaderKey {
                device,
                kind: ShaderKind::Fragment {
                    format: key.target_format,
                    aspect: key.target_aspect,
                },
            },
        )?;
        let create_info = graphics_pipeline_info(key, vertex, fragment, layout, render_pass);
        let pipeline = self.pipelines.entry(key).or_try_insert_with(|| {
            let pipeline = sb.new_unused_handle(ResourceType::VkPipeline)?;
            sb.write(VulkanCommand::CreateGraphicsPipelines {
                device,
                pipelines: vec![pipeline],
                create_infos: vec![create_info],
            })?;
            Ok::<_, PrimeError>(pipeline)
        })?;
        Ok(*pipeline)
    }
}

fn graphics_pipeline_info(
    key: PipelineKey,
    vertex: ReplayHandle,
    fragment: ReplayHandle,
    layout: ReplayHandle,
    render_pass: ReplayHandle,
) -> SerializedGraphicsPipelineCreateInfo {
    let stage = |module: ReplayHandle, stage: vk::ShaderStageFlags| SerializedPipelineShaderStageCreateInfo {
        module,
        entry_point: shaders::ENTRY_POINT.to_string(),
        stage: stage.as_raw(),
    };
    let stencil_op = SerializedStencilOpState {
        fail_op: vk::StencilOp::KEEP.as_raw(),
        pass_op: vk::StencilOp::REPLACE.as_raw(),
        depth_fail_op: vk::StencilOp::REPLACE.as_raw(),
        compare_op: vk::CompareOp::ALWAYS.as_raw(),
        compare_mask: 0,
        write_mask: 0,
        reference: 0,
    };
    let depth = key.target_aspect == ImageAspect::Depth;
    let stencil = key.target_aspect == ImageAspect::Stencil;

    let color_blend_state = (key.target_aspect == ImageAspect::Color).then(|| {
        SerializedPipelineColorBlendStateCreateInfo {
            logic_op_enable: false,
            logic_op: vk::LogicOp::CLEAR.as_raw(),
            attachments: vec![SerializedPipelineColorBlendAttachmentState {
                blend_enable: false,
                src_color_blend_factor: vk::BlendFactor::ZERO.as_raw(),
                dst_color_blend_factor: vk::BlendFactor::ONE.as_raw(),
                color_blend_op: vk::BlendOp::ADD.as_raw(),
                src_alpha_blend_factor: vk::BlendFactor::ZERO.as_raw(),
                dst_alpha_blend_factor: vk::BlendFactor::ONE.as_raw(),
                alpha_blend_op: vk::BlendOp::ADD.as_raw(),
                color_write_mask: vk::ColorComponentFlags::RGBA.as_raw(),
            }],
            blend_constants: [1.0; 4],
        }
    });

    let mut dynamic_states = vec![vk::DynamicState::VIEWPORT.as_raw(), vk::DynamicState::SCISSOR.as_raw()];
    if stencil {
        dynamic_states.push(vk::DynamicState::STENCIL_WRITE_MASK.as_raw());
        dynamic_states.push(vk::DynamicState::STENCIL_REFERENCE.as_raw());
    }

    SerializedGraphicsPipelineCreateInfo {
        flags: 0,
        stages: vec![
            stage(vertex, vk::ShaderStageFlags::VERTEX),
            stage(fragment, vk::ShaderStageFlags::FRAGMENT),
        ],
        vertex_input_state: SerializedPipelineVertexInputStateCreateInfo {
            vertex_binding_descriptions: Vec::new(),
            vertex_attribute_descriptions: Vec::new(),
        },
        input_assembly_state: SerializedPipelineInputAssemblyStateCreateInfo {
            topology: vk::PrimitiveTopology::TRIANGLE_LIST.as_raw(),
            primitive_restart_enable: false,
        },
        // Overridden by the dynamic viewport and scissor.
        viewport_state: Some(SerializedPipelineViewportStateCreateInfo {
            viewports: vec![cmd::viewport(1, 1)],
            scissors: vec![cmd::rect(1, 1)],
        }),
        rasterization_state: SerializedPipelineRasterizationStateCreateInfo {
            depth_clamp_enable: false,
            rasterizer_discard_enable: false,
            polygon_mode: vk::PolygonMode::FILL.as_raw(),
            cull_mode: vk::CullModeFlags::NONE.as_raw(),
            front_face: vk::FrontFace::COUNTER_CLOCKWISE.as_raw(),
            depth_bias_enable: false,
            depth_bias_constant_factor: 0.0,
            depth_bias_clamp: 0.0,
            depth_bias_slope_factor: 0.0,
            line_width: 1.0,
        },
        multisample_state: Some(SerializedPipelineMultisampleStateCreateInfo {
            rasterization_samples: key.target_samples.as_raw(),
            sample_shading_enable: false,
            min_sample_shading: 0.0,
            alpha_to_coverage_enable: false,
            alpha_to_one_enable: false,
        }),
        depth_stencil_state: Some(SerializedPipelineDepthStencilStateCreateInfo {
            depth_test_enable: depth,
            depth_write_enable: depth,
            depth_compare_op: vk::CompareOp::ALWAYS.as_raw(),
            depth_bounds_test_enable: false,
            stencil_test_enable: stencil,
            front: stencil_op.clone(),
            back: stencil_op,
            min_depth_bounds: 0.0,
            max_depth_bounds: 1.0,
        }),
        color_blend_state,
        dynamic_state: Some(SerializedPipelineDynamicStateCreateInfo { dynamic_states }),
        layout,
        render_pass,
        subpass: 0,
    }
}

#[allow(clippy::too_many_arguments)]
fn create_view(
    sb: &mut StateBuilder,
    task: &mut ScratchTask,
    device: ReplayHandle,
    image: ReplayHandle,
    info: &ImageInfo,
    aspect: vk::ImageAspectFlags,
    layer: u32,
    level: u32,
) -> Result<ReplayHandle> {
    let image_view = sb.new_unused_handle(ResourceType::VkImageView)?;
    let identity = vk::ComponentSwizzle::IDENTITY.as_raw();
    sb.write(VulkanCommand::CreateImageView {
        device,
        image_view,
        image,
        view_type: vk::ImageViewType::TYPE_2D.as_raw(),
        format: info.format.as_raw(),
        components: SerializedComponentMapping {
            r: identity,
            g: identity,
            b: identity,
            a: identity,
        },
        subresource_range: cmd::subresource_range(&cmd::single_range(aspect, layer, level)),
    })?;
    task.defer_until_executed(Box::new(move |sb: &mut StateBuilder| {
        sb.write(VulkanCommand::DestroyImageView { device, image_view })
    }));
    Ok(image_view)
}

#[derive(Clone, Copy)]
struct DrawInfo {
    render_pass: ReplayHandle,
    framebuffer: ReplayHandle,
    desc_set: ReplayHandle,
    pipeline_layout: ReplayHandle,
    pipeline: ReplayHandle,
    aspect: ImageAspect,
    width: u32,
    height: u32,
    /// Bit plane written by a stencil pass
    stencil_bit: Option<u32>,
    clear_stencil: bool,
}

fn begin_render_pass_and_draw(task: &mut ScratchTask, info: &DrawInfo) {
    let area = cmd::rect(info.width, info.height);
    task.record_command(RecordedCommand::BeginRenderPass {
        render_pass: info.render_pass,
        framebuffer: info.framebuffer,
        render_area: area.clone(),
        clear_values: Vec::new(),
        contents: vk::SubpassContents::INLINE.as_raw() as u32,
    });
    if info.clear_stencil {
        task.record_command(RecordedCommand::ClearAttachments {
            attachments: vec![SerializedClearAttachment {
                aspect_mask: vk::ImageAspectFlags::STENCIL.as_raw(),
                color_attachment: 0,
                clear_value: SerializedClearValue { data: [0; 16] },
            }],
            rects: vec![SerializedClearRect {
                rect: area.clone(),
                // Counted from the base layer of the attachment view.
                base_array_layer: 0,
                layer_count: 1,
            }],
        });
    }
    task.record_command(RecordedCommand::BindPipeline {
        pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS.as_raw() as u32,
        pipeline: info.pipeline,
    });
    task.record_command(RecordedCommand::SetViewport {
        first_viewport: 0,
        viewports: vec![cmd::viewport(info.width, info.height)],
    });
    task.record_command(RecordedCommand::SetScissor {
        first_scissor: 0,
        scissors: vec![area],
    });
    if let (ImageAspect::Stencil, Some(bit)) = (info.aspect, info.stencil_bit) {
        let face_mask = vk::StencilFaceFlags::FRONT_AND_BACK.as_raw();
        task.record_command(RecordedCommand::SetStencilWriteMask {
            face_mask,
            write_mask: 1 << bit,
        });
        task.record_command(RecordedCommand::SetStencilReference {
            face_mask,
            reference: 1 << bit,
        });
    }
    task.record_command(RecordedCommand::BindDescriptorSets {
        pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS.as_raw() as u32,
        layout: info.pipeline_layout,
        first_set: 0,
        descriptor_sets: vec![info.desc_set],
        dynamic_offsets: Vec::new(),
    });
    task.record_command(RecordedCommand::Draw {
        vertex_count: 6,
        instance_count: 1,
        first_vertex: 0,
        first_instance: 0,
    });
    task.record_command(RecordedCommand::EndRenderPass);
}
