//! Compute-shader stores from one storage image view into another.

use ash::vk;
use dashmap::DashMap;
use tracing::{debug, error};
use vkprime_protocol::vulkan_commands::{
    RecordedCommand, SerializedComputePipelineCreateInfo, SerializedDescriptorImageInfo,
    SerializedDescriptorPoolSize, SerializedDescriptorSetLayoutBinding,
    SerializedPipelineShaderStageCreateInfo, SerializedPushConstantRange,
    SerializedWriteDescriptorSet, VulkanCommand,
};
use vkprime_protocol::{ReplayHandle, ResourceType};

use crate::builder::StateBuilder;
use crate::error::{PrimeError, PrimeResultExt, Result};
use crate::shaders;
use crate::state::ImageAspect;

const OUTPUT_IMAGE_BINDING: u32 = 0;
const INPUT_IMAGE_BINDING: u32 = 1;
const UNIFORM_BUFFER_BINDING: u32 = 2;

/// Store one region of `input` into the same region of `output`.
#[derive(Debug, Clone, Copy)]
pub struct ImageStoreJob {
    /// Image view read from
    pub input: ReplayHandle,
    /// Position of the input among the staging images of its aspect
    pub input_index: u32,
    /// Image view written to
    pub output: ReplayHandle,
    pub offset: vk::Offset3D,
    pub extent: vk::Extent3D,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct StoreShaderKey {
    device: ReplayHandle,
    input_format: vk::Format,
    input_aspect: ImageAspect,
    output_format: vk::Format,
    output_aspect: ImageAspect,
    image_type: vk::ImageType,
}

/// Owns the per-device descriptor and pipeline objects of image stores.
/// Everything is created on first use and lives until [`free`](Self::free).
#[derive(Default)]
pub struct ImageStoreHandler {
    desc_set_layouts: DashMap<ReplayHandle, ReplayHandle>,
    desc_pools: DashMap<ReplayHandle, ReplayHandle>,
    desc_sets: DashMap<ReplayHandle, ReplayHandle>,
    pipeline_layouts: DashMap<ReplayHandle, ReplayHandle>,
    pipelines: DashMap<StoreShaderKey, ReplayHandle>,
    shaders: DashMap<StoreShaderKey, ReplayHandle>,
}

impl ImageStoreHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record, submit and wait for one store on `queue`. Both views' images
    /// must already be in GENERAL layout.
    ///
    /// A failed submission is logged, not returned: the store is best effort
    /// once its inputs have been validated.
    pub fn store(&self, sb: &mut StateBuilder, job: &ImageStoreJob, queue: ReplayHandle) -> Result<()> {
        let output_view = sb.new_state().image_view(job.output)?.clone();
        let input_view = sb.new_state().image_view(job.input)?.clone();
        let device = output_view.device;

        let output_type = sb.new_state().image(output_view.image)?.info.image_type;
        let input_type = sb.new_state().image(input_view.image)?.info.image_type;
        if output_type != input_type {
            return Err(PrimeError::InvalidArgument(format!(
                "input image type: {:?} != output image type: {:?}",
                input_type, output_type
            )))
            .context("checking compute pipeline shader info");
        }

        let limits = sb.config().max_compute_group_count;
        if job.extent.width > limits[0] {
            return Err(PrimeError::InvalidArgument(format!("Extent.Width: {} too large", job.extent.width)))
                .context("checking image store extent dimension");
        }
        if job.extent.height > limits[1] {
            return Err(PrimeError::InvalidArgument(format!("Extent.Height: {} too large", job.extent.height)))
                .context("checking image store extent dimension");
        }
        if job.extent.depth > limits[2] {
            return Err(PrimeError::InvalidArgument(format!("Extent.z: {} too large", job.extent.depth)))
                .context("checking image store extent dimension");
        }

        let aspect_of = |flags: vk::ImageAspectFlags| {
            ImageAspect::from_flags(flags)
                .first()
                .copied()
                .ok_or_else(|| PrimeError::InvalidArgument(format!("view without aspect: {:?}", flags)))
        };
        let key = StoreShaderKey {
            device,
            input_format: input_view.format,
            input_aspect: aspect_of(input_view.range.aspect_mask)?,
            output_format: output_view.format,
            output_aspect: aspect_of(output_view.range.aspect_mask)?,
            image_type: input_type,
        };

        let desc_set = self.get_or_create_descriptor_set(sb, device)?;
        let pipeline_layout = self.get_or_create_pipeline_layout(sb, device)?;
        let pipeline = self
            .get_or_create_compute_pipeline(sb, key, pipeline_layout)
            .context("getting compute pipeline")?;

        let params: [u32; 4] = [
            job.offset.x as u32,
            job.offset.y as u32,
            job.offset.z as u32,
            job.input_index,
        ];

        let mut task = sb.new_scratch_task_on_queue(queue)?;
        let (output, input) = (job.output, job.input);
        task.do_on_committed(Box::new(move |sb: &mut StateBuilder| {
            sb.write(VulkanCommand::UpdateDescriptorSets {
                device,
                writes: vec![
                    storage_image_write(desc_set, OUTPUT_IMAGE_BINDING, output),
                    storage_image_write(desc_set, INPUT_IMAGE_BINDING, input),
                ],
            })
        }));
        task.record_command(RecordedCommand::BindPipeline {
            pipeline_bind_point: vk::PipelineBindPoint::COMPUTE.as_raw() as u32,
            pipeline,
        });
        task.record_command(RecordedCommand::BindDescriptorSets {
            pipeline_bind_point: vk::PipelineBindPoint::COMPUTE.as_raw() as u32,
            layout: pipeline_layout,
            first_set: 0,
            descriptor_sets: vec![desc_set],
            dynamic_offsets: Vec::new(),
        });
        task.record_command(RecordedCommand::PushConstants {
            layout: pipeline_layout,
            stage_flags: vk::ShaderStageFlags::COMPUTE.as_raw(),
            offset: 0,
            values: bytemuck::cast_slice(&params).to_vec(),
        });
        task.record_command(RecordedCommand::Dispatch {
            group_count_x: job.extent.width,
            group_count_y: job.extent.height,
            group_count_z: job.extent.depth,
        });

        // Best effort: a store that fails to commit leaves its region
        // unprimed and the remaining stores still run. The caller's later
        // flush reports any cleanup failure.
        if let Err(e) = task.commit(sb) {
            error!(
                output = %output_view.image,
                input = %input_view.image,
                "committing image store task: {}", e
            );
        }
        // Every store of the device shares one descriptor set.
        sb.flush_queue_scratch_resources(queue)
    }

    /// Destroy everything the handler created.
    pub fn free(&self, sb: &mut StateBuilder) -> Result<()> {
        for (key, pipeline) in drain(&self.pipelines) {
            sb.write(VulkanCommand::DestroyPipeline {
                device: key.device,
                pipeline,
            })?;
        }
        for (key, shader_module) in drain(&self.shaders) {
            sb.write(VulkanCommand::DestroyShaderModule {
                device: key.device,
                shader_module,
            })?;
        }
        for (device, layout) in drain(&self.pipeline_layouts) {
            sb.write(VulkanCommand::DestroyPipelineLayout { device, layout })?;
        }
        // Destroying the pool releases its sets.
        self.desc_sets.clear();
        for (device, pool) in drain(&self.desc_pools) {
            sb.write(VulkanCommand::DestroyDescriptorPool { device, pool })?;
        }
        for (device, layout) in drain(&self.desc_set_layouts) {
            sb.write(VulkanCommand::DestroyDescriptorSetLayout { device, layout })?;
        }
        Ok(())
    }

    fn get_or_create_descriptor_set_layout(&self, sb: &mut StateBuilder, device: ReplayHandle) -> Result<ReplayHandle> {
        let layout = self.desc_set_layouts.entry(device).or_try_insert_with(|| {
            let layout = sb.new_unused_handle(ResourceType::VkDescriptorSetLayout)?;
            let binding = |binding: u32, ty: vk::DescriptorType| SerializedDescriptorSetLayoutBinding {
                binding,
                descriptor_type: ty.as_raw(),
                descriptor_count: 1,
                stage_flags: vk::ShaderStageFlags::COMPUTE.as_raw(),
            };
            sb.write(VulkanCommand::CreateDescriptorSetLayout {
                device,
                layout,
                bindings: vec![
                    binding(OUTPUT_IMAGE_BINDING, vk::DescriptorType::STORAGE_IMAGE),
                    binding(INPUT_IMAGE_BINDING, vk::DescriptorType::STORAGE_IMAGE),
                    binding(UNIFORM_BUFFER_BINDING, vk::DescriptorType::UNIFORM_BUFFER),
                ],
            })?;
            Ok::<_, PrimeError>(layout)
        })?;
        Ok(*layout)
    }

    fn get_or_create_descriptor_set(&self, sb: &mut StateBuilder, device: ReplayHandle) -> Result<ReplayHandle> {
        if let Some(set) = self.desc_sets.get(&device) {
            return Ok(*set);
        }
        let set_layout = self.get_or_create_descriptor_set_layout(sb, device)?;
        let pool = *self.desc_pools.entry(device).or_try_insert_with(|| {
            let pool = sb.new_unused_handle(ResourceType::VkDescriptorPool)?;
            sb.write(VulkanCommand::CreateDescriptorPool {
                device,
                pool,
                max_sets: 1,
                pool_sizes: vec![
                    SerializedDescriptorPoolSize {
                        descriptor_type: vk::DescriptorType::STORAGE_IMAGE.as_raw(),
                        descriptor_count: 2,
                    },
                    SerializedDescriptorPoolSize {
                        descriptor_type: vk::DescriptorType::UNIFORM_BUFFER.as_raw(),
                        descriptor_count: 1,
                    },
                ],
                flags: vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET.as_raw(),
            })?;
            Ok::<_, PrimeError>(pool)
        })?;
        let set = self.desc_sets.entry(device).or_try_insert_with(|| {
            let set = sb.new_unused_handle(ResourceType::VkDescriptorSet)?;
            sb.write(VulkanCommand::AllocateDescriptorSets {
                device,
                descriptor_pool: pool,
                descriptor_sets: vec![set],
                set_layouts: vec![set_layout],
            })?;
            Ok::<_, PrimeError>(set)
        })?;
        Ok(*set)
    }

    fn get_or_create_pipeline_layout(&self, sb: &mut StateBuilder, device: ReplayHandle) -> Result<ReplayHandle> {
        if let Some(layout) = self.pipeline_layouts.get(&device) {
            return Ok(*layout);
        }
        let set_layout = self.get_or_create_descriptor_set_layout(sb, device)?;
        let layout = self.pipeline_layouts.entry(device).or_try_insert_with(|| {
            let layout = sb.new_unused_handle(ResourceType::VkPipelineLayout)?;
            sb.write(VulkanCommand::CreatePipelineLayout {
                device,
                layout,
                set_layouts: vec![set_layout],
                push_constant_ranges: vec![SerializedPushConstantRange {
                    stage_flags: vk::ShaderStageFlags::COMPUTE.as_raw(),
                    offset: 0,
                    size: shaders::STORE_PUSH_CONSTANT_SIZE,
                }],
            })?;
            Ok::<_, PrimeError>(layout)
        })?;
        Ok(*layout)
    }

    fn get_or_create_shader_module(&self, sb: &mut StateBuilder, key: StoreShaderKey) -> Result<ReplayHandle> {
        let module = self.shaders.entry(key).or_try_insert_with(|| {
            let code = shaders::store_compute_spirv(
                key.output_format,
                key.output_aspect,
                key.input_format,
                key.input_aspect,
                key.image_type,
            )?;
            let shader_module = sb.new_unused_handle(ResourceType::VkShaderModule)?;
            debug!(?key, bytes = code.len(), "created image store shader");
            sb.write(VulkanCommand::CreateShaderModule {
                device: key.device,
                shader_module,
                code,
            })?;
            Ok::<_, PrimeError>(shader_module)
        })?;
        Ok(*module)
    }

    fn get_or_create_compute_pipeline(
        &self,
        sb: &mut StateBuilder,
        key: StoreShaderKey,
        layout: ReplayHandle,
    ) -> Result<ReplayHandle> {
        if let Some(pipeline) = self.pipelines.get(&key) {
            return Ok(*pipeline);
        }
        let module = self.get_or_create_shader_module(sb, key)?;
        let pipeline = self.pipelines.entry(key).or_try_insert_with(|| {
            let pipeline = sb.new_unused_handle(ResourceType::VkPipeline)?;
            sb.write(VulkanCommand::CreateComputePipelines {
                device: key.device,
                pipelines: vec![pipeline],
                create_infos: vec![SerializedComputePipelineCreateInfo {
                    stage: SerializedPipelineShaderStageCreateInfo {
                        module,
                        entry_point: shaders::ENTRY_POINT.to_string(),
                        stage: vk::ShaderStageFlags::COMPUTE.as_raw(),
                    },
                    layout,
                    flags: 0,
                }],
            })?;
            Ok::<_, PrimeError>(pipeline)
        })?;
        Ok(*pipeline)
    }
}

fn storage_image_write(set: ReplayHandle, binding: u32, view: ReplayHandle) -> SerializedWriteDescriptorSet {
    SerializedWriteDescriptorSet {
        dst_set: set,
        dst_binding: binding,
        dst_array_element: 0,
        descriptor_type: vk::DescriptorType::STORAGE_IMAGE.as_raw(),
        buffer_infos: Vec::new(),
        image_infos: vec![SerializedDescriptorImageInfo {
            sampler: None,
            image_view: view,
            image_layout: vk::ImageLayout::GENERAL.as_raw(),
        }],
    }
}

/// Take every entry out of `map`, sorted so teardown order is stable.
pub(crate) fn drain<K, V>(map: &DashMap<K, V>) -> Vec<(K, V)>
where
    K: Eq + std::hash::Hash + Clone + Ord,
    V: Copy,
{
    let mut entries: Vec<(K, V)> = map.iter().map(|e| (e.key().clone(), *e.value())).collect();
    map.clear();
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    entries
}
