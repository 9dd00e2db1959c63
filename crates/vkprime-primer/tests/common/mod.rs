//! Shared scene setup and a reference command emulator.
//!
//! The emulator replays the commands a `StateBuilder` wrote into a
//! `RecordingSink` and models what a device would do with them: memory
//! contents, buffer to image copies, layout transitions, and the priming
//! shaders' per-texel behavior (decoding canonical staging values through
//! `format::pack`).

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use ash::vk;
use vkprime_core::PrimerConfig;
use vkprime_primer::builder::StateBuilder;
use vkprime_primer::cmd;
use vkprime_primer::format;
use vkprime_primer::state::{
    BoundMemory, DeviceMemoryObject, DeviceObject, ImageAspect, ImageInfo, ImageObject, MemoryType,
    PhysicalDeviceObject, QueueObject, State,
};
use vkprime_primer::{FixedLayout, ImageLayouts, ImagePrimer, PrimingStrategy, RecordingSink};
use vkprime_protocol::vulkan_commands::{RecordedCommand, VulkanCommand};
use vkprime_protocol::{ReplayHandle, ResourceType};

pub const ALL_QUEUE_CAPS: vk::QueueFlags = vk::QueueFlags::from_raw(
    vk::QueueFlags::GRAPHICS.as_raw() | vk::QueueFlags::COMPUTE.as_raw() | vk::QueueFlags::TRANSFER.as_raw(),
);

pub fn image_handle(id: u64) -> ReplayHandle {
    ReplayHandle::new(ResourceType::VkImage, id)
}

/// A device with one queue, plus matching old and new states.
pub struct Scene {
    pub old: State,
    pub new: State,
    pub device: ReplayHandle,
    pub queue: ReplayHandle,
    pub config: PrimerConfig,
}

impl Scene {
    pub fn new() -> Self {
        Self::with_queue_caps(ALL_QUEUE_CAPS)
    }

    pub fn with_queue_caps(caps: vk::QueueFlags) -> Self {
        let physical = ReplayHandle::new(ResourceType::VkPhysicalDevice, 1);
        let device = ReplayHandle::new(ResourceType::VkDevice, 1);
        let queue = ReplayHandle::new(ResourceType::VkQueue, 1);
        let mut state = State::default();
        state.add_physical_device(PhysicalDeviceObject {
            handle: physical,
            memory_types: vec![
                MemoryType {
                    property_flags: vk::MemoryPropertyFlags::DEVICE_LOCAL,
                    heap_index: 0,
                },
                MemoryType {
                    property_flags: vk::MemoryPropertyFlags::HOST_VISIBLE
                        | vk::MemoryPropertyFlags::HOST_COHERENT,
                    heap_index: 1,
                },
            ],
            queue_family_flags: vec![caps],
        });
        state.add_device(DeviceObject {
            handle: device,
            physical_device: physical,
        });
        state.add_queue(QueueObject {
            handle: queue,
            device,
            family_index: 0,
            index: 0,
        });
        Self {
            old: state.clone(),
            new: state,
            device,
            queue,
            config: PrimerConfig::default(),
        }
    }

    /// Add an image to both states. The captured copy gets `content` for
    /// layer 0, level 0 of each listed aspect.
    pub fn add_image(&mut self, id: u64, info: ImageInfo, content: &[(ImageAspect, Vec<u8>)]) -> ReplayHandle {
        let handle = image_handle(id);
        let mut old = ImageObject::new(handle, self.device, info.clone());
        for (aspect, data) in content {
            assert!(old.set_level_data(*aspect, 0, 0, data.clone()), "no {:?} subresource", aspect);
        }
        old.last_bound_queues = vec![self.queue];
        self.old.add_image(old);
        self.new.add_image(ImageObject::new(handle, self.device, info));
        handle
    }

    /// Bind `image` in the new state to a fresh memory of `size` bytes.
    pub fn bind_new_memory(&mut self, image: ReplayHandle, id: u64, size: u64) -> ReplayHandle {
        let memory = ReplayHandle::new(ResourceType::VkDeviceMemory, id);
        self.new.add_memory(DeviceMemoryObject {
            handle: memory,
            device: self.device,
            size,
            memory_type_index: 1,
        });
        if let Ok(img) = self.new.image_mut(image) {
            img.bound_memory = Some(BoundMemory { memory, offset: 0 });
        }
        memory
    }

    pub fn emulator(&self) -> Emulator {
        Emulator::new(&self.new)
    }

    pub fn builder(&self, sink: RecordingSink) -> StateBuilder {
        StateBuilder::new(
            Arc::new(self.old.clone()),
            self.new.clone(),
            Box::new(sink),
            self.config.clone(),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PipelineKind {
    Color,
    Depth,
    Stencil,
    Compute,
}

#[derive(Debug, Clone, Copy)]
struct View {
    image: ReplayHandle,
    aspect_mask: vk::ImageAspectFlags,
    layer: u32,
    level: u32,
}

type Subresource = (ReplayHandle, ImageAspect, u32, u32);

struct RenderPass {
    /// Attachment index of the color or depth/stencil attachment
    output: usize,
    inputs: Vec<usize>,
    final_layouts: Vec<vk::ImageLayout>,
}

#[derive(Default)]
struct Bound {
    pipeline: Option<ReplayHandle>,
    descriptor_set: Option<ReplayHandle>,
    push_constants: Vec<u8>,
    framebuffer: Option<ReplayHandle>,
    render_pass: Option<ReplayHandle>,
    stencil_write_mask: u32,
    stencil_reference: u32,
}

/// Executes replay commands against an in-memory device model.
#[derive(Default)]
pub struct Emulator {
    memories: HashMap<ReplayHandle, Vec<u8>>,
    buffers: HashMap<ReplayHandle, (ReplayHandle, u64)>,
    images: HashMap<ReplayHandle, ImageInfo>,
    destroyed_images: HashSet<ReplayHandle>,
    data: HashMap<Subresource, Vec<u8>>,
    layouts: HashMap<Subresource, vk::ImageLayout>,
    views: HashMap<ReplayHandle, View>,
    descriptor_sets: HashMap<ReplayHandle, BTreeMap<u32, (ReplayHandle, vk::DescriptorType)>>,
    pipelines: HashMap<ReplayHandle, PipelineKind>,
    render_passes: HashMap<ReplayHandle, RenderPass>,
    framebuffers: HashMap<ReplayHandle, Vec<ReplayHandle>>,
    layout_errors: Vec<String>,
    attachment_errors: Vec<String>,
    dispatches: usize,
    draws: usize,
}

impl Emulator {
    pub fn new(state: &State) -> Self {
        let mut emu = Emulator::default();
        for (handle, memory) in &state.memories {
            emu.memories.insert(*handle, vec![0; memory.size as usize]);
        }
        for (handle, image) in &state.images {
            emu.images.insert(*handle, image.info.clone());
            for (aspect, aspect_data) in &image.aspects {
                for (layer, l) in &aspect_data.layers {
                    for (level, lv) in &l.levels {
                        let key = (*handle, *aspect, *layer, *level);
                        emu.layouts.insert(key, lv.layout);
                        if !lv.data.is_empty() {
                            emu.data.insert(key, lv.data.clone());
                        }
                    }
                }
            }
        }
        emu
    }

    pub fn run(&mut self, commands: &[VulkanCommand]) {
        for command in commands {
            self.execute(command);
        }
    }

    /// Content of one subresource, zero filled if nothing was written.
    pub fn data(&mut self, image: ReplayHandle, aspect: ImageAspect, layer: u32, level: u32) -> Vec<u8> {
        self.subresource_mut(image, aspect, layer, level).clone()
    }

    pub fn layout(&self, image: ReplayHandle, aspect: ImageAspect, layer: u32, level: u32) -> vk::ImageLayout {
        self.layouts
            .get(&(image, aspect, layer, level))
            .copied()
            .unwrap_or(vk::ImageLayout::UNDEFINED)
    }

    pub fn memory(&self, memory: ReplayHandle) -> &[u8] {
        self.memories.get(&memory).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn layout_errors(&self) -> &[String] {
        &self.layout_errors
    }

    /// Draws whose staged input was not read as an input attachment of the
    /// bound subpass.
    pub fn attachment_errors(&self) -> &[String] {
        &self.attachment_errors
    }

    /// Images created by the commands and not destroyed again.
    pub fn leaked_images(&self, initial: &State) -> Vec<ReplayHandle> {
        self.images
            .keys()
            .filter(|h| !initial.images.contains_key(h) && !self.destroyed_images.contains(h))
            .copied()
            .collect()
    }

    pub fn is_destroyed(&self, image: ReplayHandle) -> bool {
        self.destroyed_images.contains(&image)
    }

    pub fn live_views(&self) -> usize {
        self.views.len()
    }

    pub fn dispatches(&self) -> usize {
        self.dispatches
    }

    pub fn draws(&self) -> usize {
        self.draws
    }

    fn texel_size(&self, image: ReplayHandle, aspect: ImageAspect) -> usize {
        let info = &self.images[&image];
        format::element_size(info.format, aspect).expect("element size") as usize
    }

    fn subresource_mut(&mut self, image: ReplayHandle, aspect: ImageAspect, layer: u32, level: u32) -> &mut Vec<u8> {
        let info = self.images[&image].clone();
        let e = info.level_extent(level);
        let size = (e.width * e.height * e.depth) as usize
            * format::element_size(info.format, aspect).expect("element size") as usize;
        let data = self.data.entry((image, aspect, layer, level)).or_default();
        if data.len() < size {
            data.resize(size, 0);
        }
        data
    }

    fn texel_index(&self, image: ReplayHandle, level: u32, x: u32, y: u32, z: u32) -> usize {
        let e = self.images[&image].level_extent(level);
        ((z * e.height + y) * e.width + x) as usize
    }

    fn read_texel(&mut self, view: View, aspect: ImageAspect, x: u32, y: u32, z: u32) -> Vec<u8> {
        let size = self.texel_size(view.image, aspect);
        let index = self.texel_index(view.image, view.level, x, y, z);
        let data = self.subresource_mut(view.image, aspect, view.layer, view.level);
        data[index * size..(index + 1) * size].to_vec()
    }

    fn write_texel(&mut self, view: View, aspect: ImageAspect, x: u32, y: u32, z: u32, texel: &[u8]) {
        let size = self.texel_size(view.image, aspect);
        let index = self.texel_index(view.image, view.level, x, y, z);
        let data = self.subresource_mut(view.image, aspect, view.layer, view.level);
        data[index * size..(index + 1) * size].copy_from_slice(&texel[..size]);
    }

    fn execute(&mut self, command: &VulkanCommand) {
        match command {
            VulkanCommand::AllocateMemory { memory, alloc_size, .. } => {
                self.memories.insert(*memory, vec![0; *alloc_size as usize]);
            }
            VulkanCommand::FreeMemory { memory, .. } => {
                self.memories.remove(memory);
            }
            VulkanCommand::BindBufferMemory {
                buffer,
                memory,
                memory_offset,
                ..
            } => {
                self.buffers.insert(*buffer, (*memory, *memory_offset));
            }
            VulkanCommand::DestroyBuffer { buffer, .. } => {
                self.buffers.remove(buffer);
            }
            VulkanCommand::FlushMappedMemoryRanges { ranges, data, .. } => {
                for (range, bytes) in ranges.iter().zip(data) {
                    let memory = self.memories.get_mut(&range.memory).expect("flushed memory exists");
                    let start = range.offset as usize;
                    memory[start..start + bytes.len()].copy_from_slice(bytes);
                }
            }
            VulkanCommand::CreateImage { image, create_info, .. } => {
                let info = cmd::image_info_from_create(create_info);
                let aspects = ImageAspect::from_flags(format::aspects_of(info.format));
                for aspect in aspects {
                    for layer in 0..info.array_layers {
                        for level in 0..info.mip_levels {
                            self.layouts.insert((*image, aspect, layer, level), info.initial_layout);
                        }
                    }
                }
                self.images.insert(*image, info);
            }
            VulkanCommand::DestroyImage { image, .. } => {
                self.destroyed_images.insert(*image);
            }
            VulkanCommand::CreateImageView {
                image_view,
                image,
                subresource_range,
                ..
            } => {
                self.views.insert(
                    *image_view,
                    View {
                        image: *image,
                        aspect_mask: vk::ImageAspectFlags::from_raw(subresource_range.aspect_mask),
                        layer: subresource_range.base_array_layer,
                        level: subresource_range.base_mip_level,
                    },
                );
            }
            VulkanCommand::DestroyImageView { image_view, .. } => {
                self.views.remove(image_view);
            }
            VulkanCommand::UpdateDescriptorSets { writes, .. } => {
                for write in writes {
                    if let Some(info) = write.image_infos.first() {
                        self.descriptor_sets.entry(write.dst_set).or_default().insert(
                            write.dst_binding,
                            (info.image_view, vk::DescriptorType::from_raw(write.descriptor_type)),
                        );
                    }
                }
            }
            VulkanCommand::CreateGraphicsPipelines {
                pipelines,
                create_infos,
                ..
            } => {
                for (pipeline, info) in pipelines.iter().zip(create_infos) {
                    let kind = match &info.depth_stencil_state {
                        Some(ds) if ds.stencil_test_enable => PipelineKind::Stencil,
                        Some(ds) if ds.depth_write_enable => PipelineKind::Depth,
                        _ => PipelineKind::Color,
                    };
                    self.pipelines.insert(*pipeline, kind);
                }
            }
            VulkanCommand::CreateComputePipelines { pipelines, .. } => {
                for pipeline in pipelines {
                    self.pipelines.insert(*pipeline, PipelineKind::Compute);
                }
            }
            VulkanCommand::CreateRenderPass {
                render_pass,
                attachments,
                subpasses,
                ..
            } => {
                let subpass = &subpasses[0];
                let output = subpass
                    .color_attachments
                    .first()
                    .or(subpass.depth_stencil_attachment.as_ref())
                    .expect("subpass writes an attachment");
                self.render_passes.insert(
                    *render_pass,
                    RenderPass {
                        output: output.attachment as usize,
                        inputs: subpass.input_attachments.iter().map(|a| a.attachment as usize).collect(),
                        final_layouts: attachments
                            .iter()
                            .map(|a| vk::ImageLayout::from_raw(a.final_layout))
                            .collect(),
                    },
                );
            }
            VulkanCommand::CreateFramebuffer {
                framebuffer,
                attachments,
                ..
            } => {
                self.framebuffers.insert(*framebuffer, attachments.clone());
            }
            VulkanCommand::SubmitRecordedCommands { commands, .. } => {
                let mut bound = Bound::default();
                for c in commands {
                    self.execute_recorded(c, &mut bound);
                }
            }
            _ => {}
        }
    }

    fn execute_recorded(&mut self, command: &RecordedCommand, bound: &mut Bound) {
        match command {
            RecordedCommand::PipelineBarrier {
                image_memory_barriers,
                ..
            } => {
                for b in image_memory_barriers {
                    self.transition(b);
                }
            }
            RecordedCommand::CopyBufferToImage {
                src_buffer,
                dst_image,
                regions,
                ..
            } => {
                let (memory, base) = self.buffers[src_buffer];
                let source = self.memories[&memory].clone();
                for region in regions {
                    let aspect = ImageAspect::from_flags(vk::ImageAspectFlags::from_raw(
                        region.image_subresource.aspect_mask,
                    ))[0];
                    let view = View {
                        image: *dst_image,
                        aspect_mask: aspect.flags(),
                        layer: region.image_subresource.base_array_layer,
                        level: region.image_subresource.mip_level,
                    };
                    let size = self.texel_size(*dst_image, aspect);
                    let mut cursor = (base + region.buffer_offset) as usize;
                    let [w, h, d] = region.image_extent;
                    let [ox, oy, oz] = region.image_offset;
                    for z in 0..d {
                        for y in 0..h {
                            for x in 0..w {
                                let texel = source[cursor..cursor + size].to_vec();
                                self.write_texel(view, aspect, ox as u32 + x, oy as u32 + y, oz as u32 + z, &texel);
                                cursor += size;
                            }
                        }
                    }
                }
            }
            RecordedCommand::BindPipeline { pipeline, .. } => bound.pipeline = Some(*pipeline),
            RecordedCommand::BindDescriptorSets { descriptor_sets, .. } => {
                bound.descriptor_set = descriptor_sets.first().copied();
            }
            RecordedCommand::PushConstants { values, .. } => bound.push_constants = values.clone(),
            RecordedCommand::BeginRenderPass {
                render_pass,
                framebuffer,
                ..
            } => {
                bound.render_pass = Some(*render_pass);
                bound.framebuffer = Some(*framebuffer);
            }
            RecordedCommand::EndRenderPass => {
                let (Some(render_pass), Some(framebuffer)) = (bound.render_pass, bound.framebuffer) else {
                    return;
                };
                let pass = &self.render_passes[&render_pass];
                for (attachment, final_layout) in self.framebuffers[&framebuffer].iter().zip(&pass.final_layouts) {
                    let view = self.views[attachment];
                    for aspect in ImageAspect::from_flags(view.aspect_mask) {
                        self.layouts.insert((view.image, aspect, view.layer, view.level), *final_layout);
                    }
                }
            }
            RecordedCommand::SetStencilWriteMask { write_mask, .. } => bound.stencil_write_mask = *write_mask,
            RecordedCommand::SetStencilReference { reference, .. } => bound.stencil_reference = *reference,
            RecordedCommand::ClearAttachments { attachments, .. } => {
                let view = self.output_view(bound);
                for attachment in attachments {
                    let mask = vk::ImageAspectFlags::from_raw(attachment.aspect_mask);
                    for aspect in ImageAspect::from_flags(mask) {
                        let data = self.subresource_mut(view.image, aspect, view.layer, view.level);
                        data.iter_mut().for_each(|b| *b = 0);
                    }
                }
            }
            RecordedCommand::Draw { .. } => self.draw(bound),
            RecordedCommand::Dispatch {
                group_count_x,
                group_count_y,
                group_count_z,
            } => self.dispatch(bound, [*group_count_x, *group_count_y, *group_count_z]),
            _ => {}
        }
    }

    fn transition(&mut self, b: &vkprime_protocol::vulkan_commands::SerializedImageMemoryBarrier) {
        let Some(info) = self.images.get(&b.image).cloned() else {
            self.layout_errors.push(format!("barrier on unknown image {}", b.image));
            return;
        };
        let r = &b.subresource_range;
        let mask = vk::ImageAspectFlags::from_raw(r.aspect_mask) & format::aspects_of(info.format);
        let layers = if r.layer_count == vk::REMAINING_ARRAY_LAYERS {
            info.array_layers - r.base_array_layer
        } else {
            r.layer_count
        };
        let levels = if r.level_count == vk::REMAINING_MIP_LEVELS {
            info.mip_levels - r.base_mip_level
        } else {
            r.level_count
        };
        let old = vk::ImageLayout::from_raw(b.old_layout);
        let new = vk::ImageLayout::from_raw(b.new_layout);
        let ownership_transfer = b.src_queue_family_index != b.dst_queue_family_index;
        for aspect in ImageAspect::from_flags(mask) {
            for layer in r.base_array_layer..r.base_array_layer + layers {
                for level in r.base_mip_level..r.base_mip_level + levels {
                    let key = (b.image, aspect, layer, level);
                    let current = self.layouts.get(&key).copied().unwrap_or(vk::ImageLayout::UNDEFINED);
                    let acquired = ownership_transfer && current == new;
                    if old != vk::ImageLayout::UNDEFINED && old != current && !acquired {
                        self.layout_errors.push(format!(
                            "{} {:?} layer {} level {}: barrier from {:?} but layout is {:?}",
                            b.image, aspect, layer, level, old, current
                        ));
                    }
                    self.layouts.insert(key, new);
                }
            }
        }
    }

    fn output_view(&self, bound: &Bound) -> View {
        let pass = &self.render_passes[&bound.render_pass.expect("render pass begun")];
        let attachments = &self.framebuffers[&bound.framebuffer.expect("render pass begun")];
        self.views[&attachments[pass.output]]
    }

    /// Staging view bound at binding 0, checked to be the subpass's first
    /// input attachment.
    fn input_view(&mut self, bound: &Bound) -> View {
        let (view, ty) = self.descriptor_sets[&bound.descriptor_set.expect("descriptor set bound")][&0];
        let pass = &self.render_passes[&bound.render_pass.expect("render pass begun")];
        let attachments = &self.framebuffers[&bound.framebuffer.expect("render pass begun")];
        if ty != vk::DescriptorType::INPUT_ATTACHMENT {
            self.attachment_errors.push(format!("binding 0 holds a {:?} descriptor", ty));
        }
        match pass.inputs.first() {
            Some(index) if attachments[*index] == view => {}
            other => self
                .attachment_errors
                .push(format!("view {} is not input attachment 0 of the subpass ({:?})", view, other)),
        }
        let input = self.views[&view];
        let aspect = ImageAspect::from_flags(input.aspect_mask)[0];
        let layout = self.layout(input.image, aspect, input.layer, input.level);
        if layout != vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL {
            self.attachment_errors
                .push(format!("input attachment {} read in {:?}", input.image, layout));
        }
        input
    }

    fn draw(&mut self, bound: &Bound) {
        self.draws += 1;
        let kind = self.pipelines[&bound.pipeline.expect("pipeline bound")];
        let target = self.output_view(bound);
        let input = self.input_view(bound);
        let target_format = self.images[&target.image].format;
        let extent = self.images[&target.image].level_extent(target.level);
        let input_aspect = ImageAspect::from_flags(input.aspect_mask)[0];
        let staging = self.data(input.image, input_aspect, input.layer, input.level);
        let texels = (extent.width * extent.height) as usize;

        match kind {
            PipelineKind::Color | PipelineKind::Depth => {
                let aspect = if kind == PipelineKind::Color {
                    ImageAspect::Color
                } else {
                    ImageAspect::Depth
                };
                let packed = format::pack(&staging, texels, target_format, aspect).expect("pack drawn texels");
                *self.subresource_mut(target.image, aspect, target.layer, target.level) = packed;
            }
            PipelineKind::Stencil => {
                let bit = u32::from_le_bytes(bound.push_constants[..4].try_into().expect("bit index"));
                let mask = bound.stencil_write_mask;
                let reference = bound.stencil_reference;
                let stencil = self.subresource_mut(target.image, ImageAspect::Stencil, target.layer, target.level);
                for (i, s) in stencil.iter_mut().enumerate().take(texels) {
                    let v = u32::from_le_bytes(staging[i * 4..i * 4 + 4].try_into().expect("texel"));
                    if (v >> bit) & 1 == 0 {
                        continue;
                    }
                    *s = ((*s as u32 & !mask) | (reference & mask)) as u8;
                }
            }
            PipelineKind::Compute => panic!("draw with a compute pipeline bound"),
        }
    }

    fn dispatch(&mut self, bound: &Bound, groups: [u32; 3]) {
        self.dispatches += 1;
        assert_eq!(
            self.pipelines.get(&bound.pipeline.expect("pipeline bound")),
            Some(&PipelineKind::Compute)
        );
        let set = self.descriptor_sets[&bound.descriptor_set.expect("descriptor set bound")].clone();
        let output = self.views[&set[&0].0];
        let input = self.views[&set[&1].0];
        let params: Vec<u32> = bound
            .push_constants
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes(c.try_into().expect("push constant word")))
            .collect();
        let out_aspect = ImageAspect::from_flags(output.aspect_mask)[0];
        let in_aspect = ImageAspect::from_flags(input.aspect_mask)[0];
        let out_format = self.images[&output.image].format;
        let in_format = self.images[&input.image].format;

        for z in 0..groups[2] {
            for y in 0..groups[1] {
                for x in 0..groups[0] {
                    let (cx, cy, cz) = (params[0] + x, params[1] + y, params[2] + z);
                    let texel = self.read_texel(input, in_aspect, cx, cy, cz);
                    let stored = if in_format == out_format {
                        texel
                    } else {
                        format::pack(&texel, 1, out_format, out_aspect).expect("pack stored texel")
                    };
                    self.write_texel(output, out_aspect, cx, cy, cz, &stored);
                }
            }
        }
    }
}

/// Outcome of priming one image end to end.
pub struct Primed {
    pub strategy: PrimingStrategy,
    pub state: State,
    pub commands: Vec<VulkanCommand>,
    pub emulator: Emulator,
}

/// Stage, prime and free `image` over its full range, leaving it in
/// `final_layout`, then replay the emitted commands.
pub fn prime(scene: &Scene, image: ReplayHandle, final_layout: vk::ImageLayout, from_host_data: bool) -> Primed {
    vkprime_common::init_test_logging();
    let sink = RecordingSink::new();
    let mut sb = scene.builder(sink.clone());
    let primer = ImagePrimer::new();

    let range = sb.new_state().image(image).expect("image in new state").full_range();
    let mut data = primer
        .new_primeable_image_data(&mut sb, image, &[range], from_host_data)
        .expect("building primeable image data");
    let strategy = data.strategy();
    let src = ImageLayouts::snapshot(sb.new_state().image(image).expect("image in new state"));
    data.prime(&mut sb, &primer, &src, &FixedLayout(final_layout))
        .expect("priming image");
    data.free(&mut sb).expect("freeing staged data");
    primer.free(&mut sb).expect("freeing primer");
    let state = sb.finish().expect("finishing state builder");

    let commands = sink.commands();
    let mut emulator = scene.emulator();
    emulator.run(&commands);
    Primed {
        strategy,
        state,
        commands,
        emulator,
    }
}

/// Number of recorded commands matching `pred` across all submissions.
pub fn count_recorded(commands: &[VulkanCommand], pred: impl Fn(&RecordedCommand) -> bool) -> usize {
    commands
        .iter()
        .filter_map(|c| match c {
            VulkanCommand::SubmitRecordedCommands { commands, .. } => Some(commands),
            _ => None,
        })
        .flatten()
        .filter(|c| pred(c))
        .count()
}
