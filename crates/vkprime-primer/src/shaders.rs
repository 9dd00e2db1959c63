//! WGSL generation for the priming pipelines, compiled to SPIR-V with naga.
//!
//! Every staging texel holds canonical values (see [`crate::format`]). The
//! fragment and compute shaders read those values and turn them back into
//! what the destination format expects, so the fixed-function output
//! conversion re-creates the captured bits.
//!
//! WGSL has no subpass inputs. Render fragment shaders are written against a
//! `texture_2d<u32>` read at the fragment's own texel, and the SPIR-V naga
//! emits is then rewritten so those textures become input attachments.

use std::fmt::Write as _;

use ash::vk;

use crate::error::{PrimeError, Result};
use crate::format::{self, Component, NumericType};
use crate::state::ImageAspect;

/// Entry point name of every generated shader.
pub const ENTRY_POINT: &str = "main";

/// Bytes of the store shader's push constants: offset x, y, z and the
/// staging image index.
pub const STORE_PUSH_CONSTANT_SIZE: u32 = 16;
/// Bytes of the stencil fragment shader's push constant: the bit index.
pub const STENCIL_PUSH_CONSTANT_SIZE: u32 = 4;

/// Compile WGSL to SPIR-V, returned as little-endian bytes.
pub fn compile_wgsl(source: &str, stage: naga::ShaderStage, entry_point: &str) -> Result<Vec<u8>> {
    compile_wgsl_words(source, stage, entry_point).map(|words| spirv_bytes(&words))
}

fn spirv_bytes(words: &[u32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(words.len() * 4);
    for word in words {
        bytes.extend_from_slice(&word.to_le_bytes());
    }
    bytes
}

fn compile_wgsl_words(source: &str, stage: naga::ShaderStage, entry_point: &str) -> Result<Vec<u32>> {
    let module = naga::front::wgsl::parse_str(source)
        .map_err(|e| PrimeError::ShaderGeneration(e.emit_to_string(source)))?;

    let info = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    )
    .validate(&module)
    .map_err(|e| PrimeError::ShaderGeneration(format!("validation failed: {}", e.into_inner())))?;

    let options = naga::back::spv::Options {
        lang_version: (1, 0),
        ..Default::default()
    };
    let pipeline_options = naga::back::spv::PipelineOptions {
        shader_stage: stage,
        entry_point: entry_point.to_string(),
    };

    let mut writer = naga::back::spv::Writer::new(&options)
        .map_err(|e| PrimeError::ShaderGeneration(format!("creating SPIR-V writer: {}", e)))?;
    let mut words = Vec::new();
    writer
        .write(&module, &info, Some(&pipeline_options), &None, &mut words)
        .map_err(|e| PrimeError::ShaderGeneration(format!("generating SPIR-V: {}", e)))?;
    Ok(words)
}

mod spv {
    pub const HEADER_WORDS: usize = 5;

    pub const OP_CAPABILITY: u32 = 17;
    pub const OP_TYPE_IMAGE: u32 = 25;
    pub const OP_TYPE_POINTER: u32 = 32;
    pub const OP_VARIABLE: u32 = 59;
    pub const OP_LOAD: u32 = 61;
    pub const OP_DECORATE: u32 = 71;
    pub const OP_IMAGE_FETCH: u32 = 95;
    pub const OP_IMAGE_READ: u32 = 98;

    pub const CAPABILITY_INPUT_ATTACHMENT: u32 = 40;
    pub const DECORATION_BINDING: u32 = 33;
    pub const DECORATION_DESCRIPTOR_SET: u32 = 34;
    pub const DECORATION_INPUT_ATTACHMENT_INDEX: u32 = 43;
    pub const DIM_SUBPASS_DATA: u32 = 6;
    /// `Sampled` operand of an image only read as a subpass input
    pub const SAMPLED_READ_ONLY: u32 = 2;
    pub const FORMAT_UNKNOWN: u32 = 0;

    pub fn word0(word_count: usize, opcode: u32) -> u32 {
        ((word_count as u32) << 16) | opcode
    }
}

/// Split a SPIR-V module into its instructions, header excluded.
fn instructions(words: &[u32]) -> Result<Vec<&[u32]>> {
    if words.len() < spv::HEADER_WORDS {
        return Err(PrimeError::ShaderGeneration("SPIR-V module without header".to_string()));
    }
    let mut out = Vec::new();
    let mut at = spv::HEADER_WORDS;
    while at < words.len() {
        let count = (words[at] >> 16) as usize;
        if count == 0 || at + count > words.len() {
            return Err(PrimeError::ShaderGeneration(format!(
                "malformed SPIR-V instruction at word {}",
                at
            )));
        }
        out.push(&words[at..at + count]);
        at += count;
    }
    Ok(out)
}

/// Turn the `texture_2d` bindings of descriptor set 0 into subpass inputs.
///
/// Binding `n` becomes input attachment `n` of the subpass, its image type
/// becomes `SubpassData` and every texel fetch from it a subpass read. Fetch
/// coordinates must already be `(0, 0)`.
pub fn bindings_as_subpass_inputs(words: &[u32]) -> Result<Vec<u32>> {
    use std::collections::{HashMap, HashSet};

    let insts = instructions(words)?;

    let mut set_zero = HashSet::new();
    let mut bindings = HashMap::new();
    for inst in &insts {
        if inst[0] & 0xffff == spv::OP_DECORATE && inst.len() == 4 {
            match inst[2] {
                spv::DECORATION_DESCRIPTOR_SET if inst[3] == 0 => {
                    set_zero.insert(inst[1]);
                }
                spv::DECORATION_BINDING => {
                    bindings.insert(inst[1], inst[3]);
                }
                _ => {}
            }
        }
    }
    bindings.retain(|var, _| set_zero.contains(var));

    let mut pointees = HashMap::new();
    let mut image_types = HashSet::new();
    let mut images = HashSet::new();
    for inst in &insts {
        match inst[0] & 0xffff {
            spv::OP_TYPE_POINTER if inst.len() == 4 => {
                pointees.insert(inst[1], inst[3]);
            }
            spv::OP_VARIABLE if inst.len() >= 4 && bindings.contains_key(&inst[2]) => {
                if let Some(pointee) = pointees.get(&inst[1]) {
                    image_types.insert(*pointee);
                }
            }
            spv::OP_LOAD if inst.len() >= 4 && image_types.contains(&inst[1]) => {
                images.insert(inst[2]);
            }
            _ => {}
        }
    }

    let mut out = Vec::with_capacity(words.len() + 2 + 4 * bindings.len());
    out.extend_from_slice(&words[..spv::HEADER_WORDS]);
    out.push(spv::word0(2, spv::OP_CAPABILITY));
    out.push(spv::CAPABILITY_INPUT_ATTACHMENT);
    let mut retyped = 0;
    let mut reads = 0;
    for inst in insts {
        match inst[0] & 0xffff {
            spv::OP_DECORATE if inst.len() == 4 && inst[2] == spv::DECORATION_BINDING => {
                out.extend_from_slice(inst);
                if let Some(binding) = bindings.get(&inst[1]) {
                    out.push(spv::word0(4, spv::OP_DECORATE));
                    out.push(inst[1]);
                    out.push(spv::DECORATION_INPUT_ATTACHMENT_INDEX);
                    out.push(*binding);
                }
            }
            spv::OP_TYPE_IMAGE if inst.len() >= 9 && image_types.contains(&inst[1]) => {
                let mut image = inst.to_vec();
                image[3] = spv::DIM_SUBPASS_DATA;
                image[7] = spv::SAMPLED_READ_ONLY;
                image[8] = spv::FORMAT_UNKNOWN;
                out.extend_from_slice(&image);
                retyped += 1;
            }
            spv::OP_IMAGE_FETCH if inst.len() >= 5 && images.contains(&inst[3]) => {
                // Result type, result, image and coordinate; the level operand
                // has no meaning for a subpass read.
                out.push(spv::word0(5, spv::OP_IMAGE_READ));
                out.extend_from_slice(&inst[1..5]);
                reads += 1;
            }
            _ => out.extend_from_slice(inst),
        }
    }
    if retyped == 0 || reads == 0 {
        return Err(PrimeError::ShaderGeneration(
            "fragment shader reads no input attachment".to_string(),
        ));
    }
    Ok(out)
}

/// Full-screen quad drawn as two triangles, six vertices, no vertex buffers.
pub fn quad_vertex_wgsl() -> String {
    r#"
@vertex
fn main(@builtin(vertex_index) vertex_index: u32) -> @builtin(position) vec4<f32> {
    var positions = array<vec2<f32>, 6>(
        vec2<f32>(-1.0, -1.0),
        vec2<f32>(1.0, -1.0),
        vec2<f32>(-1.0, 1.0),
        vec2<f32>(-1.0, 1.0),
        vec2<f32>(1.0, -1.0),
        vec2<f32>(1.0, 1.0),
    );
    return vec4<f32>(positions[vertex_index], 0.0, 1.0);
}
"#
    .to_string()
}

pub fn quad_vertex_spirv() -> Result<Vec<u8>> {
    compile_wgsl(&quad_vertex_wgsl(), naga::ShaderStage::Vertex, ENTRY_POINT)
}

const SRGB_TO_LINEAR: &str = r#"
fn srgb_to_linear(c: f32) -> f32 {
    if c <= 0.04045 {
        return c / 12.92;
    }
    return pow((c + 0.055) / 1.055, 2.4);
}
"#;

/// WGSL scalar type a texel of `numeric` is written as.
fn output_scalar(numeric: NumericType) -> &'static str {
    match numeric {
        NumericType::Uint => "u32",
        NumericType::Sint => "i32",
        _ => "f32",
    }
}

fn max_value(bits: u32) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

/// Expression turning canonical value `v` of one slot back into what the
/// output conversion of `component` expects.
fn decode_component(v: &str, component: Component, alpha: bool) -> String {
    match component.numeric {
        NumericType::Unorm => format!("f32({}) / {}.0", v, max_value(component.bits)),
        NumericType::Srgb if alpha => format!("f32({}) / {}.0", v, max_value(component.bits)),
        NumericType::Srgb => format!("srgb_to_linear(f32({}) / {}.0)", v, max_value(component.bits)),
        NumericType::Snorm => format!(
            "max(f32(bitcast<i32>({})) / {}.0, -1.0)",
            v,
            max_value(component.bits - 1)
        ),
        NumericType::Sfloat | NumericType::Ufloat => format!("bitcast<f32>({})", v),
        NumericType::Uscaled => format!("f32({})", v),
        NumericType::Sscaled => format!("f32(bitcast<i32>({}))", v),
        NumericType::Uint => v.to_string(),
        NumericType::Sint => format!("bitcast<i32>({})", v),
    }
}

/// `vec4<T>(...)` of a decoded canonical color texel `v` for `format`.
fn decode_color(v: &str, format: vk::Format) -> Result<(String, &'static str)> {
    let info = format::info(format).ok_or_else(|| {
        PrimeError::ShaderGeneration(format!("no color decoding for format {:?}", format))
    })?;
    let numeric = info.numeric().ok_or_else(|| {
        PrimeError::ShaderGeneration(format!("format {:?} has no color channels", format))
    })?;
    let scalar = output_scalar(numeric);
    let channels = [
        (format::Channel::R, "x"),
        (format::Channel::G, "y"),
        (format::Channel::B, "z"),
        (format::Channel::A, "w"),
    ];
    let mut parts = Vec::with_capacity(4);
    for (channel, swizzle) in channels {
        let alpha = channel == format::Channel::A;
        let part = match info.component(channel) {
            Some(c) => decode_component(&format!("{}.{}", v, swizzle), c, alpha),
            None if alpha => format!("{}(1)", scalar),
            None => format!("{}(0)", scalar),
        };
        parts.push(part);
    }
    Ok((format!("vec4<{}>({})", scalar, parts.join(", ")), scalar))
}

fn depth_decode(v: &str, format: vk::Format) -> Result<String> {
    match format::aspect_format(format, ImageAspect::Depth)? {
        vk::Format::D16_UNORM => Ok(format!("f32({}) / 65535.0", v)),
        vk::Format::X8_D24_UNORM_PACK32 => Ok(format!("f32({}) / 16777215.0", v)),
        vk::Format::D32_SFLOAT => Ok(format!("bitcast<f32>({})", v)),
        other => Err(PrimeError::ShaderGeneration(format!(
            "no depth decoding for format {:?}",
            other
        ))),
    }
}

/// Fragment shader writing one subresource of `aspect` of a `target_format`
/// image from a canonical staging image. The staging image is declared as a
/// texture here and becomes input attachment 0 in [`render_fragment_spirv`].
pub fn render_fragment_wgsl(target_format: vk::Format, aspect: ImageAspect) -> Result<String> {
    let inputs = format::staging_image_count(target_format, aspect)?;
    if inputs != 1 {
        return Err(PrimeError::ShaderGeneration(format!(
            "{:?} needs {} staging images per texel",
            target_format, inputs
        )));
    }
    let mut src = String::new();
    let _ = writeln!(src, "@group(0) @binding(0) var input0: texture_2d<u32>;");
    match aspect {
        ImageAspect::Color => {
            let (value, scalar) = decode_color("v", target_format)?;
            if value.contains("srgb_to_linear") {
                src.push_str(SRGB_TO_LINEAR);
            }
            let _ = write!(
                src,
                r#"
@fragment
fn main() -> @location(0) vec4<{scalar}> {{
    let v = textureLoad(input0, vec2<i32>(0, 0), 0);
    return {value};
}}
"#
            );
        }
        ImageAspect::Depth => {
            let value = depth_decode("v.x", target_format)?;
            let _ = write!(
                src,
                r#"
@fragment
fn main() -> @builtin(frag_depth) f32 {{
    let v = textureLoad(input0, vec2<i32>(0, 0), 0);
    return {value};
}}
"#
            );
        }
        ImageAspect::Stencil => {
            src.push_str(
                r#"
struct StencilBit {
    index: u32,
}

var<immediate> stencil_bit: StencilBit;

@fragment
fn main() {
    let v = textureLoad(input0, vec2<i32>(0, 0), 0);
    if ((v.x >> stencil_bit.index) & 1u) == 0u {
        discard;
    }
}
"#,
            );
        }
    }
    Ok(src)
}

pub fn render_fragment_spirv(target_format: vk::Format, aspect: ImageAspect) -> Result<Vec<u8>> {
    let src = render_fragment_wgsl(target_format, aspect)?;
    let words = compile_wgsl_words(&src, naga::ShaderStage::Fragment, ENTRY_POINT)?;
    bindings_as_subpass_inputs(&words).map(|words| spirv_bytes(&words))
}

/// WGSL storage texel format name for `format`, if storage images of it can
/// be expressed.
pub fn storage_texel_format(format: vk::Format) -> Option<&'static str> {
    Some(match format {
        vk::Format::R8_UNORM => "r8unorm",
        vk::Format::R8_SNORM => "r8snorm",
        vk::Format::R8_UINT => "r8uint",
        vk::Format::R8_SINT => "r8sint",
        vk::Format::R8G8_UNORM => "rg8unorm",
        vk::Format::R8G8_SNORM => "rg8snorm",
        vk::Format::R8G8_UINT => "rg8uint",
        vk::Format::R8G8_SINT => "rg8sint",
        vk::Format::R8G8B8A8_UNORM => "rgba8unorm",
        vk::Format::R8G8B8A8_SNORM => "rgba8snorm",
        vk::Format::R8G8B8A8_UINT => "rgba8uint",
        vk::Format::R8G8B8A8_SINT => "rgba8sint",
        vk::Format::B8G8R8A8_UNORM => "bgra8unorm",
        vk::Format::R16_UNORM => "r16unorm",
        vk::Format::R16_SNORM => "r16snorm",
        vk::Format::R16_UINT => "r16uint",
        vk::Format::R16_SINT => "r16sint",
        vk::Format::R16_SFLOAT => "r16float",
        vk::Format::R16G16_UNORM => "rg16unorm",
        vk::Format::R16G16_SNORM => "rg16snorm",
        vk::Format::R16G16_UINT => "rg16uint",
        vk::Format::R16G16_SINT => "rg16sint",
        vk::Format::R16G16_SFLOAT => "rg16float",
        vk::Format::R16G16B16A16_UNORM => "rgba16unorm",
        vk::Format::R16G16B16A16_SNORM => "rgba16snorm",
        vk::Format::R16G16B16A16_UINT => "rgba16uint",
        vk::Format::R16G16B16A16_SINT => "rgba16sint",
        vk::Format::R16G16B16A16_SFLOAT => "rgba16float",
        vk::Format::R32_UINT => "r32uint",
        vk::Format::R32_SINT => "r32sint",
        vk::Format::R32_SFLOAT => "r32float",
        vk::Format::R32G32_UINT => "rg32uint",
        vk::Format::R32G32_SINT => "rg32sint",
        vk::Format::R32G32_SFLOAT => "rg32float",
        vk::Format::R32G32B32A32_UINT => "rgba32uint",
        vk::Format::R32G32B32A32_SINT => "rgba32sint",
        vk::Format::R32G32B32A32_SFLOAT => "rgba32float",
        vk::Format::A2B10G10R10_UNORM_PACK32 => "rgb10a2unorm",
        vk::Format::A2B10G10R10_UINT_PACK32 => "rgb10a2uint",
        _ => return None,
    })
}

/// Texture dimension suffix, coordinate expression and the WGSL type of the
/// coordinate for an image type.
fn store_coordinates(image_type: vk::ImageType) -> Result<(&'static str, &'static str)> {
    match image_type {
        vk::ImageType::TYPE_1D => Ok(("1d", "i32(gid.x + params.offset_x)")),
        vk::ImageType::TYPE_2D => Ok((
            "2d",
            "vec2<i32>(gid.xy + vec2<u32>(params.offset_x, params.offset_y))",
        )),
        vk::ImageType::TYPE_3D => Ok((
            "3d",
            "vec3<i32>(gid + vec3<u32>(params.offset_x, params.offset_y, params.offset_z))",
        )),
        other => Err(PrimeError::ShaderGeneration(format!(
            "unsupported image type {:?}",
            other
        ))),
    }
}

/// Compute shader copying one texel per invocation from the input storage
/// image (binding 1) into the output storage image (binding 0).
///
/// Same input and output formats copy texels verbatim. Otherwise the input
/// must be the canonical staging format of `output_aspect` and its values are
/// decoded for the output format.
pub fn store_compute_wgsl(
    output_format: vk::Format,
    output_aspect: ImageAspect,
    input_format: vk::Format,
    input_aspect: ImageAspect,
    image_type: vk::ImageType,
) -> Result<String> {
    let output_texel = storage_texel_format(output_format).ok_or_else(|| {
        PrimeError::ShaderGeneration(format!(
            "{:?} of {:?} cannot be written as a storage image",
            output_aspect, output_format
        ))
    })?;
    let (dim, coord) = store_coordinates(image_type)?;

    let (input_texel, value, needs_srgb) = if input_format == output_format {
        (output_texel, "v".to_string(), false)
    } else {
        let staging = format::staging_format(input_aspect);
        if input_format != staging || output_aspect != ImageAspect::Color {
            return Err(PrimeError::ShaderGeneration(format!(
                "no store from {:?} {:?} into {:?} {:?}",
                input_aspect, input_format, output_aspect, output_format
            )));
        }
        let (value, _) = decode_color("v", output_format)?;
        let needs_srgb = value.contains("srgb_to_linear");
        ("rgba32uint", value, needs_srgb)
    };

    let mut src = String::from(
        r#"
struct StoreParams {
    offset_x: u32,
    offset_y: u32,
    offset_z: u32,
    index: u32,
}

var<immediate> params: StoreParams;
"#,
    );
    if needs_srgb {
        src.push_str(SRGB_TO_LINEAR);
    }
    let _ = write!(
        src,
        r#"
@group(0) @binding(0) var output_image: texture_storage_{dim}<{output_texel}, write>;
@group(0) @binding(1) var input_image: texture_storage_{dim}<{input_texel}, read>;

@compute @workgroup_size(1, 1, 1)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {{
    let coord = {coord};
    let v = textureLoad(input_image, coord);
    textureStore(output_image, coord, {value});
}}
"#
    );
    Ok(src)
}

pub fn store_compute_spirv(
    output_format: vk::Format,
    output_aspect: ImageAspect,
    input_format: vk::Format,
    input_aspect: ImageAspect,
    image_type: vk::ImageType,
) -> Result<Vec<u8>> {
    let src = store_compute_wgsl(output_format, output_aspect, input_format, input_aspect, image_type)?;
    compile_wgsl(&src, naga::ShaderStage::Compute, ENTRY_POINT)
}
