//! Texel format table and the conversions between captured texel data and
//! the canonical staging encodings.
//!
//! Color data is staged as `R32G32B32A32_UINT`, depth and stencil data as
//! `R32_UINT`. Every channel is widened to 32 bits without changing its
//! meaning: normalized and integer channels keep their integer value (signed
//! ones sign-extended), float channels become `f32` bit patterns. The priming
//! shaders turn the canonical value back into whatever the destination
//! format expects.

use ash::vk;

use crate::error::{PrimeError, Result};
use crate::state::{ImageAspect, ImageInfo};

/// Canonical staging format for color aspects.
pub const STAGING_COLOR_FORMAT: vk::Format = vk::Format::R32G32B32A32_UINT;
/// Canonical staging format for depth and stencil aspects.
pub const STAGING_DEPTH_STENCIL_FORMAT: vk::Format = vk::Format::R32_UINT;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NumericType {
    /// Signed floating-point number.
    Sfloat,
    /// Unsigned floating-point number.
    Ufloat,
    Sint,
    Uint,
    /// Signed integer normalized to \[-1,1].
    Snorm,
    /// Unsigned integer normalized to \[0,1].
    Unorm,
    Sscaled,
    Uscaled,
    /// `Unorm` in the sRGB color space.
    Srgb,
}

impl NumericType {
    pub fn is_signed_integer(self) -> bool {
        matches!(self, NumericType::Sint | NumericType::Snorm | NumericType::Sscaled)
    }

    pub fn is_float(self) -> bool {
        matches!(self, NumericType::Sfloat | NumericType::Ufloat)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Channel {
    R,
    G,
    B,
    A,
    Depth,
    Stencil,
    /// Shared exponent of `E5B9G9R9`
    Exponent,
    Padding,
}

impl Channel {
    /// Slot of the channel in a canonical texel.
    fn slot(self) -> Option<usize> {
        match self {
            Channel::R | Channel::Depth | Channel::Stencil => Some(0),
            Channel::G => Some(1),
            Channel::B => Some(2),
            Channel::A => Some(3),
            Channel::Exponent | Channel::Padding => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Component {
    pub channel: Channel,
    pub bits: u32,
    pub numeric: NumericType,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Packing {
    /// Components follow each other in memory, each little-endian.
    Bytes,
    /// One little-endian word of the given width; components listed from the
    /// most significant bits down.
    Word(u32),
}

#[derive(Clone, Copy, Debug)]
pub struct FormatInfo {
    pub format: vk::Format,
    pub components: &'static [Component],
    pub packing: Packing,
    /// Bytes per texel
    pub element_size: u32,
}

impl FormatInfo {
    pub fn component(&self, channel: Channel) -> Option<Component> {
        self.components.iter().copied().find(|c| c.channel == channel)
    }

    /// Numeric type of the format's color or depth channels.
    pub fn numeric(&self) -> Option<NumericType> {
        self.components
            .iter()
            .find(|c| c.channel.slot().is_some())
            .map(|c| c.numeric)
    }

    /// Bit width of each canonical slot, zero for absent channels.
    pub fn slot_bits(&self) -> [u32; 4] {
        let mut bits = [0u32; 4];
        for c in self.components {
            if let Some(slot) = c.channel.slot() {
                bits[slot] = c.bits;
            }
        }
        bits
    }
}

macro_rules! format_table {
    ($( $fmt:ident: $packing:expr, $size:expr, [$( $ch:ident $bits:literal $num:ident ),*]; )*) => {
        static FORMATS: &[FormatInfo] = &[$(
            FormatInfo {
                format: vk::Format::$fmt,
                packing: $packing,
                element_size: $size,
                components: &[$( Component { channel: Channel::$ch, bits: $bits, numeric: NumericType::$num } ),*],
            },
        )*];
    };
}

use Packing::{Bytes, Word};

format_table! {
    R4G4_UNORM_PACK8: Word(8), 1, [R 4 Unorm, G 4 Unorm];
    R4G4B4A4_UNORM_PACK16: Word(16), 2, [R 4 Unorm, G 4 Unorm, B 4 Unorm, A 4 Unorm];
    B4G4R4A4_UNORM_PACK16: Word(16), 2, [B 4 Unorm, G 4 Unorm, R 4 Unorm, A 4 Unorm];
    R5G6B5_UNORM_PACK16: Word(16), 2, [R 5 Unorm, G 6 Unorm, B 5 Unorm];
    B5G6R5_UNORM_PACK16: Word(16), 2, [B 5 Unorm, G 6 Unorm, R 5 Unorm];
    R5G5B5A1_UNORM_PACK16: Word(16), 2, [R 5 Unorm, G 5 Unorm, B 5 Unorm, A 1 Unorm];
    B5G5R5A1_UNORM_PACK16: Word(16), 2, [B 5 Unorm, G 5 Unorm, R 5 Unorm, A 1 Unorm];
    A1R5G5B5_UNORM_PACK16: Word(16), 2, [A 1 Unorm, R 5 Unorm, G 5 Unorm, B 5 Unorm];

    R8_UNORM: Bytes, 1, [R 8 Unorm];
    R8_SNORM: Bytes, 1, [R 8 Snorm];
    R8_USCALED: Bytes, 1, [R 8 Uscaled];
    R8_SSCALED: Bytes, 1, [R 8 Sscaled];
    R8_UINT: Bytes, 1, [R 8 Uint];
    R8_SINT: Bytes, 1, [R 8 Sint];
    R8_SRGB: Bytes, 1, [R 8 Srgb];
    R8G8_UNORM: Bytes, 2, [R 8 Unorm, G 8 Unorm];
    R8G8_SNORM: Bytes, 2, [R 8 Snorm, G 8 Snorm];
    R8G8_USCALED: Bytes, 2, [R 8 Uscaled, G 8 Uscaled];
    R8G8_SSCALED: Bytes, 2, [R 8 Sscaled, G 8 Sscaled];
    R8G8_UINT: Bytes, 2, [R 8 Uint, G 8 Uint];
    R8G8_SINT: Bytes, 2, [R 8 Sint, G 8 Sint];
    R8G8_SRGB: Bytes, 2, [R 8 Srgb, G 8 Srgb];
    R8G8B8_UNORM: Bytes, 3, [R 8 Unorm, G 8 Unorm, B 8 Unorm];
    R8G8B8_SNORM: Bytes, 3, [R 8 Snorm, G 8 Snorm, B 8 Snorm];
    R8G8B8_UINT: Bytes, 3, [R 8 Uint, G 8 Uint, B 8 Uint];
    R8G8B8_SINT: Bytes, 3, [R 8 Sint, G 8 Sint, B 8 Sint];
    R8G8B8_SRGB: Bytes, 3, [R 8 Srgb, G 8 Srgb, B 8 Srgb];
    B8G8R8_UNORM: Bytes, 3, [B 8 Unorm, G 8 Unorm, R 8 Unorm];
    B8G8R8_SNORM: Bytes, 3, [B 8 Snorm, G 8 Snorm, R 8 Snorm];
    B8G8R8_UINT: Bytes, 3, [B 8 Uint, G 8 Uint, R 8 Uint];
    B8G8R8_SINT: Bytes, 3, [B 8 Sint, G 8 Sint, R 8 Sint];
    B8G8R8_SRGB: Bytes, 3, [B 8 Srgb, G 8 Srgb, R 8 Srgb];
    R8G8B8A8_UNORM: Bytes, 4, [R 8 Unorm, G 8 Unorm, B 8 Unorm, A 8 Unorm];
    R8G8B8A8_SNORM: Bytes, 4, [R 8 Snorm, G 8 Snorm, B 8 Snorm, A 8 Snorm];
    R8G8B8A8_USCALED: Bytes, 4, [R 8 Uscaled, G 8 Uscaled, B 8 Uscaled, A 8 Uscaled];
    R8G8B8A8_SSCALED: Bytes, 4, [R 8 Sscaled, G 8 Sscaled, B 8 Sscaled, A 8 Sscaled];
    R8G8B8A8_UINT: Bytes, 4, [R 8 Uint, G 8 Uint, B 8 Uint, A 8 Uint];
    R8G8B8A8_SINT: Bytes, 4, [R 8 Sint, G 8 Sint, B 8 Sint, A 8 Sint];
    R8G8B8A8_SRGB: Bytes, 4, [R 8 Srgb, G 8 Srgb, B 8 Srgb, A 8 Srgb];
    B8G8R8A8_UNORM: Bytes, 4, [B 8 Unorm, G 8 Unorm, R 8 Unorm, A 8 Unorm];
    B8G8R8A8_SNORM: Bytes, 4, [B 8 Snorm, G 8 Snorm, R 8 Snorm, A 8 Snorm];
    B8G8R8A8_UINT: Bytes, 4, [B 8 Uint, G 8 Uint, R 8 Uint, A 8 Uint];
    B8G8R8A8_SINT: Bytes, 4, [B 8 Sint, G 8 Sint, R 8 Sint, A 8 Sint];
    B8G8R8A8_SRGB: Bytes, 4, [B 8 Srgb, G 8 Srgb, R 8 Srgb, A 8 Srgb];
    A8B8G8R8_UNORM_PACK32: Word(32), 4, [A 8 Unorm, B 8 Unorm, G 8 Unorm, R 8 Unorm];
    A8B8G8R8_SNORM_PACK32: Word(32), 4, [A 8 Snorm, B 8 Snorm, G 8 Snorm, R 8 Snorm];
    A8B8G8R8_UINT_PACK32: Word(32), 4, [A 8 Uint, B 8 Uint, G 8 Uint, R 8 Uint];
    A8B8G8R8_SINT_PACK32: Word(32), 4, [A 8 Sint, B 8 Sint, G 8 Sint, R 8 Sint];
    A8B8G8R8_SRGB_PACK32: Word(32), 4, [A 8 Srgb, B 8 Srgb, G 8 Srgb, R 8 Srgb];

    A2R10G10B10_UNORM_PACK32: Word(32), 4, [A 2 Unorm, R 10 Unorm, G 10 Unorm, B 10 Unorm];
    A2R10G10B10_SNORM_PACK32: Word(32), 4, [A 2 Snorm, R 10 Snorm, G 10 Snorm, B 10 Snorm];
    A2R10G10B10_UINT_PACK32: Word(32), 4, [A 2 Uint, R 10 Uint, G 10 Uint, B 10 Uint];
    A2R10G10B10_SINT_PACK32: Word(32), 4, [A 2 Sint, R 10 Sint, G 10 Sint, B 10 Sint];
    A2B10G10R10_UNORM_PACK32: Word(32), 4, [A 2 Unorm, B 10 Unorm, G 10 Unorm, R 10 Unorm];
    A2B10G10R10_SNORM_PACK32: Word(32), 4, [A 2 Snorm, B 10 Snorm, G 10 Snorm, R 10 Snorm];
    A2B10G10R10_UINT_PACK32: Word(32), 4, [A 2 Uint, B 10 Uint, G 10 Uint, R 10 Uint];
    A2B10G10R10_SINT_PACK32: Word(32), 4, [A 2 Sint, B 10 Sint, G 10 Sint, R 10 Sint];

    R16_UNORM: Bytes, 2, [R 16 Unorm];
    R16_SNORM: Bytes, 2, [R 16 Snorm];
    R16_USCALED: Bytes, 2, [R 16 Uscaled];
    R16_SSCALED: Bytes, 2, [R 16 Sscaled];
    R16_UINT: Bytes, 2, [R 16 Uint];
    R16_SINT: Bytes, 2, [R 16 Sint];
    R16_SFLOAT: Bytes, 2, [R 16 Sfloat];
    R16G16_UNORM: Bytes, 4, [R 16 Unorm, G 16 Unorm];
    R16G16_SNORM: Bytes, 4, [R 16 Snorm, G 16 Snorm];
    R16G16_UINT: Bytes, 4, [R 16 Uint, G 16 Uint];
    R16G16_SINT: Bytes, 4, [R 16 Sint, G 16 Sint];
    R16G16_SFLOAT: Bytes, 4, [R 16 Sfloat, G 16 Sfloat];
    R16G16B16_UNORM: Bytes, 6, [R 16 Unorm, G 16 Unorm, B 16 Unorm];
    R16G16B16_UINT: Bytes, 6, [R 16 Uint, G 16 Uint, B 16 Uint];
    R16G16B16_SINT: Bytes, 6, [R 16 Sint, G 16 Sint, B 16 Sint];
    R16G16B16_SFLOAT: Bytes, 6, [R 16 Sfloat, G 16 Sfloat, B 16 Sfloat];
    R16G16B16A16_UNORM: Bytes, 8, [R 16 Unorm, G 16 Unorm, B 16 Unorm, A 16 Unorm];
    R16G16B16A16_SNORM: Bytes, 8, [R 16 Snorm, G 16 Snorm, B 16 Snorm, A 16 Snorm];
    R16G16B16A16_USCALED: Bytes, 8, [R 16 Uscaled, G 16 Uscaled, B 16 Uscaled, A 16 Uscaled];
    R16G16B16A16_SSCALED: Bytes, 8, [R 16 Sscaled, G 16 Sscaled, B 16 Sscaled, A 16 Sscaled];
    R16G16B16A16_UINT: Bytes, 8, [R 16 Uint, G 16 Uint, B 16 Uint, A 16 Uint];
    R16G16B16A16_SINT: Bytes, 8, [R 16 Sint, G 16 Sint, B 16 Sint, A 16 Sint];
    R16G16B16A16_SFLOAT: Bytes, 8, [R 16 Sfloat, G 16 Sfloat, B 16 Sfloat, A 16 Sfloat];

    R32_UINT: Bytes, 4, [R 32 Uint];
    R32_SINT: Bytes, 4, [R 32 Sint];
    R32_SFLOAT: Bytes, 4, [R 32 Sfloat];
    R32G32_UINT: Bytes, 8, [R 32 Uint, G 32 Uint];
    R32G32_SINT: Bytes, 8, [R 32 Sint, G 32 Sint];
    R32G32_SFLOAT: Bytes, 8, [R 32 Sfloat, G 32 Sfloat];
    R32G32B32_UINT: Bytes, 12, [R 32 Uint, G 32 Uint, B 32 Uint];
    R32G32B32_SINT: Bytes, 12, [R 32 Sint, G 32 Sint, B 32 Sint];
    R32G32B32_SFLOAT: Bytes, 12, [R 32 Sfloat, G 32 Sfloat, B 32 Sfloat];
    R32G32B32A32_UINT: Bytes, 16, [R 32 Uint, G 32 Uint, B 32 Uint, A 32 Uint];
    R32G32B32A32_SINT: Bytes, 16, [R 32 Sint, G 32 Sint, B 32 Sint, A 32 Sint];
    R32G32B32A32_SFLOAT: Bytes, 16, [R 32 Sfloat, G 32 Sfloat, B 32 Sfloat, A 32 Sfloat];

    R64_UINT: Bytes, 8, [R 64 Uint];
    R64_SINT: Bytes, 8, [R 64 Sint];
    R64_SFLOAT: Bytes, 8, [R 64 Sfloat];
    R64G64_UINT: Bytes, 16, [R 64 Uint, G 64 Uint];
    R64G64_SFLOAT: Bytes, 16, [R 64 Sfloat, G 64 Sfloat];
    R64G64B64A64_UINT: Bytes, 32, [R 64 Uint, G 64 Uint, B 64 Uint, A 64 Uint];
    R64G64B64A64_SFLOAT: Bytes, 32, [R 64 Sfloat, G 64 Sfloat, B 64 Sfloat, A 64 Sfloat];

    B10G11R11_UFLOAT_PACK32: Word(32), 4, [B 10 Ufloat, G 11 Ufloat, R 11 Ufloat];
    E5B9G9R9_UFLOAT_PACK32: Word(32), 4, [Exponent 5 Uint, B 9 Ufloat, G 9 Ufloat, R 9 Ufloat];

    D16_UNORM: Bytes, 2, [Depth 16 Unorm];
    X8_D24_UNORM_PACK32: Word(32), 4, [Padding 8 Uint, Depth 24 Unorm];
    D32_SFLOAT: Bytes, 4, [Depth 32 Sfloat];
    S8_UINT: Bytes, 1, [Stencil 8 Uint];
    D16_UNORM_S8_UINT: Bytes, 3, [Depth 16 Unorm, Stencil 8 Uint];
    D24_UNORM_S8_UINT: Word(32), 4, [Stencil 8 Uint, Depth 24 Unorm];
    D32_SFLOAT_S8_UINT: Bytes, 5, [Depth 32 Sfloat, Stencil 8 Uint];
}

/// Every format the table knows.
pub fn known_formats() -> &'static [FormatInfo] {
    FORMATS
}

pub fn info(format: vk::Format) -> Option<&'static FormatInfo> {
    FORMATS.iter().find(|f| f.format == format)
}

fn info_or_err(format: vk::Format) -> Result<&'static FormatInfo> {
    if is_compressed(format) {
        return Err(unsupported(format, "compressed formats are not supported"));
    }
    if is_multi_planar(format) {
        return Err(unsupported(format, "multi-planar formats are not supported"));
    }
    info(format).ok_or_else(|| unsupported(format, "unknown format"))
}

fn unsupported(format: vk::Format, reason: impl Into<String>) -> PrimeError {
    PrimeError::UnsupportedFormat {
        format,
        reason: reason.into(),
    }
}

pub fn is_compressed(format: vk::Format) -> bool {
    let raw = format.as_raw();
    (131..=184).contains(&raw)
        || (1_000_054_000..=1_000_054_007).contains(&raw)
        || (1_000_066_000..=1_000_066_013).contains(&raw)
}

pub fn is_multi_planar(format: vk::Format) -> bool {
    let raw = format.as_raw();
    (1_000_156_000..=1_000_156_033).contains(&raw) || (1_000_330_000..=1_000_330_003).contains(&raw)
}

pub fn is_depth_stencil(format: vk::Format) -> bool {
    aspects_of(format).intersects(vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL)
}

/// Aspects carried by images of `format`.
pub fn aspects_of(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::D16_UNORM | vk::Format::X8_D24_UNORM_PACK32 | vk::Format::D32_SFLOAT => {
            vk::ImageAspectFlags::DEPTH
        }
        vk::Format::S8_UINT => vk::ImageAspectFlags::STENCIL,
        vk::Format::D16_UNORM_S8_UINT
        | vk::Format::D24_UNORM_S8_UINT
        | vk::Format::D32_SFLOAT_S8_UINT => {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        }
        _ => vk::ImageAspectFlags::COLOR,
    }
}

/// Format of one aspect's data as laid out in a buffer copy.
pub fn aspect_format(format: vk::Format, aspect: ImageAspect) -> Result<vk::Format> {
    match aspect {
        ImageAspect::Color if !is_depth_stencil(format) => Ok(format),
        ImageAspect::Depth => match format {
            vk::Format::D16_UNORM | vk::Format::D16_UNORM_S8_UINT => Ok(vk::Format::D16_UNORM),
            vk::Format::X8_D24_UNORM_PACK32 | vk::Format::D24_UNORM_S8_UINT => {
                Ok(vk::Format::X8_D24_UNORM_PACK32)
            }
            vk::Format::D32_SFLOAT | vk::Format::D32_SFLOAT_S8_UINT => Ok(vk::Format::D32_SFLOAT),
            _ => Err(unsupported(format, "format has no depth aspect")),
        },
        ImageAspect::Stencil => {
            if aspects_of(format).contains(vk::ImageAspectFlags::STENCIL) {
                Ok(vk::Format::S8_UINT)
            } else {
                Err(unsupported(format, "format has no stencil aspect"))
            }
        }
        ImageAspect::Color => Err(unsupported(format, "format has no color aspect")),
    }
}

/// Bytes per texel of one aspect.
pub fn element_size(format: vk::Format, aspect: ImageAspect) -> Result<u32> {
    Ok(info_or_err(aspect_format(format, aspect)?)?.element_size)
}

pub fn staging_format(aspect: ImageAspect) -> vk::Format {
    match aspect {
        ImageAspect::Color => STAGING_COLOR_FORMAT,
        ImageAspect::Depth | ImageAspect::Stencil => STAGING_DEPTH_STENCIL_FORMAT,
    }
}

/// Number of staging images needed to hold one texel of `aspect`.
pub fn staging_image_count(format: vk::Format, aspect: ImageAspect) -> Result<u32> {
    let src = element_size(format, aspect)?;
    let staging = info_or_err(staging_format(aspect))?.element_size;
    Ok(src.div_ceil(staging).max(1))
}

pub fn mip_extent(extent: vk::Extent3D, level: u32) -> vk::Extent3D {
    let shrink = |v: u32| v.checked_shr(level).unwrap_or(0).max(1);
    vk::Extent3D {
        width: shrink(extent.width),
        height: shrink(extent.height),
        depth: shrink(extent.depth),
    }
}

/// Size of a region of one aspect, tight and rounded up to eight bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LevelSize {
    pub size: u64,
    pub aligned_size: u64,
}

pub fn region_size(extent: vk::Extent3D, format: vk::Format, aspect: ImageAspect) -> Result<LevelSize> {
    let texels = extent.width as u64 * extent.height as u64 * extent.depth as u64;
    let size = texels * element_size(format, aspect)? as u64;
    Ok(LevelSize {
        size,
        aligned_size: size.next_multiple_of(8),
    })
}

pub fn level_size(info: &ImageInfo, aspect: ImageAspect, level: u32) -> Result<LevelSize> {
    region_size(info.level_extent(level), info.format, aspect)
}

/// Total tight size of every subresource of an image.
pub fn image_size(info: &ImageInfo) -> Result<u64> {
    let mut total = 0;
    for aspect in ImageAspect::from_flags(aspects_of(info.format)) {
        for level in 0..info.mip_levels {
            total += level_size(info, aspect, level)?.size * info.array_layers as u64;
        }
    }
    Ok(total)
}

fn read_word(texel: &[u8]) -> u64 {
    texel
        .iter()
        .take(8)
        .enumerate()
        .fold(0u64, |acc, (i, b)| acc | (*b as u64) << (8 * i))
}

/// Raw value of every component of one texel, in table order.
fn raw_components(info: &FormatInfo, texel: &[u8]) -> Vec<u64> {
    match info.packing {
        Packing::Bytes => {
            let mut offset = 0usize;
            info.components
                .iter()
                .map(|c| {
                    let n = (c.bits / 8) as usize;
                    let v = read_word(&texel[offset..offset + n]);
                    offset += n;
                    v
                })
                .collect()
        }
        Packing::Word(width) => {
            let word = read_word(&texel[..(width / 8) as usize]);
            let mut consumed = 0;
            info.components
                .iter()
                .map(|c| {
                    consumed += c.bits;
                    (word >> (width - consumed)) & mask(c.bits)
                })
                .collect()
        }
    }
}

fn mask(bits: u32) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

fn sign_extend(raw: u64, bits: u32) -> u32 {
    let shift = 32 - bits;
    (((raw as u32) << shift) as i32 >> shift) as u32
}

/// Decode an unsigned float with a 5-bit exponent and `mantissa_bits` of
/// mantissa, as used by the packed 10/11-bit formats.
fn decode_ufloat(raw: u64, mantissa_bits: u32) -> f32 {
    let exponent = ((raw >> mantissa_bits) & 0x1f) as i32;
    let mantissa = (raw & mask(mantissa_bits)) as f32 / (1u64 << mantissa_bits) as f32;
    match exponent {
        0 => mantissa * 2f32.powi(-14),
        31 if mantissa == 0.0 => f32::INFINITY,
        31 => f32::NAN,
        e => (1.0 + mantissa) * 2f32.powi(e - 15),
    }
}

fn widen(c: &Component, raw: u64, format: vk::Format) -> Result<u32> {
    if c.bits > 32 {
        return Err(unsupported(format, format!("{}-bit channels are wider than the staging channels", c.bits)));
    }
    Ok(match c.numeric {
        NumericType::Unorm | NumericType::Uint | NumericType::Uscaled | NumericType::Srgb => raw as u32,
        NumericType::Snorm | NumericType::Sint | NumericType::Sscaled => sign_extend(raw, c.bits),
        NumericType::Sfloat if c.bits == 16 => half::f16::from_bits(raw as u16).to_f32().to_bits(),
        NumericType::Sfloat if c.bits == 32 => raw as u32,
        NumericType::Ufloat if c.bits == 11 => decode_ufloat(raw, 6).to_bits(),
        NumericType::Ufloat if c.bits == 10 => decode_ufloat(raw, 5).to_bits(),
        _ => return Err(unsupported(format, format!("{}-bit {:?} channels", c.bits, c.numeric))),
    })
}

/// Decode shared-exponent texels into `R32G32B32_SFLOAT`.
pub fn decode_e5b9g9r9(data: &[u8]) -> Result<Vec<u8>> {
    if data.len() % 4 != 0 {
        return Err(PrimeError::DataConversion(format!(
            "E5B9G9R9 data length {} is not a multiple of 4",
            data.len()
        )));
    }
    let mut out = Vec::with_capacity(data.len() * 3);
    for texel in data.chunks_exact(4) {
        let word = u32::from_le_bytes([texel[0], texel[1], texel[2], texel[3]]);
        let exponent = (word >> 27) as i32;
        let scale = 2f32.powi(exponent - 15 - 9);
        for shift in [0, 9, 18] {
            let v = ((word >> shift) & 0x1ff) as f32 * scale;
            out.extend_from_slice(&v.to_le_bytes());
        }
    }
    Ok(out)
}

/// Widen `data`, texels of `format`'s `aspect`, into the canonical staging
/// encoding. Returns the canonical bytes, padded to a multiple of eight, and
/// the canonical format.
pub fn unpack(data: &[u8], format: vk::Format, aspect: ImageAspect) -> Result<(Vec<u8>, vk::Format)> {
    let mut src_format = aspect_format(format, aspect)?;
    let decoded;
    let mut data = data;
    if src_format == vk::Format::E5B9G9R9_UFLOAT_PACK32 {
        decoded = decode_e5b9g9r9(data)?;
        data = &decoded;
        src_format = vk::Format::R32G32B32_SFLOAT;
    }
    let src = info_or_err(src_format)?;
    let dst_format = staging_format(aspect);
    let slots = if aspect == ImageAspect::Color { 4 } else { 1 };
    let element = src.element_size as usize;
    if data.len() % element != 0 {
        return Err(PrimeError::DataConversion(format!(
            "{} bytes is not a whole number of {:?} texels",
            data.len(),
            src_format
        )));
    }

    let mut out = Vec::with_capacity(data.len() / element * slots * 4 + 8);
    for texel in data.chunks_exact(element) {
        let mut canonical = [0u32; 4];
        for (c, raw) in src.components.iter().zip(raw_components(src, texel)) {
            if let Some(slot) = c.channel.slot() {
                canonical[slot] = widen(c, raw, src_format)?;
            }
        }
        for v in &canonical[..slots] {
            out.extend_from_slice(&v.to_le_bytes());
        }
    }
    out.resize(out.len().next_multiple_of(8), 0);
    Ok((out, dst_format))
}

fn narrow(c: &Component, value: u32, format: vk::Format) -> Result<u64> {
    if c.bits > 32 {
        return Err(unsupported(format, format!("{}-bit channels cannot be packed", c.bits)));
    }
    Ok(match c.numeric {
        NumericType::Sfloat if c.bits == 16 => half::f16::from_f32(f32::from_bits(value)).to_bits() as u64,
        NumericType::Sfloat if c.bits == 32 => value as u64,
        NumericType::Sfloat | NumericType::Ufloat => {
            return Err(unsupported(format, format!("packing {}-bit {:?} channels", c.bits, c.numeric)))
        }
        _ => value as u64 & mask(c.bits),
    })
}

/// Encode `texel_count` canonical texels into `format`'s `aspect`. The
/// inverse of [`unpack`] for lossless formats.
pub fn pack(canonical: &[u8], texel_count: usize, format: vk::Format, aspect: ImageAspect) -> Result<Vec<u8>> {
    let dst_format = aspect_format(format, aspect)?;
    if dst_format == vk::Format::E5B9G9R9_UFLOAT_PACK32 {
        return Err(unsupported(dst_format, "shared-exponent formats cannot be packed"));
    }
    let dst = info_or_err(dst_format)?;
    let slots = if aspect == ImageAspect::Color { 4 } else { 1 };
    let stride = slots * 4;
    if canonical.len() < texel_count * stride {
        return Err(PrimeError::DataConversion(format!(
            "{} canonical bytes hold fewer than {} texels",
            canonical.len(),
            texel_count
        )));
    }

    let mut out = Vec::with_capacity(texel_count * dst.element_size as usize);
    for texel in canonical.chunks_exact(stride).take(texel_count) {
        let value = |slot: usize| u32::from_le_bytes([
            texel[slot * 4],
            texel[slot * 4 + 1],
            texel[slot * 4 + 2],
            texel[slot * 4 + 3],
        ]);
        match dst.packing {
            Packing::Bytes => {
                for c in dst.components {
                    let raw = match c.channel.slot() {
                        Some(slot) => narrow(c, value(slot), dst_format)?,
                        None => 0,
                    };
                    out.extend_from_slice(&raw.to_le_bytes()[..(c.bits / 8) as usize]);
                }
            }
            Packing::Word(width) => {
                let mut word = 0u64;
                let mut consumed = 0;
                for c in dst.components {
                    consumed += c.bits;
                    if let Some(slot) = c.channel.slot() {
                        word |= narrow(c, value(slot), dst_format)? << (width - consumed);
                    }
                }
                out.extend_from_slice(&word.to_le_bytes()[..(width / 8) as usize]);
            }
        }
    }
    Ok(out)
}
