//! QOI - The “Quite OK Image” format for fast, lossless image compression
//!
//! Streaming encoder and decoder. Pixels and op-codes may arrive in chunks of
//! any size, split at any byte.
//!
//! -- Data Format
//!
//! A QOI file has a 14 byte header, followed by any number of data "chunks"
//! and an 8 byte end marker.
//!
//! struct qoi_header_t {
//!     char     magic[4];   // magic bytes "qoif"
//!     uint32_t width;      // image width in pixels (BE)
//!     uint32_t height;     // image height in pixels (BE)
//!     uint8_t  channels;   // 3 = RGB, 4 = RGBA
//!     uint8_t  colorspace; // 0 = sRGB with linear alpha, 1 = all channels linear
//! };
//!
//! Raw pixel data is always 4 bytes per pixel. With 3 channels the alpha byte
//! of the input is ignored and decoded pixels have alpha 255.
//!
//! The decoder and encoder start with {r: 0, g: 0, b: 0, a: 255} as the previous
//! pixel value. Pixels are either encoded as
//!  - a run of the previous pixel
//!  - an index into an array of previously seen pixels
//!  - a difference to the previous pixel value in r,g,b
//!  - full r,g,b or r,g,b,a values
//!
//! A running array[64] (zero-initialized) of previously seen pixel values is
//! maintained by the encoder and decoder. Each pixel that is seen is put into
//! this array at the position (r * 3 + g * 5 + b * 7 + a * 11) % 64. With 3
//! channels `a` is taken as 255.
//!
//! QOI_OP_INDEX {
//!     u8 tag  :  2;   // b00
//!     u8 idx  :  6;   // 6-bit index into the color index array: 0..63
//! }
//!
//! QOI_OP_DIFF {
//!     u8 tag  :  2;   // b01
//!     u8 dr   :  2;   // 2-bit   red channel difference from the previous pixel: -2..1
//!     u8 dg   :  2;   // 2-bit green channel difference from the previous pixel: -2..1
//!     u8 db   :  2;   // 2-bit  blue channel difference from the previous pixel: -2..1
//! }
//!
//! QOI_OP_LUMA {
//!     u8 tag     :  2;   // b10
//!     u8 dg      :  6;   // 6-bit green channel difference: -32..31
//!     u8 dr_dg   :  4;   // 4-bit   red channel difference minus green difference: -8..7
//!     u8 db_dg   :  4;   // 4-bit  blue channel difference minus green difference: -8..7
//! }
//!
//! QOI_OP_RUN {
//!     u8 tag  :  2;   // b11
//!     u8 run  :  6;   // 6-bit run-length repeating the previous pixel: 1..62
//! }
//!
//! QOI_OP_RGB {
//!     u8 tag  :  8;   // b11111110
//!     u8 r, g, b;
//! }
//!
//! QOI_OP_RGBA {
//!     u8 tag  :  8;   // b11111111
//!     u8 r, g, b, a;
//! }
//!
//! Run lengths 63 and 64 (b111110 and b111111) are illegal as they are
//! occupied by the QOI_OP_RGB and QOI_OP_RGBA tags.
//!
//! The byte stream's end is marked with 7 0x00 bytes followed by a single 0x01.
//!
#![no_std]

#[cfg(feature = "alloc")]
extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

use core::fmt::{self, Display};

mod decode;
mod encode;

#[cfg(feature = "io")]
mod io;
#[cfg(feature = "alloc")]
mod stream;

pub use self::{decode::*, encode::*};

#[cfg(feature = "alloc")]
pub use self::stream::*;

const QOI_OP_INDEX: u8 = 0x00; // 00xxxxxx
const QOI_OP_DIFF: u8 = 0x40; // 01xxxxxx
const QOI_OP_LUMA: u8 = 0x80; // 10xxxxxx
const QOI_OP_RUN: u8 = 0xc0; // 11xxxxxx
const QOI_OP_RGB: u8 = 0xfe; // 11111110
const QOI_OP_RGBA: u8 = 0xff; // 11111111

const QOI_MASK_2: u8 = 0xc0; // 11000000

const QOI_MAX_RUN: u8 = 62;

/// Alpha fed into the index hash for 3-channel images.
const QOI_RGB_HASH_ALPHA: u8 = 255;

const QOI_MAGIC: u32 = u32::from_be_bytes(*b"qoif");

/// Size of the header in bytes.
pub const QOI_HEADER_SIZE: usize = 14;

/// End of stream marker.
pub const QOI_FOOTER: [u8; 8] = [0, 0, 0, 0, 0, 0, 0, 1];

/// Size of the end of stream marker in bytes.
pub const QOI_PADDING: usize = QOI_FOOTER.len();

/// Smallest valid QOI stream: header and end marker around zero pixels.
pub const QOI_MIN_SIZE: usize = QOI_HEADER_SIZE + QOI_PADDING;

#[inline]
#[cold]
fn cold() {}

#[inline(always)]
fn likely(b: bool) -> bool {
    if !b {
        cold()
    }
    b
}

#[inline(always)]
fn unlikely(b: bool) -> bool {
    if b {
        cold()
    }
    b
}

/// Single RGBA8 pixel.
///
/// Layout matches raw pixel data, so `&[u8]` can be cast into `&[Rgba]`.
#[repr(C)]
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, bytemuck::Pod, bytemuck::Zeroable,
)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    /// Transparent black. Initial value of every index slot.
    #[inline(always)]
    pub const fn new() -> Self {
        Rgba {
            r: 0,
            g: 0,
            b: 0,
            a: 0,
        }
    }

    /// Opaque black. Initial value of the previous pixel.
    #[inline(always)]
    pub const fn new_opaque() -> Self {
        Rgba {
            r: 0,
            g: 0,
            b: 0,
            a: 255,
        }
    }

    #[inline(always)]
    pub const fn from_array([r, g, b, a]: [u8; 4]) -> Self {
        Rgba { r, g, b, a }
    }

    /// Same pixel with alpha replaced by 255.
    #[inline(always)]
    pub const fn opaque(self) -> Self {
        Rgba { a: 255, ..self }
    }

    #[inline(always)]
    fn var(&self, prev: &Self) -> Var {
        let r = self.r as i16 - prev.r as i16;
        let g = self.g as i16 - prev.g as i16;
        let b = self.b as i16 - prev.b as i16;
        let a = self.a as i16 - prev.a as i16;

        Var { r, g, b, a }
    }

    #[inline(always)]
    fn write(&self, bytes: &mut [u8]) {
        bytes[..4].copy_from_slice(bytemuck::bytes_of(self))
    }
}

/// Channel-wise difference between two pixels.
/// Plain integer deltas, no wrap-around.
#[derive(Clone, Copy, Debug)]
struct Var {
    r: i16,
    g: i16,
    b: i16,
    a: i16,
}

impl Var {
    #[inline(always)]
    fn diff(&self) -> Option<u8> {
        // self.a == 0 && every of r, g, b in -2..=1
        let r = self.r + 2;
        let g = self.g + 2;
        let b = self.b + 2;

        match self.a == 0 && (r | g | b) & !3 == 0 {
            true => Some(QOI_OP_DIFF | (r << 4) as u8 | (g << 2) as u8 | b as u8),
            false => None,
        }
    }

    #[inline(always)]
    fn luma(&self) -> Option<[u8; 2]> {
        // self.a == 0 && g in -32..=31 && r - g in -8..=7 && b - g in -8..=7
        let g = self.g + 32;
        let r = self.r - self.g + 8;
        let b = self.b - self.g + 8;

        match self.a == 0 && (g & !63) | ((r | b) & !15) == 0 {
            true => Some([QOI_OP_LUMA | g as u8, (r << 4) as u8 | b as u8]),
            false => None,
        }
    }
}

/// Channel layout declared in the header.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Channels {
    /// Alpha is ignored on encode and decoded as 255.
    Rgb = 3,
    Rgba = 4,
}

impl Channels {
    #[inline(always)]
    pub const fn has_alpha(self) -> bool {
        matches!(self, Channels::Rgba)
    }

    /// Header byte for this layout.
    #[inline(always)]
    pub const fn count(self) -> u8 {
        self as u8
    }

    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            3 => Some(Channels::Rgb),
            4 => Some(Channels::Rgba),
            _ => None,
        }
    }
}

/// Colorspace tag declared in the header.
/// Purely informative, pixel values are never converted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ColorSpace {
    /// sRGB color channels with linear alpha.
    Srgb = 0,

    /// All channels linear.
    Linear = 1,
}

impl ColorSpace {
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(ColorSpace::Srgb),
            1 => Some(ColorSpace::Linear),
            _ => None,
        }
    }
}

/// Array of 64 previously seen pixels.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PixelCache {
    slots: [Rgba; 64],
}

impl Default for PixelCache {
    fn default() -> Self {
        PixelCache::new()
    }
}

impl PixelCache {
    #[inline]
    pub const fn new() -> Self {
        PixelCache {
            slots: [Rgba::new(); 64],
        }
    }

    /// Slot of the pixel: `(r * 3 + g * 5 + b * 7 + a * 11) % 64`.
    /// With 3 channels `a` is always 255.
    #[inline(always)]
    pub fn slot(px: Rgba, channels: Channels) -> u8 {
        let a = match channels {
            Channels::Rgb => QOI_RGB_HASH_ALPHA,
            Channels::Rgba => px.a,
        };

        // 256 is a multiple of 64, so wrapping u8 arithmetic keeps the low 6 bits.
        px.r.wrapping_mul(3)
            .wrapping_add(px.g.wrapping_mul(5))
            .wrapping_add(px.b.wrapping_mul(7))
            .wrapping_add(a.wrapping_mul(11))
            & 63
    }

    #[inline(always)]
    pub fn lookup(&self, slot: u8) -> Rgba {
        self.slots[(slot & 63) as usize]
    }

    #[inline(always)]
    pub fn store(&mut self, slot: u8, px: Rgba) {
        self.slots[(slot & 63) as usize] = px;
    }
}

/// QOI descriptor value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Qoi {
    /// Width of the image.
    pub width: u32,

    /// Height of the image.
    pub height: u32,

    /// Channels stored in the encoded stream.
    pub channels: Channels,

    /// Colorspace tag, passed through unchanged.
    pub colorspace: ColorSpace,
}

impl Qoi {
    #[inline]
    pub const fn new(width: u32, height: u32, channels: Channels, colorspace: ColorSpace) -> Self {
        Qoi {
            width,
            height,
            channels,
            colorspace,
        }
    }

    /// Builds descriptor from signed dimensions.
    ///
    /// Fails with `EncodeError::InvalidDimensions` if either dimension is
    /// negative or does not fit into 32 bits.
    pub fn from_dimensions(
        width: i64,
        height: i64,
        channels: Channels,
        colorspace: ColorSpace,
    ) -> Result<Self, EncodeError> {
        let width = u32::try_from(width).map_err(|_| EncodeError::InvalidDimensions)?;
        let height = u32::try_from(height).map_err(|_| EncodeError::InvalidDimensions)?;
        Ok(Qoi::new(width, height, channels, colorspace))
    }

    /// Number of pixels declared by the header.
    #[inline]
    pub const fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Returns decoded pixel data size, 4 bytes per pixel.
    #[inline]
    pub fn decoded_size(&self) -> usize {
        (self.width as usize)
            .saturating_mul(self.height as usize)
            .saturating_mul(4)
    }

    /// Returns maximum size of the encoded image.
    #[inline]
    pub fn encoded_size_limit(&self) -> usize {
        let op = match self.channels {
            Channels::Rgb => 4,
            Channels::Rgba => 5,
        };

        (self.width as usize)
            .saturating_mul(self.height as usize)
            .saturating_mul(op)
            .saturating_add(QOI_MIN_SIZE)
    }
}

impl Display for Qoi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{} {:?} {:?}",
            self.width, self.height, self.channels, self.colorspace
        )
    }
}
