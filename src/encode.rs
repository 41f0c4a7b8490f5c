use super::*;

#[cfg(feature = "alloc")]
use alloc::vec::Vec;

/// Largest output of a single pixel: a pending run flush followed by an RGBA literal.
const QOI_MAX_PIXEL_OPS: usize = 6;

/// Errors that may occur during image encoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EncodeError {
    /// Pixel data length is not a multiple of 4.
    InvalidPixelData,

    /// Width or height is negative or does not fit into 32 bits.
    InvalidDimensions,

    /// Number of pixels encoded differs from width * height.
    PixelCountMismatch { expected: u64, actual: u64 },

    /// Output buffer is too small to fit encoded pixels.
    OutputIsTooSmall,

    /// Encoder already wrote the end marker.
    StreamFinished,
}

impl Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncodeError::InvalidPixelData => {
                f.write_str("Pixel data length is not a multiple of 4 bytes")
            }
            EncodeError::InvalidDimensions => {
                f.write_str("Width and height must be non-negative 32-bit values")
            }
            EncodeError::PixelCountMismatch { expected, actual } => write!(
                f,
                "Width * height ({}) does not equal pixels encoded ({})",
                expected, actual
            ),
            EncodeError::OutputIsTooSmall => {
                f.write_str("Output buffer is too small to fit encoded pixels")
            }
            EncodeError::StreamFinished => f.write_str("Encoder already finished the image"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for EncodeError {}

/// Returns maximum number of bytes `EncoderState::encode_range` may write for `pixels` pixels.
#[inline]
pub const fn encoded_range_limit(pixels: usize) -> usize {
    pixels * 5 + QOI_MAX_PIXEL_OPS
}

impl Qoi {
    /// Serializes the header.
    pub fn header_bytes(&self) -> [u8; QOI_HEADER_SIZE] {
        let mut output = [0; QOI_HEADER_SIZE];
        output[0..4].copy_from_slice(&QOI_MAGIC.to_be_bytes());
        output[4..8].copy_from_slice(&self.width.to_be_bytes());
        output[8..12].copy_from_slice(&self.height.to_be_bytes());
        output[12] = self.channels.count();
        output[13] = self.colorspace as u8;
        output
    }

    /// Encode raw RGBA pixels into a QOI image in memory.\
    /// Pixel data is always 4 bytes per pixel. With `Channels::Rgb` alpha is dropped.
    ///
    /// On success this function returns `Ok(vec)` with `vec` containing encoded image.\
    /// On failure this function returns `Err(err)` with `err` describing cause of the error.
    #[cfg(feature = "alloc")]
    pub fn encode_alloc(&self, pixels: &[u8]) -> Result<Vec<u8>, EncodeError> {
        if pixels.len() % 4 != 0 {
            return Err(EncodeError::InvalidPixelData);
        }

        let mut encoder = StreamEncoder::new(*self);
        let mut output = Vec::with_capacity(self.encoded_size_limit().min(
            encoded_range_limit(pixels.len() / 4) + QOI_MIN_SIZE,
        ));
        output.extend_from_slice(encoder.push(pixels)?);
        output.extend_from_slice(encoder.finish()?);
        Ok(output)
    }
}

/// State of one image encoding session.
///
/// Pixels must be fed in image order. The state never looks at the header,
/// counting pixels is left to the caller.
#[derive(Clone, Debug)]
pub struct EncoderState {
    channels: Channels,
    index: PixelCache,
    px_prev: Rgba,
    run: u8,
    count: u64,
}

impl EncoderState {
    pub fn new(channels: Channels) -> Self {
        EncoderState {
            channels,
            index: PixelCache::new(),
            px_prev: Rgba::new_opaque(),
            run: 0,
            count: 0,
        }
    }

    #[inline]
    pub fn channels(&self) -> Channels {
        self.channels
    }

    /// Previously encoded pixel.
    #[inline]
    pub fn previous(&self) -> Rgba {
        self.px_prev
    }

    /// Length of the run not yet written.
    #[inline]
    pub fn run(&self) -> u8 {
        self.run
    }

    /// Number of pixels consumed so far.
    #[inline]
    pub fn count(&self) -> u64 {
        self.count
    }

    #[inline]
    pub fn cache(&self) -> &PixelCache {
        &self.index
    }

    /// Encode range of pixels into output slice.
    /// This does not include header and end marker.
    ///
    /// `output` should be at least `encoded_range_limit(pixels.len() / 4)` bytes long.
    /// Returns number of bytes written.
    pub fn encode_range(&mut self, pixels: &[u8], output: &mut [u8]) -> Result<usize, EncodeError> {
        let pixels: &[Rgba] =
            bytemuck::try_cast_slice(pixels).map_err(|_| EncodeError::InvalidPixelData)?;

        let mut written = 0;
        for &px in pixels {
            let rest = &mut output[written..];
            if unlikely(rest.len() < QOI_MAX_PIXEL_OPS) {
                return Err(EncodeError::OutputIsTooSmall);
            }
            written += self.encode_pixel(px, rest);
        }

        Ok(written)
    }

    /// Writes pending run, if any.
    /// Returns number of bytes written, 0 or 1.
    pub fn flush(&mut self, output: &mut [u8]) -> Result<usize, EncodeError> {
        if self.run == 0 {
            return Ok(0);
        }

        match output.first_mut() {
            Some(b1) => {
                *b1 = QOI_OP_RUN | (self.run - 1);
                self.run = 0;
                Ok(1)
            }
            None => Err(EncodeError::OutputIsTooSmall),
        }
    }

    /// `rest` must be at least `QOI_MAX_PIXEL_OPS` bytes long.
    #[inline]
    fn encode_pixel(&mut self, px: Rgba, rest: &mut [u8]) -> usize {
        let px = match self.channels {
            Channels::Rgb => px.opaque(),
            Channels::Rgba => px,
        };

        self.count += 1;

        if px == self.px_prev {
            self.run += 1;
            if unlikely(self.run == QOI_MAX_RUN) {
                rest[0] = QOI_OP_RUN | (QOI_MAX_RUN - 1);
                self.run = 0;
                return 1;
            }
            return 0;
        }

        let mut n = 0;
        if self.run > 0 {
            rest[0] = QOI_OP_RUN | (self.run - 1);
            self.run = 0;
            n = 1;
        }

        let index_pos = PixelCache::slot(px, self.channels);

        if self.index.lookup(index_pos) == px {
            rest[n] = QOI_OP_INDEX | index_pos;
            n += 1;
        } else {
            self.index.store(index_pos, px);

            let v = px.var(&self.px_prev);

            if let Some(diff) = v.diff() {
                rest[n] = diff;
                n += 1;
            } else if let Some([lu, ma]) = v.luma() {
                rest[n] = lu;
                rest[n + 1] = ma;
                n += 2;
            } else {
                match self.channels {
                    Channels::Rgb => {
                        rest[n..n + 4].copy_from_slice(&[QOI_OP_RGB, px.r, px.g, px.b]);
                        n += 4;
                    }
                    Channels::Rgba => {
                        rest[n..n + 5].copy_from_slice(&[QOI_OP_RGBA, px.r, px.g, px.b, px.a]);
                        n += 5;
                    }
                }
            }
        }

        self.px_prev = px;
        n
    }
}
