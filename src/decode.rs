use super::*;

#[cfg(feature = "alloc")]
use alloc::vec::Vec;

/// Errors that may occur during image decoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DecodeError {
    /// Input is shorter than header and end marker.
    DataIsTooSmall,

    /// Input does not start with "qoif".
    InvalidMagic,

    /// Channels byte is neither 3 nor 4.
    InvalidChannelsValue,

    /// Colorspace byte is neither 0 nor 1.
    InvalidColorSpaceValue,

    /// Number of pixels decoded differs from width * height.
    PixelCountMismatch { expected: u64, actual: u64 },

    /// Input ended in the middle of an op or before the end marker.
    UnexpectedEnd,

    /// Output buffer is too small to fit decoded pixels.
    OutputIsTooSmall,
}

impl Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::DataIsTooSmall => f.write_str("QOI input is too short to be valid"),
            DecodeError::InvalidMagic => f.write_str("QOI input had invalid magic number"),
            DecodeError::InvalidChannelsValue => f.write_str("QOI input had invalid channels"),
            DecodeError::InvalidColorSpaceValue => {
                f.write_str("QOI input had invalid colorspace")
            }
            DecodeError::PixelCountMismatch { expected, actual } => write!(
                f,
                "Pixels decoded ({}) does not match width * height ({})",
                actual, expected
            ),
            DecodeError::UnexpectedEnd => f.write_str("QOI input ended before the end marker"),
            DecodeError::OutputIsTooSmall => {
                f.write_str("Output buffer is too small to fit decoded pixels")
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for DecodeError {}

/// Outcome of `DecoderState::decode_range`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RangeProgress {
    /// Op bytes consumed, including the end marker once found.
    pub consumed: usize,

    /// Pixel bytes written.
    pub written: usize,

    /// End marker was consumed.
    pub finished: bool,
}

impl Qoi {
    /// Decodes header from QOI
    pub fn decode_header(bytes: &[u8]) -> Result<Self, DecodeError> {
        let header = match bytes.get(..QOI_HEADER_SIZE) {
            None => return Err(DecodeError::DataIsTooSmall),
            Some(header) => header,
        };

        let be32 = |at: usize| {
            u32::from_be_bytes([header[at], header[at + 1], header[at + 2], header[at + 3]])
        };

        if be32(0) != QOI_MAGIC {
            return Err(DecodeError::InvalidMagic);
        }

        let width = be32(4);
        let height = be32(8);
        let channels = Channels::from_u8(header[12]).ok_or(DecodeError::InvalidChannelsValue)?;
        let colorspace =
            ColorSpace::from_u8(header[13]).ok_or(DecodeError::InvalidColorSpaceValue)?;

        Ok(Qoi {
            width,
            height,
            channels,
            colorspace,
        })
    }

    /// Decode a QOI image from memory.\
    /// Decoded pixels are always 4 bytes per pixel.
    #[cfg(feature = "alloc")]
    pub fn decode_alloc(bytes: &[u8]) -> Result<(Self, Vec<u8>), DecodeError> {
        if bytes.len() < QOI_MIN_SIZE {
            return Err(DecodeError::DataIsTooSmall);
        }

        let mut decoder = StreamDecoder::new();
        let pixels = decoder.push(bytes)?.to_vec();
        let qoi = decoder.finish()?;
        Ok((qoi, pixels))
    }
}

/// State of one image decoding session.
#[derive(Clone, Debug)]
pub struct DecoderState {
    channels: Channels,
    index: PixelCache,
    px: Rgba,
    count: u64,
}

impl DecoderState {
    pub fn new(channels: Channels) -> Self {
        DecoderState {
            channels,
            index: PixelCache::new(),
            px: Rgba::new_opaque(),
            count: 0,
        }
    }

    #[inline]
    pub fn channels(&self) -> Channels {
        self.channels
    }

    /// Last decoded pixel.
    #[inline]
    pub fn previous(&self) -> Rgba {
        self.px
    }

    /// Number of pixels produced so far.
    #[inline]
    pub fn count(&self) -> u64 {
        self.count
    }

    #[inline]
    pub fn cache(&self) -> &PixelCache {
        &self.index
    }

    /// Size in bytes of the op starting with `tag`.
    #[inline]
    pub const fn op_len(tag: u8) -> usize {
        match tag {
            QOI_OP_RGBA => 5,
            QOI_OP_RGB => 4,
            _ if tag & QOI_MASK_2 == QOI_OP_LUMA => 2,
            _ => 1,
        }
    }

    /// Number of pixels produced by the op starting with `tag`.
    #[inline]
    pub const fn op_pixels(tag: u8) -> usize {
        match tag {
            QOI_OP_RGBA | QOI_OP_RGB => 1,
            _ if tag & QOI_MASK_2 == QOI_OP_RUN => (tag & 0x3f) as usize + 1,
            _ => 1,
        }
    }

    /// Decodes single op from the front of `ops`.
    ///
    /// Returns number of op bytes consumed and number of pixels written to `output`.
    pub fn decode_op(&mut self, ops: &[u8], output: &mut [u8]) -> Result<(usize, usize), DecodeError> {
        let b1 = match ops.first() {
            None => return Err(DecodeError::UnexpectedEnd),
            Some(&b1) => b1,
        };

        let len = Self::op_len(b1);
        let pixels = Self::op_pixels(b1);

        let op = match ops.get(..len) {
            None => return Err(DecodeError::UnexpectedEnd),
            Some(op) => op,
        };

        if output.len() < pixels * 4 {
            return Err(DecodeError::OutputIsTooSmall);
        }

        let mut px = self.px;

        if b1 == QOI_OP_RGBA {
            px = Rgba::from_array([op[1], op[2], op[3], op[4]]);
            if !self.channels.has_alpha() {
                px = px.opaque();
            }
        } else if b1 == QOI_OP_RGB {
            px.r = op[1];
            px.g = op[2];
            px.b = op[3];
        } else {
            match b1 & QOI_MASK_2 {
                QOI_OP_INDEX => {
                    self.px = self.index.lookup(b1);
                    if !self.channels.has_alpha() {
                        self.px = self.px.opaque();
                    }
                    self.px.write(output);
                    self.count += 1;
                    return Ok((len, 1));
                }
                QOI_OP_DIFF => {
                    px.r = px.r.wrapping_add(((b1 >> 4) & 0x03).wrapping_sub(2));
                    px.g = px.g.wrapping_add(((b1 >> 2) & 0x03).wrapping_sub(2));
                    px.b = px.b.wrapping_add((b1 & 0x03).wrapping_sub(2));
                }
                QOI_OP_LUMA => {
                    let b2 = op[1];

                    let vg = (b1 & 0x3f).wrapping_sub(32);
                    let vr = ((b2 >> 4) & 0x0f).wrapping_sub(8).wrapping_add(vg);
                    let vb = (b2 & 0x0f).wrapping_sub(8).wrapping_add(vg);

                    px.r = px.r.wrapping_add(vr);
                    px.g = px.g.wrapping_add(vg);
                    px.b = px.b.wrapping_add(vb);
                }
                _ => {
                    for chunk in output[..pixels * 4].chunks_exact_mut(4) {
                        px.write(chunk);
                    }
                    self.count += pixels as u64;
                    return Ok((len, pixels));
                }
            }
        }

        self.index.store(PixelCache::slot(px, self.channels), px);
        self.px = px;
        self.px.write(output);
        self.count += 1;

        Ok((len, 1))
    }

    /// Decodes ops until the end marker or until fewer than `QOI_PADDING` bytes remain.
    ///
    /// Remaining bytes may hold the start of the end marker and must be
    /// prepended to the next range. `expected` is the pixel count declared by
    /// the header. `output` should fit every pixel the ops may produce.
    pub fn decode_range(
        &mut self,
        ops: &[u8],
        output: &mut [u8],
        expected: u64,
    ) -> Result<RangeProgress, DecodeError> {
        let mut progress = RangeProgress::default();

        while likely(ops.len() - progress.consumed >= QOI_PADDING) {
            let rest = &ops[progress.consumed..];

            if unlikely(rest[..QOI_PADDING] == QOI_FOOTER) {
                if self.count != expected {
                    return Err(DecodeError::PixelCountMismatch {
                        expected,
                        actual: self.count,
                    });
                }
                progress.consumed += QOI_PADDING;
                progress.finished = true;
                break;
            }

            let produced = self.count + Self::op_pixels(rest[0]) as u64;
            if unlikely(produced > expected) {
                return Err(DecodeError::PixelCountMismatch {
                    expected,
                    actual: produced,
                });
            }

            let (len, pixels) = self.decode_op(rest, &mut output[progress.written..])?;
            progress.consumed += len;
            progress.written += pixels * 4;
        }

        Ok(progress)
    }
}

#[cfg(all(test, feature = "alloc"))]
mod tests {
    use super::*;

    use alloc::{vec, vec::Vec};

    fn frame(qoi: Qoi, body: &[u8]) -> Vec<u8> {
        let mut bytes = qoi.header_bytes().to_vec();
        bytes.extend_from_slice(body);
        bytes.extend_from_slice(&QOI_FOOTER);
        bytes
    }

    fn decode_body(channels: Channels, body: &[u8], pixels: u64) -> Vec<u8> {
        let mut state = DecoderState::new(channels);
        let mut ops = body.to_vec();
        ops.extend_from_slice(&QOI_FOOTER);
        let mut output = vec![0; pixels as usize * 4];
        let progress = state.decode_range(&ops, &mut output, pixels).unwrap();
        assert!(progress.finished);
        assert_eq!(progress.consumed, ops.len());
        output.truncate(progress.written);
        output
    }

    #[test]
    fn header_roundtrip() {
        let qoi = Qoi::new(640, 480, Channels::Rgba, ColorSpace::Linear);
        assert_eq!(Qoi::decode_header(&qoi.header_bytes()), Ok(qoi));
    }

    #[test]
    fn header_errors() {
        let qoi = Qoi::new(1, 1, Channels::Rgb, ColorSpace::Srgb);
        let header = qoi.header_bytes();

        assert_eq!(
            Qoi::decode_header(&header[..13]),
            Err(DecodeError::DataIsTooSmall)
        );

        let mut bad = header;
        bad[0] = b'Q';
        assert_eq!(Qoi::decode_header(&bad), Err(DecodeError::InvalidMagic));

        let mut bad = header;
        bad[12] = 5;
        assert_eq!(
            Qoi::decode_header(&bad),
            Err(DecodeError::InvalidChannelsValue)
        );

        let mut bad = header;
        bad[13] = 2;
        assert_eq!(
            Qoi::decode_header(&bad),
            Err(DecodeError::InvalidColorSpaceValue)
        );
    }

    #[test]
    fn op_lengths() {
        assert_eq!(DecoderState::op_len(0xff), 5);
        assert_eq!(DecoderState::op_len(0xfe), 4);
        assert_eq!(DecoderState::op_len(0xbf), 2);
        assert_eq!(DecoderState::op_len(0x7f), 1);
        assert_eq!(DecoderState::op_len(0x35), 1);
        assert_eq!(DecoderState::op_len(0xfd), 1);

        assert_eq!(DecoderState::op_pixels(0xfd), 62);
        assert_eq!(DecoderState::op_pixels(0xc0), 1);
        assert_eq!(DecoderState::op_pixels(0xff), 1);
    }

    #[test]
    fn literals() {
        assert_eq!(
            decode_body(Channels::Rgba, &[0xff, 128, 128, 128, 128], 1),
            [128, 128, 128, 128]
        );
        assert_eq!(
            decode_body(Channels::Rgb, &[0xfe, 128, 128, 128], 1),
            [128, 128, 128, 255]
        );
        // Alpha is forced for 3-channel images.
        assert_eq!(
            decode_body(Channels::Rgb, &[0xff, 1, 2, 3, 4], 1),
            [1, 2, 3, 255]
        );
    }

    #[test]
    fn diff_and_luma() {
        assert_eq!(decode_body(Channels::Rgb, &[0x7f], 1), [1, 1, 1, 255]);
        assert_eq!(decode_body(Channels::Rgb, &[0x40], 1), [254, 254, 254, 255]);
        assert_eq!(decode_body(Channels::Rgb, &[0xa2, 0x88], 1), [2, 2, 2, 255]);
        assert_eq!(decode_body(Channels::Rgb, &[0xa0, 0xa8], 1), [2, 0, 0, 255]);
    }

    #[test]
    fn run_repeats_previous() {
        let mut expected = [0, 0, 0, 255].repeat(62);
        expected.extend_from_slice(&[0, 0, 0, 255]);
        assert_eq!(decode_body(Channels::Rgba, &[0xfd, 0xc0], 63), expected);

        let mut expected = vec![5, 6, 7, 8];
        expected.extend_from_slice(&[5, 6, 7, 8].repeat(3));
        assert_eq!(
            decode_body(Channels::Rgba, &[0xff, 5, 6, 7, 8, 0xc2], 4),
            expected
        );
    }

    #[test]
    fn index_reuses_cached_pixel() {
        let body = [0xfe, 128, 128, 128, 0xfe, 64, 1, 64, 53];
        assert_eq!(
            decode_body(Channels::Rgb, &body, 3),
            [128, 128, 128, 255, 64, 1, 64, 255, 128, 128, 128, 255]
        );

        let mut state = DecoderState::new(Channels::Rgb);
        let mut output = [0; 4];
        state.decode_op(&[0xfe, 9, 9, 9], &mut output).unwrap();
        let slot = PixelCache::slot(state.previous(), Channels::Rgb);
        state.decode_op(&[0x7f], &mut output).unwrap();
        assert_eq!(state.decode_op(&[slot], &mut output), Ok((1, 1)));
        assert_eq!(output, [9, 9, 9, 255]);
        assert_eq!(state.previous(), Rgba::from_array([9, 9, 9, 255]));
    }

    #[test]
    fn unwritten_slot_is_opaque_in_rgb() {
        assert_eq!(
            decode_body(Channels::Rgb, &[0x00, 0x7f], 2),
            [0, 0, 0, 255, 1, 1, 1, 255]
        );
        assert_eq!(
            decode_body(Channels::Rgba, &[0x00, 0x7f], 2),
            [0, 0, 0, 0, 1, 1, 1, 0]
        );

        let qoi = Qoi::new(2, 1, Channels::Rgb, ColorSpace::Srgb);
        let (_, pixels) = Qoi::decode_alloc(&frame(qoi, &[0x00, 0x7f])).unwrap();
        assert_eq!(pixels, [0, 0, 0, 255, 1, 1, 1, 255]);
    }

    #[test]
    fn footer_before_all_pixels() {
        let mut state = DecoderState::new(Channels::Rgb);
        let mut ops = vec![0xc0];
        ops.extend_from_slice(&QOI_FOOTER);
        let mut output = [0; 8];
        assert_eq!(
            state.decode_range(&ops, &mut output, 2),
            Err(DecodeError::PixelCountMismatch {
                expected: 2,
                actual: 1
            })
        );
    }

    #[test]
    fn too_many_pixels() {
        let mut state = DecoderState::new(Channels::Rgb);
        let mut ops = vec![0xc1];
        ops.extend_from_slice(&QOI_FOOTER);
        let mut output = [0; 8];
        assert_eq!(
            state.decode_range(&ops, &mut output, 1),
            Err(DecodeError::PixelCountMismatch {
                expected: 1,
                actual: 2
            })
        );
    }

    #[test]
    fn range_keeps_lookahead() {
        let mut state = DecoderState::new(Channels::Rgba);
        let ops = [0x7f, 0, 0, 0, 0, 0, 0, 0];
        let mut output = [0; 16];
        let progress = state.decode_range(&ops, &mut output, 10).unwrap();
        assert_eq!(
            progress,
            RangeProgress {
                consumed: 1,
                written: 4,
                finished: false
            }
        );
    }

    #[test]
    fn truncated_op() {
        let mut state = DecoderState::new(Channels::Rgba);
        let mut output = [0; 4];
        assert_eq!(
            state.decode_op(&[0xff, 1, 2], &mut output),
            Err(DecodeError::UnexpectedEnd)
        );
    }

    #[test]
    fn decode_alloc_whole_image() {
        let qoi = Qoi::new(3, 1, Channels::Rgba, ColorSpace::Srgb);
        let bytes = frame(qoi, &[0xff, 10, 20, 30, 40, 0xc1]);
        let (header, pixels) = Qoi::decode_alloc(&bytes).unwrap();
        assert_eq!(header, qoi);
        assert_eq!(pixels, [10, 20, 30, 40].repeat(3));
    }

    #[test]
    fn decode_alloc_errors() {
        let qoi = Qoi::new(1, 1, Channels::Rgb, ColorSpace::Srgb);

        assert_eq!(
            Qoi::decode_alloc(&qoi.header_bytes()),
            Err(DecodeError::DataIsTooSmall)
        );

        let mut bytes = frame(qoi, &[0xc0]);
        bytes.pop();
        assert_eq!(Qoi::decode_alloc(&bytes), Err(DecodeError::UnexpectedEnd));

        let bytes = frame(qoi, &[]);
        assert_eq!(
            Qoi::decode_alloc(&bytes),
            Err(DecodeError::PixelCountMismatch {
                expected: 1,
                actual: 0
            })
        );
    }

    #[test]
    fn trailing_bytes_are_ignored() {
        let qoi = Qoi::new(1, 1, Channels::Rgb, ColorSpace::Srgb);
        let mut bytes = frame(qoi, &[0x7f]);
        bytes.extend_from_slice(b"garbage");
        let (_, pixels) = Qoi::decode_alloc(&bytes).unwrap();
        assert_eq!(pixels, [1, 1, 1, 255]);
    }
}
