//! Chunked encoding and decoding.
//!
//! Input may be split at any byte. Leftover bytes of a split pixel or op are
//! carried to the next chunk. Output buffers are reused between chunks and
//! sized to the worst case of each chunk up front.

use super::*;

use alloc::vec::Vec;

/// Largest number of pixels a single op may produce.
const QOI_MAX_OP_PIXELS: usize = QOI_MAX_RUN as usize;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase<E> {
    AwaitingHeader,
    Body,
    Finished,
    Failed(E),
}

/// Incremental QOI encoder.
///
/// Feed raw RGBA bytes with [`push`](Self::push), then call
/// [`finish`](Self::finish) once the input ends. Every call returns the
/// encoded bytes produced so far, borrowed from an internal buffer.
///
/// Any error is fatal: all later calls return the same error.
#[derive(Clone, Debug)]
pub struct StreamEncoder {
    qoi: Qoi,
    state: EncoderState,
    phase: Phase<EncodeError>,
    carry: [u8; 4],
    carry_len: usize,
    output: Vec<u8>,
}

impl StreamEncoder {
    pub fn new(qoi: Qoi) -> Self {
        StreamEncoder {
            qoi,
            state: EncoderState::new(qoi.channels),
            phase: Phase::AwaitingHeader,
            carry: [0; 4],
            carry_len: 0,
            output: Vec::new(),
        }
    }

    #[inline]
    pub fn qoi(&self) -> &Qoi {
        &self.qoi
    }

    #[inline]
    pub fn state(&self) -> &EncoderState {
        &self.state
    }

    /// Returns `true` after the end marker was written.
    #[inline]
    pub fn is_finished(&self) -> bool {
        self.phase == Phase::Finished
    }

    /// Encodes next chunk of raw pixel data.
    ///
    /// The first call also returns the header, even for an empty chunk.
    pub fn push(&mut self, chunk: &[u8]) -> Result<&[u8], EncodeError> {
        match self.encode_chunk(chunk) {
            Ok(size) => Ok(&self.output[..size]),
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Flushes pending run and writes the end marker.
    ///
    /// Fails if the input ended in the middle of a pixel or if the number of
    /// pixels differs from width * height.
    pub fn finish(&mut self) -> Result<&[u8], EncodeError> {
        match self.finish_body() {
            Ok(size) => Ok(&self.output[..size]),
            Err(err) => Err(self.fail(err)),
        }
    }

    fn fail(&mut self, err: EncodeError) -> EncodeError {
        if self.phase == Phase::Finished {
            return err;
        }
        if self.phase != Phase::Failed(err) {
            log::warn!("qoi: encoding {} failed: {}", self.qoi, err);
        }
        self.phase = Phase::Failed(err);
        err
    }

    fn check_phase(&self) -> Result<(), EncodeError> {
        match self.phase {
            Phase::Failed(err) => Err(err),
            Phase::Finished => Err(EncodeError::StreamFinished),
            Phase::AwaitingHeader | Phase::Body => Ok(()),
        }
    }

    /// Resizes output to `limit` bytes and writes the header if it is still due.
    fn prepare_output(&mut self, limit: usize) -> usize {
        self.output.clear();

        if self.phase == Phase::AwaitingHeader {
            self.output.resize(QOI_HEADER_SIZE + limit, 0);
            self.output[..QOI_HEADER_SIZE].copy_from_slice(&self.qoi.header_bytes());
            self.phase = Phase::Body;
            log::debug!("qoi: encoding {}", self.qoi);
            QOI_HEADER_SIZE
        } else {
            self.output.resize(limit, 0);
            0
        }
    }

    fn encode_chunk(&mut self, chunk: &[u8]) -> Result<usize, EncodeError> {
        self.check_phase()?;

        let pixels = (self.carry_len + chunk.len()) / 4;
        let mut size = self.prepare_output(encoded_range_limit(pixels));

        let mut chunk = chunk;

        if self.carry_len > 0 {
            let take = (4 - self.carry_len).min(chunk.len());
            self.carry[self.carry_len..self.carry_len + take].copy_from_slice(&chunk[..take]);
            self.carry_len += take;
            chunk = &chunk[take..];

            if self.carry_len < 4 {
                return Ok(size);
            }

            size += self
                .state
                .encode_range(&self.carry, &mut self.output[size..])?;
            self.carry_len = 0;
        }

        let (body, tail) = chunk.split_at(chunk.len() - chunk.len() % 4);
        size += self.state.encode_range(body, &mut self.output[size..])?;

        self.carry[..tail.len()].copy_from_slice(tail);
        self.carry_len = tail.len();

        log::trace!(
            "qoi: encoded {} bytes into {}, {} carried",
            chunk.len(),
            size,
            self.carry_len
        );

        Ok(size)
    }

    fn finish_body(&mut self) -> Result<usize, EncodeError> {
        self.check_phase()?;

        let mut size = self.prepare_output(1 + QOI_PADDING);

        if self.carry_len != 0 {
            return Err(EncodeError::InvalidPixelData);
        }

        size += self.state.flush(&mut self.output[size..])?;

        let expected = self.qoi.pixel_count();
        if self.state.count() != expected {
            return Err(EncodeError::PixelCountMismatch {
                expected,
                actual: self.state.count(),
            });
        }

        self.output[size..size + QOI_PADDING].copy_from_slice(&QOI_FOOTER);
        size += QOI_PADDING;

        self.phase = Phase::Finished;
        log::debug!("qoi: encoded {} pixels", expected);

        Ok(size)
    }
}

/// Incremental QOI decoder.
///
/// Feed encoded bytes with [`push`](Self::push), then call
/// [`finish`](Self::finish) once the input ends. Header is available from
/// [`qoi`](Self::qoi) as soon as its 14 bytes arrived. Bytes following the
/// end marker are ignored.
///
/// Any error is fatal: all later calls return the same error.
#[derive(Clone, Debug)]
pub struct StreamDecoder {
    qoi: Option<Qoi>,
    state: DecoderState,
    phase: Phase<DecodeError>,
    pending: Vec<u8>,
    output: Vec<u8>,
    received: usize,
}

impl Default for StreamDecoder {
    fn default() -> Self {
        StreamDecoder::new()
    }
}

impl StreamDecoder {
    pub fn new() -> Self {
        StreamDecoder {
            qoi: None,
            state: DecoderState::new(Channels::Rgba),
            phase: Phase::AwaitingHeader,
            pending: Vec::new(),
            output: Vec::new(),
            received: 0,
        }
    }

    /// Header, once decoded.
    #[inline]
    pub fn qoi(&self) -> Option<&Qoi> {
        self.qoi.as_ref()
    }

    #[inline]
    pub fn state(&self) -> &DecoderState {
        &self.state
    }

    /// Returns `true` after the end marker was consumed.
    #[inline]
    pub fn is_finished(&self) -> bool {
        self.phase == Phase::Finished
    }

    /// Decodes next chunk of encoded data.
    ///
    /// Returns pixels decoded from this chunk, 4 bytes per pixel.
    pub fn push(&mut self, chunk: &[u8]) -> Result<&[u8], DecodeError> {
        match self.decode_chunk(chunk) {
            Ok(size) => Ok(&self.output[..size]),
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Signals end of input.
    ///
    /// Returns the header if the end marker was consumed.
    pub fn finish(&mut self) -> Result<Qoi, DecodeError> {
        let result = match (self.phase, self.qoi) {
            (Phase::Failed(err), _) => Err(err),
            (Phase::Finished, Some(qoi)) => Ok(qoi),
            _ if self.received < QOI_MIN_SIZE => Err(DecodeError::DataIsTooSmall),
            _ => Err(DecodeError::UnexpectedEnd),
        };

        result.map_err(|err| self.fail(err))
    }

    fn fail(&mut self, err: DecodeError) -> DecodeError {
        if self.phase != Phase::Failed(err) {
            log::warn!("qoi: decoding failed: {}", err);
        }
        self.phase = Phase::Failed(err);
        self.pending = Vec::new();
        err
    }

    fn decode_chunk(&mut self, chunk: &[u8]) -> Result<usize, DecodeError> {
        match self.phase {
            Phase::Failed(err) => return Err(err),
            Phase::Finished => return Ok(0),
            Phase::AwaitingHeader | Phase::Body => {}
        }

        self.received += chunk.len();
        let mut chunk = chunk;

        let qoi = match self.qoi {
            Some(qoi) => qoi,
            None => {
                let take = (QOI_HEADER_SIZE - self.pending.len()).min(chunk.len());
                self.pending.extend_from_slice(&chunk[..take]);
                chunk = &chunk[take..];

                if self.pending.len() < QOI_HEADER_SIZE {
                    return Ok(0);
                }

                let qoi = Qoi::decode_header(&self.pending)?;
                log::debug!("qoi: decoding {}", qoi);

                self.qoi = Some(qoi);
                self.state = DecoderState::new(qoi.channels);
                self.phase = Phase::Body;
                self.pending.clear();
                qoi
            }
        };

        let expected = qoi.pixel_count();
        let remaining = expected - self.state.count();
        let limit = ((self.pending.len() + chunk.len()) as u64)
            .saturating_mul(QOI_MAX_OP_PIXELS as u64)
            .min(remaining)
            .saturating_mul(4);
        self.output.clear();
        self.output.resize(limit as usize, 0);

        let mut written = 0;
        let mut finished = false;

        // Carried bytes are fewer than `QOI_PADDING`. Joined with the head of
        // the chunk they hold every op that starts before the chunk does.
        if !self.pending.is_empty() {
            let carried = self.pending.len();
            let head = chunk.len().min(2 * QOI_PADDING - carried);
            self.pending.extend_from_slice(&chunk[..head]);

            let progress = self
                .state
                .decode_range(&self.pending, &mut self.output, expected)?;
            written = progress.written;
            finished = progress.finished;

            if progress.consumed >= carried {
                chunk = &chunk[progress.consumed - carried..];
                self.pending.clear();
            } else {
                // Whole chunk is already in `pending`.
                self.pending.drain(..progress.consumed);
                chunk = &chunk[chunk.len()..];
            }
        }

        if !finished {
            let progress = self
                .state
                .decode_range(chunk, &mut self.output[written..], expected)?;
            written += progress.written;
            finished = progress.finished;
            self.pending.extend_from_slice(&chunk[progress.consumed..]);
        }

        if finished {
            self.phase = Phase::Finished;
            self.pending = Vec::new();
            log::debug!("qoi: decoded {} pixels", expected);
        }

        log::trace!(
            "qoi: {} bytes received, {} decoded, {} carried",
            self.received,
            written,
            self.pending.len()
        );

        Ok(written)
    }
}

/// Iterator encoding chunks pulled from a source.
///
/// Created by [`Qoi::encode_stream`]. The source is dropped as soon as the
/// image is finished or an error occurs, so no more chunks are requested.
/// Dropping the iterator drops the source too.
pub struct EncodeStream<I> {
    source: Option<I>,
    encoder: StreamEncoder,
}

impl<I> EncodeStream<I> {
    #[inline]
    pub fn encoder(&self) -> &StreamEncoder {
        &self.encoder
    }
}

impl<I, B> Iterator for EncodeStream<I>
where
    I: Iterator<Item = B>,
    B: AsRef<[u8]>,
{
    type Item = Result<Vec<u8>, EncodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let source = self.source.as_mut()?;

            let result = match source.next() {
                Some(chunk) => self.encoder.push(chunk.as_ref()).map(<[u8]>::to_vec),
                None => {
                    self.source = None;
                    return Some(self.encoder.finish().map(<[u8]>::to_vec));
                }
            };

            match result {
                Ok(bytes) if bytes.is_empty() => continue,
                Ok(bytes) => return Some(Ok(bytes)),
                Err(err) => {
                    self.source = None;
                    return Some(Err(err));
                }
            }
        }
    }
}

/// Iterator decoding chunks pulled from a source.
///
/// Created by [`Qoi::decode_stream`]. The source is dropped once the end
/// marker is consumed or an error occurs, so trailing data is never pulled.
/// Dropping the iterator drops the source too.
pub struct DecodeStream<I> {
    source: Option<I>,
    decoder: StreamDecoder,
}

impl<I> DecodeStream<I> {
    /// Header, once decoded.
    #[inline]
    pub fn qoi(&self) -> Option<&Qoi> {
        self.decoder.qoi()
    }

    #[inline]
    pub fn decoder(&self) -> &StreamDecoder {
        &self.decoder
    }
}

impl<I, B> Iterator for DecodeStream<I>
where
    I: Iterator<Item = B>,
    B: AsRef<[u8]>,
{
    type Item = Result<Vec<u8>, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let source = self.source.as_mut()?;

            let result = match source.next() {
                Some(chunk) => self.decoder.push(chunk.as_ref()).map(<[u8]>::to_vec),
                None => {
                    self.source = None;
                    return match self.decoder.finish() {
                        Ok(_) => None,
                        Err(err) => Some(Err(err)),
                    };
                }
            };

            if result.is_err() || self.decoder.is_finished() {
                self.source = None;
            }

            match result {
                Ok(pixels) if pixels.is_empty() => continue,
                result => return Some(result),
            }
        }
    }
}

impl Qoi {
    /// Encodes raw pixel chunks pulled from `source`.
    ///
    /// Yields encoded chunks. The last item is the end marker or an error.
    pub fn encode_stream<I>(&self, source: I) -> EncodeStream<I::IntoIter>
    where
        I: IntoIterator,
        I::Item: AsRef<[u8]>,
    {
        EncodeStream {
            source: Some(source.into_iter()),
            encoder: StreamEncoder::new(*self),
        }
    }

    /// Decodes encoded chunks pulled from `source`.
    ///
    /// Yields decoded pixel chunks, 4 bytes per pixel.
    pub fn decode_stream<I>(source: I) -> DecodeStream<I::IntoIter>
    where
        I: IntoIterator,
        I::Item: AsRef<[u8]>,
    {
        DecodeStream {
            source: Some(source.into_iter()),
            decoder: StreamDecoder::new(),
        }
    }
}
