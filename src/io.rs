use super::*;

use std::{
    io::{self, ErrorKind, Read, Write},
    vec,
};

/// Bytes requested from the reader per call.
const IO_CHUNK_SIZE: usize = 64 * 1024;

fn invalid_data<E>(err: E) -> io::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    io::Error::new(ErrorKind::InvalidData, err)
}

/// Reads into `buf`, retrying on interruption. Returns 0 at end of input.
fn read_chunk<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match reader.read(buf) {
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            result => return result,
        }
    }
}

impl Qoi {
    /// Encodes raw pixel data read from `reader` and writes QOI image into `writer`.
    ///
    /// Returns number of bytes written.
    pub fn encode_io<R, W>(&self, mut reader: R, mut writer: W) -> io::Result<u64>
    where
        R: Read,
        W: Write,
    {
        let mut encoder = StreamEncoder::new(*self);
        let mut buf = vec![0; IO_CHUNK_SIZE];
        let mut written = 0;

        loop {
            let n = read_chunk(&mut reader, &mut buf)?;
            if n == 0 {
                break;
            }

            let bytes = encoder.push(&buf[..n]).map_err(invalid_data)?;
            writer.write_all(bytes)?;
            written += bytes.len() as u64;
        }

        let bytes = encoder.finish().map_err(invalid_data)?;
        writer.write_all(bytes)?;
        written += bytes.len() as u64;

        writer.flush()?;
        Ok(written)
    }

    /// Decodes QOI image read from `reader` and writes raw pixel data into `writer`.
    ///
    /// Stops reading right after the end marker.
    pub fn decode_io<R, W>(mut reader: R, mut writer: W) -> io::Result<Qoi>
    where
        R: Read,
        W: Write,
    {
        let mut decoder = StreamDecoder::new();
        let mut buf = vec![0; IO_CHUNK_SIZE];

        while !decoder.is_finished() {
            let n = read_chunk(&mut reader, &mut buf)?;
            if n == 0 {
                break;
            }

            let pixels = decoder.push(&buf[..n]).map_err(invalid_data)?;
            writer.write_all(pixels)?;
        }

        let qoi = decoder.finish().map_err(invalid_data)?;
        writer.flush()?;
        Ok(qoi)
    }
}
