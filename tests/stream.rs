#![cfg(feature = "alloc")]

use std::{cell::Cell, rc::Rc};

use qoi_stream::{Channels, ColorSpace, DecodeError, EncodeError, Qoi};

/// Chunk source that counts pulls and reports when it is dropped.
struct Source {
    chunks: std::vec::IntoIter<Vec<u8>>,
    pulled: Rc<Cell<usize>>,
    dropped: Rc<Cell<bool>>,
}

impl Source {
    fn new(chunks: Vec<Vec<u8>>) -> (Self, Rc<Cell<usize>>, Rc<Cell<bool>>) {
        let pulled = Rc::new(Cell::new(0));
        let dropped = Rc::new(Cell::new(false));
        let source = Source {
            chunks: chunks.into_iter(),
            pulled: pulled.clone(),
            dropped: dropped.clone(),
        };
        (source, pulled, dropped)
    }
}

impl Iterator for Source {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Vec<u8>> {
        self.pulled.set(self.pulled.get() + 1);
        self.chunks.next()
    }
}

impl Drop for Source {
    fn drop(&mut self) {
        self.dropped.set(true);
    }
}

fn sample() -> (Qoi, Vec<u8>, Vec<u8>) {
    let qoi = Qoi::new(3, 2, Channels::Rgba, ColorSpace::Srgb);
    let pixels: Vec<u8> = [
        [1u8, 2, 3, 255],
        [1, 2, 3, 255],
        [2, 3, 4, 255],
        [90, 80, 70, 60],
        [1, 2, 3, 255],
        [0, 0, 0, 0],
    ]
    .concat();
    let encoded = qoi.encode_alloc(&pixels).unwrap();
    (qoi, pixels, encoded)
}

#[test]
fn decoder_releases_source_after_end_marker() {
    let (qoi, pixels, encoded) = sample();

    let mut chunks: Vec<Vec<u8>> = encoded.chunks(4).map(<[u8]>::to_vec).collect();
    let needed = chunks.len();
    chunks.push(b"trailing data".to_vec());
    chunks.push(b"more trailing data".to_vec());

    let (source, pulled, dropped) = Source::new(chunks);
    let mut stream = Qoi::decode_stream(source);

    let decoded: Vec<u8> = stream
        .by_ref()
        .collect::<Result<Vec<_>, _>>()
        .unwrap()
        .concat();

    assert_eq!(decoded, pixels);
    assert_eq!(stream.qoi(), Some(&qoi));
    assert!(dropped.get());
    assert_eq!(pulled.get(), needed);
}

#[test]
fn decoder_releases_source_on_error() {
    let (_, _, mut encoded) = sample();
    encoded[0] = b'x';

    let (source, pulled, dropped) = Source::new(vec![encoded, vec![1, 2, 3]]);
    let mut stream = Qoi::decode_stream(source);

    assert_eq!(stream.next(), Some(Err(DecodeError::InvalidMagic)));
    assert!(dropped.get());
    assert_eq!(stream.next(), None);
    assert_eq!(pulled.get(), 1);
}

#[test]
fn decoder_reports_missing_end_marker() {
    let (_, _, encoded) = sample();
    let cut = encoded[..encoded.len() - 3].to_vec();

    let (source, _, dropped) = Source::new(vec![cut]);
    let results: Vec<_> = Qoi::decode_stream(source).collect();

    assert!(dropped.get());
    assert_eq!(results.last(), Some(&Err(DecodeError::UnexpectedEnd)));
}

#[test]
fn encoder_releases_source_on_error() {
    let qoi = Qoi::new(1, 1, Channels::Rgb, ColorSpace::Srgb);
    let (source, pulled, dropped) = Source::new(vec![vec![0; 4], vec![0; 4], vec![0; 4]]);
    let results: Vec<_> = qoi.encode_stream(source).collect();

    assert!(dropped.get());
    assert_eq!(pulled.get(), 4);
    assert_eq!(
        results.last(),
        Some(&Err(EncodeError::PixelCountMismatch {
            expected: 1,
            actual: 3
        }))
    );
}

#[test]
fn dropping_stream_drops_source() {
    let (_, _, encoded) = sample();
    let (source, pulled, dropped) =
        Source::new(vec![encoded[..30].to_vec(), encoded[30..].to_vec()]);

    let mut stream = Qoi::decode_stream(source);
    stream.next().unwrap().unwrap();
    assert!(!dropped.get());
    assert_eq!(pulled.get(), 1);

    drop(stream);
    assert!(dropped.get());
}

#[test]
fn dropping_encode_stream_drops_source() {
    let (qoi, pixels, _) = sample();
    let (source, pulled, dropped) = Source::new(pixels.chunks(8).map(<[u8]>::to_vec).collect());

    let mut stream = qoi.encode_stream(source);
    let header = stream.next().unwrap().unwrap();
    assert_eq!(&header[..4], b"qoif");
    assert!(!stream.encoder().is_finished());
    assert!(!dropped.get());
    assert_eq!(pulled.get(), 1);

    drop(stream);
    assert!(dropped.get());
    assert_eq!(pulled.get(), 1);
}

#[test]
fn header_visible_before_pixels() {
    let (qoi, _, encoded) = sample();
    let (source, _, _) = Source::new(encoded.chunks(1).map(<[u8]>::to_vec).collect());

    let mut stream = Qoi::decode_stream(source);
    assert_eq!(stream.qoi(), None);

    let first = stream.next().unwrap().unwrap();
    assert_eq!(first.len(), 4);
    assert_eq!(stream.qoi(), Some(&qoi));
}
