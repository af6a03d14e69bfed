//! Newline framing that survives oversized lines.
//!
//! `LinesCodec` reports an over-long line as a decode error, and `FramedRead`
//! ends the stream after any decode error. [`LineCodec`] turns that case into
//! a [`Frame::Oversized`] item so the connection keeps going; the inner codec
//! already discards input up to the next newline.

use std::io;

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

/// One decoded unit of inbound traffic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    Line(String),
    /// A line longer than the limit was dropped.
    Oversized,
}

#[derive(Clone, Debug)]
pub struct LineCodec {
    inner: LinesCodec,
    max_length: usize,
}

impl LineCodec {
    pub fn new(max_length: usize) -> Self {
        Self {
            inner: LinesCodec::new_with_max_length(max_length),
            max_length,
        }
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }
}

fn to_frame(decoded: Result<Option<String>, LinesCodecError>) -> Result<Option<Frame>, io::Error> {
    match decoded {
        Ok(line) => Ok(line.map(Frame::Line)),
        Err(LinesCodecError::MaxLineLengthExceeded) => Ok(Some(Frame::Oversized)),
        Err(LinesCodecError::Io(e)) => Err(e),
    }
}

impl Decoder for LineCodec {
    type Item = Frame;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, io::Error> {
        to_frame(self.inner.decode(buf))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, io::Error> {
        to_frame(self.inner.decode_eof(buf))
    }
}

impl<T: AsRef<str>> Encoder<T> for LineCodec {
    type Error = io::Error;

    fn encode(&mut self, line: T, buf: &mut BytesMut) -> Result<(), io::Error> {
        self.inner.encode(line, buf).map_err(|e| match e {
            LinesCodecError::Io(e) => e,
            LinesCodecError::MaxLineLengthExceeded => {
                io::Error::new(io::ErrorKind::InvalidInput, "line too long")
            }
        })
    }
}
