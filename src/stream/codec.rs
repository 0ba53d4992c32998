//! NDJSON codec for the CLI stdout stream.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] with a maximum line length to
//! prevent memory exhaustion caused by unterminated or runaway output from
//! a misbehaving child process. Use as the codec parameter for
//! [`tokio_util::codec::FramedRead`] over the child's stdout.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, LinesCodec, LinesCodecError};

use crate::{AppError, Result};

/// Maximum line length accepted from the child: 1 MiB.
///
/// Lines exceeding this limit cause [`StreamCodec::decode`] to return
/// [`AppError::Stream`] with `"line too long"` rather than allocating
/// unbounded memory for a single message.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// Line-framing codec for the CLI's newline-delimited JSON stream.
///
/// Delegates to [`LinesCodec`] with a fixed [`MAX_LINE_BYTES`] limit. Each
/// `\n`-terminated UTF-8 string is one complete outer message.
#[derive(Debug)]
pub struct StreamCodec(LinesCodec);

impl StreamCodec {
    /// Create a new codec with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self(LinesCodec::new_with_max_length(MAX_LINE_BYTES))
    }
}

impl Default for StreamCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for StreamCodec {
    type Item = String;
    type Error = AppError;

    /// Decode the next newline-terminated line from `src`.
    ///
    /// Returns `Ok(None)` when `src` contains no complete line yet.
    /// Returns `Err(AppError::Stream("line too long: …"))` when the line
    /// exceeds [`MAX_LINE_BYTES`].
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.0.decode(src).map_err(map_codec_error)
    }

    /// Decode the final unterminated line when the stream reaches EOF.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.0.decode_eof(src).map_err(map_codec_error)
    }
}

fn map_codec_error(e: LinesCodecError) -> AppError {
    match e {
        LinesCodecError::MaxLineLengthExceeded => {
            AppError::Stream(format!("line too long: exceeded {MAX_LINE_BYTES} bytes"))
        }
        LinesCodecError::Io(io_err) => AppError::Io(io_err.to_string()),
    }
}
