//! Decoder and encoder wrappers with feed/drain semantics.
//!
//! FFmpeg's send/receive codec API reports two transient conditions through
//! its error channel: `EAGAIN` ("give me more input" or "drain me first") and
//! `EOF` ("fully flushed"). Neither is a failure. [`Drain`] folds them into a
//! three-way outcome so that pipeline loops read naturally:
//!
//! ```ignore
//! while decoder.drain(&mut frame)? == Drain::Produced {
//!     // use frame
//! }
//! ```
//!
//! [`DecoderContext`] and [`EncoderContext`] wrap one opened FFmpeg codec
//! each and tag every real failure with the stream kind.

use ffmpeg_next::{
    Error as FfmpegError, Frame, Packet,
    codec::{Id, decoder, encoder},
    util::error::EAGAIN,
};

use crate::error::TranscodeError;
use crate::stream::MediaKind;

/// Output codec for video streams.
pub const VIDEO_CODEC: Id = Id::H264;

/// Output codec for audio streams.
pub const AUDIO_CODEC: Id = Id::AAC;

/// Outcome of one receive attempt on a codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Drain {
    /// A frame or packet was written into the output buffer.
    Produced,
    /// Nothing available until more input is fed.
    Pending,
    /// The codec is fully flushed.
    Finished,
}

/// Classify the result of a receive call.
///
/// `EAGAIN` maps to [`Drain::Pending`] and end-of-file to
/// [`Drain::Finished`]; every other error is returned unchanged.
pub fn drain_status(result: Result<(), FfmpegError>) -> Result<Drain, FfmpegError> {
    match result {
        Ok(()) => Ok(Drain::Produced),
        Err(FfmpegError::Other { errno }) if errno == EAGAIN => Ok(Drain::Pending),
        Err(FfmpegError::Eof) => Ok(Drain::Finished),
        Err(error) => Err(error),
    }
}

/// An opened FFmpeg decoder of either kind.
pub trait DecodeUnit {
    /// The kind-agnostic decoder.
    fn base(&mut self) -> &mut decoder::Opened;
}

impl DecodeUnit for decoder::Video {
    fn base(&mut self) -> &mut decoder::Opened {
        self
    }
}

impl DecodeUnit for decoder::Audio {
    fn base(&mut self) -> &mut decoder::Opened {
        self
    }
}

/// An opened FFmpeg encoder of either kind.
pub trait EncodeUnit {
    /// The kind-agnostic encoder.
    fn base(&mut self) -> &mut encoder::Encoder;
}

impl EncodeUnit for encoder::Video {
    fn base(&mut self) -> &mut encoder::Encoder {
        self
    }
}

impl EncodeUnit for encoder::Audio {
    fn base(&mut self) -> &mut encoder::Encoder {
        self
    }
}

/// One opened decoder for one stream kind.
pub struct DecoderContext<U> {
    unit: U,
    kind: MediaKind,
    flushed: bool,
}

impl<U: DecodeUnit> DecoderContext<U> {
    pub(crate) fn new(unit: U, kind: MediaKind) -> Self {
        Self {
            unit,
            kind,
            flushed: false,
        }
    }

    fn error(&self, reason: impl ToString) -> TranscodeError {
        TranscodeError::Decode {
            kind: self.kind,
            reason: reason.to_string(),
        }
    }

    /// Submit one compressed packet.
    ///
    /// A full input queue (`EAGAIN`) is reported as `Ok(false)`; callers
    /// must drain before retrying.
    pub fn feed(&mut self, packet: &Packet) -> Result<bool, TranscodeError> {
        match self.unit.base().send_packet(packet) {
            Ok(()) => Ok(true),
            Err(FfmpegError::Other { errno }) if errno == EAGAIN => Ok(false),
            Err(error) => Err(self.error(error)),
        }
    }

    /// Signal end of input. Subsequent calls are no-ops.
    pub fn finish(&mut self) -> Result<(), TranscodeError> {
        if self.flushed {
            return Ok(());
        }
        self.flushed = true;
        match self.unit.base().send_eof() {
            Ok(()) | Err(FfmpegError::Eof) => Ok(()),
            Err(error) => Err(self.error(error)),
        }
    }

    /// Receive the next decoded frame into `frame`.
    pub fn drain(&mut self, frame: &mut Frame) -> Result<Drain, TranscodeError> {
        let result = self.unit.base().receive_frame(frame);
        drain_status(result).map_err(|error| self.error(error))
    }

    /// The wrapped decoder.
    pub fn unit(&self) -> &U {
        &self.unit
    }
}

/// One opened encoder for one stream kind.
pub struct EncoderContext<U> {
    unit: U,
    kind: MediaKind,
    flushed: bool,
}

impl<U: EncodeUnit> EncoderContext<U> {
    pub(crate) fn new(unit: U, kind: MediaKind) -> Self {
        Self {
            unit,
            kind,
            flushed: false,
        }
    }

    fn error(&self, reason: impl ToString) -> TranscodeError {
        TranscodeError::Encode {
            kind: self.kind,
            reason: reason.to_string(),
        }
    }

    /// Submit one raw frame.
    ///
    /// A full input queue (`EAGAIN`) is reported as `Ok(false)`; callers
    /// must drain before retrying.
    pub fn feed(&mut self, frame: &Frame) -> Result<bool, TranscodeError> {
        match self.unit.base().send_frame(frame) {
            Ok(()) => Ok(true),
            Err(FfmpegError::Other { errno }) if errno == EAGAIN => Ok(false),
            Err(error) => Err(self.error(error)),
        }
    }

    /// Signal end of input. Subsequent calls are no-ops.
    pub fn finish(&mut self) -> Result<(), TranscodeError> {
        if self.flushed {
            return Ok(());
        }
        self.flushed = true;
        match self.unit.base().send_eof() {
            Ok(()) | Err(FfmpegError::Eof) => Ok(()),
            Err(error) => Err(self.error(error)),
        }
    }

    /// Receive the next encoded packet into `packet`.
    pub fn drain(&mut self, packet: &mut Packet) -> Result<Drain, TranscodeError> {
        let result = self.unit.base().receive_packet(packet);
        drain_status(result).map_err(|error| self.error(error))
    }

    /// The wrapped encoder.
    pub fn unit(&self) -> &U {
        &self.unit
    }
}
