//! Error types for the `recode` crate.
//!
//! This module defines [`TranscodeError`], the unified error type returned by
//! every fallible operation in the crate, and [`ErrorKind`], a fieldless
//! mirror of its variants for callers that want to branch on the failure
//! category without matching on payloads.
//!
//! All errors are fatal to the transcode in progress. The transient
//! "try again" and "end of stream" conditions reported by codecs are never
//! surfaced as errors; see [`Drain`](crate::Drain).

use std::{io::Error as IoError, path::PathBuf};

use ffmpeg_next::Error as FfmpegError;
use thiserror::Error;

use crate::stream::MediaKind;

/// The unified error type for all `recode` operations.
///
/// Variants carry enough context (paths, stream kinds and the upstream
/// FFmpeg message) to diagnose the failure from the message alone.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TranscodeError {
    /// The input container could not be opened or parsed.
    #[error("Failed to open media file at {path}: {reason}")]
    FileOpen {
        /// Path that was passed to [`crate::Demuxer::open`].
        path: PathBuf,
        /// Underlying reason the open failed.
        reason: String,
    },

    /// The input does not contain a decodable video stream.
    #[error("No video stream found in file")]
    NoVideoStream,

    /// No output container format could be chosen for the output path.
    #[error("Failed to create output container for {path}: {reason}")]
    OutputCreate {
        /// Requested output path.
        path: PathBuf,
        /// Underlying reason.
        reason: String,
    },

    /// The output file could not be opened for writing.
    #[error("Failed to open output file at {path}: {reason}")]
    OutputOpen {
        /// Requested output path.
        path: PathBuf,
        /// Underlying reason.
        reason: String,
    },

    /// An encoder or decoder could not be found or opened.
    #[error("Failed to open codec: {0}")]
    CodecOpen(String),

    /// The container header could not be written.
    #[error("Failed to write container header: {0}")]
    HeaderWrite(String),

    /// A packet could not be read from the input.
    #[error("Failed to read packet: {0}")]
    Read(String),

    /// The decoder rejected a packet or failed to produce a frame.
    #[error("Failed to decode {kind}: {reason}")]
    Decode {
        /// Stream kind being decoded.
        kind: MediaKind,
        /// Upstream reason.
        reason: String,
    },

    /// The encoder rejected a frame or failed to produce a packet.
    #[error("Failed to encode {kind}: {reason}")]
    Encode {
        /// Stream kind being encoded.
        kind: MediaKind,
        /// Upstream reason.
        reason: String,
    },

    /// A packet or the trailer could not be written to the output.
    #[error("Failed to write output: {0}")]
    Write(String),

    /// The caller supplied parameters that cannot be honoured.
    #[error("Invalid transcode parameters: {0}")]
    InvalidParameters(String),

    /// An operation was attempted in a lifecycle state that does not allow it.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The progress callback asked to stop.
    #[error("Transcode stopped by the progress callback")]
    Cancelled,

    /// An error originating from the FFmpeg libraries.
    #[error("FFmpeg error: {0}")]
    FfmpegError(String),

    /// An I/O error occurred while preparing files.
    #[error("I/O error: {0}")]
    IoError(#[from] IoError),
}

impl From<FfmpegError> for TranscodeError {
    fn from(error: FfmpegError) -> Self {
        TranscodeError::FfmpegError(error.to_string())
    }
}

/// Fieldless category of a [`TranscodeError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// See [`TranscodeError::FileOpen`].
    Open,
    /// See [`TranscodeError::NoVideoStream`].
    NoVideoStream,
    /// See [`TranscodeError::OutputCreate`].
    Create,
    /// See [`TranscodeError::OutputOpen`].
    WriteOpen,
    /// See [`TranscodeError::CodecOpen`].
    CodecOpen,
    /// See [`TranscodeError::HeaderWrite`].
    HeaderWrite,
    /// See [`TranscodeError::Read`].
    Read,
    /// See [`TranscodeError::Decode`].
    Decode,
    /// See [`TranscodeError::Encode`].
    Encode,
    /// See [`TranscodeError::Write`].
    Write,
    /// See [`TranscodeError::InvalidParameters`].
    InvalidParameters,
    /// See [`TranscodeError::InvalidState`].
    InvalidState,
    /// See [`TranscodeError::Cancelled`].
    Cancelled,
    /// See [`TranscodeError::FfmpegError`].
    Ffmpeg,
    /// See [`TranscodeError::IoError`].
    Io,
}

impl TranscodeError {
    /// The category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            TranscodeError::FileOpen { .. } => ErrorKind::Open,
            TranscodeError::NoVideoStream => ErrorKind::NoVideoStream,
            TranscodeError::OutputCreate { .. } => ErrorKind::Create,
            TranscodeError::OutputOpen { .. } => ErrorKind::WriteOpen,
            TranscodeError::CodecOpen(_) => ErrorKind::CodecOpen,
            TranscodeError::HeaderWrite(_) => ErrorKind::HeaderWrite,
            TranscodeError::Read(_) => ErrorKind::Read,
            TranscodeError::Decode { .. } => ErrorKind::Decode,
            TranscodeError::Encode { .. } => ErrorKind::Encode,
            TranscodeError::Write(_) => ErrorKind::Write,
            TranscodeError::InvalidParameters(_) => ErrorKind::InvalidParameters,
            TranscodeError::InvalidState(_) => ErrorKind::InvalidState,
            TranscodeError::Cancelled => ErrorKind::Cancelled,
            TranscodeError::FfmpegError(_) => ErrorKind::Ffmpeg,
            TranscodeError::IoError(_) => ErrorKind::Io,
        }
    }
}
