//! Input container access.
//!
//! [`Demuxer`] opens an input file, selects at most one video and one audio
//! stream using FFmpeg's "best stream" heuristic, and yields compressed
//! packets in container storage order.
//!
//! # Example
//!
//! ```no_run
//! use recode::{Demuxer, TranscodeError};
//!
//! let mut demuxer = Demuxer::open("input.mp4")?;
//! println!("video: {:?}", demuxer.video());
//! while let Some(packet) = demuxer.next_packet()? {
//!     println!("packet for stream {}", packet.stream());
//! }
//! # Ok::<(), TranscodeError>(())
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use ffmpeg_next::{Error as FfmpegError, Packet, format::context::Input};

use crate::error::TranscodeError;
use crate::stream::{MediaKind, StreamDescriptor};
use crate::timestamp::container_duration;

/// An opened input container with its selected streams.
pub struct Demuxer {
    path: PathBuf,
    input: Option<Input>,
    format_name: String,
    duration: Option<Duration>,
    video: StreamDescriptor,
    audio: Option<StreamDescriptor>,
}

impl Demuxer {
    /// Open `path` and select its streams.
    ///
    /// # Errors
    ///
    /// - [`TranscodeError::FileOpen`] if the container cannot be opened or
    ///   its video stream has no usable decoder.
    /// - [`TranscodeError::NoVideoStream`] if the container has no video
    ///   stream.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, TranscodeError> {
        let path = path.as_ref().to_path_buf();
        log::debug!("Opening input {}", path.display());

        ffmpeg_next::init().map_err(|error| TranscodeError::FileOpen {
            path: path.clone(),
            reason: format!("FFmpeg initialisation failed: {error}"),
        })?;

        let input = ffmpeg_next::format::input(&path).map_err(|error| TranscodeError::FileOpen {
            path: path.clone(),
            reason: error.to_string(),
        })?;

        let video_index = input
            .streams()
            .best(MediaKind::Video.media_type())
            .map(|stream| stream.index())
            .ok_or(TranscodeError::NoVideoStream)?;
        let audio_index = input
            .streams()
            .best(MediaKind::Audio.media_type())
            .map(|stream| stream.index());

        let video = input
            .stream(video_index)
            .ok_or(TranscodeError::NoVideoStream)
            .and_then(|stream| {
                StreamDescriptor::from_stream(&stream).map_err(|error| TranscodeError::FileOpen {
                    path: path.clone(),
                    reason: format!("video stream {video_index} is not decodable: {error}"),
                })
            })?
            .ok_or(TranscodeError::NoVideoStream)?;

        // Audio is optional, so an undecodable track is dropped instead of failing.
        let audio = audio_index
            .and_then(|index| input.stream(index))
            .and_then(|stream| match StreamDescriptor::from_stream(&stream) {
                Ok(descriptor) => descriptor,
                Err(error) => {
                    log::warn!(
                        "Ignoring audio stream {} of {}: {error}",
                        stream.index(),
                        path.display()
                    );
                    None
                }
            });

        let duration = container_duration(input.duration())
            .or(video.duration)
            .or_else(|| audio.as_ref().and_then(|audio| audio.duration));
        let format_name = input.format().name().to_string();

        log::debug!(
            "Selected video stream {} ({}) and audio stream {:?}; duration {:?}",
            video.index,
            video.codec_name,
            audio.as_ref().map(|audio| audio.index),
            duration,
        );

        Ok(Self {
            path,
            input: Some(input),
            format_name,
            duration,
            video,
            audio,
        })
    }

    /// Path the demuxer was opened with.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Short name of the container format, e.g. `"mov,mp4,m4a,3gp,3g2,mj2"`.
    pub fn format_name(&self) -> &str {
        &self.format_name
    }

    /// Total duration, if the container or the streams advertise one.
    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    /// The selected video stream.
    pub fn video(&self) -> &StreamDescriptor {
        &self.video
    }

    /// The selected audio stream, if any.
    pub fn audio(&self) -> Option<&StreamDescriptor> {
        self.audio.as_ref()
    }

    /// Selected streams, video first.
    pub fn streams(&self) -> Vec<&StreamDescriptor> {
        std::iter::once(&self.video).chain(self.audio.as_ref()).collect()
    }

    /// Read the next packet from any stream.
    ///
    /// Returns `Ok(None)` at end of input, and also after [`close`](Self::close).
    ///
    /// # Errors
    ///
    /// Returns [`TranscodeError::Read`] if the container is corrupt or the
    /// underlying I/O fails.
    pub fn next_packet(&mut self) -> Result<Option<Packet>, TranscodeError> {
        let Some(input) = self.input.as_mut() else {
            return Ok(None);
        };
        let mut packet = Packet::empty();
        match packet.read(input) {
            Ok(()) => Ok(Some(packet)),
            Err(FfmpegError::Eof) => Ok(None),
            Err(error) => Err(TranscodeError::Read(error.to_string())),
        }
    }

    /// Release the input container. Safe to call more than once.
    pub fn close(&mut self) {
        if self.input.take().is_some() {
            log::debug!("Closed input {}", self.path.display());
        }
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.input.is_none()
    }
}
