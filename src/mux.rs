//! Output container writing.
//!
//! [`Muxer`] owns the output file. Streams are added from the
//! [`OutputStreamSpec`] each pipeline produces, then packets are written in
//! whatever order the pipelines emit them and FFmpeg's interleaving writer
//! sorts them by timestamp.
//!
//! Lifecycle: [`open`](Muxer::open) → [`add_stream`](Muxer::add_stream) (one
//! per pipeline) → [`write_header`](Muxer::write_header) →
//! [`write_packet`](Muxer::write_packet)… → [`write_trailer`](Muxer::write_trailer)
//! → [`close`](Muxer::close). `close` may be called at any point, any number
//! of times.

use std::ffi::CString;
use std::path::{Path, PathBuf};
use std::ptr;

use ffmpeg_next::{
    Packet, Rational,
    codec::{Id, Parameters},
    format::{Flags as FormatFlags, context::Output},
};

use crate::error::TranscodeError;
use crate::stream::MediaKind;

/// Everything the muxer needs to create one output stream.
#[derive(Clone)]
pub struct OutputStreamSpec {
    /// Stream kind.
    pub kind: MediaKind,
    /// Codec of the packets that will be written.
    pub codec: Id,
    /// Codec parameters copied from the opened encoder.
    pub parameters: Parameters,
    /// Time base of the packets the encoder produces.
    pub time_base: Rational,
    /// Nominal frame rate, for video.
    pub frame_rate: Option<Rational>,
}

impl std::fmt::Debug for OutputStreamSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputStreamSpec")
            .field("kind", &self.kind)
            .field("codec", &self.codec)
            .field("time_base", &self.time_base)
            .field("frame_rate", &self.frame_rate)
            .finish_non_exhaustive()
    }
}

struct StreamSlot {
    kind: MediaKind,
    encoder_time_base: Rational,
    stream_time_base: Rational,
}

/// An output container being written.
pub struct Muxer {
    path: PathBuf,
    output: Option<Output>,
    slots: Vec<StreamSlot>,
    header_written: bool,
    trailer_written: bool,
    packets_written: u64,
}

impl Muxer {
    /// Create the output container at `path`.
    ///
    /// The container format is guessed from the file extension unless
    /// `format_hint` names one explicitly (e.g. `"mp4"`, `"matroska"`).
    ///
    /// # Errors
    ///
    /// - [`TranscodeError::OutputCreate`] if no container format matches.
    /// - [`TranscodeError::OutputOpen`] if the file cannot be opened for
    ///   writing.
    pub fn open<P: AsRef<Path>>(path: P, format_hint: Option<&str>) -> Result<Self, TranscodeError> {
        let path = path.as_ref().to_path_buf();
        log::debug!("Opening output {} (format hint {:?})", path.display(), format_hint);

        ffmpeg_next::init().map_err(|error| TranscodeError::OutputCreate {
            path: path.clone(),
            reason: format!("FFmpeg initialisation failed: {error}"),
        })?;

        if !output_format_exists(&path, format_hint) {
            return Err(TranscodeError::OutputCreate {
                path,
                reason: match format_hint {
                    Some(name) => format!("unknown container format '{name}'"),
                    None => "cannot infer a container format from the file extension".to_string(),
                },
            });
        }

        let output = match format_hint {
            Some(name) => ffmpeg_next::format::output_as(&path, name),
            None => ffmpeg_next::format::output(&path),
        }
        .map_err(|error| TranscodeError::OutputOpen {
            path: path.clone(),
            reason: error.to_string(),
        })?;

        Ok(Self {
            path,
            output: Some(output),
            slots: Vec::new(),
            header_written: false,
            trailer_written: false,
            packets_written: 0,
        })
    }

    fn output_mut(&mut self) -> Result<&mut Output, TranscodeError> {
        self.output
            .as_mut()
            .ok_or_else(|| TranscodeError::InvalidState("output is already closed".to_string()))
    }

    /// Whether encoders feeding this container must emit global headers
    /// (codec extradata) instead of in-band ones.
    pub fn requires_global_header(&self) -> bool {
        self.output
            .as_ref()
            .is_some_and(|output| output.format().flags().contains(FormatFlags::GLOBAL_HEADER))
    }

    /// Add an output stream and return its index.
    ///
    /// # Errors
    ///
    /// Returns [`TranscodeError::InvalidState`] once the header is written,
    /// or [`TranscodeError::FfmpegError`] if FFmpeg refuses the stream.
    pub fn add_stream(&mut self, spec: &OutputStreamSpec) -> Result<usize, TranscodeError> {
        if self.header_written {
            return Err(TranscodeError::InvalidState(
                "cannot add streams after the header is written".to_string(),
            ));
        }
        let output = self.output_mut()?;
        let mut stream = output.add_stream(ffmpeg_next::encoder::find(spec.codec))?;
        stream.set_parameters(spec.parameters.clone());
        stream.set_time_base(spec.time_base);
        if let Some(frame_rate) = spec.frame_rate {
            stream.set_rate(frame_rate);
            stream.set_avg_frame_rate(frame_rate);
        }
        let index = stream.index();

        log::debug!(
            "Added {} output stream {index} ({:?}, time base {:?})",
            spec.kind,
            spec.codec,
            spec.time_base
        );
        self.slots.push(StreamSlot {
            kind: spec.kind,
            encoder_time_base: spec.time_base,
            stream_time_base: spec.time_base,
        });
        Ok(index)
    }

    /// Write the container header.
    ///
    /// The container may replace the time base requested for each stream;
    /// the final values are recorded so packets can be rescaled.
    ///
    /// # Errors
    ///
    /// Returns [`TranscodeError::HeaderWrite`] on failure.
    pub fn write_header(&mut self) -> Result<(), TranscodeError> {
        if self.header_written {
            return Err(TranscodeError::InvalidState("header already written".to_string()));
        }
        let output = self.output_mut()?;
        output
            .write_header()
            .map_err(|error| TranscodeError::HeaderWrite(error.to_string()))?;

        let time_bases: Vec<Option<Rational>> = (0..self.slots.len())
            .map(|index| self.output.as_ref().and_then(|o| o.stream(index)).map(|s| s.time_base()))
            .collect();
        for (slot, time_base) in self.slots.iter_mut().zip(time_bases) {
            if let Some(time_base) = time_base {
                slot.stream_time_base = time_base;
            }
        }
        self.header_written = true;
        Ok(())
    }

    /// Write one encoded packet.
    ///
    /// The packet's stream index must be one returned by
    /// [`add_stream`](Self::add_stream) and its timestamps must be in that
    /// stream's encoder time base; they are rescaled to the container's
    /// time base here.
    ///
    /// # Errors
    ///
    /// Returns [`TranscodeError::Write`] if the container rejects the
    /// packet, or [`TranscodeError::InvalidState`] before the header.
    pub fn write_packet(&mut self, packet: &mut Packet) -> Result<(), TranscodeError> {
        if !self.header_written || self.trailer_written {
            return Err(TranscodeError::InvalidState(
                "packets can only be written between header and trailer".to_string(),
            ));
        }
        let index = packet.stream();
        let slot = self.slots.get(index).ok_or_else(|| {
            TranscodeError::Write(format!("packet targets unknown output stream {index}"))
        })?;
        packet.rescale_ts(slot.encoder_time_base, slot.stream_time_base);
        packet.set_position(-1);

        let kind = slot.kind;
        let output = self.output_mut()?;
        packet
            .write_interleaved(output)
            .map_err(|error| TranscodeError::Write(format!("{kind} packet: {error}")))?;
        self.packets_written += 1;
        Ok(())
    }

    /// Flush interleaving buffers and write the container trailer.
    ///
    /// # Errors
    ///
    /// Returns [`TranscodeError::Write`] on failure.
    pub fn write_trailer(&mut self) -> Result<(), TranscodeError> {
        if !self.header_written {
            return Err(TranscodeError::InvalidState(
                "trailer requires a written header".to_string(),
            ));
        }
        if self.trailer_written {
            return Ok(());
        }
        let output = self.output_mut()?;
        output
            .write_trailer()
            .map_err(|error| TranscodeError::Write(format!("trailer: {error}")))?;
        self.trailer_written = true;
        Ok(())
    }

    /// Number of packets accepted by [`write_packet`](Self::write_packet).
    pub fn packets_written(&self) -> u64 {
        self.packets_written
    }

    /// Number of output streams.
    pub fn stream_count(&self) -> usize {
        self.slots.len()
    }

    /// Whether the trailer has been written.
    pub fn is_finalized(&self) -> bool {
        self.trailer_written
    }

    /// Release the output file. Safe to call more than once and after a
    /// failure at any step; the trailer is not written here.
    pub fn close(&mut self) {
        if self.output.take().is_some() {
            log::debug!(
                "Closed output {} (trailer written: {})",
                self.path.display(),
                self.trailer_written
            );
        }
    }
}

impl Drop for Muxer {
    fn drop(&mut self) {
        self.close();
    }
}

/// Ask FFmpeg whether a muxer exists for `path` / `format_hint`.
///
/// An explicit hint is looked up by name alone; the file name only matters
/// when there is no hint.
fn output_format_exists(path: &Path, format_hint: Option<&str>) -> bool {
    let guessed = match format_hint {
        Some(name) => {
            let Ok(short_name) = CString::new(name) else {
                return false;
            };
            unsafe { ffmpeg_sys_next::av_guess_format(short_name.as_ptr(), ptr::null(), ptr::null()) }
        }
        None => {
            let Ok(file_name) = CString::new(path.to_string_lossy().as_bytes()) else {
                return false;
            };
            unsafe { ffmpeg_sys_next::av_guess_format(ptr::null(), file_name.as_ptr(), ptr::null()) }
        }
    };
    !guessed.is_null()
}
