//! The transcode driver.
//!
//! [`Transcoder`] wires a [`Demuxer`], one [`StreamPipeline`] per selected
//! stream and a [`Muxer`] together and runs the packet loop:
//!
//! ```text
//! Idle → InputOpened → OutputOpened → CodecsInitialized → HeaderWritten
//!      → Processing → Finalized
//! ```
//!
//! Any failure moves the engine to [`EngineState::Failed`]. Every resource is
//! released before the call returns, whichever way it ends, and the trailer
//! is only written on success.
//!
//! # Example
//!
//! ```no_run
//! use recode::{NoProgress, TranscodeParams, Transcoder};
//!
//! let params = TranscodeParams::new().with_resolution(1280, 720).with_fps(24);
//! let mut transcoder = Transcoder::new();
//! if !transcoder.transcode("input.mov", "output.mp4", &params, NoProgress) {
//!     eprintln!("{}", transcoder.last_error().unwrap_or("unknown error"));
//! }
//! ```

use std::path::Path;
use std::time::{Duration, Instant};

use ffmpeg_next::Packet;

use crate::audio::AudioPipeline;
use crate::demux::Demuxer;
use crate::error::TranscodeError;
use crate::ffmpeg::FfmpegLogLevel;
use crate::mux::Muxer;
use crate::params::TranscodeParams;
use crate::pipeline::StreamPipeline;
use crate::progress::{ProgressCallback, ProgressState, estimate_total_frames};
use crate::stream::MediaKind;
use crate::video::VideoPipeline;

/// Where the engine is in a transcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// No transcode has started, or the engine is ready for the next one.
    Idle,
    /// The input is open and its streams are selected.
    InputOpened,
    /// The output container is created.
    OutputOpened,
    /// Every pipeline has its decoder and encoder open.
    CodecsInitialized,
    /// The container header is written.
    HeaderWritten,
    /// Packets are flowing.
    Processing,
    /// The trailer is written and the output is complete.
    Finalized,
    /// The last transcode failed; see [`Transcoder::last_error`].
    Failed,
}

/// Counters from a successful transcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranscodeSummary {
    /// Video frames decoded.
    pub video_frames: u64,
    /// Audio frames decoded.
    pub audio_frames: u64,
    /// Packets written to the output.
    pub packets_written: u64,
    /// Number of streams in the output.
    pub output_streams: usize,
    /// Wall-clock time of the whole transcode.
    pub elapsed: Duration,
}

/// Everything opened for one transcode. Dropping it releases all of it.
struct Session {
    demuxer: Demuxer,
    muxer: Option<Muxer>,
    pipelines: Vec<Box<dyn StreamPipeline>>,
}

impl Session {
    fn muxer(&mut self) -> Result<&mut Muxer, TranscodeError> {
        self.muxer
            .as_mut()
            .ok_or_else(|| TranscodeError::InvalidState("output is not open".to_string()))
    }

    fn close(&mut self) {
        for pipeline in &mut self.pipelines {
            pipeline.close();
        }
        if let Some(muxer) = self.muxer.as_mut() {
            muxer.close();
        }
        self.demuxer.close();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

/// Runs transcodes, one at a time.
///
/// The boolean [`transcode`](Self::transcode) keeps the message of the last
/// failure for [`last_error`](Self::last_error);
/// [`try_transcode`](Self::try_transcode) returns the typed error instead.
#[derive(Debug)]
pub struct Transcoder {
    format_hint: Option<String>,
    ffmpeg_log_level: Option<FfmpegLogLevel>,
    state: EngineState,
    last_error: Option<String>,
}

impl Default for Transcoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Transcoder {
    /// An idle engine that infers the output container from the path.
    pub fn new() -> Self {
        Self {
            format_hint: None,
            ffmpeg_log_level: None,
            state: EngineState::Idle,
            last_error: None,
        }
    }

    /// Force the output container format (an FFmpeg muxer name such as
    /// `"mp4"` or `"matroska"`).
    #[must_use]
    pub fn with_format_hint(mut self, format: impl Into<String>) -> Self {
        self.format_hint = Some(format.into());
        self
    }

    /// Set FFmpeg's own log level at the start of every transcode.
    #[must_use]
    pub fn with_ffmpeg_log_level(mut self, level: FfmpegLogLevel) -> Self {
        self.ffmpeg_log_level = Some(level);
        self
    }

    /// Current engine state.
    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Message of the last failed [`transcode`](Self::transcode), cleared when
    /// the next one starts.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Transcode `input` to `output`, returning whether it succeeded.
    ///
    /// On failure the reason is available from
    /// [`last_error`](Self::last_error) and is also logged at `error` level.
    pub fn transcode<I, O, P>(
        &mut self,
        input: I,
        output: O,
        params: &TranscodeParams,
        progress: P,
    ) -> bool
    where
        I: AsRef<Path>,
        O: AsRef<Path>,
        P: ProgressCallback,
    {
        match self.try_transcode(input, output, params, progress) {
            Ok(_) => true,
            Err(error) => {
                let message = error.to_string();
                log::error!("Transcode failed: {message}");
                self.last_error = Some(message);
                false
            }
        }
    }

    /// Transcode `input` to `output`.
    ///
    /// # Errors
    ///
    /// Returns the first [`TranscodeError`] encountered. Nothing is retried.
    pub fn try_transcode<I, O, P>(
        &mut self,
        input: I,
        output: O,
        params: &TranscodeParams,
        mut progress: P,
    ) -> Result<TranscodeSummary, TranscodeError>
    where
        I: AsRef<Path>,
        O: AsRef<Path>,
        P: ProgressCallback,
    {
        let input = input.as_ref();
        let output = output.as_ref();
        self.state = EngineState::Idle;
        self.last_error = None;

        log::info!("Transcoding {} → {}", input.display(), output.display());
        let started = Instant::now();

        let result = self.run(input, output, params, &mut progress, started);
        match &result {
            Ok(summary) => log::info!(
                "Finished {} in {:.2?}: {} video frames, {} audio frames, {} packets",
                output.display(),
                summary.elapsed,
                summary.video_frames,
                summary.audio_frames,
                summary.packets_written
            ),
            Err(_) => self.state = EngineState::Failed,
        }
        result
    }

    fn advance(&mut self, state: EngineState) {
        log::debug!("Engine {:?} → {:?}", self.state, state);
        self.state = state;
    }

    fn run<P: ProgressCallback>(
        &mut self,
        input: &Path,
        output: &Path,
        params: &TranscodeParams,
        progress: &mut P,
        started: Instant,
    ) -> Result<TranscodeSummary, TranscodeError> {
        params.validate()?;
        if let Some(level) = self.ffmpeg_log_level {
            level.apply();
        }

        let demuxer = Demuxer::open(input)?;
        self.advance(EngineState::InputOpened);

        let total_frames = estimate_total_frames(
            demuxer.video().frame_count,
            demuxer.duration(),
            demuxer.video().frame_rate,
        );
        let mut pipelines: Vec<Box<dyn StreamPipeline>> =
            vec![Box::new(VideoPipeline::new(demuxer.video().clone()))];
        if let Some(audio) = demuxer.audio() {
            pipelines.push(Box::new(AudioPipeline::new(audio.clone())));
        }
        let mut session = Session {
            demuxer,
            muxer: None,
            pipelines,
        };

        session.muxer = Some(Muxer::open(output, self.format_hint.as_deref())?);
        self.advance(EngineState::OutputOpened);

        let global_header = session.muxer()?.requires_global_header();
        for index in 0..session.pipelines.len() {
            let spec = session.pipelines[index].configure(params, global_header)?;
            let output_index = session.muxer()?.add_stream(&spec)?;
            session.pipelines[index].bind_output(output_index);
        }
        self.advance(EngineState::CodecsInitialized);

        session.muxer()?.write_header()?;
        self.advance(EngineState::HeaderWritten);

        let mut state = ProgressState::new(total_frames);
        let mut frames = FrameCounts::default();
        self.advance(EngineState::Processing);

        while let Some(packet) = session.demuxer.next_packet()? {
            let Some(pipeline) = session
                .pipelines
                .iter_mut()
                .find(|pipeline| pipeline.source_index() == packet.stream())
            else {
                log::trace!("Skipping packet from unselected stream {}", packet.stream());
                continue;
            };
            let kind = pipeline.kind();
            let produced = pipeline.submit_packet(&packet)?;
            let muxer = session
                .muxer
                .as_mut()
                .ok_or_else(|| TranscodeError::InvalidState("output is not open".to_string()))?;
            write_all(muxer, produced.packets)?;

            frames.add(kind, produced.frames);
            if kind == MediaKind::Video {
                if let Some(percentage) = state.record_frames(produced.frames)
                    && progress.on_progress(&state.info(percentage)).is_break()
                {
                    log::info!("Progress callback stopped the transcode at {percentage:.1}%");
                    return Err(TranscodeError::Cancelled);
                }
            }
        }
        log::debug!("End of input after {} video frames", frames.video);

        // Video first, then audio.
        for pipeline in &mut session.pipelines {
            let kind = pipeline.kind();
            let produced = pipeline.flush()?;
            let muxer = session
                .muxer
                .as_mut()
                .ok_or_else(|| TranscodeError::InvalidState("output is not open".to_string()))?;
            write_all(muxer, produced.packets)?;
            frames.add(kind, produced.frames);
            if kind == MediaKind::Video {
                state.record_frames(produced.frames);
            }
        }

        let muxer = session.muxer()?;
        muxer.write_trailer()?;
        let packets_written = muxer.packets_written();
        let output_streams = muxer.stream_count();
        self.advance(EngineState::Finalized);

        let percentage = state.finish();
        let _ = progress.on_progress(&state.info(percentage));

        session.close();
        Ok(TranscodeSummary {
            video_frames: frames.video,
            audio_frames: frames.audio,
            packets_written,
            output_streams,
            elapsed: started.elapsed(),
        })
    }
}

#[derive(Default)]
struct FrameCounts {
    video: u64,
    audio: u64,
}

impl FrameCounts {
    fn add(&mut self, kind: MediaKind, frames: u64) {
        match kind {
            MediaKind::Video => self.video += frames,
            MediaKind::Audio => self.audio += frames,
        }
    }
}

fn write_all(muxer: &mut Muxer, packets: Vec<Packet>) -> Result<(), TranscodeError> {
    for mut packet in packets {
        muxer.write_packet(&mut packet)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_engine_is_idle_without_error() {
        let transcoder = Transcoder::new();
        assert_eq!(transcoder.state(), EngineState::Idle);
        assert!(transcoder.last_error().is_none());
    }

    #[test]
    fn builders_record_options() {
        let transcoder = Transcoder::new()
            .with_format_hint("matroska")
            .with_ffmpeg_log_level(FfmpegLogLevel::Quiet);
        assert_eq!(transcoder.format_hint.as_deref(), Some("matroska"));
        assert_eq!(transcoder.ffmpeg_log_level, Some(FfmpegLogLevel::Quiet));
    }

    #[test]
    fn invalid_parameters_fail_before_opening_anything() {
        let mut transcoder = Transcoder::new();
        let params = TranscodeParams::new().with_bitrate(0);
        let mut reported = Vec::new();
        let ok = transcoder.transcode("missing.mp4", "out.mp4", &params, |percent: f32| {
            reported.push(percent);
        });
        assert!(!ok);
        assert!(reported.is_empty());
        assert_eq!(transcoder.state(), EngineState::Failed);
        assert!(transcoder.last_error().is_some_and(|message| message.contains("bitrate")));
    }

    #[test]
    fn frame_counts_split_by_kind() {
        let mut counts = FrameCounts::default();
        counts.add(MediaKind::Video, 3);
        counts.add(MediaKind::Audio, 5);
        counts.add(MediaKind::Video, 1);
        assert_eq!((counts.video, counts.audio), (4, 5));
    }
}
