//! Progress reporting.
//!
//! The engine counts decoded video frames against an estimate of the total
//! and reports a percentage through a [`ProgressCallback`]. Reports are
//! throttled: at most one every 100 ms, and only when the value moved by at
//! least 0.1 points. A final `100.0` is always reported when a transcode
//! succeeds.
//!
//! Any `FnMut(f32)` closure is a callback. To stop a transcode early,
//! implement [`ProgressCallback`] and return [`ControlFlow::Break`]; the
//! engine then fails with [`TranscodeError::Cancelled`](crate::TranscodeError::Cancelled).
//!
//!
//! ```no_run
//! use recode::{TranscodeParams, Transcoder};
//!
//! let mut transcoder = Transcoder::new();
//! let ok = transcoder.transcode(
//!     "input.mkv",
//!     "output.mp4",
//!     &TranscodeParams::default(),
//!     |percent: f32| println!("{percent:.1}%"),
//! );
//! assert!(ok, "{:?}", transcoder.last_error());
//! ```

use std::ops::ControlFlow;
use std::time::{Duration, Instant};

use ffmpeg_next::Rational;

use crate::timestamp::rational_to_f64;

/// Frame total assumed when neither metadata nor duration gives one.
pub const FALLBACK_FRAME_ESTIMATE: u64 = 1000;

/// Minimum wall-clock time between two reports.
pub const REPORT_INTERVAL: Duration = Duration::from_millis(100);

/// Minimum change in percentage points between two reports.
pub const REPORT_STEP: f32 = 0.1;

/// A snapshot of transcode progress.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressInfo {
    /// Completion percentage in `[0, 100]`.
    pub percentage: f32,
    /// Video frames decoded so far.
    pub processed_frames: u64,
    /// Estimated total number of video frames.
    pub total_frames: u64,
    /// Wall-clock time since processing started.
    pub elapsed: Duration,
}

/// Receives progress updates on the thread running the transcode.
///
/// Implemented for every `FnMut(f32)`, which receives only the percentage
/// and never stops the transcode.
///
/// ```no_run
/// use std::ops::ControlFlow;
///
/// use recode::{ProgressCallback, ProgressInfo, TranscodeParams, Transcoder};
///
/// /// Give up after the first quarter.
/// struct FirstQuarter;
///
/// impl ProgressCallback for FirstQuarter {
///     fn on_progress(&mut self, info: &ProgressInfo) -> ControlFlow<()> {
///         if info.percentage >= 25.0 {
///             ControlFlow::Break(())
///         } else {
///             ControlFlow::Continue(())
///         }
///     }
/// }
///
/// let mut transcoder = Transcoder::new();
/// let ok = transcoder.transcode("input.mkv", "output.mp4", &TranscodeParams::default(), FirstQuarter);
/// assert!(!ok);
/// ```
pub trait ProgressCallback {
    /// Called with a non-decreasing percentage. Returning
    /// [`ControlFlow::Break`] while frames are still being processed stops
    /// the transcode; the final report of a finished transcode cannot.
    fn on_progress(&mut self, info: &ProgressInfo) -> ControlFlow<()>;
}

impl<F: FnMut(f32)> ProgressCallback for F {
    fn on_progress(&mut self, info: &ProgressInfo) -> ControlFlow<()> {
        self(info.percentage);
        ControlFlow::Continue(())
    }
}

/// Discards every update.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_progress(&mut self, _info: &ProgressInfo) -> ControlFlow<()> {
        ControlFlow::Continue(())
    }
}

/// Estimate how many video frames a stream holds.
///
/// Uses the container's frame count when it is known and positive, then
/// `duration × frame_rate`, then [`FALLBACK_FRAME_ESTIMATE`]. Never
/// returns 0.
///
/// ```
/// use std::time::Duration;
///
/// use ffmpeg_next::Rational;
/// use recode::estimate_total_frames;
///
/// assert_eq!(estimate_total_frames(Some(250), None, None), 250);
/// assert_eq!(
///     estimate_total_frames(None, Some(Duration::from_secs(10)), Some(Rational::new(30, 1))),
///     300
/// );
/// assert_eq!(estimate_total_frames(None, None, None), 1000);
/// ```
pub fn estimate_total_frames(
    frame_count: Option<u64>,
    duration: Option<Duration>,
    frame_rate: Option<Rational>,
) -> u64 {
    if let Some(count) = frame_count.filter(|&count| count > 0) {
        return count;
    }
    let from_duration = duration.zip(frame_rate).and_then(|(duration, rate)| {
        let frames = (duration.as_secs_f64() * rational_to_f64(rate)).round();
        (frames.is_finite() && frames >= 1.0).then_some(frames as u64)
    });
    from_duration.unwrap_or(FALLBACK_FRAME_ESTIMATE).max(1)
}

/// Frame counter with report throttling.
#[derive(Debug, Clone)]
pub struct ProgressState {
    total_frames: u64,
    processed_frames: u64,
    last_emitted: f32,
    last_emit_time: Option<Instant>,
    started: Instant,
}

impl ProgressState {
    /// Start tracking against an estimated total (raised to at least 1).
    pub fn new(total_frames: u64) -> Self {
        Self {
            total_frames: total_frames.max(1),
            processed_frames: 0,
            last_emitted: 0.0,
            last_emit_time: None,
            started: Instant::now(),
        }
    }

    /// Estimated total frames.
    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    /// Frames recorded so far.
    pub fn processed_frames(&self) -> u64 {
        self.processed_frames
    }

    /// Last percentage handed out by [`record_frames_at`](Self::record_frames_at)
    /// or [`finish`](Self::finish).
    pub fn last_emitted(&self) -> f32 {
        self.last_emitted
    }

    /// Current percentage, clamped to `[0, 100]`.
    pub fn percentage(&self) -> f32 {
        let raw = self.processed_frames as f64 / self.total_frames as f64 * 100.0;
        raw.clamp(0.0, 100.0) as f32
    }

    /// Record `frames` decoded frames observed at `now`.
    ///
    /// Returns the percentage to report, or `None` when the report is
    /// throttled.
    pub fn record_frames_at(&mut self, frames: u64, now: Instant) -> Option<f32> {
        if frames == 0 {
            return None;
        }
        self.processed_frames = self.processed_frames.saturating_add(frames);

        if let Some(last) = self.last_emit_time {
            if now.saturating_duration_since(last) < REPORT_INTERVAL {
                return None;
            }
        }
        let percentage = self.percentage();
        if percentage - self.last_emitted < REPORT_STEP {
            return None;
        }
        self.last_emitted = percentage;
        self.last_emit_time = Some(now);
        Some(percentage)
    }

    /// [`record_frames_at`](Self::record_frames_at) with the current time.
    pub fn record_frames(&mut self, frames: u64) -> Option<f32> {
        self.record_frames_at(frames, Instant::now())
    }

    /// Mark the transcode complete. Always returns `100.0`.
    pub fn finish(&mut self) -> f32 {
        self.last_emitted = 100.0;
        self.last_emit_time = Some(Instant::now());
        100.0
    }

    /// Build the snapshot handed to callbacks.
    pub fn info(&self, percentage: f32) -> ProgressInfo {
        ProgressInfo {
            percentage,
            processed_frames: self.processed_frames,
            total_frames: self.total_frames,
            elapsed: self.started.elapsed(),
        }
    }
}
