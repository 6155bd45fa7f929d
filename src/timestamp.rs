//! Timestamp arithmetic.
//!
//! Packets and frames carry timestamps as integers counted in a stream's
//! time base. Moving a frame from a decoder to an encoder means rescaling
//! that integer from one time base to another. Two rounding modes are used:
//!
//! - [`rescale_rounded`] rounds to the nearest value with ties going to the
//!   even neighbour, passes the `i64::MIN`/`i64::MAX` sentinels through
//!   untouched, and clamps anything else that overflows. The video path uses
//!   this.
//! - [`rescale`] is FFmpeg's own `av_rescale_q`: round to nearest with ties
//!   away from zero. The audio path uses this.
//!
//! FFmpeg has no round-half-to-even mode, so [`rescale_rounded`] is computed
//! here in 128-bit integer arithmetic; large timestamps in fine time bases
//! (1/90000, 1/48000) cannot overflow an intermediate product.

use std::time::Duration;

use ffmpeg_next::{Rational, Rescale, Rounding};

/// Microseconds per second, FFmpeg's `AV_TIME_BASE`.
pub const AV_TIME_BASE: i64 = 1_000_000;

/// Reduce `value * from / to` to a single fraction with a positive
/// denominator. `None` for degenerate time bases.
fn fraction(value: i64, from: Rational, to: Rational) -> Option<(i128, i128)> {
    let mut numerator =
        value as i128 * from.numerator() as i128 * to.denominator() as i128;
    let mut denominator = from.denominator() as i128 * to.numerator() as i128;
    if denominator == 0 || from.numerator() == 0 {
        return None;
    }
    if denominator < 0 {
        numerator = -numerator;
        denominator = -denominator;
    }
    Some((numerator, denominator))
}

fn clamp_to_i64(value: i128) -> i64 {
    // i64::MIN is reserved for "no timestamp", so saturate one above it.
    value.clamp(i64::MIN as i128 + 1, i64::MAX as i128) as i64
}

/// Rescale `value` from time base `from` to time base `to`, rounding
/// half-to-even.
///
/// `i64::MIN` and `i64::MAX` are returned unchanged. Results outside the
/// `i64` range saturate. Degenerate time bases (zero numerator or
/// denominator) leave the value unchanged.
///
/// # Example
///
/// ```
/// use ffmpeg_next::{Rational, Rescale, Rounding};
/// use recode::rescale_rounded;
///
/// // 1/30 s expressed in 1/90000 units.
/// assert_eq!(rescale_rounded(1, Rational::new(1, 30), Rational::new(1, 90000)), 3000);
/// // 2.5 rounds to 2, 3.5 rounds to 4.
/// assert_eq!(rescale_rounded(5, Rational::new(1, 2), Rational::new(1, 1)), 2);
/// assert_eq!(rescale_rounded(7, Rational::new(1, 2), Rational::new(1, 1)), 4);
/// ```
pub fn rescale_rounded(value: i64, from: Rational, to: Rational) -> i64 {
    if value == i64::MIN || value == i64::MAX {
        return value;
    }
    let Some((numerator, denominator)) = fraction(value, from, to) else {
        return value;
    };

    let quotient = numerator.div_euclid(denominator);
    let twice_remainder = numerator.rem_euclid(denominator) * 2;
    let rounded = if twice_remainder > denominator
        || (twice_remainder == denominator && quotient % 2 != 0)
    {
        quotient + 1
    } else {
        quotient
    };
    clamp_to_i64(rounded)
}

/// Rescale `value` from time base `from` to time base `to`, rounding to
/// nearest with ties away from zero.
///
/// Degenerate time bases leave the value unchanged.
///
/// # Example
///
/// ```
/// use ffmpeg_next::{Rational, Rescale, Rounding};
/// use recode::rescale;
///
/// assert_eq!(rescale(1024, Rational::new(1, 48000), Rational::new(1, 44100)), 941);
/// assert_eq!(rescale(-5, Rational::new(1, 2), Rational::new(1, 1)), -3);
/// ```
pub fn rescale(value: i64, from: Rational, to: Rational) -> i64 {
    let degenerate = [from, to]
        .iter()
        .any(|base| base.numerator() == 0 || base.denominator() == 0);
    if degenerate {
        return value;
    }
    value.rescale_with(from, to, Rounding::NearInfinity)
}

/// Length of one frame at `frame_rate`, expressed in `time_base` units.
///
/// Never less than 1, so that stepping by it always advances.
pub fn frame_duration(frame_rate: Rational, time_base: Rational) -> i64 {
    if frame_rate.numerator() <= 0 || frame_rate.denominator() <= 0 {
        return 1;
    }
    let period = Rational::new(frame_rate.denominator(), frame_rate.numerator());
    rescale_rounded(1, period, time_base).max(1)
}

/// Convert a rational to a float, `0.0` when the denominator is zero.
pub fn rational_to_f64(value: Rational) -> f64 {
    if value.denominator() == 0 {
        0.0
    } else {
        value.numerator() as f64 / value.denominator() as f64
    }
}

/// Convert a container-level duration in `AV_TIME_BASE` units.
///
/// `None` for unknown (negative or sentinel) values.
pub fn container_duration(duration: i64) -> Option<Duration> {
    if duration <= 0 || duration == i64::MAX {
        return None;
    }
    Some(Duration::from_micros(duration as u64))
}

/// Convert a stream-level timestamp or duration to wall time.
///
/// `None` for negative values or a degenerate time base.
pub fn stream_duration(value: i64, time_base: Rational) -> Option<Duration> {
    if value < 0 || value == i64::MAX || time_base.denominator() <= 0 {
        return None;
    }
    let micros = rescale(value, time_base, Rational::new(1, AV_TIME_BASE as i32));
    u64::try_from(micros).ok().map(Duration::from_micros)
}

/// Source of timestamps for frames that arrive without one.
///
/// The clock remembers where the last real timestamp left off so that a
/// synthetic value continues the sequence instead of restarting at zero.
/// Every pipeline owns one and resets it when it is configured.
#[derive(Debug, Clone, Default)]
pub struct SyntheticClock {
    next: i64,
}

impl SyntheticClock {
    /// A clock starting at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restart at zero.
    pub fn reset(&mut self) {
        self.next = 0;
    }

    /// Note that a real timestamp `pts` lasting `step` was emitted.
    pub fn observe(&mut self, pts: i64, step: i64) {
        self.next = pts.saturating_add(step.max(0));
    }

    /// Hand out the next synthetic timestamp and advance by `step`.
    pub fn tick(&mut self, step: i64) -> i64 {
        let current = self.next;
        self.next = current.saturating_add(step.max(1));
        current
    }

    /// The value the next [`tick`](Self::tick) will return.
    pub fn peek(&self) -> i64 {
        self.next
    }
}
