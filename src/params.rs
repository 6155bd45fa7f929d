//! Target encoding parameters.
//!
//! [`TranscodeParams`] describes what the output video should look like:
//! bitrate, H.264 profile and level, and optional resolution and frame rate
//! overrides. A value of `0` for width, height or fps means "inherit from the
//! source".
//!
//! # Example
//!
//! ```
//! use recode::{H264Profile, TranscodeParams};
//!
//! let params = TranscodeParams::default()
//!     .with_resolution(1280, 720)
//!     .with_fps(24)
//!     .with_profile(H264Profile::High);
//!
//! assert_eq!(params.bitrate, 2_000_000);
//! assert!(params.validate().is_ok());
//! ```

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use crate::error::TranscodeError;

/// H.264 profile.
///
/// The discriminants are the `profile_idc` values FFmpeg uses for the
/// corresponding `FF_PROFILE_H264_*` constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum H264Profile {
    /// Baseline profile.
    Baseline,
    /// Constrained baseline profile.
    ConstrainedBaseline,
    /// Main profile. This is the default.
    #[default]
    Main,
    /// Extended profile.
    Extended,
    /// High profile.
    High,
    /// High 10 profile.
    High10,
    /// High 4:2:2 profile.
    High422,
    /// High 4:4:4 predictive profile.
    High444Predictive,
}

impl H264Profile {
    /// The numeric profile value understood by FFmpeg.
    pub fn as_raw(self) -> i32 {
        match self {
            H264Profile::Baseline => 66,
            // FF_PROFILE_H264_CONSTRAINED is bit 9.
            H264Profile::ConstrainedBaseline => 66 | (1 << 9),
            H264Profile::Main => 77,
            H264Profile::Extended => 88,
            H264Profile::High => 100,
            H264Profile::High10 => 110,
            H264Profile::High422 => 122,
            H264Profile::High444Predictive => 244,
        }
    }

    /// Map a raw FFmpeg profile value back to a profile, if it is one of
    /// the supported variants.
    pub fn from_raw(value: i32) -> Option<Self> {
        [
            H264Profile::Baseline,
            H264Profile::ConstrainedBaseline,
            H264Profile::Main,
            H264Profile::Extended,
            H264Profile::High,
            H264Profile::High10,
            H264Profile::High422,
            H264Profile::High444Predictive,
        ]
        .into_iter()
        .find(|profile| profile.as_raw() == value)
    }

    fn name(self) -> &'static str {
        match self {
            H264Profile::Baseline => "baseline",
            H264Profile::ConstrainedBaseline => "constrained-baseline",
            H264Profile::Main => "main",
            H264Profile::Extended => "extended",
            H264Profile::High => "high",
            H264Profile::High10 => "high10",
            H264Profile::High422 => "high422",
            H264Profile::High444Predictive => "high444",
        }
    }
}

impl Display for H264Profile {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.name())
    }
}

impl FromStr for H264Profile {
    type Err = TranscodeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "baseline" => Ok(H264Profile::Baseline),
            "constrained-baseline" | "constrained_baseline" => {
                Ok(H264Profile::ConstrainedBaseline)
            }
            "main" => Ok(H264Profile::Main),
            "extended" => Ok(H264Profile::Extended),
            "high" => Ok(H264Profile::High),
            "high10" => Ok(H264Profile::High10),
            "high422" => Ok(H264Profile::High422),
            "high444" | "high444p" | "high444-predictive" => Ok(H264Profile::High444Predictive),
            other => Err(TranscodeError::InvalidParameters(format!(
                "unknown H.264 profile '{other}'"
            ))),
        }
    }
}

/// Target parameters for a transcode.
///
/// Immutable once a transcode begins: the engine borrows the value for the
/// whole run and hands it to each pipeline during configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeParams {
    /// Video bitrate in bits per second (default: 2 000 000).
    pub bitrate: usize,
    /// H.264 profile (default: [`H264Profile::Main`]).
    pub profile: H264Profile,
    /// H.264 level times ten, e.g. `41` for level 4.1 (default: 41).
    pub level: i32,
    /// Output width, `0` to keep the source width.
    pub width: u32,
    /// Output height, `0` to keep the source height.
    pub height: u32,
    /// Output frame rate, `0` to keep the source rate.
    pub fps: u32,
    /// Audio bitrate in bits per second (default: 128 000).
    pub audio_bitrate: usize,
}

impl Default for TranscodeParams {
    fn default() -> Self {
        Self {
            bitrate: 2_000_000,
            profile: H264Profile::Main,
            level: 41,
            width: 0,
            height: 0,
            fps: 0,
            audio_bitrate: 128_000,
        }
    }
}

impl TranscodeParams {
    /// Create parameters with the default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the video bitrate in bits per second.
    #[must_use]
    pub fn with_bitrate(mut self, bitrate: usize) -> Self {
        self.bitrate = bitrate;
        self
    }

    /// Set the H.264 profile.
    #[must_use]
    pub fn with_profile(mut self, profile: H264Profile) -> Self {
        self.profile = profile;
        self
    }

    /// Set the H.264 level (times ten).
    #[must_use]
    pub fn with_level(mut self, level: i32) -> Self {
        self.level = level;
        self
    }

    /// Set the output resolution. Either dimension may be `0` to inherit it.
    #[must_use]
    pub fn with_resolution(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Set the output frame rate, or `0` to inherit it.
    #[must_use]
    pub fn with_fps(mut self, fps: u32) -> Self {
        self.fps = fps;
        self
    }

    /// Set the audio bitrate in bits per second.
    #[must_use]
    pub fn with_audio_bitrate(mut self, audio_bitrate: usize) -> Self {
        self.audio_bitrate = audio_bitrate;
        self
    }

    /// Check that the parameters can be handed to an encoder.
    ///
    /// # Errors
    ///
    /// Returns [`TranscodeError::InvalidParameters`] for a zero bitrate, a
    /// non-positive level, or a width/height/fps too large for FFmpeg's
    /// signed fields.
    pub fn validate(&self) -> Result<(), TranscodeError> {
        if self.bitrate == 0 {
            return Err(TranscodeError::InvalidParameters(
                "bitrate must be greater than zero".to_string(),
            ));
        }
        if self.audio_bitrate == 0 {
            return Err(TranscodeError::InvalidParameters(
                "audio bitrate must be greater than zero".to_string(),
            ));
        }
        if self.level <= 0 {
            return Err(TranscodeError::InvalidParameters(format!(
                "level must be positive, got {}",
                self.level
            )));
        }
        for (name, value) in [("width", self.width), ("height", self.height), ("fps", self.fps)] {
            if value > i32::MAX as u32 {
                return Err(TranscodeError::InvalidParameters(format!(
                    "{name} {value} is out of range"
                )));
            }
        }
        // 4:2:0 chroma subsampling needs even dimensions.
        if self.width % 2 != 0 || self.height % 2 != 0 {
            return Err(TranscodeError::InvalidParameters(format!(
                "resolution {}x{} must use even dimensions",
                self.width, self.height
            )));
        }
        Ok(())
    }
}
