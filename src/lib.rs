//! # recode
//!
//! Streaming video transcoder. Re-encodes the video of a media file to
//! H.264 and its audio (if any) to AAC, writes them to a new container and
//! reports progress along the way. Codec and container work is done by
//! FFmpeg through the [`ffmpeg-next`](https://crates.io/crates/ffmpeg-next)
//! crate.
//!
//! ## Quick Start
//!
//! ```no_run
//! use recode::{TranscodeParams, Transcoder};
//!
//! let mut transcoder = Transcoder::new();
//! let ok = transcoder.transcode(
//!     "input.mkv",
//!     "output.mp4",
//!     &TranscodeParams::default(),
//!     |percent: f32| eprint!("\r{percent:5.1}%"),
//! );
//! if !ok {
//!     eprintln!("transcode failed: {}", transcoder.last_error().unwrap_or_default());
//! }
//! ```
//!
//! ### Typed errors
//!
//! ```no_run
//! use recode::{ErrorKind, NoProgress, TranscodeParams, Transcoder};
//!
//! let params = TranscodeParams::new().with_resolution(1280, 720).with_fps(24);
//! match Transcoder::new().try_transcode("in.mov", "out.mkv", &params, NoProgress) {
//!     Ok(summary) => println!("{} frames in {:?}", summary.video_frames, summary.elapsed),
//!     Err(error) if error.kind() == ErrorKind::NoVideoStream => eprintln!("audio-only input"),
//!     Err(error) => eprintln!("{error}"),
//! }
//! ```
//!
//! ## How it works
//!
//! A [`Demuxer`] reads packets from the input in storage order. Each packet
//! goes to the [`StreamPipeline`] for its stream ([`VideoPipeline`] or
//! [`AudioPipeline`]), which decodes it, moves the frame timestamps into the
//! encoder's time base and re-encodes. The resulting packets go straight to
//! the [`Muxer`], which interleaves them by timestamp. At end of input both
//! pipelines are flushed and the trailer is written.
//!
//! Everything runs on the calling thread; the progress callback is invoked
//! synchronously from the packet loop.
//!
//! ## Logging
//!
//! The crate logs through the [`log`](https://crates.io/crates/log) facade
//! and never installs a logger. FFmpeg's own console output is controlled
//! separately with [`set_ffmpeg_log_level`] or
//! [`Transcoder::with_ffmpeg_log_level`].

pub mod audio;
pub mod codec;
pub mod demux;
pub mod engine;
pub mod error;
pub mod ffmpeg;
pub mod mux;
pub mod params;
pub mod pipeline;
pub mod progress;
pub mod stream;
pub mod timestamp;
pub mod video;

pub use audio::AudioPipeline;
pub use codec::{AUDIO_CODEC, DecoderContext, Drain, EncoderContext, VIDEO_CODEC, drain_status};
pub use demux::Demuxer;
pub use engine::{EngineState, TranscodeSummary, Transcoder};
pub use error::{ErrorKind, TranscodeError};
pub use ffmpeg::{FfmpegLogLevel, get_ffmpeg_log_level, set_ffmpeg_log_level};
pub use mux::{Muxer, OutputStreamSpec};
pub use params::{H264Profile, TranscodeParams};
pub use pipeline::{
    AudioEncoderSettings, PipelineOutput, PipelineState, StreamPipeline, VideoEncoderSettings,
};
pub use progress::{NoProgress, ProgressCallback, ProgressInfo, ProgressState, estimate_total_frames};
pub use stream::{MediaKind, StreamDescriptor, StreamFormat};
pub use timestamp::{SyntheticClock, rescale, rescale_rounded};
pub use video::VideoPipeline;
