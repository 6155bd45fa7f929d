//! The per-stream decode → encode capability.
//!
//! A [`StreamPipeline`] owns one decoder and one encoder for a single input
//! stream. The engine hands it compressed packets and receives re-encoded
//! packets back, already tagged with the output stream index and stamped in
//! the encoder's time base. The engine loop never needs to know whether it is
//! talking to the video or the audio implementation.
//!
//! This module also holds the pure derivation of encoder settings from a
//! source stream and the caller's [`TranscodeParams`], so that the rules can
//! be checked without opening any codec.

use ffmpeg_next::{ChannelLayout, Packet, Rational, format::Pixel, format::Sample};

use crate::codec::{Drain, EncodeUnit, EncoderContext};
use crate::error::TranscodeError;
use crate::mux::OutputStreamSpec;
use crate::params::{H264Profile, TranscodeParams};
use crate::stream::{MediaKind, StreamDescriptor, StreamFormat};

/// Frame rate used when neither the caller nor the source provides one.
pub const DEFAULT_FRAME_RATE: i32 = 30;

/// Time base of the video encoder.
pub const VIDEO_TIME_BASE: Rational = Rational(1, 90_000);

/// Longest run of B-frames the video encoder may emit.
pub const MAX_B_FRAMES: usize = 2;

/// Lifecycle of a pipeline. The only legal path is
/// `Uninitialized → Open → Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Created but not yet configured.
    Uninitialized,
    /// Decoder and encoder are both open.
    Open,
    /// Codecs released; no further calls are accepted.
    Closed,
}

/// What one [`StreamPipeline::submit_packet`] or
/// [`StreamPipeline::flush`] call produced.
#[derive(Default)]
pub struct PipelineOutput {
    /// Encoded packets, in encoder output order, ready for the muxer.
    pub packets: Vec<Packet>,
    /// Number of frames the decoder produced during the call.
    pub frames: u64,
}

/// One decode → re-encode pipeline for one input stream.
pub trait StreamPipeline {
    /// The kind of stream this pipeline processes.
    fn kind(&self) -> MediaKind;

    /// Index of the input stream this pipeline consumes.
    fn source_index(&self) -> usize;

    /// Index of the output stream, once bound.
    fn output_index(&self) -> Option<usize>;

    /// Record the output stream index the muxer assigned.
    fn bind_output(&mut self, index: usize);

    /// Current lifecycle state.
    fn state(&self) -> PipelineState;

    /// Open the decoder and the target encoder.
    ///
    /// `global_header` must be `true` when the output container stores codec
    /// headers out of band.
    ///
    /// # Errors
    ///
    /// [`TranscodeError::CodecOpen`] if either codec cannot be opened, or
    /// [`TranscodeError::InvalidState`] if the pipeline is not
    /// [`PipelineState::Uninitialized`].
    fn configure(
        &mut self,
        params: &TranscodeParams,
        global_header: bool,
    ) -> Result<OutputStreamSpec, TranscodeError>;

    /// Decode one packet and re-encode every frame it yields.
    ///
    /// # Errors
    ///
    /// [`TranscodeError::Decode`] / [`TranscodeError::Encode`] on codec
    /// failure, [`TranscodeError::InvalidState`] if the pipeline is not open
    /// or the packet belongs to another stream.
    fn submit_packet(&mut self, packet: &Packet) -> Result<PipelineOutput, TranscodeError>;

    /// Flush the decoder and then the encoder.
    ///
    /// # Errors
    ///
    /// Same as [`submit_packet`](Self::submit_packet).
    fn flush(&mut self) -> Result<PipelineOutput, TranscodeError>;

    /// Release the codecs. Safe to call in any state, any number of times.
    fn close(&mut self);
}

pub(crate) fn require_open(
    state: PipelineState,
    kind: MediaKind,
) -> Result<(), TranscodeError> {
    match state {
        PipelineState::Open => Ok(()),
        other => Err(TranscodeError::InvalidState(format!(
            "{kind} pipeline is {other:?}, expected Open"
        ))),
    }
}

pub(crate) fn require_uninitialized(
    state: PipelineState,
    kind: MediaKind,
) -> Result<(), TranscodeError> {
    match state {
        PipelineState::Uninitialized => Ok(()),
        other => Err(TranscodeError::InvalidState(format!(
            "{kind} pipeline is {other:?} and cannot be configured again"
        ))),
    }
}

pub(crate) fn require_source(
    packet: &Packet,
    source_index: usize,
    kind: MediaKind,
) -> Result<(), TranscodeError> {
    if packet.stream() == source_index {
        Ok(())
    } else {
        Err(TranscodeError::InvalidState(format!(
            "packet from stream {} routed to the {kind} pipeline for stream {source_index}",
            packet.stream()
        )))
    }
}

/// Receive every packet the encoder has ready, tagging each with
/// `output_index`. Returns how many were received.
pub(crate) fn drain_encoder<U: EncodeUnit>(
    encoder: &mut EncoderContext<U>,
    output_index: usize,
    packets: &mut Vec<Packet>,
) -> Result<usize, TranscodeError> {
    let mut received = 0;
    loop {
        let mut packet = Packet::empty();
        match encoder.drain(&mut packet)? {
            Drain::Produced => {
                packet.set_stream(output_index);
                packets.push(packet);
                received += 1;
            }
            Drain::Pending | Drain::Finished => return Ok(received),
        }
    }
}

/// Send one frame to the encoder, draining first whenever its input queue
/// is full, then collect whatever it has ready.
pub(crate) fn encode_frame<U: EncodeUnit>(
    encoder: &mut EncoderContext<U>,
    frame: &ffmpeg_next::Frame,
    output_index: usize,
    kind: MediaKind,
    packets: &mut Vec<Packet>,
) -> Result<(), TranscodeError> {
    while !encoder.feed(frame)? {
        if drain_encoder(encoder, output_index, packets)? == 0 {
            return Err(TranscodeError::Encode {
                kind,
                reason: "encoder refused input without producing output".to_string(),
            });
        }
    }
    drain_encoder(encoder, output_index, packets)?;
    Ok(())
}

/// Send end-of-stream to the encoder and collect the remaining packets.
pub(crate) fn finish_encoder<U: EncodeUnit>(
    encoder: &mut EncoderContext<U>,
    output_index: usize,
    packets: &mut Vec<Packet>,
) -> Result<(), TranscodeError> {
    encoder.finish()?;
    drain_encoder(encoder, output_index, packets)?;
    Ok(())
}

/// Resolved configuration of the H.264 encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoEncoderSettings {
    /// Output width.
    pub width: u32,
    /// Output height.
    pub height: u32,
    /// Output pixel format, always YUV 4:2:0 planar.
    pub pixel_format: Pixel,
    /// Nominal output frame rate.
    pub frame_rate: Rational,
    /// Encoder time base, always 1/90000.
    pub time_base: Rational,
    /// Keyframe interval in frames.
    pub gop: u32,
    /// Longest run of B-frames.
    pub max_b_frames: usize,
    /// Target bitrate.
    pub bitrate: usize,
    /// H.264 profile.
    pub profile: H264Profile,
    /// H.264 level (times ten).
    pub level: i32,
    /// Sample aspect ratio copied from the source.
    pub aspect_ratio: Rational,
    /// Whether frames must be dropped or repeated to hit `frame_rate`.
    pub convert_frame_rate: bool,
}

impl VideoEncoderSettings {
    /// Derive encoder settings for `source` under `params`.
    ///
    /// Width and height of `0` inherit the source size. A frame rate of `0`
    /// inherits the source rate and falls back to 30 fps when the source
    /// does not advertise one.
    ///
    /// # Errors
    ///
    /// [`TranscodeError::InvalidParameters`] if `source` is not a video
    /// stream or the resolved size is empty.
    pub fn resolve(
        source: &StreamDescriptor,
        params: &TranscodeParams,
    ) -> Result<Self, TranscodeError> {
        let StreamFormat::Video {
            width: source_width,
            height: source_height,
            aspect_ratio,
            ..
        } = source.format
        else {
            return Err(TranscodeError::InvalidParameters(format!(
                "stream {} is not a video stream",
                source.index
            )));
        };

        let width = if params.width > 0 { params.width } else { source_width };
        let height = if params.height > 0 { params.height } else { source_height };
        if width == 0 || height == 0 {
            return Err(TranscodeError::InvalidParameters(format!(
                "cannot encode a {width}x{height} picture"
            )));
        }

        let (frame_rate, convert_frame_rate) = if params.fps > 0 {
            let requested = Rational::new(params.fps as i32, 1);
            let differs = source
                .frame_rate
                .is_none_or(|rate| !same_rate(rate, requested));
            (requested, differs)
        } else {
            (
                source
                    .frame_rate
                    .unwrap_or(Rational::new(DEFAULT_FRAME_RATE, 1)),
                false,
            )
        };

        let gop = (f64::from(frame_rate.numerator()) / f64::from(frame_rate.denominator()))
            .round()
            .max(1.0) as u32;

        Ok(Self {
            width,
            height,
            pixel_format: Pixel::YUV420P,
            frame_rate,
            time_base: VIDEO_TIME_BASE,
            gop,
            max_b_frames: MAX_B_FRAMES,
            bitrate: params.bitrate,
            profile: params.profile,
            level: params.level,
            aspect_ratio,
            convert_frame_rate,
        })
    }
}

fn same_rate(a: Rational, b: Rational) -> bool {
    i64::from(a.numerator()) * i64::from(b.denominator())
        == i64::from(b.numerator()) * i64::from(a.denominator())
}

/// Resolved configuration of the AAC encoder.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioEncoderSettings {
    /// Sample format, the encoder's first supported one.
    pub sample_format: Sample,
    /// Sample rate copied from the source.
    pub sample_rate: u32,
    /// Channel layout copied from the source.
    pub channel_layout: ChannelLayout,
    /// Channel count copied from the source.
    pub channels: u16,
    /// Encoder time base, `1/sample_rate`.
    pub time_base: Rational,
    /// Target bitrate.
    pub bitrate: usize,
}

impl AudioEncoderSettings {
    /// Derive encoder settings for `source` under `params`, given the
    /// sample format the encoder prefers.
    ///
    /// # Errors
    ///
    /// [`TranscodeError::InvalidParameters`] if `source` is not an audio
    /// stream or has no sample rate.
    pub fn resolve(
        source: &StreamDescriptor,
        params: &TranscodeParams,
        sample_format: Sample,
    ) -> Result<Self, TranscodeError> {
        let StreamFormat::Audio {
            sample_rate,
            channels,
            channel_layout,
            ..
        } = source.format
        else {
            return Err(TranscodeError::InvalidParameters(format!(
                "stream {} is not an audio stream",
                source.index
            )));
        };
        if sample_rate == 0 || sample_rate > i32::MAX as u32 {
            return Err(TranscodeError::InvalidParameters(format!(
                "audio stream {} has an unusable sample rate of {sample_rate}",
                source.index
            )));
        }

        Ok(Self {
            sample_format,
            sample_rate,
            channel_layout,
            channels,
            time_base: Rational::new(1, sample_rate as i32),
            bitrate: params.audio_bitrate,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use ffmpeg_next::codec::{Id, Parameters};
    use ffmpeg_next::format::sample::Type as SampleType;

    fn video_source(width: u32, height: u32, frame_rate: Option<Rational>) -> StreamDescriptor {
        StreamDescriptor {
            index: 0,
            kind: MediaKind::Video,
            codec: Id::MPEG4,
            codec_name: "mpeg4".to_string(),
            time_base: Rational::new(1, 12_800),
            frame_count: None,
            frame_rate,
            duration: None,
            format: StreamFormat::Video {
                width,
                height,
                pixel_format: Pixel::YUV420P,
                aspect_ratio: Rational::new(1, 1),
            },
            parameters: Parameters::new(),
        }
    }

    fn audio_source(sample_rate: u32) -> StreamDescriptor {
        StreamDescriptor {
            index: 1,
            kind: MediaKind::Audio,
            codec: Id::MP3,
            codec_name: "mp3".to_string(),
            time_base: Rational::new(1, sample_rate as i32),
            frame_count: None,
            frame_rate: None,
            duration: None,
            format: StreamFormat::Audio {
                sample_format: Sample::I16(SampleType::Packed),
                sample_rate,
                channels: 2,
                channel_layout: ChannelLayout::STEREO,
            },
            parameters: Parameters::new(),
        }
    }

    #[test]
    fn zero_dimensions_and_rate_inherit_the_source() {
        let source = video_source(1920, 1080, Some(Rational::new(30, 1)));
        let settings = VideoEncoderSettings::resolve(&source, &TranscodeParams::default()).unwrap();
        assert_eq!((settings.width, settings.height), (1920, 1080));
        assert_eq!(settings.frame_rate, Rational::new(30, 1));
        assert_eq!(settings.gop, 30);
        assert!(!settings.convert_frame_rate);
        assert_eq!(settings.pixel_format, Pixel::YUV420P);
        assert_eq!(settings.time_base, VIDEO_TIME_BASE);
        assert_eq!(settings.max_b_frames, 2);
        assert_eq!(settings.bitrate, 2_000_000);
        assert_eq!(settings.profile, H264Profile::Main);
        assert_eq!(settings.level, 41);
    }

    #[test]
    fn requested_geometry_and_rate_override_the_source() {
        let source = video_source(1920, 1080, Some(Rational::new(30, 1)));
        let params = TranscodeParams::new().with_resolution(1280, 720).with_fps(24);
        let settings = VideoEncoderSettings::resolve(&source, &params).unwrap();
        assert_eq!((settings.width, settings.height), (1280, 720));
        assert_eq!(settings.frame_rate, Rational::new(24, 1));
        assert_eq!(settings.gop, 24);
        assert!(settings.convert_frame_rate);
    }

    #[test]
    fn requesting_the_source_rate_needs_no_conversion() {
        let source = video_source(640, 480, Some(Rational::new(50, 2)));
        let params = TranscodeParams::new().with_fps(25);
        let settings = VideoEncoderSettings::resolve(&source, &params).unwrap();
        assert!(!settings.convert_frame_rate);
    }

    #[test]
    fn unknown_source_rate_falls_back_to_thirty() {
        let source = video_source(640, 480, None);
        let settings = VideoEncoderSettings::resolve(&source, &TranscodeParams::default()).unwrap();
        assert_eq!(settings.frame_rate, Rational::new(DEFAULT_FRAME_RATE, 1));
        assert_eq!(settings.gop, 30);
    }

    #[test]
    fn fractional_rate_rounds_the_gop() {
        let source = video_source(640, 480, Some(Rational::new(30_000, 1001)));
        let settings = VideoEncoderSettings::resolve(&source, &TranscodeParams::default()).unwrap();
        assert_eq!(settings.gop, 30);
    }

    #[test]
    fn empty_picture_is_rejected() {
        let source = video_source(0, 0, None);
        assert!(VideoEncoderSettings::resolve(&source, &TranscodeParams::default()).is_err());
    }

    #[test]
    fn audio_settings_copy_the_source() {
        let source = audio_source(44_100);
        let params = TranscodeParams::new().with_audio_bitrate(96_000);
        let settings =
            AudioEncoderSettings::resolve(&source, &params, Sample::F32(SampleType::Planar))
                .unwrap();
        assert_eq!(settings.sample_rate, 44_100);
        assert_eq!(settings.channels, 2);
        assert_eq!(settings.channel_layout, ChannelLayout::STEREO);
        assert_eq!(settings.time_base, Rational::new(1, 44_100));
        assert_eq!(settings.sample_format, Sample::F32(SampleType::Planar));
        assert_eq!(settings.bitrate, 96_000);
    }

    #[test]
    fn settings_reject_the_wrong_stream_kind() {
        let params = TranscodeParams::default();
        assert!(VideoEncoderSettings::resolve(&audio_source(48_000), &params).is_err());
        let sample = Sample::F32(SampleType::Planar);
        assert!(AudioEncoderSettings::resolve(&video_source(640, 480, None), &params, sample).is_err());
    }

    #[test]
    fn state_guards() {
        assert!(require_open(PipelineState::Open, MediaKind::Video).is_ok());
        assert!(require_open(PipelineState::Closed, MediaKind::Video).is_err());
        assert!(require_uninitialized(PipelineState::Uninitialized, MediaKind::Audio).is_ok());
        assert!(require_uninitialized(PipelineState::Open, MediaKind::Audio).is_err());
    }
}
