//! Video pipeline: decode → adapt → H.264 encode.
//!
//! Decoded pictures are converted to the encoder's size and pixel format
//! when they do not already match, restamped from the source time base into
//! the encoder's 1/90000 time base, and handed to the H.264 encoder.
//!
//! Timestamp rules:
//! - a frame's own timestamp is rescaled with round-half-to-even
//!   ([`rescale_rounded`]);
//! - a frame without one continues the sequence one frame period after the
//!   previous frame ([`SyntheticClock`]);
//! - when the caller asks for a frame rate different from the source's,
//!   frames are placed on the output frame grid, dropping frames that land
//!   on an occupied slot and repeating frames to fill short gaps.

use ffmpeg_next::{
    Dictionary, Packet, Rational,
    codec::{Parameters, context::Context as CodecContext, decoder, encoder},
    format::Pixel,
    frame::Video as VideoFrame,
    picture,
    software::scaling::{Context as ScalingContext, Flags as ScalingFlags},
};

use crate::codec::{DecoderContext, Drain, EncoderContext, VIDEO_CODEC};
use crate::error::TranscodeError;
use crate::mux::OutputStreamSpec;
use crate::params::TranscodeParams;
use crate::pipeline::{
    PipelineOutput, PipelineState, StreamPipeline, VideoEncoderSettings, encode_frame,
    finish_encoder, require_open, require_source, require_uninitialized,
};
use crate::stream::{MediaKind, StreamDescriptor};
use crate::timestamp::{SyntheticClock, frame_duration, rescale_rounded};

/// Encoder options passed to libx264.
const ENCODER_OPTIONS: [(&str, &str); 2] = [("preset", "medium"), ("tune", "zerolatency")];

/// Longest gap, in output frames, that is filled by repeating a frame.
const MAX_REPEATED_FRAMES: i64 = 60;

/// Places frames on a fixed output frame grid.
#[derive(Debug, Clone)]
pub(crate) struct FrameRateConverter {
    period: Rational,
    last_slot: Option<i64>,
}

impl FrameRateConverter {
    pub(crate) fn new(frame_rate: Rational) -> Self {
        Self {
            period: Rational::new(frame_rate.denominator(), frame_rate.numerator()),
            last_slot: None,
        }
    }

    /// Output slots, inclusive, that a frame at `pts` should occupy, or
    /// `None` if the frame should be dropped.
    pub(crate) fn assign(&mut self, pts: i64, time_base: Rational) -> Option<(i64, i64)> {
        let slot = rescale_rounded(pts, time_base, self.period);
        let first = match self.last_slot {
            None => slot,
            Some(last) if slot <= last => return None,
            Some(last) => (last + 1).max(slot - MAX_REPEATED_FRAMES + 1),
        };
        self.last_slot = Some(slot);
        Some((first, slot))
    }

    /// Timestamp of `slot` in `time_base`.
    pub(crate) fn slot_pts(&self, slot: i64, time_base: Rational) -> i64 {
        rescale_rounded(slot, self.period, time_base)
    }
}

/// Converts decoded pictures to the encoder's geometry and pixel format.
struct FrameAdapter {
    context: ScalingContext,
    source: (Pixel, u32, u32),
}

struct VideoCodecs {
    decoder: DecoderContext<decoder::Video>,
    encoder: EncoderContext<encoder::Video>,
    settings: VideoEncoderSettings,
    adapter: Option<FrameAdapter>,
    converter: Option<FrameRateConverter>,
    frame_step: i64,
}

/// Decode → H.264 pipeline for the selected video stream.
pub struct VideoPipeline {
    source: StreamDescriptor,
    state: PipelineState,
    output_index: Option<usize>,
    codecs: Option<VideoCodecs>,
    clock: SyntheticClock,
}

impl VideoPipeline {
    /// Create an unconfigured pipeline for `source`.
    pub fn new(source: StreamDescriptor) -> Self {
        Self {
            source,
            state: PipelineState::Uninitialized,
            output_index: None,
            codecs: None,
            clock: SyntheticClock::new(),
        }
    }

    /// Settings the encoder was opened with, once configured.
    pub fn settings(&self) -> Option<&VideoEncoderSettings> {
        self.codecs.as_ref().map(|codecs| &codecs.settings)
    }

    fn open_decoder(&self) -> Result<DecoderContext<decoder::Video>, TranscodeError> {
        let decoder = CodecContext::from_parameters(self.source.parameters.clone())
            .and_then(|context| context.decoder().video())
            .map_err(|error| {
                TranscodeError::CodecOpen(format!(
                    "video decoder for {} stream {}: {error}",
                    self.source.codec_name, self.source.index
                ))
            })?;
        Ok(DecoderContext::new(decoder, MediaKind::Video))
    }

    fn open_encoder(
        settings: &VideoEncoderSettings,
        global_header: bool,
    ) -> Result<encoder::Video, TranscodeError> {
        let codec = ffmpeg_next::encoder::find(VIDEO_CODEC).ok_or_else(|| {
            TranscodeError::CodecOpen("no H.264 encoder is available in this FFmpeg build".to_string())
        })?;

        let mut encoder = CodecContext::new_with_codec(codec)
            .encoder()
            .video()
            .map_err(|error| TranscodeError::CodecOpen(format!("H.264 encoder context: {error}")))?;

        encoder.set_width(settings.width);
        encoder.set_height(settings.height);
        encoder.set_format(settings.pixel_format);
        encoder.set_time_base(settings.time_base);
        encoder.set_frame_rate(Some(settings.frame_rate));
        encoder.set_bit_rate(settings.bitrate);
        encoder.set_gop(settings.gop);
        encoder.set_max_b_frames(settings.max_b_frames);
        if settings.aspect_ratio.numerator() > 0 {
            encoder.set_aspect_ratio(settings.aspect_ratio);
        }

        unsafe {
            let raw = encoder.as_mut_ptr();
            (*raw).profile = settings.profile.as_raw();
            (*raw).level = settings.level;
            if global_header {
                (*raw).flags |= ffmpeg_sys_next::AV_CODEC_FLAG_GLOBAL_HEADER as i32;
            }
        }

        let mut options = Dictionary::new();
        for (key, value) in ENCODER_OPTIONS {
            options.set(key, value);
        }

        encoder
            .open_as_with(codec, options)
            .map_err(|error| TranscodeError::CodecOpen(format!("H.264 encoder: {error}")))
    }

    /// Adapt, restamp and encode one decoded frame.
    fn encode_decoded(
        codecs: &mut VideoCodecs,
        clock: &mut SyntheticClock,
        source_time_base: Rational,
        output_index: usize,
        frame: &mut VideoFrame,
        packets: &mut Vec<Packet>,
    ) -> Result<(), TranscodeError> {
        let settings = codecs.settings;
        let pts = match frame.pts().or_else(|| frame.timestamp()) {
            Some(pts) => {
                let rebased = rescale_rounded(pts, source_time_base, settings.time_base);
                clock.observe(rebased, codecs.frame_step);
                rebased
            }
            None => clock.tick(codecs.frame_step),
        };

        let mut scaled;
        let target = match adapt_frame(&mut codecs.adapter, &settings, frame)? {
            Some(converted) => {
                scaled = converted;
                &mut scaled
            }
            None => frame,
        };
        target.set_kind(picture::Type::None);

        let Some(converter) = codecs.converter.as_mut() else {
            target.set_pts(Some(pts));
            return encode_frame(&mut codecs.encoder, &*target, output_index, MediaKind::Video, packets);
        };

        let Some((first, last)) = converter.assign(pts, settings.time_base) else {
            return Ok(());
        };
        for slot in first..=last {
            target.set_pts(Some(converter.slot_pts(slot, settings.time_base)));
            encode_frame(&mut codecs.encoder, &*target, output_index, MediaKind::Video, packets)?;
        }
        Ok(())
    }

    /// Pull every ready frame out of the decoder and encode it.
    fn pump(&mut self, output: &mut PipelineOutput) -> Result<(), TranscodeError> {
        let output_index = self.bound_output()?;
        let source_time_base = self.source.time_base;
        let Some(codecs) = self.codecs.as_mut() else {
            return Err(TranscodeError::InvalidState("video codecs are not open".to_string()));
        };

        loop {
            let mut frame = VideoFrame::empty();
            match codecs.decoder.drain(&mut frame)? {
                Drain::Produced => {
                    output.frames += 1;
                    Self::encode_decoded(
                        codecs,
                        &mut self.clock,
                        source_time_base,
                        output_index,
                        &mut frame,
                        &mut output.packets,
                    )?;
                }
                Drain::Pending | Drain::Finished => return Ok(()),
            }
        }
    }

    fn bound_output(&self) -> Result<usize, TranscodeError> {
        self.output_index.ok_or_else(|| {
            TranscodeError::InvalidState("video pipeline has no output stream".to_string())
        })
    }
}

/// Convert `frame` to the encoder's geometry and pixel format, or `None`
/// when it already matches.
fn adapt_frame(
    adapter: &mut Option<FrameAdapter>,
    settings: &VideoEncoderSettings,
    frame: &VideoFrame,
) -> Result<Option<VideoFrame>, TranscodeError> {
    let source = (frame.format(), frame.width(), frame.height());
    if source == (settings.pixel_format, settings.width, settings.height) {
        return Ok(None);
    }

    if adapter.as_ref().is_none_or(|existing| existing.source != source) {
        log::debug!(
            "Converting video frames from {:?} {}x{} to {:?} {}x{}",
            source.0,
            source.1,
            source.2,
            settings.pixel_format,
            settings.width,
            settings.height
        );
        let context = ScalingContext::get(
            source.0,
            source.1,
            source.2,
            settings.pixel_format,
            settings.width,
            settings.height,
            ScalingFlags::BILINEAR,
        )
        .map_err(|error| TranscodeError::Encode {
            kind: MediaKind::Video,
            reason: format!("cannot create scaler: {error}"),
        })?;
        *adapter = Some(FrameAdapter { context, source });
    }

    let Some(adapter) = adapter.as_mut() else {
        return Ok(None);
    };
    let mut scaled = VideoFrame::empty();
    adapter
        .context
        .run(frame, &mut scaled)
        .map_err(|error| TranscodeError::Encode {
            kind: MediaKind::Video,
            reason: format!("scaling failed: {error}"),
        })?;
    Ok(Some(scaled))
}

impl StreamPipeline for VideoPipeline {
    fn kind(&self) -> MediaKind {
        MediaKind::Video
    }

    fn source_index(&self) -> usize {
        self.source.index
    }

    fn output_index(&self) -> Option<usize> {
        self.output_index
    }

    fn bind_output(&mut self, index: usize) {
        self.output_index = Some(index);
    }

    fn state(&self) -> PipelineState {
        self.state
    }

    fn configure(
        &mut self,
        params: &TranscodeParams,
        global_header: bool,
    ) -> Result<OutputStreamSpec, TranscodeError> {
        require_uninitialized(self.state, MediaKind::Video)?;

        let settings = VideoEncoderSettings::resolve(&self.source, params)?;
        let decoder = self.open_decoder()?;
        let encoder = Self::open_encoder(&settings, global_header)?;
        let parameters: Parameters = (&encoder).into();

        log::debug!(
            "Video encoder: {}x{} {:?} @ {}/{} fps, {} bit/s, profile {} level {}",
            settings.width,
            settings.height,
            settings.pixel_format,
            settings.frame_rate.numerator(),
            settings.frame_rate.denominator(),
            settings.bitrate,
            settings.profile,
            settings.level
        );

        self.clock.reset();
        self.codecs = Some(VideoCodecs {
            decoder,
            encoder: EncoderContext::new(encoder, MediaKind::Video),
            settings,
            adapter: None,
            converter: settings
                .convert_frame_rate
                .then(|| FrameRateConverter::new(settings.frame_rate)),
            frame_step: frame_duration(settings.frame_rate, settings.time_base),
        });
        self.state = PipelineState::Open;

        Ok(OutputStreamSpec {
            kind: MediaKind::Video,
            codec: VIDEO_CODEC,
            parameters,
            time_base: settings.time_base,
            frame_rate: Some(settings.frame_rate),
        })
    }

    fn submit_packet(&mut self, packet: &Packet) -> Result<PipelineOutput, TranscodeError> {
        require_open(self.state, MediaKind::Video)?;
        require_source(packet, self.source.index, MediaKind::Video)?;

        let mut output = PipelineOutput::default();
        loop {
            let accepted = match self.codecs.as_mut() {
                Some(codecs) => codecs.decoder.feed(packet)?,
                None => false,
            };
            if accepted {
                break;
            }
            let frames_before = output.frames;
            self.pump(&mut output)?;
            if output.frames == frames_before {
                return Err(TranscodeError::Decode {
                    kind: MediaKind::Video,
                    reason: "decoder refused input without producing output".to_string(),
                });
            }
        }
        self.pump(&mut output)?;
        Ok(output)
    }

    fn flush(&mut self) -> Result<PipelineOutput, TranscodeError> {
        require_open(self.state, MediaKind::Video)?;
        let output_index = self.bound_output()?;

        let mut output = PipelineOutput::default();
        if let Some(codecs) = self.codecs.as_mut() {
            codecs.decoder.finish()?;
        }
        self.pump(&mut output)?;
        if let Some(codecs) = self.codecs.as_mut() {
            finish_encoder(&mut codecs.encoder, output_index, &mut output.packets)?;
        }
        Ok(output)
    }

    fn close(&mut self) {
        if self.codecs.take().is_some() {
            log::debug!("Closed video pipeline for stream {}", self.source.index);
        }
        self.state = PipelineState::Closed;
    }
}
