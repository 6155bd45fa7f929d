//! Audio pipeline: decode → AAC encode.
//!
//! The AAC encoder keeps the source's sample rate and channel layout and
//! uses the first sample format it supports. Decoded frames in any other
//! sample format go through a resampler that changes only the format.
//!
//! Encoders with a fixed frame size (AAC wants exactly 1024 samples per
//! frame) are fed through a small sample queue that re-slices the decoded
//! audio. Timestamps are rescaled into `1/sample_rate` with a plain
//! round-to-nearest [`rescale`]; frames without one continue from the last
//! known position.

use ffmpeg_next::{
    ChannelLayout, Packet, Rational,
    codec::{Parameters, context::Context as CodecContext, decoder, encoder},
    format::Sample,
    frame::Audio as AudioFrame,
    software::resampling::Context as ResamplingContext,
};

use crate::codec::{AUDIO_CODEC, DecoderContext, Drain, EncoderContext};
use crate::error::TranscodeError;
use crate::mux::OutputStreamSpec;
use crate::params::TranscodeParams;
use crate::pipeline::{
    AudioEncoderSettings, PipelineOutput, PipelineState, StreamPipeline, encode_frame,
    finish_encoder, require_open, require_source, require_uninitialized,
};
use crate::stream::{MediaKind, StreamDescriptor};
use crate::timestamp::{SyntheticClock, rescale};

/// Queue of raw samples that hands out frames of a fixed size.
///
/// Works on raw bytes so it handles any packed or planar sample format.
pub(crate) struct SampleQueue {
    format: Sample,
    layout: ChannelLayout,
    rate: u32,
    /// Bytes one sample occupies in one plane.
    unit: usize,
    planes: Vec<Vec<u8>>,
    queued: usize,
    next_pts: Option<i64>,
}

impl SampleQueue {
    pub(crate) fn new(format: Sample, layout: ChannelLayout, channels: u16, rate: u32) -> Self {
        let channels = usize::from(channels.max(1));
        let (plane_count, unit) = if format.is_planar() {
            (channels, format.bytes())
        } else {
            (1, format.bytes() * channels)
        };
        Self {
            format,
            layout,
            rate,
            unit,
            planes: vec![Vec::new(); plane_count],
            queued: 0,
            next_pts: None,
        }
    }

    /// Samples waiting to be handed out.
    pub(crate) fn len(&self) -> usize {
        self.queued
    }

    /// Append raw plane data covering `samples` samples. `pts` stamps the
    /// first of them when the queue is empty.
    pub(crate) fn push_planes(&mut self, planes: &[&[u8]], samples: usize, pts: i64) {
        if samples == 0 {
            return;
        }
        if self.queued == 0 {
            self.next_pts = Some(pts);
        }
        let length = samples * self.unit;
        for (queue, plane) in self.planes.iter_mut().zip(planes) {
            queue.extend_from_slice(&plane[..length.min(plane.len())]);
        }
        self.queued += samples;
    }

    fn push(&mut self, frame: &AudioFrame, pts: i64) {
        let planes: Vec<&[u8]> = (0..self.planes.len()).map(|index| frame.data(index)).collect();
        self.push_planes(&planes, frame.samples(), pts);
    }

    /// Remove up to `samples` samples, returning their bytes per plane and
    /// the timestamp of the first one.
    pub(crate) fn pop_planes(&mut self, samples: usize) -> Option<(Vec<Vec<u8>>, usize, i64)> {
        let count = samples.min(self.queued);
        if count == 0 {
            return None;
        }
        let length = count * self.unit;
        let planes = self
            .planes
            .iter_mut()
            .map(|plane| plane.drain(..length).collect())
            .collect();
        let pts = self.next_pts.unwrap_or(0);
        self.queued -= count;
        self.next_pts = Some(pts + count as i64);
        Some((planes, count, pts))
    }

    fn pop(&mut self, samples: usize) -> Option<AudioFrame> {
        let (planes, count, pts) = self.pop_planes(samples)?;
        let mut frame = AudioFrame::new(self.format, count, self.layout);
        frame.set_rate(self.rate);
        frame.set_pts(Some(pts));
        for (index, plane) in planes.iter().enumerate() {
            frame.data_mut(index)[..plane.len()].copy_from_slice(plane);
        }
        Some(frame)
    }
}

struct FormatAdapter {
    context: ResamplingContext,
    source: Sample,
}

struct AudioCodecs {
    decoder: DecoderContext<decoder::Audio>,
    encoder: EncoderContext<encoder::Audio>,
    settings: AudioEncoderSettings,
    adapter: Option<FormatAdapter>,
    queue: Option<SampleQueue>,
    frame_size: usize,
}

/// Decode → AAC pipeline for the selected audio stream.
pub struct AudioPipeline {
    source: StreamDescriptor,
    state: PipelineState,
    output_index: Option<usize>,
    codecs: Option<AudioCodecs>,
    clock: SyntheticClock,
}

impl AudioPipeline {
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
    pub fn settings(&self) -> Option<&AudioEncoderSettings> {
        self.codecs.as_ref().map(|codecs| &codecs.settings)
    }

    fn open_decoder(&self) -> Result<DecoderContext<decoder::Audio>, TranscodeError> {
        let decoder = CodecContext::from_parameters(self.source.parameters.clone())
            .and_then(|context| context.decoder().audio())
            .map_err(|error| {
                TranscodeError::CodecOpen(format!(
                    "audio decoder for {} stream {}: {error}",
                    self.source.codec_name, self.source.index
                ))
            })?;
        Ok(DecoderContext::new(decoder, MediaKind::Audio))
    }

    fn encode_decoded(
        codecs: &mut AudioCodecs,
        clock: &mut SyntheticClock,
        source_time_base: Rational,
        output_index: usize,
        frame: &mut AudioFrame,
        packets: &mut Vec<Packet>,
    ) -> Result<(), TranscodeError> {
        let settings = codecs.settings;
        let samples = frame.samples() as i64;
        let pts = match frame.pts().or_else(|| frame.timestamp()) {
            Some(pts) => {
                let rebased = rescale(pts, source_time_base, settings.time_base);
                clock.observe(rebased, samples);
                rebased
            }
            None => clock.tick(samples),
        };

        let mut converted = adapt_samples(&mut codecs.adapter, &settings, frame)?;
        let target = match converted.as_mut() {
            Some(converted) => converted,
            None => frame,
        };

        match codecs.queue.as_mut() {
            None => {
                target.set_pts(Some(pts));
                encode_frame(&mut codecs.encoder, &*target, output_index, MediaKind::Audio, packets)
            }
            Some(queue) => {
                queue.push(target, pts);
                while queue.len() >= codecs.frame_size {
                    if let Some(chunk) = queue.pop(codecs.frame_size) {
                        encode_frame(&mut codecs.encoder, &chunk, output_index, MediaKind::Audio, packets)?;
                    }
                }
                Ok(())
            }
        }
    }

    fn pump(&mut self, output: &mut PipelineOutput) -> Result<(), TranscodeError> {
        let output_index = self.bound_output()?;
        let source_time_base = self.source.time_base;
        let Some(codecs) = self.codecs.as_mut() else {
            return Err(TranscodeError::InvalidState("audio codecs are not open".to_string()));
        };

        loop {
            let mut frame = AudioFrame::empty();
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
            TranscodeError::InvalidState("audio pipeline has no output stream".to_string())
        })
    }
}

/// Convert `frame` to the encoder's sample format, or `None` when it
/// already matches.
fn adapt_samples(
    adapter: &mut Option<FormatAdapter>,
    settings: &AudioEncoderSettings,
    frame: &AudioFrame,
) -> Result<Option<AudioFrame>, TranscodeError> {
    let source = frame.format();
    if source == settings.sample_format {
        return Ok(None);
    }

    if adapter.as_ref().is_none_or(|existing| existing.source != source) {
        log::debug!(
            "Converting audio samples from {:?} to {:?}",
            source,
            settings.sample_format
        );
        let context = ResamplingContext::get(
            source,
            settings.channel_layout,
            settings.sample_rate,
            settings.sample_format,
            settings.channel_layout,
            settings.sample_rate,
        )
        .map_err(|error| TranscodeError::Encode {
            kind: MediaKind::Audio,
            reason: format!("cannot create resampler: {error}"),
        })?;
        *adapter = Some(FormatAdapter { context, source });
    }

    let Some(adapter) = adapter.as_mut() else {
        return Ok(None);
    };
    let mut converted = AudioFrame::empty();
    adapter
        .context
        .run(frame, &mut converted)
        .map_err(|error| TranscodeError::Encode {
            kind: MediaKind::Audio,
            reason: format!("sample conversion failed: {error}"),
        })?;
    Ok(Some(converted))
}

impl StreamPipeline for AudioPipeline {
    fn kind(&self) -> MediaKind {
        MediaKind::Audio
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
        require_uninitialized(self.state, MediaKind::Audio)?;

        let codec = ffmpeg_next::encoder::find(AUDIO_CODEC).ok_or_else(|| {
            TranscodeError::CodecOpen("no AAC encoder is available in this FFmpeg build".to_string())
        })?;
        let sample_format = codec
            .audio()
            .ok()
            .and_then(|audio| audio.formats())
            .and_then(|mut formats| formats.next())
            .ok_or_else(|| {
                TranscodeError::CodecOpen("AAC encoder reports no sample formats".to_string())
            })?;
        let settings = AudioEncoderSettings::resolve(&self.source, params, sample_format)?;

        let decoder = self.open_decoder()?;

        let mut encoder = CodecContext::new_with_codec(codec)
            .encoder()
            .audio()
            .map_err(|error| TranscodeError::CodecOpen(format!("AAC encoder context: {error}")))?;
        encoder.set_rate(settings.sample_rate as i32);
        encoder.set_channel_layout(settings.channel_layout);
        encoder.set_format(settings.sample_format);
        encoder.set_time_base(settings.time_base);
        encoder.set_bit_rate(settings.bitrate);
        if global_header {
            unsafe {
                (*encoder.as_mut_ptr()).flags |=
                    ffmpeg_sys_next::AV_CODEC_FLAG_GLOBAL_HEADER as i32;
            }
        }
        let encoder = encoder
            .open_as(codec)
            .map_err(|error| TranscodeError::CodecOpen(format!("AAC encoder: {error}")))?;
        let parameters: Parameters = (&encoder).into();
        let frame_size = encoder.frame_size() as usize;

        log::debug!(
            "Audio encoder: {} Hz, {} channels, {:?}, {} bit/s, frame size {}",
            settings.sample_rate,
            settings.channels,
            settings.sample_format,
            settings.bitrate,
            frame_size
        );

        self.clock.reset();
        self.codecs = Some(AudioCodecs {
            decoder,
            encoder: EncoderContext::new(encoder, MediaKind::Audio),
            settings,
            adapter: None,
            queue: (frame_size > 0).then(|| {
                SampleQueue::new(
                    settings.sample_format,
                    settings.channel_layout,
                    settings.channels,
                    settings.sample_rate,
                )
            }),
            frame_size,
        });
        self.state = PipelineState::Open;

        Ok(OutputStreamSpec {
            kind: MediaKind::Audio,
            codec: AUDIO_CODEC,
            parameters,
            time_base: settings.time_base,
            frame_rate: None,
        })
    }

    fn submit_packet(&mut self, packet: &Packet) -> Result<PipelineOutput, TranscodeError> {
        require_open(self.state, MediaKind::Audio)?;
        require_source(packet, self.source.index, MediaKind::Audio)?;

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
                    kind: MediaKind::Audio,
                    reason: "decoder refused input without producing output".to_string(),
                });
            }
        }
        self.pump(&mut output)?;
        Ok(output)
    }

    fn flush(&mut self) -> Result<PipelineOutput, TranscodeError> {
        require_open(self.state, MediaKind::Audio)?;
        let output_index = self.bound_output()?;

        let mut output = PipelineOutput::default();
        if let Some(codecs) = self.codecs.as_mut() {
            codecs.decoder.finish()?;
        }
        self.pump(&mut output)?;
        if let Some(codecs) = self.codecs.as_mut() {
            if let Some(queue) = codecs.queue.as_mut() {
                // The final frame may be short.
                while let Some(chunk) = queue.pop(codecs.frame_size) {
                    encode_frame(
                        &mut codecs.encoder,
                        &chunk,
                        output_index,
                        MediaKind::Audio,
                        &mut output.packets,
                    )?;
                }
            }
            finish_encoder(&mut codecs.encoder, output_index, &mut output.packets)?;
        }
        Ok(output)
    }

    fn close(&mut self) {
        if self.codecs.take().is_some() {
            log::debug!("Closed audio pipeline for stream {}", self.source.index);
        }
        self.state = PipelineState::Closed;
    }
}
