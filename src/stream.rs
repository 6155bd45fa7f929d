//! Input stream descriptions.
//!
//! [`StreamDescriptor`] captures everything a pipeline needs to know about a
//! source stream in order to build a matching decoder and a target encoder:
//! codec identity, time base, frame rate and the sample or pixel layout
//! advertised by the stream's codec parameters. Descriptors are built once
//! by [`Demuxer::open`](crate::Demuxer::open) and never change afterwards.

use std::fmt::{Debug, Display, Formatter, Result as FmtResult};
use std::mem;
use std::time::Duration;

use ffmpeg_next::{
    ChannelLayout, Rational,
    codec::{Id, Parameters},
    format::{Pixel, Sample, stream::Stream},
    media::Type,
};
use ffmpeg_sys_next::{AVChannelOrder, AVPixelFormat, AVSampleFormat};

use crate::timestamp::{rational_to_f64, stream_duration};

/// Kind of media carried by a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    /// Video pictures.
    Video,
    /// Audio samples.
    Audio,
}

impl MediaKind {
    /// Map an FFmpeg media type, `None` for anything other than audio/video.
    pub fn from_media_type(medium: Type) -> Option<Self> {
        match medium {
            Type::Video => Some(MediaKind::Video),
            Type::Audio => Some(MediaKind::Audio),
            _ => None,
        }
    }

    pub(crate) fn media_type(self) -> Type {
        match self {
            MediaKind::Video => Type::Video,
            MediaKind::Audio => Type::Audio,
        }
    }
}

impl Display for MediaKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            MediaKind::Video => f.write_str("video"),
            MediaKind::Audio => f.write_str("audio"),
        }
    }
}

/// Decoded layout of a stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StreamFormat {
    /// Picture geometry and pixel layout.
    Video {
        /// Width in pixels.
        width: u32,
        /// Height in pixels.
        height: u32,
        /// Decoded pixel format.
        pixel_format: Pixel,
        /// Sample (pixel) aspect ratio; `0/1` when unknown.
        aspect_ratio: Rational,
    },
    /// Sample layout.
    Audio {
        /// Decoded sample format.
        sample_format: Sample,
        /// Samples per second.
        sample_rate: u32,
        /// Channel count.
        channels: u16,
        /// Channel layout.
        channel_layout: ChannelLayout,
    },
}

/// One selected input stream.
#[derive(Clone)]
pub struct StreamDescriptor {
    /// Index of the stream inside the input container.
    pub index: usize,
    /// Audio or video.
    pub kind: MediaKind,
    /// Codec of the compressed stream.
    pub codec: Id,
    /// Short codec name, e.g. `"h264"`.
    pub codec_name: String,
    /// Time base the stream's packet timestamps are expressed in.
    pub time_base: Rational,
    /// Frame count advertised by the container, if any.
    pub frame_count: Option<u64>,
    /// Guessed frame rate (average rate, falling back to the base rate).
    pub frame_rate: Option<Rational>,
    /// Stream duration, if advertised.
    pub duration: Option<Duration>,
    /// Decoded layout.
    pub format: StreamFormat,
    pub(crate) parameters: Parameters,
}

impl StreamDescriptor {
    /// Describe `stream` from its codec parameters.
    ///
    /// Only checks that a decoder exists; the pipeline opens the one real
    /// decoder later. Returns `Ok(None)` for streams that are neither audio
    /// nor video.
    pub(crate) fn from_stream(stream: &Stream<'_>) -> Result<Option<Self>, ffmpeg_next::Error> {
        let parameters = stream.parameters();
        let Some(kind) = MediaKind::from_media_type(parameters.medium()) else {
            return Ok(None);
        };
        let codec = parameters.id();
        if ffmpeg_next::decoder::find(codec).is_none() {
            return Err(ffmpeg_next::Error::DecoderNotFound);
        }

        let format = match kind {
            MediaKind::Video => video_format(&parameters),
            MediaKind::Audio => audio_format(&parameters),
        };

        let frame_count = u64::try_from(stream.frames()).ok().filter(|&frames| frames > 0);
        let time_base = stream.time_base();

        Ok(Some(Self {
            index: stream.index(),
            kind,
            codec,
            codec_name: codec.name().to_string(),
            time_base,
            frame_count,
            frame_rate: guess_frame_rate(stream.avg_frame_rate(), stream.rate()),
            duration: stream_duration(stream.duration(), time_base),
            format,
            parameters,
        }))
    }

    /// Frame rate as a float, if known.
    pub fn frames_per_second(&self) -> Option<f64> {
        self.frame_rate.map(rational_to_f64)
    }

    /// `(width, height)` for video streams.
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        match self.format {
            StreamFormat::Video { width, height, .. } => Some((width, height)),
            StreamFormat::Audio { .. } => None,
        }
    }

    /// Sample rate for audio streams.
    pub fn sample_rate(&self) -> Option<u32> {
        match self.format {
            StreamFormat::Audio { sample_rate, .. } => Some(sample_rate),
            StreamFormat::Video { .. } => None,
        }
    }
}

impl Debug for StreamDescriptor {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("StreamDescriptor")
            .field("index", &self.index)
            .field("kind", &self.kind)
            .field("codec_name", &self.codec_name)
            .field("time_base", &self.time_base)
            .field("frame_count", &self.frame_count)
            .field("frame_rate", &self.frame_rate)
            .field("duration", &self.duration)
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}

fn video_format(parameters: &Parameters) -> StreamFormat {
    let raw = unsafe { &*parameters.as_ptr() };
    let pixel_format = if raw.format < 0 {
        Pixel::None
    } else {
        Pixel::from(unsafe { mem::transmute::<i32, AVPixelFormat>(raw.format) })
    };
    StreamFormat::Video {
        width: u32::try_from(raw.width).unwrap_or(0),
        height: u32::try_from(raw.height).unwrap_or(0),
        pixel_format,
        aspect_ratio: Rational::from(raw.sample_aspect_ratio),
    }
}

fn audio_format(parameters: &Parameters) -> StreamFormat {
    let raw = unsafe { &*parameters.as_ptr() };
    let sample_format = if raw.format < 0 {
        Sample::None
    } else {
        Sample::from(unsafe { mem::transmute::<i32, AVSampleFormat>(raw.format) })
    };
    let channels = u16::try_from(raw.ch_layout.nb_channels).unwrap_or(0);
    let mut channel_layout = if raw.ch_layout.order == AVChannelOrder::AV_CHANNEL_ORDER_NATIVE {
        ChannelLayout::from_bits_truncate(unsafe { raw.ch_layout.u.mask })
    } else {
        ChannelLayout::empty()
    };
    if channel_layout.is_empty() {
        channel_layout = ChannelLayout::default(i32::from(channels));
    }
    StreamFormat::Audio {
        sample_format,
        sample_rate: u32::try_from(raw.sample_rate).unwrap_or(0),
        channels,
        channel_layout,
    }
}

/// Prefer the average frame rate, then the base rate. Rates with a zero
/// numerator or denominator count as unknown.
pub(crate) fn guess_frame_rate(average: Rational, base: Rational) -> Option<Rational> {
    [average, base]
        .into_iter()
        .find(|rate| rate.numerator() > 0 && rate.denominator() > 0)
}
