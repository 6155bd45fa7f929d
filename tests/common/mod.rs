//! Shared helpers for integration tests.
//!
//! Inputs are synthesised with FFmpeg's built-in MPEG-4 and PCM encoders so
//! the tests do not depend on checked-in media, or with H.264 (B-frames on)
//! and AAC when a test needs a source shaped like real camera output.
//! Checked-in fixtures under `tests/fixtures/` are used when present.

#![allow(dead_code)]

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use ffmpeg_next::{
    ChannelLayout, Error, Packet, Rational,
    codec::{Id, context::Context as CodecContext},
    encoder,
    format::{self, Pixel, Sample, sample::Type as SampleType},
    frame::{Audio as AudioFrame, Video as VideoFrame},
};
use recode::{ErrorKind, TranscodeError, TranscodeSummary};

pub const SAMPLE_RATE: u32 = 44_100;

/// Codecs a synthesised input is encoded with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceCodecs {
    /// MPEG-4 part 2 without B-frames, 16-bit PCM audio.
    Mpeg4Pcm,
    /// H.264 with up to two B-frames, AAC audio.
    H264Aac,
}

/// Shape of a synthesised input.
#[derive(Debug, Clone, Copy)]
pub struct Synthetic {
    pub width: u32,
    pub height: u32,
    pub fps: i32,
    pub frames: i64,
    pub audio: bool,
    pub codecs: SourceCodecs,
}

impl Default for Synthetic {
    fn default() -> Self {
        Self {
            width: 320,
            height: 240,
            fps: 30,
            frames: 45,
            audio: true,
            codecs: SourceCodecs::Mpeg4Pcm,
        }
    }
}

pub fn fixture(name: &str) -> Option<PathBuf> {
    let path = Path::new("tests/fixtures").join(name);
    path.exists().then_some(path)
}

/// Unwrap a transcode result, or return `None` when this FFmpeg build
/// cannot open an H.264 or AAC encoder.
pub fn skip_without_encoders(
    result: Result<TranscodeSummary, TranscodeError>,
) -> Option<TranscodeSummary> {
    match result {
        Err(error) if error.kind() == ErrorKind::CodecOpen => {
            eprintln!("Skipping: encoder not available ({error})");
            None
        }
        other => Some(other.expect("transcode")),
    }
}

/// Write `seconds` of 16-bit stereo silence-with-a-tone as a WAV file.
pub fn write_wav(path: &Path, seconds: u32) -> std::io::Result<()> {
    let samples = SAMPLE_RATE * seconds;
    let data_len = samples * 4;
    let mut out = BufWriter::new(File::create(path)?);
    out.write_all(b"RIFF")?;
    out.write_all(&(36 + data_len).to_le_bytes())?;
    out.write_all(b"WAVEfmt ")?;
    out.write_all(&16u32.to_le_bytes())?;
    out.write_all(&1u16.to_le_bytes())?;
    out.write_all(&2u16.to_le_bytes())?;
    out.write_all(&SAMPLE_RATE.to_le_bytes())?;
    out.write_all(&(SAMPLE_RATE * 4).to_le_bytes())?;
    out.write_all(&4u16.to_le_bytes())?;
    out.write_all(&16u16.to_le_bytes())?;
    out.write_all(b"data")?;
    out.write_all(&data_len.to_le_bytes())?;
    for index in 0..samples {
        let value = tone(index as i64);
        out.write_all(&value.to_le_bytes())?;
        out.write_all(&value.to_le_bytes())?;
    }
    out.flush()
}

fn tone(sample: i64) -> i16 {
    let phase = sample as f64 * 440.0 * std::f64::consts::TAU / f64::from(SAMPLE_RATE);
    (phase.sin() * 8000.0) as i16
}

fn open_encoder_flags(context: &mut CodecContext, global_header: bool) {
    if global_header {
        unsafe {
            (*context.as_mut_ptr()).flags |= ffmpeg_sys_next::AV_CODEC_FLAG_GLOBAL_HEADER as i32;
        }
    }
}

fn write_ready(
    encoder: &mut encoder::Encoder,
    stream_index: usize,
    encoder_time_base: Rational,
    output: &mut format::context::Output,
) -> Result<(), Error> {
    let stream_time_base = output
        .stream(stream_index)
        .map(|stream| stream.time_base())
        .unwrap_or(encoder_time_base);
    let mut packet = Packet::empty();
    while encoder.receive_packet(&mut packet).is_ok() {
        packet.set_stream(stream_index);
        packet.rescale_ts(encoder_time_base, stream_time_base);
        packet.write_interleaved(output)?;
    }
    Ok(())
}

/// Synthesise `spec` into `path`; the container follows the extension.
///
/// Fails with [`Error::EncoderNotFound`] when this FFmpeg build lacks one of
/// the requested encoders.
pub fn synthesize(path: &Path, spec: Synthetic) -> Result<(), Error> {
    ffmpeg_next::init()?;
    ffmpeg_next::util::log::set_level(ffmpeg_next::util::log::Level::Quiet);

    let (video_id, audio_id) = match spec.codecs {
        SourceCodecs::Mpeg4Pcm => (Id::MPEG4, Id::PCM_S16LE),
        SourceCodecs::H264Aac => (Id::H264, Id::AAC),
    };

    let mut output = format::output(path)?;
    let global_header = output.format().flags().contains(format::Flags::GLOBAL_HEADER);

    let video_time_base = Rational::new(1, spec.fps);
    let video_codec = encoder::find(video_id).ok_or(Error::EncoderNotFound)?;
    let mut context = CodecContext::new_with_codec(video_codec);
    open_encoder_flags(&mut context, global_header);
    let mut video = context.encoder().video()?;
    video.set_width(spec.width);
    video.set_height(spec.height);
    video.set_format(Pixel::YUV420P);
    video.set_time_base(video_time_base);
    video.set_frame_rate(Some(Rational::new(spec.fps, 1)));
    video.set_bit_rate(400_000);
    if spec.codecs == SourceCodecs::H264Aac {
        video.set_gop(12);
        video.set_max_b_frames(2);
    }
    let mut video = video.open_as(video_codec)?;

    let mut stream = output.add_stream(video_codec)?;
    stream.set_parameters(&video);
    stream.set_time_base(video_time_base);
    stream.set_avg_frame_rate(Rational::new(spec.fps, 1));
    let video_index = stream.index();

    let audio_time_base = Rational::new(1, SAMPLE_RATE as i32);
    let mut audio = if spec.audio {
        let codec = encoder::find(audio_id).ok_or(Error::EncoderNotFound)?;
        let sample_format = match spec.codecs {
            SourceCodecs::Mpeg4Pcm => Sample::I16(SampleType::Packed),
            SourceCodecs::H264Aac => Sample::F32(SampleType::Planar),
        };
        let mut context = CodecContext::new_with_codec(codec);
        open_encoder_flags(&mut context, global_header);
        let mut audio = context.encoder().audio()?;
        audio.set_rate(SAMPLE_RATE as i32);
        audio.set_channel_layout(ChannelLayout::STEREO);
        audio.set_format(sample_format);
        audio.set_time_base(audio_time_base);
        if spec.codecs == SourceCodecs::H264Aac {
            audio.set_bit_rate(96_000);
        }
        let audio = audio.open_as(codec)?;

        let mut stream = output.add_stream(codec)?;
        stream.set_parameters(&audio);
        stream.set_time_base(audio_time_base);
        Some((audio, stream.index(), sample_format))
    } else {
        None
    };

    output.write_header()?;

    let samples_per_frame = i64::from(SAMPLE_RATE) / i64::from(spec.fps);
    let mut samples_written = 0i64;
    let mut picture = VideoFrame::new(Pixel::YUV420P, spec.width, spec.height);
    for index in 0..spec.frames {
        paint(&mut picture, index);
        picture.set_pts(Some(index));
        video.send_frame(&picture)?;
        write_ready(&mut video, video_index, video_time_base, &mut output)?;

        if let Some((audio, audio_index, sample_format)) = audio.as_mut() {
            // Fixed-size codecs (AAC) take exactly `frame_size` samples per frame.
            let chunk_len = match audio.frame_size() {
                0 => samples_per_frame,
                fixed => i64::from(fixed),
            };
            let covered = (index + 1) * samples_per_frame;
            while samples_written + chunk_len <= covered {
                let chunk = tone_frame(*sample_format, samples_written, chunk_len as usize);
                audio.send_frame(&chunk)?;
                write_ready(audio, *audio_index, audio_time_base, &mut output)?;
                samples_written += chunk_len;
            }
        }
    }

    video.send_eof()?;
    write_ready(&mut video, video_index, video_time_base, &mut output)?;
    if let Some((audio, audio_index, _)) = audio.as_mut() {
        audio.send_eof()?;
        write_ready(audio, *audio_index, audio_time_base, &mut output)?;
    }
    output.write_trailer()
}

/// A stereo tone chunk starting at sample `first`.
fn tone_frame(sample_format: Sample, first: i64, samples: usize) -> AudioFrame {
    let mut chunk = AudioFrame::new(sample_format, samples, ChannelLayout::STEREO);
    chunk.set_rate(SAMPLE_RATE);
    chunk.set_pts(Some(first));
    if sample_format.is_planar() {
        for plane in 0..2 {
            let data = chunk.data_mut(plane);
            for sample in 0..samples {
                let value = f32::from(tone(first + sample as i64)) / f32::from(i16::MAX);
                data[sample * 4..sample * 4 + 4].copy_from_slice(&value.to_ne_bytes());
            }
        }
    } else {
        let data = chunk.data_mut(0);
        for sample in 0..samples {
            let bytes = tone(first + sample as i64).to_le_bytes();
            let offset = sample * 4;
            data[offset..offset + 2].copy_from_slice(&bytes);
            data[offset + 2..offset + 4].copy_from_slice(&bytes);
        }
    }
    chunk
}

fn paint(picture: &mut VideoFrame, index: i64) {
    let width = picture.width() as usize;
    let height = picture.height() as usize;
    let stride = picture.stride(0);
    let luma = picture.data_mut(0);
    for y in 0..height {
        for x in 0..width {
            luma[y * stride + x] = ((x + y + index as usize * 4) % 256) as u8;
        }
    }
    for plane in 1..3 {
        let stride = picture.stride(plane);
        let data = picture.data_mut(plane);
        for y in 0..height / 2 {
            data[y * stride..y * stride + width / 2].fill(128);
        }
    }
}

/// Count packets per output stream by reading the whole file.
pub fn count_packets(path: &Path) -> Vec<usize> {
    let mut input = format::input(path).expect("open output");
    let mut counts = vec![0; input.streams().count()];
    for (stream, _) in input.packets() {
        counts[stream.index()] += 1;
    }
    counts
}

/// Read `(pts, dts)` of every packet, grouped by output stream.
pub fn packet_timestamps(path: &Path) -> Vec<Vec<(Option<i64>, Option<i64>)>> {
    let mut input = format::input(path).expect("open output");
    let mut timestamps = vec![Vec::new(); input.streams().count()];
    for (stream, packet) in input.packets() {
        timestamps[stream.index()].push((packet.pts(), packet.dts()));
    }
    timestamps
}

/// Synthesise `spec`, or return `false` when the source encoders are missing.
pub fn synthesize_or_skip(path: &Path, spec: Synthetic) -> bool {
    match synthesize(path, spec) {
        Ok(()) => true,
        Err(error) => {
            eprintln!("Skipping: cannot synthesise {:?} input ({error})", spec.codecs);
            false
        }
    }
}
