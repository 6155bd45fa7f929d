//! End-to-end transcode tests.
//!
//! Inputs are synthesised into a temporary directory. Tests return early
//! when the local FFmpeg build has no usable H.264 or AAC encoder.

mod common;

use ffmpeg_next::codec::Id;
use recode::{
    Demuxer, EngineState, ErrorKind, H264Profile, MediaKind, NoProgress, StreamPipeline,
    TranscodeParams, Transcoder, VideoPipeline,
};

use common::{
    SourceCodecs, Synthetic, count_packets, fixture, packet_timestamps, skip_without_encoders,
    synthesize, synthesize_or_skip,
};

#[test]
fn transcode_video_with_audio_defaults() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = dir.path().join("input.mkv");
    let output = dir.path().join("output.mp4");
    synthesize(&input, Synthetic::default()).expect("synthesize input");

    let mut transcoder = Transcoder::new();
    let Some(summary) = skip_without_encoders(transcoder.try_transcode(
        &input,
        &output,
        &TranscodeParams::default(),
        NoProgress,
    )) else {
        return;
    };

    assert_eq!(transcoder.state(), EngineState::Finalized);
    assert_eq!(summary.output_streams, 2);
    assert!(summary.video_frames >= 45);
    assert!(summary.audio_frames > 0);
    assert!(summary.packets_written > 0);

    let result = Demuxer::open(&output).expect("open output");
    assert_eq!(result.video().codec, Id::H264);
    assert_eq!(result.video().dimensions(), Some((320, 240)));
    let fps = result.video().frames_per_second().expect("output frame rate");
    assert!((fps - 30.0).abs() < 0.5, "fps was {fps}");

    let audio = result.audio().expect("audio stream preserved");
    assert_eq!(audio.codec, Id::AAC);
    assert_eq!(audio.sample_rate(), Some(common::SAMPLE_RATE));
    assert_eq!(audio.kind, MediaKind::Audio);
}

#[test]
fn transcode_without_audio_writes_no_audio_stream() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = dir.path().join("silent.mkv");
    let output = dir.path().join("silent.mp4");
    let spec = Synthetic {
        audio: false,
        ..Synthetic::default()
    };
    synthesize(&input, spec).expect("synthesize input");

    let Some(summary) = skip_without_encoders(Transcoder::new().try_transcode(
        &input,
        &output,
        &TranscodeParams::default(),
        NoProgress,
    )) else {
        return;
    };

    assert_eq!(summary.output_streams, 1);
    assert_eq!(summary.audio_frames, 0);
    let result = Demuxer::open(&output).expect("open output");
    assert!(result.audio().is_none());
    assert_eq!(count_packets(&output).len(), 1);
}

#[test]
fn transcode_resizes_and_changes_frame_rate() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = dir.path().join("input.mkv");
    let output = dir.path().join("resized.mp4");
    let spec = Synthetic {
        width: 640,
        height: 480,
        frames: 60,
        ..Synthetic::default()
    };
    synthesize(&input, spec).expect("synthesize input");

    let params = TranscodeParams::new().with_resolution(320, 180).with_fps(24);
    let Some(summary) = skip_without_encoders(Transcoder::new().try_transcode(
        &input,
        &output,
        &params,
        NoProgress,
    )) else {
        return;
    };
    assert_eq!(summary.video_frames, 60);

    let result = Demuxer::open(&output).expect("open output");
    assert_eq!(result.video().dimensions(), Some((320, 180)));
    let fps = result.video().frames_per_second().expect("output frame rate");
    assert!((fps - 24.0).abs() < 0.5, "fps was {fps}");

    // Two seconds at 24 fps, give or take one frame at either end.
    let video_packets = count_packets(&output)[0];
    assert!((46..=50).contains(&video_packets), "{video_packets} video packets");
}

#[test]
fn transcode_with_explicit_profile_and_matroska_hint() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = dir.path().join("input.mkv");
    let output = dir.path().join("output.bin");
    synthesize(&input, Synthetic::default()).expect("synthesize input");

    let params = TranscodeParams::new()
        .with_profile(H264Profile::High)
        .with_level(40)
        .with_bitrate(1_000_000);
    let mut transcoder = Transcoder::new().with_format_hint("matroska");
    let Some(summary) = skip_without_encoders(transcoder.try_transcode(
        &input,
        &output,
        &params,
        NoProgress,
    )) else {
        return;
    };

    assert_eq!(summary.output_streams, 2);
    let result = Demuxer::open(&output).expect("open output");
    assert!(result.format_name().contains("matroska"));
    assert_eq!(result.video().codec, Id::H264);
}

#[test]
fn fresh_engines_produce_independent_outputs() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = dir.path().join("input.mkv");
    synthesize(&input, Synthetic::default()).expect("synthesize input");

    for name in ["first.mp4", "second.mp4"] {
        let output = dir.path().join(name);
        let mut transcoder = Transcoder::new();
        let ok = transcoder.transcode(&input, &output, &TranscodeParams::default(), NoProgress);
        if !ok && transcoder.last_error().is_some_and(|e| e.contains("codec")) {
            eprintln!("Skipping: {:?}", transcoder.last_error());
            return;
        }
        assert!(ok, "{:?}", transcoder.last_error());
        assert!(transcoder.last_error().is_none());
    }

    for name in ["first.mp4", "second.mp4"] {
        let result = Demuxer::open(dir.path().join(name)).expect("open output");
        assert_eq!(result.video().codec, Id::H264);
        assert!(result.audio().is_some());
    }
}

#[test]
fn one_engine_can_run_twice() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = dir.path().join("input.mkv");
    synthesize(&input, Synthetic { frames: 15, ..Synthetic::default() }).expect("synthesize");

    let mut transcoder = Transcoder::new();
    for name in ["a.mkv", "b.mkv"] {
        let output = dir.path().join(name);
        if skip_without_encoders(transcoder.try_transcode(
            &input,
            &output,
            &TranscodeParams::default(),
            NoProgress,
        ))
        .is_none()
        {
            return;
        }
        assert_eq!(transcoder.state(), EngineState::Finalized);
    }
}

#[test]
fn transcode_checked_in_fixture() {
    let Some(input) = fixture("sample_video.mp4") else {
        return;
    };
    let dir = tempfile::tempdir().expect("tempdir");
    let output = dir.path().join("fixture.mp4");

    let source = Demuxer::open(&input).expect("open fixture");
    let source_dimensions = source.video().dimensions();
    let has_audio = source.audio().is_some();
    drop(source);

    let Some(_) = skip_without_encoders(Transcoder::new().try_transcode(
        &input,
        &output,
        &TranscodeParams::default(),
        NoProgress,
    )) else {
        return;
    };

    let result = Demuxer::open(&output).expect("open output");
    assert_eq!(result.video().dimensions(), source_dimensions);
    assert_eq!(result.audio().is_some(), has_audio);
}

fn assert_monotonic(stream: usize, timestamps: &[(Option<i64>, Option<i64>)]) {
    let dts: Vec<i64> = timestamps
        .iter()
        .map(|(_, dts)| dts.expect("packet without dts"))
        .collect();
    assert!(
        dts.windows(2).all(|pair| pair[0] < pair[1]),
        "stream {stream} dts not increasing: {dts:?}"
    );

    let mut pts: Vec<i64> = timestamps
        .iter()
        .map(|(pts, _)| pts.expect("packet without pts"))
        .collect();
    for ((pts, dts), index) in pts.iter().zip(&dts).zip(0..) {
        assert!(pts >= dts, "stream {stream} packet {index}: pts {pts} < dts {dts}");
    }
    pts.sort_unstable();
    assert!(
        pts.windows(2).all(|pair| pair[0] < pair[1]),
        "stream {stream} has duplicate pts: {pts:?}"
    );
}

#[test]
fn transcode_h264_aac_source_with_b_frames() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = dir.path().join("camera.mkv");
    let output = dir.path().join("camera.mp4");
    let spec = Synthetic {
        frames: 60,
        codecs: SourceCodecs::H264Aac,
        ..Synthetic::default()
    };
    if !synthesize_or_skip(&input, spec) {
        return;
    }

    let source = Demuxer::open(&input).expect("open source");
    assert_eq!(source.video().codec, Id::H264);
    assert_eq!(source.audio().map(|audio| audio.codec), Some(Id::AAC));
    drop(source);

    let Some(summary) = skip_without_encoders(Transcoder::new().try_transcode(
        &input,
        &output,
        &TranscodeParams::default(),
        NoProgress,
    )) else {
        return;
    };
    assert_eq!(summary.video_frames, 60);
    assert!(summary.audio_frames > 0);

    let result = Demuxer::open(&output).expect("open output");
    assert_eq!(result.video().codec, Id::H264);
    let audio = result.audio().expect("audio stream preserved");
    assert_eq!(audio.codec, Id::AAC);
    assert_eq!(audio.sample_rate(), Some(common::SAMPLE_RATE));
    drop(result);

    let counts = count_packets(&output);
    assert_eq!(counts[0], 60);
    // Two seconds of 1024-sample AAC frames, plus encoder priming.
    assert!((80..=92).contains(&counts[1]), "{} audio packets", counts[1]);

    for (stream, timestamps) in packet_timestamps(&output).iter().enumerate() {
        assert_monotonic(stream, timestamps);
    }
}

#[test]
fn frames_without_timestamps_get_evenly_spaced_ones() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = dir.path().join("camera.mkv");
    let spec = Synthetic {
        frames: 30,
        audio: false,
        codecs: SourceCodecs::H264Aac,
        ..Synthetic::default()
    };
    if !synthesize_or_skip(&input, spec) {
        return;
    }

    let mut demuxer = Demuxer::open(&input).expect("open source");
    let mut pipeline = VideoPipeline::new(demuxer.video().clone());
    match pipeline.configure(&TranscodeParams::default(), false) {
        Err(error) if error.kind() == ErrorKind::CodecOpen => return,
        other => {
            other.expect("configure");
        }
    }
    pipeline.bind_output(0);

    let mut pts = Vec::new();
    while let Some(mut packet) = demuxer.next_packet().expect("read") {
        if packet.stream() != pipeline.source_index() {
            continue;
        }
        packet.set_pts(None);
        packet.set_dts(None);
        let produced = pipeline.submit_packet(&packet).expect("submit");
        pts.extend(produced.packets.iter().map(|packet| packet.pts()));
    }
    let produced = pipeline.flush().expect("flush");
    pts.extend(produced.packets.iter().map(|packet| packet.pts()));
    pipeline.close();

    let mut pts: Vec<i64> = pts.into_iter().map(|pts| pts.expect("encoded pts")).collect();
    pts.sort_unstable();
    // 30 fps in the encoder's 1/90000 time base.
    let expected: Vec<i64> = (0..30).map(|index| index * 3000).collect();
    assert_eq!(pts, expected);
}
