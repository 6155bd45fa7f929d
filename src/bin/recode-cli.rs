use std::ops::ControlFlow;
use std::path::{Path, PathBuf};

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;
use recode::{
    Demuxer, FfmpegLogLevel, H264Profile, NoProgress, ProgressCallback, ProgressInfo,
    StreamDescriptor, StreamFormat, TranscodeParams, Transcoder,
};

const CLI_AFTER_HELP: &str = "Examples:\n  recode transcode input.mkv output.mp4\n  recode transcode input.mov output.mp4 --width 1280 --height 720 --fps 24\n  recode transcode input.avi output.mkv --bitrate 4000000 --profile high --level 42\n  recode probe input.mp4 --json\n  recode completions zsh > _recode";

#[derive(Debug, Parser)]
#[command(
    name = "recode",
    version,
    about = "Re-encode video to H.264 and audio to AAC",
    after_help = CLI_AFTER_HELP
)]
struct Cli {
    #[command(flatten)]
    global: GlobalOptions,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Parser, Clone, Default)]
struct GlobalOptions {
    /// Show debug logging from recode.
    #[arg(long, global = true)]
    verbose: bool,

    /// FFmpeg log level (quiet, panic, fatal, error, warning, info, verbose, debug, trace).
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Transcode a media file to H.264/AAC.
    #[command(
        after_help = "Width, height and fps of 0 keep the source value. The output container is chosen from the file extension unless --format is given."
    )]
    Transcode {
        input: PathBuf,
        output: PathBuf,
        /// Video bitrate in bits per second.
        #[arg(long, default_value_t = 2_000_000)]
        bitrate: usize,
        /// H.264 profile (baseline, constrained-baseline, main, extended, high, high10, high422, high444).
        #[arg(long, default_value = "main")]
        profile: String,
        /// H.264 level times ten (e.g. 41 for level 4.1).
        #[arg(long, default_value_t = 41)]
        level: i32,
        /// Output width in pixels (0 keeps the source width).
        #[arg(long, default_value_t = 0)]
        width: u32,
        /// Output height in pixels (0 keeps the source height).
        #[arg(long, default_value_t = 0)]
        height: u32,
        /// Output frame rate (0 keeps the source rate).
        #[arg(long, default_value_t = 0)]
        fps: u32,
        /// Audio bitrate in bits per second.
        #[arg(long, default_value_t = 128_000)]
        audio_bitrate: usize,
        /// Container format name, overriding the file extension (e.g. mp4, matroska).
        #[arg(long)]
        format: Option<String>,
        /// Replace the output file if it exists.
        #[arg(long)]
        overwrite: bool,
        /// Do not draw a progress bar.
        #[arg(long)]
        no_progress: bool,
    },
    /// Show the streams a transcode would use.
    Probe {
        input: PathBuf,
        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },
    #[command(about = "Generate shell completions")]
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn init_logging(verbose: bool) {
    let level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Warn
    };
    env_logger::Builder::from_default_env()
        .filter_module("recode", level)
        .init();
}

fn parse_log_level(value: &str) -> Option<FfmpegLogLevel> {
    value.parse().ok()
}

fn ensure_writable_path(path: &Path, overwrite: bool) -> Result<(), Box<dyn std::error::Error>> {
    if path.exists() {
        if overwrite {
            eprintln!(
                "{} {}",
                "warning:".yellow().bold(),
                format!("overwriting {}", path.display()).yellow()
            );
        } else {
            return Err(format!(
                "output already exists: {} (use --overwrite to replace)",
                path.display()
            )
            .into());
        }
    }
    Ok(())
}

/// Draws the transcode percentage as a bar with tenth-of-a-percent steps.
struct TerminalProgress {
    bar: ProgressBar,
}

impl TerminalProgress {
    fn new() -> Result<Self, Box<dyn std::error::Error>> {
        let bar = ProgressBar::new(1000);
        let style = ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {msg}",
        )?;
        bar.set_style(style.progress_chars("##-"));
        Ok(Self { bar })
    }
}

impl ProgressCallback for TerminalProgress {
    fn on_progress(&mut self, info: &ProgressInfo) -> ControlFlow<()> {
        self.bar.set_position(bar_position(info.percentage));
        self.bar.set_message(format!(
            "{:5.1}% ({}/{} frames)",
            info.percentage, info.processed_frames, info.total_frames
        ));
        ControlFlow::Continue(())
    }
}

fn bar_position(percentage: f32) -> u64 {
    (percentage.clamp(0.0, 100.0) * 10.0).round() as u64
}

fn describe_stream(stream: &StreamDescriptor) -> serde_json::Value {
    let mut value = json!({
        "index": stream.index,
        "kind": stream.kind.to_string(),
        "codec": stream.codec_name,
        "time_base": format!("{}/{}", stream.time_base.numerator(), stream.time_base.denominator()),
        "frame_count": stream.frame_count,
        "duration_seconds": stream.duration.map(|duration| duration.as_secs_f64()),
    });
    match stream.format {
        StreamFormat::Video { width, height, pixel_format, .. } => {
            value["width"] = json!(width);
            value["height"] = json!(height);
            value["pixel_format"] = json!(format!("{pixel_format:?}"));
            value["fps"] = json!(stream.frames_per_second());
        }
        StreamFormat::Audio { sample_format, sample_rate, channels, .. } => {
            value["sample_rate"] = json!(sample_rate);
            value["channels"] = json!(channels);
            value["sample_format"] = json!(format!("{sample_format:?}"));
        }
    }
    value
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.global.verbose);

    let ffmpeg_level = match &cli.global.log_level {
        Some(level) => {
            parse_log_level(level).ok_or(format!("unsupported --log-level: {level}"))?
        }
        None => FfmpegLogLevel::Quiet,
    };
    recode::set_ffmpeg_log_level(ffmpeg_level);

    match cli.command {
        Commands::Transcode {
            input,
            output,
            bitrate,
            profile,
            level,
            width,
            height,
            fps,
            audio_bitrate,
            format,
            overwrite,
            no_progress,
        } => {
            ensure_writable_path(&output, overwrite)?;
            let profile: H264Profile = profile.parse()?;
            let params = TranscodeParams::new()
                .with_bitrate(bitrate)
                .with_profile(profile)
                .with_level(level)
                .with_resolution(width, height)
                .with_fps(fps)
                .with_audio_bitrate(audio_bitrate);
            params.validate()?;

            let mut transcoder = Transcoder::new().with_ffmpeg_log_level(ffmpeg_level);
            if let Some(format) = format {
                transcoder = transcoder.with_format_hint(format);
            }

            let summary = if no_progress {
                transcoder.try_transcode(&input, &output, &params, NoProgress)
            } else {
                let progress = TerminalProgress::new()?;
                let bar = progress.bar.clone();
                let result = transcoder.try_transcode(&input, &output, &params, progress);
                bar.finish_and_clear();
                result
            }?;

            println!(
                "{} {} ({} video frames, {} audio frames, {:.2?})",
                "saved".green().bold(),
                output.display(),
                summary.video_frames,
                summary.audio_frames,
                summary.elapsed
            );
        }
        Commands::Probe { input, json } => {
            let demuxer = Demuxer::open(&input)?;
            if json {
                let payload = json!({
                    "path": input.display().to_string(),
                    "format": demuxer.format_name(),
                    "duration_seconds": demuxer.duration().map(|duration| duration.as_secs_f64()),
                    "streams": demuxer.streams().into_iter().map(describe_stream).collect::<Vec<_>>(),
                });
                println!("{}", serde_json::to_string_pretty(&payload)?);
            } else {
                println!("Format: {}", demuxer.format_name());
                println!("Duration: {:?}", demuxer.duration());
                for stream in demuxer.streams() {
                    match stream.format {
                        StreamFormat::Video { width, height, .. } => println!(
                            "Video #{}: {}x{} @ {:.2} fps [{}]",
                            stream.index,
                            width,
                            height,
                            stream.frames_per_second().unwrap_or_default(),
                            stream.codec_name,
                        ),
                        StreamFormat::Audio { sample_rate, channels, .. } => println!(
                            "Audio #{}: {} Hz, {} ch [{}]",
                            stream.index, sample_rate, channels, stream.codec_name,
                        ),
                    }
                }
            }
        }
        Commands::Completions { shell } => {
            let mut command = Cli::command();
            clap_complete::generate(shell, &mut command, "recode", &mut std::io::stdout());
        }
    }

    Ok(())
}

fn main() {
    if let Err(error) = run() {
        eprintln!("{} {error}", "error:".red().bold());
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::{Cli, Commands, bar_position, parse_log_level};

    use clap::Parser;
    use recode::FfmpegLogLevel;

    #[test]
    fn parse_log_level_aliases() {
        assert_eq!(parse_log_level("quiet"), Some(FfmpegLogLevel::Quiet));
        assert_eq!(parse_log_level("warn"), Some(FfmpegLogLevel::Warning));
        assert!(parse_log_level("loud").is_none());
    }

    #[test]
    fn transcode_defaults_match_library_defaults() {
        let cli = Cli::parse_from(["recode", "transcode", "in.mkv", "out.mp4"]);
        let Commands::Transcode { bitrate, profile, level, width, height, fps, .. } = cli.command
        else {
            panic!("expected transcode command");
        };
        assert_eq!((bitrate, level), (2_000_000, 41));
        assert_eq!(profile, "main");
        assert_eq!((width, height, fps), (0, 0, 0));
    }

    #[test]
    fn global_flags_follow_subcommand() {
        let cli = Cli::parse_from(["recode", "probe", "in.mp4", "--json", "--verbose"]);
        assert!(cli.global.verbose);
        assert!(matches!(cli.command, Commands::Probe { json: true, .. }));
    }

    #[test]
    fn bar_position_is_clamped() {
        assert_eq!(bar_position(-5.0), 0);
        assert_eq!(bar_position(12.34), 123);
        assert_eq!(bar_position(150.0), 1000);
    }
}
