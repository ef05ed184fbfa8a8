use std::path::PathBuf;
use std::process;
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use image::{DynamicImage, Rgb, RgbImage};

use framepace_core::recording::domain::recorder_settings::RecorderSettings;
use framepace_core::recording::domain::recorder_state::RecorderEvent;
use framepace_core::recording::error::RecorderError;
use framepace_core::recording::recorder::Recorder;
use framepace_core::shared::frame_buffer::FrameBuffer;
use framepace_core::shared::pixel_format::PixelFormat;

/// Records a synthetic render loop into a constant frame rate video.
#[derive(Parser)]
#[command(name = "framepace")]
struct Cli {
    /// Output video file (overrides the settings file).
    output: Option<PathBuf>,

    /// JSON settings file. Flags given on the command line take precedence.
    #[arg(long)]
    settings: Option<PathBuf>,

    #[arg(long)]
    width: Option<u32>,

    #[arg(long)]
    height: Option<u32>,

    /// Output frame rate.
    #[arg(long, allow_negative_numbers = true)]
    fps: Option<f64>,

    /// Video bitrate in kbit/s.
    #[arg(long)]
    bitrate: Option<u32>,

    /// Video codec passed to ffmpeg as `-c:v`.
    #[arg(long)]
    codec: Option<String>,

    /// Path to the ffmpeg executable.
    #[arg(long)]
    ffmpeg: Option<PathBuf>,

    /// Seconds to wait for ffmpeg to exit after the last frame before killing it.
    #[arg(long, allow_negative_numbers = true)]
    close_timeout_secs: Option<f64>,

    /// Refuse to overwrite an existing output file.
    #[arg(long)]
    no_overwrite: bool,

    /// Seconds of render loop to record.
    #[arg(long, default_value = "3.0")]
    duration: f64,

    /// Base interval of the render loop in milliseconds.
    #[arg(long, default_value = "16")]
    render_interval_ms: u64,

    /// Extra irregular delay per rendered frame, up to this many milliseconds.
    #[arg(long, default_value = "0")]
    jitter_ms: u64,
}

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    validate(&cli)?;
    let settings = resolve_settings(&cli)?;

    let mut recorder = Recorder::new();
    let events = recorder.events();
    recorder.start(settings.clone(), false)?;

    let duration = Duration::try_from_secs_f64(cli.duration)?;
    let interval = Duration::from_millis(cli.render_interval_ms);
    let started = Instant::now();
    let mut tick: u64 = 0;
    let mut rendered: u64 = 0;

    while started.elapsed() < duration && recorder.is_recording() {
        if recorder.wants_frame() {
            let frame = render_frame(&settings, tick)?;
            if !queue_frame(&mut recorder, &frame)? {
                break;
            }
            rendered += 1;
        }
        tick += 1;
        thread::sleep(interval + jitter(tick, cli.jitter_ms));
        eprint!(
            "\rRecorded {:.2}s ({} queued)",
            recorder.recorded_duration().as_secs_f64(),
            recorder.num_frames_in_queue()
        );
    }
    eprintln!();

    recorder.stop();
    while !recorder.is_ready() {
        eprint!("\rFlushing {} queued frames", recorder.num_frames_in_queue());
        thread::sleep(Duration::from_millis(50));
    }
    eprintln!();

    let mut fault = None;
    for event in events.try_iter() {
        log::debug!("{event:?}");
        if let RecorderEvent::Faulted { reason, .. } = event {
            fault = Some(reason);
        }
    }
    if let Some(reason) = fault {
        return Err(format!("Recording failed: {reason}").into());
    }

    log::info!(
        "Rendered {rendered} frames, wrote {} frames ({:.2}s) to {}",
        recorder.frames_written(),
        recorder.recorded_duration().as_secs_f64(),
        settings.output_path.display()
    );
    Ok(())
}

fn validate(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    if !(cli.duration > 0.0 && Duration::try_from_secs_f64(cli.duration).is_ok()) {
        return Err(format!(
            "Duration must be a positive number of seconds, got {}",
            cli.duration
        )
        .into());
    }
    if let Some(fps) = cli.fps {
        if !(fps.is_finite() && fps > 0.0) {
            return Err(format!("Frame rate must be positive, got {fps}").into());
        }
    }
    if let Some(secs) = cli.close_timeout_secs {
        if Duration::try_from_secs_f64(secs).is_err() {
            return Err(format!(
                "Close timeout must be a non-negative number of seconds, got {secs}"
            )
            .into());
        }
    }
    if cli.render_interval_ms == 0 && cli.jitter_ms == 0 {
        return Err("Render interval and jitter cannot both be zero".into());
    }
    Ok(())
}

/// Settings file (or defaults) with command line flags applied on top.
fn resolve_settings(cli: &Cli) -> Result<RecorderSettings, Box<dyn std::error::Error>> {
    let mut settings = match &cli.settings {
        Some(path) => RecorderSettings::from_json_file(path)?,
        None => RecorderSettings::default(),
    };

    if let Some(output) = &cli.output {
        settings.output_path = output.clone();
    }
    if let Some(width) = cli.width {
        settings.width = width;
    }
    if let Some(height) = cli.height {
        settings.height = height;
    }
    if let Some(fps) = cli.fps {
        settings.fps = fps;
    }
    if let Some(bitrate) = cli.bitrate {
        settings.bitrate_kbps = bitrate;
    }
    if let Some(codec) = &cli.codec {
        settings.video_codec = codec.clone();
    }
    if let Some(ffmpeg) = &cli.ffmpeg {
        settings.ffmpeg_path = ffmpeg.clone();
    }
    if let Some(secs) = cli.close_timeout_secs {
        settings.close_timeout = Some(Duration::try_from_secs_f64(secs)?);
    }
    if cli.no_overwrite {
        settings.allow_overwrite = false;
    }
    Ok(settings)
}

/// Hands `frame` to the recorder. Returns false once the session has ended
/// under the render loop, e.g. after a writer fault; the fault itself is
/// reported through the recorder events.
fn queue_frame(
    recorder: &mut Recorder,
    frame: &FrameBuffer,
) -> Result<bool, Box<dyn std::error::Error>> {
    match recorder.add_frame(frame) {
        Ok(_) => Ok(true),
        Err(RecorderError::NotRecording) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Scrolling bars over a gradient, so dropped or duplicated frames are
/// visible in the output.
fn test_pattern(width: u32, height: u32, tick: u64) -> RgbImage {
    let offset = (tick % 4096) as u32 * 4;
    RgbImage::from_fn(width, height, |x, y| {
        let bar = ((x + offset) / 32) % 2 == 0;
        Rgb([
            ((x + offset) % 256) as u8,
            (y % 256) as u8,
            if bar { 255 } else { 32 },
        ])
    })
}

/// Renders the test pattern in the recorder's pixel layout.
fn render_frame(
    settings: &RecorderSettings,
    tick: u64,
) -> Result<FrameBuffer, Box<dyn std::error::Error>> {
    let rgb = test_pattern(settings.width, settings.height, tick);
    let (w, h) = rgb.dimensions();
    let frame = match settings.pixel_format {
        PixelFormat::Rgb24 => FrameBuffer::from(rgb),
        PixelFormat::Rgba => FrameBuffer::from(DynamicImage::ImageRgb8(rgb).to_rgba8()),
        PixelFormat::Bgra => {
            let mut raw = DynamicImage::ImageRgb8(rgb).to_rgba8().into_raw();
            for px in raw.chunks_exact_mut(4) {
                px.swap(0, 2);
            }
            FrameBuffer::new(raw, w, h, PixelFormat::Bgra)?
        }
        PixelFormat::Gray8 => {
            let raw = DynamicImage::ImageRgb8(rgb).to_luma8().into_raw();
            FrameBuffer::new(raw, w, h, PixelFormat::Gray8)?
        }
    };
    Ok(frame)
}

/// Deterministic wobble in `0..=max_ms` so the render loop runs irregularly.
fn jitter(tick: u64, max_ms: u64) -> Duration {
    if max_ms == 0 {
        return Duration::ZERO;
    }
    let phase = (tick as f64 * 1.7).sin().abs();
    Duration::from_secs_f64(phase * max_ms as f64 / 1000.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("framepace").chain(args.iter().copied()))
    }

    #[test]
    fn test_flags_override_defaults() {
        let cli = cli(&[
            "clip.mp4",
            "--width",
            "320",
            "--fps",
            "24",
            "--close-timeout-secs",
            "2.5",
            "--no-overwrite",
        ]);
        let settings = resolve_settings(&cli).unwrap();
        assert_eq!(settings.output_path, PathBuf::from("clip.mp4"));
        assert_eq!(settings.width, 320);
        assert_eq!(settings.height, RecorderSettings::default().height);
        assert_eq!(settings.fps, 24.0);
        assert_eq!(settings.close_timeout, Some(Duration::from_millis(2500)));
        assert!(!settings.allow_overwrite);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(validate(&cli(&["--duration", "0"])).is_err());
        assert!(validate(&cli(&["--fps", "-1"])).is_err());
        assert!(validate(&cli(&["--close-timeout-secs", "-3"])).is_err());
        assert!(validate(&cli(&["--close-timeout-secs", "1e30"])).is_err());
        assert!(validate(&cli(&["--duration", "1e30"])).is_err());
        assert!(validate(&cli(&["--duration", "inf"])).is_err());
        assert!(validate(&cli(&["--render-interval-ms", "0"])).is_err());
        assert!(validate(&cli(&[])).is_ok());
    }

    #[test]
    fn test_ended_session_stops_render_loop_without_error() {
        let mut recorder = Recorder::new();
        let frame = render_frame(&RecorderSettings::default(), 0).unwrap();
        assert!(!queue_frame(&mut recorder, &frame).unwrap());
    }

    #[test]
    fn test_render_frame_matches_every_layout() {
        for &format in PixelFormat::ALL {
            let settings = RecorderSettings {
                width: 16,
                height: 8,
                pixel_format: format,
                ..RecorderSettings::default()
            };
            let frame = render_frame(&settings, 3).unwrap();
            assert_eq!(frame.format(), format);
            assert_eq!(frame.len(), settings.frame_len());
        }
    }

    #[test]
    fn test_pattern_moves_between_ticks() {
        assert_ne!(test_pattern(64, 4, 0), test_pattern(64, 4, 1));
    }

    #[test]
    fn test_jitter_is_bounded() {
        assert_eq!(jitter(5, 0), Duration::ZERO);
        for tick in 0..100 {
            assert!(jitter(tick, 10) <= Duration::from_millis(10));
        }
    }
}
