use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::shared::constants::{
    DEFAULT_BITRATE_KBPS, DEFAULT_EXTRA_OUTPUT_ARGS, DEFAULT_FFMPEG_PATH, DEFAULT_FPS,
    DEFAULT_HEIGHT, DEFAULT_OUTPUT_PATH, DEFAULT_VIDEO_CODEC, DEFAULT_WIDTH,
};
use crate::recording::domain::pacing::is_representable_fps;
use crate::shared::pixel_format::PixelFormat;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("failed to read settings from {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse settings in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Everything one recording session needs to know.
///
/// The recorder keeps its own copy from `start` until the session ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderSettings {
    pub output_path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub bitrate_kbps: u32,
    pub video_codec: String,
    pub pixel_format: PixelFormat,
    /// Passed to ffmpeg before `-i pipe:`.
    pub extra_input_args: String,
    /// Passed to ffmpeg before the output path.
    pub extra_output_args: String,
    pub allow_overwrite: bool,
    pub ffmpeg_path: PathBuf,
    /// How long closing the sink may wait for the encoder to exit before it
    /// is killed. `None` waits indefinitely.
    #[serde(with = "optional_secs", rename = "close_timeout_secs")]
    pub close_timeout: Option<Duration>,
}

impl Default for RecorderSettings {
    fn default() -> Self {
        Self {
            output_path: PathBuf::from(DEFAULT_OUTPUT_PATH),
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            fps: DEFAULT_FPS,
            bitrate_kbps: DEFAULT_BITRATE_KBPS,
            video_codec: DEFAULT_VIDEO_CODEC.to_string(),
            pixel_format: PixelFormat::default(),
            extra_input_args: String::new(),
            extra_output_args: DEFAULT_EXTRA_OUTPUT_ARGS.to_string(),
            allow_overwrite: true,
            ffmpeg_path: PathBuf::from(DEFAULT_FFMPEG_PATH),
            close_timeout: None,
        }
    }
}

impl RecorderSettings {
    pub fn from_json_file(path: &Path) -> Result<Self, SettingsError> {
        let json = fs::read_to_string(path).map_err(|e| SettingsError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        serde_json::from_str(&json).map_err(|e| SettingsError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Checks the numeric invariants. The output path is checked separately
    /// by the recorder since it has its own error kind.
    pub fn validate(&self) -> Result<(), String> {
        if !(self.fps.is_finite() && self.fps > 0.0) {
            return Err(format!("frame rate must be positive, got {}", self.fps));
        }
        if !is_representable_fps(self.fps) {
            return Err(format!("frame rate {} is too low", self.fps));
        }
        if self.width == 0 || self.height == 0 {
            return Err(format!(
                "resolution must be non-zero, got {}x{}",
                self.width, self.height
            ));
        }
        Ok(())
    }

    /// Bytes per raw frame on the pipe.
    pub fn frame_len(&self) -> usize {
        self.pixel_format.frame_len(self.width, self.height)
    }

    /// Encoder executable, falling back to `ffmpeg` when unset.
    pub fn ffmpeg_program(&self) -> &Path {
        if self.ffmpeg_path.as_os_str().is_empty() {
            Path::new(DEFAULT_FFMPEG_PATH)
        } else {
            &self.ffmpeg_path
        }
    }
}

mod optional_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&d.as_secs_f64()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let secs = Option::<f64>::deserialize(d)?;
        match secs {
            Some(s) => Duration::try_from_secs_f64(s).map(Some).map_err(|e| {
                serde::de::Error::custom(format!("invalid close timeout {s} seconds: {e}"))
            }),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let s = RecorderSettings::default();
        assert_eq!(s.output_path, PathBuf::from("output.mp4"));
        assert_eq!((s.width, s.height), (640, 480));
        assert_eq!(s.fps, 30.0);
        assert_eq!(s.bitrate_kbps, 20_000);
        assert_eq!(s.video_codec, "libx264");
        assert_eq!(s.extra_output_args, "-pix_fmt yuv420p -vsync 1 -g 1");
        assert!(s.allow_overwrite);
        assert_eq!(s.close_timeout, None);
        assert!(s.validate().is_ok());
    }

    #[rstest]
    #[case::zero_fps(0.0, 640, 480)]
    #[case::negative_fps(-1.0, 640, 480)]
    #[case::nan_fps(f64::NAN, 640, 480)]
    #[case::unrepresentable_fps(1e-300, 640, 480)]
    #[case::zero_width(30.0, 0, 480)]
    #[case::zero_height(30.0, 640, 0)]
    fn test_validate_rejects(#[case] fps: f64, #[case] width: u32, #[case] height: u32) {
        let s = RecorderSettings {
            fps,
            width,
            height,
            ..RecorderSettings::default()
        };
        assert!(s.validate().is_err());
    }

    #[test]
    fn test_frame_len_follows_pixel_format() {
        let s = RecorderSettings {
            width: 4,
            height: 2,
            pixel_format: PixelFormat::Bgra,
            ..RecorderSettings::default()
        };
        assert_eq!(s.frame_len(), 32);
    }

    #[test]
    fn test_empty_ffmpeg_path_falls_back() {
        let s = RecorderSettings {
            ffmpeg_path: PathBuf::new(),
            ..RecorderSettings::default()
        };
        assert_eq!(s.ffmpeg_program(), Path::new("ffmpeg"));
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let s: RecorderSettings =
            serde_json::from_str(r#"{"fps": 60.0, "output_path": "clip.mkv"}"#).unwrap();
        assert_eq!(s.fps, 60.0);
        assert_eq!(s.output_path, PathBuf::from("clip.mkv"));
        assert_eq!(s.width, 640);
        assert_eq!(s.video_codec, "libx264");
    }

    #[test]
    fn test_close_timeout_in_seconds() {
        let s: RecorderSettings =
            serde_json::from_str(r#"{"close_timeout_secs": 2.5}"#).unwrap();
        assert_eq!(s.close_timeout, Some(Duration::from_millis(2500)));

        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json["close_timeout_secs"], 2.5);
    }

    #[rstest]
    #[case::negative(r#"{"close_timeout_secs": -1}"#)]
    #[case::too_large(r#"{"close_timeout_secs": 1e30}"#)]
    fn test_out_of_range_close_timeout_rejected(#[case] json: &str) {
        let result: Result<RecorderSettings, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }

    #[test]
    fn test_too_large_close_timeout_in_file_is_parse_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("settings.json");
        fs::write(&path, r#"{"close_timeout_secs": 1e30}"#).unwrap();
        assert!(matches!(
            RecorderSettings::from_json_file(&path),
            Err(SettingsError::Parse { .. })
        ));
    }

    #[test]
    fn test_from_json_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("settings.json");
        let written = RecorderSettings {
            width: 320,
            height: 240,
            pixel_format: PixelFormat::Rgba,
            ..RecorderSettings::default()
        };
        fs::write(&path, serde_json::to_string_pretty(&written).unwrap()).unwrap();

        let loaded = RecorderSettings::from_json_file(&path).unwrap();
        assert_eq!(loaded, written);
    }

    #[test]
    fn test_from_json_file_errors() {
        let tmp = TempDir::new().unwrap();
        let missing = tmp.path().join("missing.json");
        assert!(matches!(
            RecorderSettings::from_json_file(&missing),
            Err(SettingsError::Read { .. })
        ));

        let broken = tmp.path().join("broken.json");
        fs::write(&broken, "{ not json").unwrap();
        assert!(matches!(
            RecorderSettings::from_json_file(&broken),
            Err(SettingsError::Parse { .. })
        ));
    }
}
