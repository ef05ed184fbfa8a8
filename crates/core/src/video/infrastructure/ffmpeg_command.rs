use std::fmt;
use std::path::PathBuf;
use std::process::Command;

use crate::recording::domain::recorder_settings::RecorderSettings;

/// Command line of the encoder process that reads raw frames from stdin.
#[derive(Clone, Debug, PartialEq)]
pub struct FfmpegCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl FfmpegCommand {
    pub fn from_settings(settings: &RecorderSettings) -> Self {
        let fps = settings.fps.to_string();
        let mut args: Vec<String> = Vec::new();

        args.push(if settings.allow_overwrite { "-y" } else { "-n" }.into());
        args.push("-an".into());

        // Input: headerless raw frames on stdin.
        args.extend([
            "-r".into(),
            fps.clone(),
            "-s".into(),
            format!("{}x{}", settings.width, settings.height),
            "-f".into(),
            "rawvideo".into(),
            "-pix_fmt".into(),
            settings.pixel_format.ffmpeg_name().into(),
        ]);
        args.extend(split_args(&settings.extra_input_args));
        args.extend(["-i".into(), "pipe:".into()]);

        args.extend([
            "-r".into(),
            fps,
            "-c:v".into(),
            settings.video_codec.clone(),
            "-b:v".into(),
            format!("{}k", settings.bitrate_kbps),
        ]);
        args.extend(split_args(&settings.extra_output_args));
        args.push(settings.output_path.to_string_lossy().into_owned());

        Self {
            program: settings.ffmpeg_program().to_path_buf(),
            args,
        }
    }

    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd
    }
}

impl fmt::Display for FfmpegCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

fn split_args(extra: &str) -> impl Iterator<Item = String> + '_ {
    extra.split_whitespace().map(str::to_string)
}
