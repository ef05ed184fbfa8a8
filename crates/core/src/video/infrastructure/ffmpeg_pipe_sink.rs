use std::io::{ErrorKind, Read, Write};
use std::process::{Child, ChildStdin, ExitStatus, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::recording::domain::frame_sink::{FrameSink, SinkError, SinkFactory};
use crate::recording::domain::recorder_settings::RecorderSettings;
use crate::shared::constants::{CLOSE_POLL_INTERVAL_MS, STDERR_TAIL_BYTES};
use crate::video::infrastructure::ffmpeg_command::FfmpegCommand;

/// Streams raw frames into the stdin of a spawned encoder process.
///
/// stdout is discarded. stderr is drained on a helper thread so the encoder
/// never blocks on a full pipe; its last few kilobytes are kept for error
/// reports.
pub struct FfmpegPipeSink {
    command_line: String,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stderr_drain: Option<JoinHandle<Vec<u8>>>,
    close_timeout: Option<Duration>,
}

impl FfmpegPipeSink {
    pub fn spawn(
        command: &FfmpegCommand,
        close_timeout: Option<Duration>,
    ) -> Result<Self, SinkError> {
        let command_line = command.to_string();
        let mut child = command
            .to_command()
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| SinkError::Spawn {
                program: command.program.display().to_string(),
                source: e,
            })?;

        let stdin = child.stdin.take();
        let stderr_drain = match child.stderr.take() {
            Some(mut stderr) => {
                let drain = std::thread::Builder::new()
                    .name("framepace-encoder-stderr".to_string())
                    .spawn(move || {
                        let mut tail = Vec::new();
                        let mut chunk = [0u8; 1024];
                        loop {
                            match stderr.read(&mut chunk) {
                                Ok(0) => break,
                                Ok(n) => push_tail(&mut tail, &chunk[..n], STDERR_TAIL_BYTES),
                                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                                Err(_) => break,
                            }
                        }
                        tail
                    });
                match drain {
                    Ok(handle) => Some(handle),
                    Err(e) => {
                        kill_and_reap(&mut child);
                        return Err(e.into());
                    }
                }
            }
            None => None,
        };

        log::info!("Encoder started (pid {}): {command_line}", child.id());

        Ok(Self {
            command_line,
            child: Some(child),
            stdin,
            stderr_drain,
            close_timeout,
        })
    }

    fn collect_stderr(&mut self) -> String {
        let tail = self
            .stderr_drain
            .take()
            .and_then(|h| h.join().ok())
            .unwrap_or_default();
        String::from_utf8_lossy(&tail).trim().to_string()
    }
}

impl FrameSink for FfmpegPipeSink {
    fn write(&mut self, bytes: &[u8]) -> Result<usize, SinkError> {
        let stdin = self.stdin.as_mut().ok_or(SinkError::Closed)?;
        let mut written = 0;
        while written < bytes.len() {
            match stdin.write(&bytes[written..]) {
                Ok(0) => break,
                Ok(n) => written += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if written == 0 => return Err(e.into()),
                Err(e) => {
                    log::warn!("Encoder pipe failed after {written} bytes: {e}");
                    break;
                }
            }
        }
        Ok(written)
    }

    fn close(&mut self) -> Result<(), SinkError> {
        drop(self.stdin.take());
        let mut child = self.child.take().ok_or(SinkError::Closed)?;

        let outcome = match self.close_timeout {
            None => child.wait().map(Some),
            Some(timeout) => wait_with_timeout(&mut child, timeout),
        };

        match outcome {
            Ok(Some(status)) => {
                let stderr = self.collect_stderr();
                if status.success() {
                    log::debug!("Encoder exited cleanly: {}", self.command_line);
                    Ok(())
                } else {
                    Err(SinkError::ProcessFailed {
                        status: status.to_string(),
                        stderr,
                    })
                }
            }
            Ok(None) => {
                log::warn!(
                    "Encoder did not exit within {:?}, killing it",
                    self.close_timeout.unwrap_or_default()
                );
                kill_and_reap(&mut child);
                Err(SinkError::ProcessFailed {
                    status: "killed after close timeout".to_string(),
                    stderr: self.collect_stderr(),
                })
            }
            Err(e) => {
                kill_and_reap(&mut child);
                self.collect_stderr();
                Err(e.into())
            }
        }
    }
}

impl Drop for FfmpegPipeSink {
    fn drop(&mut self) {
        drop(self.stdin.take());
        if let Some(mut child) = self.child.take() {
            log::warn!("Encoder sink dropped without close, killing encoder");
            kill_and_reap(&mut child);
        }
    }
}

/// Spawns one [`FfmpegPipeSink`] per session from the session settings.
#[derive(Debug, Clone, Copy, Default)]
pub struct FfmpegSinkFactory;

impl SinkFactory for FfmpegSinkFactory {
    fn open(&self, settings: &RecorderSettings) -> Result<Box<dyn FrameSink>, SinkError> {
        let command = FfmpegCommand::from_settings(settings);
        let sink = FfmpegPipeSink::spawn(&command, settings.close_timeout)?;
        Ok(Box::new(sink))
    }
}

/// `Ok(None)` when the process is still running at the deadline.
fn wait_with_timeout(
    child: &mut Child,
    timeout: Duration,
) -> std::io::Result<Option<ExitStatus>> {
    let deadline = Instant::now() + timeout;
    let poll = Duration::from_millis(CLOSE_POLL_INTERVAL_MS);
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(None);
        }
        std::thread::sleep(poll.min(deadline - now));
    }
}

fn kill_and_reap(child: &mut Child) {
    if let Err(e) = child.kill() {
        log::debug!("Kill of encoder failed: {e}");
    }
    if let Err(e) = child.wait() {
        log::error!("Failed to reap encoder process: {e}");
    }
}

/// Appends `chunk` to `tail`, keeping at most the last `limit` bytes.
fn push_tail(tail: &mut Vec<u8>, chunk: &[u8], limit: usize) {
    tail.extend_from_slice(chunk);
    if tail.len() > limit {
        let excess = tail.len() - limit;
        tail.drain(..excess);
    }
}
