//! Operator backed by an external executable.
//!
//! The tile is written as PNG into a scratch directory and the program is
//! invoked as `<program> [pre args] -i <in.png> -o <out.png> -s <scale>
//! [-n <model>] [extra args]`, the calling convention of the ncnn-vulkan
//! super-resolution tools.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::core::buffer::ImageBuffer;
use crate::core::scale::Scale;
use crate::enhance::{integer_scale, EnhanceOperator};
use crate::error::EnhanceError;
use crate::io;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);
const POLL_INTERVAL: Duration = Duration::from_millis(20);
const STDERR_TAIL: usize = 512;

#[derive(Debug, Clone)]
pub struct CommandOperator {
    program: PathBuf,
    pre_args: Vec<String>,
    model: Option<String>,
    extra_args: Vec<String>,
    timeout: Duration,
    name: String,
}

impl CommandOperator {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        let program = program.into();
        let name = format!("command:{}", program.display());
        Self {
            program,
            pre_args: Vec::new(),
            model: None,
            extra_args: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
            name,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        let model = model.into();
        self.name = format!("command:{}#{model}", self.program.display());
        self.model = Some(model);
        self
    }

    /// Arguments placed before the `-i` flag, e.g. a script for an interpreter.
    pub fn with_pre_args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        self.pre_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        self.extra_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn command(&self, input: &Path, output: &Path, scale: u32) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.pre_args)
            .arg("-i")
            .arg(input)
            .arg("-o")
            .arg(output)
            .arg("-s")
            .arg(scale.to_string());
        if let Some(model) = &self.model {
            cmd.arg("-n").arg(model);
        }
        cmd.args(&self.extra_args);
        cmd
    }
}

/// Last few hundred bytes of the captured stderr, for error messages.
fn stderr_tail(path: &Path) -> String {
    let text = fs::read_to_string(path).unwrap_or_default();
    let text = text.trim();
    let start = text
        .char_indices()
        .rev()
        .nth(STDERR_TAIL)
        .map(|(i, _)| i)
        .unwrap_or(0);
    text[start..].to_string()
}

impl EnhanceOperator<u8> for CommandOperator {
    fn name(&self) -> &str {
        &self.name
    }

    fn enhance(&self, tile: &ImageBuffer<u8>, scale: Scale) -> Result<ImageBuffer<u8>, EnhanceError> {
        let factor = integer_scale(&self.name, scale)?;
        let dir = tempfile::Builder::new().prefix("tilescale-").tempdir()?;
        let input = dir.path().join("input.png");
        let output = dir.path().join("output.png");
        let stderr_path = dir.path().join("stderr.log");
        io::save_image_as(tile, &input, image::ImageFormat::Png)?;

        let mut child = self
            .command(&input, &output, factor)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(File::create(&stderr_path)?)
            .spawn()?;

        let started = Instant::now();
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if started.elapsed() >= self.timeout {
                warn!(program = %self.program.display(), "enhance command timed out, killing it");
                // the process may exit between try_wait and kill
                let _ = child.kill();
                let _ = child.wait();
                return Err(EnhanceError::Timeout { after: self.timeout });
            }
            thread::sleep(POLL_INTERVAL);
        };
        debug!(elapsed_ms = started.elapsed().as_millis() as u64, %status, "enhance command finished");

        if !status.success() {
            let tail = stderr_tail(&stderr_path);
            let status = if tail.is_empty() {
                status.to_string()
            } else {
                format!("{status}: {tail}")
            };
            return Err(EnhanceError::Process { status });
        }

        let enhanced = image::open(&output)?;
        Ok(io::with_channels(enhanced, tile.channels())?)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn script(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("op.sh");
        fs::write(&path, body).unwrap();
        path
    }

    fn sh(script: &Path) -> CommandOperator {
        CommandOperator::new("sh").with_pre_args([script.to_string_lossy().into_owned()])
    }

    #[test]
    fn test_runs_program_and_reads_output() {
        let dir = tempfile::tempdir().unwrap();
        // -i $2 -o $4: copy input to output
        let op = sh(&script(dir.path(), "cp \"$2\" \"$4\"\n"));
        let tile = ImageBuffer::filled(6, 4, &[12u8, 34, 56]).unwrap();
        let out = op.enhance(&tile, Scale::integer(1)).unwrap();
        assert_eq!(out, tile);
    }

    #[test]
    fn test_passes_scale_and_model() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("args.txt");
        let body = format!("echo \"$@\" > '{}'\ncp \"$2\" \"$4\"\n", log.display());
        let op = sh(&script(dir.path(), &body)).with_model("x4plus").with_args(["-g", "0"]);
        let tile = ImageBuffer::filled(2, 2, &[1u8]).unwrap();
        op.enhance(&tile, Scale::integer(1)).unwrap();
        let args = fs::read_to_string(&log).unwrap();
        assert!(args.contains("-s 1 -n x4plus -g 0"), "{args}");
    }

    #[test]
    fn test_nonzero_exit_is_process_error() {
        let dir = tempfile::tempdir().unwrap();
        let op = sh(&script(dir.path(), "echo 'model not found' >&2\nexit 3\n"));
        let tile = ImageBuffer::filled(2, 2, &[1u8, 2, 3]).unwrap();
        match op.enhance(&tile, Scale::integer(2)).unwrap_err() {
            EnhanceError::Process { status } => assert!(status.contains("model not found"), "{status}"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_timeout_kills_process() {
        let dir = tempfile::tempdir().unwrap();
        let op = sh(&script(dir.path(), "sleep 5\n")).with_timeout(Duration::from_millis(200));
        let tile = ImageBuffer::filled(2, 2, &[1u8, 2, 3]).unwrap();
        let started = Instant::now();
        let err = op.enhance(&tile, Scale::integer(2)).unwrap_err();
        assert!(matches!(err, EnhanceError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn test_fractional_scale_unsupported() {
        let op = CommandOperator::new("true");
        let tile = ImageBuffer::filled(2, 2, &[1u8, 2, 3]).unwrap();
        let err = op.enhance(&tile, Scale::new(1.5).unwrap()).unwrap_err();
        assert!(matches!(err, EnhanceError::UnsupportedScale { .. }));
    }
}
