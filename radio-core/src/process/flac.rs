use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::process::{Child, ChildStdout, Command, Stdio};

use super::{wait_for, ToolsConfig};
use crate::error::{AudioError, Result};

/// A running `flac -d`, producing WAV bytes on its stdout
pub struct FlacDecoder {
    child: Child,
    stdout: ChildStdout,
    finished: bool,
}

impl FlacDecoder {
    pub fn spawn(tools: &ToolsConfig, input: &Path) -> Result<Self> {
        let file = File::open(input)?;
        tracing::debug!("Decoding {}", input.display());

        let mut child = Command::new(&tools.flac)
            .args(["-s", "-c", "-d", "-"])
            .stdin(Stdio::from(file))
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| AudioError::Process(format!("{}: {}", tools.flac.display(), e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AudioError::Process("flac stdout unavailable".to_string()))?;

        Ok(Self {
            child,
            stdout,
            finished: false,
        })
    }
}

impl Read for FlacDecoder {
    /// Reads WAV bytes; a failed exit status surfaces as an error after the
    /// last byte.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.finished {
            return Ok(0);
        }
        let n = self.stdout.read(buf)?;
        if n == 0 && !buf.is_empty() {
            self.finished = true;
            wait_for("flac", &mut self.child).map_err(AudioError::into_io)?;
        }
        Ok(n)
    }
}

impl Drop for FlacDecoder {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_input() {
        let err = FlacDecoder::spawn(&ToolsConfig::default(), Path::new("/nonexistent.flac"));
        assert!(matches!(err, Err(AudioError::Io(_))));
    }
}
