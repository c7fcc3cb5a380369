use std::ffi::OsString;
use std::io::{self, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use super::{wait_for, EncoderConfig, ToolsConfig};
use crate::chunker::PcmSink;
use crate::error::{AudioError, Result};
use crate::format::StreamFormat;

/// A running `lame` process: raw PCM in, MP3 out
pub struct Mp3Encoder {
    format: StreamFormat,
    child: Child,
    stdin: Option<ChildStdin>,
}

impl Mp3Encoder {
    /// Start the encoder. The returned stdout carries the MP3 stream.
    pub fn spawn(
        tools: &ToolsConfig,
        config: &EncoderConfig,
        format: StreamFormat,
    ) -> Result<(Self, ChildStdout)> {
        let args = lame_args(config, format)?;
        tracing::debug!("Spawning {} {:?}", tools.lame.display(), args);

        let mut child = Command::new(&tools.lame)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| AudioError::Process(format!("{}: {}", tools.lame.display(), e)))?;

        let stdin = child.stdin.take();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AudioError::Process("lame stdout unavailable".to_string()))?;

        Ok((
            Self {
                format,
                child,
                stdin,
            },
            stdout,
        ))
    }
}

/// Command line for encoding raw PCM in `format`
pub(crate) fn lame_args(config: &EncoderConfig, format: StreamFormat) -> Result<Vec<OsString>> {
    let mode = match format.channels {
        1 => "m",
        2 => "j",
        n => {
            return Err(AudioError::Config(format!(
                "MP3 encoding supports 1 or 2 channels, not {}",
                n
            )))
        }
    };

    let mut args: Vec<String> = vec![
        "-r".into(),
        "--quiet".into(),
        "--replaygain-accurate".into(),
        "--id3v2-only".into(),
        "-s".into(),
        (format.rate as f64 / 1000.0).to_string(),
        "--bitwidth".into(),
        format.bits.to_string(),
        "-m".into(),
        mode.into(),
    ];
    match config.max_bitrate {
        Some(bitrate) => {
            args.push("--abr".into());
            args.push(bitrate.to_string());
        }
        None => {
            args.push("--vbr-new".into());
            args.push(format!("-V{}", config.vbr_quality.min(9)));
        }
    }
    args.push("-".into());
    args.push("-".into());

    Ok(args.into_iter().map(OsString::from).collect())
}

impl Write for Mp3Encoder {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.stdin.as_mut() {
            Some(stdin) => stdin.write(buf),
            None => Err(AudioError::Closed("encoder input is closed".to_string()).into_io()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.stdin.as_mut() {
            Some(stdin) => stdin.flush(),
            None => Ok(()),
        }
    }
}

impl PcmSink for Mp3Encoder {
    fn format(&self) -> StreamFormat {
        self.format
    }

    fn init(&mut self, _fixed_size: Option<u64>) -> Result<()> {
        Ok(())
    }

    fn close_with_error(&mut self, err: Option<AudioError>) -> Result<()> {
        // dropping stdin lets lame drain and exit
        let had_input = self.stdin.take().is_some();
        match err {
            None if had_input => wait_for("lame", &mut self.child),
            None => Ok(()),
            Some(err) => {
                if had_input {
                    if let Err(e) = self.child.kill() {
                        tracing::debug!("Killing lame: {}", e);
                    }
                    let _ = self.child.wait();
                }
                Err(err)
            }
        }
    }
}

impl Drop for Mp3Encoder {
    fn drop(&mut self) {
        if self.stdin.take().is_some() {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}
