//! External encoder and decoder processes
//!
//! `lame` turns raw PCM into MP3 for the compressed stream; `flac` decodes
//! archive files into WAV. Both are treated as black boxes talking over
//! stdin/stdout.

mod flac;
mod lame;

pub use flac::FlacDecoder;
pub use lame::Mp3Encoder;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::{Child, ExitStatus};

use crate::error::{AudioError, Result};

/// Where to find the external tools
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub lame: PathBuf,
    pub flac: PathBuf,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            lame: PathBuf::from("lame"),
            flac: PathBuf::from("flac"),
        }
    }
}

/// MP3 encoder settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// Average bitrate in kbps; when unset, VBR at `vbr_quality` is used
    pub max_bitrate: Option<u32>,
    /// LAME VBR quality, 0 (best) to 9
    pub vbr_quality: u8,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            max_bitrate: None,
            vbr_quality: 2,
        }
    }
}

/// Wait for `child` and turn a failed exit into a process error
pub(crate) fn wait_for(name: &str, child: &mut Child) -> Result<()> {
    let status = child
        .wait()
        .map_err(|e| AudioError::Process(format!("{}: {}", name, e)))?;
    check_status(name, status)
}

fn check_status(name: &str, status: ExitStatus) -> Result<()> {
    if status.success() {
        Ok(())
    } else {
        Err(AudioError::Process(format!("{} exited with {}", name, status)))
    }
}
