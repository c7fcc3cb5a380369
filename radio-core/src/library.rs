//! The music library, as far as the play-out engine needs it
//!
//! `Catalog` lists what can be played, `ContentResolver` turns a pick into
//! decoded PCM. `DirectoryLibrary` implements both over a plain directory
//! tree of WAV and FLAC files.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

use crate::error::{AudioError, Result};
use crate::format::StreamFormat;
use crate::process::{FlacDecoder, ToolsConfig};
use crate::wav::{PcmSource, WavReader};

/// Identifies one performance in the library
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PerformanceId(pub String);

impl fmt::Display for PerformanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PerformanceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// One playable recording, possibly split over several files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Performance {
    pub id: PerformanceId,
    pub title: String,
    /// Source files, in playing order
    #[serde(skip)]
    pub parts: Vec<PathBuf>,
}

impl fmt::Display for Performance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.title)
    }
}

pub trait Catalog: Send + Sync {
    fn performances(&self) -> Vec<Performance>;

    fn performance(&self, id: &PerformanceId) -> Option<Performance> {
        self.performances().into_iter().find(|p| &p.id == id)
    }
}

pub trait ContentResolver: Send + Sync {
    /// Decoded audio of the whole performance
    fn open(&self, performance: &Performance) -> Result<Box<dyn PcmSource>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AudioKind {
    Wav,
    Flac,
}

fn audio_kind(path: &Path) -> Option<AudioKind> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "wav" => Some(AudioKind::Wav),
        "flac" => Some(AudioKind::Flac),
        _ => None,
    }
}

/// A directory tree of audio files.
///
/// Every directory holding audio files is one performance, its files played
/// in name order. Audio files directly under the root each stand alone.
pub struct DirectoryLibrary {
    root: PathBuf,
    tools: ToolsConfig,
    performances: RwLock<Vec<Performance>>,
}

impl DirectoryLibrary {
    pub fn new(root: impl Into<PathBuf>, tools: ToolsConfig) -> Result<Self> {
        let library = Self {
            root: root.into(),
            tools,
            performances: RwLock::new(Vec::new()),
        };
        library.refresh()?;
        Ok(library)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Rescan the directory tree. Returns the number of performances found.
    pub fn refresh(&self) -> Result<usize> {
        let mut found = Vec::new();
        self.scan(&self.root, true, &mut found)?;
        found.sort_by(|a, b| a.id.cmp(&b.id));

        tracing::info!(
            "Found {} performances in {}",
            found.len(),
            self.root.display()
        );
        let count = found.len();
        *self.performances.write() = found;
        Ok(count)
    }

    fn id_for(&self, path: &Path) -> PerformanceId {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        let parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        PerformanceId(parts.join("/"))
    }

    fn title_for(path: &Path) -> String {
        let name = match audio_kind(path) {
            Some(_) => path.file_stem(),
            None => path.file_name(),
        };
        name.map(|n| n.to_string_lossy().replace('_', " "))
            .unwrap_or_default()
    }

    fn scan(&self, dir: &Path, is_root: bool, found: &mut Vec<Performance>) -> Result<()> {
        let mut files = Vec::new();
        let mut dirs = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                dirs.push(path);
            } else if audio_kind(&path).is_some() {
                files.push(path);
            }
        }
        files.sort();
        dirs.sort();

        if is_root {
            found.extend(files.into_iter().map(|file| Performance {
                id: self.id_for(&file),
                title: Self::title_for(&file),
                parts: vec![file],
            }));
        } else if !files.is_empty() {
            found.push(Performance {
                id: self.id_for(dir),
                title: Self::title_for(dir),
                parts: files,
            });
        }

        for sub in dirs {
            if let Err(e) = self.scan(&sub, false, found) {
                tracing::warn!("Skipping {}: {}", sub.display(), e);
            }
        }
        Ok(())
    }

    /// Decoded audio of a single file
    pub fn open_part(&self, path: &Path) -> Result<Box<dyn PcmSource>> {
        open_part(&self.tools, path)
    }
}

fn open_part(tools: &ToolsConfig, path: &Path) -> Result<Box<dyn PcmSource>> {
    match audio_kind(path) {
        Some(AudioKind::Wav) => {
            let file = BufReader::new(File::open(path)?);
            Ok(Box::new(WavReader::new(file)?))
        }
        Some(AudioKind::Flac) => {
            let decoder = FlacDecoder::spawn(tools, path)?;
            Ok(Box::new(WavReader::new(decoder)?))
        }
        None => Err(AudioError::UnsupportedFormat(format!(
            "{} is not a WAV or FLAC file",
            path.display()
        ))),
    }
}

impl Catalog for DirectoryLibrary {
    fn performances(&self) -> Vec<Performance> {
        self.performances.read().clone()
    }

    fn performance(&self, id: &PerformanceId) -> Option<Performance> {
        self.performances.read().iter().find(|p| &p.id == id).cloned()
    }
}

impl ContentResolver for DirectoryLibrary {
    fn open(&self, performance: &Performance) -> Result<Box<dyn PcmSource>> {
        let mut format: Option<StreamFormat> = None;
        let mut total = 0u64;

        for (i, part) in performance.parts.iter().enumerate() {
            let source = self.open_part(part)?;
            let part_format = source.format();
            match format {
                None => format = Some(part_format),
                Some(f) if f != part_format => {
                    return Err(AudioError::FormatMismatch(format!(
                        "part {} of {} is {}; previous parts are {}",
                        i + 1,
                        performance.id,
                        part_format,
                        f
                    )))
                }
                Some(_) => {}
            }

            let frame = part_format.bytes_per_frame() as u64;
            match source.size() {
                Some(size) if size > 0 && size % frame == 0 => total += size,
                size => {
                    return Err(AudioError::Parse(format!(
                        "{}: data length {:?} is not a positive multiple of {} bytes",
                        part.display(),
                        size,
                        frame
                    )))
                }
            }
        }

        let format = format.ok_or_else(|| AudioError::NotFound(performance.id.to_string()))?;
        Ok(Box::new(Concatenation {
            tools: self.tools.clone(),
            parts: performance.parts.iter().cloned().collect(),
            current: None,
            format,
            remaining: total,
        }))
    }
}

/// The parts of one performance played back to back, each opened only when
/// the previous one runs out.
struct Concatenation {
    tools: ToolsConfig,
    parts: VecDeque<PathBuf>,
    current: Option<Box<dyn PcmSource>>,
    format: StreamFormat,
    remaining: u64,
}

impl Read for Concatenation {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            if self.current.is_none() {
                let Some(path) = self.parts.pop_front() else {
                    return Ok(0);
                };
                let source = open_part(&self.tools, &path).map_err(AudioError::into_io)?;
                if source.format() != self.format {
                    return Err(AudioError::FormatMismatch(format!(
                        "{} changed format to {}",
                        path.display(),
                        source.format()
                    ))
                    .into_io());
                }
                self.current = Some(source);
            }

            if let Some(source) = self.current.as_mut() {
                let n = source.read(buf)?;
                if n > 0 || buf.is_empty() {
                    self.remaining = self.remaining.saturating_sub(n as u64);
                    return Ok(n);
                }
            }
            self.current = None;
        }
    }
}

impl PcmSource for Concatenation {
    fn format(&self) -> StreamFormat {
        self.format
    }

    fn size(&self) -> Option<u64> {
        Some(self.remaining)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::PcmSink;
    use crate::format::{CD, DAT};
    use crate::wav::WavWriter;
    use std::io::Write;

    fn write_wav(path: &Path, format: StreamFormat, data: &[u8]) {
        let file = File::create(path).unwrap();
        let mut writer = WavWriter::new(file, format);
        writer.write_all(data).unwrap();
        writer.close().unwrap();
    }

    fn library() -> (tempfile::TempDir, DirectoryLibrary) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();

        fs::create_dir_all(root.join("Bach/Cello_Suite_1")).unwrap();
        write_wav(&root.join("Bach/Cello_Suite_1/02.wav"), CD, &[2; 8]);
        write_wav(&root.join("Bach/Cello_Suite_1/01.wav"), CD, &[1; 4]);
        fs::write(root.join("Bach/Cello_Suite_1/cover.jpg"), b"not audio").unwrap();

        fs::create_dir_all(root.join("Mixed")).unwrap();
        write_wav(&root.join("Mixed/a.wav"), CD, &[0; 4]);
        write_wav(&root.join("Mixed/b.wav"), DAT, &[0; 4]);

        write_wav(&root.join("Gymnopedie_1.wav"), CD, &[9; 12]);

        let library = DirectoryLibrary::new(root, ToolsConfig::default()).unwrap();
        (dir, library)
    }

    #[test]
    fn test_scan() {
        let (_dir, library) = library();
        let ids: Vec<String> = library
            .performances()
            .into_iter()
            .map(|p| p.id.0)
            .collect();
        assert_eq!(ids, ["Bach/Cello_Suite_1", "Gymnopedie_1.wav", "Mixed"]);

        let suite = library
            .performance(&PerformanceId::from("Bach/Cello_Suite_1"))
            .unwrap();
        assert_eq!(suite.title, "Cello Suite 1");
        assert_eq!(suite.parts.len(), 2);
        assert!(suite.parts[0].ends_with("01.wav"));

        let loose = library
            .performance(&PerformanceId::from("Gymnopedie_1.wav"))
            .unwrap();
        assert_eq!(loose.title, "Gymnopedie 1");
    }

    #[test]
    fn test_open_concatenates_parts() {
        let (_dir, library) = library();
        let suite = library
            .performance(&PerformanceId::from("Bach/Cello_Suite_1"))
            .unwrap();

        let mut source = library.open(&suite).unwrap();
        assert_eq!(source.format(), CD);
        assert_eq!(source.size(), Some(12));

        let mut data = Vec::new();
        source.read_to_end(&mut data).unwrap();
        assert_eq!(data, [1, 1, 1, 1, 2, 2, 2, 2, 2, 2, 2, 2]);
        assert_eq!(source.size(), Some(0));
    }

    #[test]
    fn test_open_rejects_mixed_formats() {
        let (_dir, library) = library();
        let mixed = library.performance(&PerformanceId::from("Mixed")).unwrap();
        assert!(matches!(
            library.open(&mixed),
            Err(AudioError::FormatMismatch(_))
        ));
    }

    #[test]
    fn test_open_rejects_partial_frames() {
        let dir = tempfile::tempdir().unwrap();
        write_wav(&dir.path().join("odd.wav"), CD, &[0; 6]);
        let library = DirectoryLibrary::new(dir.path(), ToolsConfig::default()).unwrap();
        let odd = library.performances().remove(0);
        assert!(matches!(library.open(&odd), Err(AudioError::Parse(_))));
    }

    #[test]
    fn test_refresh_sees_new_files() {
        let (dir, library) = library();
        assert_eq!(library.performances().len(), 3);
        write_wav(&dir.path().join("Satie.wav"), CD, &[0; 4]);
        assert_eq!(library.refresh().unwrap(), 4);
    }

    #[test]
    fn test_missing_root() {
        assert!(DirectoryLibrary::new("/nonexistent/library", ToolsConfig::default()).is_err());
    }
}
