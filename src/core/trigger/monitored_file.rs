//! Line reader that follows a log file across rotation.
//!
//! The file is identified by `(device, inode)` rather than by path. When the
//! path starts naming a different file the reader switches to it and starts
//! from the beginning; when the path is briefly missing the read fails so the
//! caller can retry.

use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Filesystem-stable identity of an open file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileId {
    pub dev: u64,
    pub ino: u64,
}

impl FileId {
    #[cfg(unix)]
    pub fn of(metadata: &fs::Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;
        Self {
            dev: metadata.dev(),
            ino: metadata.ino(),
        }
    }

    // no inode numbers: creation time stands in for the identity
    #[cfg(not(unix))]
    pub fn of(metadata: &fs::Metadata) -> Self {
        let created = metadata
            .created()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        Self { dev: 0, ino: created }
    }

    pub fn of_path(path: &Path) -> io::Result<Self> {
        fs::metadata(path).map(|m| Self::of(&m))
    }
}

pub struct MonitoredFile {
    path: PathBuf,
    reader: BufReader<File>,
    id: FileId,
    partial: Vec<u8>,
}

impl MonitoredFile {
    /// Open `path` positioned at its current end
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let mut file = File::open(&path)?;
        let id = FileId::of(&file.metadata()?);
        file.seek(SeekFrom::End(0))?;
        Ok(Self {
            path,
            reader: BufReader::new(file),
            id,
            partial: Vec::new(),
        })
    }

    /// Open `path` positioned at its start
    pub fn open_from_start(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let file = File::open(&path)?;
        let id = FileId::of(&file.metadata()?);
        Ok(Self {
            path,
            reader: BufReader::new(file),
            id,
            partial: Vec::new(),
        })
    }

    pub fn id(&self) -> FileId {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Next complete line, `Ok(None)` when nothing new has been written yet.
    ///
    /// Bytes that are not valid UTF-8 are replaced, never reported as errors.
    pub fn read_line(&mut self) -> io::Result<Option<String>> {
        let read = self.reader.read_until(b'\n', &mut self.partial)?;
        if read > 0 {
            if self.partial.ends_with(b"\n") {
                let line = std::mem::take(&mut self.partial);
                return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
            }
            return Ok(None);
        }

        // at EOF: has the path moved on to another file, or been truncated?
        let current = FileId::of_path(&self.path)?;
        if current != self.id {
            log::debug!("{} was rotated, following the new file", self.path.display());
            *self = Self::open_from_start(self.path.clone())?;
            return Ok(None);
        }
        let len = fs::metadata(&self.path)?.len();
        let pos = self.reader.stream_position()?;
        if len < pos {
            log::debug!("{} was truncated, reading from the start", self.path.display());
            self.reader.seek(SeekFrom::Start(0))?;
            self.partial.clear();
        }
        Ok(None)
    }
}
