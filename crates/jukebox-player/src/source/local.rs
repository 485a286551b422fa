//! Filesystem-backed local reader.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::PathBuf;

use super::{ByteSource, LocalReader};

/// Opens locators as files, relative to an optional library root.
///
/// With a root configured, locators like `/system/hello.mp3` resolve to
/// `<root>/system/hello.mp3`, mirroring an SD card mounted at the root.
#[derive(Clone, Debug, Default)]
pub struct FsLocalReader {
    root: Option<PathBuf>,
}

impl FsLocalReader {
    pub fn new(root: Option<PathBuf>) -> Self {
        Self { root }
    }

    fn full_path(&self, path: &str) -> PathBuf {
        match &self.root {
            Some(root) => root.join(path.trim_start_matches(['/', '\\'])),
            None => PathBuf::from(path),
        }
    }
}

impl LocalReader for FsLocalReader {
    fn open(&self, path: &str) -> io::Result<Box<dyn ByteSource>> {
        let full = self.full_path(path);
        let file = File::open(&full).map_err(|e| {
            io::Error::new(e.kind(), format!("open {}: {e}", full.display()))
        })?;
        tracing::debug!(path = %full.display(), "local source opened");
        Ok(Box::new(FileSource {
            reader: Some(BufReader::new(file)),
            path: full,
        }))
    }
}

struct FileSource {
    reader: Option<BufReader<File>>,
    path: PathBuf,
}

impl Read for FileSource {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        match self.reader.as_mut() {
            Some(r) => r.read(out),
            None => Ok(0),
        }
    }
}

impl ByteSource for FileSource {
    fn close(&mut self) {
        if self.reader.take().is_some() {
            tracing::debug!(path = %self.path.display(), "local source closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_relative_to_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("system")).unwrap();
        std::fs::write(dir.path().join("system/hello.mp3"), b"bytes").unwrap();

        let reader = FsLocalReader::new(Some(dir.path().to_path_buf()));
        let mut src = reader.open("/system/hello.mp3").unwrap();
        let mut out = Vec::new();
        src.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"bytes");

        src.close();
        let mut buf = [0u8; 4];
        assert_eq!(src.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn missing_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let reader = FsLocalReader::new(Some(dir.path().to_path_buf()));
        let err = reader.open("/missing.mp3").err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert!(err.to_string().contains("missing.mp3"));
    }
}
