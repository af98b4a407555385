use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

/// On-disk container of a snapshot document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    Plain,
    Gzip,
}

impl Container {
    pub fn new(compress: bool) -> Self {
        if compress {
            Container::Gzip
        } else {
            Container::Plain
        }
    }

    /// Container implied by a file name (`.gz` suffix means gzip)
    pub fn for_path(path: &Path) -> Self {
        if path.extension().is_some_and(|ext| ext == "gz") {
            Container::Gzip
        } else {
            Container::Plain
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Container::Plain => ".json",
            Container::Gzip => ".json.gz",
        }
    }

    pub fn encode(&self, bytes: &[u8]) -> io::Result<Vec<u8>> {
        match self {
            Container::Plain => Ok(bytes.to_vec()),
            Container::Gzip => {
                let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(bytes)?;
                encoder.finish()
            }
        }
    }

    pub fn decode(&self, bytes: &[u8]) -> io::Result<Vec<u8>> {
        match self {
            Container::Plain => Ok(bytes.to_vec()),
            Container::Gzip => {
                let mut decoder = GzDecoder::new(bytes);
                let mut decoded = Vec::new();
                decoder.read_to_end(&mut decoded)?;
                Ok(decoded)
            }
        }
    }
}

/// Write through a sibling temp file and rename into place
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
    let tmp = path.with_file_name(format!(".{}.tmp", file_name));
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)
}
