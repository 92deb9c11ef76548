//! File decoders read files from disk into [`DecodedFile`]s.

use crate::types::DecodedFile;
use std::fs;
use std::io;
use std::path::Path;

/// Produces the decoded text of a file.
///
/// Only the bridge and explicit add operations call a decoder; the index
/// itself never touches the filesystem.
pub trait FileDecoder: Send + Sync {
    /// Read and decode the file at `path`
    fn decode(&self, path: &Path) -> io::Result<DecodedFile>;
}

/// Decodes files as UTF-8, replacing invalid sequences.
#[derive(Debug, Clone, Default)]
pub struct Utf8Decoder {
    /// Files larger than this many bytes are rejected
    max_file_size: Option<u64>,
}

impl Utf8Decoder {
    /// Create a decoder without a size limit
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject files larger than `bytes`
    pub fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = Some(bytes);
        self
    }
}

impl FileDecoder for Utf8Decoder {
    fn decode(&self, path: &Path) -> io::Result<DecodedFile> {
        if let Some(limit) = self.max_file_size {
            let len = fs::metadata(path)?.len();
            if len > limit {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("file is {} bytes, limit is {}", len, limit),
                ));
            }
        }

        let bytes = fs::read(path)?;
        let content = String::from_utf8_lossy(&bytes).into_owned();
        Ok(DecodedFile::new(path, content))
    }
}
