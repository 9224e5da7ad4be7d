use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// A bit-field read that would run past the end of its byte slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("bit field [{bit}, +{width}) exceeds {available} available bits")]
pub struct BitsOutOfRange {
    pub bit: usize,
    pub width: u32,
    pub available: usize,
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid zone file magic in {path:?}: found {found:?}")]
    BadMagic { path: PathBuf, found: String },

    #[error("Truncated zone header in {path:?}: {message}")]
    TruncatedHeader { path: PathBuf, message: String },

    #[error("Malformed zone header in {path:?}: {message}")]
    MalformedHeader { path: PathBuf, message: String },

    #[error("Corrupt chunk {chunk} of zone {zone}: {message}")]
    CorruptChunk {
        zone: u16,
        chunk: usize,
        message: String,
    },

    #[error("Cursor overrun in zone {zone} chunk {chunk}: position {position} beyond length {length}")]
    CursorOverrun {
        zone: u16,
        chunk: usize,
        position: usize,
        length: usize,
    },

    #[error("Record decode error: {0}")]
    Bits(#[from] BitsOutOfRange),

    #[error("{what} out of range: {message}")]
    OutOfRange { what: &'static str, message: String },
}

/// The three failure categories a caller can react to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Open/read/seek failure on the underlying file.
    Io,
    /// The file contents do not follow the zone file layout.
    Format,
    /// The request itself was invalid and never reached the decoder.
    Range,
}

impl CatalogError {
    pub fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn out_of_range(what: &'static str, message: impl Into<String>) -> Self {
        Self::OutOfRange {
            what,
            message: message.into(),
        }
    }

    pub fn corrupt_chunk(zone: u16, chunk: usize, message: impl Into<String>) -> Self {
        Self::CorruptChunk {
            zone,
            chunk,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io { .. } => ErrorKind::Io,
            Self::BadMagic { .. }
            | Self::TruncatedHeader { .. }
            | Self::MalformedHeader { .. }
            | Self::CorruptChunk { .. }
            | Self::CursorOverrun { .. }
            | Self::Bits(_) => ErrorKind::Format,
            Self::OutOfRange { .. } => ErrorKind::Range,
        }
    }
}

pub type Result<T> = std::result::Result<T, CatalogError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CatalogError::BadMagic {
            path: PathBuf::from("/USNOB/090/U0900.bin"),
            found: "GARBAGE".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("magic"));
        assert!(msg.contains("U0900.bin"));

        let err = CatalogError::corrupt_chunk(900, 12, "index table past end of chunk");
        assert_eq!(
            err.to_string(),
            "Corrupt chunk 12 of zone 900: index table past end of chunk"
        );

        let err = CatalogError::out_of_range("zone", "1800 is not in 0..1800");
        assert_eq!(err.to_string(), "zone out of range: 1800 is not in 0..1800");
    }

    #[test]
    fn test_bits_error_converts() {
        let bits = BitsOutOfRange {
            bit: 130,
            width: 10,
            available: 136,
        };
        let err: CatalogError = bits.into();
        assert!(err.to_string().contains("exceeds 136 available bits"));
        assert_eq!(err.kind(), ErrorKind::Format);
    }

    #[test]
    fn test_error_kinds() {
        let io_err = CatalogError::io(
            Path::new("/nope"),
            io::Error::new(io::ErrorKind::NotFound, "missing"),
        );
        assert_eq!(io_err.kind(), ErrorKind::Io);

        let overrun = CatalogError::CursorOverrun {
            zone: 1,
            chunk: 0,
            position: 400,
            length: 300,
        };
        assert_eq!(overrun.kind(), ErrorKind::Format);
        assert_eq!(
            CatalogError::out_of_range("declination", "91 deg").kind(),
            ErrorKind::Range
        );
    }
}
