//! Node file I/O
//!
//! Reads go through here so a missing file always surfaces as
//! [`Error::MissingFile`] with its path, whichever thread performs it.

use crate::core::error::Error;
use crate::core::types::Result;
use std::io;
use std::path::Path;

fn map_read_error(path: &Path, e: io::Error) -> Error {
    match e.kind() {
        io::ErrorKind::NotFound => Error::MissingFile(path.to_path_buf()),
        _ => Error::Io(e),
    }
}

/// Read a whole node file on the calling thread
pub fn read_node_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| map_read_error(path, e))
}

/// Read a whole node file from a loader task
pub async fn read_node_file_async(path: &Path) -> Result<Vec<u8>> {
    tokio::fs::read(path).await.map_err(|e| map_read_error(path, e))
}

/// Write a node file, creating its hierarchy directories
pub fn write_node_file(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, bytes)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data/r/0123/r01234.bin");

        write_node_file(&path, &[1, 2, 3]).unwrap();
        assert_eq!(read_node_file(&path).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("r.hrc");
        match read_node_file(&path) {
            Err(Error::MissingFile(p)) => assert_eq!(p, path),
            other => panic!("expected MissingFile, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_file_async() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_node_file_async(&dir.path().join("r.bin")).await.unwrap_err();
        assert!(matches!(err, Error::MissingFile(_)));
    }
}
