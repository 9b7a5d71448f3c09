//! Single-file tar archive helpers backing `UploadFile`/`DownloadFile` (§4.4) and
//! `Containers.GetArchive`/`PutArchive` (§4.2).
//!
//! Grounded on `testcontainers/src/core/copy.rs`'s `CopyToContainer::tar` (building a tar with
//! `tokio_tar::Builder`) and its `CopyFileFromContainer` trait / unit tests for reading entries
//! back out with `tokio_tar::Archive` over a `std::io::Cursor`. This module only ever deals with
//! one member per archive, which is all §4.4's upload/download contract needs.

use std::io;

use tokio::io::AsyncReadExt;
use tokio_stream::StreamExt;
use tokio_tar::{Archive, Builder, EntryType, Header};

/// Packs `data` into a tar archive containing a single regular-file entry named `member_name`.
pub async fn pack_single_file(member_name: &str, data: &[u8]) -> io::Result<Vec<u8>> {
    let mut builder = Builder::new(Vec::new());
    let mut header = Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append_data(&mut header, member_name, data).await?;
    builder.into_inner().await
}

#[derive(Debug, thiserror::Error)]
pub enum UnpackError {
    #[error("archive did not contain any regular files")]
    Empty,
    #[error("io error reading archive: {0}")]
    Io(#[from] io::Error),
}

/// Reads the first regular-file entry out of a tar archive, returning its member name and
/// bytes. Used by `DownloadFile` (§4.4) to read the single file an archive-get produces.
pub async fn unpack_single_file(tar_bytes: &[u8]) -> Result<(String, Vec<u8>), UnpackError> {
    let mut archive = Archive::new(io::Cursor::new(tar_bytes));
    let mut entries = archive.entries()?;
    while let Some(entry) = entries.next().await {
        let mut entry = entry?;
        if entry.header().entry_type() != EntryType::Regular {
            continue;
        }
        let name = entry
            .path()?
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut buf = Vec::new();
        entry.read_to_end(&mut buf).await?;
        return Ok((name, buf));
    }
    Err(UnpackError::Empty)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pack_then_unpack_round_trips() {
        let tar = pack_single_file("a.txt", b"hello").await.unwrap();
        let (name, bytes) = unpack_single_file(&tar).await.unwrap();
        assert_eq!(name, "a.txt");
        assert_eq!(bytes, b"hello");
    }

    #[tokio::test]
    async fn unpack_empty_archive_errors() {
        let builder = tokio_tar::Builder::new(Vec::new());
        let tar = builder.into_inner().await.unwrap();
        assert!(matches!(unpack_single_file(&tar).await, Err(UnpackError::Empty)));
    }
}
