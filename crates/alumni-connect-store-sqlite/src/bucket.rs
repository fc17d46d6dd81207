//! Chunked binary storage for uploaded files.
//!
//! Files are split into fixed-size chunks (`bucket_chunks`) with one metadata
//! row per file (`bucket_files`). A [`StorageClient`] must be opened before
//! use; every operation on an unopened client fails with
//! [`StorageError::NotInitialized`].

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use alumni_connect_core::{FileId, StoredFile, UserId};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use ulid::Ulid;

pub const DEFAULT_CHUNK_SIZE: u32 = 255 * 1024;
const MAX_FILENAME_CHARS: usize = 255;

const CREATE_BUCKET_SQL: &str = r"
CREATE TABLE IF NOT EXISTS bucket_files (
  file_id TEXT PRIMARY KEY,
  filename TEXT NOT NULL,
  content_type TEXT NOT NULL,
  length INTEGER NOT NULL CHECK (length >= 0),
  chunk_size INTEGER NOT NULL CHECK (chunk_size > 0),
  sha256 TEXT NOT NULL,
  uploaded_by TEXT,
  uploaded_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS bucket_chunks (
  file_id TEXT NOT NULL,
  n INTEGER NOT NULL CHECK (n >= 0),
  data BLOB NOT NULL,
  PRIMARY KEY (file_id, n)
);
";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage client is not initialized; call open() first")]
    NotInitialized,
    #[error("file not found: {0}")]
    FileNotFound(FileId),
    #[error("invalid upload: {0}")]
    Validation(String),
    #[error("stored file metadata is corrupt: {0}")]
    Corrupt(String),
    #[error("storage database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("storage stream error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    pub filename: String,
    pub content_type: Option<String>,
    pub uploaded_by: Option<UserId>,
}

pub struct StorageClient {
    path: PathBuf,
    chunk_size: u32,
    conn: Option<Connection>,
}

impl StorageClient {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), chunk_size: DEFAULT_CHUNK_SIZE, conn: None }
    }

    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: u32) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.conn.is_some()
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Connect to the bucket database and create its tables. Calling `open`
    /// on a ready client is a no-op.
    ///
    /// # Errors
    /// Returns [`StorageError::Sqlite`] when the database cannot be opened or prepared.
    pub fn open(&mut self) -> Result<(), StorageError> {
        if self.conn.is_some() {
            return Ok(());
        }

        let conn = Connection::open(&self.path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;",
        )?;
        conn.execute_batch(CREATE_BUCKET_SQL)?;
        self.conn = Some(conn);
        Ok(())
    }

    fn conn(&self) -> Result<&Connection, StorageError> {
        self.conn.as_ref().ok_or(StorageError::NotInitialized)
    }

    /// Stream `reader` into the bucket chunk by chunk.
    ///
    /// # Errors
    /// Returns [`StorageError::NotInitialized`] before `open`, [`StorageError::Validation`]
    /// for unusable file names, or an I/O / database error while streaming.
    pub fn upload<R: Read>(
        &mut self,
        request: UploadRequest,
        mut reader: R,
    ) -> Result<StoredFile, StorageError> {
        validate_filename(&request.filename)?;
        let chunk_size = self.chunk_size;
        let conn = self.conn.as_mut().ok_or(StorageError::NotInitialized)?;

        let file_id = FileId::new();
        let uploaded_at = OffsetDateTime::now_utc().replace_nanosecond(0).map_err(|err| {
            StorageError::Corrupt(format!("failed to truncate upload timestamp: {err}"))
        })?;
        let content_type = request
            .content_type
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| "application/octet-stream".to_string());

        let tx = conn.transaction()?;
        let mut hasher = Sha256::new();
        let mut buffer = vec![0_u8; chunk_size as usize];
        let mut length: u64 = 0;
        let mut index: i64 = 0;

        loop {
            let filled = fill_chunk(&mut reader, &mut buffer)?;
            if filled == 0 {
                break;
            }
            let chunk = &buffer[..filled];
            hasher.update(chunk);
            tx.execute(
                "INSERT INTO bucket_chunks(file_id, n, data) VALUES (?1, ?2, ?3)",
                params![file_id.to_string(), index, chunk],
            )?;
            length += filled as u64;
            index += 1;
            if filled < buffer.len() {
                break;
            }
        }

        let sha256 = format!("sha256:{:x}", hasher.finalize());
        let stored = StoredFile {
            file_id,
            filename: request.filename.trim().to_string(),
            content_type,
            length,
            chunk_size,
            sha256,
            uploaded_by: request.uploaded_by,
            uploaded_at,
        };

        tx.execute(
            "INSERT INTO bucket_files(
                file_id, filename, content_type, length, chunk_size, sha256, uploaded_by, uploaded_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                stored.file_id.to_string(),
                stored.filename,
                stored.content_type,
                i64::try_from(stored.length)
                    .map_err(|_| StorageError::Validation("file is too large".to_string()))?,
                stored.chunk_size,
                stored.sha256,
                stored.uploaded_by.map(|id| id.to_string()),
                stored.uploaded_at.unix_timestamp(),
            ],
        )?;
        tx.commit()?;
        Ok(stored)
    }

    /// Fetch the metadata of one stored file.
    ///
    /// # Errors
    /// Returns [`StorageError::FileNotFound`] for unknown ids.
    pub fn metadata(&self, file_id: FileId) -> Result<StoredFile, StorageError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT filename, content_type, length, chunk_size, sha256, uploaded_by, uploaded_at
                 FROM bucket_files WHERE file_id = ?1",
                params![file_id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, u32>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, Option<String>>(5)?,
                        row.get::<_, i64>(6)?,
                    ))
                },
            )
            .optional()?;
        let Some((filename, content_type, length, chunk_size, sha256, uploaded_by, uploaded_at)) =
            row
        else {
            return Err(StorageError::FileNotFound(file_id));
        };

        let uploaded_by = uploaded_by
            .map(|raw| {
                Ulid::from_string(&raw)
                    .map(UserId)
                    .map_err(|err| StorageError::Corrupt(format!("uploaded_by `{raw}`: {err}")))
            })
            .transpose()?;

        Ok(StoredFile {
            file_id,
            filename,
            content_type,
            length: u64::try_from(length)
                .map_err(|_| StorageError::Corrupt(format!("negative length {length}")))?,
            chunk_size,
            sha256,
            uploaded_by,
            uploaded_at: OffsetDateTime::from_unix_timestamp(uploaded_at)
                .map_err(|err| StorageError::Corrupt(format!("uploaded_at: {err}")))?,
        })
    }

    /// Write the file's chunks to `writer` in order.
    ///
    /// # Errors
    /// Returns [`StorageError::FileNotFound`] for unknown ids and
    /// [`StorageError::Corrupt`] when stored chunks do not add up to the recorded length.
    pub fn download_to<W: Write>(
        &self,
        file_id: FileId,
        mut writer: W,
    ) -> Result<StoredFile, StorageError> {
        let stored = self.metadata(file_id)?;
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT n, data FROM bucket_chunks WHERE file_id = ?1 ORDER BY n ASC")?;
        let mut rows = stmt.query(params![file_id.to_string()])?;

        let mut expected_index: i64 = 0;
        let mut written: u64 = 0;
        while let Some(row) = rows.next()? {
            let index: i64 = row.get(0)?;
            if index != expected_index {
                return Err(StorageError::Corrupt(format!(
                    "file {file_id} is missing chunk {expected_index}"
                )));
            }
            let data: Vec<u8> = row.get(1)?;
            writer.write_all(&data)?;
            written += data.len() as u64;
            expected_index += 1;
        }

        if written != stored.length {
            return Err(StorageError::Corrupt(format!(
                "file {file_id} has {written} bytes stored, expected {}",
                stored.length
            )));
        }
        Ok(stored)
    }

    /// Read a whole file into memory.
    ///
    /// # Errors
    /// Same as [`StorageClient::download_to`].
    pub fn download(&self, file_id: FileId) -> Result<(StoredFile, Vec<u8>), StorageError> {
        let mut bytes = Vec::new();
        let stored = self.download_to(file_id, &mut bytes)?;
        Ok((stored, bytes))
    }

    /// Remove a file and its chunks.
    ///
    /// # Errors
    /// Returns [`StorageError::FileNotFound`] for unknown ids.
    pub fn delete(&mut self, file_id: FileId) -> Result<(), StorageError> {
        let conn = self.conn.as_mut().ok_or(StorageError::NotInitialized)?;
        let tx = conn.transaction()?;
        let removed = tx
            .execute("DELETE FROM bucket_files WHERE file_id = ?1", params![file_id.to_string()])?;
        if removed == 0 {
            return Err(StorageError::FileNotFound(file_id));
        }
        tx.execute("DELETE FROM bucket_chunks WHERE file_id = ?1", params![file_id.to_string()])?;
        tx.commit()?;
        Ok(())
    }
}

fn validate_filename(filename: &str) -> Result<(), StorageError> {
    let trimmed = filename.trim();
    if trimmed.is_empty() {
        return Err(StorageError::Validation("filename MUST be non-empty".to_string()));
    }
    if trimmed.chars().count() > MAX_FILENAME_CHARS {
        return Err(StorageError::Validation(format!(
            "filename MUST be at most {MAX_FILENAME_CHARS} characters"
        )));
    }
    if trimmed.chars().any(|c| c == '/' || c == '\\' || c.is_control()) {
        return Err(StorageError::Validation(format!(
            "filename contains path separators or control characters: {trimmed:?}"
        )));
    }
    Ok(())
}

fn fill_chunk<R: Read>(reader: &mut R, buffer: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        match reader.read(&mut buffer[filled..]) {
            Ok(0) => break,
            Ok(read) => filled += read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready_client(chunk_size: u32) -> Result<StorageClient, StorageError> {
        let mut client = StorageClient::new(":memory:").with_chunk_size(chunk_size);
        client.open()?;
        Ok(client)
    }

    fn request(filename: &str) -> UploadRequest {
        UploadRequest {
            filename: filename.to_string(),
            content_type: Some("text/plain".to_string()),
            uploaded_by: None,
        }
    }

    #[test]
    fn operations_before_open_fail_with_not_initialized() {
        let mut client = StorageClient::new(":memory:");
        assert!(!client.is_ready());
        assert!(matches!(
            client.upload(request("cv.txt"), &b"hello"[..]),
            Err(StorageError::NotInitialized)
        ));
        assert!(matches!(client.metadata(FileId::new()), Err(StorageError::NotInitialized)));
        assert!(matches!(client.download(FileId::new()), Err(StorageError::NotInitialized)));
        assert!(matches!(client.delete(FileId::new()), Err(StorageError::NotInitialized)));
    }

    #[test]
    fn upload_spans_multiple_chunks_and_downloads_intact() -> Result<(), StorageError> {
        let mut client = ready_client(4)?;
        let payload = b"alumni resume contents".to_vec();

        let stored = client.upload(request("resume.txt"), payload.as_slice())?;
        assert_eq!(stored.length, payload.len() as u64);
        assert!(stored.sha256.starts_with("sha256:"));
        assert_eq!(stored.sha256.len(), "sha256:".len() + 64);

        let (metadata, bytes) = client.download(stored.file_id)?;
        assert_eq!(bytes, payload);
        assert_eq!(metadata, stored);
        Ok(())
    }

    #[test]
    fn empty_upload_is_stored_with_zero_length() -> Result<(), StorageError> {
        let mut client = ready_client(8)?;
        let stored = client.upload(request("empty.bin"), io::empty())?;
        assert_eq!(stored.length, 0);
        let (_, bytes) = client.download(stored.file_id)?;
        assert!(bytes.is_empty());
        Ok(())
    }

    #[test]
    fn upload_rejects_path_like_filenames() -> Result<(), StorageError> {
        let mut client = ready_client(8)?;
        for filename in ["", "   ", "../etc/passwd", "dir\\file.txt"] {
            assert!(matches!(
                client.upload(request(filename), &b"x"[..]),
                Err(StorageError::Validation(_))
            ));
        }
        Ok(())
    }

    #[test]
    fn delete_removes_file_and_reports_missing() -> Result<(), StorageError> {
        let mut client = ready_client(8)?;
        let stored = client.upload(request("photo.png"), &b"png-bytes"[..])?;
        client.delete(stored.file_id)?;
        assert!(matches!(client.metadata(stored.file_id), Err(StorageError::FileNotFound(_))));
        assert!(matches!(client.delete(stored.file_id), Err(StorageError::FileNotFound(_))));
        Ok(())
    }
}
