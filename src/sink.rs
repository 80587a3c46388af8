use crate::constants;
use crate::form::FileHandle;
use bytes::BytesMut;
use encoding_rs::{Encoding, UTF_8};
use rand::Rng;
use std::borrow::Cow;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;

/// Collects the content of one text field in memory, up to `limit` bytes.
#[derive(Debug)]
pub(crate) struct FieldSink {
    field_name: String,
    data: BytesMut,
    limit: usize,
}

impl FieldSink {
    pub fn new(field_name: String, limit: usize) -> Self {
        FieldSink {
            field_name,
            data: BytesMut::new(),
            limit,
        }
    }

    pub fn push(&mut self, bytes: &[u8]) -> crate::Result<()> {
        if self.data.len() + bytes.len() > self.limit {
            return Err(crate::Error::FieldTooLarge {
                limit: self.limit,
                field_name: self.field_name.clone(),
            });
        }

        self.data.extend_from_slice(bytes);
        Ok(())
    }

    /// Decodes the collected bytes with the `charset` of the part's content
    /// type, falling back to UTF-8.
    pub fn finish(self, content_type: Option<&mime::Mime>) -> (String, String) {
        let encoding = content_type
            .and_then(|mime| mime.get_param(mime::CHARSET))
            .and_then(|charset| Encoding::for_label(charset.as_str().as_bytes()))
            .unwrap_or(UTF_8);

        let (text, _, _) = encoding.decode(&self.data);

        let text = match text {
            Cow::Owned(s) => s,
            Cow::Borrowed(s) => String::from(s),
        };

        (self.field_name, text)
    }
}

/// Streams the content of one file part into a fresh temporary file.
///
/// The file is removed unless [`finish`](FileSink::finish) hands it over to a
/// [`FileHandle`]; [`abort`](FileSink::abort) removes it asynchronously, and
/// dropping an unfinished sink removes it synchronously.
#[derive(Debug)]
pub(crate) struct FileSink {
    path: Option<PathBuf>,
    file: Option<File>,
    written: u64,
    limit: u64,
    field_name: String,
}

impl FileSink {
    pub async fn create(dir: &Path, field_name: String, limit: u64) -> crate::Result<FileSink> {
        let (path, file) = create_tmp_file(dir).await?;

        trace!("created temporary file {:?} for field '{}'", path, field_name);

        Ok(FileSink {
            path: Some(path),
            file: Some(file),
            written: 0,
            limit,
            field_name,
        })
    }

    pub async fn write(&mut self, bytes: &[u8]) -> crate::Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }

        let written = self.written + bytes.len() as u64;
        if written > self.limit {
            return Err(crate::Error::FileTooLarge {
                limit: self.limit,
                field_name: self.field_name.clone(),
            });
        }

        match self.file.as_mut() {
            Some(file) => file.write_all(bytes).await?,
            None => return Err(io::Error::new(io::ErrorKind::Other, "temporary file already closed").into()),
        }

        self.written = written;
        Ok(())
    }

    /// Flushes and closes the file, transferring ownership of it to a
    /// [`FileHandle`].
    pub async fn finish(mut self, file_name: String, content_type: mime::Mime) -> crate::Result<FileHandle> {
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
        }

        let path = match self.path.take() {
            Some(path) => path,
            None => return Err(io::Error::new(io::ErrorKind::Other, "temporary file already removed").into()),
        };

        Ok(FileHandle::new(path, file_name, content_type, self.written))
    }

    /// Closes and removes the file.
    pub async fn abort(mut self) {
        if let Some(mut file) = self.file.take() {
            let _ = file.flush().await;
        }

        if let Some(path) = self.path.take() {
            debug!("removing temporary file {:?} of field '{}'", path, self.field_name);

            if let Err(err) = fs::remove_file(&path).await {
                if err.kind() != io::ErrorKind::NotFound {
                    warn!("failed to remove temporary file {:?}: {}", path, err);
                }
            }
        }
    }
}

impl Drop for FileSink {
    fn drop(&mut self) {
        drop(self.file.take());

        if let Some(path) = self.path.take() {
            if let Err(err) = std::fs::remove_file(&path) {
                if err.kind() != io::ErrorKind::NotFound {
                    warn!("failed to remove temporary file {:?}: {}", path, err);
                }
            }
        }
    }
}

/// Creates a new file named by a random hex token under `dir`, retrying on
/// the unlikely name collision.
async fn create_tmp_file(dir: &Path) -> io::Result<(PathBuf, File)> {
    let mut attempts = 0;

    loop {
        let path = dir.join(random_token());

        match OpenOptions::new().write(true).create_new(true).open(&path).await {
            Ok(file) => return Ok((path, file)),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists && attempts < 3 => attempts += 1,
            Err(err) => return Err(err),
        }
    }
}

fn random_token() -> String {
    let mut token = [0u8; constants::TMP_FILE_TOKEN_LEN];
    rand::thread_rng().fill(&mut token[..]);
    hex::encode(token)
}
