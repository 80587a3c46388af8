use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;

/// The outcome of a successful parse: every part of the body by name, in the
/// order the names first appeared.
///
/// A name that repeats keeps its first position and the value of its last
/// occurrence; a file replaced this way has its temporary file removed.
///
/// Dropping a `Form` removes the temporary files of all [`FileHandle`]s it
/// still owns. Take a file out with [`Form::remove`] and call
/// [`FileHandle::move_to`] or [`FileHandle::keep`] to hold on to it.
#[derive(Debug, Default)]
pub struct Form {
    entries: Vec<(String, FormValue)>,
}

/// The value of one part: a decoded text field or a spooled file.
#[derive(Debug)]
pub enum FormValue {
    Text(String),
    File(FileHandle),
}

impl FormValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FormValue::Text(text) => Some(text),
            FormValue::File(_) => None,
        }
    }

    pub fn as_file(&self) -> Option<&FileHandle> {
        match self {
            FormValue::Text(_) => None,
            FormValue::File(file) => Some(file),
        }
    }

    pub fn is_file(&self) -> bool {
        matches!(self, FormValue::File(_))
    }
}

impl Form {
    pub(crate) fn new() -> Self {
        Form::default()
    }

    /// Stores a value, returning the one it replaced.
    pub(crate) fn insert(&mut self, name: String, value: FormValue) -> Option<FormValue> {
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.entries.push((name, value));
                None
            }
        }
    }

    /// Removes every temporary file still owned by this form.
    pub(crate) async fn cleanup(self) {
        for (_, value) in self.entries {
            if let FormValue::File(file) = value {
                let path = file.path().to_owned();
                if let Err(err) = file.clear().await {
                    warn!("failed to remove temporary file {:?}: {}", path, err);
                }
            }
        }
    }

    /// Returns the value of `name`, text or file.
    pub fn get(&self, name: &str) -> Option<&FormValue> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, value)| value)
    }

    /// Returns the text field `name`, if the part exists and is not a file.
    pub fn text(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(FormValue::as_text)
    }

    /// Returns the file `name`, if the part exists and is a file.
    pub fn file(&self, name: &str) -> Option<&FileHandle> {
        self.get(name).and_then(FormValue::as_file)
    }

    /// Takes the value of `name` out of the form.
    pub fn remove(&mut self, name: &str) -> Option<FormValue> {
        let idx = self.entries.iter().position(|(n, _)| n == name)?;
        Some(self.entries.remove(idx).1)
    }

    /// Iterates over the entries in the order their names first appeared.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FormValue)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Decodes the text field `name` as `JSON`.
    ///
    /// Returns `Ok(None)` when there is no text field of that name.
    ///
    /// # Optional
    ///
    /// This requires the optional `json` feature to be enabled.
    #[cfg(feature = "json")]
    pub fn json<T: serde::de::DeserializeOwned>(&self, name: &str) -> crate::Result<Option<T>> {
        self.text(name)
            .map(|text| serde_json::from_str(text).map_err(crate::Error::DecodeJson))
            .transpose()
    }
}

impl IntoIterator for Form {
    type Item = (String, FormValue);
    type IntoIter = std::vec::IntoIter<(String, FormValue)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// A file part spooled to a temporary file.
///
/// The handle owns the temporary file: it is removed when the handle is
/// dropped, unless it was moved away with [`move_to`](FileHandle::move_to) or
/// detached with [`keep`](FileHandle::keep).
#[derive(Debug)]
pub struct FileHandle {
    path: PathBuf,
    file_name: String,
    content_type: mime::Mime,
    size: u64,
    owned: bool,
}

impl FileHandle {
    pub(crate) fn new(path: PathBuf, file_name: String, content_type: mime::Mime, size: u64) -> Self {
        FileHandle {
            path,
            file_name,
            content_type,
            size,
            owned: true,
        }
    }

    /// The path of the temporary file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The `filename` the client declared, possibly empty.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// The declared content type, `application/octet-stream` when absent.
    pub fn content_type(&self) -> &mime::Mime {
        &self.content_type
    }

    /// Number of bytes written to the temporary file.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Moves the temporary file to `dest` and gives up ownership of it.
    ///
    /// Falls back to copy and remove when a rename is not possible, e.g.
    /// across filesystems. On failure the handle comes back inside the
    /// [`MoveError`] with its temporary file untouched.
    pub async fn move_to<P: AsRef<Path>>(mut self, dest: P) -> Result<PathBuf, MoveError> {
        let dest = dest.as_ref().to_owned();

        let renamed = fs::rename(&self.path, &dest).await;
        if let Err(err) = renamed {
            trace!("rename of {:?} failed ({}), copying instead", self.path, err);

            let copied = fs::copy(&self.path, &dest).await;
            if let Err(error) = copied {
                if let Err(err) = fs::remove_file(&dest).await {
                    if err.kind() != io::ErrorKind::NotFound {
                        warn!("failed to remove partial copy {:?}: {}", dest, err);
                    }
                }
                return Err(MoveError { error, file: self });
            }

            if let Err(err) = fs::remove_file(&self.path).await {
                warn!("failed to remove temporary file {:?} after copy: {}", self.path, err);
            }
        }

        self.owned = false;
        Ok(dest)
    }

    /// Removes the temporary file.
    pub async fn clear(mut self) -> io::Result<()> {
        self.owned = false;

        match fs::remove_file(&self.path).await {
            Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
            _ => Ok(()),
        }
    }

    /// Gives up ownership of the temporary file without touching it.
    pub fn keep(mut self) -> PathBuf {
        self.owned = false;
        std::mem::take(&mut self.path)
    }
}

/// A failed [`FileHandle::move_to`], carrying the handle that still owns the
/// temporary file.
#[derive(Debug, thiserror::Error)]
#[error("failed to move temporary file: {error}")]
pub struct MoveError {
    #[source]
    pub error: io::Error,
    pub file: FileHandle,
}

impl From<MoveError> for io::Error {
    fn from(err: MoveError) -> io::Error {
        err.error
    }
}

impl From<MoveError> for crate::Error {
    fn from(err: MoveError) -> crate::Error {
        crate::Error::Io(err.error)
    }
}

impl Drop for FileHandle {
    fn drop(&mut self) {
        if !self.owned {
            return;
        }

        if let Err(err) = std::fs::remove_file(&self.path) {
            if err.kind() != io::ErrorKind::NotFound {
                warn!("failed to remove temporary file {:?}: {}", self.path, err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp_file(dir: &Path, name: &str, contents: &[u8]) -> FileHandle {
        let path = dir.join(name);
        std::fs::write(&path, contents).unwrap();
        FileHandle::new(path, format!("{}.bin", name), mime::APPLICATION_OCTET_STREAM, contents.len() as u64)
    }

    #[test]
    fn test_insert_keeps_first_position_last_value() {
        let mut form = Form::new();

        assert!(form.insert("a".to_owned(), FormValue::Text("1".to_owned())).is_none());
        assert!(form.insert("b".to_owned(), FormValue::Text("2".to_owned())).is_none());

        let replaced = form.insert("a".to_owned(), FormValue::Text("3".to_owned()));
        assert_eq!(replaced.as_ref().and_then(FormValue::as_text), Some("1"));

        let names: Vec<_> = form.iter().map(|(name, value)| (name, value.as_text())).collect();
        assert_eq!(names, vec![("a", Some("3")), ("b", Some("2"))]);
        assert_eq!(form.len(), 2);
    }

    #[test]
    fn test_drop_removes_unclaimed_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut form = Form::new();

        form.insert("f".to_owned(), FormValue::File(tmp_file(dir.path(), "f", b"data")));
        let path = form.file("f").unwrap().path().to_owned();
        assert!(path.exists());
        assert!(form.text("f").is_none());

        drop(form);
        assert!(!path.exists());
    }

    #[test]
    fn test_keep_detaches_file() {
        let dir = tempfile::tempdir().unwrap();

        let path = tmp_file(dir.path(), "k", b"data").keep();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_move_to() {
        let dir = tempfile::tempdir().unwrap();
        let handle = tmp_file(dir.path(), "m", b"moved");
        let src = handle.path().to_owned();

        let dest = handle.move_to(dir.path().join("dest.bin")).await.unwrap();
        assert!(!src.exists());
        assert_eq!(std::fs::read(dest).unwrap(), b"moved");
    }

    #[tokio::test]
    async fn test_failed_move_keeps_the_upload() {
        let dir = tempfile::tempdir().unwrap();
        let handle = tmp_file(dir.path(), "u", b"precious");
        let src = handle.path().to_owned();

        let err = handle.move_to(dir.path().join("no/such/dir/x")).await.unwrap_err();
        assert_eq!(err.error.kind(), io::ErrorKind::NotFound);
        assert!(src.exists());

        let handle = err.file;
        assert_eq!(handle.path(), src);
        let dest = handle.move_to(dir.path().join("second-try.bin")).await.unwrap();
        assert!(!src.exists());
        assert_eq!(std::fs::read(dest).unwrap(), b"precious");
    }

    #[tokio::test]
    async fn test_clear_and_cleanup() {
        let dir = tempfile::tempdir().unwrap();

        let handle = tmp_file(dir.path(), "c", b"x");
        let path = handle.path().to_owned();
        handle.clear().await.unwrap();
        assert!(!path.exists());

        let mut form = Form::new();
        form.insert("a".to_owned(), FormValue::File(tmp_file(dir.path(), "a", b"1")));
        form.insert("t".to_owned(), FormValue::Text("t".to_owned()));
        let path = form.file("a").unwrap().path().to_owned();

        form.cleanup().await;
        assert!(!path.exists());
    }

    #[cfg(feature = "json")]
    #[test]
    fn test_json() {
        #[derive(serde::Deserialize, Debug, PartialEq)]
        struct Meta {
            id: u32,
        }

        let mut form = Form::new();
        form.insert("meta".to_owned(), FormValue::Text("{\"id\":7}".to_owned()));
        form.insert("bad".to_owned(), FormValue::Text("{".to_owned()));

        assert_eq!(form.json::<Meta>("meta").unwrap(), Some(Meta { id: 7 }));
        assert_eq!(form.json::<Meta>("missing").unwrap(), None);
        assert!(form.json::<Meta>("bad").is_err());
    }
}
