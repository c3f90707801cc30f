/// Upload session: the ordered selection of input images and their previews
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use crate::resources::{PreviewHandle, ResourceManager};

/// Image supplied by the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputFile {
    /// File name sent with the upload
    pub name: String,

    /// Content type sent with the upload
    pub mime: String,

    bytes: Arc<[u8]>,
}

impl InputFile {
    pub fn new(name: impl Into<String>, mime: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            name: name.into(),
            mime: mime.into(),
            bytes: bytes.into(),
        }
    }

    /// Read an image from disk, guessing the content type from its extension
    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read image: {:?}", path))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());

        Ok(Self::new(name, guess_mime(path), bytes))
    }

    pub fn bytes(&self) -> &Arc<[u8]> {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Content type for the image extensions the generation server accepts
pub fn guess_mime(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        _ => "application/octet-stream",
    }
}

/// A selected file paired with its preview
#[derive(Debug, Clone)]
struct SessionEntry {
    file: InputFile,
    preview: PreviewHandle,
}

/// Ordered file selection.
///
/// Invariant: exactly one live preview per held file. A preview is acquired
/// when its file enters and released when it leaves, so the previews of
/// untouched files keep their identity across edits.
pub struct UploadSession {
    entries: Vec<SessionEntry>,
    resources: Arc<ResourceManager>,
}

impl UploadSession {
    pub fn new(resources: Arc<ResourceManager>) -> Self {
        Self {
            entries: Vec::new(),
            resources,
        }
    }

    /// Append files after the current selection
    pub fn add<I>(&mut self, files: I)
    where
        I: IntoIterator<Item = InputFile>,
    {
        for file in files {
            let preview = self.resources.acquire(file.bytes.clone(), file.mime.clone());
            debug!("added {} as {}", file.name, preview);
            self.entries.push(SessionEntry { file, preview });
        }
    }

    /// Remove the file at `index`, shifting later files down.
    /// Returns `None` and changes nothing when out of range.
    pub fn remove_at(&mut self, index: usize) -> Option<InputFile> {
        if index >= self.entries.len() {
            return None;
        }

        let entry = self.entries.remove(index);
        self.resources.release(&entry.preview);
        debug!("removed {} at {}", entry.file.name, index);
        Some(entry.file)
    }

    /// Drop every file and release every preview
    pub fn clear(&mut self) {
        for entry in self.entries.drain(..) {
            self.resources.release(&entry.preview);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn files(&self) -> impl Iterator<Item = &InputFile> {
        self.entries.iter().map(|e| &e.file)
    }

    pub fn previews(&self) -> impl Iterator<Item = &PreviewHandle> {
        self.entries.iter().map(|e| &e.preview)
    }

    pub fn total_bytes(&self) -> usize {
        self.entries.iter().map(|e| e.file.len()).sum()
    }

    pub fn resources(&self) -> &Arc<ResourceManager> {
        &self.resources
    }
}

impl Drop for UploadSession {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(name: &str) -> InputFile {
        InputFile::new(name, "image/jpeg", name.as_bytes().to_vec())
    }

    fn names(session: &UploadSession) -> Vec<String> {
        session.files().map(|f| f.name.clone()).collect()
    }

    #[test]
    fn test_add_appends_in_order() {
        let resources = ResourceManager::shared();
        let mut session = UploadSession::new(resources.clone());

        session.add(vec![image("a.jpg"), image("b.jpg")]);
        session.add(vec![image("a.jpg")]);

        assert_eq!(names(&session), vec!["a.jpg", "b.jpg", "a.jpg"]);
        assert_eq!(resources.live_count(), 3);
    }

    #[test]
    fn test_remove_at_keeps_other_previews() {
        let resources = ResourceManager::shared();
        let mut session = UploadSession::new(resources.clone());
        session.add(vec![image("a.jpg"), image("b.jpg"), image("c.jpg")]);

        let before: Vec<_> = session.previews().cloned().collect();
        let removed = session.remove_at(1).unwrap();

        assert_eq!(removed.name, "b.jpg");
        assert_eq!(names(&session), vec!["a.jpg", "c.jpg"]);
        assert!(!resources.is_live(&before[1]));

        let after: Vec<_> = session.previews().cloned().collect();
        assert_eq!(after, vec![before[0].clone(), before[2].clone()]);
        assert_eq!(resources.live_count(), 2);
    }

    #[test]
    fn test_remove_out_of_range() {
        let resources = ResourceManager::shared();
        let mut session = UploadSession::new(resources.clone());
        session.add(vec![image("a.jpg")]);

        assert!(session.remove_at(5).is_none());
        assert_eq!(session.len(), 1);
        assert_eq!(resources.live_count(), 1);
    }

    #[test]
    fn test_clear_releases_previews() {
        let resources = ResourceManager::shared();
        let mut session = UploadSession::new(resources.clone());
        session.add(vec![image("a.jpg"), image("b.jpg")]);

        session.clear();
        assert!(session.is_empty());
        assert_eq!(resources.live_count(), 0);
        assert_eq!(resources.stats().released, 2);
    }

    #[test]
    fn test_drop_releases_previews() {
        let resources = ResourceManager::shared();
        {
            let mut session = UploadSession::new(resources.clone());
            session.add(vec![image("a.jpg"), image("b.jpg")]);
        }
        assert_eq!(resources.live_count(), 0);
    }

    #[test]
    fn test_preview_count_tracks_file_count() {
        // Deterministic pseudo-random walk over add/remove/clear
        let resources = ResourceManager::shared();
        let mut session = UploadSession::new(resources.clone());
        let mut seed: u64 = 0x5eed;

        for step in 0..500 {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let before: Vec<_> = session.previews().cloned().collect();

            match (seed >> 33) % 10 {
                0..=4 => {
                    session.add(vec![image(&format!("img{}.png", step))]);
                    let after: Vec<_> = session.previews().cloned().collect();
                    assert_eq!(&after[..before.len()], &before[..]);
                }
                5..=8 => {
                    if !session.is_empty() {
                        let idx = (seed as usize) % session.len();
                        session.remove_at(idx);
                        let mut expected = before.clone();
                        expected.remove(idx);
                        let after: Vec<_> = session.previews().cloned().collect();
                        assert_eq!(after, expected);
                    }
                }
                _ => session.clear(),
            }

            assert_eq!(resources.live_count(), session.len());
            assert!(session.previews().all(|p| resources.is_live(p)));
        }
    }

    #[test]
    fn test_from_path_guesses_mime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Street.JPG");
        std::fs::write(&path, b"\xff\xd8\xff").unwrap();

        let file = InputFile::from_path(&path).unwrap();
        assert_eq!(file.name, "Street.JPG");
        assert_eq!(file.mime, "image/jpeg");
        assert_eq!(file.len(), 3);

        assert_eq!(guess_mime(Path::new("a.webp")), "image/webp");
        assert_eq!(guess_mime(Path::new("a.bin")), "application/octet-stream");
    }

    #[test]
    fn test_from_path_missing_file() {
        let err = InputFile::from_path(Path::new("/definitely/missing.png")).unwrap_err();
        assert!(err.to_string().contains("Failed to read image"));
    }
}
