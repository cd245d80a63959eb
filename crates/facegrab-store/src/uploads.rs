//! Uploaded image files, kept indefinitely under random names.

use std::io;
use std::path::{Path, PathBuf};

/// Upload extensions accepted for registration.
pub const ALLOWED_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "webp"];

const FALLBACK_EXTENSION: &str = "jpg";

/// Lower-cased extension of `file_name` if it is one of [`ALLOWED_EXTENSIONS`].
pub fn accepted_extension(file_name: &str) -> Option<&'static str> {
    let ext = Path::new(file_name).extension()?.to_str()?.to_ascii_lowercase();
    ALLOWED_EXTENSIONS.iter().copied().find(|allowed| *allowed == ext)
}

#[derive(Debug, Clone)]
pub struct UploadDir {
    root: PathBuf,
}

impl UploadDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write `bytes` to `<root>/<uuid>.<ext>`, creating the directory on demand.
    ///
    /// Unknown or missing extensions are stored as `.jpg`.
    pub fn save(&self, bytes: &[u8], extension: Option<&str>) -> io::Result<PathBuf> {
        std::fs::create_dir_all(&self.root)?;
        let ext = extension.unwrap_or(FALLBACK_EXTENSION);
        let path = self.root.join(format!("{}.{ext}", uuid::Uuid::new_v4()));
        std::fs::write(&path, bytes)?;
        tracing::debug!(path = %path.display(), bytes = bytes.len(), "upload stored");
        Ok(path)
    }
}
