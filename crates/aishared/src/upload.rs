//! Uploaded images, staged on disk for the engine.

use aishare_core::ImageSource;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::TempPath;

/// An uploaded image written to a `.jpg` temp file.
///
/// The file is removed when the guard drops, on every exit path of the
/// request. A failed removal is logged and otherwise ignored.
#[derive(Debug)]
pub struct TempImage {
    path: PathBuf,
    temp: Option<TempPath>,
}

impl TempImage {
    pub fn write(bytes: &[u8]) -> io::Result<Self> {
        let mut file = tempfile::Builder::new()
            .prefix("aishare-upload-")
            .suffix(".jpg")
            .tempfile()?;
        file.write_all(bytes)?;
        file.flush()?;
        let temp = file.into_temp_path();
        Ok(Self {
            path: temp.to_path_buf(),
            temp: Some(temp),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn source(&self) -> ImageSource {
        ImageSource::Path(self.path.clone())
    }
}

impl Drop for TempImage {
    fn drop(&mut self) {
        if let Some(temp) = self.temp.take() {
            if let Err(e) = temp.close() {
                tracing::warn!(path = %self.path.display(), error = %e, "could not delete temp file");
            }
        }
    }
}

/// Stage every upload, stopping at the first write failure. Files already
/// written are removed as the partial vector drops.
pub fn stage_all<B: AsRef<[u8]>>(uploads: &[B]) -> io::Result<Vec<TempImage>> {
    uploads.iter().map(|b| TempImage::write(b.as_ref())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temp_image_removed_on_drop() {
        let image = TempImage::write(b"pixels").unwrap();
        let path = image.path().to_path_buf();
        assert!(path.exists());
        assert_eq!(path.extension().unwrap(), "jpg");
        assert_eq!(std::fs::read(&path).unwrap(), b"pixels");

        drop(image);
        assert!(!path.exists());
    }

    #[test]
    fn test_drop_tolerates_missing_file() {
        let image = TempImage::write(b"x").unwrap();
        std::fs::remove_file(image.path()).unwrap();
        drop(image);
    }

    #[test]
    fn test_stage_all() {
        let staged = stage_all(&[b"a".to_vec(), b"b".to_vec()]).unwrap();
        assert_eq!(staged.len(), 2);
        assert!(matches!(staged[0].source(), ImageSource::Path(ref p) if p == staged[0].path()));
        let paths: Vec<PathBuf> = staged.iter().map(|t| t.path().to_path_buf()).collect();
        drop(staged);
        assert!(paths.iter().all(|p| !p.exists()));
    }
}
