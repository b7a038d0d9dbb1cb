//! Flat-file model store.
//!
//! Each enrolled person is one file holding a JSON array of embeddings,
//! placed under a directory chosen by the storage [`Scope`]:
//!
//! ```text
//! <root>/<person>_model.pkl                       global
//! <root>/<username>/<person>_model.pkl            per user
//! <root>/<username>_<unique_id>/<person>_model.pkl per user instance
//! ```

use crate::types::{Embedding, Gallery};
use std::fs;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Suffix shared by every model file.
pub const MODEL_FILE_SUFFIX: &str = "_model.pkl";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("invalid name {0:?}: must be non-empty and free of path separators")]
    InvalidName(String),
    #[error("refusing to store an empty model for {0}")]
    EmptyModel(String),
    #[error("model not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("model JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Storage partition a model is written to and read from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Scope {
    #[default]
    Global,
    User(String),
    UserInstance { username: String, unique_id: String },
}

impl Scope {
    /// Resolve optional identifiers into a scope.
    ///
    /// Blank values count as absent. A unique id without a username falls
    /// back to the global scope.
    pub fn resolve(username: Option<&str>, unique_id: Option<&str>) -> Self {
        let present = |v: Option<&str>| v.map(str::trim).filter(|s| !s.is_empty()).map(str::to_owned);
        match (present(username), present(unique_id)) {
            (Some(username), Some(unique_id)) => Scope::UserInstance { username, unique_id },
            (Some(username), None) => Scope::User(username),
            (None, _) => Scope::Global,
        }
    }

    fn dir(&self, root: &Path) -> Result<PathBuf, StoreError> {
        Ok(match self {
            Scope::Global => root.to_path_buf(),
            Scope::User(username) => root.join(validate_name(username)?),
            Scope::UserInstance { username, unique_id } => {
                let dir = format!("{}_{}", validate_name(username)?, validate_name(unique_id)?);
                root.join(dir)
            }
        })
    }
}

/// Reject names that would escape or alias the scope directory.
fn validate_name(name: &str) -> Result<&str, StoreError> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0']);
    if bad {
        Err(StoreError::InvalidName(name.to_string()))
    } else {
        Ok(name)
    }
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Person name encoded in a model file name, if it is one.
pub fn person_from_file_name(file_name: &str) -> Option<&str> {
    file_name
        .strip_suffix(MODEL_FILE_SUFFIX)
        .filter(|name| !name.is_empty())
}

/// Per-person embedding files under one storage root.
#[derive(Debug, Clone)]
pub struct ModelStore {
    root: PathBuf,
}

impl ModelStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Where `person`'s model lives (or would live) under `scope`.
    pub fn model_path(&self, scope: &Scope, person: &str) -> Result<PathBuf, StoreError> {
        let file = format!("{}{MODEL_FILE_SUFFIX}", validate_name(person)?);
        Ok(scope.dir(&self.root)?.join(file))
    }

    /// Write `person`'s embeddings, replacing any previous model.
    ///
    /// The file is written beside its target and renamed into place, so
    /// readers see either the old model or the complete new one.
    pub fn save(&self, scope: &Scope, person: &str, embeddings: &[Embedding]) -> Result<PathBuf, StoreError> {
        if embeddings.is_empty() {
            return Err(StoreError::EmptyModel(person.to_string()));
        }
        let path = self.model_path(scope, person)?;
        let dir = scope.dir(&self.root)?;
        fs::create_dir_all(&dir).map_err(io_err(&dir))?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(io_err(&dir))?;
        {
            let mut writer = BufWriter::new(tmp.as_file_mut());
            serde_json::to_writer(&mut writer, embeddings)?;
            writer.flush().map_err(io_err(&path))?;
        }
        tmp.persist(&path).map_err(|e| io_err(&path)(e.error))?;

        tracing::info!(
            person,
            path = %path.display(),
            embeddings = embeddings.len(),
            "model saved"
        );
        Ok(path)
    }

    /// Load every model under `scope`, keyed by person name.
    ///
    /// A missing scope directory is an empty gallery. Files that cannot be
    /// read or parsed, and empty models, are skipped with a warning.
    pub fn load_all(&self, scope: &Scope) -> Result<Gallery, StoreError> {
        let mut gallery = Gallery::new();
        for (person, path) in self.model_files(scope)? {
            match read_model(&path) {
                Ok(embeddings) if embeddings.is_empty() => {
                    tracing::warn!(path = %path.display(), "skipping empty model file");
                }
                Ok(embeddings) => {
                    gallery.insert(person, embeddings);
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable model file");
                }
            }
        }
        tracing::debug!(people = ?gallery.keys().collect::<Vec<_>>(), "models loaded");
        Ok(gallery)
    }

    /// Model file names under `scope`, sorted.
    pub fn list(&self, scope: &Scope) -> Result<Vec<String>, StoreError> {
        Ok(self
            .model_files(scope)?
            .into_iter()
            .map(|(person, _)| format!("{person}{MODEL_FILE_SUFFIX}"))
            .collect())
    }

    /// Remove `person`'s model, returning the path that was deleted.
    pub fn delete(&self, scope: &Scope, person: &str) -> Result<PathBuf, StoreError> {
        let path = self.model_path(scope, person)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                tracing::info!(person, path = %path.display(), "model deleted");
                Ok(path)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(StoreError::NotFound(path)),
            Err(e) => Err(io_err(&path)(e)),
        }
    }

    /// (person, path) for every model file in the scope directory, sorted
    /// by person name.
    fn model_files(&self, scope: &Scope) -> Result<Vec<(String, PathBuf)>, StoreError> {
        let dir = scope.dir(&self.root)?;
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_err(&dir)(e)),
        };

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(io_err(&dir))?;
            let file_name = entry.file_name();
            let Some(person) = file_name.to_str().and_then(person_from_file_name) else {
                continue;
            };
            if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                files.push((person.to_string(), entry.path()));
            }
        }
        files.sort();
        Ok(files)
    }
}

fn read_model(path: &Path) -> Result<Vec<Embedding>, StoreError> {
    let file = fs::File::open(path).map_err(io_err(path))?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emb(values: &[f32]) -> Embedding {
        Embedding::new(values.to_vec())
    }

    #[test]
    fn test_scope_resolution() {
        assert_eq!(Scope::resolve(None, None), Scope::Global);
        assert_eq!(Scope::resolve(Some("bob"), None), Scope::User("bob".into()));
        assert_eq!(
            Scope::resolve(Some("bob"), Some("42")),
            Scope::UserInstance { username: "bob".into(), unique_id: "42".into() }
        );
        // unique id alone falls back to the broader scope
        assert_eq!(Scope::resolve(None, Some("42")), Scope::Global);
        assert_eq!(Scope::resolve(Some("  "), Some("42")), Scope::Global);
        assert_eq!(Scope::resolve(Some("bob"), Some("")), Scope::User("bob".into()));
    }

    #[test]
    fn test_model_path_layouts() {
        let store = ModelStore::new("/models");
        assert_eq!(
            store.model_path(&Scope::Global, "Alice").unwrap(),
            PathBuf::from("/models/Alice_model.pkl")
        );
        assert_eq!(
            store.model_path(&Scope::User("bob".into()), "Alice").unwrap(),
            PathBuf::from("/models/bob/Alice_model.pkl")
        );
        let scope = Scope::UserInstance { username: "bob".into(), unique_id: "42".into() };
        assert_eq!(
            store.model_path(&scope, "Alice").unwrap(),
            PathBuf::from("/models/bob_42/Alice_model.pkl")
        );
    }

    #[test]
    fn test_invalid_names_rejected() {
        let store = ModelStore::new("/models");
        for name in ["", ".", "..", "../etc", "a/b", "a\\b"] {
            assert!(
                matches!(store.model_path(&Scope::Global, name), Err(StoreError::InvalidName(_))),
                "{name:?} accepted"
            );
        }
        assert!(matches!(
            store.model_path(&Scope::User("..".into()), "Alice"),
            Err(StoreError::InvalidName(_))
        ));
    }

    #[test]
    fn test_save_then_load_all() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path());

        store.save(&Scope::Global, "Bob", &[emb(&[0.0, 1.0])]).unwrap();
        let path = store.save(&Scope::Global, "Alice", &[emb(&[1.0, 0.0]), emb(&[0.9, 0.1])]).unwrap();
        assert_eq!(path, dir.path().join("Alice_model.pkl"));

        let gallery = store.load_all(&Scope::Global).unwrap();
        assert_eq!(gallery.keys().collect::<Vec<_>>(), vec!["Alice", "Bob"]);
        assert_eq!(gallery["Alice"].len(), 2);
        assert_eq!(gallery["Bob"], vec![emb(&[0.0, 1.0])]);
    }

    #[test]
    fn test_save_overwrites_previous_model() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path());

        store.save(&Scope::Global, "Alice", &[emb(&[1.0]), emb(&[2.0]), emb(&[3.0])]).unwrap();
        store.save(&Scope::Global, "Alice", &[emb(&[4.0])]).unwrap();

        let gallery = store.load_all(&Scope::Global).unwrap();
        assert_eq!(gallery["Alice"], vec![emb(&[4.0])]);
    }

    #[test]
    fn test_save_empty_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path());
        store.save(&Scope::Global, "Alice", &[emb(&[1.0])]).unwrap();

        let err = store.save(&Scope::Global, "Alice", &[]).unwrap_err();
        assert!(matches!(err, StoreError::EmptyModel(_)));
        assert_eq!(store.load_all(&Scope::Global).unwrap()["Alice"], vec![emb(&[1.0])]);
    }

    #[test]
    fn test_scopes_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path());
        let instance = Scope::UserInstance { username: "bob".into(), unique_id: "7".into() };

        store.save(&Scope::User("bob".into()), "Alice", &[emb(&[1.0])]).unwrap();
        store.save(&instance, "Carol", &[emb(&[2.0])]).unwrap();

        assert!(store.load_all(&Scope::Global).unwrap().is_empty());
        assert_eq!(store.list(&Scope::User("bob".into())).unwrap(), vec!["Alice_model.pkl"]);
        assert_eq!(store.list(&instance).unwrap(), vec!["Carol_model.pkl"]);
        assert!(dir.path().join("bob_7").join("Carol_model.pkl").is_file());
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path().join("does-not-exist"));
        assert!(store.load_all(&Scope::Global).unwrap().is_empty());
        assert!(store.list(&Scope::User("nobody".into())).unwrap().is_empty());
    }

    #[test]
    fn test_list_ignores_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path());
        store.save(&Scope::Global, "Zoe", &[emb(&[1.0])]).unwrap();
        store.save(&Scope::Global, "Alice", &[emb(&[1.0])]).unwrap();
        fs::write(dir.path().join("notes.txt"), "hi").unwrap();
        fs::write(dir.path().join("_model.pkl"), "[]").unwrap();
        // a user scope directory is not a global model
        store.save(&Scope::User("bob".into()), "Bob", &[emb(&[1.0])]).unwrap();

        assert_eq!(
            store.list(&Scope::Global).unwrap(),
            vec!["Alice_model.pkl", "Zoe_model.pkl"]
        );
    }

    #[test]
    fn test_load_all_skips_corrupt_and_empty_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path());
        store.save(&Scope::Global, "Alice", &[emb(&[1.0])]).unwrap();
        fs::write(dir.path().join("Broken_model.pkl"), b"\x80\x04garbage").unwrap();
        fs::write(dir.path().join("Empty_model.pkl"), "[]").unwrap();

        let gallery = store.load_all(&Scope::Global).unwrap();
        assert_eq!(gallery.keys().collect::<Vec<_>>(), vec!["Alice"]);
    }

    #[test]
    fn test_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path());
        store.save(&Scope::Global, "Alice", &[emb(&[1.0])]).unwrap();

        let removed = store.delete(&Scope::Global, "Alice").unwrap();
        assert!(!removed.exists());
        assert!(store.load_all(&Scope::Global).unwrap().is_empty());

        let err = store.delete(&Scope::Global, "Alice").unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn test_person_from_file_name() {
        assert_eq!(person_from_file_name("Alice_model.pkl"), Some("Alice"));
        assert_eq!(person_from_file_name("_model.pkl"), None);
        assert_eq!(person_from_file_name("Alice.pkl"), None);
    }
}
