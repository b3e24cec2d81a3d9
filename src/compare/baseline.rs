//! On-disk baseline documents, one per `(identifier, source)` pair.

use std::fs;
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, instrument};

use crate::record::{FieldMap, Record};

/// Errors produced by baseline storage.
#[derive(Debug, Error)]
pub enum BaselineError {
    /// I/O error reading or writing a baseline file.
    #[error("I/O error on baseline {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Baseline file is not a flat JSON object.
    #[error("baseline {path} is not a valid field document: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// No baseline recorded for the pair.
    #[error("no baseline for {identifier} ({source_name})\n  Suggestion: Record one first with `metascraper scrape --save-baseline`")]
    Missing {
        identifier: String,
        source_name: String,
    },
}

/// Key of one stored baseline.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct BaselineKey {
    pub identifier: String,
    pub source: String,
}

/// Directory of `"<identifier> (<source>).json"` documents.
#[derive(Debug, Clone)]
pub struct BaselineStore {
    root: PathBuf,
}

impl BaselineStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File path for a pair; path separators in either part are replaced.
    #[must_use]
    pub fn path_for(&self, identifier: &str, source: &str) -> PathBuf {
        self.root.join(format!(
            "{} ({}).json",
            sanitize(identifier),
            sanitize(source)
        ))
    }

    /// Writes the record's field view, replacing any previous baseline.
    ///
    /// # Errors
    ///
    /// Returns [`BaselineError::Io`] when the directory or file cannot be written.
    #[instrument(skip(self, record), fields(id = %record.identifier, source = %record.source))]
    pub fn save(&self, record: &Record) -> Result<PathBuf, BaselineError> {
        fs::create_dir_all(&self.root).map_err(|source| BaselineError::Io {
            path: self.root.clone(),
            source,
        })?;
        let path = self.path_for(&record.identifier, &record.source);
        let partial = path.with_extension("json.part");
        let io_error = |source| BaselineError::Io {
            path: path.clone(),
            source,
        };

        let file = fs::File::create(&partial).map_err(io_error)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &record.to_fields()).map_err(|source| {
            let _ = fs::remove_file(&partial);
            BaselineError::Parse {
                path: path.clone(),
                source,
            }
        })?;
        writer.flush().map_err(io_error)?;
        drop(writer);
        fs::rename(&partial, &path).map_err(io_error)?;

        debug!(path = %path.display(), "baseline saved");
        Ok(path)
    }

    /// Loads the baseline for a pair.
    ///
    /// # Errors
    ///
    /// [`BaselineError::Missing`] when none was recorded, otherwise I/O or parse errors.
    pub fn load(&self, identifier: &str, source: &str) -> Result<FieldMap, BaselineError> {
        let path = self.path_for(identifier, source);
        match load_fields(&path) {
            Err(BaselineError::Io { source: err, .. }) if err.kind() == ErrorKind::NotFound => {
                Err(BaselineError::Missing {
                    identifier: identifier.to_string(),
                    source_name: source.to_string(),
                })
            }
            other => other,
        }
    }

    /// Every stored pair, sorted. A missing directory yields an empty list.
    ///
    /// # Errors
    ///
    /// Returns [`BaselineError::Io`] when the directory cannot be listed.
    pub fn list(&self) -> Result<Vec<BaselineKey>, BaselineError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(BaselineError::Io {
                    path: self.root.clone(),
                    source,
                });
            }
        };

        let mut keys: Vec<BaselineKey> = entries
            .filter_map(Result::ok)
            .filter_map(|entry| parse_file_name(&entry.file_name().to_string_lossy()))
            .collect();
        keys.sort();
        Ok(keys)
    }
}

/// Reads any flat field document, such as a baseline or a saved record view.
///
/// # Errors
///
/// Returns [`BaselineError`] when the file cannot be read or is not a JSON object.
pub fn load_fields(path: &Path) -> Result<FieldMap, BaselineError> {
    let raw = fs::read_to_string(path).map_err(|source| BaselineError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| BaselineError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn sanitize(part: &str) -> String {
    part.trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            other => other,
        })
        .collect()
}

fn parse_file_name(name: &str) -> Option<BaselineKey> {
    let stem = name.strip_suffix(".json")?;
    let (identifier, rest) = stem.rsplit_once(" (")?;
    let source = rest.strip_suffix(')')?;
    if identifier.is_empty() || source.is_empty() {
        return None;
    }
    Some(BaselineKey {
        identifier: identifier.to_string(),
        source: source.to_string(),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn record(source: &str) -> Record {
        let mut record = Record::new("IPX-177", source);
        record.title = Some("Summer Story".to_string());
        record.push_cast("Momo Sakura");
        record
    }

    #[test]
    fn test_path_follows_naming_convention() {
        let store = BaselineStore::new("/data/baselines");
        assert_eq!(
            store.path_for("IPX-177", "alpha"),
            PathBuf::from("/data/baselines/IPX-177 (alpha).json")
        );
        assert_eq!(
            store.path_for("FC2-PPV-1234567", "a/b"),
            PathBuf::from("/data/baselines/FC2-PPV-1234567 (a_b).json")
        );
    }

    #[test]
    fn test_save_then_load() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = BaselineStore::new(tmp.path().join("baselines"));

        let path = store.save(&record("alpha")).unwrap();
        assert!(path.ends_with("IPX-177 (alpha).json"));
        assert!(!path.with_extension("json.part").exists());

        let fields = store.load("IPX-177", "alpha").unwrap();
        assert_eq!(fields, record("alpha").to_fields());
    }

    #[test]
    fn test_save_overwrites() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = BaselineStore::new(tmp.path());
        store.save(&record("alpha")).unwrap();

        let mut updated = record("alpha");
        updated.title = Some("Autumn Story".to_string());
        store.save(&updated).unwrap();

        let fields = store.load("IPX-177", "alpha").unwrap();
        assert_eq!(fields["title"], "Autumn Story");
    }

    #[test]
    fn test_load_missing_is_reported() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = BaselineStore::new(tmp.path());
        let err = store.load("IPX-177", "alpha").unwrap_err();
        assert!(matches!(err, BaselineError::Missing { .. }));
        assert!(err.to_string().contains("Suggestion"));
    }

    #[test]
    fn test_load_rejects_non_object() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = BaselineStore::new(tmp.path());
        fs::write(store.path_for("IPX-177", "alpha"), "[1, 2]").unwrap();
        assert!(matches!(
            store.load("IPX-177", "alpha").unwrap_err(),
            BaselineError::Parse { .. }
        ));
    }

    #[test]
    fn test_list_parses_names() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = BaselineStore::new(tmp.path());
        store.save(&record("beta")).unwrap();
        store.save(&record("alpha")).unwrap();
        fs::write(tmp.path().join("notes.txt"), "ignored").unwrap();

        let keys = store.list().unwrap();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].source, "alpha");
        assert_eq!(keys[1].identifier, "IPX-177");
    }

    #[test]
    fn test_list_missing_dir_is_empty() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = BaselineStore::new(tmp.path().join("nope"));
        assert!(store.list().unwrap().is_empty());
    }
}
