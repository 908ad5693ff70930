//! Package manifest: the only artifact shared by precompile and run time.
//!
//! One line per archived package, `<import path> -> <stored path>`. The file
//! is an append-only log; reading folds it in order so the last line for an
//! import path wins and duplicates are harmless.

use std::collections::BTreeSet;
use std::fmt;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;

use indexmap::IndexMap;

use crate::safe_io::FileLock;

/// Separator between the two columns of a manifest line.
pub const ARROW: &str = " -> ";

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("malformed manifest line {line}: '{content}'")]
    Malformed { line: usize, content: String },
    #[error("manifest is not valid UTF-8")]
    Encoding,
    #[error("failed to read manifest: {0}")]
    Io(#[from] io::Error),
}

/// One archived package.
///
/// `deps` is only known while precompiling; records parsed back from a
/// manifest file carry an empty set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageRecord {
    pub import_path: String,
    pub stored_path: String,
    pub deps: BTreeSet<String>,
}

impl PackageRecord {
    pub fn new(import_path: impl Into<String>, stored_path: impl Into<String>) -> Self {
        Self {
            import_path: import_path.into(),
            stored_path: stored_path.into(),
            deps: BTreeSet::new(),
        }
    }

    /// The manifest line for this record, without trailing newline.
    pub fn line(&self) -> String {
        format!("{}{}{}", self.import_path, ARROW, self.stored_path)
    }
}

/// Folded view of a manifest: import path -> stored archive path, in first
/// appearance order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    entries: IndexMap<String, String>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(text: &str) -> Result<Self, ManifestError> {
        let mut manifest = Self::new();
        for (idx, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }
            let Some((source, stored)) = line.split_once(ARROW) else {
                return Err(ManifestError::Malformed {
                    line: idx + 1,
                    content: line.to_string(),
                });
            };
            let (source, stored) = (source.trim(), stored.trim());
            if source.is_empty() || stored.is_empty() {
                return Err(ManifestError::Malformed {
                    line: idx + 1,
                    content: line.to_string(),
                });
            }
            manifest.insert(source, stored);
        }
        Ok(manifest)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ManifestError> {
        let text = std::str::from_utf8(bytes).map_err(|_| ManifestError::Encoding)?;
        Self::parse(text)
    }

    /// Read a manifest file from the host. A missing file is an empty
    /// manifest, since the first precompile run starts from nothing.
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        match std::fs::read(path) {
            Ok(bytes) => Self::from_bytes(&bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::new()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn insert(&mut self, import_path: &str, stored_path: &str) {
        self.entries
            .insert(import_path.to_string(), stored_path.to_string());
    }

    pub fn get(&self, import_path: &str) -> Option<&str> {
        self.entries.get(import_path).map(String::as_str)
    }

    pub fn contains(&self, import_path: &str) -> bool {
        self.entries.contains_key(import_path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl fmt::Display for Manifest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (source, stored) in self.iter() {
            writeln!(f, "{}{}{}", source, ARROW, stored)?;
        }
        Ok(())
    }
}

/// Append one record to the manifest file, creating it if needed.
///
/// Appends are serialised through a sibling `.lock` file so concurrent
/// precompile runs sharing a store cannot interleave partial lines.
pub fn append_record(manifest_path: &Path, record: &PackageRecord) -> io::Result<()> {
    let mut lock_name = manifest_path.as_os_str().to_owned();
    lock_name.push(".lock");
    let _lock = FileLock::acquire(Path::new(&lock_name))?;

    if let Some(parent) = manifest_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(manifest_path)?;
    writeln!(file, "{}", record.line())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_basic() {
        let m = Manifest::parse("fmt -> /prebuilt/fmt.a\n\nstrings -> /prebuilt/strings.a\n")
            .unwrap();
        assert_eq!(m.len(), 2);
        assert_eq!(m.get("fmt"), Some("/prebuilt/fmt.a"));
        assert_eq!(m.get("strings"), Some("/prebuilt/strings.a"));
        assert_eq!(m.get("os"), None);
    }

    #[test]
    fn test_last_writer_wins_keeps_first_position() {
        let m = Manifest::parse("fmt -> /old/fmt.a\nos -> /prebuilt/os.a\nfmt -> /new/fmt.a\n")
            .unwrap();
        assert_eq!(m.get("fmt"), Some("/new/fmt.a"));
        let keys: Vec<_> = m.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["fmt", "os"]);
    }

    #[test]
    fn test_malformed_line_reports_position() {
        let err = Manifest::parse("fmt -> /prebuilt/fmt.a\nthis is not a record\n").unwrap_err();
        match err {
            ManifestError::Malformed { line, content } => {
                assert_eq!(line, 2);
                assert_eq!(content, "this is not a record");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_empty_column_is_malformed() {
        assert!(Manifest::parse(" -> /prebuilt/x.a").is_err());
    }

    #[test]
    fn test_display_round_trips() {
        let text = "fmt -> /prebuilt/fmt.a\nos -> /prebuilt/os.a\n";
        let m = Manifest::parse(text).unwrap();
        assert_eq!(m.to_string(), text);
    }

    #[test]
    fn test_load_missing_is_empty() {
        let dir = TempDir::new().unwrap();
        let m = Manifest::load(&dir.path().join("manifest.txt")).unwrap();
        assert!(m.is_empty());
    }

    #[test]
    fn test_append_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store/manifest.txt");
        append_record(&path, &PackageRecord::new("fmt", "/prebuilt/fmt.a")).unwrap();
        append_record(&path, &PackageRecord::new("fmt", "/prebuilt/fmt.a")).unwrap();
        append_record(&path, &PackageRecord::new("io", "/prebuilt/io.a")).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert_eq!(raw.lines().count(), 3);

        let m = Manifest::load(&path).unwrap();
        assert_eq!(m.len(), 2);
        assert_eq!(m.get("io"), Some("/prebuilt/io.a"));
    }

    #[test]
    fn test_non_utf8_is_encoding_error() {
        let err = Manifest::from_bytes(&[0xff, 0xfe]).unwrap_err();
        assert!(matches!(err, ManifestError::Encoding));
    }
}
