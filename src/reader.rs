//! Archive reader.
//!
//! Opening parses only the two header records.  The fragment index is parsed
//! the first time it is needed and cached, as are the derived package set and
//! the hash check.  Fragment bodies are never cached: every
//! [`read_specific`](BakedReader::read_specific) goes back to the file.
//!
//! All access goes through one file handle and one seek cursor, hence
//! `&mut self` everywhere.  Use one reader per thread, or put it behind a
//! mutex.

use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::io::{BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::codec::Dict;
use crate::error::{BakedError, FormatError, Result};
use crate::fragments;
use crate::frame::read_record;
use crate::header::{Header, EXTENSION};
use crate::writer::{has_archive_extension, is_identifier};

/// A fragment as seen through the reader: its fully-qualified name
/// (`<archive name>.<fragment name>`) and the absolute file offset of its
/// body record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Module {
    pub name:   String,
    pub offset: u64,
}

pub struct BakedReader {
    path:         PathBuf,
    name:         String,
    file:         BufReader<File>,
    header:       Header,
    table_offset: u64,

    modules:      Option<Vec<Module>>,
    packages:     Option<BTreeSet<String>>,
    hash_match:   Option<Option<bool>>,
}

impl BakedReader {
    /// Open an archive.  The file must exist, end in `.baked` and have an
    /// identifier as its stem (`pkg.baked`, not `pkg.py.baked`); anything
    /// else is [`BakedError::NotAnArchive`].
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_owned();
        if !path.is_file() || !has_archive_extension(&path) {
            return Err(BakedError::NotAnArchive(path));
        }
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_suffix(EXTENSION))
            .filter(|n| is_identifier(n))
            .ok_or_else(|| BakedError::NotAnArchive(path.clone()))?
            .to_owned();

        let mut file = BufReader::new(File::open(&path)?);
        let header = Header::read(&mut file)?;
        let table_offset = file.stream_position()?;
        debug!(path = %path.display(), table_offset, "opened archive");

        Ok(Self {
            path,
            name,
            file,
            header,
            table_offset,
            modules: None,
            packages: None,
            hash_match: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Archive file name without the extension; the namespace of every module.
    /// Always an identifier, so it never adds dots of its own.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn created(&self) -> DateTime<Utc> {
        self.header.created
    }

    /// Owned copy of the metadata, including `--fh` when present.
    pub fn metadata(&self) -> Dict {
        self.header.metadata.clone()
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Absolute offset where the fragment table begins.
    pub fn table_offset(&self) -> u64 {
        self.table_offset
    }

    /// All modules in archive order.
    pub fn modules(&mut self) -> Result<&[Module]> {
        let modules = match self.modules.take() {
            Some(modules) => modules,
            None => self.load_modules()?,
        };
        let modules: &[Module] = self.modules.insert(modules);
        Ok(modules)
    }

    fn load_modules(&mut self) -> Result<Vec<Module>> {
        self.file.seek(SeekFrom::Start(self.table_offset))?;
        let entries = fragments::read_index(&mut self.file)?;
        entries
            .into_iter()
            .map(|entry| -> Result<Module> {
                let fragment = String::from_utf8(entry.name)
                    .map_err(|_| FormatError::InvalidUtf8("fragment name"))?;
                Ok(Module { name: format!("{}.{fragment}", self.name), offset: entry.offset })
            })
            .collect()
    }

    pub fn modules_dict(&mut self) -> Result<HashMap<String, u64>> {
        Ok(self.modules()?.iter().map(|m| (m.name.clone(), m.offset)).collect())
    }

    /// Every module name with its last dotted segment removed.  Includes the
    /// archive's own name whenever a module sits at the top level.
    pub fn packages(&mut self) -> Result<&BTreeSet<String>> {
        let packages = match self.packages.take() {
            Some(packages) => packages,
            None => self
                .modules()?
                .iter()
                .filter_map(|m| m.name.rsplit_once('.').map(|(package, _)| package.to_owned()))
                .collect(),
        };
        let packages: &BTreeSet<String> = self.packages.insert(packages);
        Ok(packages)
    }

    /// `None` when the archive carries no content hash, otherwise whether the
    /// stored hash equals one recomputed from the fragment table.
    pub fn hash_match(&mut self) -> Result<Option<bool>> {
        if let Some(cached) = self.hash_match {
            return Ok(cached);
        }
        let result = match self.header.content_hash().map(<[u8]>::to_vec) {
            None => None,
            Some(stored) => {
                self.file.seek(SeekFrom::Start(self.table_offset))?;
                let actual = fragments::hash_from(&mut self.file)?;
                let matched = stored == actual;
                if !matched {
                    warn!(path = %self.path.display(), "content hash mismatch");
                }
                Some(matched)
            }
        };
        self.hash_match = Some(result);
        Ok(result)
    }

    /// Offset of a module by fully-qualified name.
    pub fn offset_of(&mut self, name: &str) -> Result<Option<u64>> {
        Ok(self.modules()?.iter().find(|m| m.name == name).map(|m| m.offset))
    }

    /// Read the length-prefixed record at an absolute offset.
    pub fn read_specific(&mut self, offset: u64) -> Result<Vec<u8>> {
        self.file.seek(SeekFrom::Start(offset))?;
        read_record(&mut self.file)
    }

    /// Contents of a module by fully-qualified name.
    pub fn read_module(&mut self, name: &str) -> Result<Option<Vec<u8>>> {
        match self.offset_of(name)? {
            Some(offset) => self.read_specific(offset).map(Some),
            None => Ok(None),
        }
    }

    /// Prefix `name` with the archive name unless it already is.
    pub fn qualify(&self, name: &str) -> String {
        match name.strip_prefix(self.name.as_str()) {
            Some(rest) if rest.starts_with('.') => name.to_owned(),
            _ => format!("{}.{name}", self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Value;
    use crate::writer::BakedWriter;
    use tempfile::tempdir;

    fn bake(dir: &Path, name: &str, writer: &BakedWriter) -> PathBuf {
        writer.write_to_file(dir.join(name)).unwrap()
    }

    #[test]
    fn test_open_rejects_non_archives() {
        let dir = tempdir().unwrap();
        let plain = dir.path().join("plain.txt");
        std::fs::write(&plain, b"hello").unwrap();

        assert!(matches!(BakedReader::open(&plain), Err(BakedError::NotAnArchive(_))));
        assert!(matches!(
            BakedReader::open(dir.path().join("missing.baked")),
            Err(BakedError::NotAnArchive(_))
        ));
    }

    #[test]
    fn test_open_rejects_dotted_stem() {
        let dir = tempdir().unwrap();
        let mut writer = BakedWriter::new();
        writer.include("mod", "x");
        let bytes = writer.build().unwrap();
        for name in ["pkg.py.baked", "my-pkg.baked"] {
            let path = dir.path().join(name);
            std::fs::write(&path, &bytes).unwrap();
            assert!(matches!(BakedReader::open(&path), Err(BakedError::NotAnArchive(_))), "{name}");
        }
    }

    #[test]
    fn test_open_rejects_truncated_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.baked");
        std::fs::write(&path, [3u8, 0, 0]).unwrap();
        assert!(matches!(BakedReader::open(&path), Err(BakedError::CorruptHeader(_))));
    }

    #[test]
    fn test_modules_are_namespaced() {
        let dir = tempdir().unwrap();
        let mut writer = BakedWriter::new();
        writer.include("a", "A").include("pkg.b", "B");
        let path = bake(dir.path(), "demo", &writer);

        let mut reader = BakedReader::open(&path).unwrap();
        assert_eq!(reader.name(), "demo");
        let names: Vec<_> = reader.modules().unwrap().iter().map(|m| m.name.clone()).collect();
        assert_eq!(names, ["demo.a", "demo.pkg.b"]);
        assert_eq!(reader.read_module("demo.pkg.b").unwrap(), Some(b"B".to_vec()));
        assert_eq!(reader.read_module("demo.nope").unwrap(), None);
    }

    #[test]
    fn test_empty_archive() {
        let dir = tempdir().unwrap();
        let path = bake(dir.path(), "empty", &BakedWriter::new());
        let mut reader = BakedReader::open(&path).unwrap();
        assert!(reader.modules().unwrap().is_empty());
        assert!(reader.packages().unwrap().is_empty());
        assert_eq!(reader.hash_match().unwrap(), None);
    }

    #[test]
    fn test_metadata_is_a_copy() {
        let dir = tempdir().unwrap();
        let mut writer = BakedWriter::new();
        writer.update_metadata("k", "v").unwrap();
        let path = bake(dir.path(), "meta", &writer);

        let reader = BakedReader::open(&path).unwrap();
        let mut copy = reader.metadata();
        copy.insert("k", "changed");
        assert_eq!(reader.metadata().get("k"), Some(&Value::from("v")));
    }

    #[test]
    fn test_qualify() {
        let dir = tempdir().unwrap();
        let path = bake(dir.path(), "root", &BakedWriter::new());
        let reader = BakedReader::open(&path).unwrap();
        assert_eq!(reader.qualify("pkg.b"), "root.pkg.b");
        assert_eq!(reader.qualify("root.pkg.b"), "root.pkg.b");
        assert_eq!(reader.qualify("rootless"), "root.rootless");
    }
}
