//! Archive writer.
//!
//! ```no_run
//! use baked::writer::{BakeOptions, BakedWriter};
//!
//! let opts = BakeOptions { hash_content: true, ..BakeOptions::default() };
//! let mut writer = BakedWriter::from_dir("mypkg", &opts)?;
//! writer.update_metadata("version", "1.0.0")?;
//! let path = writer.write_to_file("mypkg")?;     // -> mypkg.baked
//! # Ok::<(), baked::BakedError>(())
//! ```
//!
//! Everything is assembled in memory; the file is only touched once the
//! archive is complete, through a temporary file renamed into place.

use std::ffi::OsString;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tempfile::NamedTempFile;
use tracing::debug;
use walkdir::WalkDir;

use crate::codec::{Dict, Value};
use crate::error::{BakedError, Result};
use crate::fragments::FragmentTable;
use crate::header::{with_content_hash, Header, EXTENSION, HASH_KEY};

// ── BakeOptions ───────────────────────────────────────────────────────────────

/// Configuration for [`BakedWriter::from_dir`].
#[derive(Debug, Clone)]
pub struct BakeOptions {
    /// Only files with this extension become fragments.  A leading dot is
    /// ignored.
    pub source_extension: String,
    /// Directory names pruned from the walk, at any depth.
    pub excluded_dirs:    Vec<String>,
    /// Store the fragment table's SHA-256 under `--fh` in the metadata.
    pub hash_content:     bool,
}

impl Default for BakeOptions {
    fn default() -> Self {
        Self {
            source_extension: "py".to_owned(),
            excluded_dirs:    vec!["__pycache__".to_owned()],
            hash_content:     false,
        }
    }
}

// ── BakedWriter ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct BakedWriter {
    source:       Option<PathBuf>,
    fragments:    FragmentTable,
    metadata:     Dict,
    hash_content: bool,
}

impl BakedWriter {
    /// Empty writer; fragments are added with [`include`](Self::include).
    pub fn new() -> Self {
        Self::default()
    }

    /// Collect every source file under `path`.
    ///
    /// Fragment names are the dotted relative path without the extension
    /// (`pkg/sub/mod.py` → `pkg.sub.mod`).  Every name component must be an
    /// identifier; the first one that is not fails the whole walk with
    /// [`BakedError::Naming`].
    pub fn from_dir<P: AsRef<Path>>(path: P, opts: &BakeOptions) -> Result<Self> {
        let root = path.as_ref();
        if !root.is_dir() {
            return Err(BakedError::NotADirectory(root.to_owned()));
        }
        let root = root.canonicalize()?;
        debug!(source = %root.display(), "looking for modules to include");

        let fragments = discover(&root, opts)?;
        Ok(Self {
            source: Some(root),
            fragments,
            metadata: Dict::new(),
            hash_content: opts.hash_content,
        })
    }

    pub fn include(&mut self, name: impl Into<Vec<u8>>, content: impl Into<Vec<u8>>) -> &mut Self {
        self.fragments.push(name, content);
        self
    }

    pub fn fragments(&self) -> &FragmentTable {
        &self.fragments
    }

    pub fn metadata(&self) -> &Dict {
        &self.metadata
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Replace the metadata.  Must be a dict without the reserved hash key.
    pub fn set_metadata(&mut self, metadata: impl Into<Value>) -> Result<()> {
        let metadata = match metadata.into() {
            Value::Dict(dict) => dict,
            other => return Err(BakedError::MetadataNotDict(other.kind())),
        };
        if metadata.contains_key(HASH_KEY) {
            return Err(BakedError::ReservedKey);
        }
        self.metadata = metadata;
        Ok(())
    }

    pub fn update_metadata(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Result<()> {
        let key = key.into();
        if key == HASH_KEY {
            return Err(BakedError::ReservedKey);
        }
        self.metadata.insert(key, value);
        Ok(())
    }

    pub fn set_hash_content(&mut self, enabled: bool) -> &mut Self {
        self.hash_content = enabled;
        self
    }

    /// Archive file name derived from the source directory, if any.
    pub fn default_file_name(&self) -> Option<String> {
        let name = self.source.as_ref()?.file_name()?.to_str()?;
        Some(format!("{name}{EXTENSION}"))
    }

    pub fn build(&self) -> Result<Vec<u8>> {
        self.build_at(Utc::now())
    }

    /// Build with a fixed creation timestamp.
    pub fn build_at(&self, created: DateTime<Utc>) -> Result<Vec<u8>> {
        if self.metadata.contains_key(HASH_KEY) {
            return Err(BakedError::ReservedKey);
        }

        let metadata = if self.hash_content {
            let hash = self.fragments.hash();
            debug!(hash = %hex::encode(hash), "added content hash to metadata");
            with_content_hash(&self.metadata, hash)
        } else {
            self.metadata.clone()
        };

        let mut buf = Vec::new();
        Header::new(created, metadata).write(&mut buf)?;
        debug!(bytes = buf.len(), "wrote header");
        self.fragments.write(&mut buf)?;
        debug!(fragments = self.fragments.len(), bytes = buf.len(), "built archive");
        Ok(buf)
    }

    /// Build and write to `path`, appending the archive extension if it is
    /// missing.  Returns the path actually written.
    ///
    /// The file stem becomes the namespace of every module, so it must be an
    /// identifier.
    pub fn write_to_file<P: AsRef<Path>>(&self, path: P) -> Result<PathBuf> {
        let path = archive_path(path.as_ref());
        let stem = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_suffix(EXTENSION))
            .unwrap_or_default();
        if !is_identifier(stem) {
            return Err(BakedError::Naming { component: stem.to_owned(), path });
        }
        let bytes = self.build()?;

        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_owned(),
            _ => PathBuf::from("."),
        };
        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| e.error)?;

        debug!(path = %path.display(), bytes = bytes.len(), "wrote archive");
        Ok(path)
    }
}

/// `path` with the archive extension appended unless it already ends in it.
pub fn archive_path(path: &Path) -> PathBuf {
    if has_archive_extension(path) {
        return path.to_owned();
    }
    let mut name = OsString::from(path.as_os_str());
    name.push(EXTENSION);
    PathBuf::from(name)
}

pub fn has_archive_extension(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map_or(false, |n| n.len() > EXTENSION.len() && n.ends_with(EXTENSION))
}

// ── Source discovery ─────────────────────────────────────────────────────────

fn discover(root: &Path, opts: &BakeOptions) -> Result<FragmentTable> {
    let extension = opts.source_extension.trim_start_matches('.');
    let mut fragments = FragmentTable::new();

    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            !(entry.depth() > 0
                && entry.file_type().is_dir()
                && opts.excluded_dirs.iter().any(|d| entry.file_name() == d.as_str()))
        });

    for entry in walker {
        let entry = entry.map_err(io::Error::from)?;
        let path = entry.path();
        if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some(extension) {
            continue;
        }
        let relative = path.strip_prefix(root).unwrap_or(path);
        let name = module_name(relative, path)?;
        debug!(module = %name, path = %path.display(), "including module");
        fragments.push(name, fs::read(path)?);
    }
    Ok(fragments)
}

/// Dotted name for a file path relative to the source root.
fn module_name(relative: &Path, full: &Path) -> Result<String> {
    let stem = relative.file_stem().unwrap_or_default();
    let dirs = relative.parent().into_iter().flat_map(|p| p.components()).map(|c| c.as_os_str());

    let mut parts = Vec::new();
    for part in dirs.chain(std::iter::once(stem)) {
        match part.to_str() {
            Some(s) if is_identifier(s) => parts.push(s),
            _ => {
                return Err(BakedError::Naming {
                    component: part.to_string_lossy().into_owned(),
                    path:      full.to_owned(),
                })
            }
        }
    }
    Ok(parts.join("."))
}

/// Source file for a dotted module name below `root`, the inverse of the
/// naming used by [`BakedWriter::from_dir`].  Every segment must be an
/// identifier, so the result never leaves `root`.
pub fn module_file(root: &Path, name: &str, extension: &str) -> Result<PathBuf> {
    let mut path = root.to_owned();
    for segment in name.split('.') {
        if !is_identifier(segment) {
            return Err(BakedError::Naming {
                component: segment.to_owned(),
                path:      PathBuf::from(name),
            });
        }
        path.push(segment);
    }
    path.set_extension(extension.trim_start_matches('.'));
    Ok(path)
}

/// Letter or underscore, then letters, digits or underscores.
pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c == '_' || c.is_alphabetic() => chars.all(|c| c == '_' || c.is_alphanumeric()),
        _ => false,
    }
}
