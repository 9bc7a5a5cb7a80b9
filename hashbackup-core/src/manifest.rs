//! Per-directory digest manifests.
//!
//! A manifest is a text file of `<hex digest><3 spaces><filename>\r\n` lines,
//! sorted by filename. It lives inside the directory it describes under the
//! reserved name of its digest algorithm (see [`DigestAlgorithm::manifest_name`]).

use crate::digest::DigestAlgorithm;
use crate::error::{Error, Result};
use fs2::FileExt;
use std::collections::{btree_map, BTreeMap, BTreeSet};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

pub const SEPARATOR: &str = "   ";
pub const LINE_END: &str = "\r\n";

/// Filename to hex digest, ordered by filename.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Manifest {
    entries: BTreeMap<String, String>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&String> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Returns the previous digest, if any.
    pub fn insert(&mut self, name: impl Into<String>, digest: impl Into<String>) -> Option<String> {
        self.entries.insert(name.into(), digest.into())
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.entries.remove(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, String> {
        self.entries.iter()
    }

    /// Drop every entry whose name is not in `listing` and return the dropped names.
    pub fn retain_listed(&mut self, listing: &BTreeSet<String>) -> Vec<String> {
        let mut dropped = Vec::new();
        self.entries.retain(|name, _| {
            let keep = listing.contains(name);
            if !keep {
                dropped.push(name.clone());
            }
            keep
        });
        dropped
    }
}

impl FromIterator<(String, String)> for Manifest {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self { entries: iter.into_iter().collect() }
    }
}

impl<'a> IntoIterator for &'a Manifest {
    type Item = (&'a String, &'a String);
    type IntoIter = btree_map::Iter<'a, String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Whether `name` can be stored on a manifest line and read back unchanged.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && !name.contains(['/', '\\', '\0', '\r', '\n'])
}

/// Split one line (terminator already stripped) into `(digest, filename)`.
pub fn tokenize(line: &str, algorithm: DigestAlgorithm) -> std::result::Result<(&str, &str), String> {
    let hex_len = algorithm.hex_len();
    let digest = line
        .get(..hex_len)
        .ok_or_else(|| format!("expected a {hex_len}-character {algorithm} digest"))?;
    if !digest.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
        return Err(format!("digest {digest:?} is not lower-case hex"));
    }
    let name = line[hex_len..]
        .strip_prefix(SEPARATOR)
        .ok_or_else(|| "expected three spaces after the digest".to_string())?;
    if !is_valid_name(name) {
        return Err(format!("invalid filename {name:?}"));
    }
    Ok((digest, name))
}

/// Parse a whole manifest. `path` is only used for error messages.
pub fn parse(text: &str, algorithm: DigestAlgorithm, path: &Path) -> Result<Manifest> {
    let mut manifest = Manifest::new();
    for (i, raw) in text.split('\n').enumerate() {
        let line = raw.strip_suffix('\r').unwrap_or(raw);
        if line.is_empty() {
            continue;
        }
        let format_err = |reason: String| Error::Format { path: path.to_path_buf(), line: i + 1, reason };
        let (digest, name) = tokenize(line, algorithm).map_err(format_err)?;
        if manifest.insert(name, digest).is_some() {
            return Err(format_err(format!("duplicate entry for {name:?}")));
        }
    }
    Ok(manifest)
}

/// Render a manifest in its on-disk form.
pub fn render(manifest: &Manifest) -> String {
    let mut out = String::new();
    for (name, digest) in manifest {
        out.push_str(digest);
        out.push_str(SEPARATOR);
        out.push_str(name);
        out.push_str(LINE_END);
    }
    out
}

/// Open, locked manifest file. The lock is held until the handle is dropped.
#[derive(Debug)]
pub struct ManifestFile {
    path: PathBuf,
    file: File,
}

impl ManifestFile {
    /// Open (creating if absent) and parse the manifest of `dir`.
    pub fn load(dir: &Path, algorithm: DigestAlgorithm) -> Result<(ManifestFile, Manifest)> {
        let path = dir.join(algorithm.manifest_name());
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(Error::io("open manifest", &path))?;
        if let Err(e) = file.try_lock_exclusive() {
            if e.kind() == fs2::lock_contended_error().kind() {
                return Err(Error::Locked { path });
            }
            return Err(Error::io("lock manifest", &path)(e));
        }

        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes).map_err(Error::io("read manifest", &path))?;
        let text = match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(e) => {
                let valid = &e.as_bytes()[..e.utf8_error().valid_up_to()];
                let line = valid.iter().filter(|&&b| b == b'\n').count() + 1;
                return Err(Error::Format { path, line, reason: "not valid UTF-8".into() });
            }
        };
        let manifest = parse(&text, algorithm, &path)?;
        Ok((ManifestFile { path, file }, manifest))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Truncate the backing file and rewrite it from `manifest`.
    pub fn persist(&mut self, manifest: &Manifest) -> Result<()> {
        let path = &self.path;
        self.file.set_len(0).map_err(Error::io("truncate manifest", path))?;
        self.file.seek(SeekFrom::Start(0)).map_err(Error::io("seek manifest", path))?;
        let mut w = BufWriter::new(&self.file);
        w.write_all(render(manifest).as_bytes()).map_err(Error::io("write manifest", path))?;
        w.flush().map_err(Error::io("write manifest", path))?;
        drop(w);
        self.file.sync_data().map_err(Error::io("sync manifest", path))?;
        Ok(())
    }
}
