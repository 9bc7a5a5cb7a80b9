use crate::digest::DigestAlgorithm;
use crate::error::{Error, Result};
use crate::manifest;
use std::collections::BTreeSet;
use std::io;
use std::path::Path;
use tracing::warn;
use walkdir::WalkDir;

/// List the trackable entries of `dir`, one level deep.
///
/// Subdirectories are returned as plain names. The manifest file of
/// `algorithm` is skipped, as are names a manifest line cannot represent.
pub fn list(dir: &Path, algorithm: DigestAlgorithm) -> Result<BTreeSet<String>> {
    let mut names = BTreeSet::new();
    for ent in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let ent = ent.map_err(|e| Error::io("read directory", dir)(io::Error::from(e)))?;
        let Some(name) = ent.file_name().to_str() else {
            warn!(dir = %dir.display(), name = ?ent.file_name(), "skipping non UTF-8 filename");
            continue;
        };
        if name == algorithm.manifest_name() {
            continue;
        }
        if !manifest::is_valid_name(name) {
            warn!(dir = %dir.display(), name = ?name, "skipping filename that cannot be tracked");
            continue;
        }
        names.insert(name.to_owned());
    }
    Ok(names)
}
