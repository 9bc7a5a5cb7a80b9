//! Manifest-driven synchronization of a source directory into a destination.
//!
//! One run is a fixed sequence: scan and load both sides, classify, delete
//! orphans, re-verify tracked files, hash and copy the copy set, persist both
//! manifests. Everything here runs on the calling thread; only
//! [`ChunkHashPipeline`] is parallel.

use crate::digest::DigestAlgorithm;
use crate::error::{Error, Result};
use crate::manifest::{Manifest, ManifestFile};
use crate::notify::{Category, Notify};
use crate::pipeline::{ChunkHashPipeline, PipelineConfig, DEFAULT_CHUNK_SIZE, DEFAULT_QUEUE_CAPACITY};
use crate::scan;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncConfig {
    pub source: PathBuf,
    pub destination: PathBuf,
    /// Re-hash files present on both sides and recopy the changed ones.
    pub sync: bool,
    /// Delete destination files that have no source counterpart.
    pub delete: bool,
    pub quiet: bool,
    pub chunk_size: usize,
    pub queue_capacity: usize,
    pub workers: usize,
    pub algorithm: DigestAlgorithm,
}

impl SyncConfig {
    /// Append-only config with default hashing parameters.
    pub fn new(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            sync: false,
            delete: false,
            quiet: false,
            chunk_size: DEFAULT_CHUNK_SIZE,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            workers: num_cpus::get(),
            algorithm: DigestAlgorithm::default(),
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            workers: self.workers,
            chunk_size: self.chunk_size,
            queue_capacity: self.queue_capacity,
            algorithm: self.algorithm,
        }
    }
}

/// Name sets computed once per run from listings and manifests.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncPlan {
    /// Listed in the source directory but not in the source manifest.
    pub source_new: BTreeSet<String>,
    /// In the source manifest but never recorded at the destination.
    pub cross_new: BTreeSet<String>,
    /// Tracked at the destination with no source manifest entry, or untracked
    /// at the destination and absent from the source directory.
    pub orphans: BTreeSet<String>,
}

impl SyncPlan {
    /// Manifests are expected to be already restricted to their listings.
    pub fn classify(
        source_listing: &BTreeSet<String>,
        source: &Manifest,
        destination: &Manifest,
        destination_listing: &BTreeSet<String>,
    ) -> Self {
        let source_new = source_listing.iter().filter(|n| !source.contains(n)).cloned().collect();
        let cross_new = source.names().filter(|n| !destination.contains(n)).cloned().collect();
        let untracked = destination_listing
            .iter()
            .filter(|n| !destination.contains(n) && !source_listing.contains(*n));
        let orphans =
            destination.names().chain(untracked).filter(|n| !source.contains(n)).cloned().collect();
        Self { source_new, cross_new, orphans }
    }

    pub fn effective_new(&self) -> BTreeSet<String> {
        self.source_new.union(&self.cross_new).cloned().collect()
    }
}

/// Counters for one run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub new: usize,
    pub modified: usize,
    pub removed: usize,
    pub copied: usize,
    pub skipped: usize,
}

/// One managed directory during a run.
struct Side {
    dir: PathBuf,
    store: ManifestFile,
    manifest: Manifest,
    listing: BTreeSet<String>,
}

impl Side {
    fn open(dir: &Path, algorithm: DigestAlgorithm) -> Result<Self> {
        let listing = scan::list(dir, algorithm)?;
        let (store, mut manifest) = ManifestFile::load(dir, algorithm)?;
        for name in manifest.retain_listed(&listing) {
            debug!(dir = %dir.display(), name = %name, "file gone, dropping manifest entry");
        }
        Ok(Self { dir: dir.to_path_buf(), store, manifest, listing })
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    fn persist(&mut self) -> Result<()> {
        self.store.persist(&self.manifest)
    }
}

pub struct SyncEngine {
    config: SyncConfig,
}

impl SyncEngine {
    pub fn new(config: SyncConfig) -> Self {
        Self { config }
    }

    /// Run once with a pool created for this run and stopped afterwards.
    pub fn run(&self, notify: &mut dyn Notify) -> Result<SyncReport> {
        let mut pipeline = ChunkHashPipeline::start(self.config.pipeline_config())?;
        let result = self.run_with(&mut pipeline, notify);
        pipeline.stop();
        result
    }

    /// Run once using an already started pool.
    pub fn run_with(
        &self,
        pipeline: &mut ChunkHashPipeline,
        notify: &mut dyn Notify,
    ) -> Result<SyncReport> {
        let cfg = &self.config;
        let mut source = Side::open(&cfg.source, cfg.algorithm)?;
        let mut destination = Side::open(&cfg.destination, cfg.algorithm)?;
        let plan =
            SyncPlan::classify(&source.listing, &source.manifest, &destination.manifest, &destination.listing);
        let mut report = SyncReport::default();

        let effective_new = plan.effective_new();
        for name in &effective_new {
            notify.notify(Category::New, name);
        }
        report.new = effective_new.len();

        if cfg.delete {
            remove_orphans(&plan.orphans, &mut destination, notify, &mut report);
        }

        // Digests computed during this run, by name.
        let mut fresh: BTreeMap<String, String> = BTreeMap::new();
        let mut modified = BTreeSet::new();
        if cfg.sync {
            let tracked: Vec<String> =
                source.manifest.names().filter(|n| destination.manifest.contains(n)).cloned().collect();
            for name in tracked {
                let digest = match pipeline.hash_file(&source.path(&name)) {
                    Ok(d) => d,
                    Err(e) => {
                        skip(&name, &e, notify, &mut report);
                        continue;
                    }
                };
                let changed = source.manifest.get(&name) != Some(&digest)
                    || destination.manifest.get(&name) != Some(&digest);
                if changed {
                    notify.notify(Category::Modified, &name);
                    modified.insert(name.clone());
                }
                source.manifest.insert(name.clone(), digest.clone());
                fresh.insert(name, digest);
            }
            report.modified = modified.len();
        }

        let copy_set: BTreeSet<String> = effective_new.union(&modified).cloned().collect();
        let mut pending = Vec::with_capacity(copy_set.len());
        for name in copy_set {
            if let Some(digest) = fresh.remove(&name) {
                pending.push((name, digest));
                continue;
            }
            match pipeline.hash_file(&source.path(&name)) {
                Ok(digest) => {
                    source.manifest.insert(name.clone(), digest.clone());
                    pending.push((name, digest));
                }
                Err(e) => skip(&name, &e, notify, &mut report),
            }
        }

        for (name, digest) in pending {
            notify.notify(Category::Copying, &name);
            let from = source.path(&name);
            let to = destination.path(&name);
            match fs::copy(&from, &to) {
                Ok(bytes) => {
                    debug!(file = %name, bytes, "copied");
                    destination.manifest.insert(name, digest);
                    report.copied += 1;
                }
                Err(e) => {
                    // Forget the entry so the next run copies it again.
                    destination.manifest.remove(&name);
                    skip(&name, &Error::io("copy", &from)(e), notify, &mut report);
                }
            }
        }

        source.persist()?;
        destination.persist()?;
        info!(
            new = report.new,
            modified = report.modified,
            removed = report.removed,
            copied = report.copied,
            skipped = report.skipped,
            "sync finished"
        );
        Ok(report)
    }
}

fn remove_orphans(
    orphans: &BTreeSet<String>,
    destination: &mut Side,
    notify: &mut dyn Notify,
    report: &mut SyncReport,
) {
    for name in orphans {
        notify.notify(Category::MissingFromSource, name);
        destination.manifest.remove(name);
        let path = destination.path(name);
        match fs::remove_file(&path) {
            Ok(()) => report.removed += 1,
            Err(e) if e.kind() == io::ErrorKind::NotFound => report.removed += 1,
            Err(e) => warn!(path = %path.display(), "failed to delete orphan: {}", e),
        }
    }
}

fn skip(name: &str, err: &Error, notify: &mut dyn Notify, report: &mut SyncReport) {
    match std::error::Error::source(err) {
        Some(cause) => warn!(file = %name, "skipping: {}: {}", err, cause),
        None => warn!(file = %name, "skipping: {}", err),
    }
    notify.notify(Category::Skipped, name);
    report.skipped += 1;
}
