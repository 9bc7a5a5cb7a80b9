//! Parallel chunked hashing of one file at a time.
//!
//! A [`ChunkHashPipeline`] owns a fixed set of worker threads that share one
//! bounded work queue. [`ChunkHashPipeline::hash_file`] reads a file in
//! fixed-size chunks, feeds them to the workers, waits for every chunk to be
//! acknowledged, then hashes the per-chunk digests in index order. The result
//! only depends on the file content, the chunk size and the algorithm, never on
//! which worker hashed which chunk.
//!
//! The bounded queue is the only backpressure point: at most
//! `queue_capacity * chunk_size` bytes are in flight for a file of any size.

use crate::digest::DigestAlgorithm;
use crate::error::{Error, Result};
use crossbeam_channel::{bounded, select, unbounded, Receiver, Sender};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::thread::{self, JoinHandle};
use tracing::{debug, error};

pub const DEFAULT_CHUNK_SIZE: usize = 1_000_000;
pub const DEFAULT_QUEUE_CAPACITY: usize = 32;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Number of worker threads.
    pub workers: usize,
    pub chunk_size: usize,
    /// Capacity of the work queue, in chunks.
    pub queue_capacity: usize,
    pub algorithm: DigestAlgorithm,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: num_cpus::get(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            algorithm: DigestAlgorithm::default(),
        }
    }
}

/// A slice of one file waiting to be hashed.
struct Chunk {
    index: usize,
    payload: Vec<u8>,
}

/// What a worker sends back once a chunk is hashed; the payload is gone by then.
struct ChunkDigest {
    index: usize,
    digest: Vec<u8>,
}

struct Worker {
    id: usize,
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

pub struct ChunkHashPipeline {
    chunk_size: usize,
    algorithm: DigestAlgorithm,
    work_tx: Sender<Chunk>,
    digest_rx: Receiver<ChunkDigest>,
    done_rx: Receiver<()>,
    workers: Vec<Worker>,
}

impl ChunkHashPipeline {
    /// Spawn the worker pool. Zero values in `config` are raised to one.
    pub fn start(config: PipelineConfig) -> Result<Self> {
        let count = config.workers.max(1);
        let (work_tx, work_rx) = bounded::<Chunk>(config.queue_capacity.max(1));
        let (digest_tx, digest_rx) = unbounded::<ChunkDigest>();
        let (done_tx, done_rx) = unbounded::<()>();

        let mut pipeline = Self {
            chunk_size: config.chunk_size.max(1),
            algorithm: config.algorithm,
            work_tx,
            digest_rx,
            done_rx,
            workers: Vec::with_capacity(count),
        };
        for id in 0..count {
            let (stop_tx, stop_rx) = bounded::<()>(1);
            let work_rx = work_rx.clone();
            let digest_tx = digest_tx.clone();
            let done_tx = done_tx.clone();
            let algorithm = config.algorithm;
            let handle = thread::Builder::new()
                .name(format!("hash-worker-{id}"))
                .spawn(move || run_worker(id, algorithm, work_rx, stop_rx, digest_tx, done_tx))
                .map_err(|source| Error::Spawn { id, source })?;
            pipeline.workers.push(Worker { id, stop_tx, handle });
        }
        debug!(
            workers = count,
            chunk_size = pipeline.chunk_size,
            queue = config.queue_capacity,
            algorithm = %config.algorithm,
            "hash pipeline started"
        );
        Ok(pipeline)
    }

    pub fn workers(&self) -> usize {
        self.workers.len()
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Compute the composite digest of `path` and return it as lower-case hex.
    ///
    /// A read error aborts the call. Chunks already queued are still drained
    /// so the pool can be used for the next file.
    pub fn hash_file(&mut self, path: &Path) -> Result<String> {
        let mut file = File::open(path).map_err(Error::io("open", path))?;
        let mut sent = 0usize;
        let produced = self.enqueue_chunks(&mut file, &mut sent);
        let collected = self.collect(sent);
        match produced {
            Err(EnqueueError::Read(e)) => return Err(Error::io("read", path)(e)),
            Err(EnqueueError::Disconnected) => return Err(Error::PoolDisconnected),
            Ok(()) => {}
        }
        let digests = collected?;

        let mut hasher = self.algorithm.hasher();
        for digest in digests.values() {
            hasher.update(digest);
        }
        let hex = hex::encode(hasher.finalize());
        debug!(path = %path.display(), chunks = sent, digest = %hex, "hashed file");
        Ok(hex)
    }

    /// Signal every worker to exit and wait for all of them.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn enqueue_chunks(&self, file: &mut impl Read, sent: &mut usize) -> Result<(), EnqueueError> {
        loop {
            let payload = read_chunk(file, self.chunk_size).map_err(EnqueueError::Read)?;
            if payload.is_empty() {
                return Ok(());
            }
            let short = payload.len() < self.chunk_size;
            // Blocks while the queue is full.
            self.work_tx
                .send(Chunk { index: *sent, payload })
                .map_err(|_| EnqueueError::Disconnected)?;
            *sent += 1;
            if short {
                return Ok(());
            }
        }
    }

    /// Wait for `expected` acknowledgements, then take exactly `expected` digests.
    fn collect(&self, expected: usize) -> Result<BTreeMap<usize, Vec<u8>>> {
        for _ in 0..expected {
            self.done_rx.recv().map_err(|_| Error::PoolDisconnected)?;
        }
        let mut digests = BTreeMap::new();
        for _ in 0..expected {
            let d = self.digest_rx.recv().map_err(|_| Error::PoolDisconnected)?;
            digests.insert(d.index, d.digest);
        }
        Ok(digests)
    }

    fn shutdown(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        for w in &self.workers {
            // A worker that already exited has dropped its receiver.
            let _ = w.stop_tx.send(());
        }
        for w in std::mem::take(&mut self.workers) {
            if let Err(e) = w.handle.join() {
                error!("hash worker {} panicked: {:?}", w.id, e);
            }
        }
        debug!("hash pipeline stopped");
    }
}

impl Drop for ChunkHashPipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}

enum EnqueueError {
    Read(io::Error),
    Disconnected,
}

/// Read up to `chunk_size` bytes; shorter only at end of file.
fn read_chunk(reader: &mut impl Read, chunk_size: usize) -> io::Result<Vec<u8>> {
    let mut payload = Vec::with_capacity(chunk_size);
    reader.by_ref().take(chunk_size as u64).read_to_end(&mut payload)?;
    Ok(payload)
}

fn run_worker(
    id: usize,
    algorithm: DigestAlgorithm,
    work_rx: Receiver<Chunk>,
    stop_rx: Receiver<()>,
    digest_tx: Sender<ChunkDigest>,
    done_tx: Sender<()>,
) {
    debug!("hash worker {} running", id);
    loop {
        select! {
            recv(stop_rx) -> _ => break,
            recv(work_rx) -> msg => {
                let Ok(chunk) = msg else { break };
                let digest = algorithm.digest(&chunk.payload);
                drop(chunk.payload);
                if digest_tx.send(ChunkDigest { index: chunk.index, digest }).is_err() {
                    break;
                }
                if done_tx.send(()).is_err() {
                    break;
                }
            }
        }
    }
    debug!("hash worker {} stopped", id);
}
