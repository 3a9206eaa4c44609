//! Gap detection and priority-scheduled trie healing (spec §4.F).
//!
//! Grounded on the teacher's `sync/healing.rs` / `sync/state_healing.rs` /
//! `sync/storage_healing.rs` (gap-detection-then-worker-pool shape) and
//! `sync/healing_cache.rs` (the access-count idea, kept here as
//! [`AccessRecorder`] driving priority promotion).

use crate::error::SyncError;
use crate::traits::{PeerTransport, StateStore};
use chainsync_common::Hash;
use chainsync_crypto::keccak256;
use chainsync_trie::node::HASH_MARKER;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone)]
pub struct HealTask {
    pub path: Vec<u8>,
    pub expected_root: Hash,
    pub priority: Priority,
    pub depth: u32,
    pub retries: u32,
    pub created_at: Instant,
}

/// Counts accesses per path; `schedule_batch` promotes a task's priority
/// once its path has been seen enough times (spec §4.F "Priority
/// boosting").
#[derive(Default)]
pub struct AccessRecorder {
    counts: HashMap<Vec<u8>, u32>,
}

impl AccessRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn touch(&mut self, path: &[u8]) -> u32 {
        let count = self.counts.entry(path.to_vec()).or_insert(0);
        *count += 1;
        *count
    }

    pub fn priority_for(&self, path: &[u8]) -> Priority {
        match self.counts.get(path).copied().unwrap_or(0) {
            n if n >= 5 => Priority::High,
            n if n >= 2 => Priority::Medium,
            _ => Priority::Low,
        }
    }
}

struct Scheduler {
    buckets: HashMap<Priority, VecDeque<HealTask>>,
    scheduled_paths: HashSet<Vec<u8>>,
    access: AccessRecorder,
    healed_count: u64,
    failed_count: u64,
}

impl Scheduler {
    fn new() -> Self {
        Self {
            buckets: HashMap::new(),
            scheduled_paths: HashSet::new(),
            access: AccessRecorder::new(),
            healed_count: 0,
            failed_count: 0,
        }
    }

    fn enqueue(&mut self, path: Vec<u8>, expected_root: Hash, depth: u32) {
        if self.scheduled_paths.contains(&path) {
            return;
        }
        self.access.touch(&path);
        let priority = self.access.priority_for(&path);
        self.scheduled_paths.insert(path.clone());
        self.buckets.entry(priority).or_default().push_back(HealTask {
            path,
            expected_root,
            priority,
            depth,
            retries: 0,
            created_at: Instant::now(),
        });
    }

    fn requeue(&mut self, mut task: HealTask) {
        task.retries += 1;
        self.scheduled_paths.insert(task.path.clone());
        self.buckets.entry(task.priority).or_default().push_back(task);
    }

    fn pop_batch(&mut self, n: usize) -> Vec<HealTask> {
        let mut batch = Vec::with_capacity(n);
        for priority in [Priority::High, Priority::Medium, Priority::Low] {
            let bucket = self.buckets.entry(priority).or_default();
            let mut drained: Vec<HealTask> = bucket.drain(..).collect();
            drained.sort_by_key(|t| t.depth);
            for task in drained {
                if batch.len() >= n {
                    bucket.push_back(task);
                    continue;
                }
                self.scheduled_paths.remove(&task.path);
                batch.push(task);
            }
        }
        batch
    }

    fn is_empty(&self) -> bool {
        self.buckets.values().all(|b| b.is_empty())
    }
}

pub struct TrieHealer<S: StateStore, T: PeerTransport> {
    store: Arc<S>,
    transport: Arc<T>,
    max_retries: u32,
    workers: usize,
    scheduler: Mutex<Scheduler>,
}

impl<S: StateStore + 'static, T: PeerTransport + 'static> TrieHealer<S, T> {
    pub fn new(store: Arc<S>, transport: Arc<T>, max_retries: u32, workers: usize) -> Self {
        Self {
            store,
            transport,
            max_retries,
            workers,
            scheduler: Mutex::new(Scheduler::new()),
        }
    }

    /// Queries the store for missing node paths under `root`, bounded by
    /// `limit`, and schedules anything not already in flight.
    pub async fn detect_gaps(&self, root: Hash, limit: usize) -> usize {
        let missing = self.store.missing_trie_nodes(root, limit).await;
        let count = missing.len();
        let mut scheduler = self.scheduler.lock().await;
        for path in missing {
            let depth = path.len() as u32;
            scheduler.enqueue(path, root, depth);
        }
        count
    }

    pub async fn schedule_batch(&self, n: usize) -> Vec<HealTask> {
        self.scheduler.lock().await.pop_batch(n)
    }

    /// Verifies and commits each returned node; re-enqueues failures up
    /// to `max_retries` and, for nodes that verify, scans the raw
    /// encoding for embedded child-hash references to enqueue next.
    pub async fn process_batch(
        &self,
        tasks: Vec<HealTask>,
        results: Vec<Vec<u8>>,
    ) -> Result<(), SyncError> {
        // Resolve every task against the store first, with no scheduler
        // lock held, then apply all scheduler mutations in one pass: the
        // core must never hold an internal lock across a store call
        // (spec §5 "Shared-resource policy").
        enum Outcome {
            Retry(HealTask),
            Failed,
            Healed { new_tasks: Vec<(Vec<u8>, Hash, u32)> },
        }

        let mut outcomes = Vec::with_capacity(tasks.len());
        for (task, data) in tasks.into_iter().zip(results) {
            if data.is_empty() {
                outcomes.push(if task.retries + 1 >= self.max_retries {
                    Outcome::Failed
                } else {
                    Outcome::Retry(task)
                });
                continue;
            }
            let computed = Hash::from(keccak256(&data));
            if computed != task.expected_root {
                outcomes.push(if task.retries + 1 >= self.max_retries {
                    Outcome::Failed
                } else {
                    Outcome::Retry(task)
                });
                continue;
            }
            self.store
                .write_trie_node(task.path.clone(), data.clone())
                .await
                .map_err(|_| SyncError::Closed)?;

            let mut new_tasks = Vec::new();
            for (i, child) in scan_embedded_hashes(&data).into_iter().enumerate() {
                let mut child_path = task.path.clone();
                child_path.push(i as u8);
                if !self.store.has_trie_node(&child_path).await {
                    new_tasks.push((child_path, child, task.depth + 1));
                }
            }
            outcomes.push(Outcome::Healed { new_tasks });
        }

        let mut scheduler = self.scheduler.lock().await;
        for outcome in outcomes {
            match outcome {
                Outcome::Retry(task) => scheduler.requeue(task),
                Outcome::Failed => scheduler.failed_count += 1,
                Outcome::Healed { new_tasks } => {
                    scheduler.healed_count += 1;
                    for (path, root, depth) in new_tasks {
                        scheduler.enqueue(path, root, depth);
                    }
                }
            }
        }
        Ok(())
    }

    pub async fn healed_count(&self) -> u64 {
        self.scheduler.lock().await.healed_count
    }

    pub async fn failed_count(&self) -> u64 {
        self.scheduler.lock().await.failed_count
    }

    /// Runs up to `workers` concurrent worker loops, each bound to one
    /// peer, until the scheduler is empty and the last batch healed
    /// nothing. Cooperative cancellation is checked at every batch
    /// boundary.
    pub async fn run(
        self: Arc<Self>,
        peers: Vec<Hash>,
        root: Hash,
        cancel: CancellationToken,
    ) -> Result<(), SyncError> {
        let worker_count = self.workers.min(peers.len().max(1));
        let mut handles = Vec::with_capacity(worker_count);
        for peer in peers.into_iter().take(worker_count) {
            let healer = self.clone();
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                healer.worker_loop(peer, root, cancel).await
            }));
        }
        for handle in handles {
            handle.await.map_err(|_| SyncError::Closed)??;
        }
        Ok(())
    }

    async fn worker_loop(
        &self,
        peer: Hash,
        root: Hash,
        cancel: CancellationToken,
    ) -> Result<(), SyncError> {
        loop {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            let batch = self.schedule_batch(8).await;
            if batch.is_empty() {
                if self.is_complete(root).await {
                    return Ok(());
                }
                tokio::task::yield_now().await;
                continue;
            }
            let paths: Vec<Vec<u8>> = batch.iter().map(|t| t.path.clone()).collect();
            let results = self
                .transport
                .request_trie_nodes(peer, root, &paths)
                .await
                .unwrap_or_else(|_| vec![Vec::new(); paths.len()]);
            self.process_batch(batch, results).await?;
        }
    }

    pub async fn is_complete(&self, root: Hash) -> bool {
        self.store.missing_trie_nodes(root, 1).await.is_empty()
    }
}

/// Scans a raw encoded node for `HASH_MARKER`-prefixed 32-byte child-hash
/// literals, without decoding the node's full shape.
fn scan_embedded_hashes(data: &[u8]) -> Vec<Hash> {
    let mut hashes = Vec::new();
    let mut i = 0;
    while i + 33 <= data.len() {
        if data[i] == HASH_MARKER {
            hashes.push(Hash::from_slice(&data[i + 1..i + 33]));
            i += 33;
        } else {
            i += 1;
        }
    }
    hashes
}
