//! Contiguous block ordering, uncle validation, execution delegation and
//! commit (spec §4.I).
//!
//! Grounded on the teacher's `crates/blockchain/blockchain.rs` contiguous
//! import loop.

use crate::error::SyncError;
use crate::traits::{ChainInserter, StateExecutor};
use chainsync_common::{Block, Hash, ImporterConfig};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

struct Queue {
    next_expected: u64,
    blocks_by_number: HashMap<u64, Block>,
    seen_hashes: std::collections::HashSet<Hash>,
}

pub struct BlockImporter<I: ChainInserter, E: StateExecutor> {
    inserter: Arc<I>,
    executor: Arc<E>,
    config: ImporterConfig,
    queue: Mutex<Queue>,
}

impl<I: ChainInserter, E: StateExecutor> BlockImporter<I, E> {
    pub fn new(inserter: Arc<I>, executor: Arc<E>, config: ImporterConfig, next_expected: u64) -> Self {
        Self {
            inserter,
            executor,
            config,
            queue: Mutex::new(Queue {
                next_expected,
                blocks_by_number: HashMap::new(),
                seen_hashes: std::collections::HashSet::new(),
            }),
        }
    }

    /// De-duplicates by hash; fails with `QueueFull` past the configured
    /// capacity. Enqueuing the same block twice is a no-op (spec §8
    /// "Idempotence").
    pub async fn enqueue(&self, block: Block) -> Result<(), SyncError> {
        let mut queue = self.queue.lock().await;
        let hash = block.hash();
        if queue.seen_hashes.contains(&hash) {
            return Ok(());
        }
        if queue.blocks_by_number.len() >= self.config.max_queue_size {
            return Err(SyncError::QueueFull);
        }
        queue.seen_hashes.insert(hash);
        queue.blocks_by_number.insert(block.number(), block);
        Ok(())
    }

    /// Extracts the contiguous prefix starting at `next_expected`, up to
    /// `batch_size`, validates it, executes it via the [`StateExecutor`],
    /// and commits it via the [`ChainInserter`].
    pub async fn process(&self) -> Result<usize, SyncError> {
        let batch = {
            let mut queue = self.queue.lock().await;
            let mut batch = Vec::new();
            let mut number = queue.next_expected;
            while batch.len() < self.config.batch_size {
                match queue.blocks_by_number.remove(&number) {
                    Some(block) => {
                        batch.push(block);
                        number += 1;
                    }
                    None => break,
                }
            }
            batch
        };
        if batch.is_empty() {
            return Ok(0);
        }

        let current_head = self.inserter.current_block().await;
        let mut prev_hash = current_head.hash();
        let mut ancestors: Vec<Hash> = vec![current_head.hash()];
        for block in &batch {
            if block.header.parent_hash != prev_hash {
                self.requeue_from(&batch, block.number()).await;
                return Err(SyncError::BadParentHash {
                    block: block.number(),
                    expected: prev_hash,
                    got: block.header.parent_hash,
                });
            }
            if let Err(e) = self.validate_uncles(block, &ancestors) {
                self.requeue_from(&batch, block.number()).await;
                return Err(e);
            }
            let (computed_root, _receipts) = self
                .executor
                .execute(block)
                .await
                .map_err(|_| SyncError::VerificationFailed(block.header.state_root, 0))?;
            if computed_root != block.header.state_root {
                self.requeue_from(&batch, block.number()).await;
                return Err(SyncError::VerificationFailed(block.header.state_root, 0));
            }
            self.inserter
                .insert(vec![block.clone()])
                .await
                .map_err(|_| SyncError::VerificationFailed(block.header.state_root, 0))?;
            prev_hash = block.hash();
            ancestors.push(prev_hash);
        }

        let mut queue = self.queue.lock().await;
        queue.next_expected = prev_hash_to_next(prev_hash, &batch);
        Ok(batch.len())
    }

    async fn requeue_from(&self, batch: &[Block], failed_at: u64) {
        let mut queue = self.queue.lock().await;
        for block in batch {
            if block.number() >= failed_at {
                queue.blocks_by_number.insert(block.number(), block.clone());
            }
        }
    }

    fn validate_uncles(&self, block: &Block, ancestors: &[Hash]) -> Result<(), SyncError> {
        let uncles = &block.body.uncles;
        if uncles.len() > self.config.max_uncles_per_block {
            return Err(SyncError::UncleOverflow);
        }
        let mut seen = std::collections::HashSet::new();
        for uncle in uncles {
            let uncle_hash = uncle.hash();
            if !seen.insert(uncle_hash) {
                return Err(SyncError::DuplicateContent(uncle_hash));
            }
            if ancestors.contains(&uncle_hash) {
                return Err(SyncError::DuplicateContent(uncle_hash));
            }
            if !ancestors.contains(&uncle.parent_hash) {
                return Err(SyncError::BadParentHash {
                    block: block.number(),
                    expected: Hash::zero(),
                    got: uncle.parent_hash,
                });
            }
        }
        Ok(())
    }
}

fn prev_hash_to_next(_prev_hash: Hash, batch: &[Block]) -> u64 {
    batch.last().expect("batch is non-empty").number() + 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeChainInserter, FakeExecutor};
    use chainsync_common::{empty_trie_root, none_hash, Body, Header};

    fn genesis() -> Block {
        Block {
            header: Header {
                number: 0,
                parent_hash: none_hash(),
                state_root: none_hash(),
                receipt_root: none_hash(),
                transactions_root: empty_trie_root(),
                withdrawals_root: None,
                ommers_hash: empty_trie_root(),
                time: 0,
                difficulty: 0u64.into(),
                extra: vec![],
            },
            body: Body::default(),
        }
    }

    fn child(parent: &Block, state_root: Hash) -> Block {
        Block {
            header: Header {
                number: parent.number() + 1,
                parent_hash: parent.hash(),
                state_root,
                receipt_root: none_hash(),
                transactions_root: empty_trie_root(),
                withdrawals_root: None,
                ommers_hash: empty_trie_root(),
                time: parent.header.time + 1,
                difficulty: 0u64.into(),
                extra: vec![],
            },
            body: Body::default(),
        }
    }

    async fn setup(state_root: Hash) -> BlockImporter<FakeChainInserter, FakeExecutor> {
        let inserter = Arc::new(FakeChainInserter::default());
        inserter.insert(vec![genesis()]).await.unwrap();
        let executor = Arc::new(FakeExecutor { state_root });
        BlockImporter::new(inserter, executor, ImporterConfig::default(), 1)
    }

    #[tokio::test]
    async fn imports_a_contiguous_chain() {
        let state_root = Hash::repeat_byte(0x42);
        let importer = setup(state_root).await;
        let b1 = child(&genesis(), state_root);
        importer.enqueue(b1).await.unwrap();
        let imported = importer.process().await.unwrap();
        assert_eq!(imported, 1);
    }

    #[tokio::test]
    async fn duplicate_enqueue_is_idempotent() {
        let importer = setup(Hash::zero()).await;
        let b1 = child(&genesis(), Hash::zero());
        importer.enqueue(b1.clone()).await.unwrap();
        importer.enqueue(b1).await.unwrap();
        let queue = importer.queue.lock().await;
        assert_eq!(queue.blocks_by_number.len(), 1);
    }

    #[tokio::test]
    async fn parent_mismatch_is_rejected_and_head_is_unchanged() {
        let importer = setup(Hash::zero()).await;
        let mut bad = child(&genesis(), Hash::zero());
        bad.header.parent_hash = Hash::repeat_byte(0xDE);
        importer.enqueue(bad).await.unwrap();
        let err = importer.process().await.unwrap_err();
        assert!(matches!(err, SyncError::BadParentHash { .. }));
        assert_eq!(importer.inserter.current_block().await.number(), 0);
    }

    #[tokio::test]
    async fn state_root_mismatch_is_rejected() {
        let importer = setup(Hash::repeat_byte(1)).await;
        let bad = child(&genesis(), Hash::repeat_byte(2));
        importer.enqueue(bad).await.unwrap();
        let err = importer.process().await.unwrap_err();
        assert!(matches!(err, SyncError::VerificationFailed(_, _)));
    }
}
