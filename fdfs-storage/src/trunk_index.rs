//! Trunk free-space index and allocator, maintained only on a group's trunk
//! server (§4.6).
//!
//! Two views over the same set of FREE blocks are kept in sync under one
//! mutex (`trunk_mem_lock` in the spec's terms — here just the `Mutex`
//! guarding [`TrunkIndex`]'s single `Inner`): a by-size map for allocation,
//! and a by-`(store_path, trunk_file_id)` sorted array for overlap checks
//! and coalescing. Grounded in `fdfs_core::trunk::TrunkFullInfo`'s addressing
//! tuple, which both views store by value.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::warn;

use fdfs_core::errors::{CoreError, Result};
use fdfs_core::trunk::{BlockStatus, TrunkFullInfo};

use crate::trunk_binlog::{TrunkBinlogOp, TrunkBinlogWriter};

/// Result of `alloc_confirm` (§4.6) — a proper enum instead of a raw status
/// int since this is an internal Rust API, not a wire field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmStatus {
    /// The slot was written successfully.
    Success,
    /// The slot was found already occupied by another writer.
    Collision,
    /// The write failed for some other reason; the block is returned to FREE.
    Failed,
}

struct Inner {
    by_size: BTreeMap<u32, Vec<TrunkFullInfo>>,
    by_file: std::collections::HashMap<(u8, u32), Vec<TrunkFullInfo>>,
}

impl Inner {
    fn insert(&mut self, block: TrunkFullInfo) {
        self.by_size.entry(block.size).or_default().push(block);
        let key = (block.store_path_index, block.trunk_file_id);
        let entries = self.by_file.entry(key).or_default();
        let pos = entries.partition_point(|b| b.offset < block.offset);
        entries.insert(pos, block);
    }

    fn remove_exact(&mut self, block: &TrunkFullInfo) {
        if let Some(v) = self.by_size.get_mut(&block.size) {
            v.retain(|b| b != block);
            if v.is_empty() {
                self.by_size.remove(&block.size);
            }
        }
        let key = (block.store_path_index, block.trunk_file_id);
        if let Some(v) = self.by_file.get_mut(&key) {
            v.retain(|b| b != block);
        }
    }

    fn overlaps(&self, candidate: &TrunkFullInfo) -> bool {
        let key = (candidate.store_path_index, candidate.trunk_file_id);
        let Some(entries) = self.by_file.get(&key) else { return false };
        entries.iter().any(|b| {
            b.offset < candidate.range().end && candidate.offset < b.range().end
        })
    }
}

/// The trunk server's in-memory free-space index, backed by the trunk
/// binlog for durability.
pub struct TrunkIndex {
    inner: Mutex<Inner>,
    binlog: Arc<TrunkBinlogWriter>,
    total_free_space: AtomicI64,
    slot_min_size: u32,
    alloc_alignment: u32,
}

impl TrunkIndex {
    /// Builds an empty index; callers should `insert` recovered blocks from
    /// a snapshot + binlog replay before serving allocations.
    pub fn new(binlog: Arc<TrunkBinlogWriter>, slot_min_size: u32, alloc_alignment: u32) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner { by_size: BTreeMap::new(), by_file: std::collections::HashMap::new() }),
            binlog,
            total_free_space: AtomicI64::new(0),
            slot_min_size,
            alloc_alignment,
        })
    }

    /// Inserts a recovered FREE block without touching the binlog (used only
    /// during snapshot/binlog replay on startup).
    pub async fn recover_insert(&self, block: TrunkFullInfo) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.overlaps(&block) {
            warn!(?block, "discarding overlapping block found during recovery");
            return Ok(());
        }
        self.total_free_space.fetch_add(block.size as i64, Ordering::Relaxed);
        inner.insert(block);
        Ok(())
    }

    /// Total bytes currently FREE across all containers this index tracks.
    pub fn total_free_space(&self) -> i64 {
        self.total_free_space.load(Ordering::Relaxed)
    }

    fn align(&self, size: u32) -> u32 {
        if size <= self.slot_min_size {
            self.slot_min_size
        } else if self.alloc_alignment > 0 {
            ((size + self.alloc_alignment - 1) / self.alloc_alignment) * self.alloc_alignment
        } else {
            size
        }
    }

    /// Finds and HOLDs a block of at least `size` bytes, splitting off and
    /// reinserting any sufficiently large residual (§4.6 steps 1-6). Returns
    /// `None` if no existing block was big enough — the caller is
    /// responsible for creating a fresh container and retrying.
    pub async fn alloc_space(&self, store_path_index: u8, size: u32) -> Result<Option<TrunkFullInfo>> {
        let want = self.align(size);
        let mut inner = self.inner.lock().await;

        let candidate = inner
            .by_size
            .range(want..)
            .find_map(|(_, blocks)| {
                blocks
                    .iter()
                    .find(|b| b.store_path_index == store_path_index && b.status == BlockStatus::Free)
                    .copied()
            });

        let Some(original) = candidate else { return Ok(None) };
        inner.remove_exact(&original);
        self.total_free_space.fetch_sub(original.size as i64, Ordering::Relaxed);

        let allocated = TrunkFullInfo {
            size: want,
            status: BlockStatus::Hold,
            ..original
        };
        inner.insert(allocated);

        let residual_size = original.size.saturating_sub(want);
        if residual_size >= self.slot_min_size {
            let residual = TrunkFullInfo {
                offset: original.offset + want as u64,
                size: residual_size,
                status: BlockStatus::Free,
                ..original
            };
            inner.insert(residual);
            self.total_free_space.fetch_add(residual_size as i64, Ordering::Relaxed);
            drop(inner);
            self.binlog.append(TrunkBinlogOp::DelSpace, &original).await?;
            self.binlog.append(TrunkBinlogOp::AddSpace, &residual).await?;
        } else {
            drop(inner);
            self.binlog.append(TrunkBinlogOp::DelSpace, &original).await?;
            if residual_size > 0 {
                warn!(bytes = residual_size, "residual smaller than slot_min, dropped");
            }
        }

        Ok(Some(allocated))
    }

    /// Resolves an in-flight HOLD after the caller has written (or failed to
    /// write) the allocated slot (§4.6 confirm/rollback).
    pub async fn alloc_confirm(&self, info: TrunkFullInfo, status: ConfirmStatus) -> Result<()> {
        let held = TrunkFullInfo { status: BlockStatus::Hold, ..info };
        match status {
            ConfirmStatus::Success | ConfirmStatus::Collision => {
                let mut inner = self.inner.lock().await;
                inner.remove_exact(&held);
                drop(inner);
                self.binlog.append(TrunkBinlogOp::DelSpace, &held).await?;
                if status == ConfirmStatus::Collision {
                    warn!(?info, "alloc_confirm: slot already occupied, treating as used");
                }
                Ok(())
            }
            ConfirmStatus::Failed => {
                let mut inner = self.inner.lock().await;
                inner.remove_exact(&held);
                let restored = TrunkFullInfo { status: BlockStatus::Free, ..info };
                inner.insert(restored);
                self.total_free_space.fetch_add(restored.size as i64, Ordering::Relaxed);
                Ok(())
            }
        }
    }

    /// Frees a previously allocated (now logically deleted) slot back into
    /// the index (§4.6 "Free"), with immediate best-effort coalescing
    /// against adjacent FREE blocks in the same container.
    pub async fn free_space(&self, info: TrunkFullInfo) -> Result<()> {
        let mut freed = TrunkFullInfo { status: BlockStatus::Free, ..info };
        let mut inner = self.inner.lock().await;

        let key = (freed.store_path_index, freed.trunk_file_id);
        if let Some(entries) = inner.by_file.get(&key) {
            if let Some(next) = entries
                .iter()
                .find(|b| b.status == BlockStatus::Free && b.offset == freed.range().end)
                .copied()
            {
                inner.remove_exact(&next);
                freed.size += next.size;
            }
            if let Some(prev) = entries
                .iter()
                .find(|b| b.status == BlockStatus::Free && b.range().end == freed.offset)
                .copied()
            {
                inner.remove_exact(&prev);
                freed.offset = prev.offset;
                freed.size += prev.size;
            }
        }

        inner.insert(freed);
        self.total_free_space.fetch_add(info.size as i64, Ordering::Relaxed);
        drop(inner);
        self.binlog.append(TrunkBinlogOp::AddSpace, &freed).await
    }

    /// Snapshots every currently FREE block, for `storage_trunk.dat` (§4.8).
    pub async fn free_blocks(&self) -> Vec<TrunkFullInfo> {
        let inner = self.inner.lock().await;
        inner.by_size.values().flatten().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn block(trunk_file_id: u32, offset: u64, size: u32, status: BlockStatus) -> TrunkFullInfo {
        TrunkFullInfo { store_path_index: 0, sub_path_high: 0, sub_path_low: 0, trunk_file_id, offset, size, status }
    }

    async fn fresh_index(dir: &std::path::Path) -> Arc<TrunkIndex> {
        let binlog = TrunkBinlogWriter::open(dir.join("binlog")).unwrap();
        TrunkIndex::new(binlog, 256, 256)
    }

    #[tokio::test]
    async fn test_alloc_splits_and_reinserts_residual() {
        let dir = tempdir().unwrap();
        let index = fresh_index(dir.path()).await;
        index.recover_insert(block(1, 0, 8192, BlockStatus::Free)).await.unwrap();

        let allocated = index.alloc_space(0, 512).await.unwrap().unwrap();
        assert_eq!(allocated.size, 512);
        assert_eq!(allocated.status, BlockStatus::Hold);
        assert_eq!(index.total_free_space(), 8192 - 512);
    }

    #[tokio::test]
    async fn test_alloc_returns_none_when_nothing_fits() {
        let dir = tempdir().unwrap();
        let index = fresh_index(dir.path()).await;
        assert!(index.alloc_space(0, 512).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_confirm_success_removes_hold() {
        let dir = tempdir().unwrap();
        let index = fresh_index(dir.path()).await;
        index.recover_insert(block(1, 0, 8192, BlockStatus::Free)).await.unwrap();
        let allocated = index.alloc_space(0, 512).await.unwrap().unwrap();
        index.alloc_confirm(allocated, ConfirmStatus::Success).await.unwrap();
        // free space unaffected by confirm; the hold is simply gone now.
        assert_eq!(index.total_free_space(), 8192 - 512);
    }

    #[tokio::test]
    async fn test_confirm_failure_restores_free() {
        let dir = tempdir().unwrap();
        let index = fresh_index(dir.path()).await;
        index.recover_insert(block(1, 0, 8192, BlockStatus::Free)).await.unwrap();
        let allocated = index.alloc_space(0, 512).await.unwrap().unwrap();
        let before = index.total_free_space();
        index.alloc_confirm(allocated, ConfirmStatus::Failed).await.unwrap();
        assert_eq!(index.total_free_space(), before + 512);
    }

    #[tokio::test]
    async fn test_free_coalesces_adjacent_blocks() {
        let dir = tempdir().unwrap();
        let index = fresh_index(dir.path()).await;
        index.recover_insert(block(1, 0, 256, BlockStatus::Free)).await.unwrap();
        index.free_space(block(1, 256, 256, BlockStatus::Hold)).await.unwrap();
        assert_eq!(index.total_free_space(), 512);
    }
}
