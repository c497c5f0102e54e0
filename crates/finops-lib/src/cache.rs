//! Snapshot store shared between the refresh cycle and readers
//!
//! Readers clone an `Arc` under a short read lock and then work on an
//! immutable snapshot, so a publish never tears what a reader sees.

use crate::error::{FinopsError, Result};
use crate::models::InsightSnapshot;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug)]
struct Slots {
    current: Arc<InsightSnapshot>,
    previous: Option<Arc<InsightSnapshot>>,
}

/// Single-writer, multi-reader holder of the current [`InsightSnapshot`]
#[derive(Debug)]
pub struct SnapshotStore {
    slots: RwLock<Slots>,
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotStore {
    /// Store serving the empty generation until the first publish
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(Slots {
                current: Arc::new(InsightSnapshot::empty()),
                previous: None,
            }),
        }
    }

    // A panicking writer cannot leave a half-swapped pointer, so poison is ignored
    fn read(&self) -> RwLockReadGuard<'_, Slots> {
        self.slots.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Slots> {
        self.slots.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Current snapshot
    pub fn load(&self) -> Arc<InsightSnapshot> {
        Arc::clone(&self.read().current)
    }

    /// Snapshot replaced by the last publish
    pub fn previous(&self) -> Option<Arc<InsightSnapshot>> {
        self.read().previous.clone()
    }

    pub fn generation(&self) -> u64 {
        self.read().current.generation
    }

    /// Swap in a newer snapshot
    ///
    /// Generations must strictly increase; an older or equal generation is
    /// rejected and the current snapshot stays in place.
    pub fn publish(&self, snapshot: InsightSnapshot) -> Result<Arc<InsightSnapshot>> {
        let snapshot = Arc::new(snapshot);
        let mut slots = self.write();
        if snapshot.generation <= slots.current.generation {
            return Err(FinopsError::OutOfOrderSnapshot {
                offered: snapshot.generation,
                current: slots.current.generation,
            });
        }
        let replaced = std::mem::replace(&mut slots.current, Arc::clone(&snapshot));
        slots.previous = Some(replaced);
        Ok(snapshot)
    }
}
