//! In-memory dispatch cache for tests.

use crate::error::CacheError;
use crate::traits::DispatchCache;
use async_trait::async_trait;
use punctual_core::ScheduleId;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Default)]
struct Sets {
    processed: HashMap<ScheduleId, Instant>,
    in_queue: HashMap<ScheduleId, Instant>,
}

/// In-memory dispatch cache with per-entry expiry.
#[derive(Default)]
pub struct InMemoryDispatchCache {
    sets: Mutex<Sets>,
}

impl InMemoryDispatchCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Sets> {
        self.sets.lock().expect("cache lock poisoned")
    }
}

fn live(entries: &mut HashMap<ScheduleId, Instant>, id: ScheduleId) -> bool {
    match entries.get(&id) {
        Some(deadline) if *deadline > Instant::now() => true,
        Some(_) => {
            entries.remove(&id);
            false
        }
        None => false,
    }
}

#[async_trait]
impl DispatchCache for InMemoryDispatchCache {
    async fn mark_processed(&self, id: ScheduleId, ttl: Duration) -> Result<(), CacheError> {
        self.lock().processed.insert(id, Instant::now() + ttl);
        Ok(())
    }

    async fn is_processed(&self, id: ScheduleId) -> Result<bool, CacheError> {
        Ok(live(&mut self.lock().processed, id))
    }

    async fn mark_in_queue(&self, ids: &[ScheduleId], ttl: Duration) -> Result<(), CacheError> {
        let deadline = Instant::now() + ttl;
        let mut sets = self.lock();
        for id in ids {
            sets.in_queue.insert(*id, deadline);
        }
        Ok(())
    }

    async fn is_in_queue(&self, id: ScheduleId) -> Result<bool, CacheError> {
        Ok(live(&mut self.lock().in_queue, id))
    }
}
