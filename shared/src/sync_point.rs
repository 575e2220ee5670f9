use std::{collections::HashMap, sync::Arc};

use log::warn;
use parking_lot::Mutex;
use thiserror::Error;

/// Globally unique sync point identifier. Zero is never issued.
pub type SyncPointId = u32;

/// Errors that can occur during sync point operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncPointError {
    /// The id was never issued or has already been retired
    #[error("Sync point {sync_point} is not pending. It was either never generated or already retired; every sync point must be retired exactly once")]
    NotPending { sync_point: SyncPointId },
}

type RetireCallback = Box<dyn FnOnce() + Send>;

struct SyncPointState {
    next_sync_point: SyncPointId,
    pending: HashMap<SyncPointId, Vec<RetireCallback>>,
    retired_total: u64,
    rejected_total: u64,
}

/// Issues sync points and tracks which of them are still outstanding.
///
/// Shared by every channel in the service; all methods take `&self` and may be
/// called from either context.
pub struct SyncPointManager {
    state: Mutex<SyncPointState>,
}

impl SyncPointManager {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SyncPointState {
                next_sync_point: 1,
                pending: HashMap::new(),
                retired_total: 0,
                rejected_total: 0,
            }),
        }
    }

    /// Issues a new pending sync point.
    pub fn generate_sync_point(&self) -> SyncPointId {
        let mut state = self.state.lock();
        let mut sync_point = state.next_sync_point;
        // after wrapping, skip 0 and anything still outstanding
        while sync_point == 0 || state.pending.contains_key(&sync_point) {
            sync_point = sync_point.wrapping_add(1);
        }
        state.next_sync_point = sync_point.wrapping_add(1);
        state.pending.insert(sync_point, Vec::new());
        sync_point
    }

    /// Retires a pending sync point and runs the callbacks waiting on it.
    pub fn retire_sync_point(&self, sync_point: SyncPointId) -> Result<(), SyncPointError> {
        let callbacks = {
            let mut state = self.state.lock();
            let Some(callbacks) = state.pending.remove(&sync_point) else {
                state.rejected_total += 1;
                return Err(SyncPointError::NotPending { sync_point });
            };
            state.retired_total += 1;
            callbacks
        };
        for callback in callbacks {
            callback();
        }
        Ok(())
    }

    /// Returns true unless `sync_point` is currently outstanding.
    pub fn is_sync_point_retired(&self, sync_point: SyncPointId) -> bool {
        !self.state.lock().pending.contains_key(&sync_point)
    }

    /// Runs `callback` once `sync_point` retires, or right away if it
    /// already has.
    pub fn add_sync_point_callback<F>(&self, sync_point: SyncPointId, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut state = self.state.lock();
            if let Some(callbacks) = state.pending.get_mut(&sync_point) {
                callbacks.push(Box::new(callback));
                return;
            }
        }
        callback();
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Successful retirements since creation.
    pub fn retired_total(&self) -> u64 {
        self.state.lock().retired_total
    }

    /// Retirement attempts for ids that were not pending.
    pub fn rejected_total(&self) -> u64 {
        self.state.lock().rejected_total
    }
}

impl Default for SyncPointManager {
    fn default() -> Self {
        Self::new()
    }
}

/// An issued sync point together with the obligation to retire it.
///
/// Retire it explicitly with [`SyncPointToken::retire`] once the owning stub
/// reaches it. Dropping the token without doing so retires it immediately, so
/// a sync point whose stub or channel disappears is never left outstanding.
pub struct SyncPointToken {
    sync_point: SyncPointId,
    manager: Arc<SyncPointManager>,
    retired: bool,
}

impl SyncPointToken {
    pub fn generate(manager: &Arc<SyncPointManager>) -> Self {
        Self {
            sync_point: manager.generate_sync_point(),
            manager: manager.clone(),
            retired: false,
        }
    }

    pub fn id(&self) -> SyncPointId {
        self.sync_point
    }

    pub fn retire(mut self) -> Result<(), SyncPointError> {
        self.retired = true;
        self.manager.retire_sync_point(self.sync_point)
    }
}

impl Drop for SyncPointToken {
    fn drop(&mut self) {
        if self.retired {
            return;
        }
        self.retired = true;
        if let Err(err) = self.manager.retire_sync_point(self.sync_point) {
            warn!("dropped sync point token could not retire: {}", err);
        }
    }
}

impl std::fmt::Debug for SyncPointToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncPointToken")
            .field("sync_point", &self.sync_point)
            .field("retired", &self.retired)
            .finish()
    }
}
