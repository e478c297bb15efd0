//! Bookkeeping for deferred work (auto-pardons, unmutes, announcement waiters).

use log::debug;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::warden::WardenEvent;

#[derive(Default)]
struct TaskTable {
    next_id: u64,
    handles: HashMap<u64, JoinHandle<()>>,
}

/// Set of spawned background tasks. Each task removes itself when it completes;
/// whatever is left at shutdown gets aborted.
#[derive(Clone, Default)]
pub struct BackgroundTasks {
    inner: Arc<Mutex<TaskTable>>,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn<F>(&self, name: &'static str, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        // Spawn while holding the lock so the task cannot try to remove itself
        // before it has been registered
        let mut table = match self.inner.lock() {
            Ok(table) => table,
            Err(poisoned) => poisoned.into_inner(),
        };
        table.next_id += 1;
        let id = table.next_id;

        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            future.await;
            let mut table = match inner.lock() {
                Ok(table) => table,
                Err(poisoned) => poisoned.into_inner(),
            };
            table.handles.remove(&id);
            debug!("Background task {} ({}) finished", id, name);
        });
        table.handles.insert(id, handle);
    }

    /// Deliver `event` to the warden after `delay`. Not cancellable.
    pub fn schedule(&self, name: &'static str, delay: Duration, events: mpsc::Sender<WardenEvent>, event: WardenEvent) {
        self.spawn(name, async move {
            tokio::time::sleep(delay).await;
            if events.send(event).await.is_err() {
                debug!("Warden stopped before {} fired", name);
            }
        });
    }

    pub fn len(&self) -> usize {
        match self.inner.lock() {
            Ok(table) => table.handles.len(),
            Err(poisoned) => poisoned.into_inner().handles.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn abort_all(&self) {
        let handles: Vec<JoinHandle<()>> = {
            let mut table = match self.inner.lock() {
                Ok(table) => table,
                Err(poisoned) => poisoned.into_inner(),
            };
            table.handles.drain().map(|(_, h)| h).collect()
        };
        for handle in handles {
            handle.abort();
        }
    }
}
