//! OperationRegistry: connection id → operation id → running operation.
//!
//! A single `parking_lot::Mutex` guards the two-level map. The lock is held
//! only for map mutations; cancellation runs after it is released and never
//! blocks, so the registry can be used from sync hooks and async tasks alike.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

static NEXT_SERIAL: AtomicU64 = AtomicU64::new(1);

/// One running operation: its cancellation capability and serial.
///
/// Clones share the same token, so cancelling any clone cancels the operation.
#[derive(Debug, Clone)]
pub struct OperationHandle {
    token: CancellationToken,
    serial: u64,
}

impl OperationHandle {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            serial: NEXT_SERIAL.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Token observed by the forwarder and the executor.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Process-unique serial; tells two operations reusing one id apart.
    pub fn serial(&self) -> u64 {
        self.serial
    }

    /// Cancel the operation. Safe to call any number of times.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Default for OperationHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry of running operations, keyed by connection then operation id.
#[derive(Debug, Default)]
pub struct OperationRegistry {
    connections: Mutex<HashMap<String, HashMap<String, OperationHandle>>>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handle` under (`connection_id`, `operation_id`).
    ///
    /// An existing entry for the same pair is replaced and returned, still
    /// running; the caller decides what to do with it.
    pub fn add(
        &self,
        connection_id: &str,
        operation_id: &str,
        handle: OperationHandle,
    ) -> Option<OperationHandle> {
        self.connections
            .lock()
            .entry(connection_id.to_string())
            .or_default()
            .insert(operation_id.to_string(), handle)
    }

    /// Cancel and remove one operation. Returns whether it was registered.
    pub fn remove(&self, connection_id: &str, operation_id: &str) -> bool {
        let removed = {
            let mut connections = self.connections.lock();
            take_operation(&mut connections, connection_id, operation_id, None)
        };
        match removed {
            Some(handle) => {
                handle.cancel();
                debug!(conn = %connection_id, op = %operation_id, "operation removed");
                true
            }
            None => false,
        }
    }

    /// Remove an operation only if the registered entry is still the one
    /// with `serial`. Used when an operation ends on its own, so it cannot
    /// evict a newer operation that reused its id.
    pub fn remove_if_current(&self, connection_id: &str, operation_id: &str, serial: u64) -> bool {
        let removed = {
            let mut connections = self.connections.lock();
            take_operation(&mut connections, connection_id, operation_id, Some(serial))
        };
        match removed {
            Some(handle) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel and remove every operation of a connection. Returns whether
    /// the connection had any.
    pub fn remove_connection(&self, connection_id: &str) -> bool {
        let Some(operations) = self.connections.lock().remove(connection_id) else {
            return false;
        };
        debug!(conn = %connection_id, count = operations.len(), "removing connection operations");
        for handle in operations.values() {
            handle.cancel();
        }
        true
    }

    pub fn contains(&self, connection_id: &str, operation_id: &str) -> bool {
        self.connections
            .lock()
            .get(connection_id)
            .is_some_and(|ops| ops.contains_key(operation_id))
    }

    /// The handle registered for a pair, if any.
    pub fn get(&self, connection_id: &str, operation_id: &str) -> Option<OperationHandle> {
        self.connections
            .lock()
            .get(connection_id)?
            .get(operation_id)
            .cloned()
    }

    /// Sorted operation ids of one connection.
    pub fn operation_ids(&self, connection_id: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .connections
            .lock()
            .get(connection_id)
            .map(|ops| ops.keys().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    /// Total operations across all connections.
    pub fn len(&self) -> usize {
        self.connections.lock().values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.lock().is_empty()
    }

    /// Number of connections with at least one operation.
    pub fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }
}

/// Remove an entry (optionally only if its serial matches), dropping the
/// per-connection map once it is empty.
fn take_operation(
    connections: &mut HashMap<String, HashMap<String, OperationHandle>>,
    connection_id: &str,
    operation_id: &str,
    serial: Option<u64>,
) -> Option<OperationHandle> {
    let ops = connections.get_mut(connection_id)?;
    if let Some(serial) = serial {
        if ops.get(operation_id)?.serial != serial {
            return None;
        }
    }
    let handle = ops.remove(operation_id)?;
    if ops.is_empty() {
        connections.remove(connection_id);
    }
    Some(handle)
}
