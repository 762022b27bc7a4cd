//! Debug registry of streaming voices that have not been destroyed.
//!
//! Every [`StreamingVoice`](crate::StreamingVoice) registers itself on construction and
//! releases its entry in `destroy()`. A voice dropped without `destroy()` stays in the
//! registry flagged as dropped, so [`report_outstanding`] can name it at shutdown.
//!
//! Tracking is compiled in for debug builds and with the `leak-tracking` feature. Otherwise
//! every call is a no-op and [`outstanding`] is always empty.

use uuid::Uuid;

/// One voice that is still registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeakRecord {
    pub id: Uuid,
    /// Human-readable name of the tracked instance
    pub label: String,
    /// `true` once the owner was dropped without being destroyed
    pub dropped: bool,
}

/// Registration handle held by the tracked instance.
#[derive(Debug, PartialEq, Eq)]
pub struct LeakToken {
    id: Uuid,
}

impl LeakToken {
    pub fn id(&self) -> Uuid {
        self.id
    }
}

#[cfg(any(debug_assertions, feature = "leak-tracking"))]
mod registry {
    use super::LeakRecord;
    use std::collections::HashMap;
    use std::sync::{LazyLock, Mutex, MutexGuard};
    use uuid::Uuid;

    static REGISTRY: LazyLock<Mutex<HashMap<Uuid, LeakRecord>>> =
        LazyLock::new(|| Mutex::new(HashMap::new()));

    pub(super) fn lock() -> MutexGuard<'static, HashMap<Uuid, LeakRecord>> {
        // A panic while holding the lock cannot leave a record half-written
        REGISTRY
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Adds a live instance to the registry.
pub fn register(label: impl Into<String>) -> LeakToken {
    let id = Uuid::new_v4();

    #[cfg(any(debug_assertions, feature = "leak-tracking"))]
    registry::lock().insert(
        id,
        LeakRecord {
            id,
            label: label.into(),
            dropped: false,
        },
    );
    #[cfg(not(any(debug_assertions, feature = "leak-tracking")))]
    let _ = label;

    LeakToken { id }
}

/// Removes a properly destroyed instance.
pub fn release(token: &LeakToken) {
    #[cfg(any(debug_assertions, feature = "leak-tracking"))]
    registry::lock().remove(&token.id);
    #[cfg(not(any(debug_assertions, feature = "leak-tracking")))]
    let _ = token;
}

/// Flags an instance whose owner was dropped without destroying it.
pub fn mark_leaked(token: &LeakToken) {
    #[cfg(any(debug_assertions, feature = "leak-tracking"))]
    if let Some(record) = registry::lock().get_mut(&token.id) {
        record.dropped = true;
    }
    #[cfg(not(any(debug_assertions, feature = "leak-tracking")))]
    let _ = token;
}

/// Every instance not destroyed yet, alive or already dropped.
pub fn outstanding() -> Vec<LeakRecord> {
    #[cfg(any(debug_assertions, feature = "leak-tracking"))]
    return registry::lock().values().cloned().collect();

    #[cfg(not(any(debug_assertions, feature = "leak-tracking")))]
    Vec::new()
}

/// Logs every outstanding instance at error level and returns how many there are.
///
/// Meant to be called once at shutdown, after all streams should have been destroyed.
pub fn report_outstanding() -> usize {
    let records = outstanding();
    for record in &records {
        if record.dropped {
            log::error!("{} was dropped without destroy()", record.label);
        } else {
            log::error!("{} is still alive and was never destroyed", record.label);
        }
    }
    records.len()
}
