//! Process-wide (per-database) field-name dictionary: `name <-> u16` id.
//!
//! IDs are assigned monotonically on first use and never reassigned. ID 0 is
//! reserved for the `_id` field. The dictionary is persisted on its own chain
//! of pages reachable from the file header (§3); this module owns only the
//! in-memory bijection and its (de)serialization, the page-chain I/O lives in
//! `catalog`.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Field id reserved for `_id`; never assigned to any other name.
pub const ID_FIELD: u16 = 0;
pub const ID_FIELD_NAME: &str = "_id";

#[derive(Debug, Default, Serialize, Deserialize)]
struct DictState {
    forward: HashMap<String, u16>,
    reverse: HashMap<u16, String>,
    next_id: u16,
}

/// Thread-safe bijective name/id registry, scoped to one open database.
pub struct KeyDictionary {
    state: RwLock<DictState>,
}

impl KeyDictionary {
    #[must_use]
    pub fn new() -> Self {
        let mut state = DictState::default();
        state.forward.insert(ID_FIELD_NAME.to_string(), ID_FIELD);
        state.reverse.insert(ID_FIELD, ID_FIELD_NAME.to_string());
        state.next_id = 1;
        Self { state: RwLock::new(state) }
    }

    /// Idempotent: returns the existing id if `name` is already registered,
    /// otherwise assigns and persists the next monotonic id.
    pub fn register(&self, name: &str) -> u16 {
        if let Some(id) = self.state.read().forward.get(name).copied() {
            return id;
        }
        let mut state = self.state.write();
        if let Some(id) = state.forward.get(name).copied() {
            return id;
        }
        let id = state.next_id;
        state.next_id = state.next_id.wrapping_add(1);
        state.forward.insert(name.to_string(), id);
        state.reverse.insert(id, name.to_string());
        id
    }

    /// Reverse lookup. On miss (an id never registered in this process, e.g.
    /// corrupt or foreign data) the caller must fall back to the decimal
    /// string form of the id — this function only resolves known ids.
    #[must_use]
    pub fn resolve(&self, id: u16) -> Option<String> {
        self.state.read().reverse.get(&id).cloned()
    }

    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<u16> {
        self.state.read().forward.get(name).copied()
    }

    /// Snapshot of all `(id, name)` pairs, for persistence.
    #[must_use]
    pub fn entries(&self) -> Vec<(u16, String)> {
        self.state.read().reverse.iter().map(|(id, name)| (*id, name.clone())).collect()
    }

    /// Rebuild the dictionary from persisted `(id, name)` pairs (used at `open`).
    /// Re-registration of `_id` at id 0 is idempotent by construction.
    pub fn load(&self, entries: &[(u16, String)]) {
        let mut state = self.state.write();
        let mut max_id = 0u16;
        for (id, name) in entries {
            state.forward.insert(name.clone(), *id);
            state.reverse.insert(*id, name.clone());
            max_id = max_id.max(*id);
        }
        state.next_id = state.next_id.max(max_id.wrapping_add(1)).max(1);
    }
}

impl Default for KeyDictionary {
    fn default() -> Self {
        Self::new()
    }
}
