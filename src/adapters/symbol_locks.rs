//! Per-symbol write serialization shared by the storage adapters.

use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct SymbolLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SymbolLocks {
    /// One handle per distinct symbol, in sorted order. Lock them in the
    /// order returned.
    pub fn handles<'a, I>(&self, symbols: I) -> Vec<Arc<Mutex<()>>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let wanted: BTreeSet<&str> = symbols.into_iter().collect();
        let mut map = self.locks.lock();
        wanted
            .into_iter()
            .map(|s| Arc::clone(map.entry(s.to_string()).or_default()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_are_deduplicated_and_shared() {
        let locks = SymbolLocks::default();
        let a = locks.handles(["B", "A", "B"]);
        assert_eq!(a.len(), 2);
        let b = locks.handles(["A"]);
        assert!(Arc::ptr_eq(&a[0], &b[0]));
    }

    #[test]
    fn held_lock_blocks_same_symbol_only() {
        let locks = SymbolLocks::default();
        let held = locks.handles(["A"]);
        let _guard = held[0].lock();
        assert!(locks.handles(["A"])[0].try_lock().is_none());
        assert!(locks.handles(["B"])[0].try_lock().is_some());
    }
}
