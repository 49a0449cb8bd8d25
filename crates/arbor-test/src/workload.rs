//! Random operation mixes for stress tests.

use rand::rngs::StdRng;
use rand::Rng;

use arbor_common::types::StoreKey;
use arbor_store::Store;

/// One store operation.
#[derive(Debug, Clone)]
pub enum Op {
    /// Write a value.
    Set(StoreKey),
    /// Read a value.
    Get(StoreKey),
    /// Delete a subtree.
    Delete(StoreKey),
    /// Remove only the value.
    DeleteValue(StoreKey),
    /// List children.
    Children(StoreKey),
}

/// Generates operations over a small tree so that threads overlap.
#[derive(Debug, Clone)]
pub struct Workload {
    /// Maximum path depth.
    pub depth: usize,
    /// Distinct segments per level.
    pub fanout: usize,
    /// Percentage of writes (sets and deletes); the rest are reads.
    pub write_percent: u32,
}

impl Default for Workload {
    fn default() -> Self {
        Self {
            depth: 3,
            fanout: 4,
            write_percent: 50,
        }
    }
}

impl Workload {
    /// Picks a random path of depth `1..=depth`.
    pub fn path(&self, rng: &mut StdRng) -> StoreKey {
        let depth = rng.gen_range(1..=self.depth);
        StoreKey::from_segments((0..depth).map(|_| format!("s{}", rng.gen_range(0..self.fanout))))
    }

    /// Picks the next operation.
    pub fn next_op(&self, rng: &mut StdRng) -> Op {
        let path = self.path(rng);
        if rng.gen_range(0..100) < self.write_percent {
            match rng.gen_range(0..10) {
                0..=5 => Op::Set(path),
                6..=7 => Op::DeleteValue(path),
                _ => Op::Delete(path),
            }
        } else if rng.gen_bool(0.5) {
            Op::Get(path)
        } else {
            Op::Children(path)
        }
    }

    /// Runs `count` random operations against `store` and returns the
    /// number of nodes they touched.
    pub fn run(&self, store: &Store, rng: &mut StdRng, count: usize) -> usize {
        (0..count).map(|_| apply(store, &self.next_op(rng))).sum()
    }
}

/// Applies one operation and returns the number of nodes it touched: values
/// written, found or removed, or children listed.
pub fn apply(store: &Store, op: &Op) -> usize {
    match op {
        Op::Set(key) => match store.set_value(key, "payload") {
            Ok(_) => 1,
            Err(err) => {
                tracing::warn!(key = %key, error = %err, "workload write failed");
                0
            }
        },
        Op::Get(key) => usize::from(store.get(key).is_some()),
        Op::Delete(key) => usize::from(store.delete(key)),
        Op::DeleteValue(key) => usize::from(store.delete_value(key)),
        Op::Children(key) => store.children(key).len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_common::StoreConfig;
    use rand::SeedableRng;

    fn key(text: &str) -> StoreKey {
        StoreKey::parse(text).unwrap()
    }

    #[test]
    fn test_apply_counts_touched_nodes() {
        let store = Store::new(StoreConfig::for_testing()).unwrap();
        assert_eq!(apply(&store, &Op::Get(key("/a"))), 0);
        assert_eq!(apply(&store, &Op::Set(key("/a/x"))), 1);
        assert_eq!(apply(&store, &Op::Set(key("/a/y"))), 1);
        assert_eq!(apply(&store, &Op::Get(key("/a/x"))), 1);
        assert_eq!(apply(&store, &Op::Children(key("/a"))), 2);
        assert_eq!(apply(&store, &Op::DeleteValue(key("/a/x"))), 1);
        assert_eq!(apply(&store, &Op::DeleteValue(key("/a/x"))), 0);
        assert_eq!(apply(&store, &Op::Delete(key("/a"))), 1);
        assert_eq!(apply(&store, &Op::Children(key("/a"))), 0);
    }

    #[test]
    fn test_read_only_run_touches_nothing_on_empty_store() {
        let store = Store::new(StoreConfig::for_testing()).unwrap();
        let workload = Workload {
            write_percent: 0,
            ..Workload::default()
        };
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(workload.run(&store, &mut rng, 200), 0);
    }
}
