//! Shared helpers for integration tests.

use std::sync::Once;

use arbor_common::types::StoreKey;
use arbor_common::StoreConfig;
use arbor_store::Store;
use tracing_subscriber::EnvFilter;

static TRACING: Once = Once::new();

/// Installs a test log subscriber once per process. The filter comes from
/// `RUST_LOG` and defaults to warnings from the Arbor crates.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new("arbor_store=warn,arbor_link=warn"))
            .unwrap_or_else(|_| EnvFilter::new("info"));
        // Another harness may already own the global subscriber.
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .try_init();
    });
}

/// Parses a key, panicking on malformed test input.
pub fn key(text: &str) -> StoreKey {
    StoreKey::parse(text).unwrap_or_else(|err| panic!("bad test key {text:?}: {err}"))
}

/// Creates a store with the test configuration.
pub fn test_store() -> Store {
    init_tracing();
    Store::new(StoreConfig::for_testing()).unwrap_or_else(|err| panic!("test config rejected: {err}"))
}

/// Walks the whole tree and checks that every node is registered under its
/// current path, holds something, and that the registry counts match.
/// Returns the number of nodes.
pub fn check_consistency(store: &Store) -> Result<usize, String> {
    let mut problems = Vec::new();
    let mut valued = 0;
    let visited = store.walk(&StoreKey::root(), |view| {
        if view.has_value() {
            valued += 1;
        }
        if !view.has_value() && view.child_count == 0 && view.indexes.is_empty() {
            problems.push(format!("{} is vacant", view.key));
        }
        match store.path_of(view.address) {
            Some(path) if path == view.key => {}
            other => problems.push(format!("{} registered as {:?}", view.key, other)),
        }
    });
    if visited != store.node_count() {
        problems.push(format!(
            "walk visited {visited} nodes, registry holds {}",
            store.node_count()
        ));
    }
    if valued != store.value_count() {
        problems.push(format!(
            "walk saw {valued} values, path index holds {}",
            store.value_count()
        ));
    }
    if problems.is_empty() {
        Ok(visited)
    } else {
        Err(problems.join("; "))
    }
}
