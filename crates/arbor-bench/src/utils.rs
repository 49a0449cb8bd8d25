//! Benchmark utilities and helpers.

use rand::distributions::Alphanumeric;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use arbor_common::types::StoreKey;

/// Generates random string data for benchmarks.
pub fn random_string(rng: &mut StdRng, len: usize) -> String {
    rng.sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Generates random byte keys.
pub fn generate_byte_keys(count: usize, key_size: usize) -> Vec<Vec<u8>> {
    let mut rng = StdRng::seed_from_u64(42);
    (0..count)
        .map(|_| (0..key_size).map(|_| rng.gen()).collect())
        .collect()
}

/// Generates sequential keys for benchmarks.
pub fn generate_sequential_keys(count: usize, prefix: &str) -> Vec<String> {
    (0..count).map(|i| format!("{}{:08}", prefix, i)).collect()
}

/// Generates `count` store paths spread over a tree `depth` segments deep,
/// with `fanout` choices per segment.
pub fn generate_paths(count: usize, depth: usize, fanout: usize) -> Vec<StoreKey> {
    let mut rng = StdRng::seed_from_u64(42);
    (0..count)
        .map(|_| {
            StoreKey::from_segments(
                (0..depth).map(|_| format!("n{}", rng.gen_range(0..fanout))),
            )
        })
        .collect()
}

/// Generates record field writes `/records/<id>/user/<name>` for auto-link
/// benchmarks.
pub fn generate_user_records(count: usize) -> Vec<StoreKey> {
    let mut rng = StdRng::seed_from_u64(42);
    let names = [
        "alice", "bob", "charlie", "diana", "eve", "frank", "grace", "henry",
    ];

    (0..count)
        .map(|i| {
            let name = names[rng.gen_range(0..names.len())];
            let suffix = random_string(&mut rng, 4);
            StoreKey::from_segments([
                "records".to_string(),
                format!("{i:08}"),
                "user".to_string(),
                format!("{name}_{suffix}"),
            ])
        })
        .collect()
}
