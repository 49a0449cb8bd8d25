//! Field value extraction and index key combinations.

use std::collections::BTreeSet;

use arbor_common::types::{Segment, StoreKey};
use arbor_store::{FieldPath, FieldSegment, IndexDefinition};

use crate::access::TreeRead;

/// Distinct values of one field.
pub type FieldValues = BTreeSet<Segment>;

/// Current values of `field` for the record at `record`.
///
/// Wildcards fan out to every visible child. The record-id field yields the
/// record's own segment while the record exists.
#[must_use]
pub fn field_values<T: TreeRead + ?Sized>(tree: &T, record: &StoreKey, field: &FieldPath) -> FieldValues {
    if field.is_record_id() {
        return record
            .last()
            .filter(|_| tree.exists(record))
            .cloned()
            .into_iter()
            .collect();
    }
    let mut frontier = vec![record.clone()];
    for step in field.segments() {
        frontier = match step {
            FieldSegment::Literal(segment) => frontier
                .into_iter()
                .map(|node| node.child(segment.clone()))
                .collect(),
            FieldSegment::Wildcard => frontier
                .into_iter()
                .flat_map(|node| {
                    tree.children(&node)
                        .into_iter()
                        .map(move |child| node.child(child))
                })
                .collect(),
        };
        if frontier.is_empty() {
            break;
        }
    }
    frontier
        .iter()
        .flat_map(|node| tree.children(node))
        .collect()
}

/// Cartesian product of the per-field values, in field order. Any empty
/// field yields no combinations.
#[must_use]
pub fn combinations(values: &[FieldValues]) -> BTreeSet<Vec<Segment>> {
    let mut combos: BTreeSet<Vec<Segment>> = BTreeSet::from([Vec::new()]);
    for field in values {
        combos = combos
            .iter()
            .flat_map(|prefix| {
                field.iter().map(move |value| {
                    let mut combo = prefix.clone();
                    combo.push(value.clone());
                    combo
                })
            })
            .collect();
        if combos.is_empty() {
            break;
        }
    }
    combos
}

/// Index key of one combination.
#[must_use]
pub fn entry_key(definition: &IndexDefinition, combo: &[Segment]) -> StoreKey {
    StoreKey::from_segments(
        definition
            .index_root
            .segments()
            .iter()
            .chain(combo.iter())
            .cloned(),
    )
}

/// Current index combinations of one record.
#[must_use]
pub fn record_combinations<T: TreeRead + ?Sized>(
    tree: &T,
    record: &StoreKey,
    definition: &IndexDefinition,
) -> BTreeSet<Vec<Segment>> {
    let values: Vec<FieldValues> = definition
        .fields
        .iter()
        .map(|field| field_values(tree, record, field))
        .collect();
    combinations(&values)
}
