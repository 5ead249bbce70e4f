//! Column-shape fingerprints.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use rowmap_core::RowCursor;

/// Order-sensitive hash of the cursor's column count and names.
///
/// Equal fingerprints are a fast filter, not proof of an equal shape.
pub fn fingerprint(cursor: &dyn RowCursor) -> u64 {
    let count = cursor.field_count();
    let mut state = DefaultHasher::new();
    count.hash(&mut state);
    for i in 0..count {
        cursor.field_name(i).hash(&mut state);
    }
    state.finish()
}

/// The column names of `start..start + length`.
pub fn column_names(cursor: &dyn RowCursor, start: usize, length: usize) -> Vec<String> {
    (start..start + length)
        .map(|i| cursor.field_name(i).to_string())
        .collect()
}
