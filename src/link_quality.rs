//! Link-quality matrix merge for the map overlay.
//!
//! The aggregation service reports pairwise signal quality as a small square
//! matrix whose rows/columns follow the order of the node list in the same
//! payload. The map keeps a fixed-capacity matrix indexed by node identifier
//! instead, so that pairs heard in earlier polls stay visible after a node
//! drops out of the latest sample.
//!
//! ```text
//! sample ids:  [5, 7]            merged (capacity N):
//! raw:         [[-,  12.5],      m[5][7] = raw[0][1]
//!               [12.5, - ]]      m[7][5] = raw[1][0]
//!                                everything else: previous value
//! ```

use std::collections::BTreeMap;

/// Default capacity of the merged matrix (node identifiers `0..100`).
pub const DEFAULT_CAPACITY: usize = 100;

/// Square matrix of optional quality values, indexed `[from_id][to_id]`.
pub type LinkQualityMatrix = Vec<Vec<Option<f64>>>;

/// Allocate a `capacity` x `capacity` matrix filled with `default`.
pub fn empty_matrix(capacity: usize, default: Option<f64>) -> LinkQualityMatrix {
    vec![vec![default; capacity]; capacity]
}

/// Whether `matrix` is exactly `capacity` x `capacity` (every row checked).
fn has_shape(matrix: &LinkQualityMatrix, capacity: usize) -> bool {
    matrix.len() == capacity && matrix.iter().all(|row| row.len() == capacity)
}

/// Fold a fresh sample into the previous merged matrix.
///
/// - `ids`: node identifiers of the current sample, in payload order.
/// - `raw`: quality values indexed positionally by `ids` order.
/// - `previous`: last merged matrix; ignored unless it is exactly
///   `capacity` x `capacity`.
///
/// Every ordered pair of in-range identifiers is overwritten from `raw`
/// (`default` when the cell is missing or null). Pairs involving identifiers
/// absent from the sample keep their previous value. `previous` is never
/// modified; the result is always a new allocation.
pub fn merge_link_quality(
    ids: &[i64],
    raw: &[Vec<Option<f64>>],
    previous: Option<&LinkQualityMatrix>,
    capacity: usize,
    default: Option<f64>,
) -> LinkQualityMatrix {
    let mut merged = match previous {
        Some(prev) if has_shape(prev, capacity) => prev.clone(),
        _ => empty_matrix(capacity, default),
    };

    // id -> position in the sample; a repeated id keeps its last position
    let positions: BTreeMap<usize, usize> = ids
        .iter()
        .enumerate()
        .filter_map(|(pos, &id)| {
            usize::try_from(id)
                .ok()
                .filter(|&id| id < capacity)
                .map(|id| (id, pos))
        })
        .collect();

    for (&from, &i) in &positions {
        for (&to, &j) in &positions {
            merged[from][to] = raw
                .get(i)
                .and_then(|row| row.get(j))
                .copied()
                .flatten()
                .or(default);
        }
    }

    merged
}
