use super::orb::{hamming_distance, Descriptor};

/// One mutual nearest-neighbour pair
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DescriptorMatch {
    pub query_idx: usize,
    pub train_idx: usize,
    pub distance: u32,
}

/// Index and distance of the closest train descriptor (first on ties)
fn nearest(query: &Descriptor, train: &[Descriptor]) -> Option<(usize, u32)> {
    train
        .iter()
        .enumerate()
        .map(|(i, t)| (i, hamming_distance(query, t)))
        .min_by_key(|&(i, d)| (d, i))
}

/// Brute-force Hamming matching with cross-check.
///
/// A pair is kept only when each descriptor is the other's nearest
/// neighbour. Results are in query order.
pub fn match_cross_checked(query: &[Descriptor], train: &[Descriptor]) -> Vec<DescriptorMatch> {
    if query.is_empty() || train.is_empty() {
        return Vec::new();
    }

    let backward: Vec<Option<usize>> = train
        .iter()
        .map(|t| nearest(t, query).map(|(i, _)| i))
        .collect();

    query
        .iter()
        .enumerate()
        .filter_map(|(qi, q)| {
            let (ti, distance) = nearest(q, train)?;
            (backward[ti] == Some(qi)).then_some(DescriptorMatch {
                query_idx: qi,
                train_idx: ti,
                distance,
            })
        })
        .collect()
}

/// Sort ascending by distance and keep the best `k`
pub fn best_matches(mut matches: Vec<DescriptorMatch>, k: usize) -> Vec<DescriptorMatch> {
    matches.sort_by_key(|m| m.distance);
    matches.truncate(k);
    matches
}
