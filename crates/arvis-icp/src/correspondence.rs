use glam::DVec3;

/// A matched pair of points between the sets `A` and `B`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Correspondence {
    /// Index into `A`.
    pub index_a: usize,
    /// Index into `B`.
    pub index_b: usize,
    /// Euclidean distance between the two points.
    pub distance: f64,
}

/// Global greedy one-to-one matching between two point sets.
///
/// Every pair `(i, j)` is scored by its Euclidean distance, the pairs are
/// sorted ascending and a pair is accepted only when neither point is matched
/// yet. Ties are broken by `(i, j)` so the result is deterministic. Points left
/// without a partner are simply not part of the result.
///
/// The search visits all `|A|·|B|` pairs and runs in `O(n² log n)`. It is meant
/// for small sets such as a few tens of sparse features, not dense clouds.
///
/// # Returns
///
/// The accepted pairs in acceptance order, i.e. by increasing distance.
pub fn find_greedy_correspondences(a: &[DVec3], b: &[DVec3]) -> Vec<Correspondence> {
    let mut pairs = Vec::with_capacity(a.len() * b.len());
    for (i, pa) in a.iter().enumerate() {
        for (j, pb) in b.iter().enumerate() {
            pairs.push(Correspondence {
                index_a: i,
                index_b: j,
                distance: pa.distance(*pb),
            });
        }
    }

    pairs.sort_by(|x, y| {
        x.distance
            .total_cmp(&y.distance)
            .then(x.index_a.cmp(&y.index_a))
            .then(x.index_b.cmp(&y.index_b))
    });

    let mut used_a = vec![false; a.len()];
    let mut used_b = vec![false; b.len()];
    let limit = a.len().min(b.len());
    let mut matches = Vec::with_capacity(limit);
    for pair in pairs {
        if matches.len() == limit {
            break;
        }
        // NaN distances sort last and never make a valid match
        if !pair.distance.is_finite() {
            break;
        }
        if used_a[pair.index_a] || used_b[pair.index_b] {
            continue;
        }
        used_a[pair.index_a] = true;
        used_b[pair.index_b] = true;
        matches.push(pair);
    }

    log::trace!(
        "greedy matching: {} pairs from {} x {} points",
        matches.len(),
        a.len(),
        b.len()
    );

    matches
}
