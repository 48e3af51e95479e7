//! Reciprocal Rank Fusion (RRF) for combining ranked lists.

use std::collections::HashMap;
use std::hash::Hash;

/// RRF constant (commonly 60).
/// Higher values flatten the difference between top and lower ranks.
pub const RRF_K: u32 = 60;

/// An item of a fused ranking.
#[derive(Debug, Clone, PartialEq)]
pub struct FusedItem<Id> {
    pub id: Id,

    /// Sum of the item's reciprocal-rank contributions.
    pub score: f64,

    /// Lowest 1-based rank the item reached in any input list.
    pub best_rank: usize,

    /// 1-based rank in each input list, in input order (`None` when absent).
    pub ranks: Vec<Option<usize>>,
}

/// Fuse ranked lists with per-list weights.
///
/// An item at 1-based rank `r` of a list with weight `w` contributes
/// `w / (k + r)`. Items absent from a list contribute nothing; an id repeated
/// within one list counts once, at its best rank. The result is sorted by
/// descending score, then by best rank, then by id.
///
/// Contributions are summed in ascending order of magnitude, so the scores
/// do not depend on the order in which the lists are passed.
pub fn weighted_reciprocal_rank_fusion<Id>(lists: &[(&[Id], f64)], k: u32) -> Vec<FusedItem<Id>>
where
    Id: Copy + Eq + Hash + Ord,
{
    let k = f64::from(k);
    let mut contributions: HashMap<Id, (Vec<f64>, Vec<Option<usize>>)> = HashMap::new();

    for (list_index, (ids, weight)) in lists.iter().enumerate() {
        for (position, id) in ids.iter().enumerate() {
            let rank = position + 1;
            let (parts, ranks) = contributions
                .entry(*id)
                .or_insert_with(|| (Vec::new(), vec![None; lists.len()]));

            if ranks[list_index].is_some() {
                continue;
            }
            ranks[list_index] = Some(rank);
            parts.push(weight / (k + rank as f64));
        }
    }

    let mut fused: Vec<FusedItem<Id>> = contributions
        .into_iter()
        .map(|(id, (mut parts, ranks))| {
            parts.sort_by(|a, b| a.total_cmp(b));
            let best_rank = ranks.iter().flatten().copied().min().unwrap_or(usize::MAX);
            FusedItem {
                id,
                score: parts.iter().sum(),
                best_rank,
                ranks,
            }
        })
        .collect();

    fused.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.best_rank.cmp(&b.best_rank))
            .then_with(|| a.id.cmp(&b.id))
    });

    fused
}

/// Fuse ranked lists with equal weights.
///
/// RRF score = Σ 1 / (k + rank_i) over the lists containing the item.
pub fn reciprocal_rank_fusion<Id>(lists: &[&[Id]], k: u32) -> Vec<FusedItem<Id>>
where
    Id: Copy + Eq + Hash + Ord,
{
    let weighted: Vec<(&[Id], f64)> = lists.iter().map(|ids| (*ids, 1.0)).collect();
    weighted_reciprocal_rank_fusion(&weighted, k)
}
