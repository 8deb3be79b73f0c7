//! Top-K tracking for scored candidates.

use std::cmp::Ordering;

/// A candidate index paired with its score.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Scored {
    /// Position of the candidate in the caller's input.
    pub index: usize,
    /// Confidence score.
    pub score: f32,
}

/// Descending score; on ties the earlier index ranks first.
fn scored_cmp_desc(a: &Scored, b: &Scored) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.index.cmp(&b.index))
}

/// Sorts candidates by descending score with deterministic tie-breaking.
pub(crate) fn sort_scored_desc(items: &mut [Scored]) {
    items.sort_by(scored_cmp_desc);
}

/// Top-K container with O(k) insertion cost.
pub struct TopK {
    k: usize,
    items: Vec<Scored>,
}

impl TopK {
    /// Creates a new Top-K collector.
    pub fn new(k: usize) -> Self {
        Self {
            k,
            items: Vec::with_capacity(k.min(1024)),
        }
    }

    /// Pushes a candidate, evicting the worst one if at capacity.
    pub fn push(&mut self, item: Scored) {
        if self.k == 0 {
            return;
        }
        if self.items.len() < self.k {
            self.items.push(item);
            return;
        }

        let mut worst_idx = 0usize;
        for (idx, current) in self.items.iter().enumerate().skip(1) {
            if scored_cmp_desc(current, &self.items[worst_idx]) == Ordering::Greater {
                worst_idx = idx;
            }
        }

        if scored_cmp_desc(&item, &self.items[worst_idx]) == Ordering::Less {
            self.items[worst_idx] = item;
        }
    }

    /// Returns the retained candidates sorted by descending score.
    pub fn into_sorted_desc(mut self) -> Vec<Scored> {
        sort_scored_desc(&mut self.items);
        self.items
    }
}

/// Above this cap a partial sort beats the O(k) insertion of [`TopK`].
const TOPK_MAX: usize = 64;

/// Keeps the `max` best-scoring indices of `scores`, best first.
pub fn cap_candidates(scores: &[f32], max: usize) -> Vec<usize> {
    let best = if max <= TOPK_MAX {
        let mut topk = TopK::new(max);
        for (index, &score) in scores.iter().enumerate() {
            topk.push(Scored { index, score });
        }
        topk.into_sorted_desc()
    } else {
        let mut all: Vec<Scored> = scores
            .iter()
            .enumerate()
            .map(|(index, &score)| Scored { index, score })
            .collect();
        if all.len() > max {
            all.select_nth_unstable_by(max, scored_cmp_desc);
            all.truncate(max);
        }
        sort_scored_desc(&mut all);
        all
    };
    best.into_iter().map(|s| s.index).collect()
}
