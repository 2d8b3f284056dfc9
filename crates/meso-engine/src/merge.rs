//! Cross-link TopC merge.
//!
//! Given one key-ordered person deque per link, pick the first `capacity`
//! persons globally by ascending predicted time-to-link-end, breaking ties
//! uniformly at random among the tied links (this prevents systematic bias
//! between adjacent links), then append the remaining tails in link order.

use meso_core::{ConfluxRng, PersonId};

/// Merge `per_link` into `out`.  `capacity` bounds the k-way-merged prefix;
/// `key` is the predicted driving time to the end of the person's link.
pub fn top_c_merge_links(
    per_link: &[Vec<PersonId>],
    capacity: usize,
    key: impl Fn(PersonId) -> f64,
    rng: &mut ConfluxRng,
    out: &mut Vec<PersonId>,
) {
    let mut cursors = vec![0usize; per_link.len()];

    // Pick the top C across links.
    for _ in 0..capacity {
        let mut min_key = f64::MAX;
        let mut tied: Vec<usize> = Vec::new();
        for (i, list) in per_link.iter().enumerate() {
            let Some(&person) = list.get(cursors[i]) else {
                continue;
            };
            let k = key(person);
            if k == min_key {
                tied.push(i);
            } else if k < min_key {
                min_key = k;
                tied.clear();
                tied.push(i);
            }
        }

        if tied.is_empty() {
            return; // no more persons anywhere
        }
        let chosen = if tied.len() == 1 {
            tied[0]
        } else {
            tied[rng.pick(tied.len())]
        };
        out.push(per_link[chosen][cursors[chosen]]);
        cursors[chosen] += 1;
    }

    // Append whatever is left, link by link.
    for (i, list) in per_link.iter().enumerate() {
        out.extend_from_slice(&list[cursors[i]..]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meso_core::ConfluxId;

    fn ids(v: &[u32]) -> Vec<PersonId> {
        v.iter().copied().map(PersonId).collect()
    }

    #[test]
    fn merges_by_key_within_capacity() {
        // Keys equal the person id, so the merge is globally ascending.
        let per_link = vec![ids(&[0, 2, 4]), ids(&[1, 3, 5])];
        let mut rng = ConfluxRng::new(1, ConfluxId(0));
        let mut out = Vec::new();
        top_c_merge_links(&per_link, 6, |p| p.0 as f64, &mut rng, &mut out);
        assert_eq!(out, ids(&[0, 1, 2, 3, 4, 5]));
    }

    #[test]
    fn tails_appended_in_link_order_after_capacity() {
        let per_link = vec![ids(&[0, 4, 5]), ids(&[1, 2, 3])];
        let mut rng = ConfluxRng::new(1, ConfluxId(0));
        let mut out = Vec::new();
        top_c_merge_links(&per_link, 2, |p| p.0 as f64, &mut rng, &mut out);
        // Top 2 by key: 0, 1.  Tails: link 0 first (4, 5), then link 1 (2, 3).
        assert_eq!(out, ids(&[0, 1, 4, 5, 2, 3]));
    }

    #[test]
    fn tie_break_is_seed_deterministic() {
        let per_link = vec![ids(&[0, 1]), ids(&[2, 3])];
        let all_equal = |_p: PersonId| 1.0;

        let run = |seed: u64| {
            let mut rng = ConfluxRng::new(seed, ConfluxId(0));
            let mut out = Vec::new();
            top_c_merge_links(&per_link, 4, all_equal, &mut rng, &mut out);
            out
        };

        assert_eq!(run(42), run(42), "same seed, same order");
        // Every person still appears exactly once.
        let mut sorted = run(7);
        sorted.sort();
        assert_eq!(sorted, ids(&[0, 1, 2, 3]));
    }

    #[test]
    fn empty_links_are_skipped() {
        let per_link = vec![ids(&[]), ids(&[9]), ids(&[])];
        let mut rng = ConfluxRng::new(1, ConfluxId(0));
        let mut out = Vec::new();
        top_c_merge_links(&per_link, 10, |p| p.0 as f64, &mut rng, &mut out);
        assert_eq!(out, ids(&[9]));
    }
}
