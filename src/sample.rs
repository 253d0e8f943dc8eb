use std::collections::BTreeSet;

use rand::Rng;

pub const DEFAULT_TASK_SIZE: usize = 50;

/// Draws `k` distinct indices from `0..n` by rejection sampling and returns
/// them in ascending order. `k` is clamped to `n`.
pub fn sample_indices<R: Rng + ?Sized>(n: usize, k: usize, rng: &mut R) -> Vec<usize> {
    let k = k.min(n);
    let mut picked = BTreeSet::new();
    while picked.len() < k {
        picked.insert(rng.gen_range(0..n));
    }
    picked.into_iter().collect()
}

/// Random subset of `items` of size `k` (0 means [`DEFAULT_TASK_SIZE`]),
/// preserving the original order.
pub fn sample_lines<T: Clone, R: Rng + ?Sized>(items: &[T], k: usize, rng: &mut R) -> Vec<T> {
    let k = if k == 0 { DEFAULT_TASK_SIZE } else { k };
    sample_indices(items.len(), k, rng)
        .into_iter()
        .map(|idx| items[idx].clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng as _;
    use rand::rngs::StdRng;

    use super::*;

    #[test]
    fn indices_are_distinct_ascending_and_in_range() {
        let mut rng = StdRng::seed_from_u64(42);
        for (n, k) in [(100, 50), (10, 10), (1, 1), (500, 3)] {
            let picked = sample_indices(n, k, &mut rng);
            assert_eq!(picked.len(), k);
            assert!(picked.windows(2).all(|w| w[0] < w[1]));
            assert!(picked.iter().all(|idx| *idx < n));
        }
    }

    #[test]
    fn oversized_request_is_clamped() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(sample_indices(5, 50, &mut rng), vec![0, 1, 2, 3, 4]);
        assert!(sample_indices(0, 50, &mut rng).is_empty());
    }

    #[test]
    fn sampled_lines_keep_reading_order() {
        let mut rng = StdRng::seed_from_u64(9);
        let items: Vec<u32> = (0..200).collect();
        let sample = sample_lines(&items, 0, &mut rng);
        assert_eq!(sample.len(), DEFAULT_TASK_SIZE);
        assert!(sample.windows(2).all(|w| w[0] < w[1]));
    }
}
