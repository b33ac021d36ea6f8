//! Fenwick-tree weighted sampler over region ids.

/// Prefix-sum structure for drawing region ids in proportion to a
/// non-negative per-id weight.
///
/// A Fenwick (binary indexed) tree over `f64` weights, sized to the next
/// power of two at or above the requested capacity so the sampling descent
/// starts from a single top bit. Point updates and samples are both
/// O(log capacity).
#[derive(Debug, Clone)]
pub struct WeightedSampler {
    tree: Vec<f64>,
    cap: usize,
}

impl WeightedSampler {
    pub fn new(capacity: usize) -> Self {
        let cap = capacity.next_power_of_two().max(1);
        Self {
            tree: vec![0.0; cap + 1],
            cap,
        }
    }

    pub fn capacity(&self) -> usize {
        self.cap
    }

    /// Add `delta` to the weight stored at `id`.
    pub fn update(&mut self, id: usize, delta: f64) {
        debug_assert!(id < self.cap);
        let mut i = id + 1;
        while i <= self.cap {
            self.tree[i] += delta;
            i += i & i.wrapping_neg();
        }
    }

    /// Cumulative weight of ids `0..=id`.
    pub fn prefix(&self, id: usize) -> f64 {
        let mut i = (id + 1).min(self.cap);
        let mut sum = 0.0;
        while i > 0 {
            sum += self.tree[i];
            i -= i & i.wrapping_neg();
        }
        sum
    }

    /// Total weight across all ids.
    pub fn total(&self) -> f64 {
        // cap is a power of two, so the root node covers the whole range
        self.tree[self.cap]
    }

    /// Smallest id whose cumulative weight exceeds `v`.
    ///
    /// Drawing `v` uniformly from `[0, total())` samples each id with
    /// probability proportional to its weight; `sample(0.0)` is the
    /// smallest id carrying positive weight. When `v` is at or beyond the
    /// total the returned index is past the last weighted id and may be out
    /// of capacity; callers validate it.
    pub fn sample(&self, v: f64) -> usize {
        let mut pos = 0usize;
        let mut rem = v;
        let mut bit = self.cap;
        while bit > 0 {
            let next = pos + bit;
            if next <= self.cap && self.tree[next] <= rem {
                rem -= self.tree[next];
                pos = next;
            }
            bit >>= 1;
        }
        pos
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn rounds_capacity_to_a_power_of_two() {
        assert_eq!(WeightedSampler::new(1000).capacity(), 1024);
        assert_eq!(WeightedSampler::new(16).capacity(), 16);
    }

    #[test]
    fn prefix_sums_track_point_updates() {
        let mut sampler = WeightedSampler::new(8);
        sampler.update(1, 2.0);
        sampler.update(4, 3.0);
        sampler.update(1, 1.0);
        assert_eq!(sampler.prefix(0), 0.0);
        assert_eq!(sampler.prefix(1), 3.0);
        assert_eq!(sampler.prefix(3), 3.0);
        assert_eq!(sampler.prefix(4), 6.0);
        assert_eq!(sampler.total(), 6.0);

        sampler.update(4, -3.0);
        assert_eq!(sampler.total(), 3.0);
    }

    #[test]
    fn sample_zero_finds_the_smallest_weighted_id() {
        let mut sampler = WeightedSampler::new(16);
        sampler.update(5, 4.0);
        sampler.update(9, 1.0);
        assert_eq!(sampler.sample(0.0), 5);
        assert_eq!(sampler.sample(3.9), 5);
        assert_eq!(sampler.sample(4.0), 9);
        assert_eq!(sampler.sample(4.5), 9);
    }

    #[test]
    fn sample_beyond_total_is_out_of_range() {
        let mut sampler = WeightedSampler::new(4);
        sampler.update(2, 1.5);
        assert!(sampler.sample(1.5) > 2);
    }

    #[test]
    fn draws_converge_to_weight_proportions() {
        let mut sampler = WeightedSampler::new(1000);
        sampler.update(1, 1.0);
        sampler.update(3, 3.0);
        sampler.update(7, 6.0);

        let mut rng = ChaCha8Rng::seed_from_u64(99);
        let mut counts = [0u32; 8];
        let draws = 20_000;
        for _ in 0..draws {
            let v = rng.gen::<f64>() * sampler.total();
            counts[sampler.sample(v)] += 1;
        }

        assert_eq!(counts.iter().sum::<u32>(), draws);
        let share = |id: usize| counts[id] as f64 / draws as f64;
        assert!((share(1) - 0.1).abs() < 0.02, "id 1 share {}", share(1));
        assert!((share(3) - 0.3).abs() < 0.02, "id 3 share {}", share(3));
        assert!((share(7) - 0.6).abs() < 0.02, "id 7 share {}", share(7));
    }
}
