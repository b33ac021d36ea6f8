//! Accept/reject relocation passes over the partition engine.

use std::collections::HashSet;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::anneal::Annealer;
use crate::engine::PartitionEngine;
use crate::MAX_SITES;

/// Default proposals per optimization pass.
pub const PASS_ITERATIONS: usize = 1000;

/// Standard deviation, in pixels, of the kick placement jitter.
const KICK_SIGMA: f64 = 10.0;

/// Largest per-axis offset of a nudge proposal.
const NUDGE_RANGE: i64 = 4;

/// Candidate placements tried before an iteration gives up and restores the
/// removed site at its original position.
const MAX_PLACEMENT_ATTEMPTS: usize = 1000;

/// Outcome counts of one optimization pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassStats {
    /// Proposals evaluated.
    pub proposed: usize,
    /// Proposals kept; the rest were rolled back.
    pub accepted: usize,
}

/// Drives site relocation against a [`PartitionEngine`].
///
/// Owns the acceptance policy and a seeded RNG, so identical seeds replay
/// identical optimization runs. Every pass runs to completion synchronously
/// and leaves the engine geometrically valid whether its proposals commit or
/// roll back.
pub struct Optimizer {
    annealer: Annealer,
    rng: ChaCha8Rng,
    pass_iterations: usize,
}

impl Optimizer {
    pub fn new(seed: u64) -> Self {
        Self {
            annealer: Annealer::new(),
            rng: ChaCha8Rng::seed_from_u64(seed),
            pass_iterations: PASS_ITERATIONS,
        }
    }

    /// Override the number of proposals per pass.
    pub fn with_pass_iterations(mut self, iterations: usize) -> Self {
        self.pass_iterations = iterations;
        self
    }

    pub fn annealer(&self) -> &Annealer {
        &self.annealer
    }

    /// Relocation pass biased toward badly fitting regions.
    ///
    /// Each iteration removes a uniformly random site and re-places it near
    /// a region drawn with probability proportional to its squared score,
    /// jittered by a Gaussian offset; worsening moves are rolled back.
    /// Requires at least two active sites.
    pub fn kick_pass(&mut self, engine: &mut PartitionEngine) -> PassStats {
        let mut stats = PassStats::default();
        if engine.site_count() < 2 {
            return stats;
        }
        for _ in 0..self.pass_iterations {
            self.relocate_one(engine, &mut stats, Placement::Sampled);
        }
        stats
    }

    /// Local-jitter relocation pass.
    ///
    /// Each iteration shifts a uniformly random site by an independent
    /// nonzero offset of up to four pixels per axis, keeping the move only
    /// when it does not worsen the score. Requires at least five active
    /// sites.
    pub fn nudge_pass(&mut self, engine: &mut PartitionEngine) -> PassStats {
        let mut stats = PassStats::default();
        if engine.site_count() < 5 {
            return stats;
        }
        for _ in 0..self.pass_iterations {
            self.relocate_one(engine, &mut stats, Placement::Nearby);
        }
        stats
    }

    /// Clear the engine and acceptance policy, then seed the grid with
    /// distinct uniformly random pixels grown together in one multi-source
    /// pass. The requested count is clamped to the site capacity and the
    /// pixel count; returns the number of sites placed.
    pub fn reseed(&mut self, engine: &mut PartitionEngine, count: usize) -> usize {
        self.clear(engine);
        let pixels = engine.width() as usize * engine.height() as usize;
        let target = count.min(MAX_SITES).min(pixels);
        let mut seen = HashSet::new();
        let mut points = Vec::with_capacity(target);
        while points.len() < target {
            let p = self.rng.gen_range(0..pixels) as u32;
            if seen.insert(p) {
                points.push(p);
            }
        }
        let added = engine.add_sites(&points);
        debug_assert!(added);
        points.len()
    }

    /// Drop every site and reset the acceptance policy; the engine's score
    /// returns to its unset sentinel.
    pub fn clear(&mut self, engine: &mut PartitionEngine) {
        engine.reset();
        self.annealer = Annealer::new();
    }

    /// One remove/re-place/evaluate iteration shared by both pass kinds.
    fn relocate_one(
        &mut self,
        engine: &mut PartitionEngine,
        stats: &mut PassStats,
        placement: Placement,
    ) {
        let prev = engine.total_score();
        let (ox, oy) = self.random_site(engine);
        let removed = engine.remove_site(ox, oy);
        debug_assert!(removed);

        let placed = match placement {
            Placement::Sampled => self.place_by_sampling(engine),
            Placement::Nearby => self.place_nearby(engine, ox, oy),
        };
        let Some((nx, ny)) = placed else {
            let restored = engine.add_site(ox, oy);
            debug_assert!(restored);
            return;
        };

        stats.proposed += 1;
        let delta = (engine.total_score() - prev) / score_norm(engine);
        if self.annealer.accept(delta) {
            stats.accepted += 1;
        } else {
            engine.remove_site(nx, ny);
            let restored = engine.add_site(ox, oy);
            debug_assert!(restored);
        }
    }

    /// Uniformly random active site.
    fn random_site(&mut self, engine: &PartitionEngine) -> (u32, u32) {
        let ids = engine.active_ids();
        let id = ids[self.rng.gen_range(0..ids.len())];
        engine.region_site(id).expect("active id has a region")
    }

    /// Place a site by weighted sampling: anchor at a score²-drawn region
    /// (uniform while every weight is zero), jitter by a Gaussian offset,
    /// and keep the first in-bounds unoccupied pixel that takes.
    fn place_by_sampling(&mut self, engine: &mut PartitionEngine) -> Option<(u32, u32)> {
        for _ in 0..MAX_PLACEMENT_ATTEMPTS {
            let total = engine.score_weight_total();
            let anchor = if total > 0.0 {
                let v = self.rng.gen::<f64>() * total;
                match engine.region_by_weight(v) {
                    Some(id) => id,
                    None => continue,
                }
            } else {
                let ids = engine.active_ids();
                ids[self.rng.gen_range(0..ids.len())]
            };
            let (sx, sy) = engine.region_site(anchor).expect("sampled id is active");
            let (zx, zy) = gaussian_pair(&mut self.rng);
            let x = (sx as f64 + zx * KICK_SIGMA).floor();
            let y = (sy as f64 + zy * KICK_SIGMA).floor();
            if x < 0.0 || y < 0.0 || x >= engine.width() as f64 || y >= engine.height() as f64 {
                continue;
            }
            if engine.add_site(x as u32, y as u32) {
                return Some((x as u32, y as u32));
            }
        }
        None
    }

    /// Place a site a few pixels away from `(ox, oy)`, one nonzero offset
    /// per axis.
    fn place_nearby(
        &mut self,
        engine: &mut PartitionEngine,
        ox: u32,
        oy: u32,
    ) -> Option<(u32, u32)> {
        for _ in 0..MAX_PLACEMENT_ATTEMPTS {
            let x = ox as i64 + self.axis_offset();
            let y = oy as i64 + self.axis_offset();
            if x < 0 || y < 0 || x >= engine.width() as i64 || y >= engine.height() as i64 {
                continue;
            }
            if engine.add_site(x as u32, y as u32) {
                return Some((x as u32, y as u32));
            }
        }
        None
    }

    /// Nonzero offset in `[-4, -1] ∪ [1, 4]`.
    fn axis_offset(&mut self) -> i64 {
        let step = self.rng.gen_range(1..=NUDGE_RANGE);
        if self.rng.gen::<bool>() {
            step
        } else {
            -step
        }
    }
}

/// Placement strategy of a relocation iteration.
#[derive(Clone, Copy)]
enum Placement {
    Sampled,
    Nearby,
}

/// Score deltas are normalized to the largest possible error of the whole
/// image, `W * H * 255 * 3`.
fn score_norm(engine: &PartitionEngine) -> f64 {
    engine.width() as f64 * engine.height() as f64 * 255.0 * 3.0
}

/// Standard Box–Muller transform: two independent unit normals from two
/// independent uniform draws.
fn gaussian_pair(rng: &mut ChaCha8Rng) -> (f64, f64) {
    let u1: f64 = 1.0 - rng.gen::<f64>();
    let u2: f64 = rng.gen();
    let r = (-2.0 * u1.ln()).sqrt();
    let theta = std::f64::consts::TAU * u2;
    (r * theta.cos(), r * theta.sin())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::SCORE_UNSET;
    use crate::pack_rgb;

    fn gradient_engine(width: u32, height: u32) -> PartitionEngine {
        let pixels = (0..width * height)
            .map(|p| {
                let (x, y) = (p % width, p / width);
                pack_rgb([
                    (x * 255 / width) as u8,
                    (y * 255 / height) as u8,
                    128,
                ])
            })
            .collect();
        PartitionEngine::from_packed(width, height, pixels).unwrap()
    }

    #[test]
    fn reseed_places_the_requested_distinct_sites() {
        let mut engine = gradient_engine(48, 32);
        let mut optimizer = Optimizer::new(7);
        assert_eq!(optimizer.reseed(&mut engine, 40), 40);
        assert_eq!(engine.site_count(), 40);
        let sites = engine.sites();
        let distinct: HashSet<_> = sites.iter().collect();
        assert_eq!(distinct.len(), 40);
        assert!(engine.assignments().iter().all(|&a| a >= 0));
    }

    #[test]
    fn reseed_clamps_to_the_pixel_count() {
        let mut engine = gradient_engine(6, 5);
        let mut optimizer = Optimizer::new(0);
        assert_eq!(optimizer.reseed(&mut engine, MAX_SITES), 30);
        assert_eq!(engine.site_count(), 30);
    }

    #[test]
    fn kick_pass_needs_two_sites() {
        let mut engine = gradient_engine(16, 16);
        let mut optimizer = Optimizer::new(1).with_pass_iterations(50);
        assert!(engine.add_site(8, 8));
        let before = engine.assignments().to_vec();
        assert_eq!(optimizer.kick_pass(&mut engine), PassStats::default());
        assert_eq!(engine.assignments(), &before[..]);
    }

    #[test]
    fn nudge_pass_needs_five_sites() {
        let mut engine = gradient_engine(16, 16);
        let mut optimizer = Optimizer::new(1).with_pass_iterations(50);
        for &(x, y) in &[(2, 2), (13, 2), (8, 13)] {
            assert!(engine.add_site(x, y));
        }
        let before = engine.assignments().to_vec();
        assert_eq!(optimizer.nudge_pass(&mut engine), PassStats::default());
        assert_eq!(engine.assignments(), &before[..]);
    }

    #[test]
    fn kick_pass_never_worsens_the_score() {
        let mut engine = gradient_engine(48, 32);
        let mut optimizer = Optimizer::new(42).with_pass_iterations(300);
        optimizer.reseed(&mut engine, 60);
        let before = engine.total_score();
        let stats = optimizer.kick_pass(&mut engine);
        assert!(stats.proposed > 0);
        assert!(stats.accepted <= stats.proposed);
        assert!(
            engine.total_score() < before,
            "expected improvement from {before}, got {}",
            engine.total_score()
        );
    }

    #[test]
    fn nudge_pass_never_worsens_the_score() {
        let mut engine = gradient_engine(48, 32);
        let mut optimizer = Optimizer::new(42).with_pass_iterations(300);
        optimizer.reseed(&mut engine, 60);
        let before = engine.total_score();
        optimizer.nudge_pass(&mut engine);
        assert!(engine.total_score() <= before);
    }

    #[test]
    fn same_seed_replays_the_same_run() {
        let run = |seed| {
            let mut engine = gradient_engine(40, 30);
            let mut optimizer = Optimizer::new(seed).with_pass_iterations(150);
            optimizer.reseed(&mut engine, 50);
            optimizer.kick_pass(&mut engine);
            optimizer.nudge_pass(&mut engine);
            (engine.assignments().to_vec(), engine.total_score())
        };
        let (assign_a, score_a) = run(12345);
        let (assign_b, score_b) = run(12345);
        assert_eq!(assign_a, assign_b);
        assert_eq!(score_a, score_b);

        let (assign_c, _) = run(54321);
        assert_ne!(assign_a, assign_c);
    }

    #[test]
    fn clear_resets_engine_and_policy() {
        let mut engine = gradient_engine(20, 20);
        let mut optimizer = Optimizer::new(3).with_pass_iterations(20);
        optimizer.reseed(&mut engine, 30);
        optimizer.kick_pass(&mut engine);
        assert!(optimizer.annealer().iterations() > 0);

        optimizer.clear(&mut engine);
        assert_eq!(engine.site_count(), 0);
        assert_eq!(engine.total_score(), SCORE_UNSET);
        assert_eq!(optimizer.annealer().iterations(), 0);
    }

    #[test]
    fn relocation_preserves_site_uniqueness() {
        let mut engine = gradient_engine(32, 24);
        let mut optimizer = Optimizer::new(9).with_pass_iterations(200);
        optimizer.reseed(&mut engine, 25);
        optimizer.kick_pass(&mut engine);
        optimizer.nudge_pass(&mut engine);

        assert_eq!(engine.site_count(), 25);
        let sites = engine.sites();
        let distinct: HashSet<_> = sites.iter().collect();
        assert_eq!(distinct.len(), sites.len());
        assert!(engine.assignments().iter().all(|&a| a >= 0));
    }
}
