//! Partition maintenance via flood-fill competition.

use std::collections::{HashSet, VecDeque};

use crate::grid::{PixelGrid, UNASSIGNED};
use crate::sampler::WeightedSampler;
use crate::table::RegionTable;
use crate::{Result, Rgb, MAX_SITES};

/// Score reported while no site is active; any real score is lower.
pub const SCORE_UNSET: f64 = 1e10;

/// 4-neighborhood offsets, in wave propagation order.
const NEIGHBORS: [(i64, i64); 4] = [(0, 1), (0, -1), (1, 0), (-1, 0)];

/// Maintains the pixel-to-region partition for a set of movable sites.
///
/// The partition rule is flood-fill competition: a breadth-first wave claims
/// unassigned pixels outright and takes already-claimed pixels only when its
/// site is strictly closer in squared Euclidean distance, ties going to the
/// lower id. A pixel the wave never reaches keeps its owner even if the
/// moving site is geometrically closer, so the result approximates a Voronoi
/// partition while bounding each operation's cost to the regions it actually
/// disturbs.
///
/// Every mutation leaves the per-region statistics, the global score, and
/// the score²-weighted sampler consistent by recomputing exactly the regions
/// whose membership changed.
pub struct PartitionEngine {
    grid: PixelGrid,
    table: RegionTable,
    sampler: WeightedSampler,
    score_sum: u64,
    affected_marks: Vec<bool>,
    queue: VecDeque<u32>,
}

impl PartitionEngine {
    /// Build an engine over a decoded RGB image. No sites are active yet.
    pub fn from_image(image: &image::RgbImage) -> Result<Self> {
        Ok(Self::from_grid(PixelGrid::from_image(image)?))
    }

    /// Build an engine over a raw row-major buffer of packed 24-bit colors.
    pub fn from_packed(width: u32, height: u32, pixels: Vec<u32>) -> Result<Self> {
        Ok(Self::from_grid(PixelGrid::from_packed(width, height, pixels)?))
    }

    fn from_grid(grid: PixelGrid) -> Self {
        Self {
            grid,
            table: RegionTable::new(),
            sampler: WeightedSampler::new(MAX_SITES),
            score_sum: 0,
            affected_marks: vec![false; MAX_SITES],
            queue: VecDeque::new(),
        }
    }

    pub fn width(&self) -> u32 {
        self.grid.width()
    }

    pub fn height(&self) -> u32 {
        self.grid.height()
    }

    /// Number of active sites.
    pub fn site_count(&self) -> usize {
        self.table.len()
    }

    /// Active region ids in ascending order.
    pub fn active_ids(&self) -> &[usize] {
        self.table.active_ids()
    }

    /// Coordinates of every active site, in ascending id order.
    pub fn sites(&self) -> Vec<(u32, u32)> {
        self.table
            .active_ids()
            .iter()
            .map(|&id| self.table.region(id).site())
            .collect()
    }

    /// Id of the region owning pixel `(x, y)`, if any.
    pub fn region_at(&self, x: u32, y: u32) -> Option<usize> {
        if x >= self.grid.width() || y >= self.grid.height() {
            return None;
        }
        match self.grid.owner(self.grid.index(x, y)) {
            UNASSIGNED => None,
            id => Some(id as usize),
        }
    }

    /// Assignment array for the whole grid, row-major; [`UNASSIGNED`] marks
    /// pixels no region owns.
    pub fn assignments(&self) -> &[i32] {
        self.grid.assignments()
    }

    /// Representative color of an active region.
    pub fn region_color(&self, id: usize) -> Option<Rgb> {
        self.table.get(id).map(|r| r.color())
    }

    /// Score of an active region.
    pub fn region_score(&self, id: usize) -> Option<u64> {
        self.table.get(id).map(|r| r.score())
    }

    /// Normalized per-pixel score of an active region.
    pub fn region_score_per_pixel(&self, id: usize) -> Option<f64> {
        self.table.get(id).map(|r| r.score_per_pixel())
    }

    /// Pixel count of an active region.
    pub fn region_size(&self, id: usize) -> Option<u32> {
        self.table.get(id).map(|r| r.size())
    }

    /// Site coordinates of an active region.
    pub fn region_site(&self, id: usize) -> Option<(u32, u32)> {
        self.table.get(id).map(|r| r.site())
    }

    /// Sum of all active regions' scores, or [`SCORE_UNSET`] when no site
    /// is active.
    pub fn total_score(&self) -> f64 {
        if self.table.len() == 0 {
            SCORE_UNSET
        } else {
            self.score_sum as f64
        }
    }

    /// Total sampler weight: the sum of score² over active regions.
    pub fn score_weight_total(&self) -> f64 {
        self.sampler.total()
    }

    /// Region id drawn by cumulative score² weight. Draw `v` uniformly from
    /// `[0, score_weight_total())`; `None` when `v` lands past the active
    /// weights.
    pub fn region_by_weight(&self, v: f64) -> Option<usize> {
        let id = self.sampler.sample(v);
        self.table.is_active(id).then_some(id)
    }

    /// Render the mosaic: every pixel takes its region's representative
    /// color, unassigned pixels stay black.
    pub fn render(&self) -> image::RgbImage {
        let mut out = image::RgbImage::new(self.grid.width(), self.grid.height());
        for (p, px) in out.pixels_mut().enumerate() {
            let owner = self.grid.owner(p as u32);
            if owner != UNASSIGNED {
                *px = image::Rgb(self.table.region(owner as usize).color());
            }
        }
        out
    }

    /// Deactivate every site and unassign every pixel. The score returns to
    /// [`SCORE_UNSET`].
    pub fn reset(&mut self) {
        self.grid.clear_assignments();
        self.table.clear();
        self.sampler = WeightedSampler::new(MAX_SITES);
        self.score_sum = 0;
    }

    /// Activate a site at `(x, y)` and grow its region by flood-fill
    /// competition from that pixel.
    ///
    /// Fails without touching any state when the coordinates are out of
    /// bounds, the pixel already hosts a site, or all [`MAX_SITES`] ids are
    /// active.
    pub fn add_site(&mut self, x: u32, y: u32) -> bool {
        if x >= self.grid.width() || y >= self.grid.height() {
            return false;
        }
        let p = self.grid.index(x, y);
        if self.table.hosts_site(p) || self.table.is_full() {
            return false;
        }
        let id = self.table.allocate(x, y, p).expect("table has a free slot");

        let mut affected = Vec::new();
        self.claim(p, id, &mut affected);
        self.queue.clear();
        self.queue.push_back(p);
        self.propagate(&mut affected);
        self.rescore(affected);
        true
    }

    /// Activate a batch of sites given as row-major pixel indices, growing
    /// all of them in one multi-source wave seeded in input order.
    ///
    /// Duplicate indices collapse to their first occurrence and indices
    /// already hosting a site are skipped. The call fails wholesale, with no
    /// state change, when an index is out of range or the batch would push
    /// past [`MAX_SITES`] active sites.
    pub fn add_sites(&mut self, points: &[u32]) -> bool {
        let mut seen = HashSet::new();
        let mut accepted = Vec::new();
        for &p in points {
            if p as usize >= self.grid.pixel_count() {
                return false;
            }
            if self.table.hosts_site(p) || !seen.insert(p) {
                continue;
            }
            accepted.push(p);
        }
        if self.table.len() + accepted.len() > MAX_SITES {
            return false;
        }

        let mut affected = Vec::new();
        self.queue.clear();
        for &p in &accepted {
            let (x, y) = self.grid.coords(p);
            let id = self.table.allocate(x, y, p).expect("capacity checked above");
            self.claim(p, id, &mut affected);
            self.queue.push_back(p);
        }
        self.propagate(&mut affected);
        self.rescore(affected);
        true
    }

    /// Deactivate the region owning pixel `(x, y)`: clear its connected
    /// component, free its id, and let the surviving neighbors backfill the
    /// freed area through the same competition wave.
    ///
    /// Fails when the pixel is out of bounds or unassigned.
    pub fn remove_site(&mut self, x: u32, y: u32) -> bool {
        if x >= self.grid.width() || y >= self.grid.height() {
            return false;
        }
        let p = self.grid.index(x, y);
        let owner = self.grid.owner(p);
        if owner == UNASSIGNED {
            return false;
        }
        let id = owner as usize;

        // Clear the component, collecting the first ring of foreign-owned
        // pixels as backfill seeds in discovery order.
        let width = self.grid.width() as i64;
        let height = self.grid.height() as i64;
        let mut boundary_seen = HashSet::new();
        let mut boundary = Vec::new();
        self.grid.set_owner(p, UNASSIGNED);
        self.queue.clear();
        self.queue.push_back(p);
        while let Some(q) = self.queue.pop_front() {
            let (qx, qy) = self.grid.coords(q);
            for (dx, dy) in NEIGHBORS {
                let nx = qx as i64 + dx;
                let ny = qy as i64 + dy;
                if nx < 0 || ny < 0 || nx >= width || ny >= height {
                    continue;
                }
                let np = self.grid.index(nx as u32, ny as u32);
                let neighbor = self.grid.owner(np);
                if neighbor == id as i32 {
                    self.grid.set_owner(np, UNASSIGNED);
                    self.queue.push_back(np);
                } else if neighbor != UNASSIGNED && boundary_seen.insert(np) {
                    boundary.push(np);
                }
            }
        }

        // Retire the freed region wholesale: its score and sampler weight
        // leave the totals before the backfill runs.
        let site = self.table.region(id).site();
        let site_pixel = self.grid.index(site.0, site.1);
        let region = self.table.free(id, site_pixel);
        self.score_sum -= region.score();
        let w = region.score() as f64;
        self.sampler.update(id, -(w * w));

        let mut affected = Vec::new();
        for &q in &boundary {
            self.queue.push_back(q);
        }
        self.propagate(&mut affected);
        self.rescore(affected);
        true
    }

    /// Squared Euclidean distance from `(x, y)` to a site.
    fn dist_sq(x: u32, y: u32, site: (u32, u32)) -> u64 {
        let dx = x as i64 - site.0 as i64;
        let dy = y as i64 - site.1 as i64;
        (dx * dx + dy * dy) as u64
    }

    /// Contest rule: whether region `i` takes pixel `(x, y)` from its
    /// current owner `j`. Strictly closer wins, ties go to the lower id.
    fn contest(&self, x: u32, y: u32, i: usize, j: usize) -> bool {
        let di = Self::dist_sq(x, y, self.table.region(i).site());
        let dj = Self::dist_sq(x, y, self.table.region(j).site());
        di < dj || (di == dj && i < j)
    }

    /// Reassign pixel `p` to `id`, moving its color between histograms and
    /// recording both touched regions as affected.
    fn claim(&mut self, p: u32, id: usize, affected: &mut Vec<usize>) {
        let prev = self.grid.owner(p);
        if prev != UNASSIGNED {
            let prev = prev as usize;
            assert!(
                self.table.is_active(prev),
                "pixel {p} owned by inactive region {prev}"
            );
            self.table.region_mut(prev).remove_member(self.grid.color(p));
            self.mark_affected(prev, affected);
        }
        self.table.region_mut(id).add_member(self.grid.color(p));
        self.grid.set_owner(p, id as i32);
        self.mark_affected(id, affected);
    }

    fn mark_affected(&mut self, id: usize, affected: &mut Vec<usize>) {
        if !self.affected_marks[id] {
            self.affected_marks[id] = true;
            affected.push(id);
        }
    }

    /// Run the competition wave until the frontier empties. A dequeued pixel
    /// propagates its current owner (which may have changed since it was
    /// enqueued), claiming unassigned neighbors outright and contested
    /// neighbors per the distance rule.
    fn propagate(&mut self, affected: &mut Vec<usize>) {
        let width = self.grid.width() as i64;
        let height = self.grid.height() as i64;
        while let Some(p) = self.queue.pop_front() {
            let owner = self.grid.owner(p);
            if owner == UNASSIGNED {
                continue;
            }
            let i = owner as usize;
            let (x, y) = self.grid.coords(p);
            for (dx, dy) in NEIGHBORS {
                let nx = x as i64 + dx;
                let ny = y as i64 + dy;
                if nx < 0 || ny < 0 || nx >= width || ny >= height {
                    continue;
                }
                let np = self.grid.index(nx as u32, ny as u32);
                let neighbor = self.grid.owner(np);
                if neighbor == UNASSIGNED {
                    self.claim(np, i, affected);
                    self.queue.push_back(np);
                    continue;
                }
                let j = neighbor as usize;
                if i == j {
                    continue;
                }
                if self.contest(nx as u32, ny as u32, i, j) {
                    self.claim(np, i, affected);
                    self.queue.push_back(np);
                }
            }
        }
    }

    /// Recompute every affected region exactly once, replacing its old
    /// contribution to the global score and sampler weight with the new one.
    fn rescore(&mut self, affected: Vec<usize>) {
        for id in affected {
            self.affected_marks[id] = false;
            let old = self.table.region(id).score();
            self.score_sum -= old;
            self.sampler.update(id, -((old as f64) * (old as f64)));
            let new = {
                let region = self.table.region_mut(id);
                region.recompute_stats();
                region.score()
            };
            self.score_sum += new;
            self.sampler.update(id, (new as f64) * (new as f64));
        }
    }
}
