//! Bucketed quad tree mapping 2D points to slot handles.
//!
//! Buckets live in a flat arena (`Vec<Bucket>`); a bucket either holds up to
//! `BUCKET_CAPACITY` points or links to four children. A leaf whose points all
//! coincide is allowed to overflow instead of splitting forever, and no leaf is
//! split past `MAX_DEPTH`.
//!
//! Points outside the built bounds grow the tree: the root is replaced by a
//! node twice its size (extended towards the point) until the point fits.
//! Depths are re-based on every growth so `MAX_DEPTH` counts from the current
//! root. Once doubling would leave the finite float range the root stops
//! growing and further outliers are clamped onto its border.

use crate::error::SpatialIndexError;
use crate::geometry::{Aabb, Point, Quadrant, Region, POSITION_EPSILON};

pub type SlotHandle = u32;

pub const BUCKET_CAPACITY: usize = 8;
const MAX_DEPTH: u32 = 24;

#[derive(Clone, Debug)]
struct Bucket {
    aabb: Aabb,
    depth: u32,
    children: Option<[usize; 4]>,
    items: Vec<(Point, SlotHandle)>,
}

impl Bucket {
    fn leaf(aabb: Aabb, depth: u32) -> Self {
        Self {
            aabb,
            depth,
            children: None,
            items: Vec::new(),
        }
    }

    fn all_coincident(&self) -> bool {
        match self.items.first() {
            Some((first, _)) => self.items.iter().all(|(p, _)| p.fuzzy_eq(first)),
            None => true,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct SpatialIndex {
    buckets: Vec<Bucket>,
    root: usize,
    built_bounds: Option<Aabb>,
    len: usize,
    saturated: bool,
}

impl SpatialIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bounds(bounds: Aabb) -> Result<Self, SpatialIndexError> {
        let mut index = Self::new();
        index.build(bounds)?;
        Ok(index)
    }

    /// Reset the index to cover `bounds`, dropping every entry.
    pub fn build(&mut self, bounds: Aabb) -> Result<(), SpatialIndexError> {
        if !bounds.is_finite() {
            return Err(SpatialIndexError::InvalidBounds(format!("non-finite {bounds:?}")));
        }
        if bounds.is_empty() {
            return Err(SpatialIndexError::InvalidBounds(format!("empty {bounds:?}")));
        }
        self.built_bounds = Some(bounds);
        self.clear();
        Ok(())
    }

    /// Drop all entries, keeping the bounds given to `build`.
    pub fn clear(&mut self) {
        self.buckets.clear();
        self.root = 0;
        self.len = 0;
        self.saturated = false;
        if let Some(bounds) = self.built_bounds {
            self.buckets.push(Bucket::leaf(bounds, 0));
        }
    }

    pub fn is_built(&self) -> bool {
        self.built_bounds.is_some()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Area currently covered by the root (may exceed the built bounds after growth).
    pub fn bounds(&self) -> Option<Aabb> {
        self.buckets.get(self.root).map(|b| b.aabb)
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Whether the root hit the float range and outliers are being clamped.
    pub fn is_saturated(&self) -> bool {
        self.saturated
    }

    pub fn insert(&mut self, p: Point, handle: SlotHandle) -> Result<(), SpatialIndexError> {
        if !p.is_finite() {
            return Err(SpatialIndexError::NonFinitePoint { x: p.x, y: p.y });
        }
        if self.buckets.is_empty() {
            return Err(SpatialIndexError::NotBuilt);
        }

        while !self.buckets[self.root].aabb.contains(p) {
            if !self.grow_towards(p) {
                break;
            }
        }
        let p = self.clamp_to_root(p);

        let mut idx = self.root;
        while let Some(children) = self.buckets[idx].children {
            idx = children[self.buckets[idx].aabb.quadrant_of(p).index()];
        }
        self.buckets[idx].items.push((p, handle));
        self.len += 1;

        let mut pending = vec![idx];
        while let Some(idx) = pending.pop() {
            let b = &self.buckets[idx];
            if b.items.len() > BUCKET_CAPACITY && b.depth < MAX_DEPTH && !b.all_coincident() {
                pending.extend(self.smash(idx));
            }
        }
        Ok(())
    }

    /// Handle already registered at (or within float noise of) `p`. When
    /// several match, the lowest handle wins.
    pub fn find_exact(&self, p: Point) -> Option<SlotHandle> {
        if !p.is_finite() || self.buckets.is_empty() {
            return None;
        }
        let p = self.clamp_to_root(p);
        let tol_x = POSITION_EPSILON * p.x.abs().max(1.0) * 2.0;
        let tol_y = POSITION_EPSILON * p.y.abs().max(1.0) * 2.0;
        let probe = Aabb::new(p.x - tol_x, p.y - tol_y, 2.0 * tol_x, 2.0 * tol_y);

        let mut best: Option<SlotHandle> = None;
        let mut stack = vec![self.root];
        while let Some(idx) = stack.pop() {
            let b = &self.buckets[idx];
            if !b.aabb.intersects(&probe) {
                continue;
            }
            match b.children {
                Some(children) => stack.extend(children),
                None => {
                    for (q, h) in &b.items {
                        if q.fuzzy_eq(&p) {
                            best = Some(best.map_or(*h, |cur| cur.min(*h)));
                        }
                    }
                }
            }
        }
        best
    }

    /// All entries whose point lies inside `region`, ordered by handle.
    pub fn query_region(&self, region: &Region) -> Vec<(Point, SlotHandle)> {
        let mut out = Vec::new();
        if self.buckets.is_empty() {
            return out;
        }
        let mut stack = vec![self.root];
        while let Some(idx) = stack.pop() {
            let b = &self.buckets[idx];
            if !region.may_intersect(&b.aabb) {
                continue;
            }
            if let Some(children) = b.children {
                stack.extend(children);
            } else if region.covers(&b.aabb) {
                out.extend_from_slice(&b.items);
            } else {
                out.extend(b.items.iter().filter(|(p, _)| region.contains(*p)).copied());
            }
        }
        out.sort_by_key(|(_, h)| *h);
        out
    }

    /// Split a leaf into four children and push its items down. Returns the
    /// child indices so the caller can keep splitting overfull ones.
    fn smash(&mut self, idx: usize) -> [usize; 4] {
        let head = self.buckets.len();
        let aabb = self.buckets[idx].aabb;
        let depth = self.buckets[idx].depth + 1;
        for q in Quadrant::ALL {
            self.buckets.push(Bucket::leaf(aabb.split(q), depth));
        }
        let children = [head, head + 1, head + 2, head + 3];
        let items = std::mem::take(&mut self.buckets[idx].items);
        self.buckets[idx].children = Some(children);
        for (p, h) in items {
            let child = children[aabb.quadrant_of(p).index()];
            self.buckets[child].items.push((p, h));
        }
        children
    }

    /// Outliers are only moved once the root can no longer grow.
    fn clamp_to_root(&self, p: Point) -> Point {
        let root = self.buckets[self.root].aabb;
        if !self.saturated || root.contains(p) {
            return p;
        }
        Point::new(p.x.clamp(root.x, root.max_x()), p.y.clamp(root.y, root.max_y()))
    }

    /// Double the root towards `p`. Returns false, and marks the index
    /// saturated, when the doubled root would not be finite.
    fn grow_towards(&mut self, p: Point) -> bool {
        let old = self.buckets[self.root].aabb;
        let grow_min_x = p.x < old.x;
        let grow_min_y = p.y < old.y;
        let grown = Aabb::new(
            if grow_min_x { old.x - old.width } else { old.x },
            if grow_min_y { old.y - old.height } else { old.y },
            old.width * 2.0,
            old.height * 2.0,
        );
        if !grown.is_finite() || !grown.max_x().is_finite() || !grown.max_y().is_finite() {
            if !self.saturated {
                log::warn!("spatial index cannot grow past {old:?}; clamping ({}, {})", p.x, p.y);
            }
            self.saturated = true;
            return false;
        }
        // the old root becomes the quadrant opposite to the growth direction
        let old_quadrant = match (grow_min_x, grow_min_y) {
            (false, false) => Quadrant::Q0,
            (true, false) => Quadrant::Q1,
            (false, true) => Quadrant::Q2,
            (true, true) => Quadrant::Q3,
        };
        log::warn!("spatial index grows from {old:?} to {grown:?} to fit ({}, {})", p.x, p.y);

        for b in &mut self.buckets {
            b.depth += 1;
        }
        let mut children = [0usize; 4];
        for q in Quadrant::ALL {
            children[q.index()] = if q == old_quadrant {
                self.root
            } else {
                self.buckets.push(Bucket::leaf(grown.split(q), 1));
                self.buckets.len() - 1
            };
        }
        self.buckets.push(Bucket {
            aabb: grown,
            depth: 0,
            children: Some(children),
            items: Vec::new(),
        });
        self.root = self.buckets.len() - 1;
        true
    }
}
