use serde::{Deserialize, Serialize};

/// Relative tolerance used when deciding whether two feature positions coincide.
pub const POSITION_EPSILON: f32 = 1e-5;

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }

    /// Coincidence test with a tolerance relative to the coordinate magnitude
    /// (absolute near zero).
    pub fn fuzzy_eq(&self, other: &Point) -> bool {
        fn close(a: f32, b: f32) -> bool {
            let scale = a.abs().max(b.abs()).max(1.0);
            (a - b).abs() <= POSITION_EPSILON * scale
        }
        close(self.x, other.x) && close(self.y, other.y)
    }

    pub fn as_array(&self) -> [f32; 2] {
        [self.x, self.y]
    }
}

impl From<[f32; 2]> for Point {
    fn from(v: [f32; 2]) -> Self {
        Self::new(v[0], v[1])
    }
}

/// Axis aligned box stored as origin + extent. All containment tests are
/// inclusive on every edge.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Quadrant {
    /// min x, min y
    Q0,
    /// max x, min y
    Q1,
    /// min x, max y
    Q2,
    /// max x, max y
    Q3,
}

impl Quadrant {
    pub const ALL: [Quadrant; 4] = [Quadrant::Q0, Quadrant::Q1, Quadrant::Q2, Quadrant::Q3];

    pub fn index(self) -> usize {
        match self {
            Quadrant::Q0 => 0,
            Quadrant::Q1 => 1,
            Quadrant::Q2 => 2,
            Quadrant::Q3 => 3,
        }
    }
}

impl Aabb {
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    pub fn from_points(p0: Point, p1: Point) -> Self {
        Self {
            x: p0.x.min(p1.x),
            y: p0.y.min(p1.y),
            width: (p1.x - p0.x).abs(),
            height: (p1.y - p0.y).abs(),
        }
    }

    /// Smallest box containing every point, `None` for an empty input.
    pub fn enclosing<'a>(points: impl IntoIterator<Item = &'a Point>) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
        for p in iter {
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }
        Some(Self::from_points(Point::new(min_x, min_y), Point::new(max_x, max_y)))
    }

    pub fn max_x(&self) -> f32 {
        self.x + self.width
    }

    pub fn max_y(&self) -> f32 {
        self.y + self.height
    }

    pub fn middle(&self) -> Point {
        Point::new(self.x + 0.5 * self.width, self.y + 0.5 * self.height)
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.width.is_finite() && self.height.is_finite()
    }

    pub fn is_empty(&self) -> bool {
        !(self.width > 0.0 && self.height > 0.0)
    }

    pub fn contains(&self, p: Point) -> bool {
        p.x >= self.x && p.x <= self.max_x() && p.y >= self.y && p.y <= self.max_y()
    }

    pub fn contains_aabb(&self, o: &Aabb) -> bool {
        self.x <= o.x && o.max_x() <= self.max_x() && self.y <= o.y && o.max_y() <= self.max_y()
    }

    /// Inclusive overlap, so boxes that only touch along an edge intersect.
    pub fn intersects(&self, o: &Aabb) -> bool {
        !(self.x > o.max_x() || o.x > self.max_x() || self.y > o.max_y() || o.y > self.max_y())
    }

    pub fn split(&self, quadrant: Quadrant) -> Aabb {
        let hw = 0.5 * self.width;
        let hh = 0.5 * self.height;
        match quadrant {
            Quadrant::Q0 => Aabb::new(self.x, self.y, hw, hh),
            Quadrant::Q1 => Aabb::new(self.x + hw, self.y, hw, hh),
            Quadrant::Q2 => Aabb::new(self.x, self.y + hh, hw, hh),
            Quadrant::Q3 => Aabb::new(self.x + hw, self.y + hh, hw, hh),
        }
    }

    /// Quadrant of `p` relative to the middle of the box. Points on a
    /// midline go to the max side.
    pub fn quadrant_of(&self, p: Point) -> Quadrant {
        let m = self.middle();
        match (p.x < m.x, p.y < m.y) {
            (true, true) => Quadrant::Q0,
            (false, true) => Quadrant::Q1,
            (true, false) => Quadrant::Q2,
            (false, false) => Quadrant::Q3,
        }
    }

    pub fn join(&self, o: &Aabb) -> Aabb {
        let min = Point::new(self.x.min(o.x), self.y.min(o.y));
        let max = Point::new(self.max_x().max(o.max_x()), self.max_y().max(o.max_y()));
        Aabb::from_points(min, max)
    }
}

/// A selection shape coming from the UI: a marquee rectangle or a freehand
/// (closed) polygon.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Region {
    Rect(Aabb),
    Polygon(Vec<Point>),
}

impl Region {
    pub fn rect(x: f32, y: f32, width: f32, height: f32) -> Self {
        Region::Rect(Aabb::new(x, y, width, height))
    }

    pub fn polygon(points: impl IntoIterator<Item = Point>) -> Self {
        Region::Polygon(points.into_iter().collect())
    }

    pub fn bounding_box(&self) -> Option<Aabb> {
        match self {
            Region::Rect(r) => Some(*r),
            Region::Polygon(pts) => Aabb::enclosing(pts.iter()),
        }
    }

    /// Even-odd fill rule for polygons; degenerate polygons (fewer than three
    /// vertices) contain nothing.
    pub fn contains(&self, p: Point) -> bool {
        match self {
            Region::Rect(r) => r.contains(p),
            Region::Polygon(pts) => {
                if pts.len() < 3 {
                    return false;
                }
                let mut inside = false;
                let mut j = pts.len() - 1;
                for i in 0..pts.len() {
                    let (a, b) = (pts[i], pts[j]);
                    if (a.y > p.y) != (b.y > p.y) {
                        let x_cross = a.x + (p.y - a.y) / (b.y - a.y) * (b.x - a.x);
                        if p.x < x_cross {
                            inside = !inside;
                        }
                    }
                    j = i;
                }
                inside
            }
        }
    }

    /// Conservative overlap test used to prune tree nodes.
    pub fn may_intersect(&self, b: &Aabb) -> bool {
        self.bounding_box().is_some_and(|bb| bb.intersects(b))
    }

    /// True only when every point of `b` is known to be inside the region.
    pub fn covers(&self, b: &Aabb) -> bool {
        match self {
            Region::Rect(r) => r.contains_aabb(b),
            Region::Polygon(_) => false,
        }
    }
}
