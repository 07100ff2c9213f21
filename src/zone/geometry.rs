use serde::{Deserialize, Serialize};

/// Integer pixel coordinate.
///
/// Serialized as a two-element array `[x, y]`, which is the layout zone
/// definition files use.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "[i32; 2]", into = "[i32; 2]")]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl From<[i32; 2]> for Point {
    fn from([x, y]: [i32; 2]) -> Self {
        Self { x, y }
    }
}

impl From<Point> for [i32; 2] {
    fn from(p: Point) -> Self {
        [p.x, p.y]
    }
}

impl From<(i32, i32)> for Point {
    fn from((x, y): (i32, i32)) -> Self {
        Self { x, y }
    }
}

/// Simple polygon, closed implicitly from the last vertex back to the first.
///
/// Vertex count is not checked here; `ZoneRegistry::load` rejects polygons
/// with fewer than three points before they reach the engine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Polygon {
    points: Vec<Point>,
}

impl Polygon {
    pub fn new(points: Vec<Point>) -> Self {
        Self { points }
    }

    /// Axis-aligned rectangle zone, the older `(x1, y1, x2, y2)` ROI form.
    pub fn rectangle(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self::new(vec![
            Point::new(x1, y1),
            Point::new(x2, y1),
            Point::new(x2, y2),
            Point::new(x1, y2),
        ])
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Iterate the closed edge list `(p[i], p[i+1])`, wrapping at the end.
    pub fn edges(&self) -> impl Iterator<Item = (Point, Point)> + '_ {
        let n = self.points.len();
        (0..n).map(move |i| (self.points[i], self.points[(i + 1) % n]))
    }

    /// Twice the signed area (shoelace). Zero means every vertex is collinear.
    pub fn doubled_area(&self) -> i64 {
        self.edges()
            .map(|(a, b)| a.x as i64 * b.y as i64 - b.x as i64 * a.y as i64)
            .sum()
    }

    /// Axis-aligned bounds `(min, max)`, or `None` for an empty polygon.
    pub fn bounds(&self) -> Option<(Point, Point)> {
        let first = *self.points.first()?;
        Some(self.points.iter().fold((first, first), |(lo, hi), p| {
            (
                Point::new(lo.x.min(p.x), lo.y.min(p.y)),
                Point::new(hi.x.max(p.x), hi.y.max(p.y)),
            )
        }))
    }

    /// Point-in-polygon test.
    ///
    /// Points on an edge or vertex count as inside when `inclusive_boundary`
    /// is set and outside otherwise. Interior points use even-odd ray casting
    /// toward +x, evaluated in exact integer arithmetic.
    pub fn contains(&self, point: Point, inclusive_boundary: bool) -> bool {
        if self.points.len() < 3 {
            return false;
        }
        if self.edges().any(|(a, b)| on_segment(a, b, point)) {
            return inclusive_boundary;
        }

        let px = point.x as i64;
        let py = point.y as i64;
        let mut inside = false;
        for (a, b) in self.edges() {
            let (ax, ay) = (a.x as i64, a.y as i64);
            let (bx, by) = (b.x as i64, b.y as i64);
            if (ay > py) == (by > py) {
                continue;
            }
            // Crossing x is ax + (py - ay) * (bx - ax) / (by - ay). Compare
            // px against it without dividing, minding the sign of (by - ay).
            let lhs = (px - ax) * (by - ay);
            let rhs = (py - ay) * (bx - ax);
            let crosses_right = if by > ay { lhs < rhs } else { lhs > rhs };
            if crosses_right {
                inside = !inside;
            }
        }
        inside
    }
}

fn on_segment(a: Point, b: Point, p: Point) -> bool {
    let (ax, ay) = (a.x as i64, a.y as i64);
    let (bx, by) = (b.x as i64, b.y as i64);
    let (px, py) = (p.x as i64, p.y as i64);
    let cross = (bx - ax) * (py - ay) - (by - ay) * (px - ax);
    cross == 0
        && px >= ax.min(bx)
        && px <= ax.max(bx)
        && py >= ay.min(by)
        && py <= ay.max(by)
}
