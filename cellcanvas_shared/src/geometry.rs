//! Embedding-space geometry for lasso selection
//!
//! A lasso is a closed polygon drawn over the 2D embedding scatter. The
//! containment test treats the boundary as inside, so a point lying exactly on
//! an edge or vertex is always selected.

use serde::{Deserialize, Serialize};

/// Distance below which a point is considered to lie on a polygon edge.
const BOUNDARY_EPSILON: f64 = 1e-6;

/// A point in the 2D embedding plane.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point2 {
    pub x: f32,
    pub y: f32,
}

impl Point2 {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Squared Euclidean distance to another point.
    pub fn distance_sq(&self, other: &Point2) -> f32 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        dx * dx + dy * dy
    }
}

impl From<[f32; 2]> for Point2 {
    fn from(value: [f32; 2]) -> Self {
        Self::new(value[0], value[1])
    }
}

impl From<(f32, f32)> for Point2 {
    fn from(value: (f32, f32)) -> Self {
        Self::new(value.0, value.1)
    }
}

/// Axis-aligned bounds of a point set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min: Point2,
    pub max: Point2,
}

impl BoundingBox {
    /// Bounds of `points`, or `None` when the iterator is empty.
    pub fn of<I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = Point2>,
    {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let mut bounds = Self {
            min: first,
            max: first,
        };
        for point in iter {
            bounds.min.x = bounds.min.x.min(point.x);
            bounds.min.y = bounds.min.y.min(point.y);
            bounds.max.x = bounds.max.x.max(point.x);
            bounds.max.y = bounds.max.y.max(point.y);
        }
        Some(bounds)
    }

    pub fn contains(&self, point: Point2) -> bool {
        point.x >= self.min.x
            && point.x <= self.max.x
            && point.y >= self.min.y
            && point.y <= self.max.y
    }

    /// Grow the box by `margin` on every side.
    pub fn expanded(&self, margin: f32) -> Self {
        Self {
            min: Point2::new(self.min.x - margin, self.min.y - margin),
            max: Point2::new(self.max.x + margin, self.max.y + margin),
        }
    }
}

/// A closed lasso polygon. The last vertex connects back to the first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polygon {
    vertices: Vec<Point2>,
}

impl Polygon {
    /// Build a polygon from lasso vertices. A trailing vertex that repeats the
    /// first one is dropped since closure is implicit.
    pub fn new(mut vertices: Vec<Point2>) -> Self {
        if vertices.len() > 1 && vertices.first() == vertices.last() {
            vertices.pop();
        }
        Self { vertices }
    }

    pub fn from_pairs(pairs: &[[f32; 2]]) -> Self {
        Self::new(pairs.iter().copied().map(Point2::from).collect())
    }

    /// Rectangle covering `bounds`, mostly useful for "select everything".
    pub fn rectangle(bounds: BoundingBox) -> Self {
        Self::new(vec![
            bounds.min,
            Point2::new(bounds.max.x, bounds.min.y),
            bounds.max,
            Point2::new(bounds.min.x, bounds.max.y),
        ])
    }

    pub fn vertices(&self) -> &[Point2] {
        &self.vertices
    }

    /// A polygon needs at least three vertices to enclose any area.
    pub fn is_closed(&self) -> bool {
        self.vertices.len() > 2
    }

    pub fn bounding_box(&self) -> Option<BoundingBox> {
        BoundingBox::of(self.vertices.iter().copied())
    }

    /// Inclusive point-in-polygon test (even-odd rule, boundary counts as inside).
    pub fn contains(&self, point: Point2) -> bool {
        if !self.is_closed() {
            return false;
        }

        let px = f64::from(point.x);
        let py = f64::from(point.y);
        let n = self.vertices.len();

        let mut inside = false;
        let mut j = n - 1;
        for i in 0..n {
            let (xi, yi) = (f64::from(self.vertices[i].x), f64::from(self.vertices[i].y));
            let (xj, yj) = (f64::from(self.vertices[j].x), f64::from(self.vertices[j].y));

            if on_segment(px, py, xi, yi, xj, yj) {
                return true;
            }

            if (yi > py) != (yj > py) && px < (xj - xi) * (py - yi) / (yj - yi) + xi {
                inside = !inside;
            }
            j = i;
        }

        inside
    }
}

fn on_segment(px: f64, py: f64, ax: f64, ay: f64, bx: f64, by: f64) -> bool {
    let dx = bx - ax;
    let dy = by - ay;
    let length = (dx * dx + dy * dy).sqrt();

    if length < BOUNDARY_EPSILON {
        let ex = px - ax;
        let ey = py - ay;
        return (ex * ex + ey * ey).sqrt() <= BOUNDARY_EPSILON;
    }

    let cross = dx * (py - ay) - dy * (px - ax);
    if cross.abs() / length > BOUNDARY_EPSILON {
        return false;
    }

    let dot = (px - ax) * dx + (py - ay) * dy;
    dot >= -BOUNDARY_EPSILON * length && dot <= length * length + BOUNDARY_EPSILON * length
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_square() -> Polygon {
        Polygon::from_pairs(&[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]])
    }

    #[test]
    fn interior_and_exterior_points() {
        let square = unit_square();
        assert!(square.contains(Point2::new(0.5, 0.5)));
        assert!(!square.contains(Point2::new(1.5, 0.5)));
        assert!(!square.contains(Point2::new(-0.01, 0.5)));
    }

    #[test]
    fn boundary_is_inclusive() {
        let square = unit_square();
        assert!(square.contains(Point2::new(0.0, 0.5)));
        assert!(square.contains(Point2::new(1.0, 1.0)));
        assert!(square.contains(Point2::new(0.5, 0.0)));
        assert!(square.contains(Point2::new(1.0, 0.25)));
    }

    #[test]
    fn concave_lasso() {
        // U shape opening upwards
        let lasso = Polygon::from_pairs(&[
            [0.0, 0.0],
            [3.0, 0.0],
            [3.0, 3.0],
            [2.0, 3.0],
            [2.0, 1.0],
            [1.0, 1.0],
            [1.0, 3.0],
            [0.0, 3.0],
        ]);
        assert!(lasso.contains(Point2::new(0.5, 2.5)));
        assert!(lasso.contains(Point2::new(2.5, 2.5)));
        assert!(!lasso.contains(Point2::new(1.5, 2.0)));
        assert!(lasso.contains(Point2::new(1.5, 0.5)));
    }

    #[test]
    fn repeated_closing_vertex_is_dropped() {
        let lasso = Polygon::from_pairs(&[[0.0, 0.0], [1.0, 0.0], [0.0, 1.0], [0.0, 0.0]]);
        assert_eq!(lasso.vertices().len(), 3);
        assert!(lasso.contains(Point2::new(0.2, 0.2)));
    }

    #[test]
    fn degenerate_polygon_contains_nothing() {
        let line = Polygon::from_pairs(&[[0.0, 0.0], [1.0, 1.0]]);
        assert!(!line.is_closed());
        assert!(!line.contains(Point2::new(0.5, 0.5)));
    }

    #[test]
    fn rectangle_encloses_its_bounds() {
        let points = [
            Point2::new(-2.0, 1.0),
            Point2::new(3.0, -4.0),
            Point2::new(0.5, 0.5),
        ];
        let bounds = BoundingBox::of(points).unwrap();
        let rect = Polygon::rectangle(bounds);
        assert!(points.iter().all(|&p| rect.contains(p)));
        assert!(!rect.contains(Point2::new(3.1, 0.0)));
    }
}
