use bevy::math::{DVec2, DVec3};

/// Planar polygon in landscape coordinates. Vertices may be given open or
/// closed (first vertex repeated at the end).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Polygon {
    pub vertices: Vec<DVec3>,
}

impl Polygon {
    pub fn new(vertices: Vec<DVec3>) -> Self {
        Self { vertices }
    }

    pub fn from_bounds(lower: DVec2, upper: DVec2) -> Self {
        Self::new(vec![
            DVec3::new(lower.x, lower.y, 0.0),
            DVec3::new(upper.x, lower.y, 0.0),
            DVec3::new(upper.x, upper.y, 0.0),
            DVec3::new(lower.x, upper.y, 0.0),
        ])
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.len() < 3
    }

    /// Winding-number containment test, ignores z.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        self.winding_number(x, y) != 0
    }

    pub fn winding_number(&self, x: f64, y: f64) -> i32 {
        let n = self.vertices.len();
        let mut wn = 0;
        for (i, v0) in self.vertices.iter().enumerate() {
            let Some(v1) = self.vertices.get((i + 1) % n) else {
                continue;
            };
            if v0.y <= y {
                if v1.y > y && is_left(*v0, *v1, x, y) > 0.0 {
                    wn += 1;
                }
            } else if v1.y <= y && is_left(*v0, *v1, x, y) < 0.0 {
                wn -= 1;
            }
        }
        wn
    }

    /// Axis aligned (lower, upper) corners, or None for a polygon without vertices.
    pub fn bounds(&self) -> Option<(DVec2, DVec2)> {
        let first = self.vertices.first()?;
        let mut lower = first.truncate();
        let mut upper = lower;
        for v in &self.vertices {
            lower = lower.min(v.truncate());
            upper = upper.max(v.truncate());
        }
        Some((lower, upper))
    }

    /// Mean of the distinct vertices.
    pub fn center(&self) -> Option<DVec3> {
        let mut vertices = self.vertices.as_slice();
        if let (Some(first), Some(last)) = (vertices.first(), vertices.last()) {
            if vertices.len() > 1 && first == last {
                vertices = vertices.split_last().map_or(vertices, |(_, rest)| rest);
            }
        }
        if vertices.is_empty() {
            return None;
        }
        let sum: DVec3 = vertices.iter().copied().sum();
        Some(sum / vertices.len() as f64)
    }
}

fn is_left(p0: DVec3, p1: DVec3, x: f64, y: f64) -> f64 {
    (p1.x - p0.x) * (y - p0.y) - (x - p0.x) * (p1.y - p0.y)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Polygon {
        Polygon::from_bounds(DVec2::new(-1.0, -1.0), DVec2::new(1.0, 1.0))
    }

    #[test]
    fn contains_inside_and_excludes_outside() {
        let p = square();
        assert!(p.contains(0.0, 0.0));
        assert!(p.contains(0.9, -0.9));
        assert!(!p.contains(1.5, 0.0));
        assert!(!p.contains(0.0, -2.0));
    }

    #[test]
    fn closed_and_open_rings_agree() {
        let open = square();
        let mut closed = open.clone();
        closed.vertices.push(open.vertices[0]);
        for (x, y) in [(0.0, 0.0), (0.5, 0.5), (2.0, 0.0), (-0.99, 0.99)] {
            assert_eq!(open.contains(x, y), closed.contains(x, y));
        }
    }

    #[test]
    fn clockwise_ring_still_contains() {
        let mut p = square();
        p.vertices.reverse();
        assert!(p.contains(0.1, 0.2));
        assert_eq!(p.winding_number(0.1, 0.2), -1);
    }

    #[test]
    fn bounds_and_center() {
        let p = Polygon::new(vec![
            DVec3::new(0.0, 0.0, 0.0),
            DVec3::new(4.0, 0.0, 0.0),
            DVec3::new(4.0, 2.0, 0.0),
            DVec3::new(0.0, 0.0, 0.0),
        ]);
        let (lower, upper) = p.bounds().unwrap();
        assert_eq!(lower, DVec2::new(0.0, 0.0));
        assert_eq!(upper, DVec2::new(4.0, 2.0));
        let c = p.center().unwrap();
        assert!((c.x - 8.0 / 3.0).abs() < 1e-12);
        assert!(Polygon::default().bounds().is_none());
    }
}
