// winding.rs -- convex polygon ("winding") operations
//
// A winding is the bounded intersection of a plane with a set of
// half-spaces. Brush sides, portals and faces all carry one. Storage
// is an owned point list; clipping returns new windings instead of
// mutating shared buffers.

use crate::math::*;

/// Base windings start as squares this far out; anything touching the
/// edge of one never got clipped and is suspect.
pub const BOGUS_RANGE: f32 = 65536.0;

#[derive(Debug, Clone, PartialEq)]
pub struct Winding {
    pub points: Vec<Vec3>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Front,
    Back,
    On,
}

impl Winding {
    pub fn new(points: Vec<Vec3>) -> Self {
        Winding { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// A huge quad lying on the given plane, to be chopped down by the
    /// other half-spaces of a brush or node volume.
    pub fn base_for_plane(normal: &Vec3, dist: f32) -> Winding {
        // find the major axis
        let mut max = -BOGUS_RANGE;
        let mut x = usize::MAX;
        for i in 0..3 {
            let v = normal[i].abs();
            if v > max {
                x = i;
                max = v;
            }
        }

        let mut up = VEC3_ORIGIN;
        match x {
            0 | 1 => up[2] = 1.0,
            _ => up[0] = 1.0,
        }

        let d = dot_product(&up, normal);
        up = vector_ma(&up, -d, normal);
        vector_normalize(&mut up);

        let org = vector_scale(normal, dist);
        let right = cross_product(&up, normal);

        let up = vector_scale(&up, BOGUS_RANGE);
        let right = vector_scale(&right, BOGUS_RANGE);

        // project a really big axis-aligned box onto the plane
        let points = vec![
            vector_add(&vector_subtract(&org, &right), &up),
            vector_add(&vector_add(&org, &right), &up),
            vector_subtract(&vector_add(&org, &right), &up),
            vector_subtract(&vector_subtract(&org, &right), &up),
        ];
        Winding::new(points)
    }

    pub fn area(&self) -> f32 {
        let mut total = 0.0;
        for i in 2..self.points.len() {
            let d1 = vector_subtract(&self.points[i - 1], &self.points[0]);
            let d2 = vector_subtract(&self.points[i], &self.points[0]);
            let cross = cross_product(&d1, &d2);
            total += 0.5 * vector_length(&cross);
        }
        total
    }

    pub fn bounds(&self) -> Bounds {
        let mut b = Bounds::new();
        for p in &self.points {
            b.add_point(p);
        }
        b
    }

    pub fn center(&self) -> Vec3 {
        let mut center = VEC3_ORIGIN;
        for p in &self.points {
            center = vector_add(&center, p);
        }
        vector_scale(&center, 1.0 / self.points.len() as f32)
    }

    pub fn plane(&self) -> (Vec3, f32) {
        let v1 = vector_subtract(&self.points[1], &self.points[0]);
        let v2 = vector_subtract(&self.points[2], &self.points[0]);
        let mut normal = cross_product(&v2, &v1);
        vector_normalize(&mut normal);
        let dist = dot_product(&self.points[0], &normal);
        (normal, dist)
    }

    pub fn reverse(&self) -> Winding {
        Winding::new(self.points.iter().rev().copied().collect())
    }

    /// True if the winding has fewer than three edges of usable length.
    pub fn is_tiny(&self) -> bool {
        const EDGE_LENGTH: f32 = 0.2;
        let mut edges = 0;
        let n = self.points.len();
        for i in 0..n {
            let delta = vector_subtract(&self.points[(i + 1) % n], &self.points[i]);
            if vector_length(&delta) > EDGE_LENGTH {
                edges += 1;
                if edges == 3 {
                    return false;
                }
            }
        }
        true
    }

    /// True if any coordinate escaped the expected world range,
    /// meaning some bounding chop never happened.
    pub fn is_huge(&self) -> bool {
        for p in &self.points {
            for &c in p {
                if c < -crate::defines::MAX_WORLD_WIDTH * 2.0
                    || c > crate::defines::MAX_WORLD_WIDTH * 2.0
                {
                    return true;
                }
            }
        }
        false
    }

    /// Removes degenerate edges (successive near-identical points).
    /// Returns false if anything had to be removed.
    pub fn fix_degenerate_edges(&mut self) -> bool {
        let n = self.points.len();
        let mut kept: Vec<Vec3> = Vec::with_capacity(n);
        for i in 0..n {
            let p1 = self.points[i];
            let p2 = self.points[(i + 1) % n];
            let delta = vector_subtract(&p2, &p1);
            if vector_length(&delta) > EQUAL_EPSILON {
                kept.push(p1);
            }
        }
        let fixed = kept.len() == n;
        self.points = kept;
        fixed
    }

    fn classify(dists: &[f32], epsilon: f32) -> Vec<Side> {
        dists
            .iter()
            .map(|&d| {
                if d > epsilon {
                    Side::Front
                } else if d < -epsilon {
                    Side::Back
                } else {
                    Side::On
                }
            })
            .collect()
    }

    /// Splits by the plane, returning the (front, back) pieces. Either
    /// may be None if the winding lies entirely on one side.
    pub fn clip_epsilon(
        &self,
        normal: &Vec3,
        dist: f32,
        epsilon: f32,
    ) -> (Option<Winding>, Option<Winding>) {
        let dists: Vec<f32> = self
            .points
            .iter()
            .map(|p| dot_product(p, normal) - dist)
            .collect();
        let sides = Self::classify(&dists, epsilon);

        let any_front = sides.iter().any(|&s| s == Side::Front);
        let any_back = sides.iter().any(|&s| s == Side::Back);
        if !any_front {
            return (None, Some(self.clone()));
        }
        if !any_back {
            return (Some(self.clone()), None);
        }

        let n = self.points.len();
        let mut front: Vec<Vec3> = Vec::with_capacity(n + 4);
        let mut back: Vec<Vec3> = Vec::with_capacity(n + 4);

        for i in 0..n {
            let p1 = self.points[i];
            match sides[i] {
                Side::On => {
                    front.push(p1);
                    back.push(p1);
                    continue;
                }
                Side::Front => front.push(p1),
                Side::Back => back.push(p1),
            }

            let j = (i + 1) % n;
            if sides[j] == Side::On || sides[j] == sides[i] {
                continue;
            }

            // generate the split point
            let p2 = self.points[j];
            let dot = dists[i] / (dists[i] - dists[j]);
            let mut mid = VEC3_ORIGIN;
            for k in 0..3 {
                // avoid roundoff against exactly axial planes
                if normal[k] == 1.0 {
                    mid[k] = dist;
                } else if normal[k] == -1.0 {
                    mid[k] = -dist;
                } else {
                    mid[k] = p1[k] + dot * (p2[k] - p1[k]);
                }
            }
            front.push(mid);
            back.push(mid);
        }

        (
            if front.len() >= 3 { Some(Winding::new(front)) } else { None },
            if back.len() >= 3 { Some(Winding::new(back)) } else { None },
        )
    }

    /// Keeps only the part of the winding in front of the plane.
    pub fn chop(self, normal: &Vec3, dist: f32, epsilon: f32) -> Option<Winding> {
        let (front, _) = self.clip_epsilon(normal, dist, epsilon);
        front
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_square() -> Winding {
        Winding::new(vec![
            [-16.0, -16.0, 0.0],
            [-16.0, 16.0, 0.0],
            [16.0, 16.0, 0.0],
            [16.0, -16.0, 0.0],
        ])
    }

    #[test]
    fn test_base_winding_lies_on_plane() {
        let normal = [0.0, 0.0, 1.0];
        let w = Winding::base_for_plane(&normal, 64.0);
        assert_eq!(w.len(), 4);
        for p in &w.points {
            assert!((dot_product(p, &normal) - 64.0).abs() < 0.01);
        }
    }

    #[test]
    fn test_area_of_square() {
        assert!((unit_square().area() - 1024.0).abs() < 0.01);
    }

    #[test]
    fn test_clip_splits_square() {
        let w = unit_square();
        let (front, back) = w.clip_epsilon(&[1.0, 0.0, 0.0], 0.0, ON_EPSILON);
        let front = front.unwrap();
        let back = back.unwrap();
        assert!((front.area() - 512.0).abs() < 0.1);
        assert!((back.area() - 512.0).abs() < 0.1);
    }

    #[test]
    fn test_clip_all_on_one_side() {
        let w = unit_square();
        let (front, back) = w.clip_epsilon(&[1.0, 0.0, 0.0], -100.0, ON_EPSILON);
        assert!(front.is_some());
        assert!(back.is_none());
    }

    #[test]
    fn test_chop_to_box_matches_area() {
        let mut w = Winding::base_for_plane(&[0.0, 0.0, 1.0], 0.0);
        for (normal, dist) in [
            ([1.0, 0.0, 0.0], 32.0),
            ([-1.0f32, 0.0, 0.0], 32.0),
            ([0.0, 1.0, 0.0], 32.0),
            ([0.0, -1.0, 0.0], 32.0),
        ] {
            w = w.chop(&normal, dist, ON_EPSILON).unwrap();
        }
        assert!((w.area() - 64.0 * 64.0).abs() < 0.1);
    }

    #[test]
    fn test_reverse_keeps_area_flips_plane() {
        let w = unit_square();
        let r = w.reverse();
        assert!((w.area() - r.area()).abs() < 0.001);
        let (n1, _) = w.plane();
        let (n2, _) = r.plane();
        assert!(vector_compare_eps(&n1, &vector_negate(&n2), 0.001));
    }

    #[test]
    fn test_tiny_winding() {
        let w = Winding::new(vec![
            [0.0, 0.0, 0.0],
            [0.05, 0.0, 0.0],
            [0.05, 0.05, 0.0],
        ]);
        assert!(w.is_tiny());
        assert!(!unit_square().is_tiny());
    }

    #[test]
    fn test_fix_degenerate_edges() {
        let mut w = Winding::new(vec![
            [-16.0, -16.0, 0.0],
            [-16.0, 16.0, 0.0],
            [-16.0, 16.0, 0.0],
            [16.0, 16.0, 0.0],
            [16.0, -16.0, 0.0],
        ]);
        assert!(!w.fix_degenerate_edges());
        assert_eq!(w.len(), 4);
    }
}
