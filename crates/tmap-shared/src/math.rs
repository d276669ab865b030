// math.rs -- vector and plane helpers shared by every compiler stage

pub type Vec3 = [f32; 3];

pub const VEC3_ORIGIN: Vec3 = [0.0, 0.0, 0.0];

/// Planes parallel to a coordinate axis get one of the fast types;
/// everything else is classified by its dominant normal component.
pub const PLANE_X: u8 = 0;
pub const PLANE_Y: u8 = 1;
pub const PLANE_Z: u8 = 2;
pub const PLANE_ANY_X: u8 = 3;
pub const PLANE_ANY_Y: u8 = 4;
pub const PLANE_ANY_Z: u8 = 5;

pub const PSIDE_FRONT: u8 = 1;
pub const PSIDE_BACK: u8 = 2;
pub const PSIDE_BOTH: u8 = PSIDE_FRONT | PSIDE_BACK;
/// A brush side lies exactly on the plane being tested.
pub const PSIDE_FACING: u8 = 4;

pub const NORMAL_EPSILON: f32 = 0.00001;
pub const DIST_EPSILON: f32 = 0.01;
pub const EQUAL_EPSILON: f32 = 0.001;
pub const ON_EPSILON: f32 = 0.1;

#[inline]
pub fn dot_product(a: &Vec3, b: &Vec3) -> f32 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

#[inline]
pub fn vector_add(a: &Vec3, b: &Vec3) -> Vec3 {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

#[inline]
pub fn vector_subtract(a: &Vec3, b: &Vec3) -> Vec3 {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

#[inline]
pub fn vector_scale(a: &Vec3, s: f32) -> Vec3 {
    [a[0] * s, a[1] * s, a[2] * s]
}

/// a + s * b
#[inline]
pub fn vector_ma(a: &Vec3, s: f32, b: &Vec3) -> Vec3 {
    [a[0] + s * b[0], a[1] + s * b[1], a[2] + s * b[2]]
}

#[inline]
pub fn vector_negate(a: &Vec3) -> Vec3 {
    [-a[0], -a[1], -a[2]]
}

#[inline]
pub fn cross_product(a: &Vec3, b: &Vec3) -> Vec3 {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

#[inline]
pub fn vector_length(a: &Vec3) -> f32 {
    dot_product(a, a).sqrt()
}

/// Normalizes in place and returns the original length.
pub fn vector_normalize(v: &mut Vec3) -> f32 {
    let len = vector_length(v);
    if len > 0.0 {
        let inv = 1.0 / len;
        v[0] *= inv;
        v[1] *= inv;
        v[2] *= inv;
    }
    len
}

#[inline]
pub fn vector_mid(mins: &Vec3, maxs: &Vec3) -> Vec3 {
    [
        (mins[0] + maxs[0]) * 0.5,
        (mins[1] + maxs[1]) * 0.5,
        (mins[2] + maxs[2]) * 0.5,
    ]
}

pub fn vector_compare_eps(a: &Vec3, b: &Vec3, eps: f32) -> bool {
    (a[0] - b[0]).abs() < eps && (a[1] - b[1]).abs() < eps && (a[2] - b[2]).abs() < eps
}

/// Axis-aligned bounding box accumulated from points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub mins: Vec3,
    pub maxs: Vec3,
}

impl Bounds {
    pub const EMPTY: Bounds = Bounds {
        mins: [99999.0, 99999.0, 99999.0],
        maxs: [-99999.0, -99999.0, -99999.0],
    };

    pub fn new() -> Self {
        Self::EMPTY
    }

    pub fn from_points(mins: Vec3, maxs: Vec3) -> Self {
        Bounds { mins, maxs }
    }

    pub fn add_point(&mut self, p: &Vec3) {
        for i in 0..3 {
            if p[i] < self.mins[i] {
                self.mins[i] = p[i];
            }
            if p[i] > self.maxs[i] {
                self.maxs[i] = p[i];
            }
        }
    }

    pub fn add_bounds(&mut self, other: &Bounds) {
        self.add_point(&other.mins);
        self.add_point(&other.maxs);
    }

    pub fn is_empty(&self) -> bool {
        self.mins[0] > self.maxs[0]
    }

    pub fn center(&self) -> Vec3 {
        vector_mid(&self.mins, &self.maxs)
    }

    /// Strict box-box overlap; touching boxes do not intersect.
    pub fn intersects(&self, other: &Bounds) -> bool {
        for i in 0..3 {
            if self.mins[i] >= other.maxs[i] || self.maxs[i] <= other.mins[i] {
                return false;
            }
        }
        true
    }
}

impl Default for Bounds {
    fn default() -> Self {
        Self::EMPTY
    }
}

/// Rounds to the nearest integer, halfway cases away from zero.
#[inline]
pub fn rint(v: f32) -> f32 {
    v.round()
}

pub fn plane_type_for_normal(normal: &Vec3) -> u8 {
    if normal[0] == 1.0 || normal[0] == -1.0 {
        return PLANE_X;
    }
    if normal[1] == 1.0 || normal[1] == -1.0 {
        return PLANE_Y;
    }
    if normal[2] == 1.0 || normal[2] == -1.0 {
        return PLANE_Z;
    }

    let ax = normal[0].abs();
    let ay = normal[1].abs();
    let az = normal[2].abs();
    if ax >= ay && ax >= az {
        PLANE_ANY_X
    } else if ay >= ax && ay >= az {
        PLANE_ANY_Y
    } else {
        PLANE_ANY_Z
    }
}

#[inline]
pub fn plane_is_axial(plane_type: u8) -> bool {
    plane_type <= PLANE_Z
}

/// Snaps a normal to axial if it is within NORMAL_EPSILON of an axis.
/// Returns true if the vector was snapped.
pub fn snap_vector(normal: &mut Vec3) -> bool {
    for i in 0..3 {
        if (normal[i] - 1.0).abs() < NORMAL_EPSILON {
            *normal = VEC3_ORIGIN;
            normal[i] = 1.0;
            return true;
        }
        if (normal[i] + 1.0).abs() < NORMAL_EPSILON {
            *normal = VEC3_ORIGIN;
            normal[i] = -1.0;
            return true;
        }
    }
    false
}

/// Coarse box-side classification against a plane, using the standard
/// signpoint acceleration for axial planes.
pub fn box_on_plane_side(mins: &Vec3, maxs: &Vec3, normal: &Vec3, dist: f32, plane_type: u8) -> u8 {
    // fast axial cases
    if plane_type <= PLANE_Z {
        let t = plane_type as usize;
        let mut sides = 0;
        if dist - ON_EPSILON < maxs[t] {
            sides |= PSIDE_FRONT;
        }
        if dist + ON_EPSILON > mins[t] {
            sides |= PSIDE_BACK;
        }
        return sides;
    }

    // general case: project the box extents on the normal
    let mut corners = [[0.0f32; 3]; 2];
    for i in 0..3 {
        if normal[i] < 0.0 {
            corners[0][i] = mins[i];
            corners[1][i] = maxs[i];
        } else {
            corners[1][i] = mins[i];
            corners[0][i] = maxs[i];
        }
    }

    let dist1 = dot_product(normal, &corners[0]) - dist;
    let dist2 = dot_product(normal, &corners[1]) - dist;
    let mut sides = 0;
    if dist1 >= ON_EPSILON {
        sides = PSIDE_FRONT;
    }
    if dist2 < ON_EPSILON {
        sides |= PSIDE_BACK;
    }
    sides
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plane_type_classification() {
        assert_eq!(plane_type_for_normal(&[1.0, 0.0, 0.0]), PLANE_X);
        assert_eq!(plane_type_for_normal(&[0.0, -1.0, 0.0]), PLANE_Y);
        assert_eq!(plane_type_for_normal(&[0.0, 0.0, 1.0]), PLANE_Z);
        let mut n = [0.7, 0.7, 0.14];
        vector_normalize(&mut n);
        assert_eq!(plane_type_for_normal(&n), PLANE_ANY_X);
    }

    #[test]
    fn test_snap_vector() {
        let mut v = [0.999999, 0.0000004, -0.0000004];
        assert!(snap_vector(&mut v));
        assert_eq!(v, [1.0, 0.0, 0.0]);

        let mut v = [0.7, 0.7, 0.14];
        assert!(!snap_vector(&mut v));
    }

    #[test]
    fn test_box_on_plane_side() {
        let mins = [-16.0, -16.0, -16.0];
        let maxs = [16.0, 16.0, 16.0];
        assert_eq!(
            box_on_plane_side(&mins, &maxs, &[1.0, 0.0, 0.0], 32.0, PLANE_X),
            PSIDE_BACK
        );
        assert_eq!(
            box_on_plane_side(&mins, &maxs, &[1.0, 0.0, 0.0], -32.0, PLANE_X),
            PSIDE_FRONT
        );
        assert_eq!(
            box_on_plane_side(&mins, &maxs, &[1.0, 0.0, 0.0], 0.0, PLANE_X),
            PSIDE_BOTH
        );
    }

    #[test]
    fn test_bounds_accumulate() {
        let mut b = Bounds::new();
        assert!(b.is_empty());
        b.add_point(&[1.0, 2.0, 3.0]);
        b.add_point(&[-1.0, 0.0, 5.0]);
        assert_eq!(b.mins, [-1.0, 0.0, 3.0]);
        assert_eq!(b.maxs, [1.0, 2.0, 5.0]);
        assert_eq!(b.center(), [0.0, 1.0, 4.0]);
    }
}
