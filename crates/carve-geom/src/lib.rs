#![warn(missing_docs)]

//! Scalar and geometric utility types for the carve modelling kernel.
//!
//! Thin wrappers around nalgebra plus the domain types the implicit
//! modeller is built on: intervals, boxes, lines, and planes. A plane
//! doubles as the elementary potential function: its value at a point
//! is the signed distance `n . q + d`.

use nalgebra::{Matrix3, Unit, Vector3};

mod interval;

pub use interval::{s_sqrt, sign, Box3, Interval};

/// The real type used throughout the kernel.
pub type Real = f64;

/// A point in 3D space.
pub type Point3 = nalgebra::Point3<f64>;

/// A vector in 3D space.
pub type Vec3 = Vector3<f64>;

/// A unit (normalized) direction vector in 3D space.
pub type Dir3 = Unit<Vector3<f64>>;

/// Tolerance for geometric coincidence tests.
pub const TOL: f64 = 1e-9;

/// The three coordinate axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    /// The x axis.
    X,
    /// The y axis.
    Y,
    /// The z axis.
    Z,
}

/// Verdict of a tolerant coincidence test between two geometric entities.
///
/// `Opposite` means one entity is the negation of the other (a reversed
/// line, a flipped plane, a negated real). `Shifted` only arises for
/// lines: the infinite lines coincide but the origins differ, which
/// matters to shapes with a distinguished point on their axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coincide {
    /// The entities differ.
    Distinct,
    /// The entities coincide.
    Same,
    /// One entity is the reverse / negation of the other.
    Opposite,
    /// Same infinite line, different origin.
    Shifted,
}

impl Coincide {
    /// True for any verdict other than [`Coincide::Distinct`].
    pub fn related(self) -> bool {
        self != Coincide::Distinct
    }
}

/// Tolerant equality of two reals, also detecting negation.
pub fn same_real(a: Real, b: Real) -> Coincide {
    let scale = 1.0_f64.max(a.abs()).max(b.abs());
    if (a - b).abs() <= TOL * scale {
        Coincide::Same
    } else if (a + b).abs() <= TOL * scale {
        Coincide::Opposite
    } else {
        Coincide::Distinct
    }
}

/// Tolerant equality of two points.
pub fn same_point(a: &Point3, b: &Point3) -> Coincide {
    let scale = 1.0_f64.max(a.coords.norm()).max(b.coords.norm());
    if (a - b).norm() <= TOL * scale {
        Coincide::Same
    } else {
        Coincide::Distinct
    }
}

/// A unit vector perpendicular to `v`.
///
/// The choice is arbitrary but deterministic: the coordinate axis least
/// aligned with `v` is crossed with it.
pub fn right(v: &Vec3) -> Vec3 {
    let ax = v.x.abs();
    let ay = v.y.abs();
    let az = v.z.abs();
    let e = if ax <= ay && ax <= az {
        Vec3::x()
    } else if ay <= az {
        Vec3::y()
    } else {
        Vec3::z()
    };
    v.cross(&e).normalize()
}

/// Rotate a vector about a unit axis direction by `angle` radians.
///
/// Rodrigues' rotation formula, as a 3x3 matrix.
pub fn rotation_matrix(axis: &Vec3, angle: Real) -> Matrix3<f64> {
    let (s, c) = angle.sin_cos();
    let t = 1.0 - c;
    let (x, y, z) = (axis.x, axis.y, axis.z);
    Matrix3::new(
        t * x * x + c,
        t * x * y - s * z,
        t * x * z + s * y,
        t * x * y + s * z,
        t * y * y + c,
        t * y * z - s * x,
        t * x * z - s * y,
        t * y * z + s * x,
        t * z * z + c,
    )
}

/// A line in 3D: a unit direction and an origin point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Line {
    /// Unit direction of the line.
    pub direction: Vec3,
    /// A distinguished point on the line.
    pub origin: Point3,
}

impl Line {
    /// Create a line; the direction is normalized.
    pub fn new(direction: Vec3, origin: Point3) -> Self {
        Self {
            direction: direction.normalize(),
            origin,
        }
    }

    /// The point at parameter `t`: `origin + t * direction`.
    pub fn point(&self, t: Real) -> Point3 {
        self.origin + t * self.direction
    }

    /// Translate the line by `q`.
    pub fn translate(&self, q: &Vec3) -> Self {
        Self {
            direction: self.direction,
            origin: self.origin + q,
        }
    }

    /// Rotate the line about another line by `angle` radians.
    pub fn spin(&self, axis: &Line, angle: Real) -> Self {
        Self {
            direction: spin_vec(&self.direction, axis, angle),
            origin: spin_point(&self.origin, axis, angle),
        }
    }

    /// Reflect the line in a plane.
    pub fn mirror(&self, m: &Plane) -> Self {
        Self {
            direction: mirror_vec(&self.direction, m),
            origin: mirror_point(&self.origin, m),
        }
    }

    /// Scale the line's origin about a point; the direction is unchanged.
    pub fn scale(&self, cen: &Point3, s: Real) -> Self {
        Self {
            direction: self.direction,
            origin: cen + (self.origin - cen) * s,
        }
    }
}

/// Tolerant coincidence of two lines.
///
/// Returns `Shifted` when the infinite lines coincide but the origins
/// differ; the direction sense is then immaterial.
pub fn same_line(a: &Line, b: &Line) -> Coincide {
    let dot = a.direction.dot(&b.direction);
    if dot.abs() < 1.0 - TOL {
        return Coincide::Distinct;
    }
    // b's origin must lie on a's infinite line.
    let off = b.origin - a.origin;
    let across = off - a.direction * off.dot(&a.direction);
    let scale = 1.0_f64.max(off.norm());
    if across.norm() > TOL * scale {
        return Coincide::Distinct;
    }
    if same_point(&a.origin, &b.origin) == Coincide::Same {
        if dot > 0.0 {
            Coincide::Same
        } else {
            Coincide::Opposite
        }
    } else {
        Coincide::Shifted
    }
}

/// Rotate a point about a line by `angle` radians.
pub fn spin_point(p: &Point3, axis: &Line, angle: Real) -> Point3 {
    let m = rotation_matrix(&axis.direction, angle);
    axis.origin + m * (p - axis.origin)
}

/// Rotate a free vector about a line's direction by `angle` radians.
pub fn spin_vec(v: &Vec3, axis: &Line, angle: Real) -> Vec3 {
    rotation_matrix(&axis.direction, angle) * v
}

/// Reflect a point in a plane.
pub fn mirror_point(p: &Point3, m: &Plane) -> Point3 {
    p - 2.0 * m.value(p) * m.normal
}

/// Reflect a free vector in a plane.
pub fn mirror_vec(v: &Vec3, m: &Plane) -> Vec3 {
    v - 2.0 * v.dot(&m.normal) * m.normal
}

/// An oriented plane: unit normal `n` and signed offset `d`.
///
/// The potential at a point `q` is `n . q + d`; negative on the side the
/// normal points away from, which the kernel treats as solid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    /// Unit normal.
    pub normal: Vec3,
    /// Signed offset: the plane is `normal . q + d = 0`.
    pub d: Real,
}

impl Plane {
    /// Plane with the given normal passing through `through`.
    pub fn new(normal: Vec3, through: &Point3) -> Self {
        let n = normal.normalize();
        Self {
            normal: n,
            d: -n.dot(&through.coords),
        }
    }

    /// Plane from raw coefficients `a x + b y + c z + d = 0`, normalized.
    pub fn from_coefficients(a: Real, b: Real, c: Real, d: Real) -> Self {
        let n = Vec3::new(a, b, c);
        let m = n.norm();
        Self {
            normal: n / m,
            d: d / m,
        }
    }

    /// Signed distance of `q` from the plane.
    pub fn value(&self, q: &Point3) -> Real {
        self.normal.dot(&q.coords) + self.d
    }

    /// Range of the potential over a box.
    pub fn range(&self, b: &Box3) -> Interval {
        b.x * self.normal.x + b.y * self.normal.y + b.z * self.normal.z + self.d
    }

    /// Translate the plane by `q`.
    pub fn translate(&self, q: &Vec3) -> Self {
        Self {
            normal: self.normal,
            d: self.d - self.normal.dot(q),
        }
    }

    /// Rotate the plane about a line by `angle` radians.
    pub fn spin(&self, axis: &Line, angle: Real) -> Self {
        let foot = Point3::from(-self.d * self.normal);
        let n = spin_vec(&self.normal, axis, angle);
        Plane::new(n, &spin_point(&foot, axis, angle))
    }

    /// Reflect the plane in another plane.
    pub fn mirror(&self, m: &Plane) -> Self {
        let foot = Point3::from(-self.d * self.normal);
        let n = mirror_vec(&self.normal, m);
        Plane::new(n, &mirror_point(&foot, m))
    }

    /// Scale the plane's zero set about a point by factor `s`.
    ///
    /// The normal is unchanged; only the offset moves. Note this does
    /// not rescale the potential; the caller owns that.
    pub fn scale(&self, cen: &Point3, s: Real) -> Self {
        Self {
            normal: self.normal,
            d: s * self.d + (s - 1.0) * self.normal.dot(&cen.coords),
        }
    }
}

impl std::ops::Neg for Plane {
    type Output = Plane;
    fn neg(self) -> Plane {
        Plane {
            normal: -self.normal,
            d: -self.d,
        }
    }
}

/// Tolerant coincidence of two planes, detecting flipped orientation.
pub fn same_plane(a: &Plane, b: &Plane) -> Coincide {
    let scale = 1.0_f64.max(a.d.abs()).max(b.d.abs());
    if (a.normal - b.normal).norm() <= TOL && (a.d - b.d).abs() <= TOL * scale {
        Coincide::Same
    } else if (a.normal + b.normal).norm() <= TOL && (a.d + b.d).abs() <= TOL * scale {
        Coincide::Opposite
    } else {
        Coincide::Distinct
    }
}

/// The intersection line of two planes, if they are not parallel.
pub fn planes_line(a: &Plane, b: &Plane) -> Option<Line> {
    let dir = a.normal.cross(&b.normal);
    if dir.norm() < TOL {
        return None;
    }
    let dir = dir.normalize();
    // Solve for the point on both planes closest to the origin of the
    // pencil: add the constraint dir . p = 0 to pin the third degree of
    // freedom.
    let m = Matrix3::from_rows(&[
        a.normal.transpose(),
        b.normal.transpose(),
        dir.transpose(),
    ]);
    let rhs = Vec3::new(-a.d, -b.d, 0.0);
    let p = m.lu().solve(&rhs)?;
    Some(Line {
        direction: dir,
        origin: Point3::from(p),
    })
}

/// The common point of three planes, if they meet in one.
pub fn planes_point(a: &Plane, b: &Plane, c: &Plane) -> Option<Point3> {
    let m = Matrix3::from_rows(&[
        a.normal.transpose(),
        b.normal.transpose(),
        c.normal.transpose(),
    ]);
    let rhs = Vec3::new(-a.d, -b.d, -c.d);
    m.lu().solve(&rhs).map(Point3::from)
}

/// Parameter of the point where a line pierces a plane.
///
/// `None` when the line is parallel to the plane.
pub fn plane_line_t(f: &Plane, l: &Line) -> Option<Real> {
    let denom = f.normal.dot(&l.direction);
    if denom.abs() < TOL {
        None
    } else {
        Some(-f.value(&l.origin) / denom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    #[test]
    fn test_plane_value_signs() {
        let f = Plane::new(Vec3::x(), &Point3::origin());
        assert!((f.value(&Point3::new(-1.0, 5.0, 9.0)) - (-1.0)).abs() < 1e-12);
        assert!((f.value(&Point3::new(3.0, 0.0, 0.0)) - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_plane_translate() {
        let f = Plane::new(Vec3::x(), &Point3::origin());
        let g = f.translate(&Vec3::new(2.0, 0.0, 0.0));
        assert!((g.value(&Point3::new(1.0, 0.0, 0.0)) - (-1.0)).abs() < 1e-12);
        assert!(g.value(&Point3::new(2.0, 7.0, -3.0)).abs() < 1e-12);
    }

    #[test]
    fn test_plane_spin() {
        // Spin the x=0 plane a quarter turn about the z axis: y=0 plane.
        let f = Plane::new(Vec3::x(), &Point3::origin());
        let z = Line::new(Vec3::z(), Point3::origin());
        let g = f.spin(&z, PI / 2.0);
        assert!(g.value(&Point3::new(9.0, 0.0, 1.0)).abs() < 1e-12);
        assert!((g.value(&Point3::new(0.0, 2.0, 0.0)) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_plane_mirror() {
        let f = Plane::new(Vec3::x(), &Point3::new(1.0, 0.0, 0.0));
        let m = Plane::new(Vec3::x(), &Point3::origin());
        let g = f.mirror(&m);
        // x - 1 = 0 reflected in x = 0 is -x - 1 = 0.
        assert!(g.value(&Point3::new(-1.0, 3.0, 0.0)).abs() < 1e-12);
        assert!(g.value(&Point3::new(0.0, 0.0, 0.0)) < 0.0);
    }

    #[test]
    fn test_plane_scale_moves_zero_set() {
        let f = Plane::new(Vec3::x(), &Point3::new(1.0, 0.0, 0.0));
        let g = f.scale(&Point3::origin(), 3.0);
        assert!(g.value(&Point3::new(3.0, 0.0, 0.0)).abs() < 1e-12);
    }

    #[test]
    fn test_mirror_point_involution() {
        let m = Plane::new(Vec3::new(1.0, 1.0, 0.0), &Point3::new(0.0, 1.0, 0.0));
        let p = Point3::new(3.0, -2.0, 5.0);
        let q = mirror_point(&mirror_point(&p, &m), &m);
        assert!((p - q).norm() < 1e-12);
    }

    #[test]
    fn test_spin_point_quarter_turn() {
        let z = Line::new(Vec3::z(), Point3::origin());
        let p = spin_point(&Point3::new(1.0, 0.0, 0.0), &z, PI / 2.0);
        assert!(p.x.abs() < 1e-12);
        assert!((p.y - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_planes_line_axes() {
        let fx = Plane::new(Vec3::x(), &Point3::origin());
        let fy = Plane::new(Vec3::y(), &Point3::origin());
        let l = planes_line(&fx, &fy).unwrap();
        // x = 0 and y = 0 meet in the z axis.
        assert!(l.direction.x.abs() < 1e-12);
        assert!(l.direction.y.abs() < 1e-12);
        assert!(l.origin.coords.norm() < 1e-12);
    }

    #[test]
    fn test_planes_point() {
        let fx = Plane::new(Vec3::x(), &Point3::new(1.0, 0.0, 0.0));
        let fy = Plane::new(Vec3::y(), &Point3::new(0.0, 2.0, 0.0));
        let fz = Plane::new(Vec3::z(), &Point3::new(0.0, 0.0, 3.0));
        let p = planes_point(&fx, &fy, &fz).unwrap();
        assert!((p - Point3::new(1.0, 2.0, 3.0)).norm() < 1e-12);
    }

    #[test]
    fn test_plane_line_t() {
        let f = Plane::new(Vec3::x(), &Point3::new(4.0, 0.0, 0.0));
        let l = Line::new(Vec3::x(), Point3::origin());
        let t = plane_line_t(&f, &l).unwrap();
        assert!((t - 4.0).abs() < 1e-12);
        let parallel = Line::new(Vec3::y(), Point3::origin());
        assert!(plane_line_t(&f, &parallel).is_none());
    }

    #[test]
    fn test_same_line_verdicts() {
        let a = Line::new(Vec3::z(), Point3::origin());
        assert_eq!(same_line(&a, &a), Coincide::Same);
        let rev = Line::new(-Vec3::z(), Point3::origin());
        assert_eq!(same_line(&a, &rev), Coincide::Opposite);
        let shifted = Line::new(Vec3::z(), Point3::new(0.0, 0.0, 5.0));
        assert_eq!(same_line(&a, &shifted), Coincide::Shifted);
        let other = Line::new(Vec3::z(), Point3::new(1.0, 0.0, 0.0));
        assert_eq!(same_line(&a, &other), Coincide::Distinct);
    }

    #[test]
    fn test_same_real() {
        assert_eq!(same_real(2.0, 2.0), Coincide::Same);
        assert_eq!(same_real(2.0, -2.0), Coincide::Opposite);
        assert_eq!(same_real(2.0, 2.5), Coincide::Distinct);
    }

    #[test]
    fn test_right_perpendicular() {
        for v in [
            Vec3::new(1.0, 2.0, 3.0),
            Vec3::x(),
            Vec3::new(0.0, 0.0, -2.0),
        ] {
            let r = right(&v);
            assert!(v.dot(&r).abs() < 1e-12);
            assert!((r.norm() - 1.0).abs() < 1e-12);
        }
    }
}
