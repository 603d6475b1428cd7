//! Conservative structural equality, shape-parameter recovery, and the
//! scale-stripping normalisation they share.
//!
//! [`same`] answers whether two primitives denote the same point set:
//! identical, complements of each other, or one the absolute value of
//! the other. It never claims a relation that does not hold; deeply
//! different expressions of the same function may go unrecognised.

use carve_geom::{
    plane_line_t, planes_line, planes_point, same_line, same_plane, same_point, same_real, Box3,
    Coincide, Line, Plane, Point3, Real,
};
use log::{error, warn};
use thiserror::Error;

use crate::{Kind, Op, Primitive};

/// Structural-corruption errors from walking canonical shape expressions.
#[derive(Error, Debug)]
pub enum PrimError {
    /// A named-shape expression did not have its canonical structure.
    #[error("malformed {shape} expression: {detail}")]
    CorruptShape {
        /// Which shape recovery failed.
        shape: &'static str,
        /// What was wrong.
        detail: &'static str,
    },
}

/// How a recovered named shape is wrapped.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Wrap {
    /// The bare shape.
    Identity,
    /// The complement of the shape (a hollow solid).
    Complement,
    /// A plane scaled by the carried factor.
    Scaled(Real),
    /// The absolute value of the shape (a thin sheet).
    Abs,
    /// The signed square root of the shape.
    Ssqrt,
    /// The sign of the shape.
    Sign,
}

/// Constructor data recovered from a canonical shape expression.
#[derive(Debug, Clone, Copy)]
pub enum Shape {
    /// A constant.
    Real(Real),
    /// A half-space.
    Plane(Plane),
    /// An axis-aligned cuboid.
    Block(Box3),
    /// A sphere.
    Sphere {
        /// Centre point.
        centre: Point3,
        /// Radius.
        radius: Real,
    },
    /// An infinite cylinder.
    Cylinder {
        /// Axis line.
        axis: Line,
        /// Radius.
        radius: Real,
    },
    /// A double cone.
    Cone {
        /// Axis line; the origin is the apex.
        axis: Line,
        /// Included angle.
        angle: Real,
    },
    /// A torus.
    Torus {
        /// Axis line; the origin is the centre.
        axis: Line,
        /// Major (spine) radius.
        major: Real,
        /// Minor (tube) radius.
        minor: Real,
    },
    /// A ring cyclide.
    Cyclide {
        /// Axis line; the origin is the centre.
        axis: Line,
        /// A point fixing the symmetry plane.
        sym: Point3,
        /// The `a` constant.
        a: Real,
        /// The `m` constant.
        m: Real,
        /// The `c` constant.
        c: Real,
    },
    /// No recoverable shape.
    General,
    /// A user primitive with the given tag.
    User(i32),
}

/// Verdict of [`same`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameAs {
    /// Unrelated (or not provably related).
    Distinct,
    /// Set-theoretically identical.
    Same,
    /// One is the complement of the other.
    Complement,
    /// One is the absolute value of the other.
    Abs,
}

/// Strip wrappers that preserve the zero set and sign: positive real
/// scalings, division by reals, odd integer powers, signed square
/// roots, and sign. Negative scalings re-emerge as a complement.
pub fn dump_scales(p: &Primitive) -> Primitive {
    match p.op() {
        Some(Op::Times) => {
            let a = p.child_1().expect("times has children");
            let b = p.child_2().expect("times has children");
            if let Some(r) = a.as_real() {
                let inner = dump_scales(&b);
                return if r < 0.0 { -&inner } else { inner };
            }
            if let Some(r) = b.as_real() {
                let inner = dump_scales(&a);
                return if r < 0.0 { -&inner } else { inner };
            }
            p.clone()
        }
        Some(Op::Divide) => {
            let a = p.child_1().expect("divide has children");
            let b = p.child_2().expect("divide has children");
            match b.as_real() {
                Some(r) => {
                    let inner = dump_scales(&a);
                    if r < 0.0 {
                        -&inner
                    } else {
                        inner
                    }
                }
                None => {
                    warn!("dump_scales: rational primitive");
                    p.clone()
                }
            }
        }
        Some(Op::Pow) => {
            let b = p.child_2().expect("pow has children");
            let n = b.as_real().map(|r| r.round() as i64).unwrap_or(0);
            if n % 2 != 0 {
                dump_scales(&p.child_1().expect("pow has children"))
            } else {
                p.clone()
            }
        }
        Some(Op::Ssqrt) | Some(Op::Sign) => {
            dump_scales(&p.child_1().expect("monadic has a child"))
        }
        _ => p.clone(),
    }
}

/// Follow a path of child indices (1 or 2) down an expression.
fn walk(p: &Primitive, path: &[u8], shape: &'static str) -> Result<Primitive, PrimError> {
    let mut cur = p.clone();
    for step in path {
        let next = match step {
            1 => cur.child_1(),
            _ => cur.child_2(),
        };
        cur = next.ok_or(PrimError::CorruptShape {
            shape,
            detail: "expression too shallow",
        })?;
    }
    Ok(cur)
}

fn plane_at(p: &Primitive, path: &[u8], shape: &'static str) -> Result<Plane, PrimError> {
    walk(p, path, shape)?.flat().ok_or(PrimError::CorruptShape {
        shape,
        detail: "expected a plane leaf",
    })
}

fn real_at(p: &Primitive, path: &[u8], shape: &'static str) -> Result<Real, PrimError> {
    walk(p, path, shape)?.as_real().ok_or(PrimError::CorruptShape {
        shape,
        detail: "expected a real leaf",
    })
}

fn radius_of(r2: Real, shape: &'static str) -> Result<Real, PrimError> {
    if r2 < 0.0 {
        Err(PrimError::CorruptShape {
            shape,
            detail: "negative squared radius",
        })
    } else {
        Ok(r2.sqrt())
    }
}

/// Recover the constructor arguments of a named shape, and how the
/// expression wraps it (complemented, scaled, thinned by `abs`,
/// square-rooted, or signed).
pub fn parameters(p: &Primitive) -> Result<(Wrap, Shape), PrimError> {
    if let Some(op) = p.op() {
        if matches!(op, Op::Abs | Op::Ssqrt | Op::Comp | Op::Sign) {
            let child = p.child_1().expect("monadic node has a child");
            let (inner, shape) = parameters(&child)?;
            let outer = match op {
                Op::Abs => Wrap::Abs,
                Op::Comp => Wrap::Complement,
                Op::Ssqrt => Wrap::Ssqrt,
                _ => Wrap::Sign,
            };
            let w = match inner {
                Wrap::Abs => Wrap::Abs,
                Wrap::Complement => {
                    if op == Op::Abs {
                        Wrap::Abs
                    } else {
                        Wrap::Complement
                    }
                }
                _ => outer,
            };
            return Ok((w, shape));
        }
        // A scaled plane: real * plane in either order.
        if op == Op::Times {
            let a = p.child_1().expect("times has children");
            let b = p.child_2().expect("times has children");
            if let (Some(r), Some(f)) = (a.as_real(), b.flat()) {
                return Ok((Wrap::Scaled(r), Shape::Plane(f)));
            }
            if let (Some(f), Some(r)) = (a.flat(), b.as_real()) {
                return Ok((Wrap::Scaled(r), Shape::Plane(f)));
            }
        }
    }

    match p.kind() {
        Kind::Real => Ok((
            Wrap::Identity,
            Shape::Real(p.as_real().unwrap_or_default()),
        )),
        Kind::Plane => Ok((
            Wrap::Identity,
            Shape::Plane(p.flat().ok_or(PrimError::CorruptShape {
                shape: "plane",
                detail: "plane kind without a plane leaf",
            })?),
        )),
        Kind::Block => Ok((
            Wrap::Identity,
            Shape::Block(p.block_box().ok_or(PrimError::CorruptShape {
                shape: "block",
                detail: "block kind without a box leaf",
            })?),
        )),
        Kind::User(tag) => Ok((Wrap::Identity, Shape::User(tag))),
        Kind::General => Ok((Wrap::Identity, Shape::General)),
        Kind::Sphere => {
            const S: &str = "sphere";
            let f1 = plane_at(p, &[1, 1, 1, 1], S)?;
            let f2 = plane_at(p, &[1, 1, 2, 1], S)?;
            let f3 = plane_at(p, &[1, 2, 1], S)?;
            let centre = planes_point(&f1, &f2, &f3).ok_or(PrimError::CorruptShape {
                shape: S,
                detail: "centre planes do not meet",
            })?;
            let radius = radius_of(real_at(p, &[2], S)?, S)?;
            Ok((Wrap::Identity, Shape::Sphere { centre, radius }))
        }
        Kind::Cylinder => {
            const S: &str = "cylinder";
            let f1 = plane_at(p, &[1, 1, 1], S)?;
            let f2 = plane_at(p, &[1, 2, 1], S)?;
            let axis = planes_line(&f1, &f2).ok_or(PrimError::CorruptShape {
                shape: S,
                detail: "axis planes are parallel",
            })?;
            let radius = radius_of(real_at(p, &[2], S)?, S)?;
            Ok((Wrap::Identity, Shape::Cylinder { axis, radius }))
        }
        Kind::Cone => {
            const S: &str = "cone";
            let f1 = plane_at(p, &[1, 1, 1], S)?;
            let f2 = plane_at(p, &[1, 2, 1], S)?;
            let mut axis = planes_line(&f1, &f2).ok_or(PrimError::CorruptShape {
                shape: S,
                detail: "axis planes are parallel",
            })?;
            let f3 = plane_at(p, &[2, 1, 1], S)?;
            let t = plane_line_t(&f3, &axis).ok_or(PrimError::CorruptShape {
                shape: S,
                detail: "apex plane parallel to axis",
            })?;
            axis.origin = axis.point(t);
            let rfac = real_at(p, &[2, 1, 2], S)?;
            Ok((
                Wrap::Identity,
                Shape::Cone {
                    axis,
                    angle: 2.0 * rfac.atan(),
                },
            ))
        }
        Kind::Torus => {
            const S: &str = "torus";
            let f1 = plane_at(p, &[1, 2, 1, 1, 1, 2, 1], S)?;
            let f2 = plane_at(p, &[1, 2, 1, 1, 1, 1, 1], S)?;
            let mut axis = planes_line(&f1, &f2).ok_or(PrimError::CorruptShape {
                shape: S,
                detail: "axis planes are parallel",
            })?;
            let f3 = plane_at(p, &[1, 1, 1], S)?;
            let t = plane_line_t(&f3, &axis).ok_or(PrimError::CorruptShape {
                shape: S,
                detail: "centre plane parallel to axis",
            })?;
            axis.origin = axis.point(t);
            let major = real_at(p, &[1, 2, 1, 2], S)?;
            let minor = radius_of(real_at(p, &[2], S)?, S)?;
            Ok((
                Wrap::Identity,
                Shape::Torus {
                    axis,
                    major,
                    minor,
                },
            ))
        }
        Kind::Cyclide => {
            const S: &str = "cyclide";
            let f1 = plane_at(p, &[1, 1, 1, 1, 1, 1, 1], S)?;
            let f2 = plane_at(p, &[1, 1, 1, 1, 1, 2, 1], S)?;
            let mut axis = planes_line(&f1, &f2).ok_or(PrimError::CorruptShape {
                shape: S,
                detail: "axis planes are parallel",
            })?;
            let f3 = plane_at(p, &[1, 1, 1, 1, 2, 1], S)?;
            let t = plane_line_t(&f3, &axis).ok_or(PrimError::CorruptShape {
                shape: S,
                detail: "centre plane parallel to axis",
            })?;
            axis.origin = axis.point(t);
            let sym = axis.origin + f2.normal;
            let quarter = real_at(p, &[2, 1], S)? * 0.25;
            let b2m2 = real_at(p, &[1, 1, 1, 2], S)?;
            let a = real_at(p, &[1, 2, 1, 1, 1], S)? * 0.5;
            let m = radius_of(quarter - b2m2, S)?;
            let c = radius_of(quarter - a * a, S)?;
            Ok((
                Wrap::Identity,
                Shape::Cyclide { axis, sym, a, m, c },
            ))
        }
    }
}

fn coincide_to_same(c: Coincide) -> SameAs {
    match c {
        Coincide::Same => SameAs::Same,
        Coincide::Opposite => SameAs::Complement,
        _ => SameAs::Distinct,
    }
}

fn same_interval_bound(a: Real, b: Real) -> bool {
    same_real(a, b) == Coincide::Same
}

/// Are two primitives the same point set?
///
/// Identical handles are trivially the same; otherwise both sides are
/// normalised by [`dump_scales`], recovered by [`parameters`], and
/// compared by kind and geometric data, recursing structurally through
/// general interior nodes (with the operand swap tried for the
/// commutative operators).
pub fn same(aa: &Primitive, bb: &Primitive) -> SameAs {
    if aa == bb {
        return SameAs::Same;
    }

    let a = dump_scales(aa);
    let b = dump_scales(bb);
    if a == b {
        return SameAs::Same;
    }

    let (wa, sa) = match parameters(&a) {
        Ok(v) => v,
        Err(e) => {
            error!("same: {e}");
            return SameAs::Distinct;
        }
    };
    let (wb, sb) = match parameters(&b) {
        Ok(v) => v,
        Err(e) => {
            error!("same: {e}");
            return SameAs::Distinct;
        }
    };

    let verdict = match (&sa, &sb) {
        (Shape::Real(x), Shape::Real(y)) => coincide_to_same(same_real(*x, *y)),
        (Shape::Plane(f), Shape::Plane(g)) => coincide_to_same(same_plane(f, g)),
        (Shape::Block(x), Shape::Block(y)) => {
            let bounds = [
                (x.x.lo, y.x.lo),
                (x.x.hi, y.x.hi),
                (x.y.lo, y.y.lo),
                (x.y.hi, y.y.hi),
                (x.z.lo, y.z.lo),
                (x.z.hi, y.z.hi),
            ];
            if bounds.iter().all(|(p, q)| same_interval_bound(*p, *q)) {
                SameAs::Same
            } else {
                SameAs::Distinct
            }
        }
        (
            Shape::Sphere { centre: ca, radius: ra },
            Shape::Sphere { centre: cb, radius: rb },
        ) => {
            if same_point(ca, cb) == Coincide::Same && same_real(*ra, *rb) == Coincide::Same {
                SameAs::Same
            } else {
                SameAs::Distinct
            }
        }
        (
            Shape::Cylinder { axis: xa, radius: ra },
            Shape::Cylinder { axis: xb, radius: rb },
        ) => {
            // Any coincident infinite axis will do: a cylinder has no
            // distinguished point or sense along its axis.
            if same_line(xa, xb).related() && same_real(*ra, *rb) == Coincide::Same {
                SameAs::Same
            } else {
                SameAs::Distinct
            }
        }
        (Shape::Cone { axis: xa, angle: ga }, Shape::Cone { axis: xb, angle: gb }) => {
            // A double cone survives axis reversal but not an apex shift.
            let ax = same_line(xa, xb);
            if matches!(ax, Coincide::Same | Coincide::Opposite)
                && same_real(*ga, *gb) == Coincide::Same
            {
                SameAs::Same
            } else {
                SameAs::Distinct
            }
        }
        (
            Shape::Torus { axis: xa, major: ra, minor: sa_ },
            Shape::Torus { axis: xb, major: rb, minor: sb_ },
        ) => {
            let ax = same_line(xa, xb);
            if matches!(ax, Coincide::Same | Coincide::Opposite)
                && same_real(*ra, *rb) == Coincide::Same
                && same_real(*sa_, *sb_) == Coincide::Same
            {
                SameAs::Same
            } else {
                SameAs::Distinct
            }
        }
        (
            Shape::Cyclide { axis: xa, a: aa_, m: ma, c: ca, .. },
            Shape::Cyclide { axis: xb, a: ab_, m: mb, c: cb, .. },
        ) => {
            let ax = same_line(xa, xb);
            if matches!(ax, Coincide::Same | Coincide::Opposite)
                && same_real(*aa_, *ab_) == Coincide::Same
                && same_real(*ma, *mb) == Coincide::Same
                && same_real(*ca, *cb) == Coincide::Same
            {
                SameAs::Same
            } else {
                SameAs::Distinct
            }
        }
        (Shape::User(x), Shape::User(y)) => {
            // A user tag fully determines the potential.
            if x == y {
                SameAs::Same
            } else {
                SameAs::Distinct
            }
        }
        (Shape::General, Shape::General) => general_same(&a, &b),
        _ => return SameAs::Distinct,
    };

    combine_wraps(wa, wb, verdict)
}

/// Structural comparison of general interior nodes with matching
/// operators. The child-verdict combination is per-operator: a sum of
/// complements is a complement, a product of complements is not.
fn general_same(a: &Primitive, b: &Primitive) -> SameAs {
    let (op_a, op_b) = match (a.op(), b.op()) {
        (Some(x), Some(y)) => (x, y),
        _ => return SameAs::Distinct,
    };
    if op_a != op_b {
        return SameAs::Distinct;
    }

    if op_a.diadic() {
        let a1 = a.child_1().expect("diadic children");
        let a2 = a.child_2().expect("diadic children");
        let b1 = b.child_1().expect("diadic children");
        let b2 = b.child_2().expect("diadic children");

        let mut v1 = same(&a1, &b1);
        let mut flip = false;
        if v1 == SameAs::Distinct && matches!(op_a, Op::Plus | Op::Times) {
            v1 = same(&a1, &b2);
            flip = true;
        }
        if v1 == SameAs::Distinct {
            return SameAs::Distinct;
        }
        let v2 = if flip {
            same(&a2, &b1)
        } else {
            same(&a2, &b2)
        };
        if v2 == SameAs::Distinct {
            return SameAs::Distinct;
        }

        match op_a {
            Op::Plus | Op::Minus => match (v1, v2) {
                (SameAs::Same, SameAs::Same) => SameAs::Same,
                (SameAs::Complement, SameAs::Complement) => SameAs::Complement,
                _ => SameAs::Distinct,
            },
            Op::Times | Op::Divide => match (v1, v2) {
                (SameAs::Same, SameAs::Same) => SameAs::Same,
                (SameAs::Complement, SameAs::Complement) => SameAs::Same,
                (SameAs::Same, SameAs::Complement) | (SameAs::Complement, SameAs::Same) => {
                    SameAs::Complement
                }
                _ => SameAs::Distinct,
            },
            Op::Pow => {
                // Only even exponents survive dump_scales; they erase
                // both sign and absolute value of the base.
                if v2 != SameAs::Same {
                    return SameAs::Distinct;
                }
                match v1 {
                    SameAs::Distinct => SameAs::Distinct,
                    _ => SameAs::Same,
                }
            }
            _ => SameAs::Distinct,
        }
    } else {
        let a1 = a.child_1().expect("monadic child");
        let b1 = b.child_1().expect("monadic child");
        let v = same(&a1, &b1);
        if v == SameAs::Distinct {
            return SameAs::Distinct;
        }
        match op_a {
            Op::Comp => v,
            Op::Abs => SameAs::Same,
            Op::Cos => match v {
                SameAs::Same | SameAs::Complement | SameAs::Abs => SameAs::Same,
                SameAs::Distinct => SameAs::Distinct,
            },
            Op::Sin => match v {
                SameAs::Same => SameAs::Same,
                SameAs::Complement => SameAs::Complement,
                _ => SameAs::Distinct,
            },
            Op::Exp | Op::Ssqrt | Op::Sign => match v {
                SameAs::Same => SameAs::Same,
                _ => SameAs::Distinct,
            },
            _ => SameAs::Distinct,
        }
    }
}

fn combine_wraps(wa: Wrap, wb: Wrap, verdict: SameAs) -> SameAs {
    if verdict == SameAs::Distinct {
        return SameAs::Distinct;
    }
    if std::mem::discriminant(&wa) == std::mem::discriminant(&wb) {
        return verdict;
    }
    if matches!(wa, Wrap::Abs) || matches!(wb, Wrap::Abs) {
        return SameAs::Abs;
    }
    // One side is complemented relative to the other.
    match verdict {
        SameAs::Same => SameAs::Complement,
        SameAs::Complement => SameAs::Same,
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{abs, p_block, p_cone, p_cylinder, p_sphere, p_torus, s_sqrt};
    use carve_geom::{Interval, Vec3};

    fn origin() -> Point3 {
        Point3::origin()
    }

    fn z_axis() -> Line {
        Line::new(Vec3::z(), origin())
    }

    #[test]
    fn test_same_reflexive_and_double_complement() {
        let s = p_sphere(&origin(), 1.0);
        assert_eq!(same(&s, &s), SameAs::Same);
        assert_eq!(same(&-&(-&s), &s), SameAs::Same);
    }

    #[test]
    fn test_same_complement_and_abs() {
        let s = p_sphere(&origin(), 1.0);
        assert_eq!(same(&s, &-&s), SameAs::Complement);
        assert_eq!(same(&s, &abs(&s)), SameAs::Abs);
        assert_eq!(same(&-&s, &abs(&s)), SameAs::Abs);
    }

    #[test]
    fn test_abs_idempotent() {
        let s = p_sphere(&origin(), 1.0);
        let a = abs(&s);
        assert_eq!(same(&abs(&a), &a), SameAs::Same);
    }

    #[test]
    fn test_same_strips_scales() {
        let s = p_sphere(&origin(), 1.0);
        let scaled = &s * &Primitive::real(3.0);
        assert_eq!(same(&scaled, &s), SameAs::Same);
        let negated = &s * &Primitive::real(-2.0);
        assert_eq!(same(&negated, &s), SameAs::Complement);
        let divided = &s / &Primitive::real(4.0);
        assert_eq!(same(&divided, &s), SameAs::Same);
        assert_eq!(same(&s_sqrt(&s), &s), SameAs::Same);
    }

    #[test]
    fn test_same_distinct_spheres() {
        let a = p_sphere(&origin(), 1.0);
        let b = p_sphere(&origin(), 2.0);
        let c = p_sphere(&Point3::new(1.0, 0.0, 0.0), 1.0);
        assert_eq!(same(&a, &b), SameAs::Distinct);
        assert_eq!(same(&a, &c), SameAs::Distinct);
    }

    #[test]
    fn test_same_deep_copy_structurally() {
        let s = p_sphere(&Point3::new(1.0, -2.0, 0.5), 2.0);
        assert_eq!(same(&s, &s.deep()), SameAs::Same);
        let c = p_cylinder(&z_axis(), 1.5);
        assert_eq!(same(&c, &c.deep()), SameAs::Same);
    }

    #[test]
    fn test_cylinder_axis_freedom() {
        let a = p_cylinder(&z_axis(), 1.0);
        let shifted = p_cylinder(&Line::new(Vec3::z(), Point3::new(0.0, 0.0, 7.0)), 1.0);
        let reversed = p_cylinder(&Line::new(-Vec3::z(), origin()), 1.0);
        assert_eq!(same(&a, &shifted), SameAs::Same);
        assert_eq!(same(&a, &reversed), SameAs::Same);
        let moved = p_cylinder(&Line::new(Vec3::z(), Point3::new(2.0, 0.0, 0.0)), 1.0);
        assert_eq!(same(&a, &moved), SameAs::Distinct);
    }

    #[test]
    fn test_cone_apex_matters() {
        let a = p_cone(&z_axis(), 1.0);
        let shifted = p_cone(&Line::new(Vec3::z(), Point3::new(0.0, 0.0, 1.0)), 1.0);
        assert_eq!(same(&a, &shifted), SameAs::Distinct);
        let reversed = p_cone(&Line::new(-Vec3::z(), origin()), 1.0);
        assert_eq!(same(&a, &reversed), SameAs::Same);
    }

    #[test]
    fn test_torus_same() {
        let a = p_torus(&z_axis(), 3.0, 1.0);
        let b = p_torus(&z_axis(), 3.0, 1.0);
        assert_eq!(same(&a, &b), SameAs::Same);
        let fatter = p_torus(&z_axis(), 3.0, 1.5);
        assert_eq!(same(&a, &fatter), SameAs::Distinct);
    }

    #[test]
    fn test_general_commutative_cross_match() {
        let s = p_sphere(&origin(), 1.0);
        let c = p_cylinder(&z_axis(), 1.0);
        let ab = &s + &c;
        let ba = &c + &s;
        assert_eq!(same(&ab, &ba), SameAs::Same);
        let prod = &s * &c;
        let prod_swapped = &c * &s;
        assert_eq!(same(&prod, &prod_swapped), SameAs::Same);
    }

    #[test]
    fn test_general_sum_of_complements() {
        let s = p_sphere(&origin(), 1.0);
        let c = p_cylinder(&z_axis(), 1.0);
        let sum = &s + &c;
        let negsum = &(-&s) + &(-&c);
        assert_eq!(same(&sum, &negsum), SameAs::Complement);
        // Product of complements is the product itself.
        let prod = &s * &c;
        let negprod = &(-&s) * &(-&c);
        assert_eq!(same(&prod, &negprod), SameAs::Same);
        // One negated factor complements a product.
        let halfneg = &(-&s) * &c;
        assert_eq!(same(&prod, &halfneg), SameAs::Complement);
    }

    #[test]
    fn test_parameters_sphere_roundtrip() {
        let s = p_sphere(&Point3::new(1.0, 2.0, 3.0), 2.5);
        let (w, shape) = parameters(&s).unwrap();
        assert_eq!(w, Wrap::Identity);
        match shape {
            Shape::Sphere { centre, radius } => {
                assert!((centre - Point3::new(1.0, 2.0, 3.0)).norm() < 1e-9);
                assert!((radius - 2.5).abs() < 1e-9);
            }
            other => panic!("expected sphere, got {other:?}"),
        }
    }

    #[test]
    fn test_parameters_cylinder_roundtrip() {
        let axis = Line::new(Vec3::new(0.0, 1.0, 1.0), Point3::new(1.0, 0.0, 0.0));
        let c = p_cylinder(&axis, 0.75);
        let (w, shape) = parameters(&c).unwrap();
        assert_eq!(w, Wrap::Identity);
        match shape {
            Shape::Cylinder { axis: rec, radius } => {
                assert!((radius - 0.75).abs() < 1e-9);
                assert!(same_line(&rec, &axis).related());
            }
            other => panic!("expected cylinder, got {other:?}"),
        }
    }

    #[test]
    fn test_parameters_cone_roundtrip() {
        let axis = z_axis();
        let c = p_cone(&axis, 0.8);
        let (_, shape) = parameters(&c).unwrap();
        match shape {
            Shape::Cone { axis: rec, angle } => {
                assert!((angle - 0.8).abs() < 1e-9);
                assert!((rec.origin - axis.origin).norm() < 1e-9);
            }
            other => panic!("expected cone, got {other:?}"),
        }
    }

    #[test]
    fn test_parameters_torus_roundtrip() {
        let axis = z_axis();
        let t = p_torus(&axis, 3.0, 0.5);
        let (_, shape) = parameters(&t).unwrap();
        match shape {
            Shape::Torus { axis: rec, major, minor } => {
                assert!((major - 3.0).abs() < 1e-9);
                assert!((minor - 0.5).abs() < 1e-9);
                assert!((rec.origin - axis.origin).norm() < 1e-9);
            }
            other => panic!("expected torus, got {other:?}"),
        }
    }

    #[test]
    fn test_parameters_wrapped() {
        let s = p_sphere(&origin(), 1.0);
        let (w, _) = parameters(&-&s).unwrap();
        assert_eq!(w, Wrap::Complement);
        let (w, _) = parameters(&abs(&s)).unwrap();
        assert_eq!(w, Wrap::Abs);
        let (w, _) = parameters(&s_sqrt(&s)).unwrap();
        assert_eq!(w, Wrap::Ssqrt);
        let (w, _) = parameters(&abs(&-&s)).unwrap();
        assert_eq!(w, Wrap::Abs);
        let (w, _) = parameters(&-&abs(&s)).unwrap();
        assert_eq!(w, Wrap::Abs);
    }

    #[test]
    fn test_parameters_scaled_plane() {
        let f = Primitive::plane(Plane::new(Vec3::x(), &origin()));
        let scaled = &Primitive::real(2.0) * &f;
        let (w, shape) = parameters(&scaled).unwrap();
        assert_eq!(w, Wrap::Scaled(2.0));
        assert!(matches!(shape, Shape::Plane(_)));
    }

    #[test]
    fn test_parameters_corrupt_shape() {
        // A sphere tag on a non-sphere expression must error, not panic.
        let f = Primitive::plane(Plane::new(Vec3::x(), &origin()));
        let fake = f.powi(2).with_kind(Kind::Sphere);
        assert!(parameters(&fake).is_err());
        // And same() degrades to a conservative verdict.
        assert_eq!(same(&fake, &p_sphere(&origin(), 1.0)), SameAs::Distinct);
    }

    #[test]
    fn test_dump_scales_peels_chains() {
        let s = p_sphere(&origin(), 1.0);
        let wrapped = s_sqrt(&(&(&s * &Primitive::real(2.0)) / &Primitive::real(5.0)));
        assert!(dump_scales(&wrapped) == s);
        let odd = s.powi(3);
        assert!(dump_scales(&odd) == s);
        let even = s.powi(2);
        assert!(dump_scales(&even) == even);
    }

    #[test]
    fn test_same_blocks() {
        let b1 = p_block(&Box3::new(
            Interval::new(0.0, 1.0),
            Interval::new(0.0, 1.0),
            Interval::new(0.0, 1.0),
        ));
        let b2 = p_block(&Box3::new(
            Interval::new(0.0, 1.0),
            Interval::new(0.0, 1.0),
            Interval::new(0.0, 1.0),
        ));
        let b3 = p_block(&Box3::new(
            Interval::new(0.0, 2.0),
            Interval::new(0.0, 1.0),
            Interval::new(0.0, 1.0),
        ));
        assert_eq!(same(&b1, &b2), SameAs::Same);
        assert_eq!(same(&b1, &b3), SameAs::Distinct);
    }
}
