//! Named-shape constructors.
//!
//! Every shape is an ordinary expression over plane leaves; the kind tag
//! on the root is advisory, letting [`crate::parameters`] walk the
//! canonical structure back to the constructor arguments.

use carve_geom::{right, Box3, Line, Plane, Point3, Real};
use log::warn;

use crate::{s_sqrt, Kind, Primitive};

/// An infinitely long cylinder about `axis` with the given radius.
///
/// Two perpendicular planes intersect in the axis; the sum of their
/// squares minus the squared radius is the cylinder.
pub fn p_cylinder(axis: &Line, radius: Real) -> Primitive {
    let srad0 = right(&axis.direction);
    let srad1 = srad0.cross(&axis.direction);

    let hs0 = Primitive::plane(Plane::new(srad0, &axis.origin));
    let hs1 = Primitive::plane(Plane::new(srad1, &axis.origin));

    let c = &(&hs0.powi(2) + &hs1.powi(2)) - &Primitive::real(radius * radius);
    c.with_kind(Kind::Cylinder)
}

/// A double cone about `axis` with the given included angle, apex at the
/// axis origin.
pub fn p_cone(axis: &Line, angle: Real) -> Primitive {
    let srad0 = right(&axis.direction);
    let srad1 = srad0.cross(&axis.direction);

    let hs0 = Primitive::plane(Plane::new(srad0, &axis.origin));
    let hs1 = Primitive::plane(Plane::new(srad1, &axis.origin));

    // A third plane through the apex; the local radius is the distance
    // from it times the tangent of half the angle.
    let hs2 = Primitive::plane(Plane::new(axis.direction, &axis.origin));
    let rfac = (0.5 * angle).tan();

    let c = &(&hs0.powi(2) + &hs1.powi(2)) - &(&hs2 * &Primitive::real(rfac)).powi(2);
    c.with_kind(Kind::Cone)
}

/// A sphere with the given centre and radius.
pub fn p_sphere(centre: &Point3, radius: Real) -> Primitive {
    let xhs = Primitive::plane(Plane::new(carve_geom::Vec3::x(), centre));
    let yhs = Primitive::plane(Plane::new(carve_geom::Vec3::y(), centre));
    let zhs = Primitive::plane(Plane::new(carve_geom::Vec3::z(), centre));

    let s = &(&(&xhs.powi(2) + &yhs.powi(2)) + &zhs.powi(2))
        - &Primitive::real(radius * radius);
    s.with_kind(Kind::Sphere)
}

/// A ring cyclide about `axis`. `sym` fixes the plane of symmetry; `a`,
/// `m`, `c` are the classical cyclide constants (a torus is the `c = 0`
/// special case).
pub fn p_cyclide(axis: &Line, sym: &Point3, a: Real, m: Real, c: Real) -> Primitive {
    let b2 = a * a + c * c;
    let srad2 = axis.direction.cross(&(sym - axis.origin));
    let srad1 = srad2.cross(&axis.direction);

    let hs1 = Primitive::plane(Plane::new(srad1, &axis.origin));
    let hs2 = Primitive::plane(Plane::new(srad2, &axis.origin));
    let hs3 = Primitive::plane(Plane::new(axis.direction, &axis.origin));

    let sum = &(&(&hs1.powi(2) + &hs2.powi(2)) + &hs3.powi(2))
        + &Primitive::real(b2 - m * m);
    let lin = &(&Primitive::real(2.0 * a) * &hs1) - &Primitive::real(2.0 * c * m);
    let t = &(&sum.powi(2) - &lin.powi(2))
        - &(&Primitive::real(4.0 * b2) * &hs2.powi(2));
    t.with_kind(Kind::Cyclide)
}

/// A torus about `axis` with major radius `rr` and minor radius `r`.
///
/// The potential uses a signed square root of the in-plane distance, so
/// its own symbolic derivative would be ill-behaved on the spine; the
/// gradients of the equivalent cyclide are installed instead.
pub fn p_torus(axis: &Line, rr: Real, r: Real) -> Primitive {
    let tg = p_cyclide(
        axis,
        &(axis.origin + right(&axis.direction)),
        rr,
        r,
        0.0,
    );
    let grads = [tg.grad_x(), tg.grad_y(), tg.grad_z()];

    let srad1 = right(&axis.direction);
    let srad2 = srad1.cross(&axis.direction);

    let hs1 = Primitive::plane(Plane::new(srad1, &axis.origin));
    let hs2 = Primitive::plane(Plane::new(srad2, &axis.origin));
    let hs3 = Primitive::plane(Plane::new(axis.direction, &axis.origin));

    let spine = &s_sqrt(&(&hs2.powi(2) + &hs1.powi(2))) - &Primitive::real(rr);
    let t = &(&hs3.powi(2) + &spine.powi(2)) - &Primitive::real(r * r);
    let t = t.with_kind(Kind::Torus);
    t.install_grads(grads);
    t
}

/// An axis-aligned cuboid block.
pub fn p_block(b: &Box3) -> Primitive {
    if b.x.empty() || b.y.empty() || b.z.empty() {
        warn!("p_block: empty box");
    }
    Primitive::block(*b)
}
