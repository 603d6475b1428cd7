//! Rigid motions and scalings of primitives.
//!
//! Every transform is a structural recursion: plane leaves move, reals
//! stay fixed, interior nodes re-apply their operator to transformed
//! children, and the advisory shape kind is restored afterwards. The
//! one exception is the 1-D scale, which breaks canonical shape form
//! and demotes the kind to general.

use carve_geom::{Line, Plane, Point3, Real, Vec3};
use log::warn;

use crate::{rebuild_binary, rebuild_unary, user, Kind, PrimCore, Primitive};

impl Primitive {
    /// Translate the potential by `q`.
    pub fn translate(&self, q: &Vec3) -> Primitive {
        self.map_leaves(
            &|f| Primitive::plane(f.translate(q)),
            &|b| Primitive::block(b.translate(q)),
            &|tag| user::translate(tag, q),
            &|p| p.kind(),
        )
    }

    /// Rotate about a line by `angle` radians.
    pub fn spin(&self, axis: &Line, angle: Real) -> Primitive {
        self.map_leaves(
            &|f| Primitive::plane(f.spin(axis, angle)),
            &|b| {
                // A rotated box is no longer axis-aligned; it has no
                // block form.
                warn!("primitive spin: block primitives only translate");
                Primitive::block(b)
            },
            &|tag| user::spin(tag, axis, angle),
            &|p| p.kind(),
        )
    }

    /// Reflect in a plane.
    pub fn mirror(&self, m: &Plane) -> Primitive {
        self.map_leaves(
            &|f| Primitive::plane(f.mirror(m)),
            &|b| {
                warn!("primitive mirror: block primitives only translate");
                Primitive::block(b)
            },
            &|tag| user::mirror(tag, m),
            &|p| p.kind(),
        )
    }

    /// Scale uniformly about a point by factor `s`.
    ///
    /// A scaled plane's potential must shrink with the geometry so it
    /// still measures distance along the (unchanged) normal: the plane
    /// is rebuilt and the result divided by `s`.
    pub fn scale(&self, cen: &Point3, s: Real) -> Primitive {
        if s == 0.0 {
            warn!("primitive scale: zero scaling factor");
            return Primitive::real(0.0);
        }
        self.map_leaves(
            &|f| &Primitive::plane(f.scale(cen, s)) * &Primitive::real(1.0 / s),
            &|b| {
                let p = cen + (b.corner(0) - cen) * s;
                let q = cen + (b.corner(7) - cen) * s;
                let low = Point3::new(p.x.min(q.x), p.y.min(q.y), p.z.min(q.z));
                let high = Point3::new(p.x.max(q.x), p.y.max(q.y), p.z.max(q.z));
                Primitive::block(carve_geom::Box3::from_corners(&low, &high))
            },
            &|tag| user::scale(tag, cen, s),
            &|p| p.kind(),
        )
    }

    /// Scale along a line by factor `s` (1-D scale).
    ///
    /// Canonical shapes do not survive this, so the result is tagged
    /// general regardless of the input kind.
    pub fn scale_axis(&self, s_ax: &Line, s: Real) -> Primitive {
        if s == 0.0 {
            warn!("primitive scale: zero scaling factor");
            return Primitive::real(0.0);
        }
        self.map_leaves(
            &|f| scale_plane_1d(&f, s_ax, s),
            &|b| {
                warn!("primitive scale: block primitives only scale uniformly");
                Primitive::block(b)
            },
            &|tag| user::scale_axis(tag, s_ax, s),
            &|_| Kind::General,
        )
    }

    /// Shared structural recursion for the transforms: `plane`, `block`,
    /// and `user` handle the leaves, interior nodes rebuild, and each
    /// rebuilt node is retagged with `kind_of` its source.
    fn map_leaves(
        &self,
        plane: &dyn Fn(Plane) -> Primitive,
        block: &dyn Fn(carve_geom::Box3) -> Primitive,
        user_leaf: &dyn Fn(i32) -> Primitive,
        kind_of: &dyn Fn(&Primitive) -> Kind,
    ) -> Primitive {
        let c = match &self.0.core {
            // Reals are fixed points of every transform.
            PrimCore::Real(_) => return self.clone(),
            PrimCore::Plane(f) => return plane(*f),
            PrimCore::Block(b) => return block(*b),
            PrimCore::User(tag) => return user_leaf(*tag),
            PrimCore::Binary(op, a, b) => rebuild_binary(
                *op,
                &a.map_leaves(plane, block, user_leaf, kind_of),
                &b.map_leaves(plane, block, user_leaf, kind_of),
            ),
            PrimCore::Unary(op, a) => {
                rebuild_unary(*op, &a.map_leaves(plane, block, user_leaf, kind_of))
            }
        };
        c.with_kind(kind_of(self))
    }
}

impl std::ops::Add<Vec3> for &Primitive {
    type Output = Primitive;
    fn add(self, q: Vec3) -> Primitive {
        self.translate(&q)
    }
}

impl std::ops::Sub<Vec3> for &Primitive {
    type Output = Primitive;
    fn sub(self, q: Vec3) -> Primitive {
        self.translate(&-q)
    }
}

/// Scale a plane's potential along an axis.
///
/// The transformed potential stays affine: its coefficients are the
/// original's with the component along the scale axis redistributed,
/// and the magnitude is restored by an explicit factor.
fn scale_plane_1d(f: &Plane, s_ax: &Line, s: Real) -> Primitive {
    let g = Plane::new(s_ax.direction, &s_ax.origin);
    let d1 = (1.0 - 1.0 / s) * f.normal.dot(&g.normal);
    let a1 = f.normal.x - d1 * g.normal.x;
    let b1 = f.normal.y - d1 * g.normal.y;
    let c1 = f.normal.z - d1 * g.normal.z;
    let dd = f.d - d1 * g.d;
    let s1 = (a1 * a1 + b1 * b1 + c1 * c1).sqrt();
    &Primitive::plane(Plane::from_coefficients(a1, b1, c1, dd)) * &Primitive::real(s1)
}
