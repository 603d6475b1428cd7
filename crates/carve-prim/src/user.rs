//! User-registered primitives.
//!
//! A user primitive is a leaf carrying an integer tag at or above
//! [`USER_TAG_BASE`]; its semantics are delegated to a process-wide
//! registry of [`UserPrimitive`] implementations. The callback surface
//! covers evaluation, the transforms, complementing, and the stream
//! payload; it does not cover gradients, which warn and evaluate to
//! zero.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use carve_geom::{Box3, Interval, Line, Plane, Point3, Real, Vec3};
use log::warn;

use crate::Primitive;

/// Tags at or above this value denote user primitives.
pub const USER_TAG_BASE: i32 = 1000;

/// The callbacks a user primitive supplies.
///
/// Only evaluation is mandatory. Transform callbacks default to the
/// identity (with a warning), mirroring the kernel's defensive-value
/// policy for operations a primitive cannot support.
pub trait UserPrimitive: Send + Sync {
    /// Polynomial-degree estimate of the potential.
    fn degree(&self) -> i32 {
        2
    }

    /// The potential at a point.
    fn value(&self, q: &Point3) -> Real;

    /// The range of the potential over a box (an overestimate).
    fn range(&self, b: &Box3) -> Interval;

    /// Translate; returns the replacement primitive.
    fn translate(&self, tag: i32, q: &Vec3) -> Primitive {
        let _ = q;
        warn!("user primitive {tag}: translate not supported");
        Primitive::user(tag)
    }

    /// Rotate about a line; returns the replacement primitive.
    fn spin(&self, tag: i32, axis: &Line, angle: Real) -> Primitive {
        let _ = (axis, angle);
        warn!("user primitive {tag}: spin not supported");
        Primitive::user(tag)
    }

    /// Reflect in a plane; returns the replacement primitive.
    fn mirror(&self, tag: i32, m: &Plane) -> Primitive {
        let _ = m;
        warn!("user primitive {tag}: mirror not supported");
        Primitive::user(tag)
    }

    /// Scale about a point; returns the replacement primitive.
    fn scale(&self, tag: i32, cen: &Point3, s: Real) -> Primitive {
        let _ = (cen, s);
        warn!("user primitive {tag}: scale not supported");
        Primitive::user(tag)
    }

    /// Scale along a line; returns the replacement primitive.
    fn scale_axis(&self, tag: i32, axis: &Line, s: Real) -> Primitive {
        let _ = (axis, s);
        warn!("user primitive {tag}: 1-D scale not supported");
        Primitive::user(tag)
    }

    /// Complement; returns the replacement primitive.
    fn complement(&self, tag: i32) -> Primitive {
        warn!("user primitive {tag}: complement not supported");
        Primitive::user(tag)
    }

    /// One line of stream payload written after the tag.
    fn payload(&self) -> String {
        String::new()
    }

    /// Rebuild from a stream payload line.
    fn from_payload(&self, tag: i32, payload: &str) -> Primitive {
        let _ = payload;
        Primitive::user(tag)
    }
}

fn registry() -> &'static RwLock<HashMap<i32, Arc<dyn UserPrimitive>>> {
    static REGISTRY: OnceLock<RwLock<HashMap<i32, Arc<dyn UserPrimitive>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Register (or replace) the callbacks for a user tag.
///
/// Tags below [`USER_TAG_BASE`] are reserved and rejected with a
/// warning.
pub fn register_user_primitive(tag: i32, prim: Arc<dyn UserPrimitive>) {
    if tag < USER_TAG_BASE {
        warn!("user primitive tag {tag} is below the reserved threshold");
        return;
    }
    registry()
        .write()
        .expect("user primitive registry poisoned")
        .insert(tag, prim);
}

/// Look up the callbacks for a tag.
pub fn user_primitive(tag: i32) -> Option<Arc<dyn UserPrimitive>> {
    registry()
        .read()
        .expect("user primitive registry poisoned")
        .get(&tag)
        .cloned()
}

pub(crate) fn degree(tag: i32) -> i32 {
    match user_primitive(tag) {
        Some(u) => u.degree(),
        None => {
            warn!("user primitive {tag}: not registered");
            2
        }
    }
}

pub(crate) fn value(tag: i32, q: &Point3) -> Real {
    match user_primitive(tag) {
        Some(u) => u.value(q),
        None => {
            warn!("user primitive {tag}: not registered");
            0.0
        }
    }
}

pub(crate) fn range(tag: i32, b: &Box3) -> Interval {
    match user_primitive(tag) {
        Some(u) => u.range(b),
        None => {
            warn!("user primitive {tag}: not registered");
            // The empty sentinel: no claim about the range.
            Interval::new(1.0, 0.0)
        }
    }
}

pub(crate) fn translate(tag: i32, q: &Vec3) -> Primitive {
    match user_primitive(tag) {
        Some(u) => u.translate(tag, q),
        None => {
            warn!("user primitive {tag}: not registered");
            Primitive::user(tag)
        }
    }
}

pub(crate) fn spin(tag: i32, axis: &Line, angle: Real) -> Primitive {
    match user_primitive(tag) {
        Some(u) => u.spin(tag, axis, angle),
        None => {
            warn!("user primitive {tag}: not registered");
            Primitive::user(tag)
        }
    }
}

pub(crate) fn mirror(tag: i32, m: &Plane) -> Primitive {
    match user_primitive(tag) {
        Some(u) => u.mirror(tag, m),
        None => {
            warn!("user primitive {tag}: not registered");
            Primitive::user(tag)
        }
    }
}

pub(crate) fn scale(tag: i32, cen: &Point3, s: Real) -> Primitive {
    match user_primitive(tag) {
        Some(u) => u.scale(tag, cen, s),
        None => {
            warn!("user primitive {tag}: not registered");
            Primitive::user(tag)
        }
    }
}

pub(crate) fn scale_axis(tag: i32, axis: &Line, s: Real) -> Primitive {
    match user_primitive(tag) {
        Some(u) => u.scale_axis(tag, axis, s),
        None => {
            warn!("user primitive {tag}: not registered");
            Primitive::user(tag)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A distance-to-point potential for the tests.
    struct PointField {
        centre: Point3,
    }

    impl UserPrimitive for PointField {
        fn value(&self, q: &Point3) -> Real {
            (q - self.centre).norm() - 1.0
        }

        fn range(&self, b: &Box3) -> Interval {
            let mut lo = f64::INFINITY;
            let mut hi = f64::NEG_INFINITY;
            for i in 0..8 {
                let v = self.value(&b.corner(i));
                lo = lo.min(v);
                hi = hi.max(v);
            }
            // Pad below: the minimum may be interior.
            Interval::new(lo - b.vol().cbrt(), hi)
        }

        fn translate(&self, _tag: i32, q: &Vec3) -> Primitive {
            let moved = PointField {
                centre: self.centre + q,
            };
            let tag = 2001;
            register_user_primitive(tag, Arc::new(moved));
            Primitive::user(tag)
        }
    }

    #[test]
    fn test_registered_user_primitive() {
        register_user_primitive(
            2000,
            Arc::new(PointField {
                centre: Point3::origin(),
            }),
        );
        let p = Primitive::user(2000);
        assert!((p.value(&Point3::new(2.0, 0.0, 0.0)) - 1.0).abs() < 1e-12);
        assert!(p.value(&Point3::origin()) < 0.0);
        let moved = p.translate(&Vec3::new(5.0, 0.0, 0.0));
        assert!((moved.value(&Point3::new(7.0, 0.0, 0.0)) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_unregistered_tag_is_defensive() {
        let p = Primitive::user(9999);
        assert_eq!(p.value(&Point3::origin()), 0.0);
        let b = Box3::from_corners(&Point3::origin(), &Point3::new(1.0, 1.0, 1.0));
        assert!(p.range(&b).empty());
    }

    #[test]
    fn test_reserved_tags_rejected() {
        register_user_primitive(
            5,
            Arc::new(PointField {
                centre: Point3::origin(),
            }),
        );
        assert!(user_primitive(5).is_none());
    }
}
