//! Ray firing through a divided model.
//!
//! The tree is walked in ray order (near child first, slab test per
//! box), so the first leaf that produces a surface hit ends the search.
//! Within a leaf, each retained primitive's potential along the ray is
//! bracketed by sampling and refined by bisection; candidate roots are
//! checked against the whole set-list so hits on pruned-away geometry
//! or interior sheets are rejected.

use carve_geom::{Axis, Box3, Interval, Line, Point3, Real};
use carve_set::{Membership, Set, SetList};

use crate::Model;

/// Samples per leaf crossing when bracketing surface roots.
const RAY_SAMPLES: usize = 16;

/// Bisection refinement steps per bracketed root.
const RAY_BISECTIONS: usize = 60;

pub(crate) fn fire(model: &Model, ray: &Line, t_range: &Interval) -> Option<(Set, Real)> {
    if t_range.empty() {
        return None;
    }
    let clipped = clip_to_box(ray, &model.boxx(), t_range)?;
    fire_node(model, ray, &clipped)
}

fn fire_node(model: &Model, ray: &Line, t_range: &Interval) -> Option<(Set, Real)> {
    let clipped = clip_to_box(ray, &model.boxx(), t_range)?;
    match (model.child_1(), model.child_2()) {
        (Some(low), Some(high)) => {
            let axis = model.kind().axis().expect("division has an axis");
            let d = component(&ray.direction, axis);
            let o = component(&ray.origin.coords, axis);
            // Near child first along the ray.
            let (first, second) = if d > 0.0 || (d == 0.0 && o <= model.cut()) {
                (low, high)
            } else {
                (high, low)
            };
            fire_node(&first, ray, &clipped).or_else(|| fire_node(&second, ray, &clipped))
        }
        _ => fire_leaf(model, ray, &clipped),
    }
}

fn component(v: &carve_geom::Vec3, axis: Axis) -> Real {
    match axis {
        Axis::X => v.x,
        Axis::Y => v.y,
        Axis::Z => v.z,
    }
}

/// Slab-clip the ray parameter range to a box.
fn clip_to_box(ray: &Line, b: &Box3, t_range: &Interval) -> Option<Interval> {
    let mut t0 = t_range.lo;
    let mut t1 = t_range.hi;
    for axis in [Axis::X, Axis::Y, Axis::Z] {
        let d = component(&ray.direction, axis);
        let o = component(&ray.origin.coords, axis);
        let ext = b.extent(axis);
        if d.abs() < 1e-300 {
            if o < ext.lo || o > ext.hi {
                return None;
            }
            continue;
        }
        let (mut a, mut c) = ((ext.lo - o) / d, (ext.hi - o) / d);
        if a > c {
            std::mem::swap(&mut a, &mut c);
        }
        t0 = t0.max(a);
        t1 = t1.min(c);
        if t0 > t1 {
            return None;
        }
    }
    Some(Interval::new(t0, t1))
}

fn fire_leaf(leaf: &Model, ray: &Line, t_range: &Interval) -> Option<(Set, Real)> {
    let list = leaf.set_list();
    if list.is_trivial() {
        return None;
    }

    // Bracket sign changes of each retained primitive along the ray.
    let mut roots: Vec<Real> = Vec::new();
    for prim in list.prims() {
        let f = |t: Real| prim.value(&ray.point(t));
        let step = t_range.width() / RAY_SAMPLES as Real;
        if step <= 0.0 {
            continue;
        }
        let mut t_prev = t_range.lo;
        let mut v_prev = f(t_prev);
        for i in 1..=RAY_SAMPLES {
            let t = t_range.lo + step * i as Real;
            let v = f(t);
            if v_prev == 0.0 {
                roots.push(t_prev);
            } else if v_prev * v < 0.0 {
                roots.push(bisect(&f, t_prev, t, v_prev));
            }
            t_prev = t;
            v_prev = v;
        }
        if v_prev == 0.0 {
            roots.push(t_prev);
        }
    }
    roots.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    // The first root that really lies on the combined surface wins.
    for t in roots {
        let q = ray.point(t);
        if let Some(set) = surface_set(&list, &q) {
            return Some((set, t));
        }
    }
    None
}

/// Which set of the list the point lies on the surface of, if the
/// list's combined verdict there is a surface verdict.
fn surface_set(list: &SetList, q: &Point3) -> Option<Set> {
    let (m, _witness) = member_near(list, q);
    if m != Membership::On {
        return None;
    }
    list.iter().find(|s| member_near_set(s, q) == Membership::On)
}

/// Membership with a small tolerance band: bisection stops within
/// rounding of the surface, so exact zero tests would miss.
fn member_near(list: &SetList, q: &Point3) -> (Membership, Option<carve_prim::Primitive>) {
    let mut verdict = Membership::In;
    let mut witness = None;
    for s in list.iter() {
        let m = member_near_set(&s, q);
        if m < verdict {
            verdict = m;
            witness = None;
        }
        if verdict == Membership::On && witness.is_none() {
            witness = s.prim();
        }
    }
    (verdict, witness)
}

fn member_near_set(s: &Set, q: &Point3) -> Membership {
    if s.is_nothing() {
        return Membership::Air;
    }
    if s.is_everything() {
        return Membership::In;
    }
    if let Some(p) = s.prim() {
        let v = p.value(q);
        return if v.abs() <= 1e-9 {
            Membership::On
        } else if v < 0.0 {
            Membership::In
        } else {
            Membership::Air
        };
    }
    let l = member_near_set(&s.child_1().expect("pair"), q);
    let r = member_near_set(&s.child_2().expect("pair"), q);
    match s.op().expect("pair") {
        carve_set::SetOp::Union => l.max(r),
        carve_set::SetOp::Intersection => l.min(r),
    }
}

fn bisect(f: &dyn Fn(Real) -> Real, mut lo: Real, mut hi: Real, v_lo: Real) -> Real {
    let mut sign_lo = v_lo.signum();
    for _ in 0..RAY_BISECTIONS {
        let mid = 0.5 * (lo + hi);
        let v = f(mid);
        if v == 0.0 {
            return mid;
        }
        if v.signum() == sign_lo {
            lo = mid;
            sign_lo = v.signum();
        } else {
            hi = mid;
        }
    }
    0.5 * (lo + hi)
}
