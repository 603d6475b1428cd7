//! Leaf faceting: polygonal approximations of the surfaces crossing a
//! box.
//!
//! For each surface primitive a leaf retains, the zero crossings of the
//! potential along the box's twelve edges are collected, ordered around
//! their centroid in the plane perpendicular to the surface gradient,
//! and emitted as one closed polygon. Vertices carry the (rendering)
//! gradient so consumers can shade without re-deriving it.

use carve_geom::{Box3, Point3, Real, Vec3};
use carve_prim::Primitive;
use carve_set::SetList;

/// What a polygon's vertex sequence means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolygonKind {
    /// Unconnected points.
    PointSet,
    /// An open polyline.
    Polyline,
    /// A closed polygon.
    Polygon,
}

/// One polygon vertex: position, gradient, and an edge flag for
/// consumers that track which box edge produced the vertex.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolyVertex {
    /// Position.
    pub p: Point3,
    /// Surface gradient at the position.
    pub g: Vec3,
    /// Edge marker (opaque to the kernel).
    pub edge: i32,
}

/// A facet polygon.
#[derive(Debug, Clone, PartialEq)]
pub struct Polygon {
    /// How to interpret the vertices.
    pub kind: PolygonKind,
    /// The vertices, in order.
    pub verts: Vec<PolyVertex>,
}

/// The twelve box edges as corner-index pairs.
const BOX_EDGES: [(u8, u8); 12] = [
    (0, 1),
    (2, 3),
    (4, 5),
    (6, 7), // along x
    (0, 2),
    (1, 3),
    (4, 6),
    (5, 7), // along y
    (0, 4),
    (1, 5),
    (2, 6),
    (3, 7), // along z
];

/// Facet every surface primitive of a set-list inside a box.
pub fn facet_leaf(list: &SetList, b: &Box3) -> Vec<Polygon> {
    let mut out = Vec::new();
    for prim in list.prims() {
        if let Some(poly) = facet_prim(&prim, b) {
            out.push(poly);
        }
    }
    out
}

/// The polygon of box-edge zero crossings of one primitive, if any.
fn facet_prim(prim: &Primitive, b: &Box3) -> Option<Polygon> {
    let vals: Vec<Real> = (0u8..8).map(|i| prim.value(&b.corner(i))).collect();

    let mut pts: Vec<(Point3, i32)> = Vec::new();
    for (edge, (i, j)) in BOX_EDGES.iter().enumerate() {
        let (vi, vj) = (vals[*i as usize], vals[*j as usize]);
        if vi == 0.0 {
            push_unique(&mut pts, b.corner(*i), edge as i32);
            continue;
        }
        if vi * vj < 0.0 {
            let (ci, cj) = (b.corner(*i), b.corner(*j));
            push_unique(&mut pts, edge_root(prim, &ci, &cj, vi), edge as i32);
        }
    }
    if pts.is_empty() {
        return None;
    }

    let kind = match pts.len() {
        1 => PolygonKind::PointSet,
        2 => PolygonKind::Polyline,
        _ => PolygonKind::Polygon,
    };

    if pts.len() > 2 {
        order_around_centroid(prim, &mut pts);
    }

    let verts = pts
        .into_iter()
        .map(|(p, edge)| PolyVertex {
            g: prim.p_grad(&p),
            p,
            edge,
        })
        .collect();
    Some(Polygon { kind, verts })
}

/// The zero crossing of the potential along one box edge, refined by
/// bisection so facet vertices sit on the surface, not on a chord.
fn edge_root(prim: &Primitive, a: &Point3, b: &Point3, va: Real) -> Point3 {
    let mut lo = 0.0;
    let mut hi = 1.0;
    let mut sign_lo = va.signum();
    let at = |t: Real| a + (b - a) * t;
    for _ in 0..60 {
        let mid = 0.5 * (lo + hi);
        let v = prim.value(&at(mid));
        if v == 0.0 {
            return at(mid);
        }
        if v.signum() == sign_lo {
            lo = mid;
            sign_lo = v.signum();
        } else {
            hi = mid;
        }
    }
    at(0.5 * (lo + hi))
}

fn push_unique(pts: &mut Vec<(Point3, i32)>, p: Point3, edge: i32) {
    if pts.iter().all(|(q, _)| (p - q).norm() > 1e-12) {
        pts.push((p, edge));
    }
}

/// Sort crossing points by angle about their centroid, in the plane
/// perpendicular to the surface gradient there.
fn order_around_centroid(prim: &Primitive, pts: &mut [(Point3, i32)]) {
    let n = pts.len() as Real;
    let centroid = Point3::from(
        pts.iter()
            .fold(Vec3::zeros(), |acc, (p, _)| acc + p.coords)
            / n,
    );
    let mut normal = prim.p_grad(&centroid);
    if normal.norm() < 1e-12 {
        normal = Vec3::z();
    }
    let normal = normal.normalize();
    let u = carve_geom::right(&normal);
    let v = normal.cross(&u);
    pts.sort_by(|(a, _), (b, _)| {
        let da = a - centroid;
        let db = b - centroid;
        let aa = da.dot(&v).atan2(da.dot(&u));
        let ab = db.dot(&v).atan2(db.dot(&u));
        aa.partial_cmp(&ab).unwrap_or(std::cmp::Ordering::Equal)
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use carve_geom::Plane;
    use carve_prim::p_sphere;
    use carve_set::Set;

    #[test]
    fn test_plane_facet_is_square() {
        let p = Primitive::plane(Plane::new(Vec3::x(), &Point3::origin()));
        let b = Box3::from_corners(&Point3::new(-1.0, -1.0, -1.0), &Point3::new(1.0, 1.0, 1.0));
        let poly = facet_prim(&p, &b).expect("plane crosses the box");
        assert_eq!(poly.kind, PolygonKind::Polygon);
        assert_eq!(poly.verts.len(), 4);
        for v in &poly.verts {
            assert!(v.p.x.abs() < 1e-12, "vertex off the plane: {:?}", v.p);
            assert!((v.g - Vec3::x()).norm() < 1e-12);
        }
        // Ordered: successive vertices share a box edge (no diagonals).
        for i in 0..4 {
            let a = poly.verts[i].p;
            let b2 = poly.verts[(i + 1) % 4].p;
            let d = (a.y - b2.y).abs() + (a.z - b2.z).abs();
            assert!((d - 2.0).abs() < 1e-9, "diagonal hop {a:?} -> {b2:?}");
        }
    }

    #[test]
    fn test_sphere_facet_vertices_on_surface() {
        let s = p_sphere(&Point3::origin(), 1.0);
        let b = Box3::from_corners(&Point3::new(0.4, 0.4, 0.4), &Point3::new(1.4, 1.4, 1.4));
        let poly = facet_prim(&s, &b).expect("sphere crosses the box corner");
        for v in &poly.verts {
            assert!(s.value(&v.p).abs() < 1e-9, "vertex off the sphere");
            // Gradient points outward.
            assert!(v.g.dot(&v.p.coords) > 0.0);
        }
    }

    #[test]
    fn test_no_crossing_no_polygon() {
        let s = p_sphere(&Point3::origin(), 1.0);
        let far = Box3::from_corners(&Point3::new(3.0, 3.0, 3.0), &Point3::new(4.0, 4.0, 4.0));
        assert!(facet_prim(&s, &far).is_none());
    }

    #[test]
    fn test_facet_leaf_counts_prims() {
        let s = Set::from_prim(&p_sphere(&Point3::origin(), 1.0));
        let p = Set::from_prim(&Primitive::plane(Plane::new(Vec3::z(), &Point3::origin())));
        let list = SetList::from_sets([&s & &p]);
        let b = Box3::from_corners(&Point3::new(0.4, 0.4, -0.4), &Point3::new(1.2, 1.2, 0.4));
        let polys = facet_leaf(&list, &b);
        // Both the sphere patch and the plane patch facet.
        assert_eq!(polys.len(), 2);
    }
}
