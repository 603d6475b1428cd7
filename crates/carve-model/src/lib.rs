#![warn(missing_docs)]

//! Recursive spatial subdivision of set models.
//!
//! A [`Model`] is a binary tree of axis-aligned boxes. Each leaf holds
//! the set-list pruned to what actually matters in its box; each
//! interior node remembers the axis and coordinate at which its box was
//! cut. Division prunes as it descends, so membership anywhere in a
//! leaf's box agrees with the undivided model — that invariant is what
//! makes ray firing and faceting cheap.
//!
//! [`Model::redivide`] rebuilds an existing tree for a changed
//! set-list, keeping every subtree the change does not touch (including
//! its facets).

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock, Weak};

use carve_geom::{Axis, Box3, Interval, Line, Point3, Real};
use carve_prim::Primitive;
use carve_set::{Membership, Set, SetList};
use serde::{Deserialize, Serialize};

mod facet;
mod ray;

pub use facet::{facet_leaf, PolyVertex, Polygon, PolygonKind};

/// User-writable flag bits; higher bits are internal scratch.
pub const FLAG_MASK: u32 = 0xFFFF;

const WRIT_BIT: u32 = 0x0001_0000;

/// What a model node is: a leaf, or a division along one axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    /// Undivided box with a set-list.
    Leaf,
    /// Cut perpendicular to x.
    XDiv,
    /// Cut perpendicular to y.
    YDiv,
    /// Cut perpendicular to z.
    ZDiv,
}

impl ModelKind {
    /// The axis a division cuts, `None` for leaves.
    pub fn axis(self) -> Option<Axis> {
        match self {
            ModelKind::Leaf => None,
            ModelKind::XDiv => Some(Axis::X),
            ModelKind::YDiv => Some(Axis::Y),
            ModelKind::ZDiv => Some(Axis::Z),
        }
    }

    /// The kind dividing the given axis.
    pub fn dividing(axis: Axis) -> ModelKind {
        match axis {
            Axis::X => ModelKind::XDiv,
            Axis::Y => ModelKind::YDiv,
            Axis::Z => ModelKind::ZDiv,
        }
    }
}

/// Thresholds that terminate division.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DivideParams {
    /// Maximum tree depth below the root.
    pub max_depth: u32,
    /// Stop dividing boxes smaller than this volume.
    pub min_volume: Real,
    /// Stop dividing when the pruned primitive count falls below this.
    pub min_contents: usize,
}

impl Default for DivideParams {
    fn default() -> Self {
        Self {
            max_depth: 8,
            min_volume: 0.0,
            min_contents: 0,
        }
    }
}

/// A division decision for one box.
#[derive(Debug, Clone, Copy)]
pub enum Decision {
    /// Do not divide this box.
    Leave,
    /// Cut the named axis at the given coordinate.
    Cut {
        /// Axis to cut.
        axis: Axis,
        /// Coordinate of the cut plane.
        at: Real,
    },
}

/// An injectable division policy: given the pruned set-list, the box,
/// and the depth, decide where (or whether) to cut.
pub type DecisionFn = dyn Fn(&SetList, &Box3, u32) -> Decision;

/// The default policy: bisect the axis with the greatest productive
/// spread. An axis is productive when cutting it lets some primitive
/// prune out of one of the halves; among productive axes (or failing
/// any, among all) the longest wins.
pub fn default_decision(list: &SetList, b: &Box3, _depth: u32) -> Decision {
    if list.is_trivial() {
        return Decision::Leave;
    }
    let prims = list.prims();
    let mut best: Option<(usize, Real, Axis)> = None;
    for axis in [Axis::X, Axis::Y, Axis::Z] {
        let extent = b.extent(axis);
        let (lo, hi) = b.split(axis, extent.centre());
        let gain = prune_gain(&prims, &lo) + prune_gain(&prims, &hi);
        let width = extent.width();
        let candidate = (gain, width, axis);
        best = Some(match best {
            None => candidate,
            Some(cur) => {
                if (gain, width) > (cur.0, cur.1) {
                    candidate
                } else {
                    cur
                }
            }
        });
    }
    let (_, _, axis) = best.expect("three axes considered");
    Decision::Cut {
        axis,
        at: b.extent(axis).centre(),
    }
}

/// How many primitives stop straddling zero inside the half-box.
fn prune_gain(prims: &[Primitive], half: &Box3) -> usize {
    prims
        .iter()
        .filter(|p| !p.range(half).straddles_zero())
        .count()
}

struct ModelNode {
    kind: ModelKind,
    boxx: Box3,
    list: SetList,
    cut: Real,
    children: Option<(Model, Model)>,
    polygons: Vec<Polygon>,
    depth: u32,
    parent: RwLock<Weak<ModelNode>>,
    flags: AtomicU32,
}

/// A shared handle to a model node. Equality is node identity.
#[derive(Clone)]
pub struct Model(Arc<ModelNode>);

impl Model {
    /// A leaf model: the set-list applies throughout the box.
    pub fn new(list: &SetList, b: &Box3) -> Model {
        Model::leaf_at_depth(list, b, 0, Vec::new())
    }

    fn leaf_at_depth(list: &SetList, b: &Box3, depth: u32, polygons: Vec<Polygon>) -> Model {
        Model(Arc::new(ModelNode {
            kind: ModelKind::Leaf,
            boxx: *b,
            list: list.clone(),
            cut: 0.0,
            children: None,
            polygons,
            depth,
            parent: RwLock::new(Weak::new()),
            flags: AtomicU32::new(0),
        }))
    }

    /// An interior model node dividing `b` at `cut` on the given axis.
    ///
    /// The children's boxes must partition `b` there; their parent
    /// back-links are pointed at the new node.
    pub fn new_division(
        list: &SetList,
        b: &Box3,
        axis: Axis,
        cut: Real,
        low: Model,
        high: Model,
    ) -> Model {
        let depth = low.0.depth.saturating_sub(1);
        let m = Model(Arc::new(ModelNode {
            kind: ModelKind::dividing(axis),
            boxx: *b,
            list: list.clone(),
            cut,
            children: Some((low, high)),
            polygons: Vec::new(),
            depth,
            parent: RwLock::new(Weak::new()),
            flags: AtomicU32::new(0),
        }));
        if let Some((l, h)) = &m.0.children {
            *l.0.parent.write().expect("parent lock poisoned") = Arc::downgrade(&m.0);
            *h.0.parent.write().expect("parent lock poisoned") = Arc::downgrade(&m.0);
        }
        m
    }

    /// The node's kind.
    pub fn kind(&self) -> ModelKind {
        self.0.kind
    }

    /// The node's box.
    pub fn boxx(&self) -> Box3 {
        self.0.boxx
    }

    /// The node's (pruned) set-list.
    pub fn set_list(&self) -> SetList {
        self.0.list.clone()
    }

    /// The cut coordinate of a division node.
    pub fn cut(&self) -> Real {
        self.0.cut
    }

    /// The low child of a division node.
    pub fn child_1(&self) -> Option<Model> {
        self.0.children.as_ref().map(|(l, _)| l.clone())
    }

    /// The high child of a division node.
    pub fn child_2(&self) -> Option<Model> {
        self.0.children.as_ref().map(|(_, h)| h.clone())
    }

    /// The parent node, while it is alive.
    pub fn parent(&self) -> Option<Model> {
        self.0
            .parent
            .read()
            .expect("parent lock poisoned")
            .upgrade()
            .map(Model)
    }

    /// Depth of this node below the root it was divided from.
    pub fn depth(&self) -> u32 {
        self.0.depth
    }

    /// The facet polygons attached to a leaf.
    pub fn polygons(&self) -> &[Polygon] {
        &self.0.polygons
    }

    /// The node identity, used as the shared-node address on streams.
    pub fn unique(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }

    /// Build the subdivision of this model's set-list over its box.
    ///
    /// Existing division structure is ignored; use [`Model::redivide`]
    /// to refine incrementally.
    pub fn divide(&self, params: &DivideParams, decision: &DecisionFn) -> Model {
        let pruned = self.0.list.prune(&self.0.boxx);
        Model::leaf_at_depth(&pruned, &self.0.boxx, self.0.depth, Vec::new())
            .divide_from(params, decision)
    }

    /// Divide a pruned leaf further, bottoming out on the termination
    /// thresholds. The leaf's list must already be pruned to its box.
    fn divide_from(&self, params: &DivideParams, decision: &DecisionFn) -> Model {
        let list = &self.0.list;
        let b = &self.0.boxx;
        let depth = self.0.depth;

        if list.is_trivial()
            || depth >= params.max_depth
            || b.vol() < params.min_volume
            || list.contents() < params.min_contents
        {
            return self.clone();
        }
        let (axis, at) = match decision(list, b, depth) {
            Decision::Leave => return self.clone(),
            Decision::Cut { axis, at } => (axis, at),
        };
        let (lo_box, hi_box) = b.split(axis, at);
        if lo_box.vol() <= 0.0 || hi_box.vol() <= 0.0 {
            log::warn!("divide: cut at {at} does not split the box");
            return self.clone();
        }
        let low = Model::leaf_at_depth(&list.prune(&lo_box), &lo_box, depth + 1, Vec::new())
            .divide_from(params, decision);
        let high = Model::leaf_at_depth(&list.prune(&hi_box), &hi_box, depth + 1, Vec::new())
            .divide_from(params, decision);
        Model::new_division(list, b, axis, at, low, high)
    }

    /// Rebuild the division for a changed set-list, reusing every
    /// subtree whose pruned list is unchanged (facets included) and
    /// collapsing subtrees that became constant.
    pub fn redivide(&self, list: &SetList, params: &DivideParams, decision: &DecisionFn) -> Model {
        let pruned = list.prune(&self.0.boxx);
        match self.0.kind {
            ModelKind::Leaf => {
                if pruned.equivalent(&self.0.list) {
                    return self.clone();
                }
                Model::leaf_at_depth(&pruned, &self.0.boxx, self.0.depth, Vec::new())
                    .divide_from(params, decision)
            }
            _ => {
                if pruned.is_trivial() {
                    return Model::leaf_at_depth(&pruned, &self.0.boxx, self.0.depth, Vec::new());
                }
                let (l, h) = self.0.children.as_ref().expect("division has children");
                let low = l.redivide(&pruned, params, decision);
                let high = h.redivide(&pruned, params, decision);
                if &low == l && &high == h {
                    return self.clone();
                }
                let axis = self.0.kind.axis().expect("division has an axis");
                Model::new_division(&pruned, &self.0.boxx, axis, self.0.cut, low, high)
            }
        }
    }

    /// Classify a point against the model. Outside the root box the
    /// verdict is [`Membership::Out`].
    pub fn member(&self, q: &Point3) -> (Membership, Option<Primitive>) {
        if !self.0.boxx.contains(q) {
            return (Membership::Out, None);
        }
        self.leaf_containing(q).0.list.member(q)
    }

    /// The leaf whose box contains the point (ties go to the low side).
    pub fn leaf_containing(&self, q: &Point3) -> Model {
        match &self.0.children {
            None => self.clone(),
            Some((l, h)) => {
                let axis = self.0.kind.axis().expect("division has an axis");
                let coord = match axis {
                    Axis::X => q.x,
                    Axis::Y => q.y,
                    Axis::Z => q.z,
                };
                if coord <= self.0.cut {
                    l.leaf_containing(q)
                } else {
                    h.leaf_containing(q)
                }
            }
        }
    }

    /// Visit every leaf, in low-before-high order.
    pub fn walk_leaves(&self, visit: &mut dyn FnMut(&Model)) {
        match &self.0.children {
            None => visit(self),
            Some((l, h)) => {
                l.walk_leaves(visit);
                h.walk_leaves(visit);
            }
        }
    }

    /// Collected leaves, in low-before-high order.
    pub fn leaves(&self) -> Vec<Model> {
        let mut out = Vec::new();
        self.walk_leaves(&mut |m| out.push(m.clone()));
        out
    }

    /// The deepest leaf depth in the tree.
    pub fn max_depth(&self) -> u32 {
        match &self.0.children {
            None => self.0.depth,
            Some((l, h)) => l.max_depth().max(h.max_depth()),
        }
    }

    /// Attach facet polygons to every straddling leaf.
    ///
    /// Divides first (via [`Model::divide`] semantics on the existing
    /// tree) so facets always hang off pruned leaves.
    pub fn facet(&self, params: &DivideParams, decision: &DecisionFn) -> Model {
        let divided = if self.0.children.is_some() {
            self.clone()
        } else {
            self.divide(params, decision)
        };
        divided.facet_tree()
    }

    fn facet_tree(&self) -> Model {
        match &self.0.children {
            None => {
                if self.0.list.is_trivial() || !self.0.polygons.is_empty() {
                    return self.clone();
                }
                let polys = facet_leaf(&self.0.list, &self.0.boxx);
                Model::leaf_at_depth(&self.0.list, &self.0.boxx, self.0.depth, polys)
            }
            Some((l, h)) => {
                let low = l.facet_tree();
                let high = h.facet_tree();
                if &low == l && &high == h {
                    return self.clone();
                }
                let axis = self.0.kind.axis().expect("division has an axis");
                Model::new_division(&self.0.list, &self.0.boxx, axis, self.0.cut, low, high)
            }
        }
    }

    /// Refacet for a changed set-list: redivide (keeping untouched
    /// subtrees and their polygons) and facet the leaves that changed.
    pub fn refacet(&self, list: &SetList, params: &DivideParams, decision: &DecisionFn) -> Model {
        self.redivide(list, params, decision).facet_tree()
    }

    /// Fire a ray through the model: the first parameter in `t_range`
    /// at which the ray meets a surface of the set-list, with the set
    /// that was hit.
    pub fn fire_ray(&self, ray: &Line, t_range: &Interval) -> Option<(Set, Real)> {
        ray::fire(self, ray, t_range)
    }

    /// The user-visible flag bits.
    pub fn flags(&self) -> u32 {
        self.0.flags.load(Ordering::Relaxed) & FLAG_MASK
    }

    /// Set flag bits. Only the low [`FLAG_MASK`] bits are writable.
    pub fn set_flags(&self, f: u32) {
        self.0.flags.fetch_or(f & FLAG_MASK, Ordering::Relaxed);
    }

    /// Clear flag bits. Only the low [`FLAG_MASK`] bits are writable.
    pub fn reset_flags(&self, f: u32) {
        self.0.flags.fetch_and(!(f & FLAG_MASK), Ordering::Relaxed);
    }

    /// Mark this node written; returns whether it already was.
    pub fn mark_written(&self) -> bool {
        self.0.flags.fetch_or(WRIT_BIT, Ordering::Relaxed) & WRIT_BIT != 0
    }

    /// Clear the written mark across the tree, its lists, and their
    /// primitives.
    pub fn unwrite(&self) {
        self.0.flags.fetch_and(!WRIT_BIT, Ordering::Relaxed);
        self.0.list.unwrite();
        if let Some((l, h)) = &self.0.children {
            l.unwrite();
            h.unwrite();
        }
    }
}

impl PartialEq for Model {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Model {}

impl std::fmt::Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0.kind {
            ModelKind::Leaf => write!(
                f,
                "Leaf({:?}, {} sets, {} polys)",
                self.0.boxx,
                self.0.list.len(),
                self.0.polygons.len()
            ),
            k => write!(f, "{k:?}@{}", self.0.cut),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carve_geom::{Plane, Vec3};
    use carve_prim::{p_cylinder, p_sphere, Primitive};

    fn root_box() -> Box3 {
        Box3::from_corners(&Point3::new(-2.0, -2.0, -2.0), &Point3::new(2.0, 2.0, 2.0))
    }

    /// The unit cube as the intersection of six half-spaces.
    fn unit_cube_set() -> Set {
        let faces = [
            Plane::new(-Vec3::x(), &Point3::new(-1.0, 0.0, 0.0)),
            Plane::new(Vec3::x(), &Point3::new(1.0, 0.0, 0.0)),
            Plane::new(-Vec3::y(), &Point3::new(0.0, -1.0, 0.0)),
            Plane::new(Vec3::y(), &Point3::new(0.0, 1.0, 0.0)),
            Plane::new(-Vec3::z(), &Point3::new(0.0, 0.0, -1.0)),
            Plane::new(Vec3::z(), &Point3::new(0.0, 0.0, 1.0)),
        ];
        let mut s = Set::everything();
        for f in faces {
            s = Set::intersection(&s, &Set::from_prim(&Primitive::plane(f)));
        }
        s
    }

    fn divided_cube(depth: u32) -> Model {
        let list = SetList::new(&unit_cube_set());
        let m = Model::new(&list, &root_box());
        m.divide(
            &DivideParams {
                max_depth: depth,
                ..DivideParams::default()
            },
            &default_decision,
        )
    }

    #[test]
    fn test_leaf_boxes_partition_root() {
        let m = divided_cube(4);
        let total: Real = m.leaves().iter().map(|l| l.boxx().vol()).sum();
        assert!((total - root_box().vol()).abs() < 1e-9);
    }

    #[test]
    fn test_divided_membership_agrees() {
        let list = SetList::new(&unit_cube_set());
        let undivided = Model::new(&list, &root_box());
        let m = divided_cube(4);
        for p in [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(0.5, 0.5, 0.5),
            Point3::new(1.5, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(-1.0, -1.0, -1.0),
            Point3::new(0.3, -0.9, 0.99),
            Point3::new(1.99, 1.99, 1.99),
        ] {
            assert_eq!(m.member(&p).0, undivided.member(&p).0, "at {p:?}");
        }
    }

    #[test]
    fn test_cube_leaves_prune_to_constants_or_one_plane() {
        // An off-grid root box keeps the bisection cuts clear of the
        // cube faces, so deep leaves really do prune to constants.
        let b = Box3::from_corners(
            &Point3::new(-2.2, -2.2, -2.2),
            &Point3::new(2.2, 2.2, 2.2),
        );
        let list = SetList::new(&unit_cube_set());
        let m = Model::new(&list, &b).divide(
            &DivideParams {
                max_depth: 10,
                ..DivideParams::default()
            },
            &default_decision,
        );
        let mut interior = 0;
        let mut exterior = 0;
        for leaf in m.leaves() {
            let list = leaf.set_list();
            let c = leaf.boxx().centre();
            if list.is_trivial() {
                match list.member(&c).0 {
                    Membership::In => interior += 1,
                    _ => exterior += 1,
                }
                continue;
            }
            // A leaf cut by exactly one face keeps exactly one plane.
            let prims = list.prims();
            assert!(
                !prims.is_empty() && prims.len() <= 3,
                "leaf kept {} primitives",
                prims.len()
            );
            if face_count(&leaf.boxx()) == 1 {
                assert_eq!(prims.len(), 1);
            }
        }
        assert!(interior > 0, "no leaf fully inside the cube");
        assert!(exterior > 0, "no leaf fully outside the cube");
    }

    /// How many cube faces (planes x,y,z = +-1) pass strictly through a
    /// box's interior.
    fn face_count(b: &Box3) -> usize {
        let crossing = |i: Interval| (i.lo < -1.0 && i.hi > -1.0) || (i.lo < 1.0 && i.hi > 1.0);
        [b.x, b.y, b.z].into_iter().filter(|i| crossing(*i)).count()
    }

    #[test]
    fn test_divide_depth_limit() {
        let m = divided_cube(3);
        assert!(m.max_depth() <= 3);
    }

    #[test]
    fn test_min_volume_stops_division() {
        let list = SetList::new(&unit_cube_set());
        let m = Model::new(&list, &root_box());
        let coarse = m.divide(
            &DivideParams {
                max_depth: 10,
                min_volume: 8.0,
                min_contents: 0,
            },
            &default_decision,
        );
        for leaf in coarse.leaves() {
            // No leaf both tiny and divided: every division had volume
            // at least the threshold.
            if let Some(p) = leaf.parent() {
                assert!(p.boxx().vol() >= 8.0);
            }
        }
    }

    #[test]
    fn test_redivide_keeps_untouched_subtrees() {
        let cube = unit_cube_set();
        let list = SetList::new(&cube);
        let m = Model::new(&list, &root_box()).divide(
            &DivideParams {
                max_depth: 4,
                ..DivideParams::default()
            },
            &default_decision,
        );
        // Remove a cylinder from the cube; only boxes near the cylinder
        // band should rebuild.
        let drill = Set::from_prim(&p_cylinder(
            &Line::new(Vec3::z(), Point3::origin()),
            0.5,
        ));
        let new_set = cube.difference(&drill);
        let new_list = SetList::new(&new_set);
        let m2 = m.redivide(
            &new_list,
            &DivideParams {
                max_depth: 4,
                ..DivideParams::default()
            },
            &default_decision,
        );
        // Membership agrees with the fresh model everywhere sampled.
        let fresh = Model::new(&new_list, &root_box());
        for p in [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(0.9, 0.9, 0.0),
            Point3::new(0.2, 0.0, 0.5),
            Point3::new(1.5, 1.5, 1.5),
        ] {
            assert_eq!(m2.member(&p).0, fresh.member(&p).0, "at {p:?}");
        }
        // Subtrees away from the drill band are reused by handle.
        let far_corner = Point3::new(1.9, 1.9, 1.9);
        assert!(m.leaf_containing(&far_corner) == m2.leaf_containing(&far_corner));
        // Boxes crossing the new surface are not.
        let near_drill = Point3::new(0.5, 0.0, 0.0);
        assert!(m.leaf_containing(&near_drill) != m2.leaf_containing(&near_drill));
    }

    #[test]
    fn test_redivide_collapses_to_constant() {
        let s = Set::from_prim(&p_sphere(&Point3::origin(), 1.0));
        let list = SetList::new(&s);
        let m = Model::new(&list, &root_box()).divide(
            &DivideParams {
                max_depth: 3,
                ..DivideParams::default()
            },
            &default_decision,
        );
        // Replace with nothing: the whole tree collapses to one leaf.
        let gone = m.redivide(
            &SetList::new(&Set::nothing()),
            &DivideParams::default(),
            &default_decision,
        );
        assert_eq!(gone.kind(), ModelKind::Leaf);
        assert_eq!(gone.member(&Point3::origin()).0, Membership::Air);
    }

    #[test]
    fn test_parent_links() {
        let m = divided_cube(2);
        for leaf in m.leaves() {
            if leaf == m {
                continue;
            }
            let p = leaf.parent().expect("leaf has a parent");
            let l = p.child_1().unwrap();
            let h = p.child_2().unwrap();
            assert!(l == leaf || h == leaf);
        }
        assert!(m.parent().is_none());
    }

    #[test]
    fn test_default_decision_leaves_trivial() {
        let list = SetList::new(&Set::everything());
        assert!(matches!(
            default_decision(&list, &root_box(), 0),
            Decision::Leave
        ));
    }

    #[test]
    fn test_member_outside_root_is_out() {
        let m = divided_cube(2);
        assert_eq!(m.member(&Point3::new(9.0, 0.0, 0.0)).0, Membership::Out);
    }
}
