#![warn(missing_docs)]

//! Boolean set algebra over implicit primitives.
//!
//! A [`Set`] is `NOTHING`, `EVERYTHING`, a single primitive (the region
//! where its potential is at most zero), or a union / intersection of
//! two sets. Difference and symmetric difference are derived.
//! Complementing applies De Morgan's laws down to the primitive leaves
//! and is cached on both partners, so the second request in either
//! direction is free.
//!
//! A [`SetList`] is an ordered list of sets; inside a model box its
//! combined membership rule is the intersection of its members.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock, Weak};

use carve_geom::{Box3, Point3};
use carve_prim::{same, Primitive, SameAs};
use log::warn;

mod attrib;

pub use attrib::{
    read_attribute_payload, register_attribute_reader, Attribute, AttributeIter, TextAttribute,
    UserAttribute,
};

/// User-writable flag bits; higher bits are internal scratch.
pub const FLAG_MASK: u32 = 0xFFFF;

const WRIT_BIT: u32 = 0x0001_0000;

/// Membership verdict for a point, ordered from emptiest to most
/// solid.
///
/// Sets answer `Air`, `On`, or `In`; `Out` is reserved for model
/// queries that fall outside the model's root box. Keeping the two
/// empty verdicts apart lets pruning replace provably empty geometry
/// with `NOTHING` without changing any point's classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Membership {
    /// Outside the domain of the query (a model's root box).
    Out,
    /// Empty space: the potential is positive, or the set is `NOTHING`.
    Air,
    /// The point lies on the surface of a primitive (the witness).
    On,
    /// The point is strictly inside the set.
    In,
}

/// The two set-combining operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOp {
    /// Union.
    Union,
    /// Intersection.
    Intersection,
}

enum SetCore {
    Nothing,
    Everything,
    Prim(Primitive),
    Pair { op: SetOp, lhs: Set, rhs: Set },
}

/// One shared set node.
pub struct SetNode {
    core: SetCore,
    attributes: Option<Attribute>,
    complement: RwLock<Weak<SetNode>>,
    flags: AtomicU32,
}

/// A shared handle to an immutable set node.
///
/// Equality is node identity, as for primitives.
#[derive(Clone)]
pub struct Set(Arc<SetNode>);

impl Set {
    fn from_core(core: SetCore) -> Set {
        Set(Arc::new(SetNode {
            core,
            attributes: None,
            complement: RwLock::new(Weak::new()),
            flags: AtomicU32::new(0),
        }))
    }

    /// The empty set.
    pub fn nothing() -> Set {
        Set::from_core(SetCore::Nothing)
    }

    /// All of space.
    pub fn everything() -> Set {
        Set::from_core(SetCore::Everything)
    }

    /// The solid where the primitive's potential is at most zero.
    pub fn from_prim(p: &Primitive) -> Set {
        Set::from_core(SetCore::Prim(p.clone()))
    }

    /// Union of two sets, with the trivial identities applied.
    pub fn union(a: &Set, b: &Set) -> Set {
        if a.is_everything() || b.is_everything() {
            return Set::everything();
        }
        if a.is_nothing() {
            return b.clone();
        }
        if b.is_nothing() || a == b {
            return a.clone();
        }
        Set::from_core(SetCore::Pair {
            op: SetOp::Union,
            lhs: a.clone(),
            rhs: b.clone(),
        })
    }

    /// Intersection of two sets, with the trivial identities applied.
    pub fn intersection(a: &Set, b: &Set) -> Set {
        if a.is_nothing() || b.is_nothing() {
            return Set::nothing();
        }
        if a.is_everything() {
            return b.clone();
        }
        if b.is_everything() || a == b {
            return a.clone();
        }
        Set::from_core(SetCore::Pair {
            op: SetOp::Intersection,
            lhs: a.clone(),
            rhs: b.clone(),
        })
    }

    /// Difference: `self` with `other` removed.
    pub fn difference(&self, other: &Set) -> Set {
        Set::intersection(self, &other.complement())
    }

    /// Symmetric difference: points in exactly one of the two sets.
    pub fn symmetric_difference(&self, other: &Set) -> Set {
        Set::union(&self.difference(other), &other.difference(self))
    }

    /// Record a complement partnership read back from a stream; both
    /// sides' caches point at each other afterwards.
    pub fn link_complement(&self, other: &Set) {
        *self
            .0
            .complement
            .write()
            .expect("complement lock poisoned") = Arc::downgrade(&other.0);
        *other
            .0
            .complement
            .write()
            .expect("complement lock poisoned") = Arc::downgrade(&self.0);
    }

    /// The complement, computed by De Morgan push-down and cached on
    /// both partners.
    pub fn complement(&self) -> Set {
        if let Some(c) = self
            .0
            .complement
            .read()
            .expect("complement lock poisoned")
            .upgrade()
        {
            return Set(c);
        }
        let c = match &self.0.core {
            SetCore::Nothing => Set::everything(),
            SetCore::Everything => Set::nothing(),
            SetCore::Prim(p) => Set::from_prim(&-p),
            SetCore::Pair { op, lhs, rhs } => {
                let (l, r) = (lhs.complement(), rhs.complement());
                match op {
                    SetOp::Union => Set::intersection(&l, &r),
                    SetOp::Intersection => Set::union(&l, &r),
                }
            }
        };
        *self
            .0
            .complement
            .write()
            .expect("complement lock poisoned") = Arc::downgrade(&c.0);
        *c.0.complement.write().expect("complement lock poisoned") = Arc::downgrade(&self.0);
        c
    }

    /// True for the empty set.
    pub fn is_nothing(&self) -> bool {
        matches!(self.0.core, SetCore::Nothing)
    }

    /// True for all of space.
    pub fn is_everything(&self) -> bool {
        matches!(self.0.core, SetCore::Everything)
    }

    /// True for either constant set.
    pub fn is_trivial(&self) -> bool {
        self.is_nothing() || self.is_everything()
    }

    /// The primitive of a single-primitive set.
    pub fn prim(&self) -> Option<Primitive> {
        match &self.0.core {
            SetCore::Prim(p) => Some(p.clone()),
            _ => None,
        }
    }

    /// The operator of a two-child set.
    pub fn op(&self) -> Option<SetOp> {
        match &self.0.core {
            SetCore::Pair { op, .. } => Some(*op),
            _ => None,
        }
    }

    /// First child of a two-child set.
    pub fn child_1(&self) -> Option<Set> {
        match &self.0.core {
            SetCore::Pair { lhs, .. } => Some(lhs.clone()),
            _ => None,
        }
    }

    /// Second child of a two-child set.
    pub fn child_2(&self) -> Option<Set> {
        match &self.0.core {
            SetCore::Pair { rhs, .. } => Some(rhs.clone()),
            _ => None,
        }
    }

    /// True when two sets have the same Boolean structure over the same
    /// primitive handles. Pruning rebuilds pair nodes but never the
    /// primitives, so this is how a re-prune is recognised as a no-op.
    pub fn same_structure(&self, other: &Set) -> bool {
        if self == other {
            return true;
        }
        match (&self.0.core, &other.0.core) {
            (SetCore::Nothing, SetCore::Nothing) => true,
            (SetCore::Everything, SetCore::Everything) => true,
            (SetCore::Prim(a), SetCore::Prim(b)) => a == b,
            (
                SetCore::Pair { op: oa, lhs: la, rhs: ra },
                SetCore::Pair { op: ob, lhs: lb, rhs: rb },
            ) => oa == ob && la.same_structure(lb) && ra.same_structure(rb),
            _ => false,
        }
    }

    /// Collect the primitive leaves, in expression order.
    pub fn collect_prims(&self, out: &mut Vec<Primitive>) {
        match &self.0.core {
            SetCore::Nothing | SetCore::Everything => {}
            SetCore::Prim(p) => out.push(p.clone()),
            SetCore::Pair { lhs, rhs, .. } => {
                lhs.collect_prims(out);
                rhs.collect_prims(out);
            }
        }
    }

    /// Number of primitive leaves in the set.
    pub fn contents(&self) -> usize {
        match &self.0.core {
            SetCore::Nothing | SetCore::Everything => 0,
            SetCore::Prim(_) => 1,
            SetCore::Pair { lhs, rhs, .. } => lhs.contents() + rhs.contents(),
        }
    }

    /// The node identity, used as the shared-node address on streams.
    pub fn unique(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }

    /// The attribute chain, if any.
    pub fn attributes(&self) -> Option<Attribute> {
        self.0.attributes.clone()
    }

    /// A set with the same geometry and an attribute prepended to the
    /// chain. Attributes never affect membership.
    pub fn attribute(&self, at: &Attribute) -> Set {
        self.with_attributes(Some(at.cons_before(self.0.attributes.clone())))
    }

    /// A set with the same geometry and the given attribute chain.
    pub fn with_attributes(&self, attributes: Option<Attribute>) -> Set {
        Set(Arc::new(SetNode {
            core: clone_core(&self.0.core),
            attributes,
            complement: RwLock::new(Weak::new()),
            flags: AtomicU32::new(self.0.flags.load(Ordering::Relaxed)),
        }))
    }

    /// Classify a point against the set, with a witness primitive when
    /// the point lies on a surface.
    pub fn member(&self, q: &Point3) -> (Membership, Option<Primitive>) {
        match &self.0.core {
            SetCore::Nothing => (Membership::Air, None),
            SetCore::Everything => (Membership::In, None),
            SetCore::Prim(p) => {
                let v = p.value(q);
                if v < 0.0 {
                    (Membership::In, None)
                } else if v > 0.0 {
                    (Membership::Air, None)
                } else {
                    (Membership::On, Some(p.clone()))
                }
            }
            SetCore::Pair { op, lhs, rhs } => {
                let (ml, wl) = lhs.member(q);
                let (mr, wr) = rhs.member(q);
                let m = match op {
                    SetOp::Union => ml.max(mr),
                    SetOp::Intersection => ml.min(mr),
                };
                let w = if m == Membership::On {
                    if ml == Membership::On {
                        wl
                    } else {
                        wr
                    }
                } else {
                    None
                };
                (m, w)
            }
        }
    }

    /// Restrict the set to a box: primitives whose range over the box is
    /// strictly positive become `NOTHING`, strictly negative become
    /// `EVERYTHING`, and the Boolean structure simplifies through the
    /// constants. Ranges touching zero are kept, so surface verdicts
    /// survive pruning.
    pub fn prune(&self, b: &Box3) -> Set {
        match &self.0.core {
            SetCore::Nothing | SetCore::Everything => self.clone(),
            SetCore::Prim(p) => {
                let r = p.range(b);
                if r.empty() {
                    warn!("set prune: empty range interval");
                    self.clone()
                } else if r.lo > 0.0 {
                    Set::nothing()
                } else if r.hi < 0.0 {
                    Set::everything()
                } else {
                    self.clone()
                }
            }
            SetCore::Pair { op, lhs, rhs } => {
                let l = lhs.prune(b);
                let r = rhs.prune(b);
                if &l == lhs && &r == rhs {
                    // Nothing changed; keep the shared node (and its
                    // attributes).
                    return self.clone();
                }
                match op {
                    SetOp::Union => Set::union(&l, &r),
                    SetOp::Intersection => Set::intersection(&l, &r),
                }
            }
        }
    }

    /// Merge duplicate primitive leaves: leaves that [`same`] proves
    /// identical share one handle, and complement-equal leaves share
    /// one handle under a complement. Speeds pruning during division.
    pub fn percolate(&self) -> Set {
        let mut reps: Vec<Primitive> = Vec::new();
        self.percolate_with(&mut reps)
    }

    fn percolate_with(&self, reps: &mut Vec<Primitive>) -> Set {
        match &self.0.core {
            SetCore::Nothing | SetCore::Everything => self.clone(),
            SetCore::Prim(p) => {
                for r in reps.iter() {
                    match same(r, p) {
                        SameAs::Same => {
                            if r == p {
                                return self.clone();
                            }
                            return Set::from_prim(r).with_attributes(self.attributes());
                        }
                        SameAs::Complement => {
                            return Set::from_prim(&-r).with_attributes(self.attributes());
                        }
                        _ => {}
                    }
                }
                reps.push(p.clone());
                self.clone()
            }
            SetCore::Pair { op, lhs, rhs } => {
                let l = lhs.percolate_with(reps);
                let r = rhs.percolate_with(reps);
                if &l == lhs && &r == rhs {
                    return self.clone();
                }
                let merged = match op {
                    SetOp::Union => Set::union(&l, &r),
                    SetOp::Intersection => Set::intersection(&l, &r),
                };
                merged.with_attributes(self.attributes())
            }
        }
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

    /// The cached complement partner, if one has been computed and is
    /// still alive. Never computes.
    pub fn cached_complement(&self) -> Option<Set> {
        self.0
            .complement
            .read()
            .expect("complement lock poisoned")
            .upgrade()
            .map(Set)
    }

    /// True when the node carries the written-for-this-stream mark.
    pub fn written(&self) -> bool {
        self.0.flags.load(Ordering::Relaxed) & WRIT_BIT != 0
    }

    /// Mark the node written for the current stream; returns whether it
    /// already was.
    pub fn mark_written(&self) -> bool {
        self.0.flags.fetch_or(WRIT_BIT, Ordering::Relaxed) & WRIT_BIT != 0
    }

    /// Clear the written mark across the set tree and its primitives.
    pub fn unwrite(&self) {
        self.0.flags.fetch_and(!WRIT_BIT, Ordering::Relaxed);
        match &self.0.core {
            SetCore::Prim(p) => p.unwrite(),
            SetCore::Pair { lhs, rhs, .. } => {
                lhs.unwrite();
                rhs.unwrite();
            }
            _ => {}
        }
        let mut at = self.0.attributes.clone();
        while let Some(a) = at {
            a.unwrite_node();
            at = a.next();
        }
        // A stale mark on the complement partner would make the writer
        // emit a dangling back-reference; clear the partner's own bit.
        if let Some(c) = self.cached_complement() {
            c.0.flags.fetch_and(!WRIT_BIT, Ordering::Relaxed);
        }
    }
}

fn clone_core(core: &SetCore) -> SetCore {
    match core {
        SetCore::Nothing => SetCore::Nothing,
        SetCore::Everything => SetCore::Everything,
        SetCore::Prim(p) => SetCore::Prim(p.clone()),
        SetCore::Pair { op, lhs, rhs } => SetCore::Pair {
            op: *op,
            lhs: lhs.clone(),
            rhs: rhs.clone(),
        },
    }
}

impl PartialEq for Set {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Set {}

impl std::hash::Hash for Set {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.unique().hash(state);
    }
}

impl std::fmt::Debug for Set {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.0.core {
            SetCore::Nothing => write!(f, "Nothing"),
            SetCore::Everything => write!(f, "Everything"),
            SetCore::Prim(p) => write!(f, "Prim({p:?})"),
            SetCore::Pair { op, lhs, rhs } => write!(f, "({lhs:?} {op:?} {rhs:?})"),
        }
    }
}

impl From<Primitive> for Set {
    fn from(p: Primitive) -> Set {
        Set::from_prim(&p)
    }
}

impl std::ops::BitOr for &Set {
    type Output = Set;
    fn bitor(self, rhs: Self) -> Set {
        Set::union(self, rhs)
    }
}

impl std::ops::BitAnd for &Set {
    type Output = Set;
    fn bitand(self, rhs: Self) -> Set {
        Set::intersection(self, rhs)
    }
}

impl std::ops::Sub for &Set {
    type Output = Set;
    fn sub(self, rhs: Self) -> Set {
        self.difference(rhs)
    }
}

impl std::ops::Not for &Set {
    type Output = Set;
    fn not(self) -> Set {
        self.complement()
    }
}

/// An ordered list of sets. Within a model box, membership is the
/// intersection of the members' verdicts.
#[derive(Clone)]
pub struct SetList(Arc<SetListNode>);

struct SetListNode {
    set: Set,
    next: Option<SetList>,
    flags: AtomicU32,
}

impl SetList {
    /// A one-element list.
    pub fn new(set: &Set) -> SetList {
        SetList::cons(set, None)
    }

    /// Link a list node in front of `next`. The stream reader uses this
    /// to rebuild chains in their original order.
    pub fn cons(set: &Set, next: Option<SetList>) -> SetList {
        SetList(Arc::new(SetListNode {
            set: set.clone(),
            next,
            flags: AtomicU32::new(0),
        }))
    }

    /// Build a list from sets in order. An empty iterator yields a
    /// single `EVERYTHING` entry so the list is never empty.
    pub fn from_sets<I: IntoIterator<Item = Set>>(sets: I) -> SetList {
        let collected: Vec<Set> = sets.into_iter().collect();
        let mut list: Option<SetList> = None;
        for s in collected.iter().rev() {
            list = Some(SetList::cons(s, list));
        }
        list.unwrap_or_else(|| SetList::new(&Set::everything()))
    }

    /// A list with `set` appended at the tail.
    pub fn merge(&self, set: &Set) -> SetList {
        if self.iter().any(|s| &s == set) {
            return self.clone();
        }
        SetList::from_sets(self.iter().chain(std::iter::once(set.clone())))
    }

    /// The head set.
    pub fn set(&self) -> Set {
        self.0.set.clone()
    }

    /// The rest of the list.
    pub fn next(&self) -> Option<SetList> {
        self.0.next.clone()
    }

    /// Iterate over the sets in order.
    pub fn iter(&self) -> SetListIter {
        SetListIter {
            cur: Some(self.clone()),
        }
    }

    /// Number of sets in the list.
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// True when the list holds exactly one set. Lists are never empty.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Total primitive count across the list.
    pub fn contents(&self) -> usize {
        self.iter().map(|s| s.contents()).sum()
    }

    /// Collect every primitive leaf across the list, in order.
    pub fn prims(&self) -> Vec<Primitive> {
        let mut out = Vec::new();
        for s in self.iter() {
            s.collect_prims(&mut out);
        }
        out
    }

    /// True when the two lists hold the same set handles in the same
    /// order.
    pub fn same_sets(&self, other: &SetList) -> bool {
        let mut a = self.iter();
        let mut b = other.iter();
        loop {
            match (a.next(), b.next()) {
                (None, None) => return true,
                (Some(x), Some(y)) if x == y => {}
                _ => return false,
            }
        }
    }

    /// True when the two lists are structurally equivalent set for set
    /// (see [`Set::same_structure`]).
    pub fn equivalent(&self, other: &SetList) -> bool {
        let mut a = self.iter();
        let mut b = other.iter();
        loop {
            match (a.next(), b.next()) {
                (None, None) => return true,
                (Some(x), Some(y)) if x.same_structure(&y) => {}
                _ => return false,
            }
        }
    }

    /// True when every set in the list is a constant.
    pub fn is_trivial(&self) -> bool {
        self.iter().all(|s| s.is_trivial())
    }

    /// Classify a point against the list: the intersection of the
    /// members' verdicts.
    pub fn member(&self, q: &Point3) -> (Membership, Option<Primitive>) {
        let mut verdict = Membership::In;
        let mut witness = None;
        for s in self.iter() {
            let (m, w) = s.member(q);
            if m < verdict {
                verdict = m;
                witness = None;
            }
            if verdict == Membership::On && witness.is_none() {
                witness = w;
            }
        }
        if verdict != Membership::On {
            witness = None;
        }
        (verdict, witness)
    }

    /// Prune every set against a box. A member pruned to `NOTHING`
    /// collapses the list; members pruned to `EVERYTHING` drop out.
    pub fn prune(&self, b: &Box3) -> SetList {
        let mut kept: Vec<Set> = Vec::new();
        for s in self.iter() {
            let p = s.prune(b);
            if p.is_nothing() {
                return SetList::new(&Set::nothing());
            }
            if !p.is_everything() {
                kept.push(p);
            }
        }
        if kept.is_empty() {
            SetList::new(&Set::everything())
        } else {
            SetList::from_sets(kept)
        }
    }

    /// The node identity, used as the shared-node address on streams.
    pub fn unique(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }

    /// The user-visible flag bits.
    pub fn flags(&self) -> u32 {
        self.0.flags.load(Ordering::Relaxed) & FLAG_MASK
    }

    /// Set flag bits.
    pub fn set_flags(&self, f: u32) {
        self.0.flags.fetch_or(f & FLAG_MASK, Ordering::Relaxed);
    }

    /// Clear flag bits.
    pub fn reset_flags(&self, f: u32) {
        self.0.flags.fetch_and(!(f & FLAG_MASK), Ordering::Relaxed);
    }

    /// Mark this list node written; returns whether it already was.
    pub fn mark_written(&self) -> bool {
        self.0.flags.fetch_or(WRIT_BIT, Ordering::Relaxed) & WRIT_BIT != 0
    }

    /// Clear the written mark across the list and its sets.
    pub fn unwrite(&self) {
        for node in self.iter_nodes() {
            node.0.flags.fetch_and(!WRIT_BIT, Ordering::Relaxed);
            node.set().unwrite();
        }
    }

    fn iter_nodes(&self) -> impl Iterator<Item = SetList> {
        let mut nodes = Vec::new();
        let mut cur = Some(self.clone());
        while let Some(n) = cur {
            cur = n.next();
            nodes.push(n);
        }
        nodes.into_iter()
    }
}

impl PartialEq for SetList {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for SetList {}

impl std::fmt::Debug for SetList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

/// Iterator over the sets of a [`SetList`].
pub struct SetListIter {
    cur: Option<SetList>,
}

impl Iterator for SetListIter {
    type Item = Set;
    fn next(&mut self) -> Option<Set> {
        let n = self.cur.take()?;
        self.cur = n.next();
        Some(n.set())
    }
}
