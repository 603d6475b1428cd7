#![warn(missing_docs)]

//! Implicit primitive expression DAG for the carve modelling kernel.
//!
//! A [`Primitive`] is a real-valued potential function of space: negative
//! inside, zero on the surface, positive outside. Primitives are shared,
//! immutable nodes in a directed acyclic expression graph over plane and
//! real leaves, closed under `+ - * / ^` and the monadic functions
//! `abs sin cos exp s_sqrt sign`. Arithmetic on the handles folds
//! constants, so `plane + real` stays a plane and `real * real` stays a
//! real.
//!
//! Each node caches its three partial-derivative primitives lazily: the
//! first gradient request derives all three in one traversal. Note that
//! the gradient of a signed square root is the gradient of the underlying
//! function — the magnitude would blow up at the surface, and only the
//! direction is meaningful downstream.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};

use carve_geom::{Box3, Interval, Plane, Point3, Real, Vec3};
use log::warn;

mod grad;
mod same;
mod shapes;
mod transform;
mod user;

pub use same::{dump_scales, parameters, same, PrimError, SameAs, Shape, Wrap};
pub use shapes::{p_block, p_cone, p_cyclide, p_cylinder, p_sphere, p_torus};
pub use user::{register_user_primitive, user_primitive, UserPrimitive, USER_TAG_BASE};

/// The operators an interior node can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// Addition.
    Plus,
    /// Subtraction.
    Minus,
    /// Multiplication.
    Times,
    /// Division (the divisor must reduce to a real).
    Divide,
    /// Integer exponentiation (the exponent must reduce to a real).
    Pow,
    /// Complement (unary negation).
    Comp,
    /// Absolute value.
    Abs,
    /// Sine.
    Sin,
    /// Cosine.
    Cos,
    /// Exponential.
    Exp,
    /// Signed square root.
    Ssqrt,
    /// Sign.
    Sign,
}

impl Op {
    /// True for the two-operand operators.
    pub fn diadic(self) -> bool {
        matches!(self, Op::Plus | Op::Minus | Op::Times | Op::Divide | Op::Pow)
    }
}

/// Advisory shape tag on a primitive node.
///
/// Removing or changing the tag never changes the potential; it only
/// records how the expression was built so [`parameters`] can recover
/// the constructor arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// Real-constant leaf.
    Real,
    /// Plane (half-space) leaf.
    Plane,
    /// Axis-aligned cuboid leaf.
    Block,
    /// Sphere expression.
    Sphere,
    /// Infinite cylinder expression.
    Cylinder,
    /// Double cone expression.
    Cone,
    /// Torus expression.
    Torus,
    /// Ring cyclide expression.
    Cyclide,
    /// No special shape.
    General,
    /// User-registered primitive with the given tag.
    User(i32),
}

/// The structural payload of a node.
enum PrimCore {
    Real(Real),
    Plane(Plane),
    Block(Box3),
    User(i32),
    Binary(Op, Primitive, Primitive),
    Unary(Op, Primitive),
}

impl Clone for PrimCore {
    fn clone(&self) -> Self {
        match self {
            PrimCore::Real(r) => PrimCore::Real(*r),
            PrimCore::Plane(f) => PrimCore::Plane(*f),
            PrimCore::Block(b) => PrimCore::Block(*b),
            PrimCore::User(t) => PrimCore::User(*t),
            PrimCore::Binary(op, a, b) => PrimCore::Binary(*op, a.clone(), b.clone()),
            PrimCore::Unary(op, a) => PrimCore::Unary(*op, a.clone()),
        }
    }
}

/// One shared node of the expression DAG.
pub struct PrimNode {
    core: PrimCore,
    kind: Kind,
    degree: i32,
    flags: AtomicU32,
    grads: OnceLock<[Primitive; 3]>,
}

/// A shared handle to an immutable primitive node.
///
/// Cloning is cheap; equality is node identity. Two handles compare
/// equal exactly when they reference the same node.
#[derive(Clone)]
pub struct Primitive(Arc<PrimNode>);

/// User-writable flag bits; higher bits are internal scratch.
pub const FLAG_MASK: u32 = 0xFFFF;

/// Internal "already written to the current stream" bit.
const WRIT_BIT: u32 = 0x0001_0000;

impl Primitive {
    /// A constant potential.
    pub fn real(r: Real) -> Primitive {
        Primitive::leaf(PrimCore::Real(r), Kind::Real, 0)
    }

    /// A half-space: the potential is the signed distance from the plane.
    pub fn plane(f: Plane) -> Primitive {
        Primitive::leaf(PrimCore::Plane(f), Kind::Plane, 1)
    }

    /// An axis-aligned cuboid: the potential is the largest of the six
    /// face half-space potentials.
    pub fn block(b: Box3) -> Primitive {
        Primitive::leaf(PrimCore::Block(b), Kind::Block, 0)
    }

    /// A user primitive; semantics come from the registered callbacks
    /// for `tag` (see [`register_user_primitive`]).
    pub fn user(tag: i32) -> Primitive {
        let degree = user::degree(tag);
        Primitive::leaf(PrimCore::User(tag), Kind::User(tag), degree)
    }

    fn leaf(core: PrimCore, kind: Kind, degree: i32) -> Primitive {
        Primitive(Arc::new(PrimNode {
            core,
            kind,
            degree,
            flags: AtomicU32::new(0),
            grads: OnceLock::new(),
        }))
    }

    /// Build a two-child interior node. Degree follows the polynomial
    /// estimate: max for sums, sum for products, the numerator's for
    /// quotients, and a multiple for powers.
    pub(crate) fn binary(a: &Primitive, b: &Primitive, op: Op) -> Primitive {
        let degree = match op {
            Op::Plus | Op::Minus => a.degree().max(b.degree()),
            Op::Times => a.degree() + b.degree(),
            Op::Divide => a.degree(),
            Op::Pow => a.degree() * b.as_real().map(|r| r.round() as i32).unwrap_or(1),
            _ => a.degree().max(b.degree()),
        };
        Primitive(Arc::new(PrimNode {
            core: PrimCore::Binary(op, a.clone(), b.clone()),
            kind: Kind::General,
            degree,
            flags: AtomicU32::new(0),
            grads: OnceLock::new(),
        }))
    }

    /// Build a one-child interior node. Transcendentals (and every other
    /// monadic) add one to the degree by convention.
    pub(crate) fn unary(a: &Primitive, op: Op) -> Primitive {
        Primitive(Arc::new(PrimNode {
            core: PrimCore::Unary(op, a.clone()),
            kind: Kind::General,
            degree: a.degree() + 1,
            flags: AtomicU32::new(0),
            grads: OnceLock::new(),
        }))
    }

    /// Retag a freshly built node with an advisory shape kind.
    pub(crate) fn with_kind(mut self, kind: Kind) -> Primitive {
        match Arc::get_mut(&mut self.0) {
            Some(node) => {
                node.kind = kind;
                self
            }
            None => {
                // The fold collapsed to a shared node; retag a shallow copy.
                let node = self.0.as_ref();
                let grads = OnceLock::new();
                if let Some(g) = node.grads.get() {
                    let _ = grads.set(g.clone());
                }
                Primitive(Arc::new(PrimNode {
                    core: node.core.clone(),
                    kind,
                    degree: node.degree,
                    flags: AtomicU32::new(node.flags.load(Ordering::Relaxed)),
                    grads,
                }))
            }
        }
    }

    /// Install the gradient primitives eagerly (named-shape constructors
    /// use this to substitute a better-behaved gradient expression).
    pub(crate) fn install_grads(&self, grads: [Primitive; 3]) {
        let _ = self.0.grads.set(grads);
    }

    /// The advisory shape tag.
    pub fn kind(&self) -> Kind {
        self.0.kind
    }

    /// Restore an advisory shape kind on a freshly rebuilt expression.
    ///
    /// Used by the stream reader, which re-applies operators and must
    /// put the recorded kind back; removing or changing a kind never
    /// changes the potential.
    pub fn retag(&self, kind: Kind) -> Primitive {
        if kind == self.kind() {
            return self.clone();
        }
        self.clone().with_kind(kind)
    }

    /// Re-apply a recorded operator to recorded children, re-running
    /// the construction folds. Used by the stream reader.
    pub fn rebuild(op: Op, a: &Primitive, b: Option<&Primitive>) -> Primitive {
        match b {
            Some(b) if op.diadic() => rebuild_binary(op, a, b),
            None if !op.diadic() => rebuild_unary(op, a),
            _ => {
                warn!("rebuild: operator arity mismatch");
                a.clone()
            }
        }
    }

    /// The operator of an interior node, `None` at leaves.
    pub fn op(&self) -> Option<Op> {
        match &self.0.core {
            PrimCore::Binary(op, _, _) | PrimCore::Unary(op, _) => Some(*op),
            _ => None,
        }
    }

    /// First child of an interior node.
    pub fn child_1(&self) -> Option<Primitive> {
        match &self.0.core {
            PrimCore::Binary(_, a, _) | PrimCore::Unary(_, a) => Some(a.clone()),
            _ => None,
        }
    }

    /// Second child of a two-child interior node.
    pub fn child_2(&self) -> Option<Primitive> {
        match &self.0.core {
            PrimCore::Binary(_, _, b) => Some(b.clone()),
            _ => None,
        }
    }

    /// The constant of a real leaf.
    pub fn as_real(&self) -> Option<Real> {
        match &self.0.core {
            PrimCore::Real(r) => Some(*r),
            _ => None,
        }
    }

    /// The plane of a plane leaf.
    pub fn flat(&self) -> Option<Plane> {
        match &self.0.core {
            PrimCore::Plane(f) => Some(*f),
            _ => None,
        }
    }

    /// The box of a block leaf.
    pub fn block_box(&self) -> Option<Box3> {
        match &self.0.core {
            PrimCore::Block(b) => Some(*b),
            _ => None,
        }
    }

    /// The tag of a user-primitive leaf.
    pub fn user_tag(&self) -> Option<i32> {
        match &self.0.core {
            PrimCore::User(t) => Some(*t),
            _ => None,
        }
    }

    /// The polynomial-degree estimate of the potential.
    pub fn degree(&self) -> i32 {
        self.0.degree
    }

    /// The node identity; stable for the node's lifetime and used as the
    /// shared-node address by the stream writer.
    pub fn unique(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
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

    /// Mark the node written for the current stream; returns whether it
    /// already was. Used by the stream writer.
    pub fn mark_written(&self) -> bool {
        self.0.flags.fetch_or(WRIT_BIT, Ordering::Relaxed) & WRIT_BIT != 0
    }

    /// Clear the written mark across the whole expression. The stream
    /// writer runs this before a top-level write.
    pub fn unwrite(&self) {
        self.0.flags.fetch_and(!WRIT_BIT, Ordering::Relaxed);
        match &self.0.core {
            PrimCore::Binary(_, a, b) => {
                a.unwrite();
                b.unwrite();
            }
            PrimCore::Unary(_, a) => a.unwrite(),
            _ => {}
        }
    }

    /// The potential at a point.
    pub fn value(&self, q: &Point3) -> Real {
        match &self.0.core {
            PrimCore::Real(r) => *r,
            PrimCore::Plane(f) => f.value(q),
            PrimCore::Block(b) => block_value(b, q),
            PrimCore::User(tag) => user::value(*tag, q),
            PrimCore::Binary(op, a, b) => match op {
                Op::Plus => a.value(q) + b.value(q),
                Op::Minus => a.value(q) - b.value(q),
                Op::Times => a.value(q) * b.value(q),
                Op::Divide => a.value(q) / b.value(q),
                Op::Pow => a.value(q).powi(exponent_of(b)),
                _ => {
                    warn!("primitive value: diadic node with monadic operator");
                    0.0
                }
            },
            PrimCore::Unary(op, a) => match op {
                Op::Comp => -a.value(q),
                Op::Abs => a.value(q).abs(),
                Op::Sin => a.value(q).sin(),
                Op::Cos => a.value(q).cos(),
                Op::Exp => a.value(q).exp(),
                Op::Ssqrt => carve_geom::s_sqrt(a.value(q)),
                Op::Sign => carve_geom::sign(a.value(q)),
                _ => {
                    warn!("primitive value: monadic node with diadic operator");
                    0.0
                }
            },
        }
    }

    /// The range of the potential over a box.
    ///
    /// An inclusion-monotone overestimate. Real children are injected
    /// into the interval arithmetic inline, never as coincident-end
    /// intervals: swapped ends mean empty, and rounding must not be able
    /// to manufacture that sentinel.
    pub fn range(&self, b: &Box3) -> Interval {
        match &self.0.core {
            PrimCore::Real(r) => {
                warn!("primitive range: primitive is a single constant");
                Interval::new(*r, *r)
            }
            PrimCore::Plane(f) => f.range(b),
            PrimCore::Block(bb) => block_range(bb, b),
            PrimCore::User(tag) => user::range(*tag, b),
            PrimCore::Binary(op, x, y) => binary_range(*op, x, y, b),
            PrimCore::Unary(op, x) => {
                let r = x.range(b);
                match op {
                    Op::Comp => -r,
                    Op::Abs => r.abs(),
                    Op::Sin => r.sin(),
                    Op::Cos => r.cos(),
                    Op::Exp => r.exp(),
                    Op::Ssqrt => r.s_sqrt(),
                    Op::Sign => r.sign(),
                    _ => {
                        warn!("primitive range: monadic node with diadic operator");
                        r
                    }
                }
            }
        }
    }

    /// The x-partial-derivative primitive (cached).
    pub fn grad_x(&self) -> Primitive {
        self.grads()[0].clone()
    }

    /// The y-partial-derivative primitive (cached).
    pub fn grad_y(&self) -> Primitive {
        self.grads()[1].clone()
    }

    /// The z-partial-derivative primitive (cached).
    pub fn grad_z(&self) -> Primitive {
        self.grads()[2].clone()
    }

    fn grads(&self) -> &[Primitive; 3] {
        self.0.grads.get_or_init(|| grad::derive_grads(self))
    }

    /// The gradient vector at a point.
    pub fn grad(&self, q: &Point3) -> Vec3 {
        let g = self.grads();
        Vec3::new(g[0].value(q), g[1].value(q), g[2].value(q))
    }

    /// Gradient for rendering: a top-level absolute value is peeled so
    /// the direction is defined on the zero set of thin primitives.
    pub fn p_grad(&self, q: &Point3) -> Vec3 {
        match &self.0.core {
            PrimCore::Unary(Op::Abs, a) => a.grad(q),
            _ => self.grad(q),
        }
    }

    /// The range of each gradient component over a box.
    pub fn grad_box(&self, b: &Box3) -> Box3 {
        if self.kind() == Kind::Plane {
            // A plane's gradient is constant; keep the intervals tight.
            let g = self.grads();
            let (x, y, z) = (
                g[0].as_real().unwrap_or(0.0),
                g[1].as_real().unwrap_or(0.0),
                g[2].as_real().unwrap_or(0.0),
            );
            Box3::new(
                Interval::new(x, x),
                Interval::new(y, y),
                Interval::new(z, z),
            )
        } else {
            let g = self.grads();
            Box3::new(g[0].range(b), g[1].range(b), g[2].range(b))
        }
    }

    /// Structural deep copy: every node is rebuilt, sharing nothing with
    /// the original, with shape kinds preserved.
    pub fn deep(&self) -> Primitive {
        let c = match &self.0.core {
            PrimCore::Real(r) => return Primitive::real(*r),
            PrimCore::Plane(f) => return Primitive::plane(*f),
            PrimCore::Block(b) => return Primitive::block(*b),
            PrimCore::User(tag) => return Primitive::user(*tag),
            PrimCore::Binary(op, a, b) => rebuild_binary(*op, &a.deep(), &b.deep()),
            PrimCore::Unary(op, a) => rebuild_unary(*op, &a.deep()),
        };
        c.with_kind(self.kind())
    }
}

/// Round a pow node's exponent child to the integer it must hold.
fn exponent_of(b: &Primitive) -> i32 {
    match b.as_real() {
        Some(r) => r.round() as i32,
        None => {
            warn!("primitive exponent is not a real");
            1
        }
    }
}

/// Re-apply a diadic operator, re-running the folds.
pub(crate) fn rebuild_binary(op: Op, a: &Primitive, b: &Primitive) -> Primitive {
    match op {
        Op::Plus => a + b,
        Op::Minus => a - b,
        Op::Times => a * b,
        Op::Divide => a / b,
        Op::Pow => a.pow(b),
        _ => {
            warn!("rebuild: monadic operator in diadic position");
            a.clone()
        }
    }
}

/// Re-apply a monadic operator, re-running the folds.
pub(crate) fn rebuild_unary(op: Op, a: &Primitive) -> Primitive {
    match op {
        Op::Comp => -a,
        Op::Abs => abs(a),
        Op::Sin => sin(a),
        Op::Cos => cos(a),
        Op::Exp => exp(a),
        Op::Ssqrt => s_sqrt(a),
        Op::Sign => sign(a),
        _ => {
            warn!("rebuild: diadic operator in monadic position");
            a.clone()
        }
    }
}

/// The block potential: the largest of the six face half-space values.
fn block_value(b: &Box3, q: &Point3) -> Real {
    (b.x.lo - q.x)
        .max(q.x - b.x.hi)
        .max(b.y.lo - q.y)
        .max(q.y - b.y.hi)
        .max(b.z.lo - q.z)
        .max(q.z - b.z.hi)
}

/// Interval extension of the block potential.
fn block_range(b: &Box3, over: &Box3) -> Interval {
    let faces = [
        b.x.lo - over.x,
        over.x - b.x.hi,
        b.y.lo - over.y,
        over.y - b.y.hi,
        b.z.lo - over.z,
        over.z - b.z.hi,
    ];
    let mut it = faces.iter();
    let first = *it.next().expect("six faces");
    it.fold(first, |acc, f| {
        Interval::new(acc.lo.max(f.lo), acc.hi.max(f.hi))
    })
}

fn binary_range(op: Op, x: &Primitive, y: &Primitive, b: &Box3) -> Interval {
    let rx = x.as_real();
    let ry = y.as_real();
    match op {
        Op::Plus => match (rx, ry) {
            (Some(a), Some(c)) => {
                warn!("primitive range: real + real survived folding");
                Interval::new(a + c, a + c)
            }
            (Some(a), None) => a + y.range(b),
            (None, Some(c)) => x.range(b) + c,
            (None, None) => x.range(b) + y.range(b),
        },
        Op::Minus => match (rx, ry) {
            (Some(a), Some(c)) => {
                warn!("primitive range: real - real survived folding");
                Interval::new(a - c, a - c)
            }
            (Some(a), None) => a - y.range(b),
            (None, Some(c)) => x.range(b) - c,
            (None, None) => x.range(b) - y.range(b),
        },
        Op::Times => match (rx, ry) {
            (Some(a), Some(c)) => {
                warn!("primitive range: real * real survived folding");
                Interval::new(a * c, a * c)
            }
            (Some(a), None) => a * y.range(b),
            (None, Some(c)) => x.range(b) * c,
            (None, None) => x.range(b) * y.range(b),
        },
        Op::Divide => match ry {
            Some(c) if c != 0.0 => x.range(b) / c,
            Some(_) => {
                warn!("primitive range: division by zero");
                x.range(b)
            }
            None => {
                log::error!("primitive range: rational primitive");
                x.range(b)
            }
        },
        Op::Pow => x.range(b).pow(exponent_of(y)),
        _ => {
            warn!("primitive range: monadic operator in diadic node");
            x.range(b)
        }
    }
}

impl PartialEq for Primitive {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Primitive {}

impl std::hash::Hash for Primitive {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.unique().hash(state);
    }
}

impl std::fmt::Debug for Primitive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.0.core {
            PrimCore::Real(r) => write!(f, "Real({r})"),
            PrimCore::Plane(p) => write!(f, "Plane({:?}, {})", p.normal, p.d),
            PrimCore::Block(b) => write!(f, "Block({b:?})"),
            PrimCore::User(t) => write!(f, "User({t})"),
            PrimCore::Binary(op, a, b) => write!(f, "({a:?} {op:?} {b:?})"),
            PrimCore::Unary(op, a) => write!(f, "{op:?}({a:?})"),
        }
    }
}

// ============================================================================
// The five arithmetic operations; simple real arithmetic folds away.
// ============================================================================

fn prim_add(a: &Primitive, b: &Primitive) -> Primitive {
    match (a.as_real(), b.as_real()) {
        (Some(ra), Some(rb)) => return Primitive::real(ra + rb),
        (Some(ra), None) => {
            if let Some(fb) = b.flat() {
                // Real + plane is a shift of the offset.
                return Primitive::plane(Plane {
                    normal: fb.normal,
                    d: fb.d + ra,
                });
            }
        }
        (None, Some(rb)) => {
            if let Some(fa) = a.flat() {
                return Primitive::plane(Plane {
                    normal: fa.normal,
                    d: fa.d + rb,
                });
            }
        }
        (None, None) => {
            if let (Some(fa), Some(fb)) = (a.flat(), b.flat()) {
                // Two planes make a plane, but with a scaled potential.
                return scaled_plane_sum(
                    fa.normal + fb.normal,
                    fa.d + fb.d,
                );
            }
        }
    }
    Primitive::binary(a, b, Op::Plus)
}

fn prim_sub(a: &Primitive, b: &Primitive) -> Primitive {
    match (a.as_real(), b.as_real()) {
        (Some(ra), Some(rb)) => return Primitive::real(ra - rb),
        (None, Some(rb)) => {
            if let Some(fa) = a.flat() {
                return Primitive::plane(Plane {
                    normal: fa.normal,
                    d: fa.d - rb,
                });
            }
        }
        (Some(ra), None) => {
            if let Some(fb) = b.flat() {
                // real - plane flips the plane and shifts it.
                return Primitive::plane(-Plane {
                    normal: fb.normal,
                    d: fb.d - ra,
                });
            }
        }
        (None, None) => {
            if let (Some(fa), Some(fb)) = (a.flat(), b.flat()) {
                return scaled_plane_sum(
                    fa.normal - fb.normal,
                    fa.d - fb.d,
                );
            }
        }
    }
    Primitive::binary(a, b, Op::Minus)
}

/// `|n| * plane(n, d)`: the combined plane keeps a unit normal while the
/// scale factor preserves the magnitude of the summed potentials.
fn scaled_plane_sum(n: Vec3, d: Real) -> Primitive {
    let scale = n.norm();
    if scale < carve_geom::TOL {
        // The normals cancelled; only the constant offset remains.
        return Primitive::real(d);
    }
    let flat = Primitive::plane(Plane {
        normal: n / scale,
        d: d / scale,
    });
    &Primitive::real(scale) * &flat
}

fn prim_mul(a: &Primitive, b: &Primitive) -> Primitive {
    if let (Some(ra), Some(rb)) = (a.as_real(), b.as_real()) {
        Primitive::real(ra * rb)
    } else {
        Primitive::binary(a, b, Op::Times)
    }
}

fn prim_div(a: &Primitive, b: &Primitive) -> Primitive {
    let rb = match b.as_real() {
        Some(r) => r,
        None => {
            warn!("primitive divide: rational primitives not supported");
            return a.clone();
        }
    };
    if rb == 0.0 {
        warn!("primitive divide: division by zero");
        return a.clone();
    }
    if let Some(ra) = a.as_real() {
        Primitive::real(ra / rb)
    } else {
        Primitive::binary(a, b, Op::Divide)
    }
}

impl Primitive {
    /// Raise to a power. The exponent must reduce to a non-negative
    /// integer real; violations warn and return the base unchanged.
    pub fn pow(&self, b: &Primitive) -> Primitive {
        let rb = match b.as_real() {
            Some(r) => r,
            None => {
                warn!("primitive pow: primitive ^ primitive not supported");
                return self.clone();
            }
        };
        if (rb - rb.round()).abs() > carve_geom::TOL {
            warn!("primitive pow: non-integer exponent rounded");
        }
        let n = rb.round() as i32;
        if let Some(ra) = self.as_real() {
            return Primitive::real(ra.powi(n));
        }
        if n < 0 {
            warn!("primitive pow: negative exponents not supported");
            return self.clone();
        }
        match n {
            0 => Primitive::real(1.0),
            1 => self.clone(),
            _ => Primitive::binary(self, &Primitive::real(n as Real), Op::Pow),
        }
    }

    /// Raise to an integer power.
    pub fn powi(&self, n: i32) -> Primitive {
        self.pow(&Primitive::real(n as Real))
    }
}

impl std::ops::Add for &Primitive {
    type Output = Primitive;
    fn add(self, rhs: Self) -> Primitive {
        prim_add(self, rhs)
    }
}

impl std::ops::Add for Primitive {
    type Output = Primitive;
    fn add(self, rhs: Primitive) -> Primitive {
        prim_add(&self, &rhs)
    }
}

impl std::ops::Sub for &Primitive {
    type Output = Primitive;
    fn sub(self, rhs: Self) -> Primitive {
        prim_sub(self, rhs)
    }
}

impl std::ops::Sub for Primitive {
    type Output = Primitive;
    fn sub(self, rhs: Primitive) -> Primitive {
        prim_sub(&self, &rhs)
    }
}

impl std::ops::Mul for &Primitive {
    type Output = Primitive;
    fn mul(self, rhs: Self) -> Primitive {
        prim_mul(self, rhs)
    }
}

impl std::ops::Mul for Primitive {
    type Output = Primitive;
    fn mul(self, rhs: Primitive) -> Primitive {
        prim_mul(&self, &rhs)
    }
}

impl std::ops::Div for &Primitive {
    type Output = Primitive;
    fn div(self, rhs: Self) -> Primitive {
        prim_div(self, rhs)
    }
}

impl std::ops::Div for Primitive {
    type Output = Primitive;
    fn div(self, rhs: Primitive) -> Primitive {
        prim_div(&self, &rhs)
    }
}

// ============================================================================
// Complement and the monadic functions. Applied to a real leaf they fold
// to a real leaf; a double complement collapses to the original child.
// ============================================================================

fn prim_neg(a: &Primitive) -> Primitive {
    if let Some(r) = a.as_real() {
        return Primitive::real(-r);
    }
    if let Some(f) = a.flat() {
        return Primitive::plane(-f);
    }
    if a.op() == Some(Op::Comp) {
        return a.child_1().expect("complement node has a child");
    }
    // The shape survives complementing (a hollow sphere is still a sphere).
    Primitive::unary(a, Op::Comp).with_kind(a.kind())
}

impl std::ops::Neg for &Primitive {
    type Output = Primitive;
    fn neg(self) -> Primitive {
        prim_neg(self)
    }
}

impl std::ops::Neg for Primitive {
    type Output = Primitive;
    fn neg(self) -> Primitive {
        prim_neg(&self)
    }
}

/// Absolute value of a primitive: a thin sheet along the zero set.
pub fn abs(a: &Primitive) -> Primitive {
    match a.as_real() {
        Some(r) => Primitive::real(r.abs()),
        None => Primitive::unary(a, Op::Abs),
    }
}

/// Sine of a primitive.
pub fn sin(a: &Primitive) -> Primitive {
    match a.as_real() {
        Some(r) => Primitive::real(r.sin()),
        None => Primitive::unary(a, Op::Sin),
    }
}

/// Cosine of a primitive.
pub fn cos(a: &Primitive) -> Primitive {
    match a.as_real() {
        Some(r) => Primitive::real(r.cos()),
        None => Primitive::unary(a, Op::Cos),
    }
}

/// Exponential of a primitive.
pub fn exp(a: &Primitive) -> Primitive {
    match a.as_real() {
        Some(r) => Primitive::real(r.exp()),
        None => Primitive::unary(a, Op::Exp),
    }
}

/// Signed square root of a primitive: same sign, same zero set, flatter
/// growth. Its gradient is the gradient of the argument.
pub fn s_sqrt(a: &Primitive) -> Primitive {
    match a.as_real() {
        Some(r) => Primitive::real(carve_geom::s_sqrt(r)),
        None => Primitive::unary(a, Op::Ssqrt),
    }
}

/// Sign of a primitive; `sign(0)` is 0.
pub fn sign(a: &Primitive) -> Primitive {
    match a.as_real() {
        Some(r) => Primitive::real(carve_geom::sign(r)),
        None => Primitive::unary(a, Op::Sign),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carve_geom::Interval;

    fn x_plane() -> Primitive {
        Primitive::plane(Plane::new(Vec3::x(), &Point3::origin()))
    }

    fn unit_box() -> Box3 {
        Box3::from_corners(&Point3::new(-1.0, -1.0, -1.0), &Point3::new(1.0, 1.0, 1.0))
    }

    #[test]
    fn test_real_folding() {
        let a = Primitive::real(2.0);
        let b = Primitive::real(3.0);
        assert_eq!((&a + &b).as_real(), Some(5.0));
        assert_eq!((&a - &b).as_real(), Some(-1.0));
        assert_eq!((&a * &b).as_real(), Some(6.0));
        assert_eq!((&a / &b).as_real(), Some(2.0 / 3.0));
        assert_eq!(a.pow(&b).as_real(), Some(8.0));
        assert_eq!(abs(&Primitive::real(-4.0)).as_real(), Some(4.0));
        assert_eq!(sign(&Primitive::real(0.0)).as_real(), Some(0.0));
    }

    #[test]
    fn test_plane_real_shift() {
        let p = x_plane();
        let shifted = &p + &Primitive::real(2.0);
        assert_eq!(shifted.kind(), Kind::Plane);
        assert!((shifted.value(&Point3::new(1.0, 0.0, 0.0)) - 3.0).abs() < 1e-12);
        let back = &shifted - &Primitive::real(2.0);
        assert!((back.value(&Point3::new(1.0, 0.0, 0.0)) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_real_minus_plane_flips() {
        // 1 - x is the half-space x >= 1 with inverted sign.
        let p = x_plane();
        let c = &Primitive::real(1.0) - &p;
        assert_eq!(c.kind(), Kind::Plane);
        assert!((c.value(&Point3::new(3.0, 0.0, 0.0)) + 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_plane_plus_plane_rescales() {
        let px = x_plane();
        let py = Primitive::plane(Plane::new(Vec3::y(), &Point3::origin()));
        let s = &px + &py;
        // x + y at (1, 1, 0) is 2 regardless of the rescaled encoding.
        assert!((s.value(&Point3::new(1.0, 1.0, 0.0)) - 2.0).abs() < 1e-12);
        assert_eq!(s.op(), Some(Op::Times));
    }

    #[test]
    fn test_opposed_planes_cancel() {
        let px = x_plane();
        let nx = -&px;
        let s = &px + &nx;
        assert_eq!(s.as_real(), Some(0.0));
    }

    #[test]
    fn test_pow_identities() {
        let p = x_plane();
        assert_eq!(p.powi(0).as_real(), Some(1.0));
        assert!(p.powi(1) == p);
        let sq = p.powi(2);
        assert!((sq.value(&Point3::new(3.0, 0.0, 0.0)) - 9.0).abs() < 1e-12);
        assert_eq!(sq.degree(), 2);
        // Negative exponent warns and returns the base.
        assert!(p.powi(-2) == p);
    }

    #[test]
    fn test_divide_guards() {
        let p = x_plane();
        let q = Primitive::plane(Plane::new(Vec3::y(), &Point3::origin()));
        // Rational: defensive identity.
        assert!(&p / &q == p);
        // Division by zero: defensive identity.
        assert!(&p / &Primitive::real(0.0) == p);
        let h = &p / &Primitive::real(2.0);
        assert!((h.value(&Point3::new(3.0, 0.0, 0.0)) - 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_double_complement_collapses() {
        let s = p_sphere(&Point3::origin(), 1.0);
        let cc = -&(-&s);
        assert!(cc == s);
    }

    #[test]
    fn test_complement_folds_leaves() {
        let r = -&Primitive::real(2.0);
        assert_eq!(r.as_real(), Some(-2.0));
        let p = -&x_plane();
        assert_eq!(p.kind(), Kind::Plane);
        assert!((p.value(&Point3::new(2.0, 0.0, 0.0)) + 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_value_operators() {
        let p = x_plane();
        let q = Primitive::plane(Plane::new(Vec3::y(), &Point3::origin()));
        let pt = Point3::new(2.0, 3.0, 0.0);
        assert!(((&p + &q).value(&pt) - 5.0).abs() < 1e-12);
        assert!(((&p * &q).value(&pt) - 6.0).abs() < 1e-12);
        assert!((sin(&p).value(&pt) - 2.0_f64.sin()).abs() < 1e-12);
        assert!((cos(&p).value(&pt) - 2.0_f64.cos()).abs() < 1e-12);
        assert!((exp(&p).value(&pt) - 2.0_f64.exp()).abs() < 1e-12);
        assert!((s_sqrt(&p).value(&pt) - 2.0_f64.sqrt()).abs() < 1e-12);
        assert!((sign(&p).value(&pt) - 1.0).abs() < 1e-12);
        assert!((abs(&-&p).value(&pt) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_degree_propagation() {
        let p = x_plane();
        let q = Primitive::plane(Plane::new(Vec3::y(), &Point3::origin()));
        assert_eq!(p.degree(), 1);
        assert_eq!((&p * &q).degree(), 2);
        assert_eq!((&p.powi(2) + &q).degree(), 2);
        assert_eq!(sin(&p).degree(), 2);
        assert_eq!((&p / &Primitive::real(3.0)).degree(), 1);
    }

    #[test]
    fn test_range_contains_sampled_values() {
        let s = p_sphere(&Point3::origin(), 1.0);
        let b = unit_box();
        let r = s.range(&b);
        for i in 0..8 {
            let v = s.value(&b.corner(i));
            assert!(r.contains(v), "corner value {v} outside [{}, {}]", r.lo, r.hi);
        }
        assert!(r.contains(s.value(&b.centre())));
    }

    #[test]
    fn test_range_real_children_inline() {
        let p = x_plane();
        let shifted = Primitive::binary(&Primitive::real(2.0), &p, Op::Plus);
        let r = shifted.range(&unit_box());
        assert!((r.lo - 1.0).abs() < 1e-12 && (r.hi - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_block_value_and_range() {
        let blk = p_block(&unit_box());
        assert!(blk.value(&Point3::origin()) < 0.0);
        assert!(blk.value(&Point3::new(2.0, 0.0, 0.0)) > 0.0);
        assert!(blk.value(&Point3::new(1.0, 0.0, 0.0)).abs() < 1e-12);
        let over = Box3::from_corners(&Point3::new(-2.0, -2.0, -2.0), &Point3::new(2.0, 2.0, 2.0));
        let r = blk.range(&over);
        for i in 0..8 {
            assert!(r.contains(blk.value(&over.corner(i))));
        }
    }

    #[test]
    fn test_deep_copy_identity_and_independence() {
        let s = p_sphere(&Point3::new(1.0, 2.0, 3.0), 2.0);
        let d = s.deep();
        assert!(d != s);
        assert_eq!(d.kind(), Kind::Sphere);
        let q = Point3::new(3.0, 2.0, 3.0);
        assert!((d.value(&q) - s.value(&q)).abs() < 1e-12);
    }

    #[test]
    fn test_flags_masking() {
        let p = x_plane();
        p.set_flags(0xFFFF_FFFF);
        assert_eq!(p.flags(), FLAG_MASK);
        p.reset_flags(0x1);
        assert_eq!(p.flags(), FLAG_MASK & !1);
        assert!(!p.mark_written());
        assert!(p.mark_written());
        p.unwrite();
        assert!(!p.mark_written());
    }

    #[test]
    fn test_handle_equality_is_identity() {
        let p = x_plane();
        let q = p.clone();
        assert!(p == q);
        let r = x_plane();
        assert!(p != r); // same geometry, different node
    }

    #[test]
    fn test_gradient_cache_shares_nodes() {
        let s = p_sphere(&Point3::origin(), 1.0);
        let gx1 = s.grad_x();
        let gx2 = s.grad_x();
        assert!(gx1 == gx2);
    }

    #[test]
    fn test_range_divide_by_real() {
        let p = x_plane();
        let h = Primitive::binary(&p, &Primitive::real(-2.0), Op::Divide);
        let r = h.range(&unit_box());
        assert!((r.lo + 0.5).abs() < 1e-12 && (r.hi - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_interval_pow_in_range() {
        let p = x_plane();
        let sq = p.powi(2);
        let r = sq.range(&unit_box());
        assert!(r.contains(0.0) && r.contains(1.0));
        assert!(!r.contains(Interval::new(0.0, 0.0).lo - 1.0));
    }
}
