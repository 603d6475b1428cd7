//! Symbolic derivation of the three partial-derivative primitives.
//!
//! Invoked once per node, on the first gradient request, and cached in
//! the node's gradient slots. The rules are ordinary calculus except for
//! the signed square root, whose "gradient" is the gradient of the
//! underlying function: the true derivative blows up on the surface,
//! and the kernel only ever uses gradient directions.

use log::warn;

use crate::{cos, exp, sign, sin, Op, PrimCore, Primitive};

/// Derive `[d/dx, d/dy, d/dz]` for a node.
pub(crate) fn derive_grads(p: &Primitive) -> [Primitive; 3] {
    let zero = || {
        [
            Primitive::real(0.0),
            Primitive::real(0.0),
            Primitive::real(0.0),
        ]
    };
    match &p.0.core {
        PrimCore::Real(_) => zero(),
        PrimCore::Plane(f) => [
            Primitive::real(f.normal.x),
            Primitive::real(f.normal.y),
            Primitive::real(f.normal.z),
        ],
        PrimCore::Block(_) => {
            // The max-of-faces potential has no single symbolic derivative.
            warn!("primitive grad: block primitive");
            zero()
        }
        PrimCore::User(_) => {
            // The user-primitive callback surface has no gradient hook.
            warn!("primitive grad: user primitive");
            zero()
        }
        PrimCore::Binary(op, a, b) => {
            let ga = [a.grad_x(), a.grad_y(), a.grad_z()];
            match op {
                Op::Plus => {
                    let gb = [b.grad_x(), b.grad_y(), b.grad_z()];
                    [&ga[0] + &gb[0], &ga[1] + &gb[1], &ga[2] + &gb[2]]
                }
                Op::Minus => {
                    let gb = [b.grad_x(), b.grad_y(), b.grad_z()];
                    [&ga[0] - &gb[0], &ga[1] - &gb[1], &ga[2] - &gb[2]]
                }
                Op::Times => {
                    // Product rule.
                    let gb = [b.grad_x(), b.grad_y(), b.grad_z()];
                    [
                        &(a * &gb[0]) + &(b * &ga[0]),
                        &(a * &gb[1]) + &(b * &ga[1]),
                        &(a * &gb[2]) + &(b * &ga[2]),
                    ]
                }
                Op::Divide => [&ga[0] / b, &ga[1] / b, &ga[2] / b],
                Op::Pow => {
                    let n = match b.as_real() {
                        Some(r) => r.round() as i32,
                        None => {
                            warn!("primitive grad: exponent is not a real");
                            return zero();
                        }
                    };
                    // Power rule; n = 0 and 1 fold away at construction.
                    let pm = match n {
                        0 | 1 => {
                            warn!("primitive grad: unreduced exponent {n}");
                            return ga;
                        }
                        2 => a * &Primitive::real(2.0),
                        _ => &a.powi(n - 1) * b,
                    };
                    [&pm * &ga[0], &pm * &ga[1], &pm * &ga[2]]
                }
                _ => {
                    warn!("primitive grad: monadic operator in diadic node");
                    zero()
                }
            }
        }
        PrimCore::Unary(op, a) => {
            let ga = [a.grad_x(), a.grad_y(), a.grad_z()];
            match op {
                Op::Comp => [-&ga[0], -&ga[1], -&ga[2]],
                Op::Abs => {
                    let pm = sign(a);
                    [&ga[0] * &pm, &ga[1] * &pm, &ga[2] * &pm]
                }
                Op::Sin => {
                    let pm = cos(a);
                    [&ga[0] * &pm, &ga[1] * &pm, &ga[2] * &pm]
                }
                Op::Cos => {
                    let pm = sin(&-a);
                    [&ga[0] * &pm, &ga[1] * &pm, &ga[2] * &pm]
                }
                Op::Exp => {
                    let pm = exp(a);
                    [&ga[0] * &pm, &ga[1] * &pm, &ga[2] * &pm]
                }
                // Deliberate: the underlying gradient, not the true
                // derivative, which is unbounded at the zero set.
                Op::Ssqrt => ga,
                // Flat almost everywhere; the spike at zero is ignored.
                Op::Sign => zero(),
                _ => {
                    warn!("primitive grad: diadic operator in monadic node");
                    zero()
                }
            }
        }
    }
}
