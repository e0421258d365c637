//! # Search
//!
//! Dynamic programs over an automaton in topological order: one-best search
//! in the max semiring and forward-backward in the log semiring. Both run on
//! a [`Trellis`], which fixes the vertex order and evaluates every edge score
//! exactly once.

pub mod forward_backward;
pub mod topo;
pub mod trellis;
pub mod viterbi;

pub use forward_backward::ForwardBackward;
pub use topo::{TopoOrder, is_topological, kahn_order};
pub use trellis::Trellis;
pub use viterbi::{OneBest, shortest_path};

use crate::error::{Result, ScrfError};

/// Relative tolerance for forward, backward and decoder totals.
pub const AGREEMENT_TOLERANCE: f64 = 1e-3;

/// `ln(exp(a) + exp(b))` without overflow; `-inf` is the identity.
#[must_use]
pub fn log_add(a: f64, b: f64) -> f64 {
    if a == f64::NEG_INFINITY {
        return b;
    }
    if b == f64::NEG_INFINITY {
        return a;
    }
    let (hi, lo) = if a > b { (a, b) } else { (b, a) };
    hi + (lo - hi).exp().ln_1p()
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() / b.abs().max(1.0) < AGREEMENT_TOLERANCE
}

/// Check that the forward total, the backward total and (when given) the
/// decoder's best score agree within [`AGREEMENT_TOLERANCE`], measured
/// relative to the backward total.
///
/// Two unreachable totals mean there is no path at all.
pub fn check_agreement(forward: f64, backward: f64, decoder: Option<f64>) -> Result<()> {
    if forward == f64::NEG_INFINITY && backward == f64::NEG_INFINITY {
        return Err(ScrfError::NoPath);
    }
    let ok = forward.is_finite()
        && backward.is_finite()
        && close(forward, backward)
        && decoder.is_none_or(|d| d.is_finite() && close(d, backward));
    if ok {
        Ok(())
    } else {
        Err(ScrfError::NumericalInconsistency {
            forward,
            backward,
            decoder,
        })
    }
}
