//! # Forward-Backward
//!
//! Log-semiring path sums over a [`Trellis`]. `forward[v]` is the log of the
//! summed exponentiated scores of all paths from an initial vertex to `v`,
//! `backward[v]` the same for paths from `v` to a final vertex. An edge's
//! posterior is `exp(forward[tail] + w + backward[head] - log Z)`.

use tracing::{debug, debug_span};

use super::trellis::Trellis;
use super::{check_agreement, log_add};
use crate::error::Result;
use crate::fst::Fst;

/// Forward and backward log sums with the log partition value.
#[derive(Debug, Clone)]
pub struct ForwardBackward {
    forward: Vec<f64>,
    backward: Vec<f64>,
    log_z: f64,
}

impl ForwardBackward {
    /// Run both passes and check that the forward total over final vertices
    /// agrees with the backward total over initial vertices.
    pub fn new<F: Fst>(trellis: &Trellis<'_, F>) -> Result<Self> {
        let _span = debug_span!("forward_backward", vertices = trellis.len()).entered();
        let n = trellis.len();

        let mut forward = vec![f64::NEG_INFINITY; n];
        for i in trellis.initial_positions() {
            forward[i] = 0.0;
        }
        for i in 0..n {
            let mut acc = forward[i];
            for &(e, t) in trellis.incoming(i) {
                let w = trellis.weight(e).unwrap_or(f64::NEG_INFINITY);
                acc = log_add(acc, forward[t] + w);
            }
            forward[i] = acc;
        }

        let mut backward = vec![f64::NEG_INFINITY; n];
        for i in trellis.final_positions() {
            backward[i] = 0.0;
        }
        for i in (0..n).rev() {
            let mut acc = backward[i];
            for &(e, h) in trellis.outgoing(i) {
                let w = trellis.weight(e).unwrap_or(f64::NEG_INFINITY);
                acc = log_add(acc, w + backward[h]);
            }
            backward[i] = acc;
        }

        let log_z = trellis
            .final_positions()
            .into_iter()
            .fold(f64::NEG_INFINITY, |acc, i| log_add(acc, forward[i]));
        let total_backward = trellis
            .initial_positions()
            .into_iter()
            .fold(f64::NEG_INFINITY, |acc, i| log_add(acc, backward[i]));

        debug!(log_z, total_backward, "forward-backward totals");
        check_agreement(log_z, total_backward, None)?;

        Ok(Self {
            forward,
            backward,
            log_z,
        })
    }

    /// `log Z`, the log of the summed exponentiated scores of all paths.
    pub fn log_partition(&self) -> f64 {
        self.log_z
    }

    pub fn forward(&self, i: usize) -> f64 {
        self.forward[i]
    }

    pub fn backward(&self, i: usize) -> f64 {
        self.backward[i]
    }

    /// Posterior probability of the edge `tail -> head` with score `w`.
    pub fn posterior(&self, tail: usize, head: usize, w: f64) -> f64 {
        (self.forward[tail] + w + self.backward[head] - self.log_z).exp()
    }

    /// Posterior of every edge in the trellis.
    pub fn posteriors<F: Fst>(&self, trellis: &Trellis<'_, F>) -> Vec<(F::Edge, f64)> {
        trellis
            .edges()
            .map(|(e, t, h, w)| (e, self.posterior(t, h, w)))
            .collect()
    }
}
