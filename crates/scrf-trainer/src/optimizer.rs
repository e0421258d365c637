//! Parameter update rules.

use std::fmt;
use std::str::FromStr;

use ndarray::{Array2, Zip};
use scrf_core::ScrfError;
use serde::{Deserialize, Serialize};

use crate::params::ParamSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerKind {
    /// Constant step along the negative gradient.
    Sgd,
    /// Per-coordinate step scaled by the accumulated squared gradient.
    #[default]
    Adagrad,
    /// Constant step along a decaying sum of gradients.
    Momentum,
}

impl OptimizerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OptimizerKind::Sgd => "sgd",
            OptimizerKind::Adagrad => "adagrad",
            OptimizerKind::Momentum => "momentum",
        }
    }
}

impl fmt::Display for OptimizerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OptimizerKind {
    type Err = ScrfError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sgd" => Ok(OptimizerKind::Sgd),
            "adagrad" => Ok(OptimizerKind::Adagrad),
            "momentum" => Ok(OptimizerKind::Momentum),
            other => Err(ScrfError::UnknownConfig(format!("optimizer `{other}`"))),
        }
    }
}

/// Applies loss gradients to a [`ParamSet`], keeping its own per-parameter
/// state (squared-gradient sums or velocities).
#[derive(Debug, Clone)]
pub struct Optimizer {
    kind: OptimizerKind,
    step_size: f64,
    momentum: f64,
    l2: f64,
    state: ParamSet,
}

impl Optimizer {
    pub fn new(kind: OptimizerKind, step_size: f64) -> Self {
        Self {
            kind,
            step_size,
            momentum: 0.0,
            l2: 0.0,
            state: ParamSet::new(),
        }
    }

    pub fn with_momentum(mut self, momentum: f64) -> Self {
        self.momentum = momentum;
        self
    }

    pub fn with_l2(mut self, l2: f64) -> Self {
        self.l2 = l2;
        self
    }

    /// Resume from saved optimizer state.
    pub fn with_state(mut self, state: ParamSet) -> Self {
        self.state = state;
        self
    }

    pub fn kind(&self) -> OptimizerKind {
        self.kind
    }

    pub fn state(&self) -> &ParamSet {
        &self.state
    }

    /// Take one step against `grads`. Parameters missing from `params` start
    /// at zero.
    pub fn update(&mut self, params: &mut ParamSet, grads: &[(String, Array2<f64>)]) {
        let step = self.step_size;
        for (name, grad) in grads {
            let param = params.entry(name, grad.dim());
            let mut g = grad.clone();
            if self.l2 > 0.0 {
                g.scaled_add(self.l2, param);
            }

            match self.kind {
                OptimizerKind::Sgd => param.scaled_add(-step, &g),
                OptimizerKind::Adagrad => {
                    let accu = self.state.entry(name, grad.dim());
                    Zip::from(param).and(&g).and(accu).for_each(|p, &g, a| {
                        *a += g * g;
                        if *a > 0.0 {
                            *p -= step * g / a.sqrt();
                        }
                    });
                }
                OptimizerKind::Momentum => {
                    let velocity = self.state.entry(name, grad.dim());
                    let momentum = self.momentum;
                    Zip::from(param).and(&g).and(velocity).for_each(|p, &g, v| {
                        *v = momentum * *v + g;
                        *p -= step * *v;
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn grads(g: Array2<f64>) -> Vec<(String, Array2<f64>)> {
        vec![("w".to_string(), g)]
    }

    #[test]
    fn parses_names() {
        assert_eq!("momentum".parse::<OptimizerKind>().unwrap(), OptimizerKind::Momentum);
        assert!(matches!(
            "adam".parse::<OptimizerKind>(),
            Err(ScrfError::UnknownConfig(_))
        ));
    }

    #[test]
    fn sgd_steps_against_gradient() {
        let mut params = ParamSet::new();
        params.insert("w", array![[1.0, 2.0]]);
        let mut opt = Optimizer::new(OptimizerKind::Sgd, 0.5);

        opt.update(&mut params, &grads(array![[1.0, -2.0]]));
        assert_eq!(params.get("w").unwrap(), &array![[0.5, 3.0]]);
    }

    #[test]
    fn adagrad_normalizes_by_history() {
        let mut params = ParamSet::new();
        let mut opt = Optimizer::new(OptimizerKind::Adagrad, 1.0);

        opt.update(&mut params, &grads(array![[2.0, 0.0]]));
        // first step: -g / |g|
        assert_relative_eq!(params.get("w").unwrap()[[0, 0]], -1.0);
        assert_eq!(params.get("w").unwrap()[[0, 1]], 0.0);

        opt.update(&mut params, &grads(array![[2.0, 0.0]]));
        assert_relative_eq!(params.get("w").unwrap()[[0, 0]], -1.0 - 2.0 / 8f64.sqrt());
        assert_relative_eq!(opt.state().get("w").unwrap()[[0, 0]], 8.0);
    }

    #[test]
    fn momentum_accumulates_velocity() {
        let mut params = ParamSet::new();
        let mut opt = Optimizer::new(OptimizerKind::Momentum, 0.1).with_momentum(0.5);

        opt.update(&mut params, &grads(array![[1.0]]));
        opt.update(&mut params, &grads(array![[1.0]]));
        // velocities 1.0 then 1.5
        assert_relative_eq!(params.get("w").unwrap()[[0, 0]], -0.25);
    }

    #[test]
    fn l2_pulls_toward_zero() {
        let mut params = ParamSet::new();
        params.insert("w", array![[4.0]]);
        let mut opt = Optimizer::new(OptimizerKind::Sgd, 0.1).with_l2(0.5);

        opt.update(&mut params, &grads(array![[0.0]]));
        assert_relative_eq!(params.get("w").unwrap()[[0, 0]], 3.8);
    }
}
