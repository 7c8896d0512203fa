//! Stochastic gradient descent with momentum, dampening, weight decay and Nesterov momentum.

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use super::GlobalOptimizer;
use crate::model::{check_aligned, LocalModel, ShapeMismatch, Tensor};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_sgd"))]
#[serde(default)]
/// Hyperparameters of [`Sgd`].
///
/// # Examples
///
/// **TOML**
/// ```text
/// [client.sgd]
/// momentum = 0.9
/// nesterov = true
/// ```
///
/// **Environment variable**
/// ```text
/// FEDAVG_CLIENT__SGD__MOMENTUM=0.9
/// ```
pub struct SgdConfig {
    /// Momentum factor. Defaults to `0`.
    #[validate(range(min = 0.0))]
    pub momentum: f64,
    /// Dampening for momentum, in `[0, 1]`. Defaults to `0`.
    #[validate(range(min = 0.0, max = 1.0))]
    pub dampening: f64,
    /// L2 penalty. Defaults to `0`.
    #[validate(range(min = 0.0))]
    pub weight_decay: f64,
    /// Whether to use Nesterov momentum. Defaults to `false`.
    pub nesterov: bool,
}

impl Default for SgdConfig {
    fn default() -> Self {
        Self {
            momentum: 0.,
            dampening: 0.,
            weight_decay: 0.,
            nesterov: false,
        }
    }
}

/// Nesterov momentum requires a momentum and zero dampening.
fn validate_sgd(s: &SgdConfig) -> Result<(), ValidationError> {
    if !s.nesterov || (s.momentum > 0. && s.dampening == 0.) {
        Ok(())
    } else {
        Err(ValidationError::new(
            "nesterov momentum requires a momentum and zero dampening",
        ))
    }
}

#[derive(Debug)]
/// An SGD optimizer. Momentum buffers are created on the first step.
pub struct Sgd {
    learning_rate: f64,
    config: SgdConfig,
    momentum_buffers: Vec<Option<Tensor>>,
}

impl Sgd {
    /// Creates a new SGD optimizer.
    pub fn new(learning_rate: f64, config: SgdConfig) -> Self {
        Self {
            learning_rate,
            config,
            momentum_buffers: Vec::new(),
        }
    }

    /// Gets the momentum buffers, in parameter order. A buffer is `None` until the first step,
    /// and stays `None` if momentum is disabled.
    pub fn momentum_buffers(&self) -> &[Option<Tensor>] {
        &self.momentum_buffers
    }
}

impl GlobalOptimizer for Sgd {
    fn step(&mut self, model: &mut dyn LocalModel, update: &[Tensor]) -> Result<(), ShapeMismatch> {
        check_aligned(model, update)?;
        if self.momentum_buffers.len() != update.len() {
            self.momentum_buffers = vec![None; update.len()];
        }

        let SgdConfig {
            momentum,
            dampening,
            weight_decay,
            nesterov,
        } = self.config;
        let count = model.num_parameters();
        for (index, grad) in update.iter().enumerate() {
            let mut param = model.parameter_mut(index).ok_or(ShapeMismatch::Count {
                expected: count,
                actual: update.len(),
            })?;

            let mut d_p = grad.clone();
            if weight_decay != 0. {
                d_p.scaled_add(weight_decay, &param);
            }
            if momentum != 0. {
                let buf = match self.momentum_buffers[index].take() {
                    Some(mut buf) => {
                        buf *= momentum;
                        buf.scaled_add(1. - dampening, &d_p);
                        buf
                    }
                    None => d_p.clone(),
                };
                if nesterov {
                    d_p.scaled_add(momentum, &buf);
                } else {
                    d_p.assign(&buf);
                }
                self.momentum_buffers[index] = Some(buf);
            }
            param.scaled_add(-self.learning_rate, &d_p);
        }
        Ok(())
    }
}
