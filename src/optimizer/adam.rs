//! Adam with bias-corrected moment estimates.

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use super::GlobalOptimizer;
use crate::model::{check_aligned, LocalModel, ShapeMismatch, Tensor};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_adam"))]
#[serde(default)]
/// Hyperparameters of [`Adam`].
///
/// # Examples
///
/// **TOML**
/// ```text
/// [client.adam]
/// beta1 = 0.9
/// beta2 = 0.999
/// eps = 1e-8
/// ```
///
/// **Environment variable**
/// ```text
/// FEDAVG_CLIENT__ADAM__BETA1=0.9
/// ```
pub struct AdamConfig {
    /// Decay rate of the first moment estimate, in `[0, 1)`. Defaults to `0.9`.
    pub beta1: f64,
    /// Decay rate of the second moment estimate, in `[0, 1)`. Defaults to `0.999`.
    pub beta2: f64,
    /// Term added to the denominator for numerical stability. Defaults to `1e-8`.
    pub eps: f64,
    /// L2 penalty. Defaults to `0`.
    #[validate(range(min = 0.0))]
    pub weight_decay: f64,
}

impl Default for AdamConfig {
    fn default() -> Self {
        Self {
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            weight_decay: 0.,
        }
    }
}

fn validate_adam(s: &AdamConfig) -> Result<(), ValidationError> {
    let beta_range = 0.0..1.0;
    if !beta_range.contains(&s.beta1) || !beta_range.contains(&s.beta2) {
        return Err(ValidationError::new("betas must be in [0, 1)"));
    }
    if s.eps <= 0. {
        return Err(ValidationError::new("eps must be positive"));
    }
    Ok(())
}

#[derive(Debug)]
/// An Adam optimizer. Moment estimates are created on the first step.
pub struct Adam {
    learning_rate: f64,
    config: AdamConfig,
    step_count: u64,
    exp_avg: Vec<Tensor>,
    exp_avg_sq: Vec<Tensor>,
}

impl Adam {
    /// Creates a new Adam optimizer.
    pub fn new(learning_rate: f64, config: AdamConfig) -> Self {
        Self {
            learning_rate,
            config,
            step_count: 0,
            exp_avg: Vec::new(),
            exp_avg_sq: Vec::new(),
        }
    }

    /// Gets the number of steps taken so far.
    pub fn step_count(&self) -> u64 {
        self.step_count
    }

    fn init_moments(&mut self, update: &[Tensor]) {
        if self.exp_avg.len() != update.len() {
            self.exp_avg = update.iter().map(|g| Tensor::zeros(g.raw_dim())).collect();
            self.exp_avg_sq = update.iter().map(|g| Tensor::zeros(g.raw_dim())).collect();
        }
    }
}

impl GlobalOptimizer for Adam {
    fn step(&mut self, model: &mut dyn LocalModel, update: &[Tensor]) -> Result<(), ShapeMismatch> {
        check_aligned(model, update)?;
        self.init_moments(update);
        self.step_count += 1;

        let AdamConfig {
            beta1,
            beta2,
            eps,
            weight_decay,
        } = self.config;
        let t = self.step_count as f64;
        let bias_correction1 = 1. - beta1.powf(t);
        let bias_correction2 = 1. - beta2.powf(t);

        let count = model.num_parameters();
        for (index, grad) in update.iter().enumerate() {
            let mut param = model.parameter_mut(index).ok_or(ShapeMismatch::Count {
                expected: count,
                actual: update.len(),
            })?;

            let mut g = grad.clone();
            if weight_decay != 0. {
                g.scaled_add(weight_decay, &param);
            }

            let m = &mut self.exp_avg[index];
            *m *= beta1;
            m.scaled_add(1. - beta1, &g);

            let v = &mut self.exp_avg_sq[index];
            *v *= beta2;
            v.scaled_add(1. - beta2, &g.mapv(|x| x * x));

            let denom = v.mapv(|x| (x / bias_correction2).sqrt() + eps);
            let step = &*m / bias_correction1 / &denom;
            param.scaled_add(-self.learning_rate, &step);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use ndarray::arr1;

    use super::*;
    use crate::{model::Model, testutils::assert_close};

    #[test]
    fn test_first_step_moves_by_learning_rate() {
        // with bias correction, the first step is lr * g / (|g| + eps)
        let mut model = Model::new().with_parameter("w", arr1(&[1., 1., 1.]).into_dyn());
        let mut adam = Adam::new(0.1, AdamConfig::default());
        adam.step(&mut model, &[arr1(&[2., -3., 0.]).into_dyn()])
            .unwrap();
        assert_close(model.get("w").unwrap(), &arr1(&[0.9, 1.1, 1.]).into_dyn());
        assert_eq!(adam.step_count(), 1);
    }

    #[test]
    fn test_moments_persist_across_steps() {
        let mut model = Model::new().with_parameter("w", arr1(&[0.]).into_dyn());
        let config = AdamConfig {
            beta1: 0.5,
            beta2: 0.5,
            eps: 0.,
            ..AdamConfig::default()
        };
        let mut adam = Adam::new(1., config);
        adam.step(&mut model, &[arr1(&[1.]).into_dyn()]).unwrap();
        assert_close(model.get("w").unwrap(), &arr1(&[-1.]).into_dyn());

        // m = 0.25 + 0.5 * 3 = 1.75, v = 0.25 + 0.5 * 9 = 4.75
        // m_hat = 1.75 / 0.75, v_hat = 4.75 / 0.75
        adam.step(&mut model, &[arr1(&[3.]).into_dyn()]).unwrap();
        let expected = -1. - (1.75 / 0.75) / (4.75_f64 / 0.75).sqrt();
        assert_close(model.get("w").unwrap(), &arr1(&[expected]).into_dyn());
        assert_eq!(adam.step_count(), 2);
    }

    #[test]
    fn test_step_rejects_misaligned_update() {
        let mut model = Model::new().with_parameter("w", arr1(&[0., 0.]).into_dyn());
        let expected = model.clone();
        let mut adam = Adam::new(0.1, AdamConfig::default());
        assert!(matches!(
            adam.step(&mut model, &[arr1(&[1.]).into_dyn()]),
            Err(ShapeMismatch::Shape { index: 0, .. })
        ));
        assert_eq!(model, expected);
        assert_eq!(adam.step_count(), 0);
    }

    #[test]
    fn test_validate_adam() {
        assert!(validate_adam(&AdamConfig::default()).is_ok());
        assert!(validate_adam(&AdamConfig {
            beta1: 1.,
            ..AdamConfig::default()
        })
        .is_err());
        assert!(validate_adam(&AdamConfig {
            beta2: -0.1,
            ..AdamConfig::default()
        })
        .is_err());
        assert!(validate_adam(&AdamConfig {
            eps: 0.,
            ..AdamConfig::default()
        })
        .is_err());
        assert!(AdamConfig {
            weight_decay: -1.,
            ..AdamConfig::default()
        }
        .validate()
        .is_err());
    }
}
