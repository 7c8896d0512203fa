//! Linear regression on synthetic data, as a local trainer for simulations.

use anyhow::{anyhow, Context};
use ndarray::{arr1, Array1, Array2, Ix1};
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::model::{LocalModel, Model, Tensor};

/// Creates a linear model with zero-initialized `weight` of shape `[features]` and `bias` of
/// shape `[1]`.
pub fn linear_model(features: usize) -> Model {
    Model::new()
        .with_parameter("weight", Tensor::zeros(vec![features]))
        .with_parameter("bias", Tensor::zeros(vec![1]))
}

#[derive(Debug, Clone)]
/// Samples of `y = x . weight + bias`.
pub struct Dataset {
    features: Array2<f64>,
    targets: Array1<f64>,
}

impl Dataset {
    /// Draws `samples` uniformly distributed feature vectors from the seeded generator.
    pub fn generate(samples: usize, weight: &Array1<f64>, bias: f64, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let features = Array2::from_shape_fn((samples, weight.len()), |_| rng.gen_range(-1.0..1.0));
        let targets = features.dot(weight) + bias;
        Self { features, targets }
    }

    /// Gets the number of samples.
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Computes the mean squared error of a model created by [`linear_model`].
    pub fn loss(&self, model: &Model) -> anyhow::Result<f64> {
        let (weight, bias) = unpack(model)?;
        let errors = self.features.dot(&weight) + bias - &self.targets;
        Ok(errors.mapv(|e| e * e).mean().unwrap_or(0.))
    }

    /// Takes one full-batch gradient descent step on the mean squared error and returns the loss
    /// before the step.
    pub fn train_step(&self, model: &mut Model, learning_rate: f64) -> anyhow::Result<f64> {
        let (weight, bias) = unpack(model)?;
        let errors = self.features.dot(&weight) + bias - &self.targets;
        let scale = 2. / self.len() as f64;
        let weight_gradient = self.features.t().dot(&errors) * scale;
        let bias_gradient = errors.sum() * scale;

        let weight = (weight - &(weight_gradient * learning_rate)).into_dyn();
        model.assign_parameter(0, weight.view())?;
        let bias = arr1(&[bias - learning_rate * bias_gradient]).into_dyn();
        model.assign_parameter(1, bias.view())?;
        Ok(errors.mapv(|e| e * e).mean().unwrap_or(0.))
    }
}

fn unpack(model: &Model) -> anyhow::Result<(Array1<f64>, f64)> {
    let weight = model
        .get("weight")
        .context("missing weight")?
        .clone()
        .into_dimensionality::<Ix1>()?;
    let bias = model
        .get("bias")
        .and_then(|bias| bias.iter().next().copied())
        .ok_or_else(|| anyhow!("missing bias"))?;
    Ok((weight, bias))
}
