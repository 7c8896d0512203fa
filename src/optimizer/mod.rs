//! Optimizers applying a global gradient to the local model.
//!
//! When the aggregator doesn't update the global model itself, it broadcasts the aggregated
//! gradient instead and every client integrates it locally with one of the optimizers of this
//! module. The optimizers own their state (momentum buffers, moment estimates, step counter), so
//! that it carries over from one round to the next.

mod adam;
mod sgd;

pub use self::{
    adam::{Adam, AdamConfig},
    sgd::{Sgd, SgdConfig},
};

use std::{fmt::Debug, str::FromStr};

use derive_more::Display;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::model::{LocalModel, ShapeMismatch, Tensor};

/// An optimizer that moves the parameters of a model along a global gradient.
pub trait GlobalOptimizer: Debug + Send {
    /// Applies `update` to the parameters of `model`, in place.
    ///
    /// `update` is aligned with the parameter order of the model.
    ///
    /// # Errors
    /// Fails if `update` doesn't line up with the parameters of `model`. No parameter is written
    /// in that case.
    fn step(&mut self, model: &mut dyn LocalModel, update: &[Tensor]) -> Result<(), ShapeMismatch>;
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("optimizer `{0}` is not supported: expected one of `sgd`, `adam` or `none`")]
/// An error related to the selection of an unknown optimizer.
pub struct UnsupportedOptimizer(pub String);

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
/// The optimizers available for applying global gradients.
pub enum OptimizerKind {
    #[display(fmt = "sgd")]
    Sgd,
    #[display(fmt = "adam")]
    Adam,
    /// Global gradients are not applied at all.
    #[display(fmt = "none")]
    None,
}

impl FromStr for OptimizerKind {
    type Err = UnsupportedOptimizer;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sgd" => Ok(OptimizerKind::Sgd),
            "adam" => Ok(OptimizerKind::Adam),
            "none" => Ok(OptimizerKind::None),
            _ => Err(UnsupportedOptimizer(s.to_string())),
        }
    }
}

/// Builds the optimizer named `name`.
///
/// Returns `Ok(None)` for the `none` optimizer.
///
/// # Errors
/// Fails if `name` is not one of `sgd`, `adam` or `none`.
pub fn for_global_gradients(
    name: &str,
    learning_rate: f64,
    sgd: &SgdConfig,
    adam: &AdamConfig,
) -> Result<Option<Box<dyn GlobalOptimizer>>, UnsupportedOptimizer> {
    let kind = name.parse::<OptimizerKind>()?;
    debug!(optimizer = %kind, learning_rate, "building optimizer for global gradients");
    let optimizer: Option<Box<dyn GlobalOptimizer>> = match kind {
        OptimizerKind::Sgd => Some(Box::new(Sgd::new(learning_rate, sgd.clone()))),
        OptimizerKind::Adam => Some(Box::new(Adam::new(learning_rate, adam.clone()))),
        OptimizerKind::None => None,
    };
    Ok(optimizer)
}
