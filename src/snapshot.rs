//! Parameter snapshots taken at the start of a local training window.

use derive_more::{AsRef, Index};
use tracing::debug;

use crate::model::{LocalModel, ShapeMismatch, Tensor};

#[derive(Debug, Clone, PartialEq, AsRef, Index)]
/// Deep copies of the parameters of a model, in parameter order.
///
/// A snapshot is the baseline from which a client's gradients are computed, and the state the
/// client reverts to before applying a global update.
pub struct ParameterSnapshot(Vec<Tensor>);

#[allow(clippy::len_without_is_empty)]
impl ParameterSnapshot {
    /// Copies every parameter of `model`.
    pub fn take<M: LocalModel + ?Sized>(model: &M) -> Self {
        Self(model.parameters().iter().map(|p| p.to_owned()).collect())
    }

    /// Gets the number of parameters in the snapshot.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Creates an iterator over the snapshotted parameters.
    pub fn iter(&self) -> std::slice::Iter<Tensor> {
        self.0.iter()
    }

    /// Computes `(previous - current) / learning_rate` for every parameter of `model`.
    ///
    /// # Errors
    /// Fails if the model's parameters no longer line up with the snapshot.
    pub fn gradients<M: LocalModel + ?Sized>(
        &self,
        model: &M,
        learning_rate: f64,
    ) -> Result<Vec<Tensor>, ShapeMismatch> {
        crate::model::check_aligned(model, &self.0)?;
        Ok(self
            .0
            .iter()
            .zip(model.parameters())
            .map(|(previous, current)| (previous - &current) / learning_rate)
            .collect())
    }

    /// Writes the snapshotted values back into `model`, in place.
    ///
    /// # Errors
    /// Fails if the model's parameters no longer line up with the snapshot. The model is left
    /// untouched in that case.
    pub fn restore<M: LocalModel + ?Sized>(&self, model: &mut M) -> Result<(), ShapeMismatch> {
        crate::model::check_aligned(model, &self.0)?;
        for (index, previous) in self.0.iter().enumerate() {
            model.assign_parameter(index, previous.view())?;
        }
        debug!("restored {} parameters from snapshot", self.0.len());
        Ok(())
    }
}

impl From<ParameterSnapshot> for Vec<Tensor> {
    fn from(snapshot: ParameterSnapshot) -> Self {
        snapshot.0
    }
}
