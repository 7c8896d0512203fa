//! Local model representation.
//!
//! The client never looks inside a model: it only needs an ordered sequence of parameter
//! tensors, a named view of the same parameters and a way to overwrite each parameter in place.
//! This is what the [`LocalModel`] trait captures. [`Model`] is a plain in-memory
//! implementation of it.

use std::{collections::HashMap, iter::FromIterator};

use ndarray::{ArrayD, ArrayViewD, ArrayViewMutD};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A dense parameter tensor.
pub type Tensor = ArrayD<f64>;

/// The named parameter state of a model.
pub type StateDict = HashMap<String, Tensor>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
/// Errors related to tensors that don't line up with the parameters of a model.
pub enum ShapeMismatch {
    #[error("expected {expected} parameters, got {actual}")]
    Count { expected: usize, actual: usize },

    #[error("parameter {index} has shape {expected:?}, got {actual:?}")]
    Shape {
        index: usize,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("parameter {index} has {expected} elements, got {actual}")]
    Elements {
        index: usize,
        expected: usize,
        actual: usize,
    },

    #[error("missing parameter `{0}`")]
    Missing(String),

    #[error("unexpected parameter `{0}`")]
    Unexpected(String),
}

/// A machine learning model owned by a client.
///
/// Implementors expose their parameters in a fixed order. The order must not change during the
/// lifetime of the model since snapshots, gradients and global updates are all aligned with it.
pub trait LocalModel {
    /// Gets the parameter names, in parameter order.
    fn parameter_names(&self) -> Vec<&str>;

    /// Gets read-only views of the parameters, in parameter order.
    fn parameters(&self) -> Vec<ArrayViewD<'_, f64>>;

    /// Gets a mutable view of the parameter at `index`, if any.
    fn parameter_mut(&mut self, index: usize) -> Option<ArrayViewMutD<'_, f64>>;

    /// Gets the number of parameters.
    fn num_parameters(&self) -> usize {
        self.parameters().len()
    }

    /// Overwrites the parameter at `index` in place.
    ///
    /// # Errors
    /// Fails if there is no such parameter or if `value` doesn't have the shape of the parameter.
    /// The parameter is left untouched in that case.
    fn assign_parameter(
        &mut self,
        index: usize,
        value: ArrayViewD<'_, f64>,
    ) -> Result<(), ShapeMismatch> {
        let count = self.num_parameters();
        let mut param = self.parameter_mut(index).ok_or(ShapeMismatch::Count {
            expected: count,
            actual: index + 1,
        })?;
        if param.shape() != value.shape() {
            return Err(ShapeMismatch::Shape {
                index,
                expected: param.shape().to_vec(),
                actual: value.shape().to_vec(),
            });
        }
        param.assign(&value);
        Ok(())
    }

    /// Copies the parameters into a named mapping.
    fn state_dict(&self) -> StateDict {
        self.parameter_names()
            .into_iter()
            .zip(self.parameters())
            .map(|(name, param)| (name.to_string(), param.to_owned()))
            .collect()
    }

    /// Overwrites every parameter with the identically named tensor of `state`.
    ///
    /// # Errors
    /// Fails if `state` misses a parameter, contains an unknown one or if any shape differs. The
    /// whole state is checked before the first parameter is written, so the model is left
    /// untouched on failure.
    fn load_state_dict(&mut self, state: &StateDict) -> Result<(), ShapeMismatch> {
        check_state_dict(self, state)?;
        let names: Vec<String> = self
            .parameter_names()
            .into_iter()
            .map(str::to_string)
            .collect();
        for (index, name) in names.iter().enumerate() {
            // safe indexing: checked above
            self.assign_parameter(index, state[name].view())?;
        }
        Ok(())
    }
}

/// Checks that `state` names exactly the parameters of `model`, with matching shapes.
pub(crate) fn check_state_dict<M>(model: &M, state: &StateDict) -> Result<(), ShapeMismatch>
where
    M: LocalModel + ?Sized,
{
    let names = model.parameter_names();
    for (index, (name, param)) in names.iter().zip(model.parameters()).enumerate() {
        let value = state
            .get(*name)
            .ok_or_else(|| ShapeMismatch::Missing(name.to_string()))?;
        if value.shape() != param.shape() {
            return Err(ShapeMismatch::Shape {
                index,
                expected: param.shape().to_vec(),
                actual: value.shape().to_vec(),
            });
        }
    }
    if let Some(unknown) = state.keys().find(|key| !names.contains(&key.as_str())) {
        return Err(ShapeMismatch::Unexpected(unknown.clone()));
    }
    Ok(())
}

/// Checks that `tensors` is positionally aligned with the parameters of `model`.
pub(crate) fn check_aligned<M>(model: &M, tensors: &[Tensor]) -> Result<(), ShapeMismatch>
where
    M: LocalModel + ?Sized,
{
    let params = model.parameters();
    if params.len() != tensors.len() {
        return Err(ShapeMismatch::Count {
            expected: params.len(),
            actual: tensors.len(),
        });
    }
    for (index, (param, tensor)) in params.iter().zip(tensors).enumerate() {
        if param.shape() != tensor.shape() {
            return Err(ShapeMismatch::Shape {
                index,
                expected: param.shape().to_vec(),
                actual: tensor.shape().to_vec(),
            });
        }
    }
    Ok(())
}

/// Like [`check_aligned`], but only requires the element counts to agree.
pub(crate) fn check_reshapeable<M>(model: &M, tensors: &[Tensor]) -> Result<(), ShapeMismatch>
where
    M: LocalModel + ?Sized,
{
    let params = model.parameters();
    if params.len() != tensors.len() {
        return Err(ShapeMismatch::Count {
            expected: params.len(),
            actual: tensors.len(),
        });
    }
    for (index, (param, tensor)) in params.iter().zip(tensors).enumerate() {
        if param.len() != tensor.len() {
            return Err(ShapeMismatch::Elements {
                index,
                expected: param.len(),
                actual: tensor.len(),
            });
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
/// An in-memory model made of named dense tensors.
pub struct Model {
    names: Vec<String>,
    parameters: Vec<Tensor>,
}

#[allow(clippy::len_without_is_empty)]
impl Model {
    /// Creates a model without parameters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a parameter and returns the model.
    pub fn with_parameter(mut self, name: impl Into<String>, value: Tensor) -> Self {
        self.push(name, value);
        self
    }

    /// Appends a parameter. A parameter with the same name is replaced in place instead.
    pub fn push(&mut self, name: impl Into<String>, value: Tensor) {
        let name = name.into();
        match self.names.iter().position(|n| *n == name) {
            Some(index) => self.parameters[index] = value,
            None => {
                self.names.push(name);
                self.parameters.push(value);
            }
        }
    }

    /// Gets the number of parameters of this model.
    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    /// Creates an iterator over the named parameters of this model.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Tensor)> {
        self.names
            .iter()
            .map(String::as_str)
            .zip(self.parameters.iter())
    }

    /// Gets the parameter with the given name.
    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|index| &self.parameters[index])
    }
}

impl FromIterator<(String, Tensor)> for Model {
    fn from_iter<I: IntoIterator<Item = (String, Tensor)>>(iter: I) -> Self {
        let mut model = Model::new();
        for (name, value) in iter {
            model.push(name, value);
        }
        model
    }
}

impl LocalModel for Model {
    fn parameter_names(&self) -> Vec<&str> {
        self.names.iter().map(String::as_str).collect()
    }

    fn parameters(&self) -> Vec<ArrayViewD<'_, f64>> {
        self.parameters.iter().map(Tensor::view).collect()
    }

    fn parameter_mut(&mut self, index: usize) -> Option<ArrayViewMutD<'_, f64>> {
        self.parameters.get_mut(index).map(Tensor::view_mut)
    }

    fn num_parameters(&self) -> usize {
        self.parameters.len()
    }
}
