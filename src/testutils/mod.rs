//! Utilities for tests and simulations.

pub mod paillier;
pub mod regression;

use ndarray::arr1;

use crate::model::{LocalModel, Model, Tensor};

const TOLERANCE: f64 = 1e-6;

/// Asserts that two tensors have the same shape and approximately equal elements.
pub fn assert_close(actual: &Tensor, expected: &Tensor) {
    assert_eq!(actual.shape(), expected.shape(), "shapes differ");
    for (a, e) in actual.iter().zip(expected.iter()) {
        assert!(
            (a - e).abs() <= TOLERANCE * e.abs().max(1.),
            "{} != {}\nactual: {}\nexpected: {}",
            a,
            e,
            actual,
            expected
        );
    }
}

/// Asserts that the parameters of two models are approximately equal.
pub fn assert_all_close<M: LocalModel + ?Sized>(actual: &M, expected: &M) {
    assert_eq!(actual.parameter_names(), expected.parameter_names());
    for (a, e) in actual.parameters().iter().zip(expected.parameters()) {
        assert_close(&a.to_owned(), &e.to_owned());
    }
}

/// A small model with a `weight` of shape `[3]` and a `bias` of shape `[1]`.
pub fn model() -> Model {
    Model::new()
        .with_parameter("weight", arr1(&[0.5, -0.5, 1.]).into_dyn())
        .with_parameter("bias", arr1(&[0.]).into_dyn())
}

/// Stands in for a local training step: shifts every element of every parameter by a distinct
/// multiple of `amount`.
pub fn train<M: LocalModel + ?Sized>(model: &mut M, amount: f64) {
    for index in 0..model.num_parameters() {
        if let Some(mut param) = model.parameter_mut(index) {
            for (i, x) in param.iter_mut().enumerate() {
                *x -= amount * (index + i + 1) as f64;
            }
        }
    }
}
