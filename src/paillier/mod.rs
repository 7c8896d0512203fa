//! Arrays of additively homomorphic ciphertexts.
//!
//! An [`EncryptedArray`] wraps an n-dimensional array of ciphertexts and supports the same
//! arithmetic as a plaintext tensor, as far as the encryption scheme allows: additions and
//! subtractions of scalars, plaintext arrays and other encrypted arrays, and multiplications by
//! scalars and plaintext arrays. Multiplying two encrypted arrays requires a multiplicative
//! scheme.
//!
//! The scheme itself is not part of this module: it is plugged in via the [`Ciphertext`] and
//! [`DecryptionKey`] traits.

mod dispatch;
mod tensor;

pub use self::{
    dispatch::{dispatch, Dispatch, Implementation, OpKind, Operand, OperandKind},
    tensor::{Ciphertexts, EncryptedArray, Nested},
};

use std::fmt::Debug;

use thiserror::Error;

/// A single ciphertext of an additively homomorphic encryption scheme.
pub trait Ciphertext: Clone + Debug {
    /// Adds two ciphertexts, i.e. encrypts the sum of their plaintexts.
    fn add(&self, other: &Self) -> Self;

    /// Adds a plaintext to the ciphertext.
    fn add_plain(&self, plain: f64) -> Self;

    /// Multiplies the ciphertext by a plaintext.
    fn mul_plain(&self, plain: f64) -> Self;

    /// Multiplies two ciphertexts, if the scheme supports it.
    fn mul(&self, _other: &Self) -> Option<Self> {
        None
    }
}

/// A key that decrypts single ciphertexts.
pub trait DecryptionKey<C> {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Decrypts a single ciphertext.
    fn decrypt(&self, ciphertext: &C) -> Result<f64, Self::Error>;
}

#[derive(Debug, Error)]
/// Errors related to encrypted arrays.
pub enum EncryptedArrayError {
    #[error("cannot build an encrypted array from {0}")]
    UnsupportedValueType(&'static str),

    #[error("{op} is not implemented for {operand} operands")]
    UnsupportedOperand { op: OpKind, operand: OperandKind },

    #[error("the encryption scheme doesn't support multiplying two ciphertexts")]
    NotMultiplicative,

    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),
}
