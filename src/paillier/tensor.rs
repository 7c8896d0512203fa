use std::ops::{Add, Mul, Sub};

use derive_more::From;
use ndarray::{ArrayD, IxDyn};
use tracing::trace;

use super::{
    dispatch::{dispatch, Dispatch, OpKind, Operand},
    Ciphertext,
    DecryptionKey,
    EncryptedArrayError,
};
use crate::model::Tensor;

#[derive(Debug, Clone, PartialEq)]
/// A nested sequence of ciphertexts, e.g. `[[c1, c2], [c3, c4]]`.
pub enum Nested<C> {
    Value(C),
    Sequence(Vec<Nested<C>>),
}

#[derive(Debug, Clone, From)]
/// The ciphertexts an [`EncryptedArray`] is built from.
pub enum Ciphertexts<C> {
    /// A native array.
    Array(ArrayD<C>),
    /// A rectangular nested sequence.
    Nested(Nested<C>),
    /// A flat sequence, giving a one-dimensional array.
    Flat(Vec<C>),
}

#[derive(Debug, Clone, PartialEq)]
/// An n-dimensional array of ciphertexts encrypted under a single key.
///
/// The shape of an encrypted array never changes: every operation returns a new array.
pub struct EncryptedArray<C> {
    raw: ArrayD<C>,
}

impl<C> From<ArrayD<C>> for EncryptedArray<C> {
    fn from(raw: ArrayD<C>) -> Self {
        Self { raw }
    }
}

#[allow(clippy::len_without_is_empty)]
impl<C> EncryptedArray<C> {
    /// Creates an encrypted array.
    ///
    /// # Errors
    /// Fails with [`EncryptedArrayError::UnsupportedValueType`] if a nested sequence is ragged or
    /// contains no ciphertexts at all.
    pub fn new(ciphertexts: impl Into<Ciphertexts<C>>) -> Result<Self, EncryptedArrayError> {
        match ciphertexts.into() {
            Ciphertexts::Array(raw) => Ok(Self { raw }),
            Ciphertexts::Flat(elements) => {
                let shape = [elements.len()];
                Self::from_shape_vec(&shape, elements)
            }
            Ciphertexts::Nested(nested) => {
                let mut shape = Vec::new();
                let mut cursor = &nested;
                while let Nested::Sequence(children) = cursor {
                    shape.push(children.len());
                    match children.first() {
                        Some(first) => cursor = first,
                        None => {
                            return Err(EncryptedArrayError::UnsupportedValueType(
                                "an empty sequence",
                            ))
                        }
                    }
                }
                let mut elements = Vec::with_capacity(shape.iter().product());
                flatten(nested, &shape, &mut elements)?;
                Self::from_shape_vec(&shape, elements)
            }
        }
    }

    pub(crate) fn from_shape_vec(
        shape: &[usize],
        elements: Vec<C>,
    ) -> Result<Self, EncryptedArrayError> {
        Ok(Self {
            raw: ArrayD::from_shape_vec(IxDyn(shape), elements)?,
        })
    }

    /// Gets the underlying array of ciphertexts.
    pub fn raw(&self) -> &ArrayD<C> {
        &self.raw
    }

    /// Consumes the encrypted array and returns the underlying array of ciphertexts.
    pub fn into_raw(self) -> ArrayD<C> {
        self.raw
    }

    /// Gets the shape of the array.
    pub fn shape(&self) -> &[usize] {
        self.raw.shape()
    }

    /// Gets the number of ciphertexts in the array.
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    /// Decrypts every ciphertext, giving a plaintext array of the same shape.
    pub fn decrypt<K>(&self, key: &K) -> Result<Tensor, K::Error>
    where
        K: DecryptionKey<C>,
    {
        let mut error = None;
        let plain = self.raw.map(|c| {
            if error.is_some() {
                return 0.;
            }
            key.decrypt(c).unwrap_or_else(|err| {
                error = Some(err);
                0.
            })
        });
        match error {
            Some(err) => Err(err),
            None => Ok(plain),
        }
    }

    /// Decrypts every ciphertext if a key is given. Otherwise gets a plaintext array of zeros
    /// of the same shape.
    pub fn to_plain_or_zero<K>(&self, key: Option<&K>) -> Result<Tensor, K::Error>
    where
        K: DecryptionKey<C>,
    {
        match key {
            Some(key) => self.decrypt(key),
            None => Ok(Tensor::zeros(self.raw.raw_dim())),
        }
    }
}

fn flatten<C>(
    nested: Nested<C>,
    shape: &[usize],
    elements: &mut Vec<C>,
) -> Result<(), EncryptedArrayError> {
    match (nested, shape.split_first()) {
        (Nested::Value(value), None) => {
            elements.push(value);
            Ok(())
        }
        (Nested::Sequence(children), Some((len, rest))) if children.len() == *len => children
            .into_iter()
            .try_for_each(|child| flatten(child, rest, elements)),
        _ => Err(EncryptedArrayError::UnsupportedValueType(
            "a ragged sequence",
        )),
    }
}

impl<C> EncryptedArray<C>
where
    C: Ciphertext,
{
    /// Applies `op` with `rhs` as right-hand side, via the dispatch table.
    ///
    /// # Errors
    /// Fails with [`EncryptedArrayError::UnsupportedOperand`] if nothing is registered for the
    /// operation and the kind of operand.
    pub fn apply(
        &self,
        op: OpKind,
        rhs: &Operand<'_, C>,
    ) -> Result<EncryptedArray<C>, EncryptedArrayError> {
        trace!(%op, operand = %rhs.kind(), shape = ?self.shape(), "applying operation");
        match dispatch::<C>(op, rhs.kind()) {
            Dispatch::Implemented(implementation) => implementation(self, rhs),
            Dispatch::NotImplemented => Err(EncryptedArrayError::UnsupportedOperand {
                op,
                operand: rhs.kind(),
            }),
        }
    }

    /// Adds a scalar, a plaintext array or another encrypted array.
    pub fn add<'a>(
        &self,
        rhs: impl Into<Operand<'a, C>>,
    ) -> Result<EncryptedArray<C>, EncryptedArrayError>
    where
        C: 'a,
    {
        self.apply(OpKind::Add, &rhs.into())
    }

    /// Subtracts a scalar, a plaintext array or another encrypted array.
    pub fn sub<'a>(
        &self,
        rhs: impl Into<Operand<'a, C>>,
    ) -> Result<EncryptedArray<C>, EncryptedArrayError>
    where
        C: 'a,
    {
        self.apply(OpKind::Sub, &rhs.into())
    }

    /// Multiplies by a scalar, a plaintext array or, if the scheme is multiplicative, another
    /// encrypted array.
    pub fn mul<'a>(
        &self,
        rhs: impl Into<Operand<'a, C>>,
    ) -> Result<EncryptedArray<C>, EncryptedArrayError>
    where
        C: 'a,
    {
        self.apply(OpKind::Mul, &rhs.into())
    }
}

macro_rules! impl_op {
    ($trait:ident, $method:ident, $op:expr) => {
        impl<'a, 'b, C: Ciphertext> $trait<&'b EncryptedArray<C>> for &'a EncryptedArray<C> {
            type Output = Result<EncryptedArray<C>, EncryptedArrayError>;

            fn $method(self, rhs: &'b EncryptedArray<C>) -> Self::Output {
                self.apply($op, &Operand::Encrypted(rhs))
            }
        }

        impl<'a, 'b, C: Ciphertext> $trait<&'b Tensor> for &'a EncryptedArray<C> {
            type Output = Result<EncryptedArray<C>, EncryptedArrayError>;

            fn $method(self, rhs: &'b Tensor) -> Self::Output {
                self.apply($op, &Operand::Plain(rhs.view()))
            }
        }

        impl<'a, C: Ciphertext> $trait<f64> for &'a EncryptedArray<C> {
            type Output = Result<EncryptedArray<C>, EncryptedArrayError>;

            fn $method(self, rhs: f64) -> Self::Output {
                self.apply($op, &Operand::Scalar(rhs))
            }
        }
    };
}

impl_op!(Add, add, OpKind::Add);
impl_op!(Sub, sub, OpKind::Sub);
impl_op!(Mul, mul, OpKind::Mul);

#[cfg(test)]
mod tests {
    use ndarray::{arr1, arr2, Array};

    use super::*;
    use crate::{
        paillier::OperandKind,
        testutils::{
            assert_close,
            paillier::{PaillierCiphertext, PaillierError, PaillierKeyPair},
        },
    };

    fn encrypt(keys: &PaillierKeyPair, values: &[f64]) -> EncryptedArray<PaillierCiphertext> {
        EncryptedArray::new(
            values
                .iter()
                .map(|v| keys.public.encrypt(*v))
                .collect::<Vec<_>>(),
        )
        .unwrap()
    }

    #[test]
    fn test_homomorphic_add() {
        let keys = PaillierKeyPair::new();
        let sum = (&encrypt(&keys, &[3.]) + &encrypt(&keys, &[5.])).unwrap();
        assert_eq!(sum.decrypt(&keys.secret).unwrap(), arr1(&[8.]).into_dyn());
    }

    #[test]
    fn test_homomorphic_mul_by_scalar() {
        let keys = PaillierKeyPair::new();
        let product = encrypt(&keys, &[3.]).mul(2.).unwrap();
        assert_eq!(
            product.decrypt(&keys.secret).unwrap(),
            arr1(&[6.]).into_dyn()
        );
    }

    #[test]
    fn test_homomorphic_sub() {
        let keys = PaillierKeyPair::new();
        let difference = (&encrypt(&keys, &[5.]) - &encrypt(&keys, &[3.])).unwrap();
        assert_eq!(
            difference.decrypt(&keys.secret).unwrap(),
            arr1(&[2.]).into_dyn()
        );
    }

    #[test]
    fn test_plain_operands() {
        let keys = PaillierKeyPair::new();
        let encrypted = encrypt(&keys, &[1.5, -2., 0.25]);
        let plain = arr1(&[0.5, 0.5, -1.]).into_dyn();

        let sum = (&encrypted + &plain).unwrap();
        assert_close(
            &sum.decrypt(&keys.secret).unwrap(),
            &arr1(&[2., -1.5, -0.75]).into_dyn(),
        );
        let difference = (&encrypted - 1.).unwrap();
        assert_close(
            &difference.decrypt(&keys.secret).unwrap(),
            &arr1(&[0.5, -3., -0.75]).into_dyn(),
        );
        let product = encrypted.mul(&plain).unwrap();
        assert_close(
            &product.decrypt(&keys.secret).unwrap(),
            &arr1(&[0.75, -1., -0.25]).into_dyn(),
        );
        assert_eq!(product.shape(), encrypted.shape());
    }

    #[test]
    fn test_decrypt_under_another_key() {
        let keys = PaillierKeyPair::new();
        let other = PaillierKeyPair::from_primes(1_000_003, 1_000_033).unwrap();
        let encrypted = encrypt(&keys, &[1., 2.]);
        assert_eq!(
            encrypted.decrypt(&other.secret).unwrap_err(),
            PaillierError::KeyMismatch
        );

        // a single foreign ciphertext fails the whole array
        let mixed = EncryptedArray::new(vec![
            keys.public.encrypt(1.),
            other.public.encrypt(2.),
            keys.public.encrypt(3.),
        ])
        .unwrap();
        assert_eq!(
            mixed.decrypt(&keys.secret).unwrap_err(),
            PaillierError::KeyMismatch
        );
        assert_eq!(
            mixed.to_plain_or_zero(Some(&other.secret)).unwrap_err(),
            PaillierError::KeyMismatch
        );
    }

    #[test]
    fn test_broadcasting() {
        let keys = PaillierKeyPair::new();
        let encrypted = EncryptedArray::new(Nested::Sequence(vec![
            Nested::Sequence(vec![
                Nested::Value(keys.public.encrypt(1.)),
                Nested::Value(keys.public.encrypt(2.)),
            ]),
            Nested::Sequence(vec![
                Nested::Value(keys.public.encrypt(3.)),
                Nested::Value(keys.public.encrypt(4.)),
            ]),
        ]))
        .unwrap();
        assert_eq!(encrypted.shape(), &[2, 2]);

        let row = arr1(&[10., 20.]).into_dyn();
        let sum = encrypted.add(&row).unwrap();
        assert_eq!(
            sum.decrypt(&keys.secret).unwrap(),
            arr2(&[[11., 22.], [13., 24.]]).into_dyn()
        );

        let column = Array::from_shape_vec(vec![3], vec![1., 2., 3.]).unwrap();
        assert!(matches!(
            encrypted.add(&column),
            Err(EncryptedArrayError::Shape(_))
        ));
    }

    #[test]
    fn test_unsupported_operands() {
        let keys = PaillierKeyPair::new();
        let encrypted = encrypt(&keys, &[1., 2.]);

        let err = encrypted.apply(OpKind::Div, &Operand::Scalar(2.)).unwrap_err();
        assert!(matches!(
            err,
            EncryptedArrayError::UnsupportedOperand {
                op: OpKind::Div,
                operand: OperandKind::Scalar
            }
        ));

        let values = [1., 2.];
        assert!(matches!(
            encrypted.add(&values[..]),
            Err(EncryptedArrayError::UnsupportedOperand {
                operand: OperandKind::Sequence,
                ..
            })
        ));
        assert!(matches!(
            &encrypted * &encrypted,
            Err(EncryptedArrayError::NotMultiplicative)
        ));
    }

    #[test]
    fn test_construction() {
        let keys = PaillierKeyPair::new();
        let c = keys.public.encrypt(1.);

        let flat = EncryptedArray::new(vec![c.clone(), c.clone()]).unwrap();
        assert_eq!(flat.shape(), &[2]);
        assert_eq!(flat.len(), 2);

        let native = EncryptedArray::from(ArrayD::from_elem(IxDyn(&[2, 3]), c.clone()));
        assert_eq!(native.shape(), &[2, 3]);
        assert_eq!(native.clone().into_raw().len(), 6);
        assert_eq!(native.raw().shape(), &[2, 3]);

        let ragged = Nested::Sequence(vec![
            Nested::Sequence(vec![Nested::Value(c.clone())]),
            Nested::Sequence(vec![Nested::Value(c.clone()), Nested::Value(c.clone())]),
        ]);
        assert!(matches!(
            EncryptedArray::new(ragged),
            Err(EncryptedArrayError::UnsupportedValueType(_))
        ));

        let mixed_depth = Nested::Sequence(vec![
            Nested::Sequence(vec![Nested::Value(c.clone())]),
            Nested::Value(c.clone()),
        ]);
        assert!(matches!(
            EncryptedArray::new(mixed_depth),
            Err(EncryptedArrayError::UnsupportedValueType(_))
        ));

        let empty: Nested<PaillierCiphertext> = Nested::Sequence(vec![]);
        assert!(matches!(
            EncryptedArray::new(empty),
            Err(EncryptedArrayError::UnsupportedValueType(_))
        ));
    }

    #[test]
    fn test_to_plain_or_zero() {
        let keys = PaillierKeyPair::new();
        let encrypted = encrypt(&keys, &[4., -4.]);
        assert_eq!(
            encrypted.to_plain_or_zero(Some(&keys.secret)).unwrap(),
            arr1(&[4., -4.]).into_dyn()
        );
        assert_eq!(
            encrypted
                .to_plain_or_zero::<crate::testutils::paillier::SecretKey>(None)
                .unwrap(),
            arr1(&[0., 0.]).into_dyn()
        );
    }
}
