use derive_more::{Display, From};
use ndarray::{ArrayViewD, ErrorKind, ShapeError, Zip};

use super::{Ciphertext, EncryptedArray, EncryptedArrayError};
use crate::model::Tensor;

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
/// An arithmetic operation on an encrypted array.
pub enum OpKind {
    #[display(fmt = "addition")]
    Add,
    #[display(fmt = "subtraction")]
    Sub,
    #[display(fmt = "multiplication")]
    Mul,
    #[display(fmt = "division")]
    Div,
}

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
/// The kind of an [`Operand`].
pub enum OperandKind {
    #[display(fmt = "scalar")]
    Scalar,
    #[display(fmt = "plaintext array")]
    Plain,
    #[display(fmt = "encrypted array")]
    Encrypted,
    #[display(fmt = "sequence")]
    Sequence,
}

#[derive(Debug, From)]
/// The right-hand side of an arithmetic operation on an encrypted array.
pub enum Operand<'a, C> {
    /// A plaintext scalar, applied to every element.
    Scalar(f64),
    /// A plaintext array, broadcast to the shape of the encrypted array.
    Plain(ArrayViewD<'a, f64>),
    /// An encrypted array under the same key, broadcast to the shape of the encrypted array.
    Encrypted(&'a EncryptedArray<C>),
    /// Raw values without a shape.
    Sequence(&'a [f64]),
}

impl<'a, C> Operand<'a, C> {
    /// Gets the kind of the operand.
    pub fn kind(&self) -> OperandKind {
        match self {
            Operand::Scalar(_) => OperandKind::Scalar,
            Operand::Plain(_) => OperandKind::Plain,
            Operand::Encrypted(_) => OperandKind::Encrypted,
            Operand::Sequence(_) => OperandKind::Sequence,
        }
    }
}

impl<'a, C> From<&'a Tensor> for Operand<'a, C> {
    fn from(array: &'a Tensor) -> Self {
        Operand::Plain(array.view())
    }
}

/// An implementation of an operation for one kind of operand.
pub type Implementation<C> =
    fn(&EncryptedArray<C>, &Operand<'_, C>) -> Result<EncryptedArray<C>, EncryptedArrayError>;

/// The result of looking up an operation in the dispatch table.
pub enum Dispatch<C> {
    Implemented(Implementation<C>),
    NotImplemented,
}

/// The registered operations. Divisions and operands without a shape are left out on purpose.
fn registry<C: Ciphertext>() -> [(OpKind, OperandKind, Implementation<C>); 9] {
    [
        (OpKind::Add, OperandKind::Scalar, add_scalar::<C>),
        (OpKind::Add, OperandKind::Plain, add_plain::<C>),
        (OpKind::Add, OperandKind::Encrypted, add_encrypted::<C>),
        (OpKind::Sub, OperandKind::Scalar, sub_scalar::<C>),
        (OpKind::Sub, OperandKind::Plain, sub_plain::<C>),
        (OpKind::Sub, OperandKind::Encrypted, sub_encrypted::<C>),
        (OpKind::Mul, OperandKind::Scalar, mul_scalar::<C>),
        (OpKind::Mul, OperandKind::Plain, mul_plain::<C>),
        (OpKind::Mul, OperandKind::Encrypted, mul_encrypted::<C>),
    ]
}

/// Looks up the implementation of `op` for operands of kind `operand`.
pub fn dispatch<C: Ciphertext>(op: OpKind, operand: OperandKind) -> Dispatch<C> {
    registry::<C>()
        .iter()
        .find(|(registered_op, registered_operand, _)| {
            *registered_op == op && *registered_operand == operand
        })
        .map_or(Dispatch::NotImplemented, |(_, _, implementation)| {
            Dispatch::Implemented(*implementation)
        })
}

fn broadcast<'a, C, A>(
    lhs: &EncryptedArray<C>,
    rhs: &'a ArrayViewD<'_, A>,
) -> Result<ArrayViewD<'a, A>, ShapeError> {
    rhs.broadcast(lhs.raw().raw_dim())
        .ok_or_else(|| ShapeError::from_kind(ErrorKind::IncompatibleShape))
}

fn map_scalar<C: Ciphertext>(
    op: OpKind,
    lhs: &EncryptedArray<C>,
    rhs: &Operand<'_, C>,
    f: impl Fn(&C, f64) -> C,
) -> Result<EncryptedArray<C>, EncryptedArrayError> {
    match rhs {
        Operand::Scalar(scalar) => Ok(lhs.raw().map(|c| f(c, *scalar)).into()),
        _ => Err(mismatch(op, rhs)),
    }
}

fn zip_plain<C: Ciphertext>(
    op: OpKind,
    lhs: &EncryptedArray<C>,
    rhs: &Operand<'_, C>,
    f: impl Fn(&C, f64) -> C,
) -> Result<EncryptedArray<C>, EncryptedArrayError> {
    match rhs {
        Operand::Plain(plain) => {
            let plain = broadcast(lhs, plain)?;
            Ok(Zip::from(lhs.raw())
                .and(&plain)
                .map_collect(|c, p| f(c, *p))
                .into())
        }
        _ => Err(mismatch(op, rhs)),
    }
}

fn zip_encrypted<C: Ciphertext>(
    op: OpKind,
    lhs: &EncryptedArray<C>,
    rhs: &Operand<'_, C>,
    f: impl Fn(&C, &C) -> Option<C>,
) -> Result<EncryptedArray<C>, EncryptedArrayError> {
    match rhs {
        Operand::Encrypted(other) => {
            let other = other.raw().view();
            let other = broadcast(lhs, &other)?;
            let elements = lhs
                .raw()
                .iter()
                .zip(other.iter())
                .map(|(c, o)| f(c, o).ok_or(EncryptedArrayError::NotMultiplicative))
                .collect::<Result<Vec<C>, _>>()?;
            EncryptedArray::from_shape_vec(lhs.shape(), elements)
        }
        _ => Err(mismatch(op, rhs)),
    }
}

// only reachable if an implementation is registered for the wrong operand kind
fn mismatch<C>(op: OpKind, rhs: &Operand<'_, C>) -> EncryptedArrayError {
    EncryptedArrayError::UnsupportedOperand {
        op,
        operand: rhs.kind(),
    }
}

fn add_scalar<C: Ciphertext>(
    lhs: &EncryptedArray<C>,
    rhs: &Operand<'_, C>,
) -> Result<EncryptedArray<C>, EncryptedArrayError> {
    map_scalar(OpKind::Add, lhs, rhs, |c, s| c.add_plain(s))
}

fn add_plain<C: Ciphertext>(
    lhs: &EncryptedArray<C>,
    rhs: &Operand<'_, C>,
) -> Result<EncryptedArray<C>, EncryptedArrayError> {
    zip_plain(OpKind::Add, lhs, rhs, |c, p| c.add_plain(p))
}

fn add_encrypted<C: Ciphertext>(
    lhs: &EncryptedArray<C>,
    rhs: &Operand<'_, C>,
) -> Result<EncryptedArray<C>, EncryptedArrayError> {
    zip_encrypted(OpKind::Add, lhs, rhs, |c, o| Some(c.add(o)))
}

fn sub_scalar<C: Ciphertext>(
    lhs: &EncryptedArray<C>,
    rhs: &Operand<'_, C>,
) -> Result<EncryptedArray<C>, EncryptedArrayError> {
    map_scalar(OpKind::Sub, lhs, rhs, |c, s| c.add_plain(-s))
}

fn sub_plain<C: Ciphertext>(
    lhs: &EncryptedArray<C>,
    rhs: &Operand<'_, C>,
) -> Result<EncryptedArray<C>, EncryptedArrayError> {
    zip_plain(OpKind::Sub, lhs, rhs, |c, p| c.add_plain(-p))
}

fn sub_encrypted<C: Ciphertext>(
    lhs: &EncryptedArray<C>,
    rhs: &Operand<'_, C>,
) -> Result<EncryptedArray<C>, EncryptedArrayError> {
    zip_encrypted(OpKind::Sub, lhs, rhs, |c, o| Some(c.add(&o.mul_plain(-1.))))
}

fn mul_scalar<C: Ciphertext>(
    lhs: &EncryptedArray<C>,
    rhs: &Operand<'_, C>,
) -> Result<EncryptedArray<C>, EncryptedArrayError> {
    map_scalar(OpKind::Mul, lhs, rhs, |c, s| c.mul_plain(s))
}

fn mul_plain<C: Ciphertext>(
    lhs: &EncryptedArray<C>,
    rhs: &Operand<'_, C>,
) -> Result<EncryptedArray<C>, EncryptedArrayError> {
    zip_plain(OpKind::Mul, lhs, rhs, |c, p| c.mul_plain(p))
}

fn mul_encrypted<C: Ciphertext>(
    lhs: &EncryptedArray<C>,
    rhs: &Operand<'_, C>,
) -> Result<EncryptedArray<C>, EncryptedArrayError> {
    zip_encrypted(OpKind::Mul, lhs, rhs, |c, o| c.mul(o))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::paillier::PaillierCiphertext;

    #[test]
    fn test_registered_operations() {
        for op in [OpKind::Add, OpKind::Sub, OpKind::Mul].iter() {
            for operand in [OperandKind::Scalar, OperandKind::Plain, OperandKind::Encrypted].iter() {
                assert!(matches!(
                    dispatch::<PaillierCiphertext>(*op, *operand),
                    Dispatch::Implemented(_)
                ));
            }
        }
    }

    #[test]
    fn test_unregistered_operations() {
        for operand in [
            OperandKind::Scalar,
            OperandKind::Plain,
            OperandKind::Encrypted,
            OperandKind::Sequence,
        ]
        .iter()
        {
            assert!(matches!(
                dispatch::<PaillierCiphertext>(OpKind::Div, *operand),
                Dispatch::NotImplemented
            ));
        }
        for op in [OpKind::Add, OpKind::Sub, OpKind::Mul].iter() {
            assert!(matches!(
                dispatch::<PaillierCiphertext>(*op, OperandKind::Sequence),
                Dispatch::NotImplemented
            ));
        }
    }

    #[test]
    fn test_operand_kind() {
        let values = [1., 2.];
        let plain = Tensor::zeros(vec![2]);
        assert_eq!(
            Operand::<PaillierCiphertext>::from(2.).kind(),
            OperandKind::Scalar
        );
        assert_eq!(
            Operand::<PaillierCiphertext>::from(&plain).kind(),
            OperandKind::Plain
        );
        assert_eq!(
            Operand::<PaillierCiphertext>::from(&values[..]).kind(),
            OperandKind::Sequence
        );
    }
}
