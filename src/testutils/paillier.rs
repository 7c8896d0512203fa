//! A small Paillier cryptosystem for tests and simulations.
//!
//! The key is derived from two fixed 64 bit primes, so it offers no security whatsoever. Floats
//! are encoded as fixed-point numbers: every ciphertext carries the binary exponent of its
//! plaintext, and exponents are aligned before ciphertexts are added.
//!
//! Multiplying by a plaintext with a fractional part adds [`FRACTION_BITS`] to the exponent, so
//! only a couple of such products can be chained. A ciphertext whose exponent exceeds
//! [`MAX_EXPONENT`] no longer decrypts.

use std::sync::Arc;

use num::{integer::ExtendedGcd, BigInt, BigUint, FromPrimitive, Integer, One, ToPrimitive, Zero};
use rand::Rng;
use thiserror::Error;

use crate::paillier::{Ciphertext, DecryptionKey};

/// `2^64 - 59`
const P: u64 = 18_446_744_073_709_551_557;
/// `2^64 - 83`
const Q: u64 = 18_446_744_073_709_551_533;

/// The binary exponent of plaintexts with a fractional part.
pub const FRACTION_BITS: u32 = 32;

/// The greatest binary exponent of a decryptable ciphertext.
///
/// Plaintexts live in `Z_n` with `n < 2^128` and the upper half encodes negative numbers, so an
/// exponent of `64` leaves `63` bits for the integer part.
pub const MAX_EXPONENT: u32 = 2 * FRACTION_BITS;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PaillierError {
    #[error("the ciphertext was encrypted under another key")]
    KeyMismatch,

    #[error("the plaintext is not representable as a float")]
    OutOfRange,

    #[error("the ciphertext exponent {0} exceeds the maximum of {}", MAX_EXPONENT)]
    ExponentOverflow(u32),
}

#[derive(Debug, Clone, PartialEq)]
/// A Paillier public key with generator `n + 1`.
pub struct PublicKey {
    n: Arc<BigUint>,
    n_squared: Arc<BigUint>,
}

impl PublicKey {
    /// Encrypts a float.
    pub fn encrypt(&self, value: f64) -> PaillierCiphertext {
        let exponent = exponent_of(value);
        let plain = self.encode(value, exponent);
        let r = BigUint::from(rand::thread_rng().gen_range(2..1_u64 << 63));
        let masked = r.modpow(&self.n, &self.n_squared);
        PaillierCiphertext {
            value: self.shift(&plain) * masked % &*self.n_squared,
            exponent,
            key: self.clone(),
        }
    }

    /// Encodes `value * 2^exponent` as an element of `Z_n`.
    fn encode(&self, value: f64, exponent: u32) -> BigUint {
        let scaled = (value * 2_f64.powi(exponent as i32)).round();
        let magnitude = BigUint::from_f64(scaled.abs()).unwrap_or_else(BigUint::zero) % &*self.n;
        if scaled < 0. && !magnitude.is_zero() {
            &*self.n - magnitude
        } else {
            magnitude
        }
    }

    /// Computes `g^plain = 1 + plain * n mod n^2`.
    fn shift(&self, plain: &BigUint) -> BigUint {
        (BigUint::one() + plain * &*self.n) % &*self.n_squared
    }
}

fn exponent_of(value: f64) -> u32 {
    if value.fract() == 0. {
        0
    } else {
        FRACTION_BITS
    }
}

#[derive(Debug, Clone, PartialEq)]
/// A Paillier ciphertext of a fixed-point number.
pub struct PaillierCiphertext {
    value: BigUint,
    exponent: u32,
    key: PublicKey,
}

impl PaillierCiphertext {
    /// Gets the ciphertext value, rescaled to a greater or equal binary exponent.
    fn rescaled(&self, exponent: u32) -> BigUint {
        if exponent > self.exponent {
            let factor = BigUint::one() << (exponent - self.exponent);
            self.value.modpow(&factor, &self.key.n_squared)
        } else {
            self.value.clone()
        }
    }
}

impl Ciphertext for PaillierCiphertext {
    fn add(&self, other: &Self) -> Self {
        let exponent = self.exponent.max(other.exponent);
        let value = self.rescaled(exponent) * other.rescaled(exponent) % &*self.key.n_squared;
        Self {
            value,
            exponent,
            key: self.key.clone(),
        }
    }

    fn add_plain(&self, plain: f64) -> Self {
        let exponent = self.exponent.max(exponent_of(plain));
        let plain = self.key.encode(plain, exponent);
        Self {
            value: self.rescaled(exponent) * self.key.shift(&plain) % &*self.key.n_squared,
            exponent,
            key: self.key.clone(),
        }
    }

    fn mul_plain(&self, plain: f64) -> Self {
        let exponent = exponent_of(plain);
        let plain = self.key.encode(plain, exponent);
        Self {
            value: self.value.modpow(&plain, &self.key.n_squared),
            exponent: self.exponent + exponent,
            key: self.key.clone(),
        }
    }
}

#[derive(Debug, Clone)]
/// A Paillier secret key.
pub struct SecretKey {
    lambda: BigUint,
    mu: BigUint,
    public: PublicKey,
}

impl DecryptionKey<PaillierCiphertext> for SecretKey {
    type Error = PaillierError;

    fn decrypt(&self, ciphertext: &PaillierCiphertext) -> Result<f64, Self::Error> {
        if ciphertext.key != self.public {
            return Err(PaillierError::KeyMismatch);
        }
        if ciphertext.exponent > MAX_EXPONENT {
            return Err(PaillierError::ExponentOverflow(ciphertext.exponent));
        }
        let n = &*self.public.n;
        let u = ciphertext.value.modpow(&self.lambda, &self.public.n_squared);
        let plain = (u - BigUint::one()) / n * &self.mu % n;

        let half = n >> 1_u32;
        let magnitude = if plain > half {
            -(n - &plain).to_f64().ok_or(PaillierError::OutOfRange)?
        } else {
            plain.to_f64().ok_or(PaillierError::OutOfRange)?
        };
        Ok(magnitude / 2_f64.powi(ciphertext.exponent as i32))
    }
}

#[derive(Debug, Clone)]
/// A deterministic Paillier key pair.
pub struct PaillierKeyPair {
    pub public: PublicKey,
    pub secret: SecretKey,
}

impl Default for PaillierKeyPair {
    fn default() -> Self {
        Self::new()
    }
}

impl PaillierKeyPair {
    /// Derives the key pair from the fixed primes.
    pub fn new() -> Self {
        Self::from_primes(P, Q).expect("lambda is invertible modulo n")
    }

    /// Derives a key pair from two distinct primes.
    ///
    /// Returns `None` if `lambda = lcm(p - 1, q - 1)` is not invertible modulo `n = p * q`.
    pub fn from_primes(p: u64, q: u64) -> Option<Self> {
        let p = BigUint::from(p);
        let q = BigUint::from(q);
        let n = &p * &q;
        let lambda = (p - 1_u32).lcm(&(q - 1_u32));
        // with generator n + 1, L(g^lambda mod n^2) = lambda mod n
        let mu = mod_inverse(&(&lambda % &n), &n)?;

        let public = PublicKey {
            n_squared: Arc::new(&n * &n),
            n: Arc::new(n),
        };
        let secret = SecretKey {
            lambda,
            mu,
            public: public.clone(),
        };
        Some(Self { public, secret })
    }
}

/// Computes the inverse of `a` modulo `modulus`, if they are coprime.
fn mod_inverse(a: &BigUint, modulus: &BigUint) -> Option<BigUint> {
    let modulus = BigInt::from(modulus.clone());
    let ExtendedGcd { gcd, x, .. } = BigInt::from(a.clone()).extended_gcd(&modulus);
    if gcd.is_one() {
        x.mod_floor(&modulus).to_biguint()
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mod_inverse() {
        let inverse = mod_inverse(&BigUint::from(3_u32), &BigUint::from(11_u32)).unwrap();
        assert_eq!(inverse, BigUint::from(4_u32));
        assert!(mod_inverse(&BigUint::from(4_u32), &BigUint::from(8_u32)).is_none());
    }

    #[test]
    fn test_encrypt_decrypt() {
        let keys = PaillierKeyPair::new();
        for value in [0., 1., -1., 42., -0.5, 3.25, 1e6].iter() {
            let ciphertext = keys.public.encrypt(*value);
            assert_eq!(keys.secret.decrypt(&ciphertext).unwrap(), *value);
        }
    }

    #[test]
    fn test_encryption_is_randomized() {
        let keys = PaillierKeyPair::new();
        assert_ne!(keys.public.encrypt(7.), keys.public.encrypt(7.));
    }

    #[test]
    fn test_mixed_exponents() {
        let keys = PaillierKeyPair::new();
        let sum = keys.public.encrypt(2.).add(&keys.public.encrypt(0.25));
        assert_eq!(keys.secret.decrypt(&sum).unwrap(), 2.25);

        let product = keys.public.encrypt(0.5).mul_plain(-1.5);
        assert_eq!(keys.secret.decrypt(&product).unwrap(), -0.75);

        let shifted = product.add_plain(1.);
        assert_eq!(keys.secret.decrypt(&shifted).unwrap(), 0.25);
    }

    #[test]
    fn test_add_fractional_plain_to_integer() {
        let keys = PaillierKeyPair::new();
        let sum = keys.public.encrypt(-2.).add_plain(0.5);
        assert_eq!(keys.secret.decrypt(&sum).unwrap(), -1.5);

        let sum = keys.public.encrypt(3.).add_plain(0.25);
        assert_eq!(keys.secret.decrypt(&sum).unwrap(), 3.25);

        // the integer ciphertext is unchanged
        let integer = keys.public.encrypt(3.);
        assert_eq!(keys.secret.decrypt(&integer.add_plain(0.)).unwrap(), 3.);
    }

    #[test]
    fn test_chained_fractional_products() {
        let keys = PaillierKeyPair::new();
        let product = keys.public.encrypt(0.5).mul_plain(0.5);
        assert_eq!(keys.secret.decrypt(&product).unwrap(), 0.25);

        let product = product.mul_plain(0.5);
        assert_eq!(
            keys.secret.decrypt(&product).unwrap_err(),
            PaillierError::ExponentOverflow(3 * FRACTION_BITS)
        );
        // integer factors keep the exponent
        let product = keys.public.encrypt(0.5).mul_plain(0.5).mul_plain(-4.);
        assert_eq!(keys.secret.decrypt(&product).unwrap(), -1.);
    }

    #[test]
    fn test_from_primes() {
        let keys = PaillierKeyPair::from_primes(1_000_003, 1_000_033).unwrap();
        let ciphertext = keys.public.encrypt(-7.25);
        assert_eq!(keys.secret.decrypt(&ciphertext).unwrap(), -7.25);
        assert_eq!(
            PaillierKeyPair::new().secret.decrypt(&ciphertext).unwrap_err(),
            PaillierError::KeyMismatch
        );
    }

    #[test]
    fn test_key_mismatch() {
        let keys = PaillierKeyPair::new();
        let mut other = keys.public.encrypt(1.);
        other.key = PublicKey {
            n: Arc::new(BigUint::from(35_u32)),
            n_squared: Arc::new(BigUint::from(1225_u32)),
        };
        assert_eq!(
            keys.secret.decrypt(&other).unwrap_err(),
            PaillierError::KeyMismatch
        );
    }
}
