#![cfg_attr(docsrs, feature(doc_cfg))]
//! # Federated averaging clients
//!
//! This crate implements the client side of federated averaging: a participant of a
//! multi-round training protocol holds a local model, trains it on its own data and only ever
//! shares model updates with an aggregator.
//!
//! Every round, a client
//!
//! 1. uploads what its local training changed since the last global model, either as raw
//!    parameters or as gradients `(previous - current) / learning_rate`,
//! 2. downloads the next global state and reconciles it with its local model.
//!
//! The global state is either a set of absolute parameters, when the aggregator applies the
//! update itself, or a global gradient that the client applies with its own optimizer after
//! reverting its local drift.
//!
//! Two clients are provided:
//!
//! - [`FedAvgClient`] for federations living in a single process, driven by plain method calls.
//! - [`MessagePassingClient`] for federations whose participants talk over a [`Channel`].
//!
//! The [`paillier`] module provides [`EncryptedArray`], an array of additively homomorphic
//! ciphertexts that supports the same arithmetic as plaintext tensors. This lets an aggregator
//! sum the updates of its clients without decrypting any of them.
//!
//! [`FedAvgClient`]: crate::client::FedAvgClient
//! [`MessagePassingClient`]: crate::client::MessagePassingClient
//! [`Channel`]: crate::channel::Channel
//! [`EncryptedArray`]: crate::paillier::EncryptedArray

pub mod channel;
pub mod client;
pub mod model;
pub mod optimizer;
pub mod paillier;
pub mod settings;
pub mod snapshot;
#[cfg(any(test, feature = "testutils"))]
#[cfg_attr(docsrs, doc(cfg(feature = "testutils")))]
pub mod testutils;

pub use self::{
    client::{ClientError, ClientState, Delta, FedAvgClient, GlobalState, MessagePassingClient},
    model::{LocalModel, Model, ShapeMismatch, StateDict, Tensor},
};
