//! Federated averaging clients.
//!
//! A client holds a local model that an external trainer updates between rounds. In every round
//! the client uploads what changed since the last global model, and downloads the next global
//! state:
//!
//! - [`FedAvgClient`] is driven by in-process calls. It uploads either raw parameters or
//!   gradients, and integrates the global state either as absolute parameters (the aggregator
//!   applied the update) or as a global gradient it applies itself.
//! - [`MessagePassingClient`] exchanges gradients and parameters over a [`Channel`].
//!
//! [`Channel`]: crate::channel::Channel

mod fedavg;
mod message_passing;

pub use self::{fedavg::FedAvgClient, message_passing::MessagePassingClient};

use derive_more::Display;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    model::{ShapeMismatch, StateDict, Tensor},
    optimizer::UnsupportedOptimizer,
};

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
/// The state of a client.
pub enum ClientState {
    /// The client didn't receive any global model yet.
    Uninitialized,
    /// The client received at least one global model and can take part in the next round.
    Ready,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// What a client uploads at the end of its local training.
pub enum Delta {
    /// The named parameters of the local model.
    Parameters(StateDict),
    /// `(previous - current) / learning_rate` for every parameter, in parameter order.
    Gradients(Vec<Tensor>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// What a client downloads at the end of a round.
pub enum GlobalState {
    /// Absolute parameters, to be loaded as is.
    Parameters(StateDict),
    /// A global gradient, aligned with the parameter order of the model.
    Gradients(Vec<Tensor>),
}

impl GlobalState {
    fn kind(&self) -> &'static str {
        match self {
            GlobalState::Parameters(_) => "parameters",
            GlobalState::Gradients(_) => "gradients",
        }
    }
}

#[derive(Debug, Error)]
/// Errors related to the clients.
pub enum ClientError {
    #[error(transparent)]
    UnsupportedOptimizer(#[from] UnsupportedOptimizer),

    #[error("global state doesn't match the local model: {0}")]
    ShapeMismatch(#[from] ShapeMismatch),

    #[error("expected {expected} as global state, got {actual}")]
    UnexpectedGlobalState {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("channel failure: {0}")]
    Channel(#[source] Box<dyn std::error::Error + Send + Sync>),
}
