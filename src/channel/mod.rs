//! Point-to-point message passing between the participants of a federation.
//!
//! The [`Channel`] trait is the only thing the message-passing client knows about the
//! transport. Messages are tagged by kind and are expected to be delivered reliably and in send
//! order for a given sender and tag. [`InMemoryChannel`] is an implementation for federations
//! that live in a single process.

mod in_memory;

pub use self::in_memory::{InMemoryChannel, InMemoryChannelError};

use async_trait::async_trait;
use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::model::Tensor;

/// The rank of a participant. By convention, the aggregator has rank `0`.
pub type Rank = usize;

/// The rank of the aggregator.
pub const AGGREGATOR_RANK: Rank = 0;

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
/// The kind of a message.
pub enum Tag {
    /// Gradients uploaded by a client.
    #[display(fmt = "GRADIENTS")]
    Gradients,
    /// Parameters broadcast by the aggregator.
    #[display(fmt = "PARAMETERS")]
    Parameters,
}

/// A point-to-point channel carrying tensors.
#[cfg_attr(test, mockall::automock(type Error = InMemoryChannelError;))]
#[async_trait]
pub trait Channel: Send {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Sends `payload` to the participant `destination`. Completes once the transport accepted
    /// the message.
    async fn send(
        &mut self,
        payload: Vec<Tensor>,
        destination: Rank,
        tag: Tag,
    ) -> Result<(), Self::Error>;

    /// Waits for the next message tagged `tag`.
    async fn recv(&mut self, tag: Tag) -> Result<Vec<Tensor>, Self::Error>;
}
