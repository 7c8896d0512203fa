use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::trace;

use super::{Channel, Rank, Tag};
use crate::model::Tensor;

const TAGS: [Tag; 2] = [Tag::Gradients, Tag::Parameters];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
/// Errors related to the in-memory channel.
pub enum InMemoryChannelError {
    #[error("no participant with rank {0}")]
    UnknownRank(Rank),

    #[error("the channel for {0} messages is closed")]
    Closed(Tag),
}

/// The endpoint of one participant of an in-memory federation.
///
/// Every participant has one unbounded FIFO queue per [`Tag`]. Sending never waits.
#[derive(Debug)]
pub struct InMemoryChannel {
    rank: Rank,
    peers: Vec<HashMap<Tag, UnboundedSender<Vec<Tensor>>>>,
    inbox: HashMap<Tag, UnboundedReceiver<Vec<Tensor>>>,
}

impl InMemoryChannel {
    /// Creates the connected endpoints of a federation of `size` participants. The endpoint at
    /// index `i` has rank `i`.
    pub fn federation(size: usize) -> Vec<InMemoryChannel> {
        let mut peers = Vec::with_capacity(size);
        let mut inboxes = Vec::with_capacity(size);
        for _ in 0..size {
            let mut senders = HashMap::new();
            let mut receivers = HashMap::new();
            for tag in TAGS.iter() {
                let (tx, rx) = unbounded_channel();
                senders.insert(*tag, tx);
                receivers.insert(*tag, rx);
            }
            peers.push(senders);
            inboxes.push(receivers);
        }

        inboxes
            .into_iter()
            .enumerate()
            .map(|(rank, inbox)| InMemoryChannel {
                rank,
                peers: peers.clone(),
                inbox,
            })
            .collect()
    }

    /// Gets the rank of this endpoint.
    pub fn rank(&self) -> Rank {
        self.rank
    }

    /// Gets the number of participants in the federation.
    pub fn size(&self) -> usize {
        self.peers.len()
    }
}

#[async_trait]
impl Channel for InMemoryChannel {
    type Error = InMemoryChannelError;

    async fn send(
        &mut self,
        payload: Vec<Tensor>,
        destination: Rank,
        tag: Tag,
    ) -> Result<(), Self::Error> {
        let tx = self
            .peers
            .get(destination)
            .and_then(|senders| senders.get(&tag))
            .ok_or(InMemoryChannelError::UnknownRank(destination))?;
        trace!(from = self.rank, to = destination, %tag, "sending message");
        tx.send(payload)
            .map_err(|_| InMemoryChannelError::Closed(tag))
    }

    async fn recv(&mut self, tag: Tag) -> Result<Vec<Tensor>, Self::Error> {
        let rx = self
            .inbox
            .get_mut(&tag)
            .ok_or(InMemoryChannelError::Closed(tag))?;
        let payload = rx.recv().await.ok_or(InMemoryChannelError::Closed(tag))?;
        trace!(rank = self.rank, %tag, "received message");
        Ok(payload)
    }
}
