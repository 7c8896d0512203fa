use ndarray::IxDyn;
use tracing::{debug, info};

use super::ClientError;
use crate::{
    channel::{Channel, Rank, Tag, AGGREGATOR_RANK},
    model::{check_reshapeable, LocalModel, Tensor},
    snapshot::ParameterSnapshot,
};

/// A federated averaging client that talks to its aggregator over a [`Channel`].
///
/// The client uploads gradients tagged [`Tag::Gradients`] and downloads the next global
/// parameters tagged [`Tag::Parameters`]. Every download re-snapshots the model, so the gradients
/// of a round always cover the local training of that round only.
#[derive(Debug)]
pub struct MessagePassingClient<M, C> {
    channel: C,
    model: M,
    user_id: u32,
    learning_rate: f64,
    snapshot: ParameterSnapshot,
    /// The gradients of the last upload.
    gradients: Vec<Tensor>,
}

impl<M, C> MessagePassingClient<M, C>
where
    M: LocalModel + Send,
    C: Channel,
{
    /// Creates a new client owning `model` and its endpoint `channel`.
    pub fn new(channel: C, model: M, user_id: u32, learning_rate: f64) -> Self {
        let snapshot = ParameterSnapshot::take(&model);
        Self {
            channel,
            model,
            user_id,
            learning_rate,
            snapshot,
            gradients: Vec::new(),
        }
    }

    /// Uploads the gradients of the local model to the aggregator.
    pub async fn upload(&mut self) -> Result<(), ClientError> {
        self.upload_gradient(AGGREGATOR_RANK).await
    }

    /// Computes `(previous - current) / learning_rate` for every parameter, retains the result
    /// and sends it to `destination`.
    ///
    /// # Errors
    /// Fails if the transport rejects the message. The gradients are retained anyway.
    pub async fn upload_gradient(&mut self, destination: Rank) -> Result<(), ClientError> {
        self.gradients = self.snapshot.gradients(&self.model, self.learning_rate)?;
        debug!(user_id = self.user_id, destination, "sending gradients");
        self.channel
            .send(self.gradients.clone(), destination, Tag::Gradients)
            .await
            .map_err(|err| ClientError::Channel(Box::new(err)))
    }

    /// Waits for the next global parameters and loads them into the local model.
    ///
    /// Every received tensor is reshaped to the shape of the corresponding parameter. The model
    /// is then re-snapshotted.
    ///
    /// # Errors
    /// Fails if the transport fails, or if the number of tensors or the element count of any
    /// tensor doesn't match the local model. The local model is left untouched in the latter
    /// case.
    pub async fn download(&mut self) -> Result<(), ClientError> {
        let parameters = self
            .channel
            .recv(Tag::Parameters)
            .await
            .map_err(|err| ClientError::Channel(Box::new(err)))?;
        check_reshapeable(&self.model, &parameters)?;

        let shapes: Vec<Vec<usize>> = self
            .model
            .parameters()
            .iter()
            .map(|param| param.shape().to_vec())
            .collect();
        for (index, (value, shape)) in parameters.into_iter().zip(shapes).enumerate() {
            let value = reshape(value, &shape);
            self.model.assign_parameter(index, value.view())?;
        }

        self.snapshot = ParameterSnapshot::take(&self.model);
        info!(user_id = self.user_id, "received global parameters");
        Ok(())
    }

    /// Gets the gradients of the last upload. Empty before the first upload.
    pub fn gradients(&self) -> &[Tensor] {
        &self.gradients
    }

    /// Gets the identifier of the client.
    pub fn user_id(&self) -> u32 {
        self.user_id
    }

    /// Gets the local model.
    pub fn model(&self) -> &M {
        &self.model
    }

    /// Gets the local model, for local training.
    pub fn model_mut(&mut self) -> &mut M {
        &mut self.model
    }

    /// Consumes the client and returns its local model.
    pub fn into_model(self) -> M {
        self.model
    }
}

/// Reshapes `value` to `shape`. The element counts are expected to agree.
fn reshape(value: Tensor, shape: &[usize]) -> Tensor {
    if value.shape() == shape {
        return value;
    }
    // `into_shape` requires a standard layout, which a received tensor doesn't need to have
    let elements: Vec<f64> = value.iter().cloned().collect();
    Tensor::from_shape_vec(IxDyn(shape), elements).unwrap_or(value)
}

#[cfg(test)]
mod tests {
    use mockall::predicate::{always, eq};
    use ndarray::{arr1, arr2};

    use super::*;
    use crate::{
        channel::{InMemoryChannelError, MockChannel},
        model::{Model, ShapeMismatch},
        testutils::{assert_close, model, train},
    };

    #[tokio::test]
    async fn test_upload_gradient() {
        let mut channel = MockChannel::new();
        channel
            .expect_send()
            .with(always(), eq(0), eq(Tag::Gradients))
            .times(1)
            .returning(|payload, _, _| {
                assert_eq!(payload.len(), 2);
                Ok(())
            });

        let mut client = MessagePassingClient::new(channel, model(), 1, 0.5);
        assert!(client.gradients().is_empty());
        let before: Vec<Tensor> = client
            .model()
            .parameters()
            .iter()
            .map(|p| p.to_owned())
            .collect();
        train(client.model_mut(), 0.25);
        client.upload().await.unwrap();

        let after = client.model().parameters();
        for ((previous, current), gradient) in before.iter().zip(after).zip(client.gradients()) {
            assert_close(&(&current + &(gradient * 0.5)), previous);
        }
    }

    #[tokio::test]
    async fn test_upload_gradient_to_other_rank() {
        let mut channel = MockChannel::new();
        channel
            .expect_send()
            .with(always(), eq(3), eq(Tag::Gradients))
            .times(1)
            .returning(|_, _, _| Ok(()));
        let mut client = MessagePassingClient::new(channel, model(), 1, 0.5);
        client.upload_gradient(3).await.unwrap();
        assert_eq!(client.gradients().len(), 2);
    }

    #[tokio::test]
    async fn test_upload_channel_failure() {
        let mut channel = MockChannel::new();
        channel
            .expect_send()
            .returning(|_, destination, _| Err(InMemoryChannelError::UnknownRank(destination)));
        let mut client = MessagePassingClient::new(channel, model(), 1, 0.5);
        assert!(matches!(
            client.upload().await.unwrap_err(),
            ClientError::Channel(_)
        ));
        assert_eq!(client.gradients().len(), 2);
    }

    #[tokio::test]
    async fn test_download_reshapes() {
        let model = Model::new()
            .with_parameter("weight", arr2(&[[0., 0.], [0., 0.]]).into_dyn())
            .with_parameter("bias", arr1(&[0.]).into_dyn());
        let mut channel = MockChannel::new();
        channel
            .expect_recv()
            .with(eq(Tag::Parameters))
            .times(1)
            .returning(|_| {
                Ok(vec![
                    arr1(&[1., 2., 3., 4.]).into_dyn(),
                    arr1(&[5.]).into_dyn(),
                ])
            });

        let mut client = MessagePassingClient::new(channel, model, 2, 0.1);
        client.download().await.unwrap();
        assert_eq!(
            client.model().get("weight").unwrap(),
            &arr2(&[[1., 2.], [3., 4.]]).into_dyn()
        );
        assert_eq!(client.model().get("bias").unwrap(), &arr1(&[5.]).into_dyn());
    }

    #[tokio::test]
    async fn test_download_element_mismatch() {
        let mut channel = MockChannel::new();
        channel.expect_recv().returning(|_| {
            Ok(vec![
                arr1(&[1., 2.]).into_dyn(),
                arr1(&[5.]).into_dyn(),
            ])
        });
        let mut client = MessagePassingClient::new(channel, model(), 2, 0.1);
        let expected = client.model().clone();
        assert!(matches!(
            client.download().await.unwrap_err(),
            ClientError::ShapeMismatch(ShapeMismatch::Elements { index: 0, .. })
        ));
        assert_eq!(client.into_model(), expected);
    }

    #[tokio::test]
    async fn test_download_resnapshots() {
        let mut channel = MockChannel::new();
        channel.expect_recv().returning(|_| {
            Ok(vec![
                arr1(&[1., 1., 1.]).into_dyn(),
                arr1(&[1.]).into_dyn(),
            ])
        });
        channel.expect_send().returning(|_, _, _| Ok(()));
        let mut client = MessagePassingClient::new(channel, model(), 2, 0.1);

        // local training before the download must not leak into the next upload
        train(client.model_mut(), 1.);
        client.download().await.unwrap();
        client.upload().await.unwrap();
        for gradient in client.gradients() {
            assert!(gradient.iter().all(|g| *g == 0.));
        }
    }

    #[test]
    fn test_reshape_non_standard_layout() {
        let transposed = arr2(&[[1., 2.], [3., 4.]]).reversed_axes().into_dyn();
        assert_eq!(
            reshape(transposed, &[4]),
            arr1(&[1., 3., 2., 4.]).into_dyn()
        );
    }
}
