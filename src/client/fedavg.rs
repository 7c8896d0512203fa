use tracing::{debug, info};

use super::{ClientError, ClientState, Delta, GlobalState};
use crate::{
    model::{check_aligned, LocalModel, StateDict, Tensor},
    optimizer::{self, GlobalOptimizer},
    settings::ClientSettings,
    snapshot::ParameterSnapshot,
};

/// A federated averaging client for federations living in a single process.
///
/// The client is driven by the caller: after zero or more local training steps on
/// [`FedAvgClient::model_mut()`], the caller uploads the client's [`Delta`] to the aggregator and
/// hands the resulting [`GlobalState`] back to [`FedAvgClient::download()`], exactly once per
/// round.
#[derive(Debug)]
pub struct FedAvgClient<M> {
    model: M,
    user_id: u32,
    learning_rate: f64,
    send_gradient: bool,
    server_side_update: bool,
    /// Only set if the global update is applied by the client.
    optimizer: Option<Box<dyn GlobalOptimizer>>,
    /// Parameters at the start of the current local training window.
    snapshot: ParameterSnapshot,
    state: ClientState,
}

impl<M> FedAvgClient<M>
where
    M: LocalModel,
{
    /// Creates a new client owning `model`.
    ///
    /// # Errors
    /// Fails with [`ClientError::UnsupportedOptimizer`] if the global update is applied by the
    /// client and the configured optimizer is unknown.
    pub fn new(model: M, settings: &ClientSettings) -> Result<Self, ClientError> {
        let optimizer = if settings.server_side_update {
            None
        } else {
            optimizer::for_global_gradients(
                &settings.optimizer_type_for_global_grad,
                settings.learning_rate,
                &settings.sgd,
                &settings.adam,
            )?
        };
        let snapshot = ParameterSnapshot::take(&model);
        debug!(
            user_id = settings.user_id,
            parameters = snapshot.len(),
            send_gradient = settings.send_gradient,
            server_side_update = settings.server_side_update,
            "client created"
        );
        Ok(Self {
            model,
            user_id: settings.user_id,
            learning_rate: settings.learning_rate,
            send_gradient: settings.send_gradient,
            server_side_update: settings.server_side_update,
            optimizer,
            snapshot,
            state: ClientState::Uninitialized,
        })
    }

    /// Uploads the local model state: gradients or parameters, depending on the settings.
    pub fn upload(&self) -> Result<Delta, ClientError> {
        if self.send_gradient {
            self.upload_gradients().map(Delta::Gradients)
        } else {
            Ok(Delta::Parameters(self.upload_parameters()))
        }
    }

    /// Uploads a copy of the named parameters of the local model.
    pub fn upload_parameters(&self) -> StateDict {
        self.model.state_dict()
    }

    /// Uploads `(previous - current) / learning_rate` for every parameter, where `previous` is
    /// the value at the end of the last download.
    pub fn upload_gradients(&self) -> Result<Vec<Tensor>, ClientError> {
        let gradients = self.snapshot.gradients(&self.model, self.learning_rate)?;
        debug!(user_id = self.user_id, "uploading gradients");
        Ok(gradients)
    }

    /// Reverts the local model to its parameters at the end of the last download, discarding
    /// local training.
    pub fn revert(&mut self) -> Result<(), ClientError> {
        self.snapshot.restore(&mut self.model)?;
        Ok(())
    }

    /// Downloads the next global state.
    ///
    /// If the aggregator applies the global update, or if this is the first download, the
    /// global state must be absolute [`GlobalState::Parameters`] and is loaded as is. Otherwise
    /// it must be a [`GlobalState::Gradients`]: the local model is reverted to the last global
    /// model and the optimizer applies the gradient to it. Either way, the resulting parameters
    /// become the baseline of the next upload.
    ///
    /// # Errors
    /// Fails if the global state is of the wrong kind or doesn't line up with the local model.
    /// The local model is left untouched in that case.
    pub fn download(&mut self, global_state: GlobalState) -> Result<(), ClientError> {
        if self.server_side_update || self.state == ClientState::Uninitialized {
            let state = match global_state {
                GlobalState::Parameters(state) => state,
                other => {
                    return Err(ClientError::UnexpectedGlobalState {
                        expected: "parameters",
                        actual: other.kind(),
                    })
                }
            };
            self.model.load_state_dict(&state)?;
            debug!(user_id = self.user_id, "loaded global parameters");
        } else {
            let update = match global_state {
                GlobalState::Gradients(update) => update,
                other => {
                    return Err(ClientError::UnexpectedGlobalState {
                        expected: "gradients",
                        actual: other.kind(),
                    })
                }
            };
            check_aligned(&self.model, &update)?;
            self.revert()?;
            if let Some(optimizer) = self.optimizer.as_mut() {
                optimizer.step(&mut self.model, &update)?;
            }
            debug!(user_id = self.user_id, "applied global gradients");
        }

        if self.state == ClientState::Uninitialized {
            info!(user_id = self.user_id, "received first global model");
            self.state = ClientState::Ready;
        }
        self.snapshot = ParameterSnapshot::take(&self.model);
        Ok(())
    }

    /// Gets the state of the client.
    pub fn state(&self) -> ClientState {
        self.state
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

    /// Gets the parameters at the start of the current local training window.
    pub fn snapshot(&self) -> &ParameterSnapshot {
        &self.snapshot
    }

    /// Consumes the client and returns its local model.
    pub fn into_model(self) -> M {
        self.model
    }
}
