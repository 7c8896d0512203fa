//! Simulates a federation of message-passing clients in a single process.
//!
//! The aggregator has rank `0` and the clients have ranks `1..=clients`. Every client trains a
//! linear regression on its own synthetic data. The aggregator sums the gradients of the clients
//! as encrypted arrays, decrypts the sum, averages it and broadcasts the updated global
//! parameters.

use std::{path::PathBuf, process};

use anyhow::{anyhow, Context};
use ndarray::arr1;
use structopt::StructOpt;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use tracing_subscriber::FmtSubscriber;
use xaynet_fedavg::{
    channel::{Channel, InMemoryChannel, Tag},
    client::MessagePassingClient,
    paillier::EncryptedArray,
    settings::{Settings, SimulationSettings},
    testutils::{
        paillier::{PaillierCiphertext, PaillierKeyPair, PublicKey},
        regression::{linear_model, Dataset},
    },
    LocalModel,
    Model,
    Tensor,
};

const TRUE_WEIGHT: [f64; 3] = [2., -1., 0.5];
const TRUE_BIAS: f64 = 0.25;

#[derive(Debug, StructOpt)]
#[structopt(name = "fedavg-simulate")]
struct Opt {
    /// Path of the configuration file
    #[structopt(short, parse(from_os_str))]
    config_path: PathBuf,
}

#[tokio::main]
async fn main() {
    let opt = Opt::from_args();

    let settings = Settings::new(opt.config_path).unwrap_or_else(|err| {
        eprintln!("{}", err);
        process::exit(1);
    });
    let Settings {
        client: client_settings,
        simulation: simulation_settings,
        log: log_settings,
    } = settings;

    let _fmt_subscriber = FmtSubscriber::builder()
        .with_env_filter(log_settings.filter)
        .with_ansi(true)
        .init();

    if let Err(err) = run(client_settings.learning_rate, simulation_settings).await {
        error!("simulation failed: {:#}", err);
        process::exit(1);
    }
}

async fn run(learning_rate: f64, settings: SimulationSettings) -> anyhow::Result<()> {
    let mut endpoints = InMemoryChannel::federation(settings.clients + 1).into_iter();
    let aggregator = endpoints
        .next()
        .ok_or_else(|| anyhow!("empty federation"))?;
    let true_weight = arr1(&TRUE_WEIGHT);

    let clients: Vec<(Dataset, JoinHandle<anyhow::Result<Model>>)> = endpoints
        .map(|channel| {
            let rank = channel.rank();
            let dataset = Dataset::generate(
                settings.samples,
                &true_weight,
                TRUE_BIAS,
                settings.seed + rank as u64,
            );
            let client = MessagePassingClient::new(
                channel,
                linear_model(TRUE_WEIGHT.len()),
                rank as u32,
                learning_rate,
            );
            let handle = tokio::spawn(participate(
                client,
                dataset.clone(),
                settings.rounds,
                settings.local_steps,
                learning_rate,
            ));
            (dataset, handle)
        })
        .collect();

    let global = aggregate(aggregator, &settings, learning_rate).await?;
    info!(?global, "final global parameters");

    for (dataset, handle) in clients {
        let model = handle.await??;
        info!(loss = dataset.loss(&model)?, "final local loss");
    }
    Ok(())
}

async fn participate(
    mut client: MessagePassingClient<Model, InMemoryChannel>,
    dataset: Dataset,
    rounds: usize,
    local_steps: usize,
    learning_rate: f64,
) -> anyhow::Result<Model> {
    client.download().await?;
    for round in 1..=rounds {
        let mut loss = 0.;
        for _ in 0..local_steps {
            loss = dataset.train_step(client.model_mut(), learning_rate)?;
        }
        debug!(user_id = client.user_id(), round, loss, "local training done");
        client.upload().await?;
        client.download().await?;
    }
    Ok(client.into_model())
}

async fn aggregate(
    mut channel: InMemoryChannel,
    settings: &SimulationSettings,
    learning_rate: f64,
) -> anyhow::Result<Vec<Tensor>> {
    let keys = PaillierKeyPair::new();
    let mut global: Vec<Tensor> = linear_model(TRUE_WEIGHT.len())
        .parameters()
        .iter()
        .map(|param| param.to_owned())
        .collect();
    broadcast(&mut channel, &global, settings.clients).await?;

    for round in 1..=settings.rounds {
        let mut sum: Option<Vec<EncryptedArray<PaillierCiphertext>>> = None;
        for _ in 0..settings.clients {
            let gradients = channel.recv(Tag::Gradients).await?;
            let encrypted: Vec<_> = gradients
                .iter()
                .map(|gradient| encrypt(&keys.public, gradient))
                .collect();
            sum = Some(match sum {
                None => encrypted,
                Some(sum) => sum
                    .iter()
                    .zip(&encrypted)
                    .map(|(acc, gradient)| acc + gradient)
                    .collect::<Result<_, _>>()?,
            });
        }

        let sum = sum.context("no gradients received")?;
        for (param, encrypted) in global.iter_mut().zip(&sum) {
            let average = encrypted.decrypt(&keys.secret)? / settings.clients as f64;
            *param -= &(average * learning_rate);
        }
        info!(round, "aggregated encrypted gradients");
        broadcast(&mut channel, &global, settings.clients).await?;
    }
    Ok(global)
}

fn encrypt(key: &PublicKey, plain: &Tensor) -> EncryptedArray<PaillierCiphertext> {
    EncryptedArray::from(plain.map(|value| key.encrypt(*value)))
}

async fn broadcast(
    channel: &mut InMemoryChannel,
    parameters: &[Tensor],
    clients: usize,
) -> anyhow::Result<()> {
    for rank in 1..=clients {
        channel
            .send(parameters.to_vec(), rank, Tag::Parameters)
            .await?;
    }
    Ok(())
}
