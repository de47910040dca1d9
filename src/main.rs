#[macro_use]
extern crate tracing;

use anyhow::{bail, Context, Result as AnyResult};
use certificate_trust_store::{
    configs::AppConfig, prompt::TerminalPrompter, DecisionProtocol, Origin, Resolution,
    TrustDecisionStore, TrustingClient,
};
use futures::{stream::FuturesUnordered, StreamExt};
use std::{num::NonZeroUsize, sync::Arc};

fn main() -> AnyResult<()> {
    // Load environment variables from the `.env` file
    dotenvy::dotenv().ok();
    // Initialize the logger after loading the environment variables
    tracing_subscriber::fmt::init();

    let mut app_config = AppConfig::load_config().context("Failed to parse configuration files")?;
    app_config.targets.extend(std::env::args().skip(1));

    // Setup async runtime
    let mut runtime_builder = tokio::runtime::Builder::new_multi_thread();
    if let Some(worker) = app_config.workers.and_then(NonZeroUsize::new) {
        runtime_builder.worker_threads(worker.into());
    }
    runtime_builder
        .enable_all()
        .build()
        .context("Failed to bootstrap the Tokio runtime")?
        .block_on(connect_all(app_config))
}

async fn connect_all(app_config: AppConfig) -> AnyResult<()> {
    if app_config.targets.is_empty() {
        bail!("No targets given");
    }

    let store =
        TrustDecisionStore::load_with_policy(&app_config.trust_store, app_config.fingerprint_policy);
    if store.load_outcome().is_degraded() {
        warn!("Starting with an empty trust store: {:?}", store.load_outcome());
    }

    let roots = Arc::new(app_config.roots.load()?);
    let protocol = DecisionProtocol::new(store.into_shared(), TerminalPrompter::new())
        .with_prompt_timeout(app_config.prompt_timeout);
    let client = Arc::new(
        TrustingClient::new(protocol, roots).with_connect_timeout(app_config.connect_timeout),
    );

    let mut failed = 0usize;
    let mut tasks = FuturesUnordered::new();
    for target in app_config.targets {
        let origin: Origin = match target.parse() {
            Ok(origin) => origin,
            Err(e) => {
                error!("Invalid target {:?}: {}", target, e);
                failed += 1;
                continue;
            }
        };
        let client = client.clone();
        tasks.push(async move {
            let result = client.connect(&origin).await;
            trace!("client.connect() = {:?}", &result);
            (origin, result)
        });
    }

    while let Some((origin, result)) = tasks.next().await {
        match result {
            Ok(conn) => {
                if let Some(Resolution::Accepted { saved: Err(e) }) = &conn.resolution {
                    warn!(
                        "Trusted {} for this session only, saving failed: {}",
                        origin, e
                    );
                }
                info!("Connected to {}", origin);
            }
            Err(e) => {
                error!("Failed to connect to {}: {}", origin, e);
                failed += 1;
            }
        }
    }

    if failed > 0 {
        bail!("{} target(s) failed", failed);
    }
    Ok(())
}
