pub mod chain;
pub mod config;
pub mod dedupe;
pub mod dispatcher;
pub mod error;
pub mod health;
pub mod ingestor;
pub mod models;
pub mod reconciler;
pub mod store;
pub mod telemetry;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use ethers::types::U256;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use chain::{parse_private_key, ChainTransport, EthersTransport};
use config::{Settings, DEDUPE_CAPACITY, LOW_BALANCE_WARNING_ETHER, RECONCILER_TICK_INTERVAL};
use dispatcher::SettlementDispatcher;
use health::AppState;
use ingestor::EventIngestor;
use reconciler::Reconciler;
use store::PgEventStore;

/// Builds every collaborator, spawns the background tasks and the HTTP
/// server, and runs until `SIGINT` or cancellation (§5).
pub async fn run() -> anyhow::Result<()> {
    let settings = Settings::from_env()?;
    info!(port = settings.port, "starting settler");

    let store = Arc::new(PgEventStore::connect(&settings.database_url).await?);

    let wallet = parse_private_key(&settings.settler_private_key)?;
    let transport: Arc<dyn ChainTransport> = Arc::new(
        EthersTransport::connect(
            &settings.rpc_url,
            &settings.rpc_wss_url,
            settings.contract_address,
            wallet,
        )
        .await?,
    );

    warn_if_low_balance(transport.as_ref()).await;

    let reveal_delay = chain::params::load_reveal_delay(transport.as_ref()).await;

    let reconciler = Arc::new(Reconciler::new());
    let dispatcher = SettlementDispatcher::new();
    let cancel = CancellationToken::new();

    let supervisor = Arc::new(chain::supervisor::ConnectionSupervisor::new(
        transport.clone(),
        cancel.clone(),
    ));
    let stream_state = supervisor.state();
    let generation = supervisor.generation();

    let ingestor = Arc::new(EventIngestor::new(
        transport.clone(),
        store.clone(),
        reconciler.clone(),
        DEDUPE_CAPACITY,
        reveal_delay,
    ));

    let app_state = Arc::new(AppState::new(store.clone(), stream_state, reconciler.clone()));

    let supervisor_task = {
        let supervisor = supervisor.clone();
        tokio::spawn(async move { supervisor.run().await })
    };

    let ingestor_task = {
        let ingestor = ingestor.clone();
        let generation = generation.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { ingestor.run(generation, cancel).await })
    };

    let reconciler_task = {
        let reconciler = reconciler.clone();
        let transport = transport.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(RECONCILER_TICK_INTERVAL);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = ticker.tick() => {
                        reconciler.tick(transport.as_ref(), &dispatcher).await;
                    }
                }
            }
        })
    };

    let server_task = {
        let router = health::router(app_state.clone());
        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], settings.port));
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let listener = match tokio::net::TcpListener::bind(addr).await {
                Ok(listener) => listener,
                Err(err) => {
                    error!(error = %err, "failed to bind health/status listener");
                    return;
                }
            };
            info!(%addr, "health/status server listening");
            let serve = axum::serve(listener, router).with_graceful_shutdown(async move {
                cancel.cancelled().await;
            });
            if let Err(err) = serve.await {
                error!(error = %err, "health/status server exited with error");
            }
        })
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("received SIGINT, shutting down");
        }
        _ = cancel.cancelled() => {}
    }

    app_state.running.store(false, Ordering::Relaxed);
    cancel.cancel();

    let _ = tokio::join!(supervisor_task, ingestor_task, reconciler_task, server_task);

    info!("settler stopped");
    Ok(())
}

async fn warn_if_low_balance(transport: &dyn ChainTransport) {
    let address = transport.signer_address();
    match transport.balance_of(address).await {
        Ok(balance) => {
            let threshold = ether_to_wei(LOW_BALANCE_WARNING_ETHER);
            if balance < threshold {
                warn!(
                    %address,
                    balance_wei = %balance,
                    "signer balance below low-balance warning threshold"
                );
            }
        }
        Err(err) => {
            warn!(error = %err, "failed to read signer balance at startup");
        }
    }
}

fn ether_to_wei(ether: f64) -> U256 {
    U256::from((ether * 1e18) as u128)
}
