//! Flow Chat - dispatcher entry point

use anyhow::Result;
use flowchat_api::AppState;
use flowchat_common::config::Config;
use flowchat_core::bus::{DurableQueue, FastLane};
use flowchat_core::campaigns::{BusinessCalendar, CampaignEngine};
use flowchat_core::gateway::{EventSocket, GatewayClient, GatewayEvent};
use flowchat_core::{
    ConversationService, EntitlementGate, Ingestor, InstanceRegistry, MediaWorker, Metrics,
    ProfileWorker, RealtimeHub, Router, SendConsumer,
};
use flowchat_storage::repository::{
    CalendarRepository, ConversationRepository, DepartmentRepository, InstanceRepository,
    MessageRepository,
};
use flowchat_storage::{DatabasePool, LocalStorage, ObjectStore};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first so logging follows it
    let config = Config::load()?;
    init_logging(&config);

    info!("Starting Flow Chat dispatcher...");

    // Database
    let db_pool = DatabasePool::new(&config.database).await?;
    db_pool.migrate().await?;

    let durable_pool = DatabasePool::for_durable_queue(&config.database).await?;
    let durable = DurableQueue::new(&durable_pool);

    // Fast lane; the dispatcher degrades gracefully without it
    let fast = match FastLane::new(&config.cache.url) {
        Ok(lane) => Some(lane),
        Err(e) => {
            warn!(error = %e, "Fast lane unavailable; profile fetches disabled");
            None
        }
    };

    // Storage
    let media_cache = Arc::new(LocalStorage::new(&config.storage)?);
    let object_store = ObjectStore::from_config(&config.storage).map(Arc::new);
    if object_store.is_none() {
        warn!("No object store configured; attachments stay cache-only");
    }

    // Core components
    let metrics = Metrics::new();
    let hub = RealtimeHub::new();
    let gateway = GatewayClient::new(&config.gateway);
    let registry = InstanceRegistry::new(&db_pool);
    let gate = Arc::new(EntitlementGate::new(&db_pool));

    let pool = db_pool.pool().clone();
    let service = ConversationService::new(
        ConversationRepository::new(pool.clone()),
        MessageRepository::new(pool.clone()),
    );
    let router = Router::new(
        DepartmentRepository::new(pool.clone()),
        ConversationRepository::new(pool.clone()),
        MessageRepository::new(pool.clone()),
    );
    let calendar = BusinessCalendar::new(CalendarRepository::new(pool.clone()));

    let engine = Arc::new(CampaignEngine::new(
        &db_pool,
        calendar,
        registry.clone(),
        durable.clone(),
        gate.clone(),
    ));

    let ingestor = Arc::new(Ingestor::new(
        &db_pool,
        service.clone(),
        router.clone(),
        registry.clone(),
        durable.clone(),
        fast.clone(),
        hub.clone(),
        metrics.clone(),
    ));

    // Supervision root
    let cancel = CancellationToken::new();
    let mut handles = Vec::new();

    // Campaign engine supervisor
    {
        let engine = engine.clone();
        let token = cancel.clone();
        handles.push(tokio::spawn(async move {
            engine.run(token).await;
        }));
    }

    // Campaign send consumer
    {
        let consumer = SendConsumer::new(
            &db_pool,
            durable.clone(),
            registry.clone(),
            gateway.clone(),
            service.clone(),
            hub.clone(),
            metrics.clone(),
            1,
            config.worker.concurrency,
            config.worker.batch_size,
        );
        let token = cancel.clone();
        handles.push(tokio::spawn(async move {
            consumer.run(token).await;
        }));
    }

    // Media worker + sweep
    {
        let worker = MediaWorker::new(
            &db_pool,
            durable.clone(),
            media_cache.clone(),
            object_store.clone(),
            metrics.clone(),
            config.worker.poll_interval_secs,
            config.worker.sweep_interval_secs,
            config.worker.batch_size,
            config.storage.media_cache_ttl_days,
            config.gateway.media_timeout_secs,
        );
        let token = cancel.clone();
        handles.push(tokio::spawn(async move {
            worker.run(token).await;
        }));
    }

    // Profile picture worker (fast lane)
    if let Some(fast) = fast.clone() {
        let worker = ProfileWorker::new(&db_pool, fast, gateway.clone());
        let token = cancel.clone();
        handles.push(tokio::spawn(async move {
            worker.run(token).await;
        }));
    }

    // Gateway socket readers, one per known instance
    {
        let token = cancel.clone();
        let ingestor = ingestor.clone();
        let ws_base = config.gateway.websocket_url();
        let fallback_key = config.gateway.api_key.clone();
        let instances = InstanceRepository::new(pool.clone());
        handles.push(tokio::spawn(async move {
            run_socket_supervisor(instances, ingestor, ws_base, fallback_key, token).await;
        }));
    }

    // API server
    let state = Arc::new(AppState {
        db_pool: db_pool.clone(),
        service,
        router,
        registry,
        engine,
        gate,
        gateway,
        ingestor,
        hub,
        metrics,
        webhook: config.webhook.clone(),
    });

    let app = flowchat_api::create_router(state);
    let bind = format!("{}:{}", config.server.bind_address, config.api.port);
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!("API server listening on {}", bind);

    let api_cancel = cancel.clone();
    let api_handle = tokio::spawn(async move {
        let result = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move { api_cancel.cancelled().await })
        .await;
        if let Err(e) = result {
            error!("API server error: {}", e);
        }
    });

    info!("Flow Chat dispatcher started");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    cancel.cancel();
    let _ = api_handle.await;
    for handle in handles {
        let _ = handle.await;
    }

    info!("Flow Chat dispatcher shutdown complete");
    Ok(())
}

/// Keep one socket reader alive per known instance. New instances picked
/// up on the next scan; removed instances get their reader cancelled.
async fn run_socket_supervisor(
    instances: InstanceRepository,
    ingestor: Arc<Ingestor>,
    ws_base: String,
    fallback_key: Option<String>,
    cancel: CancellationToken,
) {
    let (events_tx, mut events_rx) = mpsc::channel::<GatewayEvent>(1024);
    let mut readers: HashMap<uuid::Uuid, CancellationToken> = HashMap::new();

    // single consumer keeps per-instance ordering from the socket path
    let consumer_cancel = cancel.clone();
    let consumer = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = consumer_cancel.cancelled() => break,
                event = events_rx.recv() => {
                    let Some(event) = event else { break };
                    if let Err(e) = ingestor.handle(&event).await {
                        error!(error = %e, "Socket event ingest failed");
                    }
                }
            }
        }
    });

    loop {
        match scan_instances(&instances).await {
            Ok(list) => {
                let live: std::collections::HashSet<_> = list.iter().map(|i| i.0).collect();

                // cancel readers for instances that disappeared
                readers.retain(|id, token| {
                    if live.contains(id) {
                        true
                    } else {
                        token.cancel();
                        false
                    }
                });

                for (id, external_id, api_key) in list {
                    if readers.contains_key(&id) {
                        continue;
                    }
                    let token = cancel.child_token();
                    let socket = EventSocket::new(
                        ws_base.clone(),
                        external_id,
                        api_key.or_else(|| fallback_key.clone()),
                        events_tx.clone(),
                    );
                    let reader_token = token.clone();
                    tokio::spawn(async move {
                        socket.run(reader_token).await;
                    });
                    readers.insert(id, token);
                }
            }
            Err(e) => error!(error = %e, "Instance scan failed"),
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(std::time::Duration::from_secs(60)) => {}
        }
    }

    for (_, token) in readers {
        token.cancel();
    }
    let _ = consumer.await;
}

async fn scan_instances(
    instances: &InstanceRepository,
) -> Result<Vec<(uuid::Uuid, String, Option<String>)>, sqlx::Error> {
    let all = instances.list_all().await?;
    Ok(all
        .into_iter()
        .map(|i| (i.id, i.external_id, i.api_key))
        .collect())
}

fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},flowchat=debug", config.logging.level)));

    if config.logging.format == "json" {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_target(true))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(true).with_level(true))
            .with(filter)
            .init();
    }
}
