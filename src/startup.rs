//! Application assembly: storage selection, background tasks and the HTTP server.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::adapters::http::{billing_router, BillingAppState};
use crate::adapters::memory::{
    InMemoryAgreementLedger, InMemoryDunningStore, InMemoryEventDeduplicator,
};
use crate::adapters::notifications::LoggingNotificationSink;
use crate::adapters::postgres::{
    self, PostgresAgreementLedger, PostgresDunningStore, PostgresEventDeduplicator,
};
use crate::adapters::stripe::{StripeConfig, StripeSubscriptionGateway};
use crate::application::{
    notification_channel, DunningScheduler, DunningSchedulerConfig, GraceExpiry,
    ReconciliationEngine, RetryPolicy,
};
use crate::config::{AppConfig, BillingConfig, PaymentConfig};
use crate::domain::billing::{DunningPolicy, ReconcilePolicy, StripeWebhookVerifier};
use crate::ports::{AgreementLedger, DunningTaskStore, EventDeduplicator};

/// Storage ports, backed by Postgres or by memory.
pub struct Storage {
    pub ledger: Arc<dyn AgreementLedger>,
    pub deduplicator: Arc<dyn EventDeduplicator>,
    pub dunning: Arc<dyn DunningTaskStore>,
}

impl Storage {
    /// In-memory stores for development and tests.
    pub fn in_memory(billing: &BillingConfig) -> Self {
        Self {
            ledger: Arc::new(InMemoryAgreementLedger::new()),
            deduplicator: Arc::new(InMemoryEventDeduplicator::new(billing.claim_timeout())),
            dunning: Arc::new(InMemoryDunningStore::new()),
        }
    }

    async fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let Some(database) = &config.database else {
            tracing::warn!("No database configured, using in-memory storage");
            return Ok(Self::in_memory(&config.billing));
        };

        let pool = postgres::connect(database)
            .await
            .context("Failed to connect to PostgreSQL")?;
        if database.run_migrations {
            postgres::run_migrations(&pool)
                .await
                .context("Migration failed")?;
        }

        Ok(Self {
            ledger: Arc::new(PostgresAgreementLedger::new(pool.clone())),
            deduplicator: Arc::new(PostgresEventDeduplicator::new(
                pool.clone(),
                config.billing.claim_timeout(),
            )),
            dunning: Arc::new(PostgresDunningStore::new(pool)),
        })
    }
}

/// Grace window and dunning cadence from configuration.
pub fn billing_policies(billing: &BillingConfig) -> (ReconcilePolicy, DunningPolicy) {
    let reconcile = ReconcilePolicy {
        grace_window: billing.grace_window(),
    };
    let dunning = DunningPolicy {
        max_attempts: billing.max_dunning_attempts,
        backoff_base: chrono::Duration::seconds(billing.dunning_backoff_base_secs as i64),
        backoff_cap: chrono::Duration::seconds(billing.dunning_backoff_cap_secs as i64),
    };
    (reconcile, dunning)
}

/// Webhook verifier honoring the replay window and livemode settings.
pub fn webhook_verifier(payment: &PaymentConfig) -> StripeWebhookVerifier {
    let verifier = StripeWebhookVerifier::new(payment.webhook_secret.clone())
        .with_tolerance(payment.replay_tolerance_secs, payment.clock_skew_secs);
    if payment.require_livemode_match {
        verifier.require_livemode(payment.is_live_mode())
    } else {
        verifier
    }
}

/// Running service: router plus the background tasks behind it.
pub struct Application {
    addr: SocketAddr,
    router: Router,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Application {
    /// Wires every component and starts the background tasks.
    pub async fn build(config: AppConfig) -> anyhow::Result<Self> {
        let addr = config
            .server
            .socket_addr()
            .context("Invalid server address")?;

        let storage = Storage::from_config(&config).await?;
        let (reconcile_policy, dunning_policy) = billing_policies(&config.billing);

        let (shutdown, shutdown_rx) = watch::channel(false);

        let (queue, dispatcher) = notification_channel(
            config.billing.notification_queue_capacity,
            Arc::new(LoggingNotificationSink::new()),
        );

        let scheduler = Arc::new(DunningScheduler::with_config(
            storage.dunning.clone(),
            queue.clone(),
            dunning_policy,
            DunningSchedulerConfig::default()
                .with_sweep_interval(config.billing.sweep_interval())
                .with_event_retention(config.billing.processed_event_retention()),
        ));

        let engine = Arc::new(
            ReconciliationEngine::new(
                storage.ledger.clone(),
                scheduler.clone(),
                queue,
                reconcile_policy,
            )
            .with_conflict_retries(config.billing.ledger_conflict_retries),
        );

        let gateway = Arc::new(StripeSubscriptionGateway::new(
            StripeConfig::from_payment_config(&config.payment),
        ));
        if config.payment.is_test_mode() {
            tracing::info!("Payment processor in test mode");
        }

        let state = BillingAppState {
            engine: engine.clone(),
            gateway,
            deduplicator: storage.deduplicator.clone(),
            verifier: webhook_verifier(&config.payment),
            retry: RetryPolicy::new(
                config.payment.gateway_max_attempts,
                config.payment.gateway_retry_base(),
            ),
        };

        let router = billing_router()
            .layer(TimeoutLayer::new(config.server.request_timeout()))
            .layer(TraceLayer::new_for_http())
            .with_state(state);

        let tasks = vec![
            tokio::spawn(dispatcher.run(shutdown_rx.clone())),
            tokio::spawn(scheduler.run(
                engine as Arc<dyn GraceExpiry>,
                Some(storage.deduplicator),
                shutdown_rx,
            )),
        ];

        Ok(Self {
            addr,
            router,
            shutdown,
            tasks,
        })
    }

    /// Serves until ctrl-c, then stops the background tasks.
    pub async fn run_until_stopped(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr)
            .await
            .with_context(|| format!("Failed to bind {}", self.addr))?;
        tracing::info!(addr = %self.addr, "Listening");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("Server error")?;

        tracing::info!("Stopping background tasks");
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Background task panicked");
            }
        }
        tracing::info!("Shutdown complete");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
