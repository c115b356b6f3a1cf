//! The per-copier runtime: subscription ownership, heartbeat, fan-out
//! dispatch, lifecycle transitions, and crash recovery.

pub mod fanout;
pub mod risk;
pub mod scaling;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use metrics::gauge;
use sqlx::PgPool;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout};
use uuid::Uuid;

use crate::adapters::{AdapterError, AdapterRegistry, BrokerAdapter, ConnectConfig};
use crate::db::log_repo::LogRefs;
use crate::db::{account_repo, copier_repo, log_repo, trade_repo};
use crate::models::{
    Copier, CopierStatus, LogLevel, TradeExecution, TradingAccount,
};

use self::fanout::PositionBook;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("copier not found")]
    NotFound,

    #[error("copier is already running")]
    AlreadyRunning,

    #[error("master account is not connected")]
    MasterNotConnected,

    #[error("copier has no active follower configs")]
    NoActiveFollowers,

    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition { from: CopierStatus, to: CopierStatus },

    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub heartbeat_interval: Duration,
    /// Bound on waiting for a worker or adapter during stop/shutdown.
    pub stop_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            stop_timeout: Duration::from_secs(5),
        }
    }
}

struct CopierHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
    master_adapter: Arc<dyn BrokerAdapter>,
}

/// Hosts the copier workers. One worker per active copier owns the master
/// subscription plus a heartbeat; follower sessions are opened on demand
/// inside the fan-out.
pub struct CopierEngine {
    pool: PgPool,
    registry: Arc<AdapterRegistry>,
    settings: EngineSettings,
    running: Mutex<HashMap<Uuid, CopierHandle>>,
}

impl CopierEngine {
    pub fn new(pool: PgPool, registry: Arc<AdapterRegistry>, settings: EngineSettings) -> Self {
        Self {
            pool,
            registry,
            settings,
            running: Mutex::new(HashMap::new()),
        }
    }

    pub async fn is_running(&self, copier_id: Uuid) -> bool {
        self.running.lock().await.contains_key(&copier_id)
    }

    /// Start a copier on behalf of a user. `STOPPED -> ACTIVE` and
    /// `PAUSED -> ACTIVE`; starting an ACTIVE copier reports
    /// `AlreadyRunning`, starting an errored one requires a stop first.
    pub async fn start(&self, copier_id: Uuid, user_id: Uuid) -> Result<(), EngineError> {
        let copier = copier_repo::get_copier_for_user(&self.pool, copier_id, user_id)
            .await?
            .ok_or(EngineError::NotFound)?;

        match copier.status {
            CopierStatus::Active => return Err(EngineError::AlreadyRunning),
            CopierStatus::Error => {
                return Err(EngineError::InvalidTransition {
                    from: CopierStatus::Error,
                    to: CopierStatus::Active,
                })
            }
            CopierStatus::Stopped | CopierStatus::Paused => {}
        }

        self.spawn_worker(copier).await
    }

    /// Stop a copier: dispose the subscription, clear the heartbeat,
    /// persist STOPPED. Idempotent; also the only exit from ERROR.
    pub async fn stop(&self, copier_id: Uuid, user_id: Uuid) -> Result<(), EngineError> {
        let copier = copier_repo::get_copier_for_user(&self.pool, copier_id, user_id)
            .await?
            .ok_or(EngineError::NotFound)?;

        self.halt_worker(copier.id).await;
        copier_repo::set_status(&self.pool, copier.id, CopierStatus::Stopped).await?;
        log_repo::append(
            &self.pool,
            copier.id,
            LogLevel::Info,
            "Copier stopped",
            LogRefs::default(),
            None,
        )
        .await?;

        Ok(())
    }

    /// Pause: runtime-identical to stop, persisted as PAUSED.
    pub async fn pause(&self, copier_id: Uuid, user_id: Uuid) -> Result<(), EngineError> {
        let copier = copier_repo::get_copier_for_user(&self.pool, copier_id, user_id)
            .await?
            .ok_or(EngineError::NotFound)?;

        match copier.status {
            CopierStatus::Active | CopierStatus::Paused => {}
            from => {
                return Err(EngineError::InvalidTransition {
                    from,
                    to: CopierStatus::Paused,
                })
            }
        }

        self.halt_worker(copier.id).await;
        copier_repo::set_status(&self.pool, copier.id, CopierStatus::Paused).await?;
        log_repo::append(
            &self.pool,
            copier.id,
            LogLevel::Info,
            "Copier paused",
            LogRefs::default(),
            None,
        )
        .await?;

        Ok(())
    }

    /// Crash recovery: re-subscribe every copier persisted as ACTIVE.
    /// Replication stays idempotent through mapping uniqueness, so a
    /// replayed window after restart cannot double-place. Copiers that
    /// fail to re-subscribe are downgraded to STOPPED.
    pub async fn recover(&self) -> anyhow::Result<()> {
        let actives = copier_repo::list_by_status(&self.pool, CopierStatus::Active).await?;
        if actives.is_empty() {
            return Ok(());
        }

        tracing::info!(count = actives.len(), "Recovering copiers persisted as ACTIVE");

        for copier in actives {
            let copier_id = copier.id;
            let watermark = trade_repo::latest_filled_at(&self.pool, copier.master_account_id)
                .await
                .ok()
                .flatten();
            match self.spawn_worker(copier).await {
                Ok(()) => {
                    tracing::info!(
                        copier = %copier_id,
                        replay_watermark = ?watermark,
                        "Copier re-subscribed after restart"
                    );
                }
                Err(e) => {
                    tracing::warn!(copier = %copier_id, error = %e, "Recovery failed — downgrading to STOPPED");
                    copier_repo::set_status(&self.pool, copier_id, CopierStatus::Stopped).await?;
                    log_repo::append(
                        &self.pool,
                        copier_id,
                        LogLevel::Warn,
                        &format!("Recovery failed, copier stopped: {e}"),
                        LogRefs::default(),
                        None,
                    )
                    .await?;
                }
            }
        }

        Ok(())
    }

    /// Process shutdown: halt every worker, then disconnect the master
    /// adapters with a bounded per-adapter timeout. Persisted statuses are
    /// left untouched so recovery re-subscribes on the next boot.
    pub async fn shutdown_all(&self) {
        let handles: Vec<(Uuid, CopierHandle)> =
            self.running.lock().await.drain().collect();
        gauge!("copiers_active").set(0.0);

        for (copier_id, mut handle) in handles {
            let _ = handle.shutdown.send(true);
            if timeout(self.settings.stop_timeout, &mut handle.task).await.is_err() {
                tracing::warn!(copier = %copier_id, "Worker did not stop in time — aborting");
                handle.task.abort();
            }

            if timeout(self.settings.stop_timeout, handle.master_adapter.disconnect())
                .await
                .is_err()
            {
                tracing::warn!(copier = %copier_id, "Adapter disconnect timed out");
            }
        }

        tracing::info!("All copier workers stopped");
    }

    async fn halt_worker(&self, copier_id: Uuid) {
        let handle = self.running.lock().await.remove(&copier_id);
        if let Some(mut handle) = handle {
            let _ = handle.shutdown.send(true);
            if timeout(self.settings.stop_timeout, &mut handle.task).await.is_err() {
                tracing::warn!(copier = %copier_id, "Worker did not stop in time — aborting");
                handle.task.abort();
            }
            let count = self.running.lock().await.len();
            gauge!("copiers_active").set(count as f64);
        }
    }

    /// Validate preconditions, install the subscription, persist ACTIVE.
    async fn spawn_worker(&self, copier: Copier) -> Result<(), EngineError> {
        let mut running = self.running.lock().await;
        if running.contains_key(&copier.id) {
            return Err(EngineError::AlreadyRunning);
        }

        let master = account_repo::get_account(&self.pool, copier.master_account_id)
            .await?
            .ok_or(EngineError::NotFound)?;
        if !master.is_connected {
            return Err(EngineError::MasterNotConnected);
        }

        let configs = copier_repo::get_active_configs(&self.pool, copier.id).await?;
        if configs.is_empty() {
            return Err(EngineError::NoActiveFollowers);
        }

        let adapter = self.registry.get_adapter(master.platform, master.firm)?;
        if !adapter.is_connected() {
            if let Err(e) = adapter.connect(&ConnectConfig::from_account(&master)).await {
                account_repo::set_connection_state(
                    &self.pool,
                    master.id,
                    false,
                    Some(&e.to_string()),
                )
                .await?;
                return Err(e.into());
            }
        }

        let trade_rx = adapter.subscribe_trades();
        let book = PositionBook::seed(trade_repo::net_positions(&self.pool, master.id).await?);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = Worker {
            pool: self.pool.clone(),
            registry: Arc::clone(&self.registry),
            copier_id: copier.id,
            master: master.clone(),
            adapter: Arc::clone(&adapter),
            heartbeat_interval: self.settings.heartbeat_interval,
        };
        let task = tokio::spawn(worker.run(trade_rx, book, shutdown_rx));

        running.insert(
            copier.id,
            CopierHandle {
                shutdown: shutdown_tx,
                task,
                master_adapter: adapter,
            },
        );
        gauge!("copiers_active").set(running.len() as f64);
        drop(running);

        copier_repo::set_status(&self.pool, copier.id, CopierStatus::Active).await?;
        log_repo::append(
            &self.pool,
            copier.id,
            LogLevel::Info,
            &format!("Copier started on master {}", master.account_number),
            LogRefs::default(),
            None,
        )
        .await?;

        tracing::info!(copier = %copier.id, master = %master.account_number, "Copier started");
        Ok(())
    }
}

struct Worker {
    pool: PgPool,
    registry: Arc<AdapterRegistry>,
    copier_id: Uuid,
    master: TradingAccount,
    adapter: Arc<dyn BrokerAdapter>,
    heartbeat_interval: Duration,
}

impl Worker {
    async fn run(
        self,
        mut trade_rx: broadcast::Receiver<TradeExecution>,
        mut book: PositionBook,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let mut heartbeat = interval(self.heartbeat_interval);
        heartbeat.tick().await; // consume the immediate tick
        let mut adapter_was_up = true;

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    tracing::debug!(copier = %self.copier_id, "Worker shutdown requested");
                    return;
                }
                _ = heartbeat.tick() => {
                    self.heartbeat(&mut adapter_was_up).await;
                }
                msg = trade_rx.recv() => {
                    match msg {
                        Ok(exec) => {
                            // The firm-level stream carries every account on
                            // the session; only the master's fills matter here.
                            if exec.account_id != self.master.account_number {
                                continue;
                            }
                            let started = std::time::Instant::now();
                            if let Err(e) = fanout::handle_master_execution(
                                &self.pool,
                                &self.registry,
                                self.copier_id,
                                &self.master,
                                &exec,
                                &mut book,
                            )
                            .await
                            {
                                tracing::error!(
                                    copier = %self.copier_id,
                                    error = %e,
                                    "Fan-out failed for master execution"
                                );
                            }
                            metrics::histogram!("fanout_latency_seconds")
                                .record(started.elapsed().as_secs_f64());
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(
                                copier = %self.copier_id,
                                skipped,
                                "Master subscription lagged — executions dropped"
                            );
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            self.fault("master subscription closed").await;
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Liveness logging plus adapter health verification.
    async fn heartbeat(&self, adapter_was_up: &mut bool) {
        let up = self.adapter.is_connected();
        tracing::debug!(copier = %self.copier_id, adapter_up = up, "Copier heartbeat");

        if !up && *adapter_was_up {
            *adapter_was_up = false;
            let _ = log_repo::append(
                &self.pool,
                self.copier_id,
                LogLevel::Warn,
                &format!(
                    "Master adapter for {} is disconnected (reconnect exhausted or session lost)",
                    self.master.account_number
                ),
                LogRefs::default(),
                None,
            )
            .await;
        } else if up && !*adapter_was_up {
            *adapter_was_up = true;
            let _ = log_repo::append(
                &self.pool,
                self.copier_id,
                LogLevel::Info,
                &format!("Master adapter for {} reconnected", self.master.account_number),
                LogRefs::default(),
                None,
            )
            .await;
        }
    }

    /// Unrecoverable worker fault: persist ERROR and audit it.
    async fn fault(&self, reason: &str) {
        tracing::error!(copier = %self.copier_id, reason, "Copier entering ERROR state");
        if let Err(e) =
            copier_repo::set_status(&self.pool, self.copier_id, CopierStatus::Error).await
        {
            tracing::error!(copier = %self.copier_id, error = %e, "Failed to persist ERROR status");
        }
        let _ = log_repo::append(
            &self.pool,
            self.copier_id,
            LogLevel::Error,
            &format!("Copier faulted: {reason}"),
            LogRefs::default(),
            None,
        )
        .await;
    }
}
