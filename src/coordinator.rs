//! Coordinator (C8): owns the lifecycle of every long-lived component.
//! Start order: Result Handler -> Archive Producer -> Cleanup Producer ->
//! Task Monitor, so the result handler is ready before any producer-created
//! task can complete. Stop order is the exact reverse. A start failure
//! triggers a best-effort stop of whatever already started, then
//! propagates; a stop failure is logged but never blocks stopping the rest
//! (spec §4.8).

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::broker::BrokerAdapter;
use crate::error::AppResult;
use crate::monitor::TaskMonitor;
use crate::producers::{ArchiveProducer, CleanupProducer, Component};
use crate::results::ResultHandler;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthLevel {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentStatus {
    pub name: String,
    pub healthy: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CoordinatorStatus {
    pub overall: HealthLevel,
    pub components: Vec<ComponentStatus>,
}

pub struct Coordinator {
    pub result_handler: Arc<ResultHandler>,
    pub archive_producer: Arc<ArchiveProducer>,
    pub cleanup_producer: Arc<CleanupProducer>,
    pub task_monitor: Arc<TaskMonitor>,
    pub broker: Arc<BrokerAdapter>,
    shutdown_tx: tokio::sync::broadcast::Sender<()>,
    reconnect_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Coordinator {
    pub fn new(
        result_handler: Arc<ResultHandler>,
        archive_producer: Arc<ArchiveProducer>,
        cleanup_producer: Arc<CleanupProducer>,
        task_monitor: Arc<TaskMonitor>,
        broker: Arc<BrokerAdapter>,
    ) -> Self {
        let (shutdown_tx, _) = tokio::sync::broadcast::channel(4);
        Self {
            result_handler,
            archive_producer,
            cleanup_producer,
            task_monitor,
            broker,
            shutdown_tx,
            reconnect_handle: Mutex::new(None),
        }
    }

    fn components(&self) -> Vec<Arc<dyn Component>> {
        vec![
            self.result_handler.clone(),
            self.archive_producer.clone(),
            self.cleanup_producer.clone(),
            self.task_monitor.clone(),
        ]
    }

    /// Connect the broker, then start components in dependency order. On
    /// failure, stops whatever already started (in reverse) before
    /// propagating the error.
    pub async fn start(&self) -> AppResult<()> {
        self.broker.connect().await?;

        {
            let broker = self.broker.clone();
            let shutdown_rx = self.shutdown_tx.subscribe();
            let handle = tokio::spawn(async move {
                broker.run_reconnect_loop(shutdown_rx).await;
            });
            *self.reconnect_handle.lock().await = Some(handle);
        }

        let components = self.components();
        let mut started: Vec<Arc<dyn Component>> = Vec::new();

        for component in components {
            tracing::info!("starting component: {}", component.name());
            match component.start().await {
                Ok(()) => started.push(component),
                Err(e) => {
                    tracing::error!("component {} failed to start: {:?}", component.name(), e);
                    for already_started in started.into_iter().rev() {
                        if let Err(stop_err) = already_started.stop().await {
                            tracing::error!(
                                "best-effort stop of {} failed during start rollback: {:?}",
                                already_started.name(),
                                stop_err
                            );
                        }
                    }
                    let _ = self.shutdown_tx.send(());
                    if let Some(handle) = self.reconnect_handle.lock().await.take() {
                        let _ = handle.await;
                    }
                    return Err(e);
                }
            }
        }

        tracing::info!("coordinator: all components started");
        Ok(())
    }

    /// Stop components in reverse order. A failure in one child is logged
    /// but never prevents stopping the others.
    pub async fn stop(&self) {
        let mut components = self.components();
        components.reverse();

        for component in components {
            tracing::info!("stopping component: {}", component.name());
            if let Err(e) = component.stop().await {
                tracing::error!("component {} failed to stop cleanly: {:?}", component.name(), e);
            }
        }

        let _ = self.shutdown_tx.send(());
        if let Some(handle) = self.reconnect_handle.lock().await.take() {
            let _ = handle.await;
        }

        tracing::info!("coordinator: all components stopped");
    }

    /// Aggregate every child's self-reported health into `{healthy,
    /// degraded, unhealthy}` by the fraction reporting healthy (spec §4.8).
    pub fn status(&self) -> CoordinatorStatus {
        let components = self.components();
        let total = components.len();
        let statuses: Vec<ComponentStatus> = components
            .iter()
            .map(|c| ComponentStatus {
                name: c.name().to_string(),
                healthy: c.is_healthy(),
            })
            .collect();

        let healthy_count = statuses.iter().filter(|s| s.healthy).count();
        let overall = if healthy_count == total {
            HealthLevel::Healthy
        } else if healthy_count == 0 {
            HealthLevel::Unhealthy
        } else {
            HealthLevel::Degraded
        };

        CoordinatorStatus {
            overall,
            components: statuses,
        }
    }
}
