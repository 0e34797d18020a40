//! Monitoring Collector (C9): metrics loop @60s, health loop @30s, both
//! spawned as `tokio::spawn` tasks gated by a shared shutdown broadcast,
//! the same worker shape as the host's background workers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use sqlx::SqlitePool;
use sysinfo::{Disks, System};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::broker::{
    BrokerAdapter, QUEUE_ARCHIVE_COMMANDS, QUEUE_ARCHIVE_POSITIONS, QUEUE_ARCHIVE_STATUS,
    QUEUE_CLEANUP_EXPIRED,
};
use crate::cache::{KvCache, KEY_METRICS_SYSTEM, KEY_METRICS_TASKS_HISTORY};
use crate::db::repository::TaskRepository;
use crate::error::AppResult;
use crate::messages::AlertType;
use crate::monitoring::alerts::{
    AlertStore, CPU_THRESHOLDS, DISK_THRESHOLDS, MEMORY_THRESHOLDS, QUEUE_SIZE_THRESHOLDS,
    TASK_FAILURE_RATE_THRESHOLDS,
};
use crate::notify::NotificationEngine;
use crate::producers::Component;

const METRICS_HISTORY_CAP: isize = 288;

#[derive(Debug, Clone, Serialize)]
pub struct SystemMetrics {
    pub cpu_percent: f32,
    pub memory_used_bytes: u64,
    pub memory_total_bytes: u64,
    pub disk_used_bytes: u64,
    pub disk_total_bytes: u64,
    pub uptime_ms: u64,
    pub sampled_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct DependencyHealth {
    pub status: DependencyStatus,
    pub message: Option<String>,
    pub last_check: chrono::DateTime<chrono::Utc>,
    pub response_time_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub overall: DependencyStatus,
    pub database: DependencyHealth,
    pub broker: DependencyHealth,
    pub cache: DependencyHealth,
}

pub struct MonitoringCollector {
    pool: SqlitePool,
    broker: Arc<BrokerAdapter>,
    cache: KvCache,
    alerts: Arc<AlertStore>,
    notify_engine: Arc<NotificationEngine>,
    shutdown_tx: tokio::sync::broadcast::Sender<()>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    latest_health: Arc<RwLock<Option<HealthSnapshot>>>,
    started_at: std::time::Instant,
    healthy: Arc<AtomicBool>,
}

impl MonitoringCollector {
    pub fn new(
        pool: SqlitePool,
        broker: Arc<BrokerAdapter>,
        cache: KvCache,
        alerts: Arc<AlertStore>,
        notify_engine: Arc<NotificationEngine>,
    ) -> Self {
        let (shutdown_tx, _) = tokio::sync::broadcast::channel(4);
        Self {
            pool,
            broker,
            cache,
            alerts,
            notify_engine,
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
            latest_health: Arc::new(RwLock::new(None)),
            started_at: std::time::Instant::now(),
            healthy: Arc::new(AtomicBool::new(true)),
        }
    }

    pub async fn latest_health(&self) -> Option<HealthSnapshot> {
        self.latest_health.read().await.clone()
    }

    pub async fn latest_metrics(&self) -> Option<SystemMetrics> {
        self.cache.get_json(KEY_METRICS_SYSTEM).await
    }

    fn sample_system(started_at: std::time::Instant) -> SystemMetrics {
        let mut system = System::new_all();
        system.refresh_cpu_usage();
        system.refresh_memory();
        let disks = Disks::new_with_refreshed_list();

        let (disk_used, disk_total) = disks.iter().fold((0u64, 0u64), |(used, total), d| {
            let t = d.total_space();
            let u = t.saturating_sub(d.available_space());
            (used + u, total + t)
        });

        SystemMetrics {
            cpu_percent: system.global_cpu_usage(),
            memory_used_bytes: system.used_memory(),
            memory_total_bytes: system.total_memory(),
            disk_used_bytes: disk_used,
            disk_total_bytes: disk_total,
            uptime_ms: started_at.elapsed().as_millis() as u64,
            sampled_at: chrono::Utc::now(),
        }
    }

    /// Forwards a freshly-raised alert to the notification engine (spec §2:
    /// "C9 samples -> threshold cross -> C10 -> C11 -> outbound"). A
    /// dispatch failure is logged, not propagated: a notification hiccup
    /// must never interrupt the metrics loop.
    async fn dispatch_alert(notify_engine: &NotificationEngine, alert: Option<crate::messages::Alert>) {
        if let Some(alert) = alert {
            tracing::warn!("alert raised: {:?}", alert);
            if let Err(e) = notify_engine.send_alert_notification(&alert).await {
                tracing::error!("failed to dispatch notification for alert {}: {:?}", alert.id, e);
            }
        }
    }

    async fn metrics_tick(
        pool: &SqlitePool,
        broker: &BrokerAdapter,
        cache: &KvCache,
        alerts: &AlertStore,
        notify_engine: &NotificationEngine,
        started_at: std::time::Instant,
    ) {
        let metrics = Self::sample_system(started_at);
        cache
            .set_json(KEY_METRICS_SYSTEM, &metrics, Duration::from_secs(300))
            .await;
        cache
            .push_capped(KEY_METRICS_TASKS_HISTORY, &metrics, METRICS_HISTORY_CAP)
            .await;

        let cpu_alert = alerts
            .evaluate(AlertType::Cpu, metrics.cpu_percent as f64, &CPU_THRESHOLDS)
            .await;
        Self::dispatch_alert(notify_engine, cpu_alert).await;

        let memory_percent = if metrics.memory_total_bytes > 0 {
            (metrics.memory_used_bytes as f64 / metrics.memory_total_bytes as f64) * 100.0
        } else {
            0.0
        };
        let memory_alert = alerts
            .evaluate(AlertType::Memory, memory_percent, &MEMORY_THRESHOLDS)
            .await;
        Self::dispatch_alert(notify_engine, memory_alert).await;

        let disk_percent = if metrics.disk_total_bytes > 0 {
            (metrics.disk_used_bytes as f64 / metrics.disk_total_bytes as f64) * 100.0
        } else {
            0.0
        };
        let disk_alert = alerts
            .evaluate(AlertType::Disk, disk_percent, &DISK_THRESHOLDS)
            .await;
        Self::dispatch_alert(notify_engine, disk_alert).await;

        if let Ok(stats) = TaskRepository::statistics(pool, None).await {
            let finished = stats.completed + stats.failed;
            if finished > 0 {
                let failure_rate = (stats.failed as f64 / finished as f64) * 100.0;
                let failure_alert = alerts
                    .evaluate(AlertType::TaskFailure, failure_rate, &TASK_FAILURE_RATE_THRESHOLDS)
                    .await;
                Self::dispatch_alert(notify_engine, failure_alert).await;
            }
        }

        let mut max_queue_depth = 0u32;
        for queue in [
            QUEUE_ARCHIVE_POSITIONS,
            QUEUE_ARCHIVE_COMMANDS,
            QUEUE_ARCHIVE_STATUS,
            QUEUE_CLEANUP_EXPIRED,
        ] {
            if let Ok(count) = broker.queue_message_count(queue).await {
                max_queue_depth = max_queue_depth.max(count);
            }
        }
        let queue_alert = alerts
            .evaluate(AlertType::QueueSize, max_queue_depth as f64, &QUEUE_SIZE_THRESHOLDS)
            .await;
        Self::dispatch_alert(notify_engine, queue_alert).await;
    }

    async fn probe_database(pool: &SqlitePool) -> DependencyHealth {
        let start = std::time::Instant::now();
        let result = sqlx::query("SELECT 1").execute(pool).await;
        let response_time_ms = start.elapsed().as_millis() as u64;
        match result {
            Ok(_) => DependencyHealth {
                status: DependencyStatus::Healthy,
                message: None,
                last_check: chrono::Utc::now(),
                response_time_ms: Some(response_time_ms),
            },
            Err(e) => DependencyHealth {
                status: DependencyStatus::Unhealthy,
                message: Some(e.to_string()),
                last_check: chrono::Utc::now(),
                response_time_ms: Some(response_time_ms),
            },
        }
    }

    fn probe_broker(broker: &BrokerAdapter) -> DependencyHealth {
        let status = if broker.is_connected() {
            DependencyStatus::Healthy
        } else {
            DependencyStatus::Unhealthy
        };
        DependencyHealth {
            status,
            message: None,
            last_check: chrono::Utc::now(),
            response_time_ms: None,
        }
    }

    async fn probe_cache(cache: &KvCache) -> DependencyHealth {
        let start = std::time::Instant::now();
        let alive = cache.ping().await;
        let response_time_ms = start.elapsed().as_millis() as u64;
        DependencyHealth {
            status: if alive {
                DependencyStatus::Healthy
            } else {
                DependencyStatus::Degraded
            },
            message: None,
            last_check: chrono::Utc::now(),
            response_time_ms: Some(response_time_ms),
        }
    }

    async fn health_tick(
        pool: &SqlitePool,
        broker: &BrokerAdapter,
        cache: &KvCache,
        latest: &RwLock<Option<HealthSnapshot>>,
        healthy: &AtomicBool,
    ) {
        let database = Self::probe_database(pool).await;
        let broker_health = Self::probe_broker(broker);
        let cache_health = Self::probe_cache(cache).await;

        let overall = if [database.status, broker_health.status, cache_health.status]
            .iter()
            .any(|s| *s == DependencyStatus::Unhealthy)
        {
            DependencyStatus::Unhealthy
        } else if [database.status, broker_health.status, cache_health.status]
            .iter()
            .any(|s| *s == DependencyStatus::Degraded)
        {
            DependencyStatus::Degraded
        } else {
            DependencyStatus::Healthy
        };

        healthy.store(overall != DependencyStatus::Unhealthy, Ordering::Relaxed);

        *latest.write().await = Some(HealthSnapshot {
            overall,
            database,
            broker: broker_health,
            cache: cache_health,
        });
    }
}

#[async_trait::async_trait]
impl Component for MonitoringCollector {
    async fn start(&self) -> AppResult<()> {
        let mut handles = self.handles.lock().await;

        {
            let pool = self.pool.clone();
            let broker = self.broker.clone();
            let cache = self.cache.clone();
            let alerts = self.alerts.clone();
            let notify_engine = self.notify_engine.clone();
            let started_at = self.started_at;
            let mut shutdown_rx = self.shutdown_tx.subscribe();
            handles.push(tokio::spawn(async move {
                loop {
                    MonitoringCollector::metrics_tick(
                        &pool,
                        &broker,
                        &cache,
                        &alerts,
                        &notify_engine,
                        started_at,
                    )
                    .await;
                    tokio::select! {
                        _ = shutdown_rx.recv() => break,
                        _ = tokio::time::sleep(Duration::from_secs(60)) => {}
                    }
                }
            }));
        }

        {
            let pool = self.pool.clone();
            let broker = self.broker.clone();
            let cache = self.cache.clone();
            let latest = self.latest_health.clone();
            let healthy = self.healthy.clone();
            let mut shutdown_rx = self.shutdown_tx.subscribe();
            handles.push(tokio::spawn(async move {
                loop {
                    MonitoringCollector::health_tick(&pool, &broker, &cache, &latest, &healthy).await;
                    tokio::select! {
                        _ = shutdown_rx.recv() => break,
                        _ = tokio::time::sleep(Duration::from_secs(30)) => {}
                    }
                }
            }));
        }

        tracing::info!("Monitoring collector started");
        Ok(())
    }

    async fn stop(&self) -> AppResult<()> {
        let _ = self.shutdown_tx.send(());
        let mut handles = self.handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
        tracing::info!("Monitoring collector stopped");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "monitoring_collector"
    }

    fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }
}
