//! Notification Engine (C10, spec §4.10): rule-matches alerts into queued,
//! templated messages and drains them through per-channel providers with
//! retry and cooldown. The "in-memory queue" in the algorithm is backed by
//! the durable `notification_queue` table (the host's retry-queue pattern)
//! so a restart does not lose in-flight notifications; the KV mirror and
//! 24h TTL the algorithm calls for are layered on top.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveTime, Utc};
use sqlx::SqlitePool;
use tokio::sync::{Mutex, RwLock};

use crate::cache::{cooldown_key, notification_key, KvCache, KEY_NOTIFICATION_HISTORY, KEY_NOTIFICATION_QUEUE};
use crate::config::NotificationRetryConfig;
use crate::db::models::{CreateNotificationLogRow, CreateNotificationQueueRow, NotificationQueueRow};
use crate::db::repository::{NotificationLogRepository, NotificationQueueRepository};
use crate::error::{AppError, AppResult};
use crate::messages::{
    Alert, AlertSeverity, NotificationChannel, NotificationMessage, NotificationRule,
    NotificationSeverity, NotificationStatus,
};
use crate::notify::providers::ChannelProvider;
use crate::notify::templates::{self, TemplateStore};
use crate::producers::Component;

#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct NotificationStats {
    pub total: u64,
    pub sent: u64,
    pub failed: u64,
}

#[derive(Default)]
struct StatsCounters {
    total: AtomicU64,
    sent: AtomicU64,
    failed: AtomicU64,
}

fn map_severity(severity: AlertSeverity) -> NotificationSeverity {
    match severity {
        AlertSeverity::Warning => NotificationSeverity::Warning,
        AlertSeverity::Critical => NotificationSeverity::Critical,
    }
}

fn time_within_window(start: &str, end: &str) -> bool {
    let now = Local::now().time();
    let parse = |s: &str| NaiveTime::parse_from_str(s, "%H:%M").ok();
    match (parse(start), parse(end)) {
        (Some(start), Some(end)) if start <= end => now >= start && now <= end,
        (Some(start), Some(end)) => now >= start || now <= end,
        _ => true,
    }
}

struct Inner {
    pool: SqlitePool,
    cache: KvCache,
    config: NotificationRetryConfig,
    rules: RwLock<Vec<NotificationRule>>,
    templates: TemplateStore,
    providers: HashMap<NotificationChannel, Arc<dyn ChannelProvider>>,
    stats: StatsCounters,
    draining: Mutex<()>,
}

/// Notification Engine (C10): rule-match/cooldown/template/enqueue on the
/// way in, a serialized 5s drain loop on the way out.
pub struct NotificationEngine {
    inner: Arc<Inner>,
    shutdown_tx: tokio::sync::broadcast::Sender<()>,
    handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl NotificationEngine {
    pub fn new(
        pool: SqlitePool,
        cache: KvCache,
        config: NotificationRetryConfig,
        providers: Vec<Arc<dyn ChannelProvider>>,
    ) -> Self {
        let (shutdown_tx, _) = tokio::sync::broadcast::channel(4);
        let providers = providers.into_iter().map(|p| (p.channel(), p)).collect();
        Self {
            inner: Arc::new(Inner {
                pool,
                cache,
                config,
                rules: RwLock::new(Vec::new()),
                templates: TemplateStore::with_defaults(),
                providers,
                stats: StatsCounters::default(),
                draining: Mutex::new(()),
            }),
            shutdown_tx,
            handle: Mutex::new(None),
        }
    }

    pub async fn set_rules(&self, rules: Vec<NotificationRule>) {
        *self.inner.rules.write().await = rules;
    }

    pub fn stats(&self) -> NotificationStats {
        NotificationStats {
            total: self.inner.stats.total.load(Ordering::Relaxed),
            sent: self.inner.stats.sent.load(Ordering::Relaxed),
            failed: self.inner.stats.failed.load(Ordering::Relaxed),
        }
    }

    /// Steps 1-5 of the algorithm: match rules, check cooldowns, render
    /// templates, enqueue, and set cooldowns.
    pub async fn send_alert_notification(&self, alert: &Alert) -> AppResult<()> {
        send_alert_notification(&self.inner, alert).await
    }
}

async fn send_alert_notification(inner: &Inner, alert: &Alert) -> AppResult<()> {
    let rules = inner.rules.read().await;
    let mapped_severity = map_severity(alert.severity);

    for rule in rules.iter() {
        if !rule.enabled {
            continue;
        }
        if !rule.conditions.alert_types.is_empty()
            && !rule.conditions.alert_types.contains(&alert.alert_type)
        {
            continue;
        }
        if !rule.conditions.severities.is_empty()
            && !rule.conditions.severities.contains(&alert.severity)
        {
            continue;
        }
        if let Some(window) = &rule.conditions.time_window {
            if !time_within_window(&window.start, &window.end) {
                continue;
            }
        }

        let cooldown = cooldown_key(&rule.id, alert.alert_type.as_str());
        if inner.cache.exists(&cooldown).await {
            continue;
        }

        for target in &rule.notifications {
            let template = inner
                .templates
                .find(&target.template_id)
                .or_else(|| inner.templates.find_fallback(target.channel, mapped_severity));

            let (title, content) = match template {
                Some(t) => (
                    templates::render(&t.title, alert, mapped_severity),
                    templates::render(&t.body, alert, mapped_severity),
                ),
                None => (
                    format!("[{}] {} alert", alert.severity.as_str(), alert.alert_type.as_str()),
                    templates::render(
                        "Alert {{alertId}}: {{message}} (value={{value}}, threshold={{threshold}})",
                        alert,
                        mapped_severity,
                    ),
                ),
            };

            enqueue(inner, alert, target.channel, &target.recipients, title, content).await?;
        }

        inner
            .cache
            .set_cooldown(&cooldown, Duration::from_secs(rule.cooldown_period_seconds))
            .await;
    }

    Ok(())
}

async fn enqueue(
    inner: &Inner,
    alert: &Alert,
    channel: NotificationChannel,
    recipients: &[String],
    title: String,
    content: String,
) -> AppResult<()> {
    let id = uuid::Uuid::new_v4().to_string();
    let now = Utc::now();
    let expires_at = now + chrono::Duration::seconds(inner.config.default_ttl_seconds as i64);
    let severity_str = match map_severity(alert.severity) {
        NotificationSeverity::Info => "info",
        NotificationSeverity::Warning => "warning",
        NotificationSeverity::Error => "error",
        NotificationSeverity::Critical => "critical",
    };

    let row = NotificationQueueRepository::create(
        &inner.pool,
        CreateNotificationQueueRow {
            id: id.clone(),
            alert_id: Some(alert.id.clone()),
            rule_id: None,
            channel: channel.as_str().to_string(),
            recipients_json: serde_json::to_string(recipients)
                .map_err(|e| AppError::Internal(anyhow::anyhow!("failed to serialize recipients: {e}")))?,
            title: title.clone(),
            content: content.clone(),
            severity: severity_str.to_string(),
            metadata_json: "{}".to_string(),
            max_attempts: inner.config.max_attempts as i64,
            expires_at: Some(expires_at.naive_utc()),
        },
    )
    .await?;

    let message = NotificationMessage {
        id: id.clone(),
        title,
        content,
        severity: map_severity(alert.severity),
        channel,
        recipients: recipients.to_vec(),
        status: NotificationStatus::Pending,
        retry_count: 0,
        max_retries: inner.config.max_attempts,
        alert_id: Some(alert.id.clone()),
        metadata: HashMap::new(),
        created_at: now,
        updated_at: now,
    };
    inner
        .cache
        .set_json(&notification_key(&id), &message, Duration::from_secs(86400))
        .await;

    tracing::info!(notification_id = %row.id, channel = %channel.as_str(), "notification enqueued");
    Ok(())
}

fn row_to_message(row: &NotificationQueueRow) -> AppResult<NotificationMessage> {
    let channel = NotificationChannel::from_str(&row.channel)
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("unknown channel {}", row.channel)))?;
    let severity: NotificationSeverity = serde_json::from_str(&format!("\"{}\"", row.severity))
        .map_err(|e| AppError::Internal(anyhow::anyhow!("bad severity {}: {e}", row.severity)))?;
    let recipients: Vec<String> = serde_json::from_str(&row.recipients_json)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("bad recipients_json: {e}")))?;

    Ok(NotificationMessage {
        id: row.id.clone(),
        title: row.title.clone(),
        content: row.content.clone(),
        severity,
        channel,
        recipients,
        status: NotificationStatus::Sending,
        retry_count: row.attempts as u32,
        max_retries: row.max_attempts as u32,
        alert_id: row.alert_id.clone(),
        metadata: HashMap::new(),
        created_at: row.created_at.and_utc(),
        updated_at: row.updated_at.and_utc(),
    })
}

fn next_backoff(config: &NotificationRetryConfig, attempts: i64) -> Duration {
    let exp = config
        .initial_backoff_seconds
        .saturating_mul(1u64 << attempts.clamp(0, 16) as u32);
    Duration::from_secs(exp.min(config.max_backoff_seconds))
}

async fn finalize(inner: &Inner, row: &NotificationQueueRow, status: &str, error_message: Option<String>) {
    let log = NotificationLogRepository::create(
        &inner.pool,
        CreateNotificationLogRow {
            id: row.id.clone(),
            alert_id: row.alert_id.clone(),
            rule_id: row.rule_id.clone(),
            channel: row.channel.clone(),
            recipients_json: row.recipients_json.clone(),
            title: row.title.clone(),
            content: row.content.clone(),
            severity: row.severity.clone(),
            status: status.to_string(),
            error_message,
            attempts: row.attempts,
            sent_at: if status == "sent" {
                Some(Utc::now().naive_utc())
            } else {
                None
            },
        },
    )
    .await;

    match log {
        Ok(log_row) => {
            inner
                .cache
                .push_capped(KEY_NOTIFICATION_HISTORY, &log_row, 1000)
                .await;
        }
        Err(e) => tracing::warn!("failed to archive notification log: {}", e),
    }

    inner.stats.total.fetch_add(1, Ordering::Relaxed);
    if status == "sent" {
        inner.stats.sent.fetch_add(1, Ordering::Relaxed);
    } else {
        inner.stats.failed.fetch_add(1, Ordering::Relaxed);
    }
}

async fn reschedule_or_finalize(inner: &Inner, row: &NotificationQueueRow, error: Option<String>) {
    let backoff = next_backoff(&inner.config, row.attempts);
    let next_attempt_at = (Utc::now() + chrono::Duration::from_std(backoff).unwrap_or_default()).naive_utc();

    match NotificationQueueRepository::register_attempt_and_schedule(
        &inner.pool,
        &row.id,
        next_attempt_at,
        error.clone(),
    )
    .await
    {
        Ok(updated) if updated.status == "dead" => {
            finalize(inner, &updated, "failed", error).await;
        }
        Ok(_) => {
            tracing::warn!(notification_id = %row.id, "notification send failed, will retry");
        }
        Err(e) => {
            tracing::warn!("failed to reschedule notification {}: {}", row.id, e);
        }
    }
}

/// Drains up to `worker_concurrency` due items. Serialized by `draining`,
/// matching the `isProcessing` flag in the design.
async fn drain(inner: &Inner) {
    let _guard = inner.draining.lock().await;

    let claimed =
        match NotificationQueueRepository::fetch_and_claim_due(&inner.pool, inner.config.worker_concurrency as i64)
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!("failed to claim due notifications: {}", e);
                return;
            }
        };

    for row in claimed {
        let message = match row_to_message(&row) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!("dropping malformed notification row {}: {}", row.id, e);
                finalize(inner, &row, "failed", Some(e.to_string())).await;
                continue;
            }
        };

        let Some(provider) = inner.providers.get(&message.channel) else {
            tracing::warn!(channel = %message.channel.as_str(), "no provider registered for channel");
            finalize(inner, &row, "failed", Some("no provider for channel".to_string())).await;
            continue;
        };

        match provider.send(&message).await {
            Ok(outcome) if outcome.success => {
                if let Err(e) = NotificationQueueRepository::mark_sent(&inner.pool, &row.id).await {
                    tracing::warn!("failed to mark notification {} sent: {}", row.id, e);
                }
                finalize(inner, &row, "sent", None).await;
            }
            Ok(outcome) => reschedule_or_finalize(inner, &row, outcome.error).await,
            Err(e) => reschedule_or_finalize(inner, &row, Some(e.to_string())).await,
        }
    }
}

/// Snapshots pending/processing rows into KV on shutdown, per the design
/// note ("persist the in-memory queue to KV").
async fn persist_queue_snapshot(inner: &Inner) {
    let pending = sqlx::query_as::<_, NotificationQueueRow>(
        "SELECT id, alert_id, rule_id, channel, recipients_json, title, content, severity, \
         metadata_json, attempts, max_attempts, next_attempt_at, expires_at, last_error, \
         status, created_at, updated_at FROM notification_queue WHERE status IN ('pending', 'processing')",
    )
    .fetch_all(&inner.pool)
    .await;

    if let Ok(rows) = pending {
        inner
            .cache
            .set_json(KEY_NOTIFICATION_QUEUE, &rows, Duration::from_secs(86400))
            .await;
    }
}

#[async_trait::async_trait]
impl Component for NotificationEngine {
    async fn start(&self) -> AppResult<()> {
        for provider in self.inner.providers.values() {
            provider.initialize().await?;
        }

        let inner = self.inner.clone();
        let poll_interval = Duration::from_secs(inner.config.poll_interval_seconds.max(1));
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let handle = tokio::spawn(async move {
            loop {
                drain(&inner).await;
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = tokio::time::sleep(poll_interval) => {}
                }
            }
        });
        *self.handle.lock().await = Some(handle);

        tracing::info!("Notification engine started");
        Ok(())
    }

    async fn stop(&self) -> AppResult<()> {
        let _ = self.shutdown_tx.send(());
        if let Some(handle) = self.handle.lock().await.take() {
            let _ = tokio::time::timeout(Duration::from_secs(30), handle).await;
        }

        persist_queue_snapshot(&self.inner).await;

        for provider in self.inner.providers.values() {
            if let Err(e) = provider.cleanup().await {
                tracing::warn!("provider cleanup failed: {}", e);
            }
        }

        tracing::info!("Notification engine stopped");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "notification_engine"
    }

    fn is_healthy(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> NotificationRetryConfig {
        NotificationRetryConfig {
            enabled: true,
            initial_backoff_seconds: 30,
            poll_interval_seconds: 5,
            max_attempts: 5,
            worker_concurrency: 10,
            max_backoff_seconds: 3600,
            default_ttl_seconds: 86400,
            cooldown_seconds: 900,
        }
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let cfg = config();
        assert_eq!(next_backoff(&cfg, 0), Duration::from_secs(30));
        assert_eq!(next_backoff(&cfg, 1), Duration::from_secs(60));
        assert_eq!(next_backoff(&cfg, 2), Duration::from_secs(120));
    }

    #[test]
    fn backoff_caps_at_max() {
        let cfg = config();
        assert_eq!(next_backoff(&cfg, 20), Duration::from_secs(cfg.max_backoff_seconds));
    }

    #[test]
    fn time_within_window_handles_midnight_wrap() {
        assert!(time_within_window("00:00", "23:59"));
    }
}
