//! In-memory alert store and threshold engine (spec §4.9). `resolved` only
//! ever flips `false -> true` (spec §8 invariant); auto-resolution on
//! return-to-threshold is a known gap, not implemented (spec §9 item 4).

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::messages::{Alert, AlertSeverity, AlertType};

pub struct Thresholds {
    pub warn: f64,
    pub crit: f64,
}

/// Fixed thresholds from spec §4.9. Not operator-configurable: the spec
/// states these as constants, not environment-tunable knobs.
pub const CPU_THRESHOLDS: Thresholds = Thresholds { warn: 70.0, crit: 90.0 };
pub const MEMORY_THRESHOLDS: Thresholds = Thresholds { warn: 80.0, crit: 95.0 };
pub const DISK_THRESHOLDS: Thresholds = Thresholds { warn: 85.0, crit: 95.0 };
pub const TASK_FAILURE_RATE_THRESHOLDS: Thresholds = Thresholds { warn: 10.0, crit: 25.0 };
pub const QUEUE_SIZE_THRESHOLDS: Thresholds = Thresholds { warn: 1000.0, crit: 5000.0 };

impl Thresholds {
    pub fn severity_for(&self, value: f64) -> Option<AlertSeverity> {
        if value >= self.crit {
            Some(AlertSeverity::Critical)
        } else if value >= self.warn {
            Some(AlertSeverity::Warning)
        } else {
            None
        }
    }
}

pub struct AlertStore {
    alerts: RwLock<Vec<Alert>>,
}

impl AlertStore {
    pub fn new() -> Self {
        Self {
            alerts: RwLock::new(Vec::new()),
        }
    }

    /// Evaluate one metric sample against its threshold, raising a new alert
    /// only if no unresolved alert of the same type is already active (a
    /// crossing that stays above threshold across samples does not spam a
    /// fresh alert every tick).
    pub async fn evaluate(
        &self,
        alert_type: AlertType,
        value: f64,
        thresholds: &Thresholds,
    ) -> Option<Alert> {
        let Some(severity) = thresholds.severity_for(value) else {
            return None;
        };

        let threshold = match severity {
            AlertSeverity::Critical => thresholds.crit,
            AlertSeverity::Warning => thresholds.warn,
        };

        let mut alerts = self.alerts.write().await;
        let already_active = alerts
            .iter()
            .any(|a| a.alert_type == alert_type && !a.resolved);
        if already_active {
            return None;
        }

        let alert = Alert {
            id: Uuid::new_v4().to_string(),
            alert_type,
            severity,
            value,
            threshold,
            timestamp: chrono::Utc::now(),
            resolved: false,
        };
        tracing::warn!(
            "alert raised: type={} severity={} value={:.2} threshold={:.2}",
            alert_type.as_str(),
            severity.as_str(),
            value,
            threshold
        );
        alerts.push(alert.clone());
        Some(alert)
    }

    pub async fn list_active(&self) -> Vec<Alert> {
        self.alerts
            .read()
            .await
            .iter()
            .filter(|a| !a.resolved)
            .cloned()
            .collect()
    }

    pub async fn list_all(&self) -> Vec<Alert> {
        self.alerts.read().await.clone()
    }

    /// Manual resolution only (spec §4.9: "Clearing is manual"). Returns
    /// `false` if no matching unresolved alert exists.
    pub async fn resolve(&self, id: &str) -> bool {
        let mut alerts = self.alerts.write().await;
        match alerts.iter_mut().find(|a| a.id == id) {
            Some(alert) if !alert.resolved => {
                alert.resolved = true;
                true
            }
            _ => false,
        }
    }
}

impl Default for AlertStore {
    fn default() -> Self {
        Self::new()
    }
}
