//! Notification templates (spec §4.10 step 3): placeholder substitution
//! over a small fixed set of alert fields, with a `(channel, severity)`
//! fallback when no template id matches.

use crate::messages::{Alert, NotificationChannel, NotificationSeverity};

#[derive(Debug, Clone)]
pub struct Template {
    pub id: String,
    pub channel: NotificationChannel,
    pub severity: NotificationSeverity,
    pub title: String,
    pub body: String,
}

pub struct TemplateStore {
    templates: Vec<Template>,
}

impl TemplateStore {
    /// Built-in templates, one pair (subject-ish + body) per channel per
    /// severity. Operators needing custom copy can still address a template
    /// by id; this set exists so every `(channel, severity)` has a fallback.
    pub fn with_defaults() -> Self {
        let mut templates = Vec::new();
        for channel in [NotificationChannel::Email, NotificationChannel::Webhook] {
            for severity in [
                NotificationSeverity::Info,
                NotificationSeverity::Warning,
                NotificationSeverity::Error,
                NotificationSeverity::Critical,
            ] {
                templates.push(Template {
                    id: format!("default_{}_{}", channel.as_str(), severity_label(severity)),
                    channel,
                    severity,
                    title: "[{{severity}}] {{alertType}} alert".to_string(),
                    body: "Alert {{alertId}} ({{alertType}}, {{severity}}): {{message}}. \
                           value={{value}} threshold={{threshold}} at {{timestamp}}"
                        .to_string(),
                });
            }
        }
        Self { templates }
    }

    pub fn find(&self, template_id: &str) -> Option<&Template> {
        self.templates.iter().find(|t| t.id == template_id)
    }

    pub fn find_fallback(
        &self,
        channel: NotificationChannel,
        severity: NotificationSeverity,
    ) -> Option<&Template> {
        self.templates
            .iter()
            .find(|t| t.channel == channel && t.severity == severity)
    }
}

fn severity_label(severity: NotificationSeverity) -> &'static str {
    match severity {
        NotificationSeverity::Info => "info",
        NotificationSeverity::Warning => "warning",
        NotificationSeverity::Error => "error",
        NotificationSeverity::Critical => "critical",
    }
}

fn alert_message(alert: &Alert) -> String {
    format!(
        "{} usage/rate is {:.2}, threshold {:.2}",
        alert.alert_type.as_str(),
        alert.value,
        alert.threshold
    )
}

/// Substitutes `{{alertId}}, {{alertType}}, {{severity}}, {{message}}, {{value}}, {{threshold}}, {{timestamp}}`.
pub fn render(template: &str, alert: &Alert, severity: NotificationSeverity) -> String {
    template
        .replace("{{alertId}}", &alert.id)
        .replace("{{alertType}}", alert.alert_type.as_str())
        .replace("{{severity}}", severity_label(severity))
        .replace("{{message}}", &alert_message(alert))
        .replace("{{value}}", &format!("{:.2}", alert.value))
        .replace("{{threshold}}", &format!("{:.2}", alert.threshold))
        .replace("{{timestamp}}", &alert.timestamp.to_rfc3339())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::AlertType;

    fn sample_alert() -> Alert {
        Alert {
            id: "alert-1".to_string(),
            alert_type: AlertType::Cpu,
            severity: crate::messages::AlertSeverity::Critical,
            value: 95.5,
            threshold: 90.0,
            timestamp: chrono::Utc::now(),
            resolved: false,
        }
    }

    #[test]
    fn render_substitutes_all_placeholders() {
        let alert = sample_alert();
        let rendered = render(
            "{{alertId}} {{alertType}} {{severity}} {{value}} {{threshold}}",
            &alert,
            NotificationSeverity::Critical,
        );
        assert!(rendered.contains("alert-1"));
        assert!(rendered.contains("cpu"));
        assert!(rendered.contains("critical"));
        assert!(rendered.contains("95.50"));
        assert!(rendered.contains("90.00"));
    }

    #[test]
    fn fallback_resolves_by_channel_and_severity() {
        let store = TemplateStore::with_defaults();
        let found = store.find_fallback(NotificationChannel::Email, NotificationSeverity::Warning);
        assert!(found.is_some());
    }
}
