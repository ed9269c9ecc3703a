//! Picks the message template for an alert batch by looking for keywords in
//! the first alert.

use crate::alert::Alert;

/// keywords marking tls certificate alerts. includes the chinese words for
/// "certificate" and "expired"
const CERTIFICATE_KEYWORDS: &[&str] = &["tls", "证书", "ssl", "certificate", "过期", "expiry", "expir"];

/// keywords marking unavailable services. includes the chinese words for
/// "outage" and "failure"
const DOWN_KEYWORDS: &[&str] = &["down", "宕机", "unreachable", "unavailable", "故障", "failed"];

/// Templates known to the renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemplateId {
    Default,
    CertificateExpiry,
    ServiceDown,
}

impl TemplateId {
    pub const ALL: [TemplateId; 3] = [
        TemplateId::Default,
        TemplateId::CertificateExpiry,
        TemplateId::ServiceDown,
    ];

    /// name of the template in the template store
    pub fn name(&self) -> &'static str {
        match self {
            TemplateId::Default => "alert_template",
            TemplateId::CertificateExpiry => "certificate_expiry_template",
            TemplateId::ServiceDown => "service_down_template",
        }
    }
}

impl std::fmt::Display for TemplateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Selects the template for a batch.
///
/// Only the first alert is inspected, mixed batches are rendered with the
/// template matching their first alert. Certificate keywords win over down
/// keywords.
pub fn select_template(alerts: &[Alert]) -> TemplateId {
    let Some(first) = alerts.first() else {
        return TemplateId::Default;
    };

    let fields = [
        first.label("alertname").to_lowercase(),
        first.annotation("summary").to_lowercase(),
        first.annotation("description").to_lowercase(),
    ];

    let matches = |keywords: &[&str]| {
        keywords
            .iter()
            .any(|keyword| fields.iter().any(|field| field.contains(*keyword)))
    };

    if matches(CERTIFICATE_KEYWORDS) {
        TemplateId::CertificateExpiry
    } else if matches(DOWN_KEYWORDS) {
        TemplateId::ServiceDown
    } else {
        TemplateId::Default
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn alert(labels: &[(&str, &str)], annotations: &[(&str, &str)]) -> Alert {
        let to_map = |pairs: &[(&str, &str)]| {
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<_, _>>()
        };

        Alert {
            labels: to_map(labels),
            annotations: to_map(annotations),
            ..Default::default()
        }
    }

    #[test]
    fn empty_batch_uses_default() {
        assert_eq!(select_template(&[]), TemplateId::Default);
    }

    #[test]
    fn certificate_alertname() {
        let alerts = [alert(&[("alertname", "SSL Certificate Expiry")], &[])];

        assert_eq!(select_template(&alerts), TemplateId::CertificateExpiry);
    }

    #[test]
    fn certificate_wins_over_down() {
        let alerts = [alert(
            &[("alertname", "SSL Certificate Expiry")],
            &[("summary", "service is down")],
        )];

        assert_eq!(select_template(&alerts), TemplateId::CertificateExpiry);
    }

    #[test]
    fn down_summary() {
        let alerts = [alert(&[("alertname", "Probe")], &[("summary", "service is down")])];

        assert_eq!(select_template(&alerts), TemplateId::ServiceDown);
    }

    #[test]
    fn matching_is_case_insensitive() {
        let alerts = [alert(&[], &[("description", "Backend UNREACHABLE since 5m")])];

        assert_eq!(select_template(&alerts), TemplateId::ServiceDown);
    }

    #[test]
    fn chinese_keywords() {
        let cert = [alert(&[], &[("summary", "证书即将过期")])];
        let down = [alert(&[], &[("summary", "数据库宕机")])];

        assert_eq!(select_template(&cert), TemplateId::CertificateExpiry);
        assert_eq!(select_template(&down), TemplateId::ServiceDown);
    }

    #[test]
    fn unrelated_content_uses_default() {
        let alerts = [alert(&[("alertname", "HighCPU")], &[("summary", "cpu above 90%")])];

        assert_eq!(select_template(&alerts), TemplateId::Default);
    }

    #[test]
    fn other_labels_are_ignored() {
        let alerts = [alert(&[("alertname", "HighCPU"), ("job", "ssl-exporter")], &[])];

        assert_eq!(select_template(&alerts), TemplateId::Default);
    }

    #[test]
    fn only_first_alert_is_inspected() {
        let alerts = [
            alert(&[("alertname", "HighCPU")], &[]),
            alert(&[("alertname", "NodeDown")], &[]),
        ];

        assert_eq!(select_template(&alerts), TemplateId::Default);
    }
}
