//! Safety Filter (C5, §4.4) — regex-based PII/secret scanning applied to
//! every memory before it is persisted. Each detector is a pure `scan`
//! function; the filter composes the configured detectors and applies the
//! configured action per finding kind.

mod detectors;

use serde::{Deserialize, Serialize};

use crate::types::SafetyFinding;

pub use detectors::Finding;

/// What to do when a detector fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SafetyAction {
    Block,
    Redact,
    Warn,
}

#[derive(Debug, Clone)]
pub struct SafetyRule {
    pub kind: &'static str,
    pub action: SafetyAction,
}

#[derive(Debug, Clone)]
pub struct SafetyConfig {
    pub enabled: bool,
    pub max_chars: usize,
    pub rules: Vec<SafetyRule>,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        SafetyConfig {
            enabled: true,
            max_chars: 2000,
            rules: vec![
                SafetyRule { kind: "email", action: SafetyAction::Redact },
                SafetyRule { kind: "phone", action: SafetyAction::Redact },
                SafetyRule { kind: "national_id", action: SafetyAction::Block },
                SafetyRule { kind: "credit_card", action: SafetyAction::Block },
                SafetyRule { kind: "ip_address", action: SafetyAction::Warn },
                SafetyRule { kind: "api_key", action: SafetyAction::Block },
            ],
        }
    }
}

impl SafetyConfig {
    /// Build the effective rule set from the default action per kind,
    /// overridden by whatever `overrides` (typically sourced from
    /// `safety.rules.*` in config) names explicitly.
    pub fn with_overrides(
        enabled: bool,
        max_chars: usize,
        overrides: Option<&std::collections::HashMap<String, SafetyAction>>,
    ) -> Self {
        let mut config = SafetyConfig { enabled, max_chars, ..SafetyConfig::default() };
        if let Some(overrides) = overrides {
            for rule in &mut config.rules {
                if let Some(action) = overrides.get(rule.kind) {
                    rule.action = *action;
                }
            }
        }
        config
    }
}

/// Outcome of running the filter over one piece of content.
#[derive(Clone)]
pub enum SafetyOutcome {
    /// Content may be persisted unmodified.
    Allow,
    /// Content may be persisted after substituting `sanitized_content`.
    Redacted {
        sanitized_content: String,
        findings: Vec<SafetyFinding>,
    },
    /// Content must not be persisted at all.
    Blocked { findings: Vec<SafetyFinding> },
}

pub struct SafetyFilter {
    config: SafetyConfig,
}

impl SafetyFilter {
    pub fn new(config: SafetyConfig) -> Self {
        SafetyFilter { config }
    }

    pub fn check(&self, content: &str) -> SafetyOutcome {
        if !self.config.enabled {
            return SafetyOutcome::Allow;
        }
        if content.len() > self.config.max_chars {
            return SafetyOutcome::Blocked {
                findings: vec![SafetyFinding {
                    kind: "length_cap".to_string(),
                    span: (0, content.len()),
                }],
            };
        }

        let mut findings: Vec<Finding> = Vec::new();
        for rule in &self.config.rules {
            findings.extend(detectors::scan_kind(rule.kind, content));
        }

        let blocking_kinds: Vec<&str> = self
            .config
            .rules
            .iter()
            .filter(|r| r.action == SafetyAction::Block)
            .map(|r| r.kind)
            .collect();
        if findings.iter().any(|f| blocking_kinds.contains(&f.kind.as_str())) {
            return SafetyOutcome::Blocked {
                findings: findings.into_iter().map(Into::into).collect(),
            };
        }

        let redact_kinds: Vec<&str> = self
            .config
            .rules
            .iter()
            .filter(|r| r.action == SafetyAction::Redact)
            .map(|r| r.kind)
            .collect();
        if findings.iter().any(|f| redact_kinds.contains(&f.kind.as_str())) {
            let sanitized = redact(content, &findings, &redact_kinds);
            return SafetyOutcome::Redacted {
                sanitized_content: sanitized,
                findings: findings.into_iter().map(Into::into).collect(),
            };
        }

        if findings.is_empty() {
            SafetyOutcome::Allow
        } else {
            // Only "warn" kinds fired: content passes through unmodified, findings surface as advisory.
            SafetyOutcome::Redacted {
                sanitized_content: content.to_string(),
                findings: findings.into_iter().map(Into::into).collect(),
            }
        }
    }
}

fn redact(content: &str, findings: &[Finding], redact_kinds: &[&str]) -> String {
    let mut spans: Vec<(usize, usize)> = findings
        .iter()
        .filter(|f| redact_kinds.contains(&f.kind.as_str()))
        .map(|f| f.span)
        .collect();
    spans.sort_by_key(|s| s.0);

    let mut out = String::with_capacity(content.len());
    let mut cursor = 0;
    for (start, end) in spans {
        if start < cursor {
            continue; // overlapping match, already covered
        }
        out.push_str(&content[cursor..start]);
        out.push_str("[REDACTED]");
        cursor = end;
    }
    out.push_str(&content[cursor..]);
    out
}

impl From<Finding> for SafetyFinding {
    fn from(f: Finding) -> Self {
        SafetyFinding { kind: f.kind, span: f.span }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_clean_content() {
        let filter = SafetyFilter::new(SafetyConfig::default());
        assert!(matches!(filter.check("the cat sat on the mat"), SafetyOutcome::Allow));
    }

    #[test]
    fn redacts_email() {
        let filter = SafetyFilter::new(SafetyConfig::default());
        match filter.check("contact me at alex@example.com please") {
            SafetyOutcome::Redacted { sanitized_content, findings } => {
                assert!(sanitized_content.contains("[REDACTED]"));
                assert!(!sanitized_content.contains("alex@example.com"));
                assert_eq!(findings[0].kind, "email");
            }
            other => panic!("expected Redacted, got {other:?}"),
        }
    }

    #[test]
    fn blocks_credit_card() {
        let filter = SafetyFilter::new(SafetyConfig::default());
        let outcome = filter.check("card number 4111 1111 1111 1111 on file");
        assert!(matches!(outcome, SafetyOutcome::Blocked { .. }));
    }

    #[test]
    fn blocks_over_length_cap() {
        let mut config = SafetyConfig::default();
        config.max_chars = 5;
        let filter = SafetyFilter::new(config);
        assert!(matches!(filter.check("too long for the cap"), SafetyOutcome::Blocked { .. }));
    }

    #[test]
    fn with_overrides_changes_only_the_named_kind() {
        let mut overrides = std::collections::HashMap::new();
        overrides.insert("ip_address".to_string(), SafetyAction::Block);
        let config = SafetyConfig::with_overrides(true, 2000, Some(&overrides));

        let ip_rule = config.rules.iter().find(|r| r.kind == "ip_address").unwrap();
        assert_eq!(ip_rule.action, SafetyAction::Block);
        let email_rule = config.rules.iter().find(|r| r.kind == "email").unwrap();
        assert_eq!(email_rule.action, SafetyAction::Redact);
    }
}

impl std::fmt::Debug for SafetyOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SafetyOutcome::Allow => write!(f, "Allow"),
            SafetyOutcome::Redacted { findings, .. } => write!(f, "Redacted({} findings)", findings.len()),
            SafetyOutcome::Blocked { findings } => write!(f, "Blocked({} findings)", findings.len()),
        }
    }
}
