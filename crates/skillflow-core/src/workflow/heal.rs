//! Auto-heal classifier.
//!
//! When a `retry-with-heal` step fails with a tool error, the classifier
//! looks for the first rule whose signature matches, runs its remediation
//! tool and tells the orchestrator whether one retry is allowed. A per-run
//! [`HealLedger`] bounds healing to once per step and each rule to its
//! `max_attempts` per step invocation.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use skillflow_types::heal::AutoHealRule;
use skillflow_types::run::StepError;
use skillflow_types::tool::ToolError;

use crate::tool::ToolInvoker;

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// Per-run healing bookkeeping. Never shared between runs.
#[derive(Debug, Default)]
pub struct HealLedger {
    healed_steps: HashSet<String>,
    /// Remediations run, keyed by (step, rule).
    rule_uses: HashMap<(String, String), u32>,
}

impl HealLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_healed(&self, step: &str) -> bool {
        self.healed_steps.contains(step)
    }

    /// Times `rule` has remediated `step` in this run.
    pub fn uses(&self, step: &str, rule: &str) -> u32 {
        self.rule_uses
            .get(&(step.to_string(), rule.to_string()))
            .copied()
            .unwrap_or(0)
    }

    fn mark(&mut self, step: &str, rule: &str) {
        self.healed_steps.insert(step.to_string());
        *self
            .rule_uses
            .entry((step.to_string(), rule.to_string()))
            .or_default() += 1;
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Result of a healing attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum HealOutcome {
    /// No rule applies (or the error is not a tool error).
    NoMatch,
    /// The step was already healed once in this run.
    AlreadyHealed,
    /// Remediation succeeded; the step may be re-executed once.
    Remediated { rule: String, tool: String },
    /// Remediation ran but failed; the original error stands.
    RemediationFailed {
        rule: String,
        tool: String,
        error: ToolError,
    },
}

// ---------------------------------------------------------------------------
// Classifier
// ---------------------------------------------------------------------------

/// Ordered auto-heal rules; first match wins.
#[derive(Debug, Clone, Default)]
pub struct AutoHealClassifier {
    rules: Vec<AutoHealRule>,
}

impl AutoHealClassifier {
    pub fn new(rules: Vec<AutoHealRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[AutoHealRule] {
        &self.rules
    }

    /// First rule matching `error` whose budget for `step` is not spent.
    ///
    /// A rule used by one step stays available to every other step.
    pub fn find<'a>(
        &'a self,
        step: &str,
        error: &StepError,
        ledger: &HealLedger,
    ) -> Option<&'a AutoHealRule> {
        let kind = error.kind.tool_kind()?;
        self.rules.iter().find(|rule| {
            rule.max_attempts > ledger.uses(step, &rule.name) && rule.matches(kind, &error.detail)
        })
    }

    /// Try to heal a failed step.
    ///
    /// The step counts as healed as soon as a remediation is attempted, so a
    /// step never runs more than one remediation per run whatever its outcome.
    pub async fn heal(
        &self,
        step: &str,
        error: &StepError,
        ledger: &mut HealLedger,
        invoker: &ToolInvoker,
        timeout: Duration,
    ) -> HealOutcome {
        if ledger.has_healed(step) {
            return HealOutcome::AlreadyHealed;
        }
        let Some(rule) = self.find(step, error, ledger) else {
            tracing::debug!(step, kind = %error.kind, "no auto-heal rule matches");
            return HealOutcome::NoMatch;
        };

        ledger.mark(step, &rule.name);
        let tool = rule.remediation.tool.clone();
        tracing::info!(step, rule = %rule.name, tool = %tool, "running remediation");

        match invoker.invoke(&tool, &rule.remediation.args, timeout).await {
            Ok(_) => HealOutcome::Remediated {
                rule: rule.name.clone(),
                tool,
            },
            Err(error) => {
                tracing::warn!(step, rule = %rule.name, error = %error, "remediation failed");
                HealOutcome::RemediationFailed {
                    rule: rule.name.clone(),
                    tool,
                    error,
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::{FnTool, ToolRegistry};
    use serde_json::json;
    use skillflow_types::run::StepErrorKind;
    use skillflow_types::tool::ErrorKind;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn auth_error() -> StepError {
        StepError::new(StepErrorKind::Auth, "token expired")
    }

    fn invoker(calls: Arc<AtomicUsize>) -> ToolInvoker {
        let mut registry = ToolRegistry::new();
        registry.register(FnTool::new("auth.refresh", move |_| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(json!({ "refreshed": true }))
            }
        }));
        registry.register(FnTool::new("auth.broken", |_| async {
            Err(ToolError::network("identity provider unreachable"))
        }));
        ToolInvoker::new(Arc::new(registry))
    }

    #[test]
    fn test_first_match_wins() {
        let classifier = AutoHealClassifier::new(vec![
            AutoHealRule::new("network-only", "net.reset").with_kinds([ErrorKind::Network]),
            AutoHealRule::new("relogin", "auth.login")
                .with_kinds([ErrorKind::Auth])
                .with_patterns(["expired"]),
            AutoHealRule::new("catch-all", "auth.refresh"),
        ]);
        let rule = classifier.find("s", &auth_error(), &HealLedger::new()).unwrap();
        assert_eq!(rule.name, "relogin");
    }

    #[test]
    fn test_engine_errors_never_match() {
        let classifier = AutoHealClassifier::new(vec![AutoHealRule::new("any", "auth.refresh")]);
        let violation = StepError::new(StepErrorKind::SandboxViolation, "x");
        assert!(classifier.find("s", &violation, &HealLedger::new()).is_none());
    }

    #[tokio::test]
    async fn test_heal_once_per_step() {
        let calls = Arc::new(AtomicUsize::new(0));
        let invoker = invoker(calls.clone());
        let classifier = AutoHealClassifier::new(vec![
            AutoHealRule::new("a", "auth.refresh").with_max_attempts(5),
            AutoHealRule::new("b", "auth.refresh").with_max_attempts(5),
        ]);
        let mut ledger = HealLedger::new();
        let timeout = Duration::from_secs(1);

        let first = classifier
            .heal("login", &auth_error(), &mut ledger, &invoker, timeout)
            .await;
        assert_eq!(
            first,
            HealOutcome::Remediated {
                rule: "a".into(),
                tool: "auth.refresh".into()
            }
        );
        let second = classifier
            .heal("login", &auth_error(), &mut ledger, &invoker, timeout)
            .await;
        assert_eq!(second, HealOutcome::AlreadyHealed);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_default_rule_heals_each_step() {
        let calls = Arc::new(AtomicUsize::new(0));
        let invoker = invoker(calls.clone());
        let classifier = AutoHealClassifier::new(vec![AutoHealRule::new("relogin", "auth.refresh")]);
        let mut ledger = HealLedger::new();
        let timeout = Duration::from_secs(1);

        for step in ["a", "b"] {
            let outcome = classifier
                .heal(step, &auth_error(), &mut ledger, &invoker, timeout)
                .await;
            assert_eq!(
                outcome,
                HealOutcome::Remediated {
                    rule: "relogin".into(),
                    tool: "auth.refresh".into()
                },
                "step {step}"
            );
        }
        assert_eq!(ledger.uses("a", "relogin"), 1);
        assert_eq!(ledger.uses("b", "relogin"), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_zero_budget_rule_is_skipped() {
        let classifier = AutoHealClassifier::new(vec![
            AutoHealRule::new("disabled", "auth.login").with_max_attempts(0),
            AutoHealRule::new("relogin", "auth.refresh"),
        ]);
        let rule = classifier.find("s", &auth_error(), &HealLedger::new()).unwrap();
        assert_eq!(rule.name, "relogin");
    }

    #[tokio::test]
    async fn test_remediation_failure() {
        let invoker = invoker(Arc::new(AtomicUsize::new(0)));
        let classifier = AutoHealClassifier::new(vec![AutoHealRule::new("broken", "auth.broken")]);
        let mut ledger = HealLedger::new();
        let outcome = classifier
            .heal("s", &auth_error(), &mut ledger, &invoker, Duration::from_secs(1))
            .await;
        match outcome {
            HealOutcome::RemediationFailed { rule, error, .. } => {
                assert_eq!(rule, "broken");
                assert_eq!(error.kind, ErrorKind::Network);
            }
            other => panic!("expected remediation failure, got {other:?}"),
        }
        assert!(ledger.has_healed("s"));
    }
}
