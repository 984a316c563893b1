// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! CASIL policy snapshot (spec §3 "Policy snapshot (CASIL)").

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::classifier::{Flag, Kind, RiskLevel};

pub const DEFAULT_MAX_POLICIES: usize = 50;
pub const DEFAULT_MAX_PATTERNS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CasilMode {
    Monitor,
    Enforce,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultDecision {
    Allow,
    Block,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OversizeBehavior {
    Block,
    Allow,
    AllowAndTag,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleAction {
    Allow,
    Redact,
    Block,
}

/// A single CASIL policy rule. Rules are matched in declared order; the
/// first terminal match wins (§4.3 step 4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    #[serde(default)]
    pub match_kind: Option<Kind>,
    #[serde(default)]
    pub match_risk_at_least: Option<RiskLevel>,
    #[serde(default)]
    pub match_flag: Option<Flag>,
    pub action: RuleAction,
    pub reason_code: String,
    #[serde(default)]
    pub redact_fields: Vec<String>,
    #[serde(default)]
    pub redact_patterns: Vec<String>,
}

impl Rule {
    fn matches(&self, classification: &super::classifier::Classification) -> bool {
        if let Some(kind) = self.match_kind {
            if classification.kind != kind {
                return false;
            }
        }
        if let Some(min_risk) = self.match_risk_at_least {
            if classification.risk_level.rank() < min_risk.rank() {
                return false;
            }
        }
        if let Some(flag) = self.match_flag {
            if !classification.flags.contains(&flag) {
                return false;
            }
        }
        true
    }

    pub fn first_match<'a>(
        rules: &'a [Rule],
        classification: &super::classifier::Classification,
    ) -> Option<&'a Rule> {
        rules.iter().find(|r| r.matches(classification))
    }
}

/// An immutable, atomically-installed CASIL configuration (spec §3).
#[derive(Debug, Clone)]
pub struct PolicySnapshot {
    pub enabled: bool,
    pub mode: CasilMode,
    pub default_decision: DefaultDecision,
    pub scope_include: Vec<glob_lite::Pattern>,
    pub scope_exclude: Vec<glob_lite::Pattern>,
    pub max_inspect_bytes: usize,
    pub oversize_behavior: OversizeBehavior,
    pub policies: Vec<Rule>,
    /// Precompiled redaction regexes, keyed by pattern id.
    pub redaction_patterns: Vec<(String, Regex)>,
    pub metadata_exposure_flags: MetadataExposure,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MetadataExposure {
    pub expose_metadata_to_clients: bool,
    pub persist_metadata_in_history: bool,
}

/// Errors raised compiling/installing a new snapshot (§4.3 D2, §4.6
/// `op.casil.reload`).
#[derive(Debug, Clone)]
pub enum SnapshotError {
    TooManyPolicies { limit: usize, actual: usize },
    TooManyPatterns { limit: usize, actual: usize },
    BadPattern { pattern: String, reason: String },
}

impl std::fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TooManyPolicies { limit, actual } => {
                write!(f, "policy count {actual} exceeds max_policies {limit}")
            }
            Self::TooManyPatterns { limit, actual } => {
                write!(f, "pattern count {actual} exceeds max_patterns {limit}")
            }
            Self::BadPattern { pattern, reason } => {
                write!(f, "pattern `{pattern}` rejected: {reason}")
            }
        }
    }
}

/// Raw, serializable snapshot definition as accepted by `op.casil.reload`.
#[derive(Debug, Clone, Deserialize)]
pub struct PolicySnapshotSpec {
    pub enabled: bool,
    pub mode: CasilMode,
    pub default_decision: DefaultDecision,
    #[serde(default)]
    pub scope_include: Vec<String>,
    #[serde(default)]
    pub scope_exclude: Vec<String>,
    pub max_inspect_bytes: usize,
    pub oversize_behavior: OversizeBehavior,
    #[serde(default)]
    pub policies: Vec<Rule>,
    #[serde(default)]
    pub redaction_patterns: Vec<(String, String)>,
    #[serde(default)]
    pub expose_metadata_to_clients: bool,
    #[serde(default)]
    pub persist_metadata_in_history: bool,
}

impl PolicySnapshotSpec {
    /// Build the spec to compile at startup from env-configured CASIL fields
    /// (spec §4.9 preflight, §9 "global mutable state" — the compiled result
    /// is what `GatewayState::new` installs, not a hardcoded default).
    pub fn from_config(config: &crate::config::CasilConfig) -> Self {
        let default_decision = match config.default_decision.as_str() {
            "allow" => DefaultDecision::Allow,
            _ => DefaultDecision::Block,
        };
        let mode = match config.mode.as_str() {
            "monitor" => CasilMode::Monitor,
            _ => CasilMode::Enforce,
        };
        let policies = if config.block_on_probable_secret {
            vec![Rule {
                id: "block-probable-secret".to_owned(),
                match_kind: None,
                match_risk_at_least: None,
                match_flag: Some(Flag::ContainsProbableSecret),
                action: RuleAction::Block,
                reason_code: "CASIL_POLICY_BLOCKED_SECRET".to_owned(),
                redact_fields: vec![],
                redact_patterns: vec![],
            }]
        } else {
            vec![]
        };
        Self {
            enabled: config.enabled,
            mode,
            default_decision,
            scope_include: config.scope_include.split(',').map(str::to_owned).collect(),
            scope_exclude: config
                .scope_exclude
                .split(',')
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .collect(),
            max_inspect_bytes: config.max_inspect_bytes,
            oversize_behavior: OversizeBehavior::Block,
            policies,
            redaction_patterns: vec![],
            expose_metadata_to_clients: false,
            persist_metadata_in_history: true,
        }
    }
}

impl PolicySnapshot {
    /// Compile and validate a snapshot spec (D2: rejects catastrophic
    /// patterns and over-limit policy/pattern counts at install time).
    pub fn compile(spec: PolicySnapshotSpec) -> Result<Self, SnapshotError> {
        if spec.policies.len() > DEFAULT_MAX_POLICIES {
            return Err(SnapshotError::TooManyPolicies {
                limit: DEFAULT_MAX_POLICIES,
                actual: spec.policies.len(),
            });
        }
        if spec.redaction_patterns.len() > DEFAULT_MAX_PATTERNS {
            return Err(SnapshotError::TooManyPatterns {
                limit: DEFAULT_MAX_PATTERNS,
                actual: spec.redaction_patterns.len(),
            });
        }

        let scope_include = compile_globs(&spec.scope_include)?;
        let scope_exclude = compile_globs(&spec.scope_exclude)?;

        let mut redaction_patterns = Vec::with_capacity(spec.redaction_patterns.len());
        for (id, pattern) in &spec.redaction_patterns {
            reject_catastrophic(pattern)?;
            let re = Regex::new(pattern)
                .map_err(|e| SnapshotError::BadPattern { pattern: pattern.clone(), reason: e.to_string() })?;
            redaction_patterns.push((id.clone(), re));
        }

        Ok(Self {
            enabled: spec.enabled,
            mode: spec.mode,
            default_decision: spec.default_decision,
            scope_include,
            scope_exclude,
            max_inspect_bytes: spec.max_inspect_bytes,
            oversize_behavior: spec.oversize_behavior,
            policies: spec.policies,
            redaction_patterns,
            metadata_exposure_flags: MetadataExposure {
                expose_metadata_to_clients: spec.expose_metadata_to_clients,
                persist_metadata_in_history: spec.persist_metadata_in_history,
            },
        })
    }

    /// The conservative default snapshot used before any `op.casil.reload`.
    #[allow(clippy::expect_used)]
    pub fn default_enforcing() -> Self {
        Self::compile(PolicySnapshotSpec {
            enabled: true,
            mode: CasilMode::Enforce,
            default_decision: DefaultDecision::Block,
            scope_include: vec!["*".to_owned()],
            scope_exclude: vec![],
            max_inspect_bytes: 65_536,
            oversize_behavior: OversizeBehavior::Block,
            policies: vec![Rule {
                id: "block-probable-secret".to_owned(),
                match_kind: None,
                match_risk_at_least: None,
                match_flag: Some(Flag::ContainsProbableSecret),
                action: RuleAction::Block,
                reason_code: "CASIL_POLICY_BLOCKED_SECRET".to_owned(),
                redact_fields: vec![],
                redact_patterns: vec![],
            }],
            redaction_patterns: vec![],
            expose_metadata_to_clients: false,
            persist_metadata_in_history: true,
        })
        .expect("default snapshot must compile")
    }

    pub fn in_scope(&self, room: &str, channel: &str) -> bool {
        let target = format!("{room}:{channel}");
        let included = self.scope_include.iter().any(|p| p.matches(&target));
        let excluded = self.scope_exclude.iter().any(|p| p.matches(&target));
        included && !excluded
    }
}

fn compile_globs(patterns: &[String]) -> Result<Vec<glob_lite::Pattern>, SnapshotError> {
    patterns
        .iter()
        .map(|p| {
            glob_lite::Pattern::new(p)
                .map_err(|e| SnapshotError::BadPattern { pattern: p.clone(), reason: e })
        })
        .collect()
}

/// Reject patterns with obvious catastrophic-backtracking shapes (nested
/// quantifiers) before compilation, per D2.
#[allow(clippy::unwrap_used)]
fn reject_catastrophic(pattern: &str) -> Result<(), SnapshotError> {
    let nested_quantifier = Regex::new(r"\([^)]*[+*]\)[+*]").unwrap();
    if nested_quantifier.is_match(pattern) {
        return Err(SnapshotError::BadPattern {
            pattern: pattern.to_owned(),
            reason: "nested quantifier rejected as catastrophic-backtracking risk".to_owned(),
        });
    }
    Ok(())
}

/// A tiny glob matcher supporting only `*` as "match anything", sufficient
/// for `room:channel` scope matching without pulling in a dedicated crate.
pub mod glob_lite {
    #[derive(Debug, Clone)]
    pub struct Pattern {
        segments: Vec<String>,
        raw: String,
    }

    impl Pattern {
        pub fn new(pattern: &str) -> Result<Self, String> {
            if pattern.is_empty() {
                return Err("empty pattern".to_owned());
            }
            Ok(Self {
                segments: pattern.split('*').map(|s| s.to_owned()).collect(),
                raw: pattern.to_owned(),
            })
        }

        pub fn matches(&self, input: &str) -> bool {
            if self.raw == "*" {
                return true;
            }
            if !self.raw.contains('*') {
                return self.raw == input;
            }
            let mut rest = input;
            for (i, seg) in self.segments.iter().enumerate() {
                if seg.is_empty() {
                    continue;
                }
                if i == 0 {
                    if !rest.starts_with(seg.as_str()) {
                        return false;
                    }
                    rest = &rest[seg.len()..];
                } else if let Some(pos) = rest.find(seg.as_str()) {
                    rest = &rest[pos + seg.len()..];
                } else {
                    return false;
                }
            }
            if let Some(last) = self.segments.last() {
                if !last.is_empty() {
                    return rest.ends_with(last.as_str());
                }
            }
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CasilConfig;

    fn base_casil_config() -> CasilConfig {
        CasilConfig {
            enabled: true,
            mode: "enforce".into(),
            scope_include: "*".into(),
            scope_exclude: "".into(),
            max_inspect_bytes: 65_536,
            block_on_probable_secret: true,
            redaction_patterns: "".into(),
            default_decision: "block".into(),
        }
    }

    #[test]
    fn from_config_includes_secret_rule_when_enabled() {
        let spec = PolicySnapshotSpec::from_config(&base_casil_config());
        assert!(spec.policies.iter().any(|r| r.id == "block-probable-secret"));
    }

    #[test]
    fn from_config_omits_secret_rule_when_disabled() {
        let mut config = base_casil_config();
        config.block_on_probable_secret = false;
        let spec = PolicySnapshotSpec::from_config(&config);
        assert!(spec.policies.is_empty());
    }

    #[test]
    fn from_config_compiles() {
        let spec = PolicySnapshotSpec::from_config(&base_casil_config());
        PolicySnapshot::compile(spec).unwrap();
    }

    #[test]
    fn glob_star_matches_all() {
        let p = glob_lite::Pattern::new("*").unwrap();
        assert!(p.matches("anything:here"));
    }

    #[test]
    fn glob_prefix_match() {
        let p = glob_lite::Pattern::new("secure-*").unwrap();
        assert!(p.matches("secure-vault:ops"));
        assert!(!p.matches("public:ops"));
    }

    #[test]
    fn rejects_too_many_policies() {
        let mut policies = vec![];
        for i in 0..(DEFAULT_MAX_POLICIES + 1) {
            policies.push(Rule {
                id: format!("r{i}"),
                match_kind: None,
                match_risk_at_least: None,
                match_flag: None,
                action: RuleAction::Allow,
                reason_code: "ok".to_owned(),
                redact_fields: vec![],
                redact_patterns: vec![],
            });
        }
        let spec = PolicySnapshotSpec {
            enabled: true,
            mode: CasilMode::Enforce,
            default_decision: DefaultDecision::Block,
            scope_include: vec!["*".to_owned()],
            scope_exclude: vec![],
            max_inspect_bytes: 1024,
            oversize_behavior: OversizeBehavior::Block,
            policies,
            redaction_patterns: vec![],
            expose_metadata_to_clients: false,
            persist_metadata_in_history: true,
        };
        let err = PolicySnapshot::compile(spec).unwrap_err();
        assert!(matches!(err, SnapshotError::TooManyPolicies { .. }));
    }

    #[test]
    fn rejects_catastrophic_pattern_at_install() {
        let spec = PolicySnapshotSpec {
            enabled: true,
            mode: CasilMode::Enforce,
            default_decision: DefaultDecision::Block,
            scope_include: vec!["*".to_owned()],
            scope_exclude: vec![],
            max_inspect_bytes: 1024,
            oversize_behavior: OversizeBehavior::Block,
            policies: vec![],
            redaction_patterns: vec![("bad".to_owned(), "(a+)+".to_owned())],
            expose_metadata_to_clients: false,
            persist_metadata_in_history: true,
        };
        let err = PolicySnapshot::compile(spec).unwrap_err();
        assert!(matches!(err, SnapshotError::BadPattern { .. }));
    }
}
