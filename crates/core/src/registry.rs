//! The registry: fixed tables every component reads, built once at startup.
//!
//! Nothing here is global. The binary builds a [`Registry`] from
//! configuration and hands `&Registry` (or an `Arc`) to each component.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Explicit version-compatibility policy.
///
/// `canonical` lists the known canonical version strings from oldest to most
/// current. `aliases` maps loose variants (after folding) to a canonical
/// string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionPolicy {
    /// The entity field that carries the version identifier.
    pub field: String,
    pub canonical: Vec<String>,
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,
}

impl VersionPolicy {
    fn fold(raw: &str) -> String {
        let folded: String = raw
            .chars()
            .filter(|c| !c.is_whitespace())
            .flat_map(char::to_lowercase)
            .collect();
        folded.strip_prefix('v').map(str::to_string).unwrap_or(folded)
    }

    /// Resolve a raw version string to its canonical form, if known.
    pub fn normalize(&self, raw: &str) -> Option<String> {
        let folded = Self::fold(raw);
        if let Some(c) = self.canonical.iter().find(|c| Self::fold(c) == folded) {
            return Some(c.clone());
        }
        self.aliases
            .iter()
            .find(|(alias, _)| Self::fold(alias) == folded)
            .map(|(_, canonical)| canonical.clone())
    }

    /// Position in the canonical ordering; higher is more current.
    pub fn rank(&self, raw: &str) -> Option<usize> {
        let canonical = self.normalize(raw)?;
        self.canonical.iter().position(|c| *c == canonical)
    }
}

impl Default for VersionPolicy {
    fn default() -> Self {
        let aliases = [
            ("5e", "5e-2014"),
            ("5.1", "5e-2014"),
            ("srd5.1", "5e-2014"),
            ("2014", "5e-2014"),
            ("dnd5e", "5e-2014"),
            ("5.2", "5e-2024"),
            ("srd5.2", "5e-2024"),
            ("2024", "5e-2024"),
            ("5.5e", "5e-2024"),
            ("5r", "5e-2024"),
        ]
        .into_iter()
        .map(|(a, c)| (a.to_string(), c.to_string()))
        .collect();
        Self {
            field: "rulesVersion".into(),
            canonical: vec!["5e-2014".into(), "5e-2024".into()],
            aliases,
        }
    }
}

/// A declared numeric capability bound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundRule {
    pub field: String,
    pub min: f64,
    pub max: f64,
}

impl BoundRule {
    pub fn new(field: impl Into<String>, min: f64, max: f64) -> Self {
        Self {
            field: field.into(),
            min,
            max,
        }
    }

    pub fn admits(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Movement/action magnitude bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityBounds {
    pub rules: Vec<BoundRule>,
    /// Entity field that waives bounds: `true` waives every bound; a field
    /// name, a list of names, or an object keyed by name waives only those.
    pub override_field: String,
}

impl CapabilityBounds {
    pub fn rule(&self, field: &str) -> Option<&BoundRule> {
        self.rules.iter().find(|r| r.field == field)
    }
}

impl Default for CapabilityBounds {
    fn default() -> Self {
        Self {
            rules: vec![
                BoundRule::new("speed", 0.0, 120.0),
                BoundRule::new("flySpeed", 0.0, 150.0),
                BoundRule::new("swimSpeed", 0.0, 120.0),
                BoundRule::new("climbSpeed", 0.0, 120.0),
                BoundRule::new("burrowSpeed", 0.0, 60.0),
                BoundRule::new("range", 0.0, 600.0),
                BoundRule::new("reach", 0.0, 30.0),
                BoundRule::new("jumpDistance", 0.0, 60.0),
                BoundRule::new("attacksPerTurn", 0.0, 6.0),
            ],
            override_field: "boundsOverride".into(),
        }
    }
}

/// Vocabulary the limiter guard uses to read usage gating.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimiterVocabulary {
    /// Entity fields holding lists of abilities/rewards.
    pub ability_fields: Vec<String>,
    /// Field on an ability naming its impact level.
    pub impact_field: String,
    /// Impact levels that require a limiter.
    pub high_impact: Vec<String>,
    /// Field on an ability describing its usage.
    pub usage_field: String,
    /// Usage kinds that count as a limiter.
    pub limited: Vec<String>,
    /// Usage kinds that mean always available.
    pub unlimited: Vec<String>,
}

impl Default for LimiterVocabulary {
    fn default() -> Self {
        let strings = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        Self {
            ability_fields: strings(&["abilities", "features", "actions", "rewards"]),
            impact_field: "impact".into(),
            high_impact: strings(&["high", "major", "legendary", "extreme"]),
            usage_field: "usage".into(),
            limited: strings(&[
                "per_day",
                "_day",
                "_week",
                "per_rest",
                "short_rest",
                "long_rest",
                "recharge",
                "charges",
                "per_turn",
                "once",
            ]),
            unlimited: strings(&["at_will", "always", "passive", "unlimited", "constant"]),
        }
    }
}

/// Every fixed table, in one explicit value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Registry {
    pub versions: VersionPolicy,
    pub bounds: CapabilityBounds,
    pub limiter: LimiterVocabulary,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loose_versions_normalize() {
        let policy = VersionPolicy::default();
        assert_eq!(policy.normalize("5E").as_deref(), Some("5e-2014"));
        assert_eq!(policy.normalize(" SRD 5.2 ").as_deref(), Some("5e-2024"));
        assert_eq!(policy.normalize("v5.1").as_deref(), Some("5e-2014"));
        assert_eq!(policy.normalize("5e-2024").as_deref(), Some("5e-2024"));
        assert_eq!(policy.normalize("pathfinder"), None);
    }

    #[test]
    fn newer_canonical_ranks_higher() {
        let policy = VersionPolicy::default();
        assert!(policy.rank("2024") > policy.rank("5e"));
        assert_eq!(policy.rank("unknown"), None);
    }

    #[test]
    fn bound_rule_admits_inclusive() {
        let rule = BoundRule::new("speed", 0.0, 120.0);
        assert!(rule.admits(120.0));
        assert!(!rule.admits(121.0));
        assert!(!rule.admits(-5.0));
    }

    #[test]
    fn default_registry_has_tables() {
        let registry = Registry::default();
        assert!(registry.bounds.rule("flySpeed").is_some());
        assert!(registry.limiter.unlimited.contains(&"at_will".to_string()));
        assert_eq!(registry.versions.field, "rulesVersion");
    }
}
