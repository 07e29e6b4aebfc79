//! Budget configuration.
//!
//! A [`Budget`] is created once per session, validated, and shared
//! read-only by every component. Operators may change it between stages
//! with [`Budget::apply`]; nothing mutates it while a stage runs.
//!
//! Ceilings are in budgeting units (see [`crate::tokens`]), not provider
//! tokens. A unit is four characters, while citation-dense legal text runs
//! nearer three characters per `cl100k_base` token, so the defaults are the
//! provider-token limits scaled by 3/4: a full default request stays under
//! the model's real window even when the estimate undercounts.
//!
//! Budgets load from TOML (and YAML with the `yaml` feature):
//!
//! ```toml
//! max_attempts = 3
//!
//! [cheap]
//! model = "gpt-4"
//! max_tokens = 4500
//! chunk_size = 3000
//! chunk_overlap = 150
//! tokens_per_minute = 300000
//!
//! [expensive]
//! model = "gpt-4-1106-preview"
//! max_tokens = 30000
//! chunk_size = 30000
//! chunk_overlap = 150
//! tokens_per_minute = 300000
//! ```

use crate::error::Result;
use crate::types::Tier;
use crate::PipelineError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Limits and model for one capacity tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierBudget {
    /// Model identifier sent to the backend.
    pub model: String,
    /// Ceiling for a whole request (instructions + framing + query), in units.
    pub max_tokens: usize,
    /// Chunk size used when reducing at this tier.
    pub chunk_size: usize,
    /// Units shared between consecutive chunks.
    #[serde(default)]
    pub chunk_overlap: usize,
    /// Rate quota used for pacing.
    pub tokens_per_minute: u64,
}

impl TierBudget {
    fn cheap_default() -> Self {
        Self {
            model: "gpt-4".to_string(),
            max_tokens: 4500,
            chunk_size: 3000,
            chunk_overlap: 150,
            tokens_per_minute: 300_000,
        }
    }

    fn expensive_default() -> Self {
        Self {
            model: "gpt-4-1106-preview".to_string(),
            max_tokens: 30_000,
            chunk_size: 30_000,
            chunk_overlap: 150,
            tokens_per_minute: 300_000,
        }
    }
}

/// Session-wide budget: both tiers plus the reduction attempt ceiling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Budget {
    #[serde(default = "TierBudget::cheap_default")]
    pub cheap: TierBudget,
    #[serde(default = "TierBudget::expensive_default")]
    pub expensive: TierBudget,
    /// Maximum condense cycles before giving up with `ReductionExhausted`.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Sampling temperature for every request.
    #[serde(default)]
    pub temperature: f64,
    /// Cap on generated tokens per request.
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_max_output_tokens() -> u32 {
    4096
}

impl Default for Budget {
    fn default() -> Self {
        Self {
            cheap: TierBudget::cheap_default(),
            expensive: TierBudget::expensive_default(),
            max_attempts: default_max_attempts(),
            temperature: 0.0,
            max_output_tokens: default_max_output_tokens(),
        }
    }
}

/// Partial reconfiguration applied between stages. `None` keeps the current value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BudgetOverrides {
    pub cheap_model: Option<String>,
    pub cheap_max_tokens: Option<usize>,
    pub cheap_chunk_size: Option<usize>,
    pub expensive_model: Option<String>,
    pub expensive_max_tokens: Option<usize>,
    pub expensive_chunk_size: Option<usize>,
    pub chunk_overlap: Option<usize>,
    pub max_attempts: Option<u32>,
}

impl Budget {
    /// Settings for one tier.
    pub fn tier(&self, tier: Tier) -> &TierBudget {
        match tier {
            Tier::Cheap => &self.cheap,
            Tier::Expensive => &self.expensive,
        }
    }

    /// Check internal consistency.
    pub fn validate(&self) -> Result<()> {
        for tier in [Tier::Cheap, Tier::Expensive] {
            let t = self.tier(tier);
            if t.model.trim().is_empty() {
                return Err(invalid(format!("{} tier model must not be empty", tier)));
            }
            if t.max_tokens == 0 || t.chunk_size == 0 {
                return Err(invalid(format!(
                    "{} tier max_tokens and chunk_size must be greater than zero",
                    tier
                )));
            }
            if t.chunk_overlap >= t.chunk_size {
                return Err(invalid(format!(
                    "{} tier chunk_overlap ({}) must be smaller than chunk_size ({})",
                    tier, t.chunk_overlap, t.chunk_size
                )));
            }
            if t.chunk_size > t.max_tokens {
                return Err(invalid(format!(
                    "{} tier chunk_size ({}) exceeds max_tokens ({})",
                    tier, t.chunk_size, t.max_tokens
                )));
            }
            if t.tokens_per_minute == 0 {
                return Err(invalid(format!(
                    "{} tier tokens_per_minute must be greater than zero",
                    tier
                )));
            }
        }
        if self.cheap.max_tokens > self.expensive.max_tokens {
            return Err(invalid(format!(
                "cheap tier ceiling ({}) exceeds expensive tier ceiling ({})",
                self.cheap.max_tokens, self.expensive.max_tokens
            )));
        }
        if self.max_attempts == 0 {
            return Err(invalid("max_attempts must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Apply operator overrides and re-validate. On error `self` is unchanged.
    pub fn apply(&mut self, overrides: &BudgetOverrides) -> Result<()> {
        let mut next = self.clone();
        if let Some(ref model) = overrides.cheap_model {
            next.cheap.model = model.clone();
        }
        if let Some(v) = overrides.cheap_max_tokens {
            next.cheap.max_tokens = v;
        }
        if let Some(v) = overrides.cheap_chunk_size {
            next.cheap.chunk_size = v;
        }
        if let Some(ref model) = overrides.expensive_model {
            next.expensive.model = model.clone();
        }
        if let Some(v) = overrides.expensive_max_tokens {
            next.expensive.max_tokens = v;
        }
        if let Some(v) = overrides.expensive_chunk_size {
            next.expensive.chunk_size = v;
        }
        if let Some(v) = overrides.chunk_overlap {
            next.cheap.chunk_overlap = v;
            next.expensive.chunk_overlap = v;
        }
        if let Some(v) = overrides.max_attempts {
            next.max_attempts = v;
        }
        next.validate()?;
        *self = next;
        Ok(())
    }

    /// Parse a TOML budget and validate it.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let budget: Budget =
            toml::from_str(content).map_err(|e| invalid(format!("budget TOML: {}", e)))?;
        budget.validate()?;
        Ok(budget)
    }

    /// Parse a YAML budget and validate it.
    #[cfg(feature = "yaml")]
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let budget: Budget =
            serde_yaml::from_str(content).map_err(|e| invalid(format!("budget YAML: {}", e)))?;
        budget.validate()?;
        Ok(budget)
    }

    /// Load a budget file, then apply environment overrides.
    ///
    /// `.yaml`/`.yml` files need the `yaml` feature; anything else is read as TOML.
    /// Recognised variables: `RESTATE_CHEAP_MODEL`, `RESTATE_EXPENSIVE_MODEL`,
    /// `RESTATE_MAX_ATTEMPTS`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            invalid(format!("cannot read budget file {}: {}", path.display(), e))
        })?;

        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );
        let mut budget = if is_yaml {
            Self::parse_yaml(&content, path)?
        } else {
            Self::from_toml_str(&content)?
        };

        budget.apply(&Self::env_overrides()?)?;
        tracing::info!(path = %path.display(), "loaded budget");
        Ok(budget)
    }

    #[cfg(feature = "yaml")]
    fn parse_yaml(content: &str, _path: &Path) -> Result<Self> {
        Self::from_yaml_str(content)
    }

    #[cfg(not(feature = "yaml"))]
    fn parse_yaml(_content: &str, path: &Path) -> Result<Self> {
        Err(invalid(format!(
            "{} is YAML but the `yaml` feature is disabled",
            path.display()
        )))
    }

    fn env_overrides() -> Result<BudgetOverrides> {
        let mut overrides = BudgetOverrides {
            cheap_model: std::env::var("RESTATE_CHEAP_MODEL").ok(),
            expensive_model: std::env::var("RESTATE_EXPENSIVE_MODEL").ok(),
            ..Default::default()
        };
        if let Ok(raw) = std::env::var("RESTATE_MAX_ATTEMPTS") {
            let attempts = raw
                .trim()
                .parse::<u32>()
                .map_err(|e| invalid(format!("RESTATE_MAX_ATTEMPTS={:?}: {}", raw, e)))?;
            overrides.max_attempts = Some(attempts);
        }
        Ok(overrides)
    }
}

fn invalid(message: String) -> PipelineError {
    PipelineError::InvalidConfig(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_budget_is_valid() {
        let budget = Budget::default();
        budget.validate().unwrap();
        assert_eq!(budget.cheap.max_tokens, 4500);
        assert_eq!(budget.expensive.max_tokens, 30_000);
        assert_eq!(budget.max_attempts, 3);
        assert_eq!(budget.tier(Tier::Cheap).chunk_size, 3000);
        assert_eq!(budget.expensive.chunk_size, budget.expensive.max_tokens);
    }

    #[test]
    fn test_rejects_overlap_not_smaller_than_chunk() {
        let mut budget = Budget::default();
        budget.cheap.chunk_overlap = budget.cheap.chunk_size;
        assert!(matches!(budget.validate(), Err(PipelineError::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_inverted_tiers() {
        let mut budget = Budget::default();
        budget.cheap.max_tokens = 50_000;
        budget.cheap.chunk_size = 1000;
        assert!(budget.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_attempts_and_quota() {
        let mut budget = Budget::default();
        budget.max_attempts = 0;
        assert!(budget.validate().is_err());

        let mut budget = Budget::default();
        budget.expensive.tokens_per_minute = 0;
        assert!(budget.validate().is_err());
    }

    #[test]
    fn test_apply_overrides() {
        let mut budget = Budget::default();
        budget
            .apply(&BudgetOverrides {
                cheap_model: Some("gpt-4o-mini".into()),
                max_attempts: Some(5),
                chunk_overlap: Some(100),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(budget.cheap.model, "gpt-4o-mini");
        assert_eq!(budget.max_attempts, 5);
        assert_eq!(budget.expensive.chunk_overlap, 100);
    }

    #[test]
    fn test_apply_invalid_overrides_leaves_budget_unchanged() {
        let mut budget = Budget::default();
        let before = budget.clone();
        let result = budget.apply(&BudgetOverrides {
            cheap_chunk_size: Some(10),
            ..Default::default()
        });
        assert!(result.is_err());
        assert_eq!(budget, before);
    }

    #[test]
    fn test_from_toml_with_defaults() {
        let budget = Budget::from_toml_str(
            r#"
            max_attempts = 2

            [cheap]
            model = "small"
            max_tokens = 100
            chunk_size = 40
            chunk_overlap = 5
            tokens_per_minute = 6000
            "#,
        )
        .unwrap();
        assert_eq!(budget.max_attempts, 2);
        assert_eq!(budget.cheap.model, "small");
        assert_eq!(budget.cheap.chunk_overlap, 5);
        assert_eq!(budget.expensive, TierBudget::expensive_default());
    }

    #[test]
    fn test_from_toml_rejects_garbage() {
        assert!(Budget::from_toml_str("max_attempts = \"three\"").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("budget.toml");
        std::fs::write(&path, "max_attempts = 4\n").unwrap();
        let budget = Budget::load(&path).unwrap();
        assert_eq!(budget.cheap, TierBudget::cheap_default());
        assert!(budget.max_attempts >= 1);
    }
}
