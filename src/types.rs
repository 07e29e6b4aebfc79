use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// One unit of work for a stage: an opaque text plus its position.
///
/// Identity is the index. Lists of items are built once per stage and are
/// not mutated while the stage runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Position in the ordered sequence (0-based).
    pub index: usize,
    /// The payload text (a case, a brief, a rule, a heading, ...).
    pub text: String,
}

impl WorkItem {
    pub fn new(index: usize, text: impl Into<String>) -> Self {
        Self {
            index,
            text: text.into(),
        }
    }

    /// Number a list of texts in order.
    pub fn sequence<I, S>(texts: I) -> Vec<WorkItem>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        texts
            .into_iter()
            .enumerate()
            .map(|(index, text)| WorkItem::new(index, text))
            .collect()
    }
}

/// Capacity class of the generation backend.
///
/// Each tier has its own ceiling, chunking parameters and rate quota in the
/// [`Budget`](crate::config::Budget).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Smaller ceiling, preferred whenever the request fits.
    Cheap,
    /// Larger ceiling, used only when the cheap tier cannot hold the request.
    Expensive,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Cheap => f.write_str("cheap"),
            Tier::Expensive => f.write_str("expensive"),
        }
    }
}

/// Values substituted into prompt templates via `{key}` placeholders.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemplateVars {
    pub data: HashMap<String, String>,
}

impl TemplateVars {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.data.get(key).map(|s| s.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_numbers_in_order() {
        let items = WorkItem::sequence(["a", "b", "c"]);
        assert_eq!(items.len(), 3);
        assert_eq!(items[0], WorkItem::new(0, "a"));
        assert_eq!(items[2].index, 2);
        assert_eq!(items[2].text, "c");
    }

    #[test]
    fn test_tier_ordering_and_display() {
        assert!(Tier::Cheap < Tier::Expensive);
        assert_eq!(Tier::Expensive.to_string(), "expensive");
        let json = serde_json::to_string(&Tier::Cheap).unwrap();
        assert_eq!(json, "\"cheap\"");
    }

    #[test]
    fn test_template_vars() {
        let vars = TemplateVars::new().insert("area_of_law", "Torts");
        assert_eq!(vars.get("area_of_law"), Some("Torts"));
        assert_eq!(vars.get("missing"), None);
    }
}
