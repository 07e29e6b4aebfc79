use std::path::Path;

use crate::error::Result;
use crate::types::TemplateVars;
use crate::PipelineError;

/// Sentinel that should never appear in real templates.
const ESCAPE_SENTINEL: &str = "\x00LBRACE\x00";
/// Sentinel for escaped closing brace.
const ESCAPE_SENTINEL_CLOSE: &str = "\x00RBRACE\x00";

/// Build a prompt string with variable substitution.
///
/// Replaces `{key}` placeholders in the template with values from `vars`.
/// Unknown placeholders are left in place, so `{query}` survives for the
/// request envelope to fill.
///
/// Use `{{` to insert a literal `{` and `}}` to insert a literal `}`.
///
/// # Example
///
/// ```
/// use restatement::types::TemplateVars;
/// use restatement::prompt::render;
///
/// let vars = TemplateVars::new().insert("area_of_law", "Torts");
/// let result = render("Draft for {area_of_law}: {query} {{\"k\": 1}}", &vars);
/// assert_eq!(result, r#"Draft for Torts: {query} {"k": 1}"#);
/// ```
pub fn render(template: &str, vars: &TemplateVars) -> String {
    // Pass 1: protect escaped braces
    let mut rendered = template.replace("{{", ESCAPE_SENTINEL);
    rendered = rendered.replace("}}", ESCAPE_SENTINEL_CLOSE);

    // Pass 2: substitute placeholders
    for (key, value) in &vars.data {
        let placeholder = format!("{{{}}}", key);
        rendered = rendered.replace(&placeholder, value);
    }

    // Pass 3: restore escaped braces
    rendered = rendered.replace(ESCAPE_SENTINEL, "{");
    rendered = rendered.replace(ESCAPE_SENTINEL_CLOSE, "}");
    rendered
}

/// Read a template file and render it with `vars`.
///
/// A missing file is [`PipelineError::TemplateNotFound`].
pub async fn load_template(path: &Path, vars: &TemplateVars) -> Result<String> {
    let raw = tokio::fs::read_to_string(path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => PipelineError::TemplateNotFound {
            path: path.to_path_buf(),
        },
        _ => PipelineError::Io(e),
    })?;
    tracing::debug!(path = %path.display(), "loaded prompt template");
    Ok(render(&raw, vars))
}

/// Wrap text in a labeled section for structured prompts.
pub fn section(label: &str, content: &str) -> String {
    format!("## {}\n{}", label, content)
}

/// Descriptive metadata for a drafting session, substituted into templates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionMeta {
    pub section_title: String,
    pub area_of_law: String,
    pub restatement_title: String,
    pub description: String,
}

const SHORT_TITLE_LEN: usize = 15;

impl SessionMeta {
    pub fn new(section_title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            section_title: section_title.into(),
            description: description.into(),
            ..Default::default()
        }
    }

    /// Set the area of law in title case and derive the restatement title.
    ///
    /// "of" and "in" stay lowercase unless they open the phrase.
    pub fn set_area_of_law(&mut self, area: &str) {
        let titled = area
            .split_whitespace()
            .enumerate()
            .map(|(i, word)| {
                let lower = word.to_lowercase();
                if i > 0 && (lower == "of" || lower == "in") {
                    lower
                } else {
                    let mut chars = lower.chars();
                    match chars.next() {
                        Some(first) => first.to_uppercase().chain(chars).collect(),
                        None => String::new(),
                    }
                }
            })
            .collect::<Vec<_>>()
            .join(" ");
        self.restatement_title = format!("Restatement of {}", titled);
        self.area_of_law = titled;
    }

    pub fn with_area_of_law(mut self, area: &str) -> Self {
        self.set_area_of_law(area);
        self
    }

    /// A short label for stage and file names: the first line of the section
    /// title without a leading "§" or section number, cut to 15 characters.
    pub fn short_title(&self) -> String {
        let first = self.section_title.lines().next().unwrap_or_default();
        first
            .trim_start_matches(|c: char| c == '§' || c.is_ascii_digit() || c.is_whitespace() || c == '.')
            .chars()
            .take(SHORT_TITLE_LEN)
            .collect::<String>()
            .trim_end()
            .to_string()
    }

    /// Template variables for this session.
    pub fn vars(&self) -> TemplateVars {
        TemplateVars::new()
            .insert("section_title", self.section_title.as_str())
            .insert("area_of_law", self.area_of_law.as_str())
            .insert("restatement_title", self.restatement_title.as_str())
            .insert("description", self.description.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_leaves_unknown_placeholders() {
        let vars = TemplateVars::new().insert("area_of_law", "Torts");
        let result = render("Draft {area_of_law} rules for {query}", &vars);
        assert_eq!(result, "Draft Torts rules for {query}");
    }

    #[test]
    fn test_render_no_placeholders() {
        let result = render("Brief the case.", &TemplateVars::new());
        assert_eq!(result, "Brief the case.");
    }

    #[test]
    fn test_section() {
        let result = section("Context", "Duty of care is owed to foreseeable plaintiffs.");
        assert_eq!(result, "## Context\nDuty of care is owed to foreseeable plaintiffs.");
    }

    #[test]
    fn test_render_escaped_braces() {
        let vars = TemplateVars::new().insert("section_title", "§ 1. Duty");
        let result = render("{section_title}: reply as {{\"rule\": \"...\"}}", &vars);
        assert_eq!(result, r#"§ 1. Duty: reply as {"rule": "..."}"#);
    }

    #[test]
    fn test_render_escaped_placeholder_is_literal() {
        let vars = TemplateVars::new().insert("area_of_law", "Contracts");
        let result = render("{{area_of_law}} is {area_of_law}", &vars);
        assert_eq!(result, "{area_of_law} is Contracts");
    }

    #[tokio::test]
    async fn test_load_template_substitutes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("brief.txt");
        std::fs::write(&path, "You draft the {restatement_title}.").unwrap();
        let meta = SessionMeta::new("§ 1. Duty", "").with_area_of_law("torts");
        let text = load_template(&path, &meta.vars()).await.unwrap();
        assert_eq!(text, "You draft the Restatement of Torts.");
    }

    #[tokio::test]
    async fn test_load_template_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.txt");
        let err = load_template(&path, &TemplateVars::new()).await.unwrap_err();
        match err {
            PipelineError::TemplateNotFound { path: p } => assert_eq!(p, path),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_area_of_law_title_case() {
        let mut meta = SessionMeta::default();
        meta.set_area_of_law("conflict OF laws in europe");
        assert_eq!(meta.area_of_law, "Conflict of Laws in Europe");
        assert_eq!(meta.restatement_title, "Restatement of Conflict of Laws in Europe");

        meta.set_area_of_law("in rem jurisdiction");
        assert_eq!(meta.area_of_law, "In Rem Jurisdiction");
    }

    #[test]
    fn test_short_title() {
        let meta = SessionMeta::new("§ 12. Liability for Negligent Conduct\nComment a.", "");
        assert_eq!(meta.short_title(), "Liability for N");

        let plain = SessionMeta::new("Duty", "");
        assert_eq!(plain.short_title(), "Duty");
    }
}
