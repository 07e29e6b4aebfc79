use crate::prompt::section;
use crate::provenance::format_prompt;
use crate::tokens::measure;

/// Placeholder in the framing template replaced by the query text.
pub const QUERY_PLACEHOLDER: &str = "{query}";

/// Placeholder in the framing template replaced by retrieved context.
pub const CONTEXT_PLACEHOLDER: &str = "{context}";

/// The parts of a request whose combined size decides tier eligibility.
///
/// Instructions, framing and retrieved context are fixed; only the query
/// can be reduced. The size is never cached, so it always reflects the
/// current query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestEnvelope {
    instructions: String,
    framing: String,
    context: String,
    query: String,
}

impl RequestEnvelope {
    pub fn new(
        instructions: impl Into<String>,
        framing: impl Into<String>,
        query: impl Into<String>,
    ) -> Self {
        Self {
            instructions: instructions.into(),
            framing: framing.into(),
            context: String::new(),
            query: query.into(),
        }
    }

    /// Attach retrieved context, placed at `{context}` in the framing or in
    /// a "Context" section ahead of it.
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    pub fn instructions(&self) -> &str {
        &self.instructions
    }

    pub fn framing(&self) -> &str {
        &self.framing
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    /// Replace the query, keeping everything else.
    pub fn with_query(&self, query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..self.clone()
        }
    }

    /// Combined measured size of all parts.
    pub fn size(&self) -> usize {
        self.fixed_size() + measure(&self.query)
    }

    /// Size of the parts that reduction cannot touch.
    pub fn fixed_size(&self) -> usize {
        measure(&self.instructions) + measure(&self.framing) + measure(&self.context)
    }

    /// The human message sent to the backend.
    ///
    /// The query goes in place of `{query}`, or after a blank line when the
    /// framing has no placeholder. Substitution is a single pass over the
    /// framing, so placeholder text inside the query or the context is
    /// never expanded.
    pub fn render_prompt(&self) -> String {
        let (framed, placed) = self.fill(Some(&self.query));
        if placed {
            framed
        } else if framed.is_empty() {
            self.query.clone()
        } else {
            format!("{}\n\n{}", framed, self.query)
        }
    }

    /// The full request as logged in provenance records.
    pub fn transcript(&self) -> String {
        let (framed, _) = self.fill(None);
        format_prompt(&self.instructions, &framed, &self.query)
    }

    /// Framing with context placed and, if given, the query substituted.
    /// Returns whether a `{query}` placeholder was found.
    fn fill(&self, query: Option<&str>) -> (String, bool) {
        let mut out = String::with_capacity(self.framing.len() + self.context.len());
        let mut rest = self.framing.as_str();
        let mut query_placed = false;
        let mut context_placed = false;

        loop {
            let next_query = rest.find(QUERY_PLACEHOLDER);
            let next_context = rest.find(CONTEXT_PLACEHOLDER);
            let (at, placeholder) = match (next_query, next_context) {
                (Some(q), Some(c)) if c < q => (c, CONTEXT_PLACEHOLDER),
                (Some(q), _) => (q, QUERY_PLACEHOLDER),
                (None, Some(c)) => (c, CONTEXT_PLACEHOLDER),
                (None, None) => break,
            };
            out.push_str(&rest[..at]);
            if placeholder == QUERY_PLACEHOLDER {
                out.push_str(query.unwrap_or(QUERY_PLACEHOLDER));
                query_placed = true;
            } else {
                out.push_str(&self.context);
                context_placed = true;
            }
            rest = &rest[at + placeholder.len()..];
        }
        out.push_str(rest);

        if !context_placed && !self.context.is_empty() {
            out = if out.is_empty() {
                section("Context", &self.context)
            } else {
                format!("{}\n\n{}", section("Context", &self.context), out)
            };
        }
        (out, query_placed)
    }
}
