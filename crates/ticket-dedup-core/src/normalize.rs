//! Canonical-summary normalization.
//!
//! Turns a ticket's title, description, and optional extra fields into one
//! short technical summary. The summary, not the raw ticket text, is what
//! gets embedded: two differently worded reports of the same defect should
//! converge on nearly the same canonical sentence and therefore land close
//! together in vector space.
//!
//! The canonical form:
//!
//! - starts with a present-tense action verb ("Calculates", "Announces"),
//! - describes only the repeatable technical behaviour,
//! - leaves out coordinates, software versions, and test or instance counts,
//! - leaves out noise words such as "bug" and "issue",
//! - names a region only when the behaviour is specific to it,
//! - is at most two sentences.
//!
//! [`TextNormalizer`] carries these rules in its prompt and calls a
//! [`CompletionBackend`] at temperature 0.

use async_trait::async_trait;

use crate::error::{DedupError, Result};
use crate::models::ExtraField;

/// A single text-generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    pub temperature: f32,
}

/// Text-in/text-out generation backend (chat completion API or similar).
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    fn model_name(&self) -> &str;

    async fn complete(&self, request: &CompletionRequest) -> anyhow::Result<String>;
}

/// Anything that can produce a canonical summary for a ticket.
#[async_trait]
pub trait Normalizer: Send + Sync {
    async fn normalize(
        &self,
        title: &str,
        description: &str,
        extra_fields: &[ExtraField],
    ) -> Result<String>;
}

const SYSTEM_PROMPT: &str = "You standardize bug reports so that reports describing the same \
defect can be matched by similarity search.
Every summary you write must:
1. Begin with a present-tense action verb (calculates, displays, rejects, announces, loses, ...)
2. Describe the core technical behavior only
3. Mention a region only when the behavior is systematic to that region
4. Leave out implementation details, coordinates, and version numbers
5. Use plain technical language";

const FORMAT_RULES: &str = "Write a standardized summary of the core technical behavior.

Format:
[Action verb] + [Core behavior] + [Region, only if systematic]

Rules:
- Describe ONLY the repeatable technical behavior
- Do NOT include specific coordinates, software versions, test counts,
  individual occurrences, or implementation details
- Do NOT use words like \"bug\", \"issue\", or \"problem\"
- Simple present tense
- At most 2 sentences
- Reply with the summary only

Good:
- \"Calculates routes through blocked roads in Korea region\"
- \"Rejects valid city name 'Ingolstadt' while accepting other destinations\"
- \"Announces incorrect exit numbers at roundabouts in Japan\"
- \"Loses charging plan during long-distance route calculations\"

Bad:
- \"Route calculation fails at coordinates 37.529, 126.884\" (too specific)
- \"Issue occurs in version VR41_2_A13E_HCP3\" (version not needed)
- \"Problem happens 3/3 times\" (test count not needed)
- \"Multiple routing problems in the area\" (too vague)";

/// Prompt-driven [`Normalizer`] over any [`CompletionBackend`].
pub struct TextNormalizer {
    backend: Box<dyn CompletionBackend>,
}

impl TextNormalizer {
    pub fn new(backend: Box<dyn CompletionBackend>) -> Self {
        Self { backend }
    }

    pub fn model_name(&self) -> &str {
        self.backend.model_name()
    }
}

#[async_trait]
impl Normalizer for TextNormalizer {
    async fn normalize(
        &self,
        title: &str,
        description: &str,
        extra_fields: &[ExtraField],
    ) -> Result<String> {
        let request = build_request(title, description, extra_fields)?;
        let raw = self
            .backend
            .complete(&request)
            .await
            .map_err(DedupError::backend)?;
        clean_summary(&raw)
    }
}

/// Validate inputs and assemble the prompt. Temperature is always 0.
pub fn build_request(
    title: &str,
    description: &str,
    extra_fields: &[ExtraField],
) -> Result<CompletionRequest> {
    let title = title.trim();
    let description = description.trim();
    if title.is_empty() {
        return Err(DedupError::Validation("ticket title is required".into()));
    }
    if description.is_empty() {
        return Err(DedupError::Validation(
            "ticket description is required".into(),
        ));
    }

    let mut user = String::with_capacity(FORMAT_RULES.len() + title.len() + description.len() + 64);
    user.push_str(FORMAT_RULES);
    user.push_str("\n\nTicket:\nTitle: ");
    user.push_str(title);
    for field in extra_fields {
        let value = field.value.trim();
        if value.is_empty() {
            continue;
        }
        user.push('\n');
        user.push_str(field.label.trim());
        user.push_str(": ");
        user.push_str(value);
    }
    user.push_str("\nDescription: ");
    user.push_str(description);

    Ok(CompletionRequest {
        system: SYSTEM_PROMPT.to_string(),
        user,
        temperature: 0.0,
    })
}

/// Tidy a backend reply into a single canonical summary line.
///
/// Strips wrapping quotes, list bullets, and a leading `Summary:` label,
/// and collapses whitespace. Rejects replies that end up empty or do not
/// start with a letter.
pub fn clean_summary(raw: &str) -> Result<String> {
    let mut text = raw.trim();

    for prefix in ["Summary:", "summary:", "SUMMARY:", "Standardized summary:"] {
        if let Some(rest) = text.strip_prefix(prefix) {
            text = rest.trim_start();
        }
    }
    text = text.trim_start_matches(&['-', '*', '•'][..]).trim_start();

    let quotes: &[char] = &['"', '\'', '`', '“', '”'];
    if text.len() >= 2 && text.starts_with(quotes) && text.ends_with(quotes) {
        text = text.trim_matches(quotes).trim();
    }

    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");

    match collapsed.chars().next() {
        None => Err(DedupError::normalization("backend returned an empty summary")),
        Some(c) if !c.is_alphabetic() => Err(DedupError::normalization(format!(
            "summary does not start with a verb: {:?}",
            collapsed
        ))),
        Some(_) => Ok(collapsed),
    }
}
