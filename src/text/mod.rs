//! Swappable text processing: trimming and summarization.
//!
//! Both traits expose a single operation and must never raise — an
//! external-model implementation degrades to truncation on failure rather
//! than propagating an error up through the Policy Executor.

use tracing::warn;

use crate::config::TextProcessorConfig;

/// Shortens content to at most `max_chars`, never raising.
pub trait Trimmer: Send + Sync {
    fn trim(&self, text: &str, max_chars: usize) -> String;
}

/// Produces a shorter version of content targeting `target_chars`, never
/// raising. Output length is not contractually bounded but implementations
/// should honor the target approximately.
pub trait Summarizer: Send + Sync {
    fn summarize(&self, text: &str, target_chars: usize) -> String;
}

/// Identity trimmer — the default, preserves data.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTrimmer;

impl Trimmer for NoopTrimmer {
    fn trim(&self, text: &str, _max_chars: usize) -> String {
        text.to_string()
    }
}

/// Identity summarizer — the default, preserves data.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSummarizer;

impl Summarizer for NoopSummarizer {
    fn summarize(&self, text: &str, _target_chars: usize) -> String {
        text.to_string()
    }
}

/// Cuts at a character boundary, appending an ellipsis when truncated.
///
/// Returns the input unchanged when `max_chars <= 0` or the text already
/// fits.
#[derive(Debug, Default, Clone, Copy)]
pub struct TruncatingTrimmer;

impl TruncatingTrimmer {
    fn truncate_at(text: &str, max_chars: usize) -> String {
        if max_chars == 0 || text.chars().count() <= max_chars {
            return text.to_string();
        }
        let keep = max_chars.saturating_sub(1);
        let mut truncated: String = text.chars().take(keep).collect();
        truncated.push('…');
        truncated
    }
}

impl Trimmer for TruncatingTrimmer {
    fn trim(&self, text: &str, max_chars: usize) -> String {
        Self::truncate_at(text, max_chars)
    }
}

/// Truncates toward `target_chars`; used both standalone and as the
/// fallback for [`ExternalSummarizer`].
#[derive(Debug, Default, Clone, Copy)]
pub struct TruncatingSummarizer;

impl Summarizer for TruncatingSummarizer {
    fn summarize(&self, text: &str, target_chars: usize) -> String {
        TruncatingTrimmer::truncate_at(text, target_chars)
    }
}

/// Delegates to an injected callable (e.g. an LLM client); on error, falls
/// back to truncation rather than surfacing the failure.
pub struct ExternalSummarizer<F>
where
    F: Fn(&str, usize) -> Result<String, String> + Send + Sync,
{
    call: F,
    fallback: TruncatingSummarizer,
}

impl<F> ExternalSummarizer<F>
where
    F: Fn(&str, usize) -> Result<String, String> + Send + Sync,
{
    pub fn new(call: F) -> Self {
        Self {
            call,
            fallback: TruncatingSummarizer,
        }
    }
}

impl<F> Summarizer for ExternalSummarizer<F>
where
    F: Fn(&str, usize) -> Result<String, String> + Send + Sync,
{
    fn summarize(&self, text: &str, target_chars: usize) -> String {
        match (self.call)(text, target_chars) {
            Ok(summary) => summary,
            Err(err) => {
                warn!(error = %err, "external summarizer failed, falling back to truncation");
                self.fallback.summarize(text, target_chars)
            }
        }
    }
}

/// Builds the configured trimmer, falling back to [`NoopTrimmer`] with a
/// warning when the configured `type` is unrecognized.
pub fn trimmer_from_config(config: &TextProcessorConfig) -> Box<dyn Trimmer> {
    match config.kind.as_str() {
        "noop" => Box::new(NoopTrimmer),
        "truncating" => Box::new(TruncatingTrimmer),
        other => {
            warn!(kind = other, "unknown trimmer type, falling back to noop");
            Box::new(NoopTrimmer)
        }
    }
}

/// Builds the configured summarizer. `external` has no injected callable at
/// this layer (that requires a closure), so it degrades to truncating;
/// callers wanting an external model should construct
/// [`ExternalSummarizer`] directly.
pub fn summarizer_from_config(config: &TextProcessorConfig) -> Box<dyn Summarizer> {
    match config.kind.as_str() {
        "noop" => Box::new(NoopSummarizer),
        "truncating" | "external" => Box::new(TruncatingSummarizer),
        other => {
            warn!(kind = other, "unknown summarizer type, falling back to noop");
            Box::new(NoopSummarizer)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_trimmer_is_identity() {
        assert_eq!(NoopTrimmer.trim("hello world", 3), "hello world");
    }

    #[test]
    fn truncating_trimmer_preserves_short_text() {
        assert_eq!(TruncatingTrimmer.trim("hi", 10), "hi");
    }

    #[test]
    fn truncating_trimmer_preserves_on_non_positive_max() {
        assert_eq!(TruncatingTrimmer.trim("hello world", 0), "hello world");
    }

    #[test]
    fn truncating_trimmer_cuts_with_ellipsis() {
        let out = TruncatingTrimmer.trim("hello world", 5);
        assert_eq!(out.chars().count(), 5);
        assert!(out.ends_with('…'));
    }

    #[test]
    fn external_summarizer_falls_back_on_error() {
        let summarizer = ExternalSummarizer::new(|_text: &str, _target: usize| Err("boom".to_string()));
        let out = summarizer.summarize("some long content here", 5);
        assert!(out.ends_with('…'));
    }

    #[test]
    fn external_summarizer_uses_call_result_on_success() {
        let summarizer = ExternalSummarizer::new(|text: &str, _target: usize| Ok(format!("summary of: {text}")));
        assert_eq!(summarizer.summarize("x", 5), "summary of: x");
    }

    #[test]
    fn factory_falls_back_to_noop_on_unknown_type() {
        let cfg = TextProcessorConfig {
            kind: "made-up".to_string(),
            params: Default::default(),
        };
        assert_eq!(trimmer_from_config(&cfg).trim("abcdef", 2), "abcdef");
    }
}
