//! Token counting per tokenizer family.

use std::collections::HashMap;
use std::sync::Arc;

/// Counts tokens the way a model family's tokenizer does.
pub trait TokenCounter: Send + Sync {
    /// Tokenizer family name reported in the manifest.
    fn family(&self) -> &str;

    fn count(&self, text: &str) -> usize;

    /// Whether counts are estimates rather than real tokenizer output.
    fn is_approximate(&self) -> bool;
}

/// One token per four characters, rounded up.
///
/// Rounding up keeps the estimate subadditive: the count of a whole text never
/// exceeds the sum of the counts of its parts.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApproximateTokenCounter;

impl TokenCounter for ApproximateTokenCounter {
    fn family(&self) -> &str {
        "approximate"
    }

    fn count(&self, text: &str) -> usize {
        text.chars().count().div_ceil(4)
    }

    fn is_approximate(&self) -> bool {
        true
    }
}

/// Exact counts from a Hugging Face `tokenizer.json`.
#[cfg(feature = "hf-tokenizers")]
pub struct HfTokenCounter {
    family: String,
    tokenizer: tokenizers::Tokenizer,
}

#[cfg(feature = "hf-tokenizers")]
impl HfTokenCounter {
    pub fn from_file(
        family: impl Into<String>,
        path: impl AsRef<std::path::Path>,
    ) -> crate::error::Result<Self> {
        let path = path.as_ref();
        let tokenizer = tokenizers::Tokenizer::from_file(path).map_err(|e| {
            crate::error::NarrativeError::Config(format!("tokenizer {}: {}", path.display(), e))
        })?;
        Ok(Self {
            family: family.into(),
            tokenizer,
        })
    }
}

#[cfg(feature = "hf-tokenizers")]
impl TokenCounter for HfTokenCounter {
    fn family(&self) -> &str {
        &self.family
    }

    fn count(&self, text: &str) -> usize {
        match self.tokenizer.encode(text, false) {
            Ok(encoding) => encoding.len(),
            Err(e) => {
                tracing::warn!(family = %self.family, error = %e, "tokenizer failed; estimating");
                ApproximateTokenCounter.count(text)
            }
        }
    }

    fn is_approximate(&self) -> bool {
        false
    }
}

/// Counters by tokenizer family, with an approximate fallback.
#[derive(Clone)]
pub struct TokenizerRegistry {
    counters: HashMap<String, Arc<dyn TokenCounter>>,
    fallback: Arc<dyn TokenCounter>,
}

impl TokenizerRegistry {
    pub fn new() -> Self {
        Self {
            counters: HashMap::new(),
            fallback: Arc::new(ApproximateTokenCounter),
        }
    }

    pub fn register(&mut self, counter: Arc<dyn TokenCounter>) {
        self.counters.insert(counter.family().to_string(), counter);
    }

    /// Counter for `family`, or the approximate fallback.
    pub fn counter_for(&self, family: Option<&str>) -> Arc<dyn TokenCounter> {
        family
            .and_then(|f| self.counters.get(f))
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.fallback))
    }
}

impl Default for TokenizerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TokenizerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut families: Vec<&String> = self.counters.keys().collect();
        families.sort();
        f.debug_struct("TokenizerRegistry")
            .field("families", &families)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct WordCounter;

    impl TokenCounter for WordCounter {
        fn family(&self) -> &str {
            "words"
        }

        fn count(&self, text: &str) -> usize {
            text.split_whitespace().count()
        }

        fn is_approximate(&self) -> bool {
            false
        }
    }

    #[test]
    fn test_approximate_rounds_up() {
        let counter = ApproximateTokenCounter;
        assert_eq!(counter.count(""), 0);
        assert_eq!(counter.count("abc"), 1);
        assert_eq!(counter.count("abcde"), 2);
        assert_eq!(counter.count("éééé"), 1);
    }

    #[test]
    fn test_registry_falls_back() {
        let mut registry = TokenizerRegistry::new();
        registry.register(Arc::new(WordCounter));

        assert_eq!(registry.counter_for(Some("words")).family(), "words");
        assert!(registry.counter_for(Some("unknown")).is_approximate());
        assert!(registry.counter_for(None).is_approximate());
    }
}
