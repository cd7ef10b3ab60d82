use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;

use crate::error::{NarrativeError, Result};

/// Backend that turns a prompt into structured (JSON) text.
///
/// Implementations may fail or return malformed output; the extractor treats
/// both as typed failures.
#[async_trait]
pub trait SceneInferenceProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn generate_structured(&self, prompt: &str) -> Result<String>;
}

/// Replays canned responses in order, repeating the last one. Records every
/// prompt it receives.
#[derive(Debug, Default)]
pub struct StaticInferenceProvider {
    responses: Mutex<VecDeque<String>>,
    last: Mutex<Option<String>>,
    prompts: Mutex<Vec<String>>,
}

impl StaticInferenceProvider {
    pub fn new(response: impl Into<String>) -> Self {
        Self::sequence([response.into()])
    }

    pub fn sequence(responses: impl IntoIterator<Item = String>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
            last: Mutex::new(None),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Prompts received so far.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }
}

#[async_trait]
impl SceneInferenceProvider for StaticInferenceProvider {
    fn name(&self) -> &str {
        "static"
    }

    async fn generate_structured(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().push(prompt.to_string());
        let mut last = self.last.lock();
        if let Some(next) = self.responses.lock().pop_front() {
            *last = Some(next);
        }
        last.clone()
            .ok_or_else(|| NarrativeError::Inference("no canned response configured".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_provider_replays_last_response() {
        let provider = StaticInferenceProvider::sequence(["one".to_string(), "two".to_string()]);
        assert_eq!(provider.generate_structured("a").await.unwrap(), "one");
        assert_eq!(provider.generate_structured("b").await.unwrap(), "two");
        assert_eq!(provider.generate_structured("c").await.unwrap(), "two");
        assert_eq!(provider.prompts(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_empty_static_provider_fails() {
        let provider = StaticInferenceProvider::default();
        let err = provider.generate_structured("prompt").await.unwrap_err();
        assert!(matches!(err, NarrativeError::Inference(_)));
    }
}
