//! External knowledge sources: the story bible and the decision log.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use story_graph::normalize_name;

use crate::classifier::vocabulary::contains_phrase;
use crate::error::Result;

/// A free-text entry with metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceEntry {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl SourceEntry {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            category: None,
            timestamp: None,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Single-line rendering used in assembled context.
    pub fn render(&self) -> String {
        let body = self.content.split_whitespace().collect::<Vec<_>>().join(" ");
        if self.title.is_empty() {
            body
        } else {
            format!("{}: {}", self.title, body)
        }
    }
}

/// Read-only provider of entries relevant to keywords and entities.
#[async_trait]
pub trait KnowledgeSource: Send + Sync {
    fn name(&self) -> &str;

    async fn relevant_entries(
        &self,
        keywords: &[String],
        entities: &[String],
        limit: usize,
    ) -> Result<Vec<SourceEntry>>;
}

/// In-process source ranked by keyword and entity overlap.
///
/// Entity mentions count double. With no keywords and no entities the most
/// recent entries are returned.
#[derive(Debug, Default)]
pub struct InMemoryKnowledgeSource {
    name: String,
    entries: RwLock<Vec<SourceEntry>>,
}

impl InMemoryKnowledgeSource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: RwLock::new(Vec::new()),
        }
    }

    pub fn with_entries(name: impl Into<String>, entries: impl IntoIterator<Item = SourceEntry>) -> Self {
        let source = Self::new(name);
        source.entries.write().extend(entries);
        source
    }

    pub fn push(&self, entry: SourceEntry) {
        self.entries.write().push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn score(entry: &SourceEntry, keywords: &HashSet<String>, entities: &[String]) -> usize {
        let text = normalize_name(&format!("{} {}", entry.title, entry.content));
        let words: HashSet<&str> = text.split(|c: char| !c.is_alphanumeric()).collect();
        let keyword_hits = keywords.iter().filter(|k| words.contains(k.as_str())).count();
        let entity_hits = entities
            .iter()
            .filter(|e| contains_phrase(&text, &normalize_name(e)))
            .count();
        keyword_hits + 2 * entity_hits
    }
}

#[async_trait]
impl KnowledgeSource for InMemoryKnowledgeSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn relevant_entries(
        &self,
        keywords: &[String],
        entities: &[String],
        limit: usize,
    ) -> Result<Vec<SourceEntry>> {
        let keywords: HashSet<String> = keywords.iter().map(|k| k.to_lowercase()).collect();
        let unfiltered = keywords.is_empty() && entities.is_empty();

        let entries = self.entries.read();
        let mut scored: Vec<(usize, &SourceEntry)> = entries
            .iter()
            .map(|e| (Self::score(e, &keywords, entities), e))
            .filter(|(score, _)| unfiltered || *score > 0)
            .collect();
        scored.sort_by(|(sa, a), (sb, b)| {
            sb.cmp(sa)
                .then_with(|| b.timestamp.cmp(&a.timestamp))
                .then_with(|| a.title.cmp(&b.title))
        });

        Ok(scored
            .into_iter()
            .take(limit)
            .map(|(_, e)| e.clone())
            .collect())
    }
}
