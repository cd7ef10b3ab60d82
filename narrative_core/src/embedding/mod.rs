//! Embedding Index - per-node vectors and similarity search over the graph.
//!
//! Vectors live on the nodes themselves, tagged with the model that produced
//! them. A search only ever compares vectors from the active provider's model;
//! after a provider switch the index reports degraded mode and answers with
//! keyword matching until a full reindex completes.

mod provider;

#[cfg(feature = "ollama")]
mod ollama;

pub use provider::*;

#[cfg(feature = "ollama")]
pub use ollama::*;

use futures::stream::{self, StreamExt};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use story_graph::{GraphStore, NodeEmbedding, NodeId, NodeType};

use crate::classifier::vocabulary::STOPWORDS;
use crate::config::NarrativeConfig;
use crate::error::{NarrativeError, Result};

/// How a search was answered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchMode {
    /// Cosine similarity over vectors from a single model.
    Vector { model: String },
    /// Keyword overlap; vectors are stale or being rebuilt.
    KeywordFallback { reason: String },
}

impl SearchMode {
    pub fn is_degraded(&self) -> bool {
        matches!(self, SearchMode::KeywordFallback { .. })
    }
}

/// One ranked search result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticHit {
    pub node_id: NodeId,
    pub name: String,
    pub node_type: NodeType,
    pub description: String,
    pub score: f32,
}

/// Ranked results plus the mode that produced them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticResults {
    pub query: String,
    pub mode: SearchMode,
    pub hits: Vec<SemanticHit>,
}

/// Outcome of a reindex run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReindexReport {
    pub model: String,
    pub indexed: usize,
    /// Nodes without description text.
    pub skipped: usize,
    pub failed: usize,
    pub batches: usize,
}

/// Snapshot of index health.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStatus {
    pub model: String,
    pub dimension: usize,
    /// Nodes with a vector from the active model.
    pub indexed: usize,
    /// Nodes with text but no usable vector.
    pub pending: usize,
    pub degraded: bool,
    pub reindexing: bool,
}

#[derive(Debug, Default)]
struct IndexState {
    degraded: bool,
    reindexing: bool,
}

/// Vector index over the story graph.
pub struct EmbeddingIndex {
    store: Arc<GraphStore>,
    provider: RwLock<Arc<dyn EmbeddingProvider>>,
    config: Arc<NarrativeConfig>,
    state: RwLock<IndexState>,
    reindex_lock: tokio::sync::Mutex<()>,
}

impl EmbeddingIndex {
    /// Create an index. Vectors left by another model are unset and the index
    /// starts degraded until they are regenerated.
    pub fn new(
        store: Arc<GraphStore>,
        provider: Arc<dyn EmbeddingProvider>,
        config: Arc<NarrativeConfig>,
    ) -> Result<Self> {
        let index = Self {
            store,
            provider: RwLock::new(provider),
            config,
            state: RwLock::new(IndexState::default()),
            reindex_lock: tokio::sync::Mutex::new(()),
        };
        let cleared = index.clear_foreign_vectors()?;
        if cleared > 0 {
            warn!(cleared, "stored vectors came from another model; index degraded");
            index.state.write().degraded = true;
        }
        Ok(index)
    }

    /// The active provider.
    pub fn provider(&self) -> Arc<dyn EmbeddingProvider> {
        Arc::clone(&self.provider.read())
    }

    pub fn model_id(&self) -> String {
        self.provider.read().model_id().to_string()
    }

    pub fn is_degraded(&self) -> bool {
        let state = self.state.read();
        state.degraded || state.reindexing
    }

    /// Replace the provider. Vectors from other models are unset and search
    /// falls back to keywords until [`EmbeddingIndex::reindex_all`] succeeds.
    pub fn switch_provider(&self, provider: Arc<dyn EmbeddingProvider>) -> Result<usize> {
        let previous = self.model_id();
        let next = provider.model_id().to_string();
        *self.provider.write() = provider;
        if previous == next {
            return Ok(0);
        }

        self.state.write().degraded = true;
        let cleared = self.clear_foreign_vectors()?;
        info!(%previous, %next, cleared, "switched embedding provider");
        Ok(cleared)
    }

    /// Embed one node and store its vector.
    pub async fn index_node(&self, id: NodeId) -> Result<()> {
        let provider = self.provider();
        let text = {
            let graph = self.store.snapshot();
            let node = graph
                .node(id)
                .ok_or(story_graph::GraphError::NodeNotFound(id))?;
            node.embedding_text()
                .ok_or(NarrativeError::MissingDescription(id))?
        };

        let vector = self.with_timeout(provider.embed(&text)).await?;
        let model = provider.model_id().to_string();
        self.store_vectors(&model, vec![(id, vector)])?;
        debug!(node = %id, %model, "indexed node");
        Ok(())
    }

    /// Regenerate every missing or foreign vector in bounded batches.
    ///
    /// Idempotent: nodes already carrying a vector from the active model are
    /// left alone. Failed batches are logged and counted; the index leaves
    /// degraded mode only after a run with no failures.
    pub async fn reindex_all(&self, batch_size: usize) -> Result<ReindexReport> {
        let _running = self.reindex_lock.lock().await;
        self.state.write().reindexing = true;
        let result = self.run_reindex(batch_size).await;
        let mut state = self.state.write();
        state.reindexing = false;
        if let Ok(report) = &result {
            if report.failed == 0 && report.model == self.model_id() {
                state.degraded = false;
            }
        }
        result
    }

    async fn run_reindex(&self, batch_size: usize) -> Result<ReindexReport> {
        let provider = self.provider();
        let model = provider.model_id().to_string();
        let batch_size = if batch_size == 0 {
            self.config.embedding.batch_size
        } else {
            batch_size
        }
        .max(1);

        let mut report = ReindexReport {
            model: model.clone(),
            ..Default::default()
        };
        let pending: Vec<(NodeId, String)> = {
            let graph = self.store.snapshot();
            let mut pending = Vec::new();
            for node in graph.nodes() {
                match node.embedding_text() {
                    None => report.skipped += 1,
                    Some(text) => {
                        let current = node.embedding.as_ref().is_some_and(|e| e.model == model);
                        if !current {
                            pending.push((node.id, text));
                        }
                    }
                }
            }
            pending.sort_by_key(|(id, _)| *id);
            pending
        };

        let batches: Vec<Vec<(NodeId, String)>> = pending
            .chunks(batch_size)
            .map(|chunk| chunk.to_vec())
            .collect();
        report.batches = batches.len();
        info!(%model, nodes = pending.len(), batches = report.batches, "reindexing");

        let mut results = stream::iter(batches)
            .map(|batch| {
                let provider = Arc::clone(&provider);
                async move {
                    let (ids, texts): (Vec<NodeId>, Vec<String>) = batch.into_iter().unzip();
                    let vectors = self.with_timeout(provider.embed_batch(&texts)).await;
                    (ids, vectors)
                }
            })
            .buffer_unordered(self.config.embedding.max_concurrency.max(1));

        while let Some((ids, vectors)) = results.next().await {
            match vectors {
                Ok(vectors) if vectors.len() == ids.len() => {
                    report.indexed += self.store_vectors(&model, ids.into_iter().zip(vectors).collect())?;
                }
                Ok(vectors) => {
                    warn!(expected = ids.len(), got = vectors.len(), "provider returned wrong batch size");
                    report.failed += ids.len();
                }
                Err(e) => {
                    warn!(error = %e, nodes = ids.len(), "embedding batch failed");
                    report.failed += ids.len();
                }
            }
        }

        info!(
            %model,
            indexed = report.indexed,
            failed = report.failed,
            "reindex finished"
        );
        Ok(report)
    }

    /// Rank nodes by similarity to `text`.
    ///
    /// Only vectors produced by the active model are compared. While degraded,
    /// results come from keyword overlap and say so in [`SearchMode`].
    pub async fn semantic_search(
        &self,
        text: &str,
        type_filter: Option<NodeType>,
        top_k: usize,
    ) -> Result<SemanticResults> {
        if self.is_degraded() {
            return Ok(self.keyword_search(
                text,
                type_filter,
                top_k,
                "embedding model changed; reindex pending",
            ));
        }

        let provider = self.provider();
        let model = provider.model_id().to_string();
        let query = self.with_timeout(provider.embed(text)).await?;

        let graph = self.store.snapshot();
        let mut hits: Vec<SemanticHit> = graph
            .nodes()
            .filter(|n| type_filter.map_or(true, |t| n.node_type == t))
            .filter_map(|n| {
                let embedding = n.embedding.as_ref()?;
                if embedding.model != model || embedding.vector.len() != query.len() {
                    return None;
                }
                Some(SemanticHit {
                    node_id: n.id,
                    name: n.name.clone(),
                    node_type: n.node_type,
                    description: n.description.clone(),
                    score: cosine_similarity(&query, &embedding.vector),
                })
            })
            .collect();
        rank(&mut hits, top_k);

        Ok(SemanticResults {
            query: text.to_string(),
            mode: SearchMode::Vector { model },
            hits,
        })
    }

    /// Index health.
    pub fn status(&self) -> IndexStatus {
        let provider = self.provider();
        let model = provider.model_id().to_string();
        let graph = self.store.snapshot();

        let mut indexed = 0;
        let mut pending = 0;
        for node in graph.nodes() {
            let current = node.embedding.as_ref().is_some_and(|e| e.model == model);
            if current {
                indexed += 1;
            } else if node.embedding_text().is_some() {
                pending += 1;
            }
        }

        let state = self.state.read();
        IndexStatus {
            model,
            dimension: provider.dimension(),
            indexed,
            pending,
            degraded: state.degraded,
            reindexing: state.reindexing,
        }
    }

    fn keyword_search(
        &self,
        text: &str,
        type_filter: Option<NodeType>,
        top_k: usize,
        reason: &str,
    ) -> SemanticResults {
        let terms = search_terms(text);
        let graph = self.store.snapshot();

        let mut hits: Vec<SemanticHit> = if terms.is_empty() {
            Vec::new()
        } else {
            graph
                .nodes()
                .filter(|n| type_filter.map_or(true, |t| n.node_type == t))
                .filter_map(|n| {
                    let haystack = search_terms(&format!(
                        "{} {} {}",
                        n.name,
                        n.aliases.join(" "),
                        n.description
                    ));
                    let matched = terms.iter().filter(|t| haystack.contains(*t)).count();
                    (matched > 0).then(|| SemanticHit {
                        node_id: n.id,
                        name: n.name.clone(),
                        node_type: n.node_type,
                        description: n.description.clone(),
                        score: matched as f32 / terms.len() as f32,
                    })
                })
                .collect()
        };
        rank(&mut hits, top_k);

        SemanticResults {
            query: text.to_string(),
            mode: SearchMode::KeywordFallback {
                reason: reason.to_string(),
            },
            hits,
        }
    }

    /// Write vectors for nodes that still exist, as long as `model` is still
    /// the active one. Returns how many were stored.
    fn store_vectors(&self, model: &str, vectors: Vec<(NodeId, Vec<f32>)>) -> Result<usize> {
        if self.model_id() != model {
            return Err(NarrativeError::Embedding(format!(
                "provider changed from '{}' while indexing",
                model
            )));
        }
        self.store.write(|graph| {
            let mut stored = 0;
            for (id, vector) in vectors {
                if graph.node(id).is_some() {
                    graph.set_embedding(id, NodeEmbedding::new(vector, model))?;
                    stored += 1;
                }
            }
            Ok(stored)
        })
    }

    fn clear_foreign_vectors(&self) -> Result<usize> {
        let model = self.model_id();
        let stale = self
            .store
            .snapshot()
            .nodes()
            .any(|n| n.embedding.as_ref().is_some_and(|e| e.model != model));
        if !stale {
            return Ok(0);
        }
        Ok(self
            .store
            .write(|graph| Ok::<_, NarrativeError>(graph.clear_stale_embeddings(&model)))?)
    }

    async fn with_timeout<T>(&self, call: impl Future<Output = Result<T>>) -> Result<T> {
        let limit = self.config.embedding.timeout_ms;
        tokio::time::timeout(Duration::from_millis(limit), call)
            .await
            .map_err(|_| NarrativeError::EmbeddingTimeout(limit))?
    }
}

fn rank(hits: &mut Vec<SemanticHit>, top_k: usize) {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.name.cmp(&b.name))
    });
    hits.truncate(top_k);
}

fn search_terms(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 3 && !STOPWORDS.contains(w))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use story_graph::{Node, StoryGraph};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Provider that fails every call.
    struct FailingProvider;

    #[async_trait]
    impl EmbeddingProvider for FailingProvider {
        fn model_id(&self) -> &str {
            "failing"
        }

        fn dimension(&self) -> usize {
            8
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Err(NarrativeError::Embedding("offline".to_string()))
        }
    }

    /// Counts batch calls and records peak concurrency.
    struct CountingProvider {
        inner: HashingEmbeddingProvider,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for CountingProvider {
        fn model_id(&self) -> &str {
            self.inner.model_id()
        }

        fn dimension(&self) -> usize {
            self.inner.dimension()
        }

        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            self.inner.embed(text).await
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            let out = self.inner.embed_batch(texts).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            out
        }
    }

    fn story_store() -> Arc<GraphStore> {
        let mut graph = StoryGraph::new();
        graph
            .add_node(Node::character("Mara").with_description("A smuggler who runs a fast ship out of the harbor"))
            .unwrap();
        graph
            .add_node(Node::character("Jon").with_description("A disgraced knight who guards the temple"))
            .unwrap();
        graph
            .add_node(Node::new(NodeType::Location, "Harbor").with_description("Fog-bound docks full of ships"))
            .unwrap();
        graph.add_node(Node::character("Nobody")).unwrap();
        Arc::new(GraphStore::new(graph))
    }

    fn index(store: Arc<GraphStore>, provider: Arc<dyn EmbeddingProvider>) -> EmbeddingIndex {
        EmbeddingIndex::new(store, provider, Arc::new(NarrativeConfig::default())).unwrap()
    }

    #[tokio::test]
    async fn test_index_node_requires_description() {
        let store = story_store();
        let nobody = store.snapshot().node_by_name(NodeType::Character, "Nobody").unwrap().id;
        let index = index(store, Arc::new(HashingEmbeddingProvider::new(64)));

        let err = index.index_node(nobody).await.unwrap_err();
        assert!(matches!(err, NarrativeError::MissingDescription(id) if id == nobody));

        let err = index.index_node(NodeId::new()).await.unwrap_err();
        assert!(matches!(err, NarrativeError::Graph(_)));
    }

    #[tokio::test]
    async fn test_reindex_and_search() {
        let store = story_store();
        let index = index(Arc::clone(&store), Arc::new(HashingEmbeddingProvider::new(256)));

        let report = index.reindex_all(2).await.unwrap();
        assert_eq!(report.indexed, 3);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.failed, 0);

        let results = index
            .semantic_search("smuggler ship", Some(NodeType::Character), 5)
            .await
            .unwrap();
        assert_eq!(results.mode, SearchMode::Vector { model: index.model_id() });
        assert_eq!(results.hits[0].name, "Mara");
        assert!(results.hits.iter().all(|h| h.node_type == NodeType::Character));
    }

    #[tokio::test]
    async fn test_reindex_is_idempotent() {
        let store = story_store();
        let index = index(store, Arc::new(HashingEmbeddingProvider::new(64)));

        assert_eq!(index.reindex_all(10).await.unwrap().indexed, 3);
        let second = index.reindex_all(10).await.unwrap();
        assert_eq!(second.indexed, 0);
        assert_eq!(second.batches, 0);
        assert_eq!(index.status().indexed, 3);
    }

    #[tokio::test]
    async fn test_search_never_mixes_models() {
        let store = story_store();
        let index = index(Arc::clone(&store), Arc::new(HashingEmbeddingProvider::with_seed(64, 1)));
        index.reindex_all(10).await.unwrap();

        let old_model = index.model_id();
        index
            .switch_provider(Arc::new(HashingEmbeddingProvider::with_seed(64, 2)))
            .unwrap();

        // Mid-reindex: degraded keyword results, never cross-model scores.
        let results = index.semantic_search("smuggler", None, 5).await.unwrap();
        assert!(results.mode.is_degraded());
        assert!(store
            .snapshot()
            .nodes()
            .all(|n| n.embedding.as_ref().map_or(true, |e| e.model != old_model)));

        index.reindex_all(10).await.unwrap();
        let results = index.semantic_search("smuggler", None, 5).await.unwrap();
        assert_eq!(results.mode, SearchMode::Vector { model: index.model_id() });
        let graph = store.snapshot();
        for hit in &results.hits {
            let embedding = graph.node(hit.node_id).unwrap().embedding.as_ref().unwrap();
            assert_eq!(embedding.model, index.model_id());
        }
    }

    #[tokio::test]
    async fn test_failed_reindex_stays_degraded() {
        let store = story_store();
        let index = index(store, Arc::new(HashingEmbeddingProvider::new(64)));
        index.switch_provider(Arc::new(FailingProvider)).unwrap();

        let report = index.reindex_all(2).await.unwrap();
        assert_eq!(report.failed, 3);
        assert!(index.is_degraded());

        let results = index.semantic_search("harbor", None, 5).await.unwrap();
        assert!(results.mode.is_degraded());
        assert_eq!(results.hits[0].name, "Harbor");
    }

    #[tokio::test]
    async fn test_foreign_vectors_cleared_on_construction() {
        let store = story_store();
        let mara = store.snapshot().node_by_name(NodeType::Character, "Mara").unwrap().id;
        store
            .write(|g| g.set_embedding(mara, NodeEmbedding::new(vec![1.0; 64], "legacy-model")))
            .unwrap();

        let index = index(Arc::clone(&store), Arc::new(HashingEmbeddingProvider::new(64)));
        assert!(index.is_degraded());
        assert!(store.snapshot().node(mara).unwrap().embedding.is_none());
    }

    #[tokio::test]
    async fn test_reindex_concurrency_is_bounded() {
        let mut graph = StoryGraph::new();
        for i in 0..20 {
            graph
                .add_node(Node::character(format!("Extra {i}")).with_description(format!("Crowd member number {i}")))
                .unwrap();
        }
        let provider = Arc::new(CountingProvider {
            inner: HashingEmbeddingProvider::new(32),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        });
        let index = index(Arc::new(GraphStore::new(graph)), provider.clone());

        let report = index.reindex_all(3).await.unwrap();
        assert_eq!(report.indexed, 20);
        assert_eq!(report.batches, 7);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 7);
        assert!(provider.peak.load(Ordering::SeqCst) <= NarrativeConfig::default().embedding.max_concurrency);
    }
}
