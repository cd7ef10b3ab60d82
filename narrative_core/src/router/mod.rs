//! Knowledge Router - the query facade.
//!
//! A query runs in four steps:
//! 1. **Classify**: intent, entities and keywords from the query text
//! 2. **Retrieve**: ego networks from the graph snapshot, then the story bible,
//!    decision log and semantic search concurrently
//! 3. **Guard**: each external source runs under its own timeout and the
//!    caller's deadline; a source that fails is recorded and its section left out
//! 4. **Assemble**: hand everything to the [`ContextAssembler`]
//!
//! The router also exposes the index, traversal and analytics operations over
//! the same graph store.

mod graph_context;

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use story_graph::{EgoNetwork, GraphStore, NodeType};

use crate::analyzer::{BridgeCharacter, CommunityReport, GraphAnalyzer, PacingReport, TensionReport};
use crate::classifier::{ClassifiedQuery, EntityDictionary, QueryClassifier, RetrievalSource};
use crate::config::NarrativeConfig;
use crate::context_assembler::{
    AssembledContext, AssemblyManifest, ContextAssembler, GraphContext, SourceOutcome, SourceStatus,
};
use crate::embedding::{EmbeddingIndex, ReindexReport, SemanticResults};
use crate::error::{NarrativeError, Result};
use crate::sources::{KnowledgeSource, SourceEntry};

const STORY_BIBLE: &str = "story_bible";
const DECISION_LOG: &str = "decision_log";
const SEMANTIC_SEARCH: &str = "semantic_search";

/// Answer to one query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub classification: ClassifiedQuery,
    pub context: AssembledContext,
}

impl QueryResponse {
    pub fn text(&self) -> &str {
        &self.context.text
    }

    pub fn manifest(&self) -> &AssemblyManifest {
        &self.context.manifest
    }
}

/// Routes queries across the graph, the embedding index and external sources.
pub struct KnowledgeRouter {
    config: Arc<NarrativeConfig>,
    store: Arc<GraphStore>,
    classifier: QueryClassifier,
    index: Arc<EmbeddingIndex>,
    analyzer: GraphAnalyzer,
    assembler: ContextAssembler,
    story_bible: Option<Arc<dyn KnowledgeSource>>,
    decision_log: Option<Arc<dyn KnowledgeSource>>,
    /// Graph version the classifier's dictionary was built from.
    dictionary_version: AtomicU64,
}

impl KnowledgeRouter {
    pub fn new(config: Arc<NarrativeConfig>, store: Arc<GraphStore>, index: Arc<EmbeddingIndex>) -> Self {
        let version = store.version();
        let classifier = QueryClassifier::from_graph(Arc::clone(&config), &store.snapshot());
        Self {
            analyzer: GraphAnalyzer::new(Arc::clone(&config)),
            assembler: ContextAssembler::new(Arc::clone(&config)),
            config,
            store,
            classifier,
            index,
            story_bible: None,
            decision_log: None,
            dictionary_version: AtomicU64::new(version),
        }
    }

    pub fn with_story_bible(mut self, source: Arc<dyn KnowledgeSource>) -> Self {
        self.story_bible = Some(source);
        self
    }

    pub fn with_decision_log(mut self, source: Arc<dyn KnowledgeSource>) -> Self {
        self.decision_log = Some(source);
        self
    }

    /// Replace the assembler, e.g. to register exact tokenizers.
    pub fn with_assembler(mut self, assembler: ContextAssembler) -> Self {
        self.assembler = assembler;
        self
    }

    pub fn store(&self) -> &Arc<GraphStore> {
        &self.store
    }

    pub fn index(&self) -> &Arc<EmbeddingIndex> {
        &self.index
    }

    /// Classify without retrieving.
    pub fn classify(&self, text: &str) -> ClassifiedQuery {
        self.refresh_if_stale();
        self.classifier.classify(text)
    }

    /// Answer `text` for `model`, with only per-source timeouts.
    #[instrument(skip(self, text), fields(model = %model))]
    pub async fn query(&self, text: &str, model: &str) -> QueryResponse {
        self.run(text, model, None).await
    }

    /// Answer `text` for `model`. Sources that have not returned when
    /// `deadline` elapses are cancelled and reported as such.
    #[instrument(skip(self, text), fields(model = %model, deadline_ms = deadline.as_millis() as u64))]
    pub async fn query_with_deadline(&self, text: &str, model: &str, deadline: Duration) -> QueryResponse {
        // A deadline too far out to represent is no deadline.
        self.run(text, model, Instant::now().checked_add(deadline)).await
    }

    async fn run(&self, text: &str, model: &str, deadline: Option<Instant>) -> QueryResponse {
        let classification = self.classify(text);
        let snapshot = self.store.snapshot();

        let graph_context = if classification.uses(RetrievalSource::Graph) {
            let router = &self.config.router;
            graph_context::gather(&snapshot, &classification, router.ego_radius, &router.activation)
        } else {
            GraphContext::default()
        };

        let (bible, decisions, semantic) = tokio::join!(
            self.fetch_entries(
                self.story_bible.as_ref(),
                STORY_BIBLE,
                RetrievalSource::StoryBible,
                &classification,
                deadline
            ),
            self.fetch_entries(
                self.decision_log.as_ref(),
                DECISION_LOG,
                RetrievalSource::DecisionLog,
                &classification,
                deadline
            ),
            self.fetch_semantic(&classification, deadline),
        );
        let (bible, bible_outcome) = bible;
        let (decisions, decision_outcome) = decisions;
        let (semantic, semantic_outcome) = semantic;

        let mut context = self.assembler.assemble(
            &classification,
            &graph_context,
            &bible,
            &decisions,
            semantic.as_ref(),
            model,
        );
        context.manifest.source_outcomes = vec![bible_outcome, decision_outcome, semantic_outcome];

        debug!(
            query_type = ?classification.query_type,
            total_tokens = context.manifest.total_tokens,
            missing = context.manifest.missing_entities.len(),
            "query answered"
        );

        QueryResponse {
            classification,
            context,
        }
    }

    async fn fetch_entries(
        &self,
        source: Option<&Arc<dyn KnowledgeSource>>,
        fallback_name: &str,
        kind: RetrievalSource,
        query: &ClassifiedQuery,
        deadline: Option<Instant>,
    ) -> (Vec<SourceEntry>, SourceOutcome) {
        let Some(source) = source else {
            return (Vec::new(), SourceOutcome::new(fallback_name, SourceStatus::Skipped));
        };
        let name = source.name().to_string();
        if !query.uses(kind) {
            return (Vec::new(), SourceOutcome::new(name, SourceStatus::Skipped));
        }

        let limit = self.config.router.max_source_entries;
        let call = source.relevant_entries(&query.keywords, &query.entities, limit);
        match self.guarded(&name, deadline, call).await {
            Ok(entries) => {
                let status = SourceStatus::Ok {
                    entries: entries.len(),
                };
                (entries, SourceOutcome::new(name, status))
            }
            Err(status) => (Vec::new(), SourceOutcome::new(name, status)),
        }
    }

    async fn fetch_semantic(
        &self,
        query: &ClassifiedQuery,
        deadline: Option<Instant>,
    ) -> (Option<SemanticResults>, SourceOutcome) {
        if !query.requires_semantic {
            return (None, SourceOutcome::new(SEMANTIC_SEARCH, SourceStatus::Skipped));
        }

        // Core entities are filtered out of the results, so ask for enough to
        // survive that.
        let top_k = self.config.assembler.max_semantic_results + query.entities.len();
        let call = self.index.semantic_search(&query.text, None, top_k);
        match self.guarded(SEMANTIC_SEARCH, deadline, call).await {
            Ok(results) => {
                let status = SourceStatus::Ok {
                    entries: results.hits.len(),
                };
                (Some(results), SourceOutcome::new(SEMANTIC_SEARCH, status))
            }
            Err(status) => (None, SourceOutcome::new(SEMANTIC_SEARCH, status)),
        }
    }

    /// Run a source call under the per-source timeout and the caller's
    /// deadline, whichever comes first. The call is dropped when either expires.
    async fn guarded<T>(
        &self,
        source: &str,
        deadline: Option<Instant>,
        call: impl Future<Output = Result<T>>,
    ) -> std::result::Result<T, SourceStatus> {
        let timeout_ms = self.config.router.source_timeout_ms;
        let own_limit = Instant::now().checked_add(Duration::from_millis(timeout_ms));
        let limit = match (deadline, own_limit) {
            (Some(deadline), Some(own)) if deadline < own => Some((deadline, true)),
            (_, Some(own)) => Some((own, false)),
            (Some(deadline), None) => Some((deadline, true)),
            (None, None) => None,
        };
        let Some((limit, by_deadline)) = limit else {
            return call.await.map_err(|e| {
                warn!(source, error = %e, "retrieval source failed; section omitted");
                SourceStatus::Failed {
                    message: e.to_string(),
                }
            });
        };

        match tokio::time::timeout_at(limit, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                warn!(source, error = %e, "retrieval source failed; section omitted");
                Err(SourceStatus::Failed {
                    message: e.to_string(),
                })
            }
            Err(_) if by_deadline => {
                warn!(source, "retrieval source cancelled at caller deadline");
                Err(SourceStatus::Cancelled)
            }
            Err(_) => {
                warn!(source, timeout_ms, "retrieval source timed out; section omitted");
                Err(SourceStatus::TimedOut { after_ms: timeout_ms })
            }
        }
    }

    /// Rebuild the classifier's entity dictionary from the current graph.
    pub fn refresh_entities(&self) {
        let version = self.store.version();
        let dictionary = EntityDictionary::from_graph(&self.store.snapshot());
        let entities = dictionary.len();
        self.classifier.update_entities(dictionary);
        self.dictionary_version.store(version, Ordering::Release);
        debug!(version, entities, "entity dictionary refreshed");
    }

    fn refresh_if_stale(&self) {
        if self.dictionary_version.load(Ordering::Acquire) != self.store.version() {
            self.refresh_entities();
        }
    }

    pub async fn semantic_search(
        &self,
        text: &str,
        type_filter: Option<NodeType>,
        top_k: usize,
    ) -> Result<SemanticResults> {
        self.index.semantic_search(text, type_filter, top_k).await
    }

    /// Ego network of the node named `name` (any type, aliases allowed).
    pub fn ego_network(&self, name: &str, radius: usize) -> Result<EgoNetwork> {
        let graph = self.store.snapshot();
        let center = graph
            .find_by_name(name)
            .first()
            .map(|n| n.id)
            .ok_or_else(|| NarrativeError::UnknownEntity(name.to_string()))?;
        Ok(graph.ego_network_with(center, radius, &self.config.router.activation)?)
    }

    /// Re-embed every described node. Safe to repeat.
    pub async fn reindex_all(&self, batch_size: usize) -> Result<ReindexReport> {
        let report = self.index.reindex_all(batch_size).await?;
        info!(indexed = report.indexed, failed = report.failed, "reindex finished");
        Ok(report)
    }

    pub fn communities(&self) -> CommunityReport {
        self.analyzer.detect_communities(&self.store.snapshot())
    }

    pub fn bridge_characters(&self) -> Vec<BridgeCharacter> {
        self.analyzer.find_bridge_characters(&self.store.snapshot())
    }

    pub fn tension(&self) -> TensionReport {
        self.analyzer.calculate_tension(&self.store.snapshot())
    }

    pub fn pacing(&self) -> PacingReport {
        self.analyzer.calculate_pacing(&self.store.snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::QueryType;
    use crate::context_assembler::{BudgetStatus, OmissionReason, SectionKind, SectionStatus};
    use crate::embedding::HashingEmbeddingProvider;
    use crate::sources::InMemoryKnowledgeSource;
    use async_trait::async_trait;
    use story_graph::{CharacterCore, Edge, Node, RelationType, StoryGraph};

    struct FailingSource;

    #[async_trait]
    impl KnowledgeSource for FailingSource {
        fn name(&self) -> &str {
            "decision_log"
        }

        async fn relevant_entries(&self, _: &[String], _: &[String], _: usize) -> Result<Vec<SourceEntry>> {
            Err(NarrativeError::source_failure("decision_log", "connection refused"))
        }
    }

    struct SlowSource;

    #[async_trait]
    impl KnowledgeSource for SlowSource {
        fn name(&self) -> &str {
            "story_bible"
        }

        async fn relevant_entries(&self, _: &[String], _: &[String], _: usize) -> Result<Vec<SourceEntry>> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(vec![SourceEntry::new("Late", "Never arrives")])
        }
    }

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    fn harbor() -> StoryGraph {
        let mut graph = StoryGraph::new();
        let mara = graph
            .add_node(
                Node::character("Mara")
                    .with_description("A smuggler who owes the harbor guild.")
                    .with_core(CharacterCore {
                        weakness: Some("Trusts no one".to_string()),
                        ..Default::default()
                    }),
            )
            .unwrap();
        let jon = graph
            .add_node(Node::character("Jon").with_description("A disgraced harbor pilot."))
            .unwrap();
        graph
            .add_edge(Edge::new(mara, jon, RelationType::Hinders).with_description("refuses him passage"))
            .unwrap();
        graph
            .add_node(Node::new(NodeType::WorldRule, "Tithe").with_description("Guild members pay at the full moon."))
            .unwrap();
        graph
    }

    fn router_with(config: NarrativeConfig, graph: StoryGraph) -> KnowledgeRouter {
        let config = Arc::new(config);
        let store = Arc::new(GraphStore::new(graph));
        let index = EmbeddingIndex::new(
            Arc::clone(&store),
            Arc::new(HashingEmbeddingProvider::default()),
            Arc::clone(&config),
        )
        .unwrap();
        KnowledgeRouter::new(config, store, Arc::new(index))
    }

    fn outcome<'a>(response: &'a QueryResponse, source: &str) -> &'a SourceOutcome {
        response
            .manifest()
            .source_outcomes
            .iter()
            .find(|o| o.source == source)
            .unwrap()
    }

    #[tokio::test]
    async fn test_who_is_mara() {
        init_tracing();
        let mut config = NarrativeConfig::default();
        config.assembler.model_budgets.insert("tiny".to_string(), 200);
        let router = router_with(config, harbor());

        let response = router.query("Who is Mara?", "tiny").await;

        assert_eq!(response.classification.query_type, QueryType::CharacterLookup);
        assert_eq!(response.classification.entities, vec!["Mara"]);
        assert!(response.text().contains("A smuggler who owes the harbor guild."));
        assert!(response.text().contains("Trusts no one"));
        assert!(response.manifest().total_tokens <= 200);
        assert_eq!(outcome(&response, SEMANTIC_SEARCH).status, SourceStatus::Skipped);
    }

    #[tokio::test]
    async fn test_relationship_query() {
        let router = router_with(NarrativeConfig::default(), harbor());

        let response = router
            .query("Mara and Jon: how does she feel about him?", "unknown-model")
            .await;

        assert_eq!(response.classification.query_type, QueryType::Relationship);
        assert_eq!(response.classification.entities, vec!["Mara", "Jon"]);
        assert!(response.text().contains("Mara HINDERS Jon: refuses him passage"));
        assert!(response.text().contains("A disgraced harbor pilot."));
        assert_eq!(response.manifest().budget, 4_096);
    }

    #[tokio::test]
    async fn test_failed_source_omits_section() {
        let bible = InMemoryKnowledgeSource::with_entries(
            "story_bible",
            [SourceEntry::new("Mara", "Mara never sails at night.")],
        );
        let router = router_with(NarrativeConfig::default(), harbor())
            .with_story_bible(Arc::new(bible))
            .with_decision_log(Arc::new(FailingSource));

        let response = router.query("What is Mara's fatal flaw?", "default").await;

        assert_eq!(response.classification.query_type, QueryType::CharacterDeep);
        assert!(matches!(
            outcome(&response, "decision_log").status,
            SourceStatus::Failed { .. }
        ));
        assert_eq!(
            outcome(&response, "story_bible").status,
            SourceStatus::Ok { entries: 1 }
        );
        assert_eq!(
            response.manifest().section(SectionKind::DecisionLog).unwrap().status,
            SectionStatus::Omitted {
                reason: OmissionReason::Empty
            }
        );
        assert!(response.text().contains("Trusts no one"));
        assert!(response.text().contains("Mara never sails at night."));
    }

    #[tokio::test]
    async fn test_slow_source_times_out() {
        init_tracing();
        let mut config = NarrativeConfig::default();
        config.router.source_timeout_ms = 50;
        let router = router_with(config, harbor()).with_story_bible(Arc::new(SlowSource));

        let started = std::time::Instant::now();
        let response = router.query("Who is Mara?", "default").await;

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(
            outcome(&response, "story_bible").status,
            SourceStatus::TimedOut { after_ms: 50 }
        );
        assert!(response.text().contains("A smuggler"));
    }

    #[tokio::test]
    async fn test_deadline_cancels_pending_sources() {
        let router = router_with(NarrativeConfig::default(), harbor())
            .with_story_bible(Arc::new(SlowSource))
            .with_decision_log(Arc::new(InMemoryKnowledgeSource::new("decision_log")));

        let response = router
            .query_with_deadline("Tell me everything", "default", Duration::from_millis(30))
            .await;

        assert_eq!(response.classification.query_type, QueryType::Hybrid);
        assert_eq!(outcome(&response, "story_bible").status, SourceStatus::Cancelled);
        assert_eq!(
            outcome(&response, "decision_log").status,
            SourceStatus::Ok { entries: 0 }
        );
        assert!(outcome(&response, SEMANTIC_SEARCH).is_ok());
    }

    #[tokio::test]
    async fn test_unbounded_deadline_is_no_deadline() {
        let router = router_with(NarrativeConfig::default(), harbor())
            .with_decision_log(Arc::new(InMemoryKnowledgeSource::new("decision_log")));

        let response = router
            .query_with_deadline("Tell me everything", "default", Duration::MAX)
            .await;

        assert_eq!(response.classification.query_type, QueryType::Hybrid);
        assert_eq!(
            outcome(&response, "decision_log").status,
            SourceStatus::Ok { entries: 0 }
        );
        assert!(outcome(&response, SEMANTIC_SEARCH).is_ok());
        assert_eq!(response.manifest().budget_status, BudgetStatus::WithinBudget);
    }

    #[tokio::test]
    async fn test_unbounded_source_timeout() {
        let mut config = NarrativeConfig::default();
        config.router.source_timeout_ms = u64::MAX;
        let router = router_with(config, harbor())
            .with_decision_log(Arc::new(FailingSource));

        let response = router.query("What is Mara's fatal flaw?", "default").await;

        assert!(matches!(
            outcome(&response, "decision_log").status,
            SourceStatus::Failed { .. }
        ));
        assert!(response.text().contains("Trusts no one"));
    }

    #[tokio::test]
    async fn test_dictionary_follows_graph_version() {
        let router = router_with(NarrativeConfig::default(), harbor());
        assert!(router.classify("Who is Ilse?").entities.is_empty());

        router
            .store()
            .write(|g| g.add_node(Node::character("Ilse").with_description("A cartographer.")))
            .unwrap();

        let response = router.query("Who is Ilse?", "default").await;
        assert_eq!(response.classification.entities, vec!["Ilse"]);
        assert!(response.text().contains("A cartographer."));
    }

    #[tokio::test]
    async fn test_semantic_search_after_reindex() {
        let router = router_with(NarrativeConfig::default(), harbor());
        let report = router.reindex_all(2).await.unwrap();
        assert_eq!(report.indexed, 3);

        let results = router
            .semantic_search("harbor pilot", Some(NodeType::Character), 5)
            .await
            .unwrap();
        assert!(!results.mode.is_degraded());
        assert_eq!(results.hits.len(), 2);
        assert!(results.hits.iter().all(|h| h.node_type == NodeType::Character));
    }

    #[test]
    fn test_ego_network_by_name() {
        let router = router_with(NarrativeConfig::default(), harbor());

        let network = router.ego_network("mara", 1).unwrap();
        assert_eq!(network.members.len(), 2);

        assert!(matches!(
            router.ego_network("Nobody", 1),
            Err(NarrativeError::UnknownEntity(name)) if name == "Nobody"
        ));
    }

    #[test]
    fn test_analytics_over_live_graph() {
        let router = router_with(NarrativeConfig::default(), harbor());

        assert_eq!(router.communities().communities.len(), 1);
        assert_eq!(router.tension().active_hinders, 1);
        assert_eq!(router.bridge_characters().len(), 2);
        assert!(router.pacing().action > 0);
    }
}
