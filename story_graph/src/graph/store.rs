//! Graph Store - single-writer ownership of the live graph.
//!
//! Readers take a [`StoryGraph`] snapshot and never block each other or the
//! writer. Writers are serialized, mutate a private copy and publish it only
//! when the whole mutation succeeded, so a failed write leaves no trace.

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::StoryGraph;

/// Owner of the live story graph.
pub struct GraphStore {
    current: ArcSwap<StoryGraph>,
    writer: Mutex<()>,
    version: AtomicU64,
}

impl GraphStore {
    /// Wrap an existing graph.
    pub fn new(graph: StoryGraph) -> Self {
        Self {
            current: ArcSwap::from_pointee(graph),
            writer: Mutex::new(()),
            version: AtomicU64::new(0),
        }
    }

    /// A consistent, immutable view of the graph.
    pub fn snapshot(&self) -> Arc<StoryGraph> {
        self.current.load_full()
    }

    /// Incremented after every successful write.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Apply a mutation atomically.
    ///
    /// The closure runs against a copy of the current graph. If it returns an
    /// error, the copy is dropped and the published graph is unchanged.
    pub fn write<T, E>(&self, mutate: impl FnOnce(&mut StoryGraph) -> Result<T, E>) -> Result<T, E> {
        let _guard = self.writer.lock();
        let mut next = StoryGraph::clone(&self.current.load_full());
        let output = mutate(&mut next)?;
        self.current.store(Arc::new(next));
        self.version.fetch_add(1, Ordering::AcqRel);
        Ok(output)
    }
}

impl Default for GraphStore {
    fn default() -> Self {
        Self::new(StoryGraph::new())
    }
}

impl std::fmt::Debug for GraphStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let graph = self.snapshot();
        f.debug_struct("GraphStore")
            .field("version", &self.version())
            .field("nodes", &graph.node_count())
            .field("edges", &graph.edge_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Edge, GraphError, Node, NodeId, RelationType};

    #[test]
    fn test_write_publishes_on_success() {
        let store = GraphStore::default();
        let before = store.snapshot();

        let id = store
            .write(|g| g.add_node(Node::character("Mara")))
            .unwrap();

        assert_eq!(before.node_count(), 0, "old snapshots are immutable");
        assert!(store.snapshot().node(id).is_some());
        assert_eq!(store.version(), 1);
    }

    #[test]
    fn test_failed_write_leaves_no_partial_mutation() {
        let store = GraphStore::default();

        let result: Result<(), GraphError> = store.write(|g| {
            let mara = g.add_node(Node::character("Mara"))?;
            g.add_edge(Edge::new(mara, NodeId::new(), RelationType::Knows))?;
            Ok(())
        });

        assert!(result.is_err());
        assert_eq!(store.snapshot().node_count(), 0);
        assert_eq!(store.version(), 0);
    }

    #[test]
    fn test_concurrent_readers_and_writer() {
        let store = Arc::new(GraphStore::default());
        let mut handles = Vec::new();

        for i in 0..4 {
            let store = Arc::clone(&store);
            handles.push(std::thread::spawn(move || {
                for j in 0..25 {
                    store
                        .write(|g| g.add_node(Node::character(format!("C{i}-{j}"))))
                        .unwrap();
                    let snapshot = store.snapshot();
                    assert!(snapshot.node_count() >= j + 1);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.snapshot().node_count(), 100);
        assert_eq!(store.version(), 100);
    }
}
