//! Stage runtime context.
//!
//! The context is how the driver's performance model reaches every stage in
//! the chain: each stage registers its node during initialization and passes
//! the child context to its own upstream, so the whole pipeline reports into
//! one tree.

use crate::model::{Model, NodeId};
use crate::observability::ResourceRegistry;
use std::sync::Arc;

/// Runtime context passed to stages during initialization and pulls.
#[derive(Clone)]
pub struct StageContext {
    /// Name of the pipeline this context belongs to.
    name: String,
    /// Shared performance model, when autotuning is active.
    model: Option<Arc<Model>>,
    /// The node of the downstream (consuming) stage.
    parent: Option<NodeId>,
    /// Shared external resource registry.
    registry: Option<Arc<ResourceRegistry>>,
}

impl StageContext {
    /// Create a bare context with no model attached.
    ///
    /// Stages must run unchanged without a model; counter recording becomes
    /// a no-op in that case.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model: None,
            parent: None,
            registry: None,
        }
    }

    /// Create a context carrying the shared model, rooted at `parent`.
    pub fn with_model(
        name: impl Into<String>,
        model: Arc<Model>,
        parent: NodeId,
        registry: Arc<ResourceRegistry>,
    ) -> Self {
        Self {
            name: name.into(),
            model: Some(model),
            parent: Some(parent),
            registry: Some(registry),
        }
    }

    /// Get the pipeline name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the shared model, if autotuning is active.
    pub fn model(&self) -> Option<&Arc<Model>> {
        self.model.as_ref()
    }

    /// Get the downstream stage's node handle.
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Get the shared resource registry, if one is attached.
    pub fn registry(&self) -> Option<&Arc<ResourceRegistry>> {
        self.registry.as_ref()
    }

    /// Register a node for the calling stage and return it together with the
    /// context its upstream should receive.
    ///
    /// Returns `None` for the node when no model is attached; the returned
    /// context is then a plain copy of this one.
    pub fn register_node(&self, stage_name: &str, ratio: f64) -> (Option<NodeId>, StageContext) {
        match (&self.model, self.parent) {
            (Some(model), Some(parent)) => {
                let id = model.add_node(parent, format!("{}::{}", self.name, stage_name), ratio);
                let mut child = self.clone();
                child.parent = Some(id);
                (Some(id), child)
            }
            _ => (None, self.clone()),
        }
    }
}

impl std::fmt::Debug for StageContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageContext")
            .field("name", &self.name)
            .field("has_model", &self.model.is_some())
            .field("parent", &self.parent)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_context() {
        let ctx = StageContext::new("pipeline");
        assert_eq!(ctx.name(), "pipeline");
        assert!(ctx.model().is_none());

        let (node, child) = ctx.register_node("stage", 1.0);
        assert!(node.is_none());
        assert!(child.model().is_none());
    }

    #[test]
    fn test_register_node_chains_parents() {
        let model = Arc::new(Model::new());
        let registry = Arc::new(ResourceRegistry::new());
        let root = model.add_root("pipeline::Model", 1.0);
        let ctx = StageContext::with_model("pipeline", model.clone(), root, registry);

        let (mid, mid_ctx) = ctx.register_node("transform", 1.0);
        let (leaf, _) = mid_ctx.register_node("source", 1.0);

        assert!(mid.is_some());
        assert!(leaf.is_some());
        assert_eq!(model.num_nodes(), 3);
        assert_eq!(mid_ctx.parent(), mid);
    }
}
