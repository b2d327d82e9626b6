//! Node registry interface.
//!
//! Nodes are the named, versioned units a step invokes (`shell@v1`). The
//! registry only answers what exists and which parameters a node declares;
//! running a node is the execution backend's concern. Instances are
//! constructed explicitly and injected into the validator and engine.

use std::collections::HashMap;

use crate::error::{Error, Result};

/// A parameter declared by a node.
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: String,
    pub required: bool,
    pub description: String,
}

impl ParamSpec {
    pub fn required(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            required: true,
            description: description.to_string(),
        }
    }

    pub fn optional(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            required: false,
            description: description.to_string(),
        }
    }
}

/// A registered node: its `name@version` identifier and parameter surface.
#[derive(Debug, Clone)]
pub struct NodeSpec {
    pub id: String,
    pub params: Vec<ParamSpec>,
}

impl NodeSpec {
    pub fn new(id: &str, params: Vec<ParamSpec>) -> Self {
        Self {
            id: id.to_string(),
            params,
        }
    }

    pub fn required_params(&self) -> impl Iterator<Item = &ParamSpec> {
        self.params.iter().filter(|p| p.required)
    }

    pub fn declares(&self, name: &str) -> bool {
        self.params.iter().any(|p| p.name == name)
    }
}

pub trait NodeRegistry: Send + Sync {
    /// Resolve a `name@version` identifier to its spec.
    fn get(&self, uses: &str) -> Result<NodeSpec>;
    /// All registered identifiers, sorted for stable output.
    fn list(&self) -> Vec<String>;
}

#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    nodes: HashMap<String, NodeSpec>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the nodes the local backend can run.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(NodeSpec::new(
            "shell@v1",
            vec![
                ParamSpec::required("run", "command line passed to the shell"),
                ParamSpec::optional("shell", "shell binary to use, default sh"),
            ],
        ));
        registry.register(NodeSpec::new(
            "echo@v1",
            vec![ParamSpec::required("message", "text to emit on stdout")],
        ));
        registry
    }

    pub fn register(&mut self, spec: NodeSpec) {
        self.nodes.insert(spec.id.clone(), spec);
    }
}

impl NodeRegistry for InMemoryRegistry {
    fn get(&self, uses: &str) -> Result<NodeSpec> {
        self.nodes
            .get(uses)
            .cloned()
            .ok_or_else(|| Error::NodeNotRegistered(uses.to_string()))
    }

    fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.nodes.keys().cloned().collect();
        ids.sort();
        ids
    }
}
