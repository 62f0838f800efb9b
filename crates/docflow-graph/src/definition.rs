//! Workflow definition model: statuses, nodes, edges and settings.

use crate::{GraphError, Result};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// A named document status a workflow can place an instance in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStatus {
    pub id: String,
    pub name: String,
    /// Display color (hex), carried for the surrounding application
    pub color: String,
    /// Reaching a node mapped to a final status completes the instance
    pub is_final: bool,
    /// The status an instance lands in right after start
    pub is_default: bool,
    /// Ordering hint for listings
    pub order: u32,
}

impl WorkflowStatus {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            color: "#808080".to_string(),
            is_final: false,
            is_default: false,
            order: 0,
        }
    }

    pub fn final_status(mut self) -> Self {
        self.is_final = true;
        self
    }

    pub fn default_status(mut self) -> Self {
        self.is_default = true;
        self
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = color.into();
        self
    }

    pub fn with_order(mut self, order: u32) -> Self {
        self.order = order;
        self
    }
}

/// A reviewer assignment on a review node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignee {
    pub id: String,
    pub name: String,
    pub email: String,
}

impl Assignee {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        email: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            email: email.into(),
        }
    }
}

/// An automatic side effect attached to an action node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionKind {
    MoveFile { target_folder_id: String },
    CopyFile { target_folder_id: String },
    NotifyUser { user_id: String, message: String },
    SendComment { message: String },
    UpdateMetadata { fields: serde_json::Value },
    Webhook { url: String },
}

/// A named action in a node's ordered action list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionSpec {
    pub name: String,
    #[serde(flatten)]
    pub kind: ActionKind,
}

impl ActionSpec {
    pub fn new(name: impl Into<String>, kind: ActionKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Type-specific payload of a workflow node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodePayload {
    Start,
    End,
    Status {
        status_id: String,
    },
    Decision,
    Action {
        actions: Vec<ActionSpec>,
    },
    Review {
        required_approvals: u32,
        assignees: Vec<Assignee>,
    },
    /// Like review, but all assignees are requested simultaneously
    Parallel {
        required_approvals: u32,
        assignees: Vec<Assignee>,
    },
    Timer {
        delay_secs: u64,
    },
}

impl NodePayload {
    pub fn type_name(&self) -> &'static str {
        match self {
            NodePayload::Start => "start",
            NodePayload::End => "end",
            NodePayload::Status { .. } => "status",
            NodePayload::Decision => "decision",
            NodePayload::Action { .. } => "action",
            NodePayload::Review { .. } => "review",
            NodePayload::Parallel { .. } => "parallel",
            NodePayload::Timer { .. } => "timer",
        }
    }

    /// Review and parallel nodes both collect reviewer decisions.
    pub fn is_review(&self) -> bool {
        matches!(
            self,
            NodePayload::Review { .. } | NodePayload::Parallel { .. }
        )
    }
}

/// A typed step in a workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowNode {
    pub id: String,
    pub name: String,
    #[serde(flatten)]
    pub payload: NodePayload,
}

impl WorkflowNode {
    pub fn new(id: impl Into<String>, name: impl Into<String>, payload: NodePayload) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            payload,
        }
    }
}

/// A labeled transition between two nodes.
///
/// The label is the branch key matched against a resolved decision
/// (case-sensitive). The condition is an opaque expression evaluated by the
/// surrounding application, carried here untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowEdge {
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub condition: Option<String>,
}

impl WorkflowEdge {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            label: None,
            condition: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }
}

/// Runtime settings attached to a definition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSettings {
    /// Folder watched for new files
    #[serde(default)]
    pub source_folder_id: Option<String>,
    /// Folder approved documents are moved to
    #[serde(default)]
    pub target_folder_id: Option<String>,
    /// Folder rejected documents are moved to
    #[serde(default)]
    pub rejected_folder_id: Option<String>,
    /// Auto-start instances for files dropped into the source folder
    #[serde(default)]
    pub auto_start_on_upload: bool,
    /// Allow a rejected document to be resubmitted
    #[serde(default)]
    pub allow_resubmission: bool,
    /// Request all reviewers at once rather than sequentially
    #[serde(default)]
    pub parallel_review: bool,
    /// Review deadline in days from instance start
    #[serde(default)]
    pub max_review_days: Option<u32>,
}

/// An immutable, versioned workflow definition graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: String,
    pub name: String,
    pub version: u32,
    #[serde(default)]
    pub project_id: Option<String>,
    pub statuses: Vec<WorkflowStatus>,
    pub nodes: Vec<WorkflowNode>,
    pub edges: Vec<WorkflowEdge>,
    #[serde(default)]
    pub settings: WorkflowSettings,
}

impl WorkflowDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            version: 1,
            project_id: None,
            statuses: Vec::new(),
            nodes: Vec::new(),
            edges: Vec::new(),
            settings: WorkflowSettings::default(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn with_status(mut self, status: WorkflowStatus) -> Self {
        self.statuses.push(status);
        self
    }

    pub fn with_node(mut self, node: WorkflowNode) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn with_edge(mut self, edge: WorkflowEdge) -> Self {
        self.edges.push(edge);
        self
    }

    pub fn with_settings(mut self, settings: WorkflowSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn node(&self, id: &str) -> Option<&WorkflowNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn status(&self, id: &str) -> Option<&WorkflowStatus> {
        self.statuses.iter().find(|s| s.id == id)
    }

    pub fn start_node(&self) -> Option<&WorkflowNode> {
        self.nodes
            .iter()
            .find(|n| matches!(n.payload, NodePayload::Start))
    }

    pub fn default_status(&self) -> Option<&WorkflowStatus> {
        self.statuses.iter().find(|s| s.is_default)
    }

    pub fn edges_from(&self, node_id: &str) -> Vec<&WorkflowEdge> {
        self.edges.iter().filter(|e| e.source == node_id).collect()
    }

    /// Validate the structural invariants of the definition graph.
    ///
    /// Cycles are legal; everything else the engine relies on is checked
    /// here so runtime evaluation can assume a well-formed graph.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for node in &self.nodes {
            if !seen.insert(node.id.as_str()) {
                return Err(GraphError::DuplicateNodeId(node.id.clone()));
            }
        }

        let start_nodes: Vec<_> = self
            .nodes
            .iter()
            .filter(|n| matches!(n.payload, NodePayload::Start))
            .collect();
        let start = match start_nodes.as_slice() {
            [] => return Err(GraphError::MissingStart),
            [s] => *s,
            _ => return Err(GraphError::MultipleStartNodes),
        };

        for edge in &self.edges {
            if self.node(&edge.source).is_none() || self.node(&edge.target).is_none() {
                return Err(GraphError::DanglingEdge {
                    from: edge.source.clone(),
                    to: edge.target.clone(),
                });
            }
            if edge.target == start.id {
                return Err(GraphError::StartHasIncomingEdges(start.id.clone()));
            }
        }

        for node in &self.nodes {
            match &node.payload {
                NodePayload::Decision => {
                    let mut labels = HashSet::new();
                    for edge in self.edges_from(&node.id) {
                        match edge.label.as_deref() {
                            None | Some("") => {
                                return Err(GraphError::UnlabeledDecisionEdge(node.id.clone()))
                            }
                            Some(label) => {
                                if !labels.insert(label.to_string()) {
                                    return Err(GraphError::DuplicateDecisionLabel {
                                        node: node.id.clone(),
                                        label: label.to_string(),
                                    });
                                }
                            }
                        }
                    }
                }
                NodePayload::Review { .. } | NodePayload::Parallel { .. } => {
                    if self.edges_from(&node.id).len() != 1 {
                        return Err(GraphError::ReviewFanOut(node.id.clone()));
                    }
                }
                NodePayload::Status { status_id } => {
                    if self.status(status_id).is_none() {
                        return Err(GraphError::UnknownStatus {
                            node: node.id.clone(),
                            status: status_id.clone(),
                        });
                    }
                }
                _ => {}
            }
        }

        if self.default_status().is_none() {
            return Err(GraphError::MissingDefaultStatus);
        }

        self.check_reachability(&start.id)
    }

    /// Every node must be reachable from start. Uses a petgraph DFS; the
    /// graph may contain cycles, which DFS handles naturally.
    fn check_reachability(&self, start_id: &str) -> Result<()> {
        let mut graph: DiGraph<&str, ()> = DiGraph::new();
        let mut indices: HashMap<&str, NodeIndex> = HashMap::new();

        for node in &self.nodes {
            let idx = graph.add_node(node.id.as_str());
            indices.insert(node.id.as_str(), idx);
        }
        for edge in &self.edges {
            graph.add_edge(indices[edge.source.as_str()], indices[edge.target.as_str()], ());
        }

        let mut reached = HashSet::new();
        let mut dfs = Dfs::new(&graph, indices[start_id]);
        while let Some(idx) = dfs.next(&graph) {
            reached.insert(graph[idx]);
        }

        for node in &self.nodes {
            if !reached.contains(node.id.as_str()) {
                return Err(GraphError::UnreachableNode(node.id.clone()));
            }
        }

        Ok(())
    }
}
