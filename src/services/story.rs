use crate::core::error::{StoryError, StoryResult};
use anyhow::{Context, Result};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;

const BUILTIN_STORY: &str = include_str!("../../assets/forest_story.yml");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    pub label: String,
    #[serde(rename = "target")]
    pub target_node_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryNode {
    pub id: String,
    pub text: String,
    /// Mood tag. Carried for display and logging only.
    #[serde(default = "default_emotion")]
    pub emotion: String,
    #[serde(default)]
    pub options: Vec<Choice>,
}

fn default_emotion() -> String {
    "neutral".to_string()
}

impl StoryNode {
    /// A node without options ends the story.
    pub fn is_terminal(&self) -> bool {
        self.options.is_empty()
    }

    pub fn option_labels(&self) -> Vec<String> {
        self.options.iter().map(|c| c.label.clone()).collect()
    }
}

#[derive(Deserialize)]
struct StoryDocument {
    start: String,
    nodes: Vec<StoryNode>,
}

/// Immutable story graph. Share it between sessions behind an `Arc`.
#[derive(Debug, Clone)]
pub struct StoryGraph {
    start_id: String,
    nodes: HashMap<String, StoryNode>,
}

impl StoryGraph {
    /// Builds a graph and checks that every choice resolves to a node.
    pub fn new(start_id: impl Into<String>, nodes: Vec<StoryNode>) -> StoryResult<Self> {
        let graph = Self::new_partial(start_id, nodes)?;
        if let Some((from, choice)) = graph.dangling_choices().into_iter().next() {
            return Err(StoryError::DanglingReference {
                from: from.to_string(),
                target: choice.target_node_id.clone(),
            });
        }
        Ok(graph)
    }

    /// Like `new`, but accepts choices that lead nowhere yet. Such a
    /// choice fails with `DanglingReference` when a session takes it.
    pub fn new_partial(start_id: impl Into<String>, nodes: Vec<StoryNode>) -> StoryResult<Self> {
        let start_id = start_id.into();
        let mut map = HashMap::with_capacity(nodes.len());

        for node in nodes {
            if node.id.trim().is_empty() {
                return Err(StoryError::InvalidGraph("node with empty id".to_string()));
            }
            if node.text.trim().is_empty() {
                return Err(StoryError::InvalidGraph(format!(
                    "node '{}' has no text",
                    node.id
                )));
            }
            if map.contains_key(&node.id) {
                return Err(StoryError::InvalidGraph(format!(
                    "duplicate node id '{}'",
                    node.id
                )));
            }
            map.insert(node.id.clone(), node);
        }

        if !map.contains_key(&start_id) {
            return Err(StoryError::InvalidGraph(format!(
                "start node '{}' does not exist",
                start_id
            )));
        }

        let graph = Self {
            start_id,
            nodes: map,
        };
        for (from, choice) in graph.dangling_choices() {
            warn!(
                "Choice '{}' on node '{}' points to missing node '{}'",
                choice.label, from, choice.target_node_id
            );
        }
        Ok(graph)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let doc: StoryDocument =
            serde_yaml_ng::from_str(content).context("Failed to parse story YAML")?;
        let graph = Self::new(doc.start, doc.nodes)?;
        debug!("Loaded story with {} nodes", graph.len());
        Ok(graph)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let doc: StoryDocument =
            serde_json::from_str(content).context("Failed to parse story JSON")?;
        Ok(Self::new(doc.start, doc.nodes)?)
    }

    /// Loads a `.json` or YAML story file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read story file {}", path.display()))?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let graph = if is_json {
            Self::from_json(&content)
        } else {
            Self::from_yaml(&content)
        };
        graph.with_context(|| format!("Invalid story file {}", path.display()))
    }

    /// The haunted-forest story that ships with the crate.
    pub fn builtin() -> Result<Self> {
        Self::from_yaml(BUILTIN_STORY)
    }

    pub fn get(&self, node_id: &str) -> StoryResult<&StoryNode> {
        self.nodes
            .get(node_id)
            .ok_or_else(|| StoryError::NotFound(node_id.to_string()))
    }

    pub fn start_id(&self) -> &str {
        &self.start_id
    }

    pub fn start_node(&self) -> StoryResult<&StoryNode> {
        self.get(&self.start_id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node ids reachable from the start, in breadth-first order.
    pub fn reachable_ids(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        let mut order = Vec::new();
        let mut queue = VecDeque::from([self.start_id.as_str()]);

        while let Some(id) = queue.pop_front() {
            if !seen.insert(id) {
                continue;
            }
            let Some(node) = self.nodes.get(id) else {
                continue;
            };
            order.push(node.id.as_str());
            for choice in &node.options {
                queue.push_back(choice.target_node_id.as_str());
            }
        }
        order
    }

    fn dangling_choices(&self) -> Vec<(&str, &Choice)> {
        let mut ids: Vec<&String> = self.nodes.keys().collect();
        ids.sort();
        ids.into_iter()
            .flat_map(|id| {
                self.nodes[id]
                    .options
                    .iter()
                    .filter(|c| !self.nodes.contains_key(&c.target_node_id))
                    .map(move |c| (id.as_str(), c))
            })
            .collect()
    }
}
