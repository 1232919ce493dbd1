//! Task and Artifact types

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

/// Unit of work driven by a retry engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub description: String,
    /// Free-form task state; escalation hints are merged in here
    #[serde(default)]
    pub context: Map<String, Value>,
}

impl Task {
    /// Create a task with a generated id
    pub fn new(description: impl Into<String>) -> Self {
        let id = uuid::Uuid::now_v7().to_string();
        debug!(%id, "Task::new: called");
        Self {
            id,
            description: description.into(),
            context: Map::new(),
        }
    }

    /// Builder: explicit id
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Builder: set a context value
    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    /// Merge hints into the task context, later values win
    pub fn merge_hints(&mut self, hints: &Map<String, Value>) {
        debug!(task_id = %self.id, hint_count = hints.len(), "Task::merge_hints: called");
        for (k, v) in hints {
            self.context.insert(k.clone(), v.clone());
        }
    }
}

/// Explicit entry point handed to the executor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactManifest {
    /// Symbol the executor invokes
    pub entry_point: String,
    /// Language or format tag, opaque to the loop
    #[serde(default)]
    pub language: String,
}

/// A candidate artifact under test
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub manifest: ArtifactManifest,
    pub content: String,
}

impl Artifact {
    pub fn new(entry_point: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            manifest: ArtifactManifest {
                entry_point: entry_point.into(),
                language: String::new(),
            },
            content: content.into(),
        }
    }

    /// Builder: language tag
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.manifest.language = language.into();
        self
    }

    /// Copy of this artifact with new content, same manifest
    pub fn revise(&self, content: impl Into<String>) -> Self {
        Self {
            manifest: self.manifest.clone(),
            content: content.into(),
        }
    }

    /// True when the content is empty or only whitespace
    pub fn is_blank(&self) -> bool {
        self.content.trim().is_empty()
    }

    pub fn len(&self) -> usize {
        self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}
