use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// One callable capability advertised by a connected server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub input_schema: serde_json::Value,
}

impl ToolDescriptor {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }

    #[must_use]
    pub fn qualified_name(&self, server_id: &str) -> String {
        format!("{server_id}:{}", self.name)
    }
}

/// Complete, validated tool list of one server at one point in time.
///
/// Snapshots are immutable; a refresh produces a new snapshot instead of
/// mutating the current one, so observers never see a partial list.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSnapshot {
    pub server_id: String,
    pub generation: u64,
    pub fingerprint: String,
    pub tools: Vec<ToolDescriptor>,
}

impl ToolSnapshot {
    /// Build a snapshot, dropping nameless tools and duplicate names (first one wins).
    #[must_use]
    pub fn new(server_id: &str, generation: u64, tools: Vec<ToolDescriptor>) -> Self {
        let mut seen = HashSet::new();
        let tools: Vec<ToolDescriptor> = tools
            .into_iter()
            .filter(|tool| {
                if tool.name.trim().is_empty() {
                    tracing::warn!(server_id, "dropping tool without a name");
                    return false;
                }
                if !seen.insert(tool.name.clone()) {
                    tracing::warn!(server_id, tool = %tool.name, "dropping duplicate tool name");
                    return false;
                }
                true
            })
            .collect();

        Self {
            server_id: server_id.to_owned(),
            generation,
            fingerprint: fingerprint(&tools),
            tools,
        }
    }

    #[must_use]
    pub fn empty(server_id: &str, generation: u64) -> Self {
        Self::new(server_id, generation, Vec::new())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.iter().map(|t| t.name.as_str())
    }
}

fn fingerprint(tools: &[ToolDescriptor]) -> String {
    let mut hasher = blake3::Hasher::new();
    for tool in tools {
        hasher.update(tool.name.as_bytes());
        hasher.update(&[0]);
        hasher.update(tool.description.as_bytes());
        hasher.update(&[0]);
        hasher.update(tool.input_schema.to_string().as_bytes());
        hasher.update(&[0xff]);
    }
    hasher.finalize().to_hex().to_string()
}
