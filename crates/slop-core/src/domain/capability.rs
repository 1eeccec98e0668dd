//! Capability entries and per-upstream catalogs

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Kind of MCP capability
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityKind {
    /// Tool that can be invoked
    #[default]
    Tool,
    /// Prompt template
    Prompt,
    /// Resource that can be read
    Resource,
}

impl CapabilityKind {
    pub const ALL: [CapabilityKind; 3] = [Self::Tool, Self::Prompt, Self::Resource];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tool => "tool",
            Self::Prompt => "prompt",
            Self::Resource => "resource",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "tool" | "tools" => Some(Self::Tool),
            "prompt" | "prompts" => Some(Self::Prompt),
            "resource" | "resources" => Some(Self::Resource),
            _ => None,
        }
    }

    /// MCP method listing this kind (`tools/list`, ...)
    pub fn list_method(&self) -> &'static str {
        match self {
            Self::Tool => "tools/list",
            Self::Prompt => "prompts/list",
            Self::Resource => "resources/list",
        }
    }

    /// Field of a list result holding the items
    pub fn list_field(&self) -> &'static str {
        match self {
            Self::Tool => "tools",
            Self::Prompt => "prompts",
            Self::Resource => "resources",
        }
    }

    /// Field identifying an item: `uri` for resources, `name` otherwise
    pub fn key_field(&self) -> &'static str {
        match self {
            Self::Resource => "uri",
            _ => "name",
        }
    }

    /// Notification method an upstream sends when this list changes
    pub fn list_changed_method(&self) -> &'static str {
        match self {
            Self::Tool => "notifications/tools/list_changed",
            Self::Prompt => "notifications/prompts/list_changed",
            Self::Resource => "notifications/resources/list_changed",
        }
    }

    pub fn from_list_changed_method(method: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.list_changed_method() == method)
    }
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single capability advertised by an upstream
///
/// `raw` keeps the complete definition as the upstream sent it, so fields
/// this crate does not model (annotations, output schemas, icons) survive
/// the trip to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capability {
    pub kind: CapabilityKind,
    /// Tool/prompt name or resource URI, as known by the upstream
    pub name: String,
    pub description: Option<String>,
    pub raw: Value,
}

impl Capability {
    /// Build from an item of a `*/list` result. Items without a key are skipped.
    pub fn from_raw(kind: CapabilityKind, raw: Value) -> Option<Self> {
        let name = raw.get(kind.key_field())?.as_str()?.to_string();
        let description = raw
            .get("description")
            .and_then(|d| d.as_str())
            .map(str::to_string);
        Some(Self {
            kind,
            name,
            description,
            raw,
        })
    }

    /// Shorthand used heavily by tests and meta tools
    pub fn tool(name: impl Into<String>, description: impl Into<String>) -> Self {
        let name = name.into();
        let description = description.into();
        let raw = serde_json::json!({
            "name": name,
            "description": description,
            "inputSchema": {"type": "object", "properties": {}},
        });
        Self {
            kind: CapabilityKind::Tool,
            name,
            description: Some(description),
            raw,
        }
    }

    pub fn prompt(name: impl Into<String>) -> Self {
        let name = name.into();
        let raw = serde_json::json!({ "name": name });
        Self {
            kind: CapabilityKind::Prompt,
            name,
            description: None,
            raw,
        }
    }

    pub fn resource(uri: impl Into<String>) -> Self {
        let uri = uri.into();
        let raw = serde_json::json!({ "uri": uri, "name": uri });
        Self {
            kind: CapabilityKind::Resource,
            name: uri,
            description: None,
            raw,
        }
    }

    /// Input schema of a tool, if any
    pub fn input_schema(&self) -> Option<&Value> {
        self.raw.get("inputSchema")
    }

    /// Copy of the raw definition with the key field replaced by `exposed`
    pub fn raw_with_name(&self, exposed: &str) -> Value {
        let mut raw = self.raw.clone();
        if let Some(obj) = raw.as_object_mut() {
            obj.insert(
                self.kind.key_field().to_string(),
                Value::String(exposed.to_string()),
            );
        }
        raw
    }
}

/// Everything one upstream advertises
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    pub tools: Vec<Capability>,
    pub prompts: Vec<Capability>,
    pub resources: Vec<Capability>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tools(tools: Vec<Capability>) -> Self {
        Self {
            tools,
            ..Default::default()
        }
    }

    pub fn of_kind(&self, kind: CapabilityKind) -> &[Capability] {
        match kind {
            CapabilityKind::Tool => &self.tools,
            CapabilityKind::Prompt => &self.prompts,
            CapabilityKind::Resource => &self.resources,
        }
    }

    pub fn set_kind(&mut self, kind: CapabilityKind, items: Vec<Capability>) {
        match kind {
            CapabilityKind::Tool => self.tools = items,
            CapabilityKind::Prompt => self.prompts = items,
            CapabilityKind::Resource => self.resources = items,
        }
    }

    /// Total number of entries
    pub fn total_count(&self) -> usize {
        self.tools.len() + self.prompts.len() + self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total_count() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &Capability> {
        self.tools
            .iter()
            .chain(self.prompts.iter())
            .chain(self.resources.iter())
    }
}
