use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Flat form-facing record: strings for text inputs, booleans for
/// checkboxes, arrays for repeating groups.
pub type ViewModel = Map<String, Value>;

pub const ADMINISTRATION: &str = "Administration";
pub const EDITOR: &str = "Editor";

/// One persisted profile. The content is kept as an open JSON object so
/// properties this crate does not map survive a load/save cycle.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SettingsDocument(pub Map<String, Value>);

impl SettingsDocument {
    pub fn new(content: Map<String, Value>) -> Self {
        SettingsDocument(content)
    }

    /// `None` when the document carries no version at all.
    pub fn version(&self) -> Option<i64> {
        self.0
            .get(ADMINISTRATION)
            .and_then(|administration| administration.get("Version"))
            .and_then(Value::as_i64)
    }

    pub fn has_version_field(&self) -> bool {
        self.0
            .get(ADMINISTRATION)
            .and_then(|administration| administration.get("Version"))
            .is_some()
    }

    /// Returns `false` when `Administration` exists but is not an object,
    /// in which case nothing is written.
    pub fn set_version(&mut self, version: i64) -> bool {
        let administration = self
            .0
            .entry(ADMINISTRATION)
            .or_insert_with(|| Value::Object(Map::new()));
        match administration {
            Value::Object(fields) => {
                fields.insert("Version".to_string(), Value::from(version));
                true
            }
            _ => false,
        }
    }

    pub fn profile(&self) -> Option<&str> {
        self.0
            .get(ADMINISTRATION)
            .and_then(|administration| administration.get("Profile"))
            .and_then(Value::as_str)
    }

    pub fn content(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn content_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.0
    }
}

/// Which settings layout a deployment edits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SchemaVariant {
    #[default]
    Container,
    Swarm,
}

impl SchemaVariant {
    pub fn target_version(&self) -> i64 {
        match self {
            SchemaVariant::Container => 4,
            SchemaVariant::Swarm => 5,
        }
    }

    /// Top-level key holding the container or service specification.
    pub fn spec_key(&self) -> &'static str {
        match self {
            SchemaVariant::Container => "Container",
            SchemaVariant::Swarm => "AgentHolderSpec",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestPhase {
    Created,
    Running,
    Exited { code: i64 },
    Cancelled,
    Failed { message: String },
}

impl TestPhase {
    pub fn is_final(&self) -> bool {
        !matches!(self, TestPhase::Created | TestPhase::Running)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TestStatus {
    pub id: String,
    pub profile: String,
    pub container_id: Option<String>,
    pub phase: TestPhase,
}
