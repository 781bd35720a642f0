use std::collections::BTreeMap;

use anyhow::{Context, Error};
use log::{info, warn};
use serde_json::Value;

use super::accessor::{Form, ViewModelAccessor};
use super::migration::migrate;
use super::model::{SchemaVariant, SettingsDocument, ViewModel};
use super::schema::{for_variant, Schema};
use super::validation::{Issue, Severity, ValidationReport};

/// `report` on a saved profile still carries its warnings.
pub enum SaveOutcome {
    Saved { name: String, report: ValidationReport },
    Rejected(ValidationReport),
}

/// Profiles being edited, keyed by profile name.
pub struct ProfileStore {
    schema: Box<dyn Schema + Send + Sync>,
    accessor: ViewModelAccessor,
    profiles: BTreeMap<String, SettingsDocument>,
}

impl ProfileStore {
    pub fn new(variant: SchemaVariant) -> Self {
        let schema = for_variant(variant);
        let accessor = ViewModelAccessor::new(schema.form());
        ProfileStore {
            schema,
            accessor,
            profiles: BTreeMap::new(),
        }
    }

    pub fn variant(&self) -> SchemaVariant {
        self.schema.variant()
    }

    /// Replaces the content with a persisted JSON array, migrating every
    /// document. Returns the number of profiles kept.
    pub fn load(&mut self, serialized: &str) -> Result<usize, Error> {
        let documents: Vec<SettingsDocument> =
            serde_json::from_str(serialized).context("Can't parse persisted profiles")?;
        self.profiles.clear();
        for mut document in documents {
            migrate(&mut document, self.variant());
            let Some(name) = document.profile().map(str::to_string) else {
                warn!("Ignoring persisted settings without a profile name");
                continue;
            };
            if self.profiles.insert(name.clone(), document).is_some() {
                warn!("Duplicate profile {}, keeping the last one", name);
            }
        }
        info!("Loaded {} profiles", self.profiles.len());
        Ok(self.profiles.len())
    }

    pub fn serialize(&self) -> Result<String, Error> {
        let documents: Vec<&SettingsDocument> = self.profiles.values().collect();
        serde_json::to_string(&documents).context("Can't serialize profiles")
    }

    pub fn names(&self) -> Vec<String> {
        self.profiles.keys().cloned().collect()
    }

    pub fn settings(&self, name: &str) -> Option<&SettingsDocument> {
        self.profiles.get(name)
    }

    pub fn view_model(&self, name: &str) -> Option<ViewModel> {
        self.profiles
            .get(name)
            .map(|settings| self.schema.settings_to_view_model(settings))
    }

    pub fn validate(&self, model: &ViewModel) -> ValidationReport {
        self.schema.validation().validate(model)
    }

    pub fn to_settings(&self, model: &ViewModel) -> SettingsDocument {
        self.schema.view_model_to_settings(model)
    }

    /// Validates and stores a profile. `previous` is the name the profile
    /// had when the editor was opened, `None` for a new profile.
    pub fn upsert(&mut self, model: &ViewModel, previous: Option<&str>) -> SaveOutcome {
        let mut report = self.validate(model);
        let name = model
            .get("Profile")
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or_default()
            .to_string();
        let name_error = if name.is_empty() {
            let flagged = report.errors.iter().any(|issue| issue.field == "Profile");
            (!flagged).then(|| "Profile name must be non-empty text".to_string())
        } else if previous != Some(name.as_str()) && self.profiles.contains_key(&name) {
            Some(format!("Profile {} already exists", name))
        } else {
            None
        };
        if let Some(message) = name_error {
            report.errors.push(Issue {
                field: "Profile".to_string(),
                tab: "general".to_string(),
                severity: Severity::Error,
                message,
            });
        }
        if report.blocks_save() {
            return SaveOutcome::Rejected(report);
        }
        let mut model = model.clone();
        model.insert("Profile".to_string(), Value::String(name.clone()));
        if let Some(previous) = previous.filter(|previous| *previous != name) {
            if self.profiles.remove(previous).is_some() {
                info!("Profile {} renamed to {}", previous, name);
            }
        }
        let settings = self.schema.view_model_to_settings(&model);
        self.profiles.insert(name.clone(), settings);
        SaveOutcome::Saved { name, report }
    }

    /// Copy of the stored profiles, to be handed back to [`Self::rollback`].
    pub fn snapshot(&self) -> BTreeMap<String, SettingsDocument> {
        self.profiles.clone()
    }

    pub fn rollback(&mut self, snapshot: BTreeMap<String, SettingsDocument>) {
        self.profiles = snapshot;
    }

    pub fn remove(&mut self, name: &str) -> Option<SettingsDocument> {
        self.profiles.remove(name)
    }

    /// Form filled with a stored profile, or blank for a new one.
    pub fn form(&self, name: Option<&str>) -> Form {
        let mut form = self.accessor.blank_form();
        if let Some(model) = name.and_then(|name| self.view_model(name)) {
            for diagnostic in self.accessor.apply_view_model(&mut form, &model) {
                warn!("Profile {:?}: {}", name, diagnostic);
            }
        }
        form
    }

    pub fn submit_form(&mut self, form: &Form, previous: Option<&str>) -> SaveOutcome {
        let (model, diagnostics) = self.accessor.restore_view_model(form);
        for diagnostic in diagnostics {
            warn!("Submitted form: {}", diagnostic);
        }
        self.upsert(&model, previous)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::accessor::Control;
    use serde_json::json;

    fn model(value: Value) -> ViewModel {
        value.as_object().cloned().unwrap()
    }

    fn saved(outcome: SaveOutcome) -> String {
        match outcome {
            SaveOutcome::Saved { name, .. } => name,
            SaveOutcome::Rejected(report) => panic!("rejected: {:?}", report.errors),
        }
    }

    #[test]
    fn load_migrates_and_indexes_by_name() {
        let mut store = ProfileStore::new(SchemaVariant::Container);
        let loaded = store
            .load(
                &json!([
                    {"Administration": {"Version": 1, "Profile": "b"}},
                    {"Administration": {"Version": 4, "Profile": "a"}, "Container": {"Image": "alpine"}},
                    {"Container": {"Image": "orphan"}}
                ])
                .to_string(),
            )
            .unwrap();
        assert_eq!(loaded, 2);
        assert_eq!(store.names(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(store.settings("b").unwrap().version(), Some(4));
        assert_eq!(store.view_model("a").unwrap()["Image"], json!("alpine"));
    }

    #[test]
    fn duplicate_names_keep_last() {
        let mut store = ProfileStore::new(SchemaVariant::Container);
        store
            .load(
                &json!([
                    {"Administration": {"Version": 4, "Profile": "p"}, "Container": {"Image": "one"}},
                    {"Administration": {"Version": 4, "Profile": "p"}, "Container": {"Image": "two"}}
                ])
                .to_string(),
            )
            .unwrap();
        assert_eq!(store.view_model("p").unwrap()["Image"], json!("two"));
    }

    #[test]
    fn invalid_json_is_an_error() {
        let mut store = ProfileStore::new(SchemaVariant::Container);
        assert!(store.load("{not json").is_err());
    }

    #[test]
    fn serialize_then_load_keeps_profiles() {
        let mut store = ProfileStore::new(SchemaVariant::Swarm);
        saved(store.upsert(&model(json!({"Profile": "s1", "Image": "agent"})), None));
        saved(store.upsert(&model(json!({"Profile": "s2", "Image": "agent", "CPUs": "2"})), None));
        let serialized = store.serialize().unwrap();

        let mut reloaded = ProfileStore::new(SchemaVariant::Swarm);
        assert_eq!(reloaded.load(&serialized).unwrap(), 2);
        assert_eq!(reloaded.view_model("s2"), store.view_model("s2"));
    }

    #[test]
    fn upsert_rejects_invalid_model() {
        let mut store = ProfileStore::new(SchemaVariant::Container);
        match store.upsert(&model(json!({"Image": "alpine"})), None) {
            SaveOutcome::Rejected(report) => assert_eq!(report.error_count_by_tab().get("general"), Some(&1)),
            SaveOutcome::Saved { .. } => panic!("profile without name saved"),
        }
        assert!(store.names().is_empty());
    }

    #[test]
    fn upsert_rejects_profile_name_that_is_not_text() {
        let mut store = ProfileStore::new(SchemaVariant::Container);
        for profile in [json!(5), json!(true), json!("   ")] {
            match store.upsert(&model(json!({"Profile": profile, "Image": "alpine"})), None) {
                SaveOutcome::Rejected(report) => {
                    assert_eq!(report.errors.iter().filter(|issue| issue.field == "Profile").count(), 1)
                }
                SaveOutcome::Saved { name, .. } => panic!("saved under {:?}", name),
            }
        }
        assert!(store.names().is_empty());
        assert_eq!(store.serialize().unwrap(), "[]");
    }

    #[test]
    fn rollback_restores_snapshot() {
        let mut store = ProfileStore::new(SchemaVariant::Container);
        saved(store.upsert(&model(json!({"Profile": "p", "Image": "a"})), None));
        let snapshot = store.snapshot();
        store.remove("p");
        store.rollback(snapshot);
        assert_eq!(store.names(), vec!["p".to_string()]);
    }

    #[test]
    fn upsert_refuses_duplicate_name() {
        let mut store = ProfileStore::new(SchemaVariant::Container);
        saved(store.upsert(&model(json!({"Profile": "p", "Image": "a"})), None));
        assert!(matches!(
            store.upsert(&model(json!({"Profile": "p", "Image": "b"})), None),
            SaveOutcome::Rejected(_)
        ));
        saved(store.upsert(&model(json!({"Profile": "p", "Image": "b"})), Some("p")));
        assert_eq!(store.view_model("p").unwrap()["Image"], json!("b"));
    }

    #[test]
    fn upsert_renames() {
        let mut store = ProfileStore::new(SchemaVariant::Container);
        saved(store.upsert(&model(json!({"Profile": "old", "Image": "a"})), None));
        assert_eq!(saved(store.upsert(&model(json!({"Profile": " new ", "Image": "a"})), Some("old"))), "new");
        assert_eq!(store.names(), vec!["new".to_string()]);
    }

    #[test]
    fn form_edit_cycle() {
        let mut store = ProfileStore::new(SchemaVariant::Container);
        saved(store.upsert(
            &model(json!({"Profile": "p", "Image": "alpine", "Env": [{"Name": "A", "Value": "1"}]})),
            None,
        ));
        let mut form = store.form(Some("p"));
        assert_eq!(form.get("container_Image"), Some(&Control::Text("alpine".to_string())));
        form.insert("container_Image", Control::Text("debian".to_string()));
        saved(store.submit_form(&form, Some("p")));
        let model = store.view_model("p").unwrap();
        assert_eq!(model["Image"], json!("debian"));
        assert_eq!(model["Env"], json!([{"Name": "A", "Value": "1"}]));
    }

    #[test]
    fn remove_profile() {
        let mut store = ProfileStore::new(SchemaVariant::Container);
        saved(store.upsert(&model(json!({"Profile": "p", "UseOfficialTCAgentImage": true})), None));
        assert!(store.remove("p").is_some());
        assert!(store.remove("p").is_none());
        assert_eq!(store.serialize().unwrap(), "[]");
    }
}
