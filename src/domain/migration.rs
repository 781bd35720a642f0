//! Upgrades persisted settings documents to the current schema version.
//!
//! Steps are applied in order, each one moving the document exactly one
//! version forward. A version without a matching step (newer than this
//! build, or simply unknown) is left as is.

use log::{debug, info, warn};
use serde_json::{Map, Value};

use super::mapper::object_at_mut;
use super::model::{SchemaVariant, SettingsDocument, ADMINISTRATION, EDITOR};

pub struct MigrationStep {
    pub from: i64,
    pub name: &'static str,
    pub apply: fn(&mut Map<String, Value>),
}

const LEGACY_CONTAINER_KEY: &str = "Container";

pub fn steps(variant: SchemaVariant) -> Vec<MigrationStep> {
    let mut steps = vec![
        MigrationStep {
            from: 1,
            name: "structured binds",
            apply: structure_binds,
        },
        MigrationStep {
            from: 2,
            name: "pull on create",
            apply: force_pull_on_create,
        },
        MigrationStep {
            from: 3,
            name: "memory unit rescale",
            apply: rescale_legacy_memory,
        },
    ];
    if variant == SchemaVariant::Swarm {
        steps.push(MigrationStep {
            from: 4,
            name: "agent holder spec",
            apply: rename_container_key,
        });
    }
    steps
}

/// Returns how many steps ran. Documents without a version are treated as
/// version 1.
pub fn migrate(document: &mut SettingsDocument, variant: SchemaVariant) -> usize {
    let steps = steps(variant);
    let mut version = match document.version() {
        Some(version) => version,
        None if document.has_version_field() => {
            debug!("Profile {:?} has a non-integer version, leaving it untouched", document.profile());
            return 0;
        }
        None => 1,
    };
    if !document.set_version(version) {
        warn!("Profile has no administration section to version, leaving it untouched");
        return 0;
    }
    let mut applied = 0;
    while let Some(step) = steps.iter().find(|step| step.from == version) {
        debug!(
            "Migrating profile {:?} from version {} ({})",
            document.profile(),
            version,
            step.name
        );
        (step.apply)(document.content_mut());
        version += 1;
        document.set_version(version);
        applied += 1;
    }
    if applied > 0 {
        info!(
            "Profile {:?} migrated to version {}",
            document.profile(),
            version
        );
    } else if version != variant.target_version() {
        debug!(
            "No migration known from version {} for profile {:?}, leaving it untouched",
            version,
            document.profile()
        );
    }
    applied
}

/// Splits a legacy `host:container:mode` bind into its three parts.
///
/// Windows paths put extra colons in the string. When there are more than
/// three tokens, single-character tokens are taken for drive letters and
/// glued to the following token. This is good enough for the common
/// `C:\path` case only: if the merge does not end in exactly two paths plus
/// `ro`/`rw`, the plain split is used.
pub fn parse_bind(raw: &str) -> Map<String, Value> {
    let tokens: Vec<&str> = raw.split(':').collect();
    let mut parts: Vec<String> = tokens.iter().map(|token| token.to_string()).collect();
    if tokens.len() > 3 {
        let mut merged = Vec::with_capacity(tokens.len());
        let mut i = 0;
        while i < tokens.len() {
            if tokens[i].len() == 1 && i + 1 < tokens.len() {
                merged.push(format!("{}:{}", tokens[i], tokens[i + 1]));
                i += 2;
            } else {
                merged.push(tokens[i].to_string());
                i += 1;
            }
        }
        if merged.len() == 3 && (merged[2] == "ro" || merged[2] == "rw") {
            parts = merged;
        }
    }
    let mut bind = Map::new();
    let mut parts = parts.into_iter();
    for field in ["PathOnHost", "PathInContainer", "ReadOnly"] {
        if let Some(part) = parts.next() {
            bind.insert(field.to_string(), Value::String(part));
        }
    }
    bind
}

fn structure_binds(content: &mut Map<String, Value>) {
    let Some(host_config) = object_at_mut(content, &[LEGACY_CONTAINER_KEY, "HostConfig"]) else {
        return;
    };
    if let Some(Value::Array(binds)) = host_config.get_mut("Binds") {
        for bind in binds.iter_mut() {
            if let Value::String(raw) = bind {
                *bind = Value::Object(parse_bind(raw));
            }
        }
    }
}

fn force_pull_on_create(content: &mut Map<String, Value>) {
    if let Some(Value::Object(administration)) = content.get_mut(ADMINISTRATION) {
        administration.insert("PullOnCreate".to_string(), Value::Bool(true));
    }
}

/// MiB and GiB used to be defined 8 times too small.
fn rescale_legacy_memory(content: &mut Map<String, Value>) {
    let units: Vec<(&str, Option<String>)> = [("Memory", "MemoryUnit"), ("MemorySwap", "MemorySwapUnit")]
        .into_iter()
        .map(|(field, unit_field)| {
            let unit = content
                .get(EDITOR)
                .and_then(|editor| editor.get(unit_field))
                .and_then(Value::as_str)
                .map(str::to_string);
            (field, unit)
        })
        .collect();
    let Some(host_config) = object_at_mut(content, &[LEGACY_CONTAINER_KEY, "HostConfig"]) else {
        return;
    };
    for (field, unit) in units {
        if !matches!(unit.as_deref(), Some("MiB") | Some("GiB")) {
            continue;
        }
        let Some(value) = host_config.get(field).and_then(Value::as_i64) else {
            continue;
        };
        if value == super::units::UNLIMITED {
            continue;
        }
        match value.checked_mul(8) {
            Some(rescaled) => {
                host_config.insert(field.to_string(), Value::from(rescaled));
            }
            None => warn!("{} {} does not fit in 64 bits once rescaled, leaving it as is", field, value),
        }
    }
}

fn rename_container_key(content: &mut Map<String, Value>) {
    if content.contains_key(SchemaVariant::Swarm.spec_key()) {
        return;
    }
    if let Some(container) = content.remove(LEGACY_CONTAINER_KEY) {
        content.insert(SchemaVariant::Swarm.spec_key().to_string(), container);
    }
}
