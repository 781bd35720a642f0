//! View model ⇄ settings conversion for each settings layout.

use serde_json::{Map, Value};

use super::accessor::{FieldSpec, FormSchema};
use super::mapper::{convert, copy, copy_as, copy_with, is_present};
use super::model::{SchemaVariant, SettingsDocument, ViewModel, ADMINISTRATION};
use super::units;
use super::validation::{self, ValidationHandler};

pub mod container;
pub mod swarm;

pub trait Schema {
    fn variant(&self) -> SchemaVariant;

    fn view_model_to_settings(&self, model: &ViewModel) -> SettingsDocument;

    fn settings_to_view_model(&self, settings: &SettingsDocument) -> ViewModel;

    /// Form layout consumed by the view-model accessor.
    fn form(&self) -> FormSchema;

    fn validation(&self) -> ValidationHandler;
}

pub fn for_variant(variant: SchemaVariant) -> Box<dyn Schema + Send + Sync> {
    match variant {
        SchemaVariant::Container => Box::new(container::ContainerSchema),
        SchemaVariant::Swarm => Box::new(swarm::SwarmSchema),
    }
}

const ADMINISTRATION_FLAGS: [&str; 3] = ["RmOnExit", "PullOnCreate", "UseOfficialTCAgentImage"];

fn administration_to_settings(model: &ViewModel, version: i64) -> Map<String, Value> {
    let mut administration = Map::new();
    administration.insert("Version".to_string(), Value::from(version));
    copy(model, &mut administration, "Profile");
    for flag in ADMINISTRATION_FLAGS {
        copy_with(model, &mut administration, flag, convert::to_bool);
    }
    copy_with(model, &mut administration, "MaxInstanceCount", convert::to_integer);
    administration
}

fn administration_to_view_model(settings: &SettingsDocument, model: &mut ViewModel) {
    let Some(administration) = settings.content().get(ADMINISTRATION).and_then(Value::as_object) else {
        return;
    };
    copy(administration, model, "Profile");
    for flag in ADMINISTRATION_FLAGS {
        copy_with(administration, model, flag, convert::to_bool);
    }
    copy_with(administration, model, "MaxInstanceCount", convert::to_text);
}

fn administration_form() -> Vec<FieldSpec> {
    vec![
        FieldSpec::text("Profile"),
        FieldSpec::checkbox("UseOfficialTCAgentImage"),
        FieldSpec::text("Image"),
        FieldSpec::checkbox("RmOnExit"),
        FieldSpec::checkbox("PullOnCreate"),
        FieldSpec::text("MaxInstanceCount"),
    ]
}

fn administration_validation() -> ValidationHandler {
    ValidationHandler::new()
        .field("general", "Profile", vec![validation::required()])
        .field("general", "Image", vec![validation::image_unless_official()])
        .field("general", "MaxInstanceCount", vec![validation::integer_range(1, i32::MAX as i64)])
}

/// Memory amount from the view model scaled by its unit field.
fn memory_to_settings(model: &ViewModel, field: &str, unit_field: &str, target: &mut Map<String, Value>, target_field: &str) {
    let unit = unit_of(model, unit_field, units::DEFAULT_MEMORY_UNIT);
    copy_as(model, field, target, target_field, |value| {
        let amount = convert::integer(value)?;
        units::to_bytes(amount, &unit).ok().map(Value::from)
    });
}

/// Bytes are divided by the unit and truncated, so a byte count that is not
/// a whole number of units does not survive a round trip: 1500000 bytes in
/// MiB is shown as `1` and saved back as 1048576.
fn memory_to_view_model(
    source: &Map<String, Value>,
    source_field: &str,
    unit: &str,
    model: &mut ViewModel,
    field: &str,
) {
    copy_as(source, source_field, model, field, |value| {
        let bytes = value.as_i64()?;
        units::from_bytes(bytes, unit).ok().map(|amount| Value::String(amount.to_string()))
    });
}

fn unit_of(source: &Map<String, Value>, unit_field: &str, default: &str) -> String {
    source
        .get(unit_field)
        .and_then(Value::as_str)
        .filter(|unit| !unit.is_empty())
        .unwrap_or(default)
        .to_string()
}

/// `CPUs` (decimal text) → `NanoCPUs`.
fn cpus_to_nanos(value: &Value) -> Option<Value> {
    let cpus = convert::decimal(value)?;
    Some(Value::from((cpus * 1e9).round() as i64))
}

fn nanos_to_cpus(value: &Value) -> Option<Value> {
    let nanos = value.as_i64()?;
    Some(Value::String(convert::decimal_text(nanos as f64 / 1e9)))
}

/// Maps each object entry of an array, dropping entries the closure
/// rejects.
fn map_entries<F>(value: &Value, f: F) -> Option<Value>
where
    F: Fn(&Map<String, Value>) -> Option<Value>,
{
    let entries = value.as_array()?;
    Some(Value::Array(
        entries
            .iter()
            .filter_map(Value::as_object)
            .filter_map(f)
            .filter(|entry| is_present(Some(entry)))
            .collect(),
    ))
}

/// Keeps the listed fields of each record, converting them with `convert`.
fn records<F>(value: &Value, fields: &[&str], convert: F) -> Option<Value>
where
    F: Fn(&Value) -> Option<Value>,
{
    map_entries(value, |entry| {
        let mut record = Map::new();
        for field in fields {
            copy_with(entry, &mut record, field, &convert);
        }
        Some(Value::Object(record))
    })
}

/// `[{Name: "A", Value: "1"}]` → `["A=1"]`.
fn pairs_to_strings(value: &Value, left: &str, right: &str, separator: char) -> Option<Value> {
    map_entries(value, |entry| {
        let key = entry.get(left).and_then(Value::as_str).filter(|key| !key.is_empty())?;
        let value = entry.get(right).and_then(Value::as_str).unwrap_or_default();
        Some(Value::String(format!("{}{}{}", key, separator, value)))
    })
}

/// Splits on the first separator; the right side may be empty.
fn strings_to_pairs(value: &Value, left: &str, right: &str, separator: char) -> Option<Value> {
    let items = value.as_array()?;
    Some(Value::Array(
        items
            .iter()
            .filter_map(Value::as_str)
            .map(|item| {
                let (key, value) = item.split_once(separator).unwrap_or((item, ""));
                let mut pair = Map::new();
                pair.insert(left.to_string(), Value::String(key.to_string()));
                pair.insert(right.to_string(), Value::String(value.to_string()));
                Value::Object(pair)
            })
            .collect(),
    ))
}

/// `[{Key: "a", Value: "b"}]` → `{"a": "b"}`.
fn pairs_to_object(value: &Value) -> Option<Value> {
    let entries = value.as_array()?;
    let object: Map<String, Value> = entries
        .iter()
        .filter_map(|entry| {
            let key = entry.get("Key").and_then(Value::as_str).filter(|key| !key.is_empty())?;
            let value = entry.get("Value").and_then(Value::as_str).unwrap_or_default();
            Some((key.to_string(), Value::String(value.to_string())))
        })
        .collect();
    Some(Value::Object(object))
}

fn object_to_pairs(value: &Value) -> Option<Value> {
    let object = value.as_object()?;
    Some(Value::Array(
        object
            .iter()
            .map(|(key, value)| {
                let mut pair = Map::new();
                pair.insert("Key".to_string(), Value::String(key.clone()));
                pair.insert("Value".to_string(), convert::to_text(value).unwrap_or(Value::String(String::new())));
                Value::Object(pair)
            })
            .collect(),
    ))
}
