use serde_json::{Map, Value};

use super::*;
use crate::domain::accessor::{Control, FieldSpec, FormSchema};
use crate::domain::mapper::{nested, object_at};
use crate::domain::model::EDITOR;
use crate::domain::validation::{self, ValidationHandler};

/// Agent holder deployed as a swarm service.
pub struct SwarmSchema;

const SPEC_STRINGS: [&str; 4] = ["Image", "Hostname", "User", "StopSignal"];
/// View-model key → `ContainerSpec` key.
const SPEC_RENAMES: [(&str, &str); 3] = [("WorkingDir", "Dir"), ("Entrypoint", "Command"), ("Cmd", "Args")];
const TIME_UNITS: [&str; 5] = ["ns", "us", "ms", "s", "h"];
const MEMORY_UNITS: [&str; 4] = ["bytes", "KiB", "MiB", "GiB"];

fn volume_to_mount(entry: &Map<String, Value>) -> Option<Value> {
    let mut mount = Map::new();
    copy_as(entry, "PathOnHost", &mut mount, "Source", |value| Some(value.clone()));
    copy_as(entry, "PathInContainer", &mut mount, "Target", |value| Some(value.clone()));
    copy_with(entry, &mut mount, "ReadOnly", |value| match value.as_str() {
        Some("ro") => Some(Value::Bool(true)),
        Some("rw") => Some(Value::Bool(false)),
        _ => None,
    });
    if mount.is_empty() {
        return None;
    }
    mount.insert("Type".to_string(), Value::String("bind".to_string()));
    Some(Value::Object(mount))
}

fn mount_to_volume(mount: &Map<String, Value>) -> Option<Value> {
    let mut volume = Map::new();
    copy_as(mount, "Source", &mut volume, "PathOnHost", |value| Some(value.clone()));
    copy_as(mount, "Target", &mut volume, "PathInContainer", |value| Some(value.clone()));
    copy_with(mount, &mut volume, "ReadOnly", |value| {
        value
            .as_bool()
            .map(|read_only| Value::String(if read_only { "ro" } else { "rw" }.to_string()))
    });
    Some(Value::Object(volume))
}

fn port_to_settings(entry: &Map<String, Value>) -> Option<Value> {
    let mut port = Map::new();
    copy_with(entry, &mut port, "TargetPort", convert::to_integer);
    copy_with(entry, &mut port, "PublishedPort", convert::to_integer);
    copy(entry, &mut port, "Protocol");
    Some(Value::Object(port))
}

impl SwarmSchema {
    fn container_spec_to_settings(model: &ViewModel, spec: &mut Map<String, Value>) {
        for field in SPEC_STRINGS {
            copy(model, spec, field);
        }
        for (from, to) in SPEC_RENAMES {
            copy_as(model, from, spec, to, |value| match value {
                Value::Array(_) => convert::to_string_list(value),
                other => Some(other.clone()),
            });
        }
        copy_with(model, spec, "Env", |value| pairs_to_strings(value, "Name", "Value", '='));
        copy_with(model, spec, "Labels", pairs_to_object);
        let unit = unit_of(model, "StopGracePeriodUnit", units::DEFAULT_TIME_UNIT);
        copy_with(model, spec, "StopGracePeriod", |value| {
            let amount = convert::integer(value)?;
            units::to_nanos(amount, &unit).ok().map(Value::from)
        });
        copy_as(model, "Volumes", spec, "Mounts", |value| map_entries(value, volume_to_mount));
    }

    fn spec_to_view_model(spec: &Map<String, Value>, editor: &Map<String, Value>, model: &mut ViewModel) {
        let Some(task) = object_at(spec, &["TaskTemplate"]) else {
            return;
        };
        if let Some(container_spec) = object_at(task, &["ContainerSpec"]) {
            for field in SPEC_STRINGS {
                copy(container_spec, model, field);
            }
            for (to, from) in SPEC_RENAMES {
                copy_as(container_spec, from, model, to, |value| match value {
                    Value::Array(_) => convert::to_string_list(value),
                    other => Some(other.clone()),
                });
            }
            copy_with(container_spec, model, "Env", |value| strings_to_pairs(value, "Name", "Value", '='));
            copy_with(container_spec, model, "Labels", object_to_pairs);
            let unit = unit_of(editor, "StopGracePeriodUnit", units::DEFAULT_TIME_UNIT);
            copy_with(container_spec, model, "StopGracePeriod", |value| {
                let nanos = value.as_i64()?;
                units::from_nanos(nanos, &unit).ok().map(|amount| Value::String(amount.to_string()))
            });
            copy_as(container_spec, "Mounts", model, "Volumes", |value| map_entries(value, mount_to_volume));
        }
        if let Some(limits) = object_at(task, &["Resources", "Limits"]) {
            copy_as(limits, "NanoCPUs", model, "CPUs", nanos_to_cpus);
            let unit = unit_of(editor, "MemoryUnit", units::DEFAULT_MEMORY_UNIT);
            memory_to_view_model(limits, "MemoryBytes", &unit, model, "Memory");
        }
        if let Some(placement) = object_at(task, &["Placement"]) {
            copy_with(placement, model, "Constraints", convert::to_string_list);
        }
    }
}

impl Schema for SwarmSchema {
    fn variant(&self) -> SchemaVariant {
        SchemaVariant::Swarm
    }

    fn view_model_to_settings(&self, model: &ViewModel) -> SettingsDocument {
        let mut content = Map::new();
        content.insert(
            ADMINISTRATION.to_string(),
            Value::Object(administration_to_settings(model, self.variant().target_version())),
        );
        nested(&mut content, self.variant().spec_key(), |spec| {
            nested(spec, "TaskTemplate", |task| {
                nested(task, "ContainerSpec", |container_spec| {
                    Self::container_spec_to_settings(model, container_spec)
                });
                nested(task, "Resources", |resources| {
                    nested(resources, "Limits", |limits| {
                        copy_as(model, "CPUs", limits, "NanoCPUs", cpus_to_nanos);
                        memory_to_settings(model, "Memory", "MemoryUnit", limits, "MemoryBytes");
                    })
                });
                nested(task, "Placement", |placement| {
                    copy_with(model, placement, "Constraints", convert::to_string_list);
                });
            });
            nested(spec, "EndpointSpec", |endpoint| {
                copy_with(model, endpoint, "Ports", |value| map_entries(value, port_to_settings));
            });
        });
        nested(&mut content, EDITOR, |editor| {
            copy(model, editor, "MemoryUnit");
            copy(model, editor, "StopGracePeriodUnit");
        });
        SettingsDocument::new(content)
    }

    fn settings_to_view_model(&self, settings: &SettingsDocument) -> ViewModel {
        let mut model = Map::new();
        administration_to_view_model(settings, &mut model);
        let empty = Map::new();
        let editor = object_at(settings.content(), &[EDITOR]).unwrap_or(&empty);
        copy(editor, &mut model, "MemoryUnit");
        copy(editor, &mut model, "StopGracePeriodUnit");
        if let Some(spec) = object_at(settings.content(), &[self.variant().spec_key()]) {
            Self::spec_to_view_model(spec, editor, &mut model);
            if let Some(endpoint) = object_at(spec, &["EndpointSpec"]) {
                copy_with(endpoint, &mut model, "Ports", |value| {
                    records(value, &["TargetPort", "PublishedPort", "Protocol"], convert::to_text)
                });
            }
        }
        model
    }

    fn form(&self) -> FormSchema {
        let mut fields = administration_form();
        fields.extend(["Hostname", "User", "WorkingDir", "StopSignal"].into_iter().map(FieldSpec::text));
        fields.push(FieldSpec::list("Entrypoint"));
        fields.push(FieldSpec::list("Cmd"));
        fields.push(FieldSpec::table("Env", &["Name", "Value"]));
        fields.push(FieldSpec::table("Labels", &["Key", "Value"]));
        fields.push(FieldSpec::text("StopGracePeriod"));
        fields.push(FieldSpec::scalar("StopGracePeriodUnit", Control::select(&TIME_UNITS)));
        fields.push(FieldSpec::table_of(
            "Volumes",
            vec![
                ("PathOnHost", Control::text()),
                ("PathInContainer", Control::text()),
                ("ReadOnly", Control::radio(&["rw", "ro"])),
            ],
        ));
        fields.push(FieldSpec::table_of(
            "Ports",
            vec![
                ("TargetPort", Control::text()),
                ("PublishedPort", Control::text()),
                ("Protocol", Control::select(&["tcp", "udp"])),
            ],
        ));
        fields.push(FieldSpec::list("Constraints"));
        fields.push(FieldSpec::text("CPUs"));
        fields.push(FieldSpec::text("Memory"));
        fields.push(FieldSpec::scalar("MemoryUnit", Control::select(&MEMORY_UNITS)));
        FormSchema {
            prefix: "swarm".to_string(),
            fields,
        }
    }

    fn validation(&self) -> ValidationHandler {
        administration_validation()
            .field("run", "Env", vec![validation::each_row(Some("Name"), validation::required())])
            .field("run", "StopGracePeriod", vec![validation::integer_range(0, i64::MAX)])
            .field("run", "StopGracePeriodUnit", vec![validation::time_unit()])
            .field("network", "Ports", vec![
                validation::each_row(Some("TargetPort"), validation::required()),
                validation::each_row(Some("TargetPort"), validation::port()),
                validation::each_row(Some("PublishedPort"), validation::port()),
            ])
            .field("storage", "Volumes", vec![validation::each_row(Some("PathInContainer"), validation::required())])
            .field("resources", "CPUs", vec![validation::positive_decimal()])
            .field("resources", "MemoryUnit", vec![validation::memory_unit()])
            .field("resources", "Memory", vec![
                validation::integer_range(0, i64::MAX),
                validation::memory_floor("MemoryUnit"),
            ])
    }
}
