use serde_json::{Map, Value};

use super::*;
use crate::domain::accessor::{Control, FieldSpec, FormSchema};
use crate::domain::mapper::{nested, object_at};
use crate::domain::model::EDITOR;
use crate::domain::validation::{self, ValidationHandler};

/// Single container created through the Docker Engine API.
pub struct ContainerSchema;

const CONTAINER_STRINGS: [&str; 6] = ["Image", "Hostname", "Domainname", "User", "WorkingDir", "StopSignal"];
const CONTAINER_LISTS: [&str; 2] = ["Entrypoint", "Cmd"];
const HOST_STRINGS: [&str; 4] = ["NetworkMode", "CgroupParent", "CpusetCpus", "CpusetMems"];
const HOST_FLAGS: [&str; 3] = ["PublishAllPorts", "Privileged", "OomKillDisable"];
const HOST_INTEGERS: [&str; 3] = ["CpuQuota", "CpuShares", "BlkioWeight"];
const HOST_LISTS: [&str; 5] = ["Dns", "DnsSearch", "CapAdd", "CapDrop", "SecurityOpt"];
const BIND_FIELDS: [&str; 3] = ["PathOnHost", "PathInContainer", "ReadOnly"];
const PORT_FIELDS: [&str; 4] = ["HostIp", "HostPort", "ContainerPort", "Protocol"];
const ULIMIT_FIELDS: [&str; 3] = ["Name", "Soft", "Hard"];
const MEMORY_UNITS: [&str; 4] = ["bytes", "KiB", "MiB", "GiB"];

impl ContainerSchema {
    fn container_to_settings(model: &ViewModel, container: &mut Map<String, Value>) {
        for field in CONTAINER_STRINGS {
            copy(model, container, field);
        }
        copy_with(model, container, "StopTimeout", convert::to_integer);
        for field in CONTAINER_LISTS {
            copy_with(model, container, field, convert::to_string_list);
        }
        copy_with(model, container, "Env", |value| pairs_to_strings(value, "Name", "Value", '='));
        copy_with(model, container, "Labels", pairs_to_object);
        nested(container, "HostConfig", |host_config| Self::host_config_to_settings(model, host_config));
    }

    fn host_config_to_settings(model: &ViewModel, host_config: &mut Map<String, Value>) {
        for field in HOST_STRINGS {
            copy(model, host_config, field);
        }
        for field in HOST_FLAGS {
            copy_with(model, host_config, field, convert::to_bool);
        }
        for field in HOST_INTEGERS {
            copy_with(model, host_config, field, convert::to_integer);
        }
        for field in HOST_LISTS {
            copy_with(model, host_config, field, convert::to_string_list);
        }
        copy_as(model, "Volumes", host_config, "Binds", |value| {
            records(value, &BIND_FIELDS, |v| Some(v.clone()))
        });
        copy_as(model, "Ports", host_config, "PortBindings", |value| {
            records(value, &PORT_FIELDS, |v| Some(v.clone()))
        });
        copy_with(model, host_config, "Links", |value| {
            pairs_to_strings(value, "Container", "Alias", ':')
        });
        copy_with(model, host_config, "ExtraHosts", |value| pairs_to_strings(value, "Name", "Ip", ':'));
        copy_with(model, host_config, "Ulimits", |value| {
            map_entries(value, |entry| {
                let name = entry.get("Name").and_then(Value::as_str).filter(|name| !name.is_empty())?;
                let mut ulimit = Map::new();
                ulimit.insert("Name".to_string(), Value::String(name.to_string()));
                copy_with(entry, &mut ulimit, "Soft", convert::to_integer);
                copy_with(entry, &mut ulimit, "Hard", convert::to_integer);
                Some(Value::Object(ulimit))
            })
        });
        copy_as(model, "CPUs", host_config, "NanoCPUs", cpus_to_nanos);
        memory_to_settings(model, "Memory", "MemoryUnit", host_config, "Memory");
        if matches!(model.get("MemorySwapUnlimited"), Some(Value::Bool(true))) {
            host_config.insert("MemorySwap".to_string(), Value::from(units::UNLIMITED));
        } else {
            memory_to_settings(model, "MemorySwap", "MemorySwapUnit", host_config, "MemorySwap");
        }
        nested(host_config, "LogConfig", |log_config| {
            copy_as(model, "LogType", log_config, "Type", |value| Some(value.clone()));
            copy_as(model, "LogConfig", log_config, "Config", pairs_to_object);
        });
    }

    fn container_to_view_model(container: &Map<String, Value>, editor: Option<&Map<String, Value>>, model: &mut ViewModel) {
        for field in CONTAINER_STRINGS {
            copy(container, model, field);
        }
        copy_with(container, model, "StopTimeout", convert::to_text);
        for field in CONTAINER_LISTS {
            copy_with(container, model, field, convert::to_string_list);
        }
        copy_with(container, model, "Env", |value| strings_to_pairs(value, "Name", "Value", '='));
        copy_with(container, model, "Labels", object_to_pairs);

        let Some(host_config) = object_at(container, &["HostConfig"]) else {
            return;
        };
        for field in HOST_STRINGS {
            copy(host_config, model, field);
        }
        for field in HOST_FLAGS {
            copy_with(host_config, model, field, convert::to_bool);
        }
        for field in HOST_INTEGERS {
            copy_with(host_config, model, field, convert::to_text);
        }
        for field in HOST_LISTS {
            copy_with(host_config, model, field, convert::to_string_list);
        }
        copy_as(host_config, "Binds", model, "Volumes", |value| {
            records(value, &BIND_FIELDS, |v| Some(v.clone()))
        });
        copy_as(host_config, "PortBindings", model, "Ports", |value| {
            records(value, &PORT_FIELDS, convert::to_text)
        });
        copy_with(host_config, model, "Links", |value| strings_to_pairs(value, "Container", "Alias", ':'));
        copy_with(host_config, model, "ExtraHosts", |value| strings_to_pairs(value, "Name", "Ip", ':'));
        copy_with(host_config, model, "Ulimits", |value| records(value, &ULIMIT_FIELDS, convert::to_text));
        copy_as(host_config, "NanoCPUs", model, "CPUs", nanos_to_cpus);

        let empty = Map::new();
        let editor = editor.unwrap_or(&empty);
        let memory_unit = unit_of(editor, "MemoryUnit", units::DEFAULT_MEMORY_UNIT);
        memory_to_view_model(host_config, "Memory", &memory_unit, model, "Memory");
        if host_config.get("MemorySwap").and_then(Value::as_i64) == Some(units::UNLIMITED) {
            model.insert("MemorySwapUnlimited".to_string(), Value::Bool(true));
        } else {
            let swap_unit = unit_of(editor, "MemorySwapUnit", units::DEFAULT_MEMORY_UNIT);
            memory_to_view_model(host_config, "MemorySwap", &swap_unit, model, "MemorySwap");
        }
        if let Some(log_config) = object_at(host_config, &["LogConfig"]) {
            copy_as(log_config, "Type", model, "LogType", |value| Some(value.clone()));
            copy_as(log_config, "Config", model, "LogConfig", object_to_pairs);
        }
    }
}

impl Schema for ContainerSchema {
    fn variant(&self) -> SchemaVariant {
        SchemaVariant::Container
    }

    fn view_model_to_settings(&self, model: &ViewModel) -> SettingsDocument {
        let mut content = Map::new();
        content.insert(
            ADMINISTRATION.to_string(),
            Value::Object(administration_to_settings(model, self.variant().target_version())),
        );
        nested(&mut content, self.variant().spec_key(), |container| {
            Self::container_to_settings(model, container)
        });
        nested(&mut content, EDITOR, |editor| {
            copy(model, editor, "MemoryUnit");
            copy(model, editor, "MemorySwapUnit");
        });
        SettingsDocument::new(content)
    }

    fn settings_to_view_model(&self, settings: &SettingsDocument) -> ViewModel {
        let mut model = Map::new();
        administration_to_view_model(settings, &mut model);
        let editor = object_at(settings.content(), &[EDITOR]);
        if let Some(editor) = editor {
            copy(editor, &mut model, "MemoryUnit");
            copy(editor, &mut model, "MemorySwapUnit");
        }
        if let Some(container) = object_at(settings.content(), &[self.variant().spec_key()]) {
            Self::container_to_view_model(container, editor, &mut model);
        }
        model
    }

    fn form(&self) -> FormSchema {
        let mut fields = administration_form();
        fields.extend(
            ["Hostname", "Domainname", "User", "WorkingDir", "StopSignal", "StopTimeout"]
                .into_iter()
                .map(FieldSpec::text),
        );
        fields.extend(CONTAINER_LISTS.into_iter().map(FieldSpec::list));
        fields.push(FieldSpec::table("Env", &["Name", "Value"]));
        fields.push(FieldSpec::table("Labels", &["Key", "Value"]));
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
                ("HostIp", Control::text()),
                ("HostPort", Control::text()),
                ("ContainerPort", Control::text()),
                ("Protocol", Control::select(&["tcp", "udp"])),
            ],
        ));
        fields.push(FieldSpec::table("Links", &["Container", "Alias"]));
        fields.push(FieldSpec::table("ExtraHosts", &["Name", "Ip"]));
        fields.extend(HOST_STRINGS.into_iter().map(FieldSpec::text));
        fields.extend(HOST_FLAGS.into_iter().map(FieldSpec::checkbox));
        fields.extend(HOST_INTEGERS.into_iter().map(FieldSpec::text));
        fields.extend(HOST_LISTS.into_iter().map(FieldSpec::list));
        fields.push(FieldSpec::text("CPUs"));
        fields.push(FieldSpec::text("Memory"));
        fields.push(FieldSpec::scalar("MemoryUnit", Control::select(&MEMORY_UNITS)));
        fields.push(FieldSpec::text("MemorySwap"));
        fields.push(FieldSpec::scalar("MemorySwapUnit", Control::select(&MEMORY_UNITS)));
        fields.push(FieldSpec::checkbox("MemorySwapUnlimited"));
        fields.push(FieldSpec::table("Ulimits", &ULIMIT_FIELDS));
        fields.push(FieldSpec::text("LogType"));
        fields.push(FieldSpec::table("LogConfig", &["Key", "Value"]));
        FormSchema {
            prefix: "container".to_string(),
            fields,
        }
    }

    fn validation(&self) -> ValidationHandler {
        administration_validation()
            .field("run", "StopTimeout", vec![validation::integer_range(0, i32::MAX as i64)])
            .field("run", "Env", vec![validation::each_row(Some("Name"), validation::required())])
            .field("network", "Ports", vec![
                validation::each_row(Some("ContainerPort"), validation::required()),
                validation::each_row(Some("ContainerPort"), validation::port()),
                validation::each_row(Some("HostPort"), validation::port()),
            ])
            .field("storage", "Volumes", vec![validation::each_row(Some("PathInContainer"), validation::required())])
            .field("resources", "CPUs", vec![validation::positive_decimal()])
            .field("resources", "CpuQuota", vec![validation::integer_range(1000, i64::MAX)])
            .field("resources", "CpuShares", vec![validation::integer_range(0, i64::MAX)])
            .field("resources", "BlkioWeight", vec![validation::integer_range(10, 1000)])
            .field("resources", "MemoryUnit", vec![validation::memory_unit()])
            .field("resources", "MemorySwapUnit", vec![validation::memory_unit()])
            .field("resources", "Memory", vec![
                validation::integer_range(0, i64::MAX),
                validation::memory_floor("MemoryUnit"),
            ])
            .field("resources", "MemorySwap", vec![validation::integer_range(0, i64::MAX)])
            .field("advanced", "Ulimits", vec![
                validation::each_row(Some("Name"), validation::required()),
                validation::each_row(Some("Soft"), validation::integer()),
                validation::each_row(Some("Hard"), validation::integer()),
            ])
    }
}
