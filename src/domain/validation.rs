use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;
use split_iter::Splittable;

use super::mapper::convert;
use super::model::ViewModel;
use super::units;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Issue {
    pub field: String,
    pub tab: String,
    pub severity: Severity,
    pub message: String,
}

/// Gets the field value (if any) and the whole view model for cross-field
/// checks.
pub type Validator = Box<dyn Fn(Option<&Value>, &ViewModel) -> Option<(Severity, String)> + Send + Sync>;

struct Rule {
    field: String,
    tab: String,
    validators: Vec<Validator>,
}

#[derive(Default)]
pub struct ValidationHandler {
    rules: Vec<Rule>,
}

impl ValidationHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, tab: &str, field: &str, validators: Vec<Validator>) -> Self {
        self.rules.push(Rule {
            field: field.to_string(),
            tab: tab.to_string(),
            validators,
        });
        self
    }

    /// Validators of a field run in order; the first error ends that
    /// field's pipeline, warnings do not.
    pub fn validate(&self, model: &ViewModel) -> ValidationReport {
        let mut issues = Vec::new();
        for rule in &self.rules {
            let value = model.get(&rule.field);
            for validator in &rule.validators {
                if let Some((severity, message)) = validator(value, model) {
                    issues.push(Issue {
                        field: rule.field.clone(),
                        tab: rule.tab.clone(),
                        severity,
                        message,
                    });
                    if severity == Severity::Error {
                        break;
                    }
                }
            }
        }
        let (warnings, errors) = issues
            .into_iter()
            .split(|issue| issue.severity == Severity::Error);
        ValidationReport {
            warnings: warnings.collect(),
            errors: errors.collect(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct ValidationReport {
    pub errors: Vec<Issue>,
    pub warnings: Vec<Issue>,
}

impl ValidationReport {
    pub fn error_count_by_tab(&self) -> BTreeMap<String, usize> {
        self.errors.iter().fold(BTreeMap::new(), |mut counts, issue| {
            *counts.entry(issue.tab.clone()).or_insert(0) += 1;
            counts
        })
    }

    /// Save and test actions are refused while any error remains.
    pub fn blocks_save(&self) -> bool {
        !self.errors.is_empty()
    }
}

fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        _ => false,
    }
}

fn error(message: impl Into<String>) -> Option<(Severity, String)> {
    Some((Severity::Error, message.into()))
}

pub fn required() -> Validator {
    Box::new(|value: Option<&Value>, _: &ViewModel| {
        if is_blank(value) {
            error("This field is required")
        } else {
            None
        }
    })
}

pub fn integer() -> Validator {
    integer_range(i64::MIN, i64::MAX)
}

pub fn integer_range(min: i64, max: i64) -> Validator {
    Box::new(move |value: Option<&Value>, _: &ViewModel| {
        if is_blank(value) {
            return None;
        }
        match value.and_then(convert::integer) {
            None => error("An integer is expected"),
            Some(n) if n < min || n > max => error(format!("Value must be between {} and {}", min, max)),
            Some(_) => None,
        }
    })
}

pub fn port() -> Validator {
    integer_range(1, 65535)
}

pub fn positive_decimal() -> Validator {
    Box::new(|value: Option<&Value>, _: &ViewModel| {
        if is_blank(value) {
            return None;
        }
        match value.and_then(convert::decimal) {
            Some(n) if n > 0.0 => None,
            _ => error("A positive number is expected"),
        }
    })
}

pub fn memory_unit() -> Validator {
    Box::new(|value: Option<&Value>, _: &ViewModel| match value.and_then(Value::as_str) {
        Some(unit) if !units::is_memory_unit(unit) => error(format!("Unknown memory unit {}", unit)),
        _ => None,
    })
}

pub fn time_unit() -> Validator {
    Box::new(|value: Option<&Value>, _: &ViewModel| match value.and_then(Value::as_str) {
        Some(unit) if !units::is_time_unit(unit) => error(format!("Unknown time unit {}", unit)),
        _ => None,
    })
}

/// Docker refuses limits under 4 MiB; only warn since the daemon has the
/// final word.
pub fn memory_floor(unit_field: &'static str) -> Validator {
    const FLOOR: i64 = 4 * 1024 * 1024;
    Box::new(move |value: Option<&Value>, model: &ViewModel| {
        let amount = value.and_then(convert::integer)?;
        let unit = model
            .get(unit_field)
            .and_then(Value::as_str)
            .unwrap_or(units::DEFAULT_MEMORY_UNIT);
        let bytes = units::to_bytes(amount, unit).ok()?;
        if bytes != units::UNLIMITED && bytes < FLOOR {
            Some((Severity::Warning, "Memory limit below 4 MiB will be refused by Docker".to_string()))
        } else {
            None
        }
    })
}

pub fn image_unless_official() -> Validator {
    Box::new(|value: Option<&Value>, model: &ViewModel| {
        let official = matches!(model.get("UseOfficialTCAgentImage"), Some(Value::Bool(true)));
        if !official && is_blank(value) {
            error("An image is required unless the official agent image is used")
        } else {
            None
        }
    })
}

/// Runs `validator` against `sub_key` of every entry of a repeating section
/// (or the entry itself when `sub_key` is `None`).
pub fn each_row(sub_key: Option<&'static str>, validator: Validator) -> Validator {
    Box::new(move |value: Option<&Value>, model: &ViewModel| {
        let entries = value.and_then(Value::as_array)?;
        entries.iter().enumerate().find_map(|(index, entry)| {
            let cell = match sub_key {
                Some(sub_key) => entry.get(sub_key),
                None => Some(entry),
            };
            validator(cell, model).map(|(severity, message)| (severity, format!("Row {}: {}", index + 1, message)))
        })
    })
}
