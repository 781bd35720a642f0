//! Binds form controls to a view model and back.
//!
//! Which keys exist and whether they are plain fields or repeating table
//! sections comes from a [`FormSchema`]. Element ids are still derived as
//! `prefix_Key` and `prefix_Key_Index_SubKey`, but only to address
//! controls; nothing parses them back.

use std::collections::BTreeMap;
use std::fmt;

use log::{debug, warn};
use serde_json::{Map, Value};

use super::model::ViewModel;

#[derive(Clone, Debug, PartialEq)]
pub struct RadioOption {
    pub value: String,
    pub checked: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Control {
    Text(String),
    Password(String),
    Checkbox(bool),
    Radio(Vec<RadioOption>),
    Select { options: Vec<String>, selected: Option<usize> },
    Table(TableBody),
    /// Anything this binder has no coercion for, by tag name.
    Other(String),
}

impl Control {
    pub fn text() -> Self {
        Control::Text(String::new())
    }

    pub fn select(options: &[&str]) -> Self {
        Control::Select {
            options: options.iter().map(|option| option.to_string()).collect(),
            selected: None,
        }
    }

    pub fn radio(values: &[&str]) -> Self {
        Control::Radio(
            values
                .iter()
                .map(|value| RadioOption {
                    value: value.to_string(),
                    checked: false,
                })
                .collect(),
        )
    }

    fn tag(&self) -> &str {
        match self {
            Control::Text(_) => "text",
            Control::Password(_) => "password",
            Control::Checkbox(_) => "checkbox",
            Control::Radio(_) => "radio",
            Control::Select { .. } => "select",
            Control::Table(_) => "tbody",
            Control::Other(tag) => tag,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TableBody {
    pub rows: Vec<TableRow>,
}

/// A row without cells is a control row (an "add" button and the like).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TableRow {
    pub index: Option<usize>,
    pub cells: Vec<Cell>,
}

impl TableRow {
    pub fn control_row() -> Self {
        TableRow::default()
    }

    fn is_bound(&self) -> bool {
        !self.cells.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Cell {
    pub id: String,
    pub sub_key: Option<String>,
    pub control: Control,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Column {
    /// `None` for single-field rows bound to the whole array entry.
    pub key: Option<String>,
    pub template: Control,
}

#[derive(Clone, Debug, PartialEq)]
pub enum FieldKind {
    Scalar(Control),
    Table(Vec<Column>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct FieldSpec {
    pub key: String,
    pub kind: FieldKind,
}

impl FieldSpec {
    pub fn scalar(key: &str, control: Control) -> Self {
        FieldSpec {
            key: key.to_string(),
            kind: FieldKind::Scalar(control),
        }
    }

    pub fn text(key: &str) -> Self {
        Self::scalar(key, Control::text())
    }

    pub fn checkbox(key: &str) -> Self {
        Self::scalar(key, Control::Checkbox(false))
    }

    /// Repeating section whose rows hold a single text input.
    pub fn list(key: &str) -> Self {
        FieldSpec {
            key: key.to_string(),
            kind: FieldKind::Table(vec![Column {
                key: None,
                template: Control::text(),
            }]),
        }
    }

    /// Repeating section with one text input per sub key.
    pub fn table(key: &str, sub_keys: &[&str]) -> Self {
        Self::table_of(
            key,
            sub_keys
                .iter()
                .map(|sub_key| (*sub_key, Control::text()))
                .collect(),
        )
    }

    pub fn table_of(key: &str, columns: Vec<(&str, Control)>) -> Self {
        FieldSpec {
            key: key.to_string(),
            kind: FieldKind::Table(
                columns
                    .into_iter()
                    .map(|(sub_key, template)| Column {
                        key: Some(sub_key.to_string()),
                        template,
                    })
                    .collect(),
            ),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FormSchema {
    pub prefix: String,
    pub fields: Vec<FieldSpec>,
}

pub fn element_id(prefix: &str, key: &str, index: Option<usize>, sub_key: Option<&str>) -> String {
    match (index, sub_key) {
        (None, _) => format!("{}_{}", prefix, key),
        (Some(index), None) => format!("{}_{}_{}", prefix, key, index),
        (Some(index), Some(sub_key)) => format!("{}_{}_{}_{}", prefix, key, index, sub_key),
    }
}

/// Controls of a form, addressed by element id.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Form {
    pub controls: BTreeMap<String, Control>,
}

impl Form {
    pub fn get(&self, id: &str) -> Option<&Control> {
        self.controls.get(id)
    }

    pub fn insert(&mut self, id: impl Into<String>, control: Control) {
        self.controls.insert(id.into(), control);
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Diagnostic {
    pub element_id: String,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.element_id, self.message)
    }
}

fn diagnostic(element_id: &str, message: String) -> Diagnostic {
    warn!("Form binding {}: {}", element_id, message);
    Diagnostic {
        element_id: element_id.to_string(),
        message,
    }
}

pub struct ViewModelAccessor {
    schema: FormSchema,
}

impl ViewModelAccessor {
    pub fn new(schema: FormSchema) -> Self {
        ViewModelAccessor { schema }
    }

    pub fn schema(&self) -> &FormSchema {
        &self.schema
    }

    /// A form holding one blank control per field and an empty table body
    /// (with its trailing "add" row) per repeating section.
    pub fn blank_form(&self) -> Form {
        let mut form = Form::default();
        for field in &self.schema.fields {
            let control = match &field.kind {
                FieldKind::Scalar(template) => template.clone(),
                FieldKind::Table(_) => Control::Table(TableBody {
                    rows: vec![TableRow::control_row()],
                }),
            };
            form.insert(element_id(&self.schema.prefix, &field.key, None, None), control);
        }
        form
    }

    pub fn apply_view_model(&self, form: &mut Form, model: &ViewModel) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();
        for field in &self.schema.fields {
            let id = element_id(&self.schema.prefix, &field.key, None, None);
            let Some(control) = form.controls.get_mut(&id) else {
                debug!("No control {} in form, skipping", id);
                continue;
            };
            let value = model.get(&field.key);
            match (&field.kind, control) {
                (FieldKind::Table(columns), Control::Table(body)) => {
                    self.fill_table(&field.key, columns, body, value, &mut diagnostics)
                }
                (FieldKind::Table(_), other) => diagnostics.push(diagnostic(
                    &id,
                    format!("repeating section bound to a {} control", other.tag()),
                )),
                (FieldKind::Scalar(_), control) => write_control(control, value, &id, &mut diagnostics),
            }
        }
        diagnostics
    }

    fn fill_table(
        &self,
        key: &str,
        columns: &[Column],
        body: &mut TableBody,
        value: Option<&Value>,
        diagnostics: &mut Vec<Diagnostic>,
    ) {
        let entries: &[Value] = match value {
            Some(Value::Array(entries)) => entries,
            None | Some(Value::Null) => &[],
            Some(other) => {
                diagnostics.push(diagnostic(
                    &element_id(&self.schema.prefix, key, None, None),
                    format!("expected an array, got {}", other),
                ));
                &[]
            }
        };
        body.rows.retain(|row| !row.is_bound());
        let generated = entries.iter().enumerate().map(|(index, entry)| {
            let cells = columns
                .iter()
                .map(|column| {
                    let id = element_id(&self.schema.prefix, key, Some(index), column.key.as_deref());
                    let mut control = column.template.clone();
                    let cell_value = match &column.key {
                        None => Some(entry),
                        Some(sub_key) => entry.get(sub_key),
                    };
                    write_control(&mut control, cell_value, &id, diagnostics);
                    Cell {
                        id,
                        sub_key: column.key.clone(),
                        control,
                    }
                })
                .collect();
            TableRow {
                index: Some(index),
                cells,
            }
        });
        let generated: Vec<TableRow> = generated.collect();
        body.rows.splice(0..0, generated);
    }

    /// Reads the form back into a fresh view model.
    pub fn restore_view_model(&self, form: &Form) -> (ViewModel, Vec<Diagnostic>) {
        let mut model = Map::new();
        let mut diagnostics = Vec::new();
        for field in &self.schema.fields {
            let id = element_id(&self.schema.prefix, &field.key, None, None);
            let Some(control) = form.get(&id) else {
                continue;
            };
            match (&field.kind, control) {
                (FieldKind::Table(columns), Control::Table(body)) => {
                    let entries = body
                        .rows
                        .iter()
                        .filter(|row| row.is_bound())
                        .map(|row| read_row(row, columns.len() == 1 && columns[0].key.is_none(), &mut diagnostics))
                        .collect();
                    model.insert(field.key.clone(), Value::Array(entries));
                }
                (FieldKind::Table(_), other) => diagnostics.push(diagnostic(
                    &id,
                    format!("repeating section bound to a {} control", other.tag()),
                )),
                (FieldKind::Scalar(_), control) => {
                    if let Some(value) = read_control(control, &id, &mut diagnostics) {
                        model.insert(field.key.clone(), value);
                    }
                }
            }
        }
        (model, diagnostics)
    }
}

fn read_row(row: &TableRow, single: bool, diagnostics: &mut Vec<Diagnostic>) -> Value {
    if single {
        return row
            .cells
            .first()
            .and_then(|cell| read_control(&cell.control, &cell.id, diagnostics))
            .unwrap_or(Value::Null);
    }
    let mut entry = Map::new();
    for cell in &row.cells {
        let Some(sub_key) = &cell.sub_key else {
            continue;
        };
        if let Some(value) = read_control(&cell.control, &cell.id, diagnostics) {
            entry.insert(sub_key.clone(), value);
        }
    }
    Value::Object(entry)
}

fn as_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn write_control(control: &mut Control, value: Option<&Value>, id: &str, diagnostics: &mut Vec<Diagnostic>) {
    match control {
        Control::Text(current) | Control::Password(current) => *current = as_text(value),
        Control::Checkbox(checked) => *checked = matches!(value, Some(Value::Bool(true))),
        Control::Radio(options) => {
            let text = as_text(value);
            for option in options.iter_mut() {
                option.checked = value.is_some() && option.value == text;
            }
        }
        Control::Select { options, selected } => {
            let text = as_text(value);
            *selected = options.iter().position(|option| *option == text);
        }
        Control::Table(_) => diagnostics.push(diagnostic(id, "table body bound to a plain field".to_string())),
        Control::Other(tag) => diagnostics.push(diagnostic(id, format!("unsupported control {}", tag))),
    }
}

fn read_control(control: &Control, id: &str, diagnostics: &mut Vec<Diagnostic>) -> Option<Value> {
    match control {
        Control::Text(value) | Control::Password(value) => Some(Value::String(value.clone())),
        Control::Checkbox(checked) => Some(Value::Bool(*checked)),
        Control::Radio(options) => options
            .iter()
            .find(|option| option.checked)
            .map(|option| Value::String(option.value.clone())),
        Control::Select { options, selected } => selected
            .and_then(|index| options.get(index))
            .map(|option| Value::String(option.clone())),
        Control::Table(_) => {
            diagnostics.push(diagnostic(id, "table body bound to a plain field".to_string()));
            None
        }
        Control::Other(tag) => {
            diagnostics.push(diagnostic(id, format!("unsupported control {}", tag)));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn model(value: Value) -> ViewModel {
        value.as_object().cloned().unwrap()
    }

    fn accessor() -> ViewModelAccessor {
        ViewModelAccessor::new(FormSchema {
            prefix: "p".to_string(),
            fields: vec![
                FieldSpec::text("Image"),
                FieldSpec::scalar("Secret", Control::Password(String::new())),
                FieldSpec::checkbox("Privileged"),
                FieldSpec::scalar("Mode", Control::radio(&["ro", "rw"])),
                FieldSpec::scalar("Unit", Control::select(&["bytes", "MiB", "GiB"])),
                FieldSpec::list("items"),
                FieldSpec::table("Env", &["Name", "Value"]),
            ],
        })
    }

    #[test]
    fn single_field_table_rows() {
        let accessor = accessor();
        let mut form = Form::default();
        form.insert("p_items", Control::Table(TableBody::default()));
        let diagnostics = accessor.apply_view_model(&mut form, &model(json!({"items": ["a", "b"]})));
        assert!(diagnostics.is_empty());

        let Some(Control::Table(body)) = form.get("p_items") else {
            panic!("table body expected");
        };
        assert_eq!(body.rows.len(), 2);
        assert_eq!(body.rows[0].index, Some(0));
        assert_eq!(body.rows[1].index, Some(1));
        assert_eq!(body.rows[0].cells[0].id, "p_items_0");
        assert_eq!(body.rows[0].cells[0].control, Control::Text("a".to_string()));
        assert_eq!(body.rows[1].cells[0].control, Control::Text("b".to_string()));

        let (restored, diagnostics) = accessor.restore_view_model(&form);
        assert!(diagnostics.is_empty());
        assert_eq!(Value::Object(restored), json!({"items": ["a", "b"]}));
    }

    #[test]
    fn apply_then_restore_returns_model() {
        let accessor = accessor();
        let mut form = accessor.blank_form();
        let original = model(json!({
            "Image": "alpine:3",
            "Secret": "s3cret",
            "Privileged": true,
            "Mode": "rw",
            "Unit": "MiB",
            "items": ["x"],
            "Env": [{"Name": "A", "Value": "1"}, {"Name": "B", "Value": "2"}]
        }));
        assert!(accessor.apply_view_model(&mut form, &original).is_empty());
        let (restored, diagnostics) = accessor.restore_view_model(&form);
        assert!(diagnostics.is_empty());
        assert_eq!(restored, original);
    }

    #[test]
    fn multi_field_rows_get_sub_key_ids() {
        let accessor = accessor();
        let mut form = accessor.blank_form();
        accessor.apply_view_model(&mut form, &model(json!({"Env": [{"Name": "A", "Value": "1"}]})));
        let Some(Control::Table(body)) = form.get("p_Env") else {
            panic!("table body expected");
        };
        let ids: Vec<&str> = body.rows[0].cells.iter().map(|cell| cell.id.as_str()).collect();
        assert_eq!(ids, vec!["p_Env_0_Name", "p_Env_0_Value"]);
    }

    #[test]
    fn reapplying_replaces_rows_and_keeps_control_row() {
        let accessor = accessor();
        let mut form = accessor.blank_form();
        accessor.apply_view_model(&mut form, &model(json!({"items": ["a", "b", "c"]})));
        accessor.apply_view_model(&mut form, &model(json!({"items": ["z"]})));
        let Some(Control::Table(body)) = form.get("p_items") else {
            panic!("table body expected");
        };
        assert_eq!(body.rows.len(), 2);
        assert_eq!(body.rows[0].index, Some(0));
        assert_eq!(body.rows[1], TableRow::control_row());

        let (restored, _) = accessor.restore_view_model(&form);
        assert_eq!(restored["items"], json!(["z"]));
    }

    #[test]
    fn checkbox_needs_strict_true() {
        let accessor = accessor();
        let mut form = accessor.blank_form();
        accessor.apply_view_model(&mut form, &model(json!({"Privileged": "true"})));
        assert_eq!(form.get("p_Privileged"), Some(&Control::Checkbox(false)));
        accessor.apply_view_model(&mut form, &model(json!({"Privileged": true})));
        assert_eq!(form.get("p_Privileged"), Some(&Control::Checkbox(true)));
    }

    #[test]
    fn unmatched_select_and_radio_stay_unset() {
        let accessor = accessor();
        let mut form = accessor.blank_form();
        accessor.apply_view_model(&mut form, &model(json!({"Unit": "TiB", "Mode": "x"})));
        let (restored, _) = accessor.restore_view_model(&form);
        assert!(!restored.contains_key("Unit"));
        assert!(!restored.contains_key("Mode"));
    }

    #[test]
    fn numbers_are_written_as_text() {
        let accessor = accessor();
        let mut form = accessor.blank_form();
        accessor.apply_view_model(&mut form, &model(json!({"Image": 42})));
        assert_eq!(form.get("p_Image"), Some(&Control::Text("42".to_string())));
    }

    #[test]
    fn unknown_control_is_a_diagnostic() {
        let accessor = accessor();
        let mut form = accessor.blank_form();
        form.insert("p_Image", Control::Other("textarea".to_string()));
        let diagnostics = accessor.apply_view_model(&mut form, &model(json!({"Image": "alpine"})));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].element_id, "p_Image");

        let (restored, diagnostics) = accessor.restore_view_model(&form);
        assert!(!restored.contains_key("Image"));
        assert_eq!(diagnostics.len(), 1);
    }

    #[test]
    fn missing_controls_are_skipped() {
        let accessor = accessor();
        let mut form = Form::default();
        assert!(accessor
            .apply_view_model(&mut form, &model(json!({"Image": "alpine"})))
            .is_empty());
        let (restored, _) = accessor.restore_view_model(&form);
        assert!(restored.is_empty());
    }
}
