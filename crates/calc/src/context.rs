//! The context: a stack of named-value layers that the evaluator
//! resolves names through, plus the open-file table. Layers are searched
//! top-down. Name resolution honours frame locality (layers belonging
//! to an older function frame are invisible), `this`/`that` binding,
//! autoloaders, and the var/const restriction when resolving the target
//! of an assignment.

use crate::config::{default_config, default_system};
use crate::files;
use json::{equal, Field, Value};
use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

/// How a single context layer is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LayerFlags(u16);

impl LayerFlags {
    /// Contains vars; assignment targets may live here.
    pub const VAR: LayerFlags = LayerFlags(1);
    /// Contains consts; lookup succeeds but assignment fails.
    pub const CONST: LayerFlags = LayerFlags(2);
    /// Visible from every function frame.
    pub const GLOBAL: LayerFlags = LayerFlags(4);
    /// May be addressed as `this` (newest) or `that` (second-newest).
    pub const THIS: LayerFlags = LayerFlags(8);
    /// Carries the current file's `data` variable.
    pub const DATA: LayerFlags = LayerFlags(16);
    /// A function frame boundary: arguments and local declarations.
    pub const ARGS: LayerFlags = LayerFlags(32);
    /// Consult the autoloader before the cached data, not after.
    pub const NOCACHE: LayerFlags = LayerFlags(64);

    pub fn contains(self, other: LayerFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn any(self, other: LayerFlags) -> bool {
        self.0 & other.0 != 0
    }
}

impl std::ops::BitOr for LayerFlags {
    type Output = LayerFlags;
    fn bitor(self, rhs: LayerFlags) -> LayerFlags {
        LayerFlags(self.0 | rhs.0)
    }
}

pub type Autoload = fn(&str) -> Option<Value>;

pub struct Layer {
    data: Rc<RefCell<Value>>,
    flags: LayerFlags,
    autoload: Option<Autoload>,
    /// Set by a successful write through this layer's data hook.
    modified: std::cell::Cell<bool>,
}

impl Layer {
    fn new(data: Value, flags: LayerFlags) -> Layer {
        Layer {
            data: Rc::new(RefCell::new(data)),
            flags,
            autoload: None,
            modified: std::cell::Cell::new(false),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FileEntry {
    pub filename: PathBuf,
    pub writable: bool,
}

/// One step of a resolved l-value: the syntactic dots and subscripts of
/// the target with subscript expressions already evaluated.
#[derive(Debug, Clone)]
pub enum PathStep {
    /// `.name` or `["name"]`
    Member(String),
    /// `[number]`
    Index(i64),
    /// `[key:value]` — the first row of a table whose `key` equals the
    /// value.
    KeyValue(String, Value),
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum AssignError {
    #[error("Invalid assignment")]
    BadLValue,
    #[error("Unknown variable \"{0}\"")]
    UnknownVar(String),
    #[error("Object has no member \"{0}\"")]
    UnknownMember(String),
    #[error("Attempt to access member in a non-object")]
    NotObject,
    #[error("Attempt to use a non-key as a member key")]
    NotKey,
    #[error("No element found with the requested subscript")]
    UnknownSub,
    #[error("Invalid key for [key:value] subscript")]
    BadSubKey,
    #[error("Subscript has invalid type")]
    SubType,
    #[error("Attempt to change const \"{0}\"")]
    Const(String),
    #[error("Can't append to {0} \"{1}\"")]
    Append(&'static str, String),
}

impl AssignError {
    /// Short stable key for tests and localisation.
    pub fn key(&self) -> &'static str {
        match self {
            AssignError::BadLValue => "badLValue",
            AssignError::UnknownVar(_) => "unknownVar",
            AssignError::UnknownMember(_) => "unknownMember",
            AssignError::NotObject => "notObject",
            AssignError::NotKey => "notKey",
            AssignError::UnknownSub => "unknownSub",
            AssignError::BadSubKey => "badSubKey",
            AssignError::SubType => "subType",
            AssignError::Const(_) => "const",
            AssignError::Append(_, _) => "append",
        }
    }
}

/// Which write the evaluator wants performed at the resolved location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    Assign,
    /// Write only when the existing value is null.
    AssignIfNull,
    /// Push onto an array.
    Append,
}

pub struct Context {
    /// Bottom first; the top of the stack is the last element.
    layers: Vec<Layer>,
    files: Vec<FileEntry>,
    current_file: Option<usize>,
    data_layer: usize,
    vars_layer: usize,
    consts_layer: usize,
    args_layer: Option<usize>,
}

impl Context {
    /// Build the standard context stack, bottom to top: system/config
    /// consts, clock-autoloading globals, the current-file data layer,
    /// optional command-line args, global consts, global vars.
    pub fn std(args: Option<Value>) -> Context {
        let mut layers = Vec::new();

        layers.push(Layer::new(
            Value::Object(vec![
                Field::new("config", default_config()),
                Field::new("system", default_system()),
            ]),
            LayerFlags::CONST,
        ));

        let mut base = Layer::new(
            Value::Object(
                ["now", "current_date", "current_time", "current_datetime", "current_timestamp"]
                    .iter()
                    .map(|name| Field::new(*name, Value::Null))
                    .collect(),
            ),
            LayerFlags::GLOBAL | LayerFlags::NOCACHE,
        );
        base.autoload = Some(clock_autoload);
        layers.push(base);

        let data_layer = layers.len();
        layers.push(Layer::new(
            Value::Object(vec![Field::new("data", Value::Null)]),
            LayerFlags::GLOBAL | LayerFlags::DATA | LayerFlags::VAR,
        ));

        let args_layer = args.map(|args| {
            layers.push(Layer::new(args, LayerFlags::GLOBAL | LayerFlags::CONST));
            layers.len() - 1
        });

        let consts_layer = layers.len();
        layers.push(Layer::new(Value::Object(vec![]), LayerFlags::GLOBAL | LayerFlags::CONST));
        let vars_layer = layers.len();
        layers.push(Layer::new(Value::Object(vec![]), LayerFlags::GLOBAL | LayerFlags::VAR));

        Context {
            layers,
            files: Vec::new(),
            current_file: None,
            data_layer,
            vars_layer,
            consts_layer,
            args_layer,
        }
    }

    pub fn push_layer(&mut self, data: Value, flags: LayerFlags) {
        self.layers.push(Layer::new(data, flags));
    }

    pub fn pop_layer(&mut self) {
        self.layers.pop();
    }

    pub fn depth(&self) -> usize {
        self.layers.len()
    }

    pub fn truncate(&mut self, depth: usize) {
        self.layers.truncate(depth);
    }

    /// Push the frame for a user function call: an args layer holding
    /// the parameter object (declaration defaults overlaid with the
    /// positional actuals), a `this` layer bound to the first argument,
    /// and empty local const/var layers.
    pub fn push_call_frame(&mut self, params: &Value, args: &[Value]) {
        let mut bound = params.clone();
        if let Some(fields) = params.fields() {
            for (field, actual) in fields.iter().zip(args.iter()) {
                bound.set(&field.property, actual.clone());
            }
        }
        self.push_layer(bound, LayerFlags::ARGS);
        if let Some(first) = args.first() {
            self.push_layer(first.clone(), LayerFlags::THIS);
        }
        self.push_layer(Value::Object(vec![]), LayerFlags::CONST);
        self.push_layer(Value::Object(vec![]), LayerFlags::VAR);
    }

    /// Look up a name and return a copy of its value.
    pub fn lookup(&self, key: &str) -> Option<Value> {
        self.find(key, false).map(|(_, value)| value)
    }

    /// The layer index an assignment to `key` would go through.
    fn find(&self, key: &str, for_assign: bool) -> Option<(usize, Value)> {
        if !for_assign && key == "global" {
            return Some((self.vars_layer, self.global_snapshot()));
        }

        let mut other_local = false;
        let mut first_this = true;
        for (at, layer) in self.layers.iter().enumerate().rev() {
            // Layers local to an older function frame are invisible.
            if layer.flags.contains(LayerFlags::GLOBAL) {
                other_local = false;
            }
            if other_local {
                continue;
            }

            if for_assign && !layer.flags.any(LayerFlags::VAR | LayerFlags::CONST) {
                continue;
            }

            if layer.flags.contains(LayerFlags::THIS) {
                if key.eq_ignore_ascii_case("this")
                    || (key.eq_ignore_ascii_case("that") && !first_this)
                {
                    return Some((at, layer.data.borrow().clone()));
                }
                first_this = false;
            }

            if !for_assign && layer.flags.contains(LayerFlags::NOCACHE) {
                if let Some(found) = layer.autoload.and_then(|autoload| autoload(key)) {
                    return Some((at, found));
                }
            }

            if let Some(found) = layer.data.borrow().get(key) {
                return Some((at, found.clone()));
            }

            if !for_assign && !layer.flags.contains(LayerFlags::NOCACHE) {
                if let Some(found) = layer.autoload.and_then(|autoload| autoload(key)) {
                    layer.data.borrow_mut().set(key, found.clone());
                    return Some((at, found));
                }
            }

            if layer.flags.contains(LayerFlags::ARGS) {
                other_local = true;
            }
        }
        None
    }

    /// Whether an assignment to this name would land on a var (true)
    /// or a const (false); None when no var/const layer holds it.
    pub fn var_writable(&self, key: &str) -> Option<bool> {
        let (at, _) = self.find(key, true)?;
        Some(!self.layers[at].flags.contains(LayerFlags::CONST))
    }

    /// Member of the top layer's data, for the switch/case machinery.
    pub fn top_member(&self, key: &str) -> Option<Value> {
        self.layers.last()?.data.borrow().get(key).cloned()
    }

    pub fn set_top_member(&mut self, key: &str, value: Value) {
        if let Some(layer) = self.layers.last() {
            layer.data.borrow_mut().set(key, value);
        }
    }

    /// A read-only object exposing the well-known global collections.
    fn global_snapshot(&self) -> Value {
        let mut members = vec![
            Field::new("vars", self.layers[self.vars_layer].data.borrow().clone()),
            Field::new("consts", self.layers[self.consts_layer].data.borrow().clone()),
        ];
        if let Some(at) = self.args_layer {
            members.push(Field::new("args", self.layers[at].data.borrow().clone()));
        }
        members.push(Field::new(
            "files",
            Value::Array(
                self.files
                    .iter()
                    .map(|f| {
                        Value::Object(vec![
                            Field::new("filename", Value::from(f.filename.display().to_string())),
                            Field::new("writable", Value::Bool(f.writable)),
                        ])
                    })
                    .collect(),
            ),
        ));
        Value::Object(members)
    }

    /// Declare a var or const in the innermost frame. Fails when the
    /// name is already declared in the frame.
    pub fn declare(&mut self, key: &str, value: Value, constant: bool) -> Result<(), ()> {
        let mut target = None;
        for (at, layer) in self.layers.iter().enumerate().rev() {
            if layer.flags.any(LayerFlags::VAR | LayerFlags::CONST | LayerFlags::ARGS)
                && layer.data.borrow().get(key).is_some()
            {
                return Err(());
            }
            if layer.flags.contains(LayerFlags::ARGS) {
                break;
            }
            let wanted = if constant { LayerFlags::CONST } else { LayerFlags::VAR };
            if target.is_none() && layer.flags.contains(wanted) {
                target = Some(at);
            }
        }
        let target = target.unwrap_or(if constant { self.consts_layer } else { self.vars_layer });
        self.layers[target].data.borrow_mut().set(key, value);
        Ok(())
    }

    /// Write through a resolved l-value path rooted at `root`.
    pub fn write(
        &mut self,
        root: &str,
        path: &[PathStep],
        rvalue: Value,
        kind: WriteKind,
    ) -> Result<(), AssignError> {
        let (at, _) = match self.find(root, true) {
            Some(found) => found,
            None => {
                // Distinguish a const from a genuinely unknown name.
                return match self.find(root, false) {
                    Some(_) => Err(AssignError::Const(root.to_string())),
                    None => Err(AssignError::UnknownVar(root.to_string())),
                };
            }
        };
        if self.layers[at].flags.contains(LayerFlags::CONST) {
            return Err(AssignError::Const(root.to_string()));
        }

        {
            let data = self.layers[at].data.clone();
            let mut data = data.borrow_mut();
            data.undefer();
            let mut node: &mut Value = match data.get_mut(root) {
                Some(node) => node,
                None => return Err(AssignError::UnknownVar(root.to_string())),
            };

            // Walk to the parent of the final target.
            for step in path.iter().take(path.len().saturating_sub(1)) {
                node.undefer();
                node = step_into(node, step)?;
            }
            node.undefer();

            match (kind, path.last()) {
                (WriteKind::Append, last) => {
                    let target = match last {
                        None => node,
                        Some(step) => step_into(node, step)?,
                    };
                    target.undefer();
                    match target {
                        Value::Array(elems) => elems.push(rvalue),
                        other => {
                            return Err(AssignError::Append(other.type_of(false), root.to_string()))
                        }
                    }
                }
                (kind, Some(step)) => {
                    write_step(node, step, rvalue, kind)?;
                }
                (WriteKind::AssignIfNull, None) => {
                    if node.is_null() {
                        *node = rvalue;
                    }
                }
                (WriteKind::Assign, None) => *node = rvalue,
            }
        }

        // A write through the data layer marks the file modified.
        if self.layers[at].flags.contains(LayerFlags::DATA) {
            self.layers[at].modified.set(true);
        }
        Ok(())
    }

    /// The parsed contents of the current file.
    pub fn data(&self) -> Value {
        self.layers[self.data_layer]
            .data
            .borrow()
            .get("data")
            .cloned()
            .unwrap_or(Value::Null)
    }

    pub fn set_data(&mut self, value: Value) {
        self.layers[self.data_layer].data.borrow_mut().set("data", value);
        self.layers[self.data_layer].modified.set(false);
    }

    pub fn data_modified(&self) -> bool {
        self.layers[self.data_layer].modified.get()
    }

    /// Edit the config object through the `set` command.
    pub fn apply_settings(&mut self, settings: &str) -> Result<(), String> {
        let data = self.layers[0].data.clone();
        let mut data = data.borrow_mut();
        let config = data.get_mut("config").ok_or("no config object")?;
        crate::config::apply_settings(config, settings)
    }

    pub fn files(&self) -> &[FileEntry] {
        &self.files
    }

    pub fn current_file(&self) -> Option<usize> {
        self.current_file
    }

    /// Register a file, or return the index it already has.
    pub fn add_file(&mut self, filename: PathBuf, writable: bool) -> usize {
        match self.files.iter().position(|f| f.filename == filename) {
            Some(at) => at,
            None => {
                self.files.push(FileEntry { filename, writable });
                self.files.len() - 1
            }
        }
    }

    /// Make the indexed file current. The outgoing file is written back
    /// first when it is writable and its data was modified.
    pub fn switch_file(&mut self, index: usize) -> Result<(), String> {
        if index >= self.files.len() {
            return Err("no such file".to_string());
        }
        if let Some(old) = self.current_file {
            if old != index && self.files[old].writable && self.data_modified() {
                files::update(&self.files[old].filename, &self.data())
                    .map_err(|err| format!("{}: {}", self.files[old].filename.display(), err))?;
            }
        }
        if self.current_file != Some(index) {
            let entry = &self.files[index];
            tracing::debug!(file = %entry.filename.display(), "loading data file");
            let text = files::load(&entry.filename)
                .map_err(|err| format!("{}: {}", entry.filename.display(), err))?;
            let parsed = Value::parse_str(&text)
                .map_err(|err| format!("{}: {}", entry.filename.display(), err))?;
            self.set_data(parsed);
            self.current_file = Some(index);
        }
        Ok(())
    }

    /// The default table for a FROM-less SELECT: `this` when it is a
    /// table, else the `data` variable, else the first table-valued
    /// member of `data`. Also names the choice for diagnostics.
    pub fn default_table(&self) -> Option<(Value, String)> {
        if let Some(this) = self.lookup("this") {
            if this.is_table() {
                return Some((this, "this".to_string()));
            }
        }
        let data = self.lookup("data")?;
        if data.is_table() {
            return Some((data, "data".to_string()));
        }
        if let Some(fields) = data.fields() {
            for f in fields {
                if f.value.is_table() {
                    return Some((f.value.clone(), format!("data.{}", f.property)));
                }
            }
        }
        None
    }
}

fn step_into<'v>(node: &'v mut Value, step: &PathStep) -> Result<&'v mut Value, AssignError> {
    node.undefer();
    match step {
        PathStep::Member(name) => match node {
            Value::Object(_) => node.get_mut(name).ok_or(AssignError::UnknownMember(name.clone())),
            _ => Err(AssignError::NotObject),
        },
        PathStep::Index(index) => {
            let len = node.array_len().ok_or(AssignError::SubType)? as i64;
            let index = if *index < 0 { *index + len } else { *index };
            if index < 0 || index >= len {
                return Err(AssignError::UnknownSub);
            }
            match node.as_vec_mut() {
                Some(elems) => Ok(&mut elems[index as usize]),
                None => Err(AssignError::SubType),
            }
        }
        PathStep::KeyValue(key, wanted) => {
            let elems = node.as_vec_mut().ok_or(AssignError::SubType)?;
            elems
                .iter_mut()
                .find(|row| row.get(key).map(|have| equal(have, wanted)).unwrap_or(false))
                .ok_or(AssignError::UnknownSub)
        }
    }
}

fn write_step(
    parent: &mut Value,
    step: &PathStep,
    rvalue: Value,
    kind: WriteKind,
) -> Result<(), AssignError> {
    match step {
        // New members may be created on an existing object.
        PathStep::Member(name) => match parent {
            Value::Object(_) => {
                if kind == WriteKind::AssignIfNull {
                    if let Some(existing) = parent.get(name) {
                        if !existing.is_null() {
                            return Ok(());
                        }
                    }
                }
                parent.set(name, rvalue);
                Ok(())
            }
            _ => Err(AssignError::NotObject),
        },
        _ => {
            let target = step_into(parent, step)?;
            if kind == WriteKind::AssignIfNull && !target.is_null() {
                return Ok(());
            }
            *target = rvalue;
            Ok(())
        }
    }
}

/// Autoloader for the clock names on the base globals layer. Values are
/// never cached; each read reflects the current time.
fn clock_autoload(key: &str) -> Option<Value> {
    use time::OffsetDateTime;

    let utc = OffsetDateTime::now_utc();
    let local = time::UtcOffset::current_local_offset()
        .map(|offset| utc.to_offset(offset))
        .unwrap_or(utc);

    let date = |t: OffsetDateTime| format!("{:04}-{:02}-{:02}", t.year(), t.month() as u8, t.day());
    let clock = |t: OffsetDateTime| format!("{:02}:{:02}:{:02}", t.hour(), t.minute(), t.second());

    match key.to_ascii_lowercase().as_str() {
        "now" => Some(Value::from(utc.unix_timestamp())),
        "current_date" => Some(Value::from(date(local))),
        "current_time" => Some(Value::from(clock(local))),
        "current_datetime" => Some(Value::from(format!("{}T{}", date(local), clock(local)))),
        "current_timestamp" => Some(Value::from(format!("{}T{}Z", date(utc), clock(utc)))),
        _ => None,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_declare_and_lookup() {
        let mut context = Context::std(None);
        context.declare("x", Value::from(5), false).unwrap();
        assert_eq!(context.lookup("x"), Some(Value::from(5)));
        assert!(context.declare("x", Value::Null, false).is_err());
    }

    #[test]
    fn test_assign_requires_var() {
        let mut context = Context::std(None);
        context.declare("k", Value::from(1), true).unwrap();
        let err = context.write("k", &[], Value::from(2), WriteKind::Assign).unwrap_err();
        assert_eq!(err.key(), "const");
        let err = context.write("nope", &[], Value::from(2), WriteKind::Assign).unwrap_err();
        assert_eq!(err.key(), "unknownVar");
    }

    #[test]
    fn test_nested_write() {
        let mut context = Context::std(None);
        context
            .declare("o", Value::from(json!({"a": {"b": [1, 2]}})), false)
            .unwrap();
        context
            .write(
                "o",
                &[PathStep::Member("a".into()), PathStep::Member("b".into()), PathStep::Index(1)],
                Value::from(9),
                WriteKind::Assign,
            )
            .unwrap();
        assert_eq!(context.lookup("o"), Some(Value::from(json!({"a": {"b": [1, 9]}}))));
    }

    #[test]
    fn test_append_and_maybe_assign() {
        let mut context = Context::std(None);
        context.declare("a", Value::from(json!([1])), false).unwrap();
        context.write("a", &[], Value::from(2), WriteKind::Append).unwrap();
        assert_eq!(context.lookup("a"), Some(Value::from(json!([1, 2]))));

        context.declare("n", Value::Null, false).unwrap();
        context.write("n", &[], Value::from(1), WriteKind::AssignIfNull).unwrap();
        context.write("n", &[], Value::from(2), WriteKind::AssignIfNull).unwrap();
        assert_eq!(context.lookup("n"), Some(Value::from(1)));
    }

    #[test]
    fn test_this_and_that() {
        let mut context = Context::std(None);
        context.push_layer(Value::from(json!({"row": 1})), LayerFlags::THIS);
        context.push_layer(Value::from(json!({"row": 2})), LayerFlags::THIS);
        assert_eq!(context.lookup("this"), Some(Value::from(json!({"row": 2}))));
        assert_eq!(context.lookup("that"), Some(Value::from(json!({"row": 1}))));
        assert_eq!(context.lookup("row"), Some(Value::from(2)));
    }

    #[test]
    fn test_frame_locality() {
        let mut context = Context::std(None);
        context.declare("g", Value::from(1), false).unwrap();
        context.push_call_frame(&Value::Object(vec![]), &[]);
        context.declare("local", Value::from(2), false).unwrap();
        // Globals stay visible, and the local var lands in the frame.
        assert_eq!(context.lookup("g"), Some(Value::from(1)));
        assert_eq!(context.lookup("local"), Some(Value::from(2)));

        let depth = context.depth();
        context.truncate(depth - 4);
        assert_eq!(context.lookup("local"), None);
    }

    #[test]
    fn test_key_value_subscript_write() {
        let mut context = Context::std(None);
        context
            .declare("t", Value::from(json!([{"id": 1, "v": "a"}, {"id": 2, "v": "b"}])), false)
            .unwrap();
        context
            .write(
                "t",
                &[PathStep::KeyValue("id".into(), Value::from(2)), PathStep::Member("v".into())],
                Value::from("z"),
                WriteKind::Assign,
            )
            .unwrap();
        assert_eq!(
            context.lookup("t"),
            Some(Value::from(json!([{"id": 1, "v": "a"}, {"id": 2, "v": "z"}])))
        );
    }

    #[test]
    fn test_default_table_prefers_this() {
        let mut context = Context::std(None);
        context.set_data(Value::from(json!({"t": [{"a": 1}]})));
        let (_, expr) = context.default_table().unwrap();
        assert_eq!(expr, "data.t");

        context.push_layer(Value::from(json!([{"b": 2}])), LayerFlags::THIS);
        let (_, expr) = context.default_table().unwrap();
        assert_eq!(expr, "this");
    }

    #[test]
    fn test_clock_autoload() {
        let context = Context::std(None);
        let now = context.lookup("now").unwrap();
        assert!(now.as_i64().unwrap() > 0);
        let stamp = context.lookup("current_timestamp").unwrap();
        assert!(stamp.as_str().unwrap().ends_with('Z'));
    }
}
