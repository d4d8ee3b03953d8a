//! File switching: loading a data file into the context, editing it
//! through assignments, and the write-back that happens when switching
//! away from a modified writable file.

mod testutil;

use calc::Context;
use json::Value;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::io::Write;
use testutil::{eval_in, v};

fn write_file(dir: &tempfile::TempDir, name: &str, content: &serde_json::Value) -> std::path::PathBuf {
    let path = dir.path().join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, "{}", content).unwrap();
    path
}

#[test]
fn test_switch_loads_data() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(&dir, "a.json", &json!({"rows": [{"k": 1}]}));

    let mut context = Context::std(None);
    let index = context.add_file(path, false);
    context.switch_file(index).unwrap();
    assert_eq!(eval_in("data.rows[0].k", &mut context), v(json!(1)));
}

#[test]
fn test_modified_file_written_back_on_switch() {
    let dir = tempfile::tempdir().unwrap();
    let first = write_file(&dir, "first.json", &json!({"rows": [{"k": 1}, {"k": 2}]}));
    let second = write_file(&dir, "second.json", &json!([1, 2, 3]));

    let mut context = Context::std(None);
    let first_at = context.add_file(first.clone(), true);
    let second_at = context.add_file(second, true);

    context.switch_file(first_at).unwrap();
    eval_in("data.rows[1].k = 9", &mut context);
    assert!(context.data_modified());

    // Switching away persists the edit.
    context.switch_file(second_at).unwrap();
    assert_eq!(eval_in("data", &mut context), v(json!([1, 2, 3])));

    let written = std::fs::read_to_string(&first).unwrap();
    assert_eq!(
        Value::parse_str(&written).unwrap(),
        v(json!({"rows": [{"k": 1}, {"k": 9}]}))
    );
}

#[test]
fn test_unmodified_file_not_rewritten() {
    let dir = tempfile::tempdir().unwrap();
    let first = write_file(&dir, "first.json", &json!({"k": 1}));
    let second = write_file(&dir, "second.json", &json!({"k": 2}));
    let before = std::fs::read_to_string(&first).unwrap();

    let mut context = Context::std(None);
    let first_at = context.add_file(first.clone(), true);
    let second_at = context.add_file(second, true);
    context.switch_file(first_at).unwrap();
    context.switch_file(second_at).unwrap();

    assert_eq!(std::fs::read_to_string(&first).unwrap(), before);
}

#[test]
fn test_file_command_switches() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(&dir, "data.json", &json!({"rows": [{"k": 1}, {"k": 2}]}));

    let mut context = Context::std(None);
    let script = format!("file {}; sizeOf(data.rows)", path.display());
    let out = calc::cmd::run_script(&script, &mut context).unwrap();
    assert_eq!(out, Some(v(json!(2))));
}
