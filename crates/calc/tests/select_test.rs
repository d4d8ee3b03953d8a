//! End-to-end SELECT scenarios: SQL text in, plain JSON rows out.

mod testutil;

use pretty_assertions::assert_eq;
use serde_json::json;
use testutil::{context_with, eval_in, v};

fn sample() -> serde_json::Value {
    json!([
        {"dept": "eng",   "name": "ada",   "hours": 30},
        {"dept": "eng",   "name": "grace", "hours": 40},
        {"dept": "ops",   "name": "ken",   "hours": 20},
        {"dept": "eng",   "name": "rob",   "hours": 10},
        {"dept": "ops",   "name": "brian", "hours": 25},
    ])
}

#[test]
fn test_group_by_with_count_and_order() {
    let mut context = context_with("t", json!([
        {"a": 1, "b": "x"},
        {"a": 2, "b": "y"},
        {"a": 1, "b": "z"},
    ]));
    assert_eq!(
        eval_in("SELECT a, count(*) AS n FROM t GROUP BY a ORDER BY a", &mut context),
        v(json!([{"a": 1, "n": 2}, {"a": 2, "n": 1}]))
    );
}

#[test]
fn test_where_filters_rows() {
    let mut context = context_with("t", sample());
    assert_eq!(
        eval_in("SELECT name FROM t WHERE hours > 25", &mut context),
        v(json!([{"name": "ada"}, {"name": "grace"}]))
    );
}

#[test]
fn test_star_keeps_whole_rows() {
    let mut context = context_with("t", sample());
    assert_eq!(
        eval_in("SELECT * FROM t WHERE dept == \"ops\" ORDER BY name", &mut context),
        v(json!([
            {"dept": "ops", "name": "brian", "hours": 25},
            {"dept": "ops", "name": "ken",   "hours": 20},
        ]))
    );
}

#[test]
fn test_group_by_aggregates() {
    let mut context = context_with("t", sample());
    assert_eq!(
        eval_in(
            "SELECT dept, sum(hours) AS total, avg(hours) AS mean \
             FROM t GROUP BY dept ORDER BY dept",
            &mut context
        ),
        v(json!([
            {"dept": "eng", "total": 80, "mean": 80.0 / 3.0},
            {"dept": "ops", "total": 45, "mean": 22.5},
        ]))
    );
}

#[test]
fn test_implied_distinct_for_all_aggregate_columns() {
    let mut context = context_with("t", sample());
    // Without GROUP BY, an all-aggregate column list collapses to one row.
    assert_eq!(
        eval_in("SELECT count(*) AS n FROM t", &mut context),
        v(json!([{"n": 5}]))
    );
}

#[test]
fn test_having_filters_groups() {
    let mut context = context_with("t", sample());
    assert_eq!(
        eval_in(
            "SELECT dept FROM t GROUP BY dept HAVING count(*) > 2",
            &mut context
        ),
        v(json!([{"dept": "eng"}]))
    );
}

#[test]
fn test_order_by_descending_and_limit() {
    // Ordering applies to the projected rows, so the sort key must be
    // among the columns.
    let mut context = context_with("t", sample());
    assert_eq!(
        eval_in("SELECT name, hours FROM t ORDER BY hours DESC LIMIT 2", &mut context),
        v(json!([{"name": "grace", "hours": 40}, {"name": "ada", "hours": 30}]))
    );
}

#[test]
fn test_anonymous_column_named_by_source() {
    let mut context = context_with("t", sample());
    assert_eq!(
        eval_in("SELECT hours * 2 FROM t WHERE name == \"ken\"", &mut context),
        v(json!([{"hours * 2": 40}]))
    );
}

#[test]
fn test_default_table_from_data() {
    // With no FROM clause, the table comes from the context: here the
    // first table-valued member of the data variable.
    let mut context = context_with("t", sample());
    context.set_data(v(json!({"rows": [{"k": 1}, {"k": 2}]})));
    assert_eq!(
        eval_in("SELECT count(*) AS n", &mut context),
        v(json!([{"n": 2}]))
    );
}

#[test]
fn test_group_partition_property() {
    // The multiset union of groupBy's groups equals the input table,
    // and every group is uniform in its key.
    let mut context = context_with("t", sample());
    let grouped = eval_in("groupBy(t, [\"dept\"])", &mut context);
    let mut all = Vec::new();
    for group in grouped.elements() {
        let depts: Vec<String> = group
            .elements()
            .filter_map(|row| row.get("dept").and_then(|d| d.as_str().map(String::from)))
            .collect();
        assert!(depts.windows(2).all(|w| w[0] == w[1]), "mixed group: {:?}", depts);
        all.extend(group.elements().map(|row| row.into_owned()));
    }
    let mut expect: Vec<json::Value> = v(sample()).elements().map(|r| r.into_owned()).collect();
    all.sort_by(json::compare);
    expect.sort_by(json::compare);
    assert_eq!(all, expect);
}

#[test]
fn test_select_inside_script_keywords_stay_local() {
    // Outside a SELECT, clause keywords remain ordinary names.
    let mut context = context_with("from", json!({"where": 7}));
    assert_eq!(eval_in("from.where", &mut context), v(json!(7)));
}
