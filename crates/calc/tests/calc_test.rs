//! End-to-end expression scenarios: the calculator surface as a user
//! sees it, from source text through parse and evaluation.

mod testutil;

use pretty_assertions::assert_eq;
use serde_json::json;
use testutil::{context_with, eval_in, eval_str, run_script, v};

#[test]
fn test_arithmetic_precedence() {
    assert_eq!(eval_str("1 + 2 * 3"), v(json!(7)));
    assert_eq!(eval_str("(1 + 2) * 3"), v(json!(9)));
    assert_eq!(eval_str("2 * 3 + 4 * 5"), v(json!(26)));
}

#[test]
fn test_literal_round_trip() {
    for fixture in [
        json!(null),
        json!(true),
        json!(-12),
        json!(3.25),
        json!("text with \"quotes\""),
        json!([1, [2, 3], {"k": null}]),
        json!({"a": 1, "b": [true, false]}),
    ] {
        assert_eq!(eval_str(&fixture.to_string()), v(fixture));
    }
}

#[test]
fn test_slice_negative_index() {
    assert_eq!(eval_str("[1,2,3].slice(-2)"), v(json!([2, 3])));
}

#[test]
fn test_nested_member_access() {
    assert_eq!(eval_str("{x: 1, \"y\": 2, z: {w:3}}.z.w"), v(json!(3)));
}

#[test]
fn test_mixed_case_method_call() {
    let mut context = context_with("names", json!({"first": "ada"}));
    assert_eq!(eval_in("names.first.toMixedCase()", &mut context), v(json!("Ada")));
}

#[test]
fn test_replace_all_with_global_regex() {
    assert_eq!(
        eval_str("replaceAll(\"aXbXc\", /x/ig, \"-\")"),
        v(json!("a-b-c"))
    );
}

#[test]
fn test_aggregate_edge_cases() {
    assert_eq!(eval_str("sum([1,2,3,4])"), v(json!(10)));
    assert_eq!(eval_str("sum([])"), v(json!(0)));
    assert_eq!(eval_str("avg([])"), v(json!(null)));
}

#[test]
fn test_aggregate_identities() {
    let t = json!([{"n": 3}, {"n": 1}, {"n": 4}, {"n": 1}]);
    let mut context = context_with("t", t.clone());
    assert_eq!(eval_in("sum(t.n)", &mut context), v(json!(9)));
    assert_eq!(
        eval_in("count(t.n)", &mut context).as_i64(),
        Some(t.as_array().unwrap().len() as i64)
    );
    assert_eq!(eval_in("avg(t.n) == sum(t.n) / count(t.n)", &mut context), v(json!(true)));
    assert_eq!(eval_in("min(t.n)", &mut context), v(json!(1)));
    assert_eq!(eval_in("max(t.n)", &mut context), v(json!(4)));
}

#[test]
fn test_for_loop_accumulates() {
    assert_eq!(run_script("var x = 0; for (i of [1,2,3]) x = x + i; x"), v(json!(6)));
}

#[test]
fn test_throw_and_catch_message() {
    assert_eq!(
        run_script("try { throw \"E\",\"boom\" } catch (e) { e.message }"),
        v(json!("boom"))
    );
}

#[test]
fn test_coalesce() {
    assert_eq!(eval_str("{a:1,b:2} ?? \"nope\""), v(json!({"a": 1, "b": 2})));
    assert_eq!(eval_str("null ?? \"nope\""), v(json!("nope")));
}

#[test]
fn test_short_circuit_skips_right_side() {
    // 1/0 would evaluate to an error; short-circuiting must not reach it.
    assert_eq!(eval_str("false && 1/0"), v(json!(false)));
    assert_eq!(eval_str("true || 1/0"), v(json!(true)));
    assert_eq!(eval_str("false ? 1/0 : \"ok\""), v(json!("ok")));
    assert!(eval_str("true && 1/0").is_error());
}

#[test]
fn test_conditional_right_associative() {
    assert_eq!(eval_str("false ? 1 : true ? 2 : 3"), v(json!(2)));
    assert_eq!(eval_str("true ? 1 : true ? 2 : 3"), v(json!(1)));
}

#[test]
fn test_string_operators() {
    assert_eq!(eval_str("\"foo\" + \"bar\""), v(json!("foobar")));
    assert_eq!(eval_str("\"Hello\" like \"h?\" || \"Hello\" like \"h%\""), v(json!(true)));
    assert_eq!(eval_str("\"id_42\" like \"id__2\""), v(json!(true)));
}

#[test]
fn test_is_null_operators() {
    assert_eq!(eval_str("null is null"), v(json!(true)));
    assert_eq!(eval_str("5 is not null"), v(json!(true)));
    assert_eq!(eval_str("[1, null, 2] ## (this is null ? \"gap\" : this)"), v(json!([1, "gap", 2])));
}

#[test]
fn test_deferred_range_materialises_on_write() {
    // Property: a write materialises the deferred array, preserving the
    // elements it would have produced.
    assert_eq!(
        run_script("var r = 1 ... 3; r[] = 9; r"),
        v(json!([1, 2, 3, 9]))
    );
    assert_eq!(eval_str("(1 ... 4).slice(1)"), v(json!([2, 3, 4])));
}

#[test]
fn test_assignment_persistence() {
    assert_eq!(run_script("var x; x = 5; x"), v(json!(5)));
    let mut context = context_with("o", json!({"deep": {"list": [1, 2]}}));
    eval_in("o.deep.list[1] = 9", &mut context);
    assert_eq!(eval_in("o", &mut context), v(json!({"deep": {"list": [1, 9]}})));
    eval_in("o.fresh = true", &mut context);
    assert_eq!(eval_in("o.fresh", &mut context), v(json!(true)));
}

#[test]
fn test_maybe_assign() {
    assert_eq!(run_script("var x = null; x =?? 1; x =?? 2; x"), v(json!(1)));
}

#[test]
fn test_environment_access() {
    std::env::set_var("CALC_TEST_VAR", "present");
    assert_eq!(eval_str("$CALC_TEST_VAR"), v(json!("present")));
    assert_eq!(eval_str("$[\"CALC_TEST_VAR\"]"), v(json!("present")));
    assert_eq!(eval_str("$CALC_TEST_MISSING"), v(json!(null)));
    assert_eq!(eval_str("getenv(\"CALC_TEST_VAR\")"), v(json!("present")));
}

#[test]
fn test_each_group_find_operators() {
    let t = json!([{"a": 1, "b": "x"}, {"a": 2, "b": "y"}, {"a": 1, "b": "z"}]);
    let mut context = context_with("t", t);
    assert_eq!(eval_in("t ## b", &mut context), v(json!(["x", "y", "z"])));
    assert_eq!(eval_in("t @ (a == 1) ## b", &mut context), v(json!(["x", "z"])));
    assert_eq!(
        eval_in("groupBy(t, \"a\") # {a: a, n: count(*)}", &mut context),
        v(json!([{"a": 1, "n": 2}, {"a": 2, "n": 1}]))
    );
}

#[test]
fn test_user_function_context_isolation() {
    let script = "
        var outside = 1;
        function probe(n) {
            var inside = n + outside;
            return inside;
        }
        probe(10)";
    assert_eq!(run_script(script), v(json!(11)));

    // The function's local is invisible afterwards.
    let script = "
        function leaky() { var secret = 1; return 0 }
        void leaky();
        try { secret; \"visible\" } catch { \"hidden\" }";
    assert_eq!(run_script(script), v(json!("hidden")));
}

#[test]
fn test_keyed_errors() {
    let err = eval_str("nonesuch");
    assert_eq!(err.as_error().unwrap().key, "unknownVar");
    let err = eval_str("1 in 2");
    assert_eq!(err.as_error().unwrap().key, "typeError");
}
