//! End-to-end script execution tests: the run operation, control flow,
//! sandbox budgets, the type system's operator special cases, storage,
//! and the host bridge.

use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use serde_json::json;

use ccscript::bridge::storage::{MemoryStorage, StorageEngine};
use ccscript::bridge::{Sleeper, StaticBridge};
use ccscript::interpreter::{Executor, RunOutput, RunRequest, ScriptError};
use ccscript::snapshot::{GuildSnapshot, InvocationSnapshot, MemberSnapshot};

/// Records sleeps instead of performing them, so suites never wait.
#[derive(Clone, Default)]
struct RecordingSleeper(Arc<Mutex<Vec<StdDuration>>>);

impl Sleeper for RecordingSleeper {
    fn sleep(&self, d: StdDuration) {
        self.0.lock().unwrap().push(d);
    }
}

fn snapshot() -> InvocationSnapshot {
    InvocationSnapshot {
        guild: GuildSnapshot { id: String::from("guild-1"), name: String::from("Test Guild") },
        author: MemberSnapshot {
            id: String::from("9"),
            name: String::from("ada"),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn executor() -> (Executor, RecordingSleeper) {
    executor_with_bridge(StaticBridge::new())
}

fn executor_with_bridge(bridge: StaticBridge) -> (Executor, RecordingSleeper) {
    let sleeper = RecordingSleeper::default();
    let executor = Executor::new(
        Box::new(bridge),
        StorageEngine::new(Box::new(MemoryStorage::new())),
    )
    .with_sleeper(Box::new(sleeper.clone()));

    (executor, sleeper)
}

fn run(code: &str) -> Result<RunOutput, ScriptError> {
    let (executor, _) = executor();
    executor.run(RunRequest { id: "test", code, program: None }, &snapshot())
}

fn content(code: &str) -> String {
    match run(code) {
        Ok(out) => out.content.unwrap_or_else(|| panic!("no content for {code:?}")),
        Err(e) => panic!("script failed: {e}\n{code}"),
    }
}

fn runtime_message(code: &str) -> String {
    match run(code) {
        Err(ScriptError::Runtime { message, .. }) => message,
        other => panic!("expected a runtime error, got {other:?}"),
    }
}

// === reply and top-level control flow ===

#[test]
fn reply_carries_the_result() {
    assert_eq!(content("reply 5 + 3;"), "8");
}

#[test]
fn script_without_reply_produces_nothing() {
    let out = run("x = 1;").unwrap();
    assert_eq!(out, RunOutput::default());
}

#[test]
fn top_level_return_does_not_terminate_the_script() {
    assert_eq!(content("return\nreply 'after'"), "after");
}

#[test]
fn reply_stops_execution_immediately() {
    assert_eq!(content("reply 'first'\nreply 'second'"), "first");
}

#[test]
fn reply_unwinds_out_of_callbacks() {
    // reply from inside a map callback still ends the whole script
    let code = "\
        [1, 2, 3].map(func(v) {\n\
            if (v == 2) { reply 'found ' + v; }\n\
            return v;\n\
        });\n\
        reply 'not reached';";
    assert_eq!(content(code), "found 2");
}

#[test]
fn object_replies_become_embeds() {
    let out = run("reply {title: 'Stats', description: 'all good'};").unwrap();
    assert_eq!(out.content, None);
    assert_eq!(
        out.embed,
        Some(json!({ "title": "Stats", "description": "all good" }))
    );
}

// === loops and the sandbox budgets ===

#[test]
fn loop_at_the_iteration_ceiling_succeeds() {
    let code = "\
        n = 0;\n\
        for (i = 0; i < 100000; i = i + 1) { n = n + 1; }\n\
        reply n;";
    assert_eq!(content(code), "100000");
}

#[test]
fn loop_past_the_iteration_ceiling_fails() {
    let code = "for (i = 0; i < 100001; i = i + 1) { }";
    let message = runtime_message(code);
    assert!(message.contains("100000 iterations"), "got: {message}");
}

#[test]
fn while_loops_enforce_the_same_ceiling() {
    let message = runtime_message("while (true) { }");
    assert!(message.contains("100000 iterations"));
}

#[test]
fn break_and_continue() {
    let code = "\
        total = 0;\n\
        for (i = 0; i < 10; i = i + 1) {\n\
            if (i == 7) { break; }\n\
            if (i % 2 == 0) { continue; }\n\
            total = total + i;\n\
        }\n\
        reply total;";
    // 1 + 3 + 5
    assert_eq!(content(code), "9");
}

#[test]
fn for_of_over_number_counts_up_from_zero() {
    assert_eq!(content("s = ''\nfor (i of 4) { s = s + i }\nreply s"), "0123");
}

#[test]
fn for_of_over_fractional_number_keeps_the_loop_condition() {
    // i < 3.5 admits 0, 1, 2, 3
    assert_eq!(content("c = 0\nfor (i of 3.5) { c = c + 1 }\nreply c"), "4");
}

#[test]
fn for_of_over_string_iterates_characters() {
    assert_eq!(content("s = ''\nfor (c of 'abc') { s = c + s }\nreply s"), "cba");
}

#[test]
fn for_of_over_object_iterates_keys() {
    assert_eq!(
        content("s = ''\nfor (k of {a: 1, b: 2}) { s = s + k }\nreply s"),
        "ab"
    );
}

#[test]
fn for_of_over_null_is_an_error() {
    let message = runtime_message("for (x of null) { }");
    assert!(message.contains("not iterable"));
}

#[test]
fn for_of_over_infinity_is_an_error() {
    let message = runtime_message("for (x of 1 / 0) { }");
    assert!(message.contains("non-finite"));
}

// === sleep ===

#[test]
fn sleep_zero_completes_without_delay() {
    let (executor, sleeper) = executor();
    executor
        .run(RunRequest { id: "t", code: "sleep 0; reply 'ok';", program: None }, &snapshot())
        .unwrap();
    assert_eq!(*sleeper.0.lock().unwrap(), vec![StdDuration::ZERO]);
}

#[test]
fn sleep_negative_fails() {
    let message = runtime_message("sleep -1;");
    assert!(message.contains("must be positive"), "got: {message}");
}

#[test]
fn sleep_accepts_durations() {
    let (executor, sleeper) = executor();
    executor
        .run(
            RunRequest { id: "t", code: "sleep Duration('2s');", program: None },
            &snapshot(),
        )
        .unwrap();
    assert_eq!(*sleeper.0.lock().unwrap(), vec![StdDuration::from_secs(2)]);
}

// === scoping ===

#[test]
fn assignment_in_nested_block_resolves_to_the_outer_binding() {
    assert_eq!(content("x = 1\n{ x = 2 }\nreply x"), "2");
}

#[test]
fn reading_an_undeclared_variable_fails() {
    let message = runtime_message("reply nothing_here;");
    assert!(message.contains("not declared yet"), "got: {message}");
}

#[test]
fn redeclaring_a_function_name_fails() {
    let message = runtime_message("func f() { }\nfunc f() { }");
    assert!(message.contains("cannot redeclare"), "got: {message}");
}

#[test]
fn duplicate_parameter_names_fail() {
    let message = runtime_message("func f(a, a) { }\nf(1, 2);");
    assert!(message.contains("cannot redeclare"), "got: {message}");
}

#[test]
fn closures_capture_their_defining_scope() {
    let code = "\
        func adder(n) {\n\
            return func(v) { return v + n; };\n\
        }\n\
        addTen = adder(10);\n\
        reply [1, 2, 3].map(addTen).join(',');";
    assert_eq!(content(code), "11,12,13");
}

#[test]
fn callbacks_resolve_outer_variables_through_natives() {
    let code = "\
        base = 100;\n\
        reply [1, 2].map(func(v) { return base + v; }).join('-');";
    assert_eq!(content(code), "101-102");
}

#[test]
fn missing_arguments_bind_as_null() {
    assert_eq!(content("func f(a, b) { return String(b); }\nreply f(1);"), "null");
}

#[test]
fn excess_arguments_are_dropped() {
    assert_eq!(content("func f(a) { return a; }\nreply f(7, 8, 9);"), "7");
}

// === values and operators ===

#[test]
fn time_plus_duration_shifts_the_instant() {
    let code = "\
        t = Time(0) + Duration(3600000);\n\
        reply t.epoch();";
    assert_eq!(content(code), "3600000");
}

#[test]
fn duration_sum_stays_a_duration() {
    assert_eq!(content("reply (Duration(1000) + Duration(500)).millis();"), "1500");
}

#[test]
fn duration_scales_by_numbers() {
    assert_eq!(content("reply (Duration('10m') * 3).minutes();"), "30");
}

#[test]
fn time_minus_time_is_rejected_at_the_operator() {
    let message = runtime_message("x = Time(0) - Time(0);");
    assert!(message.contains("cannot apply"), "got: {message}");
}

#[test]
fn time_diff_yields_a_duration() {
    assert_eq!(content("reply Time(5000).diff(Time(2000)).millis();"), "3000");
}

#[test]
fn string_concat_falls_back_from_plus() {
    assert_eq!(content("reply 'n = ' + 4;"), "n = 4");
    assert_eq!(content("s = 'a'\ns += 1\nreply s"), "a1");
}

#[test]
fn exponent_is_right_associative_at_runtime() {
    assert_eq!(content("reply 2 ^ 3 ^ 2;"), "512");
}

#[test]
fn conditional_expression_selects_by_truth() {
    assert_eq!(content("reply 2 > 1 then 'yes' else 'no';"), "yes");
}

#[test]
fn logical_operators_return_operands() {
    assert_eq!(content("reply null or 'fallback';"), "fallback");
    assert_eq!(content("reply 'first' and 'second';"), "second");
}

#[test]
fn property_access_on_null_names_the_property() {
    let message = runtime_message("x = null;\nreply x.someProp;");
    assert!(message.contains("someProp"), "got: {message}");
    assert!(message.contains("null"), "got: {message}");
}

#[test]
fn absent_properties_read_as_null() {
    assert_eq!(content("reply String({a: 1}.missing);"), "null");
}

#[test]
fn compound_assignment_on_members_matches_variables() {
    let code = "\
        o = {n: 1};\n\
        v = 1;\n\
        o.n += 2;\n\
        v += 2;\n\
        reply o.n + ',' + v;";
    assert_eq!(content(code), "3,3");
}

#[test]
fn update_operators_on_members_and_variables() {
    let code = "\
        o = {n: 1};\n\
        i = 10;\n\
        o.n++;\n\
        reply --i + ',' + o.n;";
    assert_eq!(content(code), "9,2");
}

#[test]
fn string_methods_chain() {
    assert_eq!(content("reply '  hi there  '.trim().upper();"), "HI THERE");
}

#[test]
fn regex_literals_match() {
    assert_eq!(content("reply /a(b+)c/.exec('xabbc')[1];"), "bb");
    assert_eq!(content("reply String(/^\\d+$/.test('12345'));"), "true");
}

#[test]
fn arrays_tolerate_mixed_element_types() {
    assert_eq!(content("reply [1, 'two', true, null].join('|');"), "1|two|true|null");
}

#[test]
fn sort_with_a_user_comparator() {
    let code = "reply [3, 1, 2].sort(func(a, b) { return b - a; }).join(',');";
    assert_eq!(content(code), "3,2,1");
}

// === error reporting ===

#[test]
fn runtime_errors_carry_the_call_stack_innermost_first() {
    let code = "\
        func inner() { return null.x; }\n\
        func outer() { return inner(); }\n\
        outer();";
    let Err(ScriptError::Runtime { stack, .. }) =
        run(code)
    else {
        panic!("expected a runtime error")
    };

    assert!(stack[0].contains("inner"), "stack: {stack:?}");
    assert!(stack[1].contains("outer"), "stack: {stack:?}");
}

#[test]
fn runtime_errors_point_into_the_source() {
    let message = runtime_message("x = 1;\ny = x + null.z;");
    // the excerpt pointer renders the offending line
    assert!(message.contains("null.z"), "got: {message}");
}

#[test]
fn syntax_errors_surface_through_run() {
    let result = run("reply 1 +;");
    assert!(matches!(result, Err(ScriptError::Syntax(ref errors)) if !errors.is_empty()));
}

// === storage ===

#[test]
fn storage_round_trips_every_literal_shape() {
    let code = "\
        s = storage('db');\n\
        s.set('null', null);\n\
        s.set('bool', true);\n\
        s.set('num', 4.5);\n\
        s.set('str', 'hello');\n\
        s.set('list', [1, 'two', null, true]);\n\
        s.set('obj', {a: 1, b: 'x'});\n\
        list = s.get('list');\n\
        obj = s.get('obj');\n\
        reply String(s.get('null')) + '|' + s.get('bool') + '|' + s.get('num')\n\
            + '|' + s.get('str') + '|' + list.join(',') + '|' + obj.a + obj.b;";
    assert_eq!(content(code), "null|true|4.5|hello|1,two,null,true|1x");
}

#[test]
fn storage_rejects_functions_at_set_time() {
    let message = runtime_message("storage('db').set('f', func() { });");
    assert!(message.contains("cannot be stored"), "got: {message}");
}

#[test]
fn storage_keys_and_delete() {
    let code = "\
        s = storage('db');\n\
        s.set('a', 1);\n\
        s.set('b', 2);\n\
        s.delete('a');\n\
        reply s.keys().join(',') + '|' + String(s.has('a')) + '|' + String(s.has('b'));";
    assert_eq!(content(code), "b|false|true");
}

#[test]
fn storage_persists_across_runs_of_one_executor() {
    let (executor, _) = executor();
    let snap = snapshot();

    executor
        .run(
            RunRequest { id: "w", code: "storage('db').set('n', 41);", program: None },
            &snap,
        )
        .unwrap();
    let out = executor
        .run(
            RunRequest { id: "r", code: "reply storage('db').get('n') + 1;", program: None },
            &snap,
        )
        .unwrap();

    assert_eq!(out.content.as_deref(), Some("42"));
}

// === host bridge ===

#[test]
fn accessors_resolve_through_the_bridge() {
    let bridge = StaticBridge::new();
    bridge.provide(
        ccscript::bridge::topic::MEMBER_GET,
        json!({ "id": "42", "name": "zed", "roles": ["1", "2"] }),
    );
    let (executor, _) = executor_with_bridge(bridge);

    let out = executor
        .run(
            RunRequest {
                id: "t",
                code: "m = Member('<@42>');\nreply m.name + ':' + m.roles.length;",
                program: None,
            },
            &snapshot(),
        )
        .unwrap();
    assert_eq!(out.content.as_deref(), Some("zed:2"));
}

#[test]
fn bridge_rejection_is_an_ordinary_script_error() {
    let message = runtime_message("Member('1');");
    assert!(message.contains("platform error"), "got: {message}");
}

// === snapshot bindings ===

#[test]
fn snapshot_bindings_are_in_scope() {
    let out = run("reply user.name + '@' + guild.name;");
    assert_eq!(out.unwrap().content.as_deref(), Some("ada@Test Guild"));
}

#[test]
fn parse_args_types_the_raw_text() {
    let (executor, _) = executor();
    let mut snap = snapshot();
    snap.args_raw = String::from("3 2h yes bob");

    let code = "\
        parsed = parseArgs('number', 'duration', 'boolean', 'string');\n\
        reply (parsed[0] + 1) + '|' + parsed[1].hours() + '|' + String(parsed[2]) + '|' + parsed[3];";
    let out = executor
        .run(RunRequest { id: "t", code, program: None }, &snap)
        .unwrap();

    assert_eq!(out.content.as_deref(), Some("4|2|true|bob"));
}

#[test]
fn cleanup_leaves_a_reusable_executor() {
    let (executor, _) = executor();
    let snap = snapshot();

    // a failing run must not poison the next one
    let failed = executor.run(
        RunRequest { id: "bad", code: "x = null.y;", program: None },
        &snap,
    );
    assert!(failed.is_err());

    let out = executor
        .run(RunRequest { id: "good", code: "reply 'fine';", program: None }, &snap)
        .unwrap();
    assert_eq!(out.content.as_deref(), Some("fine"));
}
