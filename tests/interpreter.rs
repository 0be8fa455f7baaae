use std::fs;

use pretty_assertions::assert_eq;
use tempfile::tempdir;
use vint::{
    diagnostics::VintError,
    output::Output,
    runtime::{ExecutionContext, Interpreter},
    value::{Value, ValueKind},
};

fn eval(source: &str) -> Value {
    let mut interpreter = Interpreter::with_context(quiet_context());
    interpreter
        .eval_source(source)
        .expect("evaluation should succeed")
}

fn eval_error(source: &str) -> String {
    let mut interpreter = Interpreter::with_context(quiet_context());
    match interpreter.eval_source(source) {
        Ok(value) => panic!("expected error, received value {value}"),
        Err(VintError::Diagnostic(diag)) => diag.message,
        Err(other) => panic!("expected diagnostic, received {other}"),
    }
}

/// Runs `source` and returns everything it printed.
fn eval_output(source: &str) -> String {
    let output = Output::buffer();
    let mut interpreter =
        Interpreter::with_context(ExecutionContext::default().with_output(output.clone()));
    interpreter
        .eval_source(source)
        .expect("evaluation should succeed");
    output.captured()
}

fn quiet_context() -> ExecutionContext {
    ExecutionContext::default().with_output(Output::buffer())
}

fn expect_int(value: &Value) -> i64 {
    match value.kind() {
        ValueKind::Int(n) => *n,
        _ => panic!("expected Int, found {}", value.type_name()),
    }
}

fn expect_bool(value: &Value) -> bool {
    match value.kind() {
        ValueKind::Bool(b) => *b,
        _ => panic!("expected Bool, found {}", value.type_name()),
    }
}

fn expect_string(value: &Value) -> String {
    match value.kind() {
        ValueKind::String(text) => text.clone(),
        _ => panic!("expected String, found {}", value.type_name()),
    }
}

#[test]
fn evaluates_basic_arithmetic() {
    assert_eq!(expect_int(&eval("2 + 3 * 4")), 14);
    assert_eq!(expect_int(&eval("2 ** 10")), 1024);
    assert_eq!(expect_int(&eval("6 / 3")), 2);
    assert_eq!(eval("7 / 2").inspect(), "3.5");
    assert_eq!(eval("1 + 0.5").inspect(), "1.5");
}

#[test]
fn integer_powers_stay_integers() {
    assert_eq!(expect_string(&eval("type(2 ** 3)")), "INTEGER");
    assert_eq!(expect_string(&eval("type(2 ** -1)")), "FLOAT");
    assert_eq!(eval("2 ** -1").inspect(), "0.5");
}

#[test]
fn returns_last_expression_from_script() {
    let value = eval(
        r#"
        let x = 40
        x + 2
        "#,
    );
    assert_eq!(expect_int(&value), 42);
}

#[test]
fn top_level_return_ends_the_program() {
    let value = eval(
        r#"
        return 1
        2
        "#,
    );
    assert_eq!(expect_int(&value), 1);
}

#[test]
fn division_by_zero_is_reported_with_its_line() {
    let message = eval_error(
        r#"
        let a = 1
        a / 0
        "#,
    );
    assert_eq!(message, "Line 3: division by zero");
}

#[test]
fn strings_repeat_and_compare() {
    assert_eq!(expect_string(&eval(r#""ab" * 3"#)), "ababab");
    assert!(expect_bool(&eval(r#""apple" < "banana""#)));
    assert!(expect_bool(&eval(r#""ell" in "hello""#)));
}

#[test]
fn ranges_are_inclusive_and_iterable() {
    assert_eq!(eval("1..3").inspect(), "1..3");
    let value = eval(
        r#"
        let total = 0
        for n in 1..4 {
            total += n
        }
        total
        "#,
    );
    assert_eq!(expect_int(&value), 10);
}

#[test]
fn closures_capture_their_defining_scope() {
    let value = eval(
        r#"
        let make_counter = func() {
            let n = 0
            return func() {
                n += 1
                n
            }
        }
        let next = make_counter()
        next()
        next()
        next()
        "#,
    );
    assert_eq!(expect_int(&value), 3);
}

#[test]
fn constants_cannot_be_reassigned() {
    let message = eval_error(
        r#"
        const limit = 3
        limit = 4
        "#,
    );
    assert!(message.contains("Cannot assign to constant 'limit'"), "{message}");
}

#[test]
fn missing_identifiers_are_errors() {
    assert_eq!(eval_error("nope"), "Line 1: Identifier not found: nope");
}

#[test]
fn keyword_and_default_arguments_bind_by_name() {
    let value = eval(
        r#"
        func greet(name, greeting = "hi") {
            greeting + " " + name
        }
        greet("ann", greeting = "yo") + "/" + greet("bo")
        "#,
    );
    assert_eq!(expect_string(&value), "yo ann/hi bo");

    let message = eval_error(
        r#"
        func greet(name) { name }
        greet("ann", loud = true)
        "#,
    );
    assert!(message.contains("Unexpected keyword argument 'loud'"), "{message}");
}

#[test]
fn overloads_are_chosen_by_argument_count() {
    let value = eval(
        r#"
        func area(side) { side * side }
        func area(w, h) { w * h }
        area(3) + area(2, 5)
        "#,
    );
    assert_eq!(expect_int(&value), 19);
}

#[test]
fn runaway_recursion_is_stopped() {
    let message = eval_error(
        r#"
        func dive(n) { dive(n + 1) }
        dive(0)
        "#,
    );
    assert!(message.contains("maximum recursion depth exceeded"), "{message}");
}

#[test]
fn coalesce_and_logic_operators() {
    assert_eq!(expect_int(&eval("null ?? 5")), 5);
    assert_eq!(expect_int(&eval("3 ?? 5")), 3);
    assert!(expect_bool(&eval("true && 1")));
    assert!(!expect_bool(&eval("null || false")));
}

#[test]
fn coalesce_and_logic_operators_evaluate_both_sides() {
    let value = eval(
        r#"
        let hits = []
        func touch(v) {
            hits.push(v)
            v
        }
        1 ?? touch(2)
        false && touch(3)
        true || touch(4)
        hits
        "#,
    );
    assert_eq!(value.inspect(), "[2, 3, 4]");
}

#[test]
fn dict_addition_prefers_the_right_side() {
    let value = eval(
        r#"
        let merged = {"a": 1, "b": 2} + {"b": 3, "c": 4}
        [merged["a"], merged["b"], merged["c"], len(merged)]
        "#,
    );
    assert_eq!(value.inspect(), "[1, 3, 4, 3]");
}

#[test]
fn array_addition_concatenates_in_order() {
    let value = eval(
        r#"
        let joined = [1, 2] + [3, 4, 5]
        [len(joined), joined]
        "#,
    );
    assert_eq!(value.inspect(), "[5, [1, 2, 3, 4, 5]]");
}

#[test]
fn duplicate_and_missing_arguments_are_errors() {
    let message = eval_error(
        r#"
        func pick(a) { a }
        pick(1, a = 2)
        "#,
    );
    assert!(
        message.contains("Multiple arguments for a single parameter 'a'"),
        "{message}"
    );

    let message = eval_error(
        r#"
        func pair(a, b) { a }
        pair(1)
        "#,
    );
    assert!(message.contains("Missing argument for parameter 'b'"), "{message}");
}

#[test]
fn first_declared_overload_wins_when_several_fit() {
    let value = eval(
        r#"
        func pick(a) { "one" }
        func pick(a, b = 2) { "two" }
        pick(1)
        "#,
    );
    assert_eq!(expect_string(&value), "one");
}

#[test]
fn thrown_values_are_marked() {
    assert_eq!(eval_error(r#"throw "bad input""#), "thrown: bad input");
}

#[test]
fn break_escaping_a_function_is_an_error() {
    let message = eval_error(
        r#"
        func leave() { break }
        for x in [1, 2] {
            leave()
        }
        "#,
    );
    assert_eq!(message, "`break` outside loop");
    assert_eq!(
        eval_error("func skip() { continue }\nskip()"),
        "`continue` outside loop"
    );
}

#[test]
fn breaking_out_of_a_huge_range_stops_at_once() {
    let value = eval(
        r#"
        let n = -1
        for i in 0..30000000 {
            n = i
            break
        }
        n
        "#,
    );
    assert_eq!(expect_int(&value), 0);
}

#[test]
fn ranges_too_wide_to_count_are_errors() {
    let message = eval_error("len(-5000000000000000000..5000000000000000000)");
    assert!(message.contains("too large to measure"), "{message}");
    let message = eval_error("(-5000000000000000000..5000000000000000000).length()");
    assert!(message.contains("too large to measure"), "{message}");
    assert_eq!(expect_int(&eval("len(3..7)")), 5);
}

#[test]
fn push_grows_the_array_in_place() {
    let value = eval(
        r#"
        let items = []
        let alias = items
        repeat 50000 {
            items.push(i)
        }
        [len(alias), alias.last()]
        "#,
    );
    assert_eq!(value.inspect(), "[50000, 49999]");
}

#[test]
fn loops_honour_break_and_continue() {
    let value = eval(
        r#"
        let seen = []
        let i = 0
        while i < 10 {
            i++
            if i % 2 == 0 { continue }
            if i > 7 { break }
            seen.push(i)
        }
        seen
        "#,
    );
    assert_eq!(value.inspect(), "[1, 3, 5, 7]");
}

#[test]
fn repeat_binds_the_pass_index() {
    let value = eval(
        r#"
        let passes = []
        repeat 3 {
            passes.push(i)
        }
        passes
        "#,
    );
    assert_eq!(value.inspect(), "[0, 1, 2]");
}

#[test]
fn for_over_dicts_binds_keys_and_values() {
    let value = eval(
        r#"
        let scores = {"a": 1, "b": 2}
        let out = []
        for key, value in scores {
            out.push(key + "=" + string(value))
        }
        out.join(",")
        "#,
    );
    assert_eq!(expect_string(&value), "a=1,b=2");
}

#[test]
fn switch_selects_values_and_guarded_bindings() {
    let value = eval(
        r#"
        func describe(n) {
            switch n {
                case 1, 2 { "small" }
                case let big if big > 100 { "huge" }
                default { "other" }
            }
        }
        [describe(2), describe(500), describe(7)]
        "#,
    );
    assert_eq!(value.inspect(), "[small, huge, other]");
}

#[test]
fn match_destructures_arrays_and_dicts() {
    let value = eval(
        r#"
        let tail = match [1, 2, 3] {
            [first, ...rest] => rest,
            _ => null
        }
        let name = match {"name": "vint", "kind": "lang"} {
            {name: n} if n == "vint" => n,
            _ => "unknown"
        }
        [len(tail), name]
        "#,
    );
    assert_eq!(value.inspect(), "[2, vint]");
}

#[test]
fn match_tries_wildcards_last() {
    let value = eval(
        r#"
        match 4 {
            _ => "fallback",
            4 => "four"
        }
        "#,
    );
    assert_eq!(expect_string(&value), "four");
}

#[test]
fn packages_construct_instances_and_hide_private_members() {
    let value = eval(
        r#"
        package Counter {
            let _count = 0
            let init = func(start) {
                @._count = start
            }
            let bump = func() {
                @._count += 1
                @._count
            }
        }
        let c = Counter(5)
        c.bump()
        c.bump()
        "#,
    );
    assert_eq!(expect_int(&value), 7);

    let message = eval_error(
        r#"
        package Vault {
            let _secret = 42
            let init = func() {}
        }
        Vault._secret
        "#,
    );
    assert!(
        message.contains("Cannot access private member '_secret' from outside package 'Vault'"),
        "{message}"
    );
}

#[test]
fn package_without_init_cannot_be_constructed() {
    let message = eval_error(
        r#"
        package Empty {
            let x = 1
        }
        Empty()
        "#,
    );
    assert!(message.contains("Package does not have 'init'"), "{message}");
}

#[test]
fn enums_number_their_members() {
    let value = eval(
        r#"
        enum Color { Red, Green = 5, Blue }
        [Color.Red, Color.Blue]
        "#,
    );
    assert_eq!(value.inspect(), "[0, 6]");
}

#[test]
fn custom_errors_check_their_arity() {
    let message = eval_error(
        r#"
        error NotFound(path)
        NotFound()
        "#,
    );
    assert_eq!(message, "error NotFound expects 1 arguments, got 0");

    let value = eval(
        r#"
        error NotFound(path)
        let err = NotFound("/tmp")
        err.path
        "#,
    );
    assert_eq!(expect_string(&value), "/tmp");
}

#[test]
fn raising_an_error_stops_the_program() {
    let message = eval_error(
        r#"
        error "disk full"
        1
        "#,
    );
    assert_eq!(message, "disk full");
}

#[test]
fn deferred_calls_run_when_the_function_returns() {
    let printed = eval_output(
        r#"
        func work() {
            defer println("cleanup")
            println("working")
            return 1
        }
        work()
        println("after")
        "#,
    );
    assert_eq!(printed, "working\ncleanup\nafter\n");
}

#[test]
fn print_joins_arguments_with_spaces() {
    assert_eq!(eval_output(r#"print("a", 1) println(" b", [2])"#), "a 1 b [2]\n");
}

#[test]
fn go_tasks_communicate_over_channels() {
    let value = eval(
        r#"
        let ch = chan(1)
        go func() { send(ch, 42) }()
        receive(ch)
        "#,
    );
    assert_eq!(expect_int(&value), 42);
}

#[test]
fn awaiting_async_functions_yields_their_result() {
    let value = eval(
        r#"
        let double = async func(x) { x * 2 }
        let pending = double(21)
        await pending
        "#,
    );
    assert_eq!(expect_int(&value), 42);

    let message = eval_error("await 5");
    assert!(
        message.contains("await can only be used with promises, got INTEGER"),
        "{message}"
    );
}

#[test]
fn rejected_promises_surface_through_await() {
    let message = eval_error(
        r#"
        let fail = async func() {
            error "boom"
        }
        await fail()
        "#,
    );
    assert_eq!(message, "boom");
}

#[test]
fn unbuffered_channels_hand_over_each_value_once() {
    let value = eval(
        r#"
        let ch = chan
        go func() { send(ch, 1) }()
        go func() { send(ch, 2) }()
        let first = receive(ch)
        let second = receive(ch)
        [first + second, first != second]
        "#,
    );
    assert_eq!(value.inspect(), "[3, true]");
}

#[test]
fn closed_channels_drain_then_yield_null() {
    let value = eval(
        r#"
        let ch = chan(1)
        send(ch, 7)
        close(ch)
        [receive(ch), receive(ch)]
        "#,
    );
    assert_eq!(value.inspect(), "[7, null]");
}

#[test]
fn builtin_modules_are_importable() {
    let value = eval(
        r#"
        import math, strings
        [math.sqrt(16), strings.upper("vint"), math.PI > 3]
        "#,
    );
    assert_eq!(value.inspect(), "[4, VINT, true]");
}

#[test]
fn file_modules_are_found_on_the_search_path() {
    let dir = tempdir().expect("create temp dir");
    fs::write(
        dir.path().join("helpers.vint"),
        "let double = func(x) { x * 2 }\nlet _hidden = 1\n",
    )
    .expect("write module");

    let mut interpreter =
        Interpreter::with_context(quiet_context().with_search_path(dir.path()));
    let value = interpreter
        .eval_source("import helpers\nhelpers.double(4)")
        .expect("import should succeed");
    assert_eq!(expect_int(&value), 8);
}

#[test]
fn missing_modules_list_the_searched_paths() {
    let message = eval_error("import definitely_not_here");
    assert!(
        message.contains("Module 'definitely_not_here' not found. Searched paths:"),
        "{message}"
    );
}

#[test]
fn include_evaluates_into_the_current_scope() {
    let dir = tempdir().expect("create temp dir");
    let shared = dir.path().join("shared.vint");
    fs::write(&shared, "let greeting = \"hello\"\n").expect("write include");

    let source = format!(
        "include \"{}\"\ngreeting",
        shared.to_string_lossy().replace('\\', "\\\\")
    );
    let value = eval(&source);
    assert_eq!(expect_string(&value), "hello");
}

#[test]
fn run_file_searches_the_script_directory() {
    let dir = tempdir().expect("create temp dir");
    fs::write(dir.path().join("config.vint"), "let port = 8080\n").expect("write module");
    let script = dir.path().join("main.vint");
    fs::write(&script, "import config\nconfig.port\n").expect("write script");

    let mut interpreter = Interpreter::with_context(quiet_context());
    let value = interpreter.run_file(&script).expect("script should run");
    assert_eq!(expect_int(&value), 8080);
    assert_eq!(interpreter.context().module_name.as_deref(), Some("main"));
}

#[test]
fn indexing_and_slicing() {
    let value = eval(
        r#"
        let xs = [1, 2, 3, 4]
        xs[0] = 10
        [xs[-1], xs[1:3], xs[9], "vint"[1]]
        "#,
    );
    assert_eq!(value.inspect(), "[4, [2, 3], null, i]");
}

#[test]
fn pointers_dereference_to_their_target() {
    let value = eval(
        r#"
        let x = 5
        let p = &x
        let y = *p
        y + 1
        "#,
    );
    assert_eq!(expect_int(&value), 6);
}

#[test]
fn parse_errors_surface_as_diagnostics() {
    let mut interpreter = Interpreter::with_context(quiet_context());
    let err = interpreter
        .eval_source("let = 3")
        .expect_err("parse should fail");
    assert!(matches!(err, VintError::Diagnostic(_)));
}
