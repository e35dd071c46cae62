//! End-to-end tests driving the public `run_source` entry point: source
//! text in, return values or `print` output out. These cover the
//! concrete scenarios in spec.md §8.

use crate::value::Value;
use crate::{new_state, run_source};

fn eval(src: &str) -> Vec<Value> {
    let mut state = new_state();
    run_source(&mut state, src, "test").expect("script should run")
}

#[test]
fn arithmetic_precedence() {
    let rets = eval("return 1+2*3");
    assert!(rets[0].raw_eq(&Value::integer(7)));
}

#[test]
fn ipairs_walks_array_part() {
    let mut state = new_state();
    let src = r#"
        local out = {}
        local t = {10, 20, 30}
        for i, v in ipairs(t) do
            out[#out + 1] = i .. ":" .. v
        end
        return unpack(out)
    "#;
    let rets = run_source(&mut state, src, "test").unwrap();
    let joined: Vec<String> = rets.iter().map(crate::value::display_value).collect();
    assert_eq!(joined, vec!["1:10", "2:20", "3:30"]);
}

#[test]
fn recursive_factorial() {
    let src = "local function fact(n) if n<=1 then return 1 else return n*fact(n-1) end end
                return fact(5)";
    let rets = eval(src);
    assert!(rets[0].raw_eq(&Value::integer(120)));
}

#[test]
fn index_metamethod_function() {
    let src = r#"
        local m = setmetatable({}, {__index = function(_, k) return "k=" .. k end})
        return m.foo, m[7]
    "#;
    let rets = eval(src);
    assert_eq!(crate::value::display_value(&rets[0]), "k=foo");
    assert_eq!(crate::value::display_value(&rets[1]), "k=7");
}

#[test]
fn pcall_catches_error() {
    let src = r#"
        local ok, err = pcall(function() error("bad") end)
        return ok, err
    "#;
    let rets = eval(src);
    assert!(rets[0].raw_eq(&Value::bool(false)));
    assert_eq!(crate::value::display_value(&rets[1]), "bad");
}

#[test]
fn numeric_for_concat_and_length() {
    let src = r#"
        local s = ""
        for i=1,3 do s = s..i end
        return s, #s
    "#;
    let rets = eval(src);
    assert_eq!(crate::value::display_value(&rets[0]), "123");
    assert!(rets[1].raw_eq(&Value::integer(3)));
}

#[test]
fn numeric_for_zero_step_never_runs() {
    let src = r#"
        local count = 0
        for i = 1, 10, 0 do count = count + 1 end
        return count
    "#;
    let rets = eval(src);
    assert!(rets[0].raw_eq(&Value::integer(0)));
}

#[test]
fn integer_valued_float_equals_integer() {
    let rets = eval("return 1.0 == 1");
    assert!(rets[0].raw_eq(&Value::bool(true)));
}

#[test]
fn closures_share_mutable_upvalue() {
    let src = r#"
        local function counter()
            local n = 0
            return function() n = n + 1 return n end
        end
        local c = counter()
        c()
        c()
        return c()
    "#;
    let rets = eval(src);
    assert!(rets[0].raw_eq(&Value::integer(3)));
}

#[test]
fn break_exits_innermost_loop_only() {
    let src = r#"
        local seen = {}
        for i = 1, 3 do
            for j = 1, 3 do
                if j == 2 then break end
                seen[#seen + 1] = i * 10 + j
            end
        end
        return #seen
    "#;
    let rets = eval(src);
    assert!(rets[0].raw_eq(&Value::integer(3)));
}

#[test]
fn table_constructor_mixes_array_and_hash() {
    let src = r#"
        local t = {1, 2, 3, x = "y"}
        return #t, t.x
    "#;
    let rets = eval(src);
    assert!(rets[0].raw_eq(&Value::integer(3)));
    assert_eq!(crate::value::display_value(&rets[1]), "y");
}

#[test]
fn method_call_self_syntax() {
    let src = r#"
        local obj = {value = 41}
        function obj:bump() self.value = self.value + 1 return self.value end
        return obj:bump()
    "#;
    let rets = eval(src);
    assert!(rets[0].raw_eq(&Value::integer(42)));
}

#[test]
fn varargs_forward_through_call() {
    let src = r#"
        local function sum(...)
            local total = 0
            for _, v in ipairs({...}) do total = total + v end
            return total
        end
        return sum(1, 2, 3, 4)
    "#;
    let rets = eval(src);
    assert!(rets[0].raw_eq(&Value::integer(10)));
}

#[test]
fn generic_for_over_pairs_visits_every_key() {
    let src = r#"
        local t = {10, 20, a = 1, b = 2}
        local count = 0
        for k, v in pairs(t) do count = count + 1 end
        return count
    "#;
    let rets = eval(src);
    assert!(rets[0].raw_eq(&Value::integer(4)));
}

#[test]
fn syntax_error_is_reported() {
    let mut state = new_state();
    let err = run_source(&mut state, "local = ", "test").unwrap_err();
    assert_eq!(err.kind, crate::vm::ErrorKind::Syntax);
}

#[test]
fn type_error_on_bad_arithmetic() {
    let mut state = new_state();
    let err = run_source(&mut state, "return {} + 1", "test").unwrap_err();
    assert_eq!(err.kind, crate::vm::ErrorKind::Type);
}
