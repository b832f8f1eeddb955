//! Safe condition language used by `if`, `ifElse` and `while`.
//!
//! An expression is parsed into an [`ast::Expr`], checked against the node
//! policy, and only then evaluated against a small set of bindings. Nothing in
//! the language can reach host state: no functions can be defined, no value
//! can be mutated and the only namespace is `Math`.

pub mod ast;
mod eval;
mod parser;
pub mod policy;
pub mod value;

use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

use value::ExprValue;

#[derive(Debug, Clone, Error)]
pub enum ExpressionError {
    #[error("Expression cannot be empty")]
    Empty,
    #[error("Syntax error in expression: {expression}. {message}")]
    Syntax { expression: String, message: String },
    #[error("Unsafe expression \"{expression}\": {message}")]
    Rejected { expression: String, message: String },
    #[error("Failed to evaluate condition \"{expression}\": {message}")]
    Runtime { expression: String, message: String },
}

/// Variables visible to an expression.
#[derive(Debug, Clone, Default)]
pub struct Bindings {
    vars: HashMap<String, ExprValue>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `name`. An absent value binds `undefined`, which differs from not
    /// binding the name at all.
    pub fn bind(mut self, name: impl Into<String>, value: Option<&Value>) -> Self {
        let value = value.map(ExprValue::from_json).unwrap_or(ExprValue::Undefined);
        self.vars.insert(name.into(), value);
        self
    }
}

/// Parse and policy-check without evaluating
pub fn check(expression: &str) -> Result<ast::Expr, ExpressionError> {
    if expression.trim().is_empty() {
        return Err(ExpressionError::Empty);
    }
    let tree = parser::parse(expression).map_err(|e| ExpressionError::Syntax {
        expression: expression.to_string(),
        message: e.to_string(),
    })?;
    policy::check(&tree).map_err(|message| ExpressionError::Rejected {
        expression: expression.to_string(),
        message,
    })?;
    Ok(tree)
}

/// True when the expression parses and passes the policy
pub fn validate_expression(expression: &str) -> bool {
    check(expression).is_ok()
}

fn evaluate_value(expression: &str, bindings: &Bindings) -> Result<ExprValue, ExpressionError> {
    let tree = check(expression)?;
    eval::evaluate(&tree, &bindings.vars).map_err(|message| ExpressionError::Runtime {
        expression: expression.to_string(),
        message,
    })
}

/// Evaluate to a JSON value. `undefined` comes back as null.
pub fn evaluate(expression: &str, bindings: &Bindings) -> Result<Value, ExpressionError> {
    Ok(evaluate_value(expression, bindings)?.to_json())
}

/// Evaluate and apply JavaScript truthiness
pub fn evaluate_condition(expression: &str, bindings: &Bindings) -> Result<bool, ExpressionError> {
    Ok(evaluate_value(expression, bindings)?.truthy())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn eval_with(expression: &str, input: Value) -> Value {
        evaluate(expression, &Bindings::new().bind("INPUT", Some(&input))).unwrap()
    }

    fn eval(expression: &str) -> Value {
        evaluate(expression, &Bindings::new()).unwrap()
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(eval("1 + 2 * 3"), json!(7));
        assert_eq!(eval("(1 + 2) * 3"), json!(9));
        assert_eq!(eval("10 % 4"), json!(2));
        assert_eq!(eval("2 ** 10"), json!(1024));
        assert_eq!(eval("7 / 2"), json!(3.5));
        assert_eq!(eval("-3 + +'4'"), json!(1));
        assert_eq!(eval("1 / 0"), Value::Null);
    }

    #[test]
    fn test_comparisons_and_logic() {
        assert_eq!(eval_with("INPUT > 5", json!(7)), json!(true));
        assert_eq!(eval_with("INPUT <= 5", json!(7)), json!(false));
        assert_eq!(eval("'5' == 5"), json!(true));
        assert_eq!(eval("'5' === 5"), json!(false));
        assert_eq!(eval("null == undefined"), json!(true));
        assert_eq!(eval("'b' > 'a'"), json!(true));
        assert_eq!(eval("0 || 'fallback'"), json!("fallback"));
        assert_eq!(eval("1 && 2"), json!(2));
        assert_eq!(eval("!0"), json!(true));
    }

    #[test]
    fn test_short_circuit_skips_failing_branch() {
        // The right side would fail: `missing` is not bound
        assert_eq!(eval("false && missing"), json!(false));
        assert_eq!(eval("true || missing"), json!(true));
        assert_eq!(eval("true ? 1 : missing"), json!(1));
    }

    #[test]
    fn test_ternary_and_typeof() {
        assert_eq!(eval_with("INPUT ? 'yes' : 'no'", json!("")), json!("no"));
        assert_eq!(eval_with("typeof INPUT", json!("x")), json!("string"));
        assert_eq!(eval_with("typeof INPUT", json!([1])), json!("object"));
        let unbound_input = Bindings::new().bind("INPUT", None);
        assert_eq!(
            evaluate("typeof INPUT", &unbound_input).unwrap(),
            json!("undefined")
        );
    }

    #[test]
    fn test_arrays() {
        let input = json!([1, 2, 3]);
        assert_eq!(eval_with("INPUT.length", input.clone()), json!(3));
        assert_eq!(eval_with("INPUT[1]", input.clone()), json!(2));
        assert_eq!(eval_with("INPUT.includes(2)", input.clone()), json!(true));
        assert_eq!(eval_with("INPUT.indexOf(3)", input.clone()), json!(2));
        assert_eq!(eval_with("INPUT.join('-')", input.clone()), json!("1-2-3"));
        assert_eq!(eval_with("INPUT.slice(-2)", input.clone()), json!([2, 3]));
        assert_eq!(eval_with("INPUT.concat([4], 5).length", input.clone()), json!(5));
        assert_eq!(eval("[[1, [2]], 3].flat()"), json!([1, [2], 3]));
        assert_eq!(eval("['b', 'a'].sort()"), json!(["a", "b"]));
        assert_eq!(eval("2 in [1, 2, 3]"), json!(true));
    }

    #[test]
    fn test_objects() {
        let input = json!({"user": {"name": "Alice", "age": 30}});
        assert_eq!(eval_with("INPUT.user.name", input.clone()), json!("Alice"));
        assert_eq!(eval_with("INPUT['user']['age'] >= 18", input.clone()), json!(true));
        assert_eq!(eval_with("'user' in INPUT", input.clone()), json!(true));
        assert_eq!(eval_with("INPUT.missing", input), Value::Null);
        assert_eq!(eval("{ a: 1, ['b' + 1]: 2 }"), json!({"a": 1, "b1": 2}));
    }

    #[test]
    fn test_strings() {
        assert_eq!(eval_with("INPUT.toLowerCase()", json!("HeLLo")), json!("hello"));
        assert_eq!(eval_with("INPUT.slice(1, 3)", json!("hello")), json!("el"));
        assert_eq!(eval_with("INPUT.startsWith('he')", json!("hello")), json!(true));
        assert_eq!(eval_with("INPUT.split(',').length", json!("a,b,c")), json!(3));
        assert_eq!(eval_with("INPUT.trim().padStart(5, '*')", json!(" ab ")), json!("***ab"));
        assert_eq!(eval_with("INPUT.replace('l', 'L')", json!("hello")), json!("heLlo"));
        assert_eq!(eval_with("INPUT.match('l+')[0]", json!("hello")), json!("ll"));
        assert_eq!(eval_with("INPUT.charAt(0)", json!("hello")), json!("h"));
        assert_eq!(eval_with("`Hello ${INPUT}!`", json!("Bob")), json!("Hello Bob!"));
        assert_eq!(eval("'a' + 1 + 2"), json!("a12"));
    }

    #[test]
    fn test_oversized_strings_are_errors() {
        assert_eq!(eval("'ab'.repeat(3)"), json!("ababab"));
        assert_eq!(eval("''.repeat(1e19)"), json!(""));
        assert_eq!(eval("'a'.padEnd(3, '-')"), json!("a--"));

        for source in ["'ab'.repeat(1e19)", "'ab'.repeat(3e8)", "'a'.padStart(1e12)", "'a'.padEnd(1e12, 'x')"] {
            let err = evaluate(source, &Bindings::new()).unwrap_err();
            assert!(matches!(err, ExpressionError::Runtime { .. }), "{}", source);
            assert!(err.to_string().contains("Invalid string length"), "{}", source);
        }
    }

    #[test]
    fn test_math() {
        assert_eq!(eval("Math.abs(-5)"), json!(5));
        assert_eq!(eval("Math.max(1, 5, 3)"), json!(5));
        assert_eq!(eval("Math.min(1, 5, 3)"), json!(1));
        assert_eq!(eval("Math.round(2.5)"), json!(3));
        assert_eq!(eval("Math.floor(2.7)"), json!(2));
        assert_eq!(eval("Math.PI > 3"), json!(true));
    }

    #[test]
    fn test_security_rejections() {
        for source in [
            "process.exit(0)",
            "require('fs')",
            "eval('1')",
            "globalThis",
            "INPUT.constructor",
            "INPUT.__proto__",
            "INPUT = 1",
            "INPUT++",
            "new Date()",
            "this",
            "() => 1",
            "function () { return 1 }",
            "class X {}",
            "1, 2",
            "INPUT.at(0)",
        ] {
            assert!(!validate_expression(source), "{} should be rejected", source);
            let err = evaluate(source, &Bindings::new().bind("INPUT", Some(&json!([1])))).unwrap_err();
            assert!(
                matches!(err, ExpressionError::Rejected { .. }),
                "{} produced {:?}",
                source,
                err
            );
        }
    }

    #[test]
    fn test_runtime_errors() {
        let err = evaluate("missing > 1", &Bindings::new()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Failed to evaluate condition \"missing > 1\": Variable 'missing' is not defined"
        );

        let err = evaluate("INPUT.name", &Bindings::new().bind("INPUT", Some(&Value::Null))).unwrap_err();
        assert!(err.to_string().contains("Cannot access property 'name' of null"));

        let err = evaluate("INPUT.map(1)", &Bindings::new().bind("INPUT", Some(&json!([])))).unwrap_err();
        assert!(matches!(err, ExpressionError::Runtime { .. }));
    }

    #[test]
    fn test_empty_and_syntax_errors() {
        assert!(matches!(check("   "), Err(ExpressionError::Empty)));
        assert!(matches!(check("1 +"), Err(ExpressionError::Syntax { .. })));
        assert!(!validate_expression(""));
    }

    #[test]
    fn test_evaluate_condition_truthiness() {
        let bindings = Bindings::new().bind("INPUT", Some(&json!(7)));
        assert!(evaluate_condition("INPUT > 5", &bindings).unwrap());
        assert!(!evaluate_condition("INPUT - 7", &bindings).unwrap());
    }
}
