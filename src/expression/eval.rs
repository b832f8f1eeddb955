use std::collections::{BTreeMap, HashMap};

use super::ast::{BinaryOp, Expr, LogicalOp, MemberKey, ObjectEntry, PropertyKey, UnaryOp};
use super::policy::MATH_NAMESPACE;
use super::value::{number_to_string, ExprValue};

type EvalResult = Result<ExprValue, String>;

// Longest string a method may build, in characters
const MAX_STRING_LENGTH: usize = (1 << 29) - 24;

/// Evaluate a tree that already passed the policy check.
pub fn evaluate(expr: &Expr, vars: &HashMap<String, ExprValue>) -> EvalResult {
    match expr {
        Expr::Number(n) => Ok(ExprValue::Number(*n)),
        Expr::Str(s) => Ok(ExprValue::String(s.clone())),
        Expr::Bool(b) => Ok(ExprValue::Bool(*b)),
        Expr::Null => Ok(ExprValue::Null),
        Expr::Undefined => Ok(ExprValue::Undefined),
        Expr::Ident(name) => lookup(name, vars),
        Expr::Template { quasis, exprs } => {
            let mut out = String::new();
            for (i, quasi) in quasis.iter().enumerate() {
                out.push_str(quasi);
                if let Some(expr) = exprs.get(i) {
                    out.push_str(&evaluate(expr, vars)?.to_js_string());
                }
            }
            Ok(ExprValue::String(out))
        }
        Expr::Array(items) => Ok(ExprValue::Array(
            items
                .iter()
                .map(|item| evaluate(item, vars))
                .collect::<Result<Vec<_>, _>>()?,
        )),
        Expr::Object(entries) => {
            let mut map = BTreeMap::new();
            for entry in entries {
                if let ObjectEntry::Property { key, value } = entry {
                    let key = match key {
                        PropertyKey::Static(name) => name.clone(),
                        PropertyKey::Computed(expr) => evaluate(expr, vars)?.to_js_string(),
                    };
                    map.insert(key, evaluate(value, vars)?);
                }
            }
            Ok(ExprValue::Object(map))
        }
        Expr::Member { object, property } => {
            let target = evaluate(object, vars)?;
            let key = member_key(property, vars)?;
            get_property(&target, &key)
        }
        Expr::Call { callee, args } => {
            let Expr::Member { object, property } = callee.as_ref() else {
                return Err("Callee is not a function".to_string());
            };
            let receiver = evaluate(object, vars)?;
            let method = member_key(property, vars)?;
            let args = args
                .iter()
                .map(|arg| evaluate(arg, vars))
                .collect::<Result<Vec<_>, _>>()?;
            call_method(&receiver, &method, &args)
        }
        Expr::Unary { op, operand } => {
            let value = evaluate(operand, vars)?;
            match op {
                UnaryOp::Neg => Ok(ExprValue::Number(-value.to_number())),
                UnaryOp::Plus => Ok(ExprValue::Number(value.to_number())),
                UnaryOp::Not => Ok(ExprValue::Bool(!value.truthy())),
                UnaryOp::TypeOf => Ok(ExprValue::String(value.type_of().to_string())),
                other => Err(format!("Unknown unary operator: {}", other.token())),
            }
        }
        Expr::Binary { op, left, right } => {
            let left = evaluate(left, vars)?;
            let right = evaluate(right, vars)?;
            binary(*op, &left, &right)
        }
        Expr::Logical { op, left, right } => {
            let left = evaluate(left, vars)?;
            match op {
                LogicalOp::And if !left.truthy() => Ok(left),
                LogicalOp::Or if left.truthy() => Ok(left),
                LogicalOp::And | LogicalOp::Or => evaluate(right, vars),
                LogicalOp::Nullish => Err("Unknown logical operator: ??".to_string()),
            }
        }
        Expr::Conditional {
            test,
            consequent,
            alternate,
        } => {
            if evaluate(test, vars)?.truthy() {
                evaluate(consequent, vars)
            } else {
                evaluate(alternate, vars)
            }
        }
        other => Err(format!("Cannot evaluate node: {:?}", other)),
    }
}

fn lookup(name: &str, vars: &HashMap<String, ExprValue>) -> EvalResult {
    if let Some(value) = vars.get(name) {
        return Ok(value.clone());
    }
    if name == MATH_NAMESPACE {
        return Ok(ExprValue::Math);
    }
    Err(format!("Variable '{}' is not defined", name))
}

fn member_key(property: &MemberKey, vars: &HashMap<String, ExprValue>) -> Result<String, String> {
    match property {
        MemberKey::Static(name) => Ok(name.clone()),
        MemberKey::Computed(expr) => Ok(evaluate(expr, vars)?.to_js_string()),
    }
}

fn get_property(target: &ExprValue, key: &str) -> EvalResult {
    match target {
        ExprValue::Undefined | ExprValue::Null => Err(format!(
            "Cannot access property '{}' of {}",
            key,
            target.to_js_string()
        )),
        ExprValue::String(s) => Ok(match key {
            "length" => ExprValue::Number(s.chars().count() as f64),
            _ => key
                .parse::<usize>()
                .ok()
                .and_then(|i| s.chars().nth(i))
                .map(|c| ExprValue::String(c.to_string()))
                .unwrap_or(ExprValue::Undefined),
        }),
        ExprValue::Array(items) => Ok(match key {
            "length" => ExprValue::Number(items.len() as f64),
            _ => key
                .parse::<usize>()
                .ok()
                .and_then(|i| items.get(i).cloned())
                .unwrap_or(ExprValue::Undefined),
        }),
        ExprValue::Object(map) => Ok(map.get(key).cloned().unwrap_or(ExprValue::Undefined)),
        ExprValue::Math => Ok(math_constant(key).map(ExprValue::Number).unwrap_or(ExprValue::Undefined)),
        ExprValue::Bool(_) | ExprValue::Number(_) => Ok(ExprValue::Undefined),
    }
}

fn binary(op: BinaryOp, left: &ExprValue, right: &ExprValue) -> EvalResult {
    use std::cmp::Ordering;
    let num = |f: fn(f64, f64) -> f64| -> EvalResult {
        Ok(ExprValue::Number(f(left.to_number(), right.to_number())))
    };
    let cmp = |accept: fn(Ordering) -> bool| -> EvalResult {
        Ok(ExprValue::Bool(left.compare(right).map(accept).unwrap_or(false)))
    };

    match op {
        BinaryOp::Add => {
            let (l, r) = (primitive(left), primitive(right));
            if matches!(l, ExprValue::String(_)) || matches!(r, ExprValue::String(_)) {
                Ok(ExprValue::String(l.to_js_string() + &r.to_js_string()))
            } else {
                Ok(ExprValue::Number(l.to_number() + r.to_number()))
            }
        }
        BinaryOp::Sub => num(|a, b| a - b),
        BinaryOp::Mul => num(|a, b| a * b),
        BinaryOp::Div => num(|a, b| a / b),
        BinaryOp::Rem => num(|a, b| a % b),
        BinaryOp::Pow => num(f64::powf),
        BinaryOp::Eq => Ok(ExprValue::Bool(left.loose_equals(right))),
        BinaryOp::NotEq => Ok(ExprValue::Bool(!left.loose_equals(right))),
        BinaryOp::StrictEq => Ok(ExprValue::Bool(left.strict_equals(right))),
        BinaryOp::StrictNotEq => Ok(ExprValue::Bool(!left.strict_equals(right))),
        BinaryOp::Lt => cmp(|o| o == Ordering::Less),
        BinaryOp::LtEq => cmp(|o| o != Ordering::Greater),
        BinaryOp::Gt => cmp(|o| o == Ordering::Greater),
        BinaryOp::GtEq => cmp(|o| o != Ordering::Less),
        BinaryOp::In => {
            let key = left.to_js_string();
            match right {
                ExprValue::Object(map) => Ok(ExprValue::Bool(map.contains_key(&key))),
                ExprValue::Array(items) => Ok(ExprValue::Bool(
                    key == "length" || key.parse::<usize>().map(|i| i < items.len()).unwrap_or(false),
                )),
                ExprValue::Math => Ok(ExprValue::Bool(math_constant(&key).is_some())),
                other => Err(format!(
                    "Cannot use 'in' operator to search for '{}' in {}",
                    key,
                    other.to_js_string()
                )),
            }
        }
        BinaryOp::InstanceOf => Err("Unknown binary operator: instanceof".to_string()),
    }
}

fn primitive(value: &ExprValue) -> ExprValue {
    match value {
        ExprValue::Array(_) | ExprValue::Object(_) | ExprValue::Math => {
            ExprValue::String(value.to_js_string())
        }
        other => other.clone(),
    }
}

/* ==== Methods ==== */

fn call_method(receiver: &ExprValue, method: &str, args: &[ExprValue]) -> EvalResult {
    match receiver {
        ExprValue::Undefined | ExprValue::Null => Err(format!(
            "Cannot access property '{}' of {}",
            method,
            receiver.to_js_string()
        )),
        ExprValue::Math => math_function(method, args),
        _ if method == "toString" => Ok(ExprValue::String(receiver.to_js_string())),
        _ if method == "valueOf" => Ok(receiver.clone()),
        ExprValue::String(s) => string_method(s, method, args),
        ExprValue::Array(items) => array_method(items, method, args),
        _ => Err(format!(
            "{}.{} is not a function",
            receiver.type_of(),
            method
        )),
    }
}

fn arg(args: &[ExprValue], i: usize) -> ExprValue {
    args.get(i).cloned().unwrap_or(ExprValue::Undefined)
}

/// `ToIntegerOrInfinity`
fn integer_arg(args: &[ExprValue], i: usize, default: f64) -> f64 {
    match args.get(i) {
        None | Some(ExprValue::Undefined) => default,
        Some(value) => {
            let n = value.to_number();
            if n.is_nan() {
                0.0
            } else {
                n.trunc()
            }
        }
    }
}

/// Resolve a possibly negative index against `len`, clamped to `0..=len`
fn relative_index(n: f64, len: usize) -> usize {
    let len_f = len as f64;
    let resolved = if n < 0.0 { (len_f + n).max(0.0) } else { n.min(len_f) };
    resolved as usize
}

fn clamp_index(n: f64, len: usize) -> usize {
    n.max(0.0).min(len as f64) as usize
}

fn substring(chars: &[char], start: usize, end: usize) -> String {
    if start >= end {
        String::new()
    } else {
        chars[start..end].iter().collect()
    }
}

fn find_chars(haystack: &[char], needle: &[char], from: usize) -> Option<usize> {
    if needle.is_empty() {
        return Some(from.min(haystack.len()));
    }
    if needle.len() > haystack.len() {
        return None;
    }
    (from..=haystack.len() - needle.len()).find(|&i| haystack[i..i + needle.len()] == *needle)
}

fn compile_pattern(pattern: &ExprValue) -> Result<regex::Regex, String> {
    let source = pattern.to_js_string();
    regex::Regex::new(&source).map_err(|e| format!("Invalid regular expression '{}': {}", source, e))
}

fn string_method(s: &str, method: &str, args: &[ExprValue]) -> EvalResult {
    let chars: Vec<char> = s.chars().collect();
    let len = chars.len();
    let text = |v: String| Ok(ExprValue::String(v));

    match method {
        "includes" => {
            let needle: Vec<char> = arg(args, 0).to_js_string().chars().collect();
            let from = clamp_index(integer_arg(args, 1, 0.0), len);
            Ok(ExprValue::Bool(find_chars(&chars, &needle, from).is_some()))
        }
        "startsWith" => {
            let needle: Vec<char> = arg(args, 0).to_js_string().chars().collect();
            let from = clamp_index(integer_arg(args, 1, 0.0), len);
            Ok(ExprValue::Bool(chars[from..].starts_with(&needle)))
        }
        "endsWith" => {
            let needle: Vec<char> = arg(args, 0).to_js_string().chars().collect();
            let end = clamp_index(integer_arg(args, 1, len as f64), len);
            Ok(ExprValue::Bool(chars[..end].ends_with(&needle)))
        }
        "toLowerCase" => text(s.to_lowercase()),
        "toUpperCase" => text(s.to_uppercase()),
        "trim" => text(s.trim().to_string()),
        "trimStart" => text(s.trim_start().to_string()),
        "trimEnd" => text(s.trim_end().to_string()),
        "slice" => {
            let start = relative_index(integer_arg(args, 0, 0.0), len);
            let end = relative_index(integer_arg(args, 1, len as f64), len);
            text(substring(&chars, start, end))
        }
        "substring" => {
            let a = clamp_index(integer_arg(args, 0, 0.0), len);
            let b = clamp_index(integer_arg(args, 1, len as f64), len);
            text(substring(&chars, a.min(b), a.max(b)))
        }
        "substr" => {
            let start = relative_index(integer_arg(args, 0, 0.0), len);
            let count = integer_arg(args, 1, len as f64).max(0.0);
            let end = clamp_index(start as f64 + count, len);
            text(substring(&chars, start, end))
        }
        "indexOf" => {
            let needle: Vec<char> = arg(args, 0).to_js_string().chars().collect();
            let from = clamp_index(integer_arg(args, 1, 0.0), len);
            Ok(ExprValue::Number(
                find_chars(&chars, &needle, from).map(|i| i as f64).unwrap_or(-1.0),
            ))
        }
        "lastIndexOf" => {
            let needle: Vec<char> = arg(args, 0).to_js_string().chars().collect();
            let found = (0..=len.saturating_sub(needle.len()))
                .rev()
                .find(|&i| i + needle.len() <= len && chars[i..i + needle.len()] == *needle);
            Ok(ExprValue::Number(found.map(|i| i as f64).unwrap_or(-1.0)))
        }
        "charAt" => {
            let i = integer_arg(args, 0, 0.0);
            text(if i >= 0.0 && (i as usize) < len {
                chars[i as usize].to_string()
            } else {
                String::new()
            })
        }
        "charCodeAt" => {
            let i = integer_arg(args, 0, 0.0);
            Ok(ExprValue::Number(if i >= 0.0 && (i as usize) < len {
                chars[i as usize] as u32 as f64
            } else {
                f64::NAN
            }))
        }
        "split" => {
            let limit = match args.get(1) {
                None | Some(ExprValue::Undefined) => usize::MAX,
                Some(v) => v.to_number().max(0.0) as usize,
            };
            let parts: Vec<ExprValue> = match args.first() {
                None | Some(ExprValue::Undefined) => vec![ExprValue::String(s.to_string())],
                Some(sep) => {
                    let sep = sep.to_js_string();
                    if sep.is_empty() {
                        chars.iter().map(|c| ExprValue::String(c.to_string())).collect()
                    } else {
                        s.split(sep.as_str())
                            .map(|p| ExprValue::String(p.to_string()))
                            .collect()
                    }
                }
            };
            Ok(ExprValue::Array(parts.into_iter().take(limit).collect()))
        }
        "replace" => {
            let search = arg(args, 0).to_js_string();
            let replacement = arg(args, 1).to_js_string();
            text(s.replacen(&search, &replacement, 1))
        }
        "match" => {
            let re = compile_pattern(&arg(args, 0))?;
            Ok(match re.captures(s) {
                Some(caps) => ExprValue::Array(
                    caps.iter()
                        .map(|m| {
                            m.map(|m| ExprValue::String(m.as_str().to_string()))
                                .unwrap_or(ExprValue::Undefined)
                        })
                        .collect(),
                ),
                None => ExprValue::Null,
            })
        }
        "search" => {
            let re = compile_pattern(&arg(args, 0))?;
            Ok(ExprValue::Number(
                re.find(s)
                    .map(|m| s[..m.start()].chars().count() as f64)
                    .unwrap_or(-1.0),
            ))
        }
        "repeat" => {
            let count = arg(args, 0).to_number();
            if count < 0.0 || count.is_infinite() {
                return Err(format!("Invalid count value: {}", number_to_string(count)));
            }
            let count = if count.is_nan() { 0.0 } else { count.trunc() };
            if len == 0 || count == 0.0 {
                return text(String::new());
            }
            if count > MAX_STRING_LENGTH as f64 || len.saturating_mul(count as usize) > MAX_STRING_LENGTH {
                return Err("Invalid string length".to_string());
            }
            text(s.repeat(count as usize))
        }
        "padStart" | "padEnd" => {
            let target = integer_arg(args, 0, 0.0).max(0.0);
            if target > MAX_STRING_LENGTH as f64 {
                return Err("Invalid string length".to_string());
            }
            let target = target as usize;
            let filler = match args.get(1) {
                None | Some(ExprValue::Undefined) => " ".to_string(),
                Some(v) => v.to_js_string(),
            };
            if target <= len || filler.is_empty() {
                return text(s.to_string());
            }
            let pad: String = filler.chars().cycle().take(target - len).collect();
            text(if method == "padStart" {
                pad + s
            } else {
                s.to_string() + &pad
            })
        }
        _ => Err(format!("string.{} is not a function", method)),
    }
}

fn array_method(items: &[ExprValue], method: &str, args: &[ExprValue]) -> EvalResult {
    let len = items.len();
    match method {
        "join" => {
            let sep = match args.first() {
                None | Some(ExprValue::Undefined) => ",".to_string(),
                Some(v) => v.to_js_string(),
            };
            Ok(ExprValue::String(
                items
                    .iter()
                    .map(|item| {
                        if item.is_nullish() {
                            String::new()
                        } else {
                            item.to_js_string()
                        }
                    })
                    .collect::<Vec<_>>()
                    .join(&sep),
            ))
        }
        "concat" => {
            let mut out = items.to_vec();
            for value in args {
                match value {
                    ExprValue::Array(more) => out.extend(more.iter().cloned()),
                    other => out.push(other.clone()),
                }
            }
            Ok(ExprValue::Array(out))
        }
        "reverse" => Ok(ExprValue::Array(items.iter().rev().cloned().collect())),
        "sort" => {
            if args.first().map(|a| !matches!(a, ExprValue::Undefined)).unwrap_or(false) {
                return Err("The comparison function must be a function".to_string());
            }
            let mut out = items.to_vec();
            out.sort_by(|a, b| match (a, b) {
                (ExprValue::Undefined, ExprValue::Undefined) => std::cmp::Ordering::Equal,
                (ExprValue::Undefined, _) => std::cmp::Ordering::Greater,
                (_, ExprValue::Undefined) => std::cmp::Ordering::Less,
                _ => a.to_js_string().cmp(&b.to_js_string()),
            });
            Ok(ExprValue::Array(out))
        }
        "filter" | "map" | "reduce" | "some" | "every" | "find" | "findIndex" | "flatMap" => Err(
            format!("Array.{} needs a callback, and functions cannot be written in conditions", method),
        ),
        "flat" => {
            let depth = integer_arg(args, 0, 1.0).max(0.0) as usize;
            Ok(ExprValue::Array(flatten(items, depth)))
        }
        "includes" => {
            let needle = arg(args, 0);
            let from = relative_index(integer_arg(args, 1, 0.0), len);
            Ok(ExprValue::Bool(items[from..].iter().any(|item| item.same_value_zero(&needle))))
        }
        "indexOf" => {
            let needle = arg(args, 0);
            let from = relative_index(integer_arg(args, 1, 0.0), len);
            Ok(ExprValue::Number(
                items[from..]
                    .iter()
                    .position(|item| item.strict_equals(&needle))
                    .map(|i| (i + from) as f64)
                    .unwrap_or(-1.0),
            ))
        }
        "lastIndexOf" => {
            let needle = arg(args, 0);
            Ok(ExprValue::Number(
                items
                    .iter()
                    .rposition(|item| item.strict_equals(&needle))
                    .map(|i| i as f64)
                    .unwrap_or(-1.0),
            ))
        }
        "slice" => {
            let start = relative_index(integer_arg(args, 0, 0.0), len);
            let end = relative_index(integer_arg(args, 1, len as f64), len);
            Ok(ExprValue::Array(if start < end {
                items[start..end].to_vec()
            } else {
                Vec::new()
            }))
        }
        _ => Err(format!("array.{} is not a function", method)),
    }
}

fn flatten(items: &[ExprValue], depth: usize) -> Vec<ExprValue> {
    let mut out = Vec::new();
    for item in items {
        match item {
            ExprValue::Array(inner) if depth > 0 => out.extend(flatten(inner, depth - 1)),
            other => out.push(other.clone()),
        }
    }
    out
}

/* ==== Math ==== */

fn math_constant(name: &str) -> Option<f64> {
    use std::f64::consts;
    Some(match name {
        "PI" => consts::PI,
        "E" => consts::E,
        "LN2" => consts::LN_2,
        "LN10" => consts::LN_10,
        "LOG2E" => consts::LOG2_E,
        "LOG10E" => consts::LOG10_E,
        "SQRT2" => consts::SQRT_2,
        "SQRT1_2" => consts::FRAC_1_SQRT_2,
        _ => return None,
    })
}

fn math_function(name: &str, args: &[ExprValue]) -> EvalResult {
    let x = arg(args, 0).to_number();
    let y = arg(args, 1).to_number();
    let n = match name {
        "abs" => x.abs(),
        "ceil" => x.ceil(),
        "floor" => x.floor(),
        "round" => (x + 0.5).floor(),
        "trunc" => x.trunc(),
        "sign" => {
            if x.is_nan() || x == 0.0 {
                x
            } else {
                x.signum()
            }
        }
        "sqrt" => x.sqrt(),
        "cbrt" => x.cbrt(),
        "exp" => x.exp(),
        "log" => x.ln(),
        "log2" => x.log2(),
        "log10" => x.log10(),
        "sin" => x.sin(),
        "cos" => x.cos(),
        "tan" => x.tan(),
        "asin" => x.asin(),
        "acos" => x.acos(),
        "atan" => x.atan(),
        "atan2" => x.atan2(y),
        "pow" => x.powf(y),
        "hypot" => args.iter().map(|a| a.to_number().powi(2)).sum::<f64>().sqrt(),
        "max" => args.iter().map(ExprValue::to_number).fold(f64::NEG_INFINITY, |acc, v| {
            if acc.is_nan() || v.is_nan() {
                f64::NAN
            } else {
                acc.max(v)
            }
        }),
        "min" => args.iter().map(ExprValue::to_number).fold(f64::INFINITY, |acc, v| {
            if acc.is_nan() || v.is_nan() {
                f64::NAN
            } else {
                acc.min(v)
            }
        }),
        _ => return Err(format!("Math.{} is not a function", name)),
    };
    Ok(ExprValue::Number(n))
}
