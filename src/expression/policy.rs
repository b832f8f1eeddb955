use super::ast::{BinaryOp, Expr, LogicalOp, MemberKey, ObjectEntry, PropertyKey, UnaryOp};

/// Names that can never be referenced, as identifiers or as properties.
pub const BLOCKED_NAMES: &[&str] = &[
    "__proto__",
    "constructor",
    "prototype",
    "eval",
    "Function",
    "require",
    "import",
    "process",
    "global",
    "globalThis",
];

/// Methods that may be called on a value.
pub const SAFE_METHODS: &[&str] = &[
    // string
    "includes",
    "startsWith",
    "endsWith",
    "toLowerCase",
    "toUpperCase",
    "trim",
    "trimStart",
    "trimEnd",
    "slice",
    "substring",
    "substr",
    "indexOf",
    "lastIndexOf",
    "charAt",
    "charCodeAt",
    "split",
    "replace",
    "match",
    "search",
    "repeat",
    "padStart",
    "padEnd",
    // sequence
    "length",
    "join",
    "concat",
    "reverse",
    "sort",
    "filter",
    "map",
    "reduce",
    "some",
    "every",
    "find",
    "findIndex",
    "flat",
    "flatMap",
    // common
    "toString",
    "valueOf",
];

pub const MATH_NAMESPACE: &str = "Math";

pub fn is_blocked(name: &str) -> bool {
    BLOCKED_NAMES.contains(&name)
}

pub fn is_safe_method(name: &str) -> bool {
    SAFE_METHODS.contains(&name)
}

/// Walk the whole tree and reject anything outside the allowed node set.
/// Runs before evaluation, so a rejected expression never executes.
pub fn check(expr: &Expr) -> Result<(), String> {
    match expr {
        Expr::Number(_) | Expr::Str(_) | Expr::Bool(_) | Expr::Null | Expr::Undefined => Ok(()),
        Expr::Ident(name) => {
            if is_blocked(name) {
                Err(format!("Access to identifier '{}' is not allowed", name))
            } else {
                Ok(())
            }
        }
        Expr::Template { exprs, .. } => exprs.iter().try_for_each(check),
        Expr::Array(items) => items.iter().try_for_each(check),
        Expr::Object(entries) => entries.iter().try_for_each(|entry| match entry {
            ObjectEntry::Spread(_) => Err("Spread properties are not allowed".to_string()),
            ObjectEntry::Property { key, value } => {
                match key {
                    PropertyKey::Static(name) if is_blocked(name) => {
                        return Err(format!("Access to property '{}' is not allowed", name))
                    }
                    PropertyKey::Computed(inner) => check(inner)?,
                    PropertyKey::Static(_) => {}
                }
                check(value)
            }
        }),
        Expr::Member { object, property } => {
            check(object)?;
            check_member_key(property)
        }
        Expr::Call { callee, args } => {
            check_callee(callee)?;
            args.iter().try_for_each(check)
        }
        Expr::Unary { op, operand } => match op {
            UnaryOp::Neg | UnaryOp::Plus | UnaryOp::Not | UnaryOp::TypeOf => check(operand),
            other => Err(format!("Unsafe unary operator: {}", other.token())),
        },
        Expr::Binary { op, left, right } => {
            if *op == BinaryOp::InstanceOf {
                return Err("Unsupported operator: instanceof".to_string());
            }
            check(left)?;
            check(right)
        }
        Expr::Logical { op, left, right } => {
            if *op == LogicalOp::Nullish {
                return Err("Unsupported operator: ??".to_string());
            }
            check(left)?;
            check(right)
        }
        Expr::Conditional {
            test,
            consequent,
            alternate,
        } => {
            check(test)?;
            check(consequent)?;
            check(alternate)
        }
        Expr::Function | Expr::Arrow => Err("Function definitions are not allowed".to_string()),
        Expr::Class => Err("Class definitions are not allowed".to_string()),
        Expr::Assignment { .. } => Err("Assignments are not allowed".to_string()),
        Expr::Update(_) => Err("Update expressions (++/--) are not allowed".to_string()),
        Expr::New { .. } => Err("Object construction (new) is not allowed".to_string()),
        Expr::This => Err("The \"this\" keyword is not allowed".to_string()),
        Expr::Sequence(_) => {
            Err("Sequence expressions (comma operator) are not allowed".to_string())
        }
        Expr::Spread(_) => Err("Spread elements are not allowed".to_string()),
    }
}

fn check_member_key(property: &MemberKey) -> Result<(), String> {
    match property {
        MemberKey::Static(name) => {
            if is_blocked(name) {
                Err(format!("Access to property '{}' is not allowed", name))
            } else {
                Ok(())
            }
        }
        MemberKey::Computed(key) => {
            if let Expr::Str(name) = key.as_ref() {
                if is_blocked(name) {
                    return Err(format!("Access to property '{}' is not allowed", name));
                }
            }
            check(key)
        }
    }
}

fn check_callee(callee: &Expr) -> Result<(), String> {
    let Expr::Member { object, property } = callee else {
        check(callee)?;
        return Err("Only method calls are allowed".to_string());
    };
    check(object)?;
    check_member_key(property)?;

    if matches!(object.as_ref(), Expr::Ident(name) if name == MATH_NAMESPACE) {
        return Ok(());
    }
    let method = match property {
        MemberKey::Static(name) => Some(name.as_str()),
        MemberKey::Computed(key) => match key.as_ref() {
            Expr::Str(name) => Some(name.as_str()),
            _ => None,
        },
    };
    match method {
        Some(name) if is_safe_method(name) => Ok(()),
        Some(name) => Err(format!("Method '{}' is not whitelisted", name)),
        None => Err("Computed method names are not allowed".to_string()),
    }
}
