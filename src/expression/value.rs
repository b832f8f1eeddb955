use serde_json::Value;
use std::collections::BTreeMap;

/// Runtime value of the condition language, following JavaScript semantics
/// for the subset of types it can produce.
#[derive(Debug, Clone, PartialEq)]
pub enum ExprValue {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<ExprValue>),
    Object(BTreeMap<String, ExprValue>),
    /// The built-in `Math` namespace
    Math,
}

impl ExprValue {
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => ExprValue::Null,
            Value::Bool(b) => ExprValue::Bool(*b),
            Value::Number(n) => ExprValue::Number(n.as_f64().unwrap_or(f64::NAN)),
            Value::String(s) => ExprValue::String(s.clone()),
            Value::Array(items) => ExprValue::Array(items.iter().map(Self::from_json).collect()),
            Value::Object(map) => ExprValue::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Self::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Convert back to JSON. `undefined`, non-finite numbers and `Math` become null.
    pub fn to_json(&self) -> Value {
        match self {
            ExprValue::Undefined | ExprValue::Null | ExprValue::Math => Value::Null,
            ExprValue::Bool(b) => Value::Bool(*b),
            ExprValue::Number(n) => number_to_json(*n),
            ExprValue::String(s) => Value::String(s.clone()),
            ExprValue::Array(items) => Value::Array(items.iter().map(Self::to_json).collect()),
            ExprValue::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, ExprValue::Undefined | ExprValue::Null)
    }

    pub fn truthy(&self) -> bool {
        match self {
            ExprValue::Undefined | ExprValue::Null => false,
            ExprValue::Bool(b) => *b,
            ExprValue::Number(n) => *n != 0.0 && !n.is_nan(),
            ExprValue::String(s) => !s.is_empty(),
            ExprValue::Array(_) | ExprValue::Object(_) | ExprValue::Math => true,
        }
    }

    pub fn type_of(&self) -> &'static str {
        match self {
            ExprValue::Undefined => "undefined",
            ExprValue::Bool(_) => "boolean",
            ExprValue::Number(_) => "number",
            ExprValue::String(_) => "string",
            ExprValue::Null | ExprValue::Array(_) | ExprValue::Object(_) | ExprValue::Math => {
                "object"
            }
        }
    }

    pub fn to_number(&self) -> f64 {
        match self {
            ExprValue::Undefined => f64::NAN,
            ExprValue::Null => 0.0,
            ExprValue::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            ExprValue::Number(n) => *n,
            ExprValue::String(s) => string_to_number(s),
            ExprValue::Array(_) => string_to_number(&self.to_js_string()),
            ExprValue::Object(_) | ExprValue::Math => f64::NAN,
        }
    }

    pub fn to_js_string(&self) -> String {
        match self {
            ExprValue::Undefined => "undefined".to_string(),
            ExprValue::Null => "null".to_string(),
            ExprValue::Bool(b) => b.to_string(),
            ExprValue::Number(n) => number_to_string(*n),
            ExprValue::String(s) => s.clone(),
            ExprValue::Array(items) => items
                .iter()
                .map(|item| {
                    if item.is_nullish() {
                        String::new()
                    } else {
                        item.to_js_string()
                    }
                })
                .collect::<Vec<_>>()
                .join(","),
            ExprValue::Object(_) => "[object Object]".to_string(),
            ExprValue::Math => "[object Math]".to_string(),
        }
    }

    fn is_primitive(&self) -> bool {
        !matches!(
            self,
            ExprValue::Array(_) | ExprValue::Object(_) | ExprValue::Math
        )
    }

    /// `ToPrimitive` with the default hint: composites become their string form
    fn to_primitive(&self) -> ExprValue {
        if self.is_primitive() {
            self.clone()
        } else {
            ExprValue::String(self.to_js_string())
        }
    }

    /// `===`. Composites compare structurally since values carry no identity.
    pub fn strict_equals(&self, other: &ExprValue) -> bool {
        match (self, other) {
            (ExprValue::Number(a), ExprValue::Number(b)) => a == b,
            _ => self == other,
        }
    }

    /// `==`
    pub fn loose_equals(&self, other: &ExprValue) -> bool {
        use ExprValue::*;
        match (self, other) {
            (Undefined | Null, Undefined | Null) => true,
            (Undefined | Null, _) | (_, Undefined | Null) => false,
            (Number(_), String(_)) | (String(_), Number(_)) => {
                self.to_number() == other.to_number()
            }
            (Bool(_), _) => ExprValue::Number(self.to_number()).loose_equals(other),
            (_, Bool(_)) => self.loose_equals(&ExprValue::Number(other.to_number())),
            _ if self.is_primitive() != other.is_primitive() => {
                self.to_primitive().loose_equals(&other.to_primitive())
            }
            _ => self.strict_equals(other),
        }
    }

    /// `SameValueZero`, used by `includes`
    pub fn same_value_zero(&self, other: &ExprValue) -> bool {
        match (self, other) {
            (ExprValue::Number(a), ExprValue::Number(b)) if a.is_nan() && b.is_nan() => true,
            _ => self.strict_equals(other),
        }
    }

    /// Abstract relational comparison. `None` means undefined (NaN involved).
    pub fn compare(&self, other: &ExprValue) -> Option<std::cmp::Ordering> {
        let (left, right) = (self.to_primitive(), other.to_primitive());
        if let (ExprValue::String(a), ExprValue::String(b)) = (&left, &right) {
            return Some(a.cmp(b));
        }
        left.to_number().partial_cmp(&right.to_number())
    }
}

pub fn number_to_json(n: f64) -> Value {
    if !n.is_finite() {
        return Value::Null;
    }
    if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

/// `Number.prototype.toString()` for the common cases
pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 {
            "Infinity".to_string()
        } else {
            "-Infinity".to_string()
        }
    } else if n == 0.0 {
        "0".to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{}", n as i128)
    } else {
        format!("{}", n)
    }
}

fn string_to_number(s: &str) -> f64 {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    if let Some(hex) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        return u64::from_str_radix(hex, 16)
            .map(|v| v as f64)
            .unwrap_or(f64::NAN);
    }
    match trimmed {
        "Infinity" | "+Infinity" => f64::INFINITY,
        "-Infinity" => f64::NEG_INFINITY,
        _ if trimmed.chars().all(|c| c.is_ascii_digit() || "+-.eE".contains(c)) => {
            trimmed.parse().unwrap_or(f64::NAN)
        }
        _ => f64::NAN,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_number_formatting() {
        assert_eq!(number_to_string(3.0), "3");
        assert_eq!(number_to_string(-0.0), "0");
        assert_eq!(number_to_string(2.5), "2.5");
        assert_eq!(number_to_string(f64::NAN), "NaN");
        assert_eq!(number_to_json(4.0), json!(4));
        assert_eq!(number_to_json(0.25), json!(0.25));
        assert_eq!(number_to_json(f64::INFINITY), Value::Null);
    }

    #[test]
    fn test_truthiness() {
        assert!(!ExprValue::String(String::new()).truthy());
        assert!(!ExprValue::Number(f64::NAN).truthy());
        assert!(ExprValue::Array(vec![]).truthy());
        assert!(!ExprValue::Undefined.truthy());
    }

    #[test]
    fn test_loose_equality() {
        let one = ExprValue::Number(1.0);
        assert!(one.loose_equals(&ExprValue::String("1".into())));
        assert!(one.loose_equals(&ExprValue::Bool(true)));
        assert!(ExprValue::Null.loose_equals(&ExprValue::Undefined));
        assert!(!ExprValue::Null.loose_equals(&ExprValue::Number(0.0)));
        assert!(!one.strict_equals(&ExprValue::String("1".into())));
    }

    #[test]
    fn test_json_round_trip_keeps_shape() {
        let value = json!({"a": [1, "x", null, true]});
        assert_eq!(ExprValue::from_json(&value).to_json(), value);
    }

    #[test]
    fn test_compare_strings_and_numbers() {
        use std::cmp::Ordering;
        let a = ExprValue::String("apple".into());
        let b = ExprValue::String("banana".into());
        assert_eq!(a.compare(&b), Some(Ordering::Less));
        assert_eq!(
            ExprValue::String("10".into()).compare(&ExprValue::Number(9.0)),
            Some(Ordering::Greater)
        );
        assert_eq!(ExprValue::Undefined.compare(&ExprValue::Number(1.0)), None);
    }
}
