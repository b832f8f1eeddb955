//! PEST-based parser for the condition language.

use pest::iterators::{Pair, Pairs};
use pest::Parser;
use pest_derive::Parser;

use super::ast::{BinaryOp, Expr, LogicalOp, MemberKey, ObjectEntry, PropertyKey, UnaryOp};
use super::value::number_to_string;

/* ===================== PEST Parser ===================== */

#[derive(Parser)]
#[grammar = "expression/grammar.pest"]
struct ConditionParser;

/* ===================== Error Types ===================== */

#[derive(Debug)]
pub enum ParseError {
    PestError(String),
    BuildError(String),
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::PestError(msg) => write!(f, "{}", msg),
            ParseError::BuildError(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for ParseError {}

impl From<pest::error::Error<Rule>> for ParseError {
    fn from(err: pest::error::Error<Rule>) -> Self {
        let column = match err.line_col {
            pest::error::LineColLocation::Pos((_, col)) => col,
            pest::error::LineColLocation::Span((_, col), _) => col,
        };
        let found = match &err.variant {
            pest::error::ErrorVariant::ParsingError { .. } => "Unexpected token",
            pest::error::ErrorVariant::CustomError { .. } => "Invalid syntax",
        };
        ParseError::PestError(format!("{} at column {}", found, column))
    }
}

pub type ParseResult<T> = Result<T, ParseError>;

/* ===================== Public API ===================== */

/// Parse a single expression
pub fn parse(source: &str) -> ParseResult<Expr> {
    let mut pairs = ConditionParser::parse(Rule::program, source)?;
    let program = next(&mut pairs, "program")?;
    let expression = next(&mut program.into_inner(), "expression")?;
    build_expression(expression)
}

/* ===================== AST Builder ===================== */

fn next<'a>(pairs: &mut Pairs<'a, Rule>, what: &str) -> ParseResult<Pair<'a, Rule>> {
    pairs
        .next()
        .ok_or_else(|| ParseError::BuildError(format!("Missing {}", what)))
}

fn build_expression(pair: Pair<Rule>) -> ParseResult<Expr> {
    match pair.as_rule() {
        Rule::expression => {
            let mut items = pair
                .into_inner()
                .map(build_expression)
                .collect::<ParseResult<Vec<_>>>()?;
            if items.len() == 1 {
                Ok(items.remove(0))
            } else {
                Ok(Expr::Sequence(items))
            }
        }
        Rule::assignment => {
            let mut inner = pair.into_inner();
            let first = next(&mut inner, "assignment operand")?;
            match inner.next() {
                None => build_expression(first),
                Some(_op) => {
                    let value = next(&mut inner, "assigned value")?;
                    Ok(Expr::Assignment {
                        target: Box::new(build_expression(first)?),
                        value: Box::new(build_expression(value)?),
                    })
                }
            }
        }
        Rule::arrow_function => Ok(Expr::Arrow),
        Rule::function_expr => Ok(Expr::Function),
        Rule::class_expr => Ok(Expr::Class),
        Rule::this_expr => Ok(Expr::This),
        Rule::new_expr => build_new(pair),
        Rule::conditional => {
            let mut inner = pair.into_inner();
            let test = build_expression(next(&mut inner, "condition")?)?;
            match inner.next() {
                None => Ok(test),
                Some(consequent) => {
                    let alternate = next(&mut inner, "alternate branch")?;
                    Ok(Expr::Conditional {
                        test: Box::new(test),
                        consequent: Box::new(build_expression(consequent)?),
                        alternate: Box::new(build_expression(alternate)?),
                    })
                }
            }
        }
        Rule::logical_or
        | Rule::logical_and
        | Rule::equality
        | Rule::relational
        | Rule::additive
        | Rule::multiplicative => build_binary_chain(pair),
        Rule::exponent => {
            let mut inner = pair.into_inner();
            let base = build_expression(next(&mut inner, "operand")?)?;
            match inner.next() {
                None => Ok(base),
                Some(_pow) => {
                    let exponent = build_expression(next(&mut inner, "exponent")?)?;
                    Ok(Expr::Binary {
                        op: BinaryOp::Pow,
                        left: Box::new(base),
                        right: Box::new(exponent),
                    })
                }
            }
        }
        Rule::unary => build_unary(pair),
        Rule::postfix => build_postfix(pair),
        Rule::paren => build_expression(next(&mut pair.into_inner(), "parenthesized expression")?),
        Rule::number => parse_number(pair.as_str()).map(Expr::Number),
        Rule::string => Ok(Expr::Str(string_value(pair)?)),
        Rule::template => build_template(pair),
        Rule::boolean => Ok(Expr::Bool(pair.as_str() == "true")),
        Rule::null_lit => Ok(Expr::Null),
        Rule::undefined_lit => Ok(Expr::Undefined),
        Rule::identifier => Ok(Expr::Ident(pair.as_str().to_string())),
        Rule::array_lit => Ok(Expr::Array(
            pair.into_inner()
                .map(build_expression)
                .collect::<ParseResult<Vec<_>>>()?,
        )),
        Rule::object_lit => build_object(pair),
        Rule::spread => Ok(Expr::Spread(Box::new(build_expression(next(
            &mut pair.into_inner(),
            "spread operand",
        )?)?))),
        other => Err(ParseError::BuildError(format!(
            "Unexpected expression rule: {:?}",
            other
        ))),
    }
}

/// Left-associative chain: `operand (op operand)*`
fn build_binary_chain(pair: Pair<Rule>) -> ParseResult<Expr> {
    let mut inner = pair.into_inner();
    let mut left = build_expression(next(&mut inner, "left operand")?)?;

    while let Some(op) = inner.next() {
        let right = build_expression(next(&mut inner, "right operand")?)?;
        left = match op.as_rule() {
            Rule::or_op => logical(LogicalOp::Or, left, right),
            Rule::nullish_op => logical(LogicalOp::Nullish, left, right),
            Rule::and_op => logical(LogicalOp::And, left, right),
            _ => {
                let token = op.as_str().trim();
                let op = BinaryOp::from_token(token).ok_or_else(|| {
                    ParseError::BuildError(format!("Unknown operator '{}'", token))
                })?;
                Expr::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                }
            }
        };
    }

    Ok(left)
}

fn logical(op: LogicalOp, left: Expr, right: Expr) -> Expr {
    Expr::Logical {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

fn build_unary(pair: Pair<Rule>) -> ParseResult<Expr> {
    let mut parts: Vec<Pair<Rule>> = pair.into_inner().collect();
    let operand = parts
        .pop()
        .ok_or_else(|| ParseError::BuildError("Missing unary operand".to_string()))?;
    let mut expr = build_expression(operand)?;

    for prefix in parts.into_iter().rev() {
        expr = match prefix.as_rule() {
            Rule::pre_update => Expr::Update(Box::new(expr)),
            _ => {
                let token = prefix.as_str();
                let op = UnaryOp::from_token(token).ok_or_else(|| {
                    ParseError::BuildError(format!("Unknown unary operator '{}'", token))
                })?;
                Expr::Unary {
                    op,
                    operand: Box::new(expr),
                }
            }
        };
    }

    Ok(expr)
}

fn build_postfix(pair: Pair<Rule>) -> ParseResult<Expr> {
    let mut inner = pair.into_inner();
    let mut expr = build_expression(next(&mut inner, "postfix operand")?)?;
    for suffix in inner {
        expr = apply_suffix(expr, suffix)?;
    }
    Ok(expr)
}

fn apply_suffix(expr: Expr, suffix: Pair<Rule>) -> ParseResult<Expr> {
    Ok(match suffix.as_rule() {
        Rule::member => {
            let name = next(&mut suffix.into_inner(), "property name")?;
            Expr::Member {
                object: Box::new(expr),
                property: MemberKey::Static(name.as_str().to_string()),
            }
        }
        Rule::index => {
            let key = next(&mut suffix.into_inner(), "index expression")?;
            Expr::Member {
                object: Box::new(expr),
                property: MemberKey::Computed(Box::new(build_expression(key)?)),
            }
        }
        Rule::call => Expr::Call {
            callee: Box::new(expr),
            args: build_arguments(suffix)?,
        },
        Rule::post_update => Expr::Update(Box::new(expr)),
        other => {
            return Err(ParseError::BuildError(format!(
                "Unexpected postfix rule: {:?}",
                other
            )))
        }
    })
}

fn build_arguments(call: Pair<Rule>) -> ParseResult<Vec<Expr>> {
    call.into_inner().map(build_expression).collect()
}

fn build_new(pair: Pair<Rule>) -> ParseResult<Expr> {
    let mut inner = pair.into_inner();
    let _kw = next(&mut inner, "new keyword")?;
    let mut callee = build_expression(next(&mut inner, "constructor")?)?;
    let mut args = Vec::new();
    for suffix in inner {
        if suffix.as_rule() == Rule::call {
            args = build_arguments(suffix)?;
        } else {
            callee = apply_suffix(callee, suffix)?;
        }
    }
    Ok(Expr::New {
        callee: Box::new(callee),
        args,
    })
}

fn build_object(pair: Pair<Rule>) -> ParseResult<Expr> {
    let mut entries = Vec::new();
    for member in pair.into_inner() {
        match member.as_rule() {
            Rule::property_pair => {
                let mut inner = member.into_inner();
                let key = build_property_key(next(&mut inner, "property key")?)?;
                let value = build_expression(next(&mut inner, "property value")?)?;
                entries.push(ObjectEntry::Property { key, value });
            }
            Rule::shorthand => {
                let name = next(&mut member.into_inner(), "shorthand property")?
                    .as_str()
                    .to_string();
                entries.push(ObjectEntry::Property {
                    key: PropertyKey::Static(name.clone()),
                    value: Expr::Ident(name),
                });
            }
            Rule::spread => {
                let operand = next(&mut member.into_inner(), "spread operand")?;
                entries.push(ObjectEntry::Spread(build_expression(operand)?));
            }
            other => {
                return Err(ParseError::BuildError(format!(
                    "Unexpected object member: {:?}",
                    other
                )))
            }
        }
    }
    Ok(Expr::Object(entries))
}

fn build_property_key(pair: Pair<Rule>) -> ParseResult<PropertyKey> {
    let key = next(&mut pair.into_inner(), "property key")?;
    Ok(match key.as_rule() {
        Rule::computed_key => {
            let inner = next(&mut key.into_inner(), "computed key")?;
            PropertyKey::Computed(Box::new(build_expression(inner)?))
        }
        Rule::string => PropertyKey::Static(string_value(key)?),
        Rule::number => PropertyKey::Static(number_to_string(parse_number(key.as_str())?)),
        _ => PropertyKey::Static(key.as_str().to_string()),
    })
}

fn build_template(pair: Pair<Rule>) -> ParseResult<Expr> {
    let mut quasis = Vec::new();
    let mut exprs = Vec::new();
    let mut current = String::new();

    for part in pair.into_inner() {
        match part.as_rule() {
            Rule::template_chars => current.push_str(&unescape(part.as_str())),
            Rule::template_sub => {
                quasis.push(std::mem::take(&mut current));
                let inner = next(&mut part.into_inner(), "template expression")?;
                exprs.push(build_expression(inner)?);
            }
            other => {
                return Err(ParseError::BuildError(format!(
                    "Unexpected template part: {:?}",
                    other
                )))
            }
        }
    }
    quasis.push(current);

    Ok(Expr::Template { quasis, exprs })
}

fn string_value(pair: Pair<Rule>) -> ParseResult<String> {
    let raw = next(&mut pair.into_inner(), "string contents")?;
    Ok(unescape(raw.as_str()))
}

fn parse_number(text: &str) -> ParseResult<f64> {
    let parsed = if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).map(|v| v as f64).ok()
    } else {
        text.parse::<f64>().ok()
    };
    parsed.ok_or_else(|| ParseError::BuildError(format!("Failed to parse number '{}'", text)))
}

/// Resolve JavaScript-style escape sequences
fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('b') => out.push('\u{8}'),
            Some('f') => out.push('\u{c}'),
            Some('v') => out.push('\u{b}'),
            Some('0') => out.push('\0'),
            Some('\n') => {}
            Some('x') => {
                let hex: String = chars.by_ref().take(2).collect();
                match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    Some(ch) => out.push(ch),
                    None => out.push_str(&hex),
                }
            }
            Some('u') => {
                let hex: String = if chars.peek() == Some(&'{') {
                    chars.next();
                    chars.by_ref().take_while(|c| *c != '}').collect()
                } else {
                    chars.by_ref().take(4).collect()
                };
                match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    Some(ch) => out.push(ch),
                    None => out.push_str(&hex),
                }
            }
            Some(other) => out.push(other),
            None => {}
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ident(name: &str) -> Box<Expr> {
        Box::new(Expr::Ident(name.to_string()))
    }

    #[test]
    fn test_parse_precedence() {
        let expr = parse("1 + 2 * 3").unwrap();
        assert_eq!(
            expr,
            Expr::Binary {
                op: BinaryOp::Add,
                left: Box::new(Expr::Number(1.0)),
                right: Box::new(Expr::Binary {
                    op: BinaryOp::Mul,
                    left: Box::new(Expr::Number(2.0)),
                    right: Box::new(Expr::Number(3.0)),
                }),
            }
        );
    }

    #[test]
    fn test_parse_exponent_is_right_associative() {
        let expr = parse("2 ** 3 ** 2").unwrap();
        match expr {
            Expr::Binary { op: BinaryOp::Pow, right, .. } => {
                assert!(matches!(*right, Expr::Binary { op: BinaryOp::Pow, .. }))
            }
            other => panic!("unexpected tree: {:?}", other),
        }
    }

    #[test]
    fn test_parse_member_call_chain() {
        let expr = parse("INPUT.name.toLowerCase()").unwrap();
        assert_eq!(
            expr,
            Expr::Call {
                callee: Box::new(Expr::Member {
                    object: Box::new(Expr::Member {
                        object: ident("INPUT"),
                        property: MemberKey::Static("name".into()),
                    }),
                    property: MemberKey::Static("toLowerCase".into()),
                }),
                args: vec![],
            }
        );
    }

    #[test]
    fn test_parse_rejected_forms_still_parse() {
        assert!(matches!(parse("x => x").unwrap(), Expr::Arrow));
        assert!(matches!(parse("function () { return 1 }").unwrap(), Expr::Function));
        assert!(matches!(parse("class A {}").unwrap(), Expr::Class));
        assert!(matches!(parse("a = 1").unwrap(), Expr::Assignment { .. }));
        assert!(matches!(parse("a += 1").unwrap(), Expr::Assignment { .. }));
        assert!(matches!(parse("a++").unwrap(), Expr::Update(_)));
        assert!(matches!(parse("--a").unwrap(), Expr::Update(_)));
        assert!(matches!(parse("new Date()").unwrap(), Expr::New { .. }));
        assert!(matches!(parse("this").unwrap(), Expr::This));
        assert!(matches!(parse("1, 2").unwrap(), Expr::Sequence(_)));
    }

    #[test]
    fn test_parse_equality_is_not_assignment() {
        assert!(matches!(
            parse("a == 1").unwrap(),
            Expr::Binary { op: BinaryOp::Eq, .. }
        ));
        assert!(matches!(
            parse("a >= 1").unwrap(),
            Expr::Binary { op: BinaryOp::GtEq, .. }
        ));
    }

    #[test]
    fn test_parse_literals() {
        assert_eq!(parse("'it\\'s'").unwrap(), Expr::Str("it's".into()));
        assert_eq!(parse("\"a\\nb\"").unwrap(), Expr::Str("a\nb".into()));
        assert_eq!(parse("0x1F").unwrap(), Expr::Number(31.0));
        assert_eq!(parse(".5").unwrap(), Expr::Number(0.5));
        assert_eq!(parse("undefined").unwrap(), Expr::Undefined);
        assert_eq!(
            parse("`a${INPUT}b`").unwrap(),
            Expr::Template {
                quasis: vec!["a".into(), "b".into()],
                exprs: vec![Expr::Ident("INPUT".into())],
            }
        );
    }

    #[test]
    fn test_parse_object_literal() {
        let expr = parse("{ a: 1, 'b': 2, [k]: 3, c }").unwrap();
        match expr {
            Expr::Object(entries) => assert_eq!(entries.len(), 4),
            other => panic!("unexpected tree: {:?}", other),
        }
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse("").is_err());
        assert!(parse("1 +").is_err());
        assert!(parse("(1").is_err());
        assert!(parse("a b").is_err());
    }
}
