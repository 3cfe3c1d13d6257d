//! Assertion Evaluator — typed comparison expressions over a step result.
//!
//! Grammar: `<left> <op> [right]`. `left` may be a `${...}` reference or a
//! bare literal; `right` (when present) is resolved the same way. Unlike
//! the old shell-delegating condition executor, this never spawns a
//! process: it is a small hand-rolled parser plus evaluator.

use crate::resolver::{Scope, ValueResolver};
use crate::value::Value;
use regex::Regex;

#[derive(Debug, Clone, PartialEq)]
pub enum Operator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Contains,
    StartsWith,
    EndsWith,
    Matches,
    Exists,
    IsNull,
    IsEmpty,
    HasLength(i64),
    IsType(String),
}

#[derive(Debug)]
pub struct AssertionError(pub String);

pub struct ParsedAssertion {
    pub left: String,
    pub operator: Operator,
    pub right: Option<String>,
}

/// Parse an assertion expression of the form `left op [right]`.
pub fn parse(expression: &str) -> Result<ParsedAssertion, AssertionError> {
    let trimmed = expression.trim();
    const BINARY_OPS: &[(&str, Operator)] = &[
        ("==", Operator::Eq),
        ("!=", Operator::Ne),
        ("<=", Operator::Le),
        (">=", Operator::Ge),
        ("<", Operator::Lt),
        (">", Operator::Gt),
    ];
    for (token, op) in BINARY_OPS {
        if let Some(pos) = find_top_level(trimmed, token) {
            let left = trimmed[..pos].trim().to_string();
            let right = trimmed[pos + token.len()..].trim().to_string();
            return Ok(ParsedAssertion { left, operator: op.clone(), right: Some(right) });
        }
    }
    const WORD_OPS: &[&str] = &["contains", "startsWith", "endsWith", "matches", "hasLength", "isType"];
    for token in WORD_OPS {
        if let Some(pos) = find_word(trimmed, token) {
            let left = trimmed[..pos].trim().to_string();
            let right = trimmed[pos + token.len()..].trim().to_string();
            let operator = match *token {
                "contains" => Operator::Contains,
                "startsWith" => Operator::StartsWith,
                "endsWith" => Operator::EndsWith,
                "matches" => Operator::Matches,
                "hasLength" => {
                    let n = right
                        .parse::<i64>()
                        .map_err(|_| AssertionError(format!("hasLength expects an integer, got '{}'", right)))?;
                    Operator::HasLength(n)
                }
                "isType" => Operator::IsType(right.clone()),
                _ => unreachable!(),
            };
            return Ok(ParsedAssertion { left, operator, right: Some(right) });
        }
    }
    for (token, op) in [("exists", Operator::Exists), ("isNull", Operator::IsNull), ("isEmpty", Operator::IsEmpty)] {
        if let Some(rest) = trimmed.strip_suffix(token) {
            let rest = rest.trim();
            if !rest.is_empty() {
                return Ok(ParsedAssertion { left: rest.to_string(), operator: op, right: None });
            }
        }
    }
    Err(AssertionError(format!("could not parse assertion: '{}'", expression)))
}

fn find_top_level(s: &str, token: &str) -> Option<usize> {
    s.find(token)
}

fn find_word(s: &str, word: &str) -> Option<usize> {
    let pattern = format!(" {} ", word);
    s.find(&pattern).map(|p| p + 1).or_else(|| {
        // allow trailing word with no argument (e.g. bare hasLength is invalid, but be lenient on spacing)
        s.rfind(word).filter(|&p| p > 0 && s.as_bytes()[p - 1] == b' ')
    })
}

/// Resolve `left`/`right` operands and evaluate. Returns Ok(true/false); the
/// caller decides how a parse/resolve error interacts with assertion failure
/// (both are reported as failure reasons, per the step executor contract).
pub fn evaluate(assertion: &str, resolver: &ValueResolver, scope: &Scope) -> Result<bool, AssertionError> {
    let parsed = parse(assertion)?;
    let left = resolve_operand(&parsed.left, resolver, scope);

    match &parsed.operator {
        Operator::Exists => Ok(resolver.reference_exists(&parsed.left, scope)),
        Operator::IsNull => Ok(matches!(left, Value::Null)),
        Operator::IsEmpty => Ok(left.is_empty()),
        Operator::HasLength(n) => Ok(length_of(&left) == Some(*n)),
        Operator::IsType(t) => Ok(left.type_name() == t),
        Operator::Contains => {
            let right = resolve_operand(parsed.right.as_deref().unwrap_or(""), resolver, scope);
            Ok(string_contains(&left, &right))
        }
        Operator::StartsWith => {
            let right = resolve_operand(parsed.right.as_deref().unwrap_or(""), resolver, scope);
            Ok(left.as_display_string().starts_with(&right.as_display_string()))
        }
        Operator::EndsWith => {
            let right = resolve_operand(parsed.right.as_deref().unwrap_or(""), resolver, scope);
            Ok(left.as_display_string().ends_with(&right.as_display_string()))
        }
        Operator::Matches => {
            let pattern = parsed.right.clone().unwrap_or_default();
            let re = Regex::new(&strip_quotes(&pattern))
                .map_err(|e| AssertionError(format!("invalid regex '{}': {}", pattern, e)))?;
            Ok(re.is_match(&left.as_display_string()))
        }
        Operator::Eq | Operator::Ne | Operator::Lt | Operator::Le | Operator::Gt | Operator::Ge => {
            let right = resolve_operand(parsed.right.as_deref().unwrap_or(""), resolver, scope);
            Ok(compare(&left, &right, &parsed.operator))
        }
    }
}

fn resolve_operand(token: &str, resolver: &ValueResolver, scope: &Scope) -> Value {
    let token = token.trim();
    if token.starts_with("${") && token.ends_with('}') {
        return resolver.resolve(token, scope).unwrap_or(Value::Null);
    }
    if let Ok(b) = token.parse::<bool>() {
        return Value::Bool(b);
    }
    if let Ok(n) = token.parse::<f64>() {
        return Value::Number(n);
    }
    Value::String(strip_quotes(token))
}

fn strip_quotes(s: &str) -> String {
    let s = s.trim();
    if s.len() >= 2 && ((s.starts_with('"') && s.ends_with('"')) || (s.starts_with('\'') && s.ends_with('\''))) {
        s[1..s.len() - 1].to_string()
    } else {
        s.to_string()
    }
}

fn length_of(v: &Value) -> Option<i64> {
    match v {
        Value::String(s) => Some(s.chars().count() as i64),
        Value::Array(a) => Some(a.len() as i64),
        Value::Object(o) => Some(o.len() as i64),
        _ => None,
    }
}

fn string_contains(left: &Value, right: &Value) -> bool {
    match left {
        Value::Array(items) => items.contains(right),
        _ => left.as_display_string().contains(&right.as_display_string()),
    }
}

fn compare(left: &Value, right: &Value, op: &Operator) -> bool {
    if matches!(op, Operator::Eq | Operator::Ne) {
        let eq = left == right || (left.as_f64().is_some() && left.as_f64() == right.as_f64());
        return if matches!(op, Operator::Eq) { eq } else { !eq };
    }
    match (left.as_f64(), right.as_f64()) {
        (Some(l), Some(r)) => match op {
            Operator::Lt => l < r,
            Operator::Le => l <= r,
            Operator::Gt => l > r,
            Operator::Ge => l >= r,
            _ => unreachable!(),
        },
        _ => {
            let l = left.as_display_string();
            let r = right.as_display_string();
            match op {
                Operator::Lt => l < r,
                Operator::Le => l <= r,
                Operator::Gt => l > r,
                Operator::Ge => l >= r,
                _ => unreachable!(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn empty_scope<'a>(
        env: &'a BTreeMap<String, String>,
        vars: &'a BTreeMap<String, Value>,
        outputs: &'a BTreeMap<String, Value>,
    ) -> Scope<'a> {
        Scope { env, variables: vars, step_outputs: outputs }
    }

    #[test]
    fn numeric_equality() {
        let (env, vars, outputs) = (BTreeMap::new(), BTreeMap::new(), BTreeMap::new());
        let resolver = ValueResolver::default();
        assert!(evaluate("200 == 200", &resolver, &empty_scope(&env, &vars, &outputs)).unwrap());
        assert!(!evaluate("200 == 404", &resolver, &empty_scope(&env, &vars, &outputs)).unwrap());
    }

    #[test]
    fn contains_on_step_output() {
        let env = BTreeMap::new();
        let vars = BTreeMap::new();
        let mut outputs = BTreeMap::new();
        outputs.insert("s1".to_string(), Value::object([("body".to_string(), Value::from("hello world"))]));
        let resolver = ValueResolver::default();
        assert!(evaluate("${s1.body} contains \"world\"", &resolver, &empty_scope(&env, &vars, &outputs)).unwrap());
    }

    #[test]
    fn is_null_and_exists() {
        let env = BTreeMap::new();
        let vars = BTreeMap::new();
        let outputs = BTreeMap::new();
        let resolver = ValueResolver::default();
        assert!(evaluate("${missing} isNull", &resolver, &empty_scope(&env, &vars, &outputs)).unwrap());
    }

    #[test]
    fn exists_is_false_for_an_unresolved_reference() {
        let env = BTreeMap::new();
        let vars = BTreeMap::new();
        let outputs = BTreeMap::new();
        let resolver = ValueResolver::default();
        assert!(!evaluate("${missing} exists", &resolver, &empty_scope(&env, &vars, &outputs)).unwrap());
    }

    #[test]
    fn exists_is_true_for_a_resolved_reference_even_when_its_value_is_null() {
        let env = BTreeMap::new();
        let mut vars = BTreeMap::new();
        vars.insert("present".to_string(), Value::Null);
        let outputs = BTreeMap::new();
        let resolver = ValueResolver::default();
        assert!(evaluate("${present} exists", &resolver, &empty_scope(&env, &vars, &outputs)).unwrap());
    }

    #[test]
    fn has_length_and_is_type() {
        let env = BTreeMap::new();
        let mut vars = BTreeMap::new();
        vars.insert("arr".to_string(), Value::Array(vec![Value::from(1i64), Value::from(2i64)]));
        let outputs = BTreeMap::new();
        let resolver = ValueResolver::default();
        assert!(evaluate("${arr} hasLength 2", &resolver, &empty_scope(&env, &vars, &outputs)).unwrap());
        assert!(evaluate("${arr} isType array", &resolver, &empty_scope(&env, &vars, &outputs)).unwrap());
    }
}
