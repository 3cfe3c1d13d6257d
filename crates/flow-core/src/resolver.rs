//! Value Resolver — interpolates `${...}` references against a scope.
//!
//! Generalizes the old variable-expansion pass (plain string substitution
//! over a flat `HashMap<String, String>`) into typed resolution over three
//! scopes: `env`, `variables`, and `step_outputs`, plus a handful of
//! built-ins. A config that is a single `${...}` token resolves to its
//! underlying typed value; anywhere else `${...}` is string-interpolated.

use crate::value::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

pub struct Scope<'a> {
    pub env: &'a BTreeMap<String, String>,
    pub variables: &'a BTreeMap<String, Value>,
    pub step_outputs: &'a BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnknownReference {
    /// Unknown references resolve to an empty string / null.
    Lenient,
    /// Unknown references are a hard error.
    Strict,
}

pub struct ValueResolver {
    pub on_unknown: UnknownReference,
    pub max_depth: usize,
}

impl Default for ValueResolver {
    fn default() -> Self {
        ValueResolver {
            on_unknown: UnknownReference::Lenient,
            max_depth: 8,
        }
    }
}

#[derive(Debug)]
pub struct UnresolvedReferenceError(pub String);

impl ValueResolver {
    /// Resolve a raw string template. If the entire string is a single
    /// `${expr}` token, returns the expr's typed value; otherwise returns a
    /// `Value::String` with every `${expr}` substituted by its display form.
    pub fn resolve(&self, template: &str, scope: &Scope) -> Result<Value, UnresolvedReferenceError> {
        if let Some(expr) = whole_token(template) {
            return self.resolve_expr(expr, scope);
        }
        let mut out = String::new();
        let mut rest = template;
        while let Some(start) = rest.find("${") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let Some(end) = after.find('}') else {
                out.push_str(&rest[start..]);
                rest = "";
                break;
            };
            let expr = &after[..end];
            let resolved = self.resolve_expr(expr, scope)?;
            out.push_str(&resolved.as_display_string());
            rest = &after[end + 1..];
        }
        out.push_str(rest);
        Ok(Value::String(out))
    }

    /// Resolve nested expansion to a fixed point (an expanded value may
    /// itself contain `${...}`), bounded by `max_depth`.
    pub fn resolve_nested(&self, template: &str, scope: &Scope) -> Result<Value, UnresolvedReferenceError> {
        let mut current = self.resolve(template, scope)?;
        let mut depth = 0;
        while depth < self.max_depth {
            let Value::String(s) = &current else { break };
            if !contains_reference(s) {
                break;
            }
            let next = self.resolve(s, scope)?;
            if next == current {
                break;
            }
            current = next;
            depth += 1;
        }
        Ok(current)
    }

    fn resolve_expr(&self, expr: &str, scope: &Scope) -> Result<Value, UnresolvedReferenceError> {
        if let Some(builtin) = resolve_builtin(expr) {
            return Ok(builtin);
        }
        if let Some(env_var) = expr.strip_prefix("ENV{").and_then(|s| s.strip_suffix('}')) {
            return Ok(scope
                .env
                .get(env_var)
                .cloned()
                .map(Value::String)
                .unwrap_or_else(|| self.unknown(env_var)));
        }
        if let Some((step_id, path)) = expr.split_once('.') {
            if let Some(output) = scope.step_outputs.get(step_id) {
                return Ok(output.get_path(path).cloned().unwrap_or_else(|| self.unknown(expr)));
            }
        }
        if let Some(value) = scope.env.get(expr) {
            return Ok(Value::String(value.clone()));
        }
        if let Some(value) = scope.variables.get(expr) {
            return Ok(value.clone());
        }
        match self.on_unknown {
            UnknownReference::Lenient => Ok(self.unknown(expr)),
            UnknownReference::Strict => Err(UnresolvedReferenceError(expr.to_string())),
        }
    }

    fn unknown(&self, _expr: &str) -> Value {
        Value::Null
    }

    /// True iff `token` is a `${...}` reference that resolves against a real
    /// entry in `scope` (as opposed to falling back to `unknown`/null).
    /// Bare literals (no `${...}` wrapper) always exist.
    pub fn reference_exists(&self, token: &str, scope: &Scope) -> bool {
        let token = token.trim();
        let Some(expr) = whole_token(token) else { return true };
        if resolve_builtin(expr).is_some() {
            return true;
        }
        if let Some(env_var) = expr.strip_prefix("ENV{").and_then(|s| s.strip_suffix('}')) {
            return scope.env.contains_key(env_var);
        }
        if let Some((step_id, path)) = expr.split_once('.') {
            return scope.step_outputs.get(step_id).map(|o| o.get_path(path).is_some()).unwrap_or(false);
        }
        scope.env.contains_key(expr) || scope.variables.contains_key(expr)
    }

    pub fn validate_variable_name(name: &str) -> bool {
        let mut chars = name.chars();
        match chars.next() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
            _ => return false,
        }
        chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    }

    pub fn extract_references(input: &str) -> Vec<String> {
        let mut refs = Vec::new();
        let mut rest = input;
        while let Some(start) = rest.find("${") {
            let after = &rest[start + 2..];
            let Some(end) = after.find('}') else { break };
            refs.push(after[..end].to_string());
            rest = &after[end + 1..];
        }
        refs
    }
}

fn resolve_builtin(expr: &str) -> Option<Value> {
    match expr {
        "RANDOM_ID" => Some(Value::String(Uuid::new_v4().to_string())),
        "TIMESTAMP" => Some(Value::Number(
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs() as f64)
                .unwrap_or(0.0),
        )),
        "ISO_TIMESTAMP" => Some(Value::String(chrono::Utc::now().to_rfc3339())),
        _ => None,
    }
}

fn whole_token(s: &str) -> Option<&str> {
    let inner = s.strip_prefix("${")?.strip_suffix('}')?;
    if inner.contains("${") {
        return None;
    }
    Some(inner)
}

fn contains_reference(s: &str) -> bool {
    s.contains("${")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope<'a>(
        env: &'a BTreeMap<String, String>,
        variables: &'a BTreeMap<String, Value>,
        step_outputs: &'a BTreeMap<String, Value>,
    ) -> Scope<'a> {
        Scope { env, variables, step_outputs }
    }

    #[test]
    fn whole_token_returns_typed_value() {
        let env = BTreeMap::new();
        let mut outputs = BTreeMap::new();
        outputs.insert(
            "s1".to_string(),
            Value::object([("body".to_string(), Value::object([("id".to_string(), Value::from("u1"))]))]),
        );
        let vars = BTreeMap::new();
        let resolver = ValueResolver::default();
        let resolved = resolver
            .resolve("${s1.body.id}", &scope(&env, &vars, &outputs))
            .unwrap();
        assert_eq!(resolved, Value::from("u1"));
    }

    #[test]
    fn string_interpolation_substitutes_inline() {
        let env = BTreeMap::new();
        let mut vars = BTreeMap::new();
        vars.insert("name".to_string(), Value::from("Ann"));
        let outputs = BTreeMap::new();
        let resolver = ValueResolver::default();
        let resolved = resolver
            .resolve("hello ${name}!", &scope(&env, &vars, &outputs))
            .unwrap();
        assert_eq!(resolved, Value::String("hello Ann!".to_string()));
    }

    #[test]
    fn strict_mode_errors_on_unknown_reference() {
        let env = BTreeMap::new();
        let vars = BTreeMap::new();
        let outputs = BTreeMap::new();
        let resolver = ValueResolver { on_unknown: UnknownReference::Strict, ..Default::default() };
        assert!(resolver.resolve("${missing}", &scope(&env, &vars, &outputs)).is_err());
    }

    #[test]
    fn lenient_mode_resolves_unknown_to_null() {
        let env = BTreeMap::new();
        let vars = BTreeMap::new();
        let outputs = BTreeMap::new();
        let resolver = ValueResolver::default();
        let resolved = resolver.resolve("${missing}", &scope(&env, &vars, &outputs)).unwrap();
        assert_eq!(resolved, Value::Null);
    }

    #[test]
    fn validates_variable_names() {
        assert!(ValueResolver::validate_variable_name("my_var"));
        assert!(!ValueResolver::validate_variable_name("1var"));
        assert!(!ValueResolver::validate_variable_name(""));
    }
}
