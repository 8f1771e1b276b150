//! JEXL runtime expressions for filters, predicates and templated values.
//!
//! Strings written as `${ <expr> }` inside a definition are runtime
//! expressions; everything else is a literal. Predicates (`if`, `when`,
//! `until`, `while`) accept both the wrapped and the bare form.
//!
//! Documents are always passed as the evaluation context, never
//! interpolated into expression text.
//!
//! Numbers inside expressions are floating point. Integral results are
//! turned back into JSON integers so `x + 1` over `{"x": 1}` yields `2`.

use jexl_eval::Evaluator;
use serde_json::{json, Map, Number, Value};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ExpressionError {
    #[error("failed to evaluate '{expression}': {reason}")]
    EvalFailed { expression: String, reason: String },

    #[error("invalid context: {0}")]
    InvalidContext(String),
}

// ---------------------------------------------------------------------------
// Evaluator
// ---------------------------------------------------------------------------

thread_local! {
    static EVALUATOR: Evaluator<'static> = standard_evaluator();
}

fn str_arg(args: &[Value], index: usize, default: &'static str) -> String {
    args.get(index)
        .and_then(|v| v.as_str())
        .unwrap_or(default)
        .to_string()
}

/// Evaluator with the transforms expressions may pipe through.
fn standard_evaluator() -> Evaluator<'static> {
    Evaluator::new()
        .with_transform("lower", |args: &[Value]| {
            Ok(json!(str_arg(args, 0, "").to_lowercase()))
        })
        .with_transform("upper", |args: &[Value]| {
            Ok(json!(str_arg(args, 0, "").to_uppercase()))
        })
        .with_transform("trim", |args: &[Value]| {
            Ok(json!(str_arg(args, 0, "").trim()))
        })
        .with_transform("split", |args: &[Value]| {
            let subject = str_arg(args, 0, "");
            let delimiter = str_arg(args, 1, ",");
            let parts: Vec<&str> = subject.split(delimiter.as_str()).collect();
            Ok(json!(parts))
        })
        .with_transform("contains", |args: &[Value]| {
            let found = match args.first() {
                Some(Value::Array(items)) => {
                    let needle = args.get(1).cloned().unwrap_or(Value::Null);
                    items.iter().any(|item| numeric_eq(item, &needle))
                }
                _ => str_arg(args, 0, "").contains(str_arg(args, 1, "").as_str()),
            };
            Ok(json!(found))
        })
        .with_transform("startsWith", |args: &[Value]| {
            Ok(json!(str_arg(args, 0, "").starts_with(str_arg(args, 1, "").as_str())))
        })
        .with_transform("endsWith", |args: &[Value]| {
            Ok(json!(str_arg(args, 0, "").ends_with(str_arg(args, 1, "").as_str())))
        })
        .with_transform("not", |args: &[Value]| {
            let value = args.first().cloned().unwrap_or(Value::Null);
            Ok(json!(!ExpressionEvaluator::value_to_bool(&value)))
        })
        .with_transform("length", |args: &[Value]| {
            let len = match args.first() {
                Some(Value::String(s)) => s.chars().count(),
                Some(Value::Array(a)) => a.len(),
                Some(Value::Object(o)) => o.len(),
                _ => 0,
            };
            Ok(json!(len as f64))
        })
        .with_transform("keys", |args: &[Value]| {
            let keys: Vec<String> = match args.first() {
                Some(Value::Object(o)) => o.keys().cloned().collect(),
                _ => Vec::new(),
            };
            Ok(json!(keys))
        })
}

fn numeric_eq(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

/// Runtime expression evaluator shared by every executor.
///
/// Cheap to copy; the underlying JEXL evaluator is kept per thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpressionEvaluator;

impl ExpressionEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// Whether a string is written as a runtime expression (`${ ... }`).
    pub fn is_expression(text: &str) -> bool {
        let trimmed = text.trim();
        trimmed.starts_with("${") && trimmed.ends_with('}')
    }

    /// The expression body, with the `${ }` wrapper removed if present.
    pub fn expression_body(text: &str) -> &str {
        let trimmed = text.trim();
        if Self::is_expression(trimmed) {
            trimmed[2..trimmed.len() - 1].trim()
        } else {
            trimmed
        }
    }

    /// Evaluate an expression (wrapped or bare) and return the raw result.
    pub fn evaluate_value(&self, expression: &str, context: &Value) -> Result<Value, ExpressionError> {
        if !context.is_object() {
            return Err(ExpressionError::InvalidContext(
                "context must be a JSON object".to_string(),
            ));
        }
        let body = Self::expression_body(expression);
        let context = to_float_numbers(context);
        let result = EVALUATOR.with(|evaluator| {
            evaluator
                .eval_in_context(body, &context)
                .map_err(|e| ExpressionError::EvalFailed {
                    expression: body.to_string(),
                    reason: e.to_string(),
                })
        })?;
        Ok(normalize_numbers(result))
    }

    /// Evaluate a predicate, coercing the result with JavaScript-like truthiness.
    pub fn evaluate_bool(&self, expression: &str, context: &Value) -> Result<bool, ExpressionError> {
        let value = self.evaluate_value(expression, context)?;
        Ok(Self::value_to_bool(&value))
    }

    /// Resolve a template document: every `${ }` string is replaced by its
    /// value, recursing through objects and arrays. Other values pass through.
    pub fn resolve(&self, template: &Value, context: &Value) -> Result<Value, ExpressionError> {
        match template {
            Value::String(text) if Self::is_expression(text) => self.evaluate_value(text, context),
            Value::Array(items) => items
                .iter()
                .map(|item| self.resolve(item, context))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Value::Object(fields) => {
                let mut resolved = Map::with_capacity(fields.len());
                for (key, value) in fields {
                    resolved.insert(key.clone(), self.resolve(value, context)?);
                }
                Ok(Value::Object(resolved))
            }
            other => Ok(other.clone()),
        }
    }

    /// Resolve a string that may be an expression into a string.
    pub fn resolve_string(&self, text: &str, context: &Value) -> Result<String, ExpressionError> {
        if !Self::is_expression(text) {
            return Ok(text.to_string());
        }
        Ok(match self.evaluate_value(text, context)? {
            Value::String(s) => s,
            other => other.to_string(),
        })
    }

    /// Coerce a JSON value to boolean using JavaScript-like truthiness.
    pub fn value_to_bool(value: &Value) -> bool {
        match value {
            Value::Bool(b) => *b,
            Value::Null => false,
            Value::Number(n) => n.as_f64().unwrap_or(0.0) != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::Array(_) | Value::Object(_) => true,
        }
    }
}

/// Largest magnitude an `f64` holds with every integer below it exact.
const MAX_EXACT_INTEGER: f64 = 9_007_199_254_740_992.0;

/// Integers beyond `MAX_EXACT_INTEGER` keep their original representation.
fn to_float_numbers(value: &Value) -> Value {
    match value {
        Value::Number(n) if !n.is_f64() => n
            .as_f64()
            .filter(|f| f.abs() <= MAX_EXACT_INTEGER && exactly_integral(n, *f))
            .and_then(Number::from_f64)
            .map(Value::Number)
            .unwrap_or_else(|| value.clone()),
        Value::Array(items) => Value::Array(items.iter().map(to_float_numbers).collect()),
        Value::Object(fields) => Value::Object(
            fields
                .iter()
                .map(|(k, v)| (k.clone(), to_float_numbers(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn exactly_integral(n: &Number, f: f64) -> bool {
    match (n.as_i64(), n.as_u64()) {
        (Some(i), _) => f as i64 == i,
        (None, Some(u)) => f as u64 == u,
        _ => false,
    }
}

fn normalize_numbers(value: Value) -> Value {
    match value {
        Value::Number(n) => match n.as_f64() {
            Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() <= MAX_EXACT_INTEGER => {
                json!(f as i64)
            }
            _ => Value::Number(n),
        },
        Value::Array(items) => Value::Array(items.into_iter().map(normalize_numbers).collect()),
        Value::Object(fields) => Value::Object(
            fields
                .into_iter()
                .map(|(k, v)| (k, normalize_numbers(v)))
                .collect(),
        ),
        other => other,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn eval() -> ExpressionEvaluator {
        ExpressionEvaluator::new()
    }

    // -------------------------------------------------------------------
    // Wrapping
    // -------------------------------------------------------------------

    #[test]
    fn recognizes_wrapped_expressions() {
        assert!(ExpressionEvaluator::is_expression("${ x + 1 }"));
        assert!(ExpressionEvaluator::is_expression("  ${x}  "));
        assert!(!ExpressionEvaluator::is_expression("x + 1"));
        assert!(!ExpressionEvaluator::is_expression("$x"));
        assert_eq!(ExpressionEvaluator::expression_body("${ a.b }"), "a.b");
        assert_eq!(ExpressionEvaluator::expression_body("a.b"), "a.b");
    }

    #[test]
    fn predicates_accept_bare_and_wrapped_forms() {
        let ctx = json!({ "amount": 150 });
        assert!(eval().evaluate_bool("amount > 100", &ctx).unwrap());
        assert!(eval().evaluate_bool("${ amount > 100 }", &ctx).unwrap());
    }

    // -------------------------------------------------------------------
    // Numbers
    // -------------------------------------------------------------------

    #[test]
    fn integral_arithmetic_yields_integers() {
        let ctx = json!({ "x": 1 });
        assert_eq!(eval().evaluate_value("x + 1", &ctx).unwrap(), json!(2));
    }

    #[test]
    fn fractional_results_stay_floats() {
        let ctx = json!({ "x": 3 });
        assert_eq!(eval().evaluate_value("x / 2", &ctx).unwrap(), json!(1.5));
    }

    #[test]
    fn large_integers_pass_through_unchanged() {
        let ctx = json!({ "order": { "id": 9_007_199_254_740_993_u64, "ref": 10_000_000_000_000_000_u64 } });
        let out = eval().evaluate_value("order", &ctx).unwrap();
        assert_eq!(out, ctx["order"]);
        assert_eq!(out["id"].as_u64(), Some(9_007_199_254_740_993));
        assert!(out["ref"].is_u64());

        let resolved = eval().resolve(&json!({ "copy": "${ order.id }" }), &ctx).unwrap();
        assert_eq!(resolved, json!({ "copy": 9_007_199_254_740_993_u64 }));
    }

    #[test]
    fn exact_integer_bound_survives_arithmetic() {
        let ctx = json!({ "x": 9_007_199_254_740_991_i64 });
        assert_eq!(
            eval().evaluate_value("x + 1", &ctx).unwrap(),
            json!(9_007_199_254_740_992_i64)
        );
    }

    #[test]
    fn integer_context_compares_with_literals() {
        let ctx = json!({ "count": 2 });
        assert!(eval().evaluate_bool("count == 2", &ctx).unwrap());
    }

    // -------------------------------------------------------------------
    // Resolve
    // -------------------------------------------------------------------

    #[test]
    fn resolve_recurses_through_documents() {
        let ctx = json!({ "order": { "id": 7, "items": ["a", "b"] } });
        let template = json!({
            "id": "${ order.id }",
            "count": "${ order.items|length }",
            "static": "literal",
            "nested": [{ "first": "${ order.items[0] }" }, 3]
        });
        let resolved = eval().resolve(&template, &ctx).unwrap();
        assert_eq!(
            resolved,
            json!({
                "id": 7,
                "count": 2,
                "static": "literal",
                "nested": [{ "first": "a" }, 3]
            })
        );
    }

    #[test]
    fn resolve_string_stringifies_non_strings() {
        let ctx = json!({ "id": 42, "host": "api.local" });
        assert_eq!(
            eval()
                .resolve_string("${ 'http://' + host + '/pets' }", &ctx)
                .unwrap(),
            "http://api.local/pets"
        );
        assert_eq!(eval().resolve_string("${ id }", &ctx).unwrap(), "42");
        assert_eq!(eval().resolve_string("plain", &ctx).unwrap(), "plain");
    }

    // -------------------------------------------------------------------
    // Transforms
    // -------------------------------------------------------------------

    #[test]
    fn string_transforms() {
        let ctx = json!({ "name": "  Order Created  " });
        assert_eq!(
            eval().evaluate_value("name|trim|lower", &ctx).unwrap(),
            json!("order created")
        );
        assert!(eval()
            .evaluate_bool("name|trim|startsWith('Order')", &ctx)
            .unwrap());
        assert_eq!(
            eval().evaluate_value("'a,b'|split(',')", &ctx).unwrap(),
            json!(["a", "b"])
        );
    }

    #[test]
    fn contains_works_on_arrays_and_strings() {
        let ctx = json!({ "codes": [500, 503], "msg": "service unavailable" });
        assert!(eval().evaluate_bool("codes|contains(503)", &ctx).unwrap());
        assert!(!eval().evaluate_bool("codes|contains(404)", &ctx).unwrap());
        assert!(eval().evaluate_bool("msg|contains('unavail')", &ctx).unwrap());
    }

    #[test]
    fn length_of_collections() {
        let ctx = json!({ "events": [{}, {}, {}] });
        assert!(eval().evaluate_bool("events|length >= 3", &ctx).unwrap());
        assert_eq!(eval().evaluate_value("events|length", &ctx).unwrap(), json!(3));
    }

    // -------------------------------------------------------------------
    // Truthiness and failures
    // -------------------------------------------------------------------

    #[test]
    fn truthiness() {
        assert!(!ExpressionEvaluator::value_to_bool(&json!(null)));
        assert!(!ExpressionEvaluator::value_to_bool(&json!("")));
        assert!(!ExpressionEvaluator::value_to_bool(&json!(0)));
        assert!(ExpressionEvaluator::value_to_bool(&json!([])));
        assert!(ExpressionEvaluator::value_to_bool(&json!("x")));
    }

    #[test]
    fn missing_property_is_null() {
        let ctx = json!({ "order": {} });
        assert_eq!(eval().evaluate_value("order.missing", &ctx).unwrap(), Value::Null);
    }

    #[test]
    fn rejects_non_object_context() {
        assert!(matches!(
            eval().evaluate_value("1", &json!([1, 2])),
            Err(ExpressionError::InvalidContext(_))
        ));
    }

    #[test]
    fn syntax_errors_are_reported() {
        let err = eval().evaluate_value("x +* 1", &json!({ "x": 1 })).unwrap_err();
        assert!(matches!(err, ExpressionError::EvalFailed { .. }));
        assert!(err.to_string().contains("x +* 1"));
    }
}
