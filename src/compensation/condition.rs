use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tracing::warn;

/// Predicate evaluated against a saga's business context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum CompensationCondition {
    /// Always compensate
    #[default]
    Always,
    Equals { field: String, value: String },
    NotEquals { field: String, value: String },
}

impl CompensationCondition {
    pub fn equals(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Equals {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn not_equals(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::NotEquals {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Parse a `field == 'value'` / `field != "value"` expression.
    ///
    /// Anything that does not parse becomes [`CompensationCondition::Always`]:
    /// an unreadable condition must never block a rollback.
    pub fn parse(expression: &str) -> Self {
        match Self::try_parse(expression) {
            Some(condition) => condition,
            None => {
                warn!(
                    expression = %expression,
                    "Unparseable compensation condition, defaulting to always compensate"
                );
                Self::Always
            }
        }
    }

    fn try_parse(expression: &str) -> Option<Self> {
        // `!=` is checked first so that `a != b` is not read as `a !` `= b`
        let (field, value, negated) = if let Some((field, value)) = expression.split_once("!=") {
            (field, value, true)
        } else {
            let (field, value) = expression.split_once("==")?;
            (field, value, false)
        };

        let field = field.trim();
        if field.is_empty()
            || !field
                .chars()
                .all(|c| c.is_alphanumeric() || c == '_' || c == '.')
        {
            return None;
        }

        let value = unquote(value.trim())?;
        if value.contains("==") || value.contains("!=") {
            return None;
        }

        Some(if negated {
            Self::not_equals(field, value)
        } else {
            Self::equals(field, value)
        })
    }

    /// Evaluate against the business context. Missing fields never equal anything.
    pub fn evaluate(&self, context: &HashMap<String, Value>) -> bool {
        match self {
            Self::Always => true,
            Self::Equals { field, value } => {
                lookup(context, field).is_some_and(|actual| value_matches(actual, value))
            }
            Self::NotEquals { field, value } => {
                !lookup(context, field).is_some_and(|actual| value_matches(actual, value))
            }
        }
    }
}

fn unquote(raw: &str) -> Option<&str> {
    if raw.is_empty() {
        return None;
    }
    for quote in ['\'', '"'] {
        if let Some(stripped) = raw.strip_prefix(quote) {
            return stripped.strip_suffix(quote);
        }
    }
    if raw.ends_with('\'') || raw.ends_with('"') || raw.contains(char::is_whitespace) {
        return None;
    }
    Some(raw)
}

/// Dotted paths walk nested objects: `payment.state`
fn lookup<'a>(context: &'a HashMap<String, Value>, field: &str) -> Option<&'a Value> {
    if let Some(value) = context.get(field) {
        return Some(value);
    }
    let mut parts = field.split('.');
    let mut current = context.get(parts.next()?)?;
    for part in parts {
        current = current.get(part)?;
    }
    Some(current)
}

fn value_matches(actual: &Value, expected: &str) -> bool {
    match actual {
        Value::String(s) => s == expected,
        Value::Null => expected == "null",
        other => other.to_string() == expected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn context(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_parse_quoted_equality() {
        assert_eq!(
            CompensationCondition::parse("status == 'failed'"),
            CompensationCondition::equals("status", "failed")
        );
        assert_eq!(
            CompensationCondition::parse("status==\"failed\""),
            CompensationCondition::equals("status", "failed")
        );
    }

    #[test]
    fn test_parse_inequality_and_bare_values() {
        assert_eq!(
            CompensationCondition::parse("attempts != 3"),
            CompensationCondition::not_equals("attempts", "3")
        );
    }

    #[test]
    fn test_unparseable_defaults_to_always() {
        for expr in [
            "",
            "status",
            "status > 3",
            "== 'failed'",
            "status == 'unterminated",
            "status == two words",
            "a == b == c",
        ] {
            assert_eq!(
                CompensationCondition::parse(expr),
                CompensationCondition::Always,
                "expression {expr:?}"
            );
        }
    }

    #[test]
    fn test_evaluate_against_context() {
        let condition = CompensationCondition::parse("status == 'failed'");
        assert!(!condition.evaluate(&context(&[("status", json!("success"))])));
        assert!(condition.evaluate(&context(&[("status", json!("failed"))])));
        assert!(!condition.evaluate(&HashMap::new()));
    }

    #[test]
    fn test_evaluate_non_string_values() {
        let ctx = context(&[("attempts", json!(3)), ("paid", json!(true))]);
        assert!(CompensationCondition::equals("attempts", "3").evaluate(&ctx));
        assert!(CompensationCondition::equals("paid", "true").evaluate(&ctx));
        assert!(CompensationCondition::not_equals("paid", "false").evaluate(&ctx));
    }

    #[test]
    fn test_evaluate_nested_path() {
        let ctx = context(&[("payment", json!({"state": "captured"}))]);
        assert!(CompensationCondition::equals("payment.state", "captured").evaluate(&ctx));
        assert!(!CompensationCondition::equals("payment.missing", "captured").evaluate(&ctx));
    }

    proptest! {
        #[test]
        fn equals_and_not_equals_are_complementary(
            field in "[a-z_]{1,12}",
            value in "[a-z0-9]{1,12}",
            actual in "[a-z0-9]{1,12}",
        ) {
            let ctx = context(&[(field.as_str(), json!(actual))]);
            let eq = CompensationCondition::equals(field.clone(), value.clone()).evaluate(&ctx);
            let ne = CompensationCondition::not_equals(field, value).evaluate(&ctx);
            prop_assert_ne!(eq, ne);
        }

        #[test]
        fn parse_never_panics(expr in ".{0,40}") {
            let _ = CompensationCondition::parse(&expr);
        }
    }
}
