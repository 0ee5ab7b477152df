//! `{{variable}}` prompt templates.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde_json::{Map, Value};

pub const CONTEXT_KEY: &str = "#context#";
pub const QUERY_KEY: &str = "#query#";
pub const HISTORIES_KEY: &str = "#histories#";

static VARIABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{([a-zA-Z_][a-zA-Z0-9_]{0,29}|#histories#|#query#|#context#)\}\}")
        .expect("template variable pattern is valid")
});

/// A parsed prompt template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    template: String,
    variable_keys: Vec<String>,
}

impl PromptTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        let template = template.into();
        let mut variable_keys: Vec<String> = Vec::new();
        for caps in VARIABLE.captures_iter(&template) {
            let key = &caps[1];
            if !variable_keys.iter().any(|k| k == key) {
                variable_keys.push(key.to_string());
            }
        }
        Self {
            template,
            variable_keys,
        }
    }

    /// Distinct placeholder keys in order of first appearance.
    pub fn extract(&self) -> &[String] {
        &self.variable_keys
    }

    pub fn as_str(&self) -> &str {
        &self.template
    }

    /// Substitute placeholders from `values`.
    ///
    /// Strings, numbers and booleans are substituted. Anything else counts
    /// as missing: the placeholder is kept, or removed when `remove_unfilled`.
    pub fn format(&self, values: &Map<String, Value>, remove_unfilled: bool) -> String {
        VARIABLE
            .replace_all(&self.template, |caps: &Captures<'_>| {
                match values.get(&caps[1]).and_then(render_value) {
                    Some(text) => text,
                    None if remove_unfilled => String::new(),
                    None => caps[0].to_string(),
                }
            })
            .into_owned()
    }
}

fn render_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn values(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn extracts_distinct_keys_in_order() {
        let t = PromptTemplate::new("{{b}} and {{a}} then {{b}} with {{#query#}}");
        assert_eq!(t.extract(), &["b", "a", "#query#"]);
    }

    #[test]
    fn ignores_invalid_names() {
        let t = PromptTemplate::new("{{1abc}} {{has space}} {{#other#}} {{ok_1}}");
        assert_eq!(t.extract(), &["ok_1"]);

        let too_long = format!("{{{{{}}}}}", "x".repeat(31));
        assert!(PromptTemplate::new(too_long).extract().is_empty());
    }

    #[test]
    fn formats_scalars_and_keeps_unknown() {
        let t = PromptTemplate::new("Hi {{name}}, you are {{age}} ({{vip}}). {{missing}}");
        let out = t.format(&values(json!({"name": "Ada", "age": 36, "vip": true})), false);
        assert_eq!(out, "Hi Ada, you are 36 (true). {{missing}}");
    }

    #[test]
    fn remove_unfilled_strips_placeholders() {
        let t = PromptTemplate::new("A{{x}}B{{y}}C");
        let out = t.format(&values(json!({"x": "-", "y": null})), true);
        assert_eq!(out, "A-BC");
    }

    #[test]
    fn special_keys_substitute() {
        let t = PromptTemplate::new("<h>{{#histories#}}</h> Q: {{#query#}}");
        let out = t.format(
            &values(json!({HISTORIES_KEY: "Human: hi", QUERY_KEY: "what?"})),
            false,
        );
        assert_eq!(out, "<h>Human: hi</h> Q: what?");
    }
}
