//! Generator expressions.
//!
//! Any template string containing `{{` is a generator. It is rendered with
//! Handlebars against `{ req, root }`, where `req` is the
//! [`RequestContext`](crate::context::RequestContext) and `root` is the
//! partially resolved template. Only the helpers registered here are
//! callable from a template.

use crate::error::MockError;
use crate::placeholder;
use handlebars::Handlebars;
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

/// Matches a source made of exactly one `{{ ... }}` expression; captures
/// its head and the remaining arguments.
static SINGLE_EXPRESSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*\{\{\s*([^\s{}]+)([^{}]*)\}\}\s*$").expect("expression pattern is valid")
});

/// Matches `{{mock "@placeholder"}}` on its own.
static MOCK_CALL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\s*\{\{\s*mock\s+"([^"]*)"\s*\}\}\s*$"#).expect("mock call pattern is valid")
});

/// Helpers whose output is JSON text rather than free text.
const TYPED_HELPERS: &[&str] = &["json", "add", "sub", "mul", "len", "random"];

/// Whether a template string is a generator expression.
pub fn is_generator(source: &str) -> bool {
    source.contains("{{")
}

/// Registry of generator helpers.
pub struct GeneratorRegistry {
    handlebars: Handlebars<'static>,
}

impl GeneratorRegistry {
    /// Create a registry with all built-in helpers.
    pub fn new() -> Self {
        let mut handlebars = Handlebars::new();

        handlebars.register_helper("json", Box::new(json_helper));
        handlebars.register_helper("uuid", Box::new(uuid_helper));
        handlebars.register_helper("now", Box::new(now_helper));
        handlebars.register_helper("random", Box::new(random_helper));
        handlebars.register_helper("default", Box::new(default_helper));
        handlebars.register_helper("upper", Box::new(upper_helper));
        handlebars.register_helper("lower", Box::new(lower_helper));
        handlebars.register_helper("mock", Box::new(mock_helper));
        handlebars.register_helper("header", Box::new(header_helper));
        handlebars.register_helper("cookie", Box::new(cookie_helper));
        handlebars.register_helper("add", Box::new(add_helper));
        handlebars.register_helper("sub", Box::new(sub_helper));
        handlebars.register_helper("mul", Box::new(mul_helper));
        handlebars.register_helper("len", Box::new(len_helper));

        // Output is JSON data, not HTML
        handlebars.register_escape_fn(handlebars::no_escape);

        Self { handlebars }
    }

    /// Invoke a generator.
    ///
    /// A lone path into `req` or `root` yields the value found there, type
    /// intact. A lone `mock` call yields the placeholder value. A lone call to
    /// a JSON-emitting helper (`json`, `add`, `sub`, `mul`, `len`, `random`)
    /// yields the parsed JSON. Anything else yields the rendered string.
    pub fn invoke(&self, source: &str, data: &Value) -> Result<Value, MockError> {
        let expression = SINGLE_EXPRESSION_RE.captures(source);
        let head = expression
            .as_ref()
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str());
        let bare = expression
            .as_ref()
            .and_then(|caps| caps.get(2))
            .is_some_and(|rest| rest.as_str().trim().is_empty());

        if let Some(value) = head.filter(|_| bare).and_then(|path| lookup(data, path)) {
            return Ok(value.clone());
        }
        if let Some(caps) = MOCK_CALL_RE.captures(source) {
            return Ok(placeholder::resolve(&caps[1]));
        }

        let rendered = self
            .handlebars
            .render_template(source, data)
            .map_err(|e| MockError::Generator(e.to_string()))?;

        if head.is_some_and(|helper| TYPED_HELPERS.contains(&helper)) {
            if let Ok(value) = serde_json::from_str::<Value>(rendered.trim()) {
                return Ok(value);
            }
        }
        Ok(Value::String(rendered))
    }
}

/// Follow a Handlebars-style path (`req.params.id`, `root.[0].a`) through
/// the generator data. Only paths rooted at `req` or `root` are followed.
fn lookup<'v>(data: &'v Value, path: &str) -> Option<&'v Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    if first != "req" && first != "root" {
        return None;
    }
    segments.try_fold(data.get(first)?, |current, segment| {
        let segment = segment
            .strip_prefix('[')
            .and_then(|s| s.strip_suffix(']'))
            .unwrap_or(segment);
        match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?),
            _ => None,
        }
    })
}

impl Default for GeneratorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn number_params(h: &handlebars::Helper) -> Vec<Value> {
    h.params().iter().map(|p| p.value().clone()).collect()
}

/// Fold numeric params, keeping integers when every operand is one.
fn arithmetic(
    h: &handlebars::Helper,
    out: &mut dyn handlebars::Output,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> handlebars::HelperResult {
    let params = number_params(h);
    let ints: Option<Vec<i64>> = params.iter().map(as_i64).collect();
    let result = match ints {
        Some(ints) if !ints.is_empty() => ints[1..]
            .iter()
            .try_fold(ints[0], |acc, n| int_op(acc, *n))
            .map(|n| n.to_string()),
        _ => None,
    };
    let text = match result {
        Some(text) => text,
        None => {
            let floats: Vec<f64> = params.iter().filter_map(as_f64).collect();
            match floats.split_first() {
                Some((first, rest)) => rest.iter().fold(*first, |acc, n| float_op(acc, *n)).to_string(),
                None => String::new(),
            }
        }
    };
    out.write(&text)?;
    Ok(())
}

fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn request_field<'a>(ctx: &'a handlebars::Context, field: &str, name: &str) -> Option<&'a Value> {
    ctx.data().get("req")?.get(field)?.get(name)
}

fn write_value(out: &mut dyn handlebars::Output, value: Option<&Value>) -> handlebars::HelperResult {
    match value {
        Some(Value::String(s)) => out.write(s)?,
        Some(Value::Null) | None => {}
        Some(other) => out.write(&other.to_string())?,
    }
    Ok(())
}

// Helpers

fn json_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    // Serialize the param itself, so objects from `root` or `req` survive
    let value = h.param(0).map(|v| v.value().clone()).unwrap_or(Value::Null);
    out.write(&serde_json::to_string(&value).unwrap_or_default())?;
    Ok(())
}

fn uuid_helper(
    _: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    out.write(&placeholder::random_uuid())?;
    Ok(())
}

fn now_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    use chrono::Utc;

    let format = h
        .param(0)
        .and_then(|v| v.value().as_str())
        .unwrap_or("%Y-%m-%dT%H:%M:%S%.3fZ");

    let now = Utc::now();
    out.write(&now.format(format).to_string())?;
    Ok(())
}

fn random_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    use rand::Rng;

    let min = h.param(0).and_then(|v| as_i64(v.value())).unwrap_or(0);
    let max = h.param(1).and_then(|v| as_i64(v.value())).unwrap_or(100);

    let mut rng = rand::thread_rng();
    let value = rng.gen_range(min.min(max)..=min.max(max));
    out.write(&value.to_string())?;
    Ok(())
}

fn default_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    let value = h.param(0).map(|v| v.value());
    let fallback = h.param(1).map(|v| v.value());

    match value {
        Some(Value::String(s)) if s.is_empty() => write_value(out, fallback),
        Some(Value::Null) | None => write_value(out, fallback),
        Some(v) => write_value(out, Some(v)),
    }
}

fn upper_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    let value = h.param(0).and_then(|v| v.value().as_str()).unwrap_or("");
    out.write(&value.to_uppercase())?;
    Ok(())
}

fn lower_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    let value = h.param(0).and_then(|v| v.value().as_str()).unwrap_or("");
    out.write(&value.to_lowercase())?;
    Ok(())
}

fn mock_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    let source = h.param(0).and_then(|v| v.value().as_str()).unwrap_or("");
    let value = placeholder::resolve(source);
    write_value(out, Some(&value))
}

fn header_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    ctx: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    let name = h
        .param(0)
        .and_then(|v| v.value().as_str())
        .unwrap_or("")
        .to_lowercase();
    write_value(out, request_field(ctx, "header", &name))
}

fn cookie_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    ctx: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    let name = h.param(0).and_then(|v| v.value().as_str()).unwrap_or("");
    write_value(out, request_field(ctx, "cookies", name))
}

fn add_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    arithmetic(h, out, i64::checked_add, |a, b| a + b)
}

fn sub_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    arithmetic(h, out, i64::checked_sub, |a, b| a - b)
}

fn mul_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    arithmetic(h, out, i64::checked_mul, |a, b| a * b)
}

fn len_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    let len = match h.param(0).map(|v| v.value()) {
        Some(Value::Array(items)) => items.len(),
        Some(Value::Object(map)) => map.len(),
        Some(Value::String(s)) => s.chars().count(),
        _ => 0,
    };
    out.write(&len.to_string())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn data() -> Value {
        json!({
            "req": {
                "params": {"id": "123"},
                "query": {"page": "1"},
                "header": {"user-agent": "test-client"},
                "cookies": {"session": "s1"},
                "body": {"name": "John"}
            },
            "root": {"a": 2, "name": "John", "tags": ["x", "y"]}
        })
    }

    #[test]
    fn test_is_generator() {
        assert!(is_generator("{{req.params.id}}"));
        assert!(is_generator("User {{req.params.id}}"));
        assert!(!is_generator("plain"));
        assert!(!is_generator("@name"));
    }

    #[test]
    fn test_interpolated_string() {
        let registry = GeneratorRegistry::new();
        let out = registry.invoke("User ID: {{req.params.id}}", &data()).unwrap();
        assert_eq!(out, json!("User ID: 123"));
    }

    #[test]
    fn test_single_expression_is_typed() {
        let registry = GeneratorRegistry::new();
        assert_eq!(registry.invoke("{{add root.a 1}}", &data()).unwrap(), json!(3));
        assert_eq!(registry.invoke("{{json root.tags}}", &data()).unwrap(), json!(["x", "y"]));
        assert_eq!(registry.invoke("{{root.name}}", &data()).unwrap(), json!("John"));
        assert_eq!(registry.invoke("{{random 4 4}}", &data()).unwrap(), json!(4));
    }

    #[test]
    fn test_path_keeps_looked_up_type() {
        let registry = GeneratorRegistry::new();
        let data = json!({
            "req": {"params": {"id": "42", "flag": "true", "nothing": "null", "exp": "1e3"}},
            "root": {"count": 7, "tags": ["x"], "nested": [{"a": "007"}]}
        });
        assert_eq!(registry.invoke("{{req.params.id}}", &data).unwrap(), json!("42"));
        assert_eq!(registry.invoke(" {{ req.params.flag }} ", &data).unwrap(), json!("true"));
        assert_eq!(registry.invoke("{{req.params.nothing}}", &data).unwrap(), json!("null"));
        assert_eq!(registry.invoke("{{req.params.exp}}", &data).unwrap(), json!("1e3"));
        assert_eq!(registry.invoke("{{root.count}}", &data).unwrap(), json!(7));
        assert_eq!(registry.invoke("{{root.tags}}", &data).unwrap(), json!(["x"]));
        assert_eq!(registry.invoke("{{root.nested.[0].a}}", &data).unwrap(), json!("007"));
        // Missing paths render as empty text.
        assert_eq!(registry.invoke("{{req.params.missing}}", &data).unwrap(), json!(""));
    }

    #[test]
    fn test_free_text_helpers_stay_strings() {
        let registry = GeneratorRegistry::new();
        let data = json!({"req": {"header": {"x-n": "12"}, "query": {}}, "root": {}});
        assert_eq!(registry.invoke("{{header \"x-n\"}}", &data).unwrap(), json!("12"));
        assert_eq!(
            registry.invoke("{{default req.query.page \"1\"}}", &data).unwrap(),
            json!("1")
        );
    }

    #[test]
    fn test_header_and_cookie() {
        let registry = GeneratorRegistry::new();
        let out = registry
            .invoke("{{header \"User-Agent\"}}/{{cookie \"session\"}}", &data())
            .unwrap();
        assert_eq!(out, json!("test-client/s1"));
    }

    #[test]
    fn test_default_helper() {
        let registry = GeneratorRegistry::new();
        let out = registry
            .invoke("Value: {{default req.query.missing \"default_value\"}}", &data())
            .unwrap();
        assert_eq!(out, json!("Value: default_value"));
    }

    #[test]
    fn test_upper_lower_helpers() {
        let registry = GeneratorRegistry::new();
        let out = registry
            .invoke("Upper: {{upper root.name}}, Lower: {{lower root.name}}", &data())
            .unwrap();
        assert_eq!(out, json!("Upper: JOHN, Lower: john"));
    }

    #[test]
    fn test_arithmetic_helpers() {
        let registry = GeneratorRegistry::new();
        assert_eq!(registry.invoke("{{sub 10 4}}", &data()).unwrap(), json!(6));
        assert_eq!(registry.invoke("{{mul 1.5 3}}", &data()).unwrap(), json!(4.5));
        assert_eq!(registry.invoke("{{mul root.a 3}}", &data()).unwrap(), json!(6));
        assert_eq!(registry.invoke("{{add req.params.id 1}}", &data()).unwrap(), json!(124));
    }

    #[test]
    fn test_uuid_and_mock_helpers() {
        let registry = GeneratorRegistry::new();
        let uuid = registry.invoke("ID: {{uuid}}", &data()).unwrap();
        assert_eq!(uuid.as_str().unwrap().len(), 40);

        let n = registry.invoke("{{mock \"@integer(1, 3)\"}}", &data()).unwrap();
        assert!((1..=3).contains(&n.as_i64().unwrap()));

        let id = registry.invoke("{{mock \"@id\"}}", &data()).unwrap();
        assert_eq!(id.as_str().unwrap().len(), 18);
    }

    #[test]
    fn test_random_helper_bounds() {
        let registry = GeneratorRegistry::new();
        for _ in 0..10 {
            let n = registry.invoke("{{random 5 7}}", &data()).unwrap();
            assert!((5..=7).contains(&n.as_i64().unwrap()));
        }
    }

    #[test]
    fn test_len_helper() {
        let registry = GeneratorRegistry::new();
        assert_eq!(registry.invoke("{{len root.tags}}", &data()).unwrap(), json!(2));
        assert_eq!(registry.invoke("{{len root.name}}", &data()).unwrap(), json!(4));
        assert_eq!(registry.invoke("{{len root.missing}}", &data()).unwrap(), json!(0));
    }

    #[test]
    fn test_render_error() {
        let registry = GeneratorRegistry::new();
        let err = registry.invoke("{{#if}}", &data()).unwrap_err();
        assert!(matches!(err, MockError::Generator(_)));
    }
}
