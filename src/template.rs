//! Template resolution engine.
//!
//! A template is a JSON-like tree whose mapping keys may carry a
//! randomization rule (`name|rule`) and whose strings may be generator
//! expressions. Resolution walks the tree and produces plain JSON:
//!
//! - mapping keys are resolved plain ones first, generators last, each group
//!   in base-name order, so a generator can read resolved siblings via `root`;
//! - for containers under a rule, the [`RuleLibrary`] only chooses which keys
//!   or indices survive, and the engine binds the original sub-templates back;
//! - scalars under a key are handed to the library whole;
//! - generator output is used as is and never resolved again.

use crate::context::RequestContext;
use crate::error::MockError;
use crate::generator::{self, GeneratorRegistry};
use crate::rules::{MockRules, Rule, RuleLibrary, Selection, Shape};
use serde_json::{Map, Number, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// One node of a parsed template.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateNode {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Sequence(Vec<TemplateNode>),
    /// Entries in declaration order, keys still decorated
    Mapping(Vec<(String, TemplateNode)>),
    /// Generator expression source
    Generator(String),
}

impl TemplateNode {
    /// Parse template text.
    ///
    /// JSON is tried first, then YAML, whose flow style accepts unquoted keys.
    pub fn parse(source: &str) -> Result<Self, MockError> {
        let value = match serde_json::from_str::<Value>(source) {
            Ok(value) => value,
            Err(json_err) => serde_yaml::from_str::<Value>(source).map_err(|yaml_err| {
                MockError::TemplateParse(format!("not JSON ({json_err}) nor YAML ({yaml_err})"))
            })?,
        };
        Ok(Self::from(value))
    }

    /// Whether this node is a generator.
    pub fn is_generator(&self) -> bool {
        matches!(self, TemplateNode::Generator(_))
    }

    /// JSON image of the unresolved node; generators show their source.
    pub fn to_value(&self) -> Value {
        match self {
            TemplateNode::Null => Value::Null,
            TemplateNode::Bool(b) => Value::Bool(*b),
            TemplateNode::Number(n) => Value::Number(n.clone()),
            TemplateNode::String(s) | TemplateNode::Generator(s) => Value::String(s.clone()),
            TemplateNode::Sequence(items) => Value::Array(items.iter().map(Self::to_value).collect()),
            TemplateNode::Mapping(entries) => Value::Object(
                entries
                    .iter()
                    .map(|(key, node)| (key.clone(), node.to_value()))
                    .collect(),
            ),
        }
    }
}

impl From<Value> for TemplateNode {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => TemplateNode::Null,
            Value::Bool(b) => TemplateNode::Bool(b),
            Value::Number(n) => TemplateNode::Number(n),
            Value::String(s) if generator::is_generator(&s) => TemplateNode::Generator(s),
            Value::String(s) => TemplateNode::String(s),
            Value::Array(items) => TemplateNode::Sequence(items.into_iter().map(Self::from).collect()),
            Value::Object(map) => TemplateNode::Mapping(
                map.into_iter()
                    .map(|(key, value)| (key, Self::from(value)))
                    .collect(),
            ),
        }
    }
}

/// A mapping key split into its output name and optional rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoratedKey<'a> {
    pub name: &'a str,
    pub rule: Option<&'a str>,
}

impl<'a> DecoratedKey<'a> {
    /// Split `name|rule`. An empty rule counts as no rule.
    pub fn parse(key: &'a str) -> Self {
        let mut parts = key.split('|');
        let name = parts.next().unwrap_or_default();
        let rule = parts.next().map(str::trim).filter(|r| !r.is_empty());
        Self { name, rule }
    }
}

/// Resolves templates into concrete JSON.
pub struct TemplateEngine {
    rules: Arc<dyn RuleLibrary>,
    generators: GeneratorRegistry,
}

impl TemplateEngine {
    /// Engine with Mock.js-style rules and the built-in generator helpers.
    pub fn new() -> Self {
        Self::with_rules(Arc::new(MockRules))
    }

    /// Engine delegating rule decisions to `rules`.
    pub fn with_rules(rules: Arc<dyn RuleLibrary>) -> Self {
        Self {
            rules,
            generators: GeneratorRegistry::new(),
        }
    }

    /// Resolve `template` for one request.
    pub fn evaluate(
        &self,
        template: &TemplateNode,
        context: &RequestContext,
    ) -> Result<Value, MockError> {
        let request =
            serde_json::to_value(context).map_err(|e| MockError::Generator(e.to_string()))?;
        let mut evaluation = Evaluation {
            engine: self,
            request,
            root: template.to_value(),
        };
        evaluation.evaluate(template, Some(&[]))
    }
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Position of a node inside the working root.
#[derive(Debug, Clone)]
enum Step {
    Key(String),
    Index(usize),
}

/// State of one resolution pass.
///
/// `root` mirrors the template and is updated as keys resolve, so generators
/// observe siblings resolved before them. Nodes reached through a rule are
/// rebuilt copies and are not mirrored (`at == None`).
struct Evaluation<'e> {
    engine: &'e TemplateEngine,
    request: Value,
    root: Value,
}

impl Evaluation<'_> {
    fn evaluate(&mut self, node: &TemplateNode, at: Option<&[Step]>) -> Result<Value, MockError> {
        match node {
            TemplateNode::Mapping(entries) => {
                let entries: Vec<(&str, &TemplateNode)> =
                    entries.iter().map(|(key, node)| (key.as_str(), node)).collect();
                self.evaluate_mapping(entries, at)
            }
            TemplateNode::Sequence(items) => {
                let mut resolved = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    let child = at.map(|path| extend(path, Step::Index(i)));
                    let value = self.evaluate(item, child.as_deref())?;
                    if let Some(slot) = child.as_deref().and_then(|path| locate(&mut self.root, path)) {
                        *slot = value.clone();
                    }
                    resolved.push(value);
                }
                Ok(Value::Array(resolved))
            }
            TemplateNode::Generator(source) => self.invoke(source),
            scalar => Ok(scalar.to_value()),
        }
    }

    fn evaluate_mapping(
        &mut self,
        mut entries: Vec<(&str, &TemplateNode)>,
        at: Option<&[Step]>,
    ) -> Result<Value, MockError> {
        let mut resolved: Map<String, Value> = entries
            .iter()
            .map(|(key, node)| (key.to_string(), node.to_value()))
            .collect();

        entries.sort_by(|(a, a_node), (b, b_node)| {
            a_node
                .is_generator()
                .cmp(&b_node.is_generator())
                .then_with(|| DecoratedKey::parse(a).name.cmp(DecoratedKey::parse(b).name))
                .then_with(|| a.cmp(b))
        });

        for (key, node) in entries {
            let child = at.map(|path| extend(path, Step::Key(key.to_string())));
            let (name, value) = self.resolve_key(key, node, child.as_deref())?;
            if let Some(Value::Object(target)) = at.and_then(|path| locate(&mut self.root, path)) {
                rebind(target, key, &name, value.clone());
            }
            rebind(&mut resolved, key, &name, value);
        }
        Ok(Value::Object(resolved))
    }

    fn resolve_key(
        &mut self,
        key: &str,
        node: &TemplateNode,
        at: Option<&[Step]>,
    ) -> Result<(String, Value), MockError> {
        let decorated = DecoratedKey::parse(key);
        let value = match node {
            // Rules on generator keys are ignored.
            TemplateNode::Generator(source) => self.invoke(source)?,
            TemplateNode::Mapping(entries) => match decorated.rule {
                Some(rule) => self.select_mapping(&Rule::parse_repeat(rule)?, entries)?,
                None => self.evaluate(node, at)?,
            },
            TemplateNode::Sequence(items) => self.select_sequence(&decorated, items)?,
            scalar => {
                let parse: fn(&str) -> Result<Rule, MockError> = match scalar {
                    TemplateNode::String(_) => Rule::parse_repeat,
                    _ => Rule::parse,
                };
                let rule = decorated.rule.map(parse).transpose()?;
                self.engine.rules.generate(rule.as_ref(), &scalar.to_value())
            }
        };
        Ok((decorated.name.to_string(), value))
    }

    fn select_mapping(
        &mut self,
        rule: &Rule,
        entries: &[(String, TemplateNode)],
    ) -> Result<Value, MockError> {
        let mut names: Vec<String> = Vec::with_capacity(entries.len());
        let mut originals: HashMap<&str, (&str, &TemplateNode)> = HashMap::new();
        for (key, node) in entries {
            let name = DecoratedKey::parse(key).name;
            if originals.insert(name, (key.as_str(), node)).is_none() {
                names.push(name.to_string());
            }
        }

        let chosen = match self.engine.rules.decide_shape(rule, Shape::Keys(&names)) {
            Selection::Keys(keys) => keys,
            Selection::Indices(indices) => indices
                .into_iter()
                .filter_map(|i| names.get(i).cloned())
                .collect(),
            Selection::Single(i) => names.get(i).cloned().into_iter().collect(),
        };

        let rebuilt: Vec<(&str, &TemplateNode)> = chosen
            .iter()
            .filter_map(|name| originals.get(name.as_str()).copied())
            .collect();
        self.evaluate_mapping(rebuilt, None)
    }

    fn select_sequence(
        &mut self,
        decorated: &DecoratedKey<'_>,
        items: &[TemplateNode],
    ) -> Result<Value, MockError> {
        let selection = match decorated.rule {
            Some(text) => {
                let rule = Rule::parse_repeat(text)?;
                self.engine.rules.decide_shape(&rule, Shape::Sequence(items.len()))
            }
            None => Selection::Indices((0..items.len()).collect()),
        };

        match selection {
            Selection::Single(i) => match items.get(i) {
                Some(item) => self.evaluate(item, None),
                None => Ok(Value::Null),
            },
            Selection::Indices(indices) => {
                let mut resolved = Vec::with_capacity(indices.len());
                for item in indices.into_iter().filter_map(|i| items.get(i)) {
                    resolved.push(self.evaluate(item, None)?);
                }
                Ok(Value::Array(resolved))
            }
            Selection::Keys(_) => Err(MockError::Rule {
                rule: decorated.rule.unwrap_or_default().to_string(),
                reason: "key selection returned for a sequence".to_string(),
            }),
        }
    }

    fn invoke(&self, source: &str) -> Result<Value, MockError> {
        let mut data = Map::new();
        data.insert("req".to_string(), self.request.clone());
        data.insert("root".to_string(), self.root.clone());
        self.engine.generators.invoke(source, &Value::Object(data))
    }
}

fn extend(path: &[Step], step: Step) -> Vec<Step> {
    let mut child = path.to_vec();
    child.push(step);
    child
}

fn locate<'v>(value: &'v mut Value, path: &[Step]) -> Option<&'v mut Value> {
    path.iter().try_fold(value, |current, step| match step {
        Step::Key(key) => current.as_object_mut()?.get_mut(key),
        Step::Index(i) => current.as_array_mut()?.get_mut(*i),
    })
}

/// Store `value` under `name`, dropping the decorated `key` it came from.
fn rebind(map: &mut Map<String, Value>, key: &str, name: &str, value: Value) {
    map.insert(name.to_string(), value);
    if key != name {
        map.shift_remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RequestParts;
    use serde_json::json;
    use std::sync::Mutex;

    fn context() -> RequestContext {
        let parts = RequestParts {
            method: "GET".to_string(),
            uri: "/users/42?verbose=1".to_string(),
            ..RequestParts::default()
        };
        RequestContext::build(&parts, HashMap::from([("id".to_string(), "42".to_string())]))
    }

    fn render(source: &str) -> Value {
        let template = TemplateNode::parse(source).unwrap();
        TemplateEngine::new().evaluate(&template, &context()).unwrap()
    }

    /// Rule library returning a fixed selection and recording the shapes it saw.
    struct FixedRules {
        selection: Selection,
        seen: Mutex<Vec<Vec<String>>>,
    }

    impl FixedRules {
        fn new(selection: Selection) -> Arc<Self> {
            Arc::new(Self {
                selection,
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    impl RuleLibrary for FixedRules {
        fn decide_shape(&self, _rule: &Rule, shape: Shape<'_>) -> Selection {
            let seen = match shape {
                Shape::Keys(keys) => keys.to_vec(),
                Shape::Sequence(len) => (0..len).map(|i| i.to_string()).collect(),
            };
            self.seen.lock().unwrap().push(seen);
            self.selection.clone()
        }

        fn generate(&self, rule: Option<&Rule>, value: &Value) -> Value {
            MockRules.generate(rule, value)
        }
    }

    fn render_with(rules: Arc<FixedRules>, source: &str) -> Value {
        let template = TemplateNode::parse(source).unwrap();
        TemplateEngine::with_rules(rules)
            .evaluate(&template, &context())
            .unwrap()
    }

    #[test]
    fn test_decorated_key() {
        assert_eq!(
            DecoratedKey::parse("list|1-3"),
            DecoratedKey { name: "list", rule: Some("1-3") }
        );
        assert_eq!(DecoratedKey::parse("b|"), DecoratedKey { name: "b", rule: None });
        assert_eq!(DecoratedKey::parse("c| 2 "), DecoratedKey { name: "c", rule: Some("2") });
        assert_eq!(DecoratedKey::parse("plain"), DecoratedKey { name: "plain", rule: None });
    }

    #[test]
    fn test_parse_json_and_yaml() {
        let json = TemplateNode::parse(r#"{"a": 1, "b": "{{req.method}}"}"#).unwrap();
        let TemplateNode::Mapping(entries) = json else {
            panic!("expected mapping");
        };
        assert_eq!(entries[0], ("a".to_string(), TemplateNode::Number(1.into())));
        assert!(entries[1].1.is_generator());

        let yaml = TemplateNode::parse(r#"{name: demo, "list|2": [1, 2]}"#).unwrap();
        assert!(matches!(yaml, TemplateNode::Mapping(ref e) if e.len() == 2));

        assert!(matches!(
            TemplateNode::parse("{a: [}"),
            Err(MockError::TemplateParse(_))
        ));
    }

    #[test]
    fn test_generator_reads_resolved_sibling() {
        // Generator declared before the field it reads.
        assert_eq!(render(r#"{"b|": "{{add root.a 1}}", "a": 1}"#), json!({"a": 1, "b": 2}));
        assert_eq!(render(r#"{"a": 1, "b": "{{add root.a 1}}"}"#), json!({"a": 1, "b": 2}));
    }

    #[test]
    fn test_generator_sees_rule_resolved_value_under_base_name() {
        let out = render(r#"{"double": "{{mul root.count 2}}", "count|5": 1}"#);
        assert_eq!(out, json!({"double": 10, "count": 5}));
    }

    #[test]
    fn test_generator_reads_nested_resolved_values() {
        let out = render(r#"{"greeting": "Hi {{root.user.first}}", "user": {"first|2": "Al"}}"#);
        assert_eq!(out["greeting"], json!("Hi AlAl"));
        assert_eq!(out["user"], json!({"first": "AlAl"}));
    }

    #[test]
    fn test_generator_receives_request_context() {
        let out = render(r#"{"id": "{{req.params.id}}", "q": "{{req.query.verbose}}-{{req.method}}"}"#);
        assert_eq!(out, json!({"id": "42", "q": "1-GET"}));
    }

    #[test]
    fn test_rule_on_generator_key_ignored() {
        assert_eq!(render(r#"{"g|abc": "{{add 1 1}}"}"#), json!({"g": 2}));
    }

    #[test]
    fn test_generator_output_not_resolved_again() {
        assert_eq!(render(r#"{"g": "{{json \"@name\"}}"}"#), json!({"g": "@name"}));
    }

    #[test]
    fn test_scalar_rules_and_placeholders() {
        let out = render(r#"{"s|3": "ab", "n|+1": 7, "p": "@integer(4, 4)", "z": null}"#);
        assert_eq!(out, json!({"n": 7, "p": 4, "s": "ababab", "z": null}));
    }

    #[test]
    fn test_array_range_keeps_original_elements() {
        let source = ["a", "b", "c"];
        for _ in 0..50 {
            let out = render(r#"{"list|1-2": ["a", "b", "c"]}"#);
            let list = out["list"].as_array().unwrap();
            assert!((1..=2).contains(&list.len()));
            assert!(list.iter().all(|v| source.contains(&v.as_str().unwrap())));
        }
    }

    #[test]
    fn test_array_single_pick_is_unwrapped() {
        for _ in 0..20 {
            let out = render(r#"{"pick|1": [{"x|2": "y"}, {"x|2": "z"}]}"#);
            let pick = &out["pick"];
            assert!(pick == &json!({"x": "yy"}) || pick == &json!({"x": "zz"}));
        }
    }

    #[test]
    fn test_array_without_rule_resolves_elements() {
        let out = render(r#"{"items": [{"a|2": "x"}, "@integer(1,1)"]}"#);
        // Scalars inside sequences are returned unchanged.
        assert_eq!(out, json!({"items": [{"a": "xx"}, "@integer(1,1)"]}));
    }

    #[test]
    fn test_mapping_rule_picks_keys() {
        for _ in 0..20 {
            let out = render(r#"{"obj|2": {"a": 1, "b": 2, "c": 3}}"#);
            let obj = out["obj"].as_object().unwrap();
            assert_eq!(obj.len(), 2);
            for (k, v) in obj {
                assert_eq!(json!({"a": 1, "b": 2, "c": 3})[k], *v);
            }
        }
    }

    #[test]
    fn test_mapping_shadow_uses_base_names_and_restores_values() {
        let rules = FixedRules::new(Selection::Keys(vec!["b".to_string()]));
        let out = render_with(rules.clone(), r#"{"obj|1": {"a|2": "x", "b|3": "y"}}"#);
        assert_eq!(out, json!({"obj": {"b": "yyy"}}));
        assert_eq!(
            rules.seen.lock().unwrap()[0],
            vec!["a".to_string(), "b".to_string()]
        );
    }

    #[test]
    fn test_sequence_indices_bind_original_elements() {
        let rules = FixedRules::new(Selection::Indices(vec![2, 0, 2]));
        let out = render_with(rules, r#"{"list|3": ["a", {"k|2": "v"}, {"n": 1}]}"#);
        assert_eq!(out, json!({"list": [{"n": 1}, "a", {"n": 1}]}));
    }

    #[test]
    fn test_sequence_single_binds_one_element() {
        let rules = FixedRules::new(Selection::Single(1));
        let out = render_with(rules, r#"{"one|1": ["a", {"k|2": "v"}]}"#);
        assert_eq!(out, json!({"one": {"k": "vv"}}));
    }

    #[test]
    fn test_key_selection_for_sequence_rejected() {
        let rules = FixedRules::new(Selection::Keys(vec![]));
        let template = TemplateNode::parse(r#"{"list|2": [1, 2]}"#).unwrap();
        let err = TemplateEngine::with_rules(rules)
            .evaluate(&template, &context())
            .unwrap_err();
        assert!(matches!(err, MockError::Rule { .. }));
    }

    #[test]
    fn test_repeat_count_is_bounded() {
        for source in [
            r#"{"s|10001": "a"}"#,
            r#"{"l|2-20000": [1, 2]}"#,
            r#"{"o|99999": {"a": 1}}"#,
        ] {
            let template = TemplateNode::parse(source).unwrap();
            let err = TemplateEngine::new().evaluate(&template, &context()).unwrap_err();
            assert!(matches!(err, MockError::Rule { .. }), "{source}");
        }

        // Numbers do not repeat anything, so wide ranges stay valid.
        let out = render(r#"{"n|1-9007199254740991": 1, "s|10000": "a"}"#);
        assert!(out["n"].as_i64().unwrap() >= 1);
        assert_eq!(out["s"].as_str().unwrap().len(), 10_000);
    }

    #[test]
    fn test_invalid_rule_is_an_error() {
        let template = TemplateNode::parse(r#"{"a|x-y": 1}"#).unwrap();
        let err = TemplateEngine::new().evaluate(&template, &context()).unwrap_err();
        assert!(matches!(err, MockError::Rule { .. }));
    }

    #[test]
    fn test_generator_error_propagates() {
        let template = TemplateNode::parse(r#"{"a": "{{#each}}"}"#).unwrap();
        let err = TemplateEngine::new().evaluate(&template, &context()).unwrap_err();
        assert!(matches!(err, MockError::Generator(_)));
    }

    #[test]
    fn test_root_sequence_and_scalars() {
        assert_eq!(render(r#"[{"a|2": "x"}, 1]"#), json!([{"a": "xx"}, 1]));
        assert_eq!(render(r#""@name""#), json!("@name"));
        assert_eq!(render("42"), json!(42));
    }

    #[test]
    fn test_generator_reads_resolved_array_element() {
        let out = render(r#"[{"a|2": "x"}, {"b": "{{root.[0].a}}"}]"#);
        assert_eq!(out, json!([{"a": "xx"}, {"b": "xx"}]));
    }

    #[test]
    fn test_decorated_keys_removed() {
        let out = render(r#"{"a|2": "x", "b": {"c|1-1": 9}}"#);
        let obj = out.as_object().unwrap();
        assert_eq!(obj.keys().collect::<Vec<_>>(), vec!["b", "a"]);
        assert_eq!(out["b"], json!({"c": 1}));
    }
}
