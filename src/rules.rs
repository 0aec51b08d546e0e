//! Randomization rules for decorated template keys.
//!
//! A decorated key looks like `name|rule`. The rule text decides how many
//! entries of a container survive, which one is picked, or how a scalar is
//! generated:
//!
//! | Rule | Meaning |
//! |---|---|
//! | `count` | exactly `count` |
//! | `min-max` | a random count in `min..=max` |
//! | `+step` | sequential pick / keep value |
//! | `min-max.dmin-dmax` | number with `dmin..=dmax` fraction digits |
//!
//! The engine talks to the library in two phases: [`RuleLibrary::decide_shape`]
//! only picks keys or indices of a container, the engine then binds the
//! original values itself. Scalars are handed over whole through
//! [`RuleLibrary::generate`].

use crate::error::MockError;
use crate::placeholder;
use rand::seq::index;
use rand::Rng;
use regex::Regex;
use serde_json::{Number, Value};
use std::sync::LazyLock;

static RULE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:\+(\d+)|(-?\d+)(?:-(-?\d+))?(?:\.(\d+)(?:-(\d+))?)?|\.(\d+)(?:-(\d+))?)$")
        .expect("rule pattern is valid")
});

/// Largest number of fraction digits generated for decimal rules.
const MAX_DECIMALS: u32 = 15;

/// Largest count a rule may ask to repeat a string or list by.
pub const MAX_REPEAT: i64 = 10_000;

/// A parsed rule.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rule {
    /// `+step`
    pub step: Option<u64>,
    /// Lower (or only) count bound
    pub min: Option<i64>,
    /// Upper count bound, present for `min-max`
    pub max: Option<i64>,
    /// Lower fraction digit bound
    pub dmin: Option<u32>,
    /// Upper fraction digit bound
    pub dmax: Option<u32>,
}

impl Rule {
    /// Parse rule text (the part after `|`, already trimmed).
    pub fn parse(text: &str) -> Result<Self, MockError> {
        let invalid = |reason: &str| MockError::Rule {
            rule: text.to_string(),
            reason: reason.to_string(),
        };
        let caps = RULE_RE
            .captures(text)
            .ok_or_else(|| invalid("unrecognized rule syntax"))?;

        let int = |i: usize| -> Result<Option<i64>, MockError> {
            caps.get(i)
                .map(|m| m.as_str().parse::<i64>().map_err(|_| invalid("number out of range")))
                .transpose()
        };
        let digits = |i: usize| -> Result<Option<u32>, MockError> {
            caps.get(i)
                .map(|m| m.as_str().parse::<u32>().map_err(|_| invalid("number out of range")))
                .transpose()
        };

        let step = caps
            .get(1)
            .map(|m| m.as_str().parse::<u64>().map_err(|_| invalid("number out of range")))
            .transpose()?;
        let min = int(2)?;
        let max = int(3)?;
        let dmin = digits(4)?.or(digits(6)?);
        let dmax = digits(5)?.or(digits(7)?);

        Ok(Self {
            step,
            min,
            max,
            dmin,
            dmax,
        })
    }

    /// Parse a rule that repeats its value (strings, lists, objects).
    ///
    /// Counts beyond [`MAX_REPEAT`] are rejected.
    pub fn parse_repeat(text: &str) -> Result<Self, MockError> {
        let rule = Self::parse(text)?;
        let largest = rule.min.into_iter().chain(rule.max).max().unwrap_or(0);
        if largest > MAX_REPEAT {
            return Err(MockError::Rule {
                rule: text.to_string(),
                reason: format!("count too large (max {MAX_REPEAT})"),
            });
        }
        Ok(rule)
    }

    /// Whether the rule carries a count (`count` or `min-max`).
    pub fn has_count(&self) -> bool {
        self.min.is_some()
    }

    /// Whether the rule is a `min-max` range.
    pub fn is_range(&self) -> bool {
        self.min.is_some() && self.max.is_some()
    }

    /// Whether the rule asks for fraction digits.
    pub fn has_decimals(&self) -> bool {
        self.dmin.is_some()
    }

    /// Draw the count: `count` itself, or a random value between the bounds.
    pub fn count<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<i64> {
        match (self.min, self.max) {
            (Some(min), Some(max)) => Some(rng.gen_range(min.min(max)..=min.max(max))),
            (Some(min), None) => Some(min),
            _ => None,
        }
    }

    fn decimals<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<u32> {
        let lo = self.dmin?.min(MAX_DECIMALS);
        let hi = self.dmax.unwrap_or(lo).min(MAX_DECIMALS);
        Some(rng.gen_range(lo.min(hi)..=lo.max(hi)))
    }
}

/// Placeholder shape of a container handed to the library.
#[derive(Debug, Clone, Copy)]
pub enum Shape<'a> {
    /// Base names of a mapping's keys, in declaration order
    Keys(&'a [String]),
    /// Length of a sequence
    Sequence(usize),
}

/// Which parts of a container survive a rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Surviving base names
    Keys(Vec<String>),
    /// Surviving original indices, possibly repeated or reordered
    Indices(Vec<usize>),
    /// Exactly one original element, unwrapped
    Single(usize),
}

/// The randomization capability the template engine delegates to.
pub trait RuleLibrary: Send + Sync {
    /// Decide which keys or indices of a container survive `rule`.
    fn decide_shape(&self, rule: &Rule, shape: Shape<'_>) -> Selection;

    /// Produce the final value of a scalar under an optional rule.
    fn generate(&self, rule: Option<&Rule>, value: &Value) -> Value;
}

/// Mock.js-style rule semantics.
#[derive(Debug, Clone, Copy, Default)]
pub struct MockRules;

impl MockRules {
    fn pick_keys(&self, rule: &Rule, keys: &[String]) -> Vec<String> {
        let mut rng = rand::thread_rng();
        let Some(count) = rule.count(&mut rng) else {
            return keys.to_vec();
        };
        let count = count.clamp(0, keys.len() as i64) as usize;
        let mut picked = index::sample(&mut rng, keys.len(), count).into_vec();
        picked.sort_unstable();
        picked.into_iter().map(|i| keys[i].clone()).collect()
    }

    fn pick_indices(&self, rule: &Rule, len: usize) -> Selection {
        let mut rng = rand::thread_rng();
        if len == 0 {
            return Selection::Indices(Vec::new());
        }
        if rule.step.is_some() {
            return Selection::Single(0);
        }
        if rule.min == Some(1) && rule.max.is_none() {
            return Selection::Single(rng.gen_range(0..len));
        }
        let Some(count) = rule.count(&mut rng) else {
            return Selection::Indices((0..len).collect());
        };
        let count = count.clamp(0, MAX_REPEAT) as usize;
        if count <= len {
            let mut picked = index::sample(&mut rng, len, count).into_vec();
            picked.sort_unstable();
            Selection::Indices(picked)
        } else {
            Selection::Indices((0..count).map(|i| i % len).collect())
        }
    }

    fn generate_string(&self, rule: Option<&Rule>, template: &str) -> Value {
        let mut rng = rand::thread_rng();
        let repeated = match rule.and_then(|r| r.count(&mut rng)) {
            Some(count) => template.repeat(count.clamp(0, MAX_REPEAT) as usize),
            None => template.to_string(),
        };
        placeholder::resolve(&repeated)
    }

    fn generate_number(&self, rule: &Rule, value: &Number) -> Value {
        let mut rng = rand::thread_rng();
        if rule.step.is_some() {
            return Value::Number(value.clone());
        }
        let count = rule.count(&mut rng);
        let Some(decimals) = rule.decimals(&mut rng) else {
            return match count {
                Some(count) => Value::from(count),
                None => Value::Number(value.clone()),
            };
        };

        let whole = count.unwrap_or_else(|| value.as_f64().map(|f| f.trunc() as i64).unwrap_or(0));
        if decimals == 0 {
            return Value::from(whole);
        }
        let mut fraction: String = (0..decimals - 1)
            .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
            .collect();
        // A trailing zero would be dropped by the float anyway.
        fraction.push(char::from(b'0' + rng.gen_range(1..10u8)));
        format!("{whole}.{fraction}")
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .unwrap_or_else(|| Value::from(whole))
    }

    fn generate_bool(&self, rule: &Rule, value: bool) -> Value {
        let mut rng = rand::thread_rng();
        match (rule.min, rule.max) {
            (Some(min), Some(max)) if min.saturating_add(max) > 0 => {
                let (min, max) = (min.max(0) as f64, max.max(0) as f64);
                let keep = min / (min + max);
                Value::Bool(if rng.gen::<f64>() < keep { value } else { !value })
            }
            _ => Value::Bool(rng.gen::<bool>()),
        }
    }
}

impl RuleLibrary for MockRules {
    fn decide_shape(&self, rule: &Rule, shape: Shape<'_>) -> Selection {
        match shape {
            Shape::Keys(keys) => Selection::Keys(self.pick_keys(rule, keys)),
            Shape::Sequence(len) => self.pick_indices(rule, len),
        }
    }

    fn generate(&self, rule: Option<&Rule>, value: &Value) -> Value {
        match (value, rule) {
            (Value::String(s), rule) => self.generate_string(rule, s),
            (Value::Number(n), Some(rule)) => self.generate_number(rule, n),
            (Value::Bool(b), Some(rule)) => self.generate_bool(rule, *b),
            (other, _) => other.clone(),
        }
    }
}
