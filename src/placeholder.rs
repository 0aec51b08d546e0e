//! `@placeholder` value generators.
//!
//! Strings such as `"@name"` or `"user-@integer(1, 99)"` are expanded into
//! random values. A string that is exactly one placeholder keeps the
//! generated type, so `"@integer(1, 10)"` becomes a number. Unknown
//! placeholders are left untouched.

use crate::rules::MAX_REPEAT;
use chrono::{DateTime, Local, TimeZone, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use regex::{Captures, Regex};
use serde_json::{Number, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::LazyLock;

static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"@([A-Za-z_][A-Za-z0-9_]*)(?:\(([^()]*)\))?").expect("placeholder pattern is valid")
});

static DATE_TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"yyyy|yy|MM|dd|HH|mm|ss|SS").expect("date pattern is valid"));

static INCREMENT: AtomicU64 = AtomicU64::new(0);

const MAX_SAFE_INTEGER: i64 = 9_007_199_254_740_991;

const FIRST_NAMES: &[&str] = &[
    "James", "John", "Robert", "Michael", "William", "David", "Richard", "Charles", "Joseph",
    "Thomas", "Mary", "Patricia", "Linda", "Barbara", "Elizabeth", "Jennifer", "Maria", "Susan",
    "Margaret", "Dorothy", "Lisa", "Nancy", "Karen", "Betty", "Helen", "Sandra",
];

const LAST_NAMES: &[&str] = &[
    "Smith", "Johnson", "Williams", "Brown", "Jones", "Miller", "Davis", "Garcia", "Rodriguez",
    "Wilson", "Martinez", "Anderson", "Taylor", "Thomas", "Hernandez", "Moore", "Martin",
    "Jackson", "Thompson", "White", "Lopez", "Lee", "Gonzalez", "Harris", "Clark", "Lewis",
];

const TLDS: &[&str] = &["com", "net", "org", "io", "dev", "edu", "gov"];

const LOWER: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const ALNUM: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Expand every placeholder in `text`.
pub fn resolve(text: &str) -> Value {
    if !text.contains('@') {
        return Value::String(text.to_string());
    }

    if let Some(caps) = PLACEHOLDER_RE.captures(text) {
        if caps.get(0).map(|m| m.as_str().len()) == Some(text.len()) {
            if let Some(value) = generate(&caps[1], caps.get(2).map_or("", |m| m.as_str())) {
                return value;
            }
        }
    }

    let expanded = PLACEHOLDER_RE.replace_all(text, |caps: &Captures| {
        match generate(&caps[1], caps.get(2).map_or("", |m| m.as_str())) {
            Some(Value::String(s)) => s,
            Some(other) => other.to_string(),
            None => caps[0].to_string(),
        }
    });
    Value::String(expanded.into_owned())
}

/// Generate the value of one placeholder, or `None` if the name is unknown.
pub fn generate(name: &str, args: &str) -> Option<Value> {
    let args = split_args(args);
    let int_arg = |i: usize| args.get(i).and_then(|a| a.parse::<i64>().ok());
    let mut rng = rand::thread_rng();

    let value = match name.to_ascii_lowercase().as_str() {
        "guid" | "uuid" => Value::String(random_uuid()),
        "id" => Value::String(
            (0..18)
                .map(|i| {
                    let low = if i == 0 { 1 } else { 0 };
                    char::from(b'0' + rng.gen_range(low..10u8))
                })
                .collect(),
        ),
        "increment" => {
            let step = int_arg(0).filter(|s| *s > 0).unwrap_or(1) as u64;
            Value::from(INCREMENT.fetch_add(step, Ordering::Relaxed).saturating_add(step))
        }
        "integer" | "int" => {
            let (min, max) = bounds(int_arg(0), int_arg(1), -MAX_SAFE_INTEGER, MAX_SAFE_INTEGER);
            Value::from(rng.gen_range(min..=max))
        }
        "natural" => {
            let (min, max) = bounds(int_arg(0), int_arg(1), 0, MAX_SAFE_INTEGER);
            Value::from(rng.gen_range(min.max(0)..=max.max(0)))
        }
        "float" => {
            let (min, max) = bounds(int_arg(0), int_arg(1), -MAX_SAFE_INTEGER, MAX_SAFE_INTEGER);
            let (dmin, dmax) = bounds(int_arg(2), int_arg(3), 0, 15);
            let whole = rng.gen_range(min..=max);
            let digits = rng.gen_range(dmin.clamp(0, 15)..=dmax.clamp(0, 15));
            let fraction: String = (0..digits)
                .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
                .collect();
            let text = if fraction.is_empty() {
                whole.to_string()
            } else {
                format!("{whole}.{fraction}")
            };
            text.parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .unwrap_or_else(|| Value::from(whole))
        }
        "boolean" | "bool" => Value::Bool(rng.gen::<bool>()),
        "character" | "char" => Value::String(random_chars(ALNUM, 1)),
        "string" | "str" => {
            let (min, max) = bounds(int_arg(0), int_arg(1), 3, 7);
            let len = rng.gen_range(min.clamp(0, MAX_REPEAT)..=max.clamp(0, MAX_REPEAT)) as usize;
            Value::String(random_chars(LOWER, len))
        }
        "word" => {
            let (min, max) = bounds(int_arg(0), int_arg(1), 3, 10);
            Value::String(random_word(min, max))
        }
        "title" => {
            let count = rng.gen_range(3..=7);
            let words: Vec<String> = (0..count).map(|_| capitalize(&random_word(3, 10))).collect();
            Value::String(words.join(" "))
        }
        "sentence" => Value::String(random_sentence()),
        "paragraph" => {
            let count = rng.gen_range(3..=7);
            let sentences: Vec<String> = (0..count).map(|_| random_sentence()).collect();
            Value::String(sentences.join(" "))
        }
        "first" => Value::String(pick(FIRST_NAMES).to_string()),
        "last" => Value::String(pick(LAST_NAMES).to_string()),
        "name" => Value::String(format!("{} {}", pick(FIRST_NAMES), pick(LAST_NAMES))),
        "domain" => Value::String(random_domain()),
        "email" => Value::String(format!("{}@{}", random_word(3, 8), random_domain())),
        "url" => Value::String(format!("http://{}/{}", random_domain(), random_word(3, 10))),
        "ip" => Value::String(format!(
            "{}.{}.{}.{}",
            rng.gen_range(1..=255u8),
            rng.gen::<u8>(),
            rng.gen::<u8>(),
            rng.gen_range(1..=254u8)
        )),
        "color" => Value::String(format!("#{:06x}", rng.gen_range(0..=0xffffffu32))),
        "date" => Value::String(format_date(&random_datetime(), first_or(&args, "yyyy-MM-dd"))),
        "time" => Value::String(format_date(&random_datetime(), first_or(&args, "HH:mm:ss"))),
        "datetime" => Value::String(format_date(
            &random_datetime(),
            first_or(&args, "yyyy-MM-dd HH:mm:ss"),
        )),
        "now" => Value::String(format_date(&Local::now(), first_or(&args, "yyyy-MM-dd HH:mm:ss"))),
        "pick" => {
            let choice = args.choose(&mut rng)?;
            serde_json::from_str::<Value>(choice).unwrap_or_else(|_| Value::String(choice.clone()))
        }
        _ => return None,
    };
    Some(value)
}

/// A random version 4 UUID.
pub fn random_uuid() -> String {
    let mut rng = rand::thread_rng();
    format!(
        "{:08x}-{:04x}-4{:03x}-{:04x}-{:012x}",
        rng.gen::<u32>(),
        rng.gen::<u16>(),
        rng.gen::<u16>() & 0x0fff,
        (rng.gen::<u16>() & 0x3fff) | 0x8000,
        rng.gen::<u64>() & 0xffffffffffff,
    )
}

/// Format a timestamp with `yyyy MM dd HH mm ss SS` tokens.
pub fn format_date<Tz: TimeZone>(dt: &DateTime<Tz>, pattern: &str) -> String
where
    Tz::Offset: std::fmt::Display,
{
    let strftime = pattern.replace('%', "%%");
    let strftime = DATE_TOKEN_RE.replace_all(&strftime, |caps: &Captures| {
        match &caps[0] {
            "yyyy" => "%Y",
            "yy" => "%y",
            "MM" => "%m",
            "dd" => "%d",
            "HH" => "%H",
            "mm" => "%M",
            "ss" => "%S",
            _ => "%3f",
        }
        .to_string()
    });
    dt.format(&strftime).to_string()
}

fn split_args(args: &str) -> Vec<String> {
    args.split(',')
        .map(|a| a.trim().trim_matches(|c| c == '"' || c == '\'').to_string())
        .filter(|a| !a.is_empty())
        .collect()
}

fn first_or<'a>(args: &'a [String], default: &'a str) -> &'a str {
    args.first().map(String::as_str).unwrap_or(default)
}

fn bounds(min: Option<i64>, max: Option<i64>, default_min: i64, default_max: i64) -> (i64, i64) {
    let min = min.unwrap_or(default_min);
    let max = max.unwrap_or(default_max.max(min));
    (min.min(max), min.max(max))
}

fn pick(items: &[&'static str]) -> &'static str {
    items.choose(&mut rand::thread_rng()).copied().unwrap_or_default()
}

fn random_chars(pool: &[u8], len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| char::from(pool[rng.gen_range(0..pool.len())]))
        .collect()
}

fn random_word(min: i64, max: i64) -> String {
    let (min, max) = bounds(Some(min), Some(max), 3, 10);
    let len = rand::thread_rng().gen_range(min.clamp(1, MAX_REPEAT)..=max.clamp(1, MAX_REPEAT)) as usize;
    random_chars(LOWER, len)
}

fn random_sentence() -> String {
    let count = rand::thread_rng().gen_range(12..=18);
    let words: Vec<String> = (0..count).map(|_| random_word(3, 10)).collect();
    format!("{}.", capitalize(&words.join(" ")))
}

fn random_domain() -> String {
    format!("{}.{}", random_word(3, 10), pick(TLDS))
}

fn random_datetime() -> DateTime<Utc> {
    let now = Utc::now().timestamp();
    let secs = rand::thread_rng().gen_range(0..=now.max(0));
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
