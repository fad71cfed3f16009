use std::{fmt, rc::Rc, sync::LazyLock};

use regex::Regex;
use serde_json::Value;

use crate::config::ConfigError;
use crate::record::Record;

/// Format used when none is configured.
///
/// Renders remote address, direction, method, url, HTTP version, status,
/// response size, referer, user agent family/version/OS and response time.
pub const DEFAULT_FORMAT: &str = ":remote-address :incoming :method :url HTTP/:http-version :status-code :res-headers[content-length] :referer :user-agent[family] :user-agent[major].:user-agent[minor] :user-agent[os] :response-time ms";

static DIRECTIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r":([-\w]{2,})(?:\[([^\]]+)\])?").expect("directive pattern is valid")
});

static UNCLOSED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r":[-\w]{2,}\[[^\]]*$").expect("unclosed pattern is valid"));

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Field(String),
    Indexed(String, String),
}

/// A format string compiled into a list of segments.
///
/// Directives look like `:name` or `:name[arg]`. A directive whose value is
/// missing or falsy renders as `"0"` when the field `name` holds a number and
/// as `"-"` otherwise, so rendering never fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    segments: Vec<Segment>,
}

impl Template {
    pub fn compile(format: &str) -> Result<Self, ConfigError> {
        if let Some(m) = UNCLOSED.find(format) {
            return Err(ConfigError::UnbalancedDirective {
                format: format.to_string(),
                position: m.start(),
            });
        }

        let mut segments = Vec::new();
        let mut last = 0;

        for caps in DIRECTIVE.captures_iter(format) {
            let whole = caps.get(0).expect("group 0 always matches");
            if whole.start() > last {
                segments.push(Segment::Literal(format[last..whole.start()].to_string()));
            }

            let name = caps[1].to_string();
            segments.push(match caps.get(2) {
                Some(arg) => Segment::Indexed(name, arg.as_str().to_string()),
                None => Segment::Field(name),
            });
            last = whole.end();
        }

        if last < format.len() {
            segments.push(Segment::Literal(format[last..].to_string()));
        }

        Ok(Template { segments })
    }

    pub fn render(&self, record: &Record) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Field(name) => {
                    resolve(&mut out, record.get(name), record.get(name));
                }
                Segment::Indexed(name, arg) => {
                    let target = record.get(name);
                    let value = target.and_then(|v| index(v, arg));
                    resolve(&mut out, value, target);
                }
            }
        }
        out
    }
}

fn index<'a>(value: &'a Value, arg: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => map.get(arg),
        Value::Array(items) => arg.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }
}

// The numeric fallback looks at the unindexed field even for `:name[arg]`.
fn resolve(out: &mut String, value: Option<&Value>, target: Option<&Value>) {
    match value {
        Some(v) if is_truthy(v) => push_value(out, v),
        _ if matches!(target, Some(Value::Number(_))) => out.push('0'),
        _ => out.push('-'),
    }
}

pub(crate) fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn push_value(out: &mut String, value: &Value) {
    use fmt::Write;

    match value {
        Value::String(s) => out.push_str(s),
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                match item {
                    Value::Null => {}
                    other => push_value(out, other),
                }
            }
        }
        Value::Number(n) => match n.as_f64() {
            Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < 1e15 => {
                let _ = write!(out, "{}", f as i64);
            }
            _ => {
                let _ = write!(out, "{n}");
            }
        },
        other => {
            let _ = write!(out, "{other}");
        }
    }
}

/// How the human readable line is produced.
#[derive(Clone)]
pub enum Format {
    Template(Template),
    Custom(Rc<dyn Fn(&Record) -> String>),
}

impl Format {
    pub fn render(&self, record: &Record) -> String {
        match self {
            Format::Template(template) => template.render(record),
            Format::Custom(f) => f(record),
        }
    }
}

impl fmt::Debug for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Format::Template(template) => f.debug_tuple("Template").field(template).finish(),
            Format::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}
