use std::{collections::HashSet, fmt, str::FromStr};

use serde_json::Value;

use crate::config::ConfigError;
use crate::format::is_truthy;
use crate::record::{Record, short_body};

pub const DEFAULT_PLACEHOLDER: &str = "[HIDDEN]";

/// Top level fields removed from the structured record.
///
/// The rendered line always uses the full record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Excludes {
    /// Only the rendered line is written.
    All,
    Fields(HashSet<String>),
}

impl Excludes {
    /// Builds the list from field names; `"*"` anywhere means [`Excludes::All`].
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut fields = HashSet::new();
        for name in names {
            let name = name.into();
            if name == "*" {
                return Excludes::All;
            }
            fields.insert(name);
        }
        Excludes::Fields(fields)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// Location inside a record, written as `req-headers.authorization`,
/// `body.cards[0].number` or `body["dotted.key"]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath(Vec<PathSegment>);

impl FieldPath {
    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    fn lookup<'a>(value: &'a mut Value, segment: &PathSegment) -> Option<&'a mut Value> {
        match (value, segment) {
            (Value::Object(map), PathSegment::Key(key)) => map.get_mut(key),
            (Value::Object(map), PathSegment::Index(i)) => map.get_mut(&i.to_string()),
            (Value::Array(items), PathSegment::Index(i)) => items.get_mut(*i),
            (Value::Array(items), PathSegment::Key(key)) => {
                key.parse::<usize>().ok().and_then(|i| items.get_mut(i))
            }
            _ => None,
        }
    }

    /// Replaces the value at this path when the path exists.
    /// Returns whether anything was written.
    pub fn set_existing(&self, record: &mut Record, value: Value) -> bool {
        let Some((first, rest)) = self.0.split_first() else {
            return false;
        };
        let first = match first {
            PathSegment::Key(key) => key.clone(),
            PathSegment::Index(i) => i.to_string(),
        };
        let Some(mut current) = record.get_mut(&first) else {
            return false;
        };
        for segment in rest {
            match Self::lookup(current, segment) {
                Some(next) => current = next,
                None => return false,
            }
        }
        *current = value;
        true
    }
}

impl FromStr for FieldPath {
    type Err = ConfigError;

    fn from_str(path: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ConfigError::InvalidPath {
            path: path.to_string(),
            reason: reason.to_string(),
        };

        let mut segments = Vec::new();
        let mut key = String::new();
        let mut chars = path.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '.' => {
                    if key.is_empty() && segments.is_empty() {
                        return Err(invalid("empty key"));
                    }
                    if chars.peek().is_none() {
                        return Err(invalid("trailing '.'"));
                    }
                    if !key.is_empty() {
                        segments.push(PathSegment::Key(std::mem::take(&mut key)));
                    }
                }
                '[' => {
                    if !key.is_empty() {
                        segments.push(PathSegment::Key(std::mem::take(&mut key)));
                    }
                    let mut inner = String::new();
                    let mut closed = false;
                    for c in chars.by_ref() {
                        if c == ']' {
                            closed = true;
                            break;
                        }
                        inner.push(c);
                    }
                    if !closed {
                        return Err(invalid("unclosed '['"));
                    }
                    segments.push(bracket_segment(&inner).ok_or_else(|| invalid("empty brackets"))?);
                }
                ']' => return Err(invalid("unexpected ']'")),
                _ => key.push(c),
            }
        }

        if !key.is_empty() {
            segments.push(PathSegment::Key(key));
        }
        if segments.is_empty() {
            return Err(invalid("empty path"));
        }
        Ok(FieldPath(segments))
    }
}

fn bracket_segment(inner: &str) -> Option<PathSegment> {
    let inner = inner.trim();
    for quote in ['"', '\''] {
        if let Some(key) = inner
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return Some(PathSegment::Key(key.to_string()));
        }
    }
    if inner.is_empty() {
        return None;
    }
    match inner.parse::<usize>() {
        Ok(idx) => Some(PathSegment::Index(idx)),
        Err(_) => Some(PathSegment::Key(inner.to_string())),
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            match segment {
                PathSegment::Key(key) if key.contains(['.', '[', ']']) => write!(f, "[\"{key}\"]")?,
                PathSegment::Key(key) if i == 0 => f.write_str(key)?,
                PathSegment::Key(key) => write!(f, ".{key}")?,
                PathSegment::Index(idx) => write!(f, "[{idx}]")?,
            }
        }
        Ok(())
    }
}

/// Exclusion and obfuscation applied to the record handed to the backend.
#[derive(Debug, Clone)]
pub struct Redactor {
    pub(crate) excludes: Option<Excludes>,
    pub(crate) obfuscate: Vec<FieldPath>,
    pub(crate) placeholder: String,
}

impl Default for Redactor {
    fn default() -> Self {
        Redactor {
            excludes: None,
            obfuscate: Vec::new(),
            placeholder: DEFAULT_PLACEHOLDER.to_string(),
        }
    }
}

impl Redactor {
    /// Returns `None` when every field is excluded.
    pub fn redact(&self, record: &Record, extra: Option<Record>) -> Option<Record> {
        let mut filtered = match &self.excludes {
            None => record.clone(),
            Some(Excludes::All) => return None,
            Some(Excludes::Fields(names)) => record
                .iter()
                .filter(|(key, _)| !names.contains(key.as_str()))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
        };

        if let Some(extra) = extra {
            filtered.extend(extra);
        }

        for path in &self.obfuscate {
            path.set_existing(&mut filtered, Value::String(self.placeholder.clone()));
        }

        let preview = filtered
            .get("body")
            .filter(|body| is_truthy(body))
            .map(|body| short_body(body));
        if let Some(preview) = preview {
            filtered.insert("short-body".to_string(), Value::String(preview));
        }

        Some(filtered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            _ => panic!("record must be an object"),
        }
    }

    fn path(s: &str) -> FieldPath {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_paths() {
        assert_eq!(
            path("body.cards[0].number").segments(),
            &[
                PathSegment::Key("body".to_string()),
                PathSegment::Key("cards".to_string()),
                PathSegment::Index(0),
                PathSegment::Key("number".to_string()),
            ]
        );
        assert_eq!(
            path("req-headers['x.token']").segments(),
            &[
                PathSegment::Key("req-headers".to_string()),
                PathSegment::Key("x.token".to_string()),
            ]
        );
        assert_eq!(
            path("req-headers[authorization]").segments(),
            &[
                PathSegment::Key("req-headers".to_string()),
                PathSegment::Key("authorization".to_string()),
            ]
        );
        assert_eq!(path("body.cards[0].number").to_string(), "body.cards[0].number");

        for bad in ["", ".a", "a.", "a[", "a]", "a[]"] {
            assert!(bad.parse::<FieldPath>().is_err(), "{bad:?} should not parse");
        }
    }

    #[test]
    fn test_bare_bracket_key_obfuscates_header() {
        let mut rec = record(json!({"req-headers": {"authorization": "Bearer abc", "host": "a"}}));
        assert!(path("req-headers[authorization]").set_existing(&mut rec, json!("[HIDDEN]")));
        assert_eq!(
            Value::Object(rec),
            json!({"req-headers": {"authorization": "[HIDDEN]", "host": "a"}})
        );
    }

    #[test]
    fn test_set_existing_only() {
        let mut rec = record(json!({"body": {"user": "bob", "cards": [{"number": "4111"}]}}));
        assert!(path("body.cards[0].number").set_existing(&mut rec, json!("x")));
        assert!(!path("body.cards[3].number").set_existing(&mut rec, json!("x")));
        assert!(!path("body.password").set_existing(&mut rec, json!("x")));
        assert!(!path("missing").set_existing(&mut rec, json!("x")));
        assert_eq!(
            Value::Object(rec),
            json!({"body": {"user": "bob", "cards": [{"number": "x"}]}})
        );
    }

    #[test]
    fn test_no_excludes_keeps_everything() {
        let rec = record(json!({"a": 1, "b": 2}));
        let out = Redactor::default().redact(&rec, None).unwrap();
        assert_eq!(out, rec);
    }

    #[test]
    fn test_wildcard_excludes_everything() {
        let redactor = Redactor {
            excludes: Some(Excludes::from_names(["req", "*"])),
            ..Redactor::default()
        };
        assert_eq!(redactor.excludes, Some(Excludes::All));
        let rec = record(json!({"a": 1}));
        assert!(redactor.redact(&rec, Some(record(json!({"b": 2})))).is_none());
    }

    #[test]
    fn test_excludes_keep_order() {
        let rec = record(json!({"z": 1, "req": {}, "a": 2, "res": {}, "m": 3}));
        let redactor = Redactor {
            excludes: Some(Excludes::from_names(["req", "res"])),
            ..Redactor::default()
        };
        let out = redactor.redact(&rec, None).unwrap();
        assert_eq!(out.keys().collect::<Vec<_>>(), vec!["z", "a", "m"]);
        assert!(rec.contains_key("req"));
    }

    #[test]
    fn test_exclusion_wins_over_obfuscation() {
        let rec = record(json!({"body": {"password": "secret"}, "url": "/login"}));
        let redactor = Redactor {
            excludes: Some(Excludes::from_names(["body"])),
            obfuscate: vec![path("body"), path("body.password")],
            ..Redactor::default()
        };
        let out = redactor.redact(&rec, None).unwrap();
        assert!(!out.contains_key("body"));
        assert!(!out.contains_key("short-body"));
        assert_eq!(out["url"], "/login");
    }

    #[test]
    fn test_obfuscates_extra_fields() {
        let rec = record(json!({"url": "/"}));
        let redactor = Redactor {
            obfuscate: vec![path("session.token")],
            placeholder: "***".to_string(),
            ..Redactor::default()
        };
        let extra = record(json!({"session": {"token": "abc", "user": 7}}));
        let out = redactor.redact(&rec, Some(extra)).unwrap();
        assert_eq!(out["session"], json!({"token": "***", "user": 7}));
    }

    #[test]
    fn test_short_body_follows_obfuscated_body() {
        let body = json!({"password": "hunter2hunter2hunter2"});
        let rec = record(json!({
            "body": body,
            "short-body": short_body(&body),
        }));
        let redactor = Redactor {
            obfuscate: vec![path("body.password")],
            ..Redactor::default()
        };
        let out = redactor.redact(&rec, None).unwrap();
        assert_eq!(out["body"], json!({"password": "[HIDDEN]"}));
        assert_eq!(out["short-body"], json!(r#"{"password":"[HIDDEN"#));
        assert_eq!(rec["body"], body);
    }
}
