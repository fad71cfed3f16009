use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde_json::{Value, json};

/// Parsed `User-Agent` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserAgent {
    pub family: String,
    pub major: String,
    pub minor: String,
    pub patch: String,
    pub os: String,
    pub source: String,
}

impl UserAgent {
    pub fn to_value(&self) -> Value {
        json!({
            "family": self.family,
            "major": self.major,
            "minor": self.minor,
            "patch": self.patch,
            "os": self.os,
            "source": self.source,
        })
    }
}

/// Turns a raw `User-Agent` header into family, version and OS.
///
/// Plug in a full user agent database by implementing this trait.
pub trait UserAgentParser {
    fn parse(&self, header: &str) -> UserAgent;
}

struct Rule {
    pattern: Regex,
    name: &'static str,
}

impl Rule {
    fn new(pattern: &str, name: &'static str) -> Self {
        Rule {
            pattern: Regex::new(pattern).expect("user agent pattern is valid"),
            name,
        }
    }
}

static BROWSERS: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    vec![
        Rule::new(r"Edg(?:e|A|iOS)?/(\d+)\.(\d+)(?:\.(\d+))?", "Edge"),
        Rule::new(r"OPR/(\d+)\.(\d+)(?:\.(\d+))?", "Opera"),
        Rule::new(r"(?:Chrome|CriOS)/(\d+)\.(\d+)(?:\.(\d+))?", "Chrome"),
        Rule::new(r"(?:Firefox|FxiOS)/(\d+)\.(\d+)(?:\.(\d+))?", "Firefox"),
        Rule::new(r"Version/(\d+)\.(\d+)(?:\.(\d+))?.*Safari/", "Safari"),
        Rule::new(r"curl/(\d+)\.(\d+)(?:\.(\d+))?", "curl"),
        Rule::new(r"Wget/(\d+)\.(\d+)(?:\.(\d+))?", "Wget"),
    ]
});

static SYSTEMS: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    vec![
        Rule::new(r"Windows NT 10\.0", "Windows 10"),
        Rule::new(r"Windows NT (\d+)\.(\d+)", "Windows NT"),
        Rule::new(r"(?:iPhone|CPU) OS (\d+)_(\d+)(?:_(\d+))?", "iOS"),
        Rule::new(r"Mac OS X (\d+)[_.](\d+)(?:[_.](\d+))?", "Mac OS X"),
        Rule::new(r"Android (\d+)(?:\.(\d+))?(?:\.(\d+))?", "Android"),
        Rule::new(r"Linux", "Linux"),
    ]
});

fn group(caps: &Captures<'_>, i: usize) -> Option<String> {
    caps.get(i).map(|m| m.as_str().to_string())
}

/// Small rule table covering common browsers, CLI clients and systems.
/// Anything unknown is reported as `Other 0.0.0`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicUserAgentParser;

impl UserAgentParser for BasicUserAgentParser {
    fn parse(&self, header: &str) -> UserAgent {
        let mut agent = UserAgent {
            family: "Other".to_string(),
            major: "0".to_string(),
            minor: "0".to_string(),
            patch: "0".to_string(),
            os: "Other".to_string(),
            source: header.to_string(),
        };

        if let Some((rule, caps)) = BROWSERS
            .iter()
            .find_map(|rule| rule.pattern.captures(header).map(|caps| (rule, caps)))
        {
            agent.family = rule.name.to_string();
            agent.major = group(&caps, 1).unwrap_or_else(|| "0".to_string());
            agent.minor = group(&caps, 2).unwrap_or_else(|| "0".to_string());
            agent.patch = group(&caps, 3).unwrap_or_else(|| "0".to_string());
        }

        if let Some((rule, caps)) = SYSTEMS
            .iter()
            .find_map(|rule| rule.pattern.captures(header).map(|caps| (rule, caps)))
        {
            let version: Vec<String> = (1..=3).filter_map(|i| group(&caps, i)).collect();
            agent.os = if version.is_empty() {
                rule.name.to_string()
            } else {
                format!("{} {}", rule.name, version.join("."))
            };
        }

        agent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_chrome_on_mac() {
        let ua = BasicUserAgentParser.parse(
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
             (KHTML, like Gecko) Chrome/124.0.6367.91 Safari/537.36",
        );
        assert_eq!(ua.family, "Chrome");
        assert_eq!(ua.major, "124");
        assert_eq!(ua.minor, "0");
        assert_eq!(ua.patch, "6367");
        assert_eq!(ua.os, "Mac OS X 10.15.7");
    }

    #[test]
    fn test_parse_safari_on_iphone() {
        let ua = BasicUserAgentParser.parse(
            "Mozilla/5.0 (iPhone; CPU iPhone OS 17_4 like Mac OS X) AppleWebKit/605.1.15 \
             (KHTML, like Gecko) Version/17.4 Mobile/15E148 Safari/604.1",
        );
        assert_eq!(ua.family, "Safari");
        assert_eq!((ua.major.as_str(), ua.minor.as_str()), ("17", "4"));
        assert_eq!(ua.os, "iOS 17.4");
    }

    #[test]
    fn test_parse_firefox_on_windows() {
        let ua = BasicUserAgentParser
            .parse("Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0");
        assert_eq!(ua.family, "Firefox");
        assert_eq!(ua.major, "125");
        assert_eq!(ua.os, "Windows 10");
    }

    #[test]
    fn test_parse_curl_and_unknown() {
        let ua = BasicUserAgentParser.parse("curl/8.4.0");
        assert_eq!(ua.family, "curl");
        assert_eq!(ua.os, "Other");

        let ua = BasicUserAgentParser.parse("");
        assert_eq!(ua.family, "Other");
        assert_eq!(ua.to_value()["major"], "0");
    }
}
