use std::{borrow::Cow, collections::HashSet, rc::Rc, sync::Arc};

use actix_web::dev::ServiceRequest;
use regex::Regex;
use thiserror::Error;

use crate::format::{DEFAULT_FORMAT, Format, Template};
use crate::level::{LevelFn, default_level};
use crate::logger::{GenReqId, Inner, SLogger};
use crate::record::{
    Assembler, ErrorSnapshot, Record, RequestSnapshot, ResponseSnapshot, Serializers,
};
use crate::redact::{DEFAULT_PLACEHOLDER, Excludes, FieldPath, Redactor};
use crate::user_agent::{BasicUserAgentParser, UserAgentParser};
use crate::wrapper::{AppSettings, Logger, LoggerOptions, RustLogger};

/// Extra fields merged into the structured record before obfuscation.
pub type IncludesFn = Rc<dyn Fn(&RequestSnapshot, &ResponseSnapshot) -> Option<Record>>;

/// Invalid middleware configuration, reported by [`SLoggerBuilder::build`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unclosed directive at byte {position} in format {format:?}")]
    UnbalancedDirective { format: String, position: usize },

    #[error("invalid obfuscation path {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("invalid path pattern {pattern:?}: {reason}")]
    InvalidRegex { pattern: String, reason: String },
}

enum FormatSource {
    Template(String),
    Custom(Rc<dyn Fn(&Record) -> String>),
}

/// Collects the middleware options. Everything is validated once in
/// [`build`](SLoggerBuilder::build).
///
/// ```rust
/// use actix_web_middleware_accesslog::SLogger;
///
/// let logger = SLogger::builder()
///     .format(":method :url :status-code :response-time ms")
///     .excludes(["req", "res", "req-headers"])
///     .obfuscate("body.password")
///     .skip_path("/health")
///     .build()
///     .expect("valid access log configuration");
/// ```
pub struct SLoggerBuilder {
    logger: Option<Arc<dyn Logger>>,
    logger_options: LoggerOptions,
    format: FormatSource,
    parse_ua: bool,
    user_agent_parser: Rc<dyn UserAgentParser>,
    immediate: bool,
    level_fn: LevelFn,
    excludes: Option<Excludes>,
    obfuscate: Vec<String>,
    placeholder: String,
    includes_fn: Option<IncludesFn>,
    gen_req_id: Option<GenReqId>,
    skip: HashSet<String>,
    skip_regex: Vec<String>,
}

impl Default for SLoggerBuilder {
    fn default() -> Self {
        SLoggerBuilder {
            logger: None,
            logger_options: LoggerOptions::default(),
            format: FormatSource::Template(DEFAULT_FORMAT.to_string()),
            parse_ua: true,
            user_agent_parser: Rc::new(BasicUserAgentParser),
            immediate: false,
            level_fn: Rc::new(default_level),
            excludes: None,
            obfuscate: Vec::new(),
            placeholder: DEFAULT_PLACEHOLDER.to_string(),
            includes_fn: None,
            gen_req_id: Some(GenReqId::Uuid),
            skip: HashSet::new(),
            skip_regex: Vec::new(),
        }
    }
}

impl SLoggerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use an existing backend instead of building a [`RustLogger`].
    pub fn logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn format(mut self, format: impl Into<String>) -> Self {
        self.format = FormatSource::Template(format.into());
        self
    }

    /// Render the message with a function instead of a format string.
    pub fn format_fn<F>(mut self, format: F) -> Self
    where
        F: Fn(&Record) -> String + 'static,
    {
        self.format = FormatSource::Custom(Rc::new(format));
        self
    }

    /// Report `user-agent` as family/version/OS (default) or as the raw header.
    pub fn parse_ua(mut self, parse: bool) -> Self {
        self.parse_ua = parse;
        self
    }

    pub fn user_agent_parser<P>(mut self, parser: P) -> Self
    where
        P: UserAgentParser + 'static,
    {
        self.user_agent_parser = Rc::new(parser);
        self
    }

    /// Write when the request arrives instead of when the response completes.
    pub fn immediate(mut self, immediate: bool) -> Self {
        self.immediate = immediate;
        self
    }

    pub fn level_fn<F>(mut self, level_fn: F) -> Self
    where
        F: Fn(u16, Option<&ErrorSnapshot>, &Record) -> Cow<'static, str> + 'static,
    {
        self.level_fn = Rc::new(level_fn);
        self
    }

    /// Fields left out of the structured record; `"*"` leaves out all of them.
    pub fn excludes<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excludes = Some(Excludes::from_names(names));
        self
    }

    pub fn exclude_field(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if name == "*" {
            return self.exclude_all();
        }
        match self
            .excludes
            .get_or_insert_with(|| Excludes::Fields(HashSet::new()))
        {
            Excludes::All => {}
            Excludes::Fields(fields) => {
                fields.insert(name);
            }
        }
        self
    }

    /// Write only the rendered line.
    pub fn exclude_all(mut self) -> Self {
        self.excludes = Some(Excludes::All);
        self
    }

    /// Replace the value at `path` with the placeholder when present.
    pub fn obfuscate(mut self, path: impl Into<String>) -> Self {
        self.obfuscate.push(path.into());
        self
    }

    pub fn obfuscate_placeholder(mut self, placeholder: impl Into<String>) -> Self {
        self.placeholder = placeholder.into();
        self
    }

    pub fn includes_fn<F>(mut self, includes: F) -> Self
    where
        F: Fn(&RequestSnapshot, &ResponseSnapshot) -> Option<Record> + 'static,
    {
        self.includes_fn = Some(Rc::new(includes));
        self
    }

    /// Generate request ids with `generate`. The id is bound to the
    /// per-request logger as `req_id`.
    pub fn gen_req_id<F>(mut self, generate: F) -> Self
    where
        F: Fn(&ServiceRequest) -> String + 'static,
    {
        self.gen_req_id = Some(GenReqId::Custom(Rc::new(generate)));
        self
    }

    /// Use the request id set by `tracing_actix_web::TracingLogger`, falling
    /// back to a generated one.
    #[cfg(feature = "tracing-request-id")]
    pub fn tracing_request_id(mut self) -> Self {
        self.gen_req_id = Some(GenReqId::Tracing);
        self
    }

    /// No request id; requests share the parent logger.
    pub fn disable_req_id(mut self) -> Self {
        self.gen_req_id = None;
        self
    }

    /// Ignore and do not log access info for specified path.
    pub fn skip_path(mut self, path: impl Into<String>) -> Self {
        self.skip.insert(path.into());
        self
    }

    /// Ignore and do not log access info for paths that match regex.
    pub fn skip_path_regex(mut self, pattern: impl Into<String>) -> Self {
        self.skip_regex.push(pattern.into());
        self
    }

    /// Sets the `log` target of the default backend.
    ///
    /// By default it is `actix_web_middleware_accesslog::logger`:
    /// ```diff
    /// - [2015-10-21T07:28:00Z INFO  actix_web_middleware_accesslog::logger] 127.0.0.1 <-- GET / HTTP/1.1 200 12 ...
    /// + [2015-10-21T07:28:00Z INFO  http_access] 127.0.0.1 <-- GET / HTTP/1.1 200 12 ...
    /// ```
    pub fn log_target(mut self, target: impl Into<Cow<'static, str>>) -> Self {
        self.logger_options.target = target.into();
        self
    }

    /// Name of the default backend, written as the `name` key.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.logger_options.name = Some(name.into());
        self
    }

    pub fn app_settings(mut self, app: AppSettings) -> Self {
        self.logger_options.app = app;
        self
    }

    pub fn serializers(mut self, serializers: Serializers) -> Self {
        self.logger_options.serializers = serializers;
        self
    }

    pub fn build(self) -> Result<SLogger, ConfigError> {
        let format = match self.format {
            FormatSource::Template(format) => Format::Template(Template::compile(&format)?),
            FormatSource::Custom(render) => Format::Custom(render),
        };

        let obfuscate = self
            .obfuscate
            .iter()
            .map(|path| path.parse::<FieldPath>())
            .collect::<Result<Vec<_>, _>>()?;

        let skip_regex = self
            .skip_regex
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|err| ConfigError::InvalidRegex {
                    pattern: pattern.clone(),
                    reason: err.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let logger = match self.logger {
            Some(logger) => logger,
            None => Arc::new(RustLogger::new(self.logger_options)),
        };

        Ok(SLogger::from_inner(Inner {
            logger,
            format,
            assembler: Assembler::new(self.parse_ua.then_some(self.user_agent_parser)),
            level_fn: self.level_fn,
            redactor: Redactor {
                excludes: self.excludes,
                obfuscate,
                placeholder: self.placeholder,
            },
            includes_fn: self.includes_fn,
            gen_req_id: self.gen_req_id,
            immediate: self.immediate,
            skip: self.skip,
            skip_regex,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let logger = SLogger::builder().build().unwrap();
        let inner = logger.inner();
        assert!(!inner.immediate);
        assert!(inner.assembler.user_agent.is_some());
        assert!(inner.redactor.excludes.is_none());
        assert_eq!(inner.redactor.placeholder, "[HIDDEN]");
        assert!(matches!(inner.gen_req_id, Some(GenReqId::Uuid)));
        assert!(inner.skip.is_empty());
    }

    #[test]
    fn test_builder_custom() {
        let logger = SLogger::builder()
            .parse_ua(false)
            .immediate(true)
            .exclude_field("req")
            .exclude_field("res")
            .obfuscate("req-headers.authorization")
            .obfuscate_placeholder("***")
            .disable_req_id()
            .skip_path("/health")
            .skip_path_regex("^/api/v1/.*")
            .build()
            .unwrap();
        let inner = logger.inner();

        assert!(inner.immediate);
        assert!(inner.assembler.user_agent.is_none());
        assert_eq!(
            inner.redactor.excludes,
            Some(Excludes::from_names(["req", "res"]))
        );
        assert_eq!(inner.redactor.obfuscate.len(), 1);
        assert_eq!(inner.redactor.placeholder, "***");
        assert!(inner.gen_req_id.is_none());
        assert!(inner.skip.contains("/health"));
        assert!(inner.skip_regex[0].is_match("/api/v1/users"));
        assert!(!inner.skip_regex[0].is_match("/api/v2/users"));
    }

    #[test]
    fn test_exclude_field_after_wildcard() {
        let logger = SLogger::builder()
            .exclude_all()
            .exclude_field("body")
            .build()
            .unwrap();
        assert_eq!(logger.inner().redactor.excludes, Some(Excludes::All));
    }

    #[test]
    fn test_builder_rejects_bad_config() {
        let err = SLogger::builder()
            .format(":method :user-agent[family")
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, ConfigError::UnbalancedDirective { .. }));

        let err = SLogger::builder()
            .obfuscate("body.")
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, ConfigError::InvalidPath { .. }));
        assert!(err.to_string().contains("body."));

        let err = SLogger::builder()
            .skip_path_regex("(")
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, ConfigError::InvalidRegex { .. }));
    }
}
