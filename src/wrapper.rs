use std::{borrow::Cow, sync::Arc};

use serde_json::Value;

use crate::record::{Record, Serializers};

/// Backend the access log is written to.
///
/// A backend hands out child loggers bound to per-request context and knows
/// which level names it can write. [`RustLogger`] writes through the `log`
/// facade; implement this trait to send records anywhere else.
pub trait Logger: Send + Sync {
    /// Logger with `bindings` attached to every record it writes.
    fn child(&self, bindings: &[(&str, &str)]) -> Arc<dyn Logger>;

    /// Level for a level name, `None` when the backend has no such level.
    fn level(&self, name: &str) -> Option<log::Level> {
        name.parse().ok()
    }

    /// `record` is `None` when every field was excluded.
    fn write(&self, level: log::Level, record: Option<&Record>, message: &str);

    fn serializers(&self) -> Serializers {
        Serializers::default()
    }
}

/// Application metadata used to name the backend when no name is given.
#[derive(Debug, Clone, Default)]
pub struct AppSettings {
    pub shortname: Option<String>,
    pub name: Option<String>,
    pub title: Option<String>,
}

/// Options for the backend built when no logger is supplied.
#[derive(Debug, Clone)]
pub struct LoggerOptions {
    pub name: Option<String>,
    pub app: AppSettings,
    pub target: Cow<'static, str>,
    pub serializers: Serializers,
}

impl Default for LoggerOptions {
    fn default() -> Self {
        LoggerOptions {
            name: None,
            app: AppSettings::default(),
            target: Cow::Borrowed("actix_web_middleware_accesslog::logger"),
            serializers: Serializers::default(),
        }
    }
}

impl LoggerOptions {
    /// Explicit name, then the app's short name, name and title.
    pub fn resolve_name(&self) -> String {
        [
            &self.name,
            &self.app.shortname,
            &self.app.name,
            &self.app.title,
        ]
        .into_iter()
        .flatten()
        .find(|name| !name.is_empty())
        .cloned()
        .unwrap_or_else(|| "actix-web".to_string())
    }
}

/// [`Logger`] over the `log` crate.
///
/// Bindings and record fields become key-values of a `log::Record`, the
/// rendered line becomes its message.
#[derive(Debug, Clone)]
pub struct RustLogger {
    name: String,
    target: Cow<'static, str>,
    bindings: Vec<(String, String)>,
    serializers: Serializers,
}

impl RustLogger {
    pub fn new(options: LoggerOptions) -> Self {
        RustLogger {
            name: options.resolve_name(),
            target: options.target,
            bindings: Vec::new(),
            serializers: options.serializers,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bindings(&self) -> &[(String, String)] {
        &self.bindings
    }

    pub fn with_bindings(&self, bindings: &[(&str, &str)]) -> RustLogger {
        let mut child = self.clone();
        child.bindings.extend(
            bindings
                .iter()
                .map(|(key, value)| (key.to_string(), value.to_string())),
        );
        child
    }
}

fn kv_value(value: &Value) -> log::kv::Value<'_> {
    match value {
        Value::String(s) => log::kv::Value::from(s.as_str()),
        Value::Null => log::kv::Value::null(),
        other => log::kv::Value::from_display(other),
    }
}

impl Logger for RustLogger {
    fn child(&self, bindings: &[(&str, &str)]) -> Arc<dyn Logger> {
        Arc::new(self.with_bindings(bindings))
    }

    fn write(&self, level: log::Level, record: Option<&Record>, message: &str) {
        let mut kvs: Vec<(&str, log::kv::Value)> = Vec::with_capacity(
            1 + self.bindings.len() + record.map_or(0, |record| record.len()),
        );
        kvs.push(("name", log::kv::Value::from(self.name.as_str())));
        kvs.extend(
            self.bindings
                .iter()
                .map(|(key, value)| (key.as_str(), log::kv::Value::from(value.as_str()))),
        );
        if let Some(record) = record {
            kvs.extend(
                record
                    .iter()
                    .map(|(key, value)| (key.as_str(), kv_value(value))),
            );
        }
        let kvs = kvs.as_slice();

        log::logger().log(
            &log::Record::builder()
                .args(format_args!("{message}"))
                .level(level)
                .target(self.target.as_ref())
                .module_path_static(Some(module_path!()))
                .key_values(&kvs)
                .build(),
        );
    }

    fn serializers(&self) -> Serializers {
        self.serializers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::kv::Source;
    use std::sync::{Mutex, Once};

    #[test]
    fn test_resolve_name() {
        assert_eq!(LoggerOptions::default().resolve_name(), "actix-web");

        let options = LoggerOptions {
            app: AppSettings {
                shortname: None,
                name: Some("shop".to_string()),
                title: Some("The Shop".to_string()),
            },
            ..LoggerOptions::default()
        };
        assert_eq!(options.resolve_name(), "shop");

        let options = LoggerOptions {
            name: Some("api".to_string()),
            ..options
        };
        assert_eq!(options.resolve_name(), "api");
    }

    #[test]
    fn test_level_names() {
        let logger = RustLogger::new(LoggerOptions::default());
        assert_eq!(logger.level("error"), Some(log::Level::Error));
        assert_eq!(logger.level("warn"), Some(log::Level::Warn));
        assert_eq!(logger.level("info"), Some(log::Level::Info));
        assert_eq!(logger.level("fatal"), None);
    }

    #[test]
    fn test_child_bindings() {
        let logger = RustLogger::new(LoggerOptions {
            name: Some("api".to_string()),
            ..LoggerOptions::default()
        });
        let child = logger.with_bindings(&[("req_id", "1")]);
        let grandchild = child.with_bindings(&[("tenant", "a")]);

        assert!(logger.bindings().is_empty());
        assert_eq!(child.bindings(), &[("req_id".to_string(), "1".to_string())]);
        assert_eq!(grandchild.bindings().len(), 2);
        assert_eq!(grandchild.name(), "api");
    }

    const TARGET: &str = "accesslog::wrapper::tests";

    #[derive(Debug, Clone)]
    struct Written {
        level: log::Level,
        target: String,
        message: String,
        kvs: Vec<(String, String)>,
    }

    struct KvCollector(Vec<(String, String)>);

    impl<'kvs> log::kv::VisitSource<'kvs> for KvCollector {
        fn visit_pair(
            &mut self,
            key: log::kv::Key<'kvs>,
            value: log::kv::Value<'kvs>,
        ) -> Result<(), log::kv::Error> {
            self.0.push((key.to_string(), value.to_string()));
            Ok(())
        }
    }

    static WRITTEN: Mutex<Vec<Written>> = Mutex::new(Vec::new());

    struct CaptureLog;

    impl log::Log for CaptureLog {
        fn enabled(&self, _: &log::Metadata) -> bool {
            true
        }

        fn log(&self, record: &log::Record) {
            if record.target() != TARGET {
                return;
            }
            let mut kvs = KvCollector(Vec::new());
            let _ = record.key_values().visit(&mut kvs);
            WRITTEN.lock().unwrap().push(Written {
                level: record.level(),
                target: record.target().to_string(),
                message: record.args().to_string(),
                kvs: kvs.0,
            });
        }

        fn flush(&self) {}
    }

    static CAPTURE_LOG: CaptureLog = CaptureLog;
    static INIT: Once = Once::new();

    fn written() -> Vec<Written> {
        INIT.call_once(|| {
            let _ = log::set_logger(&CAPTURE_LOG);
            log::set_max_level(log::LevelFilter::Trace);
        });
        WRITTEN.lock().unwrap().clone()
    }

    fn kv<'a>(written: &'a Written, key: &str) -> Option<&'a str> {
        written
            .kvs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn test_write_through_log_facade() {
        assert!(written().is_empty());

        let logger = RustLogger::new(LoggerOptions {
            name: Some("api".to_string()),
            target: Cow::Borrowed(TARGET),
            ..LoggerOptions::default()
        })
        .child(&[("req_id", "1")]);

        let mut record = Record::new();
        record.insert("status-code".to_string(), Value::from(200));
        record.insert("method".to_string(), Value::from("GET"));
        record.insert("req-headers".to_string(), serde_json::json!({"host": "a"}));
        logger.write(log::Level::Info, Some(&record), "GET / 200");
        logger.write(log::Level::Warn, None, "GET / 404");

        let written = written();
        assert_eq!(written.len(), 2);

        let full = &written[0];
        assert_eq!(full.level, log::Level::Info);
        assert_eq!(full.target, TARGET);
        assert_eq!(full.message, "GET / 200");
        assert_eq!(kv(full, "name"), Some("api"));
        assert_eq!(kv(full, "req_id"), Some("1"));
        assert_eq!(kv(full, "status-code"), Some("200"));
        assert_eq!(kv(full, "method"), Some("GET"));
        assert_eq!(kv(full, "req-headers"), Some(r#"{"host":"a"}"#));
        assert_eq!(full.kvs.len(), 5);

        let bare = &written[1];
        assert_eq!(bare.level, log::Level::Warn);
        assert_eq!(bare.message, "GET / 404");
        assert_eq!(
            bare.kvs,
            vec![
                ("name".to_string(), "api".to_string()),
                ("req_id".to_string(), "1".to_string()),
            ]
        );
    }
}
