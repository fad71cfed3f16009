//! Actix-web middleware for access logs with format strings and field redaction.
//! Every request produces one structured record and one human readable line,
//! written through a pluggable backend (the `log` crate by default).
//!
//! # Examples:
//! ## By default middleware writes through the standard `log` crate.
//! ```bash
//! cargo add actix-web-middleware-accesslog
//! ```
//! Example usage with standard `log` crate and `structured_logger` crate:
//! ```rust
//! use actix_web::{web, App, HttpServer, main};
//! use actix_web_middleware_accesslog::SLogger;
//! use tokio;
//! use structured_logger::{Builder, async_json::new_writer, unix_ms};
//!
//! #[actix_web::main] // or #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     Builder::new()
//!         .with_target_writer("*", new_writer(tokio::io::stdout()))
//!         .init();
//!
//!     HttpServer::new(|| {
//!         App::new()
//!             .wrap(SLogger::default())
//!             .route("/", web::get().to(|| async { "Hello world!" }))
//!     })
//!     .bind("127.0.0.1:8080")?;
//!     Ok(())
//! }
//! ```
//! The default line looks like:
//! ```text
//! 127.0.0.1 <-- GET / HTTP/1.1 200 12 - curl 8.4 Other 0.3241 ms
//! ```
//!
//! # Configuration
//!
//! ## Format
//!
//! The line is rendered from a format string. `:name` inserts a record field,
//! `:name[key]` a key inside it. Missing values render as `-` (or `0` for
//! numeric fields).
//!
//! ```rust
//! use actix_web_middleware_accesslog::SLogger;
//!
//! let logger = SLogger::builder()
//!     .format(":method :url :status-code :req-headers[host] :response-time ms")
//!     .build()
//!     .unwrap();
//! ```
//!
//! ## Redaction
//!
//! Leave fields out of the structured record, or hide values inside it:
//!
//! ```rust
//! use actix_web_middleware_accesslog::SLogger;
//!
//! let logger = SLogger::builder()
//!     .excludes(["req", "res", "req-headers"])
//!     .obfuscate("body.password")
//!     .obfuscate("res-headers.set-cookie")
//!     .obfuscate_placeholder("***")
//!     .build()
//!     .unwrap();
//! ```
//!
//! Excluding `"*"` writes only the line.
//!
//! ## Timing
//!
//! Entries are written when the response body has been sent, or when it is
//! dropped early, whichever comes first. `immediate(true)` writes when the
//! request arrives instead.
//!
//! ## Path Exclusions
//!
//! ```rust
//! use actix_web_middleware_accesslog::SLogger;
//!
//! let logger = SLogger::builder()
//!     .skip_path("/health")
//!     .skip_path_regex(r"^/assets/.*")
//!     .build()
//!     .unwrap();
//! ```
//!
//! # Record Fields
//!
//! - `remote-address`, `ip` - Client IP address
//! - `method` - HTTP method
//! - `url` - Request path and query
//! - `referer` - `Referer` (or `Referrer`) header
//! - `user-agent` - Parsed user agent (`family`, `major`, `minor`, `patch`, `os`) or the raw header
//! - `body`, `short-body` - Request payload published as [`LoggedBody`] and its first 20 characters
//! - `http-version` - Example: 1.1
//! - `response-time` - Milliseconds, `response-hrtime` - `[seconds, nanoseconds]`
//! - `status-code` - Response status code
//! - `req-headers`, `res-headers` - Header maps
//! - `req`, `res`, `err` - Serialized request, response and error
//! - `incoming` - `-->` for immediate entries, `<--` otherwise
//! - `datetime` - Request time in RFC3339 format
//!
//! # Feature Flags
//!
//! - `tracing-request-id` - Reuse `tracing-actix-web`'s request ID
//! - `uuid_v7` - Use UUIDv7 instead of UUIDv4 for request IDs

mod config;
mod format;
mod level;
mod logger;
mod record;
mod redact;
mod user_agent;
mod wrapper;

pub use crate::config::{ConfigError, IncludesFn, SLoggerBuilder};
pub use crate::format::{DEFAULT_FORMAT, Format, Template};
pub use crate::level::{LevelFn, default_level};
pub use crate::logger::{
    RequestId, RequestLogger, SLogger, SLoggerMiddlewareService, SLoggerResponse, StreamLog,
};
pub use crate::record::{
    Assembler, ClientAddr, Direction, ErrorSnapshot, LOOPBACK, LoggedBody, Record,
    RequestSnapshot, ResponseSnapshot, Serializers, short_body, std_err, std_req, std_res,
};
pub use crate::redact::{DEFAULT_PLACEHOLDER, Excludes, FieldPath, PathSegment, Redactor};
pub use crate::user_agent::{BasicUserAgentParser, UserAgent, UserAgentParser};
pub use crate::wrapper::{AppSettings, Logger, LoggerOptions, RustLogger};
