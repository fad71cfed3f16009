use std::{fmt, rc::Rc, time::Duration};

use actix_web::body::{BodySize, MessageBody};
use actix_web::dev::ServiceRequest;
use actix_web::http::header::{CONTENT_LENGTH, HeaderMap};
use actix_web::{HttpMessage, HttpResponse};
use serde_json::{Map, Value, json};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

use crate::user_agent::UserAgentParser;

/// Metadata describing one exchange, keyed by field name in insertion order.
pub type Record = Map<String, Value>;

/// Reported when no address is known for the client.
pub const LOOPBACK: &str = "127.0.0.1";

const SHORT_BODY_LEN: usize = 20;

/// Request payload made visible to the access log.
///
/// The middleware cannot read a request body stream without consuming it, so
/// handlers or extractors that already parsed the payload publish it here:
///
/// ```rust
/// use actix_web::{HttpMessage, HttpRequest, web};
/// use actix_web_middleware_accesslog::LoggedBody;
///
/// async fn login(req: HttpRequest, form: web::Json<serde_json::Value>) -> &'static str {
///     req.extensions_mut().insert(LoggedBody(form.into_inner()));
///     "ok"
/// }
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct LoggedBody(pub Value);

/// Whether the record was written when the request came in or after the
/// response completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Incoming,
    Outgoing,
}

impl Direction {
    pub fn marker(self) -> &'static str {
        match self {
            Direction::Incoming => "-->",
            Direction::Outgoing => "<--",
        }
    }
}

/// Candidate client addresses, most specific first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientAddr {
    /// Address derived from the request itself (`Forwarded`, `X-Forwarded-For`).
    pub request_ip: Option<String>,
    /// Peer address of the connection.
    pub connection: Option<String>,
    pub socket: Option<String>,
    pub nested_socket: Option<String>,
}

impl ClientAddr {
    pub fn from_request(req: &ServiceRequest) -> Self {
        let info = req.connection_info();
        ClientAddr {
            request_ip: info.realip_remote_addr().map(str::to_string),
            connection: req.peer_addr().map(|addr| addr.ip().to_string()),
            socket: info.peer_addr().map(str::to_string),
            nested_socket: req.head().peer_addr.map(|addr| addr.to_string()),
        }
    }

    /// First non-empty candidate, or [`LOOPBACK`].
    pub fn resolve(&self) -> &str {
        [
            &self.request_ip,
            &self.connection,
            &self.socket,
            &self.nested_socket,
        ]
        .into_iter()
        .flatten()
        .map(String::as_str)
        .find(|addr| !addr.is_empty())
        .unwrap_or(LOOPBACK)
    }
}

pub(crate) fn headers_to_record(headers: &HeaderMap) -> Record {
    let mut record = Record::new();
    for (name, value) in headers.iter() {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        match record.get_mut(name.as_str()) {
            Some(Value::String(existing)) => {
                existing.push_str(", ");
                existing.push_str(&value);
            }
            _ => {
                record.insert(name.as_str().to_string(), Value::String(value));
            }
        }
    }
    record
}

fn version_parts(version: actix_http::Version) -> (u8, u8) {
    match version {
        actix_http::Version::HTTP_09 => (0, 9),
        actix_http::Version::HTTP_10 => (1, 0),
        actix_http::Version::HTTP_11 => (1, 1),
        actix_http::Version::HTTP_2 => (2, 0),
        actix_http::Version::HTTP_3 => (3, 0),
        _ => (1, 1),
    }
}

/// Request side of an exchange, captured when the middleware is entered.
#[derive(Debug, Clone)]
pub struct RequestSnapshot {
    pub method: String,
    pub url: String,
    pub version: (u8, u8),
    pub headers: Record,
    pub addr: ClientAddr,
    pub body: Value,
    pub received_at: OffsetDateTime,
}

impl RequestSnapshot {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        RequestSnapshot {
            method: method.into(),
            url: url.into(),
            version: (1, 1),
            headers: Record::new(),
            addr: ClientAddr::default(),
            body: Value::Null,
            received_at: OffsetDateTime::now_utc(),
        }
    }

    pub fn from_request(req: &ServiceRequest) -> Self {
        RequestSnapshot {
            method: req.method().to_string(),
            url: req
                .uri()
                .path_and_query()
                .map(|pq| pq.as_str().to_string())
                .unwrap_or_default(),
            version: version_parts(req.version()),
            headers: headers_to_record(req.headers()),
            addr: ClientAddr::from_request(req),
            body: req
                .extensions()
                .get::<LoggedBody>()
                .map(|body| body.0.clone())
                .unwrap_or(Value::Null),
            received_at: OffsetDateTime::now_utc(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .and_then(Value::as_str)
    }

    /// Request path and query, `-` when there is none.
    pub fn full_url(&self) -> String {
        if self.url.is_empty() {
            "-".to_string()
        } else {
            self.url.clone()
        }
    }

    pub fn referer(&self) -> &str {
        self.header("referer")
            .or_else(|| self.header("referrer"))
            .filter(|referer| !referer.is_empty())
            .unwrap_or("-")
    }

    pub fn http_version(&self) -> String {
        format!("{}.{}", self.version.0, self.version.1)
    }
}

/// Response side of an exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseSnapshot {
    pub status: u16,
    pub headers: Record,
}

impl ResponseSnapshot {
    /// State before the handler produced anything: `200` with no headers.
    pub fn pending() -> Self {
        ResponseSnapshot {
            status: 200,
            headers: Record::new(),
        }
    }

    pub fn from_response<B: MessageBody>(res: &HttpResponse<B>) -> Self {
        let mut snapshot = ResponseSnapshot {
            status: res.status().as_u16(),
            headers: headers_to_record(res.headers()),
        };
        if let BodySize::Sized(size) = res.body().size() {
            snapshot.fill_content_length(size);
        }
        snapshot
    }

    /// Sets `content-length` unless the handler already did.
    pub fn fill_content_length(&mut self, size: u64) {
        if !self.headers.contains_key(CONTENT_LENGTH.as_str()) {
            self.headers.insert(
                CONTENT_LENGTH.as_str().to_string(),
                Value::String(size.to_string()),
            );
        }
    }
}

/// Error attached to an exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorSnapshot {
    pub message: String,
    pub name: String,
    pub detail: String,
    pub status: u16,
}

impl ErrorSnapshot {
    pub fn new(message: impl Into<String>, name: impl Into<String>, status: u16) -> Self {
        let message = message.into();
        ErrorSnapshot {
            detail: message.clone(),
            message,
            name: name.into(),
            status,
        }
    }

    pub fn from_error(err: &actix_web::Error) -> Self {
        let status = err.as_response_error().status_code();
        ErrorSnapshot {
            message: err.to_string(),
            name: status.canonical_reason().unwrap_or("Error").to_string(),
            detail: format!("{err:?}"),
            status: status.as_u16(),
        }
    }
}

/// Converters for the `req`, `res` and `err` fields.
#[derive(Clone, Copy)]
pub struct Serializers {
    pub req: fn(&RequestSnapshot) -> Value,
    pub res: fn(&ResponseSnapshot) -> Value,
    pub err: fn(&ErrorSnapshot) -> Value,
}

impl fmt::Debug for Serializers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Serializers").finish_non_exhaustive()
    }
}

impl Default for Serializers {
    fn default() -> Self {
        Serializers {
            req: std_req,
            res: std_res,
            err: std_err,
        }
    }
}

pub fn std_req(req: &RequestSnapshot) -> Value {
    json!({
        "method": req.method,
        "url": req.full_url(),
        "headers": req.headers,
        "remoteAddress": req.addr.resolve(),
    })
}

pub fn std_res(res: &ResponseSnapshot) -> Value {
    json!({
        "statusCode": res.status,
        "header": res.headers,
    })
}

pub fn std_err(err: &ErrorSnapshot) -> Value {
    json!({
        "message": err.message,
        "name": err.name,
        "stack": err.detail,
    })
}

/// Body rendering cut to the first 20 characters. An absent body renders as
/// `undefined`.
pub fn short_body(body: &Value) -> String {
    match body {
        Value::Null => "undefined".to_string(),
        body => body.to_string().chars().take(SHORT_BODY_LEN).collect(),
    }
}

/// Builds the [`Record`] for one exchange.
#[derive(Clone, Default)]
pub struct Assembler {
    pub(crate) user_agent: Option<Rc<dyn UserAgentParser>>,
}

impl Assembler {
    pub fn new(user_agent: Option<Rc<dyn UserAgentParser>>) -> Self {
        Assembler { user_agent }
    }

    pub fn assemble(
        &self,
        req: &RequestSnapshot,
        res: &ResponseSnapshot,
        err: Option<&ErrorSnapshot>,
        elapsed: Duration,
        direction: Direction,
        serializers: &Serializers,
    ) -> Record {
        let ip = req.addr.resolve().to_string();
        let raw_agent = req.header("user-agent");
        let user_agent = match &self.user_agent {
            Some(parser) => parser.parse(raw_agent.unwrap_or_default()).to_value(),
            None => raw_agent.map_or(Value::Null, |ua| Value::String(ua.to_string())),
        };
        let response_time =
            elapsed.as_secs() as f64 * 1e3 + f64::from(elapsed.subsec_nanos()) / 1e6;

        let mut record = Record::new();
        record.insert("remote-address".into(), Value::String(ip.clone()));
        record.insert("ip".into(), Value::String(ip));
        record.insert("method".into(), Value::String(req.method.clone()));
        record.insert("url".into(), Value::String(req.full_url()));
        record.insert("referer".into(), Value::String(req.referer().to_string()));
        record.insert("user-agent".into(), user_agent);
        record.insert("body".into(), req.body.clone());
        record.insert("short-body".into(), Value::String(short_body(&req.body)));
        record.insert("http-version".into(), Value::String(req.http_version()));
        record.insert("response-time".into(), json!(response_time));
        record.insert(
            "response-hrtime".into(),
            json!([elapsed.as_secs(), elapsed.subsec_nanos()]),
        );
        record.insert("status-code".into(), json!(res.status));
        record.insert("req-headers".into(), Value::Object(req.headers.clone()));
        record.insert("res-headers".into(), Value::Object(res.headers.clone()));
        record.insert("req".into(), (serializers.req)(req));
        record.insert("res".into(), (serializers.res)(res));
        record.insert("incoming".into(), Value::String(direction.marker().to_string()));
        if let Ok(datetime) = req.received_at.format(&Rfc3339) {
            record.insert("datetime".into(), Value::String(datetime));
        }
        if let Some(err) = err {
            record.insert("err".into(), (serializers.err)(err));
        }
        record
    }
}
