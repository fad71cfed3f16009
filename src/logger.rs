use std::{
    collections::HashSet,
    fmt,
    future::Future,
    marker::PhantomData,
    mem,
    pin::Pin,
    rc::Rc,
    sync::Arc,
    task::{Context, Poll},
    time::Instant,
};

use bytes::Bytes;
use futures_core::ready;
use pin_project_lite::pin_project;
use regex::Regex;
use uuid::Uuid;

use actix_service::{Service, Transform};
use actix_utils::future::{Ready, ready};
use actix_web::body::{BodySize, MessageBody};
use actix_web::dev::{ServiceRequest, ServiceResponse};
use actix_web::{Error, HttpMessage, Result};

use crate::config::{IncludesFn, SLoggerBuilder};
use crate::format::Format;
use crate::level::LevelFn;
use crate::record::{
    Assembler, Direction, ErrorSnapshot, LoggedBody, Record, RequestSnapshot, ResponseSnapshot,
};
use crate::redact::Redactor;
use crate::wrapper::Logger;

/// Middleware writing one access log entry per request.
///
/// Each entry is a structured [`Record`] plus a line rendered from the
/// configured format. By default the entry is written once the response body
/// has been sent (or dropped), at `info`, `warn` or `error` depending on the
/// status.
///
/// # Examples
/// ```rust
/// use actix_web::App;
/// use actix_web_middleware_accesslog::SLogger;
///
/// let app = App::new()
///     .wrap(SLogger::default());
/// ```
pub struct SLogger(Rc<Inner>);

pub(crate) struct Inner {
    pub(crate) logger: Arc<dyn Logger>,
    pub(crate) format: Format,
    pub(crate) assembler: Assembler,
    pub(crate) level_fn: LevelFn,
    pub(crate) redactor: Redactor,
    pub(crate) includes_fn: Option<IncludesFn>,
    pub(crate) gen_req_id: Option<GenReqId>,
    pub(crate) immediate: bool,
    pub(crate) skip: HashSet<String>,
    pub(crate) skip_regex: Vec<Regex>,
}

impl SLogger {
    pub fn builder() -> SLoggerBuilder {
        SLoggerBuilder::new()
    }

    pub(crate) fn from_inner(inner: Inner) -> Self {
        SLogger(Rc::new(inner))
    }

    #[cfg(test)]
    pub(crate) fn inner(&self) -> &Inner {
        &self.0
    }
}

impl Default for SLogger {
    /// Middleware with the default format, user agent parsing, UUID request
    /// ids and a [`RustLogger`](crate::RustLogger) backend.
    fn default() -> Self {
        SLoggerBuilder::new()
            .build()
            .expect("default configuration is valid")
    }
}

impl Clone for SLogger {
    fn clone(&self) -> Self {
        SLogger(Rc::clone(&self.0))
    }
}

impl<S, B> Transform<S, ServiceRequest> for SLogger
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    B: MessageBody,
{
    type Response = ServiceResponse<StreamLog<B>>;
    type Error = Error;
    type Transform = SLoggerMiddlewareService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(SLoggerMiddlewareService {
            service,
            inner: Rc::clone(&self.0),
        }))
    }
}

/// Request id generated for a request. Example: 7b77f3f1-8e15-4b6a-9b3f-7f4b6f4b6f4b.
///
/// Stored in the request extensions by the default generator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RequestId(Uuid);

impl RequestId {
    pub(crate) fn new() -> Self {
        #[cfg(not(feature = "uuid_v7"))]
        {
            Self(Uuid::new_v4())
        }
        #[cfg(feature = "uuid_v7")]
        {
            Self(Uuid::now_v7())
        }
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0.as_hyphenated(), f)
    }
}

/// Logger bound to the current request, stored in the request extensions.
///
/// ```rust
/// use actix_web::{HttpMessage, HttpRequest};
/// use actix_web_middleware_accesslog::{Logger, RequestLogger};
///
/// async fn handler(req: HttpRequest) -> &'static str {
///     if let Some(logger) = req.extensions().get::<RequestLogger>() {
///         logger.0.write(log::Level::Debug, None, "handling request");
///     }
///     "ok"
/// }
/// ```
#[derive(Clone)]
pub struct RequestLogger(pub Arc<dyn Logger>);

#[derive(Clone)]
pub(crate) enum GenReqId {
    Uuid,
    #[cfg(feature = "tracing-request-id")]
    Tracing,
    Custom(Rc<dyn Fn(&ServiceRequest) -> String>),
}

impl GenReqId {
    fn generate(&self, req: &ServiceRequest) -> String {
        match self {
            GenReqId::Uuid => {
                let id = RequestId::new();
                req.extensions_mut().insert(id);
                id.to_string()
            }
            #[cfg(feature = "tracing-request-id")]
            GenReqId::Tracing => {
                let id = req
                    .extensions()
                    .get::<tracing_actix_web::RequestId>()
                    .map(|id| id.to_string());
                match id {
                    Some(id) => id,
                    None => GenReqId::Uuid.generate(req),
                }
            }
            GenReqId::Custom(generate) => generate(req),
        }
    }
}

/// Everything needed to write the entry for one request.
pub(crate) struct Exchange {
    inner: Rc<Inner>,
    logger: Arc<dyn Logger>,
    request: RequestSnapshot,
    start: Instant,
}

impl Exchange {
    fn emit(&self, response: &ResponseSnapshot, err: Option<&ErrorSnapshot>, direction: Direction) {
        let inner = &self.inner;
        let serializers = self.logger.serializers();
        let record = inner.assembler.assemble(
            &self.request,
            response,
            err,
            self.start.elapsed(),
            direction,
            &serializers,
        );

        let level_name = (inner.level_fn)(response.status, err, &record);
        let level = self.logger.level(&level_name).unwrap_or(log::Level::Info);

        let extra = inner
            .includes_fn
            .as_ref()
            .and_then(|includes| includes(&self.request, response));
        let json = inner.redactor.redact(&record, extra);
        let message = inner.format.render(&record);

        self.logger.write(level, json.as_ref(), &message);
    }
}

/// Signals that end an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Signal {
    /// Body fully sent, with the number of bytes streamed.
    Finish(u64),
    /// Body dropped, finished or not.
    Close,
}

pub(crate) struct Armed {
    exchange: Exchange,
    response: ResponseSnapshot,
    error: Option<ErrorSnapshot>,
}

/// Waits for the first of the finish/close signals, then writes once.
pub(crate) enum Emission {
    Armed(Box<Armed>),
    Fired,
}

impl Emission {
    /// Returns whether this signal wrote the entry.
    pub(crate) fn signal(&mut self, signal: Signal) -> bool {
        match mem::replace(self, Emission::Fired) {
            Emission::Armed(armed) => {
                let Armed {
                    exchange,
                    mut response,
                    error,
                } = *armed;
                if let Signal::Finish(size) = signal {
                    response.fill_content_length(size);
                }
                exchange.emit(&response, error.as_ref(), Direction::Outgoing);
                true
            }
            Emission::Fired => false,
        }
    }
}

pin_project! {
    pub struct StreamLog<B> {
        #[pin]
        body: B,
        emission: Emission,
        size: u64,
    }

    impl<B> PinnedDrop for StreamLog<B> {
        fn drop(this: Pin<&mut Self>) {
            let this = this.project();
            this.emission.signal(Signal::Close);
        }
    }
}

impl<B: MessageBody> MessageBody for StreamLog<B> {
    type Error = B::Error;

    #[inline]
    fn size(&self) -> BodySize {
        self.body.size()
    }

    fn poll_next(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Bytes, Self::Error>>> {
        let this = self.project();

        match ready!(this.body.poll_next(cx)) {
            Some(Ok(chunk)) => {
                *this.size += chunk.len() as u64;
                Poll::Ready(Some(Ok(chunk)))
            }
            Some(Err(err)) => Poll::Ready(Some(Err(err))),
            None => {
                this.emission.signal(Signal::Finish(*this.size));
                Poll::Ready(None)
            }
        }
    }
}

/// Logger middleware service.
pub struct SLoggerMiddlewareService<S> {
    inner: Rc<Inner>,
    service: S,
}

impl<S> SLoggerMiddlewareService<S> {
    fn skipped(&self, path: &str) -> bool {
        self.inner.skip.contains(path) || self.inner.skip_regex.iter().any(|r| r.is_match(path))
    }
}

impl<S, B> Service<ServiceRequest> for SLoggerMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    B: MessageBody,
{
    type Response = ServiceResponse<StreamLog<B>>;
    type Error = Error;
    type Future = SLoggerResponse<S, B>;

    actix_service::forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        if self.skipped(req.path()) {
            return SLoggerResponse {
                fut: self.service.call(req),
                exchange: None,
                _phantom: PhantomData,
            };
        }

        let start = Instant::now();
        let logger = match self.inner.gen_req_id.as_ref().map(|g| g.generate(&req)) {
            Some(id) => self.inner.logger.child(&[("req_id", id.as_str())]),
            None => Arc::clone(&self.inner.logger),
        };
        req.extensions_mut()
            .insert(RequestLogger(Arc::clone(&logger)));

        let exchange = Exchange {
            inner: Rc::clone(&self.inner),
            logger,
            request: RequestSnapshot::from_request(&req),
            start,
        };

        let exchange = if self.inner.immediate {
            exchange.emit(&ResponseSnapshot::pending(), None, Direction::Incoming);
            None
        } else {
            Some(exchange)
        };

        SLoggerResponse {
            fut: self.service.call(req),
            exchange,
            _phantom: PhantomData,
        }
    }
}

pin_project! {
    pub struct SLoggerResponse<S, B>
    where
        B: MessageBody,
        S: Service<ServiceRequest>,
    {
        #[pin]
        fut: S::Future,
        exchange: Option<Exchange>,
        _phantom: PhantomData<B>,
    }

    impl<S, B> PinnedDrop for SLoggerResponse<S, B>
    where
        B: MessageBody,
        S: Service<ServiceRequest>,
    {
        fn drop(this: Pin<&mut Self>) {
            let this = this.project();
            // Dropped before the inner service answered: the connection closed.
            if let Some(exchange) = this.exchange.take() {
                Emission::Armed(Box::new(Armed {
                    exchange,
                    response: ResponseSnapshot::pending(),
                    error: None,
                }))
                .signal(Signal::Close);
            }
        }
    }
}

impl<S, B> Future for SLoggerResponse<S, B>
where
    B: MessageBody,
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
{
    type Output = Result<ServiceResponse<StreamLog<B>>, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();

        let res = match ready!(this.fut.poll(cx)) {
            Ok(res) => res,
            Err(err) => {
                if let Some(exchange) = this.exchange.take() {
                    let error = ErrorSnapshot::from_error(&err);
                    let response = ResponseSnapshot {
                        status: error.status,
                        headers: Record::new(),
                    };
                    exchange.emit(&response, Some(&error), Direction::Outgoing);
                }
                return Poll::Ready(Err(err));
            }
        };

        if let Some(error) = res.response().error() {
            log::debug!("Error in response: {:?}", error);
        }

        let emission = match this.exchange.take() {
            Some(mut exchange) => {
                if let Some(body) = res.request().extensions().get::<LoggedBody>() {
                    exchange.request.body = body.0.clone();
                }
                Emission::Armed(Box::new(Armed {
                    exchange,
                    response: ResponseSnapshot::from_response(res.response()),
                    error: res.response().error().map(ErrorSnapshot::from_error),
                }))
            }
            None => Emission::Fired,
        };

        Poll::Ready(Ok(res.map_body(move |_, body| StreamLog {
            body,
            emission,
            size: 0,
        })))
    }
}
