//! Cancellable outbound HTTP calls made on behalf of the flag client.
//!
//! Every call is registered in a [`CancelScope`]. Aborting one call only
//! affects that call; cancelling the scope aborts every call it has issued and
//! every call issued afterwards.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

/// Per-call timeout applied by [`ReqwestRequestHandler`] unless overridden.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Request aborted")]
    Aborted,
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("invalid HTTP method: {0}")]
    InvalidMethod(String),
    #[error("invalid header: {0}")]
    InvalidHeader(String),
}

/// Raw response handed back to the flag client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status_code: u16,
    pub body: String,
    pub headers: HashMap<String, String>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

pub type ResponseFuture =
    Pin<Box<dyn Future<Output = Result<HttpResponse, TransportError>> + Send + 'static>>;

/// Issues outbound requests that can be aborted while in flight.
pub trait RequestHandler: Send + Sync {
    /// Start a request. The call is already running when this returns.
    fn make_request(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
        method: &str,
        body: Option<String>,
    ) -> AbortableRequest;
}

/// Aborts a single outstanding request.
#[derive(Debug, Clone)]
pub struct Canceller(Arc<watch::Sender<bool>>);

impl Canceller {
    pub fn abort(&self) {
        self.0.send_replace(true);
    }
}

/// A request that is in flight together with the means to abort it.
pub struct AbortableRequest {
    response: ResponseFuture,
    canceller: Canceller,
}

impl AbortableRequest {
    /// Run `request` on the runtime as a call registered in `scope`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<F>(scope: &CancelScope, request: F) -> Self
    where
        F: Future<Output = Result<HttpResponse, TransportError>> + Send + 'static,
    {
        let (tx, call_cancelled) = watch::channel(false);
        let scope_cancelled = scope.cancelled.subscribe();
        let guard = InFlight::enter(scope.in_flight.clone());

        let handle = tokio::spawn(async move {
            let _guard = guard;
            tokio::select! {
                biased;
                _ = cancelled(scope_cancelled) => Err(TransportError::Aborted),
                _ = cancelled(call_cancelled) => Err(TransportError::Aborted),
                result = request => result,
            }
        });

        let response = Box::pin(async move {
            match handle.await {
                Ok(result) => result,
                Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
                Err(_) => Err(TransportError::Aborted),
            }
        });

        Self {
            response,
            canceller: Canceller(Arc::new(tx)),
        }
    }

    /// A request that failed before anything was sent.
    pub fn failed(error: TransportError) -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            response: Box::pin(std::future::ready(Err(error))),
            canceller: Canceller(Arc::new(tx)),
        }
    }

    pub fn abort(&self) {
        self.canceller.abort();
    }

    pub fn canceller(&self) -> Canceller {
        self.canceller.clone()
    }

    /// Wait for the outcome of the request.
    pub async fn response(self) -> Result<HttpResponse, TransportError> {
        let Self {
            response,
            canceller: _canceller,
        } = self;
        response.await
    }
}

/// Resolves once the flag behind `rx` is raised; never resolves if the
/// sending side goes away first.
async fn cancelled(mut rx: watch::Receiver<bool>) {
    if rx.wait_for(|cancelled| *cancelled).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Parent cancellation token for every request issued by one flag client.
#[derive(Debug, Clone)]
pub struct CancelScope {
    cancelled: Arc<watch::Sender<bool>>,
    in_flight: Arc<AtomicUsize>,
}

impl CancelScope {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            cancelled: Arc::new(tx),
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Abort every outstanding request and refuse new ones.
    pub fn cancel_all(&self) {
        let already_cancelled = self.cancelled.send_replace(true);
        if !already_cancelled {
            debug!(
                outstanding = self.in_flight(),
                "Cancelling outstanding backend requests"
            );
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.borrow()
    }

    /// Number of issued requests that have not completed yet.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}

impl Default for CancelScope {
    fn default() -> Self {
        Self::new()
    }
}

struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    fn enter(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// [`RequestHandler`] backed by `reqwest`, with a per-call timeout.
#[derive(Debug, Clone)]
pub struct ReqwestRequestHandler {
    client: reqwest::Client,
    scope: CancelScope,
    timeout: Duration,
}

impl ReqwestRequestHandler {
    pub fn new(scope: CancelScope) -> Self {
        Self {
            client: reqwest::Client::new(),
            scope,
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn scope(&self) -> &CancelScope {
        &self.scope
    }
}

impl RequestHandler for ReqwestRequestHandler {
    fn make_request(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
        method: &str,
        body: Option<String>,
    ) -> AbortableRequest {
        let method = match reqwest::Method::from_bytes(method.as_bytes()) {
            Ok(method) => method,
            Err(_) => return AbortableRequest::failed(TransportError::InvalidMethod(method.into())),
        };

        let mut builder = self
            .client
            .request(method.clone(), url)
            .timeout(self.timeout);
        for (name, value) in headers {
            let name = match reqwest::header::HeaderName::from_bytes(name.as_bytes()) {
                Ok(name) => name,
                Err(_) => return AbortableRequest::failed(TransportError::InvalidHeader(name.clone())),
            };
            let value = match reqwest::header::HeaderValue::from_str(value) {
                Ok(value) => value,
                Err(_) => {
                    return AbortableRequest::failed(TransportError::InvalidHeader(
                        name.to_string(),
                    ))
                }
            };
            builder = builder.header(name, value);
        }
        if let Some(body) = body {
            builder = builder.body(body);
        }

        debug!("{} {}", method, url);
        AbortableRequest::spawn(&self.scope, async move {
            let response = builder.send().await?;
            let status_code = response.status().as_u16();
            let headers = response
                .headers()
                .iter()
                .filter_map(|(name, value)| {
                    value
                        .to_str()
                        .ok()
                        .map(|value| (name.as_str().to_string(), value.to_string()))
                })
                .collect();
            let body = response.text().await?;

            Ok(HttpResponse {
                status_code,
                body,
                headers,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn slow_server() -> MockServer {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/delay"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
            .mount(&mock_server)
            .await;
        mock_server
    }

    #[tokio::test]
    async fn test_request_returns_status_body_and_headers() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v3/graphql"))
            .and(header("x-api-key", "secret"))
            .respond_with(
                ResponseTemplate::new(201)
                    .set_body_string(r#"{"ok":true}"#)
                    .insert_header("x-trace", "abc"),
            )
            .mount(&mock_server)
            .await;

        let handler = ReqwestRequestHandler::new(CancelScope::new());
        let headers = HashMap::from([("x-api-key".to_string(), "secret".to_string())]);
        let request = handler.make_request(
            &format!("{}/v3/graphql", mock_server.uri()),
            &headers,
            "POST",
            Some("{}".to_string()),
        );

        let response = assert_ok!(request.response().await);
        assert_eq!(response.status_code, 201);
        assert_eq!(response.body, r#"{"ok":true}"#);
        assert_eq!(response.headers.get("x-trace"), Some(&"abc".to_string()));
    }

    #[tokio::test]
    async fn test_abort_resolves_to_request_aborted() {
        let mock_server = slow_server().await;
        let handler = ReqwestRequestHandler::new(CancelScope::new());

        let request = handler.make_request(
            &format!("{}/delay", mock_server.uri()),
            &HashMap::new(),
            "GET",
            None,
        );
        request.abort();

        let err = request.response().await.unwrap_err();
        assert!(matches!(err, TransportError::Aborted));
        assert_eq!(err.to_string(), "Request aborted");
    }

    #[tokio::test]
    async fn test_connection_failure_is_not_an_abort() {
        let handler = ReqwestRequestHandler::new(CancelScope::new());
        let request = handler.make_request("http://127.0.0.1:1/", &HashMap::new(), "GET", None);

        let err = request.response().await.unwrap_err();
        assert!(matches!(err, TransportError::Http(_)));
    }

    #[tokio::test]
    async fn test_invalid_method_fails_without_sending() {
        let handler = ReqwestRequestHandler::new(CancelScope::new());
        let request = handler.make_request("http://127.0.0.1:1/", &HashMap::new(), "NOT A VERB", None);

        let err = request.response().await.unwrap_err();
        assert!(matches!(err, TransportError::InvalidMethod(_)));
    }

    #[tokio::test]
    async fn test_invalid_header_fails_without_sending() {
        let handler = ReqwestRequestHandler::new(CancelScope::new());
        let headers = HashMap::from([("bad header".to_string(), "v".to_string())]);
        let request = handler.make_request("http://127.0.0.1:9/", &headers, "GET", None);
        let err = request.response().await.unwrap_err();
        assert!(matches!(err, TransportError::InvalidHeader(name) if name == "bad header"));
    }

    #[tokio::test]
    async fn test_cancel_all_aborts_every_outstanding_request() {
        let mock_server = slow_server().await;
        let scope = CancelScope::new();
        let handler = ReqwestRequestHandler::new(scope.clone());
        let url = format!("{}/delay", mock_server.uri());

        let requests: Vec<_> = (0..3)
            .map(|_| handler.make_request(&url, &HashMap::new(), "GET", None))
            .collect();
        assert_eq!(scope.in_flight(), 3);

        scope.cancel_all();
        for request in requests {
            assert!(matches!(
                request.response().await,
                Err(TransportError::Aborted)
            ));
        }
        assert_eq!(scope.in_flight(), 0);
        assert!(scope.is_cancelled());
    }

    #[tokio::test]
    async fn test_requests_after_cancel_all_are_aborted() {
        let mock_server = slow_server().await;
        let scope = CancelScope::new();
        scope.cancel_all();

        let handler = ReqwestRequestHandler::new(scope);
        let request = handler.make_request(
            &format!("{}/delay", mock_server.uri()),
            &HashMap::new(),
            "GET",
            None,
        );
        assert!(matches!(
            request.response().await,
            Err(TransportError::Aborted)
        ));
    }

    #[tokio::test]
    async fn test_aborting_one_request_leaves_others_running() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fast"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("done")
                    .set_delay(Duration::from_millis(100)),
            )
            .mount(&mock_server)
            .await;

        let handler = ReqwestRequestHandler::new(CancelScope::new());
        let url = format!("{}/fast", mock_server.uri());
        let aborted = handler.make_request(&url, &HashMap::new(), "GET", None);
        let kept = handler.make_request(&url, &HashMap::new(), "GET", None);

        aborted.canceller().abort();
        assert!(matches!(
            aborted.response().await,
            Err(TransportError::Aborted)
        ));
        let response = assert_ok!(kept.response().await);
        assert_eq!(response.body, "done");
    }
}
