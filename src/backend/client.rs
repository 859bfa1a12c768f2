//! Flag client that works from the project datafile and the segment API.

use super::datafile::Datafile;
use super::events::{BatchEventProcessor, EventDispatcher, ImpressionEvent, LogDispatcher};
use super::{
    odp, Attributes, BackendError, ClientConfig, ClientFactory, Decision, FlagClient,
    RequestHandler, SegmentFetch, SegmentOption, UserContext,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const DEFAULT_DATAFILE_URL: &str = "https://cdn.optimizely.com";

/// Builds [`DatafileClient`]s.
#[derive(Clone)]
pub struct DatafileClientFactory {
    datafile_url: String,
    dispatcher: Arc<dyn EventDispatcher>,
}

impl DatafileClientFactory {
    pub fn new(datafile_url: impl Into<String>) -> Self {
        Self {
            datafile_url: datafile_url.into(),
            dispatcher: Arc::new(LogDispatcher),
        }
    }

    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn EventDispatcher>) -> Self {
        self.dispatcher = dispatcher;
        self
    }
}

impl Default for DatafileClientFactory {
    fn default() -> Self {
        Self::new(DEFAULT_DATAFILE_URL)
    }
}

impl ClientFactory for DatafileClientFactory {
    fn create(
        &self,
        config: &ClientConfig,
        requests: Arc<dyn RequestHandler>,
    ) -> Result<Arc<dyn FlagClient>, BackendError> {
        if config.access_key.trim().is_empty() {
            return Err(BackendError::MissingAccessKey);
        }

        let shared = Shared {
            datafile_url: format!(
                "{}/datafiles/{}.json",
                self.datafile_url.trim_end_matches('/'),
                config.access_key
            ),
            requests,
            datafile: RwLock::new(None),
            segment_cache: Mutex::new(HashMap::new()),
            events: BatchEventProcessor::new(config.event_batch_size, self.dispatcher.clone()),
            closed: AtomicBool::new(false),
        };

        Ok(Arc::new(DatafileClient {
            shared: Arc::new(shared),
            update_interval: config.update_interval,
            poller: Mutex::new(None),
        }))
    }
}

struct Shared {
    datafile_url: String,
    requests: Arc<dyn RequestHandler>,
    datafile: RwLock<Option<Arc<Datafile>>>,
    segment_cache: Mutex<HashMap<String, Vec<String>>>,
    events: BatchEventProcessor,
    closed: AtomicBool,
}

impl Shared {
    async fn fetch_datafile(&self) -> Result<Datafile, BackendError> {
        let response = self
            .requests
            .make_request(&self.datafile_url, &HashMap::new(), "GET", None)
            .response()
            .await?;

        if !response.is_success() {
            return Err(BackendError::DatafileStatus(response.status_code));
        }

        serde_json::from_str(&response.body).map_err(BackendError::InvalidDatafile)
    }

    fn store(&self, datafile: Datafile) {
        debug!(revision = %datafile.revision, "Datafile updated");
        *self.datafile.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(datafile));
    }

    fn datafile(&self) -> Result<Arc<Datafile>, BackendError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BackendError::Closed);
        }
        self.datafile
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(BackendError::NotReady)
    }
}

/// Client backed by a downloaded datafile.
pub struct DatafileClient {
    shared: Arc<Shared>,
    update_interval: Option<Duration>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl DatafileClient {
    fn start_polling(&self, interval: Duration) {
        let mut poller = self.poller.lock().unwrap_or_else(PoisonError::into_inner);
        if poller.is_some() {
            return;
        }

        let shared = self.shared.clone();
        *poller = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if shared.closed.load(Ordering::SeqCst) {
                    break;
                }
                match shared.fetch_datafile().await {
                    Ok(datafile) => shared.store(datafile),
                    Err(e) => warn!("Datafile refresh failed: {}", e),
                }
            }
        }));
    }
}

#[async_trait]
impl FlagClient for DatafileClient {
    async fn on_ready(&self) -> Result<(), BackendError> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(BackendError::Closed);
        }

        let datafile = self.shared.fetch_datafile().await?;
        self.shared.store(datafile);

        if let Some(interval) = self.update_interval {
            self.start_polling(interval);
        }
        Ok(())
    }

    fn create_user_context(
        &self,
        user_id: &str,
        attributes: &Attributes,
    ) -> Result<Option<Box<dyn UserContext>>, BackendError> {
        self.shared.datafile()?;
        if user_id.is_empty() {
            return Ok(None);
        }

        Ok(Some(Box::new(DatafileUserContext {
            shared: self.shared.clone(),
            user_id: user_id.to_string(),
            attributes: attributes.clone(),
            segments: Mutex::new(None),
        })))
    }

    fn close(&self) -> Result<(), BackendError> {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if let Some(poller) = self.poller.lock().unwrap_or_else(PoisonError::into_inner).take() {
            poller.abort();
        }
        self.shared.events.flush();
        info!("Datafile client closed");
        Ok(())
    }
}

struct DatafileUserContext {
    shared: Arc<Shared>,
    user_id: String,
    attributes: Attributes,
    segments: Mutex<Option<Vec<String>>>,
}

impl DatafileUserContext {
    fn remember(&self, segments: Vec<String>) {
        *self.segments.lock().unwrap_or_else(PoisonError::into_inner) = Some(segments);
    }
}

#[async_trait]
impl UserContext for DatafileUserContext {
    async fn fetch_qualified_segments(
        &self,
        options: &[SegmentOption],
    ) -> Result<SegmentFetch, BackendError> {
        let datafile = self.shared.datafile()?;
        let Some(settings) = datafile.odp() else {
            warn!("Segment lookups are not configured for this project");
            return Ok(SegmentFetch::Fetched(false));
        };

        let use_cache = !options.contains(&SegmentOption::IgnoreCache);
        {
            let mut cache = self
                .shared
                .segment_cache
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if options.contains(&SegmentOption::ResetCache) {
                cache.clear();
            }
            if use_cache {
                if let Some(cached) = cache.get(&self.user_id) {
                    self.remember(cached.clone());
                    return Ok(SegmentFetch::Fetched(true));
                }
            }
        }

        let segments = odp::fetch_segments(
            self.shared.requests.as_ref(),
            &settings,
            &self.user_id,
            &datafile.segments(),
        )
        .await?;

        if use_cache {
            self.shared
                .segment_cache
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(self.user_id.clone(), segments.clone());
        }
        self.remember(segments);
        Ok(SegmentFetch::Fetched(true))
    }

    fn qualified_segments(&self) -> Option<Vec<String>> {
        self.segments
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn decide(&self, flag_key: &str) -> Result<Decision, BackendError> {
        let datafile = self.shared.datafile()?;
        let segments = self.qualified_segments().unwrap_or_default();
        let decision = datafile.decide(flag_key, &self.attributes, &segments);

        if datafile.flag(flag_key).is_some() {
            self.shared.events.process(ImpressionEvent::now(
                self.user_id.as_str(),
                flag_key,
                decision.variation_key.clone(),
                decision.enabled,
            ));
        }
        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{CancelScope, QualifiedSegments, ReqwestRequestHandler};
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Default)]
    struct Counting {
        events: Mutex<usize>,
    }

    impl EventDispatcher for Counting {
        fn dispatch(&self, batch: &[ImpressionEvent]) -> Result<(), BackendError> {
            *self.events.lock().unwrap() += batch.len();
            Ok(())
        }
    }

    fn datafile_json(odp_host: &str) -> serde_json::Value {
        json!({
            "revision": "7",
            "featureFlags": [{"id": "1", "key": "f1", "rolloutId": "r1"}],
            "rollouts": [{
                "id": "r1",
                "experiments": [
                    {
                        "id": "e1",
                        "key": "beta_rule",
                        "audienceIds": ["aud-beta"],
                        "variations": [{"id": "v1", "key": "t1", "featureEnabled": true}]
                    },
                    {
                        "id": "e2",
                        "key": "everyone_else",
                        "audienceIds": [],
                        "variations": [{"id": "v2", "key": "off", "featureEnabled": false}]
                    }
                ]
            }],
            "typedAudiences": [{
                "id": "aud-beta",
                "name": "beta",
                "conditions": ["or", {"type": "third_party_dimension", "name": "odp.audiences", "match": "qualified", "value": "beta"}]
            }],
            "integrations": [{"key": "odp", "host": odp_host, "publicKey": "pk"}]
        })
    }

    async fn mount_datafile(server: &MockServer, key: &str, body: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path(format!("/datafiles/{}.json", key)))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }

    fn client(server: &MockServer, key: &str, dispatcher: Arc<dyn EventDispatcher>) -> Arc<dyn FlagClient> {
        let factory = DatafileClientFactory::new(server.uri()).with_dispatcher(dispatcher);
        let requests = Arc::new(ReqwestRequestHandler::new(CancelScope::new()));
        factory.create(&ClientConfig::new(key), requests).unwrap()
    }

    #[test]
    fn test_empty_access_key_is_rejected() {
        let factory = DatafileClientFactory::default();
        let requests = Arc::new(ReqwestRequestHandler::new(CancelScope::new()));
        let result = factory.create(&ClientConfig::new("  "), requests);
        assert!(matches!(result, Err(BackendError::MissingAccessKey)));
    }

    #[tokio::test]
    async fn test_missing_datafile_fails_readiness() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let client = client(&server, "bad-key", Arc::new(LogDispatcher));
        let err = client.on_ready().await.unwrap_err();
        assert!(matches!(err, BackendError::DatafileStatus(403)));
    }

    #[tokio::test]
    async fn test_user_context_requires_ready_client() {
        let server = MockServer::start().await;
        let client = client(&server, "key", Arc::new(LogDispatcher));
        let result = client.create_user_context("u1", &Attributes::new());
        assert!(matches!(result, Err(BackendError::NotReady)));
    }

    #[tokio::test]
    async fn test_segments_and_decision_end_to_end() {
        let server = MockServer::start().await;
        mount_datafile(&server, "key", datafile_json(&server.uri())).await;
        Mock::given(method("POST"))
            .and(path("/v3/graphql"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"customer": {"audiences": {"edges": [
                    {"node": {"name": "beta", "state": "qualified"}}
                ]}}}
            })))
            .mount(&server)
            .await;

        let counting = Arc::new(Counting::default());
        let client = client(&server, "key", counting.clone());
        client.on_ready().await.unwrap();

        let context = client
            .create_user_context("u1", &Attributes::new())
            .unwrap()
            .unwrap();
        let segments = QualifiedSegments::new(context.as_ref(), &[SegmentOption::IgnoreCache])
            .fetch()
            .await
            .unwrap();
        assert_eq!(segments, vec!["beta".to_string()]);

        let decision = context.decide("f1").unwrap();
        assert_eq!(decision.variation_key.as_deref(), Some("t1"));
        assert!(decision.enabled);
        assert_eq!(*counting.events.lock().unwrap(), 1);

        client.close().unwrap();
        client.close().unwrap();
        assert!(matches!(context.decide("f1"), Err(BackendError::Closed)));
    }

    #[tokio::test]
    async fn test_without_segment_integration_segments_are_not_fetched() {
        let server = MockServer::start().await;
        let mut datafile = datafile_json("unused");
        datafile["integrations"] = json!([]);
        mount_datafile(&server, "key", datafile).await;

        let client = client(&server, "key", Arc::new(LogDispatcher));
        client.on_ready().await.unwrap();
        let context = client
            .create_user_context("u1", &Attributes::new())
            .unwrap()
            .unwrap();

        let fetched = context.fetch_qualified_segments(&[]).await.unwrap();
        assert_eq!(fetched, SegmentFetch::Fetched(false));
        let decision = context.decide("f1").unwrap();
        assert_eq!(decision.variation_key.as_deref(), Some("off"));
    }

    #[tokio::test]
    async fn test_empty_user_id_yields_no_context() {
        let server = MockServer::start().await;
        mount_datafile(&server, "key", datafile_json(&server.uri())).await;

        let client = client(&server, "key", Arc::new(LogDispatcher));
        client.on_ready().await.unwrap();
        assert!(client.create_user_context("", &Attributes::new()).unwrap().is_none());
    }
}
