use reqwest::{multipart, Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::endpoint::{format_template, Endpoint};
use crate::error::GatewayError;
use crate::types::JobAction;

const NOTICE_CAPACITY: usize = 64;

/// Operator-facing notifications. Nothing here touches the store.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    /// A request failed; carries the serialized error.
    Alert(String),
    JobQueued { action: &'static str, model_type: String },
    Uploaded { target: String },
}

/// Counts requests in flight and publishes `busy` on 0 <-> 1 transitions.
#[derive(Debug)]
pub struct InFlight {
    count: AtomicUsize,
    busy: watch::Sender<bool>,
}

impl InFlight {
    pub fn new() -> Arc<Self> {
        let (busy, _) = watch::channel(false);
        Arc::new(InFlight {
            count: AtomicUsize::new(0),
            busy,
        })
    }

    /// Registers one request. The count drops again when the guard does,
    /// whether the request completed, failed or was cancelled.
    pub fn enter(self: &Arc<Self>) -> InFlightGuard {
        // The watch lock serializes counter changes with flag updates.
        self.busy.send_if_modified(|busy| {
            let prev = self.count.fetch_add(1, Ordering::SeqCst);
            if prev == 0 && !*busy {
                *busy = true;
                true
            } else {
                false
            }
        });
        InFlightGuard {
            tracker: Arc::clone(self),
        }
    }

    fn exit(&self) {
        self.busy.send_if_modified(|busy| {
            let prev = self.count.fetch_sub(1, Ordering::SeqCst);
            if prev == 1 && *busy {
                *busy = false;
                true
            } else {
                false
            }
        });
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub fn is_busy(&self) -> bool {
        *self.busy.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.busy.subscribe()
    }
}

#[derive(Debug)]
pub struct InFlightGuard {
    tracker: Arc<InFlight>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.tracker.exit();
    }
}

/// HTTP access to the backend. Cheap to clone; clones share the busy tracker
/// and the notice channel.
#[derive(Debug, Clone)]
pub struct Gateway {
    client: Client,
    base_url: String,
    in_flight: Arc<InFlight>,
    notices: broadcast::Sender<Notice>,
}

impl Gateway {
    pub fn new(client: Client, backend_url: &str) -> Self {
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        Gateway {
            client,
            base_url: format!("{}/api/", backend_url.trim_end_matches('/')),
            in_flight: InFlight::new(),
            notices,
        }
    }

    pub fn url(&self, endpoint: Endpoint, args: &[&str]) -> String {
        format!("{}{}", self.base_url, format_template(endpoint.template(), args))
    }

    pub fn busy(&self) -> watch::Receiver<bool> {
        self.in_flight.subscribe()
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.is_busy()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.count()
    }

    pub fn notices(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }

    pub fn notify(&self, notice: Notice) {
        // No subscribers is fine.
        let _ = self.notices.send(notice);
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: Endpoint,
        args: &[&str],
        query: &[(&str, String)],
    ) -> Result<T, GatewayError> {
        let url = self.url(endpoint, args);
        let request = self.client.get(&url).query(query);
        let _guard = self.in_flight.enter();
        let response = self.send(Method::GET, &url, request).await?;
        let bytes = match response.bytes().await {
            Ok(bytes) => bytes,
            Err(err) => return Err(self.fail(Method::GET, &url, err.into())),
        };
        serde_json::from_slice(&bytes).map_err(|err| self.fail(Method::GET, &url, err.into()))
    }

    pub async fn post_json<B: Serialize + ?Sized>(
        &self,
        endpoint: Endpoint,
        args: &[&str],
        body: Option<&B>,
    ) -> Result<Response, GatewayError> {
        let url = self.url(endpoint, args);
        let mut request = self.client.post(&url);
        if let Some(body) = body {
            request = request.json(body);
        }
        self.execute(Method::POST, url, request).await
    }

    /// Uploads `path` as the multipart field `file`.
    pub async fn post_file(
        &self,
        endpoint: Endpoint,
        args: &[&str],
        path: &Path,
    ) -> Result<Response, GatewayError> {
        let url = self.url(endpoint, args);
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        let contents = match tokio::fs::read(path).await {
            Ok(contents) => contents,
            Err(err) => return Err(self.fail(Method::POST, &url, err.into())),
        };
        let form = multipart::Form::new()
            .part("file", multipart::Part::bytes(contents).file_name(file_name));
        let request = self.client.post(&url).multipart(form);
        self.execute(Method::POST, url, request).await
    }

    pub async fn download(
        &self,
        endpoint: Endpoint,
        args: &[&str],
        query: &[(&str, String)],
    ) -> Result<Vec<u8>, GatewayError> {
        let url = self.url(endpoint, args);
        let request = self.client.get(&url).query(query);
        let _guard = self.in_flight.enter();
        let response = self.send(Method::GET, &url, request).await?;
        match response.bytes().await {
            Ok(bytes) => {
                info!(url = %url, bytes = bytes.len(), "download complete");
                Ok(bytes.to_vec())
            }
            Err(err) => Err(self.fail(Method::GET, &url, err.into())),
        }
    }

    /// Posts a build/train/test/apply request. Build has no body.
    pub async fn trigger(
        &self,
        action: &JobAction,
        data_center: &str,
        model_type: &str,
    ) -> Result<Response, GatewayError> {
        let endpoint = match action {
            JobAction::Build => Endpoint::BuildModel,
            JobAction::Train(_) => Endpoint::TrainModel,
            JobAction::Test(_) => Endpoint::TestModel,
            JobAction::Apply(_) => Endpoint::ApplyModel,
        };
        self.post_json(endpoint, &[data_center, model_type], action.range())
            .await
    }

    async fn execute(
        &self,
        method: Method,
        url: String,
        request: RequestBuilder,
    ) -> Result<Response, GatewayError> {
        let _guard = self.in_flight.enter();
        self.send(method, &url, request).await
    }

    // Caller holds the in-flight guard.
    async fn send(
        &self,
        method: Method,
        url: &str,
        request: RequestBuilder,
    ) -> Result<Response, GatewayError> {
        let request_id = Uuid::new_v4();
        debug!(%request_id, %method, url, in_flight = self.in_flight.count(), "request");

        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => return Err(self.fail(method, url, err.into())),
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let err = GatewayError::Status {
                status,
                url: url.to_string(),
                body,
            };
            return Err(self.fail(method, url, err));
        }

        debug!(%request_id, %method, url, status = status.as_u16(), "response");
        Ok(response)
    }

    fn fail(&self, method: Method, url: &str, err: GatewayError) -> GatewayError {
        error!(%method, url, kind = err.kind(), error = %err, "request failed");
        self.notify(Notice::Alert(err.to_alert()));
        err
    }
}
