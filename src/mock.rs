//! Scripted in-memory transport for unit tests.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde_json::Value;

use crate::error::TransportError;
use crate::transport::{ApiRequest, ApiResponse, Transport};

/// One recorded call, captured before the scripted reply is produced.
#[derive(Debug, Clone)]
pub(crate) struct RecordedCall {
    pub method: reqwest::Method,
    pub path: String,
    pub bearer: Option<String>,
    pub body: Option<Value>,
}

pub(crate) struct MockReply {
    outcome: Result<ApiResponse, TransportError>,
    delay: Option<Duration>,
}

impl MockReply {
    pub fn json(status: u16, body: Value) -> Self {
        Self { outcome: Ok(ApiResponse::new(status, body)), delay: None }
    }

    pub fn status(status: u16) -> Self {
        Self::json(status, Value::Null)
    }

    pub fn network(message: &str) -> Self {
        Self { outcome: Err(TransportError::Network(message.to_owned())), delay: None }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

type Handler = Box<dyn Fn(&ApiRequest) -> MockReply + Send + Sync>;

pub(crate) struct MockTransport {
    handler: Handler,
    calls: Mutex<Vec<RecordedCall>>,
}

impl MockTransport {
    pub fn new(handler: impl Fn(&ApiRequest) -> MockReply + Send + Sync + 'static) -> Self {
        Self { handler: Box::new(handler), calls: Mutex::new(Vec::new()) }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn count(&self, path: &str) -> usize {
        self.calls().iter().filter(|call| call.path == path).count()
    }

    pub fn total(&self) -> usize {
        self.calls().len()
    }

    pub fn bearers(&self, path: &str) -> Vec<Option<String>> {
        self.calls()
            .into_iter()
            .filter(|call| call.path == path)
            .map(|call| call.bearer)
            .collect()
    }
}

#[async_trait::async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).push(RecordedCall {
            method: request.method.clone(),
            path: request.path.clone(),
            bearer: request.bearer().map(str::to_owned),
            body: request.body.clone(),
        });
        let reply = (self.handler)(request);
        if let Some(delay) = reply.delay {
            tokio::time::sleep(delay).await;
        }
        reply.outcome
    }
}
