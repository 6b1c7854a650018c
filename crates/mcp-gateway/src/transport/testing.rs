//! In-memory sessions and factories for pool, discovery and gateway tests.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use rust_mcp_sdk::schema::{CallToolResult, TextContent, Tool, ToolInputSchema};
use serde_json::{Map as JsonMap, Value as JsonValue};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use super::{BackendSession, ClientIdentity, SessionFactory};
use crate::catalog::BackendSpec;
use crate::error::{SessionError, TransportError};

pub fn tool(name: &str) -> Tool {
    Tool {
        annotations: None,
        description: Some(format!("{name} tool")),
        input_schema: ToolInputSchema::new(vec![], None),
        meta: None,
        name: name.to_string(),
        output_schema: None,
        title: None,
    }
}

pub struct FakeSession {
    backend: String,
    tools: Vec<String>,
    closed: CancellationToken,
    close_calls: AtomicUsize,
    calls: StdMutex<Vec<String>>,
}

impl FakeSession {
    pub fn new(backend: &str, tools: Vec<&str>) -> Arc<Self> {
        Arc::new(Self {
            backend: backend.to_string(),
            tools: tools.into_iter().map(String::from).collect(),
            closed: CancellationToken::new(),
            close_calls: AtomicUsize::new(0),
            calls: StdMutex::new(Vec::new()),
        })
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }
}

#[async_trait]
impl BackendSession for FakeSession {
    async fn list_tools(&self) -> Result<Vec<Tool>, SessionError> {
        Ok(self.tools.iter().map(|t| tool(t)).collect())
    }

    async fn call_tool(
        &self,
        name: &str,
        _arguments: Option<JsonMap<String, JsonValue>>,
    ) -> Result<CallToolResult, SessionError> {
        if self.closed.is_cancelled() {
            return Err(SessionError::Closed(self.backend.clone()));
        }
        self.calls.lock().expect("calls lock").push(name.to_string());
        Ok(CallToolResult::text_content(vec![TextContent::from(format!(
            "{}:{}",
            self.backend, name
        ))]))
    }

    async fn close(&self) -> Result<(), SessionError> {
        if !self.closed.is_cancelled() {
            self.closed.cancel();
            self.close_calls.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }
}

/// Factory serving fake sessions from per-backend tool lists.
#[derive(Default)]
pub struct FakeFactory {
    tools: BTreeMap<String, Vec<&'static str>>,
    failing: HashSet<String>,
    gate: Option<Arc<Semaphore>>,
    created: AtomicUsize,
    sessions: StdMutex<Vec<Arc<FakeSession>>>,
}

impl FakeFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_backend(mut self, backend: &str, tools: Vec<&'static str>) -> Self {
        self.tools.insert(backend.to_string(), tools);
        self
    }

    pub fn failing(mut self, backend: &str) -> Self {
        self.failing.insert(backend.to_string());
        self
    }

    /// Hold every creation until permits are added to the returned gate.
    pub fn gated(mut self) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        self.gate = Some(gate.clone());
        (self, gate)
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn sessions(&self) -> Vec<Arc<FakeSession>> {
        self.sessions.lock().expect("sessions lock").clone()
    }
}

#[async_trait]
impl SessionFactory for FakeFactory {
    async fn create_session(
        &self,
        _cancel: &CancellationToken,
        _identity: &ClientIdentity,
        _spec: &BackendSpec,
        backend: &str,
    ) -> Result<Arc<dyn BackendSession>, TransportError> {
        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await.expect("gate open");
        }
        if self.failing.contains(backend) {
            return Err(TransportError::Connect {
                server: backend.to_string(),
                reason: "connection refused".to_string(),
            });
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        let tools = self.tools.get(backend).cloned().unwrap_or_default();
        let session = FakeSession::new(backend, tools);
        self.sessions
            .lock()
            .expect("sessions lock")
            .push(session.clone());
        Ok(session)
    }
}
