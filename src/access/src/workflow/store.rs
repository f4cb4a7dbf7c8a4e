//! Token request storage with optimistic concurrency

use super::request::{RequestStatus, TokenRequest};
use crate::error::{AccessError, Result};
use crate::types::RequestId;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Filter for listing requests; unset fields match everything
#[derive(Debug, Clone, Default)]
pub struct RequestFilter {
    pub team_id: Option<String>,
    pub requester_id: Option<String>,
    pub status: Option<RequestStatus>,
}

impl RequestFilter {
    pub fn pending() -> Self {
        Self {
            status: Some(RequestStatus::Pending),
            ..Default::default()
        }
    }

    pub fn team(team_id: impl Into<String>) -> Self {
        Self {
            team_id: Some(team_id.into()),
            ..Default::default()
        }
    }

    pub fn with_requester(mut self, requester_id: impl Into<String>) -> Self {
        self.requester_id = Some(requester_id.into());
        self
    }

    pub fn with_status(mut self, status: RequestStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn matches(&self, request: &TokenRequest) -> bool {
        self.team_id.as_ref().map_or(true, |t| &request.team_id == t)
            && self
                .requester_id
                .as_ref()
                .map_or(true, |r| &request.requester_id == r)
            && self.status.map_or(true, |s| request.status == s)
    }
}

/// Request persistence
///
/// `update` is a compare-and-swap on [`TokenRequest::version`]: it fails with
/// `Conflict` unless the stored version equals `expected_version`, and stores
/// the request at `expected_version + 1`.
#[async_trait]
pub trait RequestStore: Send + Sync {
    async fn get(&self, request_id: &str) -> Result<Option<TokenRequest>>;

    /// Insert a new request; `Conflict` if the id is taken
    async fn insert(&self, request: TokenRequest) -> Result<()>;

    async fn update(&self, request: TokenRequest, expected_version: u64) -> Result<TokenRequest>;

    /// Remove a request whose creation could not be audited
    async fn discard(&self, request_id: &str) -> Result<()>;

    /// Matching requests ordered by creation time
    async fn list(&self, filter: &RequestFilter) -> Result<Vec<TokenRequest>>;
}

/// In-memory request store
#[derive(Default)]
pub struct InMemoryRequestStore {
    requests: Arc<RwLock<HashMap<RequestId, TokenRequest>>>,
}

impl InMemoryRequestStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RequestStore for InMemoryRequestStore {
    async fn get(&self, request_id: &str) -> Result<Option<TokenRequest>> {
        let requests = self.requests.read().await;
        Ok(requests.get(request_id).cloned())
    }

    async fn insert(&self, request: TokenRequest) -> Result<()> {
        let mut requests = self.requests.write().await;
        if requests.contains_key(&request.id) {
            return Err(AccessError::Conflict(format!("request {} already exists", request.id)));
        }
        requests.insert(request.id.clone(), request);
        Ok(())
    }

    async fn update(&self, mut request: TokenRequest, expected_version: u64) -> Result<TokenRequest> {
        let mut requests = self.requests.write().await;
        let current = requests
            .get(&request.id)
            .ok_or_else(|| AccessError::not_found("token request", request.id.as_str()))?;

        if current.version != expected_version {
            return Err(AccessError::Conflict(format!(
                "request {} is at version {}, expected {}",
                request.id, current.version, expected_version
            )));
        }

        request.version = expected_version + 1;
        requests.insert(request.id.clone(), request.clone());
        Ok(request)
    }

    async fn discard(&self, request_id: &str) -> Result<()> {
        let mut requests = self.requests.write().await;
        requests.remove(request_id);
        Ok(())
    }

    async fn list(&self, filter: &RequestFilter) -> Result<Vec<TokenRequest>> {
        let requests = self.requests.read().await;
        let mut listed: Vec<TokenRequest> = requests
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        listed.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(listed)
    }
}
