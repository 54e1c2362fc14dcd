use async_trait::async_trait;
use client_core::{ClientError, ClientErrorCategory, classify_http_status};
use client_platform::{SessionBackend, SessionVault};
use reqwest::{RequestBuilder, StatusCode};
use serde_json::{Value, json};
use tokio::sync::broadcast;
use tracing::{debug, warn};
use url::Url;

/// Receiver side of the gateway's unauthorized signal.
///
/// The gateway fires this exactly once per 401 response, after clearing the
/// stored credential. The hosting application subscribes and reacts by
/// navigating to its login entry point; the gateway itself never retries
/// and knows nothing about navigation.
pub type UnauthorizedSignal = broadcast::Receiver<()>;

/// Transport seam used by the runtime.
///
/// Methods return raw JSON payloads; shaping them into canonical lists is
/// the normalizer's job, so transport mocks stay trivial.
#[async_trait]
pub trait MatchApi: Send + Sync {
    /// `GET /match/matches`: the conversation list.
    async fn list_conversations(&self) -> Result<Value, ClientError>;

    /// `GET /chat/{conversation_id}?limit={limit}`: the most recent messages.
    async fn list_messages(
        &self,
        conversation_id: &str,
        limit: u16,
    ) -> Result<Value, ClientError>;

    /// `POST /chat/{conversation_id}`: create a message.
    async fn send_message(
        &self,
        conversation_id: &str,
        body: &str,
    ) -> Result<Value, ClientError>;
}

/// Shared HTTP transport configuration.
///
/// Every outbound request attaches `Authorization: Bearer <token>` when the
/// vault holds a credential; requests proceed bare otherwise and the server
/// is responsible for rejecting them.
pub struct ApiGateway<S: SessionBackend> {
    http: reqwest::Client,
    base_url: Url,
    vault: SessionVault<S>,
    unauthorized_tx: broadcast::Sender<()>,
}

impl<S: SessionBackend> ApiGateway<S> {
    pub fn new(base_url: Url, vault: SessionVault<S>) -> Self {
        let (unauthorized_tx, _) = broadcast::channel(8);
        Self {
            http: reqwest::Client::new(),
            base_url: with_trailing_slash(base_url),
            vault,
            unauthorized_tx,
        }
    }

    /// Subscribe to the unauthorized (401) signal.
    pub fn subscribe_unauthorized(&self) -> UnauthorizedSignal {
        self.unauthorized_tx.subscribe()
    }

    fn endpoint(&self, path: &str) -> Result<Url, ClientError> {
        self.base_url.join(path).map_err(|err| {
            ClientError::new(
                ClientErrorCategory::Internal,
                "invalid_endpoint",
                format!("cannot build endpoint '{path}': {err}"),
            )
        })
    }

    fn with_auth(&self, request: RequestBuilder) -> RequestBuilder {
        match self.vault.access_token() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn execute(&self, request: RequestBuilder) -> Result<Value, ClientError> {
        let response = self.with_auth(request).send().await.map_err(|err| {
            ClientError::new(
                ClientErrorCategory::Network,
                "transport_error",
                err.to_string(),
            )
        })?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            self.note_unauthorized();
            return Err(ClientError::new(
                ClientErrorCategory::Auth,
                "unauthorized",
                "credential rejected by server",
            ));
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::new(
                classify_http_status(status.as_u16()),
                "http_error",
                server_error_message(status.as_u16(), &body),
            ));
        }

        response.json::<Value>().await.map_err(|err| {
            ClientError::new(
                ClientErrorCategory::Decode,
                "invalid_json",
                err.to_string(),
            )
        })
    }

    /// Clear the stored credential and fire the unauthorized signal.
    ///
    /// Called exactly once per failing response; the side effects never
    /// repeat for the same response and the request is never retried.
    fn note_unauthorized(&self) {
        warn!("credential rejected; clearing stored session");
        if let Err(err) = self.vault.clear_session() {
            warn!(%err, "failed clearing session after 401");
        }
        let _ = self.unauthorized_tx.send(());
    }
}

#[async_trait]
impl<S: SessionBackend> MatchApi for ApiGateway<S> {
    async fn list_conversations(&self) -> Result<Value, ClientError> {
        let endpoint = self.endpoint("match/matches")?;
        debug!(%endpoint, "fetching conversation list");
        self.execute(self.http.get(endpoint)).await
    }

    async fn list_messages(
        &self,
        conversation_id: &str,
        limit: u16,
    ) -> Result<Value, ClientError> {
        let endpoint = self.endpoint(&format!("chat/{conversation_id}"))?;
        debug!(%endpoint, limit, "fetching message window");
        self.execute(self.http.get(endpoint).query(&[("limit", limit)]))
            .await
    }

    async fn send_message(
        &self,
        conversation_id: &str,
        body: &str,
    ) -> Result<Value, ClientError> {
        let endpoint = self.endpoint(&format!("chat/{conversation_id}"))?;
        debug!(%endpoint, "posting message");
        self.execute(self.http.post(endpoint).json(&json!({ "body": body })))
            .await
    }
}

fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        url.set_path(&format!("{}/", url.path()));
    }
    url
}

/// Prefer the server-provided `message` field, then the raw body, then a
/// status-only fallback.
fn server_error_message(status: u16, body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(body)
        && let Some(message) = value.get("message").and_then(Value::as_str)
        && !message.trim().is_empty()
    {
        return message.to_owned();
    }

    let trimmed = body.trim();
    if !trimmed.is_empty() && trimmed.len() <= 200 {
        return format!("HTTP {status}: {trimmed}");
    }
    format!("HTTP {status}")
}
