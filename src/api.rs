//! HTTP transport for the back-office REST API.

use std::time::Instant;

use reqwest::{RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::category::FileCategory;
use crate::config::ClientConfig;
use crate::error::FIELD_CONTEXT_PREFIX;
use crate::form::{FormPayload, METHOD_OVERRIDE_FIELD};
use crate::record::{self, Record, RecordId};
use crate::resource::ResourceKind;
use crate::session::{Session, SessionHandle, SessionUser, AUTH_EXPIRED};
use crate::{AppError, AppResult};

pub const REQUEST_ID_HEADER: &str = "x-request-id";
pub const VALIDATION_REJECTED: &str = "VALIDATION/REJECTED";

/// Remote side of the edit buffer. Bodies are decoded into [`Record`]s
/// before they leave the store.
#[allow(async_fn_in_trait)]
pub trait RecordStore {
    async fn fetch(&self, kind: ResourceKind, id: &RecordId) -> AppResult<Record>;
    async fn list(&self, kind: ResourceKind) -> AppResult<Vec<Record>>;
    async fn create(&self, kind: ResourceKind, payload: FormPayload) -> AppResult<Record>;
    async fn update(
        &self,
        kind: ResourceKind,
        id: &RecordId,
        payload: FormPayload,
    ) -> AppResult<Record>;
    async fn delete_file(
        &self,
        kind: ResourceKind,
        id: &RecordId,
        category: FileCategory,
        position: usize,
    ) -> AppResult<()>;
    async fn delete_record(&self, kind: ResourceKind, id: &RecordId) -> AppResult<()>;
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    #[serde(alias = "access_token")]
    token: String,
    #[serde(default)]
    user: Option<SessionUser>,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Auth {
    Public,
    Bearer,
}

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
    session: SessionHandle,
}

impl ApiClient {
    pub fn new(config: &ClientConfig, session: SessionHandle) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url.clone(),
            session,
        })
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    fn endpoint(&self, segments: &[&str]) -> AppResult<Url> {
        let mut url = self
            .base_url
            .join("api/")
            .map_err(|err| AppError::new("CONFIG/INVALID_URL", err.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| AppError::new("CONFIG/INVALID_URL", "API URL cannot be a base"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn execute(
        &self,
        op: &'static str,
        builder: RequestBuilder,
        auth: Auth,
    ) -> AppResult<Response> {
        let request_id = Uuid::now_v7().to_string();
        let mut builder = builder.header(REQUEST_ID_HEADER, request_id.as_str());
        if auth == Auth::Bearer {
            builder = builder.bearer_auth(self.session.bearer()?);
        }
        let request = builder.build()?;
        let method = request.method().clone();
        let path = request.url().path().to_string();

        let start = Instant::now();
        let response = self.http.execute(request).await.map_err(|err| {
            warn!(
                target: "listing_desk",
                event = "api_request",
                op,
                method = %method,
                path = path.as_str(),
                request_id = request_id.as_str(),
                outcome = "transport_error",
            );
            AppError::from(err)
                .with_context("operation", op)
                .with_context("request_id", request_id.clone())
        })?;
        let status = response.status();
        let duration_ms = start.elapsed().as_millis() as u64;

        if status.is_success() {
            info!(
                target: "listing_desk",
                event = "api_request",
                op,
                method = %method,
                path = path.as_str(),
                status = status.as_u16(),
                duration_ms,
                request_id = request_id.as_str(),
            );
            return Ok(response);
        }

        warn!(
            target: "listing_desk",
            event = "api_request",
            op,
            method = %method,
            path = path.as_str(),
            status = status.as_u16(),
            duration_ms,
            request_id = request_id.as_str(),
            outcome = "rejected",
        );
        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::UNAUTHORIZED && auth == Auth::Bearer {
            if let Err(err) = self.session.end() {
                warn!(target: "listing_desk", event = "session_clear_failed", code = err.code());
            }
        }
        Err(error_from_status(status, &body)
            .with_context("operation", op)
            .with_context("request_id", request_id))
    }

    async fn read_json(op: &'static str, response: Response) -> AppResult<Value> {
        let bytes = response
            .bytes()
            .await
            .map_err(|err| AppError::from(err).with_context("operation", op))?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&bytes).map_err(|err| AppError::from(err).with_context("operation", op))
    }

    /// Exchange credentials for a bearer token and begin the session.
    pub async fn login(&self, email: &str, password: &str) -> AppResult<Session> {
        let url = self.endpoint(&["login"])?;
        let builder = self
            .http
            .post(url)
            .json(&json!({ "email": email, "password": password }));
        let response = self.execute("login", builder, Auth::Public).await?;
        let body = Self::read_json("login", response).await?;
        let login: LoginResponse = serde_json::from_value(body)
            .map_err(|err| AppError::from(err).with_context("operation", "login"))?;

        let mut session = Session::new(login.token);
        if let Some(user) = login.user {
            session = session.with_user(user);
        }
        if let Some(seconds) = login.expires_in {
            session = session.expires_in(seconds);
        }
        self.session.begin(session.clone())?;
        Ok(session)
    }

    /// Revoke the token server-side when possible; the local session ends
    /// regardless of the outcome.
    pub async fn logout(&self) -> AppResult<()> {
        if self.session.is_active() {
            let url = self.endpoint(&["logout"])?;
            if let Err(err) = self.execute("logout", self.http.post(url), Auth::Bearer).await {
                debug!(target: "listing_desk", event = "logout_revoke_failed", code = err.code());
            }
        }
        self.session.end()
    }
}

impl RecordStore for ApiClient {
    async fn fetch(&self, kind: ResourceKind, id: &RecordId) -> AppResult<Record> {
        let url = self.endpoint(&[kind.path_segment(), id.as_str()])?;
        let response = self.execute("fetch", self.http.get(url), Auth::Bearer).await?;
        let body = Self::read_json("fetch", response).await?;
        record::decode(kind, body).map_err(|err| err.with_context("id", id.to_string()))
    }

    async fn list(&self, kind: ResourceKind) -> AppResult<Vec<Record>> {
        let url = self.endpoint(&[kind.path_segment()])?;
        let response = self.execute("list", self.http.get(url), Auth::Bearer).await?;
        let body = Self::read_json("list", response).await?;
        record::decode_list(kind, body)
    }

    async fn create(&self, kind: ResourceKind, payload: FormPayload) -> AppResult<Record> {
        let url = self.endpoint(&[kind.path_segment()])?;
        let builder = self.http.post(url).multipart(payload.into_multipart()?);
        let response = self.execute("create", builder, Auth::Bearer).await?;
        let body = Self::read_json("create", response).await?;
        record::decode(kind, body)
    }

    async fn update(
        &self,
        kind: ResourceKind,
        id: &RecordId,
        payload: FormPayload,
    ) -> AppResult<Record> {
        let url = self.endpoint(&[kind.path_segment(), id.as_str()])?;
        let builder = self
            .http
            .post(url)
            .query(&[(METHOD_OVERRIDE_FIELD, "PUT")])
            .multipart(payload.into_multipart()?);
        let response = self.execute("update", builder, Auth::Bearer).await?;
        let body = Self::read_json("update", response).await?;
        record::decode(kind, body).map_err(|err| err.with_context("id", id.to_string()))
    }

    async fn delete_file(
        &self,
        kind: ResourceKind,
        id: &RecordId,
        category: FileCategory,
        position: usize,
    ) -> AppResult<()> {
        let position = position.to_string();
        let url = self.endpoint(&[
            kind.path_segment(),
            id.as_str(),
            category.delete_segment(),
            position.as_str(),
        ])?;
        self.execute("delete_file", self.http.delete(url), Auth::Bearer)
            .await?;
        Ok(())
    }

    async fn delete_record(&self, kind: ResourceKind, id: &RecordId) -> AppResult<()> {
        let url = self.endpoint(&[kind.path_segment(), id.as_str()])?;
        self.execute("delete_record", self.http.delete(url), Auth::Bearer)
            .await?;
        Ok(())
    }
}

fn server_message(body: &Value) -> Option<String> {
    ["message", "error"]
        .iter()
        .find_map(|key| body.get(*key).and_then(Value::as_str))
        .filter(|message| !message.trim().is_empty())
        .map(str::to_string)
}

fn field_messages(value: &Value) -> String {
    match value {
        Value::Array(items) => items
            .iter()
            .map(|item| item.as_str().map(str::to_string).unwrap_or_else(|| item.to_string()))
            .collect::<Vec<_>>()
            .join("; "),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Map a non-success response into the error surfaced to the operator.
pub fn error_from_status(status: StatusCode, body: &str) -> AppError {
    let parsed: Value = serde_json::from_str(body).unwrap_or(Value::Null);
    let message = server_message(&parsed);

    let error = match status {
        StatusCode::UNAUTHORIZED => AppError::new(
            AUTH_EXPIRED,
            message.unwrap_or_else(|| "Your session has expired. Sign in again.".into()),
        ),
        StatusCode::FORBIDDEN => AppError::new(
            "AUTH/FORBIDDEN",
            message.unwrap_or_else(|| "You are not allowed to do that.".into()),
        ),
        StatusCode::NOT_FOUND => AppError::new(
            "HTTP/NOT_FOUND",
            message.unwrap_or_else(|| "Record not found".into()),
        ),
        StatusCode::UNPROCESSABLE_ENTITY => {
            let mut error = AppError::new(
                VALIDATION_REJECTED,
                message.unwrap_or_else(|| "The server rejected the submitted data.".into()),
            );
            if let Some(Value::Object(errors)) = parsed.get("errors") {
                error = error.with_contexts(errors.iter().map(|(field, messages)| {
                    (format!("{FIELD_CONTEXT_PREFIX}{field}"), field_messages(messages))
                }));
            }
            error
        }
        other => AppError::new(
            format!("HTTP/{}", other.as_u16()),
            message.unwrap_or_else(|| {
                other
                    .canonical_reason()
                    .unwrap_or("Request failed")
                    .to_string()
            }),
        ),
    };
    error.with_context("status", status.as_u16().to_string())
}
