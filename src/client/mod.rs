use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::{
    sync::{
        Arc, Mutex, RwLock,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use crate::{
    error::ErrorBody,
    models::{LoginRequest, LoginResponse, MessageResponse},
};

mod single_flight;

pub use single_flight::{RefreshCoordinator, RefreshOutcome};

/// Default upper bound on one session refresh, waiters included.
pub const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(10);

/// Routes that answer 401 for reasons a refresh cannot fix.
const PUBLIC_ROUTES: [&str; 3] = ["/auth/login", "/auth/adduser", "/auth/refresh"];

/// ClientError
///
/// `Clone` so a single refresh outcome can be handed to every waiting caller.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ClientError {
    #[error("request failed with {status} {code}: {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("could not decode response: {0}")]
    Decode(String),
    #[error("session refresh timed out")]
    RefreshTimedOut,
    #[error("session refresh was abandoned before completing")]
    RefreshAbandoned,
}

impl ClientError {
    /// The server's error code, when the failure came from the API.
    pub fn code(&self) -> Option<&str> {
        match self {
            ClientError::Api { code, .. } => Some(code),
            _ => None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        ClientError::Transport(err.to_string())
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshGrant {
    success: bool,
    access_token: Option<String>,
}

/// PortalClient
///
/// HTTP client for the portal API that keeps a session alive on its own. The session
/// lives in the cookie jar set by login; a token obtained from a refresh is also sent
/// as a bearer credential.
///
/// A non-public request answered with 401 is retried at most once. Before the retry the
/// session is refreshed, unless a refresh already succeeded after the request was sent.
/// Concurrent refreshes are collapsed by the client's own `RefreshCoordinator`.
pub struct PortalClient {
    http: reqwest::Client,
    base_url: String,
    access_token: RwLock<Option<String>>,
    // Bumped whenever the credential changes (login, refresh, logout).
    generation: AtomicU64,
    // The generation a failed refresh ran under, with its error. Late 401s from that
    // generation get this error instead of a second refresh.
    last_failure: Mutex<Option<(u64, ClientError)>>,
    refresh: RefreshCoordinator,
    refresh_timeout: Duration,
}

impl PortalClient {
    /// `base_url` is the API root, e.g. `http://localhost:5000/api`.
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .cookie_provider(Arc::new(reqwest::cookie::Jar::default()))
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_token: RwLock::new(None),
            generation: AtomicU64::new(0),
            last_failure: Mutex::new(None),
            refresh: RefreshCoordinator::new(),
            refresh_timeout: DEFAULT_REFRESH_TIMEOUT,
        })
    }

    pub fn with_refresh_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_timeout = timeout;
        self
    }

    /// Matches the path alone; a query string or fragment is ignored.
    pub fn is_public_route(path: &str) -> bool {
        let route = path.split(['?', '#']).next().unwrap_or(path);
        PUBLIC_ROUTES.contains(&route.trim_end_matches('/'))
    }

    pub fn access_token(&self) -> Option<String> {
        self.access_token
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.refresh
    }

    fn replace_token(&self, token: Option<String>) {
        *self
            .access_token
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = token;
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    pub async fn login(&self, reg_no: &str, password: &str) -> Result<LoginResponse, ClientError> {
        let body = LoginRequest {
            reg_no: Some(reg_no.to_string()),
            password: Some(password.to_string()),
        };
        let response = self.send(Method::POST, "/auth/login", Some(&body)).await?;
        // The session now lives in the cookies the server just set.
        self.replace_token(None);
        Ok(response)
    }

    pub async fn logout(&self) -> Result<MessageResponse, ClientError> {
        let response = self.send(Method::POST, "/auth/logout", None::<&Value>).await?;
        self.replace_token(None);
        Ok(response)
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        self.send(Method::GET, path, None::<&Value>).await
    }

    pub async fn post<B, T>(&self, path: &str, body: &B) -> Result<T, ClientError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send(Method::POST, path, Some(body)).await
    }

    /// send
    ///
    /// Issues the request and applies the refresh-and-retry cycle on 401.
    pub async fn send<B, T>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<T, ClientError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let sent_with = self.generation.load(Ordering::SeqCst);
        let response = self.dispatch(method.clone(), path, body).await?;

        if response.status() != StatusCode::UNAUTHORIZED || Self::is_public_route(path) {
            return decode(response).await;
        }

        if let Some(err) = self.failure_for(sent_with) {
            return Err(err);
        }

        // Only refresh if nobody replaced the credential since this request went out.
        if self.generation.load(Ordering::SeqCst) == sent_with {
            self.refresh_session(sent_with).await?;
        } else {
            tracing::debug!(path, "credential changed while in flight, replaying");
        }

        let retried = self.dispatch(method, path, body).await?;
        decode(retried).await
    }

    async fn dispatch<B>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<reqwest::Response, ClientError>
    where
        B: Serialize + ?Sized,
    {
        let mut request = self.http.request(method, format!("{}{}", self.base_url, path));
        if let Some(token) = self.access_token() {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }
        Ok(request.send().await?)
    }

    /// refresh_session
    ///
    /// Refreshes the session through the coordinator. A failure is recorded against
    /// `generation` before the waiters are released, so a 401 arriving later from the
    /// same generation does not start another refresh.
    async fn refresh_session(&self, generation: u64) -> Result<String, ClientError> {
        let outcome = self
            .refresh
            .run(self.refresh_timeout, || async {
                let outcome = self.exchange_refresh_token().await;
                if let Err(e) = &outcome {
                    self.record_failure(generation, e);
                }
                outcome
            })
            .await;

        // Timeouts and abandoned refreshes never reach the closure's bookkeeping.
        if let Err(e) = &outcome {
            self.record_failure(generation, e);
        }
        outcome
    }

    /// Drops the stored credential and moves to a new generation, once per generation.
    fn record_failure(&self, generation: u64, err: &ClientError) {
        let mut last = self
            .last_failure
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if self
            .generation
            .compare_exchange(generation, generation + 1, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            *self
                .access_token
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
            *last = Some((generation, err.clone()));
        }
    }

    fn failure_for(&self, generation: u64) -> Option<ClientError> {
        self.last_failure
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .filter(|(failed, _)| *failed == generation)
            .map(|(_, err)| err.clone())
    }

    /// exchange_refresh_token
    ///
    /// One call to the refresh endpoint. The refresh cookie travels in the jar; the new
    /// access token is stored before waiters are released.
    async fn exchange_refresh_token(&self) -> Result<String, ClientError> {
        let response = self
            .http
            .post(format!("{}/auth/refresh", self.base_url))
            .send()
            .await?;
        let grant: RefreshGrant = decode(response).await?;

        match grant.access_token {
            Some(token) if grant.success => {
                self.replace_token(Some(token.clone()));
                tracing::debug!("session refreshed");
                Ok(token)
            }
            _ => Err(ClientError::Decode(
                "refresh response did not carry an access token".to_string(),
            )),
        }
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ClientError> {
    let status = response.status();
    if status.is_success() {
        return response
            .json::<T>()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()));
    }

    let (code, message) = match response.json::<ErrorBody>().await {
        Ok(body) => (body.code, body.message),
        Err(_) => (String::new(), status.to_string()),
    };
    Err(ClientError::Api {
        status: status.as_u16(),
        code,
        message,
    })
}
