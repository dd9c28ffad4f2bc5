//! Backend API client for the authentication endpoints
//!
//! Login hands the issued token straight to the [`SessionManager`], so the
//! rest of the client only ever sees the session. Registration leaves the
//! user signed out unless [`AuthClient::register_and_sign_in`] is used.

use crate::manager::SessionManager;
use caltrack_core::{validation_error, ApiConfig, CaltrackError, CaltrackResult, ErrorContext};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub mod reset;
pub mod validation;

pub use reset::PasswordResetFlow;

/// Client for the calorie tracker backend
#[derive(Clone)]
pub struct AuthClient {
    client: reqwest::Client,
    base_url: String,
    session: SessionManager,
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: String,
}

/// Account creation payload
#[derive(Debug, Clone, Serialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub name: String,
    pub role: String,
}

impl RegisterRequest {
    /// Self-service registrations always request the `USER` role
    pub fn new(
        email: impl Into<String>,
        password: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            name: name.into(),
            role: "USER".to_string(),
        }
    }

    /// Client-side checks run before anything is sent
    pub fn validate(&self, confirm_password: &str) -> CaltrackResult<()> {
        if self.email.is_empty()
            || self.password.is_empty()
            || confirm_password.is_empty()
            || self.name.is_empty()
        {
            return Err(invalid("Please fill in all fields", None));
        }
        if !validation::is_valid_registration_email(&self.email) {
            return Err(invalid("Email is invalid", Some("email")));
        }
        if confirm_password != self.password {
            return Err(invalid("Passwords don't match", Some("confirm_password")));
        }
        if !validation::is_strong_password(&self.password) {
            return Err(invalid(
                "Your password should have at least 8 letters, 1 capital letter, and 1 special character",
                Some("password"),
            ));
        }
        Ok(())
    }
}

/// Successful registration
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterResponse {
    pub user: serde_json::Value,
    pub token: String,
}

impl AuthClient {
    pub fn new(config: &ApiConfig, session: SessionManager) -> CaltrackResult<Self> {
        let client = create_http_client(config)?;
        let base_url = config.base_url.trim_end_matches('/').to_string();

        info!("Created backend API client for {}", base_url);

        Ok(Self {
            client,
            base_url,
            session,
        })
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub(crate) async fn post_json<B>(
        &self,
        path: &str,
        body: &B,
        operation: &str,
    ) -> CaltrackResult<reqwest::Response>
    where
        B: Serialize + ?Sized,
    {
        let url = self.endpoint(path);
        debug!(url = %url, operation, "POST");
        self.client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| request_error(e, operation, &url))
    }

    /// Sign in and start a session with the issued token
    pub async fn login(&self, email: &str, password: &str) -> CaltrackResult<()> {
        if email.is_empty() || password.is_empty() {
            return Err(invalid("Please fill in all fields", None));
        }

        let response = self
            .post_json("/api/users/login", &LoginRequest { email, password }, "login")
            .await?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(CaltrackError::Authentication {
                message: "Invalid email or password".to_string(),
                status: Some(401),
                context: ErrorContext::new("api_client").with_operation("login"),
            });
        }
        if !response.status().is_success() {
            return Err(handle_response_error(response, "login").await);
        }

        let body: LoginResponse = response.json().await.map_err(|e| CaltrackError::Network {
            message: format!("Malformed login response: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("api_client").with_operation("login"),
        })?;

        self.session.set_token(&body.token)?;
        info!("Login successful");
        Ok(())
    }

    /// Create an account; the returned token is not stored
    pub async fn register(&self, request: &RegisterRequest) -> CaltrackResult<RegisterResponse> {
        let response = self
            .post_json("/users/register", request, "register")
            .await?;

        if response.status() == reqwest::StatusCode::BAD_REQUEST {
            let reason = response.text().await.unwrap_or_default();
            debug!(reason = %reason, "Registration rejected");
            return Err(CaltrackError::Validation {
                message: "Email already exists".to_string(),
                field: Some("email".to_string()),
                context: ErrorContext::new("api_client")
                    .with_operation("register")
                    .with_metadata("reason", &reason),
            });
        }
        if !response.status().is_success() {
            return Err(handle_response_error(response, "register").await);
        }

        let body: RegisterResponse = response.json().await.map_err(|e| CaltrackError::Network {
            message: format!("Malformed registration response: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("api_client").with_operation("register"),
        })?;

        info!(email = %request.email, "Registration successful");
        Ok(body)
    }

    /// Create an account and start a session with the returned token
    pub async fn register_and_sign_in(
        &self,
        request: &RegisterRequest,
    ) -> CaltrackResult<RegisterResponse> {
        let body = self.register(request).await?;
        self.session.set_token(&body.token)?;
        Ok(body)
    }

    /// Tell the backend, then end the local session regardless of its answer
    pub async fn logout(&self) {
        if let Some(token) = self.session.get_token() {
            let url = self.endpoint("/users/logout");
            match self.client.post(&url).bearer_auth(&token).send().await {
                Ok(response) if response.status().is_success() => {
                    debug!("Backend acknowledged logout");
                }
                Ok(response) => {
                    warn!(status = response.status().as_u16(), "Backend refused logout");
                }
                Err(e) => warn!(error = %e, "Logout request failed"),
            }
        }
        self.session.clear_token();
    }

    /// `GET` a backend resource with the session's bearer token
    pub async fn authorized_get(&self, path: &str) -> CaltrackResult<serde_json::Value> {
        let token = self
            .session
            .get_token()
            .ok_or_else(|| CaltrackError::Authentication {
                message: "Not signed in".to_string(),
                status: None,
                context: ErrorContext::new("api_client")
                    .with_operation("authorized_get")
                    .with_suggestion("Run `caltrack login` first"),
            })?;

        let url = self.endpoint(path);
        let response = self
            .client
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| request_error(e, "authorized_get", &url))?;

        if !response.status().is_success() {
            return Err(handle_response_error(response, "authorized_get").await);
        }

        response.json().await.map_err(|e| CaltrackError::Network {
            message: format!("Malformed response from {}: {}", url, e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("api_client").with_operation("authorized_get"),
        })
    }
}

fn invalid(message: &str, field: Option<&str>) -> CaltrackError {
    match field {
        Some(field) => validation_error!(message, field, "api_client"),
        None => CaltrackError::Validation {
            message: message.to_string(),
            field: None,
            context: ErrorContext::new("api_client"),
        },
    }
}

fn request_error(e: reqwest::Error, operation: &str, url: &str) -> CaltrackError {
    CaltrackError::Network {
        message: format!("Request to {} failed: {}", url, e),
        source: Some(Box::new(e)),
        context: ErrorContext::new("api_client")
            .with_operation(operation)
            .with_suggestion("Check that the backend is running"),
    }
}

/// Helper function to create HTTP client with common configuration
pub(crate) fn create_http_client(config: &ApiConfig) -> CaltrackResult<reqwest::Client> {
    let mut headers = reqwest::header::HeaderMap::new();

    headers.insert(
        reqwest::header::USER_AGENT,
        reqwest::header::HeaderValue::from_str(&config.user_agent).map_err(|e| {
            CaltrackError::Config {
                message: format!("Invalid user agent: {}", e),
                source: Some(Box::new(e)),
                context: ErrorContext::new("http_client").with_operation("create_client"),
            }
        })?,
    );

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(config.timeout_seconds))
        .default_headers(headers)
        .build()
        .map_err(|e| CaltrackError::Network {
            message: format!("Failed to create HTTP client: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("http_client").with_operation("create_client"),
        })?;

    Ok(client)
}

/// Helper function to turn a non-success response into an error
pub(crate) async fn handle_response_error(
    response: reqwest::Response,
    operation: &str,
) -> CaltrackError {
    let status = response.status();
    let url = response.url().clone();
    let body = response.text().await.unwrap_or_default();

    // the backend answers either with plain text or with `{ "message": ... }`
    let detail = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|json| json.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or(body);
    let detail = if detail.is_empty() {
        status.canonical_reason().unwrap_or("Unknown error").to_string()
    } else {
        detail
    };

    let context = ErrorContext::new("api_client")
        .with_operation(operation)
        .with_metadata("url", url.as_str());

    match status.as_u16() {
        401 | 403 => CaltrackError::Authentication {
            message: detail,
            status: Some(status.as_u16()),
            context: context.with_suggestion("Sign in again"),
        },
        400 | 404 => CaltrackError::Validation {
            message: detail,
            field: None,
            context,
        },
        code => CaltrackError::Network {
            message: format!("HTTP {} error for {}: {}", code, url, detail),
            source: None,
            context: context.with_suggestion("Check network connectivity and backend status"),
        },
    }
}
