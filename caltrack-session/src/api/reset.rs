//! Password reset through an emailed confirmation code
//!
//! The pending email and code live in transient storage, so an abandoned
//! reset disappears with the run.

use super::{handle_response_error, validation, AuthClient};
use crate::storage::KeyValueStore;
use caltrack_core::{CaltrackError, CaltrackResult, ErrorContext};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

pub const RESET_EMAIL_KEY: &str = "resetEmail";
pub const CONFIRMATION_CODE_KEY: &str = "confirmationCode";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SendConfirmationRequest<'a> {
    email: &'a str,
    confirmation_code: &'a str,
    subject: &'a str,
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdatePasswordRequest<'a> {
    email: &'a str,
    new_password: &'a str,
}

pub struct PasswordResetFlow {
    api: AuthClient,
    transient: Arc<dyn KeyValueStore>,
}

impl PasswordResetFlow {
    pub fn new(api: AuthClient) -> Self {
        let transient = api.session().transient_store().clone();
        Self { api, transient }
    }

    /// Six decimal digits, never starting with zero
    pub fn generate_code() -> String {
        fastrand::u32(100_000..1_000_000).to_string()
    }

    /// Email a fresh code and remember it for [`verify_code`](Self::verify_code)
    pub async fn send_confirmation_code(&self, email: &str) -> CaltrackResult<()> {
        if !validation::is_valid_email(email) {
            return Err(CaltrackError::Validation {
                message: "Please enter a valid email address".to_string(),
                field: Some("email".to_string()),
                context: ErrorContext::new("password_reset")
                    .with_operation("send_confirmation_code"),
            });
        }

        let code = Self::generate_code();
        let request = SendConfirmationRequest {
            email,
            confirmation_code: &code,
            subject: "Password Reset Confirmation Code",
            text: format!(
                "Your confirmation code for password reset is: {}. This code will expire in 15 minutes.",
                code
            ),
        };

        let response = self
            .api
            .post_json("/users/send-confirmation", &request, "send_confirmation_code")
            .await?;
        if !response.status().is_success() {
            return Err(handle_response_error(response, "send_confirmation_code").await);
        }

        self.transient.set(RESET_EMAIL_KEY, email)?;
        self.transient.set(CONFIRMATION_CODE_KEY, &code)?;
        info!(email = %email, "Confirmation code sent");
        Ok(())
    }

    pub fn verify_code(&self, input: &str) -> bool {
        match self.transient.get(CONFIRMATION_CODE_KEY) {
            Ok(Some(code)) => code == input.trim(),
            Ok(None) => false,
            Err(e) => {
                warn!(error = %e, "Failed to read confirmation code");
                false
            }
        }
    }

    /// Email the current reset is for, if one is in progress
    pub fn pending_email(&self) -> Option<String> {
        self.transient.get(RESET_EMAIL_KEY).ok().flatten()
    }

    /// Set the new password for the pending email and end the reset
    pub async fn reset_password(&self, new_password: &str) -> CaltrackResult<()> {
        let email = self
            .pending_email()
            .ok_or_else(|| CaltrackError::Validation {
                message: "Email not found in session".to_string(),
                field: Some("email".to_string()),
                context: ErrorContext::new("password_reset")
                    .with_operation("reset_password")
                    .with_suggestion("Request a new confirmation code"),
            })?;

        let request = UpdatePasswordRequest {
            email: &email,
            new_password,
        };
        let response = self
            .api
            .post_json("/users/update-password", &request, "reset_password")
            .await?;
        if !response.status().is_success() {
            return Err(handle_response_error(response, "reset_password").await);
        }

        self.clear();
        info!(email = %email, "Password reset");
        Ok(())
    }

    /// Forget any pending reset
    pub fn clear(&self) {
        for key in [RESET_EMAIL_KEY, CONFIRMATION_CODE_KEY] {
            if let Err(e) = self.transient.remove(key) {
                warn!(key, error = %e, "Failed to clear reset state");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_six_digits() {
        for _ in 0..100 {
            let code = PasswordResetFlow::generate_code();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
            assert!(!code.starts_with('0'));
        }
    }

    #[test]
    fn update_password_body_uses_camel_case() {
        let body = serde_json::to_value(UpdatePasswordRequest {
            email: "a@b.com",
            new_password: "Secret!123",
        })
        .unwrap();
        assert_eq!(body["newPassword"], "Secret!123");
    }
}
