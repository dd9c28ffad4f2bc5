//! JWT claim decoding and role normalization
//!
//! The client never holds the backend's signing key, so claims are read
//! without signature verification. They only drive navigation decisions;
//! the backend re-verifies the token on every API call.

use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Role carried in the `role` claim.
///
/// The canonical form is the bare uppercase name; the `ROLE_` prefix the
/// backend adds and any case differences are stripped when parsing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Role {
    Admin,
    User,
    Other(String),
}

impl Role {
    pub fn as_str(&self) -> &str {
        match self {
            Role::Admin => "ADMIN",
            Role::User => "USER",
            Role::Other(name) => name.as_str(),
        }
    }
}

impl From<&str> for Role {
    fn from(s: &str) -> Self {
        let upper = s.trim().to_ascii_uppercase();
        let bare = upper.strip_prefix("ROLE_").unwrap_or(&upper);
        match bare {
            "ADMIN" => Role::Admin,
            "USER" => Role::User,
            other => Role::Other(other.to_string()),
        }
    }
}

impl FromStr for Role {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Role::from(s))
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Role {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Role {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Role::from(raw.as_str()))
    }
}

/// Claims issued by the backend
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    /// Subject (the user's email)
    pub sub: Option<String>,
    pub role: Option<Role>,
    pub user_id: Option<serde_json::Value>,
    /// Issued at (seconds)
    pub iat: Option<i64>,
    /// Expiration time (seconds)
    pub exp: Option<i64>,
}

impl Claims {
    pub fn has_role(&self, required: &Role) -> bool {
        self.role.as_ref() == Some(required)
    }
}

/// Claim decoding errors
#[derive(Debug, thiserror::Error)]
pub enum ClaimsError {
    #[error("Token is not a decodable JWT: {0}")]
    Decode(#[from] jsonwebtoken::errors::Error),
}

fn unverified_validation() -> Validation {
    let mut validation = Validation::default();
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();
    validation
}

/// Decode the payload of a compact JWT without verifying its signature
pub fn decode_claims(token: &str) -> Result<Claims, ClaimsError> {
    let data = decode::<Claims>(token, &DecodingKey::from_secret(&[]), &unverified_validation())?;
    Ok(data.claims)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_prefix_and_case_are_normalized() {
        assert_eq!("ROLE_ADMIN".parse::<Role>().unwrap(), Role::Admin);
        assert_eq!("admin".parse::<Role>().unwrap(), Role::Admin);
        assert_eq!("ROLE_USER".parse::<Role>().unwrap(), Role::User);
        assert_eq!(
            "role_auditor".parse::<Role>().unwrap(),
            Role::Other("AUDITOR".to_string())
        );
        assert_eq!(Role::Admin.to_string(), "ADMIN");
    }

    #[test]
    fn decodes_backend_issued_token() {
        let claims = decode_claims(&test_tokens::with_role("ROLE_ADMIN")).unwrap();
        assert_eq!(claims.sub.as_deref(), Some("jane@example.com"));
        assert_eq!(claims.role, Some(Role::Admin));
        assert_eq!(claims.user_id, Some(serde_json::json!(7)));
        assert!(claims.has_role(&Role::Admin));
        assert!(!claims.has_role(&Role::User));
    }

    #[test]
    fn past_exp_claim_does_not_fail_decoding() {
        // exp in the test token is in 2023; expiry is owned by the token store
        assert!(decode_claims(&test_tokens::with_role("USER")).is_ok());
    }

    #[test]
    fn missing_role_decodes_to_none() {
        let claims = decode_claims(&test_tokens::without_role()).unwrap();
        assert_eq!(claims.role, None);
        assert!(!claims.has_role(&Role::User));
    }

    #[test]
    fn garbage_is_a_decode_error() {
        assert!(decode_claims("definitely-not-a-jwt").is_err());
        assert!(decode_claims("a.b.c").is_err());
    }
}
