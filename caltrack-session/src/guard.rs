//! Role-gated access decisions

use crate::claims::{decode_claims, Claims, Role};
use caltrack_core::RouteConfig;
use serde::Serialize;
use tracing::debug;

/// Where a denied navigation should go
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Redirect {
    /// No usable session
    Login,
    /// Session is valid but lacks the required role
    Unauthorized,
    /// Already signed in; public-only pages send the user onward
    Dashboard,
}

impl Redirect {
    pub fn path<'a>(&self, routes: &'a RouteConfig) -> &'a str {
        match self {
            Redirect::Login => &routes.login,
            Redirect::Unauthorized => &routes.unauthorized,
            Redirect::Dashboard => &routes.dashboard,
        }
    }
}

/// Outcome of a guard check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AccessDecision {
    pub allowed: bool,
    pub redirect_to: Option<Redirect>,
}

impl AccessDecision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            redirect_to: None,
        }
    }

    pub fn deny(redirect: Redirect) -> Self {
        Self {
            allowed: false,
            redirect_to: Some(redirect),
        }
    }
}

/// Decision plus whether the token turned out to be undecodable
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub decision: AccessDecision,
    pub claims: Option<Claims>,
    /// The caller must discard the stored token
    pub discard_token: bool,
}

/// Evaluate a protected-route navigation
pub fn evaluate(token: Option<&str>, required_role: Option<&Role>) -> Evaluation {
    let Some(token) = token else {
        debug!("No session token; redirecting to login");
        return Evaluation {
            decision: AccessDecision::deny(Redirect::Login),
            claims: None,
            discard_token: false,
        };
    };

    let claims = match decode_claims(token) {
        Ok(claims) => claims,
        Err(e) => {
            debug!(error = %e, "Session token could not be decoded");
            return Evaluation {
                decision: AccessDecision::deny(Redirect::Login),
                claims: None,
                discard_token: true,
            };
        }
    };

    let decision = match required_role {
        Some(required) if !claims.has_role(required) => {
            debug!(
                required = %required,
                actual = ?claims.role,
                "Role mismatch; redirecting to unauthorized view"
            );
            AccessDecision::deny(Redirect::Unauthorized)
        }
        _ => AccessDecision::allow(),
    };

    Evaluation {
        decision,
        claims: Some(claims),
        discard_token: false,
    }
}

/// Public-only pages (login, register) send signed-in users to the dashboard
pub fn evaluate_public(token: Option<&str>) -> AccessDecision {
    match token {
        Some(_) => AccessDecision::deny(Redirect::Dashboard),
        None => AccessDecision::allow(),
    }
}
