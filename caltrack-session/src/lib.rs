//! Caltrack Session - client-side session lifecycle
//!
//! Keeps the bearer token with its expiry window, gates views by role,
//! watches backend/frontend liveness while signed in, and decides whether
//! leaving the page ends the session.

pub mod api;
pub mod claims;
pub mod guard;
pub mod liveness;
pub mod manager;
pub mod navigation;
pub mod storage;
pub mod token;
pub mod unload;

pub use api::{AuthClient, PasswordResetFlow, RegisterRequest, RegisterResponse};
pub use claims::{decode_claims, Claims, ClaimsError, Role};
pub use guard::{AccessDecision, Redirect};
pub use liveness::{CheckOutcome, HttpProbe, LivenessMonitor, MonitorHandle, Probe};
pub use manager::{SessionManager, SessionManagerBuilder};
pub use navigation::{HistoryNavigator, Navigator};
pub use storage::{FileStore, KeyValueStore, MemoryStore};
pub use token::{SessionToken, StoredToken, TokenStore};
pub use unload::{PageExit, PageLoad, UnloadAction, UnloadCoordinator};
