//! Page load/exit bookkeeping
//!
//! Decides whether leaving the page should end the session. A refresh keeps
//! the session; closing the tab drops it; explicit navigation to the public
//! landing page is never treated as a logout.

use crate::storage::KeyValueStore;
use caltrack_core::UnloadStrategy;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Transient-storage key of the refresh flag
pub const REFRESH_FLAG_KEY: &str = "isRefreshing";

/// How the page was (re)entered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageLoad {
    /// First load or link navigation
    Navigate,
    Reload,
}

/// Structured signal delivered with a page exit, when the host has one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageExit {
    Reload,
    Close,
    Unknown,
}

/// What the session should do on exit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnloadAction {
    Preserve,
    ClearSession,
}

pub struct UnloadCoordinator {
    strategy: UnloadStrategy,
    transient: Arc<dyn KeyValueStore>,
    navigating_to_landing: AtomicBool,
}

impl UnloadCoordinator {
    pub fn new(strategy: UnloadStrategy, transient: Arc<dyn KeyValueStore>) -> Self {
        Self {
            strategy,
            transient,
            navigating_to_landing: AtomicBool::new(false),
        }
    }

    pub fn strategy(&self) -> UnloadStrategy {
        self.strategy
    }

    /// Record a page load
    pub fn on_load(&self, load: PageLoad) {
        match self.strategy {
            // Set unconditionally on every load, whatever `load` says.
            // A close that follows any load therefore also sees the flag.
            UnloadStrategy::RefreshFlag => {
                if let Err(e) = self.transient.set(REFRESH_FLAG_KEY, "true") {
                    warn!(error = %e, "Failed to set refresh flag");
                }
            }
            UnloadStrategy::NavigationType | UnloadStrategy::Disabled => {}
        }
        debug!(?load, strategy = ?self.strategy, "Page loaded");
    }

    /// Decide what a page exit means for the session
    pub fn on_unload(&self, exit: PageExit) -> UnloadAction {
        if self.navigating_to_landing.load(Ordering::SeqCst) {
            debug!("Exit is an in-app navigation to the landing page; keeping session");
            return UnloadAction::Preserve;
        }

        let action = match self.strategy {
            UnloadStrategy::RefreshFlag => {
                let refreshing = match self.transient.remove(REFRESH_FLAG_KEY) {
                    Ok(flag) => flag.is_some(),
                    Err(e) => {
                        warn!(error = %e, "Failed to read refresh flag");
                        true
                    }
                };
                if refreshing {
                    UnloadAction::Preserve
                } else {
                    UnloadAction::ClearSession
                }
            }
            UnloadStrategy::NavigationType => match exit {
                PageExit::Close => UnloadAction::ClearSession,
                PageExit::Reload | PageExit::Unknown => UnloadAction::Preserve,
            },
            UnloadStrategy::Disabled => UnloadAction::Preserve,
        };

        debug!(?exit, ?action, "Page exit handled");
        action
    }

    /// An exit the user explicitly asked to end the session with. A pending
    /// refresh flag cannot be told apart from a real reload here, so it is
    /// dropped first.
    pub fn on_close_requested(&self) -> UnloadAction {
        if self.strategy == UnloadStrategy::RefreshFlag {
            if let Err(e) = self.transient.remove(REFRESH_FLAG_KEY) {
                warn!(error = %e, "Failed to drop refresh flag");
            }
        }
        self.on_unload(PageExit::Close)
    }

    pub fn mark_navigating_to_landing_page(&self) {
        self.navigating_to_landing.store(true, Ordering::SeqCst);
    }

    pub fn reset_navigating_flag(&self) {
        self.navigating_to_landing.store(false, Ordering::SeqCst);
    }

    pub fn is_navigating_to_landing_page(&self) -> bool {
        self.navigating_to_landing.load(Ordering::SeqCst)
    }
}
