//! Navigation seam between the session and whatever renders views

use std::sync::RwLock;
use tracing::info;

/// Router the session can query and redirect
pub trait Navigator: Send + Sync {
    fn current_path(&self) -> String;

    fn navigate(&self, path: &str);
}

/// Navigator that keeps its path history in memory
#[derive(Debug)]
pub struct HistoryNavigator {
    history: RwLock<Vec<String>>,
}

impl HistoryNavigator {
    pub fn new(initial_path: impl Into<String>) -> Self {
        Self {
            history: RwLock::new(vec![initial_path.into()]),
        }
    }

    /// Every path visited, oldest first
    pub fn history(&self) -> Vec<String> {
        match self.history.read() {
            Ok(history) => history.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Number of redirects issued after the initial path
    pub fn redirect_count(&self) -> usize {
        self.history().len().saturating_sub(1)
    }
}

impl Default for HistoryNavigator {
    fn default() -> Self {
        Self::new("/")
    }
}

impl Navigator for HistoryNavigator {
    fn current_path(&self) -> String {
        self.history().last().cloned().unwrap_or_default()
    }

    fn navigate(&self, path: &str) {
        info!(path = %path, "Navigating");
        let mut history = match self.history.write() {
            Ok(history) => history,
            Err(poisoned) => poisoned.into_inner(),
        };
        history.push(path.to_string());
    }
}
