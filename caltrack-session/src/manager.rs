//! Session manager: owns the token lifecycle and everything hanging off it

use crate::claims::{decode_claims, Claims, Role};
use crate::guard::{self, AccessDecision};
use crate::liveness::{LivenessMonitor, MonitorHandle, Probe};
use crate::navigation::{HistoryNavigator, Navigator};
use crate::storage::{FileStore, KeyValueStore, MemoryStore};
use crate::token::{StoredToken, TokenStore};
use crate::unload::{PageExit, PageLoad, UnloadAction, UnloadCoordinator};
use caltrack_core::{config_error, CaltrackConfig, CaltrackResult, Clock, SystemClock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::{debug, info, warn};

/// Cheaply cloneable handle to one session
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    config: CaltrackConfig,
    tokens: TokenStore,
    transient: Arc<dyn KeyValueStore>,
    navigator: Arc<dyn Navigator>,
    unload: UnloadCoordinator,
    liveness: Option<Arc<LivenessMonitor>>,
    monitor: Mutex<Option<MonitorHandle>>,
    /// Bumped under the `monitor` lock whenever a session starts or stops;
    /// a stale check may only end the generation it was started for
    generation: AtomicU64,
}

pub struct SessionManagerBuilder {
    config: CaltrackConfig,
    clock: Option<Arc<dyn Clock>>,
    durable: Option<Arc<dyn KeyValueStore>>,
    transient: Option<Arc<dyn KeyValueStore>>,
    navigator: Option<Arc<dyn Navigator>>,
    probes: Option<(Arc<dyn Probe>, Arc<dyn Probe>)>,
}

impl SessionManagerBuilder {
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Storage that outlives the process (defaults to a [`FileStore`])
    pub fn durable_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.durable = Some(store);
        self
    }

    /// Per-run storage for flags (defaults to a [`MemoryStore`])
    pub fn transient_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.transient = Some(store);
        self
    }

    pub fn navigator(mut self, navigator: Arc<dyn Navigator>) -> Self {
        self.navigator = Some(navigator);
        self
    }

    /// Replace the HTTP probes built from the liveness config
    pub fn probes(mut self, backend: Arc<dyn Probe>, frontend: Arc<dyn Probe>) -> Self {
        self.probes = Some((backend, frontend));
        self
    }

    pub fn build(self) -> CaltrackResult<SessionManager> {
        let config = self.config;
        config.validate()?;

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let durable = match self.durable {
            Some(store) => store,
            None => {
                let dir = config
                    .session
                    .data_dir
                    .as_ref()
                    .map(std::path::PathBuf::from)
                    .or_else(FileStore::default_dir)
                    .ok_or_else(|| {
                        config_error!(
                            "No data directory available; set session.data_dir",
                            "session_manager"
                        )
                    })?;
                Arc::new(FileStore::open(dir)?)
            }
        };

        let transient = self
            .transient
            .unwrap_or_else(|| Arc::new(MemoryStore::new()));

        let navigator = self
            .navigator
            .unwrap_or_else(|| Arc::new(HistoryNavigator::new(config.routes.landing.clone())));

        let liveness = if config.liveness.enabled {
            let monitor = match self.probes {
                Some((backend, frontend)) => {
                    LivenessMonitor::new(&config.liveness, backend, frontend, clock.clone())
                }
                None => LivenessMonitor::from_config(&config.liveness, clock.clone())?,
            };
            Some(Arc::new(monitor))
        } else {
            None
        };

        let tokens = TokenStore::new(
            durable,
            clock,
            config.session.storage_key.clone(),
            config.session.token_ttl_ms,
        );
        let unload = UnloadCoordinator::new(config.session.unload_strategy, transient.clone());

        Ok(SessionManager {
            inner: Arc::new(SessionInner {
                config,
                tokens,
                transient,
                navigator,
                unload,
                liveness,
                monitor: Mutex::new(None),
                generation: AtomicU64::new(0),
            }),
        })
    }
}

impl SessionManager {
    pub fn builder(config: CaltrackConfig) -> SessionManagerBuilder {
        SessionManagerBuilder {
            config,
            clock: None,
            durable: None,
            transient: None,
            navigator: None,
            probes: None,
        }
    }

    pub fn config(&self) -> &CaltrackConfig {
        &self.inner.config
    }

    pub fn navigator(&self) -> &Arc<dyn Navigator> {
        &self.inner.navigator
    }

    /// Per-run storage shared with collaborators such as the reset flow
    pub fn transient_store(&self) -> &Arc<dyn KeyValueStore> {
        &self.inner.transient
    }

    /// Page-load entry point: records the load and resumes monitoring for a
    /// session that survived it
    pub fn bootstrap(&self, load: PageLoad) {
        self.inner.unload.on_load(load);
        if self.get_token().is_some() {
            info!("Existing session found at load");
            let mut slot = self.lock_monitor();
            self.start_monitor(&mut slot);
        }
    }

    /// Persist a freshly issued credential and start the liveness monitor
    pub fn set_token(&self, raw: &str) -> CaltrackResult<()> {
        let mut slot = self.lock_monitor();
        self.inner.tokens.set(raw)?;
        self.start_monitor(&mut slot);
        Ok(())
    }

    /// Current credential, or `None` once it is missing, malformed or expired
    pub fn get_token(&self) -> Option<String> {
        let token = self.inner.tokens.get();
        if token.is_none() {
            self.stop_monitor();
        }
        token
    }

    /// Raw state of the storage slot, without cleanup
    pub fn stored_token(&self) -> StoredToken {
        self.inner.tokens.load()
    }

    pub fn clear_token(&self) {
        if self.inner.tokens.clear() {
            debug!("Session token cleared");
        }
        self.stop_monitor();
    }

    pub fn check_token_validity(&self) -> bool {
        self.get_token().is_some()
    }

    /// Decoded claims of the current token
    pub fn claims(&self) -> Option<Claims> {
        let token = self.get_token()?;
        match decode_claims(&token) {
            Ok(claims) => Some(claims),
            Err(e) => {
                debug!(error = %e, "Current token has no decodable claims");
                None
            }
        }
    }

    pub fn mark_navigating_to_landing_page(&self) {
        self.inner.unload.mark_navigating_to_landing_page();
    }

    pub fn reset_navigating_flag(&self) {
        self.inner.unload.reset_navigating_flag();
    }

    /// Page-exit entry point
    pub fn handle_unload(&self, exit: PageExit) -> UnloadAction {
        self.apply_unload(self.inner.unload.on_unload(exit))
    }

    /// Exit the user explicitly asked to end the session with. Ends it unless
    /// unload handling is disabled or the exit is a landing-page navigation.
    pub fn close_on_exit(&self) -> UnloadAction {
        self.apply_unload(self.inner.unload.on_close_requested())
    }

    fn apply_unload(&self, action: UnloadAction) -> UnloadAction {
        if action == UnloadAction::ClearSession {
            info!("Page closed; ending session");
            self.clear_token();
        }
        action
    }

    /// Decide whether the session may enter a view requiring `required_role`
    pub fn is_authorized(&self, required_role: Option<&Role>) -> AccessDecision {
        let token = self.get_token();
        let evaluation = guard::evaluate(token.as_deref(), required_role);
        if evaluation.discard_token {
            warn!("Discarding session token with undecodable claims");
            self.clear_token();
        }
        evaluation.decision
    }

    /// Decision for pages only anonymous users should see
    pub fn public_route_decision(&self) -> AccessDecision {
        guard::evaluate_public(self.get_token().as_deref())
    }

    /// Guard a navigation and perform it, or the redirect it calls for
    pub fn navigate_protected(&self, path: &str, required_role: Option<&Role>) -> AccessDecision {
        let decision = self.is_authorized(required_role);
        match decision.redirect_to {
            None => self.inner.navigator.navigate(path),
            Some(redirect) => self
                .inner
                .navigator
                .navigate(redirect.path(&self.inner.config.routes)),
        }
        decision
    }

    /// End the session because the backend or frontend stopped answering.
    ///
    /// Only the caller that actually removes the token redirects, so
    /// concurrent stale checks produce a single logout.
    pub fn force_logout(&self) {
        let removed = {
            let mut slot = self.lock_monitor();
            self.end_generation(&mut slot)
        };
        self.redirect_after_logout(removed);
    }

    /// Stale-check callback of the monitor started for `generation`. A
    /// session started since then is left alone.
    fn force_logout_for(&self, generation: u64) {
        let removed = {
            let mut slot = self.lock_monitor();
            if self.inner.generation.load(Ordering::SeqCst) != generation {
                debug!(generation, "Ignoring stale check from a previous session");
                return;
            }
            self.end_generation(&mut slot)
        };
        self.redirect_after_logout(removed);
    }

    /// Clear the token and stop monitoring while holding the monitor lock
    fn end_generation(&self, slot: &mut Option<MonitorHandle>) -> bool {
        let removed = self.inner.tokens.clear();
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(handle) = slot.take() {
            handle.stop();
            debug!("Liveness monitor stopped");
        }
        removed
    }

    fn redirect_after_logout(&self, removed: bool) {
        if !removed {
            return;
        }

        warn!("Liveness lost past threshold; session terminated");
        let login = &self.inner.config.routes.login;
        if self.inner.navigator.current_path() != *login {
            self.inner.navigator.navigate(login);
        }
    }

    pub fn is_monitoring(&self) -> bool {
        self.lock_monitor()
            .as_ref()
            .map(MonitorHandle::is_active)
            .unwrap_or(false)
    }

    /// Last successful liveness check, when monitoring is configured
    pub fn last_successful_check_at(&self) -> Option<i64> {
        self.inner
            .liveness
            .as_ref()
            .map(|monitor| monitor.state().last_successful_check_at())
    }

    /// Stop background work without touching the token
    pub fn shutdown(&self) {
        self.stop_monitor();
    }

    fn lock_monitor(&self) -> MutexGuard<'_, Option<MonitorHandle>> {
        self.inner
            .monitor
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start a new generation; the caller holds the monitor lock
    fn start_monitor(&self, slot: &mut Option<MonitorHandle>) {
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;

        // replacing an existing handle stops the previous monitor
        *slot = None;

        let Some(liveness) = &self.inner.liveness else {
            return;
        };

        if tokio::runtime::Handle::try_current().is_err() {
            warn!("No async runtime available; liveness monitoring disabled");
            return;
        }

        let weak: Weak<SessionInner> = Arc::downgrade(&self.inner);
        *slot = Some(liveness.spawn(move || {
            if let Some(inner) = weak.upgrade() {
                SessionManager { inner }.force_logout_for(generation);
            }
        }));
    }

    fn stop_monitor(&self) {
        let mut slot = self.lock_monitor();
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(handle) = slot.take() {
            handle.stop();
            debug!("Liveness monitor stopped");
        }
    }
}
