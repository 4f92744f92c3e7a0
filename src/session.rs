//! Keeps one logged-in browser tab parked on the highlights list.
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::browser::{Browser, DialogAction, DialogHandler};
use crate::config;
use crate::error::ScrapeError;

pub const NOTEBOOKS_URL: &str = "https://read.readmoo.com/#/history/highlights/readings";
pub const LOGIN_URL: &str = "https://member.readmoo.com/login";

pub mod selectors {
    /// Present once the highlights list has rendered.
    pub const LIST_MARKER: &str = "div.highlights-container";
    pub const EMAIL_INPUT: &str = "#login-form > div:nth-child(1) > input";
    pub const PASSWORD_INPUT: &str = "#login-form > div:nth-child(2) > input";
    pub const SIGN_IN_BUTTON: &str = "#sign-in-btn";
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub target_url: String,
    pub login_url: String,
    pub max_attempts: u32,
    pub wait_timeout: Duration,
    pub login_timeout: Duration,
    /// Pause after submitting the login form.
    pub settle_delay: Duration,
}

impl SessionSettings {
    pub fn from_config(cfg: &config::Scrape) -> Self {
        Self {
            target_url: NOTEBOOKS_URL.into(),
            login_url: LOGIN_URL.into(),
            max_attempts: cfg.max_session_attempts,
            wait_timeout: cfg.wait_timeout(),
            login_timeout: Duration::from_secs(3),
            settle_delay: Duration::from_millis(500),
        }
    }
}

/// An established session. Dereferences to the browser positioned on the list.
pub struct SessionHandle<B> {
    browser: Arc<B>,
    generation: u64,
}

impl<B> SessionHandle<B> {
    /// Increases by one every time the session is (re)established.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl<B> Clone for SessionHandle<B> {
    fn clone(&self) -> Self {
        Self {
            browser: Arc::clone(&self.browser),
            generation: self.generation,
        }
    }
}

impl<B> Deref for SessionHandle<B> {
    type Target = B;

    fn deref(&self) -> &B {
        &self.browser
    }
}

#[derive(Debug, Default)]
struct SessionState {
    established: bool,
    dialog_handler_installed: bool,
    /// Attempts spent by the last establishment, when it gave up.
    last_failure: Option<u32>,
}

pub struct SessionKeeper<B: Browser> {
    browser: Arc<B>,
    credentials: config::Readmoo,
    settings: SessionSettings,
    state: Mutex<SessionState>,
    generation: AtomicU64,
    /// Bumped after every establishment run, successful or not.
    runs: AtomicU64,
}

impl<B: Browser> SessionKeeper<B> {
    pub fn new(browser: B, credentials: config::Readmoo, settings: SessionSettings) -> Self {
        Self {
            browser: Arc::new(browser),
            credentials,
            settings,
            state: Mutex::new(SessionState::default()),
            generation: AtomicU64::new(0),
            runs: AtomicU64::new(0),
        }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Return a handle on the list view, establishing the session first if needed.
    ///
    /// Establishment is single-flight: callers that queued up behind an
    /// in-flight run reuse its outcome, success or failure, instead of
    /// navigating again, even with `force_refresh`. Otherwise `force_refresh`
    /// re-navigates an already established session so the caller starts from
    /// a clean list.
    pub async fn ensure(&self, force_refresh: bool) -> Result<SessionHandle<B>, ScrapeError> {
        let observed = self.runs.load(Ordering::Acquire);
        let mut state = self.state.lock().await;
        let generation = self.generation.load(Ordering::Acquire);

        if self.runs.load(Ordering::Acquire) != observed {
            if let Some(attempts) = state.last_failure {
                return Err(ScrapeError::SessionUnavailable { attempts });
            }
            if state.established {
                return Ok(self.handle(generation));
            }
        }
        if state.established && !force_refresh {
            return Ok(self.handle(generation));
        }

        state.established = false;
        let outcome = self.establish(&mut state).await;
        self.runs.fetch_add(1, Ordering::AcqRel);
        match outcome {
            Ok(()) => {
                state.established = true;
                state.last_failure = None;
                let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
                Ok(self.handle(generation))
            }
            Err(attempts) => {
                state.last_failure = Some(attempts);
                Err(ScrapeError::SessionUnavailable { attempts })
            }
        }
    }

    /// Forget the established state; the next `ensure` navigates again.
    pub async fn invalidate(&self) {
        self.state.lock().await.established = false;
    }

    pub async fn close(&self) -> Result<()> {
        self.invalidate().await;
        self.browser.close().await
    }

    fn handle(&self, generation: u64) -> SessionHandle<B> {
        SessionHandle {
            browser: Arc::clone(&self.browser),
            generation,
        }
    }

    /// Arrive at the list, logging in between attempts. Fails with the number
    /// of attempts spent.
    #[instrument(skip_all)]
    async fn establish(&self, state: &mut SessionState) -> Result<(), u32> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.arrive().await {
                Ok(()) => {
                    if !state.dialog_handler_installed {
                        match self.browser.on_dialog(accept_all_dialogs()).await {
                            Ok(()) => state.dialog_handler_installed = true,
                            Err(err) => warn!(?err, "failed to install dialog handler; retrying on next session"),
                        }
                    }
                    info!(attempts, "arrived at highlights list");
                    return Ok(());
                }
                Err(err) => {
                    warn!(?err, attempts, "highlights list not reachable");
                    if attempts >= self.settings.max_attempts {
                        return Err(attempts);
                    }
                    if let Err(err) = self.login().await {
                        warn!(?err, "login failed");
                    }
                    info!("retrying to arrive at highlights list");
                }
            }
        }
    }

    async fn arrive(&self) -> Result<()> {
        self.browser.navigate(&self.settings.target_url).await?;
        self.browser
            .wait_for_selector(selectors::LIST_MARKER, self.settings.wait_timeout)
            .await
    }

    async fn login(&self) -> Result<()> {
        let browser = &self.browser;
        browser.navigate(&self.settings.login_url).await?;
        browser
            .wait_for_selector(selectors::EMAIL_INPUT, self.settings.login_timeout)
            .await?;

        let email = browser.query(None, selectors::EMAIL_INPUT).await?;
        let password = browser.query(None, selectors::PASSWORD_INPUT).await?;
        let (Some(email), Some(password)) = (email, password) else {
            return Err(anyhow!("login form not found"));
        };

        browser.type_text(&email, &self.credentials.email).await?;
        browser.type_text(&password, &self.credentials.password).await?;
        crate::browser::click_selector(browser.as_ref(), selectors::SIGN_IN_BUTTON).await?;
        tokio::time::sleep(self.settings.settle_delay).await;

        info!("logged in to Readmoo");
        Ok(())
    }
}

fn accept_all_dialogs() -> DialogHandler {
    Arc::new(|message: &str| {
        info!(%message, "accepting browser dialog");
        DialogAction::Accept
    })
}
