use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use headless_chrome::protocol::cdp::Page::{CaptureScreenshotFormatOption, Viewport};
use headless_chrome::protocol::cdp::Target::DisposeBrowserContext;
use headless_chrome::{Browser, LaunchOptions, Tab};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::AgentConfig;
use crate::dom;
use crate::error::{AutomationError, Result};
use crate::executor::ActionDriver;
use crate::types::{
    ActionExecutionResult, ActionKind, AutomationAction, AutomationSession, session_key,
};

pub const CLICK_WAIT_TIMEOUT: Duration = Duration::from_secs(5);
pub const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(30);
pub const VIEWPORT: (u32, u32) = (1280, 720);
pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
    (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

#[derive(Debug, Clone)]
pub struct BrowserOptions {
    pub headless: bool,
    pub chrome_path: Option<PathBuf>,
    pub idle_timeout: Duration,
}

impl Default for BrowserOptions {
    fn default() -> Self {
        Self {
            headless: true,
            chrome_path: None,
            idle_timeout: Duration::from_secs(600),
        }
    }
}

impl From<&AgentConfig> for BrowserOptions {
    fn from(config: &AgentConfig) -> Self {
        Self {
            headless: config.headless,
            chrome_path: config.chrome_path.clone(),
            ..Self::default()
        }
    }
}

/// One browsing context and its page.
struct SessionHandle {
    context_id: String,
    tab: Arc<Tab>,
    record: AutomationSession,
}

#[derive(Default)]
struct ManagerState {
    browser: Option<Browser>,
    sessions: HashMap<String, SessionHandle>,
}

impl ManagerState {
    fn discard_browser(&mut self) -> (Option<Browser>, Vec<SessionHandle>) {
        let sessions = self.sessions.drain().map(|(_, handle)| handle).collect();
        (self.browser.take(), sessions)
    }
}

/// Owns the shared Chrome process and one isolated context + page per session key.
///
/// The map is guarded, but pages are not: callers must not drive the same
/// session from two tasks at once.
pub struct SessionManager {
    options: BrowserOptions,
    state: Mutex<ManagerState>,
}

/// headless_chrome is synchronous; keep its calls off the async workers.
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AutomationError::Browser(format!("browser task panicked: {e}")))?
}

fn launch_browser(options: &BrowserOptions) -> Result<Browser> {
    let launch = LaunchOptions {
        headless: options.headless,
        sandbox: false,
        path: options.chrome_path.clone(),
        window_size: Some(VIEWPORT),
        args: vec![
            OsStr::new("--disable-gpu"),
            OsStr::new("--disable-dev-shm-usage"),
            OsStr::new("--disable-setuid-sandbox"),
            OsStr::new("--no-first-run"),
            OsStr::new("--no-default-browser-check"),
        ],
        idle_browser_timeout: options.idle_timeout,
        ..Default::default()
    };

    Browser::new(launch).map_err(|e| AutomationError::SessionInit(e.to_string()))
}

fn open_page(browser: &Browser) -> Result<(String, Arc<Tab>)> {
    let context = browser
        .new_context()
        .map_err(|e| AutomationError::Browser(format!("failed to create context: {e}")))?;
    let tab = context
        .new_tab()
        .map_err(|e| AutomationError::Browser(format!("failed to open page: {e}")))?;
    tab.set_user_agent(USER_AGENT, None, None)
        .map_err(|e| AutomationError::Browser(format!("failed to set user agent: {e}")))?;
    tab.set_default_timeout(NAVIGATION_TIMEOUT);
    Ok((context.get_id().to_string(), tab))
}

/// The DevTools connection drops after `idle_timeout` without traffic, while
/// the `Browser` handle and its tab list stay around. Ask Chrome directly.
fn connection_alive(browser: &Browser) -> bool {
    match browser.get_version() {
        Ok(_) => true,
        Err(e) => {
            debug!(target: "hands", "browser version check failed: {e}");
            false
        }
    }
}

fn page_is_open(browser: &Browser, tab: &Arc<Tab>) -> bool {
    let tabs = browser.get_tabs();
    let Ok(tabs) = tabs.lock() else {
        return false;
    };
    tabs.iter()
        .any(|open| open.get_target_id() == tab.get_target_id())
}

/// Disposing the context takes its page with it; fall back to closing the page.
fn teardown(handle: &SessionHandle) {
    let disposed = handle.tab.call_method(DisposeBrowserContext {
        browser_context_id: handle.context_id.clone(),
    });
    if let Err(e) = disposed {
        debug!(target: "hands", session = %handle.record.session_id, "context dispose failed: {e}");
        if let Err(e) = handle.tab.close(false) {
            debug!(target: "hands", session = %handle.record.session_id, "page close failed: {e}");
        }
    }
}

fn capture(tab: &Tab, full_page: bool) -> anyhow::Result<Vec<u8>> {
    let clip = if full_page {
        let size = tab.evaluate(dom::PAGE_SIZE_JS, false)?;
        let (width, height) = size
            .value
            .and_then(|v| v.as_str().and_then(|s| serde_json::from_str::<(f64, f64)>(s).ok()))
            .unwrap_or((VIEWPORT.0 as f64, VIEWPORT.1 as f64));
        Some(Viewport {
            x: 0.0,
            y: 0.0,
            width,
            height,
            scale: 1.0,
        })
    } else {
        None
    };
    tab.capture_screenshot(CaptureScreenshotFormatOption::Png, None, clip, true)
}

fn eval_bool(tab: &Tab, script: &str) -> anyhow::Result<bool> {
    let result = tab.evaluate(script, false)?;
    Ok(result.value.and_then(|v| v.as_bool()).unwrap_or(false))
}

fn navigate_tab(tab: &Tab, url: &str) -> anyhow::Result<()> {
    tab.navigate_to(url)?.wait_until_navigated()?;
    Ok(())
}

fn dispatch(tab: &Tab, action: &AutomationAction) -> anyhow::Result<bool> {
    match &action.kind {
        ActionKind::Click { selector, delay } => {
            if let Some(ms) = delay {
                std::thread::sleep(Duration::from_millis(*ms));
            }
            tab.wait_for_element_with_custom_timeout(selector, CLICK_WAIT_TIMEOUT)?
                .click()?;
            Ok(true)
        }
        ActionKind::Type {
            selector,
            value,
            delay,
        } => {
            if let Some(ms) = delay {
                std::thread::sleep(Duration::from_millis(*ms));
            }
            let element = tab.wait_for_element_with_custom_timeout(selector, CLICK_WAIT_TIMEOUT)?;
            if !eval_bool(tab, &dom::clear_field_js(selector))? {
                return Ok(false);
            }
            element.type_into(value)?;
            Ok(true)
        }
        ActionKind::Select { selector, value } => {
            tab.wait_for_element_with_custom_timeout(selector, CLICK_WAIT_TIMEOUT)?;
            eval_bool(tab, &dom::select_option_js(selector, value))
        }
        ActionKind::Navigate { url, .. } => {
            navigate_tab(tab, url)?;
            Ok(true)
        }
        ActionKind::Wait { duration } => {
            std::thread::sleep(Duration::from_millis(*duration));
            Ok(true)
        }
        ActionKind::Scroll { direction, amount } => {
            tab.evaluate(&dom::scroll_js(*direction, *amount), false)?;
            Ok(true)
        }
        ActionKind::Screenshot { full_page } => {
            capture(tab, full_page.unwrap_or(false))?;
            Ok(true)
        }
    }
}

impl SessionManager {
    pub fn new(options: BrowserOptions) -> Self {
        Self {
            options,
            state: Mutex::new(ManagerState::default()),
        }
    }

    /// Launches the shared browser if it is not running yet.
    pub async fn init(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        self.ensure_browser(&mut state).await.map(|_| ())
    }

    /// Returns the shared browser, relaunching it when the connection died.
    /// Sessions on a dead browser are dropped; their keys get fresh pages on
    /// next use.
    async fn ensure_browser(&self, state: &mut ManagerState) -> Result<Browser> {
        if let Some(browser) = state.browser.clone() {
            let (alive, browser) =
                blocking(move || Ok((connection_alive(&browser), browser))).await?;
            if alive {
                return Ok(browser);
            }
            let (dead, orphaned) = state.discard_browser();
            warn!(target: "hands", sessions = orphaned.len(), "browser connection lost, relaunching");
            // The Chrome process goes away with its last handle.
            blocking(move || {
                drop(orphaned);
                drop(dead);
                drop(browser);
                Ok(())
            })
            .await?;
        }
        info!(target: "hands", headless = self.options.headless, "launching Chrome");
        let options = self.options.clone();
        let browser = blocking(move || launch_browser(&options)).await?;
        info!(target: "hands", "Chrome ready");
        state.browser = Some(browser.clone());
        Ok(browser)
    }

    /// Live page for `session_id`, creating the context and page on first use
    /// or after the previous page was closed.
    pub async fn get_page(&self, session_id: Option<&str>) -> Result<Arc<Tab>> {
        let key = session_key(session_id).to_string();
        let mut state = self.state.lock().await;
        let browser = self.ensure_browser(&mut state).await?;

        if let Some(handle) = state.sessions.get(&key) {
            if page_is_open(&browser, &handle.tab) {
                return Ok(handle.tab.clone());
            }
            warn!(target: "hands", session = %key, "page was closed, recreating");
        }

        let stale = state.sessions.remove(&key);
        let (handle, tab) = blocking({
            let browser = browser.clone();
            let key = key.clone();
            move || {
                if let Some(stale) = stale {
                    teardown(&stale);
                }
                let (context_id, tab) = open_page(&browser)?;
                let handle = SessionHandle {
                    context_id,
                    tab: tab.clone(),
                    record: AutomationSession::new(key),
                };
                Ok((handle, tab))
            }
        })
        .await?;

        debug!(target: "hands", session = %key, context = %handle.context_id, "created session");
        state.sessions.insert(key, handle);
        Ok(tab)
    }

    pub async fn navigate(&self, url: &str, session_id: Option<&str>) -> Result<()> {
        let tab = self.get_page(session_id).await?;
        let target = url.to_string();
        info!(target: "hands", session = session_key(session_id), url, "navigating");
        blocking(move || {
            navigate_tab(&tab, &target)
                .map_err(|e| AutomationError::Browser(format!("navigation to {target} failed: {e}")))
        })
        .await?;
        self.touch(session_id, Some(url)).await;
        Ok(())
    }

    pub async fn screenshot(&self, session_id: Option<&str>, full_page: bool) -> Result<Vec<u8>> {
        let tab = self.get_page(session_id).await?;
        blocking(move || {
            capture(&tab, full_page)
                .map_err(|e| AutomationError::Browser(format!("screenshot failed: {e}")))
        })
        .await
    }

    pub async fn get_content(&self, session_id: Option<&str>) -> Result<String> {
        let tab = self.get_page(session_id).await?;
        blocking(move || {
            tab.get_content()
                .map_err(|e| AutomationError::Browser(format!("failed to read DOM: {e}")))
        })
        .await
    }

    /// Dispatches one primitive. Engine exceptions come back as
    /// `Err(AutomationError::Action)`; browser launch failures as `SessionInit`.
    pub async fn execute_action(
        &self,
        action: &AutomationAction,
        session_id: Option<&str>,
    ) -> Result<bool> {
        let tab = self.get_page(session_id).await?;
        let owned = action.clone();
        debug!(target: "hands", session = session_key(session_id), kind = action.kind_name(), "dispatching action");
        let ok = blocking(move || {
            dispatch(&tab, &owned).map_err(|e| AutomationError::Action(e.to_string()))
        })
        .await?;

        let url = match &action.kind {
            ActionKind::Navigate { url, .. } if ok => Some(url.as_str()),
            _ => None,
        };
        self.touch(session_id, url).await;
        Ok(ok)
    }

    async fn touch(&self, session_id: Option<&str>, url: Option<&str>) {
        let mut state = self.state.lock().await;
        if let Some(handle) = state.sessions.get_mut(session_key(session_id)) {
            if let Some(url) = url {
                handle.record.url = url.to_string();
            }
            handle.record.updated_at = Utc::now();
        }
    }

    /// Appends one plan/execute round to the session record.
    pub async fn record_round(
        &self,
        session_id: Option<&str>,
        actions: &[AutomationAction],
        results: &[ActionExecutionResult],
    ) {
        let mut state = self.state.lock().await;
        if let Some(handle) = state.sessions.get_mut(session_key(session_id)) {
            handle.record.actions.extend_from_slice(actions);
            handle.record.results.extend_from_slice(results);
            handle.record.updated_at = Utc::now();
        }
    }

    pub async fn session(&self, session_id: &str) -> Option<AutomationSession> {
        let state = self.state.lock().await;
        state
            .sessions
            .get(session_key(Some(session_id)))
            .map(|handle| handle.record.clone())
    }

    pub async fn session_ids(&self) -> Vec<String> {
        let state = self.state.lock().await;
        let mut ids: Vec<String> = state.sessions.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Tears down one page + context. Returns whether the session existed.
    pub async fn close(&self, session_id: Option<&str>) -> Result<bool> {
        let key = session_key(session_id).to_string();
        let mut state = self.state.lock().await;
        let Some(handle) = state.sessions.remove(&key) else {
            return Ok(false);
        };
        drop(state);

        blocking(move || {
            teardown(&handle);
            Ok(())
        })
        .await?;
        info!(target: "hands", session = %key, "session closed");
        Ok(true)
    }

    /// Closes every session, then the browser process. Shutdown only.
    pub async fn close_all(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        let (browser, sessions) = state.discard_browser();
        let Some(browser) = browser else {
            return Ok(());
        };
        let count = sessions.len();

        blocking(move || {
            for handle in &sessions {
                teardown(handle);
            }
            // Dropping the last handle kills the Chrome process.
            drop(browser);
            Ok(())
        })
        .await?;
        info!(target: "hands", sessions = count, "browser shut down");
        Ok(())
    }
}

#[async_trait]
impl ActionDriver for SessionManager {
    async fn open_session(&self, session_id: &str) -> Result<()> {
        self.get_page(Some(session_id)).await.map(|_| ())
    }

    async fn execute_action(&self, session_id: &str, action: &AutomationAction) -> Result<bool> {
        SessionManager::execute_action(self, action, Some(session_id)).await
    }

    async fn capture_screenshot(&self, session_id: &str, full_page: bool) -> Result<Vec<u8>> {
        self.screenshot(Some(session_id), full_page).await
    }

    async fn navigate(&self, session_id: &str, url: &str) -> Result<()> {
        SessionManager::navigate(self, url, Some(session_id)).await
    }

    async fn record_round(
        &self,
        session_id: &str,
        actions: &[AutomationAction],
        results: &[ActionExecutionResult],
    ) {
        SessionManager::record_round(self, Some(session_id), actions, results).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bookkeeping_is_empty_before_any_session() {
        let manager = SessionManager::new(BrowserOptions::default());
        assert!(manager.session_ids().await.is_empty());
        assert!(manager.session("default").await.is_none());
        assert!(!manager.close(Some("nope")).await.unwrap());
        manager.close_all().await.unwrap();
    }
}
