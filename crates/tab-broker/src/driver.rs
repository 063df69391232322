//! Browser drivers: the `TabDriver` trait, the chromiumoxide-backed
//! implementation, and the in-memory stub.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use std::{env, fmt};

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::target::{
    CreateTargetParams, EventTargetCreated, EventTargetDestroyed,
};
use chromiumoxide::error::CdpError;
use chromiumoxide::page::Page;
use dashmap::DashMap;
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::debug;
use which::which;

use reportscope_core_types::TabId;

use crate::{BrokerError, BLANK_URL};

/// Snapshot of one tab as seen by the driver.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TabInfo {
    pub id: TabId,
    pub url: String,
}

/// Lifecycle events surfaced to the pipeline.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TabEvent {
    /// The tab became the foreground tab.
    Activated(TabId),
    /// The tab was closed.
    Removed(TabId),
    /// The tab finished loading its document.
    LoadComplete(TabId),
}

/// Minimal browser capability surface needed by acquisition and deferred
/// navigation.
#[async_trait]
pub trait TabDriver: Send + Sync {
    /// The currently foregrounded tab, if the driver knows one.
    async fn active_tab(&self) -> Result<Option<TabInfo>, BrokerError>;

    /// Opens a tab at `url`; `active` foregrounds it immediately.
    async fn create_tab(&self, url: &str, active: bool) -> Result<TabId, BrokerError>;

    /// Points an existing tab at a new URL.
    async fn navigate(&self, tab: &TabId, url: &str) -> Result<(), BrokerError>;

    /// Brings an existing tab to the foreground.
    async fn activate(&self, tab: &TabId) -> Result<(), BrokerError>;

    /// Whether the tab is still open.
    async fn tab_exists(&self, tab: &TabId) -> Result<bool, BrokerError>;

    /// Evaluates an expression in the tab's page context, awaiting promises,
    /// and returns the JSON value.
    async fn eval(&self, tab: &TabId, expression: &str) -> Result<Value, BrokerError>;

    /// Subscribes to tab lifecycle events.
    fn events(&self) -> broadcast::Receiver<TabEvent>;
}

/// Configuration for the CDP driver.
#[derive(Clone, Debug)]
pub struct BrokerConfig {
    /// Attach to an already-running browser instead of launching one. This is
    /// the usual mode: the operator's browser holds the authenticated session.
    pub websocket_url: Option<String>,
    pub executable: Option<PathBuf>,
    pub user_data_dir: PathBuf,
    pub headless: bool,
    /// Interval for the foreground-visibility poll.
    pub poll_interval_ms: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            websocket_url: resolve_websocket_url(),
            executable: detect_chrome_executable(),
            user_data_dir: default_profile_dir(),
            headless: false,
            poll_interval_ms: 250,
        }
    }
}

fn resolve_websocket_url() -> Option<String> {
    match env::var("REPORTSCOPE_CDP_URL") {
        Ok(value) => {
            let trimmed = value.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Err(_) => None,
    }
}

fn default_profile_dir() -> PathBuf {
    if let Ok(path) = env::var("REPORTSCOPE_CHROME_PROFILE") {
        return PathBuf::from(path);
    }
    Path::new("./.reportscope-profile").into()
}

pub fn detect_chrome_executable() -> Option<PathBuf> {
    if let Ok(raw) = env::var("REPORTSCOPE_CHROME") {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            let candidate = PathBuf::from(trimmed);
            if candidate.exists() {
                return Some(candidate);
            }
        }
    }

    for name in chrome_executable_names() {
        if let Ok(path) = which(name) {
            return Some(path);
        }
    }

    for candidate in os_specific_chrome_paths() {
        if candidate.exists() {
            return Some(candidate);
        }
    }

    None
}

fn chrome_executable_names() -> &'static [&'static str] {
    #[cfg(target_os = "windows")]
    {
        &["chrome.exe", "chromium.exe", "msedge.exe"]
    }

    #[cfg(not(target_os = "windows"))]
    {
        &[
            "google-chrome-stable",
            "google-chrome",
            "chromium",
            "chromium-browser",
        ]
    }
}

fn os_specific_chrome_paths() -> Vec<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        vec![
            PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome"),
            PathBuf::from("/Applications/Chromium.app/Contents/MacOS/Chromium"),
        ]
    }

    #[cfg(target_os = "linux")]
    {
        vec![
            PathBuf::from("/usr/bin/google-chrome-stable"),
            PathBuf::from("/usr/bin/google-chrome"),
            PathBuf::from("/usr/bin/chromium-browser"),
            PathBuf::from("/usr/bin/chromium"),
        ]
    }

    #[cfg(not(any(target_os = "macos", target_os = "linux")))]
    {
        Vec::new()
    }
}

struct TrackedPage {
    page: Page,
    visible: bool,
}

/// `TabDriver` over a live Chromium instance.
///
/// CDP has no cross-window "which tab has focus" query, so the driver tracks
/// the tab it last foregrounded itself and refines that with a visibility
/// poll over the pages it knows about.
pub struct CdpTabDriver {
    browser: Browser,
    pages: Arc<DashMap<TabId, TrackedPage>>,
    current: Arc<Mutex<Option<TabId>>>,
    events: broadcast::Sender<TabEvent>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl fmt::Debug for CdpTabDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CdpTabDriver")
            .field("pages", &self.pages.len())
            .finish()
    }
}

impl From<CdpError> for BrokerError {
    fn from(err: CdpError) -> Self {
        BrokerError::Driver(err.to_string())
    }
}

impl CdpTabDriver {
    /// Connects to a running browser or launches a fresh one, then starts the
    /// lifecycle watchers.
    pub async fn start(cfg: BrokerConfig) -> Result<Arc<Self>, BrokerError> {
        let (browser, mut handler) = match &cfg.websocket_url {
            Some(ws) => Browser::connect(ws.clone()).await?,
            None => {
                let mut builder = BrowserConfig::builder().user_data_dir(&cfg.user_data_dir);
                if let Some(exe) = &cfg.executable {
                    builder = builder.chrome_executable(exe);
                }
                if !cfg.headless {
                    builder = builder.with_head();
                }
                let config = builder.build().map_err(BrokerError::Driver)?;
                Browser::launch(config).await?
            }
        };

        let (events, _) = broadcast::channel(64);
        let driver = Arc::new(Self {
            browser,
            pages: Arc::new(DashMap::new()),
            current: Arc::new(Mutex::new(None)),
            events,
            tasks: Mutex::new(Vec::new()),
        });

        let io_task = tokio::spawn(async move { while handler.next().await.is_some() {} });
        let destroy_task = driver.spawn_destroy_watcher().await?;
        let create_task = driver.spawn_create_watcher().await?;
        let visibility_task = driver.spawn_visibility_poll(cfg.poll_interval_ms);
        {
            let mut tasks = driver.tasks.lock().await;
            tasks.push(io_task);
            tasks.push(destroy_task);
            tasks.push(create_task);
            tasks.push(visibility_task);
        }

        // When attached to a running browser the operator's tabs already
        // exist; pick them up and settle visibility before the first caller
        // asks for the active tab.
        driver.sync_existing_pages().await?;
        driver.refresh_visibility().await;

        Ok(driver)
    }

    /// Tracks every page the browser reports that the driver has not seen
    /// yet. Pages opened by this driver keep their existing ids.
    async fn sync_existing_pages(&self) -> Result<(), BrokerError> {
        for page in self.browser.pages().await? {
            let known = self
                .pages
                .iter()
                .any(|entry| entry.value().page.target_id() == page.target_id());
            if known {
                continue;
            }
            let id = TabId::new();
            debug!(tab = %id, "tracking existing page");
            self.pages.insert(
                id,
                TrackedPage {
                    page,
                    visible: false,
                },
            );
        }
        Ok(())
    }

    async fn spawn_destroy_watcher(self: &Arc<Self>) -> Result<JoinHandle<()>, BrokerError> {
        let mut destroyed = self
            .browser
            .event_listener::<EventTargetDestroyed>()
            .await?;
        let pages = Arc::clone(&self.pages);
        let current = Arc::clone(&self.current);
        let events = self.events.clone();
        Ok(tokio::spawn(async move {
            while let Some(event) = destroyed.next().await {
                let removed = pages
                    .iter()
                    .find(|entry| *entry.value().page.target_id() == event.target_id)
                    .map(|entry| entry.key().clone());
                if let Some(id) = removed {
                    pages.remove(&id);
                    let mut cur = current.lock().await;
                    if cur.as_ref() == Some(&id) {
                        *cur = None;
                    }
                    drop(cur);
                    debug!(tab = %id, "tab closed");
                    let _ = events.send(TabEvent::Removed(id));
                }
            }
        }))
    }

    /// Picks up tabs the operator opens after attach.
    async fn spawn_create_watcher(self: &Arc<Self>) -> Result<JoinHandle<()>, BrokerError> {
        let mut created = self.browser.event_listener::<EventTargetCreated>().await?;
        let driver = Arc::downgrade(self);
        Ok(tokio::spawn(async move {
            while let Some(event) = created.next().await {
                if event.target_info.r#type != "page" {
                    continue;
                }
                let Some(driver) = driver.upgrade() else {
                    break;
                };
                if let Err(err) = driver.sync_existing_pages().await {
                    debug!(error = %err, "page sync after target creation failed");
                }
            }
        }))
    }

    fn spawn_visibility_poll(self: &Arc<Self>, interval_ms: u64) -> JoinHandle<()> {
        let driver = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                sleep(Duration::from_millis(interval_ms.max(50))).await;
                let Some(driver) = driver.upgrade() else {
                    break;
                };
                driver.refresh_visibility().await;
            }
        })
    }

    /// One pass over the tracked pages: any tab that just turned visible
    /// becomes the current tab and emits `Activated`.
    async fn refresh_visibility(&self) {
        let ids: Vec<TabId> = self.pages.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            let page = match self.pages.get(&id) {
                Some(entry) => entry.page.clone(),
                None => continue,
            };
            let visible = match page.evaluate("document.visibilityState").await {
                Ok(result) => result
                    .into_value::<String>()
                    .map(|state| state == "visible")
                    .unwrap_or(false),
                Err(_) => continue,
            };
            let became_visible = self
                .pages
                .get_mut(&id)
                .map(|mut entry| {
                    let was = entry.visible;
                    entry.visible = visible;
                    visible && !was
                })
                .unwrap_or(false);
            if became_visible {
                *self.current.lock().await = Some(id.clone());
                let _ = self.events.send(TabEvent::Activated(id));
            }
        }
    }

    fn page(&self, tab: &TabId) -> Result<Page, BrokerError> {
        self.pages
            .get(tab)
            .map(|entry| entry.page.clone())
            .ok_or_else(|| BrokerError::TabNotFound(tab.clone()))
    }

    /// The page handle backing a tab, for callers that evaluate script in it.
    pub fn page_for(&self, tab: &TabId) -> Result<Page, BrokerError> {
        self.page(tab)
    }
}

#[async_trait]
impl TabDriver for CdpTabDriver {
    async fn active_tab(&self) -> Result<Option<TabInfo>, BrokerError> {
        let current = self.current.lock().await.clone();
        let Some(id) = current else {
            return Ok(None);
        };
        let page = self.page(&id)?;
        let url = page.url().await?.unwrap_or_default();
        Ok(Some(TabInfo { id, url }))
    }

    async fn create_tab(&self, url: &str, active: bool) -> Result<TabId, BrokerError> {
        let params = CreateTargetParams::builder()
            .url(url)
            .background(!active)
            .build()
            .map_err(BrokerError::Driver)?;
        let page = self.browser.new_page(params).await?;
        let id = TabId::new();
        self.pages.insert(
            id.clone(),
            TrackedPage {
                page: page.clone(),
                visible: active,
            },
        );
        if active {
            *self.current.lock().await = Some(id.clone());
        }

        let events = self.events.clone();
        let load_id = id.clone();
        tokio::spawn(async move {
            if page.wait_for_navigation().await.is_ok() {
                let _ = events.send(TabEvent::LoadComplete(load_id));
            }
        });

        debug!(tab = %id, url, active, "created tab");
        Ok(id)
    }

    async fn navigate(&self, tab: &TabId, url: &str) -> Result<(), BrokerError> {
        let page = self.page(tab)?;
        page.goto(url).await?;
        Ok(())
    }

    async fn activate(&self, tab: &TabId) -> Result<(), BrokerError> {
        let page = self.page(tab)?;
        page.bring_to_front().await?;
        *self.current.lock().await = Some(tab.clone());
        let _ = self.events.send(TabEvent::Activated(tab.clone()));
        Ok(())
    }

    async fn tab_exists(&self, tab: &TabId) -> Result<bool, BrokerError> {
        Ok(self.pages.contains_key(tab))
    }

    async fn eval(&self, tab: &TabId, expression: &str) -> Result<Value, BrokerError> {
        let page = self.page(tab)?;
        let result = page.evaluate(expression).await?;
        Ok(result.value().cloned().unwrap_or(Value::Null))
    }

    fn events(&self) -> broadcast::Receiver<TabEvent> {
        self.events.subscribe()
    }
}

#[derive(Clone, Debug)]
struct StubTab {
    url: String,
}

/// In-memory tab model with the same observable behavior as the CDP driver.
/// Tests drive lifecycle transitions explicitly through the `simulate_*`
/// methods.
pub struct StubTabDriver {
    tabs: DashMap<TabId, StubTab>,
    current: Mutex<Option<TabId>>,
    events: broadcast::Sender<TabEvent>,
    navigations: StdMutex<Vec<(TabId, String)>>,
    fail_create: AtomicBool,
    eval_handler: StdMutex<Option<EvalHandler>>,
}

/// Scripted response for `eval` calls against the stub.
pub type EvalHandler =
    Box<dyn Fn(&TabId, &str) -> Result<Value, BrokerError> + Send + Sync + 'static>;

impl fmt::Debug for StubTabDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StubTabDriver")
            .field("tabs", &self.tabs.len())
            .finish()
    }
}

impl Default for StubTabDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl StubTabDriver {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            tabs: DashMap::new(),
            current: Mutex::new(None),
            events,
            navigations: StdMutex::new(Vec::new()),
            fail_create: AtomicBool::new(false),
            eval_handler: StdMutex::new(None),
        }
    }

    /// Scripts the stub's `eval` responses; unscripted evals return `null`.
    pub fn set_eval_handler(&self, handler: EvalHandler) {
        *self.eval_handler.lock().unwrap() = Some(handler);
    }

    /// Makes subsequent `create_tab` calls fail, to exercise acquisition
    /// failure paths.
    pub fn reject_creates(&self, reject: bool) {
        self.fail_create.store(reject, Ordering::SeqCst);
    }

    /// Seeds a pre-existing operator tab and foregrounds it.
    pub async fn seed_active_tab(&self, url: &str) -> TabId {
        let id = TabId::new();
        self.tabs.insert(id.clone(), StubTab { url: url.into() });
        *self.current.lock().await = Some(id.clone());
        id
    }

    /// Foregrounds a tab as if the operator clicked it.
    pub async fn simulate_activate(&self, tab: &TabId) {
        *self.current.lock().await = Some(tab.clone());
        let _ = self.events.send(TabEvent::Activated(tab.clone()));
    }

    /// Closes a tab as if the operator dismissed it.
    pub async fn simulate_close(&self, tab: &TabId) {
        self.tabs.remove(tab);
        let mut current = self.current.lock().await;
        if current.as_ref() == Some(tab) {
            *current = None;
        }
        drop(current);
        let _ = self.events.send(TabEvent::Removed(tab.clone()));
    }

    /// Every `navigate` call observed, in order.
    pub fn navigations(&self) -> Vec<(TabId, String)> {
        self.navigations.lock().unwrap().clone()
    }

    pub fn tab_url(&self, tab: &TabId) -> Option<String> {
        self.tabs.get(tab).map(|t| t.url.clone())
    }

    pub fn open_tab_count(&self) -> usize {
        self.tabs.len()
    }
}

#[async_trait]
impl TabDriver for StubTabDriver {
    async fn active_tab(&self) -> Result<Option<TabInfo>, BrokerError> {
        let current = self.current.lock().await.clone();
        Ok(current.and_then(|id| {
            self.tabs.get(&id).map(|tab| TabInfo {
                id: id.clone(),
                url: tab.url.clone(),
            })
        }))
    }

    async fn create_tab(&self, url: &str, active: bool) -> Result<TabId, BrokerError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(BrokerError::Driver("tab creation rejected".into()));
        }
        let id = TabId::new();
        self.tabs.insert(id.clone(), StubTab { url: url.into() });
        if active {
            *self.current.lock().await = Some(id.clone());
        }
        // The stub loads instantly; the event sits in the channel for
        // subscribers that registered before the create call.
        let _ = self.events.send(TabEvent::LoadComplete(id.clone()));
        Ok(id)
    }

    async fn navigate(&self, tab: &TabId, url: &str) -> Result<(), BrokerError> {
        let mut entry = self
            .tabs
            .get_mut(tab)
            .ok_or_else(|| BrokerError::TabNotFound(tab.clone()))?;
        entry.url = url.to_string();
        drop(entry);
        self.navigations
            .lock()
            .unwrap()
            .push((tab.clone(), url.to_string()));
        Ok(())
    }

    async fn activate(&self, tab: &TabId) -> Result<(), BrokerError> {
        if !self.tabs.contains_key(tab) {
            return Err(BrokerError::TabNotFound(tab.clone()));
        }
        *self.current.lock().await = Some(tab.clone());
        let _ = self.events.send(TabEvent::Activated(tab.clone()));
        Ok(())
    }

    async fn tab_exists(&self, tab: &TabId) -> Result<bool, BrokerError> {
        Ok(self.tabs.contains_key(tab))
    }

    async fn eval(&self, tab: &TabId, expression: &str) -> Result<Value, BrokerError> {
        if !self.tabs.contains_key(tab) {
            return Err(BrokerError::TabNotFound(tab.clone()));
        }
        let handler = self.eval_handler.lock().unwrap();
        match handler.as_ref() {
            Some(handler) => handler(tab, expression),
            None => Ok(Value::Null),
        }
    }

    fn events(&self) -> broadcast::Receiver<TabEvent> {
        self.events.subscribe()
    }
}
