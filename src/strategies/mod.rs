//! Capture strategies: what we can pull out of the focused window, and how.
//!
//! [`Strategy`] is a closed set. Browser tabs get a [`BrowserStrategy`] for
//! one of the [`SiteKind`]s; every other window gets a [`DefaultStrategy`]
//! that only contributes a timeline entry.

pub mod browser;
pub mod client;
pub mod default;
pub mod identity;
pub mod transcript;

use std::sync::Arc;

use url::Url;

use crate::activity::assets::AssetData;
use crate::activity::snapshots::CapturedSnapshot;
use crate::domain::DomainRegistry;
use crate::error::CaptureResult;

pub use browser::BrowserStrategy;
pub use client::{BridgeClient, CaptureClient};
pub use default::DefaultStrategy;
pub use identity::ContentIdentity;
pub use transcript::{NoTranscripts, TranscriptCache, TranscriptProvider};

/// The window that currently has focus, as far as we know it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FocusedWindow {
    pub process_id: u32,
    pub process_name: String,
    pub display_name: String,
    pub window_title: String,
    /// Set for browser windows once the extension reports the active tab.
    pub url: Option<String>,
    pub icon: Option<String>,
}

/// Lightweight live context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentState {
    pub url: Option<String>,
    pub title: String,
    pub icon: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SiteKind {
    Youtube,
    Article,
    Pdf,
    Twitter,
}

impl SiteKind {
    /// A `.pdf` path is a PDF whatever site serves it.
    pub fn from_site(site_id: &str, url: &str) -> Self {
        let is_pdf_path = Url::parse(url)
            .map(|parsed| parsed.path().to_ascii_lowercase().ends_with(".pdf"))
            .unwrap_or(false);
        if is_pdf_path {
            return SiteKind::Pdf;
        }
        match site_id {
            "youtube" => SiteKind::Youtube,
            "twitter" | "x" => SiteKind::Twitter,
            "pdf" => SiteKind::Pdf,
            _ => SiteKind::Article,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SiteKind::Youtube => "youtube",
            SiteKind::Article => "article",
            SiteKind::Pdf => "pdf",
            SiteKind::Twitter => "twitter",
        }
    }
}

#[derive(Clone)]
pub enum Strategy {
    Browser(BrowserStrategy),
    Default(DefaultStrategy),
}

impl Strategy {
    pub fn name(&self) -> &str {
        match self {
            Strategy::Browser(strategy) => strategy.name(),
            Strategy::Default(strategy) => strategy.name(),
        }
    }

    pub fn icon(&self) -> Option<&str> {
        match self {
            Strategy::Browser(strategy) => strategy.icon(),
            Strategy::Default(strategy) => strategy.icon(),
        }
    }

    pub fn process_name(&self) -> &str {
        match self {
            Strategy::Browser(strategy) => strategy.process_name(),
            Strategy::Default(strategy) => strategy.process_name(),
        }
    }

    pub fn identity(&self) -> &ContentIdentity {
        match self {
            Strategy::Browser(strategy) => strategy.identity(),
            Strategy::Default(strategy) => strategy.identity(),
        }
    }

    pub fn site_kind(&self) -> Option<SiteKind> {
        match self {
            Strategy::Browser(strategy) => Some(strategy.kind()),
            Strategy::Default(_) => None,
        }
    }

    /// Stored on the activity row.
    pub fn kind_name(&self) -> &'static str {
        self.site_kind().map_or("default", |kind| kind.as_str())
    }

    pub fn captures_snapshots(&self) -> bool {
        matches!(self, Strategy::Browser(_))
    }

    pub async fn retrieve_assets(&self) -> CaptureResult<AssetData> {
        match self {
            Strategy::Browser(strategy) => strategy.retrieve_assets().await,
            Strategy::Default(strategy) => strategy.retrieve_assets().await,
        }
    }

    pub async fn retrieve_snapshot(&self) -> CaptureResult<Option<CapturedSnapshot>> {
        match self {
            Strategy::Browser(strategy) => strategy.retrieve_snapshot().await,
            Strategy::Default(strategy) => strategy.retrieve_snapshot().await,
        }
    }

    pub async fn current_state(&self) -> CaptureResult<CurrentState> {
        match self {
            Strategy::Browser(strategy) => strategy.current_state().await,
            Strategy::Default(strategy) => strategy.current_state().await,
        }
    }
}

pub struct StrategyRegistry {
    browser_processes: Vec<String>,
    domains: Arc<DomainRegistry>,
    client: Option<Arc<dyn CaptureClient>>,
    transcripts: Arc<TranscriptCache>,
}

impl StrategyRegistry {
    pub fn new(browser_processes: Vec<String>, domains: Arc<DomainRegistry>) -> Self {
        Self {
            browser_processes,
            domains,
            client: None,
            transcripts: Arc::new(TranscriptCache::default()),
        }
    }

    pub fn with_client(mut self, client: Arc<dyn CaptureClient>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn with_transcripts(mut self, transcripts: Arc<TranscriptCache>) -> Self {
        self.transcripts = transcripts;
        self
    }

    pub fn is_browser(&self, process_name: &str) -> bool {
        let stem = |name: &str| {
            let lower = name.to_ascii_lowercase();
            lower.strip_suffix(".exe").map(str::to_string).unwrap_or(lower)
        };
        let wanted = stem(process_name);
        self.browser_processes.iter().any(|known| stem(known) == wanted)
    }

    /// Browser tabs on web pages get a browser strategy when the extension is
    /// reachable; everything else falls back to the default strategy.
    pub fn select(&self, window: &FocusedWindow) -> Strategy {
        if let Some(strategy) = self.select_browser(window) {
            return Strategy::Browser(strategy);
        }

        let name = if window.display_name.is_empty() {
            window.process_name.clone()
        } else {
            window.display_name.clone()
        };
        Strategy::Default(DefaultStrategy::new(
            name,
            window.icon.clone(),
            window.process_name.clone(),
            window.window_title.clone(),
        ))
    }

    fn select_browser(&self, window: &FocusedWindow) -> Option<BrowserStrategy> {
        if !self.is_browser(&window.process_name) {
            return None;
        }
        let client = self.client.as_ref()?;
        let url = window.url.as_deref()?;
        let identity = ContentIdentity::from_url(url)?;
        let bundle = self.domains.resolve_url(url)?;
        let kind = SiteKind::from_site(bundle.site_id(), url);

        let name = if window.window_title.is_empty() {
            url.to_string()
        } else {
            window.window_title.clone()
        };
        log::debug!("binding {} strategy to {}", kind.as_str(), identity);

        Some(BrowserStrategy::new(
            kind,
            name,
            window.icon.clone(),
            window.process_name.clone(),
            identity,
            Arc::clone(client),
            Arc::clone(&self.transcripts),
        ))
    }
}
