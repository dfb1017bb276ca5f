use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::registry::{DomainRegistry, RunAt};

/// A committed navigation as reported by the browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationCommitted {
    pub tab_id: i64,
    /// 0 is the top-level frame.
    pub frame_id: i64,
    pub url: String,
    pub document_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Injection {
    pub tab_id: i64,
    pub site_id: String,
    pub chunk: String,
    pub run_at: RunAt,
    /// DOM attribute the mounted bundle sets on the document element.
    pub marker: String,
}

pub fn mount_marker(site_id: &str) -> String {
    format!("data-eurora-mounted-{site_id}")
}

#[derive(Debug, Default)]
struct TabMounts {
    document_id: String,
    sites: HashSet<String>,
}

/// Decides which bundle to inject on each navigation and remembers what is
/// already mounted so repeated commit events for one document do not mount a
/// bundle twice.
pub struct Injector {
    registry: Arc<DomainRegistry>,
    tabs: HashMap<i64, TabMounts>,
}

impl Injector {
    pub fn new(registry: Arc<DomainRegistry>) -> Self {
        Self {
            registry,
            tabs: HashMap::new(),
        }
    }

    pub fn on_navigation(&mut self, navigation: &NavigationCommitted) -> Option<Injection> {
        if navigation.frame_id != 0 {
            return None;
        }
        let bundle = self.registry.resolve_url(&navigation.url)?;

        let mounts = self.tabs.entry(navigation.tab_id).or_default();
        if mounts.document_id != navigation.document_id {
            mounts.document_id = navigation.document_id.clone();
            mounts.sites.clear();
        }
        if !mounts.sites.insert(bundle.site_id().to_string()) {
            log::debug!(
                "bundle {} already mounted in tab {}",
                bundle.site_id(),
                navigation.tab_id
            );
            return None;
        }

        Some(Injection {
            tab_id: navigation.tab_id,
            site_id: bundle.site_id().to_string(),
            chunk: bundle.chunk().to_string(),
            run_at: bundle.run_at(),
            marker: mount_marker(bundle.site_id()),
        })
    }

    pub fn on_tab_removed(&mut self, tab_id: i64) {
        self.tabs.remove(&tab_id);
    }

    pub fn is_mounted(&self, tab_id: i64, site_id: &str) -> bool {
        self.tabs
            .get(&tab_id)
            .is_some_and(|mounts| mounts.sites.contains(site_id))
    }
}
