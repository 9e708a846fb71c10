//! Live registry of debuggable targets.

use std::sync::atomic::{AtomicU64, Ordering};

use cdp_wire::{TargetDescription, TransportEvent};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::HostError;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Page,
    ServiceWorker,
    BackgroundPage,
    Browser,
    Other,
}

impl TargetKind {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "page" => TargetKind::Page,
            "service_worker" => TargetKind::ServiceWorker,
            "background_page" => TargetKind::BackgroundPage,
            "browser" => TargetKind::Browser,
            _ => TargetKind::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::Page => "page",
            TargetKind::ServiceWorker => "service_worker",
            TargetKind::BackgroundPage => "background_page",
            TargetKind::Browser => "browser",
            TargetKind::Other => "other",
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct TargetRecord {
    pub id: String,
    pub kind: TargetKind,
    pub url: String,
    pub title: String,
    #[serde(skip)]
    seq: u64,
    #[serde(skip)]
    activated_seq: u64,
}

/// Target map kept current from `/json/list` syncs plus `Target.*` events on
/// the root channel. The registry never fabricates targets.
pub struct TargetRegistry {
    targets: DashMap<String, TargetRecord>,
    seq: AtomicU64,
}

impl TargetRegistry {
    pub fn new() -> Self {
        Self {
            targets: DashMap::new(),
            seq: AtomicU64::new(1),
        }
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    pub fn sync(&self, listed: &[TargetDescription]) {
        for desc in listed {
            self.upsert(&desc.id, TargetKind::parse(&desc.kind), &desc.url, &desc.title);
        }
        let listed_ids: std::collections::HashSet<&str> =
            listed.iter().map(|d| d.id.as_str()).collect();
        self.targets.retain(|id, _| listed_ids.contains(id.as_str()));
    }

    fn upsert(&self, id: &str, kind: TargetKind, url: &str, title: &str) {
        match self.targets.get_mut(id) {
            Some(mut entry) => {
                entry.kind = kind;
                entry.url = url.to_string();
                entry.title = title.to_string();
            }
            None => {
                let seq = self.next_seq();
                self.targets.insert(
                    id.to_string(),
                    TargetRecord {
                        id: id.to_string(),
                        kind,
                        url: url.to_string(),
                        title: title.to_string(),
                        seq,
                        activated_seq: 0,
                    },
                );
            }
        }
    }

    /// Apply a `Target.*` event from the root channel. Returns the ids of
    /// pages that appeared, so callers can run page setup (stealth install).
    pub fn apply_event(&self, event: &TransportEvent) -> Vec<String> {
        let mut new_pages = Vec::new();
        match event.method.as_str() {
            "Target.targetCreated" | "Target.targetInfoChanged" => {
                let Some(info) = event.params.get("targetInfo") else {
                    return new_pages;
                };
                let id = info.get("targetId").and_then(|v| v.as_str()).unwrap_or("");
                if id.is_empty() {
                    return new_pages;
                }
                let kind = TargetKind::parse(info.get("type").and_then(|v| v.as_str()).unwrap_or(""));
                let url = info.get("url").and_then(|v| v.as_str()).unwrap_or("");
                let title = info.get("title").and_then(|v| v.as_str()).unwrap_or("");
                let created = !self.targets.contains_key(id);
                self.upsert(id, kind, url, title);
                if created && kind == TargetKind::Page && event.method == "Target.targetCreated" {
                    debug!(target: "browser-host", id, url, "page target appeared");
                    new_pages.push(id.to_string());
                }
            }
            "Target.targetDestroyed" => {
                if let Some(id) = event.params.get("targetId").and_then(|v| v.as_str()) {
                    self.targets.remove(id);
                }
            }
            _ => {}
        }
        new_pages
    }

    pub fn mark_activated(&self, id: &str) {
        let seq = self.next_seq();
        if let Some(mut entry) = self.targets.get_mut(id) {
            entry.activated_seq = seq;
        }
    }

    pub fn pages(&self) -> Vec<TargetRecord> {
        let mut pages: Vec<TargetRecord> = self
            .targets
            .iter()
            .filter(|kv| kv.value().kind == TargetKind::Page)
            .map(|kv| kv.value().clone())
            .collect();
        pages.sort_by_key(|t| t.seq);
        pages
    }

    pub fn all(&self) -> Vec<TargetRecord> {
        let mut all: Vec<TargetRecord> = self.targets.iter().map(|kv| kv.value().clone()).collect();
        all.sort_by_key(|t| t.seq);
        all
    }

    pub fn get(&self, id: &str) -> Option<TargetRecord> {
        self.targets.get(id).map(|kv| kv.value().clone())
    }

    /// Resolve a caller-supplied optional target id to a page.
    ///
    /// Explicit ids must name an existing page. Otherwise the most recently
    /// activated page wins, falling back to the first page in enumeration
    /// order.
    pub fn resolve(&self, explicit: Option<&str>) -> Result<TargetRecord, HostError> {
        if let Some(id) = explicit {
            return match self.get(id) {
                Some(record) if record.kind == TargetKind::Page => Ok(record),
                _ => Err(HostError::TargetNotFound(id.to_string())),
            };
        }

        let pages = self.pages();
        if pages.is_empty() {
            return Err(HostError::NoPageAvailable);
        }
        let activated = pages
            .iter()
            .filter(|p| p.activated_seq > 0)
            .max_by_key(|p| p.activated_seq)
            .cloned();
        Ok(activated.unwrap_or_else(|| pages[0].clone()))
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn clear(&self) {
        self.targets.clear();
    }
}

impl Default for TargetRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn created(id: &str, kind: &str, url: &str) -> TransportEvent {
        TransportEvent {
            method: "Target.targetCreated".into(),
            params: json!({ "targetInfo": { "targetId": id, "type": kind, "url": url, "title": "" } }),
            session_id: None,
        }
    }

    #[test]
    fn resolve_prefers_the_most_recently_activated_page() {
        let registry = TargetRegistry::new();
        registry.apply_event(&created("t1", "page", "https://a.test"));
        registry.apply_event(&created("t2", "page", "https://b.test"));
        registry.apply_event(&created("t3", "service_worker", "https://b.test/sw.js"));

        assert_eq!(registry.resolve(None).unwrap().id, "t1");
        registry.mark_activated("t2");
        assert_eq!(registry.resolve(None).unwrap().id, "t2");
    }

    #[test]
    fn explicit_id_must_be_an_existing_page() {
        let registry = TargetRegistry::new();
        registry.apply_event(&created("t1", "page", "https://a.test"));
        registry.apply_event(&created("sw", "service_worker", "https://a.test/sw.js"));

        assert_eq!(registry.resolve(Some("t1")).unwrap().id, "t1");
        assert!(matches!(
            registry.resolve(Some("sw")),
            Err(HostError::TargetNotFound(_))
        ));
        assert!(matches!(
            registry.resolve(Some("nope")),
            Err(HostError::TargetNotFound(_))
        ));
    }

    #[test]
    fn zero_pages_is_no_page_available() {
        let registry = TargetRegistry::new();
        registry.apply_event(&created("sw", "service_worker", "x"));
        assert!(matches!(
            registry.resolve(None),
            Err(HostError::NoPageAvailable)
        ));
    }

    #[test]
    fn destroyed_targets_leave_the_registry() {
        let registry = TargetRegistry::new();
        registry.apply_event(&created("t1", "page", "https://a.test"));
        let destroyed = TransportEvent {
            method: "Target.targetDestroyed".into(),
            params: json!({ "targetId": "t1" }),
            session_id: None,
        };
        registry.apply_event(&destroyed);
        assert!(registry.is_empty());
    }

    #[test]
    fn only_new_pages_are_reported_for_setup() {
        let registry = TargetRegistry::new();
        let first = registry.apply_event(&created("t1", "page", "https://a.test"));
        assert_eq!(first, vec!["t1".to_string()]);
        let repeat = registry.apply_event(&created("t1", "page", "https://a.test"));
        assert!(repeat.is_empty());
    }
}
