//! Automation-fingerprint masking.
//!
//! One document-start script per page target neutralizes the common probes:
//! the `webdriver` flag, the empty plugin list, the permissions API tell,
//! canvas/WebGL/audio readback fingerprints. The perturbations are driven by
//! a seed drawn once per browser connection, so fingerprints vary between
//! sessions but stay stable within one. The script guards itself, making a
//! second installation observationally a no-op.

use std::sync::Arc;

use cdp_wire::CdpChannel;
use dashmap::DashMap;
use rand::Rng;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info};

const DOCUMENT_PATCH: &str = include_str!("document_patch.js");
const SEED_PLACEHOLDER: &str = "__STEALTH_SEED__";

#[derive(Clone, Debug, Error)]
pub enum StealthError {
    #[error("cdp failure while installing stealth script: {0}")]
    Cdp(String),
}

/// Tracks which page targets carry the patch (and the seed they got) and
/// re-installs on demand.
pub struct StealthInjector {
    applied: DashMap<String, u32>,
}

impl StealthInjector {
    pub fn new() -> Self {
        Self {
            applied: DashMap::new(),
        }
    }

    /// Draw a connection seed. Stored by the caller for the lifetime of one
    /// browser connection.
    pub fn draw_seed() -> u32 {
        rand::thread_rng().gen()
    }

    pub fn render_script(seed: u32) -> String {
        DOCUMENT_PATCH.replace(SEED_PLACEHOLDER, &seed.to_string())
    }

    pub fn is_applied(&self, target_id: &str) -> bool {
        self.applied.contains_key(target_id)
    }

    pub fn applied_seed(&self, target_id: &str) -> Option<u32> {
        self.applied.get(target_id).map(|kv| *kv.value())
    }

    pub fn applied_count(&self) -> usize {
        self.applied.len()
    }

    /// Install the patch on one page target: registered for future documents
    /// and evaluated into the current one. Returns false when the target was
    /// already covered and `force` is not set.
    pub async fn apply(
        &self,
        target_id: &str,
        channel: &Arc<CdpChannel>,
        seed: u32,
        force: bool,
    ) -> Result<bool, StealthError> {
        if self.applied.contains_key(target_id) && !force {
            debug!(target: "stealth", target_id, "already applied; skipping");
            return Ok(false);
        }

        let script = Self::render_script(seed);

        let registered = channel
            .send(
                "Page.addScriptToEvaluateOnNewDocument",
                json!({ "source": script, "runImmediately": true }),
            )
            .await
            .map_err(|err| StealthError::Cdp(err.to_string()))?;
        debug!(
            target: "stealth",
            target_id,
            script_id = registered.get("identifier").and_then(|v| v.as_str()).unwrap_or(""),
            "document script registered"
        );

        // cover the document that is already open
        channel
            .send("Runtime.evaluate", json!({ "expression": script }))
            .await
            .map_err(|err| StealthError::Cdp(err.to_string()))?;

        self.applied.insert(target_id.to_string(), seed);
        info!(target: "stealth", target_id, "fingerprint patch installed");
        Ok(true)
    }

    pub fn forget(&self, target_id: &str) {
        self.applied.remove(target_id);
    }

    /// Drop all per-target state. Called when the browser connection dies.
    pub fn clear(&self) {
        self.applied.clear();
    }
}

impl Default for StealthInjector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rendered_script_embeds_the_seed() {
        let script = StealthInjector::render_script(123_456);
        assert!(script.contains("const SEED = 123456;"));
        assert!(!script.contains(SEED_PLACEHOLDER));
    }

    #[test]
    fn script_guards_against_double_installation() {
        let script = StealthInjector::render_script(1);
        assert!(script.contains("if (window.__fpPatched) { return; }"));
    }

    #[test]
    fn script_covers_the_advertised_surfaces() {
        let script = StealthInjector::render_script(1);
        for surface in [
            "webdriver",
            "plugins",
            "languages",
            "'platform'",
            "hardwareConcurrency",
            "permissions.query",
            "getImageData",
            "37445",
            "getChannelData",
        ] {
            assert!(script.contains(surface), "missing patch surface: {surface}");
        }
    }

    #[test]
    fn bookkeeping_tracks_targets_and_seeds() {
        let injector = StealthInjector::new();
        assert!(!injector.is_applied("t1"));
        injector.applied.insert("t1".into(), 7);
        assert!(injector.is_applied("t1"));
        assert_eq!(injector.applied_seed("t1"), Some(7));
        injector.forget("t1");
        assert!(!injector.is_applied("t1"));
    }
}
