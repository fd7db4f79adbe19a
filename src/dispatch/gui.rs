//! GUI-capability proxy.
//!
//! The service is headless; screenshots, clicks, typing, and browser control
//! belong to the co-resident GUI helper. The dispatcher only sees the
//! [`GuiProxy`] capability — calls go out as loopback HTTP and come back as
//! JSON. The error string for an absent helper is part of the protocol
//! surface; operator tooling matches on it.

use std::time::Duration;

use serde_json::{json, Value};
use tracing::debug;

/// Error returned whenever the helper can't be reached.
pub const GUI_UNAVAILABLE: &str = "GUI operations unavailable - tray app not connected";

/// Capability the dispatcher calls for GUI methods.
#[async_trait::async_trait]
pub trait GuiProxy: Send + Sync {
    /// Forward `method` verbatim; the helper answers with the tool result.
    async fn call(&self, method: &str, params: Value) -> Result<Value, String>;

    /// Liveness probe against the browser bridge. Never cached — `tools/list`
    /// probes on every call.
    async fn probe_browser_bridge(&self) -> bool;
}

/// Production proxy: HTTP on the loopback interface.
pub struct LoopbackGuiProxy {
    client: reqwest::Client,
    probe_client: reqwest::Client,
    gui_port: u16,
    browser_bridge_port: u16,
}

impl LoopbackGuiProxy {
    pub fn new(gui_port: u16, browser_bridge_port: u16) -> Self {
        Self {
            // GUI calls synchronously await the helper; screenshots and OCR
            // can be slow, hence the 30 s read timeout.
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("reqwest client builds"),
            probe_client: reqwest::Client::builder()
                .timeout(Duration::from_secs(1))
                .build()
                .expect("reqwest client builds"),
            gui_port,
            browser_bridge_port,
        }
    }
}

#[async_trait::async_trait]
impl GuiProxy for LoopbackGuiProxy {
    async fn call(&self, method: &str, params: Value) -> Result<Value, String> {
        let url = format!("http://127.0.0.1:{}/command", self.gui_port);
        let body = json!({"method": method, "params": params});
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                debug!("GUI proxy unreachable: {e}");
                GUI_UNAVAILABLE.to_string()
            })?;
        if !response.status().is_success() {
            return Err(format!(
                "GUI helper returned HTTP {}",
                response.status().as_u16()
            ));
        }
        response
            .json()
            .await
            .map_err(|e| format!("GUI helper returned malformed JSON: {e}"))
    }

    async fn probe_browser_bridge(&self) -> bool {
        let url = format!("http://127.0.0.1:{}/command", self.browser_bridge_port);
        let body = json!({"action": "getTabs", "payload": {}});
        match self.probe_client.post(&url).json(&body).send().await {
            Ok(resp) if resp.status().is_success() => {
                debug!("Browser bridge available on port {}", self.browser_bridge_port);
                true
            }
            _ => {
                debug!("Browser bridge not available");
                false
            }
        }
    }
}
