use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::error::WireError;

/// Payload of `/json/version`. The `Browser` product string is the sole
/// source of truth for deciding whether the port is a full Chromium browser.
#[derive(Clone, Debug, Deserialize)]
pub struct VersionInfo {
    #[serde(rename = "Browser", default)]
    pub browser: String,
    #[serde(rename = "Protocol-Version", default)]
    pub protocol_version: String,
    #[serde(rename = "User-Agent", default)]
    pub user_agent: String,
    #[serde(rename = "V8-Version", default)]
    pub v8_version: String,
    #[serde(rename = "webSocketDebuggerUrl", default)]
    pub web_socket_debugger_url: String,
}

/// What is actually answering on the debugging port.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BrowserFlavor {
    /// A full Chrome/Chromium/Edge browser with a visible window.
    FullBrowser,
    /// chrome-headless-shell and friends.
    HeadlessShell,
    /// An embedded WebView that happens to expose DevTools.
    WebView,
    Unknown,
}

impl VersionInfo {
    pub fn classify(&self) -> BrowserFlavor {
        let product = self.browser.trim();
        if product.starts_with("HeadlessChrome/") {
            return BrowserFlavor::HeadlessShell;
        }
        let ua = self.user_agent.as_str();
        if ua.contains("; wv)") || ua.contains("WebView") {
            return BrowserFlavor::WebView;
        }
        if product.starts_with("Chrome/")
            || product.starts_with("Chromium/")
            || product.starts_with("Edg/")
        {
            BrowserFlavor::FullBrowser
        } else {
            BrowserFlavor::Unknown
        }
    }

    pub fn is_full_browser(&self) -> bool {
        self.classify() == BrowserFlavor::FullBrowser
    }
}

/// One entry of `/json/list`.
#[derive(Clone, Debug, Deserialize)]
pub struct TargetDescription {
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(rename = "webSocketDebuggerUrl", default)]
    pub web_socket_debugger_url: String,
}

/// Client for the HTTP siblings of the remote-debugging WebSocket.
#[derive(Clone, Debug)]
pub struct DebugEndpoint {
    host: String,
    port: u16,
    http: reqwest::Client,
}

impl DebugEndpoint {
    pub fn new(port: u16) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .no_proxy()
            .build()
            .unwrap_or_default();
        Self {
            host: "127.0.0.1".to_string(),
            port,
            http,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}:{}{}", self.host, self.port, path)
    }

    /// WebSocket URL for a page target served by this endpoint.
    pub fn page_ws_url(&self, target_id: &str) -> String {
        format!("ws://{}:{}/devtools/page/{}", self.host, self.port, target_id)
    }

    /// Cheap TCP probe; true when something listens on the port.
    pub async fn port_listening(&self) -> bool {
        let addr = format!("{}:{}", self.host, self.port);
        matches!(
            tokio::time::timeout(
                Duration::from_millis(1_000),
                tokio::net::TcpStream::connect(&addr),
            )
            .await,
            Ok(Ok(_))
        )
    }

    pub async fn version(&self) -> Result<VersionInfo, WireError> {
        let response = self
            .http
            .get(self.url("/json/version"))
            .send()
            .await
            .map_err(|err| WireError::Endpoint(err.to_string()))?;
        if !response.status().is_success() {
            return Err(WireError::Endpoint(format!(
                "/json/version answered {}",
                response.status()
            )));
        }
        response
            .json::<VersionInfo>()
            .await
            .map_err(|err| WireError::Endpoint(format!("/json/version malformed: {err}")))
    }

    pub async fn list_targets(&self) -> Result<Vec<TargetDescription>, WireError> {
        let response = self
            .http
            .get(self.url("/json/list"))
            .send()
            .await
            .map_err(|err| WireError::Endpoint(err.to_string()))?;
        response
            .json::<Vec<TargetDescription>>()
            .await
            .map_err(|err| WireError::Endpoint(format!("/json/list malformed: {err}")))
    }

    /// Open a new tab. Chromium switched `/json/new` from GET to PUT; issue
    /// PUT first and fall back for older builds.
    pub async fn open_tab(&self, url: &str) -> Result<TargetDescription, WireError> {
        let endpoint = format!("{}?{}", self.url("/json/new"), urlencode(url));
        let response = self
            .http
            .put(&endpoint)
            .send()
            .await
            .map_err(|err| WireError::Endpoint(err.to_string()))?;
        let response = if response.status().as_u16() == 405 {
            self.http
                .get(&endpoint)
                .send()
                .await
                .map_err(|err| WireError::Endpoint(err.to_string()))?
        } else {
            response
        };
        if !response.status().is_success() {
            return Err(WireError::Endpoint(format!(
                "/json/new answered {}",
                response.status()
            )));
        }
        let created = response
            .json::<TargetDescription>()
            .await
            .map_err(|err| WireError::Endpoint(format!("/json/new malformed: {err}")))?;
        debug!(target: "cdp-wire", id = %created.id, "tab opened");
        Ok(created)
    }

    pub async fn close_tab(&self, target_id: &str) -> Result<(), WireError> {
        self.simple_get(&format!("/json/close/{target_id}")).await
    }

    pub async fn activate_tab(&self, target_id: &str) -> Result<(), WireError> {
        self.simple_get(&format!("/json/activate/{target_id}")).await
    }

    async fn simple_get(&self, path: &str) -> Result<(), WireError> {
        let response = self
            .http
            .get(self.url(path))
            .send()
            .await
            .map_err(|err| WireError::Endpoint(err.to_string()))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(WireError::Endpoint(format!(
                "{path} answered {}",
                response.status()
            )))
        }
    }
}

fn urlencode(url: &str) -> String {
    let mut out = String::with_capacity(url.len());
    for byte in url.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn version(browser: &str, ua: &str) -> VersionInfo {
        VersionInfo {
            browser: browser.to_string(),
            protocol_version: "1.3".to_string(),
            user_agent: ua.to_string(),
            v8_version: String::new(),
            web_socket_debugger_url: String::new(),
        }
    }

    #[test]
    fn desktop_chrome_is_accepted() {
        let info = version(
            "Chrome/126.0.6478.62",
            "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 Chrome/126.0 Safari/537.36",
        );
        assert!(info.is_full_browser());
    }

    #[test]
    fn chromium_and_edge_products_are_accepted() {
        assert!(version("Chromium/126.0.1", "Mozilla/5.0").is_full_browser());
        assert!(version("Edg/126.0.1", "Mozilla/5.0").is_full_browser());
    }

    #[test]
    fn headless_shell_is_rejected() {
        let info = version("HeadlessChrome/126.0.6478.62", "Mozilla/5.0 HeadlessChrome");
        assert_eq!(info.classify(), BrowserFlavor::HeadlessShell);
    }

    #[test]
    fn android_webview_is_rejected_despite_chrome_product() {
        let info = version(
            "Chrome/126.0.6478.62",
            "Mozilla/5.0 (Linux; Android 14; wv) AppleWebKit/537.36 Chrome/126.0",
        );
        assert_eq!(info.classify(), BrowserFlavor::WebView);
    }

    #[test]
    fn unknown_products_are_not_full_browsers() {
        assert_eq!(
            version("node/20.1.0", "node").classify(),
            BrowserFlavor::Unknown
        );
    }

    #[test]
    fn page_ws_url_points_at_the_devtools_path() {
        let endpoint = DebugEndpoint::new(9222);
        assert_eq!(
            endpoint.page_ws_url("AB12"),
            "ws://127.0.0.1:9222/devtools/page/AB12"
        );
    }

    #[test]
    fn urlencode_escapes_reserved_characters() {
        assert_eq!(urlencode("https://a.b/c?d=1"), "https%3A%2F%2Fa.b%2Fc%3Fd%3D1");
    }
}
