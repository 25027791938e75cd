//! Headless Chromium driven over the Chrome DevTools Protocol (CDP).
//!
//! The browser is launched with `--remote-debugging-port=0`; the websocket
//! address it prints on stderr is used to open a page target, and every page
//! interaction is a JSON command over that page's websocket.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStderr, Command};
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::error::{catalog, Error, Result};
use crate::paths::find_in_path;

/// Time allowed for the browser to print its DevTools address.
const LAUNCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for the WebSocket handshake.
const WS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Time allowed for a single CDP command to be answered.
const CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Time allowed between `Page.navigate` and `DOMContentLoaded`.
const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(60);

/// Time the browser gets to exit after `Browser.close` before it is killed.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

const DEVTOOLS_PREFIX: &str = "DevTools listening on ";

const PATH_CANDIDATES: &[&str] = &[
    "google-chrome",
    "google-chrome-stable",
    "chromium",
    "chromium-browser",
    "chrome",
    "msedge",
];

#[cfg(target_os = "macos")]
const WELL_KNOWN_LOCATIONS: &[&str] = &[
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    "/Applications/Chromium.app/Contents/MacOS/Chromium",
    "/Applications/Microsoft Edge.app/Contents/MacOS/Microsoft Edge",
];

#[cfg(target_os = "windows")]
const WELL_KNOWN_LOCATIONS: &[&str] = &[
    r"C:\Program Files\Google\Chrome\Application\chrome.exe",
    r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
    r"C:\Program Files (x86)\Microsoft\Edge\Application\msedge.exe",
];

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
const WELL_KNOWN_LOCATIONS: &[&str] = &["/usr/bin/chromium", "/snap/bin/chromium"];

/// Picks the browser executable: explicit path, then `PATH`, then the
/// platform's usual install locations.
pub fn find_browser(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        if path.is_file() {
            return Ok(path.to_path_buf());
        }
        return Err(catalog(format!("browser not found at {}", path.display())));
    }

    PATH_CANDIDATES
        .iter()
        .find_map(|name| find_in_path(name))
        .or_else(|| {
            WELL_KNOWN_LOCATIONS
                .iter()
                .map(PathBuf::from)
                .find(|p| p.is_file())
        })
        .ok_or_else(|| {
            catalog("no Chrome/Chromium/Edge executable found; pass --browser <PATH>")
        })
}

/// `ws://host:port/devtools/browser/<id>` → `ws://host:port/devtools/page/<target>`.
fn page_ws_url(browser_ws_url: &str, target_id: &str) -> Option<String> {
    let idx = browser_ws_url.find("/devtools/browser/")?;
    Some(format!("{}/devtools/page/{target_id}", &browser_ws_url[..idx]))
}

/// Strips the `Headless` marker some sites use to turn automation away.
pub fn headful_user_agent(ua: &str) -> String {
    ua.replace("Headless", "")
}

/// CDP message sent to the browser.
#[derive(Serialize)]
struct CdpRequest<'a> {
    id: i64,
    method: &'a str,
    params: Value,
}

/// Either a command response (`id`) or an event (`method`).
#[derive(Debug, Deserialize)]
struct CdpMessage {
    id: Option<i64>,
    method: Option<String>,
    result: Option<Value>,
    error: Option<Value>,
}

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

struct CdpConnection {
    ws: WsStream,
    next_id: i64,
    /// Events that arrived while waiting for a command response.
    events: VecDeque<CdpMessage>,
}

impl CdpConnection {
    async fn connect(url: &str) -> Result<Self> {
        let (ws, _) = tokio::time::timeout(WS_HANDSHAKE_TIMEOUT, tokio_tungstenite::connect_async(url))
            .await
            .map_err(|_| catalog("CDP WebSocket handshake timeout"))?
            .map_err(|e| catalog(format!("failed to connect to CDP WebSocket: {e}")))?;
        Ok(Self {
            ws,
            next_id: 0,
            events: VecDeque::new(),
        })
    }

    async fn read(&mut self) -> Result<CdpMessage> {
        loop {
            let frame = self
                .ws
                .next()
                .await
                .ok_or_else(|| catalog("CDP WebSocket closed unexpectedly"))?
                .map_err(|e| catalog(format!("failed to read CDP message: {e}")))?;

            let WsMessage::Text(text) = frame else {
                continue;
            };
            match serde_json::from_str::<CdpMessage>(&text) {
                Ok(msg) => return Ok(msg),
                Err(e) => log::warn!("Skipping unparseable CDP message: {e}"),
            }
        }
    }

    async fn call(&mut self, method: &str, params: Value) -> Result<Value> {
        self.next_id += 1;
        let id = self.next_id;
        let json = serde_json::to_string(&CdpRequest { id, method, params })
            .map_err(|e| catalog(format!("failed to serialize CDP message: {e}")))?;
        log::debug!("CDP -> {method} (#{id})");

        self.ws
            .send(WsMessage::Text(json.into()))
            .await
            .map_err(|e| catalog(format!("failed to send {method}: {e}")))?;

        let response = tokio::time::timeout(CALL_TIMEOUT, async {
            loop {
                let msg = self.read().await?;
                if msg.id == Some(id) {
                    return Ok::<_, Error>(msg);
                }
                if msg.method.is_some() {
                    self.events.push_back(msg);
                }
            }
        })
        .await
        .map_err(|_| catalog(format!("{method} timed out")))??;

        if let Some(error) = response.error {
            return Err(catalog(format!("{method} failed: {error}")));
        }
        Ok(response.result.unwrap_or(Value::Null))
    }

    async fn wait_for_event(&mut self, method: &str, limit: Duration) -> Result<()> {
        if let Some(pos) = self
            .events
            .iter()
            .position(|e| e.method.as_deref() == Some(method))
        {
            self.events.drain(..=pos);
            return Ok(());
        }

        tokio::time::timeout(limit, async {
            loop {
                let msg = self.read().await?;
                if msg.method.as_deref() == Some(method) {
                    return Ok::<_, Error>(());
                }
            }
        })
        .await
        .map_err(|_| catalog(format!("timed out waiting for {method}")))?
    }
}

async fn read_devtools_url(lines: &mut Lines<BufReader<ChildStderr>>) -> Result<String> {
    while let Some(line) = lines.next_line().await? {
        if let Some(url) = line.trim().strip_prefix(DEVTOOLS_PREFIX) {
            return Ok(url.trim().to_string());
        }
        log::debug!("browser: {line}");
    }
    Err(catalog("browser exited before exposing DevTools"))
}

/// A running headless browser with one open page.
///
/// Dropping the session kills the browser process and removes its
/// throwaway profile, so the browser is released on every exit path.
pub struct BrowserSession {
    child: Child,
    browser: CdpConnection,
    page: CdpConnection,
    _profile: TempDir,
}

impl BrowserSession {
    pub async fn launch(executable: &Path) -> Result<Self> {
        let profile = tempfile::Builder::new()
            .prefix("steamserver-browser-")
            .tempdir()?;

        log::info!("Launching headless browser {}", executable.display());
        let mut child = Command::new(executable)
            .args([
                "--headless=new",
                "--disable-gpu",
                "--no-first-run",
                "--no-default-browser-check",
                "--remote-debugging-port=0",
            ])
            .arg(format!("--user-data-dir={}", profile.path().display()))
            .arg("about:blank")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| catalog(format!("failed to launch browser: {e}")))?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| catalog("failed to capture browser stderr"))?;
        let mut lines = BufReader::new(stderr).lines();
        let browser_url = tokio::time::timeout(LAUNCH_TIMEOUT, read_devtools_url(&mut lines))
            .await
            .map_err(|_| catalog("browser did not expose DevTools in time"))??;
        log::info!("Browser DevTools at {browser_url}");

        // Keep draining stderr so the browser never blocks on a full pipe.
        tokio::spawn(async move {
            while let Ok(Some(line)) = lines.next_line().await {
                log::debug!("browser: {line}");
            }
        });

        let mut browser = CdpConnection::connect(&browser_url).await?;
        let target = browser
            .call("Target.createTarget", serde_json::json!({ "url": "about:blank" }))
            .await?;
        let target_id = target
            .get("targetId")
            .and_then(Value::as_str)
            .ok_or_else(|| catalog("Target.createTarget returned no targetId"))?;
        let page_url = page_ws_url(&browser_url, target_id)
            .ok_or_else(|| catalog(format!("unexpected DevTools address {browser_url}")))?;
        let page = CdpConnection::connect(&page_url).await?;

        Ok(Self {
            child,
            browser,
            page,
            _profile: profile,
        })
    }

    pub async fn user_agent(&mut self) -> Result<String> {
        let version = self.browser.call("Browser.getVersion", serde_json::json!({})).await?;
        version
            .get("userAgent")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| catalog("Browser.getVersion returned no userAgent"))
    }

    pub async fn set_user_agent(&mut self, user_agent: &str) -> Result<()> {
        self.page
            .call(
                "Emulation.setUserAgentOverride",
                serde_json::json!({ "userAgent": user_agent }),
            )
            .await?;
        Ok(())
    }

    /// Navigates and returns once `DOMContentLoaded` fired.
    pub async fn goto(&mut self, url: &str) -> Result<()> {
        self.page.call("Page.enable", serde_json::json!({})).await?;
        log::info!("Navigating to {url}");
        let nav = self
            .page
            .call("Page.navigate", serde_json::json!({ "url": url }))
            .await?;
        if let Some(error) = nav.get("errorText").and_then(Value::as_str) {
            return Err(catalog(format!("navigation to {url} failed: {error}")));
        }
        self.page
            .wait_for_event("Page.domContentEventFired", NAVIGATION_TIMEOUT)
            .await
    }

    /// Evaluates `expression` in the page and returns its JSON value.
    pub async fn evaluate(&mut self, expression: &str) -> Result<Value> {
        let result = self
            .page
            .call(
                "Runtime.evaluate",
                serde_json::json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
            )
            .await?;

        if let Some(exception) = result.get("exceptionDetails") {
            return Err(catalog(format!("JS exception: {exception}")));
        }
        Ok(result
            .get("result")
            .and_then(|r| r.get("value"))
            .cloned()
            .unwrap_or(Value::Null))
    }

    /// Asks the browser to exit, killing it if it does not.
    pub async fn close(mut self) {
        // The browser may drop the socket before answering.
        let _ = self.browser.call("Browser.close", serde_json::json!({})).await;
        match tokio::time::timeout(CLOSE_TIMEOUT, self.child.wait()).await {
            Ok(Ok(status)) => log::info!("Browser exited with {status}"),
            _ => {
                log::warn!("Browser did not exit after Browser.close; killing it");
                let _ = self.child.kill().await;
            }
        }
    }
}
