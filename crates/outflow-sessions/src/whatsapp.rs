use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::Page;
use chrono::{TimeZone, Utc};
use futures_util::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::error::{Result, SessionError};
use crate::sendqueue::DirectSender;
use crate::types::{
    GroupInfo, GroupMember, InboundMessage, LinkState, SessionKey, SessionProfile, SessionReceipt,
    SessionStatus, NAV_TIMEOUT, QR_SCAN_WINDOW, SEND_CONTROL_TIMEOUT,
};

const WA_URL: &str = "https://web.whatsapp.com";

/// Detects the page's high-level state without blocking.
const PROBE_JS: &str = r#"(() => {
    if (document.querySelector('#side')) return 'connected';
    if (document.querySelector('div[data-ref]')) return 'awaiting_scan';
    return 'checking';
})()"#;

/// The QR re-render token; changes whenever the page refreshes the code.
const QR_REF_JS: &str = r#"(() => {
    const el = document.querySelector('div[data-ref]');
    return el ? (el.getAttribute('data-ref') || '') : '';
})()"#;

/// True when the "phone number is invalid" modal is showing.
const INVALID_DIALOG_JS: &str = r#"(() => {
    const modal = document.querySelector('div[data-animate-modal-body]');
    return !!(modal && /invalid/i.test(modal.textContent || ''));
})()"#;

/// Dismiss whatever modal is on screen.
const DISMISS_DIALOG_JS: &str = r#"(() => {
    const btn = document.querySelector('div[data-animate-modal-body] button, div[role="dialog"] button');
    if (btn) { btn.click(); return true; }
    return false;
})()"#;

/// Delivery marker on the newest outgoing message (single or double tick).
const MARKER_JS: &str = r#"(() => {
    const out = document.querySelectorAll('#main div.message-out');
    if (!out.length) return false;
    const last = out[out.length - 1];
    return !!last.querySelector('span[data-icon="msg-check"], span[data-icon="msg-dblcheck"]');
})()"#;

/// `{epoch}_{data-id}` of the newest outgoing message, or ''.
const LAST_OUT_JS: &str = r#"(() => {
    const out = document.querySelectorAll('#main div.message-out[data-id]');
    if (!out.length) return '';
    const last = out[out.length - 1];
    return last.getAttribute('data-id') || '';
})()"#;

/// Inbound rows of the open chat: data-id, text, and the epoch parsed from
/// the pre-plain-text header.
const INBOUND_JS: &str = r#"(() => {
    const rows = document.querySelectorAll('#main div.message-in[data-id]');
    const out = [];
    rows.forEach(row => {
        const id = row.getAttribute('data-id') || '';
        const textEl = row.querySelector('span.selectable-text');
        const meta = row.querySelector('div[data-pre-plain-text]');
        let epoch = 0;
        if (meta) {
            const m = (meta.getAttribute('data-pre-plain-text') || '')
                .match(/\[(\d+):(\d+),\s*(\d+)\/(\d+)\/(\d+)\]/);
            if (m) {
                const d = new Date(+m[5], +m[4] - 1, +m[3], +m[1], +m[2]);
                epoch = Math.floor(d.getTime() / 1000);
            }
        }
        out.push({ id: id, body: textEl ? textEl.textContent : '', epoch: epoch });
    });
    return JSON.stringify(out);
})()"#;

/// Group chats via the page's own Store, the same surface the scripted-web
/// ecosystem drives.
const GROUPS_JS: &str = r#"(() => {
    const store = window.Store;
    if (!store || !store.Chat) return '[]';
    const groups = store.Chat.getModelsArray()
        .filter(c => c.isGroup)
        .map(c => ({
            id: c.id._serialized,
            title: c.formattedTitle || c.name || '',
            count: c.groupMetadata && c.groupMetadata.participants
                ? c.groupMetadata.participants.length : null,
        }));
    return JSON.stringify(groups);
})()"#;

/// The authenticated account's own number.
const PROFILE_JS: &str = r#"(() => {
    const store = window.Store;
    if (store && store.Conn && store.Conn.wid) return store.Conn.wid.user || '';
    return '';
})()"#;

#[derive(serde::Deserialize)]
struct RawInbound {
    id: String,
    body: String,
    epoch: i64,
}

#[derive(serde::Deserialize)]
struct RawGroup {
    id: String,
    title: String,
    count: Option<usize>,
}

#[derive(serde::Deserialize)]
struct RawMember {
    id: String,
    name: String,
    phone: String,
}

/// One scripted WhatsApp Web session: a headless browser over a persistent
/// profile directory. All operations go through the single page; the
/// registry's send queue guarantees no two operate concurrently.
pub struct WhatsAppWebSession {
    key: SessionKey,
    profile_dir: PathBuf,
    browser: tokio::sync::Mutex<Option<Browser>>,
    page: tokio::sync::Mutex<Option<Page>>,
    handler_task: std::sync::Mutex<Option<JoinHandle<()>>>,
    /// Last state the scan watcher or a probe observed.
    status: std::sync::Mutex<SessionStatus>,
}

impl WhatsAppWebSession {
    /// Launch the browser over `profile_dir` and open WhatsApp Web. Returns
    /// once the page has settled into connected or awaiting-scan.
    pub async fn launch(key: SessionKey, profile_dir: PathBuf) -> Result<Arc<Self>> {
        std::fs::create_dir_all(&profile_dir)
            .map_err(|e| SessionError::Browser(format!("profile dir: {e}")))?;

        let config = BrowserConfig::builder()
            .user_data_dir(&profile_dir)
            .window_size(1280, 900)
            .build()
            .map_err(SessionError::Browser)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| SessionError::Browser(format!("launch: {e}")))?;
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let page = tokio::time::timeout(NAV_TIMEOUT, browser.new_page(WA_URL))
            .await
            .map_err(|_| SessionError::Timeout {
                secs: NAV_TIMEOUT.as_secs(),
            })?
            .map_err(|e| SessionError::Browser(format!("open page: {e}")))?;

        let session = Arc::new(Self {
            key,
            profile_dir,
            browser: tokio::sync::Mutex::new(Some(browser)),
            page: tokio::sync::Mutex::new(Some(page)),
            handler_task: std::sync::Mutex::new(Some(handler_task)),
            status: std::sync::Mutex::new(SessionStatus::Checking),
        });

        // Give the page a bounded window to settle before the first probe.
        let deadline = Instant::now() + NAV_TIMEOUT;
        loop {
            let status = session.probe_status().await;
            if status != SessionStatus::Checking || Instant::now() >= deadline {
                info!(key = %session.key, ?status, "whatsapp session launched");
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(500)).await;
        }
        Ok(session)
    }

    /// Whether persisted session material exists for this key.
    pub fn has_profile(profile_dir: &std::path::Path) -> bool {
        profile_dir.join("Default").exists() || profile_dir.join("Local State").exists()
    }

    pub fn cached_status(&self) -> SessionStatus {
        *self.status.lock().unwrap()
    }

    /// Query the page for the live state and refresh the cache.
    pub async fn probe_status(&self) -> SessionStatus {
        let status = match self.eval_string(PROBE_JS).await {
            Ok(s) if s == "connected" => SessionStatus::Connected,
            Ok(s) if s == "awaiting_scan" => SessionStatus::AwaitingScan,
            Ok(_) => SessionStatus::Checking,
            Err(_) => SessionStatus::Disconnected,
        };
        *self.status.lock().unwrap() = status;
        status
    }

    pub async fn profile(&self) -> SessionProfile {
        let phone = self.eval_string(PROFILE_JS).await.ok().filter(|s| !s.is_empty());
        SessionProfile {
            display_name: None,
            username: None,
            phone,
        }
    }

    /// Start (or resume) the link flow.
    ///
    /// If the restored profile is already authorised this returns
    /// `Connected` immediately. Otherwise it captures the current QR, spawns
    /// a watcher that follows QR refreshes until the scan succeeds or the
    /// two-minute window expires, and returns `AwaitingScan`.
    pub async fn begin_link(self: &Arc<Self>) -> Result<LinkState> {
        match self.probe_status().await {
            SessionStatus::Connected => {
                return Ok(LinkState::Connected {
                    profile: self.profile().await,
                })
            }
            SessionStatus::AwaitingScan => {}
            other => {
                return Err(SessionError::NotConnected(format!(
                    "page not ready for linking: {other:?}"
                )))
            }
        }

        let qr_image = self.capture_qr().await?;
        let watcher = Arc::clone(self);
        tokio::spawn(async move { watcher.watch_scan().await });
        Ok(LinkState::AwaitingScan { qr_image })
    }

    /// Follow the scan until success or window expiry.
    async fn watch_scan(self: Arc<Self>) {
        let deadline = Instant::now() + QR_SCAN_WINDOW;
        let mut last_ref = self.eval_string(QR_REF_JS).await.unwrap_or_default();
        loop {
            tokio::time::sleep(std::time::Duration::from_secs(2)).await;
            match self.probe_status().await {
                SessionStatus::Connected => {
                    info!(key = %self.key, "whatsapp session linked");
                    return;
                }
                SessionStatus::AwaitingScan => {
                    if let Ok(current) = self.eval_string(QR_REF_JS).await {
                        if current != last_ref {
                            debug!(key = %self.key, "qr re-rendered");
                            last_ref = current;
                        }
                    }
                }
                _ => {}
            }
            if Instant::now() >= deadline {
                warn!(key = %self.key, "qr scan window expired");
                *self.status.lock().unwrap() = SessionStatus::Disconnected;
                return;
            }
        }
    }

    /// Screenshot the QR element as base64 PNG.
    pub async fn capture_qr(&self) -> Result<String> {
        let page = self.page.lock().await;
        let page = page
            .as_ref()
            .ok_or_else(|| SessionError::NotConnected("page closed".to_string()))?;
        let element = page
            .find_element("div[data-ref] canvas")
            .await
            .map_err(|e| SessionError::Browser(format!("qr element: {e}")))?;
        let png = element
            .screenshot(CaptureScreenshotFormat::Png)
            .await
            .map_err(|e| SessionError::Browser(format!("qr screenshot: {e}")))?;
        Ok(B64.encode(png))
    }

    /// Open the chat with `phone` (digits) and pull inbound messages whose
    /// external id is strictly above `since`, ascending.
    pub async fn fetch_inbound(&self, phone: &str, since: &str) -> Result<Vec<InboundMessage>> {
        self.open_chat(phone, None).await?;
        let raw = self.eval_string(INBOUND_JS).await?;
        let rows: Vec<RawInbound> = serde_json::from_str(&raw)?;

        let mut out: Vec<InboundMessage> = rows
            .into_iter()
            .filter(|r| !r.id.is_empty())
            .map(|r| InboundMessage {
                external_id: external_id(r.epoch, &r.id),
                body: r.body,
                timestamp: Utc
                    .timestamp_opt(r.epoch, 0)
                    .single()
                    .unwrap_or_else(Utc::now),
            })
            .filter(|m| m.external_id.as_str() > since)
            .collect();
        out.sort_by(|a, b| a.external_id.cmp(&b.external_id));
        Ok(out)
    }

    /// Group chats this account can see.
    pub async fn list_groups(&self) -> Result<Vec<GroupInfo>> {
        let raw = self.eval_string(GROUPS_JS).await?;
        let rows: Vec<RawGroup> = serde_json::from_str(&raw)?;
        Ok(rows
            .into_iter()
            .map(|g| GroupInfo {
                id: g.id,
                title: g.title,
                member_count: g.count,
            })
            .collect())
    }

    /// Members of a group. Phone-form ids (`…@c.us`) yield a sendable phone;
    /// LID-form ids come back with an empty phone and are not sendable.
    pub async fn list_group_members(&self, group_id: &str) -> Result<Vec<GroupMember>> {
        let gid = serde_json::to_string(group_id)?;
        let js = format!(
            r#"((gid) => {{
                const store = window.Store;
                if (!store || !store.Chat) return '[]';
                const chat = store.Chat.get(gid);
                if (!chat || !chat.groupMetadata) return '[]';
                const members = chat.groupMetadata.participants.getModelsArray().map(p => {{
                    const id = p.id._serialized;
                    const contact = store.Contact ? store.Contact.get(p.id) : null;
                    return {{
                        id: id,
                        name: contact ? (contact.name || contact.pushname || '') : '',
                        phone: id.endsWith('@c.us') ? id.split('@')[0] : '',
                    }};
                }});
                return JSON.stringify(members);
            }})({gid})"#
        );
        let raw = self.eval_string(&js).await?;
        let rows: Vec<RawMember> = serde_json::from_str(&raw)?;
        Ok(rows
            .into_iter()
            .map(|m| GroupMember {
                display_name: if m.name.is_empty() { m.id.clone() } else { m.name },
                username: None,
                phone: if m.phone.is_empty() {
                    None
                } else {
                    Some(m.phone.clone())
                },
                telegram_user_id: None,
                peer_address: m.phone,
            })
            .collect())
    }

    /// Close the browser, keeping the profile directory.
    pub async fn disconnect(&self) {
        if let Some(mut browser) = self.browser.lock().await.take() {
            let _ = browser.close().await;
            let _ = browser.wait().await;
        }
        self.page.lock().await.take();
        if let Some(task) = self.handler_task.lock().unwrap().take() {
            task.abort();
        }
        *self.status.lock().unwrap() = SessionStatus::Disconnected;
        info!(key = %self.key, "whatsapp session disconnected");
    }

    /// Disconnect and delete the persisted profile.
    pub async fn delete_session(&self) {
        self.disconnect().await;
        if let Err(e) = std::fs::remove_dir_all(&self.profile_dir) {
            warn!(key = %self.key, error = %e, "failed to remove whatsapp profile dir");
        }
    }

    // --- internals ---------------------------------------------------------

    async fn eval_string(&self, js: &str) -> Result<String> {
        let page = self.page.lock().await;
        let page = page
            .as_ref()
            .ok_or_else(|| SessionError::NotConnected("page closed".to_string()))?;
        page.evaluate(js)
            .await
            .map_err(|e| SessionError::Browser(format!("evaluate: {e}")))?
            .into_value::<String>()
            .map_err(|e| SessionError::Browser(format!("evaluate result: {e}")))
    }

    async fn eval_bool(&self, js: &str) -> Result<bool> {
        let page = self.page.lock().await;
        let page = page
            .as_ref()
            .ok_or_else(|| SessionError::NotConnected("page closed".to_string()))?;
        page.evaluate(js)
            .await
            .map_err(|e| SessionError::Browser(format!("evaluate: {e}")))?
            .into_value::<bool>()
            .map_err(|e| SessionError::Browser(format!("evaluate result: {e}")))
    }

    /// Navigate to the chat page for `phone`, optionally pre-filling `text`.
    async fn open_chat(&self, phone: &str, text: Option<&str>) -> Result<()> {
        if phone.is_empty() || !phone.chars().all(|c| c.is_ascii_digit()) {
            return Err(SessionError::RecipientInvalid(format!(
                "whatsapp needs a digit-only phone, got {phone:?}"
            )));
        }
        let mut params = vec![("phone", phone)];
        if let Some(t) = text {
            params.push(("text", t));
        }
        let url = Url::parse_with_params(&format!("{WA_URL}/send"), &params)
            .map_err(|e| SessionError::Browser(format!("url: {e}")))?;

        let page = self.page.lock().await;
        let page = page
            .as_ref()
            .ok_or_else(|| SessionError::NotConnected("page closed".to_string()))?;
        tokio::time::timeout(NAV_TIMEOUT, page.goto(url.as_str()))
            .await
            .map_err(|_| SessionError::Timeout {
                secs: NAV_TIMEOUT.as_secs(),
            })?
            .map_err(|e| SessionError::Browser(format!("goto: {e}")))?;
        Ok(())
    }
}

/// Monotonic external id: fixed-width epoch prefix keeps string comparison
/// equivalent to time order.
fn external_id(epoch: i64, data_id: &str) -> String {
    format!("{:010}_{}", epoch.max(0), data_id)
}

#[async_trait]
impl DirectSender for WhatsAppWebSession {
    /// The scripted send: navigate, reject invalid numbers, wait for the
    /// send control (15 s budget), click, and confirm via the on-screen
    /// delivery marker. Absence of the marker with no error dialog is still
    /// reported as sent (`delivered_marker_seen = false`).
    async fn send_now(&self, to: &str, body: &str) -> Result<SessionReceipt> {
        if self.probe_status().await != SessionStatus::Connected {
            return Err(SessionError::NotConnected(
                "whatsapp session is not linked".to_string(),
            ));
        }
        self.open_chat(to, Some(body)).await?;

        let deadline = Instant::now() + SEND_CONTROL_TIMEOUT;
        loop {
            if self.eval_bool(INVALID_DIALOG_JS).await.unwrap_or(false) {
                let _ = self.eval_bool(DISMISS_DIALOG_JS).await;
                return Err(SessionError::RecipientInvalid(format!(
                    "whatsapp rejected number {to}"
                )));
            }

            let clicked = {
                let page = self.page.lock().await;
                let page = page
                    .as_ref()
                    .ok_or_else(|| SessionError::NotConnected("page closed".to_string()))?;
                match page.find_element("span[data-icon=\"send\"]").await {
                    Ok(button) => {
                        button
                            .click()
                            .await
                            .map_err(|e| SessionError::Browser(format!("click send: {e}")))?;
                        true
                    }
                    Err(_) => false,
                }
            };
            if clicked {
                break;
            }
            if Instant::now() >= deadline {
                return Err(SessionError::Stalled(format!(
                    "send control did not appear within {}s",
                    SEND_CONTROL_TIMEOUT.as_secs()
                )));
            }
            tokio::time::sleep(std::time::Duration::from_millis(500)).await;
        }

        // Delivery marker usually lands within a few seconds.
        let mut marker_seen = false;
        for _ in 0..10 {
            if self.eval_bool(MARKER_JS).await.unwrap_or(false) {
                marker_seen = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(500)).await;
        }

        let data_id = self.eval_string(LAST_OUT_JS).await.unwrap_or_default();
        let external = if data_id.is_empty() {
            external_id(Utc::now().timestamp(), &format!("wa-{}", Uuid::new_v4()))
        } else {
            external_id(Utc::now().timestamp(), &data_id)
        };
        debug!(key = %self.key, to, marker_seen, "whatsapp message sent");
        Ok(SessionReceipt {
            external_id: external,
            delivered_marker_seen: marker_seen,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn external_id_orders_by_time_then_id() {
        let a = external_id(100, "aaa");
        let b = external_id(200, "000");
        assert!(a < b, "earlier message must sort first");
        let c = external_id(1700000000, "x");
        assert!(b < c);
    }

    #[test]
    fn negative_epoch_clamps() {
        assert!(external_id(-5, "x").starts_with("0000000000_"));
    }
}
