use std::time::Duration;

use clap::ValueEnum;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::command::Command;
use crate::display;
use crate::dom::{Document, Element};
use crate::event::ServerEvent;
use crate::model::{LogUpdate, TradeUpdate, TradesUpdate};
use crate::page::{Page, PageLayout, build_document};
use crate::polling::FeedPayload;
use crate::toast::{Notifier, Severity, Toast};

pub const SOCKET_BADGE_ID: &str = "socket-status";
pub const POLLING_BADGE_ID: &str = "polling-status";

/// Which update strategy keeps the page fresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    Push,
    Poll,
}

impl Mode {
    pub fn badge_id(&self) -> &'static str {
        match self {
            Mode::Push => SOCKET_BADGE_ID,
            Mode::Poll => POLLING_BADGE_ID,
        }
    }

    fn initial_badge(&self) -> (&'static str, &'static str) {
        match self {
            Mode::Push => ("未连接", "bg-secondary"),
            Mode::Poll => ("已连接", "bg-success"),
        }
    }
}

/// The page the user is looking at: its document, toasts and connection
/// badge. Every message from the bus ends up in [`Session::apply`].
#[derive(Debug)]
pub struct Session {
    mode: Mode,
    page: Page,
    layout: PageLayout,
    document: Document,
    notifier: Notifier,
    badge_text: String,
    badge_class: String,
}

impl Session {
    pub fn new(mode: Mode, page: Page, layout: PageLayout, toast_ttl: Duration) -> Self {
        let document = build_document(&page, &layout);
        let (text, class) = mode.initial_badge();
        let mut session = Session {
            mode,
            page,
            layout,
            document,
            notifier: Notifier::new(toast_ttl),
            badge_text: text.to_string(),
            badge_class: format!("badge {class} ms-2"),
        };
        session.install_badge();
        session
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn page(&self) -> &Page {
        &self.page
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    /// Rebuilds the document for `page`; outstanding toasts go with the old one
    /// while the badge keeps its last state.
    pub fn navigate(&mut self, page: Page) {
        info!(page = %page, "navigating");
        self.document = build_document(&page, &self.layout);
        self.page = page;
        self.notifier.reset();
        self.install_badge();
    }

    fn install_badge(&mut self) {
        let badge = Element::new("span")
            .with_id(self.mode.badge_id())
            .with_class(self.badge_class.clone())
            .with_text(self.badge_text.clone());
        if let Some(navbar) = self.document.query_class_mut("navbar-text") {
            navbar.append_child(badge);
        }
    }

    fn set_badge(&mut self, text: &str, class: &str) {
        self.badge_text = text.to_string();
        self.badge_class = format!("badge {class}");
        if let Some(badge) = self.document.get_element_by_id_mut(self.mode.badge_id()) {
            badge.set_text(&self.badge_text);
            badge.set_class(&self.badge_class);
        }
    }

    pub fn set_polling_badge(&mut self, enabled: bool) {
        if self.mode != Mode::Poll {
            return;
        }
        if enabled {
            self.set_badge("已连接", "bg-success");
        } else {
            self.set_badge("已断开", "bg-secondary");
        }
    }

    pub fn notify(&mut self, toast: &Toast, now: Instant) {
        self.notifier.show(&mut self.document, toast, now);
    }

    pub fn expire_toasts(&mut self, now: Instant) -> usize {
        self.notifier.expire(&mut self.document, now)
    }

    /// Closes the newest toast on screen, if any.
    pub fn dismiss_latest_toast(&mut self) -> bool {
        self.notifier.dismiss_latest(&mut self.document).is_some()
    }

    /// Flips the log panel's auto-scroll checkbox; `None` off the logs page.
    pub fn toggle_auto_scroll(&mut self) -> Option<bool> {
        let checkbox = self.document.get_element_by_id_mut("autoScroll")?;
        let checked = !checkbox.is_checked();
        checkbox.set_checked(checked);
        Some(checked)
    }

    pub fn scroll_logs(&mut self, delta: isize) {
        if let Some(container) = self.document.get_element_by_id_mut("logsContainer") {
            let target = container.scroll_top().saturating_add_signed(delta);
            container.set_scroll_top(target);
        }
    }

    pub fn apply(&mut self, command: Command, now: Instant) {
        match command {
            Command::Push(event) => self.apply_event(event, now),
            Command::Feed(payload) => self.apply_feed(payload),
            Command::FeedFailed { feed, error } => {
                warn!(feed = %feed, error = %error, "feed request failed");
                self.notify(
                    &Toast::new("连接错误", "无法从服务器获取数据", Severity::Danger),
                    now,
                );
            }
            Command::Control(outcome) => {
                let toast = outcome.toast();
                self.notify(&toast, now);
            }
            Command::Error(_) | Command::Exit => {}
        }
    }

    fn apply_event(&mut self, event: ServerEvent, now: Instant) {
        debug!(event = event.name(), "applying push event");
        match event {
            ServerEvent::Connect => {
                self.set_badge("已连接", "bg-success");
                self.notify(&Toast::success("连接成功", "已成功连接到服务器"), now);
            }
            ServerEvent::Disconnect(reason) => {
                info!(reason = %reason, "disconnected from server");
                self.set_badge("已断开", "bg-secondary");
                self.notify(
                    &Toast::new("连接断开", "与服务器的连接已断开", Severity::Warning),
                    now,
                );
            }
            ServerEvent::ConnectError(error) => {
                warn!(error = %error, "connection error");
                self.set_badge("连接错误", "bg-danger");
            }
            ServerEvent::ReconnectAttempt(attempt) => {
                debug!(attempt, "reconnect attempt");
                self.set_badge("正在重连...", "bg-warning");
            }
            ServerEvent::Reconnect(attempt) => {
                info!(attempt, "reconnected");
                self.set_badge("已重连", "bg-success");
            }
            ServerEvent::ReconnectFailed => self.set_badge("连接失败", "bg-danger"),
            ServerEvent::StatusUpdate(snapshot) => {
                display::update_status_display(&mut self.document, &snapshot)
            }
            ServerEvent::LogUpdate(LogUpdate { logs, entry }) => {
                if let Some(logs) = logs {
                    display::update_logs_display(&mut self.document, &logs);
                } else if let Some(entry) = entry {
                    display::append_log_entry(&mut self.document, &entry, true);
                }
            }
            ServerEvent::ElephantsUpdate(snapshot) => {
                display::update_elephants_display(&mut self.document, &snapshot)
            }
            ServerEvent::TradeUpdate(TradeUpdate { trade }) => {
                if let Some(trade) = trade {
                    display::append_trade_record(&mut self.document, &trade, true);
                }
            }
            ServerEvent::TradesUpdate(TradesUpdate { trades }) => {
                if let Some(trades) = trades {
                    display::update_trades_display(&mut self.document, &trades);
                }
            }
        }
    }

    fn apply_feed(&mut self, payload: FeedPayload) {
        let doc = &mut self.document;
        match payload {
            FeedPayload::Status(snapshot) => display::update_status_display(doc, &snapshot),
            FeedPayload::Elephants(snapshot) => display::update_elephants_display(doc, &snapshot),
            FeedPayload::RecentTrades(trades) => display::update_recent_trades_display(doc, &trades),
            FeedPayload::Logs(logs) => display::update_logs_display(doc, &logs),
            FeedPayload::Assets(snapshot) => display::update_assets_display(doc, &snapshot),
            FeedPayload::Trades(trades) => display::update_trades_display(doc, &trades),
        }
    }
}
