use std::sync::Arc;
use std::time::Duration;

use color_eyre::Result;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use ratatui::Frame;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Clear, Paragraph, Wrap};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Instant;
use tracing::{info, warn};
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::command::Command;
use crate::control::{ControlAction, ControlClient, ControlOutcome};
use crate::display::{CLASS_NEGATIVE, CLASS_NON_NEGATIVE};
use crate::dom::Element;
use crate::error_log::ErrorLogStore;
use crate::event::ServerEvent;
use crate::page::Page;
use crate::polling::{HttpFeedSource, PollingClient, TRADES_REFRESH, spawn_refresh};
use crate::session::Session;
use crate::toast::TOAST_CONTAINER_ID;

const TRADE_COLUMN_WIDTHS: [usize; 7] = [19, 8, 10, 8, 10, 8, 10];
const TOAST_WIDTH: u16 = 36;
const TOAST_HEIGHT: u16 = 4;
const LOG_PAGE: isize = 10;

pub struct TuiApp {
    session: Session,
    polling: Option<PollingClient<HttpFeedSource>>,
    feeds: Arc<HttpFeedSource>,
    control: ControlClient,
    tx: broadcast::Sender<Command>,
    error_log: ErrorLogStore,
    last_draw: Instant,
    min_redraw_gap: Duration,
    dirty: bool,
    status_message: Option<String>,
    status_visible_until: Option<Instant>,
    status_is_error: bool,
}

impl TuiApp {
    fn is_exit_key(key: &KeyEvent) -> bool {
        matches!(
            key.code,
            KeyCode::Char('q') | KeyCode::Char('Q') | KeyCode::Esc
        ) || (key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL))
    }

    pub fn new(
        session: Session,
        polling: Option<PollingClient<HttpFeedSource>>,
        feeds: HttpFeedSource,
        control: ControlClient,
        tx: broadcast::Sender<Command>,
        error_log: ErrorLogStore,
    ) -> TuiApp {
        let min_redraw_gap = Duration::from_millis(100);
        TuiApp {
            session,
            polling,
            feeds: Arc::new(feeds),
            control,
            tx,
            error_log,
            last_draw: Instant::now() - min_redraw_gap,
            min_redraw_gap,
            dirty: false,
            status_message: None,
            status_visible_until: None,
            status_is_error: false,
        }
    }

    fn set_status_message(&mut self, message: impl Into<String>) {
        self.status_message = Some(message.into());
        self.status_visible_until = Some(Instant::now() + Duration::from_secs(3));
        self.status_is_error = false;
    }

    fn set_error_status_message(&mut self, message: impl Into<String>) {
        self.status_message = Some(message.into());
        self.status_visible_until = Some(Instant::now() + Duration::from_secs(5));
        self.status_is_error = true;
    }

    /// Returns true when a message was dropped.
    fn clear_status_if_allowed(&mut self) -> bool {
        if self.status_message.is_none() {
            return false;
        }
        if let Some(visible_until) = self.status_visible_until {
            if Instant::now() < visible_until {
                return false;
            }
        }
        self.status_message = None;
        self.status_visible_until = None;
        self.status_is_error = false;
        true
    }

    fn record_error(&self, source: &str, message: &str) {
        if let Err(err) = self.error_log.append_message(source, message) {
            warn!(error = %err, "failed to append error log");
        }
    }

    pub fn dispose(&mut self) {
        if let Some(polling) = &mut self.polling {
            polling.dispose();
        }
        ratatui::restore();
    }

    pub async fn run(&mut self, rx: &mut broadcast::Receiver<Command>) -> Result<()> {
        color_eyre::install()?;
        let mut terminal = ratatui::init();
        let mut input_tick = tokio::time::interval(self.min_redraw_gap);
        terminal.draw(|frame| self.render(frame))?;
        self.last_draw = Instant::now();
        loop {
            tokio::select! {
                biased;
                _ = input_tick.tick() => {
                    let mut should_redraw = self.dirty;
                    match self.poll_input()? {
                        InputOutcome::Exit => return Ok(()),
                        InputOutcome::Changed => should_redraw = true,
                        InputOutcome::Idle => {}
                    }
                    if self.session.expire_toasts(Instant::now()) > 0 {
                        should_redraw = true;
                    }
                    if self.clear_status_if_allowed() {
                        should_redraw = true;
                    }
                    if should_redraw {
                        terminal.draw(|frame| self.render(frame))?;
                        self.last_draw = Instant::now();
                        self.dirty = false;
                    }
                }
                result = rx.recv() => {
                    match result {
                        Ok(Command::Exit) => return Ok(()),
                        Ok(command) => {
                            self.on_command(command);
                            if self.last_draw.elapsed() >= self.min_redraw_gap {
                                terminal.draw(|frame| self.render(frame))?;
                                self.last_draw = Instant::now();
                                self.dirty = false;
                            } else {
                                self.dirty = true;
                            }
                        }
                        Err(RecvError::Closed) => break,
                        Err(RecvError::Lagged(skipped)) => self.on_lagged(skipped),
                    }
                }
            }
        }
        Ok(())
    }

    /// Updates the bus dropped are gone; the next feed or push event repaints
    /// the affected panel.
    fn on_lagged(&mut self, skipped: u64) {
        warn!(skipped, "terminal fell behind the command bus");
        self.set_error_status_message(format!("界面更新丢失 {skipped} 条消息"));
        self.dirty = true;
    }

    fn on_command(&mut self, command: Command) {
        match &command {
            Command::Error(message) => {
                self.record_error("push", message);
                self.set_error_status_message(message.clone());
            }
            Command::FeedFailed { feed, error } => {
                self.record_error(&format!("feed:{feed}"), error);
            }
            Command::Control(ControlOutcome::Failed { action, error }) => {
                self.record_error(&format!("control:{}", action.as_str()), error);
            }
            Command::Push(ServerEvent::ConnectError(error)) => {
                self.record_error("push", error);
            }
            Command::Push(ServerEvent::ReconnectFailed) => {
                self.set_error_status_message("推送连接重试次数已用尽");
            }
            _ => {}
        }
        self.session.apply(command, Instant::now());
    }

    fn poll_input(&mut self) -> Result<InputOutcome> {
        let mut outcome = InputOutcome::Idle;
        while event::poll(Duration::from_millis(0))? {
            match event::read()? {
                Event::Key(key) if key.kind == KeyEventKind::Press => {
                    if Self::is_exit_key(&key) {
                        return Ok(InputOutcome::Exit);
                    }
                    self.handle_key_event(key);
                    outcome = InputOutcome::Changed;
                }
                Event::Resize(_, _) => outcome = InputOutcome::Changed,
                _ => {}
            }
        }
        Ok(outcome)
    }

    fn handle_key_event(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Char(digit @ '1'..='4') => {
                let index = digit as usize - '1' as usize;
                self.navigate(Page::NAVIGABLE[index].clone());
            }
            KeyCode::Char('s') => self.send_control(ControlAction::Start),
            KeyCode::Char('x') => self.send_control(ControlAction::Stop),
            KeyCode::Char('u') => self.send_control(ControlAction::UpdateSettings),
            KeyCode::Char('p') => self.pause_polling(),
            KeyCode::Char('r') => self.resume_polling(),
            KeyCode::Char('f') | KeyCode::F(5) => self.refresh_trades(),
            KeyCode::Char('d') => {
                if !self.session.dismiss_latest_toast() {
                    self.set_status_message("没有可关闭的通知");
                }
            }
            KeyCode::Char('a') => match self.session.toggle_auto_scroll() {
                Some(true) => self.set_status_message("自动滚动: 开"),
                Some(false) => self.set_status_message("自动滚动: 关"),
                None => self.set_status_message("当前页面没有日志面板"),
            },
            KeyCode::Up => self.session.scroll_logs(-1),
            KeyCode::Down => self.session.scroll_logs(1),
            KeyCode::PageUp => self.session.scroll_logs(-LOG_PAGE),
            KeyCode::PageDown => self.session.scroll_logs(LOG_PAGE),
            KeyCode::Home => self.session.scroll_logs(isize::MIN),
            KeyCode::End => self.session.scroll_logs(isize::MAX),
            _ => {}
        }
    }

    fn navigate(&mut self, page: Page) {
        if self.session.page() == &page {
            return;
        }
        self.session.navigate(page.clone());
        if let Some(polling) = &mut self.polling {
            polling.navigate(page.clone());
            let enabled = polling.is_enabled();
            self.session.set_polling_badge(enabled);
        }
        self.set_status_message(format!("已切换到 {}", page.title()));
    }

    fn send_control(&mut self, action: ControlAction) {
        info!(action = action.as_str(), "sending control command");
        self.control.dispatch(action, self.tx.clone());
        self.set_status_message(format!("正在发送 {} 命令...", action.as_str()));
    }

    fn pause_polling(&mut self) {
        let Some(polling) = &mut self.polling else {
            self.set_status_message("推送模式下没有轮询任务");
            return;
        };
        polling.stop_all();
        self.session.set_polling_badge(false);
        self.set_status_message("已停止所有轮询");
    }

    fn resume_polling(&mut self) {
        let Some(polling) = &mut self.polling else {
            self.set_status_message("推送模式下没有轮询任务");
            return;
        };
        polling.resume_all();
        let feeds = polling.feed_names().join(", ");
        self.session.set_polling_badge(true);
        self.set_status_message(format!("已恢复轮询: {feeds}"));
    }

    fn refresh_trades(&mut self) {
        if self.session.page() != &Page::Trades {
            self.set_status_message("只有交易记录页面支持手动刷新");
            return;
        }
        spawn_refresh(TRADES_REFRESH, self.feeds.clone(), self.tx.clone());
        self.set_status_message("正在刷新交易记录...");
    }

    fn render(&self, frame: &mut Frame) {
        let area = frame.area();
        let doc = self.session.document();
        let status_rows = doc
            .get_element_by_id("statusCard")
            .map_or(0, |card| card.children().len()) as u16;
        let mut constraints = vec![
            Constraint::Length(4),
            Constraint::Length(status_rows + 2),
            Constraint::Min(3),
        ];
        let has_status = self.status_message.is_some() && area.height >= 12;
        if has_status {
            constraints.push(Constraint::Length(3));
        }
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints(constraints)
            .split(area);
        self.render_header(frame, chunks[0]);
        if let Some(card) = doc.get_element_by_id("statusCard") {
            render_field_card(frame, chunks[1], card, "运行状态");
        }
        self.render_page_body(frame, chunks[2]);
        if has_status {
            self.render_status(frame, chunks[3]);
        }
        self.render_toasts(frame, chunks[2]);
    }

    fn render_header(&self, frame: &mut Frame, area: Rect) {
        let mut tabs = Vec::new();
        for (idx, page) in Page::NAVIGABLE.iter().enumerate() {
            let style = if page == self.session.page() {
                Style::default()
                    .fg(Color::LightCyan)
                    .add_modifier(Modifier::BOLD | Modifier::UNDERLINED)
            } else {
                Style::default().fg(Color::Gray)
            };
            tabs.push(Span::styled(format!("{} {}", idx + 1, page.title()), style));
            tabs.push(Span::raw("  "));
        }
        let navbar = self.session.document().query_class("navbar-text");
        if let Some(badge) = navbar.and_then(|nav| nav.find_by_id(self.session.mode().badge_id())) {
            tabs.push(Span::raw("│ "));
            tabs.push(Span::styled(
                format!(" {} ", badge.text()),
                Style::default()
                    .fg(Color::Black)
                    .bg(badge_color(badge.class())),
            ));
        }
        let hints = "s 启动 · x 停止 · u 更新设置 · p 暂停轮询 · r 恢复轮询 · f 刷新交易 · a 自动滚动 · d 关闭通知 · q 退出";
        let title = navbar.map_or("大象策略", Element::text);
        let paragraph = Paragraph::new(vec![
            Line::from(tabs),
            Line::from(Span::styled(hints, Style::default().fg(Color::DarkGray))),
        ])
        .block(Block::bordered().title(format!("大象策略监控 · {title}")));
        frame.render_widget(paragraph, area);
    }

    fn render_page_body(&self, frame: &mut Frame, area: Rect) {
        let doc = self.session.document();
        if let Some(table) = doc.get_element_by_id("tradesTable") {
            let title = match self.session.page() {
                Page::Dashboard => "今日交易",
                _ => "交易记录",
            };
            render_trades_table(frame, area, table, title);
        } else if let Some(container) = doc.get_element_by_id("logsContainer") {
            let auto_scroll = doc
                .get_element_by_id("autoScroll")
                .is_some_and(Element::is_checked);
            render_logs(frame, area, container, auto_scroll);
        } else if let Some(card) = doc.get_element_by_id("assetsCard") {
            render_field_card(frame, area, card, "资产概览");
        } else {
            let paragraph = Paragraph::new("该页面没有可显示的面板")
                .alignment(Alignment::Center)
                .block(Block::bordered());
            frame.render_widget(paragraph, area);
        }
    }

    fn render_status(&self, frame: &mut Frame, area: Rect) {
        if let Some(message) = &self.status_message {
            let color = if self.status_is_error {
                Color::Red
            } else {
                Color::Yellow
            };
            let block = Block::bordered().title("Status");
            let status = Paragraph::new(message.as_str())
                .style(Style::default().fg(color))
                .alignment(Alignment::Left)
                .block(block);
            frame.render_widget(status, area);
        }
    }

    /// Newest toast sits at the bottom-right corner, older ones stack above.
    fn render_toasts(&self, frame: &mut Frame, area: Rect) {
        let Some(container) = self.session.document().get_element_by_id(TOAST_CONTAINER_ID) else {
            return;
        };
        if area.width < 12 || area.height < TOAST_HEIGHT {
            return;
        }
        let width = TOAST_WIDTH.min(area.width);
        let mut bottom = area.y + area.height;
        for toast in container.children().iter().rev() {
            if bottom < area.y + TOAST_HEIGHT {
                break;
            }
            let popup = Rect::new(area.x + area.width - width, bottom - TOAST_HEIGHT, width, TOAST_HEIGHT);
            render_toast(frame, popup, toast);
            bottom -= TOAST_HEIGHT;
        }
    }
}

enum InputOutcome {
    Idle,
    Changed,
    Exit,
}

fn render_field_card(frame: &mut Frame, area: Rect, card: &Element, title: &str) {
    let label_width = field_rows(card)
        .iter()
        .map(|(label, _, _)| UnicodeWidthStr::width(label.as_str()))
        .max()
        .unwrap_or(0);
    let lines: Vec<Line> = field_rows(card)
        .into_iter()
        .map(|(label, value, class)| {
            Line::from(vec![
                Span::styled(
                    pad_to_width(&label, label_width, ColumnAlign::Left),
                    Style::default().fg(Color::Gray),
                ),
                Span::raw("  "),
                Span::styled(
                    if value.is_empty() { "--".to_string() } else { value },
                    Style::default().fg(value_color(&class)),
                ),
            ])
        })
        .collect();
    let paragraph = Paragraph::new(lines).block(Block::bordered().title(title.to_string()));
    frame.render_widget(paragraph, area);
}

fn render_trades_table(frame: &mut Frame, area: Rect, table: &Element, title: &str) {
    let header: Vec<String> = table
        .find_by_tag("thead")
        .and_then(|thead| thead.find_by_tag("tr"))
        .map(|row| row.children().iter().map(|th| th.text().to_string()).collect())
        .unwrap_or_default();
    let mut lines = vec![Line::from(
        header
            .iter()
            .zip(TRADE_COLUMN_WIDTHS)
            .map(|(text, width)| {
                Span::styled(
                    format!("{} ", pad_to_width(&clip_to_width(text, width), width, ColumnAlign::Left)),
                    Style::default().add_modifier(Modifier::BOLD),
                )
            })
            .collect::<Vec<_>>(),
    )];
    let rows = table
        .find_by_tag("tbody")
        .map(Element::children)
        .unwrap_or_default();
    if rows.is_empty() {
        lines.push(Line::from(Span::styled(
            "暂无交易记录",
            Style::default().fg(Color::DarkGray),
        )));
    }
    for row in rows {
        let spans: Vec<Span> = row
            .children()
            .iter()
            .zip(TRADE_COLUMN_WIDTHS)
            .enumerate()
            .map(|(idx, (cell, width))| {
                let align = if idx >= 4 {
                    ColumnAlign::Right
                } else {
                    ColumnAlign::Left
                };
                Span::styled(
                    format!("{} ", pad_to_width(&clip_to_width(cell.text(), width), width, align)),
                    Style::default().fg(value_color(cell.class())),
                )
            })
            .collect();
        lines.push(Line::from(spans));
    }
    let paragraph = Paragraph::new(lines).block(Block::bordered().title(title.to_string()));
    frame.render_widget(paragraph, area);
}

fn render_logs(frame: &mut Frame, area: Rect, container: &Element, auto_scroll: bool) {
    let height = area.height.saturating_sub(2) as usize;
    let entries = container.children();
    let (start, end) = visible_window(entries.len(), height, container.scroll_top());
    let lines: Vec<Line> = entries[start..end]
        .iter()
        .map(|entry| {
            let time = entry
                .find_by_class("log-time")
                .map_or("", Element::text)
                .to_string();
            let message = entry
                .find_by_class("log-message")
                .map_or("", Element::text)
                .to_string();
            Line::from(vec![
                Span::styled(format!("[{time}] "), Style::default().fg(Color::DarkGray)),
                Span::raw(message),
            ])
        })
        .collect();
    let title = format!(
        "运行日志 · {}/{} · 自动滚动 {}",
        end,
        entries.len(),
        if auto_scroll { "开" } else { "关" }
    );
    let paragraph = Paragraph::new(lines)
        .wrap(Wrap { trim: false })
        .block(Block::bordered().title(title));
    frame.render_widget(paragraph, area);
}

fn render_toast(frame: &mut Frame, area: Rect, toast: &Element) {
    let title = toast.find_by_tag("strong").map_or("", Element::text);
    let time = toast.find_by_tag("small").map_or("", Element::text);
    let body = toast.find_by_class("toast-body").map_or("", Element::text);
    let color = toast_color(toast.class());
    let inner_width = area.width.saturating_sub(2) as usize;
    let paragraph = Paragraph::new(vec![
        Line::from(Span::styled(
            clip_to_width(body, inner_width),
            Style::default().fg(Color::White),
        )),
        Line::from(Span::styled(time.to_string(), Style::default().fg(Color::DarkGray))),
    ])
    .block(
        Block::bordered()
            .border_style(Style::default().fg(color))
            .title(Span::styled(
                title.to_string(),
                Style::default().fg(color).add_modifier(Modifier::BOLD),
            )),
    );
    frame.render_widget(Clear, area);
    frame.render_widget(paragraph, area);
}

/// (label, value text, value class) for each row of a field card.
fn field_rows(card: &Element) -> Vec<(String, String, String)> {
    card.children()
        .iter()
        .map(|row| {
            let label = row.find_by_class("field-label").map_or("", Element::text);
            let value = row.children().get(1);
            (
                label.to_string(),
                value.map_or("", Element::text).to_string(),
                value.map_or("", Element::class).to_string(),
            )
        })
        .collect()
}

/// Rows `[start, end)` of a log panel `height` rows tall, where `scroll_top`
/// marks the row just past the bottom of the view.
fn visible_window(len: usize, height: usize, scroll_top: usize) -> (usize, usize) {
    if len == 0 || height == 0 {
        return (0, 0);
    }
    let end = scroll_top.clamp(height.min(len), len);
    (end.saturating_sub(height), end)
}

fn badge_color(class: &str) -> Color {
    if class.contains("bg-success") {
        Color::Green
    } else if class.contains("bg-danger") {
        Color::Red
    } else if class.contains("bg-warning") {
        Color::Yellow
    } else {
        Color::Gray
    }
}

fn value_color(class: &str) -> Color {
    match class {
        CLASS_NON_NEGATIVE => Color::LightGreen,
        CLASS_NEGATIVE => Color::LightRed,
        _ => Color::White,
    }
}

fn toast_color(class: &str) -> Color {
    if class.contains("text-bg-danger") {
        Color::Red
    } else if class.contains("text-bg-warning") {
        Color::Yellow
    } else if class.contains("text-bg-info") {
        Color::Cyan
    } else {
        Color::Green
    }
}

#[derive(Clone, Copy)]
enum ColumnAlign {
    Left,
    Right,
}

/// Cuts `value` to `width` columns, spending the last one on an ellipsis.
fn clip_to_width(value: &str, width: usize) -> String {
    if value.width() <= width {
        return value.to_string();
    }
    let budget = width.saturating_sub(1);
    let mut used = 0;
    let mut clipped: String = value
        .chars()
        .take_while(|ch| {
            used += ch.width().unwrap_or(0);
            used <= budget
        })
        .collect();
    if width > 0 {
        clipped.push('…');
    }
    clipped
}

fn pad_to_width(value: &str, width: usize, align: ColumnAlign) -> String {
    let fill = width.saturating_sub(value.width());
    match align {
        ColumnAlign::Left => format!("{value}{:fill$}", ""),
        ColumnAlign::Right => format!("{:fill$}{value}", ""),
    }
}
