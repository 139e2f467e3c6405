use std::fmt;

use crate::dom::{Document, Element};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Page {
    Dashboard,
    Logs,
    Trades,
    Stats,
    Other(String),
}

impl Page {
    pub const NAVIGABLE: [Page; 4] = [Page::Dashboard, Page::Logs, Page::Trades, Page::Stats];

    pub fn from_path(path: &str) -> Page {
        match path.trim() {
            "/" | "/index" | "" => Page::Dashboard,
            "/logs" => Page::Logs,
            "/trades" => Page::Trades,
            "/stats" => Page::Stats,
            other => Page::Other(other.to_string()),
        }
    }

    pub fn path(&self) -> &str {
        match self {
            Page::Dashboard => "/",
            Page::Logs => "/logs",
            Page::Trades => "/trades",
            Page::Stats => "/stats",
            Page::Other(path) => path,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            Page::Dashboard => "控制面板",
            Page::Logs => "运行日志",
            Page::Trades => "交易记录",
            Page::Stats => "策略统计",
            Page::Other(path) => path,
        }
    }
}

impl fmt::Display for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

pub const DEFAULT_STATUS_FIELDS: &[&str] = &["运行状态", "交易股票数量", "今日盈亏", "总盈亏"];
pub const DEFAULT_ASSET_FIELDS: &[&str] = &["总资产", "可用资金", "持仓市值", "今日盈亏"];
pub const TRADE_COLUMNS: [&str; 7] = [
    "交易时间",
    "股票代码",
    "股票名称",
    "交易类型",
    "成交价格",
    "成交数量",
    "盈亏",
];

/// Which fields the status and assets cards lay out.
#[derive(Debug, Clone)]
pub struct PageLayout {
    pub status_fields: Vec<String>,
    pub asset_fields: Vec<String>,
}

impl Default for PageLayout {
    fn default() -> Self {
        PageLayout {
            status_fields: DEFAULT_STATUS_FIELDS.iter().map(|s| s.to_string()).collect(),
            asset_fields: DEFAULT_ASSET_FIELDS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Builds the markup a page ships with: navbar, status card and the
/// page-specific panel the feeds for that page write into.
pub fn build_document(page: &Page, layout: &PageLayout) -> Document {
    let navbar = Element::new("nav").with_class("navbar").with_child(
        Element::new("span")
            .with_class("navbar-text")
            .with_text(page.title()),
    );
    let mut body = Element::new("body")
        .with_child(navbar)
        .with_child(field_card("statusCard", "status", &layout.status_fields));
    match page {
        Page::Dashboard | Page::Trades => body.append_child(trades_table()),
        Page::Logs => body.append_child(logs_panel()),
        Page::Stats => body.append_child(field_card("assetsCard", "asset", &layout.asset_fields)),
        Page::Other(_) => {}
    }
    Document::new(body)
}

fn field_card(id: &str, prefix: &str, fields: &[String]) -> Element {
    let mut card = Element::new("div").with_id(id).with_class("card");
    for field in fields {
        card.append_child(
            Element::new("div")
                .with_class("field-row")
                .with_child(Element::new("span").with_class("field-label").with_text(field))
                .with_child(Element::new("span").with_id(format!("{prefix}-{field}"))),
        );
    }
    card
}

fn trades_table() -> Element {
    let mut header = Element::new("tr");
    for column in TRADE_COLUMNS {
        header.append_child(Element::new("th").with_text(column));
    }
    Element::new("table")
        .with_id("tradesTable")
        .with_class("table")
        .with_child(Element::new("thead").with_child(header))
        .with_child(Element::new("tbody"))
}

fn logs_panel() -> Element {
    Element::new("div")
        .with_class("logs-panel")
        .with_child(
            Element::new("input")
                .with_id("autoScroll")
                .with_class("form-check-input")
                .with_checked(true),
        )
        .with_child(Element::new("div").with_id("logsContainer").with_class("logs"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_and_root_are_the_dashboard() {
        assert_eq!(Page::from_path("/"), Page::Dashboard);
        assert_eq!(Page::from_path("/index"), Page::Dashboard);
        assert_eq!(Page::from_path("/settings"), Page::Other("/settings".into()));
        assert_eq!(Page::from_path("/stats").path(), "/stats");
    }

    #[test]
    fn pages_carry_only_their_own_panels() {
        let layout = PageLayout::default();
        let dashboard = build_document(&Page::Dashboard, &layout);
        assert!(dashboard.contains("statusCard"));
        assert!(dashboard.contains("status-今日盈亏"));
        assert!(dashboard.contains("tradesTable"));
        assert!(!dashboard.contains("logsContainer"));

        let logs = build_document(&Page::Logs, &layout);
        assert!(logs.contains("logsContainer"));
        assert!(logs.get_element_by_id("autoScroll").unwrap().is_checked());
        assert!(!logs.contains("tradesTable"));

        let stats = build_document(&Page::Stats, &layout);
        assert!(stats.contains("asset-可用资金"));

        let settings = build_document(&Page::Other("/settings".into()), &layout);
        assert!(settings.query_class("navbar-text").is_some());
        assert!(!settings.contains("assetsCard"));
    }
}
