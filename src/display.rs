use serde_json::Value;

use crate::dom::{Document, Element};
use crate::model::{
    AssetSnapshot, ElephantSnapshot, FieldSnapshot, LogEntry, StatusSnapshot, TradeRecord,
    is_pnl_field,
};

pub const CLASS_NON_NEGATIVE: &str = "text-success";
pub const CLASS_NEGATIVE: &str = "text-danger";

pub fn update_status_display(doc: &mut Document, snapshot: &StatusSnapshot) {
    if !doc.contains("statusCard") {
        return;
    }
    update_fields(doc, "status", snapshot);
}

pub fn update_assets_display(doc: &mut Document, snapshot: &AssetSnapshot) {
    if !doc.contains("assetsCard") {
        return;
    }
    update_fields(doc, "asset", snapshot);
}

fn update_fields(doc: &mut Document, prefix: &str, snapshot: &FieldSnapshot) {
    for (key, value) in snapshot.iter() {
        let Some(element) = doc.get_element_by_id_mut(&format!("{prefix}-{key}")) else {
            continue;
        };
        if is_pnl_field(key) {
            let amount = parse_float(value);
            element.set_text(format_pnl(amount));
            element.set_class(pnl_class(amount));
        } else {
            element.set_text(display_text(value));
        }
    }
}

pub fn update_logs_display(doc: &mut Document, logs: &[LogEntry]) {
    let auto_scroll = auto_scroll_enabled(doc);
    let Some(container) = doc.get_element_by_id_mut("logsContainer") else {
        return;
    };
    container.clear_children();
    for log in logs {
        container.append_child(log_element(log));
    }
    if auto_scroll {
        container.scroll_to_bottom();
    }
}

pub fn append_log_entry(doc: &mut Document, log: &LogEntry, scroll: bool) {
    let auto_scroll = auto_scroll_enabled(doc);
    let Some(container) = doc.get_element_by_id_mut("logsContainer") else {
        return;
    };
    container.append_child(log_element(log));
    if scroll && auto_scroll {
        container.scroll_to_bottom();
    }
}

fn auto_scroll_enabled(doc: &Document) -> bool {
    doc.get_element_by_id("autoScroll")
        .is_some_and(Element::is_checked)
}

fn log_element(log: &LogEntry) -> Element {
    Element::new("div")
        .with_class("log-entry")
        .with_child(
            Element::new("span")
                .with_class("log-time")
                .with_text(display_text(&log.time)),
        )
        .with_child(
            Element::new("span")
                .with_class("log-message")
                .with_text(display_text(&log.message)),
        )
}

/// Elephant data has no panel yet; the payload is accepted and dropped.
pub fn update_elephants_display(_doc: &mut Document, _snapshot: &ElephantSnapshot) {}

pub fn update_trades_display(doc: &mut Document, trades: &[TradeRecord]) {
    let Some(tbody) = trades_body(doc) else {
        return;
    };
    tbody.clear_children();
    for trade in trades {
        tbody.append_child(trade_row(trade));
    }
}

/// Dashboard feed of today's latest trades; same table, full replace.
pub fn update_recent_trades_display(doc: &mut Document, trades: &[TradeRecord]) {
    update_trades_display(doc, trades);
}

/// Inserts one row, at the top unless `prepend` is false.
pub fn append_trade_record(doc: &mut Document, trade: &TradeRecord, prepend: bool) {
    let Some(tbody) = trades_body(doc) else {
        return;
    };
    let row = trade_row(trade);
    if prepend && !tbody.children().is_empty() {
        tbody.prepend_child(row);
    } else {
        tbody.append_child(row);
    }
}

fn trades_body(doc: &mut Document) -> Option<&mut Element> {
    doc.get_element_by_id_mut("tradesTable")?
        .find_by_tag_mut("tbody")
}

fn trade_row(trade: &TradeRecord) -> Element {
    let profit = parse_float(&trade.profit);
    let mut row = Element::new("tr");
    for value in [
        &trade.time,
        &trade.symbol,
        &trade.name,
        &trade.action,
        &trade.price,
        &trade.quantity,
    ] {
        row.append_child(Element::new("td").with_text(display_text(value)));
    }
    row.append_child(
        Element::new("td")
            .with_class(pnl_class(profit))
            .with_text(format_pnl(profit)),
    );
    row
}

/// `NaN` compares false against zero, so unparsable input lands on the
/// negative class.
pub fn pnl_class(value: f64) -> &'static str {
    if value >= 0.0 {
        CLASS_NON_NEGATIVE
    } else {
        CLASS_NEGATIVE
    }
}

pub fn format_pnl(value: f64) -> String {
    if value.is_nan() {
        return "NaN".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    // -0 prints unsigned; small negatives keep their sign.
    if value == 0.0 {
        return "0.00".to_string();
    }
    let magnitude = value.abs();
    let eighths = magnitude * 8.0;
    // Exact ties at the third decimal are odd multiples of 1/8; those round
    // away from zero instead of to even.
    if eighths.fract() == 0.0 && eighths % 2.0 == 1.0 {
        let hundredths = (magnitude * 100.0 + 0.5).floor() as u64;
        let sign = if value < 0.0 { "-" } else { "" };
        return format!("{sign}{}.{:02}", hundredths / 100, hundredths % 100);
    }
    format!("{value:.2}")
}

/// Leading-prefix float parse: `"12.5abc"` is 12.5, `"abc"` is NaN.
pub fn parse_float(value: &Value) -> f64 {
    match value {
        Value::Number(number) => number.as_f64().unwrap_or(f64::NAN),
        Value::String(text) => parse_float_prefix(text),
        Value::Array(items) if items.len() == 1 => parse_float(&items[0]),
        _ => f64::NAN,
    }
}

fn parse_float_prefix(text: &str) -> f64 {
    let trimmed = text.trim_start();
    let bytes = trimmed.as_bytes();
    let mut end = 0;
    if matches!(bytes.first(), Some(b'+') | Some(b'-')) {
        end = 1;
    }
    if trimmed[end..].starts_with("Infinity") {
        return if bytes.first() == Some(&b'-') {
            f64::NEG_INFINITY
        } else {
            f64::INFINITY
        };
    }
    let int_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    let mut digits = end - int_start;
    if end < bytes.len() && bytes[end] == b'.' {
        let frac_start = end + 1;
        let mut frac_end = frac_start;
        while frac_end < bytes.len() && bytes[frac_end].is_ascii_digit() {
            frac_end += 1;
        }
        digits += frac_end - frac_start;
        if digits > 0 {
            end = frac_end;
        }
    }
    if digits == 0 {
        return f64::NAN;
    }
    if end < bytes.len() && (bytes[end] == b'e' || bytes[end] == b'E') {
        let mut exp_end = end + 1;
        if matches!(bytes.get(exp_end), Some(b'+') | Some(b'-')) {
            exp_end += 1;
        }
        let exp_digits_start = exp_end;
        while exp_end < bytes.len() && bytes[exp_end].is_ascii_digit() {
            exp_end += 1;
        }
        if exp_end > exp_digits_start {
            end = exp_end;
        }
    }
    trimmed[..end].parse::<f64>().unwrap_or(f64::NAN)
}

/// Text a value shows as when written verbatim into an element.
pub fn display_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => {
            if number.is_f64() {
                number.as_f64().map(format_number).unwrap_or_default()
            } else {
                number.to_string()
            }
        }
        Value::String(text) => text.clone(),
        Value::Array(items) => items
            .iter()
            .map(display_text)
            .collect::<Vec<_>>()
            .join(","),
        Value::Object(_) => "[object Object]".to_string(),
    }
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e21 {
        format!("{value:.0}")
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::Element;
    use crate::page::{Page, PageLayout, build_document};
    use serde_json::json;

    fn dashboard() -> Document {
        build_document(&Page::Dashboard, &PageLayout::default())
    }

    fn logs_page() -> Document {
        build_document(&Page::Logs, &PageLayout::default())
    }

    fn trade(symbol: &str, profit: Value) -> TradeRecord {
        TradeRecord {
            time: json!("09:30:00"),
            symbol: json!(symbol),
            name: json!("测试"),
            action: json!("买入"),
            price: json!(10.5),
            quantity: json!(100),
            profit,
        }
    }

    fn row_symbols(doc: &Document) -> Vec<String> {
        doc.get_element_by_id("tradesTable")
            .and_then(|table| table.find_by_tag("tbody"))
            .map(|tbody| {
                tbody
                    .children()
                    .iter()
                    .map(|row| row.children()[1].text().to_string())
                    .collect()
            })
            .unwrap_or_default()
    }

    #[test]
    fn handlers_ignore_missing_targets() {
        let mut doc = Document::new(Element::new("body"));
        let before = doc.clone();
        let status: StatusSnapshot = [("今日盈亏", json!(1.0))].into_iter().collect();
        update_status_display(&mut doc, &status);
        update_assets_display(&mut doc, &status);
        update_logs_display(&mut doc, &[LogEntry::new("t", "m")]);
        append_log_entry(&mut doc, &LogEntry::new("t", "m"), true);
        update_trades_display(&mut doc, &[trade("1", json!(1))]);
        append_trade_record(&mut doc, &trade("1", json!(1)), true);
        update_elephants_display(&mut doc, &ElephantSnapshot(json!({"a": 1})));
        assert_eq!(doc, before);
    }

    #[test]
    fn status_pnl_values_are_formatted_and_classed() {
        let mut doc = dashboard();
        let snapshot: StatusSnapshot = [
            ("今日盈亏", json!(-12.5)),
            ("总盈亏", json!(0)),
            ("运行状态", json!("运行中")),
            ("交易股票数量", json!(12)),
            ("未知字段", json!("ignored")),
        ]
        .into_iter()
        .collect();
        update_status_display(&mut doc, &snapshot);

        let today = doc.get_element_by_id("status-今日盈亏").unwrap();
        assert_eq!(today.text(), "-12.50");
        assert_eq!(today.class(), CLASS_NEGATIVE);
        let total = doc.get_element_by_id("status-总盈亏").unwrap();
        assert_eq!(total.text(), "0.00");
        assert_eq!(total.class(), CLASS_NON_NEGATIVE);
        assert_eq!(doc.get_element_by_id("status-运行状态").unwrap().text(), "运行中");
        assert_eq!(doc.get_element_by_id("status-交易股票数量").unwrap().text(), "12");
        assert!(!doc.contains("status-未知字段"));
    }

    #[test]
    fn unparsable_pnl_renders_nan() {
        let mut doc = dashboard();
        let snapshot: StatusSnapshot = [("今日盈亏", json!("n/a"))].into_iter().collect();
        update_status_display(&mut doc, &snapshot);
        let element = doc.get_element_by_id("status-今日盈亏").unwrap();
        assert_eq!(element.text(), "NaN");
        assert_eq!(element.class(), CLASS_NEGATIVE);
    }

    #[test]
    fn appending_a_log_entry_creates_one_child() {
        let mut doc = logs_page();
        append_log_entry(&mut doc, &LogEntry::new("10:00:00", "x"), true);
        let container = doc.get_element_by_id("logsContainer").unwrap();
        assert_eq!(container.children().len(), 1);
        let text = container.children()[0].text_content();
        assert!(text.contains("10:00:00"));
        assert!(text.contains('x'));
        assert_eq!(container.scroll_top(), 1);
    }

    #[test]
    fn log_replace_clears_previous_entries() {
        let mut doc = logs_page();
        append_log_entry(&mut doc, &LogEntry::new("old", "old"), false);
        update_logs_display(
            &mut doc,
            &[LogEntry::new("1", "a"), LogEntry::new("2", "b")],
        );
        let container = doc.get_element_by_id("logsContainer").unwrap();
        let texts: Vec<String> = container
            .children()
            .iter()
            .map(Element::text_content)
            .collect();
        assert_eq!(texts, vec!["1 a".to_string(), "2 b".to_string()]);
    }

    #[test]
    fn logs_do_not_scroll_when_auto_scroll_is_off() {
        let mut doc = logs_page();
        doc.get_element_by_id_mut("autoScroll")
            .unwrap()
            .set_checked(false);
        update_logs_display(&mut doc, &[LogEntry::new("1", "a")]);
        append_log_entry(&mut doc, &LogEntry::new("2", "b"), true);
        assert_eq!(doc.get_element_by_id("logsContainer").unwrap().scroll_top(), 0);
    }

    #[test]
    fn trade_replace_preserves_input_order() {
        let mut doc = dashboard();
        append_trade_record(&mut doc, &trade("stale", json!(0)), true);
        update_trades_display(
            &mut doc,
            &[trade("A", json!(1)), trade("B", json!(-2)), trade("C", json!("3"))],
        );
        assert_eq!(row_symbols(&doc), vec!["A", "B", "C"]);
    }

    #[test]
    fn single_trades_prepend_unless_told_to_append() {
        let mut doc = dashboard();
        append_trade_record(&mut doc, &trade("first", json!(1)), true);
        append_trade_record(&mut doc, &trade("second", json!(1)), true);
        append_trade_record(&mut doc, &trade("last", json!(1)), false);
        assert_eq!(row_symbols(&doc), vec!["second", "first", "last"]);
    }

    #[test]
    fn trade_profit_cell_is_classed() {
        let mut doc = dashboard();
        append_trade_record(&mut doc, &trade("A", json!("-0.456")), true);
        let tbody = doc
            .get_element_by_id("tradesTable")
            .and_then(|table| table.find_by_tag("tbody"))
            .unwrap();
        let cells = tbody.children()[0].children();
        assert_eq!(cells.len(), 7);
        assert_eq!(cells[4].text(), "10.5");
        assert_eq!(cells[6].text(), "-0.46");
        assert_eq!(cells[6].class(), CLASS_NEGATIVE);
    }

    #[test]
    fn assets_card_uses_its_own_prefix() {
        let mut doc = build_document(&Page::Stats, &PageLayout::default());
        let snapshot: AssetSnapshot = [("可用资金", json!(10000.0)), ("今日盈亏", json!(5))]
            .into_iter()
            .collect();
        update_assets_display(&mut doc, &snapshot);
        assert_eq!(doc.get_element_by_id("asset-可用资金").unwrap().text(), "10000");
        assert_eq!(doc.get_element_by_id("asset-今日盈亏").unwrap().text(), "5.00");
        assert_eq!(doc.get_element_by_id("status-今日盈亏").unwrap().text(), "");
    }

    #[test]
    fn float_prefix_parsing() {
        assert_eq!(parse_float(&json!("12.5abc")), 12.5);
        assert_eq!(parse_float(&json!("  -3")), -3.0);
        assert_eq!(parse_float(&json!(".5")), 0.5);
        assert_eq!(parse_float(&json!("1e3x")), 1000.0);
        assert_eq!(parse_float(&json!("-Infinity")), f64::NEG_INFINITY);
        assert!(parse_float(&json!("abc")).is_nan());
        assert!(parse_float(&json!(".")).is_nan());
        assert!(parse_float(&Value::Null).is_nan());
        assert_eq!(format_pnl(-0.0), "0.00");
        assert_eq!(format_pnl(-0.001), "-0.00");
        assert_eq!(format_pnl(0.125), "0.13");
        assert_eq!(format_pnl(-12.125), "-12.13");
        assert_eq!(format_pnl(0.375), "0.38");
        assert_eq!(format_pnl(2.625), "2.63");
        assert_eq!(format_pnl(1.005), "1.00");
        assert_eq!(format_pnl(f64::INFINITY), "Infinity");
    }
}
