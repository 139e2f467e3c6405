use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field-name keyed snapshot as served by `/api/status` and `/api/assets`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldSnapshot(pub Map<String, Value>);

pub type StatusSnapshot = FieldSnapshot;
pub type AssetSnapshot = FieldSnapshot;

impl FieldSnapshot {
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for FieldSnapshot {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        FieldSnapshot(
            iter.into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }
}

/// Substring that marks a profit/loss field.
pub const PNL_MARKER: &str = "盈亏";

pub fn is_pnl_field(key: &str) -> bool {
    key.contains(PNL_MARKER)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    #[serde(rename = "时间", default)]
    pub time: Value,
    #[serde(rename = "消息", default)]
    pub message: Value,
}

impl LogEntry {
    pub fn new(time: impl Into<String>, message: impl Into<String>) -> Self {
        LogEntry {
            time: Value::String(time.into()),
            message: Value::String(message.into()),
        }
    }
}

pub type LogBatch = Vec<LogEntry>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    #[serde(rename = "交易时间", default)]
    pub time: Value,
    #[serde(rename = "股票代码", default)]
    pub symbol: Value,
    #[serde(rename = "股票名称", default)]
    pub name: Value,
    #[serde(rename = "交易类型", default)]
    pub action: Value,
    #[serde(rename = "成交价格", default)]
    pub price: Value,
    #[serde(rename = "成交数量", default)]
    pub quantity: Value,
    #[serde(rename = "盈亏", default)]
    pub profit: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElephantSnapshot(pub Value);

/// `log_update` envelope: a full batch or a single new entry.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct LogUpdate {
    #[serde(rename = "日志", default)]
    pub logs: Option<LogBatch>,
    #[serde(rename = "新日志", default)]
    pub entry: Option<LogEntry>,
}

/// `trade_update` envelope carrying one new trade.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TradeUpdate {
    #[serde(rename = "新交易", default)]
    pub trade: Option<TradeRecord>,
}

/// `trades_update` envelope carrying the whole trade list.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TradesUpdate {
    #[serde(rename = "交易记录", default)]
    pub trades: Option<Vec<TradeRecord>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlResponse {
    pub success: bool,
    #[serde(default)]
    pub message: String,
}
