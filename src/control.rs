use anyhow::Context;
use reqwest::Client;
use tokio::sync::broadcast;
use tracing::{error, info};

use crate::command::Command;
use crate::model::ControlResponse;
use crate::toast::{Severity, Toast};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    Start,
    Stop,
    UpdateSettings,
}

impl ControlAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlAction::Start => "start",
            ControlAction::Stop => "stop",
            ControlAction::UpdateSettings => "update_settings",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ControlOutcome {
    Answered {
        action: ControlAction,
        response: ControlResponse,
    },
    Failed {
        action: ControlAction,
        error: String,
    },
}

impl ControlOutcome {
    pub fn toast(&self) -> Toast {
        match self {
            ControlOutcome::Answered { response, .. } if response.success => {
                Toast::success("操作成功", response.message.clone())
            }
            // a refusal from the server still uses the default style
            ControlOutcome::Answered { response, .. } => {
                Toast::success("操作失败", response.message.clone())
            }
            ControlOutcome::Failed { .. } => {
                Toast::new("操作失败", "无法发送控制命令", Severity::Danger)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ControlClient {
    client: Client,
    endpoint: String,
}

impl ControlClient {
    pub fn new(client: Client, base_url: &str) -> Self {
        ControlClient {
            client,
            endpoint: format!("{}/api/control", base_url.trim_end_matches('/')),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub async fn send(&self, action: ControlAction) -> anyhow::Result<ControlResponse> {
        let form = [("action", action.as_str())];
        self.client
            .post(&self.endpoint)
            .body(serde_urlencoded::to_string(form)?)
            .header(
                reqwest::header::CONTENT_TYPE,
                "application/x-www-form-urlencoded",
            )
            .send()
            .await
            .with_context(|| format!("sending control command `{}`", action.as_str()))?
            .json::<ControlResponse>()
            .await
            .context("decoding control response")
    }

    /// Sends `action` in the background; the outcome comes back on the bus.
    pub fn dispatch(&self, action: ControlAction, tx: broadcast::Sender<Command>) {
        let control = self.clone();
        tokio::spawn(async move {
            let outcome = match control.send(action).await {
                Ok(response) => {
                    info!(action = action.as_str(), success = response.success, "control command answered");
                    ControlOutcome::Answered { action, response }
                }
                Err(err) => {
                    error!(action = action.as_str(), error = %err, "control command failed");
                    ControlOutcome::Failed {
                        action,
                        error: format!("{err:#}"),
                    }
                }
            };
            let _ = tx.send(Command::Control(outcome));
        });
    }
}
