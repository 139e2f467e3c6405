mod command;
mod config;
mod control;
mod display;
mod dom;
mod error_log;
mod event;
mod logging;
mod model;
mod page;
mod polling;
mod push;
mod session;
mod socketio;
mod toast;
mod tui;

use anyhow::anyhow;
use clap::Parser;
use tokio::sync::broadcast;
use tokio::task;
use tracing::info;

use crate::command::Command;
use crate::control::ControlClient;
use crate::error_log::ErrorLogStore;
use crate::polling::{HttpFeedSource, PollingClient, build_http_client};
use crate::push::PushChannelClient;
use crate::session::{Mode, Session};
use crate::tui::TuiApp;

/// Room for a full log batch plus feed bursts while the terminal is drawing.
const COMMAND_BUS_CAPACITY: usize = 1024;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let param = config::CliParams::parse();
    logging::init_logging(&param.log_file)?;
    info!(server = %param.server_url(), mode = ?param.mode, page = %param.page, "starting monitor");

    let (tx, mut rx) = broadcast::channel::<Command>(COMMAND_BUS_CAPACITY);
    let http = build_http_client()?;
    let page = param.start_page();
    let session = Session::new(
        param.mode,
        page.clone(),
        param.page_layout(),
        param.toast_ttl.as_duration(),
    );

    let mut push_task = None;
    let mut polling = None;
    match param.mode {
        Mode::Push => {
            let config = param.push_config();
            let ptx = tx.clone();
            push_task = Some(task::spawn(async move {
                let result = async {
                    let client = PushChannelClient::new(config, ptx.clone())?;
                    client.run().await
                }
                .await;
                if let Err(err) = result {
                    let _ = ptx.send(Command::Error(format!("push channel error: {err}")));
                }
            }));
        }
        Mode::Poll => {
            let source = HttpFeedSource::new(http.clone(), param.server_url());
            let mut client = PollingClient::new(source, tx.clone(), page);
            client.init();
            polling = Some(client);
        }
    }

    let control = ControlClient::new(http.clone(), &param.server_url());
    let error_log = ErrorLogStore::new(param.error_log.clone());
    let feeds = HttpFeedSource::new(http.clone(), param.server_url());
    let mut app = TuiApp::new(session, polling, feeds, control, tx.clone(), error_log);
    let app_result = tokio::select! {
        result = app.run(&mut rx) => result,
        _ = tokio::signal::ctrl_c() => Ok(()),
    };
    let _ = tx.send(Command::Exit);
    app.dispose();
    if let Some(handle) = push_task {
        handle.abort();
    }
    info!("monitor stopped");
    app_result.map_err(|err| anyhow!(err.to_string()))?;
    Ok(())
}
