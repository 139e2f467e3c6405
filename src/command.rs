use crate::control::ControlOutcome;
use crate::event::ServerEvent;
use crate::polling::FeedPayload;

/// Messages carried on the broadcast bus between the feeds and the terminal.
#[derive(Debug, Clone)]
pub enum Command {
    Push(ServerEvent),
    Feed(FeedPayload),
    FeedFailed { feed: String, error: String },
    Control(ControlOutcome),
    Error(String),
    Exit,
}
