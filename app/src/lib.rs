pub mod commands;
pub mod error;
pub mod forwarder;
pub mod settings;
pub mod state;

pub use error::{AppError, Result};
pub use forwarder::{
    run_forwarder, ChannelSink, EventSink, ForwardStats, JsonLinesSink, SERVER_EVENT,
    STREAM_STATE_EVENT,
};
pub use settings::{AppSettings, SettingsStore};
pub use state::AppState;
