mod settings;

pub use settings::{RealtimeConfig, ServerConfig, Settings, TokenConfig};
