pub mod clients;

mod app;
pub mod commands;
pub mod config;
pub mod error;
pub mod logging;
pub mod server;

// Re-export App and Config from modules
pub use app::App;
pub use app::DEFAULT_PUSH_TIMEOUT;
pub use app::PR_BASE_BRANCH;
pub use config::Config;
