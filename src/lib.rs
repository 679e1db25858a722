pub mod app;
pub mod cli;
pub mod config;
pub mod lint;

pub use app::GrapefruitCrawler;
pub use cli::{Cli, Commands};
pub use config::load_config;
