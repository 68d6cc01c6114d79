pub mod app;
pub mod args;
pub mod watch;

pub use app::Cli;
