pub mod branch;
pub mod config;
pub mod errors;
pub mod history;
pub mod init;
pub mod queue;
pub mod snapshot;
pub mod story;
pub mod tag;
pub mod ui;
