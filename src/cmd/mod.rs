//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module          | Commands handled                                   |
//! |-----------------|----------------------------------------------------|
//! | `project`       | `Init`                                             |
//! | `story`         | `Story`                                            |
//! | `build`         | `Build`                                            |
//! | `history`       | `History`                                          |
//! | `tags`          | `Tags`                                             |
//! | `config`        | `Config`                                           |

pub mod build;
pub mod config;
pub mod history;
pub mod project;
pub mod story;
pub mod tags;

pub use build::{cmd_build, cmd_plan};
pub use config::cmd_config;
pub use history::cmd_history;
pub use project::cmd_init;
pub use story::cmd_story;
pub use tags::cmd_tags;
