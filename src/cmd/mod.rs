//! CLI command implementations.
//!
//! | Module    | Commands handled        |
//! |-----------|-------------------------|
//! | `consume` | `Consume`               |
//! | `publish` | `Publish`               |
//! | `items`   | `Items`, `InitDb`       |
//! | `analyze` | `Analyze`               |
//! | `config`  | `Config`                |

pub mod analyze;
pub mod config;
pub mod consume;
pub mod items;
pub mod publish;

pub use analyze::cmd_analyze;
pub use config::cmd_config;
pub use consume::cmd_consume;
pub use items::{cmd_init_db, cmd_items};
pub use publish::cmd_publish;
