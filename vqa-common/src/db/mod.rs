//! Database models, bootstrap and shared queries

pub mod init;
pub mod models;
pub mod retry;
pub mod settings;

pub use init::*;
pub use models::*;
pub use retry::retry_on_lock;
pub use settings::{get_setting, set_setting};
