pub mod config;
pub mod document;
pub mod error;
pub mod event;
pub mod expr;
pub mod flow;
pub mod hooks;
pub mod template;
pub mod traits;
pub mod types;
pub mod work;

pub use config::AppConfig;
pub use error::{ConduitError, Result};
pub use event::EventBus;
pub use expr::Condition;
pub use flow::*;
pub use traits::*;
pub use types::*;
pub use work::*;
