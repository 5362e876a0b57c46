pub mod config;
pub mod logging;
pub mod progress;
pub mod questions;
pub mod service;
pub mod storage;
pub mod sync;

pub use config::Config;
pub use service::{Identity, ProgressService, SessionError, SessionPlan, SessionSettings};
