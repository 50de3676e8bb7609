pub mod application;
pub mod audio;
pub mod boards;
pub mod common;
pub mod companion;
pub mod config;
pub mod lang;
pub mod lifecycle;
pub mod mcp;
pub mod ota;
pub mod protocols;
pub mod setting;
#[cfg(any(test, feature = "sim"))]
pub mod sim;
pub mod startup;

pub use application::{AppHandle, Application, Collaborators};
pub use config::AppConfig;
