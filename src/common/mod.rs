pub mod content_filter;
pub mod enums;
pub mod event;
pub mod scheduler;
pub mod state_watch;
