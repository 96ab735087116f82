pub mod bus;
pub mod config;
pub mod error;
pub mod messages;
pub mod motion;
pub mod runtime;
