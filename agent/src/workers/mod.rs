//! Background workers

pub mod dispatcher;
pub mod watcher;
