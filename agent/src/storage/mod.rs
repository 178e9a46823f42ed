//! Persistent state: request queue, processed ledger, response log, settings

pub mod layout;
pub mod ledger;
pub mod queue;
pub mod responses;
pub mod settings;
