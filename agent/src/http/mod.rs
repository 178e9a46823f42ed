//! HTTP clients for the DNS provider and the control plane

pub mod client;
pub mod dns;
pub mod status;
