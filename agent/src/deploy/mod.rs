//! Deployment module

pub mod certbot;
pub mod command;
pub mod executor;
pub mod fsm;
pub mod nginx;
pub mod propagation;
pub mod retry;
pub mod validator;
