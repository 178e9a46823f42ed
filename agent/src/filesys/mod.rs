//! Filesystem primitives

pub mod file;
pub mod lock;
