//! Background Tasks Module
//!
//! - Cache sweep: drops expired responses at a fixed interval

mod cleanup;

pub use cleanup::spawn_cleanup_task;
