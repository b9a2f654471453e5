//! Queue Module
//!
//! Priority scheduling with a concurrency bound, per-operation deadlines and
//! cancellation.

mod priority;
mod request_queue;
mod signal;


pub use priority::Priority;
pub use request_queue::{
    CancelHandle, QueueTicket, RequestQueue, DEFAULT_MAX_CONCURRENT, DEFAULT_TIMEOUT,
};
pub use signal::{abort_pair, AbortController, AbortSignal};
