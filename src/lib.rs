//! Virtine cleaning offload.
//!
//! - [`ring`]: the fixed-capacity queue behind the Ready and Complete queues.
//! - [`coproc`]: the coprocessor model: register map, register bridge, and cleaning worker.
//! - [`host`]: the host side: multiplexer, notification listener, and device attach/detach.

pub use virtine_coproc as coproc;
pub use virtine_host as host;
pub use virtine_ring as ring;
