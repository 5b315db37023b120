//! Transport plugins (C5): one module per scheme family.
//!
//! Each module exposes a `register(&mut Registry)` function that appends its
//! descriptor(s); `crate::registry::build_registry` calls them all in a
//! fixed order.

pub mod exec;
pub mod quic;
pub mod stdio;
pub mod tcp;
pub mod tls;
pub mod tun;
pub mod unix;
pub mod ws;
pub mod wt;
