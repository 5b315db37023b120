#![doc = include_str!("../README.md")]

mod address;
mod descriptor;
mod endpoint;
mod error;
mod listen_gate;
mod loopdriver;
pub mod registry;
mod splice;
pub mod stream;
pub mod transports;

pub use address::Address;
pub use descriptor::{Capability, Descriptor, Dialer, Listener, PreOpened};
pub use endpoint::Endpoint;
pub use error::{Error, Result};
pub use loopdriver::{run as run_loop, Mode, SIGINT_EXIT_CODE};
pub use registry::{build_registry, Registry};
pub use splice::{splice, ByteCounts, SpliceError};
pub use stream::{combine, BoxStream, Stream};
