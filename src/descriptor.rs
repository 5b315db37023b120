//! Endpoint descriptors (C2): the declarative, immutable record a transport
//! plugin registers under its scheme.

use std::sync::Arc;

use async_trait::async_trait;

use crate::address::Address;
use crate::error::Result;
use crate::stream::BoxStream;

/// One declared option: its name, a human description, and a typed default.
#[derive(Debug, Clone, Copy)]
pub struct StringOption {
    pub name: &'static str,
    pub description: &'static str,
    pub default: &'static str,
}

#[derive(Debug, Clone, Copy)]
pub struct BoolOption {
    pub name: &'static str,
    pub description: &'static str,
    pub default: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct IntOption {
    pub name: &'static str,
    pub description: &'static str,
    pub default: i64,
}

/// Dials a fresh [`BoxStream`] each call. Stateless: a dialer instance does
/// not retain any per-call state between invocations.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, endpoint: &crate::endpoint::Endpoint) -> Result<BoxStream>;
}

/// A stateful acceptor with an `{Idle, Listening, Closed}` lifecycle.
/// Implementations are shared (`Arc`) across repeated `connect` calls on the
/// same endpoint instance, so interior mutability (a `Mutex`/`OnceCell`) is
/// expected.
#[async_trait]
pub trait Listener: Send + Sync {
    fn is_listening(&self) -> bool;
    async fn listen(&self, endpoint: &crate::endpoint::Endpoint) -> Result<()>;
    async fn accept(&self) -> Result<BoxStream>;
    async fn close(&self) -> Result<()>;
}

/// The one of three capabilities a descriptor carries. Modeled as a tagged
/// enum rather than a type switch on an open interface, so the three-way
/// dispatch in [`crate::endpoint::Endpoint::connect`] is exhaustive at
/// compile time.
pub enum Capability {
    Dial(Arc<dyn Dialer>),
    Listen(Arc<dyn Listener>),
    Stream(Arc<dyn PreOpened>),
}

/// A pre-opened, potentially-reopenable stream source (stdio's role).
#[async_trait]
pub trait PreOpened: Send + Sync {
    async fn open(&self) -> Result<BoxStream>;
}

/// Immutable record: scheme, description, option schema, capability.
///
/// One descriptor per scheme lives in the [`crate::registry::Registry`],
/// wrapped in `Arc` so endpoint instances can share it without owning it.
pub struct Descriptor {
    pub scheme: &'static str,
    pub description: &'static str,
    pub examples: &'static [&'static str],

    pub string_options: &'static [StringOption],
    pub bool_options: &'static [BoolOption],
    pub int_options: &'static [IntOption],

    pub supports_multiple: bool,
    pub supports_streams: bool,

    pub capability: Capability,
}

impl Descriptor {
    /// True if this scheme's string ends in `-listen`, the convention used
    /// to classify schemes by name alone, without inspecting the capability
    /// itself.
    pub fn is_listener_scheme(scheme: &str) -> bool {
        scheme.ends_with("-listen")
    }

    pub(crate) fn string_option(&self, name: &str) -> Option<&StringOption> {
        self.string_options.iter().find(|o| o.name == name)
    }

    pub(crate) fn bool_option(&self, name: &str) -> Option<&BoolOption> {
        self.bool_options.iter().find(|o| o.name == name)
    }

    pub(crate) fn int_option(&self, name: &str) -> Option<&IntOption> {
        self.int_options.iter().find(|o| o.name == name)
    }
}

/// Binds an [`Address`] to a resolved [`Descriptor`], validating the scheme
/// match. A thin helper used by [`crate::registry::Registry::find_and_bind`];
/// kept here (rather than in `registry.rs`) since it's purely descriptor/
/// address plumbing.
pub(crate) fn bind(descriptor: Arc<Descriptor>, address: Address) -> crate::endpoint::Endpoint {
    assert_eq!(
        descriptor.scheme,
        address.scheme(),
        "endpoint bound to mismatched scheme: descriptor={}, address={}",
        descriptor.scheme,
        address.scheme()
    );
    crate::endpoint::Endpoint::new(descriptor, address)
}
