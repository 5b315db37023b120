//! The scheme → descriptor map (C3).
//!
//! Built once, explicitly, via [`build_registry`], rather than populated by
//! process-wide `init()`-style self-registration. The resulting [`Registry`]
//! is an owned value threaded through the loop driver, not a `static`.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::address::Address;
use crate::descriptor::{self, Descriptor};
use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::transports;

/// Scheme → descriptor map. Read-only after [`build_registry`] returns.
pub struct Registry {
    descriptors: BTreeMap<&'static str, Arc<Descriptor>>,
}

impl Registry {
    fn empty() -> Self {
        Registry {
            descriptors: BTreeMap::new(),
        }
    }

    /// Register `descriptor` under its scheme. Panics if that scheme is
    /// already registered - a fatal programmer error (misregistration), not
    /// a runtime condition.
    pub fn add(&mut self, descriptor: Descriptor) {
        let scheme = descriptor.scheme;
        if self.descriptors.contains_key(scheme) {
            panic!("duplicate endpoint registration for scheme {scheme:?}");
        }
        self.descriptors.insert(scheme, Arc::new(descriptor));
    }

    /// Look up the descriptor for `scheme`.
    pub fn get(&self, scheme: &str) -> Result<Arc<Descriptor>> {
        self.descriptors
            .get(scheme)
            .cloned()
            .ok_or_else(|| Error::NotSupported(scheme.to_string()))
    }

    /// Registered scheme tokens, sorted ascending.
    pub fn keys(&self) -> Vec<&'static str> {
        self.descriptors.keys().copied().collect()
    }

    /// All registered descriptors, in scheme-sorted order.
    pub fn values(&self) -> Vec<Arc<Descriptor>> {
        self.descriptors.values().cloned().collect()
    }

    /// Parse `raw` as an [`Address`], look up its scheme, and bind a new
    /// endpoint instance to it.
    pub fn find_and_bind(&self, raw: &str) -> Result<Endpoint> {
        let address = Address::parse(raw)?;
        let desc = self.get(address.scheme())?;
        Ok(descriptor::bind(desc, address))
    }
}

/// Calls each transport module's `register` function, in a fixed order, and
/// returns the populated [`Registry`]. This is the *only* place plugin
/// registration order is decided - adding a transport means adding one line
/// here, not an `init()` side effect the linker has to discover.
pub fn build_registry() -> Registry {
    let mut registry = Registry::empty();
    transports::stdio::register(&mut registry);
    transports::exec::register(&mut registry);
    transports::tcp::register(&mut registry);
    transports::tls::register(&mut registry);
    transports::quic::register(&mut registry);
    transports::ws::register(&mut registry);
    transports::wt::register(&mut registry);
    transports::unix::register(&mut registry);
    transports::tun::register(&mut registry);
    registry
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn unknown_scheme_is_not_supported() {
        let registry = build_registry();
        let err = registry.get("florp").unwrap_err();
        assert!(matches!(err, Error::NotSupported(s) if s == "florp"));
    }

    #[test]
    fn keys_are_sorted_and_nonempty() {
        let registry = build_registry();
        let keys = registry.keys();
        assert!(!keys.is_empty());
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }

    #[test]
    #[should_panic(expected = "duplicate endpoint registration")]
    fn duplicate_add_panics() {
        let mut registry = Registry::empty();
        registry.add(Descriptor {
            scheme: "dup",
            description: "",
            examples: &[],
            string_options: &[],
            bool_options: &[],
            int_options: &[],
            supports_multiple: false,
            supports_streams: false,
            capability: descriptor::Capability::Stream(Arc::new(NoopStream)),
        });
        registry.add(Descriptor {
            scheme: "dup",
            description: "",
            examples: &[],
            string_options: &[],
            bool_options: &[],
            int_options: &[],
            supports_multiple: false,
            supports_streams: false,
            capability: descriptor::Capability::Stream(Arc::new(NoopStream)),
        });
    }

    #[test]
    fn find_and_bind_round_trips_scheme() {
        let registry = build_registry();
        let endpoint = registry.find_and_bind("tcp://127.0.0.1:9").unwrap();
        assert_eq!(endpoint.scheme(), "tcp");
    }

    struct NoopStream;
    #[async_trait::async_trait]
    impl descriptor::PreOpened for NoopStream {
        async fn open(&self) -> Result<crate::stream::BoxStream> {
            unimplemented!()
        }
    }

    #[test]
    fn is_listener_scheme_uses_suffix_convention() {
        assert!(Descriptor::is_listener_scheme("tcp-listen"));
        assert!(Descriptor::is_listener_scheme("unixpacket-listen"));
        assert!(!Descriptor::is_listener_scheme("tcp"));
        assert!(!Descriptor::is_listener_scheme("listen-but-not-suffix"));
    }
}
