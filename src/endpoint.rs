//! Endpoint instances (C4): a descriptor bound to a concrete address, with
//! the single polymorphic `connect` operation.

use std::sync::Arc;

use crate::address::Address;
use crate::descriptor::{Capability, Descriptor};
use crate::error::Result;
use crate::stream::BoxStream;

/// A descriptor bound to a concrete [`Address`]. This is the runtime handle
/// the loop driver calls [`Endpoint::connect`] on.
pub struct Endpoint {
    descriptor: Arc<Descriptor>,
    address: Address,
}

impl Endpoint {
    pub(crate) fn new(descriptor: Arc<Descriptor>, address: Address) -> Self {
        Endpoint { descriptor, address }
    }

    pub fn scheme(&self) -> &str {
        self.address.scheme()
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    /// True if this endpoint can produce more than one [`BoxStream`] over its
    /// lifetime (a listener re-accepting, or a reopenable stream like stdio).
    pub fn supports_multiple(&self) -> bool {
        self.descriptor.supports_multiple
    }

    /// The single polymorphic operation: dial, accept-on-listen, or return
    /// the pre-opened stream, depending on which capability the bound
    /// descriptor carries.
    pub async fn connect(&self) -> Result<BoxStream> {
        match &self.descriptor.capability {
            Capability::Dial(dialer) => dialer.dial(self).await,
            Capability::Listen(listener) => {
                if !listener.is_listening() {
                    listener.listen(self).await?;
                }
                listener.accept().await
            }
            Capability::Stream(pre_opened) => pre_opened.open().await,
        }
    }

    /// Close the underlying listener, if this endpoint is a listener. Used
    /// by the loop driver's Ctrl-C path to unblock a pending `accept`.
    pub async fn close_listener(&self) -> Result<()> {
        if let Capability::Listen(listener) = &self.descriptor.capability {
            listener.close().await?;
        }
        Ok(())
    }

    fn lookup_string_default(&self, key: &str) -> &'static str {
        self.descriptor
            .descriptor_string_option(key)
            .unwrap_or_else(|| panic!("unknown string option {key:?} on scheme {:?}", self.scheme()))
    }

    /// `key`'s value: declared default from the descriptor's schema,
    /// overridden by the bound address. Panics if `key` isn't declared -
    /// that's a misregistration, not a runtime condition.
    pub fn get_string_option(&self, key: &str) -> String {
        let default = self.lookup_string_default(key);
        self.address.get_string(key, default)
    }

    pub fn get_bool_option(&self, key: &str) -> Result<bool> {
        let default = self
            .descriptor
            .bool_option(key)
            .unwrap_or_else(|| panic!("unknown bool option {key:?} on scheme {:?}", self.scheme()))
            .default;
        self.address.get_bool(key, default)
    }

    pub fn get_int_option(&self, key: &str, radix: u32) -> Result<i64> {
        let default = self
            .descriptor
            .int_option(key)
            .unwrap_or_else(|| panic!("unknown int option {key:?} on scheme {:?}", self.scheme()))
            .default;
        self.address.get_int(key, radix, default)
    }

    /// `join(Hostname, Port)` - the common "host:port" composition every
    /// TCP-shaped transport needs.
    pub fn target_host(&self) -> String {
        format!(
            "{}:{}",
            self.get_string_option("Hostname"),
            self.get_string_option("Port")
        )
    }
}

impl Descriptor {
    fn descriptor_string_option(&self, key: &str) -> Option<&'static str> {
        self.string_option(key).map(|o| o.default)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::registry::build_registry;

    #[test]
    fn target_host_joins_hostname_and_port() {
        let registry = build_registry();
        let endpoint = registry.find_and_bind("tcp://example.com:4444").unwrap();
        assert_eq!(endpoint.target_host(), "example.com:4444");
    }

    #[test]
    fn option_default_used_when_unset() {
        let registry = build_registry();
        let endpoint = registry.find_and_bind("tcp://example.com").unwrap();
        // Port has a declared default of "0" in the tcp descriptor when unset.
        assert_eq!(endpoint.get_string_option("Port"), "0");
    }

    #[test]
    #[should_panic(expected = "unknown string option")]
    fn unknown_option_key_panics() {
        let registry = build_registry();
        let endpoint = registry.find_and_bind("tcp://example.com:1").unwrap();
        endpoint.get_string_option("not_a_real_option");
    }
}
