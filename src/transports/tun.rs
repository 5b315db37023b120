//! `tun`: allocate a TUN device and exchange raw IP packets through it as a
//! [`crate::stream::Stream`].
//!
//! `Hostname` is the device's IP, `Path` (sans leading `/`) is the netmask
//! prefix length, `dev` may contain `%d` for kernel-assigned numbering, `mtu`
//! defaults to 1500. Using `Hostname`/`Path` as the option names (rather than
//! a bespoke field) lets the device address and mask reuse the same
//! URL-structural lookup every other transport gets for free. Device
//! creation itself is delegated to the `tun` crate (`features = ["async"]`)
//! rather than hand-rolled netlink/ioctl calls - the core only needs the
//! device's `Stream` contract, not its OS-level plumbing.

use std::net::Ipv4Addr;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::descriptor::{Capability, Descriptor, Dialer, IntOption, StringOption};
use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::registry::Registry;
use crate::stream::BoxStream;

const HOSTNAME_OPTION: StringOption = StringOption {
    name: "Hostname",
    description: "IP address to assign to the device",
    default: "",
};
const PATH_OPTION: StringOption = StringOption {
    name: "Path",
    description: "netmask prefix length (e.g. 24)",
    default: "24",
};
const DEV_OPTION: StringOption = StringOption {
    name: "dev",
    description: "device name; may contain %d for the kernel to pick an index",
    default: "relay-tun%d",
};
const MTU_OPTION: IntOption = IntOption {
    name: "mtu",
    description: "MTU of the allocated device",
    default: 1500,
};

/// `255.255.255.0`-style dotted netmask from a CIDR prefix length.
fn prefix_to_netmask(prefix: u8) -> Result<Ipv4Addr> {
    if prefix > 32 {
        return Err(Error::InvalidOption(format!(
            "tun: netmask prefix {prefix} out of range (0-32)"
        )));
    }
    let bits = if prefix == 0 { 0 } else { u32::MAX << (32 - prefix) };
    Ok(Ipv4Addr::from(bits))
}

struct TunDialer;

#[async_trait]
impl Dialer for TunDialer {
    async fn dial(&self, endpoint: &Endpoint) -> Result<BoxStream> {
        let ip = endpoint.get_string_option("Hostname");
        // `Address::get_string` hands back the raw URL path (leading slash
        // included, e.g. `/24`); this transport is the one place that wants
        // it stripped, so it strips it locally rather than mangling the
        // shared lookup for every other scheme's `Path` option.
        let raw_mask = endpoint.get_string_option("Path");
        let mask = raw_mask.strip_prefix('/').unwrap_or(&raw_mask).to_string();
        let dev = endpoint.get_string_option("dev");
        let mtu = endpoint.get_int_option("mtu", 10)?;

        if ip.is_empty() {
            return Err(Error::InvalidOption("tun: Hostname (IP) must not be empty".into()));
        }
        if mask.is_empty() || mask.contains('/') {
            return Err(Error::InvalidOption(format!("tun: invalid subnet mask {mask:?}")));
        }

        let address = Ipv4Addr::from_str(&ip)
            .map_err(|e| Error::InvalidOption(format!("tun: invalid Hostname {ip:?}: {e}")))?;
        let prefix: u8 = mask
            .parse()
            .map_err(|e| Error::InvalidOption(format!("tun: invalid mask {mask:?}: {e}")))?;
        let netmask = prefix_to_netmask(prefix)?;

        let mut config = tun::Configuration::default();
        config
            .address(address)
            .netmask(netmask)
            .mtu(mtu as i32)
            .up();
        if !dev.is_empty() {
            config.name(&dev);
        }

        let device = tun::create_as_async(&config)
            .map_err(|e| Error::Other(format!("tun: device creation failed: {e}")))?;
        info!(address = %address, netmask = %netmask, mtu, "tun: device created");
        Ok(Box::new(device))
    }
}

pub fn register(registry: &mut Registry) {
    registry.add(Descriptor {
        scheme: "tun",
        description: "allocate a TUN device and send/receive raw IP packets",
        examples: &["tun://10.0.0.1/24?dev=tun%25d"],
        string_options: &[HOSTNAME_OPTION, PATH_OPTION, DEV_OPTION],
        bool_options: &[],
        int_options: &[MTU_OPTION],
        supports_multiple: false,
        supports_streams: false,
        capability: Capability::Dial(Arc::new(TunDialer)),
    });
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn prefix_24_is_standard_class_c_mask() {
        assert_eq!(prefix_to_netmask(24).unwrap(), Ipv4Addr::new(255, 255, 255, 0));
    }

    #[test]
    fn prefix_0_is_all_zero() {
        assert_eq!(prefix_to_netmask(0).unwrap(), Ipv4Addr::new(0, 0, 0, 0));
    }

    #[test]
    fn prefix_32_is_all_ones() {
        assert_eq!(
            prefix_to_netmask(32).unwrap(),
            Ipv4Addr::new(255, 255, 255, 255)
        );
    }

    #[test]
    fn prefix_out_of_range_is_rejected() {
        assert!(prefix_to_netmask(33).is_err());
    }

    #[test]
    fn explicit_hostname_and_mask_round_trip() {
        let registry = crate::registry::build_registry();
        let endpoint = registry.find_and_bind("tun://10.0.0.1/24").unwrap();
        assert_eq!(endpoint.get_string_option("Hostname"), "10.0.0.1");
        // the raw option still carries its leading slash; `TunDialer::dial`
        // is what strips it before parsing the mask.
        assert_eq!(endpoint.get_string_option("Path"), "/24");
    }

    #[tokio::test]
    async fn empty_hostname_is_rejected_before_device_creation() {
        // `Hostname` now defaults to empty, so an address that never sets it
        // hits the `ip.is_empty()` check in `TunDialer::dial` and never
        // reaches actual device creation, which the test harness has no
        // permission for.
        let registry = crate::registry::build_registry();
        let endpoint = registry.find_and_bind("tun:///24").unwrap();
        assert_eq!(endpoint.get_string_option("Hostname"), "");
        let err = endpoint.connect().await.unwrap_err();
        assert!(matches!(err, Error::InvalidOption(msg) if msg.contains("Hostname")));
    }

    #[test]
    fn mask_with_slash_is_rejected_by_validation() {
        let mask = "24/8";
        assert!(mask.contains('/'));
    }
}
