//! Gateway configuration (spec §6). Grounded in the teacher's
//! `typed-builder`-based driver options (`driver/driver_options.rs`): a
//! plain struct with documented defaults, built with `TypedBuilder` rather
//! than a bespoke builder or a config-file parser, since every field here
//! is either a fixed default or installer-supplied at provisioning.

use crate::error::{Error, Result};
use std::net::{Ipv6Addr, SocketAddrV6};
use std::time::Duration;
use typed_builder::TypedBuilder;

fn default_pio_prefix() -> Ipv6Addr {
    "fd00:bbbb::".parse().unwrap()
}

fn default_rio_prefix() -> Ipv6Addr {
    "fd00:bbbb:1::".parse().unwrap()
}

fn default_ra_period() -> Duration {
    Duration::from_millis(60_000)
}

fn default_udp_listen_port() -> u16 {
    4123
}

/// Everything an installer provides or the spec pins a default for
/// (spec §6 "Configuration").
#[derive(Debug, Clone, TypedBuilder)]
pub struct GatewayConfig {
    #[builder(default = default_pio_prefix())]
    pub pio_prefix: Ipv6Addr,
    #[builder(default = default_rio_prefix())]
    pub rio_prefix: Ipv6Addr,
    #[builder(default = default_ra_period())]
    pub ra_period: Duration,
    /// The 16-byte S0 network key (installer-supplied, no default).
    pub network_key: [u8; 16],
    /// The Z/IP peer this gateway forwards unsolicited frames to
    /// (installer-supplied, no default).
    pub unsolicited_dest: SocketAddrV6,
    /// The serial device path, or a `tcp://host:port` stand-in for tests
    /// (installer-supplied, no default).
    pub port: String,
    #[builder(default = default_udp_listen_port())]
    pub udp_listen_port: u16,
    /// Whether the module's Z-Wave Long Range PHY should be enabled (spec
    /// §6); defaults off, matching the module's own power-up state.
    #[builder(default = false)]
    pub lr_enabled: bool,
}

fn env_var(key: &'static str) -> Option<String> {
    std::env::var(key).ok()
}

fn parse_env<T: std::str::FromStr>(key: &'static str, value: String) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::ConfigInvalid(format!("{key} is not valid: {value}")))
}

impl GatewayConfig {
    /// Builds a [`GatewayConfig`] from environment variables, the
    /// convenience constructor spec §6 names for the binary entry point.
    /// Required: `ZWIP_PORT`, `ZWIP_NETWORK_KEY` (hex), `ZWIP_UNSOLICITED_DEST`.
    /// Optional, with the same defaults as [`GatewayConfig::builder`]:
    /// `ZWIP_UDP_PORT`, `ZWIP_LR_ENABLED` (`1`/`true`), `ZWIP_PIO_PREFIX`,
    /// `ZWIP_RIO_PREFIX`, `ZWIP_RA_PERIOD_MS`.
    pub fn from_env() -> Result<Self> {
        let port = env_var("ZWIP_PORT").ok_or(Error::ConfigMissing("ZWIP_PORT"))?;

        let network_key_hex = env_var("ZWIP_NETWORK_KEY").ok_or(Error::ConfigMissing("ZWIP_NETWORK_KEY"))?;
        let network_key_bytes = hex::decode(&network_key_hex)
            .map_err(|e| Error::ConfigInvalid(format!("ZWIP_NETWORK_KEY is not valid hex: {e}")))?;
        let network_key: [u8; 16] = network_key_bytes
            .try_into()
            .map_err(|_| Error::ConfigInvalid("ZWIP_NETWORK_KEY must be 16 bytes".into()))?;

        let unsolicited_dest_str =
            env_var("ZWIP_UNSOLICITED_DEST").ok_or(Error::ConfigMissing("ZWIP_UNSOLICITED_DEST"))?;
        let unsolicited_dest: SocketAddrV6 = parse_env("ZWIP_UNSOLICITED_DEST", unsolicited_dest_str)?;

        let udp_listen_port = match env_var("ZWIP_UDP_PORT") {
            Some(v) => parse_env("ZWIP_UDP_PORT", v)?,
            None => default_udp_listen_port(),
        };

        let lr_enabled = matches!(env_var("ZWIP_LR_ENABLED").as_deref(), Some("1") | Some("true"));

        let pio_prefix = match env_var("ZWIP_PIO_PREFIX") {
            Some(v) => parse_env("ZWIP_PIO_PREFIX", v)?,
            None => default_pio_prefix(),
        };

        let rio_prefix = match env_var("ZWIP_RIO_PREFIX") {
            Some(v) => parse_env("ZWIP_RIO_PREFIX", v)?,
            None => default_rio_prefix(),
        };

        let ra_period = match env_var("ZWIP_RA_PERIOD_MS") {
            Some(v) => Duration::from_millis(parse_env("ZWIP_RA_PERIOD_MS", v)?),
            None => default_ra_period(),
        };

        Ok(GatewayConfig::builder()
            .pio_prefix(pio_prefix)
            .rio_prefix(rio_prefix)
            .ra_period(ra_period)
            .network_key(network_key)
            .unsolicited_dest(unsolicited_dest)
            .port(port)
            .udp_listen_port(udp_listen_port)
            .lr_enabled(lr_enabled)
            .build())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_match_the_configured_prefixes() {
        let config = GatewayConfig::builder()
            .network_key([0u8; 16])
            .unsolicited_dest("[::1]:4123".parse().unwrap())
            .port("tcp://localhost:0".to_string())
            .build();
        assert_eq!(config.pio_prefix, "fd00:bbbb::".parse::<Ipv6Addr>().unwrap());
        assert_eq!(config.rio_prefix, "fd00:bbbb:1::".parse::<Ipv6Addr>().unwrap());
        assert_eq!(config.ra_period, Duration::from_secs(60));
        assert_eq!(config.udp_listen_port, 4123);
        assert!(!config.lr_enabled);
    }

    #[test]
    fn from_env_reports_missing_required_variables() {
        for key in ["ZWIP_PORT", "ZWIP_NETWORK_KEY", "ZWIP_UNSOLICITED_DEST"] {
            unsafe {
                std::env::remove_var(key);
            }
        }
        let err = GatewayConfig::from_env().unwrap_err();
        assert!(matches!(err, Error::ConfigMissing("ZWIP_PORT")));
    }

    #[test]
    fn from_env_builds_a_config_from_required_and_optional_variables() {
        unsafe {
            std::env::set_var("ZWIP_PORT", "tcp://localhost:9999");
            std::env::set_var("ZWIP_NETWORK_KEY", "00".repeat(16));
            std::env::set_var("ZWIP_UNSOLICITED_DEST", "[::1]:4123");
            std::env::set_var("ZWIP_LR_ENABLED", "true");
            std::env::set_var("ZWIP_UDP_PORT", "5000");
        }

        let config = GatewayConfig::from_env().unwrap();
        assert_eq!(config.port, "tcp://localhost:9999");
        assert_eq!(config.network_key, [0u8; 16]);
        assert!(config.lr_enabled);
        assert_eq!(config.udp_listen_port, 5000);

        for key in [
            "ZWIP_PORT",
            "ZWIP_NETWORK_KEY",
            "ZWIP_UNSOLICITED_DEST",
            "ZWIP_LR_ENABLED",
            "ZWIP_UDP_PORT",
        ] {
            unsafe {
                std::env::remove_var(key);
            }
        }
    }
}
