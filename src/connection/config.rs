// ABOUTME: ConnectionConfig, NegotiatedConfig, ServerInfo - the data model of §3
// ABOUTME: ConnectionConfig carries a Default plus a fluent builder, per §10.3

use std::time::Duration;

use bytes::BytesMut;

use crate::codec::encode_table;
use crate::table::Table;
use crate::transport::TlsConfig;

/// A single SASL authentication capability: a mechanism name and the
/// pre-encoded response bytes the handshake sends on selection (§4.9 step
/// 2). The mechanism implementations themselves are out of scope for this
/// core (§1); callers supply the already-encoded response.
#[derive(Clone, Debug)]
pub struct SaslMechanism {
    pub name: String,
    pub response: Vec<u8>,
}

impl SaslMechanism {
    pub fn plain(username: &str, password: &str) -> Self {
        let mut response = Vec::with_capacity(username.len() + password.len() + 2);
        response.push(0);
        response.extend_from_slice(username.as_bytes());
        response.push(0);
        response.extend_from_slice(password.as_bytes());
        Self {
            name: "PLAIN".to_string(),
            response,
        }
    }

    pub fn amqplain(username: &str, password: &str) -> Self {
        let mut table = Table::new();
        table.insert("LOGIN", username);
        table.insert("PASSWORD", password);
        let mut buf = BytesMut::new();
        encode_table(&mut buf, &table).expect("table of short strings always encodes");
        Self {
            name: "AMQPLAIN".to_string(),
            response: buf.to_vec(),
        }
    }
}

/// Client-side handshake proposal. Defaults mirror §6: heartbeat 10 s,
/// connect timeout 30 s, unbounded channels/frame size, vhost `"/"`.
#[derive(Clone)]
pub struct ConnectionConfig {
    pub sasl_mechanisms: Vec<SaslMechanism>,
    pub vhost: String,
    pub max_channels: u16,
    pub max_frame_size: u32,
    pub heartbeat_interval: Duration,
    pub tls_config: Option<TlsConfig>,
    pub connect_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            sasl_mechanisms: vec![SaslMechanism::plain("guest", "guest")],
            vhost: "/".to_string(),
            max_channels: 0,
            max_frame_size: 0,
            heartbeat_interval: Duration::from_secs(10),
            tls_config: None,
            connect_timeout: Duration::from_secs(30),
        }
    }
}

impl ConnectionConfig {
    pub fn builder() -> ConnectionConfigBuilder {
        ConnectionConfigBuilder::default()
    }
}

/// Fluent builder over [`ConnectionConfig`], in the style of the teacher's
/// client option builders.
#[derive(Clone)]
pub struct ConnectionConfigBuilder {
    config: ConnectionConfig,
}

impl Default for ConnectionConfigBuilder {
    fn default() -> Self {
        Self {
            config: ConnectionConfig::default(),
        }
    }
}

impl ConnectionConfigBuilder {
    pub fn credentials(mut self, username: &str, password: &str) -> Self {
        self.config.sasl_mechanisms = vec![SaslMechanism::plain(username, password)];
        self
    }

    pub fn sasl_mechanisms(mut self, mechanisms: Vec<SaslMechanism>) -> Self {
        self.config.sasl_mechanisms = mechanisms;
        self
    }

    pub fn vhost(mut self, vhost: impl Into<String>) -> Self {
        self.config.vhost = vhost.into();
        self
    }

    pub fn max_channels(mut self, max_channels: u16) -> Self {
        self.config.max_channels = max_channels;
        self
    }

    pub fn max_frame_size(mut self, max_frame_size: u32) -> Self {
        self.config.max_frame_size = max_frame_size;
        self
    }

    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.config.heartbeat_interval = interval;
        self
    }

    pub fn tls_config(mut self, tls_config: TlsConfig) -> Self {
        self.config.tls_config = Some(tls_config);
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn build(self) -> ConnectionConfig {
        self.config
    }
}

/// Result of tune negotiation: the minimum of client and server proposals,
/// with zero meaning "no limit proposed by this side" (§4.9 step 4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiatedConfig {
    pub channel_max: u16,
    pub frame_max: u32,
    pub heartbeat: Duration,
}

impl NegotiatedConfig {
    pub fn negotiate(client: &ConnectionConfig, server_channel_max: u16, server_frame_max: u32, server_heartbeat: u16) -> Self {
        Self {
            channel_max: pick_u16(client.max_channels, server_channel_max),
            frame_max: pick_u32(client.max_frame_size, server_frame_max),
            heartbeat: Duration::from_secs(pick_u16(
                client.heartbeat_interval.as_secs() as u16,
                server_heartbeat,
            ) as u64),
        }
    }
}

fn pick_u16(client: u16, server: u16) -> u16 {
    match (client, server) {
        (0, s) => s,
        (c, 0) => c,
        (c, s) => c.min(s),
    }
}

fn pick_u32(client: u32, server: u32) -> u32 {
    match (client, server) {
        (0, s) => s,
        (c, 0) => c,
        (c, s) => c.min(s),
    }
}

/// What the server told us about itself during `connection.start` (§3).
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub major: u8,
    pub minor: u8,
    pub properties: Table,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_defaults() {
        let config = ConnectionConfig::builder()
            .vhost("/prod")
            .max_channels(64)
            .heartbeat_interval(Duration::from_secs(5))
            .build();
        assert_eq!(config.vhost, "/prod");
        assert_eq!(config.max_channels, 64);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(5));
    }

    #[test]
    fn negotiate_takes_the_minimum_of_nonzero_proposals() {
        let client = ConnectionConfig::default();
        let negotiated = NegotiatedConfig::negotiate(&client, 2047, 131072, 60);
        assert_eq!(negotiated.channel_max, 2047);
        assert_eq!(negotiated.frame_max, 131072);
        assert_eq!(negotiated.heartbeat, Duration::from_secs(10));
    }

    #[test]
    fn negotiate_treats_zero_as_no_limit_proposed() {
        let mut client = ConnectionConfig::default();
        client.max_channels = 0;
        client.max_frame_size = 0;
        client.heartbeat_interval = Duration::ZERO;
        let negotiated = NegotiatedConfig::negotiate(&client, 0, 0, 0);
        assert_eq!(negotiated.channel_max, 0);
        assert_eq!(negotiated.frame_max, 0);
        assert_eq!(negotiated.heartbeat, Duration::from_secs(0));
    }

    #[test]
    fn plain_mechanism_encodes_null_separated_credentials() {
        let mechanism = SaslMechanism::plain("guest", "guest");
        assert_eq!(mechanism.name, "PLAIN");
        assert_eq!(mechanism.response, b"\0guest\0guest");
    }
}
