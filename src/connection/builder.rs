// ABOUTME: Connection::connect/connect_uri - convenience constructors over transport::connect + AmqpUri (§10.3)

use tokio::net::ToSocketAddrs;

use crate::transport;
use crate::uri::AmqpUri;

use super::config::{ConnectionConfig, SaslMechanism};
use super::error::Error;
use super::supervisor::Connection;

impl Connection {
    /// Dials `addr`, negotiates the handshake with `config`, and returns a
    /// running connection. `host_for_tls` is only consulted when
    /// `config.tls_config` is set and has no `server_name` override.
    pub async fn connect<A: ToSocketAddrs>(
        addr: A,
        host_for_tls: &str,
        config: ConnectionConfig,
    ) -> Result<Self, Error> {
        let (reader, writer, deadline) = transport::connect(
            addr,
            host_for_tls,
            config.tls_config.as_ref(),
            config.connect_timeout,
        )
        .await?;
        Connection::open(reader, writer, deadline, config).await
    }

    /// Parses `uri`, folds its credentials/vhost into `config`, and connects.
    /// Query parameters and alternate auth schemes are not part of the
    /// minimal URI grammar this core understands (§6).
    pub async fn connect_uri(uri: &str, mut config: ConnectionConfig) -> Result<Self, Error> {
        let parsed = AmqpUri::parse(uri).map_err(|e| Error::protocol(e.to_string()))?;

        if let (Some(user), Some(pass)) = (&parsed.username, &parsed.password) {
            config.sasl_mechanisms = vec![SaslMechanism::plain(user, pass)];
        }
        config.vhost = parsed.vhost.clone();

        Connection::connect((parsed.host.as_str(), parsed.port), &parsed.host, config).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_fails_fast_against_a_closed_port() {
        let config = ConnectionConfig::builder()
            .connect_timeout(std::time::Duration::from_millis(200))
            .build();
        let err = Connection::connect("127.0.0.1:1", "localhost", config)
            .await
            .unwrap_err();
        assert_eq!(err.kind, super::super::error::ErrorKind::Transport);
    }

    #[tokio::test]
    async fn connect_uri_rejects_an_unparseable_uri() {
        let err = Connection::connect_uri("not-a-uri", ConnectionConfig::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind, super::super::error::ErrorKind::Protocol);
    }
}
