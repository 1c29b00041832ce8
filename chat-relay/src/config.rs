use std::{
    net::{Ipv4Addr, SocketAddr},
    time::Duration,
};

use crate::cli::ServerArgs;

pub const DEFAULT_PORT: u16 = 5000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    /// `None` keeps broadcast writes unbounded.
    pub write_timeout: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
            write_timeout: None,
        }
    }
}

impl ServerConfig {
    /// Loopback on an ephemeral port.
    pub fn ephemeral() -> Self {
        Self {
            listen: SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
            ..Self::default()
        }
    }
}

impl From<&ServerArgs> for ServerConfig {
    fn from(args: &ServerArgs) -> Self {
        Self {
            listen: args.listen,
            write_timeout: args.write_timeout_ms.map(Duration::from_millis),
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;
    use crate::cli::{Cli, Command};

    #[test]
    fn defaults_to_port_5000_without_timeout() {
        let cli = Cli::try_parse_from(["chat_relay", "server"]).expect("parse");
        let Command::Server(args) = cli.command else {
            panic!("expected server command");
        };
        assert_eq!(ServerConfig::from(&args), ServerConfig::default());
        assert_eq!(ServerConfig::default().listen.port(), DEFAULT_PORT);
    }

    #[test]
    fn write_timeout_is_in_milliseconds() {
        let cli = Cli::try_parse_from([
            "chat_relay",
            "server",
            "--listen",
            "127.0.0.1:0",
            "--write-timeout-ms",
            "250",
        ])
        .expect("parse");
        let Command::Server(args) = cli.command else {
            panic!("expected server command");
        };
        let config = ServerConfig::from(&args);
        assert_eq!(config.listen.port(), 0);
        assert_eq!(config.write_timeout, Some(Duration::from_millis(250)));
    }
}
