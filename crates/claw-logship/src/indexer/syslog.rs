//! Syslog backend: sends each payload as one UDP datagram.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::{Result, ShipError};
use crate::indexer::Indexer;
use crate::payload::{LogPayload, PAYLOAD_SOURCE};
use crate::types::{IndexerKind, NetworkSettings, SyslogConfig, SyslogFormat};

const KIND: IndexerKind = IndexerKind::Syslog;

/// Facility `user` (1), severity `informational` (6).
pub const PRIORITY: u8 = 14;

/// Formats a BSD syslog line: `<14>Mmm dd hh:mm:ss host app: msg`.
#[must_use]
pub fn format_rfc3164(ts: &DateTime<Utc>, host: &str, app: &str, message: &str) -> String {
    format!(
        "<{PRIORITY}>{} {} {app}: {message}",
        ts.format("%b %e %H:%M:%S"),
        header_host(host)
    )
}

/// Formats a structured syslog line: `<14>1 <ts> host app - - - msg`.
#[must_use]
pub fn format_rfc5424(ts: &DateTime<Utc>, host: &str, app: &str, message: &str) -> String {
    format!(
        "<{PRIORITY}>1 {} {} {app} - - - {message}",
        ts.to_rfc3339_opts(SecondsFormat::Millis, true),
        header_host(host)
    )
}

/// Header fields cannot hold spaces; an unknown host is `-`.
fn header_host(host: &str) -> String {
    let host = host.trim();
    if host.is_empty() || host == "?" {
        "-".to_string()
    } else {
        host.replace(char::is_whitespace, "-")
    }
}

/// Sends payloads to a syslog collector.
#[derive(Debug)]
pub struct SyslogIndexer {
    host: String,
    port: u16,
    format: SyslogFormat,
    timeout: Duration,
    socket: Option<(UdpSocket, SocketAddr)>,
}

impl SyslogIndexer {
    /// Validates `config`. The collector address is resolved on first push.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the host is blank or the port is zero.
    pub fn new(config: &SyslogConfig, network: &NetworkSettings) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            host: config.host.trim().to_string(),
            port: config.port,
            format: config.message_format,
            timeout: network.timeout(),
            socket: None,
        })
    }

    /// Returns the configured message format.
    #[must_use]
    pub const fn format(&self) -> SyslogFormat {
        self.format
    }

    /// Renders the datagram for `payload`.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the payload cannot be encoded.
    pub fn render(&self, payload: &LogPayload, now: &DateTime<Utc>) -> Result<String> {
        let body = payload.to_json()?;
        Ok(match self.format {
            SyslogFormat::Rfc3164 => format_rfc3164(now, &payload.sender, PAYLOAD_SOURCE, &body),
            SyslogFormat::Rfc5424 => format_rfc5424(now, &payload.sender, PAYLOAD_SOURCE, &body),
        })
    }

    fn open(&self) -> io::Result<(UdpSocket, SocketAddr)> {
        let target = (self.host.as_str(), self.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no address for syslog host"))?;
        let local = if target.is_ipv4() {
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
        } else {
            SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
        };
        let socket = UdpSocket::bind(local)?;
        socket.set_write_timeout(Some(self.timeout))?;
        Ok((socket, target))
    }

    fn send(&mut self, datagram: &[u8]) -> io::Result<()> {
        if self.socket.is_none() {
            self.socket = Some(self.open()?);
        }
        let (socket, target) = self
            .socket
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "syslog socket closed"))?;
        socket.send_to(datagram, target)?;
        Ok(())
    }
}

impl Indexer for SyslogIndexer {
    fn kind(&self) -> IndexerKind {
        KIND
    }

    fn description(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn push(&mut self, payload: &LogPayload) -> Result<()> {
        let datagram = self.render(payload, &Utc::now())?;
        self.send(datagram.as_bytes()).map_err(|e| {
            self.socket = None;
            if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) {
                ShipError::timeout(KIND, e.to_string())
            } else {
                ShipError::transport(KIND, e.to_string())
            }
        })
    }
}
