//! # RESP Connection
//!
//! One blocking TCP connection to a Redis-compatible server.
//!
//! ## Design Principles
//!
//! 1. **Request/Response**: Every command writes one frame and blocks for one
//!    reply; there is no pipelining and no background reader.
//! 2. **Buffer Reuse**: Read and write buffers live with the connection and
//!    are reused across commands.
//! 3. **Typed Replies**: Each command maps the reply frame to a Rust value
//!    and treats any other shape as a protocol error.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};

use bytes::{Bytes, BytesMut};
use rkv_common::{Frame, FrameParser, StoreError, StoreErrorKind, StoreResult};
use rkv_engine::{ScanCursor, ScanPage};
use tracing::debug;

use crate::options::ConnectionSettings;

/// Port used when the address does not name one.
pub const DEFAULT_PORT: u16 = 6379;

const READ_CHUNK: usize = 4096;

/// Store address: host name or IP plus port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    pub host: String,
    pub port: u16,
}

impl Address {
    /// Parses `host`, `host:port`, `[v6]:port` or `redis://host[:port]`.
    ///
    /// No name resolution happens here.
    pub fn parse(address: &str) -> StoreResult<Self> {
        let trimmed = address.trim();
        let trimmed = trimmed.strip_prefix("redis://").unwrap_or(trimmed);
        let trimmed = trimmed.trim_end_matches('/');
        if trimmed.is_empty() {
            return Err(StoreError::config("store address is empty"));
        }
        if trimmed.contains('@') {
            return Err(StoreError::config(format!(
                "store address {address:?} carries credentials; use the `username` and `password` store options"
            )));
        }

        if let Ok(addr) = trimmed.parse::<SocketAddr>() {
            return Ok(Address {
                host: addr.ip().to_string(),
                port: addr.port(),
            });
        }

        match trimmed.rsplit_once(':') {
            Some((host, port)) if !host.contains(':') => {
                let port = port
                    .parse()
                    .map_err(|_| StoreError::config(format!("invalid port in store address {address:?}")))?;
                if host.is_empty() {
                    return Err(StoreError::config(format!("missing host in store address {address:?}")));
                }
                Ok(Address {
                    host: host.to_owned(),
                    port,
                })
            }
            _ => Ok(Address {
                host: trimmed.trim_start_matches('[').trim_end_matches(']').to_owned(),
                port: DEFAULT_PORT,
            }),
        }
    }
}

/// Blocking RESP2 connection.
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    read_buf: BytesMut,
    write_buf: BytesMut,
    parser: FrameParser,
}

impl Connection {
    /// Connects to `address`, applies socket timeouts and runs the AUTH/SELECT
    /// handshake requested by `settings`.
    pub fn open(address: &Address, settings: &ConnectionSettings) -> StoreResult<Self> {
        let stream = connect(address, settings)?;
        stream.set_read_timeout(settings.read_timeout)?;
        stream.set_write_timeout(settings.write_timeout)?;
        stream.set_nodelay(true)?;

        let mut conn = Connection {
            stream,
            read_buf: BytesMut::with_capacity(READ_CHUNK),
            write_buf: BytesMut::with_capacity(READ_CHUNK),
            parser: FrameParser::new(),
        };
        conn.handshake(settings)?;
        debug!(host = %address.host, port = address.port, "connected to store");
        Ok(conn)
    }

    fn handshake(&mut self, settings: &ConnectionSettings) -> StoreResult<()> {
        if let Some(password) = &settings.password {
            match &settings.username {
                Some(user) => self.expect_ok(&["AUTH", user.as_str(), password.as_str()])?,
                None => self.expect_ok(&["AUTH", password.as_str()])?,
            }
        }
        if let Some(db) = settings.db {
            let db = db.to_string();
            self.expect_ok(&["SELECT", db.as_str()])?;
        }
        Ok(())
    }

    /// Sends one command and waits for its reply.
    ///
    /// Error replies come back as `Err` with the kind derived from the reply
    /// prefix; the connection stays usable after them.
    pub fn request<A: AsRef<[u8]>>(&mut self, args: &[A]) -> StoreResult<Frame> {
        self.write_buf.clear();
        Frame::command(args).encode(&mut self.write_buf);
        self.stream.write_all(&self.write_buf)?;

        match self.read_frame()? {
            Frame::Error(reply) => Err(StoreError::from_server_reply(&reply)),
            frame => Ok(frame),
        }
    }

    fn read_frame(&mut self) -> StoreResult<Frame> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            if let Some(frame) = self.parser.parse(&mut self.read_buf)? {
                return Ok(frame);
            }
            let n = self.stream.read(&mut chunk)?;
            if n == 0 {
                return Err(StoreError::connection("connection closed by server"));
            }
            self.read_buf.extend_from_slice(&chunk[..n]);
        }
    }

    fn expect_ok<A: AsRef<[u8]>>(&mut self, args: &[A]) -> StoreResult<()> {
        match self.request(args)? {
            Frame::Simple(reply) if reply == "OK" => Ok(()),
            other => Err(unexpected(args, &other)),
        }
    }

    pub fn ping(&mut self) -> StoreResult<()> {
        match self.request(&["PING"])? {
            Frame::Simple(reply) if reply == "PONG" => Ok(()),
            other => Err(unexpected(&["PING"], &other)),
        }
    }

    pub fn get(&mut self, key: &str) -> StoreResult<Option<Bytes>> {
        match self.request(&["GET", key])? {
            Frame::Bulk(value) => Ok(Some(value)),
            Frame::Null => Ok(None),
            other => Err(unexpected(&["GET"], &other)),
        }
    }

    pub fn set(&mut self, key: &str, value: &[u8]) -> StoreResult<()> {
        self.expect_ok(&[b"SET".as_slice(), key.as_bytes(), value])
    }

    pub fn delete(&mut self, key: &str) -> StoreResult<bool> {
        match self.request(&["DEL", key])? {
            Frame::Integer(removed) => Ok(removed > 0),
            other => Err(unexpected(&["DEL"], &other)),
        }
    }

    pub fn exists(&mut self, key: &str) -> StoreResult<bool> {
        match self.request(&["EXISTS", key])? {
            Frame::Integer(found) => Ok(found > 0),
            other => Err(unexpected(&["EXISTS"], &other)),
        }
    }

    /// Runs one `SCAN cursor MATCH pattern COUNT count` round trip.
    ///
    /// Keys that are not valid UTF-8 cannot come from a key template and are
    /// skipped.
    pub fn scan(&mut self, cursor: &ScanCursor, pattern: &str, count: usize) -> StoreResult<ScanPage> {
        let count = count.max(1).to_string();
        let reply = self.request(&["SCAN", cursor.as_str(), "MATCH", pattern, "COUNT", count.as_str()])?;

        let mut parts = match reply {
            Frame::Array(parts) => parts,
            other => return Err(unexpected(&["SCAN"], &other)),
        };
        if parts.len() != 2 {
            return Err(StoreError::protocol("SCAN reply must have two elements"));
        }
        let keys_frame = parts.pop();
        let cursor_frame = parts.pop();

        let next = match cursor_frame.as_ref().and_then(Frame::as_bytes) {
            Some(token) => {
                let token = std::str::from_utf8(token)
                    .map_err(|_| StoreError::protocol("SCAN cursor is not valid UTF-8"))?;
                (token != ScanCursor::START_TOKEN).then(|| ScanCursor::new(token))
            }
            None => return Err(StoreError::protocol("SCAN cursor is not a string")),
        };

        let Some(Frame::Array(items)) = keys_frame else {
            return Err(StoreError::protocol("SCAN keys are not an array"));
        };
        let mut keys = Vec::with_capacity(items.len());
        for item in items {
            match item {
                Frame::Bulk(raw) => match String::from_utf8(raw.to_vec()) {
                    Ok(key) => keys.push(key),
                    Err(_) => debug!("skipping non UTF-8 key in SCAN reply"),
                },
                other => return Err(unexpected(&["SCAN"], &other)),
            }
        }
        Ok(ScanPage { keys, next })
    }
}

/// Returns true if `err` leaves the connection in an unknown state.
///
/// After a timeout or a malformed frame the reply stream may be out of step
/// with the requests, so the connection must not be reused.
pub(crate) fn breaks_connection(err: &StoreError) -> bool {
    matches!(
        err.kind(),
        StoreErrorKind::Connection | StoreErrorKind::Timeout | StoreErrorKind::Protocol
    )
}

fn connect(address: &Address, settings: &ConnectionSettings) -> StoreResult<TcpStream> {
    let candidates = (address.host.as_str(), address.port).to_socket_addrs()?;
    let mut last_err = None;
    for candidate in candidates {
        let attempt = match settings.connect_timeout {
            Some(timeout) => TcpStream::connect_timeout(&candidate, timeout),
            None => TcpStream::connect(candidate),
        };
        match attempt {
            Ok(stream) => return Ok(stream),
            Err(err) => last_err = Some(err),
        }
    }
    Err(match last_err {
        Some(err) => StoreError::from(err),
        None => StoreError::connection(format!("{}:{} did not resolve", address.host, address.port)),
    })
}

fn unexpected<A: AsRef<[u8]>>(args: &[A], reply: &Frame) -> StoreError {
    let command = args
        .first()
        .map(|name| String::from_utf8_lossy(name.as_ref()).into_owned())
        .unwrap_or_default();
    StoreError::protocol(format!("unexpected reply to {command}: {reply:?}"))
}
