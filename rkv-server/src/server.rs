//! # Connection Handling
//!
//! Read RESP2 requests from a socket, dispatch them against the shared
//! `MemoryStore`, and write replies back in order.
//!
//! ## Design Principles
//!
//! 1. **Per-Connection Buffers**: Each task owns its read and write buffers.
//! 2. **Pipelining**: Every complete request in the buffer is answered before
//!    the next read.
//! 3. **Fail-Open Defaults**: Protocol errors close only the offending
//!    connection.
//! 4. **Pure Dispatch**: Command execution is a synchronous function so it can
//!    be tested without sockets.

use std::collections::BTreeMap;
use std::future::Future;
use std::io;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, warn};

use rkv_common::{Frame, FrameParser, StoreError};
use rkv_engine::{KvStore, MemoryStore, ScanCursor};

use crate::stats::ServerStats;

/// Keys returned per SCAN call when the client omits `COUNT`.
const DEFAULT_SCAN_COUNT: usize = 10;

/// Unfinished scans remembered at once; the oldest are forgotten first.
const MAX_OPEN_SCANS: usize = 4096;

/// State shared by every connection task.
#[derive(Debug, Default)]
pub struct ServerState {
    store: MemoryStore,
    stats: ServerStats,
    scans: ScanTable,
}

/// Maps the numeric cursors Redis clients expect to store resume tokens.
///
/// Cursor `0` always starts a scan. Every other cursor is handed out once by
/// `register` and stays valid until `MAX_OPEN_SCANS` newer ones exist, so a
/// client may repeat a request with the same cursor.
#[derive(Debug, Default)]
struct ScanTable {
    inner: Mutex<OpenScans>,
}

#[derive(Debug, Default)]
struct OpenScans {
    last_id: u64,
    open: BTreeMap<u64, ScanCursor>,
}

impl ScanTable {
    fn register(&self, cursor: ScanCursor) -> u64 {
        let mut scans = self.inner.lock();
        scans.last_id += 1;
        let id = scans.last_id;
        scans.open.insert(id, cursor);
        while scans.open.len() > MAX_OPEN_SCANS {
            scans.open.pop_first();
        }
        id
    }

    fn resolve(&self, token: &[u8]) -> Option<ScanCursor> {
        let id: u64 = std::str::from_utf8(token).ok()?.parse().ok()?;
        if id == 0 {
            return Some(ScanCursor::start());
        }
        self.inner.lock().open.get(&id).cloned()
    }
}

impl ServerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }
}

/// Accepts connections until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    state: Arc<ServerState>,
    shutdown: impl Future<Output = ()>,
) -> io::Result<()> {
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => return Ok(()),
            accept = listener.accept() => {
                let (stream, peer) = accept?;
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    if let Err(err) = handle_connection(stream, state).await {
                        warn!(%peer, error = %err, "connection closed with error");
                    }
                });
            }
        }
    }
}

/// Serves one client until it disconnects, sends `QUIT`, or breaks protocol.
pub async fn handle_connection(mut stream: TcpStream, state: Arc<ServerState>) -> io::Result<()> {
    let _ = stream.set_nodelay(true);
    state.stats.record_connect();
    let result = run_connection(&mut stream, &state).await;
    state.stats.record_disconnect();
    result
}

async fn run_connection(stream: &mut TcpStream, state: &ServerState) -> io::Result<()> {
    let parser = FrameParser::new();
    let mut read_buf = BytesMut::with_capacity(4096);
    let mut write_buf = BytesMut::with_capacity(4096);

    loop {
        let mut close = false;
        loop {
            let request = match parser.parse(&mut read_buf) {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(err) => {
                    warn!(error = %err, "malformed request");
                    Frame::Error(format!("ERR Protocol error: {err}")).encode(&mut write_buf);
                    close = true;
                    break;
                }
            };
            let (reply, quit) = match command_args(request) {
                Some(args) => execute(state, &args),
                None => (
                    Frame::Error("ERR Protocol error: expected array of bulk strings".into()),
                    true,
                ),
            };
            state.stats.record_command(matches!(reply, Frame::Error(_)));
            reply.encode(&mut write_buf);
            if quit {
                close = true;
                break;
            }
        }

        if !write_buf.is_empty() {
            stream.write_all(&write_buf).await?;
            write_buf.clear();
        }
        if close {
            return Ok(());
        }

        if stream.read_buf(&mut read_buf).await? == 0 {
            return Ok(());
        }
    }
}

fn command_args(request: Frame) -> Option<Vec<Bytes>> {
    let Frame::Array(parts) = request else {
        return None;
    };
    parts
        .into_iter()
        .map(|part| match part {
            Frame::Bulk(data) => Some(data),
            _ => None,
        })
        .collect()
}

/// Executes one command. The flag asks the caller to close the connection.
pub fn execute(state: &ServerState, args: &[Bytes]) -> (Frame, bool) {
    let Some(name) = args.first() else {
        return (Frame::Error("ERR empty command".into()), false);
    };
    let name = String::from_utf8_lossy(name).to_ascii_uppercase();
    debug!(command = %name, argc = args.len(), "dispatch");

    let reply = match name.as_str() {
        "PING" => ping(&args[1..]),
        "GET" => get(state, &args[1..]),
        "SET" => set(state, &args[1..]),
        "DEL" => count_keys(state, "del", &args[1..], |store, key| store.delete(key)),
        "EXISTS" => count_keys(state, "exists", &args[1..], |store, key| store.exists(key)),
        "SCAN" => scan(state, &args[1..]),
        "SELECT" => select(&args[1..]),
        "AUTH" => Frame::Error(
            "ERR AUTH <password> called without any password configured for the default user"
                .into(),
        ),
        "DBSIZE" => Frame::Integer(state.store.len() as i64),
        "INFO" => info(state),
        "QUIT" => return (Frame::Simple("OK".into()), true),
        _ => Frame::Error(format!("ERR unknown command '{}'", name.to_ascii_lowercase())),
    };
    (reply, false)
}

fn wrong_arity(command: &str) -> Frame {
    Frame::Error(format!("ERR wrong number of arguments for '{command}' command"))
}

fn store_error(err: StoreError) -> Frame {
    Frame::Error(format!("ERR {}", err.message()))
}

fn key_arg(data: &Bytes) -> Result<&str, Frame> {
    std::str::from_utf8(data).map_err(|_| Frame::Error("ERR keys must be valid UTF-8".into()))
}

fn ping(args: &[Bytes]) -> Frame {
    match args {
        [] => Frame::Simple("PONG".into()),
        [message] => Frame::Bulk(message.clone()),
        _ => wrong_arity("ping"),
    }
}

fn get(state: &ServerState, args: &[Bytes]) -> Frame {
    let [key] = args else {
        return wrong_arity("get");
    };
    let key = match key_arg(key) {
        Ok(key) => key,
        Err(reply) => return reply,
    };
    match state.store.get(key) {
        Ok(Some(value)) => Frame::Bulk(value),
        Ok(None) => Frame::Null,
        Err(err) => store_error(err),
    }
}

fn set(state: &ServerState, args: &[Bytes]) -> Frame {
    let [key, value, rest @ ..] = args else {
        return wrong_arity("set");
    };
    if !rest.is_empty() {
        return Frame::Error("ERR syntax error".into());
    }
    let key = match key_arg(key) {
        Ok(key) => key,
        Err(reply) => return reply,
    };
    match state.store.set(key, value.clone()) {
        Ok(()) => Frame::Simple("OK".into()),
        Err(err) => store_error(err),
    }
}

fn count_keys(
    state: &ServerState,
    command: &str,
    args: &[Bytes],
    op: impl Fn(&MemoryStore, &str) -> Result<bool, StoreError>,
) -> Frame {
    if args.is_empty() {
        return wrong_arity(command);
    }
    let mut hits = 0;
    for key in args {
        let key = match key_arg(key) {
            Ok(key) => key,
            Err(reply) => return reply,
        };
        match op(&state.store, key) {
            Ok(true) => hits += 1,
            Ok(false) => {}
            Err(err) => return store_error(err),
        }
    }
    Frame::Integer(hits)
}

fn scan(state: &ServerState, args: &[Bytes]) -> Frame {
    let Some((cursor, options)) = args.split_first() else {
        return wrong_arity("scan");
    };
    let Some(cursor) = state.scans.resolve(cursor) else {
        return Frame::Error("ERR invalid cursor".into());
    };

    let mut pattern = "*";
    let mut count = DEFAULT_SCAN_COUNT;
    let mut options = options.iter();
    while let Some(option) = options.next() {
        let Some(value) = options.next() else {
            return Frame::Error("ERR syntax error".into());
        };
        if option.eq_ignore_ascii_case(b"MATCH") {
            pattern = match key_arg(value) {
                Ok(pattern) => pattern,
                Err(reply) => return reply,
            };
        } else if option.eq_ignore_ascii_case(b"COUNT") {
            count = match std::str::from_utf8(value).ok().and_then(|v| v.parse().ok()) {
                Some(n) if n > 0 => n,
                _ => return Frame::Error("ERR value is not an integer or out of range".into()),
            };
        } else {
            return Frame::Error("ERR syntax error".into());
        }
    }

    match state.store.scan(&cursor, pattern, count) {
        Ok(page) => {
            let next = page.next.map_or(0, |next| state.scans.register(next));
            let keys = page.keys.into_iter().map(Frame::bulk).collect();
            Frame::Array(vec![Frame::bulk(next.to_string()), Frame::Array(keys)])
        }
        Err(err) => store_error(err),
    }
}

fn select(args: &[Bytes]) -> Frame {
    let [db] = args else {
        return wrong_arity("select");
    };
    match std::str::from_utf8(db).ok().and_then(|v| v.parse::<i64>().ok()) {
        Some(0) => Frame::Simple("OK".into()),
        Some(_) => Frame::Error("ERR DB index is out of range".into()),
        None => Frame::Error("ERR value is not an integer or out of range".into()),
    }
}

fn info(state: &ServerState) -> Frame {
    let stats = state.stats.snapshot();
    let text = format!(
        "# Server\r\n\
         engine:recordkv\r\n\
         version:{}\r\n\
         \r\n\
         # Stats\r\n\
         total_connections_received:{}\r\n\
         connected_clients:{}\r\n\
         total_commands_processed:{}\r\n\
         total_error_replies:{}\r\n\
         \r\n\
         # Keyspace\r\n\
         db0:keys={}\r\n",
        env!("CARGO_PKG_VERSION"),
        stats.connections_total,
        stats.connections_active,
        stats.commands_total,
        stats.errors_total,
        state.store.len(),
    );
    Frame::bulk(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(state: &ServerState, args: &[&str]) -> Frame {
        let args: Vec<Bytes> = args.iter().map(|a| Bytes::copy_from_slice(a.as_bytes())).collect();
        execute(state, &args).0
    }

    fn scan_reply(frame: Frame) -> (String, Vec<String>) {
        let Frame::Array(parts) = frame else {
            panic!("expected array, got {frame:?}");
        };
        let [cursor, Frame::Array(keys)] = parts.as_slice() else {
            panic!("unexpected scan reply {parts:?}");
        };
        let cursor = String::from_utf8(cursor.as_bytes().unwrap().to_vec()).unwrap();
        let keys = keys
            .iter()
            .map(|k| String::from_utf8(k.as_bytes().unwrap().to_vec()).unwrap())
            .collect();
        (cursor, keys)
    }

    #[test]
    fn get_set_del_exists() {
        let state = ServerState::new();
        assert_eq!(run(&state, &["get", "k"]), Frame::Null);
        assert_eq!(run(&state, &["SET", "k", "v"]), Frame::Simple("OK".into()));
        assert_eq!(run(&state, &["GET", "k"]), Frame::bulk("v"));
        assert_eq!(run(&state, &["EXISTS", "k", "nope", "k"]), Frame::Integer(2));
        assert_eq!(run(&state, &["DBSIZE"]), Frame::Integer(1));
        assert_eq!(run(&state, &["DEL", "k", "nope"]), Frame::Integer(1));
        assert_eq!(run(&state, &["GET", "k"]), Frame::Null);
    }

    #[test]
    fn rejects_bad_arity_and_unknown_commands() {
        let state = ServerState::new();
        assert!(matches!(run(&state, &["GET"]), Frame::Error(e) if e.contains("'get'")));
        assert!(matches!(run(&state, &["SET", "k", "v", "EX", "1"]), Frame::Error(_)));
        assert!(matches!(run(&state, &["FLUSHALL"]), Frame::Error(e) if e.contains("unknown")));
        assert!(matches!(execute(&state, &[]).0, Frame::Error(_)));
    }

    /// Drains a scan, checking that every cursor is a plain integer.
    fn drain_scan(state: &ServerState, extra: &[&str]) -> Vec<String> {
        let mut cursor = "0".to_string();
        let mut keys = Vec::new();
        loop {
            let mut args = vec!["SCAN", cursor.as_str()];
            args.extend_from_slice(extra);
            let (next, page) = scan_reply(run(state, &args));
            assert!(next.parse::<u64>().is_ok(), "cursor {next:?} is not numeric");
            keys.extend(page);
            if next == "0" {
                return keys;
            }
            cursor = next;
        }
    }

    #[test]
    fn scan_pages_through_matching_keys() {
        let state = ServerState::new();
        for key in ["rec:a", "rec:b", "rec:c", "user:u"] {
            run(&state, &["SET", key, "x"]);
        }
        assert_eq!(drain_scan(&state, &["MATCH", "rec:*", "COUNT", "2"]), ["rec:a", "rec:b", "rec:c"]);
    }

    #[test]
    fn scan_cursors_are_numeric_across_many_pages() {
        let state = ServerState::new();
        for i in 0..15 {
            let key = format!("rec:{i:02}");
            run(&state, &["SET", key.as_str(), "x"]);
        }

        let (cursor, first) = scan_reply(run(&state, &["SCAN", "0", "MATCH", "rec:*"]));
        assert_eq!(first.len(), DEFAULT_SCAN_COUNT);
        assert_ne!(cursor, "0");
        assert!(cursor.parse::<u64>().is_ok(), "cursor {cursor:?} is not numeric");

        // Repeating a cursor replays the same page.
        let again = scan_reply(run(&state, &["SCAN", cursor.as_str(), "MATCH", "rec:*"]));
        let replay = scan_reply(run(&state, &["SCAN", cursor.as_str(), "MATCH", "rec:*"]));
        assert_eq!(again.1, replay.1);
        assert_eq!(again.1.len(), 5);

        let all = drain_scan(&state, &["MATCH", "rec:*"]);
        let expected: Vec<String> = (0..15).map(|i| format!("rec:{i:02}")).collect();
        assert_eq!(all, expected);
    }

    #[test]
    fn scan_rejects_bad_arguments() {
        let state = ServerState::new();
        assert!(matches!(run(&state, &["SCAN", "bogus"]), Frame::Error(e) if e.contains("cursor")));
        assert!(matches!(run(&state, &["SCAN", "999"]), Frame::Error(e) if e.contains("cursor")));
        assert!(matches!(run(&state, &["SCAN", "-1"]), Frame::Error(e) if e.contains("cursor")));
        assert!(matches!(run(&state, &["SCAN", "0", "COUNT", "0"]), Frame::Error(_)));
        assert!(matches!(run(&state, &["SCAN", "0", "MATCH"]), Frame::Error(_)));
        assert!(matches!(run(&state, &["SCAN", "0", "TYPE", "string"]), Frame::Error(_)));
    }

    #[test]
    fn old_scan_cursors_expire() {
        let table = ScanTable::default();
        let first = table.register(ScanCursor::new(">a"));
        for _ in 0..MAX_OPEN_SCANS {
            table.register(ScanCursor::new(">b"));
        }
        assert!(table.resolve(first.to_string().as_bytes()).is_none());
        assert_eq!(table.resolve(b"0"), Some(ScanCursor::start()));
        let last = (first + MAX_OPEN_SCANS as u64).to_string();
        assert_eq!(table.resolve(last.as_bytes()), Some(ScanCursor::new(">b")));
    }

    #[test]
    fn select_auth_and_quit() {
        let state = ServerState::new();
        assert_eq!(run(&state, &["SELECT", "0"]), Frame::Simple("OK".into()));
        assert!(matches!(run(&state, &["SELECT", "3"]), Frame::Error(_)));
        assert!(matches!(run(&state, &["AUTH", "pw"]), Frame::Error(_)));

        let args = [Bytes::from_static(b"QUIT")];
        assert_eq!(execute(&state, &args), (Frame::Simple("OK".into()), true));
    }

    #[test]
    fn info_reports_engine_and_keyspace() {
        let state = ServerState::new();
        run(&state, &["SET", "a", "1"]);
        let Frame::Bulk(text) = run(&state, &["INFO"]) else {
            panic!("INFO must return a bulk string");
        };
        let text = std::str::from_utf8(&text).unwrap();
        assert!(text.contains("engine:recordkv"));
        assert!(text.contains("db0:keys=1"));
    }
}
