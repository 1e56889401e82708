//! # Adapter over RESP Integration Tests
//!
//! Purpose: Drive the adapter and the blocking RESP client against a live
//! `rkv-server` on an ephemeral port.
//!
//! ## Design Principles
//!
//! 1. **End-to-End**: Records travel adapter -> client -> socket -> server.
//! 2. **Isolated Server**: Each test gets its own server and runtime.
//! 3. **Blocking Callers**: Tests run on plain threads, the way a pipeline
//!    would call the adapter.

use std::net::SocketAddr;
use std::sync::{mpsc, Arc};
use std::thread;

use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use rkv_adapter::{AdapterBuilder, Error, KvStore, RespClient, SerializerKind, StoreOptions};
use rkv_server::{server, ServerState};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Reading {
    record_id: String,
    sensor: String,
    values: Vec<f64>,
}

fn reading(id: &str) -> Reading {
    Reading {
        record_id: id.to_string(),
        sensor: format!("sensor-{id}"),
        values: vec![1.5, -2.0, 1e9],
    }
}

struct TestServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl TestServer {
    fn start() -> Self {
        let (addr_tx, addr_rx) = mpsc::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let handle = thread::spawn(move || {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(2)
                .enable_all()
                .build()
                .unwrap();
            runtime.block_on(async move {
                let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
                addr_tx.send(listener.local_addr().unwrap()).unwrap();
                server::serve(listener, Arc::new(ServerState::new()), async move {
                    let _ = shutdown_rx.await;
                })
                .await
                .unwrap();
            });
        });
        TestServer {
            addr: addr_rx.recv().unwrap(),
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    fn address(&self) -> String {
        self.addr.to_string()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn sorted_ids<S: KvStore>(adapter: &rkv_adapter::KeyValueAdapter<Reading, S>) -> Vec<String> {
    let mut ids: Vec<String> = adapter.iterate().map(|r| r.unwrap().record_id).collect();
    ids.sort();
    ids
}

#[test]
fn client_speaks_to_server() {
    let server = TestServer::start();
    let client = RespClient::open(&server.address(), &StoreOptions::new()).unwrap();
    client.ping().unwrap();

    client.set("k", "v".into()).unwrap();
    assert_eq!(client.get("k").unwrap().as_deref(), Some(&b"v"[..]));
    assert!(client.exists("k").unwrap());
    assert!(client.delete("k").unwrap());
    assert_eq!(client.get("k").unwrap(), None);
}

#[test]
fn concrete_scenario_over_resp() {
    let server = TestServer::start();
    let adapter = AdapterBuilder::<Reading>::new(server.address())
        .key_template("rec:{record_id}")
        .scan_count(1)
        .connect()
        .unwrap();
    assert!(adapter.parallel_safe());

    adapter.set("a", &reading("a")).unwrap();
    adapter.set("b", &reading("b")).unwrap();

    assert_eq!(sorted_ids(&adapter), ["a", "b"]);
    assert_eq!(adapter.get("b").unwrap(), reading("b"));
    match adapter.get("c") {
        Err(Error::NotFound { record_id, key }) => {
            assert_eq!(record_id, "c");
            assert_eq!(key, "rec:c");
        }
        other => panic!("expected NotFound, got {other:?}"),
    }
}

#[test]
fn namespaces_share_one_server() {
    let server = TestServer::start();
    let records = AdapterBuilder::<Reading>::new(server.address())
        .key_template("rec:{record_id}")
        .connect()
        .unwrap();
    let users = AdapterBuilder::<Reading>::new(server.address())
        .key_template("user:{record_id}")
        .serializer_kind(SerializerKind::Json)
        .connect_unshared()
        .unwrap();
    assert!(!users.parallel_safe());

    for i in 0..30 {
        records.set(&format!("r{i:02}"), &reading("r")).unwrap();
    }
    users.set("u1", &reading("u1")).unwrap();

    assert_eq!(records.iterate().count(), 30);
    assert_eq!(sorted_ids(&users), ["u1"]);
    assert!(matches!(users.get("r00"), Err(Error::NotFound { .. })));
}

#[test]
fn shared_client_serves_many_threads() {
    let server = TestServer::start();
    let adapter = Arc::new(
        AdapterBuilder::<Reading>::new(server.address())
            .key_template("t:{record_id}")
            .connect()
            .unwrap(),
    );

    let workers: Vec<_> = (0..4)
        .map(|worker| {
            let adapter = Arc::clone(&adapter);
            thread::spawn(move || {
                for i in 0..10 {
                    let id = format!("{worker}-{i}");
                    adapter.set(&id, &reading(&id)).unwrap();
                    assert_eq!(adapter.get(&id).unwrap().record_id, id);
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }
    assert_eq!(adapter.iterate().count(), 40);
}

#[test]
fn server_rejects_password_and_foreign_db() {
    let server = TestServer::start();

    let adapter = AdapterBuilder::<Reading>::new(server.address())
        .store_option("password", "secret")
        .connect()
        .unwrap();
    assert!(matches!(adapter.get("a"), Err(Error::Store { .. })));

    let adapter = AdapterBuilder::<Reading>::new(server.address())
        .store_option("db", "2")
        .connect()
        .unwrap();
    assert!(matches!(adapter.set("a", &reading("a")), Err(Error::Store { .. })));
}
