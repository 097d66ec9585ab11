//! End-to-end tests over TCP against an in-process memcache stand-in.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use memcache_conn::connection::{CacheConnection, ConnectionConfig, ConnectionState};
use memcache_conn::{CacheError, ServerIdentity};

type Store = Arc<Mutex<HashMap<String, (u32, Vec<u8>)>>>;

/// Start a tiny memcache server on an ephemeral port.
fn spawn_server() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let store: Store = Arc::default();

    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(stream) = stream else { return };
            let store = store.clone();
            thread::spawn(move || serve(stream, store));
        }
    });
    port
}

fn serve(stream: TcpStream, store: Store) {
    let mut writer = stream.try_clone().unwrap();
    let mut reader = BufReader::new(stream);
    let mut line = String::new();

    loop {
        line.clear();
        if reader.read_line(&mut line).unwrap_or(0) == 0 {
            return;
        }
        let words: Vec<&str> = line.trim_end().split(' ').collect();
        let mut out = Vec::new();

        match words[0] {
            "get" => {
                let store = store.lock().unwrap();
                for key in &words[1..] {
                    if let Some((flags, data)) = store.get(*key) {
                        out.extend_from_slice(format!("VALUE {key} {flags} {}\r\n", data.len()).as_bytes());
                        out.extend_from_slice(data);
                        out.extend_from_slice(b"\r\n");
                    }
                }
                out.extend_from_slice(b"END\r\n");
            }
            verb @ ("set" | "add") => {
                let key = words[1].to_string();
                let flags: u32 = words[2].parse().unwrap();
                let len: usize = words[4].parse().unwrap();
                let mut data = vec![0u8; len + 2];
                reader.read_exact(&mut data).unwrap();
                data.truncate(len);

                let mut store = store.lock().unwrap();
                if verb == "add" && store.contains_key(&key) {
                    out.extend_from_slice(b"NOT_STORED\r\n");
                } else {
                    store.insert(key, (flags, data));
                    out.extend_from_slice(b"STORED\r\n");
                }
            }
            _ => out.extend_from_slice(b"ERROR\r\n"),
        }

        if writer.write_all(&out).is_err() {
            return;
        }
    }
}

fn config() -> Arc<ConnectionConfig> {
    Arc::new(
        ConnectionConfig::default()
            .with_read_timeout(Duration::from_millis(500))
            .with_retry_delay(Duration::from_secs(5)),
    )
}

#[test]
fn test_roundtrip_over_tcp() {
    let port = spawn_server();
    let conn = CacheConnection::new(ServerIdentity::new("127.0.0.1", port), config()).unwrap();

    let payload = vec![0u8, 1, 2, b'\r', b'\n', 255];
    assert!(conn.set("bin", payload.clone(), 42, 0).unwrap());
    assert!(conn.set("text", "hello", 0, 0).unwrap());
    assert!(!conn.add("text", "again", 0, 0).unwrap());

    let value = conn.lookup("bin").unwrap().unwrap();
    assert_eq!(value.flags, 42);
    assert_eq!(value.data.as_ref(), payload.as_slice());
    assert_eq!(conn.lookup("missing").unwrap(), None);

    let values = conn.lookup_many(&["bin", "text", "missing"]).unwrap();
    assert_eq!(values.len(), 2);
    assert_eq!(values["text"].data.as_ref(), b"hello");

    let stats = conn.stats().unwrap();
    assert_eq!(stats.state, ConnectionState::Connected);
    assert_eq!(stats.connect_count, 1);
    assert_eq!(stats.requests_written, 6);

    conn.shutdown();
}

#[test]
fn test_many_callers_share_one_connection() {
    let port = spawn_server();
    let conn = Arc::new(
        CacheConnection::new(ServerIdentity::new("127.0.0.1", port), config()).unwrap(),
    );

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let conn = conn.clone();
            thread::spawn(move || {
                for j in 0..20 {
                    let key = format!("k{i}-{j}");
                    assert!(conn.set(&key, key.clone(), 0, 0).unwrap());
                    let value = conn.lookup(&key).unwrap().unwrap();
                    assert_eq!(value.data.as_ref(), key.as_bytes());
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(conn.stats().unwrap().connect_count, 1);
}

#[test]
fn test_unreachable_server_backs_off() {
    let port = TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let conn = CacheConnection::new(ServerIdentity::new("127.0.0.1", port), config()).unwrap();

    assert!(matches!(conn.lookup("k"), Err(CacheError::ConnectionOffline)));
    assert!(matches!(conn.set("k", "v", 0, 0), Err(CacheError::ConnectionOffline)));

    let stats = conn.stats().unwrap();
    assert!(stats.state.is_backing_off());
    assert_eq!(stats.failure_count, 1);
}

#[test]
fn test_silent_server_times_out() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    thread::spawn(move || {
        let mut held = Vec::new();
        for stream in listener.incoming() {
            // Accept and never answer.
            held.push(stream);
        }
    });

    let config = Arc::new(
        ConnectionConfig::default().with_read_timeout(Duration::from_millis(100)),
    );
    let conn = CacheConnection::new(ServerIdentity::new("127.0.0.1", port), config).unwrap();

    assert!(matches!(conn.lookup("k"), Err(CacheError::Timeout)));
    assert_eq!(conn.state().unwrap(), ConnectionState::NotConnected);

    // No backoff after a timeout: the next command connects again.
    assert!(matches!(conn.lookup("k"), Err(CacheError::Timeout)));
    assert_eq!(conn.stats().unwrap().connect_count, 2);
}

#[test]
fn test_oversized_value_header_is_protocol_error() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(stream) = stream else { return };
            let mut writer = stream.try_clone().unwrap();
            let mut reader = BufReader::new(stream);
            let mut line = String::new();
            while reader.read_line(&mut line).unwrap_or(0) > 0 {
                line.clear();
                let _ = writer.write_all(b"VALUE k 0 18446744073709551615\r\nab\r\n");
            }
        }
    });

    let conn = CacheConnection::new(ServerIdentity::new("127.0.0.1", port), config()).unwrap();
    assert!(matches!(conn.lookup("k"), Err(CacheError::Protocol(_))));
    assert_eq!(conn.state().unwrap(), ConnectionState::NotConnected);
}
