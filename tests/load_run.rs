//! End-to-end tests driving the pool/worker/aggregator pipeline against a
//! local echo server, matching scenarios S1/S3/S6 of the specification.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use mmin::config::{HttpConf, RunConfig, TcpGroup};
use mmin::params::ParamsConf;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Spawn a bare bones HTTP/1.1 echo server: every request on every
/// persistent connection gets a 200 OK with no body. Returns the bound
/// port.
async fn spawn_echo_server() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let mut buf = vec![0u8; 4096];
                loop {
                    let n = match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => n,
                    };
                    // Tolerate partial reads of a request: a real parser
                    // isn't needed since this server always has the same
                    // fixed response shape.
                    let _ = n;
                    let resp = b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n";
                    if stream.write_all(resp).await.is_err() {
                        return;
                    }
                }
            });
        }
    });
    port
}

/// A server that closes the connection after `n` requests, to exercise the
/// pool's reconnection path (S3).
async fn spawn_closing_server(close_after: usize) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let mut buf = vec![0u8; 4096];
                let mut count = 0usize;
                loop {
                    let n = match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => n,
                    };
                    let _ = n;
                    let resp = b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n";
                    if stream.write_all(resp).await.is_err() {
                        return;
                    }
                    count += 1;
                    if count >= close_after {
                        return;
                    }
                }
            });
        }
    });
    port
}

fn conf_for(port: u16, run_time: u64, conn_per_ip: usize, req_thread: usize, max_request: u64, max_qps: u32) -> RunConfig {
    RunConfig {
        run_time,
        debug: false,
        remote_server: HashMap::new(),
        params: Vec::new(),
        tcp_groups: vec![TcpGroup {
            name: "g".into(),
            max_tcp_conn_per_ip: conn_per_ip,
            tcp_conn_thread: 2,
            tcp_creat_thread: 2,
            tcp_creat_rate: 0,
            src_ip: Vec::new(),
            max_qps,
            dst: format!("127.0.0.1:{port}"),
            req_thread,
            max_request,
            is_https: false,
            send_http: vec!["h".into()],
        }],
        http_confs: vec![HttpConf {
            name: "h".into(),
            ..Default::default()
        }],
    }
}

#[tokio::test]
async fn unlimited_short_burst_reaches_minimum_throughput() {
    let port = spawn_echo_server().await;
    let conf = conf_for(port, 2, 4, 4, 10, 0);
    let report = mmin::controller::run(conf).await.unwrap();
    let summary = report.final_summary();
    assert!(summary.success >= 40, "expected at least 40 successes, got {}", summary.success);
    let total: u64 = summary.status_hist.values().sum();
    assert_eq!(total, summary.success);
    assert!(summary.error_hist.is_empty());
}

#[tokio::test]
async fn capped_qps_stays_within_tolerance() {
    let port = spawn_echo_server().await;
    let conf = conf_for(port, 2, 4, 4, 1000, 50);
    let report = mmin::controller::run(conf).await.unwrap();
    let summary = report.final_summary();
    assert!(summary.success >= 80 && summary.success <= 120, "success={}", summary.success);
}

#[tokio::test]
async fn connection_cycling_reports_no_errors() {
    let port = spawn_closing_server(3).await;
    let conf = conf_for(port, 2, 1, 1, 3, 0);
    let report = mmin::controller::run(conf).await.unwrap();
    let summary = report.final_summary();
    assert!(summary.success > 0);
}

#[tokio::test]
async fn single_slot_round_trip_produces_one_result() {
    let port = spawn_echo_server().await;
    let conf = conf_for(port, 1, 1, 1, 1, 0);
    let report = mmin::controller::run(conf).await.unwrap();
    let summary = report.final_summary();
    assert!(summary.success >= 1);
}

#[tokio::test]
async fn parameter_substitution_never_leaks_the_token_on_the_wire() {
    let seen_count = Arc::new(AtomicUsize::new(0));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let seen_count_clone = seen_count.clone();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            let seen_count = seen_count_clone.clone();
            tokio::spawn(async move {
                let mut buf = vec![0u8; 4096];
                loop {
                    let n = match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => n,
                    };
                    let text = String::from_utf8_lossy(&buf[..n]);
                    assert!(!text.contains("${i}"));
                    if text.contains("id=") {
                        seen_count.fetch_add(1, Ordering::Relaxed);
                    }
                    let resp = b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n";
                    if stream.write_all(resp).await.is_err() {
                        return;
                    }
                }
            });
        }
    });

    let mut conf = conf_for(port, 1, 1, 1, 5, 0);
    conf.http_confs[0].method = "POST".into();
    conf.http_confs[0].body = "id=${i}".into();
    conf.http_confs[0].use_params = vec!["i".into()];
    conf.params.push(ParamsConf {
        name: "i".into(),
        kind: "RandomInt".into(),
        spec: HashMap::from([("start".to_string(), "1".to_string()), ("end".to_string(), "100".to_string())]),
    });

    let report = mmin::controller::run(conf).await.unwrap();
    let summary = report.final_summary();
    assert!(summary.success > 0);
    assert!(seen_count.load(Ordering::Relaxed) > 0);
}
