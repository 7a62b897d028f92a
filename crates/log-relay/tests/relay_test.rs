//! End-to-end tests for log-relay.
//!
//! Both sides of a session run in this process on loopback: a request
//! engine with the remote logging handlers stands in for the observed
//! process, and a capture session receives its records.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use command_protocol::{
    CodecKind, Command, ConnectionAddr, EngineRole, LogRecord, StartRemoteLogging,
    StopRemoteLogging,
};
use command_transport::{
    CommandEngine, Connection, EngineConfig, EngineHandle, PortAllocator, SharedPortAllocator,
};
use log_relay::{
    LogCapture, LogCaptureConfig, RelayError, RemoteLoggingService, SessionStart, SharedSink,
    StopSignal,
};
use observability::{LogEntry, LogTap};
use tokio::sync::mpsc;

const WAIT: Duration = Duration::from_secs(3);

fn connection() -> Connection {
    Connection::new(CodecKind::Json.build())
        .with_timeouts(Duration::from_secs(1), Duration::from_secs(2))
}

fn entry(message: &str) -> LogEntry {
    LogEntry {
        timestamp: "2026-05-04T10:00:00.000000Z".to_string(),
        level: "INFO".to_string(),
        service: "observed".to_string(),
        pid: 99,
        target: "observed::work".to_string(),
        message: message.to_string(),
        fields: BTreeMap::from([("step".to_string(), serde_json::json!(1))]),
        span: None,
    }
}

fn unused_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// Observed side: request engine with remote logging handlers.
async fn observed_process(
    allocator: SharedPortAllocator,
    tap: LogTap,
) -> (EngineHandle, RemoteLoggingService) {
    let engine = CommandEngine::new(
        EngineConfig::new(EngineRole::Request),
        CodecKind::Json.build(),
        allocator,
    );
    let service = RemoteLoggingService::new(tap, Arc::new(connection()));
    service.register(&engine).await;
    (engine.start().unwrap(), service)
}

async fn wait_until(mut check: impl FnMut() -> bool) -> bool {
    tokio::time::timeout(WAIT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .is_ok()
}

async fn recv(rx: &mut mpsc::UnboundedReceiver<LogRecord>) -> LogRecord {
    tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap()
}

#[tokio::test]
async fn test_capture_session_end_to_end() {
    let allocator = PortAllocator::new("127.0.0.1").shared();
    let tap = LogTap::default();
    let (remote, service) = observed_process(Arc::clone(&allocator), tap.clone()).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let sink: SharedSink = Arc::new(tx);
    let capture = LogCapture::start(
        LogCaptureConfig::new(remote.address().clone()),
        connection(),
        Arc::clone(&allocator),
        sink,
    )
    .await
    .unwrap();

    let callback = capture.address().clone();
    assert_ne!(callback.port, remote.port());
    assert!(service.is_active(&callback));

    tap.publish(entry("first"));
    tap.publish(entry("second"));
    let first = recv(&mut rx).await;
    let second = recv(&mut rx).await;
    assert_eq!(first.message, "first");
    assert_eq!(first.service, "observed");
    assert_eq!(first.fields["step"], "1");
    assert_eq!(second.message, "second");

    let stop = StopSignal::new();
    let capture_engine = capture.engine().clone();
    let session = tokio::spawn(capture.run_until(stop.clone()));
    stop.stop();
    tokio::time::timeout(WAIT, session).await.unwrap().unwrap().unwrap();

    assert!(!capture_engine.is_running());
    assert!(allocator.holder(callback.port).is_none());
    assert!(wait_until(|| !service.is_active(&callback)).await);
    assert!(remote.is_running());

    remote.stop().await.unwrap();
    assert!(remote.wait_stopped_timeout(WAIT).await);
    assert!(allocator.leases().is_empty());
}

#[tokio::test]
async fn test_capture_fails_when_remote_is_unreachable() {
    let allocator = PortAllocator::new("127.0.0.1").shared();
    let (tx, _rx) = mpsc::unbounded_channel::<LogRecord>();

    let result = LogCapture::start(
        LogCaptureConfig::new(ConnectionAddr::localhost(unused_port())),
        connection(),
        Arc::clone(&allocator),
        Arc::new(tx),
    )
    .await;

    match result {
        Err(RelayError::StartFailed { source, .. }) => assert!(source.is_network_failure()),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("capture should not start"),
    }
    assert!(allocator.leases().is_empty());
}

#[tokio::test]
async fn test_capture_fails_when_remote_rejects() {
    let allocator = PortAllocator::new("127.0.0.1").shared();
    // A plain engine without remote logging handlers.
    let remote = CommandEngine::new(
        EngineConfig::new(EngineRole::Request),
        CodecKind::Json.build(),
        Arc::clone(&allocator),
    )
    .start()
    .unwrap();
    let (tx, _rx) = mpsc::unbounded_channel::<LogRecord>();

    let result = LogCapture::start(
        LogCaptureConfig::new(remote.address().clone()),
        connection(),
        Arc::clone(&allocator),
        Arc::new(tx),
    )
    .await;

    match result {
        Err(RelayError::StartFailed { source, .. }) => assert!(source.is_remote_rejection()),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("capture should not start"),
    }
    assert_eq!(allocator.leases().len(), 1);

    remote.stop().await.unwrap();
}

#[tokio::test]
async fn test_capture_ends_when_local_engine_is_stopped_externally() {
    let allocator = PortAllocator::new("127.0.0.1").shared();
    let tap = LogTap::default();
    let (remote, service) = observed_process(Arc::clone(&allocator), tap).await;
    let (tx, _rx) = mpsc::unbounded_channel::<LogRecord>();

    let capture = LogCapture::start(
        LogCaptureConfig::new(remote.address().clone()),
        connection(),
        Arc::clone(&allocator),
        Arc::new(tx),
    )
    .await
    .unwrap();
    let callback = capture.address().clone();

    connection()
        .send_request(&callback, Command::stop_engine(EngineRole::Response))
        .await
        .unwrap();

    tokio::time::timeout(WAIT, capture.run_until(StopSignal::new()))
        .await
        .unwrap()
        .unwrap();
    assert!(wait_until(|| !service.is_active(&callback)).await);

    remote.stop().await.unwrap();
}

#[tokio::test]
async fn test_session_ends_after_too_many_failures() {
    let tap = LogTap::default();
    let service = RemoteLoggingService::new(tap.clone(), Arc::new(connection()));
    let dead = ConnectionAddr::localhost(unused_port());

    let outcome = service.start(StartRemoteLogging {
        callback: dead.clone(),
        install_listener: true,
        max_failures: 2,
    });
    assert_eq!(outcome, SessionStart::Started);

    for i in 0..3 {
        tap.publish(entry(&format!("lost {i}")));
    }
    assert!(wait_until(|| !service.is_active(&dead)).await);
    assert!(service.active_sessions().is_empty());
}

#[tokio::test]
async fn test_install_listener_controls_session_reuse() {
    let service = RemoteLoggingService::new(LogTap::default(), Arc::new(connection()));
    let callback = ConnectionAddr::localhost(unused_port());
    let request = |install_listener| StartRemoteLogging {
        callback: callback.clone(),
        install_listener,
        max_failures: -1,
    };

    assert_eq!(service.start(request(false)), SessionStart::Started);
    assert_eq!(service.start(request(false)), SessionStart::Reused);
    assert_eq!(service.start(request(true)), SessionStart::Replaced);
    assert_eq!(service.active_sessions(), vec![callback.clone()]);

    assert!(service.stop(&callback));
    assert!(!service.stop(&callback));
    assert!(!service.is_active(&callback));
}

#[tokio::test]
async fn test_stop_remote_logging_command_ends_session() {
    let allocator = PortAllocator::new("127.0.0.1").shared();
    let (remote, service) = observed_process(allocator, LogTap::default()).await;
    let callback = ConnectionAddr::localhost(unused_port());

    connection()
        .send_request(
            remote.address(),
            Command::StartRemoteLogging(StartRemoteLogging {
                callback: callback.clone(),
                install_listener: false,
                max_failures: -1,
            }),
        )
        .await
        .unwrap();
    assert!(service.is_active(&callback));

    connection()
        .send_request(
            remote.address(),
            Command::StopRemoteLogging(StopRemoteLogging {
                callback: callback.clone(),
            }),
        )
        .await
        .unwrap();
    assert!(!service.is_active(&callback));

    remote.stop().await.unwrap();
}

#[tokio::test]
async fn test_start_remote_logging_to_receiving_engine_is_rejected() {
    let allocator = PortAllocator::new("127.0.0.1").shared();
    let (remote, service) = observed_process(allocator, LogTap::default()).await;

    // Hand-built envelope: the connection refuses self-addressed commands.
    let command = Command::StartRemoteLogging(StartRemoteLogging {
        callback: remote.address().clone(),
        install_listener: false,
        max_failures: -1,
    });
    let err = connection()
        .send(remote.address(), command_protocol::Envelope::request(command))
        .await
        .unwrap_err();
    assert!(err.is_remote_rejection(), "unexpected error: {err}");
    assert!(service.active_sessions().is_empty());

    remote.stop().await.unwrap();
}

#[tokio::test]
async fn test_wildcard_local_host_needs_advertised_host() {
    let allocator = PortAllocator::new("127.0.0.1").shared();
    let (remote, service) = observed_process(Arc::clone(&allocator), LogTap::default()).await;
    let (tx, _rx) = mpsc::unbounded_channel::<LogRecord>();

    let mut config = LogCaptureConfig::new(remote.address().clone());
    config.local_host = "0.0.0.0".to_string();
    let result = LogCapture::start(config, connection(), Arc::clone(&allocator), Arc::new(tx)).await;

    match result {
        Err(RelayError::UnreachableCallback { host }) => assert_eq!(host, "0.0.0.0"),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("capture should not start"),
    }
    assert!(service.active_sessions().is_empty());
    assert_eq!(allocator.leases().len(), 1);

    remote.stop().await.unwrap();
}

#[tokio::test]
async fn test_wildcard_local_host_advertises_configured_host() {
    let allocator = PortAllocator::new("127.0.0.1").shared();
    let (remote, service) = observed_process(Arc::clone(&allocator), LogTap::default()).await;
    let (tx, _rx) = mpsc::unbounded_channel::<LogRecord>();

    let mut config = LogCaptureConfig::new(remote.address().clone());
    config.local_host = "0.0.0.0".to_string();
    config.advertised_host = Some("127.0.0.1".to_string());
    let capture = LogCapture::start(config, connection(), Arc::clone(&allocator), Arc::new(tx))
        .await
        .unwrap();

    let callback = capture.address().clone();
    assert_eq!(callback.host, "127.0.0.1");
    assert!(service.is_active(&callback));

    capture.shutdown().await;
    assert!(wait_until(|| !service.is_active(&callback)).await);
    assert!(allocator.holder(callback.port).is_none());

    remote.stop().await.unwrap();
}
