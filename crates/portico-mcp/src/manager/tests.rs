use std::collections::VecDeque;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::AtomicUsize;

use super::*;
use crate::classify::ErrorType;
use crate::server::{CustomConfig, ServerKind};
use crate::transport::BoxFuture;

#[derive(Debug, Clone)]
enum Step {
    Ready(Vec<&'static str>),
    OpenFail(&'static str),
    HandshakeFail(&'static str),
    SlowHandshake(Duration, Vec<&'static str>),
    Hang,
}

#[derive(Default)]
struct Script {
    opens: AtomicUsize,
    closes: AtomicUsize,
    plan: StdMutex<VecDeque<Step>>,
    fallback: StdMutex<Option<Step>>,
    refresh: StdMutex<Option<Result<Vec<&'static str>, &'static str>>>,
    ping_failure: StdMutex<Option<&'static str>>,
}

impl Script {
    fn with_plan(steps: impl IntoIterator<Item = Step>) -> Arc<Self> {
        let script = Self::default();
        script.plan.lock().unwrap().extend(steps);
        Arc::new(script)
    }

    fn next_step(&self) -> Step {
        self.plan.lock().unwrap().pop_front().unwrap_or_else(|| {
            self.fallback
                .lock()
                .unwrap()
                .clone()
                .unwrap_or_else(|| Step::Ready(vec!["read", "write"]))
        })
    }

    fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

struct ScriptedFactory(Arc<Script>);

impl TransportFactory for ScriptedFactory {
    fn open<'a>(
        &'a self,
        config: &'a ServerConfig,
    ) -> BoxFuture<'a, Result<Arc<dyn Transport>, McpError>> {
        Box::pin(async move {
            self.0.opens.fetch_add(1, Ordering::SeqCst);
            match self.0.next_step() {
                Step::OpenFail(message) => Err(McpError::Connection {
                    server_id: config.id.clone(),
                    message: message.into(),
                }),
                step => Ok(Arc::new(ScriptedTransport {
                    server_id: config.id.clone(),
                    step,
                    script: Arc::clone(&self.0),
                }) as Arc<dyn Transport>),
            }
        })
    }
}

struct ScriptedTransport {
    server_id: String,
    step: Step,
    script: Arc<Script>,
}

fn descriptors(names: &[&str]) -> Vec<ToolDescriptor> {
    names
        .iter()
        .map(|n| {
            ToolDescriptor::new(*n, format!("{n} tool"), serde_json::json!({"type": "object"}))
        })
        .collect()
}

impl Transport for ScriptedTransport {
    fn handshake(&self) -> BoxFuture<'_, Result<Vec<ToolDescriptor>, McpError>> {
        Box::pin(async move {
            match &self.step {
                Step::Ready(names) => Ok(descriptors(names)),
                Step::SlowHandshake(delay, names) => {
                    tokio::time::sleep(*delay).await;
                    Ok(descriptors(names))
                }
                Step::HandshakeFail(message) => Err(McpError::Handshake {
                    server_id: self.server_id.clone(),
                    message: (*message).into(),
                }),
                Step::Hang => std::future::pending().await,
                Step::OpenFail(_) => unreachable!("open failures never produce a transport"),
            }
        })
    }

    fn list_tools(&self) -> BoxFuture<'_, Result<Vec<ToolDescriptor>, McpError>> {
        Box::pin(async move {
            match self.script.refresh.lock().unwrap().take() {
                Some(Ok(names)) => Ok(descriptors(&names)),
                Some(Err(message)) => Err(McpError::ToolList {
                    server_id: self.server_id.clone(),
                    message: message.into(),
                }),
                None => Ok(descriptors(&["read", "write"])),
            }
        })
    }

    fn ping(&self) -> BoxFuture<'_, Result<(), McpError>> {
        Box::pin(async move {
            match self.script.ping_failure.lock().unwrap().take() {
                Some(message) => Err(McpError::Connection {
                    server_id: self.server_id.clone(),
                    message: message.into(),
                }),
                None => Ok(()),
            }
        })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.script.closes.fetch_add(1, Ordering::SeqCst);
        })
    }
}

fn fast_config() -> ManagerConfig {
    ManagerConfig {
        connect_timeout: Duration::from_secs(2),
        handshake_timeout: Duration::from_secs(2),
        retry_base_delay: Duration::from_millis(20),
        retry_max_delay: Duration::from_millis(80),
        max_auto_retries: 2,
        error_history_capacity: 10,
    }
}

fn server(id: &str) -> ServerConfig {
    ServerConfig::new(
        id,
        format!("{id} server"),
        ServerKind::Custom(CustomConfig {
            command: Some("scripted-server".into()),
            ..CustomConfig::default()
        }),
    )
    .enabled(true)
}

async fn manager_with(script: &Arc<Script>, config: ManagerConfig) -> ConnectionManager {
    let manager =
        ConnectionManager::with_factory(config, Arc::new(ScriptedFactory(Arc::clone(script))));
    manager.add_server(server("alpha")).await.unwrap();
    manager
}

async fn wait_for_state(manager: &ConnectionManager, id: &str, want: ConnectionState) {
    tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            if manager.state(id).await.unwrap() == want {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("{id} never reached {want}"));
}

#[tokio::test]
async fn connect_reaches_ready_and_publishes_tools() {
    let script = Script::with_plan([]);
    let manager = manager_with(&script, fast_config()).await;
    let (_sub, mut snapshots) = manager.broker().subscribe_channel();
    let mut events = manager.subscribe_state();

    let state = manager.connect("alpha").await.unwrap();
    assert_eq!(state, ConnectionState::Ready);

    let tools = manager.tools("alpha").await.unwrap();
    assert_eq!(tools.names().collect::<Vec<_>>(), ["read", "write"]);

    let published = snapshots.recv().await.unwrap();
    assert_eq!(published.server_id, "alpha");
    assert_eq!(published.len(), 2);

    let mut path = Vec::new();
    while let Ok(event) = events.try_recv() {
        path.push((event.from, event.to));
    }
    assert_eq!(
        path,
        [
            (ConnectionState::Disconnected, ConnectionState::Connecting),
            (ConnectionState::Connecting, ConnectionState::Handshaking),
            (ConnectionState::Handshaking, ConnectionState::Ready),
        ]
    );
}

#[tokio::test]
async fn concurrent_connects_share_one_attempt() {
    let script = Script::with_plan([Step::SlowHandshake(
        Duration::from_millis(50),
        vec!["read"],
    )]);
    let manager = manager_with(&script, fast_config()).await;

    let (a, b) = tokio::join!(manager.connect("alpha"), manager.connect("alpha"));
    assert_eq!(a.unwrap(), ConnectionState::Ready);
    assert_eq!(b.unwrap(), ConnectionState::Ready);
    assert_eq!(script.opens(), 1);
}

#[tokio::test]
async fn connect_when_ready_is_noop() {
    let script = Script::with_plan([]);
    let manager = manager_with(&script, fast_config()).await;
    manager.connect("alpha").await.unwrap();
    let generation = manager.tools("alpha").await.unwrap().generation;

    assert_eq!(manager.connect("alpha").await.unwrap(), ConnectionState::Ready);
    assert_eq!(script.opens(), 1);
    assert_eq!(manager.tools("alpha").await.unwrap().generation, generation);
}

#[tokio::test]
async fn zero_tools_is_still_ready() {
    let script = Script::with_plan([Step::Ready(Vec::new())]);
    let manager = manager_with(&script, fast_config()).await;
    assert_eq!(manager.connect("alpha").await.unwrap(), ConnectionState::Ready);
    assert!(manager.tools("alpha").await.unwrap().is_empty());
}

#[tokio::test]
async fn network_failure_retries_automatically() {
    let script = Script::with_plan([Step::OpenFail("connection refused")]);
    let manager = manager_with(&script, fast_config()).await;

    assert_eq!(manager.connect("alpha").await.unwrap(), ConnectionState::Error);
    wait_for_state(&manager, "alpha", ConnectionState::Ready).await;

    assert_eq!(script.opens(), 2);
    let history = manager.error_history("alpha").await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].error_type, ErrorType::Network);
    assert!(history[0].recoverable);
}

#[tokio::test]
async fn authentication_failure_waits_for_user() {
    let script = Script::with_plan([Step::HandshakeFail("HTTP 401 Unauthorized")]);
    let manager = manager_with(&script, fast_config()).await;

    assert_eq!(manager.connect("alpha").await.unwrap(), ConnectionState::Error);
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(manager.state("alpha").await.unwrap(), ConnectionState::Error);
    assert_eq!(script.opens(), 1);
    assert_eq!(script.closes(), 1);
    let history = manager.error_history("alpha").await.unwrap();
    assert_eq!(history[0].error_type, ErrorType::Authentication);
    assert!(!history[0].remediation_steps.is_empty());

    // An explicit retry from error is allowed.
    assert_eq!(manager.connect("alpha").await.unwrap(), ConnectionState::Ready);
}

#[tokio::test]
async fn automatic_retries_stop_at_limit() {
    let script = Script::with_plan([]);
    *script.fallback.lock().unwrap() = Some(Step::OpenFail("connection refused"));
    let manager = manager_with(&script, fast_config()).await;

    manager.connect("alpha").await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;

    // First attempt plus `max_auto_retries` retries.
    assert_eq!(script.opens(), 3);
    assert_eq!(manager.state("alpha").await.unwrap(), ConnectionState::Error);
    assert_eq!(manager.error_history("alpha").await.unwrap().len(), 3);
}

#[tokio::test]
async fn handshake_timeout_is_network_failure() {
    let script = Script::with_plan([Step::Hang]);
    let config = ManagerConfig {
        handshake_timeout: Duration::from_millis(50),
        max_auto_retries: 0,
        ..fast_config()
    };
    let manager = manager_with(&script, config).await;

    assert_eq!(manager.connect("alpha").await.unwrap(), ConnectionState::Error);
    let history = manager.error_history("alpha").await.unwrap();
    assert_eq!(history[0].error_type, ErrorType::Network);
    assert!(history[0].message.contains("handshake timed out"));
    assert_eq!(script.closes(), 1);
}

#[tokio::test]
async fn disconnect_cancels_pending_retry() {
    let script = Script::with_plan([Step::OpenFail("connection refused")]);
    let config = ManagerConfig {
        retry_base_delay: Duration::from_millis(150),
        ..fast_config()
    };
    let manager = manager_with(&script, config).await;

    assert_eq!(manager.connect("alpha").await.unwrap(), ConnectionState::Error);
    manager.disconnect("alpha").await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(manager.state("alpha").await.unwrap(), ConnectionState::Disconnected);
    assert_eq!(script.opens(), 1);
}

#[tokio::test]
async fn explicit_connect_replaces_pending_retry() {
    let script = Script::with_plan([Step::OpenFail("connection refused")]);
    let config = ManagerConfig {
        retry_base_delay: Duration::from_millis(150),
        ..fast_config()
    };
    let manager = manager_with(&script, config).await;

    manager.connect("alpha").await.unwrap();
    assert_eq!(manager.connect("alpha").await.unwrap(), ConnectionState::Ready);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(script.opens(), 2);
}

#[tokio::test]
async fn disconnect_during_handshake_discards_result() {
    let script = Script::with_plan([Step::SlowHandshake(
        Duration::from_millis(150),
        vec!["read"],
    )]);
    let manager = manager_with(&script, fast_config()).await;

    let pending = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.connect("alpha").await })
    };
    wait_for_state(&manager, "alpha", ConnectionState::Handshaking).await;
    manager.disconnect("alpha").await.unwrap();

    assert_eq!(pending.await.unwrap().unwrap(), ConnectionState::Disconnected);
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(manager.state("alpha").await.unwrap(), ConnectionState::Disconnected);
    assert!(manager.tools("alpha").await.unwrap().is_empty());
    assert_eq!(script.closes(), 1);
}

#[tokio::test]
async fn disconnect_from_ready_clears_tools() {
    let script = Script::with_plan([]);
    let manager = manager_with(&script, fast_config()).await;
    manager.connect("alpha").await.unwrap();
    let (_sub, mut snapshots) = manager.broker().subscribe_channel();

    manager.disconnect("alpha").await.unwrap();

    assert_eq!(manager.state("alpha").await.unwrap(), ConnectionState::Disconnected);
    assert!(snapshots.recv().await.unwrap().is_empty());
    assert_eq!(script.closes(), 1);
}

#[tokio::test]
async fn remove_is_safe_from_every_state() {
    let cases = [
        ("disconnected", Vec::new(), None),
        ("ready", Vec::new(), Some(ConnectionState::Ready)),
        ("error", vec![Step::HandshakeFail("bad credentials")], Some(ConnectionState::Error)),
        (
            "handshaking",
            vec![Step::SlowHandshake(Duration::from_secs(5), vec!["read"])],
            Some(ConnectionState::Handshaking),
        ),
    ];

    for (label, plan, reach) in cases {
        let script = Script::with_plan(plan);
        let manager = manager_with(&script, fast_config()).await;
        let mut events = manager.subscribe_state();

        if let Some(target) = reach {
            let background = manager.clone();
            tokio::spawn(async move { background.connect("alpha").await });
            wait_for_state(&manager, "alpha", target).await;
        }

        manager.remove("alpha").await.unwrap();

        let err = manager.state("alpha").await.unwrap_err();
        assert!(matches!(err, McpError::ServerNotFound { .. }), "{label}");
        assert!(manager.broker().latest("alpha").is_none(), "{label}");
        if reach.is_some() {
            let mut last = None;
            while let Ok(event) = events.try_recv() {
                last = Some(event.to);
            }
            assert_eq!(last, Some(ConnectionState::Disconnected), "{label}");
        }
    }
}

#[tokio::test]
async fn refresh_replaces_snapshot_atomically() {
    let script = Script::with_plan([]);
    let manager = manager_with(&script, fast_config()).await;
    manager.connect("alpha").await.unwrap();
    let before = manager.tools("alpha").await.unwrap();
    let (_sub, mut snapshots) = manager.broker().subscribe_channel();

    *script.refresh.lock().unwrap() = Some(Ok(vec!["read", "write", "search"]));
    let after = manager.refresh_tools("alpha").await.unwrap();

    assert_eq!(after.len(), 3);
    assert!(after.generation > before.generation);
    assert_ne!(after.fingerprint, before.fingerprint);
    assert_eq!(before.len(), 2, "old snapshot is never mutated");
    assert_eq!(snapshots.recv().await.unwrap().len(), 3);
    assert_eq!(manager.state("alpha").await.unwrap(), ConnectionState::Ready);
}

#[tokio::test]
async fn failed_refresh_moves_to_error() {
    let script = Script::with_plan([]);
    let config = ManagerConfig {
        max_auto_retries: 0,
        ..fast_config()
    };
    let manager = manager_with(&script, config).await;
    manager.connect("alpha").await.unwrap();

    *script.refresh.lock().unwrap() = Some(Err("connection reset by peer"));
    let err = manager.refresh_tools("alpha").await.unwrap_err();

    assert!(matches!(err, McpError::ToolList { .. }));
    assert_eq!(manager.state("alpha").await.unwrap(), ConnectionState::Error);
    assert!(manager.tools("alpha").await.unwrap().is_empty());
    assert_eq!(script.closes(), 1);
}

#[tokio::test]
async fn refresh_requires_ready() {
    let script = Script::with_plan([]);
    let manager = manager_with(&script, fast_config()).await;
    let err = manager.refresh_tools("alpha").await.unwrap_err();
    assert!(matches!(
        err,
        McpError::InvalidState {
            state: ConnectionState::Disconnected,
            ..
        }
    ));
    assert_eq!(err.classification().error_type, ErrorType::Configuration);
}

#[tokio::test]
async fn failed_health_check_moves_to_error() {
    let script = Script::with_plan([]);
    let config = ManagerConfig {
        max_auto_retries: 0,
        ..fast_config()
    };
    let manager = manager_with(&script, config).await;
    manager.connect("alpha").await.unwrap();

    assert_eq!(manager.check_health("alpha").await.unwrap(), ConnectionState::Ready);
    *script.ping_failure.lock().unwrap() = Some("broken pipe");
    assert_eq!(manager.check_health("alpha").await.unwrap(), ConnectionState::Error);
    assert_eq!(
        manager.error_history("alpha").await.unwrap()[0].error_type,
        ErrorType::Network
    );
}

#[tokio::test]
async fn test_probe_leaves_state_untouched() {
    let script = Script::with_plan([Step::Ready(vec!["a", "b", "c"])]);
    let manager = manager_with(&script, fast_config()).await;

    let report = manager.test("alpha").await.unwrap();
    assert!(report.success);
    assert_eq!(report.tool_count, 3);
    assert!(report.error.is_none());
    assert_eq!(manager.state("alpha").await.unwrap(), ConnectionState::Disconnected);
    assert!(manager.config("alpha").await.unwrap().enabled);
    assert_eq!(script.opens(), 1);
    assert_eq!(script.closes(), 1);
}

#[tokio::test]
async fn test_reports_classified_failure() {
    let script = Script::with_plan([Step::OpenFail("No such file or directory")]);
    let manager = manager_with(&script, fast_config()).await;

    let report = manager.test("alpha").await.unwrap();
    assert!(!report.success);
    let error = report.error.unwrap();
    assert_eq!(error.error_type, ErrorType::Resource);
    assert_eq!(error.server_id, "alpha");
    assert!(manager.error_history("alpha").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_uses_live_transport_when_ready() {
    let script = Script::with_plan([]);
    let manager = manager_with(&script, fast_config()).await;
    manager.connect("alpha").await.unwrap();

    let report = manager.test("alpha").await.unwrap();
    assert!(report.success);
    assert_eq!(script.opens(), 1);
    assert_eq!(manager.state("alpha").await.unwrap(), ConnectionState::Ready);
}

#[tokio::test]
async fn unknown_server_is_configuration_error() {
    let script = Script::with_plan([]);
    let manager = manager_with(&script, fast_config()).await;

    for err in [
        manager.connect("ghost").await.unwrap_err(),
        manager.disconnect("ghost").await.unwrap_err(),
        manager.remove("ghost").await.unwrap_err(),
        manager.test("ghost").await.unwrap_err(),
        manager.refresh_tools("ghost").await.unwrap_err(),
    ] {
        assert_eq!(err.classification().error_type, ErrorType::Configuration);
        assert_eq!(err.server_id(), "ghost");
    }
}

#[tokio::test]
async fn add_server_rejects_invalid_and_duplicate() {
    let script = Script::with_plan([]);
    let manager = manager_with(&script, fast_config()).await;

    let duplicate = manager.add_server(server("alpha")).await.unwrap_err();
    assert!(matches!(duplicate, McpError::DuplicateServer { .. }));

    let invalid =
        ServerConfig::new("broken", "Broken", ServerKind::Custom(CustomConfig::default()));
    let err = manager.add_server(invalid).await.unwrap_err();
    assert!(matches!(err, McpError::InvalidConfig { .. }));
    assert_eq!(manager.server_ids().await, ["alpha"]);
}

#[tokio::test]
async fn set_enabled_toggles_connection() {
    let script = Script::with_plan([]);
    let manager = manager_with(&script, fast_config()).await;
    manager.add_server(server("beta")).await.unwrap();

    assert_eq!(
        manager.set_enabled("beta", false).await.unwrap(),
        ConnectionState::Disconnected
    );
    assert!(!manager.config("beta").await.unwrap().enabled);
    assert_eq!(manager.set_enabled("beta", true).await.unwrap(), ConnectionState::Ready);
}

#[tokio::test]
async fn sync_servers_adds_updates_and_removes() {
    let script = Script::with_plan([]);
    let manager = manager_with(&script, fast_config()).await;
    manager.add_server(server("beta")).await.unwrap();
    manager.connect("alpha").await.unwrap();

    let mut changed = server("alpha");
    changed.kind = ServerKind::Custom(CustomConfig {
        command: Some("other-server".into()),
        ..CustomConfig::default()
    });
    let invalid = ServerConfig::new("delta", "Delta", ServerKind::Custom(CustomConfig::default()));

    let stats = manager
        .sync_servers(vec![changed, server("gamma"), invalid])
        .await;

    assert_eq!(stats.added, 1);
    assert_eq!(stats.updated, 1);
    assert_eq!(stats.removed, 1);
    assert_eq!(stats.rejected, ["delta"]);
    assert_eq!(manager.server_ids().await, ["alpha", "gamma"]);
    assert_eq!(manager.state("alpha").await.unwrap(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn connect_enabled_skips_disabled_servers() {
    let script = Script::with_plan([]);
    let manager = manager_with(&script, fast_config()).await;
    manager.add_server(server("beta").enabled(false)).await.unwrap();
    manager.add_server(server("gamma")).await.unwrap();

    let results = manager.connect_enabled().await;
    let ids: Vec<_> = results.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(ids, ["alpha", "gamma"]);
    assert!(results.iter().all(|(_, r)| matches!(r, Ok(ConnectionState::Ready))));
    assert_eq!(manager.state("beta").await.unwrap(), ConnectionState::Disconnected);

    manager.shutdown().await;
    assert_eq!(manager.state("alpha").await.unwrap(), ConnectionState::Disconnected);
    assert_eq!(manager.state("gamma").await.unwrap(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn servers_are_independent() {
    let script = Script::with_plan([
        Step::SlowHandshake(Duration::from_secs(5), vec!["read"]),
        Step::Ready(vec!["query"]),
    ]);
    let manager = manager_with(&script, fast_config()).await;
    manager.add_server(server("beta")).await.unwrap();

    let slow = manager.clone();
    tokio::spawn(async move { slow.connect("alpha").await });
    wait_for_state(&manager, "alpha", ConnectionState::Handshaking).await;

    let state = tokio::time::timeout(Duration::from_secs(1), manager.connect("beta"))
        .await
        .expect("beta must not wait on alpha")
        .unwrap();
    assert_eq!(state, ConnectionState::Ready);
    manager.remove("alpha").await.unwrap();
}

#[test]
fn retry_delay_doubles_and_caps() {
    let config = ManagerConfig {
        retry_base_delay: Duration::from_millis(100),
        retry_max_delay: Duration::from_millis(500),
        ..ManagerConfig::default()
    };
    assert_eq!(config.retry_delay(1), Duration::from_millis(100));
    assert_eq!(config.retry_delay(2), Duration::from_millis(200));
    assert_eq!(config.retry_delay(3), Duration::from_millis(400));
    assert_eq!(config.retry_delay(4), Duration::from_millis(500));
    assert_eq!(config.retry_delay(60), Duration::from_millis(500));
}

mod proptest_retry {
    use proptest::prelude::*;

    use super::*;

    proptest! {
        #[test]
        fn retry_delay_is_bounded_and_monotonic(
            base_ms in 1u64..5_000,
            max_ms in 1u64..120_000,
            failures in 1u32..64,
        ) {
            let config = ManagerConfig {
                retry_base_delay: Duration::from_millis(base_ms),
                retry_max_delay: Duration::from_millis(max_ms),
                ..ManagerConfig::default()
            };
            let delay = config.retry_delay(failures);
            prop_assert!(delay <= config.retry_max_delay);
            prop_assert!(config.retry_delay(failures + 1) >= delay);
        }
    }
}
