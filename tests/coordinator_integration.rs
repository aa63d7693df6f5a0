//! Integration tests for lazy, coalescing loads against a live HTTP remote.

use std::time::Duration;

use federator_core::{
    ErrorKind, HttpRemoteLoader, LoadError, LoadState, NetworkFailure, RemoteDirectory,
    RemoteEntry, Shell, UnitCatalog, View,
};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

mod support;
use support::socket_guard::start_mock_server_or_skip;

fn catalog() -> UnitCatalog {
    let mut catalog = UnitCatalog::new();
    catalog.register_static("app1/App", "Dashboard");
    catalog.register_static("app1/Widget", "Widget");
    catalog.register_static("app2/App", "Users");
    catalog
}

fn shell_for(server: &MockServer, timeout: Duration) -> Shell {
    let mut remotes = RemoteDirectory::new();
    for id in ["app1", "app2"] {
        remotes.insert(
            RemoteEntry::parse(id, &format!("{id}@{}/{id}/remoteEntry.json", server.uri()))
                .unwrap(),
        );
    }
    Shell::builder("host")
        .remotes(remotes)
        .fetch_timeout(timeout)
        .loader(HttpRemoteLoader::new(catalog()).unwrap())
        .build()
        .unwrap()
}

fn app1_manifest() -> serde_json::Value {
    json!({
        "name": "app1",
        "exposes": { "./App": "app1/App", "./Widget": "app1/Widget" },
        "shared": [ { "name": "react", "version": "18.2.0", "singleton": true } ]
    })
}

#[tokio::test]
async fn test_timeout_reaches_every_concurrent_caller_as_network_failure() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/app2/remoteEntry.json"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "name": "app2", "exposes": { "./App": "app2/App" } }))
                .set_delay(Duration::from_secs(3)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let shell = shell_for(&server, Duration::from_millis(300));
    let mut first = shell.coordinator().load("app2", "./App");
    let mut second = shell.coordinator().load("app2", "./App");
    assert!(matches!(second.state(), LoadState::Pending));

    let (a, b) = tokio::join!(first.wait(), second.wait());
    for state in [&a, &b] {
        let error = state.error().expect("load should fail");
        assert_eq!(error.kind(), ErrorKind::Network);
        match error {
            LoadError::Fetch(fetch) => {
                assert_eq!(fetch.network_failure(), Some(NetworkFailure::Timeout));
            }
            other => panic!("expected fetch error, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_concurrent_loads_issue_one_request() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/app1/remoteEntry.json"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(app1_manifest())
                .set_delay(Duration::from_millis(100)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let shell = shell_for(&server, Duration::from_secs(5));
    let mut handles: Vec<_> = (0..4)
        .map(|_| shell.coordinator().load("app1", "./App"))
        .collect();
    let mut widget = shell.coordinator().load("app1", "./Widget");

    for handle in &mut handles {
        assert!(matches!(handle.wait().await, LoadState::Ready(_)));
    }
    assert!(matches!(widget.wait().await, LoadState::Ready(_)));
    assert_eq!(shell.coordinator().len(), 2);
}

#[tokio::test]
async fn test_retry_after_failure_uses_fresh_epoch() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/app1/remoteEntry.json"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/app1/remoteEntry.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(app1_manifest()))
        .mount(&server)
        .await;

    let shell = shell_for(&server, Duration::from_secs(5));

    let mut mount = shell.mount("app1", "./App");
    let failed = mount.settle().await;
    assert!(matches!(failed, View::LoadFailed { .. }));

    // A plain load of a failed key keeps reporting the terminal failure.
    let again = shell.coordinator().load("app1", "./App");
    assert_eq!(again.epoch(), 0);
    assert!(again.state().error().is_some());

    let mut remount = shell.remount("app1", "./App");
    let view = remount.settle().await;
    assert_eq!(view.to_string(), "app1/./App: rendered Dashboard [react@18.2.0]");

    let handle = shell.coordinator().load("app1", "./App");
    assert_eq!(handle.epoch(), 1);
    assert!(failed.is_fallback());
}

#[tokio::test]
async fn test_dropped_mount_still_populates_cache() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/app1/remoteEntry.json"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(app1_manifest())
                .set_delay(Duration::from_millis(50)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let shell = shell_for(&server, Duration::from_secs(5));
    drop(shell.mount("app1", "./App"));

    let mut later = shell.coordinator().load("app1", "./App");
    assert!(matches!(later.wait().await, LoadState::Ready(_)));
    assert!(shell.ledger().entry("react").is_some());
}
