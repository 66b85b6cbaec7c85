//! Integration tests for the server startup / shutdown lifecycle.
//!
//! Each test spins up a real receiver on an ephemeral port via
//! [`run_server_with_config`], exercises it over HTTP, and shuts it down.

use std::sync::Arc;

use hookrelay::config::Config;
use hookrelay::hooks::StaticAllowList;
use hookrelay::server::startup::{run_server_with_config, ServerConfig, ServerHandle};

async fn start_server(config: ServerConfig) -> ServerHandle {
    run_server_with_config(config).await.unwrap()
}

/// Spin up a lightweight test server with all defaults.
async fn start_test_server() -> ServerHandle {
    start_server(ServerConfig::for_testing(Config::missing())).await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_server_starts_and_binds() {
    let handle = start_test_server().await;
    assert_ne!(handle.port(), 0, "OS should assign a non-zero port");
    handle.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_status_endpoint_responds() {
    let handle = start_test_server().await;
    let url = format!("{}/status", handle.base_url());

    let resp = reqwest::get(&url).await.expect("GET /status failed");
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body, serde_json::json!({ "status": "ok" }));

    handle.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_nonexistent_route_returns_404() {
    let handle = start_test_server().await;
    let url = format!("{}/does-not-exist", handle.base_url());

    let resp = reqwest::get(&url).await.expect("GET failed");
    assert_eq!(resp.status(), 404);

    handle.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_get_root_returns_405() {
    let handle = start_test_server().await;
    let resp = reqwest::get(handle.base_url()).await.unwrap();
    assert_eq!(resp.status(), 405);
    handle.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_ping_over_the_wire() {
    let handle = start_test_server().await;
    let resp = reqwest::Client::new()
        .post(handle.base_url())
        .header("X-GitHub-Event", "ping")
        .body(r#"{"zen":"Design for failure."}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["msg"], "pong");
    handle.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_peer_address_checked_against_allow_list() {
    let config = Config {
        github_ips_only: true,
        ..Config::missing()
    };

    // Loopback peer, empty allow-list: rejected.
    let handle = start_test_server_with(config.clone(), &[]).await;
    let resp = reqwest::Client::new()
        .post(handle.base_url())
        .body("{}")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);
    handle.shutdown().await;

    // Loopback peer, loopback range allowed.
    let handle = start_test_server_with(config, &["127.0.0.0/8", "::1/128"]).await;
    let resp = reqwest::Client::new()
        .post(handle.base_url())
        .body("{}")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    handle.shutdown().await;
}

async fn start_test_server_with(config: Config, ranges: &[&str]) -> ServerHandle {
    let mut server_config = ServerConfig::for_testing(config);
    server_config.allow_list = Arc::new(StaticAllowList::from_cidrs(ranges).unwrap());
    start_server(server_config).await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_server_stops_accepting_after_shutdown() {
    let handle = start_test_server().await;
    let url = format!("{}/status", handle.base_url());
    handle.shutdown().await;

    let result = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(2))
        .build()
        .unwrap()
        .get(&url)
        .send()
        .await;
    assert!(result.is_err(), "server should no longer accept connections");
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_push_dispatches_hook_end_to_end() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::TempDir::new().unwrap();
    let hook = dir.path().join("push-repo1");
    std::fs::write(&hook, "#!/bin/sh\necho \"$3 $4\"\n").unwrap();
    std::fs::set_permissions(&hook, std::fs::Permissions::from_mode(0o755)).unwrap();

    let config = Config {
        hooks_path: dir.path().to_path_buf(),
        return_scripts_info: true,
        ..Config::missing()
    };
    let handle = start_server(ServerConfig::for_testing(config)).await;

    let resp = reqwest::Client::new()
        .post(handle.base_url())
        .header("X-GitHub-Event", "push")
        .body(r#"{"ref":"refs/heads/main","repository":{"name":"repo1"}}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["push-repo1"]["returncode"], 0);
    assert_eq!(body["push-repo1"]["stdout"], "repo1 main\n");

    handle.shutdown().await;
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_dispatch_finishes_after_client_disconnects() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::TempDir::new().unwrap();
    let first_output = dir.path().join("first-output");
    let second_marker = dir.path().join("second-ran");
    for (name, body) in [
        (
            "push-repo1",
            format!("sleep 2\ncat \"$1\" > {}", first_output.display()),
        ),
        ("push", format!("touch {}", second_marker.display())),
    ] {
        let hook = dir.path().join(name);
        std::fs::write(&hook, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&hook, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    let config = Config {
        hooks_path: dir.path().to_path_buf(),
        return_scripts_info: true,
        ..Config::missing()
    };
    let handle = start_server(ServerConfig::for_testing(config)).await;

    let payload = r#"{"ref":"refs/heads/main","repository":{"name":"repo1"}}"#;
    let result = reqwest::Client::builder()
        .timeout(std::time::Duration::from_millis(800))
        .build()
        .unwrap()
        .post(handle.base_url())
        .header("X-GitHub-Event", "push")
        .body(payload)
        .send()
        .await;
    assert!(result.is_err(), "client should give up before the hooks finish");

    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(10);
    while !second_marker.exists() && std::time::Instant::now() < deadline {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
    assert!(second_marker.exists(), "later hook should still run");

    // The payload file outlived the request, so the first hook read it intact.
    let copied: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&first_output).unwrap()).unwrap();
    let sent: serde_json::Value = serde_json::from_str(payload).unwrap();
    assert_eq!(copied, sent);

    handle.shutdown().await;
}
