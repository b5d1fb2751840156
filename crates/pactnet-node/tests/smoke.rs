//! End-to-end smoke test for pactnet-node.
//!
//! Starts a real node process with a fresh data directory, drives the
//! ledger and reputation over the REST surface, and asserts state changes.
//!
//! Run with:
//!   cargo test -p pactnet-node --test smoke

use std::net::TcpListener;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use pactnet_api::AuthService;
use pactnet_core::types::EntityId;

const JWT_SECRET: &str = "smoke-test-secret";

// ── Node lifecycle ────────────────────────────────────────────────────────────

struct NodeGuard {
    child: Child,
    dir: PathBuf,
}

impl Drop for NodeGuard {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

/// Find a free TCP port on loopback.
fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn spawn_node(name: &str, port: u16, dir: &PathBuf) -> NodeGuard {
    let node_bin = env!("CARGO_BIN_EXE_pactnet-node");
    let child = Command::new(node_bin)
        .args([
            "--entity-id", name,
            "--listen", &format!("127.0.0.1:{port}"),
            "--endpoint", &format!("http://127.0.0.1:{port}"),
            "--data-dir", dir.join("data").to_str().unwrap(),
            "--keystore-dir", dir.join("keys").to_str().unwrap(),
            "--key-password", "smoke-test-pw",
            "--jwt-secret", JWT_SECRET,
            "--dht-listen", "127.0.0.1:0",
        ])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("failed to spawn pactnet-node");
    NodeGuard {
        child,
        dir: dir.clone(),
    }
}

/// Poll until the health endpoint answers or the timeout elapses.
async fn wait_for_health(client: &reqwest::Client, base: &str, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if let Ok(resp) = client.get(format!("{base}/v1.1/health")).send().await {
            if resp.status().is_success() {
                return true;
            }
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
    false
}

fn admin_token() -> String {
    AuthService::new(JWT_SECRET)
        .issue_token(
            &EntityId::new("operator"),
            Some("admin"),
            600,
            chrono::Utc::now().timestamp(),
        )
        .expect("token issues")
}

fn entity_token(entity: &str) -> String {
    AuthService::new(JWT_SECRET)
        .issue_token(
            &EntityId::new(entity),
            None,
            600,
            chrono::Utc::now().timestamp(),
        )
        .expect("token issues")
}

async fn create_wallet(client: &reqwest::Client, base: &str, entity: &str, balance: u64) {
    let resp = client
        .post(format!("{base}/economy/wallets"))
        .bearer_auth(admin_token())
        .json(&serde_json::json!({"entity_id": entity, "initial_balance": balance}))
        .send()
        .await
        .expect("wallet create request");
    assert!(resp.status().is_success(), "wallet create failed: {}", resp.status());
}

async fn balance(client: &reqwest::Client, base: &str, entity: &str) -> u64 {
    let json: serde_json::Value = client
        .get(format!("{base}/token/balance/{entity}"))
        .send()
        .await
        .expect("balance request")
        .json()
        .await
        .expect("balance json");
    json["balance"].as_u64().expect("balance field")
}

// ── Smoke test ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn smoke_ledger_tasks_and_reputation() {
    let dir = std::env::temp_dir().join(format!("pactnet_smoke_{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();

    let port = free_port();
    let base = format!("http://127.0.0.1:{port}");
    let _guard = spawn_node("smoke-node", port, &dir);

    let http = reqwest::Client::new();
    assert!(
        wait_for_health(&http, &base, Duration::from_secs(30)).await,
        "pactnet-node did not become ready within 30 seconds"
    );

    // ── Identity surface ──────────────────────────────────────────────────────
    let key_info: serde_json::Value = http
        .get(format!("{base}/v1.1/public-key"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(key_info["algorithm"], "Ed25519");
    assert_eq!(key_info["entity_id"], "smoke-node");
    assert_eq!(key_info["public_key"].as_str().unwrap().len(), 64);

    // ── Wallets and transfer ──────────────────────────────────────────────────
    create_wallet(&http, &base, "alice", 1_000).await;
    create_wallet(&http, &base, "bob", 500).await;

    let resp = http
        .post(format!("{base}/economy/transfer"))
        .bearer_auth(entity_token("alice"))
        .json(&serde_json::json!({
            "from_entity": "alice",
            "to_entity": "bob",
            "amount": 200,
            "description": "svc",
        }))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    assert_eq!(balance(&http, &base, "alice").await, 800);
    assert_eq!(balance(&http, &base, "bob").await, 700);

    // Overdraft fails with the right code and no state change.
    let resp = http
        .post(format!("{base}/economy/transfer"))
        .bearer_auth(entity_token("alice"))
        .json(&serde_json::json!({
            "from_entity": "alice",
            "to_entity": "bob",
            "amount": 1_000,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "INSUFFICIENT_FUNDS");
    assert_eq!(balance(&http, &base, "alice").await, 800);

    // A caller cannot debit someone else's wallet.
    let resp = http
        .post(format!("{base}/economy/transfer"))
        .bearer_auth(entity_token("bob"))
        .json(&serde_json::json!({
            "from_entity": "alice",
            "to_entity": "bob",
            "amount": 10,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 403);

    // Unauthenticated transfer is refused.
    let resp = http
        .post(format!("{base}/economy/transfer"))
        .json(&serde_json::json!({
            "from_entity": "alice",
            "to_entity": "bob",
            "amount": 10,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 401);

    // ── Task lifecycle: lock, assign, complete ────────────────────────────────
    let resp: serde_json::Value = http
        .post(format!("{base}/marketplace/tasks"))
        .json(&serde_json::json!({
            "creator_id": "alice",
            "description": "index the archive",
            "reward_amount": 300,
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let task_id = resp["task"]["task_id"].as_str().expect("task id").to_string();
    assert_eq!(balance(&http, &base, "alice").await, 500);

    http.post(format!("{base}/marketplace/tasks/{task_id}/assign"))
        .json(&serde_json::json!({"worker_id": "bob"}))
        .send()
        .await
        .unwrap()
        .error_for_status()
        .unwrap();
    http.post(format!("{base}/marketplace/tasks/{task_id}/complete"))
        .send()
        .await
        .unwrap()
        .error_for_status()
        .unwrap();
    assert_eq!(balance(&http, &base, "bob").await, 1_000);

    let tasks: serde_json::Value = http
        .get(format!("{base}/marketplace/tasks"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let completed = tasks["tasks"]
        .as_array()
        .unwrap()
        .iter()
        .find(|t| t["task_id"] == task_id.as_str())
        .expect("task listed");
    assert_eq!(completed["status"], "completed");

    // ── Supply stays reconciled ───────────────────────────────────────────────
    let supply: serde_json::Value = http
        .get(format!("{base}/economy/supply"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(supply["reconciliation_delta"], 0);
    assert_eq!(supply["locked_total"], 0);

    // ── Reputation: three passes reach expert, a fail resets the streak ───────
    for _ in 0..3 {
        http.post(format!("{base}/reputation/bob/evaluation"))
            .bearer_auth(entity_token("alice"))
            .json(&serde_json::json!({"verdict": "pass", "score": 90.0}))
            .send()
            .await
            .unwrap()
            .error_for_status()
            .unwrap();
    }
    let rep: serde_json::Value = http
        .get(format!("{base}/reputation/bob"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(rep["current_streak"], 3);
    let score = rep["current_score"].as_f64().unwrap();
    assert!(score >= 60.0, "score was {score}");

    http.post(format!("{base}/reputation/bob/evaluation"))
        .bearer_auth(entity_token("alice"))
        .json(&serde_json::json!({"verdict": "fail", "score": 20.0}))
        .send()
        .await
        .unwrap()
        .error_for_status()
        .unwrap();
    let rep: serde_json::Value = http
        .get(format!("{base}/reputation/bob"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(rep["current_streak"], 0);
    assert!(rep["current_score"].as_f64().unwrap() < score);
}
