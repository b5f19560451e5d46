//! End-to-end smoke test for timpal-node.
//!
//! Starts a real node process with a fresh genesis, submits a signed
//! transfer over HTTP, and asserts the ledger state changes once the
//! proposer loop includes it in a block.
//!
//! Run with:
//!   cargo test -p timpal-node --test smoke

use std::net::TcpListener;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use timpal_core::constants::{FEE, PALS_PER_TMPL};
use timpal_core::transaction::Transaction;
use timpal_crypto::{sign_transaction, KeyPair};
use timpal_genesis::{GenesisAllocation, GenesisParams};

// ── Node lifecycle ────────────────────────────────────────────────────────────

struct NodeGuard {
    child: Child,
    data_dir: PathBuf,
}

impl Drop for NodeGuard {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
        let _ = std::fs::remove_dir_all(&self.data_dir);
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

// ── HTTP helpers ──────────────────────────────────────────────────────────────

async fn wait_for_health(client: &reqwest::Client, base: &str, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if let Ok(resp) = client.get(format!("{base}/api/health")).send().await {
            if resp.status().is_success() {
                return true;
            }
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
    false
}

async fn account(client: &reqwest::Client, base: &str, address: &str) -> serde_json::Value {
    client
        .get(format!("{base}/api/account/{address}"))
        .send()
        .await
        .expect("account request")
        .json()
        .await
        .expect("account json")
}

async fn balance_of(client: &reqwest::Client, base: &str, address: &str) -> u64 {
    account(client, base, address).await["balance"].as_u64().unwrap_or(0)
}

/// Poll until `address` holds exactly `expected` pals.
async fn wait_for_balance(
    client: &reqwest::Client,
    base: &str,
    address: &str,
    expected: u64,
    timeout: Duration,
) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if balance_of(client, base, address).await == expected {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
    false
}

// ── Smoke test ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn smoke_transfer_reaches_the_ledger() {
    // ── 1. Temp dir + genesis funding a test key ──────────────────────────────
    let data_dir = std::env::temp_dir().join(format!("timpal_e2e_{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&data_dir);
    std::fs::create_dir_all(&data_dir).unwrap();

    let alice = KeyPair::generate();
    let bob = KeyPair::generate();
    let funding = 10 * PALS_PER_TMPL;

    let params = GenesisParams {
        genesis_timestamp: std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs_f64(),
        allocations: vec![GenesisAllocation {
            address: alice.address.clone(),
            amount_pals: funding,
        }],
    };
    let params_path = data_dir.join("genesis-params.json");
    std::fs::write(&params_path, serde_json::to_string(&params).unwrap()).unwrap();

    // ── 2. Start the node ─────────────────────────────────────────────────────
    let rpc_port = free_port();
    let base = format!("http://127.0.0.1:{rpc_port}");

    let node_bin = env!("CARGO_BIN_EXE_timpal-node");
    let child = Command::new(node_bin)
        .args([
            "--data-dir",
            data_dir.join("state").to_str().unwrap(),
            "--rpc-addr",
            &format!("127.0.0.1:{rpc_port}"),
            "--genesis-params",
            params_path.to_str().unwrap(),
        ])
        .env("TIMPAL_WALLET_PIN", "123456")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("failed to spawn timpal-node");
    let _guard = NodeGuard { child, data_dir };

    let http = reqwest::Client::new();
    assert!(
        wait_for_health(&http, &base, Duration::from_secs(20)).await,
        "timpal-node did not become ready within 20 seconds"
    );

    // ── 3. Genesis balance visible over HTTP ──────────────────────────────────
    assert_eq!(balance_of(&http, &base, alice.address.as_str()).await, funding);

    // ── 4. Submit a signed transfer alice → bob ───────────────────────────────
    let amount = PALS_PER_TMPL;
    let mut tx = Transaction::new_transfer(
        alice.address.clone(),
        bob.address.clone(),
        amount,
        FEE,
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs_f64(),
        0,
        alice.public_key_hex.clone(),
    );
    sign_transaction(&mut tx, &alice).unwrap();

    let resp = http
        .post(format!("{base}/submit_transaction"))
        .json(&tx)
        .send()
        .await
        .expect("submit request");
    assert!(resp.status().is_success(), "submission refused: {:?}", resp.text().await);

    // ── 5. The proposer loop includes it within a few slots ───────────────────
    assert!(
        wait_for_balance(&http, &base, bob.address.as_str(), amount, Duration::from_secs(30)).await,
        "transfer never reached the ledger"
    );
    assert_eq!(
        balance_of(&http, &base, alice.address.as_str()).await,
        funding - amount - FEE
    );
    let alice_account = account(&http, &base, alice.address.as_str()).await;
    assert_eq!(alice_account["nonce"].as_u64(), Some(1));

    // ── 6. /send refuses a wrong PIN with a sanitized 401 ─────────────────────
    let resp = http
        .post(format!("{base}/send"))
        .json(&serde_json::json!({
            "sender": alice.address.as_str(),
            "recipient": bob.address.as_str(),
            "amount_tmpl": 1.0,
            "pin": "000000"
        }))
        .send()
        .await
        .expect("send request");
    assert_eq!(resp.status().as_u16(), 401);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "Invalid PIN or wallet decryption failed");

    // ── 7. Health reflects a growing chain and one validator ──────────────────
    let health: serde_json::Value = http
        .get(format!("{base}/api/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(health["height"].as_u64().unwrap() >= 1);
    assert_eq!(health["validator_count"].as_u64(), Some(1));

    // ── 8. Block range endpoint caps and reports ──────────────────────────────
    let range: serde_json::Value = http
        .get(format!("{base}/api/blocks/range?start=0&end=5"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(range["count"].as_u64().unwrap() >= 1);
    let refused = http
        .get(format!("{base}/api/blocks/range?start=0&end=200"))
        .send()
        .await
        .unwrap();
    assert_eq!(refused.status().as_u16(), 400);
}
