//! Shared helpers for end-to-end tests that exercise the compiled binary.

use std::net::TcpListener;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use sqlx::SqlitePool;

/// Token the spawned server is configured with; tests present it to
/// /admin/stats.
pub const METRICS_TOKEN: &str = "e2e-metrics-token";

/// Ask the OS for a free port by binding port 0 and reading it back.
pub fn find_free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .expect("bind ephemeral port")
        .local_addr()
        .expect("read local addr")
        .port()
}

/// Random database path under the system temp dir.
pub fn temp_db_path(prefix: &str) -> String {
    let suffix: u32 = rand::random();
    std::env::temp_dir()
        .join(format!("{}-{}-{:08x}.db", prefix, std::process::id(), suffix))
        .to_string_lossy()
        .into_owned()
}

fn server_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_poll-service"))
}

/// Running server plus the resources to tear down with it.
pub struct ServerGuard {
    pub child: Child,
    pub base_url: String,
    pub db_path: String,
}

impl Drop for ServerGuard {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{}", self.db_path, suffix));
        }
    }
}

/// Poll /healthz until the server answers or the deadline passes.
pub async fn wait_ready(base_url: &str) {
    let client = reqwest::Client::new();
    let deadline = Instant::now() + Duration::from_secs(15);
    loop {
        if let Ok(response) = client.get(format!("{}/healthz", base_url)).send().await {
            if response.status().is_success() {
                return;
            }
        }
        assert!(
            Instant::now() < deadline,
            "server did not become ready at {}",
            base_url
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

/// Spawn the service binary against a fresh temp database and wait until
/// it serves. `extra_env` entries override the defaults set here.
pub async fn setup_server(sweep_interval_secs: u64, extra_env: &[(&str, &str)]) -> ServerGuard {
    let port = find_free_port();
    let db_path = temp_db_path("poll-e2e");
    let base_url = format!("http://127.0.0.1:{}", port);

    let mut command = Command::new(server_binary());
    command
        .env("PORT", port.to_string())
        .env("DB_PATH", &db_path)
        .env("SWEEP_INTERVAL_SECS", sweep_interval_secs.to_string())
        .env("METRICS_AUTH_TOKEN", METRICS_TOKEN)
        .env("VOTE_RATE_REFILL_MS", "1")
        .env("VOTE_RATE_BURST", "1000")
        .env("RUST_LOG", "info")
        .stdout(Stdio::null())
        .stderr(Stdio::inherit());
    for (key, value) in extra_env {
        command.env(key, value);
    }
    let child = command.spawn().expect("spawn poll-service binary");

    let guard = ServerGuard {
        child,
        base_url,
        db_path,
    };
    wait_ready(&guard.base_url).await;
    guard
}

/// Open the server's database directly, for seeding directory rows.
pub async fn open_db(db_path: &str) -> SqlitePool {
    SqlitePool::connect(&format!("sqlite:{}", db_path))
        .await
        .expect("open test database")
}

pub async fn seed_user(pool: &SqlitePool, id: i64, email: &str, avatar: Option<&str>) {
    sqlx::query("INSERT OR REPLACE INTO users (id, email, avatar) VALUES (?, ?, ?)")
        .bind(id)
        .bind(email)
        .bind(avatar)
        .execute(pool)
        .await
        .expect("seed directory user");
}
