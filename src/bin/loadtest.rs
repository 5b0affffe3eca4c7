//! Vote-submission load generator.
//!
//! Points at a running poll service and hammers POST /polls/vote with
//! randomized users and options pulled from the live database. Configured
//! through env vars so it can run against any environment:
//!
//!   BASE_URL       target service (default http://127.0.0.1:3000)
//!   DB_PATH        database to read option ids from (default ./polls.db)
//!   DURATION_SECS  how long to run (default 30)
//!   CONCURRENCY    max in-flight requests (default 64)
//!   TARGET_RPS     paced request rate; unset means open throttle
//!   MAX_USER_ID    user ids are drawn from 1..=this (default 100000)
//!   ANONYMOUS_PCT  share of anonymous ballots, 0-100 (default 20)
//!   SEED_USERS     insert this many directory rows first (default 0)

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rand::seq::SliceRandom;
use rand::Rng;
use reqwest::Client;
use serde_json::json;
use sqlx::{Row, SqlitePool};
use tokio::sync::Semaphore;
use tokio::time::{interval, MissedTickBehavior};

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}

#[derive(Default)]
struct Counters {
    accepted: AtomicU64,
    already_voted: AtomicU64,
    not_found: AtomicU64,
    throttled: AtomicU64,
    errors: AtomicU64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let base_url = std::env::var("BASE_URL").unwrap_or_else(|_| "http://127.0.0.1:3000".to_string());
    let db_path = std::env::var("DB_PATH").unwrap_or_else(|_| "./polls.db".to_string());
    let duration_secs: u64 = env_or("DURATION_SECS", 30);
    let concurrency: usize = env_or("CONCURRENCY", 64);
    let target_rps: Option<u64> = std::env::var("TARGET_RPS").ok().and_then(|raw| raw.parse().ok());
    let max_user_id: i64 = env_or("MAX_USER_ID", 100_000);
    let anonymous_pct: u32 = env_or("ANONYMOUS_PCT", 20);
    let seed_users: i64 = env_or("SEED_USERS", 0);

    println!("poll-loadtest");
    println!("  target      {}", base_url);
    println!("  database    {}", db_path);
    println!("  duration    {}s", duration_secs);
    println!("  concurrency {}", concurrency);
    match target_rps {
        Some(rps) => println!("  pacing      {} rps", rps),
        None => println!("  pacing      open throttle"),
    }

    let pool = SqlitePool::connect(&format!("sqlite:{}", db_path)).await?;

    if seed_users > 0 {
        for id in 1..=seed_users {
            sqlx::query("INSERT OR REPLACE INTO users (id, email, avatar) VALUES (?, ?, NULL)")
                .bind(id)
                .bind(format!("load.user{}@example.org", id))
                .execute(&pool)
                .await?;
        }
        println!("  seeded      {} directory users", seed_users);
    }

    let option_ids: Vec<i64> = sqlx::query("SELECT id FROM poll_options")
        .fetch_all(&pool)
        .await?
        .iter()
        .map(|row| row.get::<i64, _>("id"))
        .collect();
    if option_ids.is_empty() {
        anyhow::bail!("no active poll options in {}; create a poll first", db_path);
    }
    println!("  options     {} active", option_ids.len());

    let client = Client::builder()
        .pool_idle_timeout(Duration::from_secs(60))
        .tcp_nodelay(true)
        .timeout(Duration::from_secs(15))
        .build()?;

    let counters = Arc::new(Counters::default());
    let latencies_us = Arc::new(Mutex::new(Vec::<u64>::new()));
    let semaphore = Arc::new(Semaphore::new(concurrency));

    let mut ticker = target_rps.map(|rps| {
        let mut t = interval(Duration::from_micros(1_000_000 / rps.max(1)));
        t.set_missed_tick_behavior(MissedTickBehavior::Burst);
        t
    });

    let started = Instant::now();
    let deadline = started + Duration::from_secs(duration_secs);
    let mut sent: u64 = 0;

    while Instant::now() < deadline {
        if let Some(t) = ticker.as_mut() {
            t.tick().await;
        }
        let permit = semaphore.clone().acquire_owned().await?;

        let option_id = *option_ids
            .choose(&mut rand::thread_rng())
            .expect("option_ids checked non-empty");
        let user_id: i64 = rand::thread_rng().gen_range(1..=max_user_id);
        let anonymous = rand::thread_rng().gen_range(0..100) < anonymous_pct;

        let client = client.clone();
        let url = format!("{}/polls/vote", base_url);
        let counters = counters.clone();
        let latencies_us = latencies_us.clone();
        tokio::spawn(async move {
            let _permit = permit;
            let begun = Instant::now();
            let result = client
                .post(&url)
                .json(&json!({
                    "optionId": option_id,
                    "userId": user_id,
                    "anonymous": anonymous,
                }))
                .send()
                .await;
            let elapsed_us = begun.elapsed().as_micros() as u64;

            match result {
                Ok(response) => match response.status().as_u16() {
                    200 => match response.json::<serde_json::Value>().await {
                        Ok(body) if body["status"] == "accepted" => {
                            counters.accepted.fetch_add(1, Ordering::Relaxed);
                        }
                        Ok(_) => {
                            counters.already_voted.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(_) => {
                            counters.errors.fetch_add(1, Ordering::Relaxed);
                        }
                    },
                    404 => {
                        counters.not_found.fetch_add(1, Ordering::Relaxed);
                    }
                    429 => {
                        counters.throttled.fetch_add(1, Ordering::Relaxed);
                    }
                    _ => {
                        counters.errors.fetch_add(1, Ordering::Relaxed);
                    }
                },
                Err(_) => {
                    counters.errors.fetch_add(1, Ordering::Relaxed);
                }
            }
            latencies_us.lock().expect("latency mutex").push(elapsed_us);
        });
        sent += 1;
    }

    // Wait for in-flight requests by draining every permit.
    let _all = semaphore.acquire_many(concurrency as u32).await?;
    let wall = started.elapsed().as_secs_f64();

    let mut samples = latencies_us.lock().expect("latency mutex").clone();
    samples.sort_unstable();
    let percentile = |p: f64| -> f64 {
        if samples.is_empty() {
            return 0.0;
        }
        let idx = ((samples.len() as f64 - 1.0) * p).round() as usize;
        samples[idx] as f64 / 1000.0
    };

    println!();
    println!("sent          {}", sent);
    println!("wall time     {:.1}s ({:.0} rps)", wall, sent as f64 / wall);
    println!("accepted      {}", counters.accepted.load(Ordering::Relaxed));
    println!("alreadyVoted  {}", counters.already_voted.load(Ordering::Relaxed));
    println!("notFound      {}", counters.not_found.load(Ordering::Relaxed));
    println!("throttled     {}", counters.throttled.load(Ordering::Relaxed));
    println!("errors        {}", counters.errors.load(Ordering::Relaxed));
    println!(
        "latency ms    p50={:.1} p95={:.1} p99={:.1}",
        percentile(0.50),
        percentile(0.95),
        percentile(0.99)
    );

    Ok(())
}
