use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Days, Utc};
use tokio_postgres::{Config, NoTls, SimpleQueryMessage};

// Nights 1..=NIGHTS ahead of today; keep below the server's max_advance_days.
// Assumes the server policy checks in at 14:00 and out at 11:00.
const NIGHTS: u64 = 300;

async fn connect(host: &str, port: u16) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(host)
        .port(port)
        .dbname("bookd")
        .user("bookd")
        .password("bookd");

    let (client, conn) = config.connect(NoTls).await.expect("connect failed");
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            eprintln!("connection error: {e}");
        }
    });
    client
}

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        println!("  {label}: no samples");
        return;
    }
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

fn night(offset: u64) -> (String, String) {
    let today = Utc::now().date_naive();
    let from = today.checked_add_days(Days::new(offset)).expect("date overflow");
    let to = from.checked_add_days(Days::new(1)).expect("date overflow");
    // Overlap is checked on the instants sent, so ask from check-in to check-out.
    (
        from.format("%Y-%m-%dT14:00:00Z").to_string(),
        to.format("%Y-%m-%dT11:00:00Z").to_string(),
    )
}

/// Place a one-night stay. Returns the reservation id when accepted.
async fn place(client: &tokio_postgres::Client, user: &str, offset: u64) -> Option<String> {
    let (from, to) = night(offset);
    let messages = client
        .simple_query(&format!(
            "INSERT INTO reservations (id, user_identification, starts, ends) VALUES (NULL, '{user}', '{from}', '{to}')"
        ))
        .await
        .unwrap();
    messages.into_iter().find_map(|m| match m {
        SimpleQueryMessage::Row(row) => row.get("reservation_id").map(str::to_string),
        _ => None,
    })
}

async fn cancel_all(client: &tokio_postgres::Client, ids: &[String]) {
    for id in ids {
        client
            .simple_query(&format!("DELETE FROM reservations WHERE id = '{id}'"))
            .await
            .unwrap();
    }
}

async fn phase1_sequential(host: &str, port: u16) {
    let client = connect(host, port).await;
    let mut latencies = Vec::with_capacity(NIGHTS as usize);
    let mut placed = Vec::new();
    let start = Instant::now();

    for offset in 1..=NIGHTS {
        let t = Instant::now();
        if let Some(id) = place(&client, "bench-seq", offset).await {
            placed.push(id);
        }
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = NIGHTS as f64 / elapsed.as_secs_f64();
    println!(
        "  {NIGHTS} placements ({} accepted) in {:.2}s = {ops:.0} ops/sec",
        placed.len(),
        elapsed.as_secs_f64()
    );
    print_latency("placement latency", &mut latencies);
    cancel_all(&client, &placed).await;
}

async fn phase2_contended(host: &str, port: u16) {
    let n_tasks = 10;
    let accepted = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();
    let mut handles = Vec::new();

    // Every task goes after the same nights.
    for task in 0..n_tasks {
        let host = host.to_string();
        let accepted = accepted.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let user = format!("bench-contended-{task}");
            let mut placed = Vec::new();
            for offset in 1..=NIGHTS {
                if let Some(id) = place(&client, &user, offset).await {
                    placed.push(id);
                }
            }
            accepted.fetch_add(placed.len(), Ordering::Relaxed);
            placed
        }));
    }

    let mut placed = Vec::new();
    for h in handles {
        placed.extend(h.await.unwrap());
    }

    let elapsed = start.elapsed();
    let total = n_tasks * NIGHTS as usize;
    let ops = total as f64 / elapsed.as_secs_f64();
    println!(
        "  {n_tasks} tasks x {NIGHTS} placements = {total} total in {:.2}s = {ops:.0} ops/sec",
        elapsed.as_secs_f64()
    );
    println!(
        "  accepted {} for {NIGHTS} nights",
        accepted.load(Ordering::Relaxed)
    );

    let client = connect(host, port).await;
    cancel_all(&client, &placed).await;
}

async fn phase3_read_under_load(host: &str, port: u16) {
    // Writers keep placing and cancelling in the first half of the range.
    let stop = Arc::new(AtomicBool::new(false));
    let mut writer_handles = Vec::new();
    for w in 0..5u64 {
        let host = host.to_string();
        let stop = stop.clone();
        writer_handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let mut offset = 1 + w;
            while !stop.load(Ordering::Relaxed) {
                if let Some(id) = place(&client, "bench-writer", offset).await {
                    cancel_all(&client, &[id]).await;
                }
                offset = 1 + (offset + 5) % (NIGHTS / 2);
            }
        }));
    }

    let n_readers = 10;
    let reads_per_reader = 500;
    let mut reader_handles = Vec::new();

    for r in 0..n_readers {
        let host = host.to_string();
        reader_handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let mut latencies = Vec::with_capacity(reads_per_reader);
            for i in 0..reads_per_reader {
                let (from, to) = night(1 + ((r * reads_per_reader + i) as u64 % NIGHTS));
                let t = Instant::now();
                client
                    .simple_query(&format!(
                        "SELECT * FROM availability WHERE starts = '{from}' AND ends = '{to}'"
                    ))
                    .await
                    .unwrap();
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for h in reader_handles {
        all_latencies.extend(h.await.unwrap());
    }

    stop.store(true, Ordering::Relaxed);
    for h in writer_handles {
        let _ = h.await;
    }

    print_latency("availability query", &mut all_latencies);
}

async fn phase4_connection_storm(host: &str, port: u16) {
    let n_conns = 50;
    let ops_per_conn = 10;

    let start = Instant::now();
    let mut handles = Vec::new();
    let success = Arc::new(AtomicUsize::new(0));

    for c in 0..n_conns {
        let host = host.to_string();
        let success = success.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            for i in 0..ops_per_conn {
                let (from, to) = night(1 + (c * ops_per_conn + i) % NIGHTS);
                client
                    .simple_query(&format!(
                        "SELECT * FROM availability WHERE starts = '{from}' AND ends = '{to}'"
                    ))
                    .await
                    .unwrap();
            }
            success.fetch_add(1, Ordering::Relaxed);
        }));
    }

    for h in handles {
        let _ = h.await;
    }

    let elapsed = start.elapsed();
    let ok = success.load(Ordering::Relaxed);
    println!(
        "  {n_conns} connections, {ops_per_conn} ops each: {ok}/{n_conns} succeeded in {:.2}s",
        elapsed.as_secs_f64()
    );
}

#[tokio::main]
async fn main() {
    let host = std::env::var("BOOKD_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("BOOKD_PORT")
        .unwrap_or_else(|_| "5433".into())
        .parse()
        .expect("invalid BOOKD_PORT");

    println!("=== bookd stress benchmark ===");
    println!("target: {host}:{port}");
    println!("(server needs a booking policy with max_advance_days > {NIGHTS})\n");

    println!("[phase 1] sequential placement throughput");
    phase1_sequential(&host, port).await;

    println!("\n[phase 2] contended placements");
    phase2_contended(&host, port).await;

    println!("\n[phase 3] availability latency under write load");
    phase3_read_under_load(&host, port).await;

    println!("\n[phase 4] connection storm");
    phase4_connection_storm(&host, port).await;

    println!("\n=== benchmark complete ===");
}
