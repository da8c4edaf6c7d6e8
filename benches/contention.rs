use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use tokio_postgres::{Config, NoTls};
use ulid::Ulid;

const HOUR: i64 = 3_600_000; // 1 hour in ms
/// 2035-01-01T00:00:00Z
const BASE: i64 = 2_051_222_400_000;

async fn connect(host: &str, port: u16, password: &str) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(host)
        .port(port)
        .dbname("reservd")
        .user("bench")
        .password(password);

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

async fn add_resource(client: &tokio_postgres::Client, kind: &str, capacity: u32) -> Ulid {
    let id = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO resources (id, kind, capacity) VALUES ('{id}', '{kind}', {capacity})"
        ))
        .await
        .unwrap();
    id
}

fn reserve_sql(resource: Ulid, start: i64, end: i64, quantity: u32) -> String {
    let id = Ulid::new();
    format!(
        r#"INSERT INTO reservations (id, resource_id, start, "end", quantity, customer_ref) VALUES ('{id}', '{resource}', {start}, {end}, {quantity}, 'bench')"#
    )
}

async fn phase1_sequential(host: &str, port: u16, password: &str) {
    let client = connect(host, port, password).await;
    let rid = add_resource(&client, "equipment", 10).await;

    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();
    for i in 0..n {
        let s = BASE + (i as i64) * HOUR;
        let t = Instant::now();
        client
            .batch_execute(&reserve_sql(rid, s, s + HOUR, 1))
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} reservations in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("reserve latency", &mut latencies);
}

/// Many clients race for the same windows on single-unit studios. Every
/// window must end up with exactly one winner.
async fn phase2_last_unit(host: &str, port: u16, password: &str) {
    let setup = connect(host, port, password).await;
    let n_studios = 5;
    let mut studios = Vec::with_capacity(n_studios);
    for _ in 0..n_studios {
        studios.push(add_resource(&setup, "slot", 1).await);
    }
    let studios = Arc::new(studios);

    let n_clients = 20;
    let n_windows = 50;
    let won = Arc::new(AtomicUsize::new(0));
    let lost = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();
    let mut handles = Vec::new();

    for _ in 0..n_clients {
        let host = host.to_string();
        let password = password.to_string();
        let studios = studios.clone();
        let won = won.clone();
        let lost = lost.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &password).await;
            for w in 0..n_windows {
                let s = BASE + (w as i64) * 2 * HOUR;
                for &studio in studios.iter() {
                    match client.batch_execute(&reserve_sql(studio, s, s + 2 * HOUR, 1)).await {
                        Ok(()) => won.fetch_add(1, Ordering::Relaxed),
                        Err(_) => lost.fetch_add(1, Ordering::Relaxed),
                    };
                }
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let won = won.load(Ordering::Relaxed);
    let lost = lost.load(Ordering::Relaxed);
    let expected = n_studios * n_windows;
    println!(
        "  {n_clients} clients, {expected} contested windows: {won} won, {lost} rejected in {:.2}s",
        elapsed.as_secs_f64()
    );
    if won != expected {
        println!("  !! expected exactly {expected} winners");
    }
}

async fn phase3_read_under_load(host: &str, port: u16, password: &str) {
    let setup = connect(host, port, password).await;
    let kit = add_resource(&setup, "equipment", 50).await;
    for i in 0..200 {
        let s = BASE + (i as i64) * HOUR;
        setup
            .batch_execute(&reserve_sql(kit, s, s + 3 * HOUR, 1 + (i % 3) as u32))
            .await
            .unwrap();
    }

    let stop = Arc::new(AtomicBool::new(false));
    let mut writer_handles = Vec::new();
    for w in 0..5 {
        let host = host.to_string();
        let password = password.to_string();
        let stop = stop.clone();
        writer_handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &password).await;
            let mut i = 0i64;
            while !stop.load(Ordering::Relaxed) {
                let s = BASE + (w as i64 * 10_000 + 300 + i) * HOUR;
                let _ = client.batch_execute(&reserve_sql(kit, s, s + HOUR, 1)).await;
                i += 1;
            }
        }));
    }

    let n_readers = 10;
    let reads_per_reader = 500;
    let mut reader_handles = Vec::new();
    for _ in 0..n_readers {
        let host = host.to_string();
        let password = password.to_string();
        reader_handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &password).await;
            let mut latencies = Vec::with_capacity(reads_per_reader);
            for _ in 0..reads_per_reader {
                let t = Instant::now();
                client
                    .batch_execute(&format!(
                        r#"SELECT * FROM availability WHERE resource_id = '{kit}' AND start >= {BASE} AND "end" <= {}"#,
                        BASE + 200 * HOUR
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

#[tokio::main]
async fn main() {
    let host = std::env::var("RESERVD_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("RESERVD_PORT")
        .unwrap_or_else(|_| "5433".into())
        .parse()
        .expect("invalid RESERVD_PORT");
    let password = std::env::var("RESERVD_PASSWORD").unwrap_or_else(|_| "reservd".into());

    println!("=== reservd contention benchmark ===");
    println!("target: {host}:{port}\n");

    println!("[phase 1] sequential reserve throughput");
    phase1_sequential(&host, port, &password).await;

    println!("\n[phase 2] last-unit contention");
    phase2_last_unit(&host, port, &password).await;

    println!("\n[phase 3] read latency under write load");
    phase3_read_under_load(&host, port, &password).await;

    println!("\n=== done ===");
}
