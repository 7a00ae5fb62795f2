use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::{Days, NaiveDate};
use tokio_postgres::{Config, NoTls, SimpleQueryMessage};
use ulid::Ulid;

async fn connect(host: &str, port: u16, dbname: &str) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(host)
        .port(port)
        .dbname(dbname)
        .user("cadence")
        .password("cadence");

    let (client, conn) = config.connect(NoTls).await.expect("connect failed");
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            eprintln!("connection error: {e}");
        }
    });
    client
}

fn fresh_tenant() -> String {
    format!("bench_{}", Ulid::new())
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

/// The `id` column of the single row an INSERT answers with.
async fn inserted_id(client: &tokio_postgres::Client, sql: &str) -> String {
    client
        .simple_query(sql)
        .await
        .unwrap()
        .into_iter()
        .find_map(|msg| match msg {
            SimpleQueryMessage::Row(row) => row.get("id").map(str::to_string),
            _ => None,
        })
        .expect("INSERT returned no row")
}

/// A professional with one client in the connection's tenant.
async fn seed(client: &tokio_postgres::Client) -> (String, String) {
    let pid = inserted_id(
        client,
        &format!(
            "INSERT INTO professionals VALUES ('Bench', 'bench-{}@clinic.test')",
            Ulid::new()
        ),
    )
    .await;
    let cid = inserted_id(
        client,
        &format!("INSERT INTO clients VALUES ('{pid}', 'Client')"),
    )
    .await;
    (pid, cid)
}

/// Ten one-hour slots a day from 08:00, walking forward day by day.
fn slot(i: usize) -> (NaiveDate, String) {
    let base = NaiveDate::from_ymd_opt(2099, 1, 1).expect("valid date");
    let date = base
        .checked_add_days(Days::new((i / 10) as u64))
        .expect("date in range");
    (date, format!("{:02}:00", 8 + i % 10))
}

async fn phase1_sequential(host: &str, port: u16) {
    let client = connect(host, port, &fresh_tenant()).await;
    let (pid, cid) = seed(&client).await;

    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let (date, time) = slot(i);
        let t = Instant::now();
        client
            .batch_execute(&format!(
                "INSERT INTO appointments VALUES ('{pid}', '{cid}', '{date}', '{time}', 60)"
            ))
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("write latency", &mut latencies);
}

/// Every task races for the same slots; each slot must be won exactly once.
async fn phase2_contended(host: &str, port: u16) {
    let n_tasks = 10;
    let n_slots = 200;
    let tenant = fresh_tenant();

    let setup = connect(host, port, &tenant).await;
    let (pid, cid) = seed(&setup).await;
    drop(setup);

    let won = Arc::new(AtomicUsize::new(0));
    let lost = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();
    let mut handles = Vec::new();

    for _ in 0..n_tasks {
        let host = host.to_string();
        let tenant = tenant.clone();
        let (pid, cid) = (pid.clone(), cid.clone());
        let (won, lost) = (won.clone(), lost.clone());
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &tenant).await;
            for i in 0..n_slots {
                let (date, time) = slot(i);
                let sql = format!(
                    "INSERT INTO appointments VALUES ('{pid}', '{cid}', '{date}', '{time}', 60)"
                );
                match client.batch_execute(&sql).await {
                    Ok(()) => won.fetch_add(1, Ordering::Relaxed),
                    Err(_) => lost.fetch_add(1, Ordering::Relaxed),
                };
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let won = won.load(Ordering::Relaxed);
    let lost = lost.load(Ordering::Relaxed);
    println!(
        "  {n_tasks} tasks x {n_slots} slots in {:.2}s: {won} booked, {lost} rejected",
        elapsed.as_secs_f64()
    );
    assert_eq!(won, n_slots, "each slot must be booked exactly once");
}

async fn phase3_read_under_load(host: &str, port: u16) {
    let tenant = fresh_tenant();
    let setup = connect(host, port, &tenant).await;
    let (pid, cid) = seed(&setup).await;
    drop(setup);

    let stop = Arc::new(AtomicBool::new(false));

    let mut writer_handles = Vec::new();
    for w in 0..4 {
        let host = host.to_string();
        let tenant = tenant.clone();
        let (pid, cid) = (pid.clone(), cid.clone());
        let stop = stop.clone();
        writer_handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &tenant).await;
            let mut i = w * 10_000;
            while !stop.load(Ordering::Relaxed) {
                let (date, time) = slot(i);
                let _ = client
                    .batch_execute(&format!(
                        "INSERT INTO appointments VALUES ('{pid}', '{cid}', '{date}', '{time}', 60)"
                    ))
                    .await;
                i += 1;
            }
        }));
    }

    let mut reader_handles = Vec::new();
    for _ in 0..4 {
        let host = host.to_string();
        let tenant = tenant.clone();
        let pid = pid.clone();
        reader_handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &tenant).await;
            let mut latencies = Vec::with_capacity(500);
            for i in 0..500 {
                let (date, time) = slot(i * 7);
                let t = Instant::now();
                client
                    .simple_query(&format!(
                        "SELECT * FROM availability WHERE professional_id = '{pid}' AND date = '{date}' AND start_time = '{time}' AND duration_minutes = 30"
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

/// Rule creation includes its eight-week materialization.
async fn phase4_recurring_rules(host: &str, port: u16) {
    let client = connect(host, port, &fresh_tenant()).await;
    let (pid, cid) = seed(&client).await;

    let mut latencies = Vec::new();
    let start = Instant::now();
    for day in 1..=7 {
        for hour in 8..18 {
            let t = Instant::now();
            client
                .batch_execute(&format!(
                    "INSERT INTO recurring_rules VALUES ('{pid}', '{cid}', {day}, '{hour:02}:00', 50)"
                ))
                .await
                .unwrap();
            latencies.push(t.elapsed());
        }
    }
    println!(
        "  {} rules in {:.2}s",
        latencies.len(),
        start.elapsed().as_secs_f64()
    );
    print_latency("rule creation", &mut latencies);
}

async fn phase5_connection_storm(host: &str, port: u16) {
    let n_conns = 50;
    let ops_per_conn = 10;

    let start = Instant::now();
    let mut handles = Vec::new();
    let success = Arc::new(AtomicUsize::new(0));

    for _ in 0..n_conns {
        let host = host.to_string();
        let success = success.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &fresh_tenant()).await;
            let (pid, cid) = seed(&client).await;
            for i in 0..ops_per_conn {
                let (date, time) = slot(i);
                client
                    .batch_execute(&format!(
                        "INSERT INTO appointments VALUES ('{pid}', '{cid}', '{date}', '{time}', 60)"
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
    let host = std::env::var("CADENCE_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("CADENCE_PORT")
        .unwrap_or_else(|_| "5433".into())
        .parse()
        .expect("invalid CADENCE_PORT");

    println!("=== cadence stress benchmark ===");
    println!("target: {host}:{port}\n");

    // Each phase uses its own tenant (unique dbname) to avoid interference

    println!("[phase 1] sequential booking throughput");
    phase1_sequential(&host, port).await;

    println!("\n[phase 2] contended booking of the same slots");
    phase2_contended(&host, port).await;

    println!("\n[phase 3] availability latency under write load");
    phase3_read_under_load(&host, port).await;

    println!("\n[phase 4] recurring rule creation");
    phase4_recurring_rules(&host, port).await;

    println!("\n[phase 5] connection storm");
    phase5_connection_storm(&host, port).await;

    println!("\n=== benchmark complete ===");
}
