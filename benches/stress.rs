use std::time::{Duration, Instant};

use chrono::{Days, NaiveDate};
use tokio_postgres::{Config, NoTls};
use ulid::Ulid;

async fn connect(host: &str, port: u16) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(host)
        .port(port)
        .dbname(format!("bench_{}", Ulid::new()))
        .user("kenneld")
        .password("kenneld");

    let (client, conn) = config.connect(NoTls).await.expect("connect failed");
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            eprintln!("connection error: {e}");
        }
    });
    client
}

/// Calendar date `i` days after 2000-01-01.
fn day(i: u64) -> NaiveDate {
    NaiveDate::from_ymd_opt(2000, 1, 1).unwrap() + Days::new(i)
}

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
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
        latencies.last().unwrap().as_secs_f64() * 1000.0,
    );
}

struct Seeded {
    room: Ulid,
    pet: Ulid,
}

/// Create a category, one room in it and a pet in this client's tenant.
async fn seed_tenant(client: &tokio_postgres::Client, number: &str) -> Seeded {
    let category = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO categories (id, name) VALUES ('{category}', 'standard')"
        ))
        .await
        .unwrap();

    let room = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO rooms (id, category_id, number) VALUES ('{room}', '{category}', '{number}')"
        ))
        .await
        .unwrap();

    let pet = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO pets (id, name, species) VALUES ('{pet}', 'Rex', 'dog')"
        ))
        .await
        .unwrap();

    Seeded { room, pet }
}

async fn insert_stay(client: &tokio_postgres::Client, seeded: &Seeded, start_day: u64) {
    let bid = Ulid::new();
    let check_in = day(start_day);
    let check_out = day(start_day + 1);
    client
        .batch_execute(&format!(
            "INSERT INTO bookings (id, check_in, check_out, room_id, pet_ids) \
             VALUES ('{bid}', '{check_in}', '{check_out}', '{}', '{}')",
            seeded.room, seeded.pet
        ))
        .await
        .unwrap();
}

async fn phase1_sequential(host: &str, port: u16) {
    let client = connect(host, port).await;
    let seeded = seed_tenant(&client, "101").await;

    let n = 2000u64;
    let mut latencies = Vec::with_capacity(n as usize);
    let start = Instant::now();

    for i in 0..n {
        let t = Instant::now();
        insert_stay(&client, &seeded, i).await;
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("write latency", &mut latencies);
}

async fn phase2_concurrent(host: &str, port: u16) {
    let n_tasks = 10;
    let n_per_task = 200u64;

    let start = Instant::now();
    let mut handles = Vec::new();

    for i in 0..n_tasks {
        let host = host.to_string();
        handles.push(tokio::spawn(async move {
            // Each task gets its own tenant (unique dbname from connect())
            let client = connect(&host, port).await;
            let seeded = seed_tenant(&client, &format!("{}", 100 + i)).await;
            for j in 0..n_per_task {
                insert_stay(&client, &seeded, j).await;
            }
        }));
    }

    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let total = n_tasks as u64 * n_per_task;
    println!(
        "  {n_tasks} tasks x {n_per_task} bookings = {total} total in {:.2}s = {:.0} ops/sec",
        elapsed.as_secs_f64(),
        total as f64 / elapsed.as_secs_f64()
    );
}

async fn phase3_read_under_load(host: &str, port: u16) {
    // Writer tasks: continuously add bookings in the background
    let stop = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
    let mut writer_handles = Vec::new();
    for _ in 0..5 {
        let host = host.to_string();
        let stop = stop.clone();
        writer_handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let seeded = seed_tenant(&client, "201").await;
            let mut i = 0u64;
            while !stop.load(std::sync::atomic::Ordering::Relaxed) {
                insert_stay(&client, &seeded, i).await;
                i += 1;
            }
        }));
    }

    // Reader tasks: query availability against their own pre-filled tenants
    let n_readers = 10;
    let reads_per_reader = 500;
    let mut reader_handles = Vec::new();

    for _ in 0..n_readers {
        let host = host.to_string();
        reader_handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let seeded = seed_tenant(&client, "301").await;
            for i in 0..50 {
                insert_stay(&client, &seeded, i * 2).await;
            }

            let room = seeded.room;
            let mut latencies = Vec::with_capacity(reads_per_reader);
            for _ in 0..reads_per_reader {
                let t = Instant::now();
                client
                    .batch_execute(&format!(
                        "SELECT * FROM free_ranges WHERE room_id = '{room}' \
                         AND check_in = '{}' AND check_out = '{}'",
                        day(0),
                        day(120)
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

    stop.store(true, std::sync::atomic::Ordering::Relaxed);
    for h in writer_handles {
        let _ = h.await;
    }

    print_latency("free_ranges query", &mut all_latencies);
}

async fn phase4_conflict_storm(host: &str, port: u16) {
    // Many connections race for the same week in the same tenant; exactly one
    // insert per contested range should win.
    let dbname = format!("storm_{}", Ulid::new());
    let mut config = Config::new();
    config
        .host(host)
        .port(port)
        .dbname(&dbname)
        .user("kenneld")
        .password("kenneld");
    let (client, conn) = config.connect(NoTls).await.expect("connect failed");
    tokio::spawn(async move {
        let _ = conn.await;
    });
    let seeded = seed_tenant(&client, "401").await;

    let n_conns = 50;
    let start = Instant::now();
    let won = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let mut handles = Vec::new();

    for _ in 0..n_conns {
        let host = host.to_string();
        let dbname = dbname.clone();
        let won = won.clone();
        let room = seeded.room;
        let pet = seeded.pet;
        handles.push(tokio::spawn(async move {
            let mut config = Config::new();
            config
                .host(&host)
                .port(port)
                .dbname(&dbname)
                .user("kenneld")
                .password("kenneld");
            let (client, conn) = config.connect(NoTls).await.expect("connect failed");
            tokio::spawn(async move {
                let _ = conn.await;
            });

            let bid = Ulid::new();
            let result = client
                .batch_execute(&format!(
                    "INSERT INTO bookings (id, check_in, check_out, room_id, pet_ids) \
                     VALUES ('{bid}', '{}', '{}', '{room}', '{pet}')",
                    day(0),
                    day(7)
                ))
                .await;
            if result.is_ok() {
                won.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            }
        }));
    }

    for h in handles {
        let _ = h.await;
    }

    let elapsed = start.elapsed();
    let ok = won.load(std::sync::atomic::Ordering::Relaxed);
    println!(
        "  {n_conns} racers for one week: {ok} accepted in {:.2}s",
        elapsed.as_secs_f64()
    );
}

#[tokio::main]
async fn main() {
    let host = std::env::var("KENNELD_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("KENNELD_PORT")
        .unwrap_or_else(|_| "5433".into())
        .parse()
        .expect("invalid KENNELD_PORT");

    println!("=== kenneld stress benchmark ===");
    println!("target: {host}:{port}\n");

    // Each phase uses its own tenant (unique dbname) to avoid interference

    println!("[phase 1] sequential write throughput");
    phase1_sequential(&host, port).await;

    println!("\n[phase 2] concurrent write throughput");
    phase2_concurrent(&host, port).await;

    println!("\n[phase 3] read latency under write load");
    phase3_read_under_load(&host, port).await;

    println!("\n[phase 4] conflict storm");
    phase4_conflict_storm(&host, port).await;

    println!("\n=== benchmark complete ===");
}
