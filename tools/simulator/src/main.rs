// =============================================================================
// TELTONIKA GATEWAY — Device Simulator
// =============================================================================
// Generates a synthetic IMEI login handshake followed by Codec 8 / Codec 8
// Extended AVL frames and sends them over raw TCP to a running gateway,
// reporting ack latencies and throughput.
// =============================================================================

use clap::Parser;
use rand::rngs::ThreadRng;
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

#[derive(Parser)]
#[command(name = "teltonika-simulator")]
#[command(about = "Device simulator for the Teltonika ingestion gateway")]
struct Args {
    /// Gateway device-port address
    #[arg(long, default_value = "127.0.0.1:5027")]
    addr: String,

    /// IMEI to present during the login handshake (15 digits)
    #[arg(long, default_value = "353691841005134")]
    imei: String,

    /// Frames per second
    #[arg(long, default_value_t = 1)]
    rate: u32,

    /// Duration in seconds
    #[arg(long, default_value_t = 60)]
    duration: u64,

    /// Use Codec 8 Extended (0x8E) instead of Codec 8 (0x08)
    #[arg(long, default_value_t = false)]
    extended: bool,

    /// Records per frame
    #[arg(long, default_value_t = 1)]
    records_per_frame: usize,

    /// Center latitude (degrees)
    #[arg(long, default_value_t = 54.687_16)]
    lat: f64,

    /// Center longitude (degrees)
    #[arg(long, default_value_t = 25.279_62)]
    lon: f64,

    /// Walk a idle -> moving -> idle speed profile instead of staying still,
    /// to exercise the movement tracker's warmup/idle hysteresis.
    #[arg(long, default_value_t = false)]
    walk: bool,
}

struct Counters {
    sent: AtomicU64,
    acked: AtomicU64,
    rejected: AtomicU64,
    network_error: AtomicU64,
    latency_sum_us: AtomicU64,
}

impl Counters {
    fn new() -> Self {
        Self {
            sent: AtomicU64::new(0),
            acked: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            network_error: AtomicU64::new(0),
            latency_sum_us: AtomicU64::new(0),
        }
    }
}

fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= byte as u16;
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

fn login_frame(imei: &str) -> Vec<u8> {
    let mut f = Vec::with_capacity(2 + imei.len());
    f.extend_from_slice(&(imei.len() as u16).to_be_bytes());
    f.extend_from_slice(imei.as_bytes());
    f
}

fn push_width(out: &mut Vec<u8>, extended: bool, value: u16) {
    if extended {
        out.extend_from_slice(&value.to_be_bytes());
    } else {
        out.push(value as u8);
    }
}

/// Builds one AVL record at `lat`/`lon` (degrees) moving at `speed_kmh`.
/// IO element 240 (movementFlag, width 1) is set whenever the simulated
/// device is moving, matching what a real Teltonika unit reports.
fn build_record(ts_ms: i64, lat: f64, lon: f64, speed_kmh: u16, extended: bool) -> Vec<u8> {
    let mut r = Vec::new();
    r.extend_from_slice(&ts_ms.to_be_bytes());
    r.push(0x01); // priority
    let lon_raw = (lon.abs() * 10_000_000.0) as u32 | if lon < 0.0 { 0x8000_0000 } else { 0 };
    let lat_raw = (lat.abs() * 10_000_000.0) as u32 | if lat < 0.0 { 0x8000_0000 } else { 0 };
    r.extend_from_slice(&lon_raw.to_be_bytes());
    r.extend_from_slice(&lat_raw.to_be_bytes());
    r.extend_from_slice(&0i16.to_be_bytes()); // altitude
    r.extend_from_slice(&0u16.to_be_bytes()); // angle
    r.push(8); // satellites
    r.extend_from_slice(&speed_kmh.to_be_bytes());

    push_width(&mut r, extended, 240); // eventIoId
    push_width(&mut r, extended, 1); // total IO count

    push_width(&mut r, extended, 1); // 1-byte group count
    push_width(&mut r, extended, 240); // movementFlag id
    r.push(if speed_kmh > 0 { 1 } else { 0 });

    push_width(&mut r, extended, 0); // 2-byte group count
    push_width(&mut r, extended, 0); // 4-byte group count
    push_width(&mut r, extended, 0); // 8-byte group count
    r
}

fn avl_frame(codec: u8, extended: bool, records: &[Vec<u8>]) -> Vec<u8> {
    let mut body = Vec::new();
    body.push(codec);
    push_count(&mut body, extended, records.len() as u16);
    for r in records {
        body.extend_from_slice(r);
    }
    push_count(&mut body, extended, records.len() as u16);

    let crc = crc16(&body);
    let mut frame = Vec::with_capacity(8 + body.len() + 4);
    frame.extend_from_slice(&0u32.to_be_bytes());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);
    frame.extend_from_slice(&(crc as u32).to_be_bytes());
    frame
}

fn push_count(out: &mut Vec<u8>, extended: bool, count: u16) {
    if extended {
        out.extend_from_slice(&count.to_be_bytes());
    } else {
        out.push(count as u8);
    }
}

/// Speed (km/h) for tick `tick` out of `total_ticks` under a `--walk`
/// profile: idle for the first third, moving through the middle third,
/// idle again for the last third.
fn walk_speed_kmh(tick: u64, total_ticks: u64, rng: &mut ThreadRng) -> u16 {
    if total_ticks == 0 {
        return 0;
    }
    let phase = tick * 3 / total_ticks.max(1);
    match phase {
        0 | 2 => 0,
        _ => rng.gen_range(4..=12),
    }
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    println!("=== Teltonika Device Simulator ===");
    println!("Target:   {}", args.addr);
    println!("IMEI:     {}", args.imei);
    println!("Codec:    {}", if args.extended { "8E" } else { "8" });
    println!("Rate:     {} frame/s", args.rate);
    println!("Duration: {}s", args.duration);
    println!("Profile:  {}", if args.walk { "idle -> moving -> idle" } else { "stationary" });
    println!();

    let mut stream = match TcpStream::connect(&args.addr).await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("cannot reach gateway: {e}");
            std::process::exit(1);
        }
    };

    let login = login_frame(&args.imei);
    if let Err(e) = stream.write_all(&login).await {
        eprintln!("failed to send login frame: {e}");
        std::process::exit(1);
    }
    let mut ack = [0u8; 1];
    match stream.read_exact(&mut ack).await {
        Ok(_) if ack[0] == 0x01 => println!("login accepted"),
        Ok(_) => {
            eprintln!("unexpected login ack byte: {:#x}", ack[0]);
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("gateway closed connection during login (unknown device?): {e}");
            std::process::exit(1);
        }
    }

    let counters = Arc::new(Counters::new());
    let codec = if args.extended { 0x8E } else { 0x08 };
    let interval = Duration::from_micros(1_000_000 / args.rate.max(1) as u64);
    let total_ticks = args.rate as u64 * args.duration;
    let deadline = Instant::now() + Duration::from_secs(args.duration);

    println!("\nSending...\n");
    let start = Instant::now();
    let mut rng = rand::thread_rng();
    let mut tick = 0u64;

    while Instant::now() < deadline {
        let speed_kmh = if args.walk {
            walk_speed_kmh(tick, total_ticks, &mut rng)
        } else {
            0
        };

        let lat_jitter = rng.gen_range(-0.0005..0.0005);
        let lon_jitter = rng.gen_range(-0.0005..0.0005);
        let records: Vec<Vec<u8>> = (0..args.records_per_frame)
            .map(|_| {
                build_record(
                    now_ms(),
                    args.lat + lat_jitter,
                    args.lon + lon_jitter,
                    speed_kmh,
                    args.extended,
                )
            })
            .collect();
        let frame = avl_frame(codec, args.extended, &records);

        let req_start = Instant::now();
        counters.sent.fetch_add(1, Ordering::Relaxed);

        match send_and_wait_ack(&mut stream, &frame).await {
            Ok(n) if n as usize == args.records_per_frame => {
                let lat = req_start.elapsed().as_micros() as u64;
                counters.latency_sum_us.fetch_add(lat, Ordering::Relaxed);
                counters.acked.fetch_add(1, Ordering::Relaxed);
            }
            Ok(_) => {
                counters.rejected.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                counters.network_error.fetch_add(1, Ordering::Relaxed);
                break;
            }
        }

        tick += 1;
        if tick % 50 == 0 {
            let elapsed = start.elapsed().as_secs_f64();
            println!(
                "  [{:.1}s] sent={} acked={} rejected={} err={} ({:.1} frame/s)",
                elapsed,
                counters.sent.load(Ordering::Relaxed),
                counters.acked.load(Ordering::Relaxed),
                counters.rejected.load(Ordering::Relaxed),
                counters.network_error.load(Ordering::Relaxed),
                tick as f64 / elapsed,
            );
        }

        let target = Duration::from_micros(tick * interval.as_micros() as u64);
        let actual = start.elapsed();
        if actual < target {
            tokio::time::sleep(target - actual).await;
        }
    }

    let elapsed = start.elapsed();
    let sent = counters.sent.load(Ordering::Relaxed);
    let acked = counters.acked.load(Ordering::Relaxed);
    let avg_lat = if acked > 0 {
        counters.latency_sum_us.load(Ordering::Relaxed) / acked
    } else {
        0
    };

    println!("\n=== Results ===");
    println!("Duration:     {:.2}s", elapsed.as_secs_f64());
    println!("Total sent:   {sent}");
    println!(
        "Acked:        {} ({:.1}%)",
        acked,
        acked as f64 / sent.max(1) as f64 * 100.0
    );
    println!("Rejected:     {}", counters.rejected.load(Ordering::Relaxed));
    println!("Net errors:   {}", counters.network_error.load(Ordering::Relaxed));
    println!("Avg ack lat:  {avg_lat} us");
    println!("Throughput:   {:.1} frame/s", sent as f64 / elapsed.as_secs_f64());
}

async fn send_and_wait_ack(stream: &mut TcpStream, frame: &[u8]) -> std::io::Result<u32> {
    stream.write_all(frame).await?;
    let mut ack = [0u8; 4];
    stream.read_exact(&mut ack).await?;
    Ok(u32::from_be_bytes(ack))
}
