//! Prometheus-compatible metrics endpoint
//!
//! Exposes actor lifecycle counters in Prometheus text format and as JSON.
//! Default endpoint: http://localhost:9090/metrics

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, info};

const TICK_HISTORY: usize = 1000;

/// Metrics registry shared by every session in the process
#[derive(Debug)]
pub struct Metrics {
    // Spawn coordination
    pub spawn_grants: AtomicU64,
    pub spawn_denials: AtomicU64,
    pub spawn_registrations: AtomicU64,
    pub duplicate_rejections: AtomicU64,
    pub creation_failures: AtomicU64,
    pub retries_exhausted: AtomicU64,
    pub teardowns: AtomicU64,

    // Duplicate reconciler
    pub reconciler_sweeps: AtomicU64,
    pub reconciler_pruned: AtomicU64,

    // Replication
    pub snapshots_published: AtomicU64,
    pub snapshots_applied: AtomicU64,
    pub snapshots_discarded: AtomicU64,
    pub snap_corrections: AtomicU64,
    pub packets_dropped: AtomicU64,

    // Movement
    pub jumps_accepted: AtomicU64,
    pub jumps_rejected: AtomicU64,
    pub floor_respawns: AtomicU64,

    // Tick timing (microseconds)
    pub tick_time_us: AtomicU64,
    pub tick_time_p95_us: AtomicU64,
    pub tick_time_max_us: AtomicU64,
    pub tick_count: AtomicU64,

    start_time: Instant,
    tick_history: RwLock<VecDeque<u64>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            spawn_grants: AtomicU64::new(0),
            spawn_denials: AtomicU64::new(0),
            spawn_registrations: AtomicU64::new(0),
            duplicate_rejections: AtomicU64::new(0),
            creation_failures: AtomicU64::new(0),
            retries_exhausted: AtomicU64::new(0),
            teardowns: AtomicU64::new(0),
            reconciler_sweeps: AtomicU64::new(0),
            reconciler_pruned: AtomicU64::new(0),
            snapshots_published: AtomicU64::new(0),
            snapshots_applied: AtomicU64::new(0),
            snapshots_discarded: AtomicU64::new(0),
            snap_corrections: AtomicU64::new(0),
            packets_dropped: AtomicU64::new(0),
            jumps_accepted: AtomicU64::new(0),
            jumps_rejected: AtomicU64::new(0),
            floor_respawns: AtomicU64::new(0),
            tick_time_us: AtomicU64::new(0),
            tick_time_p95_us: AtomicU64::new(0),
            tick_time_max_us: AtomicU64::new(0),
            tick_count: AtomicU64::new(0),
            start_time: Instant::now(),
            tick_history: RwLock::new(VecDeque::with_capacity(TICK_HISTORY)),
        }
    }

    #[inline]
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Record a tick time and update percentiles
    pub fn record_tick_time(&self, duration: Duration) {
        let us = duration.as_micros() as u64;
        self.tick_time_us.store(us, Ordering::Relaxed);
        self.tick_count.fetch_add(1, Ordering::Relaxed);

        let mut history = self.tick_history.write();
        history.push_back(us);
        while history.len() > TICK_HISTORY {
            history.pop_front();
        }

        if history.len() >= 10 {
            let mut sorted: Vec<u64> = history.iter().copied().collect();
            sorted.sort_unstable();
            let p95_idx = (sorted.len() as f32 * 0.95) as usize;
            self.tick_time_p95_us
                .store(sorted[p95_idx.min(sorted.len() - 1)], Ordering::Relaxed);
            self.tick_time_max_us
                .store(sorted.last().copied().unwrap_or(0), Ordering::Relaxed);
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Generate Prometheus-format metrics output
    pub fn to_prometheus(&self) -> String {
        let mut output = String::with_capacity(4096);

        macro_rules! metric {
            ($name:expr, $help:expr, $type:expr, $value:expr) => {
                output.push_str(&format!(
                    "# HELP {} {}\n# TYPE {} {}\n{} {}\n",
                    $name, $help, $name, $type, $name, $value
                ));
            };
        }

        metric!("party_actor_spawn_grants_total", "Spawn requests granted", "counter",
            self.spawn_grants.load(Ordering::Relaxed));
        metric!("party_actor_spawn_denials_total", "Spawn requests denied", "counter",
            self.spawn_denials.load(Ordering::Relaxed));
        metric!("party_actor_spawn_registrations_total", "Local actors registered", "counter",
            self.spawn_registrations.load(Ordering::Relaxed));
        metric!("party_actor_duplicate_rejections_total", "Actors destroyed at registration as duplicates", "counter",
            self.duplicate_rejections.load(Ordering::Relaxed));
        metric!("party_actor_creation_failures_total", "Actor creation failures", "counter",
            self.creation_failures.load(Ordering::Relaxed));
        metric!("party_actor_retries_exhausted_total", "Spawn retry budgets exhausted", "counter",
            self.retries_exhausted.load(Ordering::Relaxed));
        metric!("party_actor_teardowns_total", "Local actors torn down", "counter",
            self.teardowns.load(Ordering::Relaxed));

        metric!("party_actor_reconciler_sweeps_total", "Duplicate reconciler sweeps", "counter",
            self.reconciler_sweeps.load(Ordering::Relaxed));
        metric!("party_actor_reconciler_pruned_total", "Duplicate actors pruned by the reconciler", "counter",
            self.reconciler_pruned.load(Ordering::Relaxed));

        metric!("party_actor_snapshots_published_total", "Snapshots published by owners", "counter",
            self.snapshots_published.load(Ordering::Relaxed));
        metric!("party_actor_snapshots_applied_total", "Snapshots accepted by observers", "counter",
            self.snapshots_applied.load(Ordering::Relaxed));
        metric!("party_actor_snapshots_discarded_total", "Stale snapshots discarded", "counter",
            self.snapshots_discarded.load(Ordering::Relaxed));
        metric!("party_actor_snap_corrections_total", "Replica snap corrections", "counter",
            self.snap_corrections.load(Ordering::Relaxed));
        metric!("party_actor_packets_dropped_total", "Undecodable packets dropped", "counter",
            self.packets_dropped.load(Ordering::Relaxed));

        metric!("party_actor_jumps_accepted_total", "Jumps accepted", "counter",
            self.jumps_accepted.load(Ordering::Relaxed));
        metric!("party_actor_jumps_rejected_total", "Jumps rejected", "counter",
            self.jumps_rejected.load(Ordering::Relaxed));
        metric!("party_actor_floor_respawns_total", "Respawns after falling below the floor", "counter",
            self.floor_respawns.load(Ordering::Relaxed));

        metric!("party_actor_tick_time_microseconds", "Current tick time in microseconds", "gauge",
            self.tick_time_us.load(Ordering::Relaxed));
        metric!("party_actor_tick_time_p95_microseconds", "95th percentile tick time", "gauge",
            self.tick_time_p95_us.load(Ordering::Relaxed));
        metric!("party_actor_tick_time_max_microseconds", "Maximum tick time", "gauge",
            self.tick_time_max_us.load(Ordering::Relaxed));
        metric!("party_actor_tick_count", "Total ticks processed", "counter",
            self.tick_count.load(Ordering::Relaxed));
        metric!("party_actor_uptime_seconds", "Process uptime in seconds", "counter",
            self.uptime_seconds());

        output
    }

    /// JSON form of the same counters
    pub fn to_json(&self) -> String {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        json!({
            "spawn": {
                "grants": load(&self.spawn_grants),
                "denials": load(&self.spawn_denials),
                "registrations": load(&self.spawn_registrations),
                "duplicate_rejections": load(&self.duplicate_rejections),
                "creation_failures": load(&self.creation_failures),
                "retries_exhausted": load(&self.retries_exhausted),
                "teardowns": load(&self.teardowns),
            },
            "reconciler": {
                "sweeps": load(&self.reconciler_sweeps),
                "pruned": load(&self.reconciler_pruned),
            },
            "replication": {
                "published": load(&self.snapshots_published),
                "applied": load(&self.snapshots_applied),
                "discarded": load(&self.snapshots_discarded),
                "snap_corrections": load(&self.snap_corrections),
                "packets_dropped": load(&self.packets_dropped),
            },
            "movement": {
                "jumps_accepted": load(&self.jumps_accepted),
                "jumps_rejected": load(&self.jumps_rejected),
                "floor_respawns": load(&self.floor_respawns),
            },
            "performance": {
                "tick_time_us": load(&self.tick_time_us),
                "tick_time_p95_us": load(&self.tick_time_p95_us),
                "tick_time_max_us": load(&self.tick_time_max_us),
                "tick_count": load(&self.tick_count),
                "uptime_seconds": self.uptime_seconds(),
            },
        })
        .to_string()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

fn http_response(content_type: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        content_type,
        body.len(),
        body
    )
}

/// Start the metrics HTTP server
pub async fn start_metrics_server(metrics: Arc<Metrics>, port: u16) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;

    info!("Metrics server listening on http://{}/metrics", addr);
    serve_metrics(listener, metrics).await
}

/// Answer metrics requests on an already-bound listener
pub async fn serve_metrics(listener: TcpListener, metrics: Arc<Metrics>) -> anyhow::Result<()> {
    loop {
        let (mut socket, peer) = listener.accept().await?;
        let metrics = metrics.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 1024];

            match socket.read(&mut buffer).await {
                Ok(n) if n > 0 => {
                    let request = String::from_utf8_lossy(&buffer[..n]);

                    let response = if request.starts_with("GET /metrics/json") {
                        http_response("application/json", &metrics.to_json())
                    } else if request.starts_with("GET /metrics") {
                        http_response("text/plain; version=0.0.4", &metrics.to_prometheus())
                    } else if request.starts_with("GET /health") {
                        http_response("text/plain", "OK")
                    } else {
                        "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                            .to_string()
                    };

                    if let Err(e) = socket.write_all(response.as_bytes()).await {
                        debug!("Failed to write metrics response to {}: {}", peer, e);
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    debug!("Failed to read from metrics socket {}: {}", peer, e);
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_new() {
        let metrics = Metrics::new();
        assert_eq!(metrics.spawn_grants.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.tick_count.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_record_tick_time() {
        let metrics = Metrics::new();
        for i in 0..100 {
            metrics.record_tick_time(Duration::from_micros(100 + i * 10));
        }

        assert_eq!(metrics.tick_count.load(Ordering::Relaxed), 100);
        assert!(metrics.tick_time_p95_us.load(Ordering::Relaxed) > 0);
        assert_eq!(metrics.tick_time_max_us.load(Ordering::Relaxed), 1090);
    }

    #[test]
    fn test_prometheus_format() {
        let metrics = Metrics::new();
        Metrics::incr(&metrics.spawn_grants);
        Metrics::add(&metrics.reconciler_pruned, 3);

        let output = metrics.to_prometheus();
        assert!(output.contains("party_actor_spawn_grants_total 1"));
        assert!(output.contains("party_actor_reconciler_pruned_total 3"));
        assert!(output.contains("# TYPE party_actor_tick_time_microseconds gauge"));
    }

    #[tokio::test]
    async fn test_server_routes() {
        use tokio::net::TcpStream;

        let metrics = Arc::new(Metrics::new());
        Metrics::incr(&metrics.spawn_registrations);
        let listener = tokio_test::assert_ok!(TcpListener::bind("127.0.0.1:0").await);
        let addr = tokio_test::assert_ok!(listener.local_addr());
        tokio::spawn(serve_metrics(listener, metrics));

        async fn get(addr: std::net::SocketAddr, path: &str) -> String {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream
                .write_all(format!("GET {} HTTP/1.1\r\n\r\n", path).as_bytes())
                .await
                .unwrap();
            let mut response = String::new();
            stream.read_to_string(&mut response).await.unwrap();
            response
        }

        let prometheus = get(addr, "/metrics").await;
        assert!(prometheus.starts_with("HTTP/1.1 200 OK"));
        assert!(prometheus.contains("party_actor_spawn_registrations_total 1"));

        let json = get(addr, "/metrics/json").await;
        assert!(json.contains("application/json"));
        assert!(json.contains("\"registrations\":1"));

        assert!(get(addr, "/health").await.ends_with("OK"));
        assert!(get(addr, "/nope").await.starts_with("HTTP/1.1 404"));
    }

    #[test]
    fn test_json_format() {
        let metrics = Metrics::new();
        Metrics::incr(&metrics.jumps_accepted);

        let value: serde_json::Value = serde_json::from_str(&metrics.to_json()).unwrap();
        assert_eq!(value["movement"]["jumps_accepted"], 1);
        assert_eq!(value["spawn"]["grants"], 0);
    }
}
