use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;

const BUCKETS: [f64; 11] = [0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

#[derive(Default)]
struct RouteStats {
    count: u64,
    sum_seconds: f64,
    buckets: [u64; BUCKETS.len()],
}

/// Service counters rendered as a Prometheus text exposition by `render`.
#[derive(Default)]
pub struct Metrics {
    routes: Mutex<HashMap<(String, String), RouteStats>>,
    follows: AtomicU64,
    unfollows: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    cache_evictions: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self, method: &str, path: &str, elapsed: Duration) {
        let secs = elapsed.as_secs_f64();
        let mut routes = self.routes.lock().unwrap();
        let stats = routes
            .entry((method.to_string(), path.to_string()))
            .or_default();
        stats.count += 1;
        stats.sum_seconds += secs;
        for (slot, bound) in stats.buckets.iter_mut().zip(BUCKETS) {
            if secs <= bound {
                *slot += 1;
            }
        }
    }

    pub fn record_follow(&self) {
        self.follows.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unfollow(&self) {
        self.unfollows.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cache_eviction(&self) {
        self.cache_evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let routes = self.routes.lock().unwrap();
        let mut entries: Vec<(&(String, String), &RouteStats)> = routes.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));

        out.push_str("# HELP sg_requests_total Total HTTP requests by method and path.\n");
        out.push_str("# TYPE sg_requests_total counter\n");
        for (key, stats) in &entries {
            let (method, path) = (&key.0, &key.1);
            let _ = writeln!(
                out,
                "sg_requests_total{{method=\"{method}\",path=\"{path}\"}} {}",
                stats.count
            );
        }

        out.push_str(
            "# HELP sg_request_duration_seconds HTTP request duration in seconds by method and path.\n",
        );
        out.push_str("# TYPE sg_request_duration_seconds histogram\n");
        for (key, stats) in &entries {
            let (method, path) = (&key.0, &key.1);
            for (cum, bound) in stats.buckets.iter().zip(BUCKETS) {
                let _ = writeln!(
                    out,
                    "sg_request_duration_seconds_bucket{{method=\"{method}\",path=\"{path}\",le=\"{bound}\"}} {cum}"
                );
            }
            let _ = writeln!(
                out,
                "sg_request_duration_seconds_bucket{{method=\"{method}\",path=\"{path}\",le=\"+Inf\"}} {}",
                stats.count
            );
            let _ = writeln!(
                out,
                "sg_request_duration_seconds_sum{{method=\"{method}\",path=\"{path}\"}} {}",
                stats.sum_seconds
            );
            let _ = writeln!(
                out,
                "sg_request_duration_seconds_count{{method=\"{method}\",path=\"{path}\"}} {}",
                stats.count
            );
        }

        out.push_str("# HELP sg_follow_ops_total Follow/Unfollow operations.\n");
        out.push_str("# TYPE sg_follow_ops_total counter\n");
        let _ = writeln!(
            out,
            "sg_follow_ops_total{{op=\"follow\"}} {}",
            self.follows.load(Ordering::Relaxed)
        );
        let _ = writeln!(
            out,
            "sg_follow_ops_total{{op=\"unfollow\"}} {}",
            self.unfollows.load(Ordering::Relaxed)
        );

        out.push_str("# HELP sg_pymk_cache_events_total PYMK cache events.\n");
        out.push_str("# TYPE sg_pymk_cache_events_total counter\n");
        let _ = writeln!(
            out,
            "sg_pymk_cache_events_total{{event=\"hit\"}} {}",
            self.cache_hits.load(Ordering::Relaxed)
        );
        let _ = writeln!(
            out,
            "sg_pymk_cache_events_total{{event=\"miss\"}} {}",
            self.cache_misses.load(Ordering::Relaxed)
        );
        let _ = writeln!(
            out,
            "sg_pymk_cache_events_total{{event=\"evict\"}} {}",
            self.cache_evictions.load(Ordering::Relaxed)
        );
        out
    }
}

/// Request count/duration middleware, installed around the whole router.
pub async fn track(State(metrics): State<Arc<Metrics>>, req: Request, next: Next) -> Response {
    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let start = Instant::now();
    let res = next.run(req).await;
    metrics.record_request(&method, &path, start.elapsed());
    res
}
