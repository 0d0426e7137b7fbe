use rand::{rngs::StdRng, Rng, SeedableRng};
use std::time::{Duration, Instant};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let url = args
        .get(1)
        .cloned()
        .unwrap_or_else(|| "http://127.0.0.1:8080".into());
    let users: u64 = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(2_000);
    let edges: usize = args.get(3).and_then(|s| s.parse().ok()).unwrap_or(20_000);
    let requests: usize = args.get(4).and_then(|s| s.parse().ok()).unwrap_or(500);
    println!(
        "load: url={}, users={}, edges={}, requests={}",
        url, users, edges, requests
    );

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()?;
    let mut rng = StdRng::seed_from_u64(1234);

    // seed a random follow graph
    for _ in 0..edges {
        let src = rng.gen_range(0..users);
        let dst = rng.gen_range(0..users);
        let body = serde_json::json!({ "src": src, "dst": dst });
        client
            .post(format!("{}/follow", url))
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
    }

    // embeddings for a tenth of the population
    for user in 0..users / 10 {
        let v: Vec<f32> = (0..64).map(|_| rng.gen()).collect();
        let body = serde_json::json!({ "user_id": user, "vector": v });
        client
            .put(format!("{}/embedding", url))
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
    }

    // fire recommendation requests
    let mut times = Vec::with_capacity(requests);
    for _ in 0..requests {
        let user = rng.gen_range(0..users);
        let start = Instant::now();
        client
            .get(format!("{}/pymk?user_id={}&k=20", url, user))
            .send()
            .await?
            .error_for_status()?;
        times.push(start.elapsed());
    }

    times.sort();
    let p =
        |pct: f32| times[(pct * times.len() as f32).clamp(0.0, (times.len() - 1) as f32) as usize];
    let mean = times.iter().map(|d| d.as_secs_f64()).sum::<f64>() / times.len() as f64;
    println!(
        "p50 {:.2} ms, p95 {:.2} ms, p99 {:.2} ms, mean {:.2} ms",
        p(0.50).as_secs_f64() * 1000.0,
        p(0.95).as_secs_f64() * 1000.0,
        p(0.99).as_secs_f64() * 1000.0,
        mean * 1000.0
    );
    Ok(())
}
