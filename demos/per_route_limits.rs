//! Per-route admission example.
//!
//! Run with:
//! ```
//! cargo run --example per_route_limits --features memory
//! ```

use admitgate::{current_timestamp_ms, GatewayConfig, IpKey, MemoryStorage, RequestParts};

const CONFIG: &str = r#"
failure_mode: fail_closed
routes:
  - pattern: /api/search
    algorithm: fixed_window
    rate: 30
    window_size: 60
  - pattern: /api/auth/login
    variant: gcra/redis_script_period_60_rate_5_burst_0
  - pattern: /api/users/*
    algorithm: sliding_window_counter
    rate: 20
    window_size: 1
    sub_window_count: 4
  - pattern: /api/**
    variant: token_bucket/redis_async_bucket_capacity_100_refill_rate_1.67_batch_percent_0.1
"#;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = GatewayConfig::from_yaml(CONFIG)?;
    let gateway = config.gateway(MemoryStorage::new(), IpKey::new())?;
    let client = RequestParts::new("GET", "/").with_client_ip("192.0.2.10".parse()?);

    println!("=== Per-Route Admission Demo ===\n");

    // Simulate requests to different routes
    let routes = vec![
        ("/api/data", 120),       // token bucket, batched
        ("/api/search", 35),      // 30/min limit - should deny some
        ("/api/auth/login", 7),   // 5/min, no burst
        ("/api/users/42", 25),    // 20/sec limit
        ("/health", 1),           // not configured
    ];

    for (route, count) in routes {
        let mut allowed = 0;
        let mut denied = Vec::new();

        for _ in 0..count {
            let result = gateway.admit(route, &client, current_timestamp_ms()).await;
            if result.allowed {
                allowed += 1;
            } else {
                denied.push((result.reason, result.retry_after_ms));
            }
        }

        println!("Route: {} (sending {} requests)", route, count);
        println!("  Allowed: {}, Denied: {}", allowed, denied.len());
        if let Some((reason, retry_after_ms)) = denied.last() {
            println!("  Last denial: {:?}, retry after {} ms\n", reason, retry_after_ms);
        } else {
            println!();
        }
    }

    let reconciled = gateway.flush(current_timestamp_ms()).await?;
    println!("Flushed {} batched keys", reconciled);

    Ok(())
}
