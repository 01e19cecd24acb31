//! HTTP health probing with bounded exponential backoff.

use crate::models::{HealthCheckResult, HealthStatus};
use std::time::Duration;
use tokio::time::Instant;

/// Poll `url` until `expected_status` is seen or `timeout` elapses.
///
/// Uses `tokio::time::Instant` (monotonic) for the deadline so a wall-clock
/// jump can't spuriously extend or shorten the window, and
/// `tokio::time::sleep` between attempts so a slow target never blocks the
/// runtime's other in-flight tool calls.
pub async fn healthcheck(
    url: &str,
    timeout: Duration,
    initial_interval: Duration,
    backoff: f64,
    expected_status: u16,
) -> HealthCheckResult {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .expect("reqwest client config is static and valid");

    let start = Instant::now();
    let mut interval = initial_interval;
    let mut attempts = 0u32;
    let mut last_error: Option<String> = None;

    loop {
        attempts += 1;
        match client.get(url).send().await {
            Ok(resp) if resp.status().as_u16() == expected_status => {
                return HealthCheckResult {
                    status: HealthStatus::Healthy,
                    url: url.to_string(),
                    response_code: Some(resp.status().as_u16()),
                    retries: attempts - 1,
                    error: None,
                };
            }
            Ok(resp) => {
                last_error = Some(format!("unexpected status {}", resp.status()));
            }
            Err(e) => {
                last_error = Some(e.to_string());
            }
        }

        if start.elapsed() >= timeout {
            return HealthCheckResult {
                status: HealthStatus::Unhealthy,
                url: url.to_string(),
                response_code: None,
                retries: attempts - 1,
                error: Some(last_error.unwrap_or_else(|| "timeout reached".to_string())),
            };
        }

        tokio::time::sleep(interval.min(Duration::from_secs(10))).await;
        interval = interval.mul_f64(backoff);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fails_closed_when_nothing_is_listening() {
        let result = healthcheck(
            "http://127.0.0.1:1/health",
            Duration::from_millis(300),
            Duration::from_millis(50),
            2.0,
            200,
        )
        .await;
        assert_eq!(result.status, HealthStatus::Unhealthy);
        assert!(result.error.is_some());
        assert!(result.retries >= 1);
    }

    #[tokio::test]
    async fn always_makes_at_least_one_attempt() {
        let start = Instant::now();
        let result = healthcheck(
            "http://127.0.0.1:1/health",
            Duration::from_millis(1),
            Duration::from_millis(1),
            2.0,
            200,
        )
        .await;
        assert_eq!(result.status, HealthStatus::Unhealthy);
        assert!(start.elapsed() < Duration::from_secs(6));
    }
}
