//! Minimal end-to-end usage: one fixed-window rule, a whitelist entry, and
//! the in-memory counter store.

use std::sync::Arc;

use quell_core::RequestSnapshot;
use quell_engine::{EngineBuilder, run_cleanup};
use quell_rules::{Config, FixedWindow, LimitMethod, RequestMatcher, Rule};
use quell_store_memory::MemoryCounterStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let rule = Rule::new(
        RequestMatcher::for_uri("^/api/orders")?.with_method("POST"),
        LimitMethod::FixedWindow(FixedWindow {
            permit_limit: 3,
            interval_seconds: 10,
            should_throw_on_failures: false,
        }),
    );

    let config = Config::new("orders-api")
        .with_rule(rule)
        .with_whitelisted(RequestMatcher::for_uri("^/health")?);

    let engine = EngineBuilder::new()
        .store(Arc::new(MemoryCounterStore::new()))
        .config(config)
        .identity_extractor(|req: &dyn quell_core::RequestProxy| {
            req.header("x-api-key").map(String::from)
        })
        .build()
        .await?;

    for attempt in 1..=5 {
        let request =
            RequestSnapshot::new("POST", "/api/orders").with_header("x-api-key", "demo-key");

        let mut cleanup = Vec::new();
        let results = engine.evaluate(&request, &mut cleanup).await?;

        match results.iter().find(|r| r.exceeded) {
            Some(result) => println!(
                "request {attempt}: throttled, retry after {}s",
                result.retry_after.header_value()
            ),
            None => println!("request {attempt}: admitted"),
        }

        run_cleanup(cleanup).await;
    }

    // Whitelisted traffic bypasses every counter.
    let health = RequestSnapshot::new("GET", "/health");
    let mut cleanup = Vec::new();
    let results = engine.evaluate(&health, &mut cleanup).await?;
    println!("health check results: {}", results.len());

    Ok(())
}
