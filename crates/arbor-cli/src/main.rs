use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use arbor_core::app::{CycleQuery, QueryOptions, TreeClient};
use arbor_core::clock::now_ts;
use arbor_core::domain::{SERVER_CACHE_TAG, TreeUser, Value, ValueRequest, ValueResponse};
use arbor_core::error::CommunicationError;
use arbor_core::impls::LoopbackSolver;
use arbor_core::ports::StaticConfig;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), CommunicationError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // (A) A router-less solver standing in for the tree: every request is
    // answered with a fake sensor reading that changes on each exchange.
    let reading = Arc::new(AtomicI64::new(20));
    let source = Arc::clone(&reading);
    let solver = Arc::new(LoopbackSolver::with_responder(move |request: &ValueRequest| {
        let current = source.fetch_add(1, Ordering::Relaxed);
        ValueResponse::ok(
            request.address.clone(),
            Value::new(current, now_ts())
                .with_type("int")
                .with_tag(SERVER_CACHE_TAG, true),
        )
    }));

    // (B) The client carries the identity and the configuration profile.
    let user = TreeUser::new("demo-operator").with_email("demo@observatory.test");
    let client = TreeClient::new(solver, user, Arc::new(StaticConfig));

    // (C) One-shot exchanges.
    let response = client.get("site.dome.temperature", Default::default()).await?;
    println!("GET site.dome.temperature -> {:?}", response.value);

    client
        .put("site.dome.target", Default::default(), true)
        .await?;
    println!("PUT site.dome.target sent (no_wait)");

    // (D) A periodic query delivering a fresh batch every 600 ms.
    let mut query = client.periodic_query(
        "site.dome.temperature",
        None,
        false,
        QueryOptions {
            delay: Some(0.6),
            query_name: Some("demo-temperature".to_owned()),
            ..Default::default()
        },
    )?;
    query.add_callback(Arc::new(|batch: &[ValueResponse]| {
        for r in batch {
            println!("callback: {} = {:?}", r.address, r.value.as_ref().map(|v| &v.v));
        }
    }));
    query.start();

    for _ in 0..3 {
        let batch = query.get_response().await?;
        println!("cycle delivered {} response(s)", batch.len());
    }

    // (E) Always unwind the background tasks before leaving.
    query.stop_and_wait().await;
    tracing::info!("demo finished");
    Ok(())
}
