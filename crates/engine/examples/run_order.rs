//! Runs one order saga end to end: start, update the address, approve,
//! then print the outcome and final status.
//!
//! ```sh
//! cargo run -p engine --example run_order
//! ```

use std::sync::Arc;

use common::{Address, Money, OrderId, Priority};
use engine::{
    EngineConfig, InMemoryFulfillmentOps, InMemoryLedger, SagaEngine, SignalKind, StartOrder,
};
use event_store::InMemoryEventStore;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> engine::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let store = Arc::new(InMemoryEventStore::new());
    let engine = SagaEngine::new(
        store.clone(),
        Arc::new(InMemoryFulfillmentOps::new()),
        Arc::new(InMemoryLedger::new()),
        EngineConfig::from_env(),
    );

    let order_id = OrderId::new("order-demo-1");
    let payment_id = engine
        .start(
            StartOrder::new(order_id.clone(), "cust-42", "Ada Lovelace")
                .order_total(Money::from_dollars(250))
                .priority(Priority::High),
        )
        .await?;
    println!("started {order_id} with payment token {payment_id}");

    engine
        .signal(
            &order_id,
            SignalKind::UpdateAddress {
                address: Address::new("456 New St", "Boston", "MA", "02101"),
            },
        )
        .await?;
    engine.signal(&order_id, SignalKind::Approve).await?;

    let outcome = engine.await_result(&order_id).await?;
    println!("outcome: {outcome:?}");

    let status = engine.status(&order_id).await?;
    println!("final status: {}", serde_json::to_string_pretty(&status)?);
    println!("journal: {} events", store.event_count().await);

    Ok(())
}
