use std::sync::Arc;

use redirect_dispatcher::{
    CredentialPool, DispatchConfig, InMemoryStore, RedirectDispatcher, Store,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = DispatchConfig::from_env()?;
    let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());

    let pool = CredentialPool::from_config(store.clone(), &config);
    pool.add("gsk_demo_key_0123456789").await?;
    println!("credentials: {:?}", pool.list_masked().await?);

    let dispatcher = RedirectDispatcher::from_config(store, &config).with_content_type("application/json");
    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "https://example.com/webhook".to_string());

    match dispatcher.registry().register(&url, "demo target").await {
        Ok(id) => {
            let outcome = dispatcher.dispatch(&id, br#"{"event":"messages.upsert"}"#).await?;
            println!("delivery to {}: {:?}", id, outcome);
            if !outcome.is_delivered() {
                let report = dispatcher.replay_failed(&id).await?;
                println!("replay: {:?}", report);
            }
            for snapshot in dispatcher.health_all().await? {
                println!("{}: {:?} ({} deliveries)", snapshot.target_id, snapshot.health, snapshot.total);
            }
        }
        Err(err) => println!("target rejected: {}", err),
    }

    Ok(())
}
