pub mod trade;

pub use trade::trade;

use crate::{config::Settings, relay};

/// Run the broker-side relay server until the process is stopped.
pub async fn relay_server(settings: &Settings) -> anyhow::Result<()> {
    let server = relay::Server::bind(settings.relay.bind).await?;
    server.run().await;
    Ok(())
}
