//! geek-collab room hub binary.
//!
//! ```text
//! PORT=8080 RUST_LOG=info geek-collab
//! ```

use geek_collab::{CollabServer, ServerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = ServerConfig::from_env()?;
    log::info!(
        "Starting geek-collab on {} (mailbox {}, room queue {})",
        config.bind_addr,
        config.hub.mailbox_capacity,
        config.hub.room_queue_capacity
    );

    let server = CollabServer::new(config);
    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("Failed to listen for ctrl-c: {e}");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    log::info!("Server stopped");
    Ok(())
}
