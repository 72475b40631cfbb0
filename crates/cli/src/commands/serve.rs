//! `gemrelay serve`: Start the HTTP API server.

use gemrelay_config::AppConfig;

pub async fn run(
    mut config: AppConfig,
    port_override: Option<u16>,
) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(port) = port_override {
        config.server.port = port;
    }

    println!("GemRelay");
    println!("   Listening: {}:{}", config.server.host, config.server.port);
    println!("   Clients:   {}", config.remote.client_ids().join(", "));
    println!("   Bridge:    {}", config.remote.bridge_url);
    println!("   Storage:   {}", config.storage.path.display());
    println!(
        "   API key:   {}",
        if config.server.api_key.is_some() { "required" } else { "not set" }
    );

    gemrelay_gateway::start(config).await?;

    Ok(())
}
