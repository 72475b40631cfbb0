//! `gemrelay status`: Show configuration and store status.

use gemrelay_config::AppConfig;
use gemrelay_store::ConversationStore;
use std::path::Path;

pub fn run(config: &AppConfig, config_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("GemRelay Status");
    println!("===============");
    println!("  Config file:  {}", config_path.display());
    println!("  Server:       {}:{}", config.server.host, config.server.port);
    println!("  Bridge:       {}", config.remote.bridge_url);
    println!("  Clients:      {}", config.remote.client_ids().join(", "));
    println!("  Models:       {}", config.remote.models.join(", "));
    println!("  Log level:    {}", config.logging.level);
    println!("  Storage:      {}", config.storage.path.display());

    if !config_path.exists() {
        println!("\n  No config file, run `gemrelay init` first");
    }

    if !config.storage.path.exists() {
        println!("  No conversation store yet");
        return Ok(());
    }

    // Opening takes the database lock; a running server holds it.
    match ConversationStore::open_path(&config.storage.path) {
        Ok(store) => {
            let stats = store.stats()?;
            println!("  Records:      {}", stats.records);
            println!("  Fingerprints: {}", stats.fingerprints);
            println!(
                "  Disk usage:   {} / {} bytes",
                stats.size_on_disk, config.storage.max_size
            );
        }
        Err(e) => println!("  Store unavailable: {e}"),
    }

    Ok(())
}
