//! `gemrelay dump`: Print stored conversations as JSON.

use gemrelay_store::ConversationStore;
use std::path::Path;

pub fn run(path: &Path, keys: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let store = ConversationStore::open_path(path)?;
    println!("{}", render(&store, keys)?);
    Ok(())
}

fn render(store: &ConversationStore, keys: &[String]) -> Result<String, Box<dyn std::error::Error>> {
    let records = store.dump(keys)?;
    Ok(serde_json::to_string_pretty(&records)?)
}
