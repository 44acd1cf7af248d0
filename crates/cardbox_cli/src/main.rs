//! CLI smoke entry point.
//!
//! # Responsibility
//! - Verify `cardbox_core` linkage with a deterministic in-memory run.
//! - Exercise create, content update, link extraction and backlinks once.
//!
//! Set `CARDBOX_LOG_DIR` to an absolute path to capture core logs, and
//! `CARDBOX_CONFIG` to a JSON file to override store defaults.

use cardbox_core::{
    CardStore, CardType, CardUpdate, Document, SharedClock, SqliteCardBackend, StoreConfig,
    SystemClock,
};
use std::error::Error;
use std::sync::Arc;

fn main() -> Result<(), Box<dyn Error>> {
    if let Ok(log_dir) = std::env::var("CARDBOX_LOG_DIR") {
        let level = cardbox_core::default_log_level().to_string();
        cardbox_core::init_logging(&level, log_dir)?;
    }

    println!("cardbox_core ping={}", cardbox_core::ping());
    println!("cardbox_core version={}", cardbox_core::core_version());

    let config = match std::env::var("CARDBOX_CONFIG") {
        Ok(path) => StoreConfig::from_json_str(&std::fs::read_to_string(path)?)?,
        Err(_) => StoreConfig::default(),
    };

    let clock: SharedClock = Arc::new(SystemClock);
    let backend = SqliteCardBackend::open_in_memory(clock.clone())?;
    let mut store = CardStore::new(backend, clock, config);

    let alpha = store.create(CardType::Permanent, "Alpha", None)?;
    let beta = store.create(CardType::Permanent, "Beta", None)?;
    store.update(
        &beta.id,
        CardUpdate {
            content: Some(Document::paragraph("See [[Alpha]]")),
            ..CardUpdate::default()
        },
    )?;

    let beta_links = store.summary(&beta.id).map(|card| card.links).unwrap_or_default();
    log::info!(
        "event=cli_smoke module=cli status=ok cards={} links={}",
        store.len(),
        beta_links.len()
    );
    println!("smoke cards={}", store.len());
    println!("smoke beta_links_to_alpha={}", beta_links.contains(&alpha.id));
    println!("smoke alpha_backlinks={}", store.backlinks_of(&alpha.id).len());
    println!(
        "smoke beta_preview={}",
        store.default_preview(&beta.id).unwrap_or_default()
    );
    Ok(())
}
