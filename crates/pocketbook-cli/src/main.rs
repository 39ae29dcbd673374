mod cli;
mod config;
mod storage;

use crate::cli::ConfigCommand;
use clap::Parser;
use color_eyre::Result;
use pocketbook_core::{sensitive::is_sensitive_key, storage::KeyValueStore};
use pocketbook_storage::{envelope::SecurePayload, JsonFileStore, SecureKeyValueStore};
use serde_json::Value;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let cli = cli::Cli::parse();
    let config = config::load()?;
    match cli.command {
        cli::Command::Version => print_version(),
        cli::Command::Config(ConfigCommand::Init) => init_config(&config)?,
        command => {
            let store = storage::store_from_config(&config).await?;
            run_store_command(&store, command).await?;
        }
    }

    Ok(())
}

fn init_tracing() {
    // Respect user-provided filters, default to info to avoid noisy stdout.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

fn print_version() {
    println!("pocketbook {}", env!("CARGO_PKG_VERSION"));
}

fn init_config(config: &config::Config) -> Result<()> {
    let path = config::write_default_if_missing(config)?;
    println!("Config initialized at {}", path.display());
    Ok(())
}

async fn run_store_command(
    store: &SecureKeyValueStore<JsonFileStore>,
    command: cli::Command,
) -> Result<()> {
    match command {
        cli::Command::Get { key } => {
            let value = store.get_item(&key).await?.unwrap_or(Value::Null);
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        cli::Command::Set { key, value } => {
            store.set_item(&key, parse_value(value)).await?;
            if is_sensitive_key(&key) {
                println!("Stored {key} (encrypted)");
            } else {
                println!("Stored {key}");
            }
        }
        cli::Command::Remove { keys } => {
            store.multi_remove(&keys).await?;
            println!("Removed {}", keys.join(", "));
        }
        cli::Command::Inspect { key } => {
            let raw = store.backend().get_item(&key).await?.unwrap_or(Value::Null);
            println!("{}", serde_json::to_string_pretty(&raw)?);
        }
        cli::Command::Health => {
            run_store_health(store).await?;
            println!("Storage: ok ({})", store.values().cipher_name());
        }
        cli::Command::Version | cli::Command::Config(_) => {}
    }
    Ok(())
}

/// JSON when it parses, otherwise the raw text as a string.
fn parse_value(raw: String) -> Value {
    serde_json::from_str(&raw).unwrap_or(Value::String(raw))
}

/// Round-trips a probe through the backend and the encryption layer without
/// touching real preferences.
async fn run_store_health<B: KeyValueStore>(store: &SecureKeyValueStore<B>) -> Result<()> {
    let probe_key = "health-probe";
    let payload = Value::String("ok".into());
    store.set_item(probe_key, payload.clone()).await?;
    let round_trip = store.get_item(probe_key).await?;
    store.remove_item(probe_key).await?;
    if round_trip.as_ref() != Some(&payload) {
        color_eyre::eyre::bail!("storage round-trip failed");
    }

    let values = store.values();
    let sealed = values
        .prepare_for_storage("user-token", payload.clone())
        .await?;
    if !SecurePayload::is_envelope(&sealed) {
        color_eyre::eyre::bail!("sensitive value was not encrypted");
    }
    let opened = values.read_from_storage("user-token", Some(sealed)).await?;
    if opened.as_ref() != Some(&payload) {
        color_eyre::eyre::bail!("encryption round-trip failed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage;

    #[tokio::test]
    async fn health_check_with_test_store_succeeds() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = storage::test_store(dir.path()).await;
        run_store_health(&store)
            .await
            .expect("health check should succeed");
        assert_eq!(store.get_item("health-probe").await.expect("get"), None);
    }

    #[tokio::test]
    async fn set_then_get_decrypts_sensitive_values() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = storage::test_store(dir.path()).await;
        run_store_command(
            &store,
            cli::Command::Set {
                key: "syncServerConfig".into(),
                value: r#"{"url":"https://sync.example"}"#.into(),
            },
        )
        .await
        .expect("set");

        let raw = store
            .backend()
            .get_item("syncServerConfig")
            .await
            .expect("raw")
            .expect("present");
        assert!(SecurePayload::is_envelope(&raw));
        assert_eq!(
            store.get_item("syncServerConfig").await.expect("get"),
            Some(serde_json::json!({ "url": "https://sync.example" }))
        );
    }

    #[test]
    fn parse_value_falls_back_to_string() {
        assert_eq!(parse_value("42".into()), serde_json::json!(42));
        assert_eq!(parse_value("[1,2]".into()), serde_json::json!([1, 2]));
        assert_eq!(parse_value("abc123".into()), serde_json::json!("abc123"));
    }
}
