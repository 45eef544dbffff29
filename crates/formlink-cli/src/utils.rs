use anyhow::{Context, Result};
use formlink::FormlinkConfig;
use serde::de::DeserializeOwned;
use std::io::Read;
use std::path::Path;

/// Logs go to stderr so stdout stays valid JSON.
pub fn init_logging() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

/// Config file (if any) with `FORMLINK_*` variables and the CLI port on top.
pub fn load_config(path: Option<&Path>, port: Option<u16>) -> Result<FormlinkConfig> {
    let mut config = match path {
        Some(path) => read_document::<FormlinkConfig>(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => FormlinkConfig::default(),
    };
    config
        .apply_overrides(|key| std::env::var(key).ok())
        .context("invalid FORMLINK_* environment override")?;
    if port.is_some() {
        config.bridge.port = port;
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

/// Reads JSON or YAML, chosen by extension. Anything else, stdin included,
/// goes through the YAML parser, which also accepts JSON.
pub fn read_document<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = if path == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read stdin")?;
        buf
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?
    };

    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));
    if is_json {
        serde_json::from_str(&content).context("invalid JSON")
    } else {
        serde_yaml::from_str(&content).context("invalid YAML")
    }
}

pub fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
