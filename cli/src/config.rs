//! `config.toml` in the data directory.
//!
//! The file is optional and every key has a default. It is parsed with `toml_edit`; when the
//! file is not valid TOML, a line-based fallback still picks up the keys it can recognise so a
//! single typo does not reset every setting.

use std::io::ErrorKind;
use std::io::Write as _;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use ninebox_client::RetryPolicy;
use tempfile::NamedTempFile;
use toml_edit::DocumentMut;
use toml_edit::Item as TomlItem;
use tracing::warn;

pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const DEFAULT_PREFERRED_PORT: u16 = 8000;

const DEFAULT_CONFIG: &str = r#"# ninebox configuration. Every key is optional.

# Port the backend tries first. 0 lets the OS pick a free port.
preferred_port = 8000

[supervisor]
handshake_timeout_ms = 5000
health_interval_ms = 30000
health_timeout_ms = 5000
shutdown_grace_ms = 3000
max_auto_restarts = 1

[client]
max_retries = 3
retry_base_delay_ms = 1000
"#;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub preferred_port: u16,
    pub handshake_timeout: Duration,
    pub health_interval: Duration,
    pub health_timeout: Duration,
    pub shutdown_grace: Duration,
    pub max_auto_restarts: u32,
    pub client_retry: RetryPolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            preferred_port: DEFAULT_PREFERRED_PORT,
            handshake_timeout: Duration::from_secs(5),
            health_interval: Duration::from_secs(30),
            health_timeout: Duration::from_secs(5),
            shutdown_grace: Duration::from_secs(3),
            max_auto_restarts: 1,
            client_retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn in_data_dir(data_dir: &Path) -> Self {
        Self::new(data_dir.join(CONFIG_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the settings, falling back to defaults for anything missing or out of range.
    pub fn load(&self) -> anyhow::Result<Settings> {
        let mut settings = Settings::default();
        let Some(contents) = read_document_string(&self.path)? else {
            return Ok(settings);
        };

        let source = match contents.parse::<DocumentMut>() {
            Ok(doc) => ConfigSource::Document(doc),
            Err(err) => {
                warn!(
                    path = %self.path.display(),
                    "config is not valid TOML, reading what can be recovered: {err}"
                );
                ConfigSource::Lines(contents)
            }
        };
        if let Some(port) =
            convert::<u16>(source.integer(None, "preferred_port"), "preferred_port")
        {
            settings.preferred_port = port;
        }
        apply_millis(
            &mut settings.handshake_timeout,
            source.integer(Some("supervisor"), "handshake_timeout_ms"),
            "supervisor.handshake_timeout_ms",
        );
        apply_millis(
            &mut settings.health_interval,
            source.integer(Some("supervisor"), "health_interval_ms"),
            "supervisor.health_interval_ms",
        );
        apply_millis(
            &mut settings.health_timeout,
            source.integer(Some("supervisor"), "health_timeout_ms"),
            "supervisor.health_timeout_ms",
        );
        apply_millis(
            &mut settings.shutdown_grace,
            source.integer(Some("supervisor"), "shutdown_grace_ms"),
            "supervisor.shutdown_grace_ms",
        );
        if let Some(max) = convert::<u32>(
            source.integer(Some("supervisor"), "max_auto_restarts"),
            "supervisor.max_auto_restarts",
        ) {
            settings.max_auto_restarts = max;
        }
        if let Some(max) = convert::<u32>(
            source.integer(Some("client"), "max_retries"),
            "client.max_retries",
        ) {
            settings.client_retry.max_retries = max;
        }
        apply_millis(
            &mut settings.client_retry.base_delay,
            source.integer(Some("client"), "retry_base_delay_ms"),
            "client.retry_base_delay_ms",
        );

        Ok(settings)
    }

    /// Writes a commented default config when none exists yet. Returns `true` if it wrote one.
    pub fn write_default_if_missing(&self) -> anyhow::Result<bool> {
        if self.path.exists() {
            return Ok(false);
        }
        write_atomic(&self.path, DEFAULT_CONFIG)?;
        Ok(true)
    }
}

enum ConfigSource {
    Document(DocumentMut),
    Lines(String),
}

impl ConfigSource {
    fn integer(&self, table: Option<&str>, key: &str) -> Option<i64> {
        match self {
            ConfigSource::Document(doc) => read_integer(doc, table, key),
            ConfigSource::Lines(contents) => parse_integer_fallback(contents, table, key),
        }
    }
}

fn convert<T: TryFrom<i64>>(value: Option<i64>, key: &str) -> Option<T> {
    let value = value?;
    match T::try_from(value) {
        Ok(converted) => Some(converted),
        Err(_) => {
            warn!("ignoring out-of-range config value {key} = {value}");
            None
        }
    }
}

/// Durations must be positive; a zero interval would make the health timer spin.
fn apply_millis(target: &mut Duration, value: Option<i64>, key: &str) {
    match convert::<u64>(value, key) {
        Some(0) => warn!("ignoring zero duration for {key}"),
        Some(millis) => *target = Duration::from_millis(millis),
        None => {}
    }
}

fn read_integer(doc: &DocumentMut, table: Option<&str>, key: &str) -> Option<i64> {
    let item = match table {
        Some(table) => doc.get(table).and_then(TomlItem::as_table)?.get(key)?,
        None => doc.get(key)?,
    };
    item.as_value().and_then(toml_edit::Value::as_integer)
}

/// Scans `contents` line by line for `key = <integer>` inside `[table]` (or before any table
/// header when `table` is `None`). The last occurrence wins.
fn parse_integer_fallback(contents: &str, table: Option<&str>, key: &str) -> Option<i64> {
    let mut current_table: Option<&str> = None;
    let mut result = None;

    for line in contents.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with('[') {
            current_table = parse_table_header_name(trimmed);
            continue;
        }
        if current_table != table {
            continue;
        }

        let Some(line) = strip_toml_comment(trimmed) else {
            continue;
        };
        let Some((name, value)) = line.split_once('=') else {
            continue;
        };
        if name.trim() != key {
            continue;
        }
        let token = value.split_whitespace().next().unwrap_or_default();
        if let Ok(parsed) = token.replace('_', "").parse::<i64>() {
            result = Some(parsed);
        }
    }

    result
}

fn parse_table_header_name(line: &str) -> Option<&str> {
    let end = line.find(']')?;
    let name = line.get(1..end)?.trim();
    if name.is_empty() { None } else { Some(name) }
}

fn strip_toml_comment(line: &str) -> Option<&str> {
    let line = line.split_once('#').map_or(line, |(head, _)| head).trim();
    if line.is_empty() { None } else { Some(line) }
}

fn read_document_string(path: &Path) -> anyhow::Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(contents) => Ok(Some(contents)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(anyhow::Error::new(err).context(format!("read {}", path.display()))),
    }
}

fn write_atomic(path: &Path, contents: &str) -> anyhow::Result<()> {
    let Some(parent) = path.parent() else {
        anyhow::bail!("config path has no parent: {}", path.display());
    };
    std::fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;

    let mut tmp = NamedTempFile::new_in(parent).context("create temp config")?;
    tmp.write_all(contents.as_bytes())
        .context("write temp config")?;
    tmp.flush().context("flush temp config")?;
    tmp.persist(path).map_err(|err| {
        anyhow::Error::new(err.error).context(format!("persist {}", path.display()))
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ConfigStore::in_data_dir(dir.path());

        assert_eq!(store.load().expect("load"), Settings::default());
    }

    #[test]
    fn reads_values_and_keeps_defaults_for_the_rest() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ConfigStore::in_data_dir(dir.path());
        std::fs::write(
            store.path(),
            r#"preferred_port = 0 # any free port

[supervisor]
health_interval_ms = 1_000
max_auto_restarts = 2

[client]
max_retries = 5
"#,
        )
        .expect("write config");

        let settings = store.load().expect("load");
        assert_eq!(settings.preferred_port, 0);
        assert_eq!(settings.health_interval, Duration::from_secs(1));
        assert_eq!(settings.max_auto_restarts, 2);
        assert_eq!(settings.client_retry.max_retries, 5);
        assert_eq!(settings.handshake_timeout, Duration::from_secs(5));
        assert_eq!(settings.client_retry.base_delay, Duration::from_secs(1));
    }

    #[test]
    fn out_of_range_values_are_ignored() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ConfigStore::in_data_dir(dir.path());
        std::fs::write(
            store.path(),
            "preferred_port = 70000\n[supervisor]\nhealth_interval_ms = 0\n",
        )
        .expect("write config");

        let settings = store.load().expect("load");
        assert_eq!(settings.preferred_port, DEFAULT_PREFERRED_PORT);
        assert_eq!(settings.health_interval, Duration::from_secs(30));
    }

    #[test]
    fn recovers_keys_from_invalid_toml() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ConfigStore::in_data_dir(dir.path());
        std::fs::write(
            store.path(),
            r#"preferred_port = 9100
[other
key = 1

[supervisor]
handshake_timeout_ms = 250 # keep me
"#,
        )
        .expect("write config");

        let settings = store.load().expect("load");
        assert_eq!(settings.preferred_port, 9100);
        assert_eq!(settings.handshake_timeout, Duration::from_millis(250));
    }

    #[test]
    fn default_config_is_written_once_and_parses_to_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ConfigStore::in_data_dir(&dir.path().join("nested"));

        assert!(store.write_default_if_missing().expect("write"));
        assert!(!store.write_default_if_missing().expect("second write"));
        assert_eq!(store.load().expect("load"), Settings::default());
    }
}
