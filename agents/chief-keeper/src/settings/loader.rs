use std::env;
use std::path::{Path, PathBuf};

use config::{Config, Environment, File};
use eyre::{eyre, Context, Result};

use super::{KeeperSettings, RawKeeperSettings};

/// Prefix of environment variables that override file settings.
pub const ENV_PREFIX: &str = "CHIEF_KEEPER";

/// Loads the keeper settings from `./config/*.json`, the files listed in
/// `CONFIG_FILES`, and `CHIEF_KEEPER__*` environment variables, later
/// sources overriding earlier ones.
pub fn load_settings() -> Result<KeeperSettings> {
    let extra_files: Vec<PathBuf> = env::var("CONFIG_FILES")
        .map(|s| s.split(',').map(PathBuf::from).collect())
        .unwrap_or_default();
    load_settings_from(Path::new("./config"), &extra_files, ENV_PREFIX)
}

pub fn load_settings_from(
    config_dir: &Path,
    extra_files: &[PathBuf],
    env_prefix: &str,
) -> Result<KeeperSettings> {
    let mut builder = Config::builder();

    let mut base_files = vec![];
    if config_dir.exists() {
        for entry in config_dir
            .read_dir()
            .context("Failed to open config directory")?
        {
            let path = entry.context("Failed to read config directory")?.path();
            if path.is_file() && path.extension() == Some("json".as_ref()) {
                base_files.push(path);
            }
        }
    }
    base_files.sort();

    for path in &base_files {
        builder = builder.add_source(File::from(path.as_path()));
    }

    for path in extra_files {
        if path.is_file() {
            if path.extension() != Some("json".as_ref()) {
                return Err(eyre!(
                    "Provided config path via CONFIG_FILES is of an unsupported type ({path:?})"
                ));
            }
            builder = builder.add_source(File::from(path.as_path()));
        } else if !path.exists() {
            return Err(eyre!(
                "Provided config path via CONFIG_FILES does not exist ({path:?})"
            ));
        } else {
            return Err(eyre!(
                "Provided config path via CONFIG_FILES is not a file ({path:?})"
            ));
        }
    }

    let raw: RawKeeperSettings = builder
        .add_source(Environment::with_prefix(env_prefix).separator("__"))
        .build()
        .context("Failed to load config sources")?
        .try_deserialize()
        .with_context(|| {
            let loaded = base_files
                .iter()
                .chain(extra_files)
                .map(|path| format!("{path:?}"))
                .collect::<Vec<_>>()
                .join(", ");
            format!("Config deserialization error, config loaded: [{loaded}]")
        })?;

    Ok(KeeperSettings::try_from(raw)?)
}
