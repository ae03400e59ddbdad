// Copyright 2024 Veil Labs
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::RelayConfig;
use anyhow::Context;
use directories_next::ProjectDirs;
use std::path::{Path, PathBuf};
use structopt::StructOpt;

/// Package identifier used to derive the default configuration and
/// database locations when `--config-dir` is not given.
pub const PACKAGE_ID: [&str; 3] = ["labs", "veil", "veil-relay"];

/// The Veil Relay Command-line tool
///
/// Start the relay from a config directory:
///
/// $ veil-relay -vvv -c <CONFIG_DIR_PATH>
#[derive(StructOpt)]
#[structopt(name = "Veil Relay")]
pub struct Opts {
    /// A level of verbosity, and can be used multiple times
    #[structopt(short, long, parse(from_occurrences))]
    pub verbose: i32,
    /// Directory holding the relay's TOML configuration files.
    #[structopt(
        short = "c",
        long = "config-dir",
        value_name = "PATH",
        parse(from_os_str)
    )]
    pub config_dir: Option<PathBuf>,
    /// Keep the database store in a temporary directory that is removed
    /// when the process exits.
    #[structopt(long)]
    pub tmp: bool,
}

/// Loads the relay configuration from `config_dir`, falling back to the
/// platform's standard config location when no directory is given.
pub fn load_config<P>(
    config_dir: Option<P>,
) -> Result<RelayConfig, anyhow::Error>
where
    P: AsRef<Path>,
{
    let path = match config_dir {
        Some(p) => p.as_ref().to_path_buf(),
        None => default_dirs()?.config_dir().to_path_buf(),
    };
    anyhow::ensure!(path.is_dir(), "{} is not a directory", path.display());
    tracing::trace!("loading configuration from {}", path.display());
    let config = crate::utils::load(path)?;
    Ok(config)
}

/// Initializes the global `tracing` subscriber, with the `filter` crate's
/// level driven by how many `-v` flags were passed.
pub fn setup_logger(verbosity: i32, filter: &str) -> anyhow::Result<()> {
    use tracing::Level;
    let log_level = match verbosity {
        0 => Level::ERROR,
        1 => Level::WARN,
        2 => Level::INFO,
        3 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let directive = format!("{filter}={log_level}")
        .parse()
        .expect("valid log level");
    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(directive);
    tracing_subscriber::fmt()
        .with_target(true)
        .with_max_level(log_level)
        .with_env_filter(env_filter)
        .init();
    Ok(())
}

/// Opens the relay's database store: a temporary one under `--tmp`,
/// otherwise a `store` directory next to the configuration (or in the
/// platform's local data location when no config dir was given).
pub async fn create_store(
    opts: &Opts,
) -> anyhow::Result<veil_relay_store::SledStore> {
    if opts.tmp {
        tracing::debug!("using a temporary store");
        return Ok(veil_relay_store::SledStore::temporary()?);
    }
    let db_path = match opts.config_dir.as_deref().and_then(Path::parent) {
        Some(parent) => parent.join("store"),
        None => default_dirs()?.data_local_dir().join("store"),
    };
    tracing::debug!("opening the store at {}", db_path.display());
    Ok(veil_relay_store::SledStore::open(db_path)?)
}

fn default_dirs() -> anyhow::Result<ProjectDirs> {
    ProjectDirs::from(PACKAGE_ID[0], PACKAGE_ID[1], PACKAGE_ID[2])
        .context("failed to resolve the default project directories")
}
