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

use std::path::Path;

use crate::RelayConfig;

/// Loads the configuration by merging every TOML file found in the given
/// directory with `VEIL_*` environment variables, environment last so it
/// can override files.
pub fn load<P: AsRef<Path>>(
    path: P,
) -> Result<RelayConfig, config::ConfigError> {
    let mut builder = config::Config::builder();
    let mut entries: Vec<_> = std::fs::read_dir(path.as_ref())
        .map_err(|e| config::ConfigError::Message(e.to_string()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().map(|ext| ext == "toml").unwrap_or(false))
        .collect();
    // deterministic layering order
    entries.sort();
    for entry in entries {
        tracing::trace!("Loading config file: {}", entry.display());
        builder = builder.add_source(config::File::from(entry));
    }
    builder = builder.add_source(
        config::Environment::with_prefix("VEIL").separator("__"),
    );
    builder.build()?.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_and_layers_toml_files_from_a_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("00-main.toml"),
            r#"
            port = 4123

            [engine]
            rpc-url = "http://127.0.0.1:50052"
            stream-url = "ws://127.0.0.1:50053"
            "#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("10-override.toml"),
            "port = 4999\n",
        )
        .unwrap();

        let config = load(dir.path()).unwrap();
        assert_eq!(config.port, 4999);
        assert_eq!(config.engine.rpc_url, "http://127.0.0.1:50052");
    }
}
