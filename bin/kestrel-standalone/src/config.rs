// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use anyhow::Context;
use serde::Deserialize;

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub main: Main,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Main {
    pub name: String,

    /// Guest memory size in KiB.  One page is plenty for the demo guest.
    #[serde(default = "default_memory_kib")]
    pub memory_kib: usize,

    /// Path to a flat binary to load as the guest program.  When absent, the
    /// built-in demo guest is used.
    #[serde(default)]
    pub guest: Option<String>,

    /// Region-relative offset at which the guest program is loaded, which is
    /// also where execution begins.
    #[serde(default)]
    pub load_offset: u64,

    /// I/O port recognized as the guest console.
    #[serde(default = "default_console_port")]
    pub console_port: u16,
}

fn default_memory_kib() -> usize {
    4
}

fn default_console_port() -> u16 {
    kestrel::loader::CONSOLE_PORT
}

impl Config {
    /// Configuration used when no file is given: one page of RAM and the
    /// built-in demo guest.
    pub fn demo() -> Self {
        Self {
            main: Main {
                name: "demo".to_string(),
                memory_kib: default_memory_kib(),
                guest: None,
                load_offset: 0,
                console_port: default_console_port(),
            },
        }
    }
}

pub fn parse(path: &str) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {path}"))?;
    toml::from_str::<Config>(&contents)
        .with_context(|| format!("failed to parse config file {path}"))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn minimal_config() {
        let config: Config = toml::from_str(
            r#"
            [main]
            name = "tiny"
            "#,
        )
        .unwrap();
        assert_eq!(config.main.name, "tiny");
        assert_eq!(config.main.memory_kib, 4);
        assert_eq!(config.main.load_offset, 0);
        assert_eq!(config.main.console_port, 0x3f8);
        assert!(config.main.guest.is_none());
    }

    #[test]
    fn full_config() {
        let config: Config = toml::from_str(
            r#"
            [main]
            name = "full"
            memory_kib = 64
            guest = "guest.bin"
            load_offset = 0x100
            console_port = 0xe9
            "#,
        )
        .unwrap();
        assert_eq!(config.main.memory_kib, 64);
        assert_eq!(config.main.guest.as_deref(), Some("guest.bin"));
        assert_eq!(config.main.load_offset, 0x100);
        assert_eq!(config.main.console_port, 0xe9);
    }
}
