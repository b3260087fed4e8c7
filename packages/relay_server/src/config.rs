use anyhow::{Context, Result, bail};
use relay_protocol::{DEFAULT_ID_LENGTH, ID_CHARACTERS, IdGenerator};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;

// =============================================================================
// File config (figment-deserialized from defaults / relay.toml / env vars)
// =============================================================================
//
// Three equivalent ways to configure:
//
//   relay.toml:      [server]
//                    port = 3000
//
//   env var:         RELAY_SERVER__PORT=3000   (double underscore = nesting)
//
//   (single underscore stays within field names: RELAY_LIMITS__OUTLET_CAPACITY)

/// Default config file, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "relay.toml";

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub ids: IdsFileConfig,
    #[serde(default)]
    pub limits: LimitsFileConfig,
}

/// Listener settings (lives under `[server]` in relay.toml).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ServerFileConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Generated identifier shape (lives under `[ids]`).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct IdsFileConfig {
    #[serde(default = "default_alphabet")]
    pub alphabet: String,
    #[serde(default = "default_id_length")]
    pub length: usize,
}

impl Default for IdsFileConfig {
    fn default() -> Self {
        Self {
            alphabet: default_alphabet(),
            length: default_id_length(),
        }
    }
}

/// Queue sizes (lives under `[limits]`).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LimitsFileConfig {
    /// Frames buffered per socket before it is evicted as too slow
    #[serde(default = "default_outlet_capacity")]
    pub outlet_capacity: usize,
    /// Commands buffered in the relay actor's inbox
    #[serde(default = "default_command_capacity")]
    pub command_capacity: usize,
}

impl Default for LimitsFileConfig {
    fn default() -> Self {
        Self {
            outlet_capacity: default_outlet_capacity(),
            command_capacity: default_command_capacity(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    3000
}
fn default_alphabet() -> String {
    ID_CHARACTERS.to_string()
}
fn default_id_length() -> usize {
    DEFAULT_ID_LENGTH
}
fn default_outlet_capacity() -> usize {
    256
}
fn default_command_capacity() -> usize {
    1024
}

/// Build a figment that layers: defaults → config file → RELAY_* env vars.
///
/// With no explicit path, `relay.toml` in the working directory is used if
/// present. Env vars use double-underscore for nesting into sections:
///   `RELAY_SERVER__PORT=4000`  →  `server.port = 4000`
///   `RELAY_IDS__LENGTH=12`     →  `ids.length = 12`
pub fn load_config(config_path: Option<&Path>) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    let file = config_path.unwrap_or(Path::new(DEFAULT_CONFIG_FILE));

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(file))
        .merge(Env::prefixed("RELAY_").split("__"))
}

/// Flag values that sit above every other layer.
#[derive(Clone, Debug, Default)]
pub struct CliOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
}

impl CliOverrides {
    pub fn apply(&self, fc: &mut FileConfig) {
        if let Some(host) = &self.host {
            fc.server.host = host.clone();
        }
        if let Some(port) = self.port {
            fc.server.port = port;
        }
    }
}

// =============================================================================
// Runtime config (validated, used throughout the server)
// =============================================================================

#[derive(Clone, Debug)]
pub struct RelayConfig {
    pub bind_addr: SocketAddr,
    pub ids: IdGenerator,
    pub outlet_capacity: usize,
    pub command_capacity: usize,
}

impl RelayConfig {
    /// Resolve every layer and validate. An explicit `config_path` must exist.
    pub fn load(config_path: Option<&Path>, cli: &CliOverrides) -> Result<Self> {
        if let Some(path) = config_path {
            if !path.exists() {
                bail!("Config file {} does not exist", path.display());
            }
        }

        let mut fc: FileConfig = load_config(config_path)
            .extract()
            .context("Failed to read relay configuration")?;
        cli.apply(&mut fc);
        Self::from_file(&fc)
    }

    pub fn from_file(fc: &FileConfig) -> Result<Self> {
        let ip: IpAddr = if fc.server.host == "localhost" {
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        } else {
            fc.server
                .host
                .parse()
                .with_context(|| format!("Invalid server.host {:?}", fc.server.host))?
        };

        let ids = IdGenerator::new(fc.ids.alphabet.clone(), fc.ids.length)
            .context("Invalid [ids] configuration")?;

        if fc.limits.outlet_capacity == 0 {
            bail!("limits.outlet_capacity must be at least 1");
        }
        if fc.limits.command_capacity == 0 {
            bail!("limits.command_capacity must be at least 1");
        }

        Ok(Self {
            bind_addr: SocketAddr::new(ip, fc.server.port),
            ids,
            outlet_capacity: fc.limits.outlet_capacity,
            command_capacity: fc.limits.command_capacity,
        })
    }

    /// Loopback on an OS-assigned port with default limits
    pub fn local_ephemeral() -> Self {
        Self {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
            ids: IdGenerator::default(),
            outlet_capacity: default_outlet_capacity(),
            command_capacity: default_command_capacity(),
        }
    }
}
