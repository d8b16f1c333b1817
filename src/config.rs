//! Configuration loading (SPEC_FULL.md §6, §10.1).
//!
//! Grounded on the teacher's `ConfigFile::try_from` in structure (the
//! `config` crate, layered `File` + `Environment` sources, `shellexpand`
//! for `~` in paths) but reshaped around the much smaller `params`/`subnets`
//! schema this project actually needs, following
//! `original_source/superpowers/__init__.py`'s `load_config` for exact
//! validation semantics (which sections are required, which power names
//! are recognized).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;

use crate::error::{Result, SuperpowersError};
use crate::ip_address::Network;
use crate::power::shodohflo::ShoDoHFloPower;
use crate::power::sqlite::SqlitePower;
use crate::power::PowerHandle;
use crate::scope::{Mode, Nets, Scope};

const RECOGNIZED_POWERS: &[&str] = &["sqlite", "shodohflo"];
const DEFAULT_SHODOHFLO_TTL: u64 = 7200;
const DEFAULT_MAX_ASSOCS: usize = 5000;

fn default_ttl() -> u64 {
    DEFAULT_SHODOHFLO_TTL
}

fn default_max_assocs() -> usize {
    DEFAULT_MAX_ASSOCS
}

#[derive(Debug, Deserialize, Clone)]
pub struct SqliteParams {
    pub db: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ShoDoHFloParams {
    pub redis_server: String,
    #[serde(default = "default_ttl")]
    pub ttl: u64,
    #[serde(default = "default_max_assocs")]
    pub max_assocs: usize,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Params {
    pub sqlite: Option<SqliteParams>,
    pub shodohflo: Option<ShoDoHFloParams>,
}

/// A single `nets` entry, accepted either as a map or as the equivalent
/// `"CIDR-or-addr mode [fqdn]"` string form, per SPEC_FULL.md §6.
#[derive(Debug, Deserialize, Clone)]
#[serde(untagged)]
pub enum NetEntry {
    Map {
        net: String,
        mode: String,
        fqdn: Option<String>,
    },
    Shorthand(String),
}

struct ParsedNet {
    network: Network,
    mode: Mode,
    fqdn: String,
}

impl NetEntry {
    fn parse(&self) -> Result<ParsedNet> {
        match self {
            NetEntry::Map { net, mode, fqdn } => Ok(ParsedNet {
                network: net.parse()?,
                mode: mode.parse()?,
                fqdn: fqdn.clone().unwrap_or_default(),
            }),
            NetEntry::Shorthand(s) => {
                let mut parts = s.split_whitespace();
                let net = parts.next().ok_or_else(|| {
                    SuperpowersError::Configuration(format!("empty net entry: {s:?}"))
                })?;
                let mode = parts.next().ok_or_else(|| {
                    SuperpowersError::Configuration(format!("net entry missing mode: {s:?}"))
                })?;
                let fqdn = parts.next().unwrap_or("").to_string();
                Ok(ParsedNet {
                    network: net.parse()?,
                    mode: mode.parse()?,
                    fqdn,
                })
            }
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SubnetBlock {
    pub powers: Option<Vec<String>>,
    pub nets: Vec<NetEntry>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SuperpowersConfig {
    #[serde(default)]
    pub params: Params,
    #[serde(default)]
    pub subnets: Vec<SubnetBlock>,
}

impl SuperpowersConfig {
    /// Validate cross-references between `subnets[].powers` and `params`,
    /// per `original_source/superpowers/__init__.py`'s `load_config`.
    fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();
        for block in &self.subnets {
            if let Some(powers) = &block.powers {
                for name in powers {
                    if !RECOGNIZED_POWERS.contains(&name.as_str()) {
                        errors.push(format!("unrecognized power: {name:?}"));
                    }
                    if name == "sqlite" && self.params.sqlite.is_none() {
                        errors.push("subnet references 'sqlite' but params.sqlite is not configured".to_string());
                    }
                    if name == "shodohflo" && self.params.shodohflo.is_none() {
                        errors.push("subnet references 'shodohflo' but params.shodohflo is not configured".to_string());
                    }
                }
            }
            for net in &block.nets {
                if let Err(err) = net.parse() {
                    errors.push(err.to_string());
                }
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(SuperpowersError::Configuration(errors.join("; ")))
        }
    }

    /// Construct every referenced Power once, then build the Scope
    /// Database from `subnets`, per SPEC_FULL.md §4.2 and §6.
    pub async fn build_scope_database(&self) -> Result<Nets> {
        self.validate()?;

        let mut named_powers: HashMap<String, PowerHandle> = HashMap::new();
        let referenced: std::collections::HashSet<&str> = self
            .subnets
            .iter()
            .filter_map(|b| b.powers.as_ref())
            .flatten()
            .map(|s| s.as_str())
            .collect();

        if referenced.contains("sqlite") {
            let sqlite_params = self.params.sqlite.as_ref().ok_or_else(|| {
                SuperpowersError::Configuration("params.sqlite.db is required".to_string())
            })?;
            let db_path = shellexpand::tilde(&sqlite_params.db).into_owned();
            let power = SqlitePower::new(&db_path).await?;
            named_powers.insert(
                "sqlite".to_string(),
                PowerHandle::Sqlite(Arc::new(power)),
            );
        }
        if referenced.contains("shodohflo") {
            let params = self.params.shodohflo.as_ref().ok_or_else(|| {
                SuperpowersError::Configuration("params.shodohflo.redis_server is required".to_string())
            })?;
            let power = ShoDoHFloPower::new(
                params.redis_server.clone(),
                params.ttl,
                params.max_assocs,
            );
            named_powers.insert(
                "shodohflo".to_string(),
                PowerHandle::ShoDoHFlo(Arc::new(power)),
            );
        }

        let mut nets = Nets::new();
        for block in &self.subnets {
            let powers: Vec<PowerHandle> = match &block.powers {
                None => Vec::new(),
                Some(names) => names
                    .iter()
                    .filter_map(|name| named_powers.get(name).cloned())
                    .collect(),
            };
            for net in &block.nets {
                let parsed = net.parse()?;
                let scope = Scope::new(
                    parsed.network.prefix_length,
                    parsed.mode,
                    &parsed.fqdn,
                    powers.clone(),
                );
                nets.insert(parsed.network, scope);
            }
        }
        Ok(nets)
    }
}

/// Locate `superpowers.yaml` next to the running executable, falling back
/// to the current working directory (SPEC_FULL.md §10.1).
fn default_config_path() -> Option<PathBuf> {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            let candidate = dir.join("superpowers.yaml");
            if candidate.exists() {
                return Some(candidate);
            }
        }
    }
    let cwd_candidate = Path::new("superpowers.yaml");
    if cwd_candidate.exists() {
        return Some(cwd_candidate.to_path_buf());
    }
    None
}

pub fn load(path_override: Option<&str>) -> Result<SuperpowersConfig> {
    let path = match path_override {
        Some(p) => PathBuf::from(shellexpand::tilde(p).into_owned()),
        None => default_config_path().ok_or_else(|| {
            SuperpowersError::Configuration(
                "could not find superpowers.yaml next to the executable or in the current directory"
                    .to_string(),
            )
        })?,
    };

    let built = Config::builder()
        .add_source(File::new(
            path.to_string_lossy().as_ref(),
            FileFormat::Yaml,
        ))
        .add_source(Environment::with_prefix("SUPERPOWERS").separator("__"))
        .build()?;

    let cfg: SuperpowersConfig = built.try_deserialize()?;
    cfg.validate()?;
    Ok(cfg)
}
