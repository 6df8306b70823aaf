//! Configuration loading for cairn.
//!
//! Sources are layered, later ones overriding earlier ones:
//!
//! 1. built-in defaults,
//! 2. `cairn.toml`, `cairn.yaml` or `cairn.json` in the platform config directory,
//! 3. an explicitly given file,
//! 4. `CAIRN_` environment variables, with `__` separating nested keys
//!    (e.g. `CAIRN_AUTHORITIES__ACME__HOST`).

mod authority;
pub mod error;
mod provider;

pub use crate::authority::AuthorityConfig;
pub use crate::provider::ProviderConfig;
use crate::error::{ErrorKind, Result};
use cairn_content::cms::AuthorityOptions;
use exn::{OptionExt, ResultExt};
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

const FILE_STEM: &str = "cairn";
const ENV_PREFIX: &str = "CAIRN_";

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub provider: ProviderConfig,
    pub authorities: BTreeMap<String, AuthorityConfig>,
}

impl Config {
    /// Load from every source, with `explicit` layered over the platform file.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(dirs) = provider::project_dirs() {
            let base = dirs.config_dir().join(FILE_STEM);
            tracing::debug!(dir = %dirs.config_dir().display(), "looking for platform configuration");
            figment = figment
                .merge(Toml::file(base.with_extension("toml")))
                .merge(Yaml::file(base.with_extension("yaml")))
                .merge(Json::file(base.with_extension("json")));
        }
        if let Some(path) = explicit {
            figment = merge_file(figment, path)?;
        }
        // The CLI reads the login password from the environment; keep it out of the config.
        figment = figment.merge(Env::prefixed(ENV_PREFIX).ignore(&["password"]).split("__"));
        Self::from_figment(figment)
    }

    /// Extract and validate a configuration from an assembled figment.
    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Self = figment.extract().or_raise(|| ErrorKind::Load)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.provider.validate()?;
        for (name, authority) in &self.authorities {
            authority.validate(name)?;
        }
        Ok(())
    }

    /// Construction options for a configured authority.
    pub fn authority(&self, name: &str) -> Result<AuthorityOptions> {
        let config = self.authorities.get(name).ok_or_raise(|| ErrorKind::UnknownAuthority(name.to_string()))?;
        Ok(config.options(name))
    }
}

fn merge_file(figment: Figment, path: &Path) -> Result<Figment> {
    if !path.is_file() {
        exn::bail!(ErrorKind::Invalid(format!("configuration file {} does not exist", path.display())));
    }
    let ext = path.extension().and_then(|ext| ext.to_str()).unwrap_or_default().to_ascii_lowercase();
    Ok(match ext.as_str() {
        "toml" => figment.merge(Toml::file(path)),
        "yaml" | "yml" => figment.merge(Yaml::file(path)),
        "json" => figment.merge(Json::file(path)),
        _ => exn::bail!(ErrorKind::UnsupportedFormat(path.display().to_string())),
    })
}
