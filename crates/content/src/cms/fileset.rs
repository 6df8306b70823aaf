//! Fileset categories.
//!
//! Every file row belongs to one category. The category decides which ORM
//! mappings hydrate its records and whether (and where) its files are
//! cached on the device.

use crate::error::{ErrorKind, Result};
use cairn_storage::CachePolicy;
use exn::ResultExt;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Fileset definition as it appears in configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilesetConfig {
    /// Regular expression matched against a file's path, used to infer the
    /// category of files the server sends without one.
    pub include: Option<String>,
    /// ORM mappings used to hydrate the category's records.
    pub mappings: Vec<String>,
    pub cache: CachePolicy,
}

impl FilesetConfig {
    pub fn new(cache: CachePolicy) -> Self {
        Self { cache, ..Self::default() }
    }

    pub fn include(mut self, pattern: impl Into<String>) -> Self {
        self.include = Some(pattern.into());
        self
    }

    pub fn mappings<I, S>(mut self, mappings: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.mappings = mappings.into_iter().map(Into::into).collect();
        self
    }
}

#[derive(Clone, Debug)]
pub struct Fileset {
    pub category: String,
    pub include: Option<Regex>,
    pub mappings: Vec<String>,
    pub cache: CachePolicy,
}

impl Fileset {
    pub fn is_cached(&self) -> bool {
        self.cache.is_cached()
    }

    fn matches(&self, path: &str) -> bool {
        self.include.as_ref().is_some_and(|re| re.is_match(path))
    }
}

/// The filesets of one authority, in category order.
#[derive(Clone, Debug, Default)]
pub struct Filesets {
    filesets: BTreeMap<String, Fileset>,
}

impl Filesets {
    pub fn new(configs: &BTreeMap<String, FilesetConfig>) -> Result<Self> {
        let filesets = configs
            .iter()
            .map(|(category, config)| {
                let include = config
                    .include
                    .as_deref()
                    .map(Regex::new)
                    .transpose()
                    .or_raise(|| ErrorKind::Config(format!("invalid include pattern for fileset {category}")))?;
                let fileset = Fileset { category: category.clone(), include, mappings: config.mappings.clone(), cache: config.cache };
                Ok((category.clone(), fileset))
            })
            .collect::<Result<_>>()?;
        Ok(Self { filesets })
    }

    pub fn get(&self, category: &str) -> Option<&Fileset> {
        self.filesets.get(category)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Fileset> {
        self.filesets.values()
    }

    /// Cache policy of a category. Unknown categories are never cached.
    pub fn policy(&self, category: &str) -> CachePolicy {
        self.get(category).map(|fileset| fileset.cache).unwrap_or_default()
    }

    /// The first category (in name order) whose include pattern matches `path`.
    pub fn infer_category(&self, path: &str) -> Option<&str> {
        self.iter().find(|fileset| fileset.matches(path)).map(|fileset| fileset.category.as_str())
    }
}

/// The filesets of a standard CMS repository.
pub fn standard_filesets() -> BTreeMap<String, FilesetConfig> {
    BTreeMap::from([
        ("posts".to_string(), FilesetConfig::new(CachePolicy::None).include(r"^posts/.*\.json$").mappings(["post", "meta"])),
        ("pages".to_string(), FilesetConfig::new(CachePolicy::None).include(r"^pages/.*\.json$").mappings(["post", "meta"])),
        ("images".to_string(), FilesetConfig::new(CachePolicy::Content).include(r"\.(png|jpe?g|gif|svg|webp)$")),
        ("assets".to_string(), FilesetConfig::new(CachePolicy::Content).include(r"^assets/")),
        ("templates".to_string(), FilesetConfig::new(CachePolicy::App).include(r"^_templates/")),
    ])
}
