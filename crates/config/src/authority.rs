use crate::error::{ErrorKind, Result};
use cairn_content::cms::schema::SchemaConfig;
use cairn_content::cms::{AuthorityOptions, FilesetConfig, LogoutPolicy, Settings};
use cairn_store::MappingConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// One CMS authority.
///
/// Connection settings sit at the top level of the authority's table:
///
/// ```toml
/// [authorities.acme]
/// host = "cms.example.com"
/// account = "acme"
/// repo = "site"
/// refresh_interval = 15
/// logout = { notify = "show-login" }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthorityConfig {
    #[serde(flatten)]
    pub settings: Settings,
    /// Minutes between scheduled refreshes; unset disables them.
    pub refresh_interval: Option<u64>,
    pub logout: LogoutPolicy,
    /// Replaces the standard table declarations.
    pub schema: Option<SchemaConfig>,
    /// Replaces the standard ORM mappings.
    pub mappings: Option<BTreeMap<String, MappingConfig>>,
    /// Replaces the standard filesets.
    pub filesets: Option<BTreeMap<String, FilesetConfig>>,
    /// Categories whose records are rendered as posts.
    pub post_categories: Option<Vec<String>>,
}

impl AuthorityConfig {
    pub(crate) fn validate(&self, name: &str) -> Result<()> {
        let invalid = |field: &str| ErrorKind::Invalid(format!("authorities.{name}.{field}"));
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            exn::bail!(ErrorKind::Invalid(format!("authorities.{name}")));
        }
        for (field, value) in [("host", &self.settings.host), ("account", &self.settings.account), ("repo", &self.settings.repo)] {
            if value.trim().is_empty() {
                exn::bail!(invalid(field));
            }
        }
        if self.refresh_interval == Some(0) {
            exn::bail!(invalid("refresh_interval"));
        }
        if let Some(filesets) = &self.filesets
            && filesets.is_empty()
        {
            exn::bail!(invalid("filesets"));
        }
        Ok(())
    }

    /// Construction options for the authority called `name`.
    pub fn options(&self, name: &str) -> AuthorityOptions {
        let mut options = AuthorityOptions::new(name, self.settings.clone());
        options.refresh_interval = self.refresh_interval.map(|minutes| Duration::from_secs(minutes * 60));
        options.logout = self.logout.clone();
        if let Some(schema) = &self.schema {
            options.schema = schema.clone();
        }
        if let Some(mappings) = &self.mappings {
            options.mappings = mappings.clone();
        }
        if let Some(filesets) = &self.filesets {
            options.filesets = filesets.clone();
        }
        if let Some(categories) = &self.post_categories {
            options.post_categories = categories.clone();
        }
        options
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn config() -> AuthorityConfig {
        AuthorityConfig { settings: Settings::new("cms.example.com", "acme", "site"), ..AuthorityConfig::default() }
    }

    #[test]
    fn test_options_use_standard_defaults() {
        let options = config().options("acme");
        assert_eq!(options.name, "acme");
        assert_eq!(options.refresh_interval, None);
        assert!(options.filesets.contains_key("images"));
        assert_eq!(options.post_categories, ["posts", "pages"]);
    }

    #[test]
    fn test_options_apply_overrides() {
        let config = AuthorityConfig {
            refresh_interval: Some(15),
            logout: LogoutPolicy::Notify("show-login".to_string()),
            post_categories: Some(vec!["news".to_string()]),
            ..config()
        };
        let options = config.options("acme");
        assert_eq!(options.refresh_interval, Some(Duration::from_secs(900)));
        assert_eq!(options.logout, LogoutPolicy::Notify("show-login".to_string()));
        assert_eq!(options.post_categories, ["news"]);
    }

    #[rstest]
    #[case("acme", config(), None)]
    #[case("acme.site", config(), Some("authorities.acme.site"))]
    #[case("acme", AuthorityConfig { settings: Settings::new("", "acme", "site"), ..config() }, Some("authorities.acme.host"))]
    #[case("acme", AuthorityConfig { settings: Settings::new("cms", "acme", " "), ..config() }, Some("authorities.acme.repo"))]
    #[case("acme", AuthorityConfig { refresh_interval: Some(0), ..config() }, Some("authorities.acme.refresh_interval"))]
    #[case("acme", AuthorityConfig { filesets: Some(BTreeMap::new()), ..config() }, Some("authorities.acme.filesets"))]
    fn test_validate(#[case] name: &str, #[case] config: AuthorityConfig, #[case] expected: Option<&str>) {
        match (config.validate(name), expected) {
            (Ok(()), None) => {},
            (Err(err), Some(field)) => assert!(matches!(&*err, ErrorKind::Invalid(f) if f == field), "{err:?}"),
            (result, expected) => panic!("expected {expected:?}, got {result:?}"),
        }
    }
}
