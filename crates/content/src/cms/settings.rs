//! Connection settings for a CMS repository and its API URLs.

use serde::{Deserialize, Serialize};

pub const DEFAULT_API_ROOT: &str = "semop/0.2";
pub const DEFAULT_PROTOCOL: &str = "http";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub protocol: String,
    pub host: String,
    pub port: Option<u16>,
    /// Extra path in front of the API root, for servers mounted below `/`.
    pub path_prefix: Option<String>,
    pub api_root: String,
    pub account: String,
    pub repo: String,
    pub branch: Option<String>,
    /// Basic authentication realm. Derived from the repository when unset.
    pub auth_realm: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            protocol: DEFAULT_PROTOCOL.to_string(),
            host: "localhost".to_string(),
            port: None,
            path_prefix: None,
            api_root: DEFAULT_API_ROOT.to_string(),
            account: String::new(),
            repo: String::new(),
            branch: None,
            auth_realm: None,
        }
    }
}

impl Settings {
    pub fn new(host: impl Into<String>, account: impl Into<String>, repo: impl Into<String>) -> Self {
        Self { host: host.into(), account: account.into(), repo: repo.into(), ..Self::default() }
    }

    pub fn auth_realm(&self) -> String {
        match &self.auth_realm {
            Some(realm) => realm.clone(),
            None => format!("Smokestack/{}/{}/{}", self.account, self.repo, self.branch.as_deref().unwrap_or("master")),
        }
    }

    /// File name of the authority's database.
    pub fn database_name(&self) -> String {
        format!("{}.{}.sqlite", self.account, self.repo)
    }

    pub fn url_for_authentication(&self) -> String {
        self.url_for_resource("authenticate", None)
    }

    pub fn url_for_updates(&self) -> String {
        self.url_for_resource("updates", None)
    }

    pub fn url_for_fileset(&self, category: &str) -> String {
        self.url_for_resource("filesets", Some(category))
    }

    pub fn url_for_file(&self, path: &str) -> String {
        self.url_for_resource("files", Some(path))
    }

    fn url_for_resource(&self, resource: &str, trailing: Option<&str>) -> String {
        let branch = self.branch.as_ref().map(|branch| format!("~{branch}"));
        let parts = [
            self.path_prefix.as_deref(),
            Some(self.api_root.as_str()),
            Some(resource),
            Some(self.account.as_str()),
            Some(self.repo.as_str()),
            branch.as_deref(),
            trailing,
        ];
        let path = parts
            .into_iter()
            .flatten()
            .map(|part| part.trim_matches('/'))
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("/");
        match self.port {
            Some(port) => format!("{}://{}:{port}/{path}", self.protocol, self.host),
            None => format!("{}://{}/{path}", self.protocol, self.host),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn settings() -> Settings {
        Settings::new("cms.example.com", "acme", "site")
    }

    #[test]
    fn test_urls() {
        let settings = settings();
        assert_eq!(settings.url_for_updates(), "http://cms.example.com/semop/0.2/updates/acme/site");
        assert_eq!(settings.url_for_fileset("images"), "http://cms.example.com/semop/0.2/filesets/acme/site/images");
        assert_eq!(settings.url_for_file("/2024/a.html"), "http://cms.example.com/semop/0.2/files/acme/site/2024/a.html");
        assert_eq!(settings.url_for_authentication(), "http://cms.example.com/semop/0.2/authenticate/acme/site");
    }

    #[test]
    fn test_urls_with_port_branch_and_prefix() {
        let settings = Settings {
            protocol: "https".to_string(),
            port: Some(8443),
            path_prefix: Some("/cms/".to_string()),
            branch: Some("draft".to_string()),
            ..settings()
        };
        assert_eq!(settings.url_for_updates(), "https://cms.example.com:8443/cms/semop/0.2/updates/acme/site/~draft");
        assert_eq!(settings.url_for_fileset("posts"), "https://cms.example.com:8443/cms/semop/0.2/filesets/acme/site/~draft/posts");
    }

    #[rstest]
    #[case(None, None, "Smokestack/acme/site/master")]
    #[case(Some("draft"), None, "Smokestack/acme/site/draft")]
    #[case(Some("draft"), Some("custom"), "custom")]
    fn test_auth_realm(#[case] branch: Option<&str>, #[case] realm: Option<&str>, #[case] expected: &str) {
        let settings = Settings { branch: branch.map(str::to_string), auth_realm: realm.map(str::to_string), ..settings() };
        assert_eq!(settings.auth_realm(), expected);
    }

    #[test]
    fn test_database_name() {
        assert_eq!(settings().database_name(), "acme.site.sqlite");
    }
}
