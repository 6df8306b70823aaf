//! Shared state of one CMS authority.
//!
//! The command protocol and every path root hold the same [`Repository`],
//! which owns the file database and the collaborators used to talk to the
//! server.

use crate::auth::{CredentialStore, Credentials};
use crate::cms::filedb::FileDb;
use crate::cms::settings::Settings;
use crate::convert::Converters;
use crate::error::{ErrorKind, Result};
use crate::http::{HttpClient, Request};
use exn::ResultExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// What happens when the server rejects the stored credentials.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LogoutPolicy {
    /// Forget the credentials locally.
    #[default]
    Discard,
    /// Leave the credentials alone and broadcast a [`LogoutNotice`] carrying
    /// this action for the host to handle.
    Notify(String),
}

/// Broadcast when a 401 is met under [`LogoutPolicy::Notify`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogoutNotice {
    pub authority: String,
    pub action: String,
}

pub struct Repository {
    pub(crate) name: String,
    pub(crate) settings: Settings,
    pub(crate) filedb: FileDb,
    pub(crate) http: Arc<dyn HttpClient>,
    pub(crate) credentials: Arc<dyn CredentialStore>,
    pub(crate) converters: Converters,
    pub(crate) logout: LogoutPolicy,
    pub(crate) notices: broadcast::Sender<LogoutNotice>,
    pub(crate) cancel: CancellationToken,
}

impl Repository {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn filedb(&self) -> &FileDb {
        &self.filedb
    }

    pub fn http(&self) -> &dyn HttpClient {
        self.http.as_ref()
    }

    pub fn converters(&self) -> &Converters {
        &self.converters
    }

    /// Token cancelled when the authority shuts down.
    pub fn cancel(&self) -> &CancellationToken {
        &self.cancel
    }

    pub async fn credentials(&self) -> Result<Option<Credentials>> {
        self.credentials.get(&self.settings.auth_realm()).await
    }

    pub async fn set_credentials(&self, credentials: Credentials) -> Result<()> {
        self.credentials.set(&self.settings.auth_realm(), credentials).await
    }

    pub async fn clear_credentials(&self) -> Result<()> {
        self.credentials.clear(&self.settings.auth_realm()).await
    }

    /// A request to `url` carrying the stored credentials and the `secure`
    /// flag telling the server whether they are present.
    pub async fn request(&self, url: String) -> Result<Request> {
        let credentials = self.credentials().await?;
        Ok(Request::new(url).param("secure", credentials.is_some()).credentials(credentials))
    }

    pub fn subscribe_logout(&self) -> broadcast::Receiver<LogoutNotice> {
        self.notices.subscribe()
    }

    /// Apply the logout policy after the server answered 401.
    pub async fn handle_unauthorized(&self) -> Result<()> {
        match &self.logout {
            LogoutPolicy::Discard => {
                self.clear_credentials().await.or_raise(|| ErrorKind::Authentication)?;
                tracing::warn!(authority = %self.name, "server rejected credentials; discarded them");
            },
            LogoutPolicy::Notify(action) => {
                let notice = LogoutNotice { authority: self.name.clone(), action: action.clone() };
                if self.notices.send(notice).is_err() {
                    tracing::warn!(authority = %self.name, action, "server rejected credentials but nobody is listening for logout");
                }
            },
        }
        Ok(())
    }
}
