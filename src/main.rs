//! cairn: keep an offline copy of CMS repositories and serve content paths from it.
//!
//! ```bash
//! cairn refresh                          # refresh every configured authority
//! cairn get acme '~posts/$42.json'       # resolve a content path
//! cairn get acme '~posts' type=article   # query a category
//! CAIRN_PASSWORD=… cairn login acme ann  # authenticate, then refresh
//! cairn watch                            # refresh on each authority's interval
//! ```

use cairn_config::Config;
use cairn_content::auth::FileCredentials;
use cairn_content::cms::ContentAuthority;
use cairn_content::http::ReqwestClient;
use cairn_content::{Authority, Content, Params, Provider};
use cairn_queue::CommandQueue;
use clap::{Parser, Subcommand};
use derive_more::{Display, Error};
use exn::{OptionExt, ResultExt};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Display, Error)]
enum ErrorKind {
    #[display("configuration error")]
    Config,
    #[display("command queue error")]
    Queue,
    #[display("content error")]
    Content,
    #[display("could not write output")]
    Output,
    #[display("{_0}")]
    Usage(#[error(not(source))] String),
}

type Result<T> = std::result::Result<T, exn::Exn<ErrorKind>>;

#[derive(Parser, Debug)]
#[command(name = "cairn", version, about = "Offline sync-and-cache client for CMS content repositories")]
struct Cli {
    /// Configuration file (TOML, YAML or JSON), layered over the platform config
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    /// HTTP timeout in seconds
    #[arg(long, global = true, default_value_t = 60)]
    timeout: u64,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fetch and apply updates from the server
    Refresh {
        /// Only refresh this authority
        authority: Option<String>,
    },
    /// Resolve a content path and write the result to stdout
    Get {
        authority: String,
        path: String,
        /// Query parameters as `name=value`
        params: Vec<String>,
    },
    /// List pending commands
    Queue,
    /// Drop every pending command
    Purge,
    /// Store credentials for an authority and check them with the server
    Login {
        authority: String,
        username: String,
        #[arg(long, env = "CAIRN_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Forget an authority's credentials
    Logout { authority: String },
    /// Refresh authorities on their configured intervals until interrupted
    Watch,
}

struct App {
    provider: Provider,
    authorities: BTreeMap<String, Arc<ContentAuthority>>,
}

impl App {
    async fn open(cli: &Cli) -> Result<Self> {
        let config = Config::load(cli.config.as_deref()).or_raise(|| ErrorKind::Config)?;
        let queue = CommandQueue::open(config.provider.queue_path())
            .await
            .or_raise(|| ErrorKind::Queue)?
            .with_max_attempts(config.provider.max_attempts);
        let mut provider = Provider::new(Arc::new(queue), config.provider.cache_roots(), &config.provider.db_dir);
        let http = Arc::new(ReqwestClient::new(Duration::from_secs(cli.timeout)).or_raise(|| ErrorKind::Content)?);
        let credentials = Arc::new(FileCredentials::new(config.provider.credentials_path()));

        let mut authorities = BTreeMap::new();
        for name in config.authorities.keys() {
            let options = config.authority(name).or_raise(|| ErrorKind::Config)?;
            let authority = provider
                .open_content_authority(options, http.clone(), credentials.clone())
                .await
                .or_raise(|| ErrorKind::Content)?;
            authorities.insert(name.clone(), authority);
        }
        if authorities.is_empty() {
            tracing::warn!("no authorities configured");
        }
        Ok(Self { provider, authorities })
    }

    fn authority(&self, name: &str) -> Result<&Arc<ContentAuthority>> {
        self.authorities.get(name).ok_or_raise(|| ErrorKind::Usage(format!("no authority named {name} is configured")))
    }

    async fn run(&self, command: Commands) -> Result<()> {
        match command {
            Commands::Refresh { authority: Some(name) } => {
                self.authority(&name)?.refresh_content().await.or_raise(|| ErrorKind::Content)?;
            },
            Commands::Refresh { authority: None } => {
                self.provider.refresh_all().await.or_raise(|| ErrorKind::Content)?;
            },
            Commands::Get { authority, path, params } => {
                let params = parse_params(&params)?;
                let content = self
                    .provider
                    .resolve(&authority, &path, &params, &CancellationToken::new())
                    .await
                    .or_raise(|| ErrorKind::Content)?;
                write_content(content).await?;
            },
            Commands::Queue => {
                for item in self.provider.queue().pending().await.or_raise(|| ErrorKind::Queue)? {
                    println!("{:>6}  attempts={}  {}", item.id, item.attempts, item.command);
                }
            },
            Commands::Purge => {
                let purged = self.provider.queue().purge_queue().await.or_raise(|| ErrorKind::Queue)?;
                println!("purged {purged} command(s)");
            },
            Commands::Login { authority, username, password } => {
                self.authority(&authority)?.login(&username, &password).await.or_raise(|| ErrorKind::Content)?;
                println!("logged in to {authority} as {username}");
            },
            Commands::Logout { authority } => {
                self.authority(&authority)?.logout().await.or_raise(|| ErrorKind::Content)?;
                println!("logged out of {authority}");
            },
            Commands::Watch => {
                let cancel = self.provider.cancellation().clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        tracing::info!("interrupted; stopping");
                    }
                    cancel.cancel();
                });
                self.provider.run().await;
            },
        }
        Ok(())
    }
}

fn parse_params(params: &[String]) -> Result<Params> {
    params
        .iter()
        .map(|param| match param.split_once('=') {
            Some((name, value)) if !name.is_empty() => Ok((name.to_string(), value.to_string())),
            _ => exn::bail!(ErrorKind::Usage(format!("expected name=value, got `{param}`"))),
        })
        .collect()
}

async fn write_content(content: Content) -> Result<()> {
    let bytes = match content {
        Content::Query(results) => serde_json::to_vec_pretty(&results).or_raise(|| ErrorKind::Output)?,
        Content::Record(record) => serde_json::to_vec_pretty(&record).or_raise(|| ErrorKind::Output)?,
        Content::Data { bytes, .. } => bytes,
        Content::File { file, .. } => tokio::fs::read(file.path()).await.or_raise(|| ErrorKind::Output)?,
    };
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&bytes).or_raise(|| ErrorKind::Output)?;
    stdout.flush().or_raise(|| ErrorKind::Output)
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("cairn=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match App::open(&cli).await {
        Ok(app) => {
            let result = app.run(cli.command).await;
            app.provider.shutdown().await;
            result
        },
        Err(err) => Err(err),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:?}");
            ExitCode::FAILURE
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(&[], &[])]
    #[case(&["type=article"], &[("type", "article")])]
    #[case(&["path=a=b", "status="], &[("path", "a=b"), ("status", "")])]
    fn test_parse_params(#[case] input: &[&str], #[case] expected: &[(&str, &str)]) {
        let input = input.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        let expected = expected.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect::<Params>();
        assert_eq!(parse_params(&input).unwrap(), expected);
    }

    #[rstest]
    #[case("article")]
    #[case("=article")]
    fn test_parse_params_invalid(#[case] param: &str) {
        let err = parse_params(&[param.to_string()]).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Usage(_)));
    }

    #[test]
    fn test_cli() {
        let cli = Cli::try_parse_from(["cairn", "--config", "cairn.toml", "get", "acme", "~posts", "type=article"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("cairn.toml")));
        assert!(matches!(cli.command, Commands::Get { ref params, .. } if params == &["type=article"]));
    }
}
