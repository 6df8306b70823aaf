use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};

/// A named command with string arguments.
///
/// Names are namespaced by the authority that handles them, e.g.
/// `acme.refresh` or `acme.download-fileset`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub name: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub priority: i64,
}
impl Command {
    pub fn new<I, S>(name: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { name: name.into(), args: args.into_iter().map(Into::into).collect(), priority: 0 }
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    /// The namespace (text before the first `.`) used to pick a handler.
    pub fn namespace(&self) -> &str {
        namespace(&self.name)
    }
}
impl Display for Command {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.name)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

pub(crate) fn namespace(name: &str) -> &str {
    name.split_once('.').map_or(name, |(ns, _)| ns)
}

/// A command persisted in the queue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueuedCommand {
    pub id: i64,
    pub command: Command,
    pub seq: i64,
    pub attempts: i64,
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct QueueRow {
    pub id: i64,
    pub command: String,
    pub args: String,
    pub priority: i64,
    pub seq: i64,
    pub attempts: i64,
}
impl TryFrom<QueueRow> for QueuedCommand {
    type Error = crate::error::Error;

    fn try_from(row: QueueRow) -> Result<Self> {
        let args: Vec<String> = serde_json::from_str(&row.args).or_raise(|| ErrorKind::InvalidData(row.id))?;
        Ok(Self {
            id: row.id,
            command: Command { name: row.command, args, priority: row.priority },
            seq: row.seq,
            attempts: row.attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("acme.refresh", "acme")]
    #[case("acme.download-fileset", "acme")]
    #[case("cms.v2.refresh", "cms")]
    #[case("bare", "bare")]
    fn test_namespace(#[case] name: &str, #[case] expected: &str) {
        assert_eq!(Command::new(name, Vec::<String>::new()).namespace(), expected);
    }

    #[test]
    fn test_display() {
        let command = Command::new("acme.download-fileset", ["images", "/cache/~images"]);
        assert_eq!(command.to_string(), "acme.download-fileset images /cache/~images");
    }

    #[test]
    fn test_row_with_bad_args() {
        let row = QueueRow { id: 9, command: "a.b".into(), args: "{".into(), priority: 0, seq: 1, attempts: 0 };
        let err = QueuedCommand::try_from(row).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidData(9)));
    }
}
