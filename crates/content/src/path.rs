//! Content paths.
//!
//! A content path is parsed once into its segments and an optional trailing
//! extension. Routing consumes it one segment at a time through [`rest`],
//! which returns a new view sharing the parsed segments.
//!
//! [`rest`]: ContentPath::rest

use std::fmt::{self, Display};
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContentPath {
    segments: Arc<[String]>,
    start: usize,
    ext: Option<String>,
}

impl ContentPath {
    /// Parse a slash-delimited path such as `~posts/2024/article.html`.
    ///
    /// Leading, trailing and repeated slashes are ignored. The extension is
    /// taken from the final segment only, so dots in directory names are
    /// kept.
    pub fn parse(path: &str) -> Self {
        let mut segments: Vec<String> = path.split('/').filter(|s| !s.is_empty()).map(str::to_string).collect();
        let mut ext = None;
        if let Some(last) = segments.last_mut()
            && let Some(idx) = last.rfind('.')
            && idx > 0
        {
            ext = Some(last[idx + 1..].to_string());
            last.truncate(idx);
        }
        Self { segments: segments.into(), start: 0, ext }
    }

    /// The first remaining segment.
    pub fn root(&self) -> Option<&str> {
        self.segments.get(self.start).map(String::as_str)
    }

    /// This path without its first segment. The extension is kept.
    pub fn rest(&self) -> Self {
        Self {
            segments: Arc::clone(&self.segments),
            start: (self.start + 1).min(self.segments.len()),
            ext: self.ext.clone(),
        }
    }

    pub fn ext(&self) -> Option<&str> {
        self.ext.as_deref()
    }

    /// Number of remaining segments.
    pub fn len(&self) -> usize {
        self.segments.len() - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The remaining segments.
    pub fn segments(&self) -> &[String] {
        &self.segments[self.start..]
    }

    /// The remaining segments as a relative file path, extension included.
    pub fn relative_path(&self) -> String {
        with_ext(self.segments().join("/"), self.ext())
    }

    /// The whole path as parsed, regardless of how much has been consumed.
    pub fn full_path(&self) -> String {
        with_ext(self.segments.join("/"), self.ext())
    }
}

fn with_ext(path: String, ext: Option<&str>) -> String {
    match ext {
        Some(ext) => format!("{path}.{ext}"),
        None => path,
    }
}

impl Display for ContentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_path())
    }
}

impl From<&str> for ContentPath {
    fn from(path: &str) -> Self {
        Self::parse(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("~posts/$42.json", &["~posts", "$42"], Some("json"))]
    #[case("/~posts/2024/article.html", &["~posts", "2024", "article"], Some("html"))]
    #[case("~posts", &["~posts"], None)]
    #[case("~posts.json", &["~posts"], Some("json"))]
    #[case("~images/v1.2/logo", &["~images", "v1.2", "logo"], None)]
    #[case("a//b/", &["a", "b"], None)]
    #[case("", &[], None)]
    fn test_parse(#[case] input: &str, #[case] segments: &[&str], #[case] ext: Option<&str>) {
        let path = ContentPath::parse(input);
        assert_eq!(path.segments(), segments);
        assert_eq!(path.ext(), ext);
    }

    #[test]
    fn test_rest_does_not_mutate_parent() {
        let path = ContentPath::parse("~posts/2024/article.html");
        let rest = path.rest();
        assert_eq!(path.root(), Some("~posts"));
        assert_eq!(rest.root(), Some("2024"));
        assert_eq!(rest.len(), 2);
        assert_eq!(rest.relative_path(), "2024/article.html");
        assert_eq!(rest.full_path(), "~posts/2024/article.html");
    }

    #[test]
    fn test_rest_past_the_end() {
        let path = ContentPath::parse("~posts.json").rest();
        assert!(path.is_empty());
        assert_eq!(path.root(), None);
        let path = path.rest();
        assert!(path.is_empty());
        assert_eq!(path.ext(), Some("json"));
    }

    #[test]
    fn test_hidden_file_keeps_name() {
        let path = ContentPath::parse("~assets/.htaccess");
        assert_eq!(path.segments(), ["~assets", ".htaccess"]);
        assert_eq!(path.ext(), None);
    }
}
