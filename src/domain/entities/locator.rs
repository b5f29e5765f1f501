//! Image source locator value object.

use std::fmt;
use std::path::{Path, PathBuf};

use url::Url;

use crate::domain::errors::FetchError;

/// Validated address of encoded image bytes.
///
/// Only `http`, `https` and `file` URLs are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Locator {
    url: Url,
}

impl Locator {
    const SUPPORTED_SCHEMES: [&'static str; 3] = ["http", "https", "file"];

    /// Parses and validates a locator string.
    ///
    /// # Errors
    /// Returns `LocatorInvalid` if the string is not a URL or uses an
    /// unsupported scheme.
    pub fn parse(input: &str) -> Result<Self, FetchError> {
        let url = Url::parse(input.trim())
            .map_err(|e| FetchError::locator_invalid(input, e.to_string()))?;
        Self::from_url(url)
    }

    /// Wraps an already parsed URL.
    ///
    /// # Errors
    /// Returns `LocatorInvalid` for unsupported schemes or hostless http URLs.
    pub fn from_url(url: Url) -> Result<Self, FetchError> {
        if !Self::SUPPORTED_SCHEMES.contains(&url.scheme()) {
            return Err(FetchError::locator_invalid(
                url.as_str(),
                format!("unsupported scheme {:?}", url.scheme()),
            ));
        }
        if url.scheme() != "file" && url.host_str().is_none_or(str::is_empty) {
            return Err(FetchError::locator_invalid(url.as_str(), "missing host"));
        }
        Ok(Self { url })
    }

    /// Creates a locator for a local file.
    ///
    /// # Errors
    /// Returns `LocatorInvalid` if the path is not absolute.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, FetchError> {
        let path = path.as_ref();
        let url = Url::from_file_path(path).map_err(|()| {
            FetchError::locator_invalid(path.display().to_string(), "path must be absolute")
        })?;
        Ok(Self { url })
    }

    /// Returns the canonical string form, used as the default cache source key.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }

    /// Returns the underlying URL.
    #[must_use]
    pub const fn url(&self) -> &Url {
        &self.url
    }

    /// Returns true for `file://` locators.
    #[must_use]
    pub fn is_file(&self) -> bool {
        self.url.scheme() == "file"
    }

    /// Returns the local path for `file://` locators.
    #[must_use]
    pub fn to_file_path(&self) -> Option<PathBuf> {
        if self.is_file() {
            self.url.to_file_path().ok()
        } else {
            None
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url.as_str())
    }
}

impl std::str::FromStr for Locator {
    type Err = FetchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("https://example.com/a.jpg" ; "https")]
    #[test_case("http://example.com/a.jpg?size=2" ; "http_with_query")]
    #[test_case("file:///tmp/a.png" ; "file")]
    fn test_accepts_supported_schemes(input: &str) {
        assert!(Locator::parse(input).is_ok());
    }

    #[test_case("ftp://example.com/a.jpg" ; "ftp")]
    #[test_case("not a url" ; "garbage")]
    #[test_case("" ; "empty")]
    #[test_case("data:image/png;base64,AAAA" ; "data")]
    fn test_rejects_invalid(input: &str) {
        let result = Locator::parse(input);
        assert!(matches!(result, Err(FetchError::LocatorInvalid { .. })));
    }

    #[test]
    fn test_file_path_round_trip() {
        let dir = std::env::temp_dir().join("imgfetch-locator.png");
        let locator = Locator::from_path(&dir).unwrap();
        assert!(locator.is_file());
        assert_eq!(locator.to_file_path(), Some(dir));
    }

    #[test]
    fn test_relative_path_rejected() {
        assert!(Locator::from_path("relative/a.png").is_err());
    }
}
