//! Normalized web origins
//!
//! Every permission and risk lookup keys off an [`Origin`], never a raw url string, so a trailing
//! path, query, fragment, letter case or explicit default port can't be used to slip past a
//! lookup.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{fmt, str::FromStr};
use url::Url;

/// Errors that can occur while normalizing an origin
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum OriginError {
    #[error("failed to parse origin {input:?}: {reason}")]
    Unparsable { input: String, reason: String },
    #[error("origin {0:?} has no host")]
    MissingHost(String),
}

/// Normalized `(scheme, host, port)` identity of requesting web content.
///
/// The host is compared case-insensitively and default ports are dropped, so
/// `HTTPS://DApp.Example:443/swap?x=1` and `https://dapp.example` are the same origin.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Origin {
    scheme: String,
    host: String,
    port: Option<u16>,
}

impl Origin {
    /// Parses and normalizes the origin of the given url.
    pub fn parse(input: &str) -> Result<Self, OriginError> {
        let url = Url::parse(input.trim()).map_err(|err| OriginError::Unparsable {
            input: input.to_string(),
            reason: err.to_string(),
        })?;
        Self::from_url(&url)
    }

    /// Extracts the origin of an already parsed url.
    pub fn from_url(url: &Url) -> Result<Self, OriginError> {
        let host = match url.host_str() {
            Some(host) if !host.is_empty() => host.to_ascii_lowercase(),
            _ => return Err(OriginError::MissingHost(url.to_string())),
        };
        // `Url::port` already returns `None` for the scheme's default port
        Ok(Self { scheme: url.scheme().to_ascii_lowercase(), host, port: url.port() })
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Returns true if this origin's host equals `domain` or is one of its subdomains.
    pub fn is_within(&self, domain: &str) -> bool {
        let domain = domain.trim_start_matches('.').to_ascii_lowercase();
        self.host == domain ||
            self.host.strip_suffix(&domain).is_some_and(|prefix| prefix.ends_with('.'))
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{port}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Origin({self})")
    }
}

impl FromStr for Origin {
    type Err = OriginError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Origin {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Origin {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Conversion into a normalized [`Origin`], used by APIs that accept either a parsed origin or
/// a raw url.
pub trait IntoOrigin {
    fn into_origin(self) -> Result<Origin, OriginError>;
}

impl IntoOrigin for Origin {
    fn into_origin(self) -> Result<Origin, OriginError> {
        Ok(self)
    }
}

impl IntoOrigin for &Origin {
    fn into_origin(self) -> Result<Origin, OriginError> {
        Ok(self.clone())
    }
}

impl IntoOrigin for &str {
    fn into_origin(self) -> Result<Origin, OriginError> {
        Origin::parse(self)
    }
}

impl IntoOrigin for String {
    fn into_origin(self) -> Result<Origin, OriginError> {
        Origin::parse(&self)
    }
}

impl IntoOrigin for &String {
    fn into_origin(self) -> Result<Origin, OriginError> {
        Origin::parse(self)
    }
}

impl IntoOrigin for &Url {
    fn into_origin(self) -> Result<Origin, OriginError> {
        Origin::from_url(self)
    }
}
