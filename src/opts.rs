use crate::constant::DEFAULT_PORT;
use crate::error::Error;

/// A configuration for connection
///
/// ```rs
/// let mut opts1 = Opts::default();
/// opts1.port = 11978;
///
/// let mut opts2 = Opts::try_from("tyrant://localhost:1978")?;
/// opts2.separator = Some(",".to_string());
/// ```
#[derive(Debug, Clone)]
pub struct Opts {
    /// Enable TCP_NODELAY socket option to disable Nagle's algorithm
    pub tcp_nodelay: bool,

    /// Hostname or IP address
    pub host: String,

    /// Port number for the Tyrant server
    pub port: u16,

    /// When set, list values are joined with this separator on write and
    /// split on read
    pub separator: Option<String>,

    /// Return raw bytes from reads instead of decoding UTF-8
    pub literal: bool,
}

impl Default for Opts {
    fn default() -> Self {
        Self {
            tcp_nodelay: true,
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            separator: None,
            literal: false,
        }
    }
}

impl TryFrom<&str> for Opts {
    type Error = Error;

    fn try_from(url: &str) -> Result<Self, Self::Error> {
        let parsed = url::Url::parse(url)
            .map_err(|e| Error::BadConfig(format!("Failed to parse Tyrant URL: {}", e)))?;

        if parsed.scheme() != "tyrant" {
            return Err(Error::BadConfig(format!(
                "Invalid URL scheme '{}', expected 'tyrant'",
                parsed.scheme()
            )));
        }

        let host = parsed
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| Error::BadConfig("Missing host in Tyrant URL".to_string()))?
            .to_string();
        let port = parsed.port().unwrap_or(DEFAULT_PORT);

        Ok(Self {
            tcp_nodelay: true,
            host,
            port,
            separator: None,
            literal: false,
        })
    }
}

impl TryFrom<String> for Opts {
    type Error = Error;

    fn try_from(url: String) -> Result<Self, Self::Error> {
        Opts::try_from(url.as_str())
    }
}
