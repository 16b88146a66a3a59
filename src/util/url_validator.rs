use std::net::IpAddr;
use thiserror::Error;
use url::Url;

/// Errors that can occur during URL validation.
#[derive(Error, Debug)]
pub enum UrlValidationError {
    /// The URL string could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The URL uses a scheme other than http or https.
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    /// The URL has no host component.
    #[error("URL has no host")]
    MissingHost,
    /// The URL points to a private/internal IP address.
    #[error("Private IP address not allowed: {0}")]
    PrivateIp(String),
    /// The URL points to localhost.
    #[error("Localhost not allowed")]
    Localhost,
    /// A provider API base URL is plain HTTP on a non-local host.
    #[error("Insecure API base URL: HTTPS required (except localhost for testing)")]
    InsecureBaseUrl,
}

/// Validates a source URL submitted for registration.
///
/// Rejects non-HTTP(S) schemes, localhost and private IP ranges so a
/// registration can never make the adapters reach internal hosts.
///
/// # Examples
///
/// ```
/// use scribe::util::validate_source_url;
///
/// let url = validate_source_url("https://www.youtube.com/@skate").unwrap();
/// assert_eq!(url.host_str(), Some("www.youtube.com"));
///
/// assert!(validate_source_url("http://localhost/feed").is_err());
/// assert!(validate_source_url("file:///etc/passwd").is_err());
/// ```
pub fn validate_source_url(url_str: &str) -> Result<Url, UrlValidationError> {
    let url = Url::parse(url_str.trim())?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlValidationError::UnsupportedScheme(scheme.to_owned())),
    }

    let host = url.host_str().ok_or(UrlValidationError::MissingHost)?;
    if host == "localhost" {
        return Err(UrlValidationError::Localhost);
    }

    // Strip brackets from IPv6 addresses for parsing
    let host_for_parse = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);

    if let Ok(ip) = host_for_parse.parse::<IpAddr>() {
        if ip.is_loopback() {
            return Err(UrlValidationError::Localhost);
        }
        if is_private_ip(&ip) {
            return Err(UrlValidationError::PrivateIp(ip.to_string()));
        }
    }

    Ok(url)
}

/// Validates a provider API base URL taken from configuration.
///
/// Credentials are attached to every request against the base URL, so plain
/// HTTP is only accepted for `localhost`/`127.0.0.1` (mock servers in tests).
pub fn validate_api_base(base: &str) -> Result<Url, UrlValidationError> {
    let url = Url::parse(base.trim_end_matches('/'))?;

    match url.scheme() {
        "https" => Ok(url),
        "http" => match url.host_str() {
            Some("localhost") | Some("127.0.0.1") | Some("[::1]") => {
                tracing::warn!(base_url = %base, "Using non-HTTPS provider base URL (localhost only)");
                Ok(url)
            }
            _ => Err(UrlValidationError::InsecureBaseUrl),
        },
        scheme => Err(UrlValidationError::UnsupportedScheme(scheme.to_owned())),
    }
}

fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(ipv4) => {
            ipv4.is_private() || ipv4.is_loopback() || ipv4.is_link_local() || ipv4.is_unspecified()
        }
        IpAddr::V6(ipv6) => {
            if ipv6.is_loopback() || ipv6.is_unspecified() {
                return true;
            }
            let segments = ipv6.segments();
            // Unique Local (fc00::/7)
            let is_unique_local = (segments[0] & 0xfe00) == 0xfc00;
            // Link-Local (fe80::/10)
            let is_link_local = (segments[0] & 0xffc0) == 0xfe80;
            is_unique_local || is_link_local
        }
    }
}
