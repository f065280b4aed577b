//! Authenticated endpoint whitelist.
//!
//! A request carries the contact credentials and is eligible for
//! refresh-and-replay on a 401 only when it targets the origin of one of the
//! service base URLs and a path at or below the base path. The refresh call
//! itself never is.

use crate::CoreResult;
use url::Url;

const REFRESH_PATH: &str = "contact-token";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    client_service_url: String,
    event_service_url: String,
    refresh_token_url: String,
    client_base: Url,
    event_base: Url,
    refresh_endpoint: Url,
}

impl Endpoints {
    /// Both base URLs must parse; trailing slashes are dropped.
    pub fn new(client_service_url: &str, event_service_url: &str) -> CoreResult<Self> {
        let client = client_service_url.trim_end_matches('/').to_string();
        let event = event_service_url.trim_end_matches('/').to_string();
        let refresh_token_url = format!("{client}/{REFRESH_PATH}");

        Ok(Self {
            client_base: Url::parse(&client)?,
            event_base: Url::parse(&event)?,
            refresh_endpoint: Url::parse(&refresh_token_url)?,
            client_service_url: client,
            event_service_url: event,
            refresh_token_url,
        })
    }

    pub fn client_service_url(&self) -> &str {
        &self.client_service_url
    }

    pub fn event_service_url(&self) -> &str {
        &self.event_service_url
    }

    /// `<client>/contact-token`
    pub fn refresh_token_url(&self) -> &str {
        &self.refresh_token_url
    }

    /// True when `url` targets one of the authenticated services.
    pub fn is_authenticated_url(&self, url: &str) -> bool {
        match Url::parse(url) {
            Ok(url) => is_below(&self.client_base, &url) || is_below(&self.event_base, &url),
            Err(_) => false,
        }
    }

    /// Matches the refresh endpoint by origin and path; query and a trailing
    /// slash are ignored.
    pub fn is_refresh_url(&self, url: &str) -> bool {
        match Url::parse(url) {
            Ok(url) => {
                same_origin(&self.refresh_endpoint, &url)
                    && trimmed_path(&url) == trimmed_path(&self.refresh_endpoint)
            }
            Err(_) => false,
        }
    }

    /// Authenticated and not the refresh call itself.
    pub fn is_refresh_eligible(&self, url: &str) -> bool {
        self.is_authenticated_url(url) && !self.is_refresh_url(url)
    }
}

fn same_origin(base: &Url, url: &Url) -> bool {
    base.scheme() == url.scheme()
        && base.host_str() == url.host_str()
        && base.port_or_known_default() == url.port_or_known_default()
}

fn trimmed_path(url: &Url) -> &str {
    url.path().trim_end_matches('/')
}

/// Same origin, and the path equals the base path or continues it with `/`.
fn is_below(base: &Url, url: &Url) -> bool {
    if !same_origin(base, url) {
        return false;
    }
    let base_path = trimmed_path(base);
    let path = url.path();
    match path.strip_prefix(base_path) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}
