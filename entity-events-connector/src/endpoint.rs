use crate::{config::EndpointConfig, error::ConnectError};
use std::fmt;
use url::Url;

/// Optional credentials embedded into the connection URL.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    /// Bearer token, sent as the `token` query parameter.
    pub token: Option<String>,
    /// Tenant scope, sent as the `tenant_id` query parameter.
    pub tenant_id: Option<String>,
}

impl Credentials {
    pub fn new(token: Option<String>, tenant_id: Option<String>) -> Self {
        Self { token, tenant_id }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("tenant_id", &self.tenant_id)
            .finish()
    }
}

/// Builds `ws[s]://{host}{path}?token=..&tenant_id=..`.
///
/// Query parameters that are not supplied are omitted entirely.
pub fn build_url(endpoint: &EndpointConfig, credentials: &Credentials) -> Result<Url, ConnectError> {
    let host = endpoint.host.trim();
    if host.is_empty() {
        return Err(ConnectError::InvalidEndpoint("host is empty".to_string()));
    }
    let scheme = if endpoint.secure { "wss" } else { "ws" };

    let mut url = Url::parse(&format!("{}://{}", scheme, host))
        .map_err(|e| ConnectError::InvalidEndpoint(format!("'{}': {}", host, e)))?;
    if url.cannot_be_a_base() || url.host_str().is_none() {
        return Err(ConnectError::InvalidEndpoint(format!("'{}' has no host", host)));
    }

    let path = if endpoint.path.starts_with('/') {
        endpoint.path.clone()
    } else {
        format!("/{}", endpoint.path)
    };
    url.set_path(&path);
    url.set_fragment(None);
    url.set_query(None);

    if credentials.token.is_some() || credentials.tenant_id.is_some() {
        let mut query = url.query_pairs_mut();
        if let Some(token) = &credentials.token {
            query.append_pair("token", token);
        }
        if let Some(tenant_id) = &credentials.tenant_id {
            query.append_pair("tenant_id", tenant_id);
        }
    }

    Ok(url)
}
