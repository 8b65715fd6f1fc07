//! Registry clients per URL scheme, and mapping of their failures.

use oci_distribution::Client;
use oci_distribution::client::{ClientConfig, ClientProtocol};
use oci_distribution::errors::{OciDistributionError, OciErrorCode};
use std::time::Duration;

use crate::Error;
use crate::reference::Reference;

/// URL scheme used to reach a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    /// TLS.
    Https,
    /// Plain text; loopback registries only.
    Http,
}

impl Scheme {
    /// `https` or `http`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Https => "https",
            Self::Http => "http",
        }
    }
}

/// Build the distribution client that speaks `scheme` to every registry.
#[must_use]
pub fn registry_client(scheme: Scheme) -> Client {
    let protocol = match scheme {
        Scheme::Https => ClientProtocol::Https,
        Scheme::Http => ClientProtocol::Http,
    };
    Client::new(ClientConfig {
        protocol,
        ..Default::default()
    })
}

/// Why a registry round trip failed.
#[derive(Debug)]
pub enum Failure {
    /// The distribution client reported an error.
    Registry(OciDistributionError),
    /// The registry did not answer within the connect budget.
    TimedOut(Duration),
}

impl Failure {
    /// Whether the request never got a response, so another scheme may work.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Registry(OciDistributionError::RequestError(err)) if err.status().is_none())
    }

    /// Map to a crate error. `what` names the manifest, blob or tag.
    #[must_use]
    pub fn into_error(self, reference: &Reference, what: &str) -> Error {
        let host = reference.registry();
        let location = reference.locator();
        let err = match self {
            Self::Registry(err) => err,
            Self::TimedOut(budget) => {
                return Error::network(
                    host,
                    format!("{what} in {location}: no answer within {budget:?}"),
                );
            }
        };

        match err {
            OciDistributionError::UnauthorizedError { .. } => {
                Error::auth(host, format!("401 Unauthorized for {what} in {location}"))
            }
            OciDistributionError::AuthenticationFailure(reason) => Error::auth(
                host,
                format!("token request for {location} rejected: {}", reason.trim()),
            ),
            OciDistributionError::RegistryError { ref envelope, .. }
                if envelope.errors.iter().any(|e| is_unknown(&e.code)) =>
            {
                Error::not_found(what, location)
            }
            OciDistributionError::RegistryError { ref envelope, .. }
                if envelope.errors.iter().any(|e| is_denied(&e.code)) =>
            {
                Error::auth(host, format!("{what} in {location}: {err}"))
            }
            OciDistributionError::RequestError(ref inner) => match inner.status() {
                Some(status) if status.as_u16() == 404 => Error::not_found(what, location),
                Some(status) if matches!(status.as_u16(), 401 | 403) => {
                    Error::auth(host, format!("{status} for {what} in {location}"))
                }
                Some(status) => Error::network(
                    host,
                    format!("unexpected status {status} for {what} in {location}"),
                ),
                None if inner.is_timeout() => {
                    Error::network(host, format!("{what} in {location}: timed out"))
                }
                None if inner.is_connect() => Error::network(
                    host,
                    format!("{what} in {location}: connection failed: {inner}"),
                ),
                None => Error::network(host, format!("{what} in {location}: {inner}")),
            },
            other => Error::network(host, format!("{what} in {location}: {other}")),
        }
    }
}

impl From<OciDistributionError> for Failure {
    fn from(err: OciDistributionError) -> Self {
        Self::Registry(err)
    }
}

const fn is_unknown(code: &OciErrorCode) -> bool {
    matches!(
        code,
        OciErrorCode::ManifestUnknown | OciErrorCode::BlobUnknown | OciErrorCode::NameUnknown
    )
}

const fn is_denied(code: &OciErrorCode) -> bool {
    matches!(code, OciErrorCode::Unauthorized | OciErrorCode::Denied)
}
