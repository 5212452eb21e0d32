use tonic::service::Interceptor;
use tonic::{Request, Status};

use crate::tls::common_name;

/// Authenticated caller, attached to each request by [`Authenticator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity(pub String);

/// Extracts the caller identity from the verified client certificate.
///
/// Requests without a certificate get `fallback` when configured, otherwise
/// they pass through unauthenticated and the service rejects them.
#[derive(Debug, Clone, Default)]
pub struct Authenticator {
    fallback: Option<String>,
}

impl Authenticator {
    pub fn new(fallback: Option<String>) -> Self {
        Self { fallback }
    }
}

impl Interceptor for Authenticator {
    fn call(&mut self, mut request: Request<()>) -> Result<Request<()>, Status> {
        let from_cert = request
            .peer_certs()
            .and_then(|certs| certs.first().and_then(|cert| common_name(cert.as_ref())));

        if let Some(identity) = from_cert.or_else(|| self.fallback.clone()) {
            request.extensions_mut().insert(CallerIdentity(identity));
        }
        Ok(request)
    }
}

/// Identity attached by the interceptor, if any.
pub fn caller_identity<T>(request: &Request<T>) -> Option<&str> {
    request
        .extensions()
        .get::<CallerIdentity>()
        .map(|identity| identity.0.as_str())
}
