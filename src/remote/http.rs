use std::{net::SocketAddr, str::FromStr, sync::PoisonError};

use crate::auth::{Action, Challenge, Scope};

use super::{EventHandler, RemoteError, Repository};

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Token received from the authorization service, and the scopes
/// used to request it.
pub(super) struct BearerToken {
    scopes: Vec<String>,
    authorization: String,
}

impl<E: EventHandler> Repository<E> {
    /// URL for `path` in the repository.
    ///
    /// The path must not include the `v2/$repository` prefix.
    pub(super) fn url(&self, path: &str) -> String {
        let scheme = match self.plain_http {
            Some(true) => "http://",
            Some(false) => "https://",
            None => guess_scheme(&self.reference.registry),
        };

        format!(
            "{scheme}{}/v2/{}/{path}",
            self.reference.registry, self.reference.repository
        )
    }

    /// Send a request to the registry.
    ///
    /// The scope for `actions` in the repository is added to the scope
    /// manager. The cached token is used only if it was issued for the
    /// current scopes of the registry.
    ///
    /// If the registry responds with a `401` error, get a new token from
    /// the URL in the `WWW-Authenticate` header, and repeat the request.
    pub(super) fn send(
        &self,
        request: ureq::Request,
        body: Option<&[u8]>,
        actions: &[Action],
    ) -> Result<ureq::Response, RemoteError> {
        let request = request.set("User-Agent", USER_AGENT);
        let host = self.reference.registry.as_str();

        self.scopes.set_scope_for_registry(
            host,
            Scope::repository(&self.reference.repository, actions.iter().copied()),
        );

        let scopes = self.scopes.get_scope_strings_for_host(host);

        self.event_handler
            .registry_request(request.method(), request.url());

        let cached_token = self
            .token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .filter(|token| token.scopes == scopes)
            .map(|token| token.authorization.clone());

        let attempt = match &cached_token {
            Some(auth) => request.clone().set("Authorization", auth),
            None => request.clone(),
        };

        let response = match call(attempt, body) {
            Ok(r) => return Ok(r),
            Err(ureq::Error::Status(401, r)) => r,
            Err(e) => return Err(e.into()),
        };

        // Request a token if the response from the 401 includes a
        // Bearer challenge.

        let Some(challenge) = response
            .header("www-authenticate")
            .and_then(Challenge::parse)
        else {
            return Err(ureq::Error::Status(401, response).into());
        };

        for scope in challenge.scopes() {
            match Scope::from_str(scope) {
                Ok(scope) => self.scopes.set_scope_for_registry(host, scope),
                Err(error) => tracing::debug!(scope, %error, "Ignored scope from challenge"),
            }
        }

        let scopes = self.scopes.get_scope_strings_for_host(host);
        let authorization = self.request_token(&challenge, &scopes)?;

        *self.token.write().unwrap_or_else(PoisonError::into_inner) = Some(BearerToken {
            scopes,
            authorization: authorization.clone(),
        });

        // Repeat the request, now that we have a token.
        Ok(call(request.set("Authorization", &authorization), body)?)
    }

    /// Get a token from the service in `challenge`, and return the
    /// value for the `Authorization` header.
    ///
    /// The response from the `realm` URL must include either
    /// `token` or `access_token`.
    fn request_token(&self, challenge: &Challenge, scopes: &[String]) -> Result<String, RemoteError> {
        let mut request = ureq::get(&challenge.realm).set("User-Agent", USER_AGENT);

        if let Some(service) = &challenge.service {
            request = request.query("service", service);
        }

        for scope in scopes {
            request = request.query("scope", scope);
        }

        self.event_handler.registry_auth(request.url());
        tracing::debug!(realm = %challenge.realm, ?scopes, "Requesting token");

        #[derive(serde::Deserialize, Debug)]
        struct Tokens {
            token: Option<String>,
            access_token: Option<String>,
        }

        let token = match serde_json::from_reader(request.call()?.into_reader())? {
            Tokens { token: Some(t), .. } => t,
            Tokens {
                access_token: Some(t),
                ..
            } => t,
            _ => return Err(RemoteError::MissingTokens),
        };

        Ok(format!("Bearer {token}"))
    }
}

fn call(request: ureq::Request, body: Option<&[u8]>) -> Result<ureq::Response, ureq::Error> {
    match body {
        Some(body) => request.send_bytes(body),
        None => request.call(),
    }
}

/// Guess the URI scheme for the registry:
///
/// * If it is a loopback IP (like `127.0.0.1`), or if the port
///   is `:80`, it uses `http://`.
/// * In any other case, it uses `https://`.
pub(super) fn guess_scheme(registry: &str) -> &'static str {
    const HTTP: &str = "http://";
    const HTTPS: &str = "https://";

    if registry.ends_with(":80") {
        return HTTP;
    }

    if let Ok(address) = SocketAddr::from_str(registry) {
        return if address.ip().is_loopback() { HTTP } else { HTTPS };
    }

    HTTPS
}

#[test]
fn guess_registry_scheme() {
    assert_eq!(guess_scheme("127.0.0.1:5000"), "http://");
    assert_eq!(guess_scheme("[::1]:5000"), "http://");
    assert_eq!(guess_scheme("example.com:80"), "http://");
    assert_eq!(guess_scheme("10.0.0.1:5000"), "https://");
    assert_eq!(guess_scheme("example.com"), "https://");
}
