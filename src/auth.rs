//! The registry's authentication provider and the Bearer challenge/response
//! flow (§4.3.2).

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use reqwest_middleware::ClientWithMiddleware;
use serde::Deserialize;
use std::fmt::Display;
use std::sync::LazyLock;
use std::sync::Arc;
use tokio::sync::Mutex;

/// The request-builder operations [`AuthProvider::apply`] needs, implemented
/// by both [`reqwest::RequestBuilder`] and
/// [`reqwest_middleware::RequestBuilder`] so the same credential-attaching
/// logic works whether a request is built from the bare client (the token
/// realm request, which must bypass the retry middleware) or from the
/// middleware-wrapped one (every registry request).
pub trait Authenticatable: Sized {
    /// Attaches an HTTP Basic `Authorization` header.
    fn basic_auth<U: Display, P: Display>(self, username: U, password: Option<P>) -> Self;
    /// Attaches a Bearer `Authorization` header.
    fn bearer_auth<T: Display>(self, token: T) -> Self;
}

impl Authenticatable for reqwest::RequestBuilder {
    fn basic_auth<U: Display, P: Display>(self, username: U, password: Option<P>) -> Self {
        reqwest::RequestBuilder::basic_auth(self, username, password)
    }
    fn bearer_auth<T: Display>(self, token: T) -> Self {
        reqwest::RequestBuilder::bearer_auth(self, token)
    }
}

impl Authenticatable for reqwest_middleware::RequestBuilder {
    fn basic_auth<U: Display, P: Display>(self, username: U, password: Option<P>) -> Self {
        reqwest_middleware::RequestBuilder::basic_auth(self, username, password)
    }
    fn bearer_auth<T: Display>(self, token: T) -> Self {
        reqwest_middleware::RequestBuilder::bearer_auth(self, token)
    }
}

/// A registry's credentials, modeled as a tagged sum type rather than the
/// subclassing-with-instance-of-checks the original uses (§9 design note).
/// The "switch to token" operation is [`AuthProvider::fetch_bearer_token`],
/// which returns a new provider rather than mutating this one in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthProvider {
    /// No credentials; requests are sent anonymously.
    None,
    /// A static username/password, sent as HTTP Basic auth and also used as
    /// the underlying credentials when a realm challenges for a token.
    UsernamePassword {
        /// The username.
        username: String,
        /// The password.
        password: String,
    },
    /// A Bearer token acquired from a realm, with its expiry if the realm
    /// reported one. Never constructed directly by a caller — only
    /// produced by [`AuthProvider::fetch_bearer_token`].
    Bearer {
        /// The bearer token.
        token: String,
        /// When the token expires, if known.
        expires_at: Option<DateTime<Utc>>,
    },
}

impl AuthProvider {
    /// Constructs a static-credentials provider.
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::UsernamePassword {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Attaches this provider's credentials to an outgoing request.
    pub fn apply<B: Authenticatable>(&self, request: B) -> B {
        match self {
            AuthProvider::None => request,
            AuthProvider::UsernamePassword { username, password } => {
                request.basic_auth(username, Some(password))
            }
            AuthProvider::Bearer { token, .. } => request.bearer_auth(token),
        }
    }

    /// `true` if this provider is a Bearer token known to have expired.
    pub fn is_expired(&self) -> bool {
        match self {
            AuthProvider::Bearer {
                expires_at: Some(exp),
                ..
            } => Utc::now() >= *exp,
            _ => false,
        }
    }

    /// Performs the realm GET of §4.3.2 step 2/3 and returns the resulting
    /// Bearer provider. The *underlying* credentials (basic, or none) are
    /// used to authenticate the realm request itself — a Bearer provider
    /// cannot re-authenticate with the realm using its own (possibly
    /// expired) token.
    pub async fn fetch_bearer_token(
        &self,
        client: &ClientWithMiddleware,
        challenge: &Challenge,
    ) -> Result<AuthProvider> {
        let mut request = client.get(&challenge.realm);
        let mut query = Vec::new();
        if let Some(service) = &challenge.service {
            query.push(("service", service.as_str()));
        }
        if let Some(scope) = &challenge.scope {
            query.push(("scope", scope.as_str()));
        }
        request = request.query(&query);

        if let AuthProvider::UsernamePassword { username, password } = self {
            request = request.basic_auth(username, Some(password));
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(Error::AuthChallenge(format!(
                "token realm {} returned {}",
                challenge.realm,
                response.status()
            )));
        }

        let body: TokenResponse = response.json().await?;
        let token = body
            .token
            .or(body.access_token)
            .ok_or_else(|| Error::AuthChallenge("token realm response had no token".into()))?;

        let expires_at = body.expires_in.map(|secs| {
            let issued_at = body.issued_at.unwrap_or_else(Utc::now);
            issued_at + chrono::Duration::seconds(secs as i64)
        });

        Ok(AuthProvider::Bearer { token, expires_at })
    }
}

/// A `Mutex`-guarded, cheaply cloneable handle to an [`AuthProvider`] (§5:
/// the auth provider is the only mutable field shared across concurrent
/// operations on one client, so the swap must be atomic).
#[derive(Debug, Clone)]
pub struct SharedAuthProvider(Arc<Mutex<AuthProvider>>);

impl SharedAuthProvider {
    /// Wraps an initial provider.
    pub fn new(provider: AuthProvider) -> Self {
        Self(Arc::new(Mutex::new(provider)))
    }

    /// Reads a clone of the current provider.
    pub async fn get(&self) -> AuthProvider {
        self.0.lock().await.clone()
    }

    /// Replaces the current provider, e.g. after a successful token refresh.
    pub async fn set(&self, provider: AuthProvider) {
        *self.0.lock().await = provider;
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: Option<String>,
    access_token: Option<String>,
    expires_in: Option<u64>,
    issued_at: Option<DateTime<Utc>>,
}

/// A parsed `WWW-Authenticate: Bearer ...` challenge header (§4.3.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    /// The token endpoint to GET.
    pub realm: String,
    /// The `service` query parameter, when present.
    pub service: Option<String>,
    /// The `scope` query parameter, when present.
    pub scope: Option<String>,
    /// The `error` attribute, when the registry included one (e.g. a
    /// refresh was rejected with `error="insufficient_scope"`).
    pub error: Option<String>,
}

static CHALLENGE_PARAM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(\w+)="([^"]*)""#).unwrap());

impl Challenge {
    /// Parses a `WWW-Authenticate` header value. Only the `Bearer` scheme
    /// is recognized; anything else is a parse error.
    pub fn parse(header: &str) -> Result<Self> {
        let header = header.trim();
        let rest = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| Error::AuthChallenge(format!("unsupported challenge scheme: {header}")))?;

        let mut realm = None;
        let mut service = None;
        let mut scope = None;
        let mut error = None;

        for caps in CHALLENGE_PARAM_RE.captures_iter(rest) {
            let key = &caps[1];
            let value = caps[2].to_string();
            match key {
                "realm" => realm = Some(value),
                "service" => service = Some(value),
                "scope" => scope = Some(value),
                "error" => error = Some(value),
                _ => {}
            }
        }

        let realm = realm.ok_or_else(|| Error::AuthChallenge("challenge has no realm".into()))?;

        Ok(Challenge {
            realm,
            service,
            scope,
            error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_standard_bearer_challenge() {
        let header = r#"Bearer realm="https://auth.example/token",service="registry",scope="repository:foo:pull""#;
        let challenge = Challenge::parse(header).unwrap();
        assert_eq!(challenge.realm, "https://auth.example/token");
        assert_eq!(challenge.service.as_deref(), Some("registry"));
        assert_eq!(challenge.scope.as_deref(), Some("repository:foo:pull"));
        assert!(challenge.error.is_none());
    }

    #[test]
    fn parses_error_attribute() {
        let header = r#"Bearer realm="https://auth.example/token",service="registry",scope="repository:foo:pull",error="insufficient_scope""#;
        let challenge = Challenge::parse(header).unwrap();
        assert_eq!(challenge.error.as_deref(), Some("insufficient_scope"));
    }

    #[test]
    fn rejects_non_bearer_schemes() {
        assert!(Challenge::parse(r#"Basic realm="foo""#).is_err());
    }

    #[test]
    fn rejects_challenge_with_no_realm() {
        assert!(Challenge::parse(r#"Bearer service="registry""#).is_err());
    }

    #[test]
    fn none_provider_applies_no_credentials() {
        let provider = AuthProvider::None;
        assert!(!provider.is_expired());
    }

    #[test]
    fn bearer_provider_with_past_expiry_is_expired() {
        let provider = AuthProvider::Bearer {
            token: "abc".into(),
            expires_at: Some(Utc::now() - chrono::Duration::seconds(10)),
        };
        assert!(provider.is_expired());
    }

    #[test]
    fn bearer_provider_with_future_expiry_is_not_expired() {
        let provider = AuthProvider::Bearer {
            token: "abc".into(),
            expires_at: Some(Utc::now() + chrono::Duration::seconds(300)),
        };
        assert!(!provider.is_expired());
    }

    #[tokio::test]
    async fn shared_provider_get_set_round_trips() {
        let shared = SharedAuthProvider::new(AuthProvider::None);
        assert_eq!(shared.get().await, AuthProvider::None);
        shared.set(AuthProvider::basic("u", "p")).await;
        assert_eq!(
            shared.get().await,
            AuthProvider::UsernamePassword {
                username: "u".into(),
                password: "p".into()
            }
        );
    }
}
