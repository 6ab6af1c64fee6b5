//! Session identity derived from the LMS composite session cookie.
//!
//! The LMS keeps the logged-in user id and the current XSRF token inside one cookie whose
//! value is a comma separated list of `key:value` pairs, e.g.
//! `expires:1700000000,id:_42_1,xsrf:1b2c-3d`. Values may contain `:` themselves, only the
//! first colon of a pair separates key from value.
//!
//! Nothing here is cached. Every read goes back to the [`CookieStore`] because the token
//! rotates underneath us.

use std::sync::Arc;

use crate::config::ClientConfig;
use crate::cookies::CookieStore;

/// Where in the cookie set the session lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCookieFormat {
    pub cookie_name: String,
    pub user_key: String,
    pub xsrf_key: String,
}

impl Default for SessionCookieFormat {
    fn default() -> Self {
        Self::from_config(&ClientConfig::default())
    }
}

impl SessionCookieFormat {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            cookie_name: config.session_cookie.clone(),
            user_key: config.user_id_key.clone(),
            xsrf_key: config.xsrf_key.clone(),
        }
    }

    /// Extracts the identity from a composite cookie value.
    pub fn identity(&self, composite: &str) -> SessionIdentity {
        let pairs = parse_composite(composite);
        let lookup = |key: &str| {
            pairs
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
                .filter(|v| !v.is_empty())
        };

        SessionIdentity {
            user_id: lookup(&self.user_key),
            xsrf_token: lookup(&self.xsrf_key),
        }
    }
}

/// Who is logged in and which XSRF token the server currently expects.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionIdentity {
    pub user_id: Option<String>,
    pub xsrf_token: Option<String>,
}

/// Splits `k:v,k2:v2` into ordered pairs. Entries without a colon are skipped.
pub fn parse_composite(value: &str) -> Vec<(String, String)> {
    value
        .split(',')
        .filter_map(|pair| pair.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .filter(|(k, _)| !k.is_empty())
        .collect()
}

/// Inverse of [`parse_composite`].
pub fn compose_composite<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> String
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    pairs
        .into_iter()
        .map(|(k, v)| format!("{}:{}", k.as_ref(), v.as_ref()))
        .collect::<Vec<_>>()
        .join(",")
}

/// Reads identity and XSRF token out of a shared [`CookieStore`].
#[derive(Clone)]
pub struct SessionCredentialResolver {
    store: Arc<CookieStore>,
}

impl SessionCredentialResolver {
    pub fn new(store: Arc<CookieStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<CookieStore> {
        &self.store
    }

    /// Both fields are `None` when the composite cookie is absent.
    pub fn identity(&self) -> SessionIdentity {
        self.store.identity()
    }

    pub fn user_id(&self) -> Option<String> {
        self.identity().user_id
    }

    pub fn xsrf(&self) -> Option<String> {
        self.identity().xsrf_token
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cookies::Cookie;

    #[test]
    fn parse_splits_on_first_colon_only() {
        let pairs = parse_composite("expires:1700000000,id:_42_1,xsrf:a:b:c");
        assert_eq!(
            pairs,
            vec![
                ("expires".to_string(), "1700000000".to_string()),
                ("id".to_string(), "_42_1".to_string()),
                ("xsrf".to_string(), "a:b:c".to_string()),
            ]
        );
    }

    #[test]
    fn compose_is_byte_compatible() {
        let raw = "expires:1700000000,id:_42_1,xsrf:a:b:c";
        assert_eq!(compose_composite(parse_composite(raw)), raw);
        assert_eq!(compose_composite([("id", "1"), ("xsrf", "t")]), "id:1,xsrf:t");
    }

    #[test]
    fn malformed_pairs_are_skipped() {
        let pairs = parse_composite("garbage,,:novalue,id:7");
        assert_eq!(pairs, vec![("id".to_string(), "7".to_string())]);
    }

    #[test]
    fn identity_from_composite() {
        let format = SessionCookieFormat::default();
        let id = format.identity("id:_42_1,xsrf:tok");
        assert_eq!(id.user_id.as_deref(), Some("_42_1"));
        assert_eq!(id.xsrf_token.as_deref(), Some("tok"));

        let id = format.identity("id:_42_1,xsrf:");
        assert_eq!(id.xsrf_token, None);
    }

    #[test]
    fn resolver_reads_store() {
        let store = CookieStore::new("learn.example.com", SessionCookieFormat::default());
        let resolver = SessionCredentialResolver::new(store.clone());
        assert_eq!(resolver.identity(), SessionIdentity::default());
        assert_eq!(resolver.xsrf(), None);

        store.store(vec![Cookie::new("session_router", "id:_9_1,xsrf:abc")]);
        assert_eq!(resolver.user_id().as_deref(), Some("_9_1"));
        assert_eq!(resolver.xsrf().as_deref(), Some("abc"));
    }
}
