//! Authorised-service scope: which services' events a caller may see
//!
//! The scope is derived per request from the caller's granted roles and is
//! never persisted. An empty scope is a valid outcome: it compiles to a query
//! that returns nothing.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::config::AuditConfig;

#[cfg(feature = "jwt")]
use crate::error::Result;

/// Ordered, deduplicated set of service names
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuthorisedServices(BTreeSet<String>);

impl AuthorisedServices {
    pub fn new<I, S>(services: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(
            services
                .into_iter()
                .map(Into::into)
                .filter(|s: &String| !s.trim().is_empty())
                .collect(),
        )
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn contains(&self, service: &str) -> bool {
        self.0.contains(service)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.0.iter().cloned().collect()
    }
}

impl<S: Into<String>> FromIterator<S> for AuthorisedServices {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self::new(iter)
    }
}

/// Role -> services grant table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceGrants {
    known_services: Vec<String>,
    role_services: BTreeMap<String, Vec<String>>,
    /// Role that grants every known service
    all_services_role: Option<String>,
}

impl ServiceGrants {
    pub fn new(known_services: Vec<String>, role_services: BTreeMap<String, Vec<String>>) -> Self {
        Self {
            known_services,
            role_services,
            all_services_role: None,
        }
    }

    pub fn from_config(config: &AuditConfig) -> Self {
        Self::new(config.known_services.clone(), config.role_services.clone())
            .with_all_services_role(config.all_services_role.clone())
    }

    pub fn with_all_services_role(mut self, role: impl Into<String>) -> Self {
        self.all_services_role = Some(role.into());
        self
    }

    /// Union of the services granted by `roles`; unknown roles grant nothing
    pub fn resolve<I, S>(&self, roles: I) -> AuthorisedServices
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut services = BTreeSet::new();
        for role in roles {
            let role = role.as_ref();
            if self.all_services_role.as_deref() == Some(role) {
                services.extend(self.known_services.iter().cloned());
            } else if let Some(granted) = self.role_services.get(role) {
                services.extend(granted.iter().cloned());
            }
        }
        AuthorisedServices::new(services)
    }
}

/// Bearer token claims read by the resolver
#[cfg(feature = "jwt")]
#[derive(Debug, Serialize, Deserialize)]
pub struct ScopeClaims {
    /// Subject (caller identity)
    pub sub: String,
    /// Granted roles
    #[serde(default)]
    pub authorities: Vec<String>,
    /// Expiry (Unix timestamp)
    pub exp: usize,
}

/// Turns a caller's credentials into an [`AuthorisedServices`] set
#[derive(Debug, Clone)]
pub struct ServiceScopeResolver {
    grants: ServiceGrants,
    #[cfg(feature = "jwt")]
    jwt_secret: String,
}

impl ServiceScopeResolver {
    pub fn from_config(config: &AuditConfig) -> Self {
        Self {
            grants: ServiceGrants::from_config(config),
            #[cfg(feature = "jwt")]
            jwt_secret: config.jwt_secret.clone(),
        }
    }

    /// Scope for an already-authenticated set of roles
    pub fn from_roles<I, S>(&self, roles: I) -> AuthorisedServices
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.grants.resolve(roles)
    }

    /// Verify a bearer token and resolve its `authorities` claim
    #[cfg(feature = "jwt")]
    pub fn from_token(&self, token: &str) -> Result<AuthorisedServices> {
        use jsonwebtoken::{decode, DecodingKey, Validation};
        use tracing::debug;

        let token = token.strip_prefix("Bearer ").unwrap_or(token);
        let claims = decode::<ScopeClaims>(
            token,
            &DecodingKey::from_secret(self.jwt_secret.as_bytes()),
            &Validation::default(),
        )?
        .claims;

        let scope = self.grants.resolve(&claims.authorities);
        debug!(sub = %claims.sub, services = scope.len(), "Resolved service scope");
        Ok(scope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AuditConfig {
        AuditConfig::new("/tmp/unused")
            .with_jwt_secret("scope-secret")
            .with_known_services(["offender-service", "court-service", "prison-service"])
            .with_role_grant("ROLE_AUDIT_OFFENDERS", ["offender-service"])
            .with_role_grant("ROLE_AUDIT_COURTS", ["court-service", "offender-service"])
    }

    #[test]
    fn test_resolve_unions_and_dedups() {
        let grants = ServiceGrants::from_config(&config());
        let scope = grants.resolve(["ROLE_AUDIT_OFFENDERS", "ROLE_AUDIT_COURTS", "ROLE_OTHER"]);
        assert_eq!(scope.to_vec(), vec!["court-service", "offender-service"]);
    }

    #[test]
    fn test_wildcard_role_grants_everything() {
        let grants = ServiceGrants::from_config(&config());
        let scope = grants.resolve(["ROLE_AUDIT_ALL_SERVICES"]);
        assert_eq!(scope.len(), 3);
        assert!(scope.contains("prison-service"));
    }

    #[test]
    fn test_no_roles_is_empty_scope() {
        let grants = ServiceGrants::from_config(&config());
        assert!(grants.resolve(Vec::<String>::new()).is_empty());
        assert!(AuthorisedServices::new(["", "  "]).is_empty());
    }

    #[test]
    fn test_resolver_from_roles() {
        let resolver = ServiceScopeResolver::from_config(&config());
        let scope = resolver.from_roles(vec!["ROLE_AUDIT_COURTS".to_string()]);
        assert_eq!(scope.to_vec(), vec!["court-service", "offender-service"]);
        assert!(resolver.from_roles(["ROLE_UNKNOWN"]).is_empty());
    }

    #[cfg(feature = "jwt")]
    #[test]
    fn test_from_token() {
        use jsonwebtoken::{encode, EncodingKey, Header};

        let claims = ScopeClaims {
            sub: "bobby.beans".into(),
            authorities: vec!["ROLE_AUDIT_OFFENDERS".into()],
            exp: (chrono::Utc::now().timestamp() + 3600) as usize,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"scope-secret"),
        )
        .unwrap();

        let resolver = ServiceScopeResolver::from_config(&config());
        let scope = resolver.from_token(&format!("Bearer {token}")).unwrap();
        assert_eq!(scope.to_vec(), vec!["offender-service"]);

        let err = resolver.from_token("not-a-token").unwrap_err();
        assert!(matches!(err, crate::error::AuditError::TokenInvalid(_)));
    }
}
