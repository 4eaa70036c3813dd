//! Tenant metadata.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::TenantId;

/// Maximum slug length. Matches the DNS label limit so a slug is always
/// usable as a subdomain.
pub const MAX_SLUG_LEN: usize = 63;

/// Subscription plan of a tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantPlan {
    Free,
    Team,
    Enterprise,
}

impl TenantPlan {
    pub fn as_str(&self) -> &'static str {
        match self {
            TenantPlan::Free => "free",
            TenantPlan::Team => "team",
            TenantPlan::Enterprise => "enterprise",
        }
    }
}

impl fmt::Display for TenantPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TenantPlan {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "free" => Ok(TenantPlan::Free),
            "team" => Ok(TenantPlan::Team),
            "enterprise" => Ok(TenantPlan::Enterprise),
            other => Err(format!("unknown tenant plan: {}", other)),
        }
    }
}

/// Tenant metadata as held by the tenant store.
///
/// The store is authoritative; anything cached from it is a disposable
/// projection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantInfo {
    pub id: TenantId,
    /// Unique, URL-safe.
    pub slug: String,
    pub name: String,
    pub is_active: bool,
    pub plan: TenantPlan,
}

impl TenantInfo {
    /// Create an active tenant on the free plan.
    pub fn new(id: TenantId, slug: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id,
            slug: slug.into(),
            name: name.into(),
            is_active: true,
            plan: TenantPlan::Free,
        }
    }

    pub fn with_plan(mut self, plan: TenantPlan) -> Self {
        self.plan = plan;
        self
    }

    pub fn deactivated(mut self) -> Self {
        self.is_active = false;
        self
    }
}

/// Check that a slug is URL-safe: lowercase ASCII letters, digits and
/// hyphens, 1..=63 characters, no leading or trailing hyphen.
pub fn is_valid_slug(slug: &str) -> bool {
    if slug.is_empty() || slug.len() > MAX_SLUG_LEN {
        return false;
    }
    if slug.starts_with('-') || slug.ends_with('-') {
        return false;
    }
    slug.bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_slugs() {
        for slug in ["alpha", "a", "team-42", "0day", &"x".repeat(63)] {
            assert!(is_valid_slug(slug), "{} should be valid", slug);
        }
    }

    #[test]
    fn test_invalid_slugs() {
        for slug in ["", "-alpha", "alpha-", "Alpha", "al_pha", "al.pha", "al pha", &"x".repeat(64)] {
            assert!(!is_valid_slug(slug), "{:?} should be invalid", slug);
        }
    }

    #[test]
    fn test_plan_parse_is_case_insensitive() {
        assert_eq!("Enterprise".parse::<TenantPlan>(), Ok(TenantPlan::Enterprise));
        assert!("gold".parse::<TenantPlan>().is_err());
    }

    #[test]
    fn test_builder_helpers() {
        let info = TenantInfo::new(TenantId::now_v7(), "alpha", "Alpha Corp")
            .with_plan(TenantPlan::Team)
            .deactivated();
        assert_eq!(info.plan, TenantPlan::Team);
        assert!(!info.is_active);
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Any slug accepted by the validator is a legal DNS label.
        #[test]
        fn prop_valid_slug_is_dns_label(slug in "[a-z0-9][a-z0-9-]{0,61}[a-z0-9]") {
            prop_assert!(is_valid_slug(&slug));
            prop_assert!(slug.len() <= MAX_SLUG_LEN);
        }

        /// Uppercase characters are always rejected.
        #[test]
        fn prop_uppercase_rejected(slug in "[a-z]{0,5}[A-Z][a-z]{0,5}") {
            prop_assert!(!is_valid_slug(&slug));
        }
    }
}
