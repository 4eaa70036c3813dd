//! Tenant resolution.
//!
//! The resolver answers "which active tenant is this?" for the middleware,
//! the public lookup route and anything else that needs a [`TenantInfo`].
//!
//! [`TenantInfo`]: depot_core::TenantInfo

mod resolver;

pub use resolver::TenantResolver;
