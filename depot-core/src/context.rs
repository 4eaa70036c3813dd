//! Tenant context propagation.
//!
//! A [`RequestContext`] is the unit of work: one HTTP request or one
//! background-job iteration. It is passed explicitly through every call that
//! touches tenant data. Attaching a tenant never mutates an existing context;
//! [`RequestContext::with_tenant`] returns a new one.

use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::ContextError;
use crate::{JobKind, TenantId, TenantInfo};

/// Resolved tenant identity. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TenantContext {
    tenant_id: TenantId,
    tenant_slug: String,
    tenant_name: String,
}

impl TenantContext {
    pub fn new(tenant_id: TenantId, slug: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            tenant_id,
            tenant_slug: slug.into(),
            tenant_name: name.into(),
        }
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn tenant_slug(&self) -> &str {
        &self.tenant_slug
    }

    pub fn tenant_name(&self) -> &str {
        &self.tenant_name
    }
}

impl From<&TenantInfo> for TenantContext {
    fn from(info: &TenantInfo) -> Self {
        Self::new(info.id, info.slug.clone(), info.name.clone())
    }
}

/// Where a unit of work came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "job")]
pub enum WorkOrigin {
    Request,
    Job(JobKind),
}

/// One unit of work flowing through the system.
#[derive(Debug, Clone)]
pub struct RequestContext {
    request_id: Uuid,
    origin: WorkOrigin,
    tenant: Option<Arc<TenantContext>>,
}

impl RequestContext {
    /// Context for an incoming request, without tenant identity yet.
    pub fn new() -> Self {
        Self {
            request_id: Uuid::now_v7(),
            origin: WorkOrigin::Request,
            tenant: None,
        }
    }

    /// Context for one iteration of a background job.
    pub fn background(kind: JobKind) -> Self {
        Self {
            request_id: Uuid::now_v7(),
            origin: WorkOrigin::Job(kind),
            tenant: None,
        }
    }

    /// Return a new context carrying the given tenant identity.
    pub fn with_tenant(
        &self,
        tenant_id: TenantId,
        slug: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        self.with_tenant_context(TenantContext::new(tenant_id, slug, name))
    }

    /// Return a new context carrying an already-built tenant context.
    pub fn with_tenant_context(&self, tenant: TenantContext) -> Self {
        Self {
            request_id: self.request_id,
            origin: self.origin,
            tenant: Some(Arc::new(tenant)),
        }
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn origin(&self) -> WorkOrigin {
        self.origin
    }

    pub fn has_tenant(&self) -> bool {
        self.tenant.is_some()
    }

    pub fn tenant(&self) -> Result<&TenantContext, ContextError> {
        self.tenant
            .as_deref()
            .ok_or(ContextError::MissingTenant { field: "tenant" })
    }

    pub fn tenant_id(&self) -> Result<TenantId, ContextError> {
        self.tenant
            .as_deref()
            .map(TenantContext::tenant_id)
            .ok_or(ContextError::MissingTenant { field: "tenant_id" })
    }

    pub fn tenant_slug(&self) -> Result<&str, ContextError> {
        self.tenant
            .as_deref()
            .map(TenantContext::tenant_slug)
            .ok_or(ContextError::MissingTenant { field: "tenant_slug" })
    }

    pub fn tenant_name(&self) -> Result<&str, ContextError> {
        self.tenant
            .as_deref()
            .map(TenantContext::tenant_name)
            .ok_or(ContextError::MissingTenant { field: "tenant_name" })
    }

    /// Tenant id for code paths that sit behind the tenant middleware.
    ///
    /// # Panics
    ///
    /// Panics when no tenant is attached. That can only happen if a route
    /// was mounted outside the middleware, which is a programming error.
    pub fn must_tenant_id(&self) -> TenantId {
        match self.tenant.as_deref() {
            Some(tenant) => tenant.tenant_id(),
            None => panic!(
                "must_tenant_id called without tenant context (request {})",
                self.request_id
            ),
        }
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}
