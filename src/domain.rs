//! Numbering domains.
//!
//! A numbering domain is the unit of sequence isolation. Every tenant gets one
//! domain per sales channel, except the single configured legacy tenant whose
//! online and offline documents share one sequence.
//!
//! [`DomainResolver::resolve`] is the only way to obtain a [`DomainKey`].

use std::fmt;
use std::str::FromStr;

use crate::error::{AllocationError, Result};

/// Organisation identifier. Always positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TenantId(i64);

impl TenantId {
    /// Validate a raw tenant id.
    pub fn new(id: i64) -> Result<Self> {
        if id <= 0 {
            return Err(AllocationError::InvalidDomainInput(format!(
                "tenant id must be positive, got {}",
                id
            )));
        }
        Ok(Self(id))
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl TryFrom<i64> for TenantId {
    type Error = AllocationError;

    fn try_from(id: i64) -> Result<Self> {
        Self::new(id)
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sales channel a document was created through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Online,
    Offline,
}

impl Channel {
    /// Persisted and textual form.
    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Online => "online",
            Channel::Offline => "offline",
        }
    }
}

impl FromStr for Channel {
    type Err = AllocationError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "online" => Ok(Channel::Online),
            "offline" => Ok(Channel::Offline),
            other => Err(AllocationError::InvalidDomainInput(format!(
                "unknown channel '{}', expected 'online' or 'offline'",
                other
            ))),
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key of one numbering domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DomainKey {
    /// Channel-partitioned domain (every tenant but the legacy one).
    Channel(TenantId, Channel),
    /// Collapsed domain of the legacy tenant; channel is ignored.
    Tenant(TenantId),
}

impl DomainKey {
    pub fn tenant(&self) -> TenantId {
        match *self {
            DomainKey::Channel(tenant, _) | DomainKey::Tenant(tenant) => tenant,
        }
    }

    /// Channel column value; `None` for a collapsed domain.
    pub fn channel(&self) -> Option<Channel> {
        match *self {
            DomainKey::Channel(_, channel) => Some(channel),
            DomainKey::Tenant(_) => None,
        }
    }
}

impl fmt::Display for DomainKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DomainKey::Channel(tenant, channel) => write!(f, "{}/{}", tenant, channel),
            DomainKey::Tenant(tenant) => write!(f, "{}", tenant),
        }
    }
}

/// Maps `(tenant, channel)` to a [`DomainKey`], applying the legacy exception.
#[derive(Debug, Clone, Copy, Default)]
pub struct DomainResolver {
    legacy_tenant: Option<TenantId>,
}

impl DomainResolver {
    pub fn new(legacy_tenant: Option<TenantId>) -> Self {
        Self { legacy_tenant }
    }

    pub fn legacy_tenant(&self) -> Option<TenantId> {
        self.legacy_tenant
    }

    pub fn resolve(&self, tenant: TenantId, channel: Channel) -> DomainKey {
        if self.legacy_tenant == Some(tenant) {
            DomainKey::Tenant(tenant)
        } else {
            DomainKey::Channel(tenant, channel)
        }
    }
}
