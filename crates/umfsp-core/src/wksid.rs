//! Well-known security identifiers.
//!
//! SIDs are resolved once and then served from a process-wide table that is
//! created on first use. [`finalize`] empties the table explicitly (at volume
//! teardown); a later [`get`] repopulates it.

use crate::error::{ProxyError, ProxyResult};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::trace;

/// SIDs the proxy needs to build default security descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WellKnownSid {
    World,
    LocalSystem,
    Administrators,
    AuthenticatedUsers,
    Network,
    Service,
    Anonymous,
}

impl WellKnownSid {
    /// "Everyone" is the World SID.
    pub const EVERYONE: WellKnownSid = WellKnownSid::World;

    fn components(self) -> (u64, &'static [u32]) {
        match self {
            WellKnownSid::World => (1, &[0]),
            WellKnownSid::LocalSystem => (5, &[18]),
            WellKnownSid::Administrators => (5, &[32, 544]),
            WellKnownSid::AuthenticatedUsers => (5, &[11]),
            WellKnownSid::Network => (5, &[2]),
            WellKnownSid::Service => (5, &[6]),
            WellKnownSid::Anonymous => (5, &[7]),
        }
    }
}

/// A security identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Sid {
    /// Identifier authority (48 bits).
    pub authority: u64,
    pub sub_authorities: Vec<u32>,
}

impl Sid {
    const REVISION: u8 = 1;
    const MAX_SUB_AUTHORITIES: usize = 15;

    /// Build the SID for a well-known identity.
    pub fn well_known(kind: WellKnownSid) -> Self {
        let (authority, subs) = kind.components();
        Self {
            authority,
            sub_authorities: subs.to_vec(),
        }
    }

    /// Binary (self-relative) form.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + 4 * self.sub_authorities.len());
        out.push(Self::REVISION);
        // Parsing and well_known both cap the count at 15.
        #[allow(clippy::cast_possible_truncation)]
        out.push(self.sub_authorities.len() as u8);
        out.extend_from_slice(&self.authority.to_be_bytes()[2..]);
        for sub in &self.sub_authorities {
            out.extend_from_slice(&sub.to_le_bytes());
        }
        out
    }
}

impl fmt::Display for Sid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S-{}-{}", Self::REVISION, self.authority)?;
        for sub in &self.sub_authorities {
            write!(f, "-{sub}")?;
        }
        Ok(())
    }
}

impl FromStr for Sid {
    type Err = ProxyError;

    fn from_str(s: &str) -> ProxyResult<Self> {
        let bad = || ProxyError::invalid(format!("malformed SID {s:?}"));
        let mut parts = s.split('-');
        if !parts.next().is_some_and(|p| p.eq_ignore_ascii_case("S")) || parts.next() != Some("1") {
            return Err(bad());
        }
        let authority: u64 = parts.next().and_then(|p| p.parse().ok()).ok_or_else(bad)?;
        if authority >= 1 << 48 {
            return Err(bad());
        }
        let sub_authorities = parts
            .map(|p| p.parse::<u32>().map_err(|_| bad()))
            .collect::<ProxyResult<Vec<_>>>()?;
        if sub_authorities.len() > Self::MAX_SUB_AUTHORITIES {
            return Err(bad());
        }
        Ok(Self {
            authority,
            sub_authorities,
        })
    }
}

static TABLE: Lazy<RwLock<HashMap<WellKnownSid, Arc<Sid>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Cached SID for `kind`.
pub fn get(kind: WellKnownSid) -> Arc<Sid> {
    if let Some(sid) = TABLE.read().get(&kind) {
        return Arc::clone(sid);
    }
    let mut table = TABLE.write();
    Arc::clone(table.entry(kind).or_insert_with(|| {
        trace!(?kind, "resolving well-known SID");
        Arc::new(Sid::well_known(kind))
    }))
}

/// Drop every cached SID.
pub fn finalize() {
    TABLE.write().clear();
}
