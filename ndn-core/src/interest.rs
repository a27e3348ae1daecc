//! Interest: query template (prefix + selectors + exclusion filter + lifetime).

use std::time::Duration;

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::content::ContentObject;
use crate::exclude::ExclusionFilter;
use crate::key::PublicKeyId;
use crate::name::Name;
use crate::wire;

/// Lifetime used when an interest does not set one.
pub const DEFAULT_LIFETIME: Duration = Duration::from_secs(4);

/// Nonce length in bytes.
pub const NONCE_LEN: usize = 8;

/// Answer-origin-kind bits.
pub const AOK_CS: u8 = 1;
pub const AOK_NEW: u8 = 2;
pub const AOK_DEFAULT: u8 = AOK_CS | AOK_NEW;
pub const AOK_STALE: u8 = 4;
pub const AOK_EXPIRE: u8 = 16;

/// Which child the responder should prefer when several match.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChildSelector {
    #[default]
    Leftmost,
    Rightmost,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interest {
    pub name: Name,
    pub min_suffix_components: Option<usize>,
    pub max_suffix_components: Option<usize>,
    pub publisher_key_digest: Option<PublicKeyId>,
    pub exclude: Option<ExclusionFilter>,
    pub child_selector: Option<ChildSelector>,
    pub answer_origin_kind: Option<u8>,
    pub scope: Option<u8>,
    pub lifetime: Option<Duration>,
    pub nonce: Option<Vec<u8>>,
}

impl Interest {
    pub fn new(name: Name) -> Self {
        Self {
            name,
            ..Self::default()
        }
    }

    /// Copy of `template` selectors for a different name. The nonce is not carried over.
    pub fn from_template(template: &Interest, name: Name) -> Self {
        Self {
            name,
            nonce: None,
            ..template.clone()
        }
    }

    pub fn with_min_suffix_components(mut self, n: usize) -> Self {
        self.min_suffix_components = Some(n);
        self
    }

    pub fn with_max_suffix_components(mut self, n: usize) -> Self {
        self.max_suffix_components = Some(n);
        self
    }

    pub fn with_publisher_key_digest(mut self, digest: PublicKeyId) -> Self {
        self.publisher_key_digest = Some(digest);
        self
    }

    pub fn with_exclude(mut self, exclude: ExclusionFilter) -> Self {
        self.exclude = Some(exclude);
        self
    }

    pub fn with_child_selector(mut self, selector: ChildSelector) -> Self {
        self.child_selector = Some(selector);
        self
    }

    pub fn with_answer_origin_kind(mut self, kind: u8) -> Self {
        self.answer_origin_kind = Some(kind);
        self
    }

    pub fn with_scope(mut self, scope: u8) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = Some(lifetime);
        self
    }

    pub fn with_nonce(mut self, nonce: Vec<u8>) -> Self {
        self.nonce = Some(nonce);
        self
    }

    pub fn effective_lifetime(&self) -> Duration {
        self.lifetime.unwrap_or(DEFAULT_LIFETIME)
    }

    pub fn effective_answer_origin_kind(&self) -> u8 {
        self.answer_origin_kind.unwrap_or(AOK_DEFAULT)
    }

    /// Replace the nonce with fresh random bytes.
    pub fn refresh_nonce(&mut self) {
        let mut nonce = vec![0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        self.nonce = Some(nonce);
    }

    pub fn matches(&self, content: &ContentObject) -> bool {
        content.matches_interest(self)
    }

    pub fn to_wire(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    pub fn from_wire(bytes: &[u8]) -> Result<Self, bincode::Error> {
        wire::decode_exact(bytes)
    }
}
