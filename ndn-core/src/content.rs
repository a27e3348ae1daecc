//! Content objects: signed, named data units, their metadata envelope and key locators.

use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::interest::Interest;
use crate::key::{self, Key, KeyError, PublicKeyId};
use crate::name::{Component, Name};
use crate::wire;

/// OID of SHA-256, recorded as the digest algorithm of every signature.
pub const DIGEST_ALGORITHM_SHA256: &str = "2.16.840.1.101.3.4.2.1";

/// What a key locator points at. Exactly one reference is active.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyReference {
    /// Name under which the key is published.
    Name(Name),
    /// Public key DER.
    Key(Vec<u8>),
    /// Certificate bytes.
    Certificate(Vec<u8>),
}

/// Result of resolving a key locator locally.
#[derive(Debug, Clone)]
pub enum ResolvedKey {
    Key(Key),
    /// The key must be fetched by name first.
    Name(Name),
}

/// Reference to the key that verifies a signature. The wire encoding is cached
/// and dropped whenever the reference changes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeyLocator {
    reference: Option<KeyReference>,
    #[serde(skip)]
    wire: OnceLock<Vec<u8>>,
}

impl KeyLocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_name(name: Name) -> Self {
        let mut kl = Self::new();
        kl.set_name(name);
        kl
    }

    pub fn from_key(key: &Key) -> Self {
        let mut kl = Self::new();
        kl.set_key(key);
        kl
    }

    pub fn from_certificate(certificate: Vec<u8>) -> Self {
        let mut kl = Self::new();
        kl.set_certificate(certificate);
        kl
    }

    pub fn reference(&self) -> Option<&KeyReference> {
        self.reference.as_ref()
    }

    pub fn set_name(&mut self, name: Name) {
        self.set_reference(Some(KeyReference::Name(name)));
    }

    pub fn set_key(&mut self, key: &Key) {
        self.set_reference(Some(KeyReference::Key(key.public_to_der().to_vec())));
    }

    pub fn set_certificate(&mut self, certificate: Vec<u8>) {
        self.set_reference(Some(KeyReference::Certificate(certificate)));
    }

    pub fn clear(&mut self) {
        self.set_reference(None);
    }

    fn set_reference(&mut self, reference: Option<KeyReference>) {
        self.reference = reference;
        self.wire = OnceLock::new();
    }

    /// Wire encoding of the active reference, rebuilt after any change.
    pub fn to_wire(&self) -> Result<&[u8], KeyLocatorError> {
        if let Some(wire) = self.wire.get() {
            return Ok(wire.as_slice());
        }
        let reference = self.reference.as_ref().ok_or(KeyLocatorError::Unresolved)?;
        let encoded = bincode::serialize(reference).map_err(KeyLocatorError::Codec)?;
        Ok(self.wire.get_or_init(|| encoded).as_slice())
    }

    pub fn from_wire(bytes: &[u8]) -> Result<Self, KeyLocatorError> {
        let reference: KeyReference = wire::decode_exact(bytes).map_err(KeyLocatorError::Codec)?;
        let mut kl = Self::new();
        kl.set_reference(Some(reference));
        Ok(kl)
    }

    /// Resolve without network access: an embedded key is returned, a name is handed back
    /// for the caller to fetch. Certificates are not supported.
    pub fn resolve(&self) -> Result<ResolvedKey, KeyLocatorError> {
        match &self.reference {
            None => Err(KeyLocatorError::Unresolved),
            Some(KeyReference::Name(name)) => Ok(ResolvedKey::Name(name.clone())),
            Some(KeyReference::Key(der)) => Ok(ResolvedKey::Key(Key::from_public_der(der)?)),
            Some(KeyReference::Certificate(_)) => Err(KeyLocatorError::NotSupported),
        }
    }
}

impl PartialEq for KeyLocator {
    fn eq(&self, other: &Self) -> bool {
        self.reference == other.reference
    }
}

impl Eq for KeyLocator {}

#[derive(Debug, thiserror::Error)]
pub enum KeyLocatorError {
    #[error("key locator has no name, key or certificate")]
    Unresolved,
    #[error("certificate key locators are not supported")]
    NotSupported,
    #[error("key locator codec error: {0}")]
    Codec(bincode::Error),
    #[error(transparent)]
    Key(#[from] KeyError),
}

/// Content type tag carried in [`SignedInfo`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContentType {
    #[default]
    Data,
    Encr,
    Gone,
    Key,
    Link,
    Nack,
}

/// Metadata envelope of a content object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedInfo {
    pub publisher_key_digest: Option<PublicKeyId>,
    /// Signing time in version units (1/4096 s since the epoch).
    pub timestamp: Option<u64>,
    pub content_type: ContentType,
    pub freshness_seconds: Option<u32>,
    pub final_block_id: Option<Component>,
    pub key_locator: Option<KeyLocator>,
}

impl SignedInfo {
    /// Envelope naming `key` as publisher, with the key embedded in the locator.
    pub fn for_key(key: &Key) -> Self {
        Self {
            publisher_key_digest: Some(*key.public_key_id()),
            key_locator: Some(KeyLocator::from_key(key)),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub digest_algorithm: String,
    pub witness: Option<Vec<u8>>,
    pub bits: Vec<u8>,
}

/// Outcome of checking a content object's signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    Valid,
    /// No key available locally (it would have to be fetched first).
    Unverified,
    /// Digest or signature mismatch.
    Invalid,
}

#[derive(Serialize)]
struct SignedPortion<'a> {
    name: &'a Name,
    signed_info: &'a SignedInfo,
    content: &'a [u8],
}

/// Named data unit. Any mutation after signing marks the signature stale until re-signed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContentObject {
    name: Option<Name>,
    signed_info: Option<SignedInfo>,
    content: Vec<u8>,
    signature: Option<Signature>,
    #[serde(skip)]
    stale: bool,
}

impl ContentObject {
    pub fn new(name: Name, signed_info: SignedInfo, content: impl Into<Vec<u8>>) -> Self {
        Self {
            name: Some(name),
            signed_info: Some(signed_info),
            content: content.into(),
            signature: None,
            stale: false,
        }
    }

    pub fn name(&self) -> Option<&Name> {
        self.name.as_ref()
    }

    pub fn signed_info(&self) -> Option<&SignedInfo> {
        self.signed_info.as_ref()
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    pub fn signature(&self) -> Option<&Signature> {
        self.signature.as_ref()
    }

    pub fn set_name(&mut self, name: Name) {
        self.name = Some(name);
        self.touch();
    }

    pub fn set_signed_info(&mut self, signed_info: SignedInfo) {
        self.signed_info = Some(signed_info);
        self.touch();
    }

    pub fn set_content(&mut self, content: impl Into<Vec<u8>>) {
        self.content = content.into();
        self.touch();
    }

    fn touch(&mut self) {
        if self.signature.is_some() {
            self.stale = true;
        }
    }

    /// Carries a signature and has not been modified locally since signing.
    /// The modification flag is not encoded: a decoded object only reports whether a
    /// signature is present. Use [`ContentObject::verify`] to check it.
    pub fn is_signed(&self) -> bool {
        self.signature.is_some() && !self.stale
    }

    fn signing_digest(&self) -> Result<[u8; 32], ContentError> {
        let (name, signed_info) = match (&self.name, &self.signed_info) {
            (Some(n), Some(si)) => (n, si),
            _ => return Err(ContentError::Incomplete),
        };
        let portion = SignedPortion {
            name,
            signed_info,
            content: &self.content,
        };
        let encoded = bincode::serialize(&portion).map_err(ContentError::Codec)?;
        Ok(key::digest(&encoded))
    }

    /// Sign over (name, signed info, content). Needs a private key and both name and signed info.
    pub fn sign(&mut self, key: &Key) -> Result<(), ContentError> {
        if !key.has_private() {
            return Err(ContentError::NoPrivateKey);
        }
        let digest = self.signing_digest()?;
        let bits = key.sign(&digest)?;
        self.signature = Some(Signature {
            digest_algorithm: DIGEST_ALGORITHM_SHA256.to_string(),
            witness: None,
            bits,
        });
        self.stale = false;
        Ok(())
    }

    /// Check the signature against `key`, or the key found through the key locator.
    pub fn verify(&self, key: Option<&Key>) -> Verification {
        let Some(signature) = &self.signature else {
            return Verification::Invalid;
        };
        let Ok(digest) = self.signing_digest() else {
            return Verification::Invalid;
        };
        let located;
        let key = match key {
            Some(k) => k,
            None => {
                let locator = self.signed_info.as_ref().and_then(|si| si.key_locator.as_ref());
                match locator.map(KeyLocator::resolve) {
                    Some(Ok(ResolvedKey::Key(k))) => {
                        located = k;
                        &located
                    }
                    _ => return Verification::Unverified,
                }
            }
        };
        if key.verify(&digest, &signature.bits) {
            Verification::Valid
        } else {
            Verification::Invalid
        }
    }

    pub fn to_wire(&self) -> Result<Vec<u8>, ContentError> {
        bincode::serialize(self).map_err(ContentError::Codec)
    }

    pub fn from_wire(bytes: &[u8]) -> Result<Self, ContentError> {
        wire::decode_exact(bytes).map_err(ContentError::Codec)
    }

    /// SHA-256 of the full encoding: the implicit last name component.
    pub fn digest(&self) -> Result<[u8; 32], ContentError> {
        Ok(key::digest(&self.to_wire()?))
    }

    pub fn implicit_digest_component(&self) -> Result<Component, ContentError> {
        Ok(Component::new(self.digest()?.to_vec()))
    }

    /// Name extended with the implicit digest component.
    pub fn full_name(&self) -> Result<Name, ContentError> {
        let name = self.name.as_ref().ok_or(ContentError::Incomplete)?;
        Ok(name.append(self.implicit_digest_component()?))
    }

    /// Whether this object satisfies `interest`.
    ///
    /// Suffix counts include the implicit digest component, so an exact match has one
    /// suffix component. The component right after the interest prefix (the digest on an
    /// exact match) must not be excluded.
    pub fn matches_interest(&self, interest: &Interest) -> bool {
        let Some(name) = &self.name else {
            return false;
        };
        let prefix = &interest.name;
        if !prefix.is_prefix_of(name) {
            return false;
        }
        let extra = name.len() - prefix.len();
        let suffix = extra + 1;
        if interest.min_suffix_components.is_some_and(|min| suffix < min) {
            return false;
        }
        if interest.max_suffix_components.is_some_and(|max| suffix > max) {
            return false;
        }
        if let Some(exclude) = interest.exclude.as_ref().filter(|e| !e.is_empty()) {
            let next = match name.get(prefix.len()) {
                Some(c) => c.clone(),
                None => match self.implicit_digest_component() {
                    Ok(c) => c,
                    Err(_) => return false,
                },
            };
            if exclude.is_excluded(&next) {
                return false;
            }
        }
        if let Some(wanted) = &interest.publisher_key_digest {
            let publisher = self
                .signed_info
                .as_ref()
                .and_then(|si| si.publisher_key_digest.as_ref());
            if publisher != Some(wanted) {
                return false;
            }
        }
        true
    }
}

impl PartialEq for ContentObject {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.signed_info == other.signed_info
            && self.content == other.content
            && self.signature == other.signature
    }
}

impl Eq for ContentObject {}

#[derive(Debug, thiserror::Error)]
pub enum ContentError {
    #[error("content object needs a name and signed info before signing")]
    Incomplete,
    #[error("signing key has no private material")]
    NoPrivateKey,
    #[error("content object is not signed")]
    Unsigned,
    #[error("content object codec error: {0}")]
    Codec(bincode::Error),
    #[error(transparent)]
    Key(#[from] KeyError),
}
