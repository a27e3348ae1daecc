//! Hierarchical names: ordered sequences of opaque binary components.
//!
//! Names are immutable. Every `append*` returns a new `Name`. Ordering is the
//! canonical NDN ordering: component by component, shorter component first,
//! equal-length components compared bytewise, and a proper prefix sorts before
//! any of its extensions.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::wire;

/// Marker byte of a segment component.
pub const SEGMENT_MARKER: u8 = 0x00;
/// Marker byte of a version component.
pub const VERSION_MARKER: u8 = 0xFD;
/// Prefix of a key-ID component (followed by the public key digest).
pub const KEY_ID_MARKER: &[u8] = b"\xC1.M.K\x00";
/// Prefix of a nonce component (followed by 8 random bytes).
pub const NONCE_MARKER: &[u8] = b"\xC1.N\x00";
/// Application-level enumeration marker component.
pub const ENUMERATION_MARKER: &[u8] = b"\xC1.E.be";

/// Version units per second (fixed point, 1/4096 s).
pub const VERSION_TICKS_PER_SECOND: u64 = 4096;

const NONCE_LEN: usize = 8;

/// One name component. Opaque bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Component(Vec<u8>);

impl Component {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Component(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Segment component: `0x00` + big-endian number, leading zero bytes stripped.
    pub fn segment(number: u64) -> Self {
        Component(marked_number(SEGMENT_MARKER, number))
    }

    /// Version component: `0xFD` + big-endian version, leading zero bytes stripped.
    pub fn version(version: u64) -> Self {
        Component(marked_number(VERSION_MARKER, version))
    }

    /// Key-ID component for a public key digest.
    pub fn key_id(digest: &[u8]) -> Self {
        let mut out = Vec::with_capacity(KEY_ID_MARKER.len() + digest.len());
        out.extend_from_slice(KEY_ID_MARKER);
        out.extend_from_slice(digest);
        Component(out)
    }

    /// Nonce component with 8 random bytes.
    pub fn nonce() -> Self {
        let mut random = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut random);
        let mut out = Vec::with_capacity(NONCE_MARKER.len() + NONCE_LEN);
        out.extend_from_slice(NONCE_MARKER);
        out.extend_from_slice(&random);
        Component(out)
    }

    pub fn enumeration_marker() -> Self {
        Component(ENUMERATION_MARKER.to_vec())
    }

    /// Decode a segment component back to its number. `None` if this is not one.
    pub fn segment_number(&self) -> Option<u64> {
        marked_number_value(SEGMENT_MARKER, &self.0)
    }

    /// Decode a version component back to its value. `None` if this is not one.
    pub fn version_number(&self) -> Option<u64> {
        marked_number_value(VERSION_MARKER, &self.0)
    }

    /// Digest carried by a key-ID component.
    pub fn key_id_digest(&self) -> Option<&[u8]> {
        self.0.strip_prefix(KEY_ID_MARKER)
    }

    pub fn is_nonce(&self) -> bool {
        self.0.len() == NONCE_MARKER.len() + NONCE_LEN && self.0.starts_with(NONCE_MARKER)
    }
}

impl Ord for Component {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .len()
            .cmp(&other.0.len())
            .then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for Component {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl From<Vec<u8>> for Component {
    fn from(bytes: Vec<u8>) -> Self {
        Component(bytes)
    }
}

impl From<&[u8]> for Component {
    fn from(bytes: &[u8]) -> Self {
        Component(bytes.to_vec())
    }
}

impl From<&str> for Component {
    fn from(s: &str) -> Self {
        Component(s.as_bytes().to_vec())
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_component(f, &self.0)
    }
}

fn marked_number(marker: u8, number: u64) -> Vec<u8> {
    let be = number.to_be_bytes();
    let first = be.iter().position(|&b| b != 0).unwrap_or(be.len());
    let mut out = Vec::with_capacity(1 + be.len() - first);
    out.push(marker);
    out.extend_from_slice(&be[first..]);
    out
}

fn marked_number_value(marker: u8, bytes: &[u8]) -> Option<u64> {
    let (&first, rest) = bytes.split_first()?;
    if first != marker || rest.len() > 8 {
        return None;
    }
    let mut be = [0u8; 8];
    be[8 - rest.len()..].copy_from_slice(rest);
    Some(u64::from_be_bytes(be))
}

/// Current time as a version value: 1/4096 s units since the Unix epoch, rounded.
pub fn version_now() -> u64 {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let frac = (u64::from(elapsed.subsec_nanos()) * VERSION_TICKS_PER_SECOND + 500_000_000)
        / 1_000_000_000;
    elapsed
        .as_secs()
        .saturating_mul(VERSION_TICKS_PER_SECOND)
        .saturating_add(frac)
}

/// Immutable hierarchical name. Its wire encoding is computed on first use and cached.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct Name {
    components: Vec<Component>,
    #[serde(skip)]
    wire: OnceLock<Vec<u8>>,
}

impl Name {
    /// The empty (root) name `/`.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_components<I, C>(components: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<Component>,
    {
        Name {
            components: components.into_iter().map(Into::into).collect(),
            wire: OnceLock::new(),
        }
    }

    /// Parse a name from its wire encoding.
    pub fn from_wire(bytes: &[u8]) -> Result<Self, NameError> {
        let components: Vec<Component> = wire::decode_exact(bytes)?;
        Ok(Name::from_components(components))
    }

    /// Canonical wire encoding. Same layout as the bincode encoding of the component list.
    pub fn to_wire(&self) -> &[u8] {
        self.wire.get_or_init(|| encode_components(&self.components))
    }

    pub fn components(&self) -> &[Component] {
        &self.components
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Component> {
        self.components.get(index)
    }

    pub fn last(&self) -> Option<&Component> {
        self.components.last()
    }

    /// First `n` components (the whole name if `n >= len`).
    pub fn prefix(&self, n: usize) -> Name {
        Name::from_components(self.components.iter().take(n).cloned())
    }

    pub fn is_prefix_of(&self, other: &Name) -> bool {
        other.components.starts_with(&self.components)
    }

    pub fn append(&self, component: impl Into<Component>) -> Name {
        let mut components = self.components.clone();
        components.push(component.into());
        Name::from_components(components)
    }

    /// Append a version component. With `None` the version is derived from the current time.
    /// Two calls within the same 1/4096 s tick yield the same version.
    pub fn append_version(&self, version: Option<u64>) -> Name {
        self.append(Component::version(version.unwrap_or_else(version_now)))
    }

    pub fn append_segment(&self, segment: u64) -> Name {
        self.append(Component::segment(segment))
    }

    pub fn append_key_id(&self, digest: &[u8]) -> Name {
        self.append(Component::key_id(digest))
    }

    pub fn append_nonce(&self) -> Name {
        self.append(Component::nonce())
    }

    /// URI form with the `ndn:` scheme.
    pub fn to_uri(&self) -> String {
        format!("ndn:{}", self)
    }
}

fn encode_components(components: &[Component]) -> Vec<u8> {
    let size = 8 + components.iter().map(|c| 8 + c.len()).sum::<usize>();
    let mut out = Vec::with_capacity(size);
    out.extend_from_slice(&(components.len() as u64).to_le_bytes());
    for c in components {
        out.extend_from_slice(&(c.len() as u64).to_le_bytes());
        out.extend_from_slice(c.as_bytes());
    }
    out
}

impl PartialEq for Name {
    fn eq(&self, other: &Self) -> bool {
        self.components == other.components
    }
}

impl Eq for Name {}

impl Hash for Name {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.components.hash(state);
    }
}

impl Ord for Name {
    fn cmp(&self, other: &Self) -> Ordering {
        for (a, b) in self.components.iter().zip(&other.components) {
            match a.cmp(b) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }
        self.components.len().cmp(&other.components.len())
    }
}

impl PartialOrd for Name {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.components.is_empty() {
            return f.write_str("/");
        }
        for c in &self.components {
            f.write_str("/")?;
            write_component(f, c.as_bytes())?;
        }
        Ok(())
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Name({})", self.to_uri())
    }
}

fn is_unreserved(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~')
}

fn write_component(f: &mut fmt::Formatter<'_>, bytes: &[u8]) -> fmt::Result {
    // All-period components (including empty) get three extra periods.
    if bytes.iter().all(|&b| b == b'.') {
        f.write_str("...")?;
    }
    for &b in bytes {
        if is_unreserved(b) {
            write!(f, "{}", b as char)?;
        } else {
            write!(f, "%{:02X}", b)?;
        }
    }
    Ok(())
}

impl FromStr for Name {
    type Err = NameError;

    /// Parse `ndn:/a/b%FD%01` (scheme optional). Empty segments are skipped;
    /// a query or fragment ends the name.
    fn from_str(uri: &str) -> Result<Self, Self::Err> {
        let mut rest = uri;
        if let Some(colon) = rest.find(':').filter(|&i| !rest[..i].contains('/')) {
            let scheme = &rest[..colon];
            if !scheme.eq_ignore_ascii_case("ndn") && !scheme.eq_ignore_ascii_case("ccnx") {
                return Err(NameError::InvalidUri(uri.to_string()));
            }
            rest = &rest[colon + 1..];
        }
        if let Some(authority) = rest.strip_prefix("//") {
            rest = match authority.find('/') {
                Some(slash) => &authority[slash..],
                None => "",
            };
        }
        if let Some(end) = rest.find(['?', '#']) {
            rest = &rest[..end];
        }
        if !rest.is_empty() && !rest.starts_with('/') {
            return Err(NameError::InvalidUri(uri.to_string()));
        }

        let mut components = Vec::new();
        for segment in rest.split('/').filter(|s| !s.is_empty()) {
            let bytes = percent_decode(segment).ok_or_else(|| NameError::InvalidUri(uri.to_string()))?;
            if bytes.iter().all(|&b| b == b'.') {
                if bytes.len() < 3 {
                    return Err(NameError::InvalidUri(uri.to_string()));
                }
                components.push(Component(bytes[3..].to_vec()));
            } else {
                components.push(Component(bytes));
            }
        }
        Ok(Name::from_components(components))
    }
}

fn percent_decode(s: &str) -> Option<Vec<u8>> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = bytes.get(i + 1..i + 3)?;
            let hi = (hex[0] as char).to_digit(16)?;
            let lo = (hex[1] as char).to_digit(16)?;
            out.push((hi * 16 + lo) as u8);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    Some(out)
}

#[derive(Debug, thiserror::Error)]
pub enum NameError {
    #[error("invalid name URI: {0}")]
    InvalidUri(String),
    #[error("name decode error: {0}")]
    Decode(#[from] bincode::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn uri_components_and_wire_agree() {
        let from_uri: Name = "ndn:/ndnx/ping".parse().unwrap();
        let from_parts = Name::from_components(["ndnx", "ping"]);
        let from_wire = Name::from_wire(from_parts.to_wire()).unwrap();
        assert_eq!(from_uri, from_parts);
        assert_eq!(from_parts, from_wire);
        assert_eq!(from_uri.to_string(), "/ndnx/ping");
    }

    #[test]
    fn wire_layout_matches_bincode() {
        let name = Name::from_components(["a", "bc"]);
        let via_bincode = bincode::serialize(name.components()).unwrap();
        assert_eq!(name.to_wire(), via_bincode.as_slice());
    }

    #[test]
    fn root_name() {
        let root: Name = "ndn:/".parse().unwrap();
        assert!(root.is_empty());
        assert_eq!(root, Name::new());
        assert_eq!(root.to_string(), "/");
    }

    #[test]
    fn percent_escapes_roundtrip() {
        let name: Name = "/chat/%FD%04%E6%93.%18K/%00".parse().unwrap();
        assert_eq!(name.len(), 3);
        assert_eq!(name.get(2).unwrap().as_bytes(), &[0x00]);
        assert_eq!(name.get(1).unwrap().as_bytes(), b"\xFD\x04\xE6\x93.\x18K");
        assert_eq!(name.to_string(), "/chat/%FD%04%E6%93.%18K/%00");
    }

    #[test]
    fn period_components() {
        let name: Name = "/a/.../....".parse().unwrap();
        assert_eq!(name.get(1).unwrap().as_bytes(), b"");
        assert_eq!(name.get(2).unwrap().as_bytes(), b".");
        assert_eq!(name.to_string(), "/a/.../....");
        assert!("/a/..".parse::<Name>().is_err());
    }

    #[test]
    fn rejects_bad_uris() {
        assert!("http://example.com/x".parse::<Name>().is_err());
        assert!("ndn:/a/%G1".parse::<Name>().is_err());
        assert!("ndn:/a/%4".parse::<Name>().is_err());
        assert!("relative/name".parse::<Name>().is_err());
    }

    #[test]
    fn authority_and_query_ignored() {
        let name: Name = "ndn://host/a/b?x=1".parse().unwrap();
        assert_eq!(name, Name::from_components(["a", "b"]));
    }

    #[test]
    fn append_returns_new_name() {
        let base = Name::from_components(["a"]);
        let longer = base.append("b");
        assert_eq!(base.len(), 1);
        assert_eq!(longer.len(), 2);
        assert!(base.is_prefix_of(&longer));
        assert!(!longer.is_prefix_of(&base));
        assert_eq!(longer.prefix(1), base);
    }

    #[test]
    fn canonical_ordering() {
        let short = Component::from("zz");
        let long = Component::from("aaa");
        assert!(short < long);
        let a = Name::from_components(["a", "b"]);
        let ab = Name::from_components(["a", "b", "c"]);
        let b = Name::from_components(["b"]);
        assert!(a < ab);
        assert!(ab < b);
        assert!(Name::new() < a);
    }

    #[test]
    fn segment_zero_is_marker_only() {
        assert_eq!(Component::segment(0).as_bytes(), &[0x00]);
        assert_eq!(Component::segment(0x0102).as_bytes(), &[0x00, 0x01, 0x02]);
        assert_eq!(Component::segment(0).segment_number(), Some(0));
    }

    #[test]
    fn non_segment_component_has_no_number() {
        assert_eq!(Component::from("abc").segment_number(), None);
        assert_eq!(Component::new(vec![0x00; 10]).segment_number(), None);
        assert_eq!(Component::version(7).segment_number(), None);
    }

    #[test]
    fn version_from_clock_is_non_decreasing() {
        let name = Name::from_components(["v"]);
        let first = name.append_version(None);
        let second = name.append_version(None);
        let v1 = first.last().unwrap().version_number().unwrap();
        let v2 = second.last().unwrap().version_number().unwrap();
        assert!(v2 >= v1);
        assert!(v1 > 1_600_000_000 * VERSION_TICKS_PER_SECOND);
    }

    #[test]
    fn explicit_version() {
        let name = Name::new().append_version(Some(0x0400));
        assert_eq!(name.last().unwrap().as_bytes(), &[0xFD, 0x04, 0x00]);
    }

    #[test]
    fn key_id_and_nonce_markers() {
        let digest = [7u8; 32];
        let name = Name::new().append_key_id(&digest);
        let c = name.last().unwrap();
        assert!(c.as_bytes().starts_with(KEY_ID_MARKER));
        assert_eq!(c.key_id_digest(), Some(&digest[..]));

        let n1 = Name::new().append_nonce();
        let n2 = Name::new().append_nonce();
        assert!(n1.last().unwrap().is_nonce());
        assert_eq!(n1.last().unwrap().len(), NONCE_MARKER.len() + 8);
        assert_ne!(n1, n2);
    }

    #[test]
    fn truncated_wire_is_decode_error() {
        let name = Name::from_components(["hello", "world"]);
        let wire = name.to_wire();
        assert!(matches!(
            Name::from_wire(&wire[..wire.len() - 2]),
            Err(NameError::Decode(_))
        ));
    }

    proptest! {
        #[test]
        fn segment_number_roundtrip(n in any::<u64>()) {
            let c = Component::segment(n);
            prop_assert!(c.len() == 1 || c.as_bytes()[1] != 0);
            prop_assert_eq!(c.segment_number(), Some(n));
        }

        #[test]
        fn name_construction_paths_agree(
            parts in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..12), 0..6)
        ) {
            let direct = Name::from_components(parts.clone());
            let via_wire = Name::from_wire(direct.to_wire()).unwrap();
            let via_uri: Name = direct.to_uri().parse().unwrap();
            prop_assert_eq!(&direct, &via_wire);
            prop_assert_eq!(&direct, &via_uri);
        }
    }

    #[test]
    fn wire_with_trailing_bytes_is_rejected() {
        let name = Name::from_components(["a", "b"]);
        let mut bytes = name.to_wire().to_vec();
        bytes.extend_from_slice(b"GARBAGE");
        assert!(matches!(Name::from_wire(&bytes), Err(NameError::Decode(_))));
    }
}
