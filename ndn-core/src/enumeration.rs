//! Enumeration collections: a list of link names published under the `\xC1.E.be` marker.

use serde::{Deserialize, Serialize};

use crate::key::Key;
use crate::name::{Component, Name};
use crate::wire;

/// One entry of a collection. Links carry only a name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub name: Name,
}

/// Encoded body of an enumeration response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collection {
    pub links: Vec<Link>,
}

impl Collection {
    pub fn from_names<I: IntoIterator<Item = Name>>(names: I) -> Self {
        Self {
            links: names.into_iter().map(|name| Link { name }).collect(),
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &Name> {
        self.links.iter().map(|l| &l.name)
    }

    pub fn to_wire(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    pub fn from_wire(bytes: &[u8]) -> Result<Self, bincode::Error> {
        wire::decode_exact(bytes)
    }
}

/// Name an enumeration of `prefix` is published under: `prefix/%C1.E.be/<key id>/<version>`.
pub fn enumeration_name(prefix: &Name, key: &Key, version: Option<u64>) -> Name {
    prefix
        .append(Component::enumeration_marker())
        .append_key_id(key.public_key_id())
        .append_version(version)
}
