//! Segment-and-publish: sign a payload as segments, serve them from an interest filter,
//! and fetch segmented objects back.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use ndn_core::enumeration::{enumeration_name, Collection};
use ndn_core::{
    ChildSelector, ContentError, ContentObject, Interest, Key, Name, Reassembler, Segmenter,
    SignedInfo, SigningWrapper,
};

use crate::connection::{Connection, Handler, UpcallKind, UpcallResult};
use crate::ClientError;

/// Sign `data` as segments `name/<n>` with `key`.
pub fn segment_payload(
    name: &Name,
    key: &Key,
    data: &[u8],
    chunk_size: usize,
    template: Option<SignedInfo>,
) -> Result<Vec<ContentObject>, ContentError> {
    let mut wrapper = SigningWrapper::new(name.clone(), key.clone());
    if let Some(template) = template {
        wrapper = wrapper.with_template(template);
    }
    Segmenter::new(data, chunk_size).wrap(&mut wrapper).collect()
}

/// Signed segments of one payload under a single name.
pub struct Publication {
    name: Name,
    objects: Arc<Vec<ContentObject>>,
}

impl Publication {
    pub fn new(name: Name, objects: Vec<ContentObject>) -> Self {
        Self {
            name,
            objects: Arc::new(objects),
        }
    }

    /// Segment `data` under `prefix/<version>`; `None` derives the version from the clock.
    pub fn segmented(
        prefix: &Name,
        version: Option<u64>,
        key: &Key,
        data: &[u8],
        chunk_size: usize,
    ) -> Result<Self, ContentError> {
        let name = prefix.append_version(version);
        let objects = segment_payload(&name, key, data, chunk_size, None)?;
        Ok(Self::new(name, objects))
    }

    /// Enumeration of `names`, published under `prefix/%C1.E.be/<key id>/<version>`.
    pub fn enumeration<I>(prefix: &Name, names: I, key: &Key, chunk_size: usize) -> Result<Self, ClientError>
    where
        I: IntoIterator<Item = Name>,
    {
        let name = enumeration_name(prefix, key, None);
        let body = Collection::from_names(names).to_wire()?;
        let objects = segment_payload(&name, key, &body, chunk_size, None)?;
        Ok(Self::new(name, objects))
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    pub fn objects(&self) -> &[ContentObject] {
        &self.objects
    }

    /// Answer interests under the publication name from the signed segments.
    pub fn serve(&self, conn: &Connection) -> Result<(), ClientError> {
        let objects = self.objects.clone();
        let handler = Handler::new(move |conn, kind, info| {
            if kind != UpcallKind::Interest {
                return UpcallResult::Ok;
            }
            let Some(interest) = &info.interest else {
                return UpcallResult::Ok;
            };
            let Some(co) = best_match(&objects, interest) else {
                return UpcallResult::Ok;
            };
            match conn.put(co) {
                Ok(()) => {
                    debug!(name = ?co.name(), "answered interest");
                    UpcallResult::InterestConsumed
                }
                Err(e) => {
                    warn!(error = %e, "cannot answer interest");
                    UpcallResult::Err
                }
            }
        });
        conn.set_interest_filter(&self.name, &handler, None)
    }

    pub fn withdraw(&self, conn: &Connection) -> Result<(), ClientError> {
        conn.clear_interest_filter(&self.name)
    }

    /// Send every segment unsolicited.
    pub fn push(&self, conn: &Connection) -> Result<(), ClientError> {
        for co in self.objects.iter() {
            conn.put(co)?;
        }
        Ok(())
    }
}

fn best_match<'a>(objects: &'a [ContentObject], interest: &Interest) -> Option<&'a ContentObject> {
    let mut matching = objects.iter().filter(|co| co.matches_interest(interest));
    match interest.child_selector {
        Some(ChildSelector::Rightmost) => matching.last(),
        _ => matching.next(),
    }
}

/// Fetch segments of `name` in order until the final block, and return the payload.
pub fn fetch_segmented(conn: &Connection, name: &Name, timeout: Duration) -> Result<Vec<u8>, ClientError> {
    let mut segments = Reassembler::new();
    loop {
        let wanted = segments.next_missing();
        let segment_name = name.append_segment(wanted);
        let co = conn.get(&segment_name, None, timeout)?;
        if segments.insert(&co) {
            return Ok(segments.reassemble());
        }
        if segments.next_missing() == wanted || segments.last_segment().is_none() {
            return Err(ClientError::NotSegmented(segment_name));
        }
    }
}
