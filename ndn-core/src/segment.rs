//! Segmenter: split a payload into fixed-size chunks, wrap each as a named, signed content object,
//! and reassemble received segments.

use std::collections::BTreeMap;

use crate::content::{ContentError, ContentObject, KeyLocator, SignedInfo};
use crate::key::Key;
use crate::name::{version_now, Component, Name};

/// Default chunk size in bytes.
pub const DEFAULT_SEGMENT_SIZE: usize = 4096;

/// Number of chunks for a payload of `len` bytes: ceil(len / chunk_size).
pub fn segment_count(len: usize, chunk_size: usize) -> u64 {
    let size = effective_size(chunk_size);
    len.div_ceil(size) as u64
}

fn effective_size(chunk_size: usize) -> usize {
    if chunk_size == 0 {
        DEFAULT_SEGMENT_SIZE
    } else {
        chunk_size
    }
}

/// Turns one chunk into a content object. Called with the zero-based segment index and
/// the total segment count.
pub trait SegmentWrapper {
    type Error;

    fn wrap(
        &mut self,
        chunk: &[u8],
        segment: u64,
        segments: u64,
    ) -> Result<ContentObject, Self::Error>;
}

/// Lazy view over a payload. Every call to [`Segmenter::chunks`] or [`Segmenter::wrap`]
/// starts again from the first chunk.
#[derive(Debug, Clone, Copy)]
pub struct Segmenter<'a> {
    data: &'a [u8],
    chunk_size: usize,
}

impl<'a> Segmenter<'a> {
    /// `chunk_size` 0 selects [`DEFAULT_SEGMENT_SIZE`].
    pub fn new(data: &'a [u8], chunk_size: usize) -> Self {
        Self {
            data,
            chunk_size: effective_size(chunk_size),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn segments(&self) -> u64 {
        segment_count(self.data.len(), self.chunk_size)
    }

    pub fn chunks(&self) -> std::slice::Chunks<'a, u8> {
        self.data.chunks(self.chunk_size)
    }

    pub fn wrap<'w, W: SegmentWrapper>(&self, wrapper: &'w mut W) -> Wrapped<'a, 'w, W> {
        Wrapped {
            chunks: self.chunks(),
            next: 0,
            segments: self.segments(),
            wrapper,
        }
    }
}

impl<'a> IntoIterator for &Segmenter<'a> {
    type Item = &'a [u8];
    type IntoIter = std::slice::Chunks<'a, u8>;

    fn into_iter(self) -> Self::IntoIter {
        self.chunks()
    }
}

/// Iterator of wrapped segments, see [`Segmenter::wrap`].
pub struct Wrapped<'a, 'w, W> {
    chunks: std::slice::Chunks<'a, u8>,
    next: u64,
    segments: u64,
    wrapper: &'w mut W,
}

impl<W: SegmentWrapper> Iterator for Wrapped<'_, '_, W> {
    type Item = Result<ContentObject, W::Error>;

    fn next(&mut self) -> Option<Self::Item> {
        let chunk = self.chunks.next()?;
        let segment = self.next;
        self.next += 1;
        Some(self.wrapper.wrap(chunk, segment, self.segments))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.chunks.size_hint()
    }
}

/// Signs each chunk as `name/<segment>` with `key`. The key is embedded in the key locator
/// unless the signed-info template already names one.
pub struct SigningWrapper {
    name: Name,
    key: Key,
    template: SignedInfo,
}

impl SigningWrapper {
    pub fn new(name: Name, key: Key) -> Self {
        Self {
            name,
            key,
            template: SignedInfo::default(),
        }
    }

    /// Content type, freshness and locator taken from `template` for every segment.
    pub fn with_template(mut self, template: SignedInfo) -> Self {
        self.template = template;
        self
    }

    pub fn name(&self) -> &Name {
        &self.name
    }
}

impl SegmentWrapper for SigningWrapper {
    type Error = ContentError;

    fn wrap(
        &mut self,
        chunk: &[u8],
        segment: u64,
        segments: u64,
    ) -> Result<ContentObject, ContentError> {
        let mut signed_info = self.template.clone();
        signed_info.publisher_key_digest = Some(*self.key.public_key_id());
        signed_info
            .key_locator
            .get_or_insert_with(|| KeyLocator::from_key(&self.key));
        signed_info.timestamp.get_or_insert_with(version_now);
        signed_info.final_block_id = Some(Component::segment(segments.saturating_sub(1)));
        let mut co = ContentObject::new(self.name.append_segment(segment), signed_info, chunk);
        co.sign(&self.key)?;
        Ok(co)
    }
}

/// Collects segments of one object in any order until the final block is known and present.
#[derive(Debug, Default)]
pub struct Reassembler {
    received: BTreeMap<u64, Vec<u8>>,
    last: Option<u64>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a segment. Returns true if the object is now complete.
    /// Objects whose last name component is not a segment are ignored.
    pub fn insert(&mut self, co: &ContentObject) -> bool {
        let Some(segment) = co
            .name()
            .and_then(Name::last)
            .and_then(Component::segment_number)
        else {
            return self.is_complete();
        };
        if let Some(last) = co
            .signed_info()
            .and_then(|si| si.final_block_id.as_ref())
            .and_then(Component::segment_number)
        {
            self.last = Some(last);
        }
        self.received.insert(segment, co.content().to_vec());
        self.is_complete()
    }

    /// Final segment number, once any segment announced it.
    pub fn last_segment(&self) -> Option<u64> {
        self.last
    }

    /// Lowest segment number not yet received.
    pub fn next_missing(&self) -> u64 {
        let mut n = 0;
        while self.received.contains_key(&n) {
            n += 1;
        }
        n
    }

    pub fn is_complete(&self) -> bool {
        match self.last {
            Some(last) => (0..=last).all(|n| self.received.contains_key(&n)),
            None => false,
        }
    }

    /// Concatenate segments in order. Call only when `is_complete()`.
    pub fn reassemble(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for payload in self.received.values() {
            out.extend_from_slice(payload);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::Verification;
    use crate::key::KEY_BITS;

    #[test]
    fn chunk_count_and_lengths() {
        let data = vec![7u8; 10_000];
        let s = Segmenter::new(&data, 4096);
        assert_eq!(s.segments(), 3);
        let lens: Vec<usize> = s.chunks().map(<[u8]>::len).collect();
        assert_eq!(lens, vec![4096, 4096, 10_000 - 2 * 4096]);
    }

    #[test]
    fn exact_multiple_and_empty() {
        assert_eq!(segment_count(8192, 4096), 2);
        assert_eq!(segment_count(0, 4096), 0);
        assert_eq!(Segmenter::new(&[], 10).chunks().count(), 0);
        assert_eq!(segment_count(1, 0), 1);
        assert_eq!(Segmenter::new(&[1, 2], 0).chunk_size(), DEFAULT_SEGMENT_SIZE);
    }

    #[test]
    fn restartable() {
        let data = b"abcdefgh";
        let s = Segmenter::new(data, 3);
        let first: Vec<&[u8]> = s.chunks().collect();
        let second: Vec<&[u8]> = (&s).into_iter().collect();
        assert_eq!(first, second);
        assert_eq!(first, vec![&b"abc"[..], &b"def"[..], &b"gh"[..]]);
    }

    #[test]
    fn signing_wrapper_names_and_final_block() {
        let key = Key::generate(KEY_BITS).unwrap();
        let base: Name = "/files/readme".parse().unwrap();
        let base = base.append_version(Some(42));
        let mut wrapper = SigningWrapper::new(base.clone(), key.clone());
        let data = vec![1u8; 2500];
        let s = Segmenter::new(&data, 1000);
        let objects: Vec<ContentObject> = s.wrap(&mut wrapper).collect::<Result<_, _>>().unwrap();
        assert_eq!(objects.len(), 3);
        for (i, co) in objects.iter().enumerate() {
            assert_eq!(co.name().unwrap(), &base.append_segment(i as u64));
            let si = co.signed_info().unwrap();
            assert_eq!(
                si.final_block_id.as_ref().and_then(Component::segment_number),
                Some(2)
            );
            assert_eq!(si.publisher_key_digest.as_ref(), Some(key.public_key_id()));
            assert_eq!(co.verify(None), Verification::Valid);
        }
        assert_eq!(objects[2].content().len(), 500);
    }

    #[test]
    fn reassemble_out_of_order() {
        let key = Key::generate(KEY_BITS).unwrap();
        let mut wrapper = SigningWrapper::new("/x".parse().unwrap(), key);
        let data: Vec<u8> = (0..=255u8).cycle().take(700).collect();
        let objects: Vec<ContentObject> = Segmenter::new(&data, 256)
            .wrap(&mut wrapper)
            .collect::<Result<_, _>>()
            .unwrap();

        let mut r = Reassembler::new();
        assert!(!r.insert(&objects[2]));
        assert_eq!(r.last_segment(), Some(2));
        assert_eq!(r.next_missing(), 0);
        assert!(!r.insert(&objects[0]));
        assert_eq!(r.next_missing(), 1);
        assert!(r.insert(&objects[1]));
        assert_eq!(r.reassemble(), data);
    }
}
