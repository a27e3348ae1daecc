//! Named Data Networking protocol core.
//! Host-driven: no I/O; hosts pass frames in and express the interests this crate builds.

pub mod content;
pub mod enumeration;
pub mod exclude;
pub mod explore;
pub mod interest;
pub mod key;
pub mod name;
pub mod protocol;
pub mod segment;
pub mod wire;

pub use content::{
    ContentError, ContentObject, ContentType, KeyLocator, KeyLocatorError, KeyReference,
    ResolvedKey, Signature, SignedInfo, Verification,
};
pub use enumeration::Collection;
pub use exclude::{ExcludeEntry, ExclusionFilter};
pub use explore::{Discovery, ExploreError, Frontier, Step, TaskId};
pub use interest::{ChildSelector, Interest};
pub use key::{Key, KeyError, PublicKeyId};
pub use name::{Component, Name, NameError};
pub use protocol::{Message, PROTOCOL_VERSION};
pub use segment::{Reassembler, SegmentWrapper, Segmenter, SigningWrapper};
pub use wire::{decode_frame, encode_frame, frame_len, FrameDecodeError, FrameEncodeError};
