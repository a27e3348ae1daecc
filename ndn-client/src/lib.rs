//! Named Data Networking client: one blocking connection to the local forwarder with
//! upcall dispatch, a multi-connection event loop, exploration and publishing helpers.

use std::io;
use std::path::PathBuf;

pub mod config;
pub mod connection;
pub mod event_loop;
pub mod explore;
pub mod publish;

pub use config::ClientConfig;
pub use connection::{Connection, Handler, UpcallInfo, UpcallKind, UpcallResult};
pub use event_loop::{EventLoop, StopHandle};
pub use explore::explore;
pub use publish::{fetch_segmented, Publication};

use ndn_core::{ContentError, ExploreError, FrameDecodeError, FrameEncodeError, KeyError, Name};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("not connected")]
    NotConnected,
    #[error("already connected")]
    AlreadyConnected,
    #[error("reentrancy error: {0}")]
    Reentrancy(&'static str),
    #[error("timed out waiting for content")]
    Timeout,
    #[error("content {0} failed signature verification")]
    Verification(Name),
    #[error("frame decode error: {0}")]
    Decode(#[from] FrameDecodeError),
    #[error("frame encode error: {0}")]
    Encode(#[from] FrameEncodeError),
    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),
    #[error(transparent)]
    Content(#[from] ContentError),
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error(transparent)]
    Explore(#[from] ExploreError),
    #[error("{0} is not a segment of a segmented object")]
    NotSegmented(Name),
    #[error("cannot read key file {}: {source}", path.display())]
    KeyFile { path: PathBuf, source: io::Error },
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}
