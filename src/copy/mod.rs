//! Copy Module
//!
//! Brings a new or lagging replica up to date by streaming one generation.
//!
//! ## Persisted Protocol
//! ```text
//! Version → MetadataTable
//!   → { StartKeyFile → WriteKeyFile* → EndKeyFile
//!       → StartValueFile → WriteValueFile* → EndValueFile }   per file
//!   → Complete
//! ```
//!
//! ## Volatile Protocol
//! ```text
//! Version → Metadata → Data* → Complete
//! ```
//!
//! A receiver promotes nothing until `Complete`. A stream that stops early is
//! discarded and the receiver keeps its previous generation.

mod codec;
mod operation;
mod receiver;
mod sender;
mod transport;
mod volatile;

pub use codec::{read_frame, write_frame, CopyFrame, FRAME_HEADER_SIZE, MAX_FRAME_PAYLOAD};
pub use operation::{
    StoreCopyOperation, VolatileStoreCopyOperation, VolatileStoreCopyOptionalFlags,
    COPY_PROTOCOL_VERSION, VOLATILE_SERIALIZATION_VERSION,
};
pub use receiver::{CopiedFile, CopiedState, CopySession, CopySessionState};
pub use sender::StoreCopyStream;
pub use transport::{ChannelTransport, CopyTransport, StreamTransport};
pub use volatile::{
    VolatileCopySession, VolatileCopySessionState, VolatileCopyStream, VolatileRecord,
};

use crate::error::Result;

/// Outgoing copy of either store flavour
pub enum CopyStream {
    Persisted(StoreCopyStream),
    Volatile(VolatileCopyStream),
}

impl CopyStream {
    pub fn next_frame(&mut self) -> Result<Option<CopyFrame>> {
        match self {
            CopyStream::Persisted(stream) => stream.next_frame(),
            CopyStream::Volatile(stream) => stream.next_frame(),
        }
    }
}

impl Iterator for CopyStream {
    type Item = Result<CopyFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_frame().transpose()
    }
}
