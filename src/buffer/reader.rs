//! Owned reader cursor
//!
//! A `BufferReader` detaches itself from the ring when dropped, so a reader
//! abandoned on any exit path stops holding back the writer.

use std::sync::Arc;

use bytes::Bytes;

use super::relay::{ReaderId, RelayBuffer};
use crate::error::Result;

/// One reader's cursor into a shared `RelayBuffer`
#[derive(Debug)]
pub struct BufferReader {
    buffer: Arc<RelayBuffer>,
    id: ReaderId,
}

impl BufferReader {
    /// Attach a new reader at the buffer's current write position
    pub fn attach(buffer: Arc<RelayBuffer>) -> Result<Self> {
        let id = buffer.attach()?;
        Ok(Self { buffer, id })
    }

    /// Reader identifier within its buffer
    pub fn id(&self) -> ReaderId {
        self.id
    }

    /// Wait for the next chunk; `Ok(None)` is end of stream
    pub async fn read(&mut self) -> Result<Option<Bytes>> {
        self.buffer.read(self.id).await
    }
}

impl Drop for BufferReader {
    fn drop(&mut self) {
        self.buffer.detach(self.id);
    }
}
