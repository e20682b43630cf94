use object_store::{PutPayload, PutPayloadMut};
use std::io::Write;

/// Block size for the encoded payload. Matches the multipart part size so
/// large artifacts upload without re-chunking.
const BLOCK_BYTES: usize = 8 * 1024 * 1024;

/// `Write` adapter that accumulates Parquet output into a chunked payload.
pub(super) struct PayloadSink {
    inner: PutPayloadMut,
}

impl PayloadSink {
    pub(super) fn new() -> Self {
        Self {
            inner: PutPayloadMut::new().with_block_size(BLOCK_BYTES),
        }
    }

    pub(super) fn freeze(self) -> PutPayload {
        self.inner.freeze()
    }
}

impl Write for PayloadSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.inner.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
