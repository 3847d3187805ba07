pub mod reader;
pub mod writer;

pub use reader::ReaderError;
pub use writer::WriterError;

use std::collections::HashMap;

#[cfg_attr(feature = "fuzzing", derive(arbitrary::Arbitrary))]
#[derive(Debug, Clone)]
pub struct BytePacketBuffer {
    pub buf: [u8; 512],
    pub pos: usize,
    #[cfg_attr(feature = "fuzzing", arbitrary(default))]
    reading_labels: HashMap<usize, String>,
    #[cfg_attr(feature = "fuzzing", arbitrary(default))]
    writing_labels: HashMap<String, usize>,
}

impl Default for BytePacketBuffer {
    /// This gives us a fresh buffer for holding the packet contents, and a
    /// field for keeping track of where we are.
    fn default() -> Self {
        BytePacketBuffer {
            buf: [0; 512],
            pos: 0,
            reading_labels: HashMap::new(),
            writing_labels: HashMap::new(),
        }
    }
}

impl BytePacketBuffer {
    /// Wraps an already-filled 512 byte buffer, as handed back by a raw
    /// socket read, with the cursor at the start.
    pub fn new(buf: [u8; 512]) -> Self {
        Self {
            buf,
            pos: 0,
            reading_labels: HashMap::new(),
            writing_labels: HashMap::new(),
        }
    }

    /// Current position within buffer
    pub fn pos(&self) -> usize {
        self.pos
    }
}

impl From<Vec<u8>> for BytePacketBuffer {
    /// Copies up to 512 bytes of an unpacked wire message into a fresh
    /// buffer, as read back from the cache/log backend.
    fn from(bytes: Vec<u8>) -> Self {
        let mut buffer = Self::default();
        let len = bytes.len().min(buffer.buf.len());
        buffer.buf[..len].copy_from_slice(&bytes[..len]);
        buffer
    }
}
