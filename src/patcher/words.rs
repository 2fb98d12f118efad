//! Aligned 8-byte word iteration over a byte stream.

use std::io::{self, ErrorKind, Read, Seek, SeekFrom};

pub const WORD_SIZE: u64 = 8;

/// One aligned little-endian word and the file offset it was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Word {
    pub offset: u64,
    pub value: u64,
}

/// Iterator over consecutive, non-overlapping 8-byte words from offset 0.
///
/// A trailing run shorter than a word is not yielded. After a read error
/// the iterator yields that error once and then ends.
pub struct AlignedWords<R> {
    reader: R,
    offset: u64,
    done: bool,
}

impl<R: Read> AlignedWords<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            offset: 0,
            done: false,
        }
    }

    /// Offset of the next word to be read.
    pub fn position(&self) -> u64 {
        self.offset
    }

    pub fn into_inner(self) -> R {
        self.reader
    }

    fn fill(&mut self, buf: &mut [u8; WORD_SIZE as usize]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }
}

impl<R: Read + Seek> AlignedWords<R> {
    /// Rewinds to offset 0 so the same stream can be scanned again.
    pub fn restart(&mut self) -> io::Result<()> {
        self.reader.seek(SeekFrom::Start(0))?;
        self.offset = 0;
        self.done = false;
        Ok(())
    }
}

impl<R: Read> Iterator for AlignedWords<R> {
    type Item = io::Result<Word>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut buf = [0u8; WORD_SIZE as usize];
        match self.fill(&mut buf) {
            Ok(n) if n == buf.len() => {
                let word = Word {
                    offset: self.offset,
                    value: u64::from_le_bytes(buf),
                };
                self.offset += WORD_SIZE;
                Some(Ok(word))
            }
            Ok(_) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
