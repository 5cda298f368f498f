//! Byte-bounded chunking of line-oriented input.
//!
//! A chunk is filled line by line until the bytes read reach the budget.
//! The budget is soft: the line that crosses it is kept whole, so a chunk
//! always ends on a line boundary and never splits a record.

use std::io::BufRead;

use super::SortError;

/// An ordered slice of raw input lines, processed together in memory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Chunk {
    /// Position of this chunk in the input (0-based).
    pub index: usize,
    /// 1-based input line number of the first line.
    pub first_line: u64,
    /// Raw lines, including their line terminators. Not yet checked for
    /// UTF-8; that is part of decoding.
    pub lines: Vec<Vec<u8>>,
    /// Total bytes of all lines.
    pub bytes: u64,
}

impl Chunk {
    /// Number of lines in this chunk.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Check if this chunk holds no lines.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// Reads successive chunks from a buffered input.
///
/// The reader is the single owner of the input cursor. In parallel mode it
/// stays on the coordinating thread; workers only ever see finished chunks.
///
/// # Example
///
/// ```
/// use ctdupe::sort::ChunkReader;
///
/// let input = "aaaa\nbbbb\ncccc\n";
/// let mut reader = ChunkReader::new(input.as_bytes(), 6);
///
/// let first = reader.next_chunk().unwrap().unwrap();
/// assert_eq!(first.lines, vec![b"aaaa\n".to_vec(), b"bbbb\n".to_vec()]);
///
/// let second = reader.next_chunk().unwrap().unwrap();
/// assert_eq!(second.first_line, 3);
///
/// assert!(reader.next_chunk().unwrap().is_none());
/// ```
#[derive(Debug)]
pub struct ChunkReader<R> {
    reader: R,
    budget: u64,
    next_index: usize,
    next_line: u64,
    bytes_read: u64,
    exhausted: bool,
}

impl<R: BufRead> ChunkReader<R> {
    /// Create a chunk reader with the given per-chunk byte budget.
    ///
    /// A budget of zero is treated as one byte (one line per chunk).
    pub fn new(reader: R, budget: u64) -> Self {
        Self {
            reader,
            budget: budget.max(1),
            next_index: 0,
            next_line: 1,
            bytes_read: 0,
            exhausted: false,
        }
    }

    /// The per-chunk byte budget in effect.
    #[must_use]
    pub fn budget(&self) -> u64 {
        self.budget
    }

    /// Total bytes consumed from the input so far.
    #[must_use]
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Read the next chunk.
    ///
    /// Returns `Ok(None)` once the input is exhausted; a returned chunk is
    /// never empty.
    ///
    /// # Errors
    ///
    /// Returns [`SortError::Io`] if reading fails.
    pub fn next_chunk(&mut self) -> Result<Option<Chunk>, SortError> {
        if self.exhausted {
            return Ok(None);
        }

        let mut chunk = Chunk {
            index: self.next_index,
            first_line: self.next_line,
            ..Chunk::default()
        };

        while chunk.bytes < self.budget {
            let mut line = Vec::new();
            let n = self
                .reader
                .read_until(b'\n', &mut line)
                .map_err(|e| SortError::io("reading input", e))?;
            if n == 0 {
                self.exhausted = true;
                break;
            }
            chunk.bytes += n as u64;
            chunk.lines.push(line);
        }

        if chunk.is_empty() {
            return Ok(None);
        }

        self.next_index += 1;
        self.next_line += chunk.len() as u64;
        self.bytes_read += chunk.bytes;
        log::trace!(
            "Read chunk {} ({} lines, {} bytes)",
            chunk.index,
            chunk.len(),
            chunk.bytes
        );
        Ok(Some(chunk))
    }

    /// Read up to `count` chunks, stopping early at end of input.
    ///
    /// # Errors
    ///
    /// Returns [`SortError::Io`] if reading fails.
    pub fn next_round(&mut self, count: usize) -> Result<Vec<Chunk>, SortError> {
        let mut round = Vec::with_capacity(count);
        while round.len() < count {
            match self.next_chunk()? {
                Some(chunk) => round.push(chunk),
                None => break,
            }
        }
        Ok(round)
    }
}

impl<R: BufRead> Iterator for ChunkReader<R> {
    type Item = Result<Chunk, SortError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_chunk().transpose()
    }
}
