//! Disk-backed triple queue and size-bounded batching
//!
//! The harvest appends N-Triples lines to a temporary file as records are
//! extracted. Once harvesting is done the file is read back sequentially and
//! cut into batches whose byte length stays within the configured budget.
//! Lines are never split; a single line larger than the budget travels
//! alone.
//!
//! The spool file lives in the configured directory and is removed when the
//! queue (or the drain reading it) is dropped, whatever the job outcome.

use crate::rdf::TripleLine;
use std::io::{self, BufRead, BufReader, BufWriter, Seek, SeekFrom, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::debug;

/// Prefix of spool file names
const SPOOL_PREFIX: &str = "dha-spool-";

/// Append-only queue of N-Triples lines backed by a temporary file
#[derive(Debug)]
pub struct SpoolQueue {
    writer: BufWriter<NamedTempFile>,
    total_len: u64,
    lines: u64,
}

impl SpoolQueue {
    /// Create an empty spool file inside `dir`
    pub fn create_in(dir: impl AsRef<Path>) -> io::Result<Self> {
        let file = tempfile::Builder::new()
            .prefix(SPOOL_PREFIX)
            .suffix(".nt")
            .tempfile_in(dir)?;
        debug!(path = %file.path().display(), "Created spool file");
        Ok(Self {
            writer: BufWriter::new(file),
            total_len: 0,
            lines: 0,
        })
    }

    pub fn path(&self) -> &Path {
        self.writer.get_ref().path()
    }

    /// Append the triples of one record
    pub fn append(&mut self, triples: &[TripleLine]) -> io::Result<()> {
        for line in triples {
            self.writer.write_all(line.as_str().as_bytes())?;
            self.total_len += line.len() as u64;
            self.lines += 1;
        }
        Ok(())
    }

    /// Bytes written so far
    pub fn total_len(&self) -> u64 {
        self.total_len
    }

    pub fn line_count(&self) -> u64 {
        self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines == 0
    }

    /// Switch to reading: flush, rewind and iterate batches of at most
    /// `budget` bytes
    pub fn drain(self, budget: u64) -> io::Result<SpoolDrain> {
        let mut file = self.writer.into_inner().map_err(|e| e.into_error())?;
        file.seek(SeekFrom::Start(0))?;

        Ok(SpoolDrain {
            reader: BufReader::new(file),
            batcher: Batcher::new(budget),
            total_len: self.total_len,
            buf: Vec::new(),
            done: false,
        })
    }
}

/// Sequential reader over a spool file yielding [`SyncBatch`]es
#[derive(Debug)]
pub struct SpoolDrain {
    // The file is deleted when the reader is dropped
    reader: BufReader<NamedTempFile>,
    batcher: Batcher,
    total_len: u64,
    buf: Vec<u8>,
    done: bool,
}

impl SpoolDrain {
    /// Total bytes in the spool
    pub fn total_len(&self) -> u64 {
        self.total_len
    }
}

impl Iterator for SpoolDrain {
    type Item = io::Result<SyncBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            self.buf.clear();
            match self.reader.read_until(b'\n', &mut self.buf) {
                Ok(0) => {
                    self.done = true;
                    return self.batcher.finish().map(Ok);
                }
                Ok(_) => {
                    let line = match String::from_utf8(std::mem::take(&mut self.buf)) {
                        Ok(line) => line,
                        Err(e) => {
                            self.done = true;
                            return Some(Err(io::Error::new(io::ErrorKind::InvalidData, e)));
                        }
                    };
                    if let Some(batch) = self.batcher.push(line) {
                        return Some(Ok(batch));
                    }
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

/// A contiguous run of complete N-Triples lines
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncBatch {
    text: String,
    lines: usize,
}

impl SyncBatch {
    /// Byte length of the payload
    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn line_count(&self) -> usize {
        self.lines
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }
}

/// Greedy line packer
///
/// Accumulates lines until the next one would exceed the budget, then hands
/// out the accumulated batch. Never produces an empty batch.
#[derive(Debug)]
pub struct Batcher {
    budget: u64,
    current: String,
    lines: usize,
}

impl Batcher {
    pub fn new(budget: u64) -> Self {
        Self {
            budget,
            current: String::new(),
            lines: 0,
        }
    }

    /// Add a line; returns the previous batch when this line does not fit
    pub fn push(&mut self, line: String) -> Option<SyncBatch> {
        let fits = (self.current.len() + line.len()) as u64 <= self.budget;
        let full = if self.lines > 0 && !fits {
            self.take()
        } else {
            None
        };
        self.current.push_str(&line);
        self.lines += 1;
        full
    }

    /// Hand out whatever is left
    pub fn finish(&mut self) -> Option<SyncBatch> {
        if self.lines == 0 {
            None
        } else {
            self.take()
        }
    }

    fn take(&mut self) -> Option<SyncBatch> {
        let text = std::mem::take(&mut self.current);
        let lines = std::mem::replace(&mut self.lines, 0);
        Some(SyncBatch { text, lines })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use oxrdf::{Literal, NamedNode, Triple};
    use proptest::prelude::*;

    fn triple(n: usize, pad: usize) -> TripleLine {
        TripleLine::from_triple(&Triple::new(
            NamedNode::new_unchecked(format!("http://ex.org/s{}", n)),
            NamedNode::new_unchecked("http://ex.org/p"),
            Literal::new_simple_literal("x".repeat(pad)),
        ))
    }

    fn line(n: usize, pad: usize) -> String {
        triple(n, pad).into_string()
    }

    fn pack(lines: &[String], budget: u64) -> Vec<SyncBatch> {
        let mut batcher = Batcher::new(budget);
        let mut out: Vec<_> = lines
            .iter()
            .filter_map(|l| batcher.push(l.clone()))
            .collect();
        out.extend(batcher.finish());
        out
    }

    #[test]
    fn test_batcher_respects_budget() {
        let lines: Vec<_> = (0..10).map(|i| line(i, 10)).collect();
        let each = lines[0].len() as u64;
        let batches = pack(&lines, each * 3);
        assert_eq!(batches.len(), 4);
        assert_eq!(batches[0].line_count(), 3);
        assert_eq!(batches[3].line_count(), 1);
    }

    #[test]
    fn test_batcher_oversized_line_alone() {
        let lines = vec![line(0, 1), line(1, 500), line(2, 1)];
        let batches = pack(&lines, 100);
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[1].as_str(), lines[1]);
    }

    #[test]
    fn test_batcher_empty() {
        assert!(pack(&[], 100).is_empty());
    }

    #[test]
    fn test_spool_roundtrip_and_batch_sizes() {
        let dir = tempfile::tempdir().unwrap();
        let mut spool = SpoolQueue::create_in(dir.path()).unwrap();
        let triples: Vec<_> = (0..50).map(|i| triple(i, i)).collect();
        let lines: Vec<_> = triples.iter().map(|t| t.as_str().to_string()).collect();
        spool.append(&triples[..20]).unwrap();
        spool.append(&triples[20..]).unwrap();
        assert_eq!(spool.line_count(), 50);

        let total = spool.total_len();
        let batches: Vec<_> = spool
            .drain(512)
            .unwrap()
            .collect::<io::Result<_>>()
            .unwrap();
        let sum: u64 = batches.iter().map(|b| b.len() as u64).sum();
        assert_eq!(sum, total);

        let joined: String = batches.iter().map(|b| b.as_str()).collect();
        assert_eq!(joined, lines.concat());
    }

    #[test]
    fn test_spool_file_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let spool = SpoolQueue::create_in(dir.path()).unwrap();
        let path = spool.path().to_path_buf();
        assert!(path.exists());
        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with(SPOOL_PREFIX));

        let drain = spool.drain(100).unwrap();
        assert!(path.exists());
        drop(drain);
        assert!(!path.exists());
    }

    #[test]
    fn test_empty_spool_yields_no_batches() {
        let dir = tempfile::tempdir().unwrap();
        let spool = SpoolQueue::create_in(dir.path()).unwrap();
        assert!(spool.is_empty());
        assert_eq!(spool.drain(100).unwrap().count(), 0);
    }

    proptest! {
        #[test]
        fn prop_batches_partition_input_greedily(
            pads in proptest::collection::vec(0usize..200, 0..60),
            budget in 1u64..2048,
        ) {
            let lines: Vec<_> = pads.iter().enumerate().map(|(i, p)| line(i, *p)).collect();
            let batches = pack(&lines, budget);

            let joined: String = batches.iter().map(|b| b.as_str()).collect();
            prop_assert_eq!(joined, lines.concat());
            prop_assert_eq!(
                batches.iter().map(|b| b.line_count()).sum::<usize>(),
                lines.len()
            );
            for batch in &batches {
                prop_assert!(batch.line_count() > 0);
                prop_assert!(batch.len() as u64 <= budget || batch.line_count() == 1);
            }
            // Greedy: no batch could have taken the next line
            for pair in batches.windows(2) {
                let next_line = pair[1].as_str().split_inclusive('\n').next().unwrap();
                prop_assert!(pair[0].len() as u64 + next_line.len() as u64 > budget);
            }
        }
    }
}
