//! Streaming estimation, pruning and evaluation of backoff n-gram language
//! models with a differentiable generalization of modified Kneser-Ney
//! smoothing.
//!
//! The toolkit is a chain of small stage binaries, each a pure streaming
//! transform over sorted sequences of per-history "LM-state" records (see
//! [`lm_state`]).  Records are sorted by reversed history and then by
//! predicted word, which lets every stage run in bounded memory: at any
//! moment a stage holds at most one state per history length, plus the
//! backoff prefixes of the deepest one.  Every estimation stage (count
//! weighting, discounting, interpolation, probability evaluation) has an
//! exact forward pass and a matching reverse-mode derivative stage, so the
//! smoothing hyperparameters can be tuned by gradient methods against a
//! held-out corpus's log-probability.
//!
//! Files on disk are the only medium of inter-stage sharing; all records are
//! little-endian binary (see the `write`/`read` methods of the record types).
//! Diagnostics go to stderr through `log`; each stage prints its
//! machine-readable scalars (total counts, log-probs, scale derivatives) to
//! stdout on a single whitespace-separated line.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter};
use std::path::Path;

use flate2::read::GzDecoder;

pub mod count;
pub mod derivs;
pub mod lm_state;

pub use count::Count;
pub use derivs::{FloatLmStateDerivs, GeneralLmStateDerivs};
pub use lm_state::{
    at_eof, merge_int_lm_states, FloatLmState, GeneralLmState, GeneralLmStateBuilder, IntLmState,
    NullLmState,
};

/// Beginning-of-sentence (`<s>`).  Never a predicted word.
pub const BOS_SYMBOL: i32 = 1;
/// End-of-sentence (`</s>`).  Never appears in a history.
pub const EOS_SYMBOL: i32 = 2;
/// Unknown word (`<unk>`).
pub const UNK_SYMBOL: i32 = 3;

/// Fixed discount constants for order 1.  Estimating these from data is not
/// robust to how the vocabulary was chosen, so they are pinned.
pub const UNIGRAM_D1: f32 = 0.75;
pub const UNIGRAM_D2: f32 = 0.25;
pub const UNIGRAM_D3: f32 = 0.1;
/// The fraction of the total unigram discount that goes to `<unk>`; the rest
/// is spread uniformly over the vocabulary except `<s>` and `<unk>`.
pub const UNK_PROPORTION: f32 = 0.5;

pub fn open_input(path: &Path) -> io::Result<BufReader<File>> {
    match File::open(path) {
        Ok(file) => Ok(BufReader::new(file)),
        Err(e) => Err(io::Error::new(
            e.kind(),
            format!("failed to open '{}' for reading: {}", path.display(), e),
        )),
    }
}

pub fn create_output(path: &Path) -> io::Result<BufWriter<File>> {
    match File::create(path) {
        Ok(file) => Ok(BufWriter::new(file)),
        Err(e) => Err(io::Error::new(
            e.kind(),
            format!("failed to open '{}' for writing: {}", path.display(), e),
        )),
    }
}

/// Opens a text input, decompressing transparently if the name ends in `.gz`.
pub fn open_text_input(path: &Path) -> io::Result<Box<dyn BufRead>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) => {
            return Err(io::Error::new(
                e.kind(),
                format!("failed to open '{}' for reading: {}", path.display(), e),
            ))
        }
    };
    if path.extension().map(|e| e == "gz").unwrap_or(false) {
        Ok(Box::new(BufReader::with_capacity(
            1 << 20,
            GzDecoder::new(file),
        )))
    } else {
        Ok(Box::new(BufReader::with_capacity(1 << 20, file)))
    }
}

/// True if `prefix` is a prefix of `of` (in the reversed-history encoding, a
/// backoff history is a prefix of every history that extends it).
pub fn is_prefix_of(prefix: &[i32], of: &[i32]) -> bool {
    prefix.len() <= of.len() && prefix == &of[..prefix.len()]
}

/// Maps (word, history-length) to the position of the word in the counts
/// vector of the currently loaded state of that history length.  This is the
/// one structure sized to the vocabulary rather than to the history window;
/// entries for words absent from the current state are stale and must be
/// verified against the counts vector before use.
pub struct WordPositionMap {
    stride: usize,
    data: Vec<usize>,
}

impl WordPositionMap {
    pub fn new(num_words: i32, stride: usize) -> WordPositionMap {
        WordPositionMap {
            stride,
            data: vec![0; (num_words as usize + 1) * stride],
        }
    }

    pub fn populate<I: IntoIterator<Item = i32>>(&mut self, hist_length: usize, words: I) {
        assert!(hist_length < self.stride);
        for (pos, word) in words.into_iter().enumerate() {
            let index = word as usize * self.stride + hist_length;
            assert!(index < self.data.len(), "word {} out of range", word);
            self.data[index] = pos;
        }
    }

    pub fn get(&self, word: i32, hist_length: usize) -> usize {
        self.data[word as usize * self.stride + hist_length]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_includes_empty_and_self() {
        assert!(is_prefix_of(&[], &[13, 12]));
        assert!(is_prefix_of(&[13], &[13, 12]));
        assert!(is_prefix_of(&[13, 12], &[13, 12]));
        assert!(!is_prefix_of(&[12], &[13, 12]));
        assert!(!is_prefix_of(&[13, 12, 11], &[13, 12]));
    }

    #[test]
    fn word_position_map_round_trips() {
        let mut map = WordPositionMap::new(20, 2);
        map.populate(1, vec![2, 11, 14]);
        assert_eq!(map.get(2, 1), 0);
        assert_eq!(map.get(11, 1), 1);
        assert_eq!(map.get(14, 1), 2);
    }
}
