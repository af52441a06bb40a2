use std::io::{self, BufRead, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use fxhash::FxHashMap;

use crate::count::Count;
use crate::{BOS_SYMBOL, EOS_SYMBOL};

// History sizes above this are treated as evidence of reading the wrong file
// type rather than a genuinely deep model.
const MAX_PLAUSIBLE_HISTORY: i32 = 10000;

pub(crate) fn invalid_data(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

/// True once the reader is exhausted.  Record readers assume they are not at
/// EOF, so every streaming loop peeks with this first.
pub fn at_eof<R: BufRead>(reader: &mut R) -> io::Result<bool> {
    Ok(reader.fill_buf()?.is_empty())
}

/// Raw per-history counts for a single data source, prior to any weighting,
/// smoothing or interpolation.
///
/// The history is reversed: a count of "a b c" has `c` as the predicted word
/// and `[b, a]` as the history.  Lexicographic order of reversed histories is
/// the sort order the whole pipeline relies on.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IntLmState {
    pub history: Vec<i32>,
    /// Pairs of (predicted-word, count), sorted on the word.  The sorting is
    /// established by the external `sort` in the pipeline, not here.
    pub counts: Vec<(i32, i32)>,
    /// Count mass discounted into this state from a higher-order state by
    /// min-count enforcement; zero in freshly observed data.
    pub discount: i32,
}

impl IntLmState {
    pub fn init(&mut self, history: &[i32]) {
        self.history.clear();
        self.history.extend_from_slice(history);
        self.counts.clear();
        self.discount = 0;
    }

    /// Appends a count; callers are expected to add words in increasing
    /// order without repeats (the upstream `sort | uniq -c` guarantees it).
    pub fn add_count(&mut self, word: i32, count: i32) {
        self.counts.push((word, count));
    }

    pub fn write<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        assert!(!self.counts.is_empty());
        if self.discount != 0 {
            assert!(self.discount > 0);
            // The negated discount doubles as a marker: a non-negative first
            // field is the history size of a record with zero discount.
            writer.write_i32::<LittleEndian>(-self.discount)?;
        }
        writer.write_i32::<LittleEndian>(self.history.len() as i32)?;
        writer.write_i32::<LittleEndian>(self.counts.len() as i32)?;
        for &h in &self.history {
            writer.write_i32::<LittleEndian>(h)?;
        }
        for &(word, count) in &self.counts {
            writer.write_i32::<LittleEndian>(word)?;
            writer.write_i32::<LittleEndian>(count)?;
        }
        Ok(())
    }

    pub fn read<R: Read>(reader: &mut R) -> io::Result<IntLmState> {
        let first = reader.read_i32::<LittleEndian>()?;
        let (discount, history_size) = if first < 0 {
            (-first, reader.read_i32::<LittleEndian>()?)
        } else {
            (0, first)
        };
        let num_counts = reader.read_i32::<LittleEndian>()?;
        if history_size < 0 || history_size > MAX_PLAUSIBLE_HISTORY || num_counts <= 0 {
            return Err(invalid_data(format!(
                "implausible int-counts header (history size {}, {} counts): wrong input?",
                history_size, num_counts
            )));
        }
        let mut history = Vec::with_capacity(history_size as usize);
        for _ in 0..history_size {
            history.push(reader.read_i32::<LittleEndian>()?);
        }
        let mut counts = Vec::with_capacity(num_counts as usize);
        for _ in 0..num_counts {
            let word = reader.read_i32::<LittleEndian>()?;
            let count = reader.read_i32::<LittleEndian>()?;
            counts.push((word, count));
        }
        Ok(IntLmState {
            history,
            counts,
            discount,
        })
    }

    pub fn check(&self) {
        assert!(self.discount >= 0);
        for &h in &self.history {
            assert!(h > 0 && h != EOS_SYMBOL);
        }
        assert!(!self.counts.is_empty());
        for (i, &(word, count)) in self.counts.iter().enumerate() {
            assert!(word > 0 && word != BOS_SYMBOL);
            assert!(count > 0);
            if i + 1 < self.counts.len() {
                assert!(word < self.counts[i + 1].0);
            }
        }
    }

    /// Human-readable form, for the inspection tools only.
    pub fn print<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        write!(writer, " [ ")?;
        for &h in &self.history {
            write!(writer, "{} ", h)?;
        }
        write!(writer, "]: ")?;
        if self.discount != 0 {
            write!(writer, "discount={} ", self.discount)?;
        }
        for &(word, count) in &self.counts {
            write!(writer, "{}->{} ", word, count)?;
        }
        writeln!(writer)
    }
}

/// Discounted per-history counts: float counts per word, the state total, and
/// the mass removed by discounting (which determines the backoff weight).
/// Invariant: `total` equals `discount` plus the sum of the counts, up to
/// 1e-4 relative roundoff.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FloatLmState {
    pub history: Vec<i32>,
    pub total: f32,
    pub discount: f32,
    pub counts: Vec<(i32, f32)>,
}

impl FloatLmState {
    pub fn write<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        assert!(!self.counts.is_empty());
        writer.write_i32::<LittleEndian>(self.history.len() as i32)?;
        writer.write_i32::<LittleEndian>(self.counts.len() as i32)?;
        writer.write_f32::<LittleEndian>(self.total)?;
        writer.write_f32::<LittleEndian>(self.discount)?;
        for &h in &self.history {
            writer.write_i32::<LittleEndian>(h)?;
        }
        for &(word, count) in &self.counts {
            writer.write_i32::<LittleEndian>(word)?;
            writer.write_f32::<LittleEndian>(count)?;
        }
        Ok(())
    }

    pub fn read<R: Read>(reader: &mut R) -> io::Result<FloatLmState> {
        let history_size = reader.read_i32::<LittleEndian>()?;
        let num_counts = reader.read_i32::<LittleEndian>()?;
        if history_size < 0 || history_size > MAX_PLAUSIBLE_HISTORY || num_counts <= 0 {
            return Err(invalid_data(format!(
                "implausible float-counts header (history size {}, {} counts): wrong input?",
                history_size, num_counts
            )));
        }
        let total = reader.read_f32::<LittleEndian>()?;
        let discount = reader.read_f32::<LittleEndian>()?;
        let mut history = Vec::with_capacity(history_size as usize);
        for _ in 0..history_size {
            history.push(reader.read_i32::<LittleEndian>()?);
        }
        let mut counts = Vec::with_capacity(num_counts as usize);
        for _ in 0..num_counts {
            let word = reader.read_i32::<LittleEndian>()?;
            let count = reader.read_f32::<LittleEndian>()?;
            counts.push((word, count));
        }
        Ok(FloatLmState {
            history,
            total,
            discount,
            counts,
        })
    }

    pub fn check(&self) {
        for &h in &self.history {
            assert!(h > 0 && h != EOS_SYMBOL);
        }
        assert!(!self.counts.is_empty());
        for (i, &(word, _)) in self.counts.iter().enumerate() {
            assert!(word > 0 && word != BOS_SYMBOL);
            if i + 1 < self.counts.len() {
                assert!(word < self.counts[i + 1].0);
            }
        }
        assert!(self.discount >= 0.0);
        let mut my_total = self.discount as f64;
        for &(_, count) in &self.counts {
            my_total += count as f64;
        }
        if (self.total as f64 - my_total).abs() > 1.0e-4 * my_total.abs() {
            log::warn!("in float-counts, total {} != {}", self.total, my_total);
        }
    }

    /// Sets `total` from the discount plus the counts; `total` is a derived
    /// quantity and this restores it after the counts have been edited.
    pub fn compute_total(&mut self) {
        let mut total = self.discount as f64;
        for &(_, count) in &self.counts {
            total += count as f64;
        }
        self.total = total as f32;
    }

    pub fn print<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        write!(writer, " [ ")?;
        for &h in &self.history {
            write!(writer, "{} ", h)?;
        }
        write!(
            writer,
            "]: total={} discount={} ",
            self.total, self.discount
        )?;
        for &(word, count) in &self.counts {
            write!(writer, "{}->{} ", word, count)?;
        }
        writeln!(writer)
    }
}

/// The general case of per-history counts, after weighting, smoothing or
/// interpolation may have made the individual pieces unequal: each word's
/// count is a [`Count`] tracking the total and the three largest pieces.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeneralLmState {
    pub history: Vec<i32>,
    pub discount: f32,
    pub counts: Vec<(i32, Count)>,
}

impl GeneralLmState {
    pub fn write<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        assert!(!self.counts.is_empty());
        writer.write_f32::<LittleEndian>(self.discount)?;
        writer.write_i32::<LittleEndian>(self.history.len() as i32)?;
        writer.write_i32::<LittleEndian>(self.counts.len() as i32)?;
        for &h in &self.history {
            writer.write_i32::<LittleEndian>(h)?;
        }
        for &(word, ref count) in &self.counts {
            writer.write_i32::<LittleEndian>(word)?;
            count.write(writer)?;
        }
        Ok(())
    }

    pub fn read<R: Read>(reader: &mut R) -> io::Result<GeneralLmState> {
        let discount = reader.read_f32::<LittleEndian>()?;
        if !(discount >= 0.0) {
            return Err(invalid_data(format!(
                "bad discount {} reading general counts: wrong input?",
                discount
            )));
        }
        let history_size = reader.read_i32::<LittleEndian>()?;
        let num_counts = reader.read_i32::<LittleEndian>()?;
        if history_size < 0 || history_size > MAX_PLAUSIBLE_HISTORY || num_counts <= 0 {
            return Err(invalid_data(format!(
                "implausible general-counts header (history size {}, {} counts): wrong input?",
                history_size, num_counts
            )));
        }
        let mut history = Vec::with_capacity(history_size as usize);
        for _ in 0..history_size {
            history.push(reader.read_i32::<LittleEndian>()?);
        }
        let mut counts = Vec::with_capacity(num_counts as usize);
        for _ in 0..num_counts {
            let word = reader.read_i32::<LittleEndian>()?;
            let count = Count::read(reader)?;
            counts.push((word, count));
        }
        Ok(GeneralLmState {
            history,
            discount,
            counts,
        })
    }

    // Note: no checking of the count values themselves, since this is also
    // used on records holding derivatives, which wouldn't pass the normal
    // positivity checks.
    pub fn check(&self) {
        assert!(self.discount >= 0.0);
        for &h in &self.history {
            assert!(h > 0 && h != EOS_SYMBOL);
        }
        assert!(!self.counts.is_empty());
        for (i, &(word, _)) in self.counts.iter().enumerate() {
            assert!(word > 0 && word != BOS_SYMBOL);
            if i + 1 < self.counts.len() {
                assert!(word < self.counts[i + 1].0);
            }
        }
    }

    pub fn print<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        write!(writer, " [ ")?;
        for &h in &self.history {
            write!(writer, "{} ", h)?;
        }
        write!(writer, "]: ")?;
        if self.discount != 0.0 {
            write!(writer, "discount={} ", self.discount)?;
        }
        for &(word, ref count) in &self.counts {
            write!(writer, "{}->{} ", word, count)?;
        }
        writeln!(writer)
    }
}

/// Records that word sequences exist as history-states somewhere in a model:
/// a reversed history plus the sorted set of words that extend it.  Used by
/// pruning to mark protected n-grams.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NullLmState {
    pub history: Vec<i32>,
    pub predicted: Vec<i32>,
}

impl NullLmState {
    pub fn write<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        assert!(!self.predicted.is_empty());
        writer.write_i32::<LittleEndian>(self.history.len() as i32)?;
        writer.write_i32::<LittleEndian>(self.predicted.len() as i32)?;
        for &h in &self.history {
            writer.write_i32::<LittleEndian>(h)?;
        }
        for &p in &self.predicted {
            writer.write_i32::<LittleEndian>(p)?;
        }
        Ok(())
    }

    pub fn read<R: Read>(reader: &mut R) -> io::Result<NullLmState> {
        let history_size = reader.read_i32::<LittleEndian>()?;
        let num_predicted = reader.read_i32::<LittleEndian>()?;
        if history_size < 0 || history_size > MAX_PLAUSIBLE_HISTORY || num_predicted <= 0 {
            return Err(invalid_data(format!(
                "implausible null-counts header (history size {}, {} predicted): wrong input?",
                history_size, num_predicted
            )));
        }
        let mut history = Vec::with_capacity(history_size as usize);
        for _ in 0..history_size {
            history.push(reader.read_i32::<LittleEndian>()?);
        }
        let mut predicted = Vec::with_capacity(num_predicted as usize);
        for _ in 0..num_predicted {
            predicted.push(reader.read_i32::<LittleEndian>()?);
        }
        Ok(NullLmState { history, predicted })
    }

    pub fn check(&self) {
        for &h in &self.history {
            assert!(h > 0 && h != EOS_SYMBOL);
        }
        assert!(!self.predicted.is_empty());
        for i in 0..self.predicted.len().saturating_sub(1) {
            assert!(self.predicted[i] < self.predicted[i + 1]);
        }
    }

    pub fn print<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        write!(writer, " [ ")?;
        for &h in &self.history {
            write!(writer, "{} ", h)?;
        }
        write!(writer, "]: ")?;
        for &p in &self.predicted {
            write!(writer, "{} ", p)?;
        }
        writeln!(writer)
    }
}

/// Accumulates the counts of a [`GeneralLmState`] without requiring words to
/// arrive in order; output ordering is re-established by an explicit sort.
/// The word → position map is the only structure here that grows with the
/// vocabulary rather than with the current history window.
#[derive(Default)]
pub struct GeneralLmStateBuilder {
    word_to_pos: FxHashMap<i32, usize>,
    counts: Vec<Count>,
    pub discount: f32,
}

impl GeneralLmStateBuilder {
    pub fn new() -> GeneralLmStateBuilder {
        GeneralLmStateBuilder::default()
    }

    pub fn clear(&mut self) {
        self.word_to_pos.clear();
        self.counts.clear();
        self.discount = 0.0;
    }

    pub fn add_count_float(&mut self, word: i32, count: f32) {
        let pos = *self
            .word_to_pos
            .entry(word)
            .or_insert(self.counts.len());
        if pos == self.counts.len() {
            self.counts.push(Count::new(count));
        } else {
            self.counts[pos].add_float(count);
        }
    }

    pub fn add_count_pieces(&mut self, word: i32, scale: f32, num_pieces: i32) {
        let pos = *self
            .word_to_pos
            .entry(word)
            .or_insert(self.counts.len());
        if pos == self.counts.len() {
            self.counts.push(Count::from_pieces(scale, num_pieces));
        } else {
            self.counts[pos].add_pieces(scale, num_pieces);
        }
    }

    pub fn add_count(&mut self, word: i32, count: &Count) {
        let pos = *self
            .word_to_pos
            .entry(word)
            .or_insert(self.counts.len());
        if pos == self.counts.len() {
            self.counts.push(*count);
        } else {
            self.counts[pos].add(count);
        }
    }

    pub fn add_int_counts(&mut self, state: &IntLmState, scale: f32) {
        self.discount += scale * state.discount as f32;
        for &(word, count) in &state.counts {
            self.add_count_pieces(word, scale, count);
        }
    }

    pub fn add_general_counts(&mut self, state: &GeneralLmState) {
        self.discount += state.discount;
        for &(word, ref count) in &state.counts {
            self.add_count(word, count);
        }
    }

    /// The accumulated counts as a word-sorted vector.
    pub fn output(&self) -> Vec<(i32, Count)> {
        assert_eq!(self.counts.len(), self.word_to_pos.len());
        let mut pairs: Vec<(i32, usize)> = self
            .word_to_pos
            .iter()
            .map(|(&word, &pos)| (word, pos))
            .collect();
        pairs.sort();
        pairs
            .into_iter()
            .map(|(word, pos)| (word, self.counts[pos]))
            .collect()
    }
}

/// Merges int-count states that share a history, summing counts for words
/// that occur in more than one source.
pub fn merge_int_lm_states(sources: &[&IntLmState]) -> IntLmState {
    assert!(sources.len() > 1);
    let mut merged = IntLmState {
        history: sources[0].history.clone(),
        counts: Vec::with_capacity(sources.iter().map(|s| s.counts.len()).sum()),
        discount: sources.iter().map(|s| s.discount).sum(),
    };
    for source in sources {
        merged.counts.extend_from_slice(&source.counts);
    }
    merged.counts.sort();
    let mut dest = 0;
    let mut src = 0;
    while src < merged.counts.len() {
        let (cur_word, mut cur_count) = merged.counts[src];
        src += 1;
        while src < merged.counts.len() && merged.counts[src].0 == cur_word {
            cur_count += merged.counts[src].1;
            src += 1;
        }
        merged.counts[dest] = (cur_word, cur_count);
        dest += 1;
    }
    merged.counts.truncate(dest);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn int_state_round_trip() {
        let state = IntLmState {
            history: vec![12, 11],
            counts: vec![(2, 1), (14, 1)],
            discount: 0,
        };
        let mut buf = Vec::new();
        state.write(&mut buf).unwrap();
        // no leading discount field when the discount is zero.
        assert_eq!(buf.len(), 4 * (2 + 2 + 4));
        let read_back = IntLmState::read(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(state, read_back);
        read_back.check();
    }

    #[test]
    fn int_state_round_trip_with_discount() {
        let state = IntLmState {
            history: vec![13, 12],
            counts: vec![(2, 4)],
            discount: 1,
        };
        let mut buf = Vec::new();
        state.write(&mut buf).unwrap();
        assert_eq!(buf.len(), 4 * (1 + 2 + 2 + 2));
        let read_back = IntLmState::read(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(state, read_back);
    }

    #[test]
    fn float_state_round_trip() {
        let state = FloatLmState {
            history: vec![11],
            total: 1.0,
            discount: 0.75,
            counts: vec![(12, 0.25)],
        };
        let mut buf = Vec::new();
        state.write(&mut buf).unwrap();
        let read_back = FloatLmState::read(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(state, read_back);
        read_back.check();
    }

    #[test]
    fn general_state_round_trip() {
        let state = GeneralLmState {
            history: vec![13],
            discount: 0.0,
            counts: vec![
                (2, Count::new(0.4)),
                (
                    14,
                    Count {
                        total: 0.75,
                        top1: 0.4,
                        top2: 0.35,
                        top3: 0.0,
                    },
                ),
            ],
        };
        let mut buf = Vec::new();
        state.write(&mut buf).unwrap();
        let read_back = GeneralLmState::read(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(state, read_back);
    }

    #[test]
    fn null_state_round_trip() {
        let state = NullLmState {
            history: vec![12, 11],
            predicted: vec![13, 14],
        };
        let mut buf = Vec::new();
        state.write(&mut buf).unwrap();
        let read_back = NullLmState::read(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(state, read_back);
        read_back.check();
    }

    #[test]
    fn empty_input_is_clean_eof() {
        let mut cursor = Cursor::new(Vec::<u8>::new());
        assert!(at_eof(&mut cursor).unwrap());
    }

    #[test]
    fn builder_sums_and_sorts() {
        let mut builder = GeneralLmStateBuilder::new();
        builder.add_count_pieces(14, 0.5, 2);
        builder.add_count_float(12, 1.0);
        builder.add_count_float(14, 0.25);
        let counts = builder.output();
        assert_eq!(counts.len(), 2);
        assert_eq!(counts[0].0, 12);
        assert_eq!(counts[1].0, 14);
        assert_eq!(counts[1].1.total, 1.25);
        assert_eq!(counts[1].1.top1, 0.5);
        assert_eq!(counts[1].1.top2, 0.5);
        assert_eq!(counts[1].1.top3, 0.25);
    }

    #[test]
    fn builder_single_weighted_source_is_identity() {
        // merging one source with weight 1 must reproduce the int counts.
        let state = IntLmState {
            history: vec![11],
            counts: vec![(12, 2), (13, 1)],
            discount: 0,
        };
        let mut builder = GeneralLmStateBuilder::new();
        builder.add_int_counts(&state, 1.0);
        let counts = builder.output();
        assert_eq!(counts.len(), 2);
        assert_eq!(counts[0], (12, Count::from_pieces(1.0, 2)));
        assert_eq!(counts[1], (13, Count::new(1.0)));
        assert_eq!(builder.discount, 0.0);
    }

    #[test]
    fn merge_sums_shared_words() {
        let a = IntLmState {
            history: vec![13, 12],
            counts: vec![(2, 1), (14, 1)],
            discount: 0,
        };
        let b = IntLmState {
            history: vec![13, 12],
            counts: vec![(2, 2)],
            discount: 1,
        };
        let merged = merge_int_lm_states(&[&a, &b]);
        assert_eq!(merged.history, vec![13, 12]);
        assert_eq!(merged.counts, vec![(2, 3), (14, 1)]);
        assert_eq!(merged.discount, 1);
    }
}
