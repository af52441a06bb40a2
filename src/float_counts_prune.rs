use std::error::Error;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::PathBuf;

use log::info;
use structopt::StructOpt;

use smoothlm::{at_eof, create_output, open_input, FloatLmState, NullLmState, WordPositionMap};

#[derive(StructOpt)]
#[structopt(
    about = r#"Entropy-based (Stolcke-style) pruning of a float-count model.

For each candidate n-gram, computes an upper bound on the decrease in
expected log-likelihood (of data generated by the model itself) that moving
its count to the backoff state would cause; if the decrease is smaller than
<threshold>, the count is set to zero and its mass moved into the state's
discount and the backoff state's count.  The model stays structurally
identical; run float-counts-estimate and then float-counts-remove-zeros to
re-estimate and actually shrink it.

Two classes of n-grams are never pruned: 'shadowed' ones, where a
higher-order state still has a nonzero count for the same word (ARPA
consumers assume the lower-order entry exists), and 'protected' ones, whose
word sequence coincides with a history-state listed in
<protected-counts-input> (produced by float-counts-to-histories | sort |
histories-to-null-counts); pruning those would strand the state.

Prints to stdout, on one line: total data count, total log-prob change
(<= 0), and the numbers of nonzero n-grams, shadowed, protected, and
actually pruned."#
)]
struct Opt {
    /// Pruning threshold (> 0); smaller prunes less.
    #[structopt(name = "threshold")]
    threshold: f64,

    /// Vocabulary size (highest word-id).
    #[structopt(name = "num-words")]
    num_words: i32,

    /// The model: merged float-counts of all orders, sorted.
    #[structopt(name = "float-counts-input")]
    float_counts: PathBuf,

    /// Null-counts marking the protected history-states.
    #[structopt(name = "protected-counts-input")]
    protected_counts: PathBuf,

    /// One output per n-gram order, lowest order first.
    #[structopt(name = "order-output", required = true)]
    outputs: Vec<PathBuf>,
}

// Streams the protected-history null-counts alongside the model, answering
// "does this n-gram coincide with an existing history-state?".  Relies on
// being queried in the model's sorted history order.
struct NullCountsReader {
    input: BufReader<File>,
    // highest history length of the null-counts; one less than the order of
    // the model being pruned.
    order: usize,
    lm_states: Vec<NullLmState>,
    word_to_position: WordPositionMap,
}

impl NullCountsReader {
    fn new(input: BufReader<File>, order: usize, num_words: i32) -> NullCountsReader {
        NullCountsReader {
            input,
            order,
            lm_states: vec![NullLmState::default(); order],
            word_to_position: WordPositionMap::new(num_words, order.max(1)),
        }
    }

    fn ngram_is_protected(&mut self, history: &[i32], word: i32) -> io::Result<bool> {
        if history.is_empty() {
            return Ok(true); // all unigrams are protected.
        }
        let history_size = history.len();
        if history_size >= self.order {
            return Ok(false); // the highest-order n-grams are never states.
        }

        while (self.lm_states[history_size].predicted.is_empty()
            || history > self.lm_states[history_size].history.as_slice())
            && !at_eof(&mut self.input)?
        {
            self.read_next()?;
        }

        // absence of the history-state among the null-counts (inferable
        // because both sides arrive in sorted order) means nothing with this
        // exact word sequence exists as a state.
        if self.lm_states[history_size].history.as_slice() != history {
            return Ok(false);
        }
        let pos = self.word_to_position.get(word, history_size);
        let state = &self.lm_states[history_size];
        Ok(pos < state.predicted.len() && state.predicted[pos] == word)
    }

    fn read_next(&mut self) -> io::Result<()> {
        if at_eof(&mut self.input)? {
            return Ok(());
        }
        let lm_state = NullLmState::read(&mut self.input)?;
        let history_length = lm_state.history.len();
        assert!(history_length < self.order);
        // sort-order check; the empty history sorts first, which makes this
        // hold at the start of the file too.
        assert!(
            self.lm_states[history_length].history.as_slice() <= lm_state.history.as_slice(),
            "float-counts-prune: protected counts out of order"
        );
        self.word_to_position
            .populate(history_length, lm_state.predicted.iter().copied());
        self.lm_states[history_length] = lm_state;
        Ok(())
    }
}

struct FloatCountsPruner {
    threshold: f64,
    order: usize,
    outputs: Vec<BufWriter<File>>,
    float_counts_input: BufReader<File>,
    null_counts_reader: NullCountsReader,
    lm_states: Vec<FloatLmState>,
    // per live state, whether each count has a nonzero higher-order count
    // for the same word (making it unprunable).
    count_shadowed: Vec<Vec<bool>>,
    word_to_position: WordPositionMap,
    total_count: f64,
    total_logprob_change: f64,
    num_ngrams: u64,
    num_ngrams_shadowed: u64,
    num_ngrams_protected: u64,
    num_ngrams_pruned: u64,
}

impl FloatCountsPruner {
    fn new(opt: &Opt) -> io::Result<FloatCountsPruner> {
        let order = opt.outputs.len();
        assert!(order >= 1);
        let mut outputs = Vec::with_capacity(order);
        for path in &opt.outputs {
            outputs.push(create_output(path)?);
        }
        Ok(FloatCountsPruner {
            threshold: opt.threshold,
            order,
            outputs,
            float_counts_input: open_input(&opt.float_counts)?,
            null_counts_reader: NullCountsReader::new(
                open_input(&opt.protected_counts)?,
                order - 1,
                opt.num_words,
            ),
            lm_states: vec![FloatLmState::default(); order],
            count_shadowed: vec![Vec::new(); order],
            word_to_position: WordPositionMap::new(
                opt.num_words,
                order.saturating_sub(1).max(1),
            ),
            total_count: 0.0,
            total_logprob_change: 0.0,
            num_ngrams: 0,
            num_ngrams_shadowed: 0,
            num_ngrams_protected: 0,
            num_ngrams_pruned: 0,
        })
    }

    fn process_input(&mut self) -> io::Result<()> {
        while !at_eof(&mut self.float_counts_input)? {
            let lm_state = FloatLmState::read(&mut self.float_counts_input)?;
            let history_length = lm_state.history.len();
            assert!(
                history_length < self.order,
                "float-counts-prune: the order of the input counts is more than expected \
                 given the number of outputs"
            );
            // the actual pruning happens as deeper states retire.
            self.flush_output(history_length)?;
            self.count_shadowed[history_length].clear();
            self.count_shadowed[history_length].resize(lm_state.counts.len(), false);
            if history_length + 1 < self.order {
                self.word_to_position
                    .populate(history_length, lm_state.counts.iter().map(|&(w, _)| w));
            }
            self.lm_states[history_length] = lm_state;
        }
        self.flush_output(0)
    }

    // Prunes, writes out and vacates the states of all history lengths >=
    // history_length.
    fn flush_output(&mut self, history_length: usize) -> io::Result<()> {
        assert!(history_length < self.order);
        for h in (history_length..self.order).rev() {
            if !self.lm_states[h].counts.is_empty() {
                self.do_pruning_for_lm_state(h)?;
                self.update_count_shadowed(h);
                let (states, outputs) = (&mut self.lm_states, &mut self.outputs);
                states[h].write(&mut outputs[h])?;
                states[h].counts.clear();
            }
        }
        Ok(())
    }

    // The log-likelihood change (<= 0) from moving this word's whole count
    // to the backoff state.  Assembled from four log-ratio terms: the word
    // in this state, the word reaching the backoff state from elsewhere, a
    // phantom aggregate for the other words of this state that are accessed
    // via backoff, and a phantom aggregate for the backoff state's mass from
    // elsewhere.  Treating the phantoms as distinct symbols makes this an
    // upper bound on the true divergence.
    fn pruning_logprob_change(
        count: f32,
        discount: f32,
        backoff_count: f32,
        backoff_total: f32,
    ) -> f32 {
        assert!(
            count > 0.0
                && discount > 0.0
                && backoff_total > backoff_count
                && backoff_total >= 0.99 * discount
        );

        // the count of the word including what backoff already gives it.
        let augmented_count: f32 = count + discount * backoff_count / backoff_total;

        // phantom 'b': everything else this state reaches via backoff.
        let b_count: f32 = discount * ((backoff_total - backoff_count) / backoff_total);
        assert!(b_count >= -0.001 * backoff_total);

        // phantom 'c': the backoff state's mass arriving from other states.
        let c_count: f32 = backoff_total - backoff_count - b_count;
        assert!(c_count >= -0.001 * backoff_total);

        // the word's mass in the backoff state owed to other states.
        let a_other_count: f32 = backoff_count - discount * backoff_count / backoff_total;
        assert!(a_other_count >= -0.001 * backoff_count);

        // quantities after the count moves to backoff.
        let new_backoff_count: f32 = backoff_count + count;
        let new_backoff_total: f32 = backoff_total + count;
        let new_discount: f32 = discount + count;

        // each term is count-of-symbol * ln(new count / old count); the
        // denominators cancel.
        let this_a_change: f32 = augmented_count
            * ((new_discount * new_backoff_count / new_backoff_total) / augmented_count).ln();
        let other_a_change: f32 = a_other_count
            * ((new_backoff_count / new_backoff_total) / (backoff_count / backoff_total)).ln();
        let b_change: f32 =
            b_count * ((new_discount / new_backoff_total) / (discount / backoff_total)).ln();
        let c_change: f32 = c_count * (backoff_total / new_backoff_total).ln();

        let ans = this_a_change + other_a_change + b_change + c_change;
        assert!(ans < 0.0001 * count);
        ans
    }

    // Prunes one state, assuming all higher-order states already retired.
    fn do_pruning_for_lm_state(&mut self, history_length: usize) -> io::Result<()> {
        if history_length == 0 {
            return Ok(()); // the unigram state is never pruned.
        }
        self.check_backoff_states_exist(history_length);
        // consistent before or after pruning; pruning moves mass, it does
        // not destroy it.
        self.total_count +=
            (self.lm_states[history_length].total - self.lm_states[history_length].discount)
                as f64;
        assert_eq!(
            self.count_shadowed[history_length].len(),
            self.lm_states[history_length].counts.len()
        );
        let num_counts = self.lm_states[history_length].counts.len();
        for count_index in 0..num_counts {
            let (word, count) = self.lm_states[history_length].counts[count_index];
            if count == 0.0 {
                continue; // already pruned.
            }
            self.num_ngrams += 1;
            if self.count_shadowed[history_length][count_index] {
                self.num_ngrams_shadowed += 1;
                continue;
            }
            let history = &self.lm_states[history_length].history;
            if self.null_counts_reader.ngram_is_protected(history, word)? {
                self.num_ngrams_protected += 1;
                continue;
            }

            let backoff_total = self.lm_states[history_length - 1].total;
            let backoff_count = backoff_total * self.prob_for_word(word, history_length - 1);
            let discount = self.lm_states[history_length].discount;
            let logprob_change =
                Self::pruning_logprob_change(count, discount, backoff_count, backoff_total);
            if (logprob_change as f64) > -self.threshold {
                let pos = self.word_to_position.get(word, history_length - 1);
                self.lm_states[history_length].counts[count_index].1 = 0.0;
                self.lm_states[history_length].discount += count;
                self.lm_states[history_length - 1].counts[pos].1 += count;
                self.lm_states[history_length - 1].total += count;
                self.total_logprob_change += logprob_change as f64;
                self.num_ngrams_pruned += 1;
            }
        }
        Ok(())
    }

    // Marks, in the backoff state's shadow mask, every word this state still
    // has a nonzero count for.
    fn update_count_shadowed(&mut self, history_length: usize) {
        if history_length == 0 {
            return;
        }
        let num_counts = self.lm_states[history_length].counts.len();
        for count_index in 0..num_counts {
            let (word, count) = self.lm_states[history_length].counts[count_index];
            if count != 0.0 {
                let pos = self.word_to_position.get(word, history_length - 1);
                assert_eq!(self.lm_states[history_length - 1].counts[pos].0, word);
                self.count_shadowed[history_length - 1][pos] = true;
            }
        }
    }

    // The backoff-interpolated probability of a word in the state of the
    // given history length; the word must have a nonzero count there.
    fn prob_for_word(&self, word: i32, hist_length: usize) -> f32 {
        let pos = self.word_to_position.get(word, hist_length);
        let lm_state = &self.lm_states[hist_length];
        assert!(pos < lm_state.counts.len() && lm_state.counts[pos].0 == word);
        let mut count = lm_state.counts[pos].1;
        assert!(count > 0.0);
        if hist_length > 0 {
            count += lm_state.discount * self.prob_for_word(word, hist_length - 1);
        }
        count / lm_state.total
    }

    fn check_backoff_states_exist(&self, hist_length: usize) {
        for i in 1..hist_length {
            assert_eq!(self.lm_states[i].history.len(), i);
            assert_eq!(
                self.lm_states[i].history.as_slice(),
                &self.lm_states[hist_length].history[..i]
            );
        }
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let opt = Opt::from_args();

    stderrlog::new()
        .verbosity(2)
        .timestamp(stderrlog::Timestamp::Second)
        .init()
        .unwrap();

    if !(opt.threshold > 0.0 && opt.threshold.is_finite()) {
        return Err(format!("float-counts-prune: invalid threshold {}", opt.threshold).into());
    }
    if opt.num_words <= 3 {
        return Err(format!("float-counts-prune: invalid num-words {}", opt.num_words).into());
    }

    let mut pruner = FloatCountsPruner::new(&opt)?;
    pruner.process_input()?;
    for output in &mut pruner.outputs {
        output.flush()?;
    }

    println!(
        "{} {} {} {} {} {}",
        pruner.total_count,
        pruner.total_logprob_change,
        pruner.num_ngrams,
        pruner.num_ngrams_shadowed,
        pruner.num_ngrams_protected,
        pruner.num_ngrams_pruned
    );
    info!(
        "float-counts-prune: logprob change per word was {} over {} words.",
        pruner.total_logprob_change / pruner.total_count,
        pruner.total_count
    );
    let eligible = pruner.num_ngrams - pruner.num_ngrams_shadowed - pruner.num_ngrams_protected;
    info!(
        "float-counts-prune: aside from unigram there were {} nonzero n-grams; {} were \
         shadowed by a higher-order n-gram and {} led to an existing LM-state.  Of the {} \
         eligible for pruning, {} were pruned.",
        pruner.num_ngrams,
        pruner.num_ngrams_shadowed,
        pruner.num_ngrams_protected,
        eligible,
        pruner.num_ngrams_pruned
    );
    Ok(())
}
