use std::error::Error;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::PathBuf;

use log::info;
use structopt::StructOpt;

use smoothlm::derivs::FloatLmStateDerivs;
use smoothlm::{at_eof, create_output, open_input, IntLmState, BOS_SYMBOL, EOS_SYMBOL};

#[derive(StructOpt)]
#[structopt(
    about = r#"Compute backoff-with-interpolation probabilities of int-counts
under a float-count model, and optionally the derivatives w.r.t. the model.

<train-float-counts> is the full model: discounted float-counts of all
orders, merged into one sorted stream (merge-float-counts).  <dev-int-counts>
is the evaluation corpus as int-counts (get-int-counts on dev data).  Both
streams are consumed in lock-step: training states are buffered per history
length only while a future dev state could still reference them, so memory
stays bounded by the n-gram order.

P(word | history) sums the contributions of every order from the longest
matching training history down to unigram ("backoff with interpolation",
Chen & Goodman); this is what makes the model differentiable everywhere.
The total dev count and total natural-log probability are printed to stdout
on one line.

If derivative output paths are given (one per n-gram order, lowest first),
the derivative of the total log-prob w.r.t. every model count is written as
each training state is evicted.  The derivative w.r.t. a state's total is
folded into its discount and count derivatives on write, since the total is
a derived quantity."#
)]
struct Opt {
    /// The model: merged float-counts of all orders, sorted.
    #[structopt(name = "train-float-counts")]
    train: PathBuf,

    /// The evaluation corpus as int-counts.
    #[structopt(name = "dev-int-counts")]
    dev: PathBuf,

    /// Optional derivative outputs, one per n-gram order.
    #[structopt(name = "deriv-output")]
    deriv_outputs: Vec<PathBuf>,
}

struct ProbComputer {
    train_input: BufReader<File>,
    // derivative outputs indexed by history length; empty when derivatives
    // were not requested.
    deriv_outputs: Vec<BufWriter<File>>,
    // training states currently buffered, indexed by history length.  A
    // state with empty counts is a vacant slot.
    discounted_state: Vec<FloatLmStateDerivs>,
    // the most recently read training state, not yet moved into its slot.
    next_discounted_state: FloatLmStateDerivs,
    total_log_prob: f64,
    total_count: i64,
}

impl ProbComputer {
    fn new(opt: &Opt) -> io::Result<ProbComputer> {
        let mut deriv_outputs = Vec::with_capacity(opt.deriv_outputs.len());
        for path in &opt.deriv_outputs {
            deriv_outputs.push(create_output(path)?);
        }
        Ok(ProbComputer {
            train_input: open_input(&opt.train)?,
            deriv_outputs,
            discounted_state: Vec::new(),
            next_discounted_state: FloatLmStateDerivs::default(),
            total_log_prob: 0.0,
            total_count: 0,
        })
    }

    // Moves the pending training state (if any) into the slot for its
    // history length, writing the derivatives of the state it evicts, then
    // buffers the next state from the training stream.
    fn read_next_discounted_state(&mut self) -> io::Result<()> {
        if !self.next_discounted_state.state.counts.is_empty() {
            let hist_size = self.next_discounted_state.state.history.len();
            if self.discounted_state.len() <= hist_size {
                self.discounted_state
                    .resize_with(hist_size + 1, FloatLmStateDerivs::default);
            }
            std::mem::swap(
                &mut self.discounted_state[hist_size],
                &mut self.next_discounted_state,
            );
            if !self.next_discounted_state.state.counts.is_empty() {
                // we evicted a live state; its derivatives are complete now,
                // because the dev stream has moved past every history that
                // could reference it.
                if !self.deriv_outputs.is_empty() {
                    assert!(self.deriv_outputs.len() > hist_size);
                    self.next_discounted_state
                        .write_derivs(&mut self.deriv_outputs[hist_size])?;
                }
                self.next_discounted_state.state.history.clear();
                self.next_discounted_state.state.counts.clear();
            }
        }
        if !at_eof(&mut self.train_input)? {
            self.next_discounted_state = FloatLmStateDerivs::read(&mut self.train_input)?;
        }
        Ok(())
    }

    // Advances the training stream until the pending state is
    // lexicographically later than the dev history; thanks to the shared
    // sort order, every training state relevant to this dev state is then
    // buffered.
    fn buffer_train_input(&mut self, dev_history: &[i32]) -> io::Result<()> {
        while !self.next_discounted_state.state.counts.is_empty()
            && self.next_discounted_state.state.history.as_slice() <= dev_history
        {
            self.read_next_discounted_state()?;
        }
        assert!(
            !self.discounted_state.is_empty(),
            "compute-probs: read no training-data input"
        );
        Ok(())
    }

    // The longest training history length matching a prefix of the dev
    // history.
    fn longest_relevant_history_size(&self, dev_history: &[i32]) -> usize {
        let mut h = dev_history.len();
        while h > 0
            && (h >= self.discounted_state.len()
                || self.discounted_state[h].state.history.len() != h
                || self.discounted_state[h].state.history.as_slice() != &dev_history[..h])
        {
            h -= 1;
        }
        for i in 1..=h {
            assert_eq!(
                self.discounted_state[i].state.history.as_slice(),
                &dev_history[..i]
            );
        }
        h
    }

    fn process_word(&mut self, hist_size: usize, word: i32, count_of_word: i32) {
        // caches, for the backward pass, where the word was found in each
        // order's counts (usize::MAX where it had no explicit count).
        let mut count_position = vec![usize::MAX; hist_size];

        // cur_backoff_prob is the probability mass assigned to backoff,
        // shrinking as we descend through the orders; tot_prob accumulates
        // the contribution of every order ("with interpolation").
        let mut cur_backoff_prob: f32 = 1.0;
        let mut tot_prob: f32 = 0.0;
        for h in (0..=hist_size).rev() {
            let lm_state = &self.discounted_state[h].state;
            assert!(lm_state.total != 0.0);
            if h == 0 {
                // unigram counts are dense from </s> up with no gaps (see
                // discount-counts-1gram), so the lookup is O(1).
                let pos = (word - EOS_SYMBOL) as usize;
                assert!(
                    word >= EOS_SYMBOL
                        && lm_state.counts.len() > pos
                        && lm_state.counts[pos].0 == word
                );
                let unigram_count = lm_state.counts[pos].1 as f64;
                let unigram_total = lm_state.total as f64;
                tot_prob =
                    (tot_prob as f64 + cur_backoff_prob as f64 * unigram_count / unigram_total)
                        as f32;
            } else {
                if let Ok(pos) = lm_state.counts.binary_search_by_key(&word, |&(w, _)| w) {
                    let this_count = lm_state.counts[pos].1;
                    tot_prob += cur_backoff_prob * this_count / lm_state.total;
                    count_position[h - 1] = pos;
                }
                cur_backoff_prob *= lm_state.discount / lm_state.total;
            }
        }
        assert!(tot_prob > 0.0);
        let log_prob = (tot_prob as f64).ln() as f32;
        self.total_log_prob += (log_prob * count_of_word as f32) as f64;
        self.total_count += count_of_word as i64;

        if self.deriv_outputs.is_empty() {
            return;
        }

        // The backward pass: dL/d(tot_prob) for L = count * ln(tot_prob).
        let tot_prob_deriv: f32 = count_of_word as f32 / tot_prob;
        let mut cur_backoff_prob_deriv: f32 = 0.0;
        for h in 0..=hist_size {
            let lm_state = &mut self.discounted_state[h];
            if h == 0 {
                let pos = (word - EOS_SYMBOL) as usize;
                let unigram_count = lm_state.state.counts[pos].1 as f64;
                let unigram_total = lm_state.state.total as f64;
                // forward: tot_prob += cur_backoff_prob * unigram_count / unigram_total
                cur_backoff_prob_deriv = (cur_backoff_prob_deriv as f64
                    + tot_prob_deriv as f64 * unigram_count / unigram_total)
                    as f32;
                let unigram_count_deriv =
                    ((tot_prob_deriv * cur_backoff_prob) as f64 / unigram_total) as f32;
                let unigram_total_deriv = (-((tot_prob_deriv * cur_backoff_prob) as f64
                    * unigram_count)
                    / (unigram_total * unigram_total)) as f32;
                lm_state.total_deriv += unigram_total_deriv as f64;
                lm_state.count_derivs[pos] += unigram_count_deriv as f64;
            } else {
                let pos = count_position[h - 1];
                let total = lm_state.state.total;
                let discount = lm_state.state.discount;

                // The forward code was "cur_backoff_prob *= discount / total",
                // i.e. new_backoff = prev_backoff * discount / total with two
                // distinct variables.  We recover prev_backoff by multiplying
                // back, which also simplifies the total derivative:
                //   total_deriv -= backoff_deriv * prev_backoff * discount / total^2
                //               == backoff_deriv * new_backoff / total.
                lm_state.total_deriv -=
                    ((cur_backoff_prob_deriv * cur_backoff_prob) / total) as f64;
                // from here on cur_backoff_prob holds prev_backoff_prob.
                cur_backoff_prob *= total / discount;
                lm_state.discount_deriv +=
                    (cur_backoff_prob_deriv * cur_backoff_prob / total) as f64;
                // and cur_backoff_prob_deriv becomes prev_backoff_prob_deriv.
                cur_backoff_prob_deriv *= discount / total;

                if pos != usize::MAX {
                    let this_count = lm_state.state.counts[pos].1;
                    // forward: tot_prob += cur_backoff_prob * this_count / total
                    lm_state.total_deriv -=
                        ((tot_prob_deriv * cur_backoff_prob * this_count) / (total * total))
                            as f64;
                    lm_state.count_derivs[pos] +=
                        (tot_prob_deriv * cur_backoff_prob / total) as f64;
                    cur_backoff_prob_deriv += tot_prob_deriv * this_count / total;
                }
            }
        }
        // multiplying all the backoff factors back in must restore 1; this
        // doubles as a check of the training stream's sort order.
        assert!((cur_backoff_prob - 1.0).abs() < 0.001);
    }

    fn process_dev_state(&mut self, dev_state: &IntLmState) -> io::Result<()> {
        self.buffer_train_input(&dev_state.history)?;
        let hist_size = self.longest_relevant_history_size(&dev_state.history);
        assert!(!dev_state.counts.is_empty());
        for &(word, count_of_word) in &dev_state.counts {
            assert!(word > 0 && word != BOS_SYMBOL && count_of_word > 0);
            self.process_word(hist_size, word, count_of_word);
        }
        Ok(())
    }

    fn flush_buffers(&mut self) -> io::Result<()> {
        if self.deriv_outputs.is_empty() {
            return Ok(());
        }
        while !self.next_discounted_state.state.counts.is_empty()
            || !at_eof(&mut self.train_input)?
        {
            self.read_next_discounted_state()?;
        }
        for i in 0..self.discounted_state.len() {
            if !self.discounted_state[i].state.counts.is_empty() {
                assert!(i < self.deriv_outputs.len());
                let (states, outputs) = (&mut self.discounted_state, &mut self.deriv_outputs);
                states[i].write_derivs(&mut outputs[i])?;
                states[i].state.counts.clear();
                states[i].state.history.clear();
            }
        }
        for output in &mut self.deriv_outputs {
            output.flush()?;
        }
        Ok(())
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let opt = Opt::from_args();

    stderrlog::new()
        .verbosity(2)
        .timestamp(stderrlog::Timestamp::Second)
        .init()
        .unwrap();

    let mut computer = ProbComputer::new(&opt)?;
    // buffer the first training state before touching the dev stream.
    computer.read_next_discounted_state()?;

    let mut dev_input = open_input(&opt.dev)?;
    while !at_eof(&mut dev_input)? {
        let dev_state = IntLmState::read(&mut dev_input)?;
        computer.process_dev_state(&dev_state)?;
    }
    computer.flush_buffers()?;

    println!("{} {}", computer.total_count, computer.total_log_prob);
    info!(
        "compute-probs: average log-prob per word was {} (perplexity = {}) over {} words.",
        computer.total_log_prob / computer.total_count as f64,
        (-computer.total_log_prob / computer.total_count as f64).exp(),
        computer.total_count
    );
    Ok(())
}
