use std::error::Error;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::PathBuf;

use log::info;
use structopt::StructOpt;

use smoothlm::{at_eof, create_output, open_input, FloatLmState, WordPositionMap};

#[derive(StructOpt)]
#[structopt(
    about = r#"One iteration of E-M, re-estimating float-counts to approximate
another model.

<float-counts-input> is typically a model after pruning (structurally zero at
the pruned entries) and <float-stats-input> the float-stats of the un-pruned
model (float-counts-to-float-stats, merged); the E-step walks both streams in
lock-step over shared histories and distributes each stats count over the
orders of the pruned model in proportion to each order's contribution to the
model's probability, and the M-step replaces the counts by the accumulated
expectations.  The result is the pruned model moved as close as possible (in
one step) to the un-pruned one.

Prints to stdout, on one line: the total stats count, the total log-prob of
the stats under the input model, and the auxiliary-function improvement per
order.  The summed improvement is a lower bound on the log-likelihood gain
a re-run with the new model would show.

The outputs (one per order) are written as histories retire, and are merged
back into a single stream with merge-float-counts."#
)]
struct Opt {
    /// Vocabulary size (highest word-id).
    #[structopt(name = "num-words")]
    num_words: i32,

    /// The model being re-estimated (all orders, merged, sorted).
    #[structopt(name = "float-counts-input")]
    float_counts: PathBuf,

    /// Float-stats to fit (structurally matched to the model).
    #[structopt(name = "float-stats-input")]
    float_stats: PathBuf,

    /// One output per n-gram order, lowest order first.
    #[structopt(name = "order-output", required = true)]
    outputs: Vec<PathBuf>,
}

// E-step accumulators for one live state.
#[derive(Default)]
struct FloatLmStateWork {
    counts: Vec<f64>,
    discount: f64,
}

impl FloatLmStateWork {
    fn init(&mut self, src: &FloatLmState) {
        self.counts.clear();
        self.counts.resize(src.counts.len(), 0.0);
        self.discount = 0.0;
    }
}

struct FloatCountsEstimator {
    order: usize,
    outputs: Vec<BufWriter<File>>,
    float_counts_input: BufReader<File>,
    float_stats_input: BufReader<File>,
    lm_states: Vec<FloatLmState>,
    work: Vec<FloatLmStateWork>,
    word_to_position: WordPositionMap,
    total_count: f64,
    total_logprob: f64,
    auxf_impr: Vec<f64>,
}

impl FloatCountsEstimator {
    fn new(opt: &Opt) -> io::Result<FloatCountsEstimator> {
        let order = opt.outputs.len();
        let mut outputs = Vec::with_capacity(order);
        for path in &opt.outputs {
            outputs.push(create_output(path)?);
        }
        Ok(FloatCountsEstimator {
            order,
            outputs,
            float_counts_input: open_input(&opt.float_counts)?,
            float_stats_input: open_input(&opt.float_stats)?,
            lm_states: vec![FloatLmState::default(); order],
            work: (0..order).map(|_| FloatLmStateWork::default()).collect(),
            word_to_position: WordPositionMap::new(opt.num_words, order.saturating_sub(1).max(1)),
            total_count: 0.0,
            total_logprob: 0.0,
            auxf_impr: vec![0.0; order],
        })
    }

    fn process_input(&mut self) -> io::Result<()> {
        while !at_eof(&mut self.float_counts_input)? {
            let lm_state = FloatLmState::read(&mut self.float_counts_input)?;
            let history_length = lm_state.history.len();
            assert!(
                history_length < self.order,
                "float-counts-estimate: the order of the input counts is more than expected \
                 given the number of outputs"
            );
            self.flush_output(history_length)?;
            self.lm_states[history_length] = lm_state;
            if history_length + 1 < self.order {
                self.word_to_position.populate(
                    history_length,
                    self.lm_states[history_length].counts.iter().map(|&(w, _)| w),
                );
            }
            let (states, work) = (&self.lm_states, &mut self.work);
            work[history_length].init(&states[history_length]);

            let lm_stats = FloatLmState::read(&mut self.float_stats_input)?;
            self.do_expectation(&lm_stats)?;
        }
        self.flush_output(0)?;
        if !at_eof(&mut self.float_stats_input)? {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "float-counts-estimate: <float-stats> has more input than <float-counts>.  \
                 Mismatch?",
            ));
        }
        Ok(())
    }

    fn do_expectation(&mut self, stats: &FloatLmState) -> io::Result<()> {
        let history_length = stats.history.len();
        self.check_backoff_states_exist(history_length);
        assert!(
            history_length < self.order,
            "bad float-stats input: order is higher than float-counts"
        );
        if stats.history != self.lm_states[history_length].history {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "float-counts-estimate: mismatch in float-counts and float-stats inputs \
                 (history differs)",
            ));
        }

        // 'total' holds the counts plus the discount, so subtract the
        // discount to avoid double-counting the words.
        self.total_count += (stats.total - stats.discount) as f64;
        let mut this_total_logprob: f64 = 0.0;

        if stats.discount != 0.0 {
            // stats.discount is the mass of all words in this context not
            // covered by an explicit n-gram here; those counts are handled
            // per-word in the lower-order states, but only this state knows
            // they pass through its backoff, so the backoff E-M stats and
            // the backoff part of the log-prob are accounted for here.
            self.work[history_length].discount += stats.discount as f64;
            this_total_logprob += stats.discount as f64
                * ((self.lm_states[history_length].discount
                    / self.lm_states[history_length].total) as f64)
                    .ln();
        }

        let lm_total = self.lm_states[history_length].total;
        let lm_discount = self.lm_states[history_length].discount;
        // all backoff-derived terms of the current word's probability,
        // indexed by backoff history length.
        let mut backoff_probs = vec![0.0f32; history_length];
        assert_eq!(
            stats.counts.len(),
            self.lm_states[history_length].counts.len(),
            "float-counts-estimate: stats not structurally matched to counts"
        );
        for (count_index, &(word, stats_count)) in stats.counts.iter().enumerate() {
            let lm_count = self.lm_states[history_length].counts[count_index].1;
            assert_eq!(word, self.lm_states[history_length].counts[count_index].0);
            let direct_prob: f32 = lm_count / lm_total;
            let mut tot_prob: f32 = direct_prob;
            let mut cur_backoff_prob: f32 = lm_discount / lm_total;
            for backoff_hlen in (0..history_length).rev() {
                let backoff_pos = self.word_to_position.get(word, backoff_hlen);
                let backoff_state = &self.lm_states[backoff_hlen];
                assert!(
                    backoff_pos < backoff_state.counts.len()
                        && backoff_state.counts[backoff_pos].0 == word
                );
                let backoff_total = backoff_state.total;
                let backoff_backoff = backoff_state.discount;
                let backoff_count = backoff_state.counts[backoff_pos].1;
                let this_backoff_prob: f32 = cur_backoff_prob * backoff_count / backoff_total;
                backoff_probs[backoff_hlen] = this_backoff_prob;
                tot_prob += this_backoff_prob;
                cur_backoff_prob *= backoff_backoff / backoff_total;
            }
            // if this is not a highest-order state, tot_prob excludes the
            // discount probability of higher-order states; that part of the
            // log-prob was added while processing those states.
            this_total_logprob += stats_count as f64 * (tot_prob as f64).ln();
            // only the direct (non-backoff) share of the count stays here.
            self.work[history_length].counts[count_index] +=
                (stats_count * direct_prob / tot_prob) as f64;

            let mut cur_backoff_tot: f32 = 0.0;
            for backoff_hlen in 0..history_length {
                let this_backoff_prob = backoff_probs[backoff_hlen];
                cur_backoff_tot += this_backoff_prob;
                let backoff_pos = self.word_to_position.get(word, backoff_hlen);
                self.work[backoff_hlen].counts[backoff_pos] +=
                    (stats_count * this_backoff_prob / tot_prob) as f64;
                // every backoff order <= this one is reached through the
                // one-more-specific state's discount.
                self.work[backoff_hlen + 1].discount +=
                    (stats_count * cur_backoff_tot / tot_prob) as f64;
            }
        }
        self.total_logprob += this_total_logprob;
        Ok(())
    }

    // The M-step for, then writing and vacating of, all states of history
    // length >= history_length.
    fn flush_output(&mut self, history_length: usize) -> io::Result<()> {
        assert!(history_length < self.order);
        for h in (history_length..self.order).rev() {
            if !self.lm_states[h].counts.is_empty() {
                self.do_maximization_for_lm_state(h)?;
                let (states, outputs) = (&mut self.lm_states, &mut self.outputs);
                states[h].write(&mut outputs[h])?;
                states[h].counts.clear();
            }
        }
        Ok(())
    }

    fn do_maximization_for_lm_state(&mut self, history_length: usize) -> io::Result<()> {
        let lm_state = &mut self.lm_states[history_length];
        let work = &self.work[history_length];
        assert_eq!(work.counts.len(), lm_state.counts.len());

        let old_total = lm_state.total;
        let work_total = (work.discount + work.counts.iter().sum::<f64>()) as f32;
        if old_total != 0.0 && work_total == 0.0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "float-counts-estimate: accumulated zero stats [unexpected]",
            ));
        }
        if old_total == 0.0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "float-counts-estimate: had zero stats in LM state [unexpected]",
            ));
        }

        let mut this_auxf_impr: f64 = 0.0;
        if work.discount != 0.0 {
            let old_backoff_prob = lm_state.discount / old_total;
            let new_backoff_prob = work.discount as f32 / work_total;
            this_auxf_impr +=
                work.discount * ((new_backoff_prob / old_backoff_prob) as f64).ln();
            assert!(this_auxf_impr.is_finite());
        }

        lm_state.total = work_total;
        lm_state.discount = work.discount as f32;
        for ((_, count), &work_count) in lm_state.counts.iter_mut().zip(&work.counts) {
            let old_prob = *count / old_total;
            let new_prob = work_count as f32 / work_total;
            if new_prob != 0.0 {
                this_auxf_impr += work_count * ((new_prob / old_prob) as f64).ln();
                assert!(this_auxf_impr.is_finite());
            }
            *count = work_count as f32;
        }
        self.auxf_impr[history_length] += this_auxf_impr;
        Ok(())
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

    if opt.num_words <= 3 {
        return Err(format!(
            "float-counts-estimate: invalid num-words {}",
            opt.num_words
        )
        .into());
    }

    let mut estimator = FloatCountsEstimator::new(&opt)?;
    estimator.process_input()?;
    for output in &mut estimator.outputs {
        output.flush()?;
    }

    let stdout = io::stdout();
    let mut out = stdout.lock();
    write!(out, "{} {} ", estimator.total_count, estimator.total_logprob)?;
    for o in 0..estimator.order {
        write!(out, "{} ", estimator.auxf_impr[o])?;
    }
    writeln!(out)?;

    info!(
        "float-counts-estimate: logprob per word was {} over {} words.",
        estimator.total_logprob / estimator.total_count,
        estimator.total_count
    );
    let total_auxf_impr: f64 = estimator.auxf_impr.iter().sum();
    info!(
        "float-counts-estimate: auxiliary function improvement per word was [ {} ] = {}",
        estimator
            .auxf_impr
            .iter()
            .map(|a| (a / estimator.total_count).to_string())
            .collect::<Vec<_>>()
            .join(" + "),
        total_auxf_impr / estimator.total_count
    );
    Ok(())
}
