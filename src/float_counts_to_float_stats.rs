use std::error::Error;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use log::{info, warn};
use structopt::StructOpt;

use smoothlm::{at_eof, create_output, FloatLmState, WordPositionMap};

#[derive(StructOpt)]
#[structopt(
    about = r#"Re-express a float-count model as float-stats: the expected
count of each n-gram under data generated from the model itself, with the
training corpus's distribution of history contexts.

Structurally the stats are identical to the input model (same states, same
count slots); only the interpretation changes.  A highest-order count
absorbs the backoff-with-interpolation contribution for its word; a
lower-order count keeps only the mass not already explained by some
higher-order entry, and each state's discount keeps only the mass that
actually reaches backoff unexplained.  The decomposition is exact: summed
over orders (ignoring the discounts, which would double-count), the stats
equal the weighted training-data count, and this is verified to 1e-4
relative at exit.

Stats are written per order (lower orders complete later than higher ones,
so a single stream would be out of sorted order); merge-float-counts
restores a single stream.  These stats drive the E-M step of
float-counts-estimate and the divergence computations after pruning."#
)]
struct Opt {
    /// Vocabulary size (highest word-id).
    #[structopt(name = "num-words")]
    num_words: i32,

    /// One output per n-gram order, lowest order first.  Input float-counts
    /// are read from stdin.
    #[structopt(name = "order-output", required = true)]
    outputs: Vec<PathBuf>,
}

// Accumulates, in f64, the modified counts of one state while it is live.
#[derive(Default)]
struct FloatLmStateWork {
    backoff: f64,
    counts: Vec<f64>,
}

impl FloatLmStateWork {
    fn init(&mut self, src: &FloatLmState) {
        self.backoff = src.discount as f64;
        self.counts.clear();
        self.counts.extend(src.counts.iter().map(|&(_, c)| c as f64));
    }
}

struct FloatStatsGenerator {
    num_words: i32,
    order: usize,
    outputs: Vec<BufWriter<File>>,
    lm_states: Vec<FloatLmState>,
    work: Vec<FloatLmStateWork>,
    word_to_position: WordPositionMap,
    total_input_count: f64,
    total_output_count: f64,
}

impl FloatStatsGenerator {
    fn new(opt: &Opt) -> io::Result<FloatStatsGenerator> {
        let order = opt.outputs.len();
        let mut outputs = Vec::with_capacity(order);
        for path in &opt.outputs {
            outputs.push(create_output(path)?);
        }
        Ok(FloatStatsGenerator {
            num_words: opt.num_words,
            order,
            outputs,
            lm_states: vec![FloatLmState::default(); order],
            work: (0..order).map(|_| FloatLmStateWork::default()).collect(),
            word_to_position: WordPositionMap::new(opt.num_words, order.saturating_sub(1).max(1)),
            total_input_count: 0.0,
            total_output_count: 0.0,
        })
    }

    // Zero counts cannot take part in the proportion_remaining computation,
    // so floor them to a tiny value (adding the difference to the total).
    fn floor_counts(floor: f32, lm_state: &mut FloatLmState) {
        let mut extra_count: f32 = 0.0;
        for (_, count) in lm_state.counts.iter_mut() {
            if *count < floor {
                extra_count += floor - *count;
                *count = floor;
            }
        }
        lm_state.total += extra_count;
    }

    fn process_input<R: io::BufRead>(&mut self, input: &mut R) -> io::Result<()> {
        while !at_eof(input)? {
            let mut lm_state = FloatLmState::read(input)?;
            Self::floor_counts(1.0e-20, &mut lm_state);
            let history_length = lm_state.history.len();
            assert!(
                history_length < self.order,
                "float-counts-to-float-stats: the order of the input counts is more than \
                 expected given the number of outputs"
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
        }
        self.flush_output(0)
    }

    // Processes, writes out and vacates the states of all history lengths
    // >= history_length; called before loading a state of that length, and
    // once more at the end.
    fn flush_output(&mut self, history_length: usize) -> io::Result<()> {
        assert!(history_length < self.order);
        for h in (history_length..self.order).rev() {
            if !self.lm_states[h].counts.is_empty() {
                self.do_processing_for_lm_state(h);
                let (states, outputs) = (&mut self.lm_states, &mut self.outputs);
                states[h].write(&mut outputs[h])?;
                self.total_input_count +=
                    (self.lm_states[h].total - self.lm_states[h].discount) as f64;
                self.lm_states[h].counts.clear();
            }
        }
        Ok(())
    }

    fn do_processing_for_lm_state(&mut self, history_length: usize) {
        self.check_backoff_states_exist(history_length);
        if history_length > 0 {
            // per word, the pieces of its expected count contributed by each
            // backoff order below the current one.
            let mut backoff_counts = vec![0.0f32; history_length];
            let num_counts = self.lm_states[history_length].counts.len();
            for count_index in 0..num_counts {
                let (word, direct_count) = self.lm_states[history_length].counts[count_index];

                // The fraction of this count not already accounted for by
                // higher-order n-grams.  If this is the count for "b c"
                // (state "b"), and the state "a b" had a count for "c" while
                // "x b" did not, proportion_remaining is total("x b") /
                // (total("a b") + total("x b")); it is zero when every
                // higher-order state had an explicit count for the word.
                let proportion_remaining =
                    (self.work[history_length].counts[count_index] / direct_count as f64) as f32;
                assert!(proportion_remaining > -1.0e-3);
                if proportion_remaining < 1.0e-5 {
                    continue;
                }

                // the state's backoff mass, scaled by the state's prior count
                // and thinned by what higher orders already explained.
                let mut cur_backoff_weight: f32 =
                    self.lm_states[history_length].discount * proportion_remaining;

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
                    // this order's contribution to the expected count.
                    let cur_backoff_count: f32 =
                        cur_backoff_weight * backoff_count / backoff_total;
                    backoff_counts[backoff_hlen] = cur_backoff_count;
                    // the mass becomes part of an explicit n-gram here, so
                    // remove it from the lower-order stats.
                    self.work[backoff_hlen].counts[backoff_pos] -= cur_backoff_count as f64;
                    cur_backoff_weight *= backoff_backoff / backoff_total;
                }

                let mut cur_backoff_tot: f64 = 0.0;
                for backoff_hlen in 0..history_length {
                    cur_backoff_tot += backoff_counts[backoff_hlen] as f64;
                    // counts explained at orders <= backoff_hlen no longer
                    // reach the next state up through its backoff.
                    self.work[backoff_hlen + 1].backoff -= cur_backoff_tot;
                }
                // the highest order absorbs the whole interpolation part.
                self.work[history_length].counts[count_index] += cur_backoff_tot;
            }
        }
        self.finalize_lm_state(history_length);
    }

    // Copies the work accumulators back into the state before writing.
    fn finalize_lm_state(&mut self, history_length: usize) {
        let lm_state = &mut self.lm_states[history_length];
        let work = &self.work[history_length];
        assert_eq!(work.counts.len(), lm_state.counts.len());

        let old_total = lm_state.total;
        lm_state.total =
            (work.backoff + work.counts.iter().sum::<f64>()) as f32;
        lm_state.discount = work.backoff as f32;
        for ((_, count), &src) in lm_state.counts.iter_mut().zip(&work.counts) {
            let mut src_count = src as f32;
            if src_count < 0.0 {
                // tiny negative values are expected roundoff; anything
                // bigger deserves a warning.
                if src_count <= -1.0e-4 * old_total {
                    warn!(
                        "float-counts-to-float-stats: possible excessive roundoff: {} vs {}",
                        src_count, old_total
                    );
                }
                src_count = 0.0;
            }
            *count = src_count;
        }
        self.total_output_count += (lm_state.total - lm_state.discount) as f64;
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
            "float-counts-to-float-stats: invalid num-words {}",
            opt.num_words
        )
        .into());
    }

    let mut generator = FloatStatsGenerator::new(&opt)?;
    let stdin = io::stdin();
    let mut input = stdin.lock();
    generator.process_input(&mut input)?;
    for output in &mut generator.outputs {
        output.flush()?;
    }

    if generator.total_input_count != 0.0
        && (generator.total_input_count - generator.total_output_count).abs()
            > 1.0e-4 * generator.total_input_count
    {
        warn!(
            "float-counts-to-float-stats: total input and output count disagree too much: \
             {} vs. {}",
            generator.total_input_count, generator.total_output_count
        );
    }
    info!(
        "float-counts-to-float-stats: total count {} in, {} out.",
        generator.total_input_count, generator.total_output_count
    );
    Ok(())
}
