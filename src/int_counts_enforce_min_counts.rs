use std::collections::BTreeMap;
use std::error::Error;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::PathBuf;

use fxhash::FxHashMap;
use log::info;
use structopt::StructOpt;

use smoothlm::{at_eof, create_output, is_prefix_of, open_input, IntLmState};

#[derive(StructOpt)]
#[structopt(
    about = r#"Enforce per-order min-counts on int-counts, for orders >= 3.

An n-gram below the min-count of its order is completely discounted: its
count moves to the one-lower-order state (whose 'discount' field records the
moved mass).  Two subtleties: an n-gram is kept if the counts of its
EXTENSIONS keep it reachable (e.g. an order-4 count below the order-4
min-count survives if unpruned order-5 counts for the same word exist); and
with several data sources, the test sums over sources: with min-counts m1..mK
and counts c1..cK, the n-gram is discounted when c1/m1 + ... + cK/mK <
0.999 (the slack absorbs roundoff when the sum is mathematically 1).

Arguments after <ngram-order> are: one min-count per order from 3 to N
(either a single value applied to every data source, or a comma-separated
list with one value per source); then one input int-counts file per data
source (all orders together, sorted); then, for each data source in turn,
one output file per order from 2 to N.  Min-counts may not decrease from one
order to the next.  Orders 1 and 2 take no min-count: raw stats contain no
unigrams, and bigram pruning is unsupported to keep the rest of the toolkit
simple."#
)]
struct Opt {
    /// Highest n-gram order of the counts (>= 3).
    #[structopt(name = "ngram-order")]
    ngram_order: usize,

    /// <min-count-order3> .. <min-count-orderN> <input1> .. <inputT>
    /// <output1-order2> .. <output1-orderN> .. <outputT-orderN>
    #[structopt(name = "args", required = true)]
    args: Vec<String>,
}

fn parse_min_count_arg(arg: &str, num_sources: usize) -> Result<Vec<f32>, Box<dyn Error>> {
    let err = || -> Box<dyn Error> {
        format!("int-counts-enforce-min-counts: bad min-counts '{}'", arg).into()
    };
    if arg.contains(',') {
        let list: Vec<f32> = arg
            .split(',')
            .map(|p| p.parse::<f32>())
            .collect::<Result<_, _>>()
            .map_err(|_| err())?;
        if list.len() != num_sources || list.iter().any(|&m| m < 1.0) {
            return Err(err());
        }
        Ok(list)
    } else {
        let min_count: f32 = arg.parse().map_err(|_| err())?;
        if min_count < 1.0 {
            return Err(err());
        }
        Ok(vec![min_count; num_sources])
    }
}

struct MinCountEnforcer {
    ngram_order: usize,
    num_sources: usize,
    // indexed by (history_length - 1) * num_sources + source.
    min_counts: Vec<f32>,
    inverse_min_counts: Vec<f32>,
    inputs: Vec<BufReader<File>>,
    outputs: Vec<BufWriter<File>>,
    // live states, same indexing as min_counts; empty counts = vacant.  The
    // 'history' members are not kept canonical while live; 'history' below
    // is the single source of truth, and states get their history set just
    // before being written.
    lm_states: Vec<IntLmState>,
    // the current history; live states of length h correspond to its
    // prefixes of length h.
    history: Vec<i32>,
    // indexed by history-length - 1, then by word: the sum over sources and
    // over history lengths >= this one of count * inverse-min-count.  A
    // value < 1 means the word is below min-count everywhere it appears.
    // Index 0 (order 2) is never consulted.
    weighted_total_counts: Vec<FxHashMap<i32, f32>>,
    pending_lm_states: Vec<IntLmState>,
    hist_to_sources: BTreeMap<Vec<i32>, Vec<usize>>,
    num_states_written: u64,
}

impl MinCountEnforcer {
    fn read_stream(&mut self, source: usize) -> io::Result<()> {
        if at_eof(&mut self.inputs[source])? {
            return Ok(());
        }
        self.pending_lm_states[source] = IntLmState::read(&mut self.inputs[source])?;
        let history = self.pending_lm_states[source].history.clone();
        assert!(
            !history.is_empty(),
            "int-counts-enforce-min-counts: unexpected order-1 input"
        );
        self.hist_to_sources
            .entry(history)
            .or_insert_with(Vec::new)
            .push(source);
        Ok(())
    }

    fn process_next_history_state(&mut self) -> io::Result<()> {
        let hist = self.hist_to_sources.keys().next().unwrap().clone();
        let sources = self.hist_to_sources.remove(&hist).unwrap();

        self.flush_conflicting_histories(&hist)?;
        self.history = hist;
        let history_length = self.history.len();
        for source in sources {
            let index = (history_length - 1) * self.num_sources + source;
            assert!(self.lm_states[index].counts.is_empty());
            let (states, pending) = (&mut self.lm_states, &mut self.pending_lm_states);
            std::mem::swap(&mut states[index], &mut pending[source]);
            self.add_to_weighted_total_counts(history_length, source);
            self.read_stream(source)?;
        }
        Ok(())
    }

    // A count of history length h keeps a word reachable at every order from
    // 3 up to h+1, so it feeds the weighted totals of all those orders.
    fn add_to_weighted_total_counts(&mut self, history_length: usize, source: usize) {
        let index = (history_length - 1) * self.num_sources + source;
        let lm_state = &self.lm_states[index];
        for &(word, count) in &lm_state.counts {
            for h in (2..=history_length).rev() {
                let inverse_min_count = self.inverse_min_counts[(h - 1) * self.num_sources + source];
                *self.weighted_total_counts[h - 1]
                    .entry(word)
                    .or_insert(0.0) += count as f32 * inverse_min_count;
            }
        }
    }

    // Flushes the live states whose histories are not prefixes of `hist` (in
    // our reversed storage; postfixes in natural word order).
    fn flush_conflicting_histories(&mut self, hist: &[i32]) -> io::Result<()> {
        while self.history.len() > hist.len() {
            self.flush_current_history()?;
        }
        while !is_prefix_of(&self.history, hist) {
            self.flush_current_history()?;
        }
        Ok(())
    }

    // Writes out and vacates the states of the current (deepest) history
    // length, clears that length's weighted totals, and shortens the
    // history.  Assumes all deeper lengths were already flushed.
    fn flush_current_history(&mut self) -> io::Result<()> {
        let history_length = self.history.len();
        assert!(history_length > 0);
        for source in 0..self.num_sources {
            self.flush_this_history(history_length, source)?;
        }
        self.weighted_total_counts[history_length - 1].clear();
        self.history.pop();
        Ok(())
    }

    fn flush_this_history(&mut self, history_length: usize, source: usize) -> io::Result<()> {
        let index = (history_length - 1) * self.num_sources + source;
        if self.lm_states[index].counts.is_empty() {
            return Ok(());
        }
        if history_length + 1 < self.ngram_order {
            // counts discounted down from higher orders were appended out of
            // order and possibly duplicated.
            combine_same_word_counts(&mut self.lm_states[index].counts);
        }
        if history_length >= 2 {
            self.back_off_lm_state(history_length, source);
        }
        self.lm_states[index]
            .counts
            .retain(|&(_, count)| count != 0);
        if !self.lm_states[index].counts.is_empty() {
            assert_eq!(history_length, self.history.len());
            self.lm_states[index].history = self.history.clone();
            let (states, outputs) = (&mut self.lm_states, &mut self.outputs);
            states[index].write(&mut outputs[index])?;
            self.num_states_written += 1;
            self.lm_states[index].counts.clear();
        }
        self.lm_states[index].discount = 0;
        Ok(())
    }

    // Zeroes every below-min-count word of this state (as judged by the
    // weighted total over sources and orders) and appends its count to the
    // one-lower-order state, recording the moved mass in 'discount'.
    fn back_off_lm_state(&mut self, history_length: usize, source: usize) {
        assert!(history_length >= 2);
        let index = (history_length - 1) * self.num_sources + source;
        let backoff_index = (history_length - 2) * self.num_sources + source;
        let weighted_total_counts = &self.weighted_total_counts[history_length - 1];
        // rounding down makes this a conservative fast path only.
        let min_count = self.min_counts[index] as i32;

        let (low, high) = self.lm_states.split_at_mut(index);
        let lm_state = &mut high[0];
        let backoff_lm_state = &mut low[backoff_index];

        let mut total_discounted_count: i32 = 0;
        for entry in lm_state.counts.iter_mut() {
            let (word, count) = *entry;
            // quick filter; the real test is the weighted total below.
            if count >= min_count {
                continue;
            }
            let weighted_total = *weighted_total_counts
                .get(&word)
                .expect("weighted total missing for word");
            // mathematically the test is weighted_total < 1; the slack keeps
            // sums that are exactly 1 up to roundoff from being discounted.
            if weighted_total < 0.999 {
                backoff_lm_state.counts.push(*entry);
                total_discounted_count += count;
                entry.1 = 0;
            }
        }
        // this state must not have been discounted already.
        assert_eq!(lm_state.discount, 0);
        lm_state.discount = total_discounted_count;
    }
}

fn combine_same_word_counts(counts: &mut Vec<(i32, i32)>) {
    counts.sort();
    let mut dest = 0;
    let mut src = 0;
    while src < counts.len() {
        let (cur_word, mut cur_count) = counts[src];
        src += 1;
        while src < counts.len() && counts[src].0 == cur_word {
            cur_count += counts[src].1;
            src += 1;
        }
        counts[dest] = (cur_word, cur_count);
        dest += 1;
    }
    counts.truncate(dest);
}

fn main() -> Result<(), Box<dyn Error>> {
    let opt = Opt::from_args();

    stderrlog::new()
        .verbosity(2)
        .timestamp(stderrlog::Timestamp::Second)
        .init()
        .unwrap();

    let n = opt.ngram_order;
    if n < 3 {
        return Err(format!("int-counts-enforce-min-counts: bad ngram-order {}", n).into());
    }
    // (n-2) min-counts + T inputs + T*(n-1) outputs.
    let num_args = opt.args.len();
    if num_args < n - 2 || (num_args - (n - 2)) % n != 0 {
        return Err(
            "int-counts-enforce-min-counts: wrong number of arguments for this ngram-order"
                .into(),
        );
    }
    let num_sources = (num_args - (n - 2)) / n;
    if num_sources < 1 {
        return Err("int-counts-enforce-min-counts: too few command-line arguments".into());
    }

    // min_counts indexed by (history_length - 1) * num_sources + source; the
    // entries for history-length 1 (order 2) are fixed at 1 and never used.
    let mut min_counts = vec![1.0f32; (n - 1) * num_sources];
    for hist_length in 2..n {
        let per_source = parse_min_count_arg(&opt.args[hist_length - 2], num_sources)?;
        for (source, &m) in per_source.iter().enumerate() {
            min_counts[(hist_length - 1) * num_sources + source] = m;
        }
    }
    for hist_length in 1..n - 1 {
        for source in 0..num_sources {
            let this_min = min_counts[(hist_length - 1) * num_sources + source];
            let next_min = min_counts[hist_length * num_sources + source];
            if this_min > next_min {
                return Err(format!(
                    "int-counts-enforce-min-counts: min-counts must be non-decreasing, \
                     but {} > {}",
                    this_min, next_min
                )
                .into());
            }
        }
    }
    let inverse_min_counts: Vec<f32> = min_counts.iter().map(|&m| 1.0 / m).collect();

    let mut inputs = Vec::with_capacity(num_sources);
    for source in 0..num_sources {
        inputs.push(open_input(&PathBuf::from(&opt.args[n - 2 + source]))?);
    }
    let mut outputs: Vec<Option<BufWriter<File>>> = Vec::new();
    outputs.resize_with((n - 1) * num_sources, || None);
    for source in 0..num_sources {
        for hist_length in 1..n {
            let arg = &opt.args[n - 2 + num_sources + source * (n - 1) + (hist_length - 1)];
            outputs[(hist_length - 1) * num_sources + source] =
                Some(create_output(&PathBuf::from(arg))?);
        }
    }
    let outputs: Vec<BufWriter<File>> = outputs.into_iter().map(Option::unwrap).collect();

    let mut enforcer = MinCountEnforcer {
        ngram_order: n,
        num_sources,
        min_counts,
        inverse_min_counts,
        inputs,
        outputs,
        lm_states: vec![IntLmState::default(); (n - 1) * num_sources],
        history: Vec::new(),
        weighted_total_counts: vec![FxHashMap::default(); n - 1],
        pending_lm_states: vec![IntLmState::default(); num_sources],
        hist_to_sources: BTreeMap::new(),
        num_states_written: 0,
    };

    for source in 0..num_sources {
        enforcer.read_stream(source)?;
    }
    while !enforcer.hist_to_sources.is_empty() {
        enforcer.process_next_history_state()?;
    }
    while !enforcer.history.is_empty() {
        enforcer.flush_current_history()?;
    }
    for output in &mut enforcer.outputs {
        output.flush()?;
    }

    info!(
        "int-counts-enforce-min-counts: wrote {} LM states.",
        enforcer.num_states_written
    );
    Ok(())
}
