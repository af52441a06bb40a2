use std::collections::BTreeMap;
use std::error::Error;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::PathBuf;

use log::info;
use structopt::StructOpt;

use smoothlm::{at_eof, open_input, FloatLmState};

#[derive(StructOpt)]
#[structopt(
    about = r#"Merge-sort float-count streams into one sorted stream on stdout.

The inputs are typically the per-order outputs of the discounting stages or
of float-counts-prune.  Histories are expected to be distinct across inputs;
as the one exception, identical histories are allowed when their counts are
pointwise identical, in which case one copy is written (this arises when a
model has been split by history word for parallelism and the shared order-1
state is duplicated across the splits)."#
)]
struct Opt {
    /// Input float-count files, each individually sorted.
    #[structopt(name = "float-counts", required = true)]
    inputs: Vec<PathBuf>,
}

struct FloatCountMerger {
    inputs: Vec<BufReader<File>>,
    lm_states: Vec<FloatLmState>,
    num_lm_states_read: Vec<u64>,
    num_ngrams_written: Vec<u64>,
    hist_to_sources: BTreeMap<Vec<i32>, Vec<usize>>,
}

impl FloatCountMerger {
    fn new(paths: &[PathBuf]) -> io::Result<FloatCountMerger> {
        let mut merger = FloatCountMerger {
            inputs: Vec::with_capacity(paths.len()),
            lm_states: vec![FloatLmState::default(); paths.len()],
            num_lm_states_read: vec![0; paths.len()],
            num_ngrams_written: Vec::new(),
            hist_to_sources: BTreeMap::new(),
        };
        for path in paths {
            merger.inputs.push(open_input(path)?);
        }
        for i in 0..paths.len() {
            merger.read_stream(i)?;
        }
        Ok(merger)
    }

    fn read_stream(&mut self, i: usize) -> io::Result<()> {
        if at_eof(&mut self.inputs[i])? {
            return Ok(());
        }
        self.lm_states[i] = FloatLmState::read(&mut self.inputs[i])?;
        self.num_lm_states_read[i] += 1;
        self.hist_to_sources
            .entry(self.lm_states[i].history.clone())
            .or_insert_with(Vec::new)
            .push(i);
        Ok(())
    }

    fn output_state<W: Write>(&mut self, output: &mut W) -> io::Result<()> {
        let hist = self.hist_to_sources.keys().next().unwrap().clone();
        let sources = self.hist_to_sources.remove(&hist).unwrap();
        if hist.len() + 1 > self.num_ngrams_written.len() {
            self.num_ngrams_written.resize(hist.len() + 1, 0);
        }
        let first = &self.lm_states[sources[0]];
        for &other in &sources[1..] {
            assert!(
                self.lm_states[other].counts == first.counts,
                "merge-float-counts: multiple inputs have the same history state \
                 but the counts are not identical"
            );
        }
        self.num_ngrams_written[hist.len()] += first.counts.len() as u64;
        first.write(output)?;
        for s in sources {
            self.read_stream(s)?;
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

    let mut merger = FloatCountMerger::new(&opt.inputs)?;
    let stdout = io::stdout();
    let mut output = BufWriter::new(stdout.lock());
    while !merger.hist_to_sources.is_empty() {
        merger.output_state(&mut output)?;
    }
    output.flush()?;

    let states_total: u64 = merger.num_lm_states_read.iter().sum();
    let ngrams_total: u64 = merger.num_ngrams_written.iter().sum();
    info!(
        "merge-float-counts: read {} = {} LM states, wrote {} = {} individual n-grams.",
        merger
            .num_lm_states_read
            .iter()
            .map(|n| n.to_string())
            .collect::<Vec<_>>()
            .join(" + "),
        states_total,
        merger
            .num_ngrams_written
            .iter()
            .map(|n| n.to_string())
            .collect::<Vec<_>>()
            .join(" + "),
        ngrams_total
    );
    Ok(())
}
