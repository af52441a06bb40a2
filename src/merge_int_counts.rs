use std::collections::BTreeMap;
use std::error::Error;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::PathBuf;

use log::info;
use structopt::StructOpt;

use smoothlm::{at_eof, merge_int_lm_states, open_input, IntLmState};

#[derive(StructOpt)]
#[structopt(
    about = r#"K-way merge of sorted int-count streams.

Reads int-counts (as written by get-int-counts) from each input file and
writes a single sorted stream to stdout.  When the same history appears in
more than one input, the per-word counts are summed (and min-count discount
mass is summed too), so merging a file with itself doubles every count."#
)]
struct Opt {
    /// Input int-count files, each individually sorted.
    #[structopt(name = "int-counts", required = true)]
    inputs: Vec<PathBuf>,
}

struct IntCountMerger {
    inputs: Vec<BufReader<File>>,
    lm_states: Vec<IntLmState>,
    num_lm_states_read: Vec<u64>,
    // history -> indexes of the sources whose pending state has it.
    hist_to_sources: BTreeMap<Vec<i32>, Vec<usize>>,
}

impl IntCountMerger {
    fn new(paths: &[PathBuf]) -> io::Result<IntCountMerger> {
        let mut merger = IntCountMerger {
            inputs: Vec::with_capacity(paths.len()),
            lm_states: vec![IntLmState::default(); paths.len()],
            num_lm_states_read: vec![0; paths.len()],
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
        self.lm_states[i] = IntLmState::read(&mut self.inputs[i])?;
        self.num_lm_states_read[i] += 1;
        self.hist_to_sources
            .entry(self.lm_states[i].history.clone())
            .or_insert_with(Vec::new)
            .push(i);
        Ok(())
    }

    // Writes the lexicographically first pending history, merging if it is
    // present in more than one source, then refills the sources consumed.
    fn output_state<W: Write>(&mut self, output: &mut W) -> io::Result<()> {
        let hist = self.hist_to_sources.keys().next().unwrap().clone();
        let sources = self.hist_to_sources.remove(&hist).unwrap();
        if sources.len() == 1 {
            self.lm_states[sources[0]].write(output)?;
        } else {
            let source_states: Vec<&IntLmState> =
                sources.iter().map(|&s| &self.lm_states[s]).collect();
            merge_int_lm_states(&source_states).write(output)?;
        }
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

    let mut merger = IntCountMerger::new(&opt.inputs)?;
    let stdout = io::stdout();
    let mut output = BufWriter::new(stdout.lock());
    while !merger.hist_to_sources.is_empty() {
        merger.output_state(&mut output)?;
    }
    output.flush()?;

    let total: u64 = merger.num_lm_states_read.iter().sum();
    info!(
        "merge-int-counts: read {} = {} LM states.",
        merger
            .num_lm_states_read
            .iter()
            .map(|n| n.to_string())
            .collect::<Vec<_>>()
            .join(" + "),
        total
    );
    Ok(())
}
