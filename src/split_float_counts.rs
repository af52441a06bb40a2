use std::error::Error;
use std::io::{self, Write};
use std::path::PathBuf;

use log::info;
use structopt::StructOpt;

use smoothlm::{at_eof, create_output, FloatLmState};

#[derive(StructOpt)]
#[structopt(
    about = r#"Split float-counts by the most recent history word.

Each state goes to output number (most-recent-history-word mod
number-of-outputs); the empty-history (unigram) state is duplicated to every
output, which is what lets merge-float-counts join the pieces back together
(it accepts duplicated histories when the counts are identical).  Splitting
this way keeps each piece self-contained for compute-probs: all backoff
states of a history land in the same piece, so evaluation results are
unchanged by a split/merge round trip."#
)]
struct Opt {
    /// Output files; reads float-counts from stdin.
    #[structopt(name = "output", required = true)]
    outputs: Vec<PathBuf>,
}

fn main() -> Result<(), Box<dyn Error>> {
    let opt = Opt::from_args();

    stderrlog::new()
        .verbosity(2)
        .timestamp(stderrlog::Timestamp::Second)
        .init()
        .unwrap();

    let num_outputs = opt.outputs.len();
    let mut outputs = Vec::with_capacity(num_outputs);
    for path in &opt.outputs {
        outputs.push(create_output(path)?);
    }

    let stdin = io::stdin();
    let mut input = stdin.lock();
    let mut num_states_written = 0u64;
    let mut counts_written_per_output = vec![0u64; num_outputs];

    while !at_eof(&mut input)? {
        let lm_state = FloatLmState::read(&mut input)?;
        num_states_written += 1;
        if lm_state.history.is_empty() {
            for (output, written) in outputs.iter_mut().zip(&mut counts_written_per_output) {
                lm_state.write(output)?;
                *written += lm_state.counts.len() as u64;
            }
        } else {
            let most_recent_history_word = lm_state.history[0];
            assert!(most_recent_history_word > 0);
            let output = most_recent_history_word as usize % num_outputs;
            counts_written_per_output[output] += lm_state.counts.len() as u64;
            lm_state.write(&mut outputs[output])?;
        }
    }
    for output in &mut outputs {
        output.flush()?;
    }

    info!(
        "split-float-counts: processed {} LM states, with the counts for each output \
         respectively as: {}",
        num_states_written,
        counts_written_per_output
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join(" ")
    );
    Ok(())
}
