use std::error::Error;
use std::io::{self, BufWriter, Write};

use log::info;
use structopt::StructOpt;

use smoothlm::{at_eof, FloatLmState};

#[derive(StructOpt)]
#[structopt(
    about = r#"Copy float-counts from stdin to stdout, dropping zero-valued
counts and states left with no counts at all.

Pruning and re-estimation leave the model structurally intact, just with
zeros in the pruned slots; this is the pass that actually shrinks it.
Running it twice gives byte-identical output."#
)]
struct Opt {}

fn main() -> Result<(), Box<dyn Error>> {
    let _opt = Opt::from_args();

    stderrlog::new()
        .verbosity(2)
        .timestamp(stderrlog::Timestamp::Second)
        .init()
        .unwrap();

    let stdin = io::stdin();
    let mut input = stdin.lock();
    let stdout = io::stdout();
    let mut output = BufWriter::new(stdout.lock());

    let mut num_lm_states_in = 0u64;
    let mut num_lm_states_out = 0u64;
    let mut num_counts_in = 0u64;
    let mut num_counts_out = 0u64;

    while !at_eof(&mut input)? {
        let mut lm_state = FloatLmState::read(&mut input)?;
        num_lm_states_in += 1;
        num_counts_in += lm_state.counts.len() as u64;
        lm_state.counts.retain(|&(_, count)| count != 0.0);
        if !lm_state.counts.is_empty() {
            num_lm_states_out += 1;
            num_counts_out += lm_state.counts.len() as u64;
            lm_state.write(&mut output)?;
        }
    }
    output.flush()?;

    info!(
        "float-counts-remove-zeros: reduced LM states from {} to {} and counts from {} to {}.",
        num_lm_states_in, num_lm_states_out, num_counts_in, num_counts_out
    );
    Ok(())
}
