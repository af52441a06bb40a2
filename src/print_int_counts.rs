use std::error::Error;
use std::io::{self, BufWriter, Write};

use log::info;
use structopt::StructOpt;

use smoothlm::{at_eof, IntLmState};

#[derive(StructOpt)]
#[structopt(
    about = "Dump int-counts from stdin in human-readable text form, for \
             inspection and debugging."
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

    let mut num_lm_states = 0u64;
    let mut num_counts = 0u64;
    while !at_eof(&mut input)? {
        let lm_state = IntLmState::read(&mut input)?;
        lm_state.check();
        lm_state.print(&mut output)?;
        num_lm_states += 1;
        num_counts += lm_state.counts.len() as u64;
    }
    output.flush()?;

    info!(
        "print-int-counts: printed {} LM states, with {} individual n-grams.",
        num_lm_states, num_counts
    );
    Ok(())
}
