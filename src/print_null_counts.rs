use std::error::Error;
use std::io::{self, BufWriter, Write};

use log::info;
use structopt::StructOpt;

use smoothlm::{at_eof, NullLmState};

#[derive(StructOpt)]
#[structopt(
    about = "Dump null-counts (as written by histories-to-null-counts) from \
             stdin in human-readable text form, for inspection and debugging."
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
    let mut num_predicted = 0u64;
    while !at_eof(&mut input)? {
        let lm_state = NullLmState::read(&mut input)?;
        lm_state.print(&mut output)?;
        num_lm_states += 1;
        num_predicted += lm_state.predicted.len() as u64;
    }
    output.flush()?;

    info!(
        "print-null-counts: printed {} LM states, with {} individual n-grams.",
        num_lm_states, num_predicted
    );
    Ok(())
}
