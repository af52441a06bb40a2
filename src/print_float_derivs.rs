use std::error::Error;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use log::info;
use structopt::StructOpt;

use smoothlm::derivs::FloatLmStateDerivs;
use smoothlm::{at_eof, open_input};

#[derive(StructOpt)]
#[structopt(
    about = "Dump float-counts together with their derivatives in \
             human-readable text form, for inspection and debugging."
)]
struct Opt {
    /// The float-counts file.
    #[structopt(name = "float-counts")]
    counts: PathBuf,

    /// The matching derivatives file.
    #[structopt(name = "float-derivs")]
    derivs: PathBuf,
}

fn main() -> Result<(), Box<dyn Error>> {
    let opt = Opt::from_args();

    stderrlog::new()
        .verbosity(2)
        .timestamp(stderrlog::Timestamp::Second)
        .init()
        .unwrap();

    let mut counts_input = open_input(&opt.counts)?;
    let mut derivs_input = open_input(&opt.derivs)?;
    let stdout = io::stdout();
    let mut output = BufWriter::new(stdout.lock());

    let mut num_lm_states = 0u64;
    let mut num_counts = 0u64;
    while !at_eof(&mut counts_input)? {
        let mut lm_state = FloatLmStateDerivs::read(&mut counts_input)?;
        lm_state.read_derivs(&mut derivs_input)?;
        lm_state.print(&mut output)?;
        num_lm_states += 1;
        num_counts += lm_state.state.counts.len() as u64;
    }
    output.flush()?;

    info!(
        "print-float-derivs: printed {} LM states, with {} individual n-grams.",
        num_lm_states, num_counts
    );
    Ok(())
}
