use std::error::Error;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use log::info;
use structopt::StructOpt;

use smoothlm::{at_eof, open_input, GeneralLmStateDerivs};

#[derive(StructOpt)]
#[structopt(
    about = r#"Sum general-count derivative files of identical structure.

All derivative inputs must correspond to the same counts file (same states,
same count slots); the summed derivatives go to stdout.  This is what joins
the per-split order-1 derivatives back together when the objective and
derivatives were computed over a model split by history word."#
)]
struct Opt {
    /// The counts the derivatives belong to.
    #[structopt(name = "general-counts")]
    counts: PathBuf,

    /// Derivative files to sum.
    #[structopt(name = "derivs", required = true)]
    derivs: Vec<PathBuf>,
}

fn main() -> Result<(), Box<dyn Error>> {
    let opt = Opt::from_args();

    stderrlog::new()
        .verbosity(2)
        .timestamp(stderrlog::Timestamp::Second)
        .init()
        .unwrap();

    let mut counts_input = open_input(&opt.counts)?;
    let mut deriv_inputs = Vec::with_capacity(opt.derivs.len());
    for path in &opt.derivs {
        deriv_inputs.push(open_input(path)?);
    }

    let stdout = io::stdout();
    let mut output = BufWriter::new(stdout.lock());
    let mut num_lm_states = 0u64;

    while !at_eof(&mut counts_input)? {
        let mut lm_state = GeneralLmStateDerivs::read(&mut counts_input)?;
        lm_state.read_derivs(&mut deriv_inputs[0])?;
        for deriv_input in deriv_inputs.iter_mut().skip(1) {
            lm_state.read_derivs_adding(deriv_input)?;
        }
        lm_state.write_derivs(&mut output)?;
        num_lm_states += 1;
    }
    output.flush()?;

    info!(
        "sum-count-derivs: summed derivatives for {} LM states.",
        num_lm_states
    );
    Ok(())
}
