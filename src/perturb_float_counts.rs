use std::error::Error;
use std::io::Write;
use std::path::PathBuf;

use log::info;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use structopt::StructOpt;

use smoothlm::derivs::FloatLmStateDerivs;
use smoothlm::{at_eof, create_output, open_input};

#[derive(StructOpt)]
#[structopt(
    about = r#"Randomly perturb float-counts; part of the gradient-check
harness.

Each count (and each discount) is multiplied by 1 + delta*u with u uniform in
[-0.5, 0.5) and hard-coded delta = 5.0e-3, the state totals are recomputed,
and the perturbed counts are written out.  The predicted change in the
objective function, the inner product of the perturbation with the supplied
derivatives, is printed to stdout; re-running compute-probs on the perturbed
counts and differencing should reproduce it to within the curvature of the
objective (about four decimal places at these magnitudes)."#
)]
struct Opt {
    /// Seed for the random perturbation.
    #[structopt(name = "seed")]
    seed: u64,

    /// Float-counts to perturb.
    #[structopt(name = "float-counts-in")]
    counts_in: PathBuf,

    /// Derivatives w.r.t. those counts (from compute-probs).
    #[structopt(name = "float-derivs-in")]
    derivs_in: PathBuf,

    /// Output for the perturbed counts.
    #[structopt(name = "float-counts-out")]
    counts_out: PathBuf,
}

// delta controls how much the counts move; it is hard-coded.
const DELTA: f32 = 5.0e-3;

fn perturb_count(rng: &mut StdRng, deriv: f64, count: &mut f32) -> f64 {
    let relative_change: f32 = DELTA * ((rng.gen_range(0..100) - 50) as f32 / 100.0);
    let this_change = *count * relative_change;
    *count += this_change;
    deriv * this_change as f64
}

fn main() -> Result<(), Box<dyn Error>> {
    let opt = Opt::from_args();

    stderrlog::new()
        .verbosity(2)
        .timestamp(stderrlog::Timestamp::Second)
        .init()
        .unwrap();

    let mut rng = StdRng::seed_from_u64(opt.seed);
    let mut counts_input = open_input(&opt.counts_in)?;
    let mut derivs_input = open_input(&opt.derivs_in)?;
    let mut counts_output = create_output(&opt.counts_out)?;

    let mut num_lm_states = 0u64;
    let mut num_counts = 0u64;
    let mut tot_objf_change: f64 = 0.0;

    while !at_eof(&mut derivs_input)? {
        let mut lm_state = FloatLmStateDerivs::read(&mut counts_input)?;
        lm_state.read_derivs(&mut derivs_input)?;
        assert_eq!(lm_state.total_deriv, 0.0);

        tot_objf_change +=
            perturb_count(&mut rng, lm_state.discount_deriv, &mut lm_state.state.discount);
        for i in 0..lm_state.state.counts.len() {
            tot_objf_change += perturb_count(
                &mut rng,
                lm_state.count_derivs[i],
                &mut lm_state.state.counts[i].1,
            );
        }
        lm_state.state.compute_total();
        lm_state.state.write(&mut counts_output)?;

        num_lm_states += 1;
        num_counts += lm_state.state.counts.len() as u64;
    }
    counts_output.flush()?;

    info!(
        "perturb-float-counts: perturbed {} LM states, with {} individual n-grams; \
         delta = {}, predicted-objf-change = {}",
        num_lm_states, num_counts, DELTA, tot_objf_change
    );
    println!("{}", tot_objf_change);
    Ok(())
}
