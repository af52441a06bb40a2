use std::error::Error;
use std::io::Write;
use std::path::PathBuf;

use log::info;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use structopt::StructOpt;

use smoothlm::{at_eof, create_output, open_input, Count, GeneralLmStateDerivs};

#[derive(StructOpt)]
#[structopt(
    about = r#"Randomly perturb general counts; part of the gradient-check
harness.

Like perturb-float-counts but for general counts: each of top1, top2, top3
and total of every Count is independently scaled by 1 + delta*u with u
uniform in [-0.5, 0.5) and hard-coded delta = 1.0e-3, keeping total >= top1
+ top2 + top3.  The predicted objective change, the Count inner product of
the perturbation with the supplied derivatives, goes to stdout."#
)]
struct Opt {
    /// Seed for the random perturbation.
    #[structopt(name = "seed")]
    seed: u64,

    /// General counts to perturb.
    #[structopt(name = "counts-in")]
    counts_in: PathBuf,

    /// Derivatives w.r.t. those counts.
    #[structopt(name = "derivs-in")]
    derivs_in: PathBuf,

    /// Output for the perturbed counts.
    #[structopt(name = "counts-out")]
    counts_out: PathBuf,
}

// delta controls how much the counts move; it is hard-coded.
const DELTA: f32 = 1.0e-3;

fn perturb_one(rng: &mut StdRng, value: &mut f32) {
    let relative_change: f32 = DELTA * ((rng.gen_range(0..100) - 50) as f32 / 100.0);
    *value += *value * relative_change;
}

fn perturb_count(rng: &mut StdRng, deriv: &Count, count: &mut Count) -> f64 {
    let old_dot = deriv.dot(count);
    perturb_one(rng, &mut count.top1);
    perturb_one(rng, &mut count.top2);
    perturb_one(rng, &mut count.top3);
    perturb_one(rng, &mut count.total);
    // the total cannot be less than the pieces it contains.
    let top = count.top1 + count.top2 + count.top3;
    if count.total < top {
        count.total = top;
    }
    (deriv.dot(count) - old_dot) as f64
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
        let mut lm_state = GeneralLmStateDerivs::read(&mut counts_input)?;
        lm_state.read_derivs(&mut derivs_input)?;

        for i in 0..lm_state.state.counts.len() {
            let deriv = lm_state.count_derivs[i];
            tot_objf_change +=
                perturb_count(&mut rng, &deriv, &mut lm_state.state.counts[i].1);
        }
        lm_state.state.write(&mut counts_output)?;

        num_lm_states += 1;
        num_counts += lm_state.state.counts.len() as u64;
    }
    counts_output.flush()?;

    info!(
        "perturb-counts: perturbed {} LM states, with {} individual n-grams; \
         delta = {}, predicted-objf-change = {}",
        num_lm_states, num_counts, DELTA, tot_objf_change
    );
    println!("{}", tot_objf_change);
    Ok(())
}
