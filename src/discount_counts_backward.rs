use std::error::Error;
use std::io::Write;
use std::path::PathBuf;

use log::info;
use structopt::StructOpt;

use smoothlm::{at_eof, create_output, is_prefix_of, open_input, Count, GeneralLmStateDerivs};
use smoothlm::derivs::FloatLmStateDerivs;

#[derive(StructOpt)]
#[structopt(
    about = r#"Backprop counterpart of discount-counts.

Re-reads the original general counts together with both outputs of the
forward pass (the discounted float-counts and the aggregated backoff counts)
and the derivatives w.r.t. those outputs, and produces the derivatives
w.r.t. the original counts (written to <derivs-out>) and w.r.t. the four
discounting constants (printed on one stdout line as dD1 dD2 dD3 dD4).

The per-count quantities top4plus, d1..d4 and d are recomputed here with the
same f32 bindings as the forward pass; re-identifying which top pieces of an
aggregated backoff count came from this state relies on those values being
bit-identical."#
)]
struct Opt {
    #[structopt(name = "D1")]
    d1: f32,
    #[structopt(name = "D2")]
    d2: f32,
    #[structopt(name = "D3")]
    d3: f32,
    #[structopt(name = "D4")]
    d4: f32,

    /// The original general counts (forward input).
    #[structopt(name = "counts-in")]
    counts_in: PathBuf,

    /// The discounted float-counts written by the forward pass.
    #[structopt(name = "discounted-float-counts-in")]
    discounted_counts_in: PathBuf,

    /// Derivatives w.r.t. the discounted float-counts.
    #[structopt(name = "discounted-float-derivs-in")]
    discounted_derivs_in: PathBuf,

    /// The aggregated backoff counts written by the forward pass.
    #[structopt(name = "backoff-counts-in")]
    backoff_counts_in: PathBuf,

    /// Derivatives w.r.t. the backoff counts.
    #[structopt(name = "backoff-derivs-in")]
    backoff_derivs_in: PathBuf,

    /// Output for the derivatives w.r.t. the original counts.
    #[structopt(name = "derivs-out")]
    derivs_out: PathBuf,
}

// Ensures the top1..top3 derivatives of a fully processed backoff state have
// all been propagated.  A nonzero deriv is tolerated where the corresponding
// value is zero: derivatives around zero pieces are not well defined and
// never influence the final application.
fn check_derivs_used(state: &GeneralLmStateDerivs) {
    for (&(_, ref count), deriv) in state.state.counts.iter().zip(&state.count_derivs) {
        assert!(
            (deriv.top1 == 0.0 || count.top1 == 0.0)
                && (deriv.top2 == 0.0 || count.top2 == 0.0)
                && (deriv.top3 == 0.0 || count.top3 == 0.0),
            "some derivatives were not accounted for"
        );
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let opt = Opt::from_args();

    stderrlog::new()
        .verbosity(2)
        .timestamp(stderrlog::Timestamp::Second)
        .init()
        .unwrap();

    for &d in &[opt.d1, opt.d2, opt.d3, opt.d4] {
        if !(d >= 0.0 && d <= 1.0) {
            return Err(
                "discount-counts-backward: discounting constants must be in [0, 1]".into(),
            );
        }
    }
    if !(opt.d1 >= opt.d2 && opt.d2 >= opt.d3 && opt.d3 >= opt.d4) {
        return Err("discount-counts-backward: need D1 >= D2 >= D3 >= D4".into());
    }

    let mut count_stream = open_input(&opt.counts_in)?;
    let mut discounted_count_stream = open_input(&opt.discounted_counts_in)?;
    let mut discounted_deriv_stream = open_input(&opt.discounted_derivs_in)?;
    let mut backoff_count_stream = open_input(&opt.backoff_counts_in)?;
    let mut backoff_deriv_stream = open_input(&opt.backoff_derivs_in)?;
    let mut deriv_stream = create_output(&opt.derivs_out)?;

    let mut d1_deriv: f64 = 0.0;
    let mut d2_deriv: f64 = 0.0;
    let mut d3_deriv: f64 = 0.0;
    let mut d4_deriv: f64 = 0.0;
    let mut num_lm_states_processed = 0u64;

    // the lower-order backoff state with its derivatives, plus a
    // word -> position lookup into its counts (entries for absent words are
    // stale and are verified before use).
    let mut backoff_lm_state = GeneralLmStateDerivs::default();
    let mut word_map: Vec<usize> = Vec::new();

    while !at_eof(&mut count_stream)? {
        let mut input_lm_state = GeneralLmStateDerivs::read(&mut count_stream)?;
        let mut discounted_lm_state = FloatLmStateDerivs::read(&mut discounted_count_stream)?;
        discounted_lm_state.read_derivs(&mut discounted_deriv_stream)?;

        if backoff_lm_state.state.history.len() + 1 != input_lm_state.state.history.len()
            || !is_prefix_of(&backoff_lm_state.state.history, &input_lm_state.state.history)
            || backoff_lm_state.state.counts.is_empty()
        {
            check_derivs_used(&backoff_lm_state);
            backoff_lm_state = GeneralLmStateDerivs::read(&mut backoff_count_stream)?;
            backoff_lm_state.read_derivs(&mut backoff_deriv_stream)?;
            for (pos, &(word, _)) in backoff_lm_state.state.counts.iter().enumerate() {
                let word = word as usize;
                if word >= word_map.len() {
                    word_map.resize(word + 1, 0);
                }
                word_map[word] = pos;
            }
        }

        num_lm_states_processed += 1;
        assert_eq!(
            discounted_lm_state.state.counts.len(),
            input_lm_state.state.counts.len()
        );

        // derivative w.r.t. the total backoff mass of this state; the input
        // state's own discount (min-count mass) was added straight into the
        // discounted state's discount in the forward pass.
        let total_backoff_count_deriv = discounted_lm_state.discount_deriv as f32;
        input_lm_state.discount_deriv = discounted_lm_state.discount_deriv as f32;

        let mut d1_deriv_part: f64 = 0.0;
        let mut d2_deriv_part: f64 = 0.0;
        let mut d3_deriv_part: f64 = 0.0;
        let mut d4_deriv_part: f64 = 0.0;

        for (i, &(word, ref count)) in input_lm_state.state.counts.iter().enumerate() {
            // derivative w.r.t. the discounted count of this word.
            let discounted_deriv = discounted_lm_state.count_derivs[i] as f32;
            assert!(
                (word as usize) < word_map.len()
                    && word_map[word as usize] < backoff_lm_state.state.counts.len()
                    && backoff_lm_state.state.counts[word_map[word as usize]].0 == word
            );
            let backoff_pos = word_map[word as usize];
            let backoff_count = backoff_lm_state.state.counts[backoff_pos].1;
            let backoff_deriv = &mut backoff_lm_state.count_derivs[backoff_pos];

            // the forward pass's bindings, recomputed bit-for-bit.
            let top4plus: f32 = count.total - count.top1 - count.top2 - count.top3;
            let d1: f32 = opt.d1 * count.top1;
            let d2: f32 = opt.d2 * count.top2;
            let d3: f32 = opt.d3 * count.top3;
            let d4: f32 = opt.d4 * top4plus;
            let d: f32 = d1 + d2 + d3 + d4;

            // backprop through "discounted_count = count.total - d" and
            // "discount_total += d".
            let d_deriv: f32 = total_backoff_count_deriv - discounted_deriv;
            let deriv = &mut input_lm_state.count_derivs[i];
            deriv.total = discounted_deriv;

            // the removed piece that the forward pass aggregated with
            // backoff_count.add(&removed).
            let removed = Count {
                total: d,
                top1: d1,
                top2: d2,
                top3: d3,
            };
            let mut removed_deriv = Count::zero();
            backoff_count.add_backward(&removed, backoff_deriv, &mut removed_deriv);

            // removed.total = d1 + d2 + d3 + d4, so the derivative w.r.t.
            // removed.total flows back to each of them alongside d_deriv.
            let d1_full: f32 = removed_deriv.top1 + removed_deriv.total + d_deriv;
            let d2_full: f32 = removed_deriv.top2 + removed_deriv.total + d_deriv;
            let d3_full: f32 = removed_deriv.top3 + removed_deriv.total + d_deriv;
            let d4_full: f32 = removed_deriv.total + d_deriv;

            // backprop through "d1 = D1 * count.top1" etc.
            d1_deriv_part += (count.top1 * d1_full) as f64;
            d2_deriv_part += (count.top2 * d2_full) as f64;
            d3_deriv_part += (count.top3 * d3_full) as f64;
            d4_deriv_part += (top4plus * d4_full) as f64;

            // top4plus = total - top1 - top2 - top3.
            let top4plus_deriv: f32 = d4_full * opt.d4;
            deriv.top1 = d1_full * opt.d1 - top4plus_deriv;
            deriv.top2 = d2_full * opt.d2 - top4plus_deriv;
            deriv.top3 = d3_full * opt.d3 - top4plus_deriv;
            deriv.total += top4plus_deriv;
        }
        d1_deriv += d1_deriv_part;
        d2_deriv += d2_deriv_part;
        d3_deriv += d3_deriv_part;
        d4_deriv += d4_deriv_part;

        input_lm_state.write_derivs(&mut deriv_stream)?;
    }
    check_derivs_used(&backoff_lm_state);
    deriv_stream.flush()?;

    info!(
        "discount-counts-backward: processed {} LM states.",
        num_lm_states_processed
    );
    println!("{} {} {} {}", d1_deriv, d2_deriv, d3_deriv, d4_deriv);
    Ok(())
}
