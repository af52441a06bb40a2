use std::error::Error;
use std::io::Write;
use std::path::PathBuf;

use log::info;
use structopt::StructOpt;

use smoothlm::derivs::FloatLmStateDerivs;
use smoothlm::{
    at_eof, create_output, open_input, GeneralLmStateDerivs, EOS_SYMBOL, UNIGRAM_D1, UNIGRAM_D2,
    UNIGRAM_D3, UNK_PROPORTION, UNK_SYMBOL,
};

#[derive(StructOpt)]
#[structopt(
    about = r#"Backprop counterpart of discount-counts-1gram.

Reads the forward pass's input (<counts-in>) and output (<float-counts-in>)
together with the derivatives w.r.t. the output (<float-derivs-in>), and
writes the derivatives w.r.t. the input counts to <derivs-out>.

The redistribution in the forward pass makes the unigram probabilities
invariant to an overall scaling of the input counts, so the derivative in
the pure-scale direction comes out (numerically) zero; the gradient-check
harness uses that as a sanity test."#
)]
struct Opt {
    /// The order-1 general counts (forward input).
    #[structopt(name = "counts-in")]
    counts_in: PathBuf,

    /// The discounted unigram float-counts (forward output).
    #[structopt(name = "float-counts-in")]
    float_counts_in: PathBuf,

    /// Derivatives w.r.t. the forward output.
    #[structopt(name = "float-derivs-in")]
    float_derivs_in: PathBuf,

    /// Output for the derivatives w.r.t. <counts-in>.
    #[structopt(name = "derivs-out")]
    derivs_out: PathBuf,
}

fn main() -> Result<(), Box<dyn Error>> {
    let opt = Opt::from_args();

    stderrlog::new()
        .verbosity(2)
        .timestamp(stderrlog::Timestamp::Second)
        .init()
        .unwrap();

    let mut counts_input = open_input(&opt.counts_in)?;
    let mut input_lm_state = GeneralLmStateDerivs::read(&mut counts_input)?;

    let mut float_counts_input = open_input(&opt.float_counts_in)?;
    let mut output_lm_state = FloatLmStateDerivs::read(&mut float_counts_input)?;
    let mut float_derivs_input = open_input(&opt.float_derivs_in)?;
    output_lm_state.read_derivs(&mut float_derivs_input)?;
    if !at_eof(&mut counts_input)? || !at_eof(&mut float_counts_input)? {
        return Err("discount-counts-1gram-backward: too much input".into());
    }

    // the forward output holds one count per word from </s> up.
    let vocab_size = output_lm_state.state.counts.len() as i32 + 1;
    assert!(vocab_size > 3);

    let mut extra_count_deriv: f64 = 0.0;
    let mut extra_unk_count_deriv: f64 = 0.0;
    for i in EOS_SYMBOL..=vocab_size {
        let pos = (i - EOS_SYMBOL) as usize;
        assert_eq!(output_lm_state.state.counts[pos].0, i);
        let output_deriv = output_lm_state.count_derivs[pos];
        if i != UNK_SYMBOL {
            extra_count_deriv += output_deriv;
        } else {
            extra_unk_count_deriv = output_deriv;
        }
    }

    // the forward pass did:
    //   extra_count = total_discount * (1 - UNK_PROPORTION) / (vocab_size - 2)
    //   extra_unk_count = UNK_PROPORTION * total_discount
    let total_discount_deriv: f64 = extra_count_deriv * (1.0 - UNK_PROPORTION) as f64
        / (vocab_size - 2) as f64
        + UNK_PROPORTION as f64 * extra_unk_count_deriv;

    assert_eq!(
        input_lm_state.state.counts.len(),
        input_lm_state.count_derivs.len()
    );
    for (&(word, _), count_deriv) in input_lm_state
        .state
        .counts
        .iter()
        .zip(input_lm_state.count_derivs.iter_mut())
    {
        let pos = (word - EOS_SYMBOL) as usize;
        assert_eq!(output_lm_state.state.counts[pos].0, word);
        let output_deriv = output_lm_state.count_derivs[pos] as f32;

        // backprop through:
        //   discount = D1*top1 + D2*top2 + D3*top3
        //   total_discount += discount
        //   unigram_counts[word] = count.total - discount
        let diff_deriv: f32 = total_discount_deriv as f32 - output_deriv;
        count_deriv.top1 = UNIGRAM_D1 * diff_deriv;
        count_deriv.top2 = UNIGRAM_D2 * diff_deriv;
        count_deriv.top3 = UNIGRAM_D3 * diff_deriv;
        count_deriv.total = output_deriv;
    }

    let mut derivs_output = create_output(&opt.derivs_out)?;
    input_lm_state.write_derivs(&mut derivs_output)?;
    derivs_output.flush()?;

    info!(
        "discount-counts-1gram-backward: propagated derivatives for {} unigram counts.",
        input_lm_state.state.counts.len()
    );
    Ok(())
}
