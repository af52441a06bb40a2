use std::error::Error;
use std::io::{self, BufWriter, Write};

use log::info;
use structopt::StructOpt;

use smoothlm::{
    at_eof, FloatLmState, GeneralLmState, BOS_SYMBOL, EOS_SYMBOL, UNIGRAM_D1, UNIGRAM_D2,
    UNIGRAM_D3, UNK_PROPORTION, UNK_SYMBOL,
};

#[derive(StructOpt)]
#[structopt(
    about = r#"Discount n-gram counts of order 1.

Vocabularies are typically chosen in ways that break the assumptions needed
to estimate unigram discounting from data (e.g. keeping only words above some
training count), so order 1 uses fixed constants: 0.75, 0.25 and 0.1 of the
first, second and third largest count pieces are removed.  Half of the
removed mass goes to <unk> (on top of any data-derived <unk> counts); the
other half is spread uniformly over the whole vocabulary except <s> and
<unk>.

Reads the single order-1 general-count state from stdin and writes a
float-count state with an explicit count for every word except <s> to
stdout.  The output state has discount zero: there is nothing to back off to
below unigram, so the removed mass is redistributed rather than recorded."#
)]
struct Opt {
    /// Vocabulary size (highest word-id; must cover <s>, </s> and <unk>).
    #[structopt(name = "vocab-size")]
    vocab_size: i32,
}

fn main() -> Result<(), Box<dyn Error>> {
    let opt = Opt::from_args();

    stderrlog::new()
        .verbosity(2)
        .timestamp(stderrlog::Timestamp::Second)
        .init()
        .unwrap();

    if opt.vocab_size <= 3 {
        return Err(format!(
            "discount-counts-1gram: invalid vocabulary size {}",
            opt.vocab_size
        )
        .into());
    }
    let vocab_size = opt.vocab_size;

    let stdin = io::stdin();
    let mut input = stdin.lock();
    if at_eof(&mut input)? {
        return Err("discount-counts-1gram: no input".into());
    }
    let input_lm_state = GeneralLmState::read(&mut input)?;
    if !at_eof(&mut input)? {
        return Err("discount-counts-1gram: too much input".into());
    }
    assert!(
        input_lm_state.history.is_empty(),
        "discount-counts-1gram: expected the order-1 state"
    );
    // min-counts are never applied at order 1 or 2, so no mass should have
    // been discounted into this state.
    assert_eq!(input_lm_state.discount, 0.0);

    // indexed by word; index 0 is unused.
    let mut unigram_counts = vec![0.0f32; vocab_size as usize + 1];
    let mut total_count: f64 = 0.0;
    let mut total_discount: f64 = input_lm_state.discount as f64;

    for &(word, ref count) in &input_lm_state.counts {
        assert!(word != BOS_SYMBOL, "<s> should never be predicted");
        if !(word > 0 && word <= vocab_size) {
            return Err(format!(
                "discount-counts-1gram: invalid word index {} (vs. specified vocabulary size {})",
                word, vocab_size
            )
            .into());
        }
        let discount: f32 =
            UNIGRAM_D1 * count.top1 + UNIGRAM_D2 * count.top2 + UNIGRAM_D3 * count.top3;
        assert!(discount < count.total);
        total_count += count.total as f64;
        total_discount += discount as f64;
        unigram_counts[word as usize] = count.total - discount;
    }

    let extra_count: f32 =
        (total_discount * (1.0 - UNK_PROPORTION) as f64 / (vocab_size - 2) as f64) as f32;
    let extra_unk_count: f32 = (UNK_PROPORTION as f64 * total_discount) as f32;

    info!(
        "discount-counts-1gram: total count is {}, total discount is {}, increasing unk count \
         from {} to {} and adding {} to each unigram count.",
        total_count,
        total_discount,
        unigram_counts[UNK_SYMBOL as usize],
        unigram_counts[UNK_SYMBOL as usize] + extra_unk_count,
        extra_count
    );

    unigram_counts[UNK_SYMBOL as usize] += extra_unk_count;
    for i in 1..=vocab_size {
        if i != BOS_SYMBOL && i != UNK_SYMBOL {
            unigram_counts[i as usize] += extra_count;
        }
    }

    // every word from </s> up gets an explicit count; <s> gets none.
    let mut output_lm_state = FloatLmState {
        history: Vec::new(),
        total: total_count as f32,
        discount: 0.0,
        counts: Vec::with_capacity((vocab_size - 1) as usize),
    };
    for i in EOS_SYMBOL..=vocab_size {
        let count = unigram_counts[i as usize];
        assert!(count > 0.0);
        output_lm_state.counts.push((i, count));
    }

    let stdout = io::stdout();
    let mut output = BufWriter::new(stdout.lock());
    output_lm_state.write(&mut output)?;
    output.flush()?;
    Ok(())
}
