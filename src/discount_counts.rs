use std::error::Error;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use log::info;
use structopt::StructOpt;

use smoothlm::{
    at_eof, create_output, Count, FloatLmState, GeneralLmState, GeneralLmStateBuilder,
};

#[derive(StructOpt)]
#[structopt(
    about = r#"Discount n-gram counts of order > 1.

This is a generalization of modified Kneser-Ney discounting (Goodman, "A Bit
of Progress in Language Modeling") to counts that are weighted mixtures
rather than raw integers: instead of counts-of-counts, each count carries its
three largest pieces exactly, and we remove the proportions D1, D2, D3 of
those pieces plus D4 of everything below the top three.  Required:
1 >= D1 >= D2 >= D3 >= D4 >= 0.

Reads sorted general counts of a single order from stdin.  Writes the
discounted states as float-counts to <discounted-counts-out>, and the removed
mass, aggregated over the one-shorter backoff history, as general counts to
<discount-counts-out> (the removed pieces stay separate in the lower order,
so the next round of discounting still sees them individually).

Every per-count quantity here is computed in f32 with one rounding per named
subexpression; discount-counts-backward recomputes the same bindings and
relies on bit-identical equality to re-identify which top pieces of the
aggregated backoff count came from which source."#
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

    /// Output for the discounted float-counts (same order as the input).
    #[structopt(name = "discounted-counts-out")]
    discounted_out: PathBuf,

    /// Output for the removed mass, aggregated by backoff history
    /// (one order lower than the input).
    #[structopt(name = "discount-counts-out")]
    discount_out: PathBuf,
}

struct CountDiscounter {
    d1: f32,
    d2: f32,
    d3: f32,
    d4: f32,
    discounted_output: BufWriter<File>,
    discount_output: BufWriter<File>,
    // the backoff history whose removed mass is being aggregated, and the
    // aggregation itself; flushed whenever the backoff history changes.
    discount_history: Vec<i32>,
    discount_builder: GeneralLmStateBuilder,
    num_lm_states_processed: u64,
}

impl CountDiscounter {
    fn process_lm_state(
        &mut self,
        first_time: bool,
        lm_state: &GeneralLmState,
    ) -> io::Result<()> {
        self.num_lm_states_processed += 1;
        if self.discount_history.len() + 1 != lm_state.history.len() {
            if first_time {
                assert!(
                    !lm_state.history.is_empty(),
                    "discount-counts should not be applied to 1-gram input"
                );
                let backoff_size = lm_state.history.len() - 1;
                self.discount_history
                    .extend_from_slice(&lm_state.history[..backoff_size]);
            } else {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "discount-counts: input seems to have differing n-gram orders",
                ));
            }
        }
        let backoff_size = self.discount_history.len();
        if self.discount_history.as_slice() != &lm_state.history[..backoff_size] {
            // the backoff history changed (histories being reversed, backing
            // off removes the right-most element, so the backoff history is a
            // prefix of the state's history).
            self.output_discount_stats()?;
            self.discount_history.clear();
            self.discount_history
                .extend_from_slice(&lm_state.history[..backoff_size]);
        }

        let mut discounted_state = FloatLmState {
            history: lm_state.history.clone(),
            total: 0.0,
            discount: 0.0,
            counts: Vec::with_capacity(lm_state.counts.len()),
        };
        let mut lm_state_total: f64 = 0.0;
        let mut discount_total: f64 = 0.0;
        for &(word, ref count) in &lm_state.counts {
            let top4plus: f32 = count.total - count.top1 - count.top2 - count.top3;
            let d1: f32 = self.d1 * count.top1;
            let d2: f32 = self.d2 * count.top2;
            let d3: f32 = self.d3 * count.top3;
            let d4: f32 = self.d4 * top4plus;
            let d: f32 = d1 + d2 + d3 + d4;
            // the up-to-3 removed pieces remain separate in the lower order.
            let removed = Count {
                total: d,
                top1: d1,
                top2: d2,
                top3: d3,
            };
            self.discount_builder.add_count(word, &removed);
            lm_state_total += count.total as f64;
            discount_total += d as f64;
            discounted_state.counts.push((word, count.total - d));
        }
        // min-count mass already sitting in this state's discount carries
        // straight through to the discounted state.
        discounted_state.total = (lm_state.discount as f64 + lm_state_total) as f32;
        discounted_state.discount = (lm_state.discount as f64 + discount_total) as f32;
        discounted_state.write(&mut self.discounted_output)
    }

    fn output_discount_stats(&mut self) -> io::Result<()> {
        let backoff_state = GeneralLmState {
            history: self.discount_history.clone(),
            discount: 0.0,
            counts: self.discount_builder.output(),
        };
        backoff_state.write(&mut self.discount_output)?;
        self.discount_builder.clear();
        Ok(())
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
            return Err("discount-counts: discounting constants must be in [0, 1]".into());
        }
    }
    if !(opt.d1 >= opt.d2 && opt.d2 >= opt.d3 && opt.d3 >= opt.d4) {
        return Err("discount-counts: need D1 >= D2 >= D3 >= D4".into());
    }

    let mut discounter = CountDiscounter {
        d1: opt.d1,
        d2: opt.d2,
        d3: opt.d3,
        d4: opt.d4,
        discounted_output: create_output(&opt.discounted_out)?,
        discount_output: create_output(&opt.discount_out)?,
        discount_history: Vec::new(),
        discount_builder: GeneralLmStateBuilder::new(),
        num_lm_states_processed: 0,
    };

    let stdin = io::stdin();
    let mut input = stdin.lock();
    let mut first_time = true;
    while !at_eof(&mut input)? {
        let lm_state = GeneralLmState::read(&mut input)?;
        discounter.process_lm_state(first_time, &lm_state)?;
        first_time = false;
    }
    if first_time {
        return Err("discount-counts: processed no data".into());
    }
    // flush the last backoff state's discount stats.
    discounter.output_discount_stats()?;
    discounter.discounted_output.flush()?;
    discounter.discount_output.flush()?;

    info!(
        "discount-counts: processed {} LM states.",
        discounter.num_lm_states_processed
    );
    Ok(())
}
