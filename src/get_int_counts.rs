use std::error::Error;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use log::info;
use structopt::StructOpt;

use smoothlm::{create_output, IntLmState};

#[derive(StructOpt)]
#[structopt(
    about = r#"Compile text-form counts into binary int-counts.

The input (stdin) is the output of `get-text-counts | LC_ALL=C sort | uniq -c`:
lines of the form "   <count> <reversed-history..> <predicted-word>".  Because
of the sort, all lines sharing a history arrive together, so this tool just
accumulates one IntLmState at a time and writes it when the history changes.

Given one output path per order, counts are split by order (history length
plus one); order splitting exists because the only n-grams of less than the
full order come from sentence-edge effects.  Given a single output path, all
orders go to the same file (they would be out of sorted order with respect to
each other, so only do this when the downstream tool re-merges)."#
)]
struct Opt {
    /// One output file per n-gram order, lowest order first; or a single
    /// output file for all orders together.
    #[structopt(name = "output", required = true)]
    outputs: Vec<PathBuf>,
}

fn main() -> Result<(), Box<dyn Error>> {
    let opt = Opt::from_args();

    stderrlog::new()
        .verbosity(2)
        .timestamp(stderrlog::Timestamp::Second)
        .init()
        .unwrap();

    let num_outputs = opt.outputs.len();
    let mut outputs = Vec::with_capacity(num_outputs);
    for path in &opt.outputs {
        outputs.push(create_output(path)?);
    }

    let stdin = io::stdin();
    let input = stdin.lock();

    let mut num_states_written = 0u64;
    let mut num_counts = 0u64;
    let mut first_time = true;
    let mut lm_state = IntLmState::default();
    let mut wseq: Vec<i32> = Vec::new();

    for line in input.lines() {
        let line = line?;
        let mut fields = line.split_whitespace();
        let count: i32 = fields
            .next()
            .and_then(|f| f.parse().ok())
            .filter(|&c| c > 0)
            .ok_or_else(|| format!("get-int-counts: bad input line '{}'", line))?;
        wseq.clear();
        for field in fields {
            let word: i32 = field
                .parse()
                .map_err(|_| format!("get-int-counts: bad input line '{}'", line))?;
            wseq.push(word);
        }
        let predicted_word = wseq
            .pop()
            .ok_or_else(|| format!("get-int-counts: bad input line '{}'", line))?;
        if wseq.len() >= num_outputs && num_outputs != 1 {
            return Err(format!(
                "get-int-counts: bad line for n-gram order {}: '{}'",
                num_outputs, line
            )
            .into());
        }

        if lm_state.history != wseq || first_time {
            if !first_time {
                let output_index = if num_outputs == 1 {
                    0
                } else {
                    lm_state.history.len()
                };
                lm_state.write(&mut outputs[output_index])?;
                num_states_written += 1;
            }
            first_time = false;
            lm_state.init(&wseq);
        }
        lm_state.add_count(predicted_word, count);
        num_counts += 1;
    }

    if first_time {
        return Err("get-int-counts: processed no data".into());
    }
    let output_index = if num_outputs == 1 {
        0
    } else {
        lm_state.history.len()
    };
    lm_state.write(&mut outputs[output_index])?;
    num_states_written += 1;

    for mut output in outputs {
        output.flush()?;
    }
    info!(
        "get-int-counts: processed {} LM states, with {} individual n-grams.",
        num_states_written, num_counts
    );
    Ok(())
}
