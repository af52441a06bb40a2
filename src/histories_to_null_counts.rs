use std::error::Error;
use std::io::{self, BufRead, BufWriter, Write};

use log::info;
use structopt::StructOpt;

use smoothlm::NullLmState;

#[derive(StructOpt)]
#[structopt(
    about = r#"Compile sorted history lines into null-counts.

The input (stdin) is the output of float-counts-to-histories after
`LC_ALL=C sort`: one line per history-state, with the state's left-most
(farthest-away) word in the predicted position.  Lines sharing the remaining
history are grouped into one NullLmState whose 'predicted' vector lists
those left-most words in sorted order.  The null-counts are used by
float-counts-prune to recognize n-grams that coincide with existing
history-states and must not be pruned."#
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
    let input = stdin.lock();
    let stdout = io::stdout();
    let mut output = BufWriter::new(stdout.lock());

    let mut num_states_written = 0u64;
    let mut num_predicted = 0u64;
    let mut first_time = true;
    let mut lm_state = NullLmState::default();
    let mut wseq: Vec<i32> = Vec::new();

    for line in input.lines() {
        let line = line?;
        wseq.clear();
        for field in line.split_whitespace() {
            let word: i32 = field
                .parse()
                .map_err(|_| format!("histories-to-null-counts: bad input line '{}'", line))?;
            wseq.push(word);
        }
        let predicted_word = wseq
            .pop()
            .ok_or_else(|| format!("histories-to-null-counts: bad input line '{}'", line))?;

        if lm_state.history != wseq || first_time {
            if !first_time {
                lm_state.check();
                lm_state.write(&mut output)?;
                num_states_written += 1;
            }
            lm_state.history.clear();
            lm_state.history.extend_from_slice(&wseq);
            lm_state.predicted.clear();
            first_time = false;
        }
        lm_state.predicted.push(predicted_word);
        num_predicted += 1;
    }

    if first_time {
        return Err("histories-to-null-counts: processed no data".into());
    }
    lm_state.check();
    lm_state.write(&mut output)?;
    num_states_written += 1;
    output.flush()?;

    info!(
        "histories-to-null-counts: processed {} LM states, with {} individual n-grams.",
        num_states_written, num_predicted
    );
    Ok(())
}
