use std::error::Error;
use std::io::{self, BufWriter, Write};

use log::info;
use structopt::StructOpt;

use smoothlm::{at_eof, FloatLmState};

#[derive(StructOpt)]
#[structopt(
    about = r#"Print the history of every non-empty float-count state as a
sort-friendly text line.

A history-state "a b c" (stored reversed as [c, b, a]) with at least one
nonzero count produces the line " b a\tc": everything but the most recent
word, then a tab, then the most recent word, all space-padded to width 7 so
string sort coincides with integer sort.  The tab pulls the most recent word
into the predicted-word position, which is exactly the shape
histories-to-null-counts expects after sorting:

  float-counts-to-histories < float.all | LC_ALL=C sort \
      | histories-to-null-counts > protected.all

The resulting null-counts mark the n-grams that pruning must not remove."#
)]
struct Opt {}

fn print_number<W: Write>(output: &mut W, i: i32) -> io::Result<()> {
    assert!(
        i < 10_000_000,
        "vocabularies over 10 million need a wider sort field"
    );
    write!(output, "{:7}", i)
}

fn main() -> Result<(), Box<dyn Error>> {
    let _opt = Opt::from_args();

    stderrlog::new()
        .verbosity(2)
        .timestamp(stderrlog::Timestamp::Second)
        .init()
        .unwrap();

    let stdin = io::stdin();
    let mut input = stdin.lock();
    let stdout = io::stdout();
    let mut output = BufWriter::new(stdout.lock());

    let mut num_histories_total = 0u64;
    let mut num_histories_printed = 0u64;

    while !at_eof(&mut input)? {
        let lm_state = FloatLmState::read(&mut input)?;
        // a history is only worth protecting if the state keeps at least one
        // nonzero count.
        let found_nonzero_count = lm_state.counts.iter().any(|&(_, c)| c != 0.0);
        if found_nonzero_count && !lm_state.history.is_empty() {
            for &h in &lm_state.history[1..] {
                write!(output, " ")?;
                print_number(&mut output, h)?;
            }
            write!(output, "\t")?;
            print_number(&mut output, lm_state.history[0])?;
            writeln!(output)?;
            num_histories_printed += 1;
        }
        num_histories_total += 1;
    }
    output.flush()?;

    info!(
        "float-counts-to-histories: printed {} histories (out of {} in total).",
        num_histories_printed, num_histories_total
    );
    Ok(())
}
