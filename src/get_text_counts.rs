use std::error::Error;
use std::io::{self, BufRead, BufWriter, Write};
use std::path::PathBuf;

use log::info;
use structopt::StructOpt;

use smoothlm::{open_text_input, BOS_SYMBOL, EOS_SYMBOL};

#[derive(StructOpt)]
#[structopt(
    about = r#"Turn integerized text into sort-friendly n-gram count lines.

The input is one integerized sentence per line (word-ids > 3; ids 1, 2 and 3
are reserved for <s>, </s> and <unk> and may not appear in the text).  For
each position in each sentence this tool emits one line holding the reversed
history followed by the predicted word, e.g. with --ngram-order 3 the
sentence "11 12 13" produces:

      1      11
     11       1      12
     12      11      13
     13      12       2

Every number is right-padded to width 7 so that piping the output through
`LC_ALL=C sort | uniq -c` groups identical n-grams and orders the histories
the way the rest of the pipeline requires (backoff histories sort as
prefixes of their extensions; see MSRLM for why the history is reversed).
The sorted, uniq-ed lines are consumed by get-int-counts."#
)]
struct Opt {
    /// N-gram order; 1 means unigram counts only.
    #[structopt(name = "ngram-order")]
    ngram_order: usize,

    /// Input text file (plain or .gz).  Reads stdin if omitted.
    input: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn Error>> {
    let opt = Opt::from_args();

    stderrlog::new()
        .verbosity(2)
        .timestamp(stderrlog::Timestamp::Second)
        .init()
        .unwrap();

    if opt.ngram_order == 0 {
        return Err("get-text-counts: ngram-order must be > 0".into());
    }

    let input: Box<dyn BufRead> = match &opt.input {
        Some(path) => open_text_input(path)?,
        None => Box::new(io::BufReader::new(io::stdin())),
    };
    let stdout = io::stdout();
    let mut output = BufWriter::new(stdout.lock());

    let mut num_lines_processed = 0u64;
    let mut num_words_processed = 0u64;
    let mut line_ints: Vec<i32> = Vec::new();

    for line in input.lines() {
        let line = line?;
        num_lines_processed += 1;
        line_ints.clear();
        line_ints.push(BOS_SYMBOL);
        for token in line.split_whitespace() {
            let word: i32 = token
                .parse()
                .map_err(|_| format!("get-text-counts: bad input line '{}'", line))?;
            assert!(word > 2, "word-ids 1 and 2 are reserved for <s> and </s>");
            assert!(
                word < 10_000_000,
                "vocabularies over 10 million need a wider sort field"
            );
            line_ints.push(word);
        }
        line_ints.push(EOS_SYMBOL);
        num_words_processed += line_ints.len() as u64;

        for pos in 1..line_ints.len() {
            let oldest = (pos + 1).saturating_sub(opt.ngram_order);
            for h in (oldest..pos).rev() {
                write!(output, "{:7} ", line_ints[h])?;
            }
            writeln!(output, "{:7}", line_ints[pos])?;
        }
    }
    output.flush()?;

    if num_lines_processed == 0 {
        return Err("get-text-counts: processed no data".into());
    }
    info!(
        "get-text-counts: processed {} lines, with (on average) {} words per line.",
        num_lines_processed,
        num_words_processed as f64 / num_lines_processed as f64
    );
    Ok(())
}
