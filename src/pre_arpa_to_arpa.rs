use std::error::Error;
use std::io::{self, BufRead, BufWriter, Write};
use std::path::PathBuf;

use log::info;
use structopt::StructOpt;

use smoothlm::open_input;

#[derive(StructOpt)]
#[structopt(
    about = r#"Turn sorted pre-ARPA lines into an ARPA-format language model.

Reads from stdin the output of float-counts-to-pre-arpa after `LC_ALL=C
sort`.  Three line shapes arrive, in an order the sort established:
header-count lines " 0 <order> <num-ngrams>", backoff lines
"<order> <words..>\t<log10-prob>" (the tab makes each one sort immediately
before its n-gram line), and n-gram lines "<order> <words..> <log10-prob>".
Backoff lines are merged with the following n-gram line; <s>, which has a
backoff probability but no n-gram probability, gets the conventional -99.

<vocab-file> maps integer ids to tokens, one "<id> <token>" pair per line in
id order starting at 0 (<eps>), with <s>, </s> and <unk> at ids 1-3."#
)]
struct Opt {
    /// The id -> token map.
    #[structopt(name = "vocab-file")]
    vocab: PathBuf,
}

fn read_vocabulary(path: &PathBuf) -> Result<Vec<String>, Box<dyn Error>> {
    let input = open_input(path)?;
    let mut vocab = Vec::new();
    for line in input.lines() {
        let line = line?;
        let mut fields = line.split_whitespace();
        let id: usize = fields
            .next()
            .and_then(|f| f.parse().ok())
            .ok_or_else(|| format!("pre-arpa-to-arpa: could not interpret vocab line '{}'", line))?;
        let word = fields
            .next()
            .ok_or_else(|| format!("pre-arpa-to-arpa: could not interpret vocab line '{}'", line))?;
        if fields.next().is_some() {
            return Err(format!("pre-arpa-to-arpa: could not interpret vocab line '{}'", line).into());
        }
        if id != vocab.len() {
            return Err(format!(
                "pre-arpa-to-arpa: expected vocab lines in order; unexpected line '{}'",
                line
            )
            .into());
        }
        vocab.push(word.to_string());
    }
    Ok(vocab)
}

// Splits a pre-ARPA line into (order, words, separator, log10-prob-text).
// The separator is ' ' on n-gram lines and '\t' on backoff lines.
fn parse_line<'a>(line: &'a str, vocab_size: usize) -> Result<(i32, Vec<&'a str>, char, &'a str), Box<dyn Error>> {
    let bad = || -> Box<dyn Error> {
        format!("pre-arpa-to-arpa: could not process line '{}'", line).into()
    };
    let trimmed = line.trim_start();
    let (order_str, mut rest) = trimmed.split_once(' ').ok_or_else(bad)?;
    let order: i32 = order_str.parse().map_err(|_| bad())?;
    if order < 0 {
        return Err(bad());
    }
    let mut words = Vec::with_capacity(order as usize);
    for _ in 0..order {
        rest = rest.trim_start_matches(' ');
        let end = rest
            .find(|c| c == ' ' || c == '\t')
            .ok_or_else(bad)?;
        let word_str = &rest[..end];
        let word: usize = word_str.parse().map_err(|_| bad())?;
        if word >= vocab_size {
            return Err(format!(
                "pre-arpa-to-arpa: word {} is outside the vocabulary: line is '{}'",
                word, line
            )
            .into());
        }
        words.push(word_str);
        rest = &rest[end..];
    }
    let separator = rest.chars().next().ok_or_else(bad)?;
    Ok((order, words, separator, &rest[1..]))
}

fn main() -> Result<(), Box<dyn Error>> {
    let opt = Opt::from_args();

    stderrlog::new()
        .verbosity(2)
        .timestamp(stderrlog::Timestamp::Second)
        .init()
        .unwrap();

    let vocab = read_vocabulary(&opt.vocab)?;
    let stdin = io::stdin();
    let mut input = stdin.lock();
    let stdout = io::stdout();
    let mut output = BufWriter::new(stdout.lock());

    let mut cur_order: i32 = -1;
    let mut line = String::new();
    let mut extra_line = String::new();

    writeln!(output, "\\data\\")?;
    loop {
        line.clear();
        if input.read_line(&mut line)? == 0 {
            break;
        }
        let line_trimmed = line.trim_end_matches('\n');
        let (order, words, separator, prob_str) = parse_line(line_trimmed, vocab.len())?;

        if order == 0 {
            // " 0 <order> <num-ngrams>" becomes "ngram <order>=<num>".
            let mut fields = prob_str.split_whitespace();
            let ngram_order: i64 = fields
                .next()
                .and_then(|f| f.parse().ok())
                .filter(|&o| o > 0)
                .ok_or_else(|| format!("pre-arpa-to-arpa: can't process line '{}'", line_trimmed))?;
            let num_ngrams: i64 = fields
                .next()
                .and_then(|f| f.parse().ok())
                .filter(|&n| n >= 0)
                .ok_or_else(|| format!("pre-arpa-to-arpa: can't process line '{}'", line_trimmed))?;
            writeln!(output, "ngram {}={}", ngram_order, num_ngrams)?;
            continue;
        }
        if order != cur_order {
            writeln!(output, "\n\\{}-grams:", order)?;
            cur_order = order;
        }
        for word in &words {
            let id: usize = word.parse().unwrap();
            write!(output, "{} ", vocab[id])?;
        }
        if separator == ' ' {
            // an n-gram line whose backoff probability was never printed
            // upstream; it defaults to zero by omission.
            writeln!(output, "{}", prob_str.trim_start())?;
        } else {
            // a backoff line.  <s> alone has a backoff probability but no
            // n-gram probability; every other backoff line is followed by
            // its n-gram line.
            if order == 1 && words.len() == 1 && words[0] == "1" {
                writeln!(output, "-99 {}", prob_str)?;
                continue;
            }
            extra_line.clear();
            if input.read_line(&mut extra_line)? == 0 {
                return Err(format!(
                    "pre-arpa-to-arpa: expected to read another line after this line \
                     [file truncated or bad counts?]: '{}'",
                    line_trimmed
                )
                .into());
            }
            let extra_trimmed = extra_line.trim_end_matches('\n');
            let (extra_order, extra_words, extra_separator, extra_prob) =
                parse_line(extra_trimmed, vocab.len())?;
            if extra_order != order || extra_words != words || extra_separator != ' ' {
                return Err(format!(
                    "pre-arpa-to-arpa: read confusing sequence of lines: '{}' followed by \
                     '{}' ... bad counts?",
                    line_trimmed, extra_trimmed
                )
                .into());
            }
            writeln!(output, "{} {}", extra_prob.trim_start(), prob_str)?;
        }
    }
    if cur_order == -1 {
        return Err("pre-arpa-to-arpa: read no input".into());
    }
    writeln!(output, "\n\\end\\")?;
    output.flush()?;
    info!("pre-arpa-to-arpa: success");
    Ok(())
}
