use std::error::Error;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use log::info;
use structopt::StructOpt;

use smoothlm::{at_eof, open_input, FloatLmState, WordPositionMap};

#[derive(StructOpt)]
#[structopt(
    about = r#"Convert float-counts to sort-friendly 'pre-ARPA' text.

Emits, for every n-gram, a line "<order> <word1> .. <wordN> <log10-prob>",
and for every history-state a backoff line with a tab before the log10
backoff probability; orders are space-padded to width 2 and the tab makes a
state's backoff line sort immediately before its own n-gram line.  Lines
starting with " 0" carry the per-order n-gram totals for the ARPA header.
Piping through `LC_ALL=C sort` therefore reproduces exact ARPA block order,
and pre-arpa-to-arpa does the final formatting:

  float-counts-to-pre-arpa 3 40000 float.all | LC_ALL=C sort \
      | pre-arpa-to-arpa words.txt > arpa

Probabilities here include the backoff-with-interpolation terms, computed
from the lower-order states that are live while a state streams through."#
)]
struct Opt {
    /// Suppress unigram probability lines (used when a separate unigram
    /// model supplies them).
    #[structopt(long = "no-unigram")]
    no_unigram: bool,

    /// The n-gram order of the model.
    #[structopt(name = "ngram-order")]
    ngram_order: usize,

    /// Vocabulary size (highest word-id).
    #[structopt(name = "num-words")]
    num_words: i32,

    /// The model: merged float-counts of all orders, sorted.
    #[structopt(name = "float-counts")]
    float_counts: PathBuf,
}

struct PreArpaGenerator {
    order: usize,
    num_words: i32,
    print_unigrams: bool,
    num_ngrams: Vec<u64>,
    lm_states: Vec<FloatLmState>,
    word_to_position: WordPositionMap,
}

impl PreArpaGenerator {
    fn new(opt: &Opt) -> PreArpaGenerator {
        let mut num_ngrams = vec![0u64; opt.ngram_order];
        // <s> contributes a backoff line but no n-gram probability line of
        // its own; count it in the order-1 total the header reports.
        num_ngrams[0] += 1;
        PreArpaGenerator {
            order: opt.ngram_order,
            num_words: opt.num_words,
            print_unigrams: !opt.no_unigram,
            num_ngrams,
            lm_states: vec![FloatLmState::default(); opt.ngram_order],
            word_to_position: WordPositionMap::new(
                opt.num_words,
                opt.ngram_order.saturating_sub(1).max(1),
            ),
        }
    }

    fn process_input<R: io::BufRead, W: Write>(
        &mut self,
        input: &mut R,
        output: &mut W,
    ) -> io::Result<()> {
        while !at_eof(input)? {
            let lm_state = FloatLmState::read(input)?;
            let hist_length = lm_state.history.len();
            assert!(hist_length < self.order, "input has higher order than stated");
            if hist_length + 1 < self.order {
                self.word_to_position
                    .populate(hist_length, lm_state.counts.iter().map(|&(w, _)| w));
            }
            self.lm_states[hist_length] = lm_state;
            if hist_length == 0 {
                assert!(
                    self.lm_states[0].total > 0.0,
                    "zero count for 1-gram history state (something went wrong?)"
                );
            }
            if hist_length > 0 || self.print_unigrams {
                self.output_lm_state(hist_length, output)?;
            }
        }
        Ok(())
    }

    fn output_lm_state<W: Write>(&mut self, hist_length: usize, output: &mut W) -> io::Result<()> {
        self.check_backoff_states_exist(hist_length);
        let order = hist_length + 1;
        assert!(order < 100, "n-gram order cannot exceed 99");

        // e.g. " 3 1842 46 ": the order, then the history in natural word
        // order (reversed from storage order).
        let mut prefix = format!("{:2} ", order);
        for j in (0..hist_length).rev() {
            prefix.push_str(&self.lm_states[hist_length].history[j].to_string());
            prefix.push(' ');
        }

        let total_count = self.lm_states[hist_length].total;
        let discount_prob = self.lm_states[hist_length].discount / total_count;
        let num_counts = self.lm_states[hist_length].counts.len();
        for count_index in 0..num_counts {
            let (word, count) = self.lm_states[hist_length].counts[count_index];
            let mut prob = count / total_count;
            if hist_length > 0 {
                prob += discount_prob * self.get_probability(hist_length - 1, word);
            }
            let log10_prob = prob.log10();
            assert!(log10_prob.is_finite());
            writeln!(output, "{}{} {:.6}", prefix, word, log10_prob)?;
        }
        self.num_ngrams[hist_length] += num_counts as u64;
        if hist_length > 0 {
            // the backoff line; the tab makes it sort just before the
            // same-named n-gram probability line.
            write!(output, "{:2}", hist_length)?;
            for j in (0..hist_length).rev() {
                write!(output, " {}", self.lm_states[hist_length].history[j])?;
            }
            let log10_backoff_prob = discount_prob.log10();
            writeln!(output, "\t{:.6}", log10_backoff_prob)?;
        }
        Ok(())
    }

    // The count of the word in the live state of the given history length;
    // zero counts are possible above order 1 when a lower-order count was
    // pruned while a higher-order one survived.
    fn get_count_for_word(&self, hist_length: usize, word: i32) -> f32 {
        assert!(word > 0 && word <= self.num_words);
        let pos = self.word_to_position.get(word, hist_length);
        let lm_state = &self.lm_states[hist_length];
        if pos < lm_state.counts.len() && lm_state.counts[pos].0 == word {
            lm_state.counts[pos].1
        } else {
            assert!(
                hist_length != 0,
                "word {} has zero count in unigram counts",
                word
            );
            0.0
        }
    }

    // Backoff-interpolated probability; not valid for the highest order
    // (only ever needed while handling backoff from it).
    fn get_probability(&self, hist_length: usize, word: i32) -> f32 {
        assert!(hist_length < self.order - 1);
        let mut numerator = self.get_count_for_word(hist_length, word);
        if hist_length > 0 {
            numerator +=
                self.lm_states[hist_length].discount * self.get_probability(hist_length - 1, word);
        }
        numerator / self.lm_states[hist_length].total
    }

    fn check_backoff_states_exist(&self, hist_length: usize) {
        for i in 1..hist_length {
            assert_eq!(self.lm_states[i].history.len(), i);
            assert_eq!(
                self.lm_states[i].history.as_slice(),
                &self.lm_states[hist_length].history[..i]
            );
        }
    }

    fn output_num_ngrams<W: Write>(&self, output: &mut W) -> io::Result<()> {
        // " 0  3 43142" lines; the leading 0 marks header bookkeeping for
        // pre-arpa-to-arpa, and the padding keeps string order numeric.
        let first_order = if self.print_unigrams { 1 } else { 2 };
        for order in first_order..=self.order {
            writeln!(
                output,
                "{:2} {:2} {}",
                0,
                order,
                self.num_ngrams[order - 1]
            )?;
        }
        info!(
            "float-counts-to-pre-arpa: output [ {} ] n-grams",
            self.num_ngrams
                .iter()
                .map(|n| n.to_string())
                .collect::<Vec<_>>()
                .join(" ")
        );
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

    if opt.ngram_order < 2 || opt.num_words < 4 {
        return Err("float-counts-to-pre-arpa: need ngram-order >= 2 and num-words >= 4".into());
    }

    let mut generator = PreArpaGenerator::new(&opt);
    let mut input = open_input(&opt.float_counts)?;
    let stdout = io::stdout();
    let mut output = BufWriter::new(stdout.lock());
    generator.process_input(&mut input, &mut output)?;
    generator.output_num_ngrams(&mut output)?;
    output.flush()?;
    Ok(())
}
