use std::collections::BTreeMap;
use std::error::Error;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::PathBuf;

use log::info;
use structopt::StructOpt;

use smoothlm::{at_eof, create_output, open_input, GeneralLmStateDerivs, IntLmState};

#[derive(StructOpt)]
#[structopt(
    about = r#"Backprop counterpart of merge-counts.

Re-reads the sources that were merged, together with the merged counts and
the derivatives w.r.t. them (as produced further down the pipeline), and
propagates those derivatives back to the inputs of the merge.  For each
general-count source the per-count derivatives are written to the paired
derivative file; for each int-count source the derivative w.r.t. its scalar
weight is accumulated, and all scale derivatives are printed on a single
stdout line (in source order).

Sources are given as alternating <counts-file> <scale-or-deriv-file>
arguments, mirroring the forward invocation: an argument that parses as a
positive float is the scale of an int source, anything else is the output
derivative path of a general source."#
)]
struct Opt {
    /// The merged counts written by merge-counts.
    #[structopt(name = "merged-counts")]
    merged_counts: PathBuf,

    /// Derivatives w.r.t. the merged counts.
    #[structopt(name = "merged-derivs")]
    merged_derivs: PathBuf,

    /// Alternating <counts-file> <scale|deriv-file> arguments.
    #[structopt(name = "source-args", required = true)]
    source_args: Vec<String>,
}

enum Source {
    Int {
        input: BufReader<File>,
        scale: f32,
        scale_deriv: f64,
        state: IntLmState,
    },
    General {
        input: BufReader<File>,
        deriv_output: BufWriter<File>,
        state: GeneralLmStateDerivs,
        pending: bool,
    },
}

struct MergerBackward {
    sources: Vec<Source>,
    merged_count_input: BufReader<File>,
    merged_deriv_input: BufReader<File>,
    merged_state: GeneralLmStateDerivs,
    // word -> position in merged_state.counts; stale for absent words.
    word_map: Vec<usize>,
    hist_to_sources: BTreeMap<Vec<i32>, Vec<usize>>,
    num_lm_states_processed: u64,
}

impl MergerBackward {
    fn new(opt: &Opt) -> io::Result<MergerBackward> {
        if opt.source_args.len() % 2 != 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "merge-counts-backward: source arguments must come in \
                 <counts-file> <scale|deriv-file> pairs",
            ));
        }
        let mut sources = Vec::with_capacity(opt.source_args.len() / 2);
        for pair in opt.source_args.chunks(2) {
            let input = open_input(&PathBuf::from(&pair[0]))?;
            match pair[1].parse::<f32>() {
                Ok(scale) => {
                    if !(scale > 0.0) {
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidInput,
                            format!("merge-counts-backward: bad scale {}", scale),
                        ));
                    }
                    sources.push(Source::Int {
                        input,
                        scale,
                        scale_deriv: 0.0,
                        state: IntLmState::default(),
                    });
                }
                Err(_) => sources.push(Source::General {
                    input,
                    deriv_output: create_output(&PathBuf::from(&pair[1]))?,
                    state: GeneralLmStateDerivs::default(),
                    pending: false,
                }),
            }
        }
        let mut merger = MergerBackward {
            sources,
            merged_count_input: open_input(&opt.merged_counts)?,
            merged_deriv_input: open_input(&opt.merged_derivs)?,
            merged_state: GeneralLmStateDerivs::default(),
            word_map: Vec::new(),
            hist_to_sources: BTreeMap::new(),
            num_lm_states_processed: 0,
        };
        for i in 0..merger.sources.len() {
            merger.read_stream(i)?;
        }
        Ok(merger)
    }

    // Flushes the pending derivatives of a general source (now fully
    // accumulated, since the merged stream has moved past its history), then
    // buffers the source's next state.
    fn read_stream(&mut self, i: usize) -> io::Result<()> {
        let hist = match &mut self.sources[i] {
            Source::Int { input, state, .. } => {
                if at_eof(input)? {
                    return Ok(());
                }
                *state = IntLmState::read(input)?;
                state.history.clone()
            }
            Source::General {
                input,
                deriv_output,
                state,
                pending,
            } => {
                if *pending {
                    state.write_derivs(deriv_output)?;
                    *pending = false;
                }
                if at_eof(input)? {
                    return Ok(());
                }
                *state = GeneralLmStateDerivs::read(input)?;
                *pending = true;
                state.state.history.clone()
            }
        };
        self.hist_to_sources
            .entry(hist)
            .or_insert_with(Vec::new)
            .push(i);
        Ok(())
    }

    fn populate_word_map(&mut self) {
        for (pos, &(word, _)) in self.merged_state.state.counts.iter().enumerate() {
            let word = word as usize;
            if word >= self.word_map.len() {
                // entries between the old and new length stay undefined;
                // lookups always verify against the counts vector.
                self.word_map.resize(word + 1, 0);
            }
            self.word_map[word] = pos;
        }
    }

    fn process_state(&mut self) -> io::Result<()> {
        let hist = self.hist_to_sources.keys().next().unwrap().clone();
        let source_indexes = self.hist_to_sources.remove(&hist).unwrap();
        self.num_lm_states_processed += 1;

        let single_general = source_indexes.len() == 1
            && matches!(self.sources[source_indexes[0]], Source::General { .. });
        if single_general {
            // The forward pass passed this state through unchanged, so the
            // merged derivatives are exactly this source's derivatives.
            self.merged_state = GeneralLmStateDerivs::read(&mut self.merged_count_input)?;
            if let Source::General { state, .. } = &mut self.sources[source_indexes[0]] {
                state.read_derivs(&mut self.merged_deriv_input)?;
                assert_eq!(
                    self.merged_state.state.counts.len(),
                    state.state.counts.len()
                );
                assert_eq!(self.merged_state.state.history, hist, "mismatched data?");
            }
        } else {
            self.merged_state = GeneralLmStateDerivs::read(&mut self.merged_count_input)?;
            self.merged_state.read_derivs(&mut self.merged_deriv_input)?;
            assert_eq!(self.merged_state.state.history, hist, "mismatched data?");
            self.populate_word_map();

            for &i in &source_indexes {
                match &mut self.sources[i] {
                    Source::General { state, .. } => {
                        for (&(word, ref count), deriv) in
                            state.state.counts.iter().zip(state.count_derivs.iter_mut())
                        {
                            let pos = self.word_map[word as usize];
                            assert_eq!(self.merged_state.state.counts[pos].0, word);
                            let merged_count = self.merged_state.state.counts[pos].1;
                            let merged_deriv = &mut self.merged_state.count_derivs[pos];
                            merged_count.add_backward(count, merged_deriv, deriv);
                        }
                    }
                    Source::Int {
                        state,
                        scale,
                        scale_deriv,
                        ..
                    } => {
                        for &(word, num_pieces) in &state.counts {
                            let pos = self.word_map[word as usize];
                            assert_eq!(self.merged_state.state.counts[pos].0, word);
                            let merged_count = self.merged_state.state.counts[pos].1;
                            let merged_deriv = &mut self.merged_state.count_derivs[pos];
                            merged_count.add_pieces_backward(
                                *scale,
                                num_pieces,
                                merged_deriv,
                                scale_deriv,
                            );
                        }
                    }
                }
            }
        }
        for i in source_indexes {
            self.read_stream(i)?;
        }
        Ok(())
    }

    // Flush trailing general-source derivatives, then print the scale
    // derivatives (one stdout line, in source order).
    fn finalize(&mut self) -> io::Result<()> {
        let mut scale_derivs = Vec::new();
        for source in &mut self.sources {
            match source {
                Source::General {
                    deriv_output,
                    state,
                    pending,
                    ..
                } => {
                    if *pending {
                        state.write_derivs(deriv_output)?;
                        *pending = false;
                    }
                    deriv_output.flush()?;
                }
                Source::Int { scale_deriv, .. } => scale_derivs.push(*scale_deriv),
            }
        }
        let stdout = io::stdout();
        let mut out = stdout.lock();
        for deriv in scale_derivs {
            write!(out, "{} ", deriv)?;
        }
        writeln!(out)?;
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

    let mut merger = MergerBackward::new(&opt)?;
    while !merger.hist_to_sources.is_empty() {
        merger.process_state()?;
    }
    merger.finalize()?;

    info!(
        "merge-counts-backward: processed {} LM states.",
        merger.num_lm_states_processed
    );
    Ok(())
}
