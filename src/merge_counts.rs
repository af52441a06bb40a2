use std::collections::BTreeMap;
use std::error::Error;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::PathBuf;

use log::info;
use structopt::StructOpt;

use smoothlm::{at_eof, open_input, GeneralLmState, GeneralLmStateBuilder, IntLmState};

#[derive(StructOpt)]
#[structopt(
    about = r#"Merge weighted int-count sources and general-count sources into
a single stream of general counts.

Each source argument is either "<file>,<scale>" (an int-counts file whose
counts are scaled by <scale> > 0, e.g. a corpus-weighting factor), or a bare
"<file>" (a general-counts file added unweighted, e.g. the lower-order
discount output of discount-counts).  All sources must be sorted; the merged
general counts are written to stdout in the same order.

For an int source, a word with count c contributes c pieces of size <scale>
to that word's Count; for a general source the Count is added directly, so
the top-3 pieces survive weighting and merging exactly."#
)]
struct Opt {
    /// Sources, each "<counts-file>,<scale>" or "<general-counts-file>".
    #[structopt(name = "source", required = true)]
    sources: Vec<String>,
}

enum Source {
    Int { input: BufReader<File>, scale: f32, state: IntLmState },
    General { input: BufReader<File>, state: GeneralLmState },
}

impl Source {
    fn open(arg: &str) -> io::Result<Source> {
        match arg.rsplit_once(',') {
            Some((path, scale_str)) => {
                let scale: f32 = scale_str.parse().map_err(|_| {
                    io::Error::new(
                        io::ErrorKind::InvalidInput,
                        format!("merge-counts: bad source argument '{}'", arg),
                    )
                })?;
                if !(scale > 0.0) {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        format!("merge-counts: bad scale in source argument '{}'", arg),
                    ));
                }
                Ok(Source::Int {
                    input: open_input(&PathBuf::from(path))?,
                    scale,
                    state: IntLmState::default(),
                })
            }
            None => Ok(Source::General {
                input: open_input(&PathBuf::from(arg))?,
                state: GeneralLmState::default(),
            }),
        }
    }

    // Reads the source's next state; returns its history if one was read.
    fn advance(&mut self) -> io::Result<Option<Vec<i32>>> {
        match self {
            Source::Int { input, state, .. } => {
                if at_eof(input)? {
                    return Ok(None);
                }
                *state = IntLmState::read(input)?;
                Ok(Some(state.history.clone()))
            }
            Source::General { input, state } => {
                if at_eof(input)? {
                    return Ok(None);
                }
                *state = GeneralLmState::read(input)?;
                Ok(Some(state.history.clone()))
            }
        }
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let opt = Opt::from_args();

    stderrlog::new()
        .verbosity(2)
        .timestamp(stderrlog::Timestamp::Second)
        .init()
        .unwrap();

    let mut sources = Vec::with_capacity(opt.sources.len());
    for arg in &opt.sources {
        sources.push(Source::open(arg)?);
    }

    let mut hist_to_sources: BTreeMap<Vec<i32>, Vec<usize>> = BTreeMap::new();
    for (i, source) in sources.iter_mut().enumerate() {
        if let Some(hist) = source.advance()? {
            hist_to_sources.entry(hist).or_insert_with(Vec::new).push(i);
        }
    }

    let stdout = io::stdout();
    let mut output = BufWriter::new(stdout.lock());
    let mut builder = GeneralLmStateBuilder::new();
    let mut num_lm_states_written = 0u64;

    while let Some(hist) = hist_to_sources.keys().next().cloned() {
        let source_indexes = hist_to_sources.remove(&hist).unwrap();
        num_lm_states_written += 1;

        // A single unweighted general source can be passed through untouched.
        let pass_through = source_indexes.len() == 1
            && matches!(sources[source_indexes[0]], Source::General { .. });
        if pass_through {
            if let Source::General { state, .. } = &sources[source_indexes[0]] {
                state.write(&mut output)?;
            }
        } else {
            builder.clear();
            for &i in &source_indexes {
                match &sources[i] {
                    Source::Int { state, scale, .. } => builder.add_int_counts(state, *scale),
                    Source::General { state, .. } => builder.add_general_counts(state),
                }
            }
            let merged = GeneralLmState {
                history: hist,
                discount: builder.discount,
                counts: builder.output(),
            };
            merged.write(&mut output)?;
        }

        for i in source_indexes {
            if let Some(hist) = sources[i].advance()? {
                hist_to_sources.entry(hist).or_insert_with(Vec::new).push(i);
            }
        }
    }
    output.flush()?;

    info!("merge-counts: wrote {} LM states.", num_lm_states_written);
    Ok(())
}
