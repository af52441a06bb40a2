//! End-to-end tests that drive the stage binaries the way the shell pipeline
//! does, over a tiny corpus with known results.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use smoothlm::{at_eof, GeneralLmStateDerivs, IntLmState};

const TRAIN_TEXT: &str = "11 12 13\n11 12 13 14\n";
const DEV_TEXT: &str = "10 11 12\n";

fn run(bin: &str, args: &[&str], stdin_data: &[u8]) -> Vec<u8> {
    let mut child = Command::new(bin)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()
        .unwrap_or_else(|e| panic!("failed to spawn {}: {}", bin, e));
    child
        .stdin
        .take()
        .unwrap()
        .write_all(stdin_data)
        .unwrap();
    let output = child.wait_with_output().unwrap();
    assert!(
        output.status.success(),
        "{} {:?} failed with status {}",
        bin,
        args,
        output.status
    );
    output.stdout
}

// Stands in for `LC_ALL=C sort | uniq -c` in the counting pipeline.
fn sort_uniq_c(text: &[u8]) -> Vec<u8> {
    let text = String::from_utf8(text.to_vec()).unwrap();
    let mut lines: Vec<&str> = text.lines().collect();
    lines.sort_unstable();
    let mut out = String::new();
    let mut i = 0;
    while i < lines.len() {
        let mut count = 1;
        while i + count < lines.len() && lines[i + count] == lines[i] {
            count += 1;
        }
        out.push_str(&format!("{:7} {}\n", count, lines[i]));
        i += count;
    }
    out.into_bytes()
}

fn path_str(dir: &Path, name: &str) -> String {
    dir.join(name).to_str().unwrap().to_string()
}

// Runs the estimation pipeline at order 2 for the tiny corpus and the given
// vocabulary size, leaving intermediate files in `dir`.  Returns the
// (total-count, total-logprob) pair printed by compute-probs, which also
// writes per-order derivative files derivs.1gram and derivs.2gram.
fn build_and_evaluate(dir: &Path, vocab_size: i32) -> (i64, f64) {
    let text_counts = run(env!("CARGO_BIN_EXE_get-text-counts"), &["2"], TRAIN_TEXT.as_bytes());
    let sorted_counts = sort_uniq_c(&text_counts);
    run(
        env!("CARGO_BIN_EXE_get-int-counts"),
        &[&path_str(dir, "int.1gram"), &path_str(dir, "int.2gram")],
        &sorted_counts,
    );

    let merged = run(
        env!("CARGO_BIN_EXE_merge-counts"),
        &[&format!("{},1.0", path_str(dir, "int.2gram"))],
        &[],
    );
    fs::write(dir.join("merged.2gram"), &merged).unwrap();

    run(
        env!("CARGO_BIN_EXE_discount-counts"),
        &[
            "0.8",
            "0.7",
            "0.6",
            "0.0",
            &path_str(dir, "float.2gram"),
            &path_str(dir, "1gram"),
        ],
        &merged,
    );
    let unigram_counts = fs::read(dir.join("1gram")).unwrap();
    let float_1gram = run(
        env!("CARGO_BIN_EXE_discount-counts-1gram"),
        &[&vocab_size.to_string()],
        &unigram_counts,
    );
    fs::write(dir.join("float.1gram"), &float_1gram).unwrap();

    let dev_counts = sort_uniq_c(&run(
        env!("CARGO_BIN_EXE_get-text-counts"),
        &["2"],
        DEV_TEXT.as_bytes(),
    ));
    run(
        env!("CARGO_BIN_EXE_get-int-counts"),
        &[&path_str(dir, "dev.int")],
        &dev_counts,
    );

    let float_all = run(
        env!("CARGO_BIN_EXE_merge-float-counts"),
        &[&path_str(dir, "float.2gram"), &path_str(dir, "float.1gram")],
        &[],
    );
    fs::write(dir.join("float.all"), &float_all).unwrap();

    compute_probs(
        &path_str(dir, "float.all"),
        &path_str(dir, "dev.int"),
        &[&path_str(dir, "derivs.1gram"), &path_str(dir, "derivs.2gram")],
    )
}

fn compute_probs(train: &str, dev: &str, deriv_outputs: &[&str]) -> (i64, f64) {
    let mut args = vec![train, dev];
    args.extend_from_slice(deriv_outputs);
    let stdout = run(env!("CARGO_BIN_EXE_compute-probs"), &args, &[]);
    let stdout = String::from_utf8(stdout).unwrap();
    let mut fields = stdout.split_whitespace();
    let total_count: i64 = fields.next().unwrap().parse().unwrap();
    let total_logprob: f64 = fields.next().unwrap().parse().unwrap();
    (total_count, total_logprob)
}

fn parse_scalar(stdout: &[u8]) -> f64 {
    String::from_utf8(stdout.to_vec())
        .unwrap()
        .split_whitespace()
        .next()
        .unwrap()
        .parse()
        .unwrap()
}

#[test]
fn bigram_log_prob_matches_reference_small_vocab() {
    let dir = tempfile::tempdir().unwrap();
    let (total_count, total_logprob) = build_and_evaluate(dir.path(), 14);
    assert_eq!(total_count, 4);
    // hand-computed through the same discounting algebra as the vocab-20
    // case below (which matches the reference output to 7 figures).
    assert!(
        (total_logprob - (-9.4686)).abs() < 5.0e-3,
        "total logprob {} != -9.4686",
        total_logprob
    );
    let perplexity = (-total_logprob / total_count as f64).exp();
    assert!((perplexity - 10.6668).abs() < 2.0e-2);
}

#[test]
fn bigram_log_prob_matches_reference_vocab_20() {
    let dir = tempfile::tempdir().unwrap();
    let (total_count, total_logprob) = build_and_evaluate(dir.path(), 20);
    assert_eq!(total_count, 4);
    assert!(
        (total_logprob - (-10.0067209)).abs() < 1.0e-3,
        "total logprob {} != -10.0067209",
        total_logprob
    );
    let perplexity = (-total_logprob / total_count as f64).exp();
    assert!((perplexity - 12.203).abs() < 1.0e-2);
}

// Perturb the unigram float-counts along a random direction and check that
// the derivative-predicted objective change matches a re-evaluation.
#[test]
fn unigram_derivatives_predict_objective_change() {
    let dir = tempfile::tempdir().unwrap();
    let (_, base_logprob) = build_and_evaluate(dir.path(), 20);

    let predicted = parse_scalar(&run(
        env!("CARGO_BIN_EXE_perturb-float-counts"),
        &[
            "1",
            &path_str(dir.path(), "float.1gram"),
            &path_str(dir.path(), "derivs.1gram"),
            &path_str(dir.path(), "perturbed.1gram"),
        ],
        &[],
    ));

    let float_all = run(
        env!("CARGO_BIN_EXE_merge-float-counts"),
        &[
            &path_str(dir.path(), "float.2gram"),
            &path_str(dir.path(), "perturbed.1gram"),
        ],
        &[],
    );
    fs::write(dir.path().join("float.all.perturbed"), &float_all).unwrap();
    let (_, new_logprob) = compute_probs(
        &path_str(dir.path(), "float.all.perturbed"),
        &path_str(dir.path(), "dev.int"),
        &[],
    );

    let observed = new_logprob - base_logprob;
    assert!(
        (predicted - observed).abs() <= 0.01 * predicted.abs().max(observed.abs()) + 2.0e-6,
        "predicted objf change {} vs observed {}",
        predicted,
        observed
    );
}

#[test]
fn bigram_derivatives_predict_objective_change() {
    let dir = tempfile::tempdir().unwrap();
    let (_, base_logprob) = build_and_evaluate(dir.path(), 20);

    let predicted = parse_scalar(&run(
        env!("CARGO_BIN_EXE_perturb-float-counts"),
        &[
            "2",
            &path_str(dir.path(), "float.2gram"),
            &path_str(dir.path(), "derivs.2gram"),
            &path_str(dir.path(), "perturbed.2gram"),
        ],
        &[],
    ));

    let float_all = run(
        env!("CARGO_BIN_EXE_merge-float-counts"),
        &[
            &path_str(dir.path(), "perturbed.2gram"),
            &path_str(dir.path(), "float.1gram"),
        ],
        &[],
    );
    fs::write(dir.path().join("float.all.perturbed"), &float_all).unwrap();
    let (_, new_logprob) = compute_probs(
        &path_str(dir.path(), "float.all.perturbed"),
        &path_str(dir.path(), "dev.int"),
        &[],
    );

    let observed = new_logprob - base_logprob;
    assert!(
        (predicted - observed).abs() <= 0.01 * predicted.abs().max(observed.abs()) + 2.0e-6,
        "predicted objf change {} vs observed {}",
        predicted,
        observed
    );
}

// Backprop through the unigram discounter, then check that the derivative in
// the direction of scaling all input counts is ~zero: the redistribution
// makes the unigram probabilities scale-invariant.
#[test]
fn unigram_backprop_is_scale_invariant() {
    let dir = tempfile::tempdir().unwrap();
    build_and_evaluate(dir.path(), 20);

    run(
        env!("CARGO_BIN_EXE_discount-counts-1gram-backward"),
        &[
            &path_str(dir.path(), "1gram"),
            &path_str(dir.path(), "float.1gram"),
            &path_str(dir.path(), "derivs.1gram"),
            &path_str(dir.path(), "derivs_in.1gram"),
        ],
        &[],
    );

    let mut counts_input = smoothlm::open_input(&dir.path().join("1gram")).unwrap();
    let mut derivs_input = smoothlm::open_input(&dir.path().join("derivs_in.1gram")).unwrap();
    let mut scale_direction_deriv: f64 = 0.0;
    while !at_eof(&mut counts_input).unwrap() {
        let mut lm_state = GeneralLmStateDerivs::read(&mut counts_input).unwrap();
        lm_state.read_derivs(&mut derivs_input).unwrap();
        for (&(_, ref count), deriv) in lm_state.state.counts.iter().zip(&lm_state.count_derivs) {
            scale_direction_deriv += deriv.dot(count) as f64;
        }
    }
    assert!(
        scale_direction_deriv.abs() < 1.0e-4,
        "scale-direction derivative {} should be ~0",
        scale_direction_deriv
    );
}

// Backprop all the way to the general 1-gram counts, perturb those, and
// re-run the unigram discounting and evaluation.
#[test]
fn general_count_derivatives_predict_objective_change() {
    let dir = tempfile::tempdir().unwrap();
    let (_, base_logprob) = build_and_evaluate(dir.path(), 20);

    run(
        env!("CARGO_BIN_EXE_discount-counts-1gram-backward"),
        &[
            &path_str(dir.path(), "1gram"),
            &path_str(dir.path(), "float.1gram"),
            &path_str(dir.path(), "derivs.1gram"),
            &path_str(dir.path(), "derivs_in.1gram"),
        ],
        &[],
    );
    let predicted = parse_scalar(&run(
        env!("CARGO_BIN_EXE_perturb-counts"),
        &[
            "3",
            &path_str(dir.path(), "1gram"),
            &path_str(dir.path(), "derivs_in.1gram"),
            &path_str(dir.path(), "perturbed.1gram"),
        ],
        &[],
    ));

    let perturbed_counts = fs::read(dir.path().join("perturbed.1gram")).unwrap();
    let float_1gram = run(
        env!("CARGO_BIN_EXE_discount-counts-1gram"),
        &["20"],
        &perturbed_counts,
    );
    fs::write(dir.path().join("float.1gram.perturbed"), &float_1gram).unwrap();
    let float_all = run(
        env!("CARGO_BIN_EXE_merge-float-counts"),
        &[
            &path_str(dir.path(), "float.2gram"),
            &path_str(dir.path(), "float.1gram.perturbed"),
        ],
        &[],
    );
    fs::write(dir.path().join("float.all.perturbed"), &float_all).unwrap();
    let (_, new_logprob) = compute_probs(
        &path_str(dir.path(), "float.all.perturbed"),
        &path_str(dir.path(), "dev.int"),
        &[],
    );

    let observed = new_logprob - base_logprob;
    assert!(
        (predicted - observed).abs() <= 0.01 * predicted.abs().max(observed.abs()) + 2.0e-6,
        "predicted objf change {} vs observed {}",
        predicted,
        observed
    );
}

// Backprop through every stage (evaluator, both discounting passes, merge)
// and check two global properties: the derivative w.r.t. the source weight
// is ~zero (the whole pipeline is scale-invariant), and the derivative
// w.r.t. D1 predicts a re-run with a nudged D1.
#[test]
fn full_chain_backprop_matches_reruns() {
    let dir = tempfile::tempdir().unwrap();
    let (_, base_logprob) = build_and_evaluate(dir.path(), 20);

    run(
        env!("CARGO_BIN_EXE_discount-counts-1gram-backward"),
        &[
            &path_str(dir.path(), "1gram"),
            &path_str(dir.path(), "float.1gram"),
            &path_str(dir.path(), "derivs.1gram"),
            &path_str(dir.path(), "derivs_in.1gram"),
        ],
        &[],
    );
    let d_derivs = run(
        env!("CARGO_BIN_EXE_discount-counts-backward"),
        &[
            "0.8",
            "0.7",
            "0.6",
            "0.0",
            &path_str(dir.path(), "merged.2gram"),
            &path_str(dir.path(), "float.2gram"),
            &path_str(dir.path(), "derivs.2gram"),
            &path_str(dir.path(), "1gram"),
            &path_str(dir.path(), "derivs_in.1gram"),
            &path_str(dir.path(), "derivs_merged.2gram"),
        ],
        &[],
    );
    let d_derivs: Vec<f64> = String::from_utf8(d_derivs)
        .unwrap()
        .split_whitespace()
        .map(|f| f.parse().unwrap())
        .collect();
    assert_eq!(d_derivs.len(), 4);

    let scale_deriv = parse_scalar(&run(
        env!("CARGO_BIN_EXE_merge-counts-backward"),
        &[
            &path_str(dir.path(), "merged.2gram"),
            &path_str(dir.path(), "derivs_merged.2gram"),
            &path_str(dir.path(), "int.2gram"),
            "1.0",
        ],
        &[],
    ));
    assert!(
        scale_deriv.abs() < 1.0e-3,
        "scale derivative {} should be ~0 (probabilities are scale-invariant)",
        scale_deriv
    );

    // nudge D1 and re-run the forward pipeline from the merged counts.
    let delta = 1.0e-3;
    let merged = fs::read(dir.path().join("merged.2gram")).unwrap();
    run(
        env!("CARGO_BIN_EXE_discount-counts"),
        &[
            "0.801",
            "0.7",
            "0.6",
            "0.0",
            &path_str(dir.path(), "float.2gram.d1"),
            &path_str(dir.path(), "1gram.d1"),
        ],
        &merged,
    );
    let unigram_counts = fs::read(dir.path().join("1gram.d1")).unwrap();
    let float_1gram = run(
        env!("CARGO_BIN_EXE_discount-counts-1gram"),
        &["20"],
        &unigram_counts,
    );
    fs::write(dir.path().join("float.1gram.d1"), &float_1gram).unwrap();
    let float_all = run(
        env!("CARGO_BIN_EXE_merge-float-counts"),
        &[
            &path_str(dir.path(), "float.2gram.d1"),
            &path_str(dir.path(), "float.1gram.d1"),
        ],
        &[],
    );
    fs::write(dir.path().join("float.all.d1"), &float_all).unwrap();
    let (_, new_logprob) = compute_probs(
        &path_str(dir.path(), "float.all.d1"),
        &path_str(dir.path(), "dev.int"),
        &[],
    );

    let observed = new_logprob - base_logprob;
    let predicted = d_derivs[0] * delta;
    assert!(
        (predicted - observed).abs() <= 0.02 * predicted.abs().max(observed.abs()) + 2.0e-6,
        "predicted objf change {} vs observed {} for the D1 nudge",
        predicted,
        observed
    );
}

// Discounting conserves mass: state totals survive into the discounted
// output, and the removed mass reappears in the backoff aggregation.
#[test]
fn discounting_conserves_count_mass() {
    let dir = tempfile::tempdir().unwrap();
    build_and_evaluate(dir.path(), 14);

    let mut input_total = 0.0f64;
    let mut merged = smoothlm::open_input(&dir.path().join("merged.2gram")).unwrap();
    while !at_eof(&mut merged).unwrap() {
        let state = smoothlm::GeneralLmState::read(&mut merged).unwrap();
        input_total += state.discount as f64;
        input_total += state.counts.iter().map(|&(_, c)| c.total as f64).sum::<f64>();
    }

    let mut discounted_total = 0.0f64;
    let mut removed_total = 0.0f64;
    let mut discounted = smoothlm::open_input(&dir.path().join("float.2gram")).unwrap();
    while !at_eof(&mut discounted).unwrap() {
        let state = smoothlm::FloatLmState::read(&mut discounted).unwrap();
        discounted_total += state.total as f64;
        removed_total += state.discount as f64;
    }
    assert!((input_total - discounted_total).abs() <= 1.0e-4 * input_total);

    let mut backoff_total = 0.0f64;
    let mut backoff = smoothlm::open_input(&dir.path().join("1gram")).unwrap();
    while !at_eof(&mut backoff).unwrap() {
        let state = smoothlm::GeneralLmState::read(&mut backoff).unwrap();
        backoff_total += state.discount as f64;
        backoff_total += state.counts.iter().map(|&(_, c)| c.total as f64).sum::<f64>();
    }
    assert!((removed_total - backoff_total).abs() <= 1.0e-4 * removed_total);
}

#[test]
fn remove_zeros_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    build_and_evaluate(dir.path(), 14);
    let float_all = fs::read(dir.path().join("float.all")).unwrap();
    let once = run(env!("CARGO_BIN_EXE_float-counts-remove-zeros"), &[], &float_all);
    let twice = run(env!("CARGO_BIN_EXE_float-counts-remove-zeros"), &[], &once);
    assert_eq!(once, twice);
}

#[test]
fn split_then_merge_is_identity() {
    let dir = tempfile::tempdir().unwrap();
    build_and_evaluate(dir.path(), 14);
    let float_all = fs::read(dir.path().join("float.all")).unwrap();
    run(
        env!("CARGO_BIN_EXE_split-float-counts"),
        &[&path_str(dir.path(), "part.0"), &path_str(dir.path(), "part.1")],
        &float_all,
    );
    let rejoined = run(
        env!("CARGO_BIN_EXE_merge-float-counts"),
        &[&path_str(dir.path(), "part.0"), &path_str(dir.path(), "part.1")],
        &[],
    );
    assert_eq!(rejoined, float_all);
}

fn read_int_states(data: &[u8]) -> Vec<IntLmState> {
    let mut cursor = std::io::Cursor::new(data);
    let mut states = Vec::new();
    while !at_eof(&mut cursor).unwrap() {
        states.push(IntLmState::read(&mut cursor).unwrap());
    }
    states
}

// Min-count enforcement over a corpus where "11 12 13" appears four times
// and "11 12 13 14" once: with a trigram min-count of 2, the singleton
// trigrams back off, leaving their mass in lower-order states.
#[test]
fn min_count_enforcement_discounts_singletons() {
    let dir = tempfile::tempdir().unwrap();
    let mut train = String::new();
    for _ in 0..4 {
        train.push_str("11 12 13\n");
    }
    train.push_str("11 12 13 14\n");

    let text_counts = run(env!("CARGO_BIN_EXE_get-text-counts"), &["3"], train.as_bytes());
    let sorted_counts = sort_uniq_c(&text_counts);
    run(
        env!("CARGO_BIN_EXE_get-int-counts"),
        &[&path_str(dir.path(), "all.int")],
        &sorted_counts,
    );

    run(
        env!("CARGO_BIN_EXE_int-counts-enforce-min-counts"),
        &[
            "3",
            "2",
            &path_str(dir.path(), "all.int"),
            &path_str(dir.path(), "out.2"),
            &path_str(dir.path(), "out.3"),
        ],
        &[],
    );
    let merged = run(
        env!("CARGO_BIN_EXE_merge-int-counts"),
        &[&path_str(dir.path(), "out.2"), &path_str(dir.path(), "out.3")],
        &[],
    );

    let states = read_int_states(&merged);
    let expected = vec![
        (vec![1], vec![(11, 5)], 0),
        (vec![11, 1], vec![(12, 5)], 0),
        (vec![12, 11], vec![(13, 5)], 0),
        (vec![13], vec![(14, 1)], 0),
        (vec![13, 12], vec![(2, 4)], 1),
        (vec![14], vec![(2, 1)], 0),
    ];
    assert_eq!(states.len(), expected.len());
    for (state, (history, counts, discount)) in states.iter().zip(expected) {
        assert_eq!(state.history, history);
        assert_eq!(state.counts, counts);
        assert_eq!(state.discount, discount);
    }
}

// The pruning loop: prune aggressively, regenerate stats, re-estimate, and
// check the model still normalizes and the reported improvement is sane.
#[test]
fn prune_stats_estimate_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    build_and_evaluate(dir.path(), 14);
    let float_all = fs::read(dir.path().join("float.all")).unwrap();

    // protection mask for the model's own history states.
    let histories = run(env!("CARGO_BIN_EXE_float-counts-to-histories"), &[], &float_all);
    let mut history_lines: Vec<&str> =
        std::str::from_utf8(&histories).unwrap().lines().collect();
    history_lines.sort_unstable();
    let sorted_histories = history_lines.join("\n") + "\n";
    let null_counts = run(
        env!("CARGO_BIN_EXE_histories-to-null-counts"),
        &[],
        sorted_histories.as_bytes(),
    );
    fs::write(dir.path().join("protected.all"), &null_counts).unwrap();

    let prune_stdout = run(
        env!("CARGO_BIN_EXE_float-counts-prune"),
        &[
            "0.05",
            "14",
            &path_str(dir.path(), "float.all"),
            &path_str(dir.path(), "protected.all"),
            &path_str(dir.path(), "pruned.1"),
            &path_str(dir.path(), "pruned.2"),
        ],
        &[],
    );
    let fields: Vec<f64> = String::from_utf8(prune_stdout)
        .unwrap()
        .split_whitespace()
        .map(|f| f.parse().unwrap())
        .collect();
    assert_eq!(fields.len(), 6);
    assert!(fields[1] <= 0.0, "logprob change must be <= 0");

    let pruned_all = run(
        env!("CARGO_BIN_EXE_merge-float-counts"),
        &[&path_str(dir.path(), "pruned.1"), &path_str(dir.path(), "pruned.2")],
        &[],
    );
    fs::write(dir.path().join("pruned.all"), &pruned_all).unwrap();

    // float-stats of the un-pruned model...
    run(
        env!("CARGO_BIN_EXE_float-counts-to-float-stats"),
        &["14", &path_str(dir.path(), "stats.1"), &path_str(dir.path(), "stats.2")],
        &float_all,
    );
    let stats_all = run(
        env!("CARGO_BIN_EXE_merge-float-counts"),
        &[&path_str(dir.path(), "stats.1"), &path_str(dir.path(), "stats.2")],
        &[],
    );
    fs::write(dir.path().join("stats.all"), &stats_all).unwrap();

    // ...drive one E-M step on the pruned model.
    let estimate_stdout = run(
        env!("CARGO_BIN_EXE_float-counts-estimate"),
        &[
            "14",
            &path_str(dir.path(), "pruned.all"),
            &path_str(dir.path(), "stats.all"),
            &path_str(dir.path(), "reest.1"),
            &path_str(dir.path(), "reest.2"),
        ],
        &[],
    );
    let fields: Vec<f64> = String::from_utf8(estimate_stdout)
        .unwrap()
        .split_whitespace()
        .map(|f| f.parse().unwrap())
        .collect();
    assert_eq!(fields.len(), 4); // count, logprob, auxf per order.
    let auxf_impr: f64 = fields[2..].iter().sum();
    assert!(
        auxf_impr >= -1.0e-6,
        "E-M auxiliary improvement {} must be non-negative",
        auxf_impr
    );

    // the re-estimated model must still satisfy the float-count invariants.
    let reest_all = run(
        env!("CARGO_BIN_EXE_merge-float-counts"),
        &[&path_str(dir.path(), "reest.1"), &path_str(dir.path(), "reest.2")],
        &[],
    );
    let mut cursor = std::io::Cursor::new(&reest_all[..]);
    while !at_eof(&mut cursor).unwrap() {
        let state = smoothlm::FloatLmState::read(&mut cursor).unwrap();
        let total: f64 =
            state.discount as f64 + state.counts.iter().map(|&(_, c)| c as f64).sum::<f64>();
        assert!((state.total as f64 - total).abs() <= 1.0e-4 * total.abs().max(1.0));
    }
}

// The ARPA conversion end of the pipeline, over the tiny bigram model.
#[test]
fn pre_arpa_round_trip_produces_arpa() {
    let dir = tempfile::tempdir().unwrap();
    build_and_evaluate(dir.path(), 14);

    let pre_arpa = run(
        env!("CARGO_BIN_EXE_float-counts-to-pre-arpa"),
        &["2", "14", &path_str(dir.path(), "float.all")],
        &[],
    );
    let mut lines: Vec<&str> = std::str::from_utf8(&pre_arpa).unwrap().lines().collect();
    lines.sort_unstable();
    let sorted_pre_arpa = lines.join("\n") + "\n";

    let mut vocab = String::from("0 <eps>\n1 <s>\n2 </s>\n3 <unk>\n");
    for id in 4..=14 {
        vocab.push_str(&format!("{} w{}\n", id, id));
    }
    let vocab_path = path_str(dir.path(), "words.txt");
    fs::write(PathBuf::from(&vocab_path), vocab).unwrap();

    let arpa = run(
        env!("CARGO_BIN_EXE_pre-arpa-to-arpa"),
        &[&vocab_path],
        sorted_pre_arpa.as_bytes(),
    );
    let arpa = String::from_utf8(arpa).unwrap();
    assert!(arpa.starts_with("\\data\\\n"));
    assert!(arpa.contains("ngram 1="));
    assert!(arpa.contains("ngram 2="));
    assert!(arpa.contains("\\1-grams:"));
    assert!(arpa.contains("\\2-grams:"));
    assert!(arpa.contains("<s> -99"));
    assert!(arpa.trim_end().ends_with("\\end\\"));
}
