//! Script curator: turns a session ledger into one standalone script.
//!
//! Only `executed-success` records contribute code. A record is left out
//! when the next successful record supersedes it: same code modulo
//! whitespace, or a superset of its lines that regenerates every artifact it
//! produced. Only the immediately following success is considered, so a step
//! that a later step might depend on is never skipped over.
//!
//! Declared inputs become positional parameters, the session output
//! directory becomes `OUTPUT_DIR`, and the text carries no timestamps, so the
//! same ledger always yields the same script.

use std::collections::{BTreeSet, HashSet};
use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};

use rigor_ledger::{ExecutionRecord, Outcome, SessionId};

use crate::sandbox::{RUNS_DIR, STAGING_DIR};

/// Language of the generated script.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptDialect {
    #[default]
    Python,
    Shell,
}

impl ScriptDialect {
    pub fn extension(&self) -> &'static str {
        match self {
            ScriptDialect::Python => "py",
            ScriptDialect::Shell => "sh",
        }
    }
}

impl std::str::FromStr for ScriptDialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "python" | "py" => Ok(ScriptDialect::Python),
            "shell" | "sh" => Ok(ScriptDialect::Shell),
            other => Err(format!("unknown script dialect {other:?}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CuratorConfig {
    pub dialect: ScriptDialect,
    /// File name, without extension, used by `save_curated_script`.
    pub file_stem: String,
}

impl Default for CuratorConfig {
    fn default() -> Self {
        Self {
            dialect: ScriptDialect::Python,
            file_stem: "reproducible_analysis".into(),
        }
    }
}

impl CuratorConfig {
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.file_stem, self.dialect.extension())
    }
}

/// Generated script plus which records went into it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CuratedScript {
    pub text: String,
    /// Sequence numbers of included records, ascending.
    pub selected: Vec<u64>,
    /// Successful records left out as superseded.
    pub dropped: Vec<u64>,
    /// Declared inputs, in parameter order.
    pub inputs: Vec<String>,
}

fn normalized(code: &str) -> String {
    code.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn content_lines(code: &str) -> impl Iterator<Item = &str> {
    code.lines().map(str::trim).filter(|l| !l.is_empty())
}

/// Whether running `later` makes running `earlier` first pointless.
fn supersedes(later: &ExecutionRecord, earlier: &ExecutionRecord) -> bool {
    if normalized(&later.code) == normalized(&earlier.code) {
        return true;
    }
    let produced: BTreeSet<&str> = earlier.artifacts().iter().map(|a| a.name.as_str()).collect();
    if produced.is_empty() {
        return false;
    }
    let reproduced: BTreeSet<&str> = later.artifacts().iter().map(|a| a.name.as_str()).collect();
    if !produced.is_subset(&reproduced) {
        return false;
    }
    let later_lines: HashSet<&str> = content_lines(&later.code).collect();
    content_lines(&earlier.code).all(|l| later_lines.contains(l))
}

/// Split successful records into kept and superseded, in sequence order.
pub fn select_steps(records: &[ExecutionRecord]) -> (Vec<&ExecutionRecord>, Vec<u64>) {
    let mut successes: Vec<&ExecutionRecord> = records
        .iter()
        .filter(|r| r.outcome == Outcome::ExecutedSuccess)
        .collect();
    successes.sort_by_key(|r| r.seq);

    let mut kept = Vec::new();
    let mut dropped = Vec::new();
    for (idx, record) in successes.iter().enumerate() {
        match successes.get(idx + 1) {
            Some(next) if supersedes(next, record) => dropped.push(record.seq),
            _ => kept.push(*record),
        }
    }
    (kept, dropped)
}

fn declared_inputs(steps: &[&ExecutionRecord]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for step in steps {
        for input in &step.inputs {
            if !input.is_empty() && seen.insert(input.as_str()) {
                out.push(input.clone());
            }
        }
    }
    out
}

fn input_var(idx: usize) -> String {
    format!("INPUT_{}", idx + 1)
}

fn display_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}

/// Rewrites recorded paths into the script's parameters.
struct PathRewriter {
    inputs: Vec<(String, String)>,
    /// `(quoted, bare)` matchers for the session output directory.
    output: Option<(Regex, Regex)>,
    dialect: ScriptDialect,
}

impl PathRewriter {
    fn new(inputs: &[String], output_dir: Option<&Path>, dialect: ScriptDialect) -> Self {
        let mut pairs: Vec<(String, String)> = inputs
            .iter()
            .enumerate()
            .map(|(i, p)| (p.clone(), input_var(i)))
            .collect();
        // Longest first so `/data/a.csv.bak` is not eaten by `/data/a.csv`.
        pairs.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));

        let output = output_dir
            .map(|dir| regex::escape(&dir.to_string_lossy()))
            .filter(|dir| !dir.is_empty())
            .and_then(|dir| {
                // A run directory inside the output tree collapses to OUTPUT_DIR
                // itself: the standalone script writes everything in one place.
                let run_dirs = format!(
                    r"(?:/(?:{}|{})/[0-9a-fA-F-]{{36}})?",
                    regex::escape(RUNS_DIR),
                    regex::escape(STAGING_DIR)
                );
                let quoted = Regex::new(&format!(
                    r#"(?:'{dir}{run_dirs}(/[^'\n]*)?'|"{dir}{run_dirs}(/[^"\n]*)?")"#
                ))
                .ok()?;
                let bare = Regex::new(&format!("{dir}{run_dirs}")).ok()?;
                Some((quoted, bare))
            });

        Self {
            inputs: pairs,
            output,
            dialect,
        }
    }

    fn rewrite(&self, code: &str) -> String {
        let mut text = code.to_string();
        for (path, var) in &self.inputs {
            let (quoted, bare) = match self.dialect {
                ScriptDialect::Python => (var.clone(), var.clone()),
                ScriptDialect::Shell => (format!("\"${{{var}}}\""), format!("${{{var}}}")),
            };
            for q in ['\'', '"'] {
                text = text.replace(&format!("{q}{path}{q}"), &quoted);
            }
            if self.dialect == ScriptDialect::Shell {
                text = text.replace(path.as_str(), &bare);
            }
        }

        if let Some((quoted, bare)) = &self.output {
            let dialect = self.dialect;
            text = quoted
                .replace_all(&text, |caps: &regex::Captures<'_>| {
                    let rest = caps
                        .get(1)
                        .or_else(|| caps.get(2))
                        .map(|m| m.as_str().trim_start_matches('/'))
                        .unwrap_or("");
                    match (dialect, rest.is_empty()) {
                        (ScriptDialect::Python, true) => "OUTPUT_DIR".to_string(),
                        (ScriptDialect::Python, false) => {
                            format!("os.path.join(OUTPUT_DIR, {})", python_str(rest))
                        }
                        (ScriptDialect::Shell, true) => "\"${OUTPUT_DIR}\"".to_string(),
                        (ScriptDialect::Shell, false) => format!("\"${{OUTPUT_DIR}}/{rest}\""),
                    }
                })
                .into_owned();
            if dialect == ScriptDialect::Shell {
                text = bare.replace_all(&text, "$${OUTPUT_DIR}").into_owned();
            }
        }
        text
    }
}

/// Double-quoted Python 3 string literal. Non-ASCII text is kept as is,
/// since Python 3 source is UTF-8.
fn python_str(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 || c == '\u{7f}' => {
                out.push_str(&format!("\\x{:02x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn python_header(session_id: &SessionId, inputs: &[String], kept: usize, dropped: usize) -> String {
    let mut out = String::new();
    out.push_str("#!/usr/bin/env python3\n");
    out.push_str(&format!(
        "\"\"\"Reproducible analysis for session {session_id}.\n\n\
         Rebuilt from the session ledger: {kept} step(s) kept, {dropped} superseded step(s) omitted.\n\
         Steps that were blocked or failed are never included.\n\"\"\"\n\n"
    ));
    out.push_str("import argparse\nimport os\n\n\n");
    out.push_str("def _parse_args():\n");
    out.push_str(&format!(
        "    parser = argparse.ArgumentParser(description={})\n",
        python_str(&format!("Re-run the analysis of session {session_id}."))
    ));
    for (idx, input) in inputs.iter().enumerate() {
        out.push_str(&format!(
            "    parser.add_argument({}, help={})\n",
            python_str(&input_var(idx).to_ascii_lowercase()),
            python_str(&format!("input file (recorded as {})", display_name(input)))
        ));
    }
    out.push_str(
        "    parser.add_argument(\"--output-dir\", default=\"output\", help=\"directory for results\")\n",
    );
    out.push_str("    return parser.parse_args()\n\n\n");
    out.push_str("_ARGS = _parse_args()\n");
    for idx in 0..inputs.len() {
        let var = input_var(idx);
        out.push_str(&format!(
            "{var} = os.path.abspath(_ARGS.{})\n",
            var.to_ascii_lowercase()
        ));
    }
    out.push_str("OUTPUT_DIR = os.path.abspath(_ARGS.output_dir)\n");
    out.push_str("os.makedirs(OUTPUT_DIR, exist_ok=True)\n");
    out.push_str("os.environ[\"OUTPUT_DIR\"] = OUTPUT_DIR\n");
    out.push_str("os.chdir(OUTPUT_DIR)\n");
    out
}

fn shell_header(session_id: &SessionId, inputs: &[String], kept: usize, dropped: usize) -> String {
    let vars: Vec<String> = (0..inputs.len()).map(input_var).collect();
    let usage = if vars.is_empty() {
        "[OUTPUT_DIR]".to_string()
    } else {
        format!("{} [OUTPUT_DIR]", vars.join(" "))
    };

    let mut out = String::new();
    out.push_str("#!/bin/sh\n");
    out.push_str(&format!("# Reproducible analysis for session {session_id}.\n"));
    out.push_str(&format!(
        "# Rebuilt from the session ledger: {kept} step(s) kept, {dropped} superseded step(s) omitted.\n"
    ));
    out.push_str("# Steps that were blocked or failed are never included.\n#\n");
    out.push_str(&format!("# usage: $0 {usage}\n"));
    for (idx, input) in inputs.iter().enumerate() {
        out.push_str(&format!(
            "#   {}: input file (recorded as {})\n",
            vars[idx],
            display_name(input)
        ));
    }
    out.push_str("set -eu\n\n");
    if !vars.is_empty() {
        out.push_str(&format!("if [ \"$#\" -lt {} ]; then\n", vars.len()));
        out.push_str(&format!("    echo \"usage: $0 {usage}\" >&2\n"));
        out.push_str("    exit 2\nfi\n");
    }
    for (idx, var) in vars.iter().enumerate() {
        let n = idx + 1;
        out.push_str(&format!(
            "{var}=$(cd \"$(dirname \"${n}\")\" && pwd)/$(basename \"${n}\")\n"
        ));
    }
    out.push_str(&format!("OUTPUT_DIR=${{{}:-output}}\n", vars.len() + 1));
    out.push_str("mkdir -p \"$OUTPUT_DIR\"\n");
    out.push_str("OUTPUT_DIR=$(cd \"$OUTPUT_DIR\" && pwd)\n");
    out.push_str("export OUTPUT_DIR\n");
    out.push_str("cd \"$OUTPUT_DIR\"\n");
    out
}

/// Build the reproducible script for one session's records.
///
/// `output_dir` is the session output directory; occurrences of it in the
/// recorded code are rewritten to the script's `OUTPUT_DIR`.
pub fn curate(
    session_id: &SessionId,
    records: &[ExecutionRecord],
    output_dir: Option<&Path>,
    dialect: ScriptDialect,
) -> CuratedScript {
    let (kept, dropped) = select_steps(records);
    let inputs = declared_inputs(&kept);
    let rewriter = PathRewriter::new(&inputs, output_dir, dialect);

    let mut text = match dialect {
        ScriptDialect::Python => python_header(session_id, &inputs, kept.len(), dropped.len()),
        ScriptDialect::Shell => shell_header(session_id, &inputs, kept.len(), dropped.len()),
    };

    if kept.is_empty() {
        text.push_str("\n# No successful steps recorded for this session.\n");
    }
    for step in &kept {
        text.push_str(&format!(
            "\n# --- step {} (attempt {}) ---\n",
            step.seq, step.attempt_id
        ));
        let body = rewriter.rewrite(&step.code);
        text.push_str(body.trim_end());
        text.push('\n');
    }

    CuratedScript {
        text,
        selected: kept.iter().map(|r| r.seq).collect(),
        dropped,
        inputs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use proptest::prelude::*;
    use rigor_ledger::{
        ArtifactRef, CapturedOutput, ConfirmationStatus, ContentDigest, FailureKind,
        NewExecutionRecord, RecordVerdicts,
    };
    use uuid::Uuid;

    fn record(seq: u64, code: &str, outcome: Outcome, artifacts: &[&str]) -> ExecutionRecord {
        record_with_inputs(seq, code, outcome, artifacts, &[])
    }

    fn record_with_inputs(
        seq: u64,
        code: &str,
        outcome: Outcome,
        artifacts: &[&str],
        inputs: &[&str],
    ) -> ExecutionRecord {
        let now = Utc::now();
        let attempt_id = Uuid::from_u128(seq as u128);
        let output = (outcome != Outcome::Blocked).then(|| CapturedOutput {
            artifacts: artifacts
                .iter()
                .map(|name| ArtifactRef {
                    name: name.to_string(),
                    path: format!("runs/{attempt_id}/{name}"),
                    bytes: 1,
                    sha256: ContentDigest::from_bytes(name.as_bytes()).to_string(),
                })
                .collect(),
            ..CapturedOutput::default()
        });
        let new = NewExecutionRecord {
            attempt_id,
            code: code.into(),
            code_digest: ContentDigest::from_bytes(code.as_bytes()),
            confirmed_flag: false,
            prior_seq: None,
            verdicts: RecordVerdicts::default(),
            confirmation: if outcome == Outcome::Blocked {
                ConfirmationStatus::RequiredPending
            } else {
                ConfirmationStatus::NotRequired
            },
            outcome,
            failure: (outcome == Outcome::ExecutedFailure).then(|| FailureKind::ExecutionFault {
                exit_code: Some(1),
                message: "boom".into(),
            }),
            output,
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            started_at: now,
            ended_at: now,
        };
        ExecutionRecord::seal(SessionId::from("cur"), seq, new, None).unwrap()
    }

    fn sid() -> SessionId {
        SessionId::from("cur")
    }

    #[test]
    fn test_only_successful_code_is_included() {
        let records = vec![
            record(1, "print('blocked step')", Outcome::Blocked, &[]),
            record(2, "print('good step')", Outcome::ExecutedSuccess, &[]),
            record(3, "print('failed step')", Outcome::ExecutedFailure, &[]),
        ];
        let script = curate(&sid(), &records, None, ScriptDialect::Python);
        assert_eq!(script.selected, vec![2]);
        assert!(script.text.contains("print('good step')"));
        assert!(!script.text.contains("blocked step"));
        assert!(!script.text.contains("failed step"));
        assert!(script.text.contains("# --- step 2 (attempt"));
    }

    #[test]
    fn test_identical_resubmission_keeps_the_later_copy() {
        let records = vec![
            record(1, "x = load()\nplot(x)", Outcome::ExecutedSuccess, &["fig.png"]),
            record(2, "x = load()\n  plot(x)  ", Outcome::ExecutedSuccess, &["fig.png"]),
        ];
        let (kept, dropped) = select_steps(&records);
        assert_eq!(kept.iter().map(|r| r.seq).collect::<Vec<_>>(), vec![2]);
        assert_eq!(dropped, vec![1]);
    }

    #[test]
    fn test_superset_that_regenerates_artifacts_supersedes() {
        let records = vec![
            record(1, "x = load()\nsavefig('fig.png')", Outcome::ExecutedSuccess, &["fig.png"]),
            record(
                2,
                "x = load()\nx = clean(x)\nsavefig('fig.png')",
                Outcome::ExecutedSuccess,
                &["fig.png", "table.csv"],
            ),
        ];
        let (_, dropped) = select_steps(&records);
        assert_eq!(dropped, vec![1]);
    }

    #[test]
    fn test_step_without_artifacts_is_not_dropped_for_superset() {
        let records = vec![
            record(1, "x = load()", Outcome::ExecutedSuccess, &[]),
            record(2, "x = load()\nsavefig('fig.png')", Outcome::ExecutedSuccess, &["fig.png"]),
        ];
        let (kept, dropped) = select_steps(&records);
        assert_eq!(kept.len(), 2);
        assert!(dropped.is_empty());
    }

    #[test]
    fn test_intermediate_dependency_blocks_supersession() {
        // Step 2 reads what step 1 defined; step 3 repeats step 1 later.
        let records = vec![
            record(1, "x = load()", Outcome::ExecutedSuccess, &[]),
            record(2, "y = summarize(x)", Outcome::ExecutedSuccess, &[]),
            record(3, "x = load()", Outcome::ExecutedSuccess, &[]),
        ];
        let (kept, dropped) = select_steps(&records);
        assert_eq!(kept.iter().map(|r| r.seq).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert!(dropped.is_empty());
    }

    #[test]
    fn test_failed_step_between_duplicates_is_ignored() {
        let records = vec![
            record(1, "x = load()", Outcome::ExecutedSuccess, &[]),
            record(2, "broken(", Outcome::ExecutedFailure, &[]),
            record(3, "x = load()", Outcome::ExecutedSuccess, &[]),
        ];
        let (kept, dropped) = select_steps(&records);
        assert_eq!(kept.iter().map(|r| r.seq).collect::<Vec<_>>(), vec![3]);
        assert_eq!(dropped, vec![1]);
    }

    #[test]
    fn test_python_paths_become_parameters() {
        let out = Path::new("/srv/rigor/sessions/cur/output");
        let code = "import numpy as np\n\
                    d = np.loadtxt('/data/raw/trace.csv', delimiter=',')\n\
                    np.save('/srv/rigor/sessions/cur/output/runs/00000000-0000-0000-0000-000000000001/clean.npy', d)\n";
        let records = vec![record_with_inputs(
            1,
            code,
            Outcome::ExecutedSuccess,
            &["clean.npy"],
            &["/data/raw/trace.csv"],
        )];
        let script = curate(&sid(), &records, Some(out), ScriptDialect::Python);

        assert_eq!(script.inputs, vec!["/data/raw/trace.csv".to_string()]);
        assert!(script.text.contains("np.loadtxt(INPUT_1, delimiter=',')"));
        assert!(script
            .text
            .contains("np.save(os.path.join(OUTPUT_DIR, \"clean.npy\"), d)"));
        assert!(script.text.contains("parser.add_argument(\"input_1\""));
        assert!(script.text.contains("recorded as trace.csv"));
        assert!(!script.text.contains("/data/raw"));
        assert!(!script.text.contains("/srv/rigor"));
    }

    #[test]
    fn test_python_literals_use_python_escapes() {
        assert_eq!(python_str("caf\u{e9}/r\u{e9}sultat.csv"), "\"caf\u{e9}/r\u{e9}sultat.csv\"");
        assert_eq!(python_str("a\"b\\c\nd\u{1}"), r#""a\"b\\c\nd\x01""#);

        let out = Path::new("/srv/rigor/sessions/cur/output");
        let code = "df.to_csv('/srv/rigor/sessions/cur/output/r\u{e9}sum\u{e9}.csv')\n";
        let records = vec![record(1, code, Outcome::ExecutedSuccess, &["r\u{e9}sum\u{e9}.csv"])];
        let script = curate(&sid(), &records, Some(out), ScriptDialect::Python);
        assert!(script
            .text
            .contains("df.to_csv(os.path.join(OUTPUT_DIR, \"r\u{e9}sum\u{e9}.csv\"))"));
        assert!(!script.text.contains("\\u{"));
    }

    #[test]
    fn test_shell_paths_become_parameters() {
        let out = Path::new("/srv/rigor/sessions/cur/output");
        let code = "wc -l /data/in.txt > /srv/rigor/sessions/cur/output/count.txt\n\
                    cat '/data/in.txt'\n";
        let records = vec![record_with_inputs(
            1,
            code,
            Outcome::ExecutedSuccess,
            &["count.txt"],
            &["/data/in.txt"],
        )];
        let script = curate(&sid(), &records, Some(out), ScriptDialect::Shell);

        assert!(script.text.starts_with("#!/bin/sh\n"));
        assert!(script.text.contains("set -eu"));
        assert!(script
            .text
            .contains("wc -l ${INPUT_1} > ${OUTPUT_DIR}/count.txt"));
        assert!(script.text.contains("cat \"${INPUT_1}\""));
        assert!(script.text.contains("OUTPUT_DIR=${2:-output}"));
        assert!(!script.text.contains("/data/in.txt"));
    }

    #[test]
    fn test_header_counts_and_determinism() {
        let records = vec![
            record(1, "echo a", Outcome::ExecutedSuccess, &[]),
            record(2, "echo a", Outcome::ExecutedSuccess, &[]),
            record(3, "echo b", Outcome::ExecutedSuccess, &[]),
        ];
        let a = curate(&sid(), &records, None, ScriptDialect::Shell);
        let b = curate(&sid(), &records, None, ScriptDialect::Shell);
        assert_eq!(a, b);
        assert!(a.text.contains("session cur"));
        assert!(a.text.contains("2 step(s) kept, 1 superseded step(s) omitted"));
    }

    #[test]
    fn test_empty_ledger_still_yields_a_runnable_header() {
        let script = curate(&sid(), &[], None, ScriptDialect::Python);
        assert!(script.selected.is_empty());
        assert!(script.text.contains("No successful steps recorded"));
        assert!(script.text.contains("OUTPUT_DIR = os.path.abspath"));
    }

    #[test]
    fn test_dialect_parsing() {
        assert_eq!("Python".parse::<ScriptDialect>(), Ok(ScriptDialect::Python));
        assert_eq!("sh".parse::<ScriptDialect>(), Ok(ScriptDialect::Shell));
        assert!("perl".parse::<ScriptDialect>().is_err());
        assert_eq!(CuratorConfig::default().file_name(), "reproducible_analysis.py");
    }

    fn any_outcome() -> impl Strategy<Value = Outcome> {
        prop_oneof![
            Just(Outcome::Blocked),
            Just(Outcome::ExecutedSuccess),
            Just(Outcome::ExecutedFailure),
        ]
    }

    proptest! {
        #[test]
        fn selection_only_draws_on_successes(
            steps in proptest::collection::vec((any_outcome(), 0u8..4), 0..24)
        ) {
            let records: Vec<ExecutionRecord> = steps
                .iter()
                .enumerate()
                .map(|(i, (outcome, variant))| {
                    let code = format!("step_{variant}()");
                    record(i as u64 + 1, &code, *outcome, &[])
                })
                .collect();
            let script = curate(&sid(), &records, None, ScriptDialect::Python);

            let successes: Vec<u64> = records
                .iter()
                .filter(|r| r.outcome == Outcome::ExecutedSuccess)
                .map(|r| r.seq)
                .collect();
            let mut accounted: Vec<u64> = script.selected.iter().chain(&script.dropped).copied().collect();
            accounted.sort_unstable();
            prop_assert_eq!(accounted, successes.clone());
            prop_assert!(script.selected.windows(2).all(|w| w[0] < w[1]));
            // The last success is never superseded.
            if let Some(last) = successes.last() {
                prop_assert_eq!(script.selected.last(), Some(last));
            }
        }
    }
}
