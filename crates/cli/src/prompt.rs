//! Interactive confirmation before writing.

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Stdin, Stderr};
use tokio::sync::Mutex;
use transfer::{CollectionPath, ConfirmationGate, Decision, MappedBatch};

/// Asks `Proceed with upload? (y/n)` and reads one line.
///
/// Only `y` (any case, surrounding whitespace ignored) applies the plan.
/// Anything else, end of input, or an I/O error selects a dry run.
#[derive(Debug)]
pub struct PromptGate<R, W> {
    io: Mutex<(R, W)>,
}

impl PromptGate<BufReader<Stdin>, Stderr> {
    /// Prompt on stderr, answer on stdin.
    pub fn stdio() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()), tokio::io::stderr())
    }
}

impl<R, W> PromptGate<R, W> {
    /// Prompt on `output`, answer on `input`.
    pub fn new(input: R, output: W) -> Self {
        Self {
            io: Mutex::new((input, output)),
        }
    }
}

/// The text shown above the question.
pub fn describe_plan(
    collection: &CollectionPath,
    plan: &MappedBatch,
    existing: Option<u64>,
) -> String {
    let uploading = plan.records.len();
    let mut text = format!(
        "\n/{collection}\n  uploading: {uploading} records ({} rows skipped)\n",
        plan.skipped.len()
    );
    match existing {
        // Upserts replace documents with the same key, so this is an upper bound.
        Some(n) => text.push_str(&format!(
            "  existing:  {n} records\n  after upload: at most {} records\n",
            n + uploading as u64
        )),
        None => text.push_str("  existing:  unknown\n"),
    }
    text
}

/// Interprets one answer line.
pub fn parse_answer(line: &str) -> Decision {
    if line.trim().eq_ignore_ascii_case("y") {
        Decision::Apply
    } else {
        Decision::DryRun
    }
}

#[async_trait]
impl<R, W> ConfirmationGate for PromptGate<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn confirm(
        &self,
        collection: &CollectionPath,
        plan: &MappedBatch,
        existing: Option<u64>,
    ) -> Decision {
        let mut io = self.io.lock().await;
        let (input, output) = &mut *io;

        let question = format!(
            "{}Proceed with upload? (y/n): ",
            describe_plan(collection, plan, existing)
        );
        if output.write_all(question.as_bytes()).await.is_err() || output.flush().await.is_err() {
            return Decision::DryRun;
        }

        let mut line = String::new();
        let decision = match input.read_line(&mut line).await {
            Ok(0) => Decision::DryRun,
            Ok(_) => parse_answer(&line),
            Err(e) => {
                tracing::warn!(error = %e, "cannot read confirmation");
                Decision::DryRun
            }
        };
        if decision == Decision::DryRun {
            let _ = output.write_all(b"Running in dry run mode...\n").await;
        }
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan() -> MappedBatch {
        MappedBatch::default()
    }

    async fn ask(answer: &'static [u8]) -> (Decision, String) {
        let gate = PromptGate::new(answer, Vec::new());
        let decision = gate
            .confirm(&CollectionPath::new("issues").unwrap(), &plan(), Some(40))
            .await;
        let (_, output) = gate.io.into_inner();
        (decision, String::from_utf8(output).unwrap())
    }

    #[test]
    fn only_y_applies() {
        assert_eq!(parse_answer("y\n"), Decision::Apply);
        assert_eq!(parse_answer(" Y "), Decision::Apply);
        assert_eq!(parse_answer("yes"), Decision::DryRun);
        assert_eq!(parse_answer("n"), Decision::DryRun);
        assert_eq!(parse_answer(""), Decision::DryRun);
    }

    #[tokio::test]
    async fn answer_is_read_from_input() {
        let (decision, output) = ask(b"y\n").await;
        assert_eq!(decision, Decision::Apply);
        assert!(output.contains("Proceed with upload? (y/n)"));
        assert!(output.contains("/issues"));
    }

    #[tokio::test]
    async fn question_shows_existing_count() {
        let (_, output) = ask(b"n\n").await;
        assert!(output.contains("existing:  40 records"));
        assert!(output.contains("uploading: 0 records"));
    }

    #[test]
    fn unknown_existing_count_is_stated() {
        let text = describe_plan(&CollectionPath::new("issues").unwrap(), &plan(), None);
        assert!(text.contains("existing:  unknown"));
        assert!(!text.contains("after upload"));
    }

    #[tokio::test]
    async fn end_of_input_is_a_dry_run() {
        let (decision, output) = ask(b"").await;
        assert_eq!(decision, Decision::DryRun);
        assert!(output.ends_with("Running in dry run mode...\n"));
    }
}
