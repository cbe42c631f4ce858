//! Progress estimation for long-running git operations
//!
//! git reports progress on stderr as loosely structured lines such as
//!
//! ```text
//! remote: Compressing objects:  45% (9/20)
//! Receiving objects:  62% (620/1000), 1.20 MiB | 2.40 MiB/s\r
//! Resolving deltas: 100% (310/310), done.
//! ```
//!
//! Each operation is described by a [`StepTable`]: the phases git goes
//! through and an approximate share of the total time each one takes. The
//! weights are highly approximate and the phase titles are not guaranteed
//! stable across git versions or locales, so a mismatch only means a coarser
//! estimate. A single [`ProgressParser`] turns the stream into a percentage
//! that never goes backwards.

use std::sync::LazyLock;

use regex::Regex;

/// One phase of a git operation
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressStep {
    /// Line prefix git prints for this phase, without the trailing colon
    pub title: String,
    /// Approximate share of total duration, in (0, 1]
    pub weight: f64,
}

impl ProgressStep {
    pub fn new(title: impl Into<String>, weight: f64) -> Self {
        Self {
            title: title.into(),
            weight,
        }
    }
}

/// Ordered, non-empty list of phases for one operation kind
#[derive(Debug, Clone, PartialEq)]
pub struct StepTable {
    steps: Vec<ProgressStep>,
}

impl StepTable {
    /// Build a table from custom steps.
    ///
    /// Returns `None` for an empty table or any weight outside (0, 1].
    pub fn new(steps: Vec<ProgressStep>) -> Option<Self> {
        if steps.is_empty() {
            return None;
        }
        if steps
            .iter()
            .any(|s| !s.weight.is_finite() || s.weight <= 0.0 || s.weight > 1.0)
        {
            return None;
        }
        Some(Self { steps })
    }

    fn from_static(steps: &[(&str, f64)]) -> Self {
        Self {
            steps: steps
                .iter()
                .map(|(title, weight)| ProgressStep::new(*title, *weight))
                .collect(),
        }
    }

    pub fn clone_steps() -> Self {
        Self::from_static(&[
            ("remote: Compressing objects", 0.1),
            ("Receiving objects", 0.6),
            ("Resolving deltas", 0.1),
            ("Checking out files", 0.2),
        ])
    }

    pub fn fetch_steps() -> Self {
        Self::from_static(&[
            ("remote: Compressing objects", 0.1),
            ("Receiving objects", 0.7),
            ("Resolving deltas", 0.2),
        ])
    }

    pub fn pull_steps() -> Self {
        Self::from_static(&[
            ("remote: Compressing objects", 0.1),
            ("Receiving objects", 0.7),
            ("Resolving deltas", 0.1),
            ("Checking out files", 0.1),
        ])
    }

    pub fn push_steps() -> Self {
        Self::from_static(&[
            ("Compressing objects", 0.2),
            ("Writing objects", 0.7),
            ("remote: Resolving deltas", 0.1),
        ])
    }

    pub fn steps(&self) -> &[ProgressStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Sum of all weights
    pub fn total_weight(&self) -> f64 {
        self.steps.iter().map(|s| s.weight).sum()
    }

    /// Index of the step whose title prefixes `line` (followed by a colon)
    fn match_title(&self, line: &str) -> Option<usize> {
        self.steps.iter().position(|step| {
            line.strip_prefix(step.title.as_str())
                .map(|rest| rest.starts_with(':'))
                .unwrap_or(false)
        })
    }
}

/// Parser lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserPhase {
    BeforeFirstStep,
    InStep(usize),
    Done,
}

/// Snapshot of parse state, owned by a single parser
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressState {
    pub phase: ParserPhase,
    pub step_fraction: f64,
    pub overall_percent: f64,
    pub current_title: String,
}

impl Default for ProgressState {
    fn default() -> Self {
        Self {
            phase: ParserPhase::BeforeFirstStep,
            step_fraction: 0.0,
            overall_percent: 0.0,
            current_title: String::new(),
        }
    }
}

/// Emitted whenever the estimate or the current phase changes
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub title: String,
    /// Overall completion in [0, 1]
    pub percent: f64,
    /// The line that produced this update (empty for the final update)
    pub text: String,
}

// "Receiving objects:  62% (620/1000)" → (620, 1000)
static FRACTION_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\((\d+)/(\d+)\)").ok());
static PERCENT_RE: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"(\d{1,3})%").ok());
// A "Title:" prefix. Used to tell titled lines of unknown phases from bare details.
static TITLE_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^(?:remote: )?[A-Za-z][A-Za-z ]*:").ok());

fn parse_fraction(line: &str) -> Option<f64> {
    if let Some(caps) = FRACTION_RE.as_ref().and_then(|re| re.captures(line)) {
        let done = caps[1].parse::<f64>().ok()?;
        let total = caps[2].parse::<f64>().ok()?;
        if total > 0.0 {
            return Some((done / total).clamp(0.0, 1.0));
        }
        return None;
    }
    let caps = PERCENT_RE.as_ref()?.captures(line)?;
    let percent = caps[1].parse::<f64>().ok()?;
    Some((percent / 100.0).clamp(0.0, 1.0))
}

fn has_title(line: &str) -> bool {
    TITLE_RE
        .as_ref()
        .map(|re| re.is_match(line))
        .unwrap_or(false)
}

/// Stateful, line-oriented progress parser configured by a [`StepTable`]
///
/// Feed it text with [`push_str`](Self::push_str) (or raw bytes with
/// [`push_bytes`](Self::push_bytes)); only complete lines are interpreted,
/// so a line split across two chunks is seen exactly once. Both `\n` and `\r`
/// terminate a line because git redraws progress in place with `\r`.
#[derive(Debug)]
pub struct ProgressParser {
    table: StepTable,
    state: ProgressState,
    partial_line: String,
    // Bytes of a UTF-8 sequence cut off at the end of the last chunk
    partial_utf8: Vec<u8>,
}

impl ProgressParser {
    pub fn new(table: StepTable) -> Self {
        Self {
            table,
            state: ProgressState::default(),
            partial_line: String::new(),
            partial_utf8: Vec::new(),
        }
    }

    pub fn state(&self) -> &ProgressState {
        &self.state
    }

    pub fn table(&self) -> &StepTable {
        &self.table
    }

    pub fn is_done(&self) -> bool {
        self.state.phase == ParserPhase::Done
    }

    /// Consume raw bytes, carrying an incomplete UTF-8 sequence to the next call
    pub fn push_bytes(&mut self, chunk: &[u8]) -> Vec<ProgressUpdate> {
        let mut bytes = std::mem::take(&mut self.partial_utf8);
        bytes.extend_from_slice(chunk);

        let text = match std::str::from_utf8(&bytes) {
            Ok(text) => text.to_string(),
            Err(e) if e.error_len().is_none() => {
                // Truncated sequence at the end, keep it for next time
                let valid = e.valid_up_to();
                self.partial_utf8 = bytes[valid..].to_vec();
                String::from_utf8_lossy(&bytes[..valid]).into_owned()
            }
            Err(_) => String::from_utf8_lossy(&bytes).into_owned(),
        };
        self.push_str(&text)
    }

    /// Consume a decoded text chunk
    pub fn push_str(&mut self, chunk: &str) -> Vec<ProgressUpdate> {
        let mut updates = Vec::new();
        if self.is_done() {
            return updates;
        }

        self.partial_line.push_str(chunk);
        let Some(last_break) = self.partial_line.rfind(['\n', '\r']) else {
            return updates;
        };

        let rest = self.partial_line.split_off(last_break + 1);
        let complete = std::mem::replace(&mut self.partial_line, rest);

        for line in complete.split(['\n', '\r']) {
            if let Some(update) = self.consume_line(line) {
                updates.push(update);
            }
        }
        updates
    }

    /// Mark the stream as ended.
    ///
    /// A trailing unterminated line is processed first. A successful exit
    /// forces the estimate to 100%; a failed one leaves it where it was.
    pub fn finish(&mut self, success: bool) -> Option<ProgressUpdate> {
        if self.is_done() {
            return None;
        }

        let trailing = std::mem::take(&mut self.partial_line);
        let mut update = self.consume_line(&trailing);

        if success {
            self.state.overall_percent = 1.0;
            if let ParserPhase::InStep(_) = self.state.phase {
                self.state.step_fraction = 1.0;
            }
            update = Some(ProgressUpdate {
                title: self.state.current_title.clone(),
                percent: 1.0,
                text: String::new(),
            });
        }

        self.state.phase = ParserPhase::Done;
        update
    }

    fn consume_line(&mut self, raw: &str) -> Option<ProgressUpdate> {
        let line = raw.trim();
        if line.is_empty() || self.is_done() {
            return None;
        }

        let before = (self.state.overall_percent, self.state.current_title.clone());

        match (self.table.match_title(line), self.state.phase) {
            // Phases only move forward; a late line from an earlier phase is noise.
            (Some(index), ParserPhase::InStep(current)) if index < current => return None,
            (Some(index), ParserPhase::InStep(current)) if index == current => {
                self.apply_fraction(line);
            }
            (Some(index), _) => {
                self.state.phase = ParserPhase::InStep(index);
                self.state.current_title = self.table.steps[index].title.clone();
                self.state.step_fraction = 0.0;
                self.apply_fraction(line);
            }
            // Bare detail line for the current phase, e.g. "(50/100)"
            (None, ParserPhase::InStep(_)) if !has_title(line) => self.apply_fraction(line),
            (None, _) => return None,
        }

        self.recompute();

        if (self.state.overall_percent, &self.state.current_title) == (before.0, &before.1) {
            return None;
        }

        Some(ProgressUpdate {
            title: self.state.current_title.clone(),
            percent: self.state.overall_percent,
            text: line.to_string(),
        })
    }

    fn apply_fraction(&mut self, line: &str) {
        if let Some(fraction) = parse_fraction(line) {
            self.state.step_fraction = fraction;
        }
    }

    fn recompute(&mut self) {
        let ParserPhase::InStep(index) = self.state.phase else {
            return;
        };
        // Earlier steps count as complete once a later one has started
        let completed: f64 = self.table.steps[..index].iter().map(|s| s.weight).sum();
        let estimate =
            (completed + self.table.steps[index].weight * self.state.step_fraction).clamp(0.0, 1.0);
        if estimate > self.state.overall_percent {
            self.state.overall_percent = estimate;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(parser: &mut ProgressParser, lines: &[&str]) -> Vec<ProgressUpdate> {
        lines
            .iter()
            .flat_map(|line| parser.push_str(&format!("{}\n", line)))
            .collect()
    }

    #[test]
    fn test_builtin_tables_are_valid() {
        for table in [
            StepTable::clone_steps(),
            StepTable::fetch_steps(),
            StepTable::pull_steps(),
            StepTable::push_steps(),
        ] {
            assert!(!table.is_empty());
            assert!(StepTable::new(table.steps().to_vec()).is_some());
            assert!((table.total_weight() - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_custom_table_validation() {
        assert!(StepTable::new(vec![]).is_none());
        assert!(StepTable::new(vec![ProgressStep::new("Counting objects", 0.0)]).is_none());
        assert!(StepTable::new(vec![ProgressStep::new("Counting objects", 1.5)]).is_none());
        assert!(StepTable::new(vec![ProgressStep::new("Counting objects", 0.4)]).is_some());
    }

    #[test]
    fn test_percent_increases_at_every_step_boundary() {
        for table in [
            StepTable::clone_steps(),
            StepTable::fetch_steps(),
            StepTable::pull_steps(),
            StepTable::push_steps(),
        ] {
            let mut parser = ProgressParser::new(table.clone());
            let mut last = parser.state().overall_percent;

            for step in table.steps() {
                feed(&mut parser, &[&format!("{}:  50% (50/100)", step.title)]);
                let now = parser.state().overall_percent;
                assert!(now > last, "{} did not advance ({} <= {})", step.title, now, last);
                last = now;
            }
            for step in table.steps() {
                feed(&mut parser, &[&format!("{}: 100% (100/100), done.", step.title)]);
            }
            assert!((parser.state().overall_percent - table.total_weight()).abs() < 1e-9);

            let update = parser.finish(true).unwrap();
            assert_eq!(update.percent, 1.0);
            assert_eq!(parser.state().phase, ParserPhase::Done);
        }
    }

    #[test]
    fn test_pull_checkout_stays_below_done() {
        let mut parser = ProgressParser::new(StepTable::pull_steps());
        feed(
            &mut parser,
            &[
                "remote: Compressing objects: 100% (4/4), done.",
                "Receiving objects: 100% (40/40), done.",
                "Resolving deltas: 100% (12/12), done.",
                "Checking out files:  50% (5/10)",
            ],
        );
        let percent = parser.state().overall_percent;
        assert!((percent - 0.95).abs() < 1e-9, "got {}", percent);

        feed(&mut parser, &["Checking out files: 100% (10/10), done."]);
        assert!((parser.state().overall_percent - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_next_step_marker_completes_previous_step() {
        let mut parser = ProgressParser::new(StepTable::fetch_steps());
        feed(
            &mut parser,
            &[
                "remote: Compressing objects:  10% (1/10)",
                "Receiving objects:   0% (0/100)",
            ],
        );
        let state = parser.state();
        assert_eq!(state.phase, ParserPhase::InStep(1));
        assert!((state.overall_percent - 0.1).abs() < 1e-9);
        assert_eq!(state.current_title, "Receiving objects");
    }

    #[test]
    fn test_weighted_estimate() {
        let mut parser = ProgressParser::new(StepTable::clone_steps());
        let updates = feed(
            &mut parser,
            &[
                "Cloning into 'repo'...",
                "remote: Enumerating objects: 1000, done.",
                "remote: Compressing objects: 100% (20/20), done.",
                "Receiving objects:  50% (500/1000), 1.00 MiB | 2.00 MiB/s",
            ],
        );
        // 0.1 + 0.6 * 0.5
        assert!((parser.state().overall_percent - 0.4).abs() < 1e-9);
        assert_eq!(updates.last().unwrap().title, "Receiving objects");
        assert!(updates.last().unwrap().text.starts_with("Receiving objects:"));
    }

    #[test]
    fn test_percent_only_lines() {
        let mut parser = ProgressParser::new(StepTable::push_steps());
        feed(&mut parser, &["Compressing objects:  25%"]);
        assert!((parser.state().step_fraction - 0.25).abs() < 1e-9);
        assert!((parser.state().overall_percent - 0.05).abs() < 1e-9);
    }

    #[test]
    fn test_bare_detail_line_updates_current_step() {
        let mut parser = ProgressParser::new(StepTable::fetch_steps());
        feed(&mut parser, &["Receiving objects:", "(50/100)"]);
        assert!((parser.state().overall_percent - (0.1 + 0.35)).abs() < 1e-9);
    }

    #[test]
    fn test_garbage_never_decreases_percent() {
        let mut parser = ProgressParser::new(StepTable::clone_steps());
        let lines = [
            "remote: Compressing objects:  50% (5/10)",
            "%%%% (((/)))",
            "remote: Counting objects:   3% (3/100)",
            "Receiving objects:  40% (40/100)",
            "warning: redirecting to https://example.com/repo.git/",
            "Receiving objects:  10% (10/100)",
            "remote: Compressing objects: 0% (0/10)",
            "\u{1b}[K garbage (9999/0)",
            "Resolving deltas:  20% (2/10)",
            "(1/1000)",
            "fatal: the remote end hung up unexpectedly",
        ];
        let mut last = 0.0;
        for line in lines {
            feed(&mut parser, &[line]);
            let now = parser.state().overall_percent;
            assert!(now >= last, "'{}' decreased percent {} -> {}", line, last, now);
            last = now;
        }
        assert_eq!(parser.state().phase, ParserPhase::InStep(2));
    }

    #[test]
    fn test_lines_split_across_chunks() {
        let mut parser = ProgressParser::new(StepTable::fetch_steps());
        assert!(parser.push_str("Receiving obj").is_empty());
        assert!(parser.push_str("ects:  50% (5").is_empty());
        let updates = parser.push_str("0/100)\rReceiving objects:  60% (60/100)\r");
        assert_eq!(updates.len(), 2);
        assert!((updates[0].percent - 0.45).abs() < 1e-9);
        assert!((updates[1].percent - 0.52).abs() < 1e-9);
    }

    #[test]
    fn test_push_bytes_carries_partial_utf8() {
        let mut parser = ProgressParser::new(StepTable::fetch_steps());
        let line = "Receiving objects:  50% (50/100), 1.00 MiB | ß\n".as_bytes();
        let cut = line.len() - 2; // inside the two-byte 'ß'
        assert!(parser.push_bytes(&line[..cut]).is_empty());
        let updates = parser.push_bytes(&line[cut..]);
        assert_eq!(updates.len(), 1);
        assert!(updates[0].text.ends_with('ß'));
    }

    #[test]
    fn test_trailing_line_processed_on_finish() {
        let mut parser = ProgressParser::new(StepTable::fetch_steps());
        parser.push_str("Receiving objects:  50% (50/100)");
        let update = parser.finish(false).unwrap();
        assert!((update.percent - 0.45).abs() < 1e-9);
    }

    #[test]
    fn test_failed_exit_keeps_last_value() {
        let mut parser = ProgressParser::new(StepTable::fetch_steps());
        feed(&mut parser, &["Receiving objects:  20% (20/100)"]);
        assert!(parser.finish(false).is_none());
        assert!((parser.state().overall_percent - 0.24).abs() < 1e-9);
        assert!(parser.push_str("Resolving deltas: 100% (1/1)\n").is_empty());
        assert!(parser.finish(true).is_none());
    }

    #[test]
    fn test_success_without_any_progress_lines() {
        let mut parser = ProgressParser::new(StepTable::push_steps());
        feed(&mut parser, &["Everything up-to-date"]);
        let update = parser.finish(true).unwrap();
        assert_eq!(update.percent, 1.0);
        assert_eq!(update.title, "");
    }
}
