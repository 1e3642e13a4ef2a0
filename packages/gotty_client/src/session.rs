use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Most recent output chunks kept in the log.
pub const OUTPUT_LOG_LIMIT: usize = 1000;
/// Most recent completed lines kept in the history.
pub const HISTORY_LIMIT: usize = 100;

/// Terminal output reconstructed from output frames.
///
/// Holds three things: the raw chunks in arrival order, the line currently
/// being assembled, and the completed lines. The partial line never contains
/// a newline.
#[derive(Debug, Default, Clone)]
pub struct TerminalLog {
    output: VecDeque<String>,
    partial_line: String,
    history: VecDeque<String>,
    total_appended: u64,
}

impl TerminalLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one decoded output chunk. Returns the lines it completed that
    /// were added to the history.
    pub fn apply_output(&mut self, chunk: &str) -> Vec<String> {
        self.output.push_back(chunk.to_string());
        if self.output.len() > OUTPUT_LOG_LIMIT {
            self.output.pop_front();
        }
        self.total_appended += 1;

        let mut completed = Vec::new();
        let mut rest = chunk;
        while let Some(pos) = rest.find('\n') {
            self.partial_line.push_str(&rest[..pos]);
            let line = std::mem::take(&mut self.partial_line);
            let line = line.trim();
            if !line.is_empty() {
                self.history.push_back(line.to_string());
                if self.history.len() > HISTORY_LIMIT {
                    self.history.pop_front();
                }
                completed.push(line.to_string());
            }
            rest = &rest[pos + 1..];
        }
        self.partial_line.push_str(rest);

        completed
    }

    /// Copy of the output log, optionally only the last `last_n` chunks.
    pub fn output(&self, last_n: Option<usize>) -> Vec<String> {
        let skip = match last_n {
            Some(n) => self.output.len().saturating_sub(n),
            None => 0,
        };
        self.output.iter().skip(skip).cloned().collect()
    }

    pub fn history(&self) -> Vec<String> {
        self.history.iter().cloned().collect()
    }

    pub fn partial_line(&self) -> &str {
        &self.partial_line
    }

    pub fn output_len(&self) -> usize {
        self.output.len()
    }

    /// Number of chunks ever applied, including the ones evicted from the log.
    pub fn total_appended(&self) -> u64 {
        self.total_appended
    }

    /// Chunks applied after the log had seen `mark` chunks in total, as far as
    /// the log still retains them. `None` when nothing new arrived.
    pub fn output_since(&self, mark: u64) -> Option<Vec<String>> {
        let new = self.total_appended.checked_sub(mark).filter(|n| *n > 0)?;
        let retained = usize::try_from(new).unwrap_or(usize::MAX);
        Some(self.output(Some(retained)))
    }
}

/// Shared handle to the session's [`TerminalLog`].
///
/// The receive loop is the only writer; every read returns an owned copy.
#[derive(Clone, Default)]
pub struct SessionState {
    log: Arc<RwLock<TerminalLog>>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn apply_output(&self, chunk: &str) -> Vec<String> {
        self.log.write().await.apply_output(chunk)
    }

    pub async fn snapshot_output(&self, last_n: Option<usize>) -> Vec<String> {
        self.log.read().await.output(last_n)
    }

    pub async fn snapshot_history(&self) -> Vec<String> {
        self.log.read().await.history()
    }

    pub async fn partial_line(&self) -> String {
        self.log.read().await.partial_line().to_string()
    }

    pub async fn output_len(&self) -> usize {
        self.log.read().await.output_len()
    }

    pub async fn total_appended(&self) -> u64 {
        self.log.read().await.total_appended()
    }

    pub async fn output_since(&self, mark: u64) -> Option<Vec<String>> {
        self.log.read().await.output_since(mark)
    }
}
