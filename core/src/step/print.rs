//! Printed-output sinks

/// Receives script output lines as they are produced
pub trait PrintSink {
    fn append(&mut self, line: &str);
}

impl PrintSink for Vec<String> {
    fn append(&mut self, line: &str) {
        self.push(line.to_string());
    }
}

/// Discards output
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl PrintSink for NullSink {
    fn append(&mut self, _line: &str) {}
}

/// Forwards output to tracing, tagged with the run it belongs to
#[derive(Debug, Clone)]
pub struct TracingSink {
    pub call_id: String,
}

impl PrintSink for TracingSink {
    fn append(&mut self, line: &str) {
        tracing::info!(call_id = %self.call_id, "{}", line);
    }
}
