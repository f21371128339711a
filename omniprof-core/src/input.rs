//! Scripted Interactive Input
//!
//! The only sanctioned source of interactive input for profiled code. The
//! driver forwards every `input()` call to the supervisor, which answers from
//! an [`InputSource`].

use crate::RequestError;

/// Default responses, chosen to get typical menu-driven scripts to exit.
pub const DEFAULT_INPUTS: &[&str] = &["1", "10", "2", "5", "3", "100", "exit", "quit", "4"];

/// Deterministic sequence of scripted responses.
///
/// Values are returned in order; once exhausted the last value repeats
/// forever, so scripts that ask for more input than anticipated keep running.
#[derive(Debug, Clone)]
pub struct InputSource {
    values: Vec<String>,
    cursor: usize,
}

impl InputSource {
    /// Create a source over `values`. An empty list is rejected.
    pub fn new(values: Vec<String>) -> Result<Self, RequestError> {
        if values.is_empty() {
            return Err(RequestError::EmptyInputSequence);
        }
        Ok(Self { values, cursor: 0 })
    }

    /// Next scripted response.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> String {
        let index = self.cursor.min(self.values.len() - 1);
        if self.cursor < self.values.len() {
            self.cursor += 1;
        }
        self.values[index].clone()
    }

    /// Number of values handed out before cycling began.
    pub fn consumed(&self) -> usize {
        self.cursor
    }
}

impl Default for InputSource {
    fn default() -> Self {
        Self {
            values: DEFAULT_INPUTS.iter().map(|s| s.to_string()).collect(),
            cursor: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycles_to_last_value() {
        let mut source = InputSource::new(vec!["a".to_string(), "b".to_string()]).unwrap();
        let reads: Vec<String> = (0..5).map(|_| source.next()).collect();
        assert_eq!(reads, ["a", "b", "b", "b", "b"]);
        assert_eq!(source.consumed(), 2);
    }

    #[test]
    fn test_empty_sequence_rejected() {
        assert!(matches!(
            InputSource::new(Vec::new()),
            Err(RequestError::EmptyInputSequence)
        ));
    }

    #[test]
    fn test_single_value_repeats() {
        let mut source = InputSource::new(vec!["only".to_string()]).unwrap();
        assert_eq!(source.next(), "only");
        assert_eq!(source.next(), "only");
    }

    #[test]
    fn test_default_sequence() {
        let mut source = InputSource::default();
        assert_eq!(source.next(), "1");
        for _ in 0..20 {
            source.next();
        }
        assert_eq!(source.next(), "4");
    }
}
