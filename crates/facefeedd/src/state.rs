use parking_lot::Mutex;
use std::collections::BTreeSet;

/// Names recognized in the most recently processed frame.
///
/// Written by the frame loop, read by status feed subscribers. Each publish
/// replaces the previous set wholesale.
#[derive(Default)]
pub struct RecognitionState {
    names: Mutex<BTreeSet<String>>,
}

impl RecognitionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current set with `names`.
    pub fn publish<I, S>(&self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let next: BTreeSet<String> = names.into_iter().map(Into::into).collect();
        *self.names.lock() = next;
    }

    /// Sorted copy of the current set.
    pub fn snapshot(&self) -> Vec<String> {
        self.names.lock().iter().cloned().collect()
    }
}
