//! Undo/redo history of pipeline states.
//!
//! Each entry is a complete short-form snapshot of the pipeline. Undoing
//! and redoing rebuild the pipeline from the snapshot, so every restored
//! plugin gets a fresh id and fresh DSP state.

use crate::pipeline::Pipeline;
use crate::preset::ShortPluginState;

#[derive(Debug, Clone)]
pub struct History {
    entries: Vec<Vec<ShortPluginState>>,
    /// Index of the entry matching the current pipeline.
    cursor: Option<usize>,
    limit: usize,
}

impl History {
    pub fn new(limit: usize) -> Self {
        Self {
            entries: Vec::new(),
            cursor: None,
            limit: limit.max(1),
        }
    }

    /// Record the pipeline's current state. Discards anything that could
    /// have been redone and drops the oldest entry once over the limit.
    /// Saving a state identical to the current entry is a no-op.
    pub fn save(&mut self, pipeline: &Pipeline) {
        let state = pipeline.to_short_states();
        if let Some(cursor) = self.cursor {
            if self.entries[cursor] == state {
                return;
            }
            self.entries.truncate(cursor + 1);
        }
        self.entries.push(state);
        if self.entries.len() > self.limit {
            let excess = self.entries.len() - self.limit;
            self.entries.drain(..excess);
        }
        self.cursor = Some(self.entries.len() - 1);
    }

    pub fn can_undo(&self) -> bool {
        matches!(self.cursor, Some(c) if c > 0)
    }

    pub fn can_redo(&self) -> bool {
        matches!(self.cursor, Some(c) if c + 1 < self.entries.len())
    }

    /// Step back and return the state to rebuild from.
    pub fn undo(&mut self) -> Option<&[ShortPluginState]> {
        let cursor = self.cursor.filter(|&c| c > 0)? - 1;
        self.cursor = Some(cursor);
        Some(&self.entries[cursor])
    }

    /// Step forward and return the state to rebuild from.
    pub fn redo(&mut self) -> Option<&[ShortPluginState]> {
        let cursor = self.cursor.filter(|&c| c + 1 < self.entries.len())? + 1;
        self.cursor = Some(cursor);
        Some(&self.entries[cursor])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.cursor = None;
    }
}

/// Rebuild `pipeline` from a history entry, keeping its bypass flag.
pub fn restore(pipeline: &mut Pipeline, state: &[ShortPluginState]) {
    let (rebuilt, errors) = Pipeline::from_states(state);
    if !errors.is_empty() {
        log::warn!("History restore skipped {} plugin(s)", errors.len());
    }
    pipeline.replace_all(rebuilt.plugins().to_vec());
}
