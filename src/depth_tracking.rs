use crate::error::{Error, Result};

/// Tracks how deeply groups, sequences, and template references are nested while a message is
/// walked, and fails once the configured limit is passed.
#[derive(Clone, Debug)]
pub struct DepthTracker {
    depth: usize,
    max_depth: usize,
}

impl DepthTracker {
    /// Create a new depth tracker
    pub fn new(max_depth: usize) -> Self {
        Self {
            depth: 0,
            max_depth,
        }
    }

    /// Step into a nested segment.
    pub fn enter(&mut self) -> Result<()> {
        self.depth += 1;
        if self.depth > self.max_depth {
            self.depth -= 1;
            return Err(Error::encoding(format!(
                "Nesting depth limit of {} exceeded",
                self.max_depth
            )));
        }
        Ok(())
    }

    pub fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Forget all nesting, for when a walk was abandoned partway through.
    pub fn clear(&mut self) {
        self.depth = 0;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn limit() {
        let mut t = DepthTracker::new(2);
        t.enter().unwrap();
        t.enter().unwrap();
        assert!(t.enter().is_err());
        assert_eq!(t.depth(), 2);
        t.leave();
        t.enter().unwrap();
        t.clear();
        assert_eq!(t.depth(), 0);
    }
}
