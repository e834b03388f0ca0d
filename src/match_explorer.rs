//! Stack-based explorer for wildcard-receive backtracking.
//!
//! Ported in spirit from the original tool's `MatchExplorer`: a stack of
//! decision levels, each recording how many alternatives existed and which
//! one is currently selected. [`crate::blocking_state`] pushes a level per
//! wildcard decision point and calls [`MatchExplorer::next_exploration`] to
//! advance to the next untried combination after a rollback.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ExplorerLevel {
    curr_match: usize,
    num_alternatives: usize,
}

/// Explores combinations of wildcard-receive alternatives via a stack of
/// levels. Exploration order: deepest level cycles fastest, exactly like an
/// odometer; a full cycle of the deepest level pops it and advances its
/// parent, mirroring the original's "rewind and increase" semantics.
#[derive(Debug, Default)]
pub struct MatchExplorer {
    stack: Vec<ExplorerLevel>,
}

impl MatchExplorer {
    pub fn new() -> Self {
        MatchExplorer { stack: Vec::new() }
    }

    /// Current stack depth, `-1` (`None`) if no level is allocated.
    pub fn current_level(&self) -> Option<usize> {
        if self.stack.is_empty() {
            None
        } else {
            Some(self.stack.len() - 1)
        }
    }

    pub fn is_known_level(&self) -> bool {
        !self.stack.is_empty()
    }

    /// Pushes a level for a new wildcard decision point with `num_alternatives`
    /// candidate senders, starting at alternative 0.
    pub fn add_level(&mut self, num_alternatives: usize) {
        self.stack.push(ExplorerLevel {
            curr_match: 0,
            num_alternatives,
        });
    }

    /// Index of the alternative to try at the deepest level, `None` if empty.
    pub fn curr_alternative_index(&self) -> Option<usize> {
        self.stack.last().map(|l| l.curr_match)
    }

    /// Advances to the next untried combination: bumps the deepest level's
    /// alternative; if that was its last alternative, pops it and bumps its
    /// parent instead (carrying up, like an odometer). Returns `false` once
    /// every combination has been tried (stack exhausted).
    pub fn next_exploration(&mut self) -> bool {
        while let Some(level) = self.stack.last_mut() {
            level.curr_match += 1;
            if level.curr_match < level.num_alternatives {
                return true;
            }
            self.stack.pop();
        }
        false
    }

    /// Resets every level's current alternative to 0 without discarding
    /// the stack shape, used when a rollback should retry the same levels
    /// from the beginning (not currently invoked by a canonical path, kept
    /// to mirror `MatchExplorer::rewindExploration` exactly).
    pub fn rewind_exploration(&mut self) {
        for level in &mut self.stack {
            level.curr_match = 0;
        }
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_level_exhausts_in_order() {
        let mut explorer = MatchExplorer::new();
        explorer.add_level(3);
        assert_eq!(explorer.curr_alternative_index(), Some(0));
        assert!(explorer.next_exploration());
        assert_eq!(explorer.curr_alternative_index(), Some(1));
        assert!(explorer.next_exploration());
        assert_eq!(explorer.curr_alternative_index(), Some(2));
        assert!(!explorer.next_exploration());
        assert_eq!(explorer.current_level(), None);
    }

    #[test]
    fn nested_levels_carry_like_an_odometer() {
        let mut explorer = MatchExplorer::new();
        explorer.add_level(2); // outer: 0,1
        explorer.add_level(2); // inner: 0,1
        assert_eq!(explorer.depth(), 2);

        // inner advances first
        assert!(explorer.next_exploration());
        assert_eq!(explorer.depth(), 2);
        assert_eq!(explorer.curr_alternative_index(), Some(1));

        // inner exhausted -> pops, outer advances
        assert!(explorer.next_exploration());
        assert_eq!(explorer.depth(), 1);
        assert_eq!(explorer.curr_alternative_index(), Some(1));

        // outer exhausted -> fully done
        assert!(!explorer.next_exploration());
        assert_eq!(explorer.depth(), 0);
    }

    #[test]
    fn rewind_resets_without_discarding_levels() {
        let mut explorer = MatchExplorer::new();
        explorer.add_level(3);
        explorer.next_exploration();
        explorer.next_exploration();
        assert_eq!(explorer.curr_alternative_index(), Some(2));
        explorer.rewind_exploration();
        assert_eq!(explorer.curr_alternative_index(), Some(0));
        assert_eq!(explorer.depth(), 1);
    }
}
