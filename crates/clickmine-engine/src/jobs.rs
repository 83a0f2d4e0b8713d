//! Ordered cycle of task categories with a movable cursor.
//!
//! Each miner owns exactly one rotation. Wrapping back to the first
//! category is the signal that a full cycle completed, which is when
//! deferred work (the balance check) runs.

use clickmine_core::types::TaskKind;

#[derive(Debug, Clone)]
pub struct JobRotation {
    jobs: Vec<TaskKind>,
    index: usize,
}

impl JobRotation {
    /// The default rotation: visit sites, message bots, join chats.
    pub fn new() -> Self {
        Self::with_jobs(vec![
            TaskKind::VisitSites,
            TaskKind::MessageBots,
            TaskKind::JoinChats,
        ])
    }

    pub fn with_jobs(jobs: Vec<TaskKind>) -> Self {
        Self { jobs, index: 0 }
    }

    /// Category under the cursor. `None` only when every category has
    /// been removed.
    pub fn current(&self) -> Option<TaskKind> {
        self.jobs.get(self.index).copied()
    }

    /// True when the cursor sits on the final category of the cycle.
    pub fn is_last(&self) -> bool {
        !self.jobs.is_empty() && self.index == self.jobs.len() - 1
    }

    /// Move to the next category. Returns true when the cursor wrapped
    /// to the first category, i.e. a full cycle completed.
    pub fn advance(&mut self) -> bool {
        if self.jobs.is_empty() {
            return false;
        }
        if self.index >= self.jobs.len() - 1 {
            self.index = 0;
            true
        } else {
            self.index += 1;
            false
        }
    }

    /// Drop a category. Removing the current one advances first, so the
    /// cursor never points at a non-member.
    pub fn remove(&mut self, job: TaskKind) {
        if self.current() == Some(job) {
            self.advance();
        }
        let keep = self.current().filter(|current| *current != job);
        self.jobs.retain(|j| *j != job);
        self.index = keep
            .and_then(|k| self.jobs.iter().position(|j| *j == k))
            .unwrap_or(0);
    }

    /// Append a category; adding one already present is a no-op.
    pub fn add(&mut self, job: TaskKind) {
        if !self.jobs.contains(&job) {
            self.jobs.push(job);
        }
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

impl Default for JobRotation {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advances_in_order_and_signals_wrap() {
        let mut rotation = JobRotation::new();
        assert_eq!(rotation.current(), Some(TaskKind::VisitSites));
        assert!(!rotation.advance());
        assert_eq!(rotation.current(), Some(TaskKind::MessageBots));
        assert!(!rotation.advance());
        assert_eq!(rotation.current(), Some(TaskKind::JoinChats));
        assert!(rotation.is_last());
        assert!(rotation.advance());
        assert_eq!(rotation.current(), Some(TaskKind::VisitSites));
    }

    #[test]
    fn removing_current_advances_first() {
        let mut rotation = JobRotation::new();
        rotation.remove(TaskKind::VisitSites);
        assert_eq!(rotation.current(), Some(TaskKind::MessageBots));
        assert_eq!(rotation.len(), 2);
    }

    #[test]
    fn removing_current_last_entry_stays_in_bounds() {
        let mut rotation =
            JobRotation::with_jobs(vec![TaskKind::VisitSites, TaskKind::MessageBots]);
        rotation.advance();
        assert_eq!(rotation.current(), Some(TaskKind::MessageBots));

        rotation.remove(TaskKind::MessageBots);
        assert_eq!(rotation.len(), 1);
        assert_eq!(rotation.current(), Some(TaskKind::VisitSites));
    }

    #[test]
    fn removing_non_current_keeps_cursor_on_same_job() {
        let mut rotation = JobRotation::new();
        rotation.advance();
        rotation.advance();
        assert_eq!(rotation.current(), Some(TaskKind::JoinChats));

        rotation.remove(TaskKind::MessageBots);
        assert_eq!(rotation.current(), Some(TaskKind::JoinChats));
    }

    #[test]
    fn removing_only_job_leaves_empty_rotation() {
        let mut rotation = JobRotation::with_jobs(vec![TaskKind::VisitSites]);
        rotation.remove(TaskKind::VisitSites);
        assert!(rotation.is_empty());
        assert_eq!(rotation.current(), None);
        assert!(!rotation.advance());
    }

    #[test]
    fn add_is_idempotent() {
        let mut rotation = JobRotation::new();
        rotation.add(TaskKind::VisitSites);
        assert_eq!(rotation.len(), 3);

        rotation.remove(TaskKind::JoinChats);
        rotation.add(TaskKind::JoinChats);
        assert_eq!(rotation.len(), 3);
    }
}
