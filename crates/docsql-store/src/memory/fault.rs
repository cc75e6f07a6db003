//! Fail points: injected command failures for exercising retry and teardown paths

use crate::error::StoreError;

/// Store commands a fail point can be attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailCommand {
    StartSession,
    EndSession,
    StartTransaction,
    CommitTransaction,
    AbortTransaction,
    Find,
    Aggregate,
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailMode {
    AlwaysOn,
    /// Fail the next `n` calls, then turn off
    Times(u32),
}

#[derive(Debug)]
struct FailPoint {
    command: FailCommand,
    mode: FailMode,
    error: StoreError,
}

#[derive(Debug, Default)]
pub(crate) struct FailPoints {
    points: Vec<FailPoint>,
}

impl FailPoints {
    /// Replaces any fail point already set on `command`.
    pub(crate) fn configure(&mut self, command: FailCommand, mode: FailMode, error: StoreError) {
        self.points.retain(|p| p.command != command);
        if mode != FailMode::Times(0) {
            self.points.push(FailPoint { command, mode, error });
        }
    }

    pub(crate) fn clear(&mut self) {
        self.points.clear();
    }

    /// Error to fail `command` with, if a fail point is armed for it.
    pub(crate) fn trigger(&mut self, command: FailCommand) -> Option<StoreError> {
        let index = self.points.iter().position(|p| p.command == command)?;
        let point = &mut self.points[index];
        let error = point.error.clone();
        if let FailMode::Times(n) = point.mode {
            if n <= 1 {
                self.points.remove(index);
            } else {
                point.mode = FailMode::Times(n - 1);
            }
        }
        Some(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_times_runs_out() {
        let mut points = FailPoints::default();
        points.configure(FailCommand::Insert, FailMode::Times(2), StoreError::Timeout);
        assert_eq!(points.trigger(FailCommand::Find), None);
        assert_eq!(points.trigger(FailCommand::Insert), Some(StoreError::Timeout));
        assert_eq!(points.trigger(FailCommand::Insert), Some(StoreError::Timeout));
        assert_eq!(points.trigger(FailCommand::Insert), None);
    }

    #[test]
    fn test_always_on_until_cleared() {
        let mut points = FailPoints::default();
        points.configure(FailCommand::CommitTransaction, FailMode::AlwaysOn, StoreError::Timeout);
        for _ in 0..5 {
            assert!(points.trigger(FailCommand::CommitTransaction).is_some());
        }
        points.clear();
        assert!(points.trigger(FailCommand::CommitTransaction).is_none());
    }
}
