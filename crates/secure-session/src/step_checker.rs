//! enforces strict sequential progress through a handshake's state machine
//!
//! any step left unconfirmed (because its scope exited via an error) wastes
//! the checker permanently, so a partially-failed step can never be retried
//! with divergent inputs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Error, Result};

struct Shared<S> {
    step: Mutex<S>,
    wasted: AtomicBool,
}

/// a linear step-sequence guard. `S` is the handshake's step enum.
///
/// backed by `Arc`/`parking_lot::Mutex` rather than `Rc`/`Cell` so that an
/// authentication peer holding one stays `Send` across the `.await` points
/// in its driving task (§5: handshake tasks are spawned per connection).
pub struct StepChecker<S> {
    shared: Arc<Shared<S>>,
}

impl<S: Copy + PartialEq + Send + 'static> StepChecker<S> {
    pub fn new(initial: S) -> Self {
        Self {
            shared: Arc::new(Shared {
                step: Mutex::new(initial),
                wasted: AtomicBool::new(false),
            }),
        }
    }

    pub fn current_step(&self) -> Result<S> {
        if self.shared.wasted.load(Ordering::Acquire) {
            return Err(Error::Wasted);
        }
        Ok(*self.shared.step.lock())
    }

    /// advance from `expected` to `next`, returning a `Marker` that must be
    /// `confirm()`-ed on every success path. if the marker is dropped without
    /// being confirmed, the checker is wasted.
    pub fn check_step(&self, expected: S, next: S) -> Result<Marker<S>> {
        if self.shared.wasted.load(Ordering::Acquire) {
            return Err(Error::Wasted);
        }
        let mut step = self.shared.step.lock();
        if *step != expected {
            self.shared.wasted.store(true, Ordering::Release);
            return Err(Error::InvalidStep);
        }
        *step = next;
        drop(step);
        Ok(Marker {
            shared: self.shared.clone(),
            confirmed: false,
        })
    }
}

/// scoped proof that a step was entered. must be confirmed before drop, or
/// the owning checker is marked wasted.
pub struct Marker<S> {
    shared: Arc<Shared<S>>,
    confirmed: bool,
}

impl<S> Marker<S> {
    /// the step completed successfully; do not waste the checker.
    pub fn confirm(mut self) {
        self.confirmed = true;
    }
}

impl<S> Drop for Marker<S> {
    fn drop(&mut self) {
        if !self.confirmed {
            self.shared.wasted.store(true, Ordering::Release);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Step {
        Init,
        Middle,
        Done,
    }

    #[test]
    fn happy_path_advances() {
        let checker = StepChecker::new(Step::Init);
        let marker = checker.check_step(Step::Init, Step::Middle).unwrap();
        marker.confirm();
        assert_eq!(checker.current_step().unwrap(), Step::Middle);
        let marker = checker.check_step(Step::Middle, Step::Done).unwrap();
        marker.confirm();
        assert_eq!(checker.current_step().unwrap(), Step::Done);
    }

    #[test]
    fn wrong_expected_step_wastes() {
        let checker = StepChecker::new(Step::Init);
        assert!(checker.check_step(Step::Middle, Step::Done).is_err());
        assert!(matches!(checker.current_step(), Err(Error::Wasted)));
    }

    #[test]
    fn unconfirmed_marker_drop_wastes() {
        let checker = StepChecker::new(Step::Init);
        {
            let _marker = checker.check_step(Step::Init, Step::Middle).unwrap();
            // dropped without confirm() -- simulates an error path
        }
        assert!(matches!(checker.current_step(), Err(Error::Wasted)));
    }

    #[test]
    fn wasted_checker_rejects_everything() {
        let checker = StepChecker::new(Step::Init);
        let _ = checker.check_step(Step::Middle, Step::Done);
        assert!(checker.check_step(Step::Init, Step::Middle).is_err());
        assert!(checker.current_step().is_err());
    }

    #[test]
    fn error_propagation_with_question_mark_wastes() {
        fn do_step(checker: &StepChecker<Step>, fail: bool) -> Result<()> {
            let marker = checker.check_step(Step::Init, Step::Middle)?;
            if fail {
                return Err(Error::Malformed("boom".into()));
            }
            marker.confirm();
            Ok(())
        }
        let checker = StepChecker::new(Step::Init);
        assert!(do_step(&checker, true).is_err());
        assert!(matches!(checker.current_step(), Err(Error::Wasted)));
    }
}
