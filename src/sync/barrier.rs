//! Phased barrier for N-way rendezvous.
//!
//! The barrier trips when every registered participant has arrived. The last
//! arrival is the phase leader: it runs the optional post-phase action with
//! the barrier's lock released, then advances the phase counter and wakes the
//! rest. Until the phase advances, the other participants stay parked, so the
//! action always runs before anyone leaves the phase.
//!
//! If the action fails (returns `Err` or panics), every participant of that
//! phase, the leader included, receives a `BrokenBarrier` error. The barrier
//! itself remains usable: the next phase starts normally.

use super::core::{deadline_after, CoreState, WaitableCore};
use crate::error::{panic_message, Error, ErrorKind, Result};
use parking_lot::MutexGuard;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::{Duration, Instant};

type PhaseAction = Box<dyn Fn(u64) -> std::result::Result<(), String> + Send + Sync>;

#[derive(Debug)]
struct PhaseFailure {
    phase: u64,
    message: String,
}

#[derive(Debug)]
struct BarrierState {
    participants: usize,
    arrived: usize,
    phase: u64,
    action_running: bool,
    last_failure: Option<PhaseFailure>,
}

/// Result of a successful barrier wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarrierWaitResult {
    is_leader: bool,
    phase: u64,
}

impl BarrierWaitResult {
    /// Returns true for exactly one participant per phase: the last arrival.
    #[must_use]
    pub const fn is_leader(&self) -> bool {
        self.is_leader
    }

    /// The phase that just completed.
    #[must_use]
    pub const fn phase(&self) -> u64 {
        self.phase
    }
}

/// A reusable, phased barrier.
///
/// ```
/// use std::sync::Arc;
/// use std::thread;
/// use threadsync::Barrier;
///
/// let barrier = Arc::new(Barrier::new(2).unwrap());
/// let other = Arc::clone(&barrier);
/// let handle = thread::spawn(move || other.signal_and_wait().unwrap());
/// let mine = barrier.signal_and_wait().unwrap();
/// let theirs = handle.join().unwrap();
/// assert!(mine.is_leader() ^ theirs.is_leader());
/// assert_eq!(barrier.current_phase(), 1);
/// ```
pub struct Barrier {
    core: WaitableCore<BarrierState>,
    action: Option<PhaseAction>,
}

impl Barrier {
    /// Creates a barrier for `participants` threads.
    pub fn new(participants: usize) -> Result<Self> {
        Self::build(participants, None)
    }

    /// Creates a barrier that runs `action` after each phase completes.
    ///
    /// The action receives the number of the phase that just completed.
    pub fn with_action<F, E>(participants: usize, action: F) -> Result<Self>
    where
        F: Fn(u64) -> std::result::Result<(), E> + Send + Sync + 'static,
        E: fmt::Display + 'static,
    {
        let action: PhaseAction = Box::new(move |phase| action(phase).map_err(|e| e.to_string()));
        Self::build(participants, Some(action))
    }

    fn build(participants: usize, action: Option<PhaseAction>) -> Result<Self> {
        if participants == 0 {
            return Err(Error::invalid_argument(
                "barrier requires at least one participant",
            ));
        }
        Ok(Self {
            core: WaitableCore::with_state(
                false,
                BarrierState {
                    participants,
                    arrived: 0,
                    phase: 0,
                    action_running: false,
                    last_failure: None,
                },
            ),
            action,
        })
    }

    /// Returns the number of registered participants.
    #[must_use]
    pub fn participant_count(&self) -> usize {
        self.core.lock().inner.participants
    }

    /// Returns how many participants have yet to arrive in the current phase.
    #[must_use]
    pub fn participants_remaining(&self) -> usize {
        let state = self.core.lock();
        state.inner.participants - state.inner.arrived
    }

    /// Returns the number of completed phases.
    #[must_use]
    pub fn current_phase(&self) -> u64 {
        self.core.lock().inner.phase
    }

    /// Registers one more participant.
    pub fn add_participant(&self) -> Result<u64> {
        self.add_participants(1)
    }

    /// Registers `n` more participants and returns the current phase.
    ///
    /// Fails with `InvalidOperation` while a phase is partly arrived or its
    /// post-phase action is running.
    pub fn add_participants(&self, n: usize) -> Result<u64> {
        if n == 0 {
            return Err(Error::invalid_argument("participant delta must be positive"));
        }
        let mut state = self.core.lock();
        Self::ensure_between_phases(&state.inner)?;
        state.inner.participants = state
            .inner
            .participants
            .checked_add(n)
            .ok_or_else(|| Error::invalid_argument("participant count overflow"))?;
        Ok(state.inner.phase)
    }

    /// Unregisters one participant.
    pub fn remove_participant(&self) -> Result<()> {
        self.remove_participants(1)
    }

    /// Unregisters `n` participants.
    pub fn remove_participants(&self, n: usize) -> Result<()> {
        if n == 0 {
            return Err(Error::invalid_argument("participant delta must be positive"));
        }
        let mut state = self.core.lock();
        Self::ensure_between_phases(&state.inner)?;
        if n > state.inner.participants {
            return Err(Error::invalid_argument(format!(
                "cannot remove {n} of {} participants",
                state.inner.participants
            )));
        }
        state.inner.participants -= n;
        Ok(())
    }

    fn ensure_between_phases(state: &BarrierState) -> Result<()> {
        if state.arrived > 0 || state.action_running {
            return Err(Error::invalid_operation(
                "participants cannot change while a phase is in progress",
            ));
        }
        Ok(())
    }

    /// Arrives at the barrier and waits for the rest of the phase.
    pub fn signal_and_wait(&self) -> Result<BarrierWaitResult> {
        self.signal_and_wait_deadline(None)?
            .ok_or_else(|| Error::new(ErrorKind::Internal).with_message("untimed barrier wait expired"))
    }

    /// Arrives at the barrier and waits up to `timeout` for the phase.
    ///
    /// Returns `Ok(None)` on timeout, in which case the arrival is withdrawn.
    /// If the phase has already completed and only its post-phase action is
    /// outstanding, the call waits for the action regardless of the timeout.
    pub fn signal_and_wait_timeout(&self, timeout: Duration) -> Result<Option<BarrierWaitResult>> {
        self.signal_and_wait_deadline(deadline_after(Some(timeout)))
    }

    fn signal_and_wait_deadline(
        &self,
        deadline: Option<Instant>,
    ) -> Result<Option<BarrierWaitResult>> {
        let mut state = self.core.lock();
        if state.inner.participants == 0 {
            return Err(Error::invalid_operation("barrier has no participants"));
        }
        if state.inner.action_running || state.inner.arrived >= state.inner.participants {
            return Err(Error::invalid_operation(
                "more arrivals than registered participants",
            ));
        }

        let phase = state.inner.phase;
        state.inner.arrived += 1;
        if state.inner.arrived == state.inner.participants {
            return self.complete_phase(&mut state, phase).map(Some);
        }

        let advanced = |s: &mut CoreState<BarrierState>| (s.inner.phase != phase).then_some(());
        if self.core.block_until(&mut state, deadline, advanced).is_none() {
            if !state.inner.action_running {
                state.inner.arrived -= 1;
                tracing::trace!(phase, "barrier wait timed out; arrival withdrawn");
                return Ok(None);
            }
            // Phase already complete; only the action is outstanding.
            let _ = self.core.block_until(&mut state, None, advanced);
        }
        Self::phase_outcome(&state.inner, phase, false).map(Some)
    }

    fn complete_phase(
        &self,
        state: &mut MutexGuard<'_, CoreState<BarrierState>>,
        phase: u64,
    ) -> Result<BarrierWaitResult> {
        if let Some(action) = &self.action {
            state.inner.action_running = true;
            let outcome =
                MutexGuard::unlocked(state, || catch_unwind(AssertUnwindSafe(|| action(phase))));
            state.inner.action_running = false;

            let failure = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(message)) => Some(message),
                Err(payload) => Some(format!(
                    "post-phase action panicked: {}",
                    panic_message(payload.as_ref())
                )),
            };
            if let Some(message) = failure {
                tracing::warn!(phase, error = %message, "barrier post-phase action failed");
                state.inner.last_failure = Some(PhaseFailure { phase, message });
            }
        }

        state.inner.arrived = 0;
        state.inner.phase = state.inner.phase.wrapping_add(1);
        self.core.notify_all();
        tracing::trace!(phase, participants = state.inner.participants, "barrier phase complete");
        Self::phase_outcome(&state.inner, phase, true)
    }

    fn phase_outcome(state: &BarrierState, phase: u64, is_leader: bool) -> Result<BarrierWaitResult> {
        match &state.last_failure {
            Some(failure) if failure.phase == phase => Err(Error::new(ErrorKind::BrokenBarrier)
                .with_message(format!("phase {phase}: {}", failure.message))),
            _ => Ok(BarrierWaitResult { is_leader, phase }),
        }
    }
}

impl fmt::Debug for Barrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Barrier")
            .field("core", &self.core)
            .field("has_action", &self.action.is_some())
            .finish()
    }
}
