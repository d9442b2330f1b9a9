//! Bounded polling for commanded hardware transitions.
//!
//! ```text
//! Idle --command--> Commanded --poll--> Waiting --poll--> Complete
//!                        |                 |  \--------> TimedOut  (max_polls reached)
//!                        \-----------------+-----------> Failed    (max_retries exceeded)
//! ```

use std::fmt::Debug;
use std::thread;
use std::time::Duration;

use log::{trace, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum PollState<E> {
    Idle,
    Commanded,
    Waiting { polls: u32 },
    Complete,
    TimedOut,
    Failed(E),
}

#[derive(Debug)]
pub struct PollMachine<E> {
    state: PollState<E>,
    max_polls: u32,
    max_retries: u32,
    retries: u32,
}

impl<E: Debug + Clone> PollMachine<E> {
    pub fn new(max_polls: u32, max_retries: u32) -> Self {
        Self {
            state: PollState::Idle,
            max_polls: max_polls.max(1),
            max_retries,
            retries: 0,
        }
    }

    /// Enough polls to cover `timeout` at one poll per `interval`. The first poll is
    /// immediate, so the last one lands on the deadline.
    pub fn with_timeout(timeout: Duration, interval: Duration, max_retries: u32) -> Self {
        let polls = timeout.as_millis() / interval.as_millis().max(1) + 1;
        Self::new(u32::try_from(polls).unwrap_or(u32::MAX), max_retries)
    }

    pub fn state(&self) -> &PollState<E> {
        &self.state
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, PollState::Complete | PollState::TimedOut | PollState::Failed(_))
    }

    pub fn command(&mut self) {
        if matches!(self.state, PollState::Idle) {
            self.state = PollState::Commanded;
        }
    }

    /// Feeds one poll result. Ignored unless the machine has been commanded and has not
    /// finished.
    pub fn on_poll(&mut self, result: Result<bool, E>) {
        let polls = match self.state {
            PollState::Commanded => 1,
            PollState::Waiting { polls } => polls + 1,
            _ => return,
        };
        self.state = match result {
            Ok(true) => PollState::Complete,
            Ok(false) if polls >= self.max_polls => PollState::TimedOut,
            Ok(false) => PollState::Waiting { polls },
            Err(e) => {
                self.retries += 1;
                if self.retries > self.max_retries {
                    PollState::Failed(e)
                } else if polls >= self.max_polls {
                    PollState::TimedOut
                } else {
                    PollState::Waiting { polls }
                }
            }
        };
        trace!("poll #{polls}: {:?}", self.state);
    }

    /// Drives the machine to a terminal state, sleeping `interval` between polls.
    /// `Ok(true)` on completion, `Ok(false)` on timeout.
    pub fn run<F>(&mut self, interval: Duration, mut poll: F) -> Result<bool, E>
    where
        F: FnMut() -> Result<bool, E>,
    {
        self.command();
        loop {
            match &self.state {
                PollState::Complete => return Ok(true),
                PollState::TimedOut => return Ok(false),
                PollState::Failed(e) => return Err(e.clone()),
                PollState::Waiting { .. } => thread::sleep(interval),
                PollState::Idle | PollState::Commanded => {}
            }
            let result = poll();
            if let Err(e) = &result {
                warn!("Poll failed (retry {} of {}): {e:?}", self.retries + 1, self.max_retries);
            }
            self.on_poll(result);
        }
    }
}
