//! The coprocessor's single consumer thread.
//!
//! ```text
//! WaitingForDoorbell --doorbell--> Processing --RQ empty / CQ full--> WaitingForDoorbell
//! WaitingForDoorbell --stop------> Stopping --> Terminated
//! Processing         --stop------> Stopping
//! ```
//!
//! Each virtine is cleaned under its own lock acquisition, so register accesses from the host
//! interleave with a long pass and a stop request is seen before the next virtine. A terminated
//! worker closes the notification channel even while ports keep the register file alive.

use crate::device::Shared;
use crate::state::{CleanStep, ProcessingState};

pub(crate) fn run(shared: &Shared) {
    let mut phase = ProcessingState::WaitingForDoorbell;
    loop {
        phase = match phase {
            ProcessingState::WaitingForDoorbell => {
                let mut guard = shared.wait_for_work();
                let next = if guard.is_stopping() {
                    ProcessingState::Stopping
                } else {
                    guard.begin_pass();
                    ProcessingState::Processing
                };
                guard.set_phase(next);
                next
            }
            ProcessingState::Processing => {
                let mut guard = shared.lock();
                let step = guard.clean_next();
                let next = if step.continues() {
                    ProcessingState::Processing
                } else {
                    guard.end_pass();
                    if step == CleanStep::Stopped {
                        ProcessingState::Stopping
                    } else {
                        ProcessingState::WaitingForDoorbell
                    }
                };
                guard.set_phase(next);
                next
            }
            ProcessingState::Stopping => {
                let mut guard = shared.lock();
                guard.close_notifications();
                guard.set_phase(ProcessingState::Terminated);
                ProcessingState::Terminated
            }
            ProcessingState::Terminated => break,
        };
    }
    tracing::debug!("coprocessor worker exited");
}
