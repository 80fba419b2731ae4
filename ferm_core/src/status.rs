//! Outcome of one chamber control cycle.

use crate::thermal::Transition;

#[derive(Debug, Clone, PartialEq)]
pub enum CycleStatus {
    /// Not a sample tick; only the heater pulse was refreshed.
    Waiting,
    /// Sample tick with a rejected beer or fridge reading. A bad beer read
    /// holds the state; a bad fridge read skips the heat loop.
    Held,
    /// Sample tick processed, no transition.
    Running,
    /// Sample tick processed and the fridge changed state.
    Transition(Transition),
}
