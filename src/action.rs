//! State-correlated action mapping.

use crate::mapper::ActionMapper;
use crate::state::StateAccess;

/// Pairs an [`ActionMapper`] with the state it reads.
///
/// Each call samples exactly one snapshot. `map_action` takes `&mut self`, so
/// one mapper instance is never driven from two threads at once.
pub struct StateCorrelatedMapper<M, A> {
    mapper: M,
    state: A,
    mapped: u64,
}

impl<M, A> StateCorrelatedMapper<M, A>
where
    M: ActionMapper,
    A: StateAccess<State = M::State>,
{
    pub fn new(mapper: M, state: A) -> Self {
        Self {
            mapper,
            state,
            mapped: 0,
        }
    }

    /// Map one output against the current state. May yield zero or many actions.
    pub fn map_action(&mut self, output: M::Output) -> Vec<M::Action> {
        let snapshot = self.state.snapshot();
        self.mapped += 1;
        self.mapper.map(output, &snapshot)
    }

    /// Outputs mapped so far.
    pub fn mapped(&self) -> u64 {
        self.mapped
    }
}
