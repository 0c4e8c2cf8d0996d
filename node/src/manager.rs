#![warn(clippy::missing_docs_in_private_items)]
//! Thin node handle wrapping the reducer entry point and the message-intake adapter.
//!
//! Persistence, transport and blockchain listening are external collaborators (see the crate's
//! design notes); `NodeHandle` only owns the in-memory `ChainState` and dispatches into it.

use raiden_primitives::types::Address;
use raiden_state_machine::{
	errors::StateTransitionError,
	machine::chain,
	types::{
		ChainState,
		Event,
		StateChange,
	},
};
use tracing::trace;

use crate::{
	adapter,
	messages::WireMessage,
};

/// A node's in-memory chain state plus the means to advance it.
pub struct NodeHandle {
	pub our_address: Address,
	pub current_state: ChainState,
}

impl NodeHandle {
	/// Create a handle wrapping an already-initialized chain state.
	pub fn new(our_address: Address, current_state: ChainState) -> Self {
		Self { our_address, current_state }
	}

	/// Dispatch a state change into the reducer, replacing `current_state` with the result.
	pub fn dispatch(
		&mut self,
		state_change: StateChange,
	) -> Result<Vec<Event>, StateTransitionError> {
		trace!(message = "Dispatching state change", state_change = state_change.type_name());
		let transition = chain::state_transition(self.current_state.clone(), state_change)?;
		self.current_state = transition.new_state;
		Ok(transition.events)
	}

	/// Translate an incoming wire message into a state change and dispatch it.
	///
	/// This is the message-adapter entry point: it corresponds to `on_incoming_message`
	/// submitting a translated state change via the node's own `state_transition` call.
	pub fn on_incoming_message(
		&mut self,
		message: WireMessage,
	) -> Result<Vec<Event>, StateTransitionError> {
		let state_change = adapter::translate(&self.current_state, self.our_address, message);
		self.dispatch(state_change)
	}
}
