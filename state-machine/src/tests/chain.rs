use raiden_primitives::types::{
	Address,
	LockTimeout,
	PaymentIdentifier,
	TokenAmount,
	H256,
	U256,
	U64,
};

use crate::{
	machine::chain,
	tests::factories::{
		ChainStateBuilder,
		Generator,
		Keyring,
	},
	types::{
		ActionChangeNodeNetworkState,
		ActionInitInitiator,
		ActionLeaveAllNetworks,
		ActionNewTokenNetwork,
		ActionTransferDirect,
		Block,
		Event,
		NetworkState,
		RouteState,
		TokenNetworkState,
		TransferDescriptionWithSecretState,
	},
	views,
};

#[test]
fn chain_state_new_block() {
	let chain_state_info = ChainStateBuilder::new().build();

	let state_change =
		Block { block_number: U64::from(2u64), block_hash: H256::zero(), gas_limit: U256::zero() };
	let result = chain::state_transition(chain_state_info.chain_state, state_change.into())
		.expect("State transition should succeed");
	assert_eq!(result.new_state.block_number, U64::from(2u64));

	let state_change =
		Block { block_number: U64::from(3u64), block_hash: H256::zero(), gas_limit: U256::zero() };
	let result = chain::state_transition(result.new_state, state_change.into())
		.expect("State transition should succeed");
	assert_eq!(result.new_state.block_number, U64::from(3u64));
}

#[test]
fn chain_state_action_new_token_network() {
	let chain_info = ChainStateBuilder::new().with_token_network_registry().build();

	let new_token_network_address = Address::random();
	let new_token_address = Address::random();
	let state_change = ActionNewTokenNetwork {
		payment_network_identifier: chain_info.token_network_registry_address,
		token_network: TokenNetworkState::new(new_token_network_address, new_token_address),
	};

	let result = chain::state_transition(chain_info.chain_state, state_change.into())
		.expect("State transition should succeed");

	let registry = result
		.new_state
		.identifiers_to_tokennetworkregistries
		.get(&chain_info.token_network_registry_address)
		.expect("Registry should exist");
	assert!(registry
		.tokennetworkaddresses_to_tokennetworks
		.contains_key(&new_token_network_address));
	assert_eq!(
		registry.tokenaddresses_to_tokennetworkaddresses.get(&new_token_address),
		Some(&new_token_network_address)
	);
}

#[test]
fn chain_state_action_change_node_network_state() {
	let chain_state_info = ChainStateBuilder::new().build();

	let node_address = Address::random();
	let state_change =
		ActionChangeNodeNetworkState { node_address, network_state: NetworkState::Reachable };

	let result = chain::state_transition(chain_state_info.chain_state, state_change.into())
		.expect("State transition should succeed");
	assert_eq!(
		result.new_state.nodeaddresses_to_networkstates.get(&node_address),
		Some(&NetworkState::Reachable)
	);
}

#[test]
fn chain_state_action_leave_all_networks() {
	let chain_info = ChainStateBuilder::new()
		.with_token_network_registry()
		.with_token_network()
		.with_channels(vec![(
			(Keyring::Alice.address(), TokenAmount::from(1000)),
			(Keyring::Bob.address(), TokenAmount::zero()),
		)])
		.build();

	let result = chain::state_transition(chain_info.chain_state, ActionLeaveAllNetworks {}.into())
		.expect("State transition should succeed");

	assert_eq!(result.events.len(), 1);
	assert!(matches!(result.events[0], Event::ContractSendChannelClose { .. }));
}

#[test]
fn chain_state_queueids_to_queues_appends_in_order() {
	let chain_info = ChainStateBuilder::new()
		.with_token_network_registry()
		.with_token_network()
		.with_channels(vec![(
			(Keyring::Alice.address(), TokenAmount::from(1000)),
			(Keyring::Bob.address(), TokenAmount::zero()),
		)])
		.build();
	let canonical_identifier = chain_info.canonical_identifiers[0].clone();

	let (our_address, partner_address) = {
		let channel_state = views::get_channel_by_canonical_identifier(
			&chain_info.chain_state,
			canonical_identifier.clone(),
		)
		.expect("Channel state should exist");
		(channel_state.our_state.address, channel_state.partner_state.address)
	};

	let route = RouteState {
		route: vec![our_address, partner_address],
		address_to_metadata: std::collections::HashMap::new(),
		swaps: std::collections::HashMap::new(),
		estimated_fee: TokenAmount::zero(),
	};

	let make_init = |payment_identifier: PaymentIdentifier| {
		let secret = Generator::random_secret();
		let secrethash = raiden_primitives::types::SecretHash::from_slice(
			&raiden_primitives::hashing::hash_secret(&secret.0),
		);
		ActionInitInitiator {
			transfer: TransferDescriptionWithSecretState {
				token_network_registry_address: chain_info.token_network_registry_address,
				token_network_address: chain_info.token_network_address,
				lock_timeout: Some(LockTimeout::from(100)),
				payment_identifier,
				amount: TokenAmount::from(1),
				initiator: our_address,
				target: partner_address,
				secret,
				secrethash,
			},
			routes: vec![route.clone()],
		}
	};

	let result =
		chain::state_transition(chain_info.chain_state, make_init(PaymentIdentifier::from(1)).into())
			.expect("State transition should succeed");
	assert!(matches!(result.events[0], Event::SendLockedTransfer { .. }));

	let result =
		chain::state_transition(result.new_state, make_init(PaymentIdentifier::from(2)).into())
			.expect("State transition should succeed");
	assert!(matches!(result.events[0], Event::SendLockedTransfer { .. }));

	let queue = result
		.new_state
		.queueids_to_queues
		.values()
		.find(|queue| queue.len() == 2)
		.expect("Queue with both locked transfers should exist");

	let payment_identifiers: Vec<PaymentIdentifier> = queue
		.iter()
		.map(|send_event| match send_event {
			crate::types::SendMessageEvent::SendLockedTransfer(inner) =>
				inner.transfer.payment_identifier,
			other => panic!("Unexpected queued event: {:?}", other),
		})
		.collect();
	assert_eq!(
		payment_identifiers,
		vec![PaymentIdentifier::from(1), PaymentIdentifier::from(2)]
	);
}

#[test]
fn chain_state_action_transfer_direct_missing_token_network_is_noop() {
	let chain_state_info = ChainStateBuilder::new().with_token_network_registry().build();

	let state_change = ActionTransferDirect {
		payment_network_identifier: chain_state_info.token_network_registry_address,
		token_address: Address::random(),
		payment_identifier: PaymentIdentifier::from(1),
		amount: TokenAmount::from(10u64),
		target: Keyring::Bob.address(),
	};
	let result = chain::state_transition(chain_state_info.chain_state.clone(), state_change.into())
		.expect("State transition should succeed");

	assert!(result.events.is_empty());
	assert_eq!(
		result.new_state.identifiers_to_tokennetworkregistries,
		chain_state_info.chain_state.identifiers_to_tokennetworkregistries
	);
}
