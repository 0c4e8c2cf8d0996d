use std::collections::HashMap;

use raiden_primitives::types::{
	Address,
	BlockExpiration,
	BlockHash,
	BlockNumber,
	Bytes,
	ChainID,
	ChannelIdentifier,
	Locksroot,
	MessageIdentifier,
	Nonce,
	PaymentIdentifier,
	Secret,
	SecretHash,
	TokenAmount,
	H256,
};
use raiden_state_machine::types::{
	ChainState,
	InitiatorPaymentState,
	InitiatorTask,
	PaymentMappingState,
	Random,
	StateChange,
	TransferRole,
	TransferTask,
};

use crate::{
	adapter,
	messages::{
		DirectTransferMessage,
		LockMessage,
		LockedTransferMessage,
		RefundTransferMessage,
		RevealSecretMessage,
		SecretRequestMessage,
		UnlockMessage,
		WireMessage,
	},
};

fn empty_chain_state(our_address: Address) -> ChainState {
	ChainState {
		chain_id: ChainID::Goerli,
		block_number: BlockNumber::from(1u64),
		block_hash: BlockHash::zero(),
		our_address,
		identifiers_to_tokennetworkregistries: HashMap::new(),
		nodeaddresses_to_networkstates: HashMap::new(),
		payment_mapping: PaymentMappingState { secrethashes_to_task: HashMap::new() },
		pending_transactions: vec![],
		pseudo_random_number_generator: Random::new(),
		queueids_to_queues: HashMap::new(),
	}
}

fn chain_state_as_initiator(our_address: Address, secrethash: SecretHash) -> ChainState {
	let mut chain_state = empty_chain_state(our_address);
	chain_state.payment_mapping.secrethashes_to_task.insert(
		secrethash,
		TransferTask::Initiator(InitiatorTask {
			role: TransferRole::Initiator,
			token_network_address: Address::random(),
			manager_state: InitiatorPaymentState {
				routes: vec![],
				initiator_transfers: HashMap::new(),
				cancelled_channels: vec![],
			},
		}),
	);
	chain_state
}

fn dummy_lock(secrethash: SecretHash) -> LockMessage {
	LockMessage { amount: TokenAmount::from(10), expiration: BlockExpiration::from(10u64), secrethash }
}

fn locked_transfer_message(
	target: Address,
	sender: Address,
	secret: Option<Secret>,
) -> LockedTransferMessage {
	LockedTransferMessage {
		message_identifier: MessageIdentifier::from(1u64),
		payment_identifier: PaymentIdentifier::from(1),
		chain_id: ChainID::Goerli,
		token_network_address: Address::random(),
		channel_identifier: ChannelIdentifier::from(1u64),
		transferred_amount: TokenAmount::zero(),
		locked_amount: TokenAmount::from(10),
		locksroot: Locksroot::zero(),
		token: Address::random(),
		recipient: target,
		lock: dummy_lock(SecretHash::zero()),
		target,
		initiator: sender,
		route_states: vec![],
		nonce: Nonce::from(1u64),
		secret,
		balance_hash: H256::zero(),
		signature: Bytes(vec![0u8; 65]),
		sender,
	}
}

#[test]
fn translate_secret_request() {
	let our_address = Address::random();
	let chain_state = empty_chain_state(our_address);
	let sender = Address::random();
	let secrethash = SecretHash::random();

	let message = WireMessage::SecretRequest(SecretRequestMessage {
		message_identifier: MessageIdentifier::from(1u64),
		payment_identifier: PaymentIdentifier::from(1),
		secrethash,
		amount: TokenAmount::from(10),
		expiration: BlockExpiration::from(10u64),
		sender,
	});

	let state_change = adapter::translate(&chain_state, our_address, message);
	match state_change {
		StateChange::ReceiveSecretRequest(inner) => {
			assert_eq!(inner.sender, sender);
			assert_eq!(inner.secrethash, secrethash);
		},
		other => panic!("Unexpected state change: {:?}", other),
	}
}

#[test]
fn translate_reveal_secret_recomputes_secrethash() {
	let our_address = Address::random();
	let chain_state = empty_chain_state(our_address);
	let sender = Address::random();
	let secret = Secret(vec![7u8; 32]);
	let expected_secrethash =
		SecretHash::from_slice(&raiden_primitives::hashing::hash_secret(&secret.0));

	let message = WireMessage::RevealSecret(RevealSecretMessage {
		message_identifier: MessageIdentifier::from(1u64),
		secret: secret.clone(),
		sender,
	});

	let state_change = adapter::translate(&chain_state, our_address, message);
	match state_change {
		StateChange::ReceiveSecretReveal(inner) => {
			assert_eq!(inner.secret, secret);
			assert_eq!(inner.secrethash, expected_secrethash);
		},
		other => panic!("Unexpected state change: {:?}", other),
	}
}

#[test]
fn translate_unlock_assembles_balance_proof() {
	let our_address = Address::random();
	let chain_state = empty_chain_state(our_address);
	let sender = Address::random();
	let secret = Secret(vec![9u8; 32]);

	let message = WireMessage::Unlock(UnlockMessage {
		message_identifier: MessageIdentifier::from(1u64),
		chain_id: ChainID::Goerli,
		token_network_address: Address::random(),
		channel_identifier: ChannelIdentifier::from(1u64),
		transferred_amount: TokenAmount::from(100),
		locked_amount: TokenAmount::zero(),
		locksroot: Locksroot::zero(),
		nonce: Nonce::from(1u64),
		secret,
		balance_hash: H256::zero(),
		signature: Bytes(vec![0u8; 65]),
		sender,
	});

	let state_change = adapter::translate(&chain_state, our_address, message);
	match state_change {
		StateChange::ReceiveUnlock(inner) => {
			assert_eq!(inner.sender, sender);
			assert_eq!(inner.balance_proof.transferred_amount, TokenAmount::from(100));
			assert_eq!(inner.balance_proof.sender, Some(sender));
		},
		other => panic!("Unexpected state change: {:?}", other),
	}
}

#[test]
fn translate_direct_transfer() {
	let our_address = Address::random();
	let chain_state = empty_chain_state(our_address);
	let sender = Address::random();
	let payment_network_identifier = Address::random();
	let token_address = Address::random();

	let message = WireMessage::DirectTransfer(DirectTransferMessage {
		payment_network_identifier,
		token_address,
		payment_identifier: PaymentIdentifier::from(1),
		chain_id: ChainID::Goerli,
		token_network_address: Address::random(),
		channel_identifier: ChannelIdentifier::from(1u64),
		transferred_amount: TokenAmount::from(50),
		locked_amount: TokenAmount::zero(),
		locksroot: Locksroot::zero(),
		nonce: Nonce::from(1u64),
		balance_hash: H256::zero(),
		signature: Bytes(vec![0u8; 65]),
		sender,
	});

	let state_change = adapter::translate(&chain_state, our_address, message);
	match state_change {
		StateChange::ReceiveTransferDirect(inner) => {
			assert_eq!(inner.payment_network_identifier, payment_network_identifier);
			assert_eq!(inner.token_address, token_address);
		},
		other => panic!("Unexpected state change: {:?}", other),
	}
}

#[test]
fn translate_locked_transfer_targets_us() {
	let our_address = Address::random();
	let chain_state = empty_chain_state(our_address);
	let sender = Address::random();

	let message =
		WireMessage::LockedTransfer(locked_transfer_message(our_address, sender, None));

	let state_change = adapter::translate(&chain_state, our_address, message);
	assert!(matches!(state_change, StateChange::ActionInitTarget(_)));
}

#[test]
fn translate_locked_transfer_for_another_target_mediates() {
	let our_address = Address::random();
	let chain_state = empty_chain_state(our_address);
	let sender = Address::random();
	let target = Address::random();

	let message = WireMessage::LockedTransfer(locked_transfer_message(target, sender, None));

	let state_change = adapter::translate(&chain_state, our_address, message);
	assert!(matches!(state_change, StateChange::ActionInitMediator(_)));
}

#[test]
fn translate_refund_transfer_reroutes_when_we_are_initiator() {
	let our_address = Address::random();
	let sender = Address::random();
	let old_secrethash = SecretHash::random();
	let chain_state = chain_state_as_initiator(our_address, old_secrethash);

	let message = RefundTransferMessage {
		message_identifier: MessageIdentifier::from(1u64),
		payment_identifier: PaymentIdentifier::from(1),
		chain_id: ChainID::Goerli,
		token_network_address: Address::random(),
		channel_identifier: ChannelIdentifier::from(1u64),
		transferred_amount: TokenAmount::zero(),
		locked_amount: TokenAmount::from(10),
		locksroot: Locksroot::zero(),
		token: Address::random(),
		recipient: our_address,
		lock: dummy_lock(old_secrethash),
		target: Address::random(),
		initiator: our_address,
		route_states: vec![],
		nonce: Nonce::from(1u64),
		secret: Secret(vec![1u8; 32]),
		balance_hash: H256::zero(),
		signature: Bytes(vec![0u8; 65]),
		sender,
	};

	let state_change =
		adapter::translate(&chain_state, our_address, WireMessage::RefundTransfer(message));
	match state_change {
		StateChange::ActionTransferReroute(inner) => {
			// The new secrethash must not collide with the one that keyed the old task.
			assert_ne!(inner.secrethash, old_secrethash);
		},
		other => panic!("Expected a reroute, got: {:?}", other),
	}
}

#[test]
fn translate_refund_transfer_defaults_to_receive_refund() {
	let our_address = Address::random();
	let sender = Address::random();
	let chain_state = empty_chain_state(our_address);

	let message = RefundTransferMessage {
		message_identifier: MessageIdentifier::from(1u64),
		payment_identifier: PaymentIdentifier::from(1),
		chain_id: ChainID::Goerli,
		token_network_address: Address::random(),
		channel_identifier: ChannelIdentifier::from(1u64),
		transferred_amount: TokenAmount::zero(),
		locked_amount: TokenAmount::from(10),
		locksroot: Locksroot::zero(),
		token: Address::random(),
		recipient: our_address,
		lock: dummy_lock(SecretHash::random()),
		target: Address::random(),
		initiator: Address::random(),
		route_states: vec![],
		nonce: Nonce::from(1u64),
		secret: Secret(vec![2u8; 32]),
		balance_hash: H256::zero(),
		signature: Bytes(vec![0u8; 65]),
		sender,
	};

	let state_change =
		adapter::translate(&chain_state, our_address, WireMessage::RefundTransfer(message));
	assert!(matches!(state_change, StateChange::ReceiveTransferRefund(_)));
}
