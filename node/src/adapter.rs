#![warn(clippy::missing_docs_in_private_items)]
//! Translates incoming wire messages into state changes and submits them to the reducer.
//!
//! `RefundTransfer` is the one ambiguous case: whether it becomes `ReceiveTransferRefund` or a
//! rerouted transfer with a freshly generated secret depends on whether this node was the
//! initiator of the refunded payment, which is resolved by looking up the transfer's role in the
//! current `ChainState`.

use rand::{
	distributions::Alphanumeric,
	thread_rng,
	Rng,
};
use raiden_primitives::{
	hashing::hash_secret,
	types::{
		Address,
		CanonicalIdentifier,
		MessageIdentifier,
		PaymentIdentifier,
		Secret,
		SecretHash,
	},
};
use raiden_state_machine::{
	constants::SECRET_LENGTH,
	types::{
		ActionInitMediator,
		ActionInitTarget,
		ActionTransferReroute,
		BalanceProofState,
		ChainState,
		HashTimeLockState,
		HopState,
		LockedTransferState,
		ReceiveSecretRequest,
		ReceiveSecretReveal,
		ReceiveTransferDirect,
		ReceiveTransferRefund,
		ReceiveUnlock,
		RouteState,
		StateChange,
		TransferRole,
	},
	views,
};
use crate::messages::{
	DirectTransferMessage,
	LockMessage,
	LockedTransferMessage,
	RefundTransferMessage,
	RevealSecretMessage,
	SecretRequestMessage,
	UnlockMessage,
	WireMessage,
};

/// Translates a decoded wire message into the state change it should produce, given the node's
/// own address and its current view of chain state (needed to resolve `RefundTransfer`'s role
/// ambiguity).
pub fn translate(
	chain_state: &ChainState,
	our_address: Address,
	message: WireMessage,
) -> StateChange {
	match message {
		WireMessage::SecretRequest(inner) => translate_secret_request(inner),
		WireMessage::RevealSecret(inner) => translate_reveal_secret(inner),
		WireMessage::Unlock(inner) => translate_unlock(inner),
		WireMessage::DirectTransfer(inner) => translate_direct_transfer(inner),
		WireMessage::LockedTransfer(inner) => translate_locked_transfer(inner, our_address),
		WireMessage::RefundTransfer(inner) => translate_refund_transfer(inner, chain_state),
	}
}

/// `SecretRequest → ReceiveSecretRequest`.
fn translate_secret_request(message: SecretRequestMessage) -> StateChange {
	ReceiveSecretRequest {
		sender: message.sender,
		payment_identifier: message.payment_identifier,
		amount: message.amount,
		expiration: message.expiration,
		secrethash: message.secrethash,
		revealsecret: None,
	}
	.into()
}

/// `RevealSecret → ReceiveSecretReveal`. The wire message carries only the secret, so its
/// secret-hash is recomputed here rather than trusted from the sender.
fn translate_reveal_secret(message: RevealSecretMessage) -> StateChange {
	let secrethash = SecretHash::from_slice(&hash_secret(&message.secret.0));

	ReceiveSecretReveal { sender: message.sender, secret: message.secret, secrethash }.into()
}

/// `Secret/Unlock → ReceiveUnlock`, with the envelope fields assembled into a balance proof.
fn translate_unlock(message: UnlockMessage) -> StateChange {
	let canonical_identifier = CanonicalIdentifier {
		chain_identifier: message.chain_id,
		token_network_address: message.token_network_address,
		channel_identifier: message.channel_identifier,
	};
	let secrethash = SecretHash::from_slice(&hash_secret(&message.secret.0));

	let balance_proof = BalanceProofState {
		nonce: message.nonce,
		transferred_amount: message.transferred_amount,
		locked_amount: message.locked_amount,
		locksroot: message.locksroot,
		canonical_identifier,
		balance_hash: message.balance_hash,
		message_hash: None,
		signature: Some(message.signature),
		sender: Some(message.sender),
	};

	ReceiveUnlock {
		sender: message.sender,
		message_identifier: message.message_identifier,
		secret: message.secret,
		secrethash,
		balance_proof,
	}
	.into()
}

/// `DirectTransfer → ReceiveTransferDirect`.
fn translate_direct_transfer(message: DirectTransferMessage) -> StateChange {
	let canonical_identifier = CanonicalIdentifier {
		chain_identifier: message.chain_id,
		token_network_address: message.token_network_address,
		channel_identifier: message.channel_identifier,
	};

	let balance_proof = BalanceProofState {
		nonce: message.nonce,
		transferred_amount: message.transferred_amount,
		locked_amount: message.locked_amount,
		locksroot: message.locksroot,
		canonical_identifier,
		balance_hash: message.balance_hash,
		message_hash: None,
		signature: Some(message.signature),
		sender: Some(message.sender),
	};

	ReceiveTransferDirect {
		payment_network_identifier: message.payment_network_identifier,
		token_address: message.token_address,
		payment_identifier: message.payment_identifier,
		balance_proof,
	}
	.into()
}

/// Builds the `LockedTransferState` shared by `LockedTransfer` and `RefundTransfer` translation.
fn locked_transfer_state(
	payment_identifier: PaymentIdentifier,
	token: Address,
	lock: LockMessage,
	initiator: Address,
	target: Address,
	message_identifier: MessageIdentifier,
	route_states: Vec<RouteState>,
	balance_proof: BalanceProofState,
	secret: Option<Secret>,
) -> LockedTransferState {
	LockedTransferState {
		payment_identifier,
		token,
		lock: HashTimeLockState::create(lock.amount, lock.expiration, lock.secrethash),
		initiator,
		target,
		message_identifier,
		route_states,
		balance_proof,
		secret,
	}
}

/// `LockedTransfer → ActionInitTarget` if this node is the final hop, else `ActionInitMediator`.
fn translate_locked_transfer(message: LockedTransferMessage, our_address: Address) -> StateChange {
	let canonical_identifier = CanonicalIdentifier {
		chain_identifier: message.chain_id,
		token_network_address: message.token_network_address,
		channel_identifier: message.channel_identifier,
	};

	let balance_proof = BalanceProofState {
		nonce: message.nonce,
		transferred_amount: message.transferred_amount,
		locked_amount: message.locked_amount,
		locksroot: message.locksroot,
		canonical_identifier,
		balance_hash: message.balance_hash,
		message_hash: None,
		signature: Some(message.signature),
		sender: Some(message.sender),
	};

	let from_hop = HopState { node_address: message.sender, channel_identifier: message.channel_identifier };
	let received_valid_secret = message.secret.is_some();

	let transfer = locked_transfer_state(
		message.payment_identifier,
		message.token,
		message.lock,
		message.initiator,
		message.target,
		message.message_identifier,
		message.route_states,
		balance_proof.clone(),
		message.secret,
	);

	if message.target == our_address {
		ActionInitTarget {
			sender: message.sender,
			balance_proof,
			from_hop,
			transfer,
			received_valid_secret,
		}
		.into()
	} else {
		ActionInitMediator {
			sender: message.sender,
			balance_proof,
			from_hop,
			candidate_route_states: transfer.route_states.clone(),
			from_transfer: transfer,
		}
		.into()
	}
}

/// `RefundTransfer`, the one ambiguous case. If this node is the initiator of the refunded
/// payment (its secret-hash is tracked under an `InitiatorTask`), the refund is rerouted on a
/// freshly generated secret; otherwise it is a plain `ReceiveTransferRefund`.
fn translate_refund_transfer(message: RefundTransferMessage, chain_state: &ChainState) -> StateChange {
	let canonical_identifier = CanonicalIdentifier {
		chain_identifier: message.chain_id,
		token_network_address: message.token_network_address,
		channel_identifier: message.channel_identifier,
	};

	let balance_proof = BalanceProofState {
		nonce: message.nonce,
		transferred_amount: message.transferred_amount,
		locked_amount: message.locked_amount,
		locksroot: message.locksroot,
		canonical_identifier,
		balance_hash: message.balance_hash,
		message_hash: None,
		signature: Some(message.signature),
		sender: Some(message.sender),
	};

	let secrethash = message.lock.secrethash;

	let transfer = locked_transfer_state(
		message.payment_identifier,
		message.token,
		message.lock,
		message.initiator,
		message.target,
		message.message_identifier,
		message.route_states,
		balance_proof.clone(),
		Some(message.secret),
	);

	match views::get_transfer_role(chain_state, &secrethash) {
		Some(TransferRole::Initiator) => {
			let secret = random_secret();
			let new_secrethash = SecretHash::from_slice(&hash_secret(&secret.0));

			ActionTransferReroute { transfer, secret, secrethash: new_secrethash }.into()
		},
		_ => ReceiveTransferRefund { transfer, balance_proof }.into(),
	}
}

/// Generates a fresh secret for a rerouted payment. Unlike the reducer's own pseudo-random state,
/// this runs outside `state_transition` and is free to draw from the system RNG.
fn random_secret() -> Secret {
	let bytes: Vec<u8> =
		thread_rng().sample_iter(&Alphanumeric).take(SECRET_LENGTH as usize).collect();
	Secret(bytes)
}
