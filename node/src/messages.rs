#![warn(clippy::missing_docs_in_private_items)]
//! Simplified wire message shapes consumed by the message-intake adapter.
//!
//! These mirror the fields of the corresponding on-wire Raiden messages, minus envelope
//! signing/hashing and routing metadata decoding: the transport layer that hands messages to
//! this crate is assumed to have already verified signatures and resolved routing metadata into
//! `RouteState`s.

use raiden_primitives::types::{
	Address,
	BalanceHash,
	BlockExpiration,
	ChainID,
	ChannelIdentifier,
	EncodedLock,
	Locksroot,
	LockedAmount,
	MessageIdentifier,
	Nonce,
	PaymentIdentifier,
	Secret,
	SecretHash,
	Signature,
	TokenAddress,
	TokenAmount,
	TokenNetworkAddress,
};
use raiden_state_machine::types::RouteState;

/// A request for the secret that locks a pending transfer.
#[derive(Clone, Debug)]
pub struct SecretRequestMessage {
	pub message_identifier: MessageIdentifier,
	pub payment_identifier: PaymentIdentifier,
	pub secrethash: SecretHash,
	pub amount: TokenAmount,
	pub expiration: BlockExpiration,
	pub sender: Address,
}

/// Reveals the secret for a pending transfer without unlocking a channel.
#[derive(Clone, Debug)]
pub struct RevealSecretMessage {
	pub message_identifier: MessageIdentifier,
	pub secret: Secret,
	pub sender: Address,
}

/// Unlocks a mediated transfer on-chain terms, carrying the updated balance proof.
#[derive(Clone, Debug)]
pub struct UnlockMessage {
	pub message_identifier: MessageIdentifier,
	pub chain_id: ChainID,
	pub token_network_address: TokenNetworkAddress,
	pub channel_identifier: ChannelIdentifier,
	pub transferred_amount: TokenAmount,
	pub locked_amount: LockedAmount,
	pub locksroot: Locksroot,
	pub nonce: Nonce,
	pub secret: Secret,
	pub balance_hash: BalanceHash,
	pub signature: Signature,
	pub sender: Address,
}

/// Legacy non-mediated transfer, settled directly against the payer channel's balance proof.
#[derive(Clone, Debug)]
pub struct DirectTransferMessage {
	pub payment_network_identifier: Address,
	pub token_address: TokenAddress,
	pub payment_identifier: PaymentIdentifier,
	pub chain_id: ChainID,
	pub token_network_address: TokenNetworkAddress,
	pub channel_identifier: ChannelIdentifier,
	pub transferred_amount: TokenAmount,
	pub locked_amount: LockedAmount,
	pub locksroot: Locksroot,
	pub nonce: Nonce,
	pub balance_hash: BalanceHash,
	pub signature: Signature,
	pub sender: Address,
}

/// A hash-time-locked amount carried by a locked or refund transfer.
#[derive(Clone, Debug)]
pub struct LockMessage {
	pub amount: TokenAmount,
	pub expiration: BlockExpiration,
	pub secrethash: SecretHash,
}

/// A mediated transfer offering a new hash-time lock to the next hop.
#[derive(Clone, Debug)]
pub struct LockedTransferMessage {
	pub message_identifier: MessageIdentifier,
	pub payment_identifier: PaymentIdentifier,
	pub chain_id: ChainID,
	pub token_network_address: TokenNetworkAddress,
	pub channel_identifier: ChannelIdentifier,
	pub transferred_amount: TokenAmount,
	pub locked_amount: LockedAmount,
	pub locksroot: Locksroot,
	pub token: TokenAddress,
	pub recipient: Address,
	pub lock: LockMessage,
	pub target: Address,
	pub initiator: Address,
	pub route_states: Vec<RouteState>,
	pub nonce: Nonce,
	pub secret: Option<Secret>,
	pub balance_hash: BalanceHash,
	pub signature: Signature,
	pub sender: Address,
}

/// Returned by a mediator that could not forward a mediated transfer, carrying a fresh lock
/// offered back along the same route.
#[derive(Clone, Debug)]
pub struct RefundTransferMessage {
	pub message_identifier: MessageIdentifier,
	pub payment_identifier: PaymentIdentifier,
	pub chain_id: ChainID,
	pub token_network_address: TokenNetworkAddress,
	pub channel_identifier: ChannelIdentifier,
	pub transferred_amount: TokenAmount,
	pub locked_amount: LockedAmount,
	pub locksroot: Locksroot,
	pub token: TokenAddress,
	pub recipient: Address,
	pub lock: LockMessage,
	pub target: Address,
	pub initiator: Address,
	pub route_states: Vec<RouteState>,
	pub nonce: Nonce,
	pub secret: Secret,
	pub balance_hash: BalanceHash,
	pub signature: Signature,
	pub sender: Address,
}

/// Every wire message kind the adapter knows how to translate.
///
/// Unlike the runtime `cmdid` dispatch of the wire protocol, this is a closed Rust enum: an
/// unrecognized message can never reach `adapter::translate`, because the transport layer must
/// have already decoded it into one of these variants to construct a `WireMessage` at all. The
/// "unknown cmdid: log and drop" case from the wire protocol is handled by the transport layer
/// before a message ever becomes a `WireMessage`.
#[derive(Clone, Debug)]
pub enum WireMessage {
	SecretRequest(SecretRequestMessage),
	RevealSecret(RevealSecretMessage),
	Unlock(UnlockMessage),
	DirectTransfer(DirectTransferMessage),
	LockedTransfer(LockedTransferMessage),
	RefundTransfer(RefundTransferMessage),
}
