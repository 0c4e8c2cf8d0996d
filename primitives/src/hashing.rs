use sha2::{
	Digest,
	Sha256,
};
use web3::signing::keccak256;

use crate::types::{
	BalanceHash,
	H256,
	LockedAmount,
	Locksroot,
	TokenAmount,
};

pub fn hash_secret(secret: &[u8]) -> [u8; 32] {
	let mut hasher = Sha256::new();
	hasher.update(secret);
	hasher.finalize().into()
}

/// Hashes the fields of a balance proof that are signed over, as they appear on-chain.
pub fn hash_balance_data(
	transferred_amount: TokenAmount,
	locked_amount: LockedAmount,
	locksroot: Locksroot,
) -> BalanceHash {
	let mut transferred_amount_in_bytes = vec![0u8; 32];
	transferred_amount.to_big_endian(&mut transferred_amount_in_bytes);

	let mut locked_amount_in_bytes = vec![0u8; 32];
	locked_amount.to_big_endian(&mut locked_amount_in_bytes);

	let hash = keccak256(
		&[&transferred_amount_in_bytes[..], &locked_amount_in_bytes[..], locksroot.as_bytes()]
			.concat(),
	);

	H256::from_slice(&hash)
}
