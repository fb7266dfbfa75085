//! Authorization modules shipped with the crate.
mod eoa_ownership;
mod multisig;

pub use eoa_ownership::EoaOwnershipModule;
pub use multisig::MultisigModule;

use ethers::{
    types::{Address, Signature, H256},
    utils::hash_message,
};

/// Length of a `r || s || v` ECDSA signature
pub const ECDSA_SIGNATURE_LENGTH: usize = 65;

/// Recovers the signer of a 65 byte signature over a prehashed message
pub(crate) fn recover_signer(hash: H256, signature: &[u8]) -> Option<Address> {
    if signature.len() != ECDSA_SIGNATURE_LENGTH {
        return None;
    }
    let signature = Signature::try_from(signature).ok()?;
    signature.recover(hash).ok()
}

/// Possible signers of `signature`: over `hash` itself, and over its EIP-191
/// "Ethereum Signed Message" hash (user operations are signed with `personal_sign`).
pub(crate) fn recover_candidates(hash: H256, signature: &[u8]) -> [Option<Address>; 2] {
    [
        recover_signer(hash, signature),
        recover_signer(hash_message(hash), signature),
    ]
}
