use crate::envelope::SignatureEnvelope;
use ethers::{
    signers::{coins_bip39::English, LocalWallet, MnemonicBuilder, WalletError},
    types::{Address, Bytes, H256},
    utils::hash_message,
};

/// Given a seed phrase, build a wallet
///
/// # Arguments
/// * `seed` - The seed phrase
///
/// # Returns
/// * `Wallet<SigningKey>` - The wallet
pub fn build_wallet(seed: &str) -> anyhow::Result<LocalWallet> {
    let wallet = MnemonicBuilder::<English>::default().phrase(seed).build()?;
    Ok(wallet)
}

/// Builds the wallet at derivation `index` of a seed phrase
pub fn build_wallet_at(seed: &str, index: u32) -> anyhow::Result<LocalWallet> {
    let wallet = MnemonicBuilder::<English>::default()
        .phrase(seed)
        .index(index)?
        .build()?;
    Ok(wallet)
}

/// Signs a user operation hash the way wallets do (`personal_sign`) and wraps
/// the signature in the envelope routing it to `module`
pub fn sign_user_op_hash(
    wallet: &LocalWallet,
    module: Address,
    op_hash: H256,
) -> Result<Bytes, WalletError> {
    let signature = wallet.sign_hash(hash_message(op_hash))?;
    Ok(SignatureEnvelope::new(signature.to_vec(), module).encode())
}

/// Signs a direct-path typed-data digest as is and wraps the signature in the
/// envelope routing it to `module`
pub fn sign_direct_transaction(
    wallet: &LocalWallet,
    module: Address,
    tx_hash: H256,
) -> Result<Bytes, WalletError> {
    let signature = wallet.sign_hash(tx_hash)?;
    Ok(SignatureEnvelope::new(signature.to_vec(), module).encode())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::SEED_PHRASE;
    use ethers::signers::Signer;

    #[test]
    fn seed_phrase_derives_known_accounts() {
        let first = build_wallet(SEED_PHRASE).unwrap();
        assert_eq!(
            first.address(),
            "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266"
                .parse::<Address>()
                .unwrap()
        );
        let second = build_wallet_at(SEED_PHRASE, 1).unwrap();
        assert_eq!(
            second.address(),
            "0x70997970C51812dc3A010C7d01b50e0d17dc79C8"
                .parse::<Address>()
                .unwrap()
        );
    }

    #[test]
    fn envelopes_name_the_module() {
        let wallet = build_wallet(SEED_PHRASE).unwrap();
        let module = Address::repeat_byte(0x0d);
        let hash = H256::repeat_byte(1);

        let user_op = SignatureEnvelope::decode(&sign_user_op_hash(&wallet, module, hash).unwrap())
            .unwrap();
        let direct =
            SignatureEnvelope::decode(&sign_direct_transaction(&wallet, module, hash).unwrap())
                .unwrap();
        assert_eq!(user_op.module, module);
        assert_eq!(direct.module, module);
        assert_eq!(user_op.signature.len(), 65);
        assert_ne!(user_op.signature, direct.signature);
    }
}
