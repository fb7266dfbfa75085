use ethers::types::{Address, H160};

/// Entry point contract address (0x5FF137D4b0FDCD49DcA30c7CF57E578a026d2789).
/// All entry point contracts have the same address
pub const ENTRY_POINT_ADDRESS: Address = H160([
    0x5f, 0xf1, 0x37, 0xd4, 0xb0, 0xfd, 0xcd, 0x49, 0xdc, 0xa3, 0x0c, 0x7c, 0xf5, 0x7e, 0x57, 0x8a,
    0x02, 0x6d, 0x27, 0x89,
]);
/// Default address the account factory is installed at on a fresh ledger
/// (0xe7f1725E7734CE288F8367e1Bb143E90bb3F0512)
pub const DEFAULT_FACTORY_ADDRESS: Address = H160([
    0xe7, 0xf1, 0x72, 0x5e, 0x77, 0x34, 0xce, 0x28, 0x8f, 0x83, 0x67, 0xe1, 0xbb, 0x14, 0x3e, 0x90,
    0xbb, 0x3f, 0x05, 0x12,
]);
/// Test Key phrase
pub const SEED_PHRASE: &str = "test test test test test test test test test test test junk";
/// Geth Testnet chain id
pub const GETH_CHAIN_ID: u64 = 1337;

/// Creation code prefix of the account proxy. The entry point address is appended
/// (abi-encoded) to form the full init code used for CREATE2 derivation.
pub const ACCOUNT_CREATION_CODE: [u8; 20] = [
    0x3d, 0x60, 0x2d, 0x80, 0x60, 0x0a, 0x3d, 0x39, 0x81, 0xf3, 0x36, 0x3d, 0x3d, 0x37, 0x3d, 0x3d,
    0x3d, 0x36, 0x3d, 0x73,
];

/// ERC-1271 `isValidSignature(bytes32,bytes)` success value
pub const EIP1271_MAGIC_VALUE: [u8; 4] = [0x16, 0x26, 0xba, 0x7e];
/// Returned by `isValidSignature` for a well-formed but invalid signature
pub const EIP1271_INVALID: [u8; 4] = [0xff, 0xff, 0xff, 0xff];

/// `validateUserOp` return value on success
pub const SIG_VALIDATION_SUCCESS: u64 = 0;

/// EIP-712 type of a direct-path transaction
pub const ACCOUNT_TX_TYPE: &str = "AccountTx(address to,uint256 value,bytes data,uint8 operation,uint256 targetTxGas,uint256 baseGas,uint256 gasPrice,uint256 tokenGasPriceFactor,address gasToken,address refundReceiver,uint256 nonce)";

/// Number of low bits of an entry point nonce holding the sequence
pub const NONCE_SEQUENCE_BITS: usize = 64;

/// Gas metered for every call frame
pub const DEFAULT_CALL_GAS: u64 = 2_600;
/// Gas metered per calldata byte
pub const DEFAULT_CALLDATA_BYTE_GAS: u64 = 16;
/// Maximum nesting of call frames
pub const DEFAULT_MAX_CALL_DEPTH: usize = 64;
