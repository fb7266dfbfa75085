use crate::errors::{AccountError, Result};
use ethers::{
    abi::{self, ParamType, Token},
    types::{Address, Bytes},
};

/// Signature blob shared by both execution paths: `abi.encode(bytes signature, address module)`.
///
/// The module address routes the check; the raw signature is what the module sees.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignatureEnvelope {
    pub signature: Bytes,
    pub module: Address,
}

impl SignatureEnvelope {
    pub fn new(signature: impl Into<Bytes>, module: Address) -> Self {
        Self {
            signature: signature.into(),
            module,
        }
    }

    pub fn encode(&self) -> Bytes {
        abi::encode(&[
            Token::Bytes(self.signature.to_vec()),
            Token::Address(self.module),
        ])
        .into()
    }

    /// Decodes an envelope. Only the canonical encoding is accepted, so one
    /// envelope has exactly one byte representation.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let tokens = abi::decode(&[ParamType::Bytes, ParamType::Address], data)
            .map_err(|e| AccountError::MalformedEnvelope(e.to_string()))?;
        let mut tokens = tokens.into_iter();
        let envelope = match (tokens.next(), tokens.next()) {
            (Some(Token::Bytes(signature)), Some(Token::Address(module))) => {
                Self::new(signature, module)
            }
            _ => {
                return Err(AccountError::MalformedEnvelope(
                    "expected (bytes, address)".to_string(),
                ))
            }
        };
        if envelope.encode().as_ref() != data {
            return Err(AccountError::MalformedEnvelope(
                "non-canonical encoding".to_string(),
            ));
        }
        Ok(envelope)
    }
}
