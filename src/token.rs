use crate::{
    errors::{AccountError, Result},
    gen::{selector, MintCall, TransferCall},
    types::Event,
};
use ethers::{
    abi::{self, AbiDecode, AbiEncode, Token},
    contract::EthCall,
    types::{Address, Bytes, U256},
};
use hashbrown::HashMap;

/// Minimal ERC-20 used as a call target and as a refund gas token.
/// `mint` is open to anyone.
#[derive(Clone, Debug, Default)]
pub struct MockToken {
    symbol: String,
    balances: HashMap<Address, U256>,
    total_supply: U256,
}

impl MockToken {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            ..Default::default()
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn balance_of(&self, holder: Address) -> U256 {
        self.balances.get(&holder).copied().unwrap_or_default()
    }

    pub fn total_supply(&self) -> U256 {
        self.total_supply
    }

    pub fn transfer_calldata(to: Address, amount: U256) -> Bytes {
        TransferCall { to, amount }.encode().into()
    }

    pub fn mint_calldata(to: Address, amount: U256) -> Bytes {
        MintCall { to, amount }.encode().into()
    }

    fn transfer(&mut self, from: Address, to: Address, amount: U256) -> Result<()> {
        let balance = self.balance_of(from);
        if balance < amount {
            return Err(AccountError::Revert(
                "ERC20: transfer amount exceeds balance".to_string(),
            ));
        }
        self.balances.insert(from, balance - amount);
        let receiver = self.balances.entry(to).or_default();
        *receiver += amount;
        Ok(())
    }

    fn mint(&mut self, to: Address, amount: U256) -> Result<()> {
        self.total_supply = self
            .total_supply
            .checked_add(amount)
            .ok_or_else(|| AccountError::Revert("ERC20: supply overflow".to_string()))?;
        let balance = self.balances.entry(to).or_default();
        *balance += amount;
        Ok(())
    }

    pub(crate) fn dispatch(
        &mut self,
        caller: Address,
        data: &[u8],
        events: &mut Vec<Event>,
    ) -> Result<Bytes> {
        match selector(data) {
            Some(s) if s == TransferCall::selector() => {
                let TransferCall { to, amount } = TransferCall::decode(data)?;
                self.transfer(caller, to, amount)?;
                events.push(Event::Transfer {
                    from: caller,
                    to,
                    value: amount,
                });
                Ok(abi::encode(&[Token::Bool(true)]).into())
            }
            Some(s) if s == MintCall::selector() => {
                let MintCall { to, amount } = MintCall::decode(data)?;
                self.mint(to, amount)?;
                events.push(Event::Transfer {
                    from: Address::zero(),
                    to,
                    value: amount,
                });
                Ok(Bytes::new())
            }
            _ => Err(AccountError::Revert("unknown token function".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_moves_balance_and_emits() {
        let mut token = MockToken::new("TST");
        let (alice, bob) = (Address::repeat_byte(1), Address::repeat_byte(2));
        let mut events = Vec::new();
        token
            .dispatch(alice, &MockToken::mint_calldata(alice, U256::from(100)), &mut events)
            .unwrap();
        let out = token
            .dispatch(alice, &MockToken::transfer_calldata(bob, U256::from(40)), &mut events)
            .unwrap();

        assert_eq!(out.as_ref(), abi::encode(&[Token::Bool(true)]).as_slice());
        assert_eq!(token.balance_of(alice), U256::from(60));
        assert_eq!(token.balance_of(bob), U256::from(40));
        assert_eq!(token.total_supply(), U256::from(100));
        assert_eq!(
            events.last(),
            Some(&Event::Transfer {
                from: alice,
                to: bob,
                value: U256::from(40)
            })
        );
    }

    #[test]
    fn overdraft_reverts() {
        let mut token = MockToken::new("TST");
        let err = token
            .dispatch(
                Address::repeat_byte(1),
                &MockToken::transfer_calldata(Address::repeat_byte(2), U256::one()),
                &mut Vec::new(),
            )
            .unwrap_err();
        assert_eq!(
            err,
            AccountError::Revert("ERC20: transfer amount exceeds balance".to_string())
        );
    }
}
