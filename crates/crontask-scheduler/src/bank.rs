use std::sync::Arc;

use tracing::debug;

use crontask_core::{Address, Coin};
use crontask_store::{KvStore, StoreError, WriteBatch};

use crate::error::FeeError;

/// Account that receives collected task fees.
pub const FEE_COLLECTOR_ACCOUNT: &str = "fee_collector";

const BALANCE_PREFIX: &[u8] = b"balance/";

/// Moves a task's prepaid fee away from its creator.
///
/// `state` is the view the fee is written into. The driver passes a
/// write buffer and commits it together with the task record.
pub trait FeeCollector: Send + Sync {
    fn collect(&self, state: &dyn KvStore, payer: &Address, fee: &Coin) -> Result<(), FeeError>;
}

pub fn balance_key(account: &str, denom: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(BALANCE_PREFIX.len() + account.len() + 1 + denom.len());
    key.extend_from_slice(BALANCE_PREFIX);
    key.extend_from_slice(account.as_bytes());
    key.push(b'/');
    key.extend_from_slice(denom.as_bytes());
    key
}

pub fn decode_amount(raw: Option<&[u8]>) -> Result<u128, StoreError> {
    match raw {
        None => Ok(0),
        Some(bytes) => {
            let arr: [u8; 16] = bytes
                .try_into()
                .map_err(|_| StoreError::Corrupt("balance is not 16 bytes".into()))?;
            Ok(u128::from_be_bytes(arr))
        }
    }
}

pub fn encode_amount(amount: u128) -> Vec<u8> {
    amount.to_be_bytes().to_vec()
}

/// Computes the two balance writes for moving `coin` from `from` to `to`,
/// given their current balances.
pub(crate) fn transfer_writes(
    from: &str,
    to: &str,
    coin: &Coin,
    from_balance: u128,
    to_balance: u128,
) -> Result<[(Vec<u8>, Vec<u8>); 2], FeeError> {
    let remaining = from_balance
        .checked_sub(coin.amount)
        .ok_or_else(|| FeeError::InsufficientFunds {
            account: from.to_string(),
            denom: coin.denom.clone(),
            needed: coin.amount,
            available: from_balance,
        })?;
    if from == to {
        let unchanged = encode_amount(from_balance);
        let key = balance_key(from, &coin.denom);
        return Ok([(key.clone(), unchanged.clone()), (key, unchanged)]);
    }
    let credited = to_balance
        .checked_add(coin.amount)
        .ok_or_else(|| FeeError::InvalidAmount(format!("balance overflow for {to}")))?;
    Ok([
        (balance_key(from, &coin.denom), encode_amount(remaining)),
        (balance_key(to, &coin.denom), encode_amount(credited)),
    ])
}

/// Account balances kept in the application state store.
pub struct Ledger {
    kv: Arc<dyn KvStore>,
}

impl Ledger {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    pub fn balance(&self, account: &str, denom: &str) -> Result<u128, StoreError> {
        let raw = self.kv.get(&balance_key(account, denom))?;
        decode_amount(raw.as_deref())
    }

    /// Credit `coin` to `account` out of thin air (genesis funding, tests).
    pub fn mint(&self, account: &str, coin: &Coin) -> Result<(), FeeError> {
        let current = self.balance(account, &coin.denom)?;
        let next = current
            .checked_add(coin.amount)
            .ok_or_else(|| FeeError::InvalidAmount(format!("balance overflow for {account}")))?;
        self.kv
            .set(&balance_key(account, &coin.denom), &encode_amount(next))?;
        debug!(%account, %coin, "minted");
        Ok(())
    }

    /// Move `coin` between accounts in one batch.
    pub fn transfer(&self, from: &str, to: &str, coin: &Coin) -> Result<(), FeeError> {
        transfer(self.kv.as_ref(), from, to, coin)
    }
}

fn transfer(kv: &dyn KvStore, from: &str, to: &str, coin: &Coin) -> Result<(), FeeError> {
    if !coin.is_positive() {
        return Err(FeeError::InvalidAmount(format!("{coin} is not positive")));
    }
    let from_balance = decode_amount(kv.get(&balance_key(from, &coin.denom))?.as_deref())?;
    let to_balance = decode_amount(kv.get(&balance_key(to, &coin.denom))?.as_deref())?;
    let mut batch = WriteBatch::new();
    for (key, value) in transfer_writes(from, to, coin, from_balance, to_balance)? {
        batch.put(key, value);
    }
    kv.write(batch)?;
    Ok(())
}

impl FeeCollector for Ledger {
    fn collect(&self, state: &dyn KvStore, payer: &Address, fee: &Coin) -> Result<(), FeeError> {
        transfer(state, payer.as_str(), FEE_COLLECTOR_ACCOUNT, fee)?;
        debug!(payer = %payer, fee = %fee, "fee collected");
        Ok(())
    }
}
