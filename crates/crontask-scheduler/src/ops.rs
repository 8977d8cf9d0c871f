//! Built-in operation kinds.
//!
//! | Kind           | Payload                          |
//! |----------------|----------------------------------|
//! | `bank.send`    | `{from, to, amount: Coin}`       |
//! | `state.put`    | `{key: string, value: any}`      |
//! | `state.delete` | `{key: string}`                  |

use serde::Deserialize;
use serde_json::{json, Value};

use crontask_core::{Address, Coin};

use crate::bank::{balance_key, decode_amount, transfer_writes};
use crate::error::OperationError;
use crate::router::OperationRouter;
use crate::scope::ExecScope;

pub const BANK_SEND: &str = "bank.send";
pub const STATE_PUT: &str = "state.put";
pub const STATE_DELETE: &str = "state.delete";

const DATA_PREFIX: &[u8] = b"data/";

pub fn data_key(key: &str) -> Vec<u8> {
    let mut full = DATA_PREFIX.to_vec();
    full.extend_from_slice(key.as_bytes());
    full
}

pub fn register_builtin(router: &OperationRouter) {
    router.register_fn(BANK_SEND, bank_send);
    router.register_fn(STATE_PUT, state_put);
    router.register_fn(STATE_DELETE, state_delete);
}

fn parse<T: for<'de> Deserialize<'de>>(payload: &Value) -> Result<T, OperationError> {
    serde_json::from_value(payload.clone()).map_err(|e| OperationError::InvalidPayload(e.to_string()))
}

#[derive(Deserialize)]
struct SendPayload {
    from: Address,
    to: Address,
    amount: Coin,
}

fn bank_send(payload: &Value, scope: &mut ExecScope<'_>) -> Result<Value, OperationError> {
    let msg: SendPayload = parse(payload)?;
    if &msg.from != scope.creator() {
        return Err(OperationError::Rejected(format!(
            "sender {} is not the task creator",
            msg.from
        )));
    }
    if !msg.amount.is_positive() {
        return Err(OperationError::InvalidPayload(format!(
            "amount {} is not positive",
            msg.amount
        )));
    }

    let from_raw = scope.get(&balance_key(msg.from.as_str(), &msg.amount.denom))?;
    let to_raw = scope.get(&balance_key(msg.to.as_str(), &msg.amount.denom))?;
    let from_balance = decode_amount(from_raw.as_deref())?;
    let to_balance = decode_amount(to_raw.as_deref())?;

    let writes = transfer_writes(
        msg.from.as_str(),
        msg.to.as_str(),
        &msg.amount,
        from_balance,
        to_balance,
    )
    .map_err(|e| OperationError::Rejected(e.to_string()))?;
    for (key, value) in writes {
        scope.set(&key, &value)?;
    }

    Ok(json!({
        "from": msg.from,
        "to": msg.to,
        "amount": msg.amount.to_string(),
    }))
}

#[derive(Deserialize)]
struct PutPayload {
    key: String,
    #[serde(default)]
    value: Value,
}

fn state_put(payload: &Value, scope: &mut ExecScope<'_>) -> Result<Value, OperationError> {
    let msg: PutPayload = parse(payload)?;
    if msg.key.is_empty() {
        return Err(OperationError::InvalidPayload("empty key".into()));
    }
    let encoded =
        serde_json::to_vec(&msg.value).map_err(|e| OperationError::InvalidPayload(e.to_string()))?;
    scope.set(&data_key(&msg.key), &encoded)?;
    Ok(json!({ "key": msg.key }))
}

#[derive(Deserialize)]
struct DeletePayload {
    key: String,
}

fn state_delete(payload: &Value, scope: &mut ExecScope<'_>) -> Result<Value, OperationError> {
    let msg: DeletePayload = parse(payload)?;
    let existed = scope.get(&data_key(&msg.key))?.is_some();
    scope.delete(&data_key(&msg.key))?;
    Ok(json!({ "key": msg.key, "existed": existed }))
}
