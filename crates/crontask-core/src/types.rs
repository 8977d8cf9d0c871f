use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{CoreError, Result};

/// Unix timestamp in whole seconds (host block time, not wall-clock).
pub type Timestamp = i64;

/// Sequential task identifier. The first assigned id is 1; 0 is never used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl TaskId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for TaskId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

const BECH32_CHARSET: &str = "qpzry9x8gf2tvdw0s3jn54khce6mua7l";
const MIN_ADDRESS_DATA_LEN: usize = 6;
const MAX_ADDRESS_LEN: usize = 90;

/// Account identity in bech32 shape: `<hrp>1<data>`.
///
/// Only the shape is checked (lowercase prefix, separator, bech32 charset,
/// at most 90 characters); the checksum is not verified.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    pub fn parse(s: &str) -> Result<Self> {
        if s.len() > MAX_ADDRESS_LEN {
            return Err(CoreError::InvalidAddress(format!(
                "address longer than {MAX_ADDRESS_LEN} characters"
            )));
        }
        let (hrp, data) = s
            .rsplit_once('1')
            .ok_or_else(|| CoreError::InvalidAddress(format!("{s}: missing separator")))?;

        if hrp.is_empty()
            || !hrp
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        {
            return Err(CoreError::InvalidAddress(format!("{s}: bad prefix")));
        }
        if data.len() < MIN_ADDRESS_DATA_LEN || !data.chars().all(|c| BECH32_CHARSET.contains(c)) {
            return Err(CoreError::InvalidAddress(format!("{s}: bad data part")));
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Address {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Address {
    type Error = CoreError;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<Address> for String {
    fn from(addr: Address) -> Self {
        addr.0
    }
}

/// An amount of a single denomination.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Coin {
    pub denom: String,
    pub amount: u128,
}

impl Coin {
    pub fn new(denom: impl Into<String>, amount: u128) -> Self {
        Self {
            denom: denom.into(),
            amount,
        }
    }

    pub fn is_positive(&self) -> bool {
        self.amount > 0
    }
}

impl fmt::Display for Coin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.amount, self.denom)
    }
}

/// Parses the compact `<amount><denom>` form, e.g. `100dys`.
impl FromStr for Coin {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        let split = s
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| CoreError::InvalidCoin(format!("{s}: missing denom")))?;
        let (amount, denom) = s.split_at(split);
        let amount = amount
            .parse::<u128>()
            .map_err(|e| CoreError::InvalidCoin(format!("{s}: {e}")))?;
        if !denom.chars().all(|c| c.is_ascii_alphanumeric() || c == '/') {
            return Err(CoreError::InvalidCoin(format!("{s}: bad denom")));
        }
        Ok(Self::new(denom, amount))
    }
}

/// Lifecycle state of a task. Every state except `Pending` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Done,
    Failed,
    Expired,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 4] = [
        TaskStatus::Pending,
        TaskStatus::Done,
        TaskStatus::Failed,
        TaskStatus::Expired,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Done => "DONE",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Expired => "EXPIRED",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, TaskStatus::Pending)
    }

    /// Rewriting a record in its current status is not a transition and is
    /// always allowed; otherwise only `Pending -> terminal` is.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        self == next || (self == TaskStatus::Pending && next.is_terminal())
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "PENDING" => Ok(TaskStatus::Pending),
            "DONE" => Ok(TaskStatus::Done),
            "FAILED" => Ok(TaskStatus::Failed),
            "EXPIRED" => Ok(TaskStatus::Expired),
            other => Err(CoreError::InvalidStatus(other.to_string())),
        }
    }
}

/// One opaque unit of work inside a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    /// Routing key for the handler table, e.g. `bank.send`.
    pub kind: String,
    /// Interpreted only by the handler registered for `kind`.
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Operation {
    pub fn new(kind: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }
}

/// Output produced by a successful operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationResult {
    pub kind: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// A persisted task record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub creator: Address,
    pub scheduled_time: Timestamp,
    pub expiry_time: Timestamp,
    /// Resource ceiling for one execution attempt.
    pub cost_limit: u64,
    /// Prepaid fee, collected when the task comes due.
    pub cost_fee: Coin,
    /// `cost_fee / cost_limit`, fixed at creation.
    pub cost_price: Coin,
    pub operations: Vec<Operation>,
    /// Populated only when every operation succeeded.
    #[serde(default)]
    pub results: Vec<OperationResult>,
    pub status: TaskStatus,
    #[serde(default)]
    pub error_log: String,
    pub creation_time: Timestamp,
    #[serde(default)]
    pub execution_time: Option<Timestamp>,
    #[serde(default)]
    pub cost_used: u64,
}

impl Task {
    /// Integer price per cost unit; truncates.
    pub fn price_for(fee: &Coin, cost_limit: u64) -> Coin {
        let amount = fee.amount.checked_div(u128::from(cost_limit)).unwrap_or(0);
        Coin::new(fee.denom.clone(), amount)
    }

    pub fn is_due(&self, now: Timestamp) -> bool {
        self.status == TaskStatus::Pending && self.scheduled_time <= now
    }

    pub fn is_overdue(&self, now: Timestamp) -> bool {
        self.status == TaskStatus::Pending && self.expiry_time <= now
    }

    pub fn transition(&mut self, next: TaskStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(CoreError::IllegalTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_accepts_bech32_shape() {
        let addr = Address::parse("dys1qypqxpq9qcrsszg2").unwrap();
        assert_eq!(addr.as_str(), "dys1qypqxpq9qcrsszg2");
    }

    #[test]
    fn address_rejects_malformed() {
        assert!(Address::parse("").is_err());
        assert!(Address::parse("nosepnosep").is_err());
        assert!(Address::parse("1qypqxpq9").is_err());
        assert!(Address::parse("DYS1qypqxpq9").is_err());
        // 'b' is outside the bech32 charset
        assert!(Address::parse("dys1bbbbbbbb").is_err());
        assert!(Address::parse("dys1qyp").is_err());
    }

    #[test]
    fn address_deserialize_validates() {
        let ok: std::result::Result<Address, _> = serde_json::from_str(r#""dys1qypqxpq9qcrs""#);
        assert!(ok.is_ok());
        let bad: std::result::Result<Address, _> = serde_json::from_str(r#""not an address""#);
        assert!(bad.is_err());
    }

    #[test]
    fn coin_parses_compact_form() {
        let coin: Coin = "250dys".parse().unwrap();
        assert_eq!(coin, Coin::new("dys", 250));
        assert_eq!(coin.to_string(), "250dys");
        assert!("dys".parse::<Coin>().is_err());
        assert!("100".parse::<Coin>().is_err());
    }

    #[test]
    fn price_truncates() {
        assert_eq!(Task::price_for(&Coin::new("dys", 100), 100).amount, 1);
        assert_eq!(Task::price_for(&Coin::new("dys", 99), 100).amount, 0);
        assert_eq!(Task::price_for(&Coin::new("dys", 1_000), 3).amount, 333);
    }

    #[test]
    fn terminal_states_never_leave() {
        for from in TaskStatus::ALL.into_iter().filter(|s| s.is_terminal()) {
            for to in TaskStatus::ALL {
                assert_eq!(from.can_transition_to(to), from == to, "{from} -> {to}");
            }
        }
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Done));
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Expired));
    }

    #[test]
    fn status_string_roundtrip() {
        for status in TaskStatus::ALL {
            assert_eq!(status.as_str().parse::<TaskStatus>().unwrap(), status);
        }
        assert!("SCHEDULED".parse::<TaskStatus>().is_err());
    }
}
