//! Byte layout of everything the task store writes.
//!
//! | Prefix | Key                                   | Value        |
//! |--------|---------------------------------------|--------------|
//! | `0x01` | `id`                                  | task JSON    |
//! | `0x02` | -                                     | next id      |
//! | `0x03` | -                                     | params JSON  |
//! | `0xA1` | `len(creator) creator id`             | empty        |
//! | `0xA2` | `status scheduled_time id`            | empty        |
//! | `0xA3` | `status cost_price id`                | empty        |
//!
//! Integers are big-endian; timestamps have their sign bit flipped so that
//! byte order equals numeric order. Every index key ends with the task id,
//! which makes it unique and breaks ties by ascending id.

use crontask_core::{Address, Task, TaskId, TaskStatus, Timestamp};

use crate::error::{Result, StoreError};

pub const TASK_PREFIX: u8 = 0x01;
pub const NEXT_ID_KEY: &[u8] = &[0x02];
pub const PARAMS_KEY: &[u8] = &[0x03];
pub const CREATOR_INDEX: u8 = 0xA1;
pub const STATUS_TIME_INDEX: u8 = 0xA2;
pub const STATUS_PRICE_INDEX: u8 = 0xA3;

const ID_LEN: usize = 8;

pub fn status_byte(status: TaskStatus) -> u8 {
    match status {
        TaskStatus::Pending => 1,
        TaskStatus::Done => 2,
        TaskStatus::Failed => 3,
        TaskStatus::Expired => 4,
    }
}

pub fn encode_timestamp(ts: Timestamp) -> [u8; 8] {
    ((ts as u64) ^ (1 << 63)).to_be_bytes()
}

pub fn decode_timestamp(bytes: [u8; 8]) -> Timestamp {
    (u64::from_be_bytes(bytes) ^ (1 << 63)) as i64
}

pub fn task_prefix() -> Vec<u8> {
    vec![TASK_PREFIX]
}

pub fn task_key(id: TaskId) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + ID_LEN);
    key.push(TASK_PREFIX);
    key.extend_from_slice(&id.get().to_be_bytes());
    key
}

pub fn creator_prefix(creator: &Address) -> Vec<u8> {
    let raw = creator.as_str().as_bytes();
    // Address::parse caps the length well below u16::MAX.
    let len = u16::try_from(raw.len()).unwrap_or(u16::MAX);
    let mut key = Vec::with_capacity(3 + raw.len() + ID_LEN);
    key.push(CREATOR_INDEX);
    key.extend_from_slice(&len.to_be_bytes());
    key.extend_from_slice(raw);
    key
}

pub fn creator_key(creator: &Address, id: TaskId) -> Vec<u8> {
    let mut key = creator_prefix(creator);
    key.extend_from_slice(&id.get().to_be_bytes());
    key
}

pub fn status_time_prefix(status: TaskStatus) -> Vec<u8> {
    vec![STATUS_TIME_INDEX, status_byte(status)]
}

pub fn status_time_key(status: TaskStatus, scheduled_time: Timestamp, id: TaskId) -> Vec<u8> {
    let mut key = status_time_prefix(status);
    key.extend_from_slice(&encode_timestamp(scheduled_time));
    key.extend_from_slice(&id.get().to_be_bytes());
    key
}

/// Upper bound (inclusive on time) for due-task scans: every key at `time`
/// sorts before this one.
pub fn status_time_upper(status: TaskStatus, time: Timestamp) -> Vec<u8> {
    let mut key = status_time_prefix(status);
    key.extend_from_slice(&encode_timestamp(time));
    key.extend_from_slice(&u64::MAX.to_be_bytes());
    key
}

pub fn status_price_prefix(status: TaskStatus) -> Vec<u8> {
    vec![STATUS_PRICE_INDEX, status_byte(status)]
}

pub fn status_price_key(status: TaskStatus, price: u128, id: TaskId) -> Vec<u8> {
    let mut key = status_price_prefix(status);
    key.extend_from_slice(&price.to_be_bytes());
    key.extend_from_slice(&id.get().to_be_bytes());
    key
}

/// The three index entries a task occupies in its current state.
pub fn index_keys(task: &Task) -> [Vec<u8>; 3] {
    [
        creator_key(&task.creator, task.id),
        status_time_key(task.status, task.scheduled_time, task.id),
        status_price_key(task.status, task.cost_price.amount, task.id),
    ]
}

/// Every index key ends with the big-endian task id.
pub fn id_from_index_key(key: &[u8]) -> Result<TaskId> {
    if key.len() < 1 + ID_LEN {
        return Err(StoreError::Corrupt(format!(
            "index key too short: {}",
            hex::encode(key)
        )));
    }
    let mut id = [0u8; ID_LEN];
    id.copy_from_slice(&key[key.len() - ID_LEN..]);
    Ok(TaskId(u64::from_be_bytes(id)))
}

/// Scheduled time embedded in a status+time index key.
pub fn time_from_status_time_key(key: &[u8]) -> Result<Timestamp> {
    if key.len() != 2 + 8 + ID_LEN {
        return Err(StoreError::Corrupt(format!(
            "bad status/time key: {}",
            hex::encode(key)
        )));
    }
    let mut ts = [0u8; 8];
    ts.copy_from_slice(&key[2..10]);
    Ok(decode_timestamp(ts))
}
