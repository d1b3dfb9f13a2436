//! Snowflake ID Generator
//!
//! Time-ordered unique IDs. Chat ids double as the per-instance delivery
//! sequence marker, so ids from one generator are strictly increasing.
//!
//! Ids exceed 2^53, so they cross JSON as strings (`id_string`,
//! `id_string_vec`).

use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

/// Custom epoch (2024-01-01T00:00:00.000Z)
pub const EPOCH_MS: u64 = 1_704_067_200_000;

const SEQUENCE_BITS: u64 = 12;
const SEQUENCE_MASK: u64 = (1 << SEQUENCE_BITS) - 1;

/// Snowflake ID generator
pub struct SnowflakeGenerator {
    machine_id: u64,
    node_id: u64,
    /// (last timestamp, sequence within that millisecond)
    state: Mutex<(u64, u64)>,
}

impl SnowflakeGenerator {
    /// Create a new snowflake generator
    pub fn new(machine_id: u64, node_id: u64) -> Self {
        Self {
            machine_id: machine_id & 0x1F, // 5 bits
            node_id: node_id & 0x1F,       // 5 bits
            state: Mutex::new((0, 0)),
        }
    }

    /// Generate a new snowflake ID
    pub fn generate(&self) -> i64 {
        let mut state = self.state.lock();
        let mut timestamp = current_timestamp().max(state.0);

        let sequence = if timestamp == state.0 {
            let next = (state.1 + 1) & SEQUENCE_MASK;
            if next == 0 {
                // Sequence exhausted for this millisecond; borrow the next one.
                timestamp += 1;
            }
            next
        } else {
            0
        };
        *state = (timestamp, sequence);

        let id = ((timestamp - EPOCH_MS) << 22)
            | (self.machine_id << 17)
            | (self.node_id << SEQUENCE_BITS)
            | sequence;

        id as i64
    }
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(EPOCH_MS)
        .max(EPOCH_MS)
}

/// Snowflake as it appears in JSON: a decimal string, or a plain number
/// from older clients.
#[derive(serde::Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Number(i64),
}

impl RawId {
    fn parse<E: serde::de::Error>(self) -> Result<i64, E> {
        match self {
            RawId::Number(id) => Ok(id),
            RawId::Text(text) => text
                .trim()
                .parse()
                .map_err(|_| E::custom(format!("invalid id: {:?}", text))),
        }
    }
}

/// Serde helper for a snowflake as a JSON string.
pub mod id_string {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::RawId;

    pub fn serialize<S>(id: &i64, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(id)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<i64, D::Error>
    where
        D: Deserializer<'de>,
    {
        RawId::deserialize(deserializer)?.parse()
    }
}

/// Serde helper for a list of snowflakes as JSON strings.
pub mod id_string_vec {
    use serde::{ser::SerializeSeq, Deserialize, Deserializer, Serializer};

    use super::RawId;

    pub fn serialize<S>(ids: &[i64], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut seq = serializer.serialize_seq(Some(ids.len()))?;
        for id in ids {
            seq.serialize_element(&id.to_string())?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<i64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Vec::<RawId>::deserialize(deserializer)?
            .into_iter()
            .map(RawId::parse)
            .collect()
    }
}
