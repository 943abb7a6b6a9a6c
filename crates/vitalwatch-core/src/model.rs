//! Telemetry data model: readings, snapshots and the records persisted per entity.
//!
//! A [`Snapshot`] is one poll's worth of readings, one per sensor channel, in
//! channel order. Snapshots are stored as compact JSON arrays and paired with
//! integer Unix-second timestamps kept in a parallel sequence.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Number of sensor channels reported by the observed upstream.
pub const DEFAULT_CHANNELS: usize = 6;

// ---------------------------------------------------------------------------
// Entity id
// ---------------------------------------------------------------------------

/// Identifier of a tracked subject (e.g. a patient).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct EntityId(u32);

impl EntityId {
    /// Create an id. Returns `None` for zero; ids are positive.
    pub fn new(id: u32) -> Option<Self> {
        if id == 0 { None } else { Some(Self(id)) }
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl TryFrom<u32> for EntityId {
    type Error = String;

    fn try_from(id: u32) -> Result<Self, Self::Error> {
        Self::new(id).ok_or_else(|| "entity id must be positive".to_string())
    }
}

impl From<EntityId> for u32 {
    fn from(id: EntityId) -> Self {
        id.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EntityId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw: u32 = s
            .trim()
            .parse()
            .map_err(|_| format!("invalid entity id '{s}'"))?;
        Self::new(raw).ok_or_else(|| format!("entity id must be positive, got '{s}'"))
    }
}

// ---------------------------------------------------------------------------
// Readings and snapshots
// ---------------------------------------------------------------------------

/// One scalar reading from one channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Channel index, serialized as `id` to match the upstream payload.
    #[serde(rename = "id")]
    pub channel: usize,
    pub value: f64,
    #[serde(default)]
    pub anomaly: bool,
}

impl Reading {
    pub fn new(channel: usize, value: f64) -> Self {
        Self {
            channel,
            value,
            anomaly: false,
        }
    }
}

/// Ordered readings for one entity from one poll.
///
/// Position `i` holds channel `i`. Classification may set or reset anomaly
/// flags but never reorders, resizes or changes values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot {
    readings: Vec<Reading>,
}

impl Snapshot {
    /// Build a snapshot from readings, renumbering channels by position.
    pub fn new(readings: Vec<Reading>) -> Self {
        let readings = readings
            .into_iter()
            .enumerate()
            .map(|(channel, r)| Reading { channel, ..r })
            .collect();
        Self { readings }
    }

    /// Build an unflagged snapshot from raw channel values.
    pub fn from_values(values: &[f64]) -> Self {
        Self {
            readings: values
                .iter()
                .enumerate()
                .map(|(channel, &value)| Reading::new(channel, value))
                .collect(),
        }
    }

    pub fn readings(&self) -> &[Reading] {
        &self.readings
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    /// Value of one channel, if present.
    pub fn value(&self, channel: usize) -> Option<f64> {
        self.readings.get(channel).map(|r| r.value)
    }

    /// Whether any reading is flagged. The only definition of an anomalous snapshot.
    pub fn has_anomaly(&self) -> bool {
        self.readings.iter().any(|r| r.anomaly)
    }

    /// Channels currently flagged, in order.
    pub fn flagged_channels(&self) -> Vec<usize> {
        self.readings
            .iter()
            .filter(|r| r.anomaly)
            .map(|r| r.channel)
            .collect()
    }

    /// Drop every anomaly flag.
    pub fn clear_flags(&mut self) {
        for r in &mut self.readings {
            r.anomaly = false;
        }
    }

    /// Flag one channel as anomalous. Returns `false` if the channel does not exist.
    pub fn flag(&mut self, channel: usize) -> bool {
        match self.readings.get_mut(channel) {
            Some(r) => {
                r.anomaly = true;
                true
            }
            None => false,
        }
    }

    /// Compact JSON encoding used as the stored value.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn decode(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str::<Self>(raw).map(|s| Self::new(s.readings))
    }
}

// ---------------------------------------------------------------------------
// Persisted records
// ---------------------------------------------------------------------------

/// A snapshot together with the Unix second it was collected at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimestampedRecord {
    pub snapshot: Snapshot,
    pub collected_at: i64,
}

impl TimestampedRecord {
    /// Age in seconds relative to `now` (negative if collected in the future).
    pub fn age(&self, now: i64) -> i64 {
        now - self.collected_at
    }
}

/// Descriptive fields the upstream reports alongside the readings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firstname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lastname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub birthdate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_name: Option<String>,
}

impl EntityProfile {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Encode a timestamp as stored in the timestamp sequences.
pub fn encode_timestamp(secs: i64) -> String {
    secs.to_string()
}

/// Decode a stored timestamp. Float encodings are accepted and truncated.
pub fn decode_timestamp(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if let Ok(secs) = raw.parse::<i64>() {
        return Some(secs);
    }
    raw.parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .map(|f| f.trunc() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    // -----------------------------------------------------------------------
    // EntityId
    // -----------------------------------------------------------------------

    #[test]
    fn test_entity_id_rejects_zero() {
        assert!(EntityId::new(0).is_none());
        assert_eq!(EntityId::new(7).map(EntityId::get), Some(7));
    }

    #[test]
    fn test_entity_id_serde_rejects_zero() {
        let ids: Vec<EntityId> = serde_json::from_str("[1, 2]").unwrap();
        assert_eq!(ids.len(), 2);
        assert!(serde_json::from_str::<Vec<EntityId>>("[0]").is_err());
        assert_eq!(serde_json::to_string(&ids[1]).unwrap(), "2");
    }

    #[test]
    fn test_entity_id_from_str() {
        assert_eq!("12".parse::<EntityId>().unwrap().get(), 12);
        assert_eq!(" 3 ".parse::<EntityId>().unwrap().get(), 3);
        assert!("0".parse::<EntityId>().is_err());
        assert!("-1".parse::<EntityId>().is_err());
        assert!("abc".parse::<EntityId>().is_err());
    }

    // -----------------------------------------------------------------------
    // Snapshot
    // -----------------------------------------------------------------------

    #[test]
    fn test_snapshot_has_anomaly_is_or_of_flags() {
        let mut s = Snapshot::from_values(&[1.0, 2.0, 3.0]);
        assert!(!s.has_anomaly());
        assert!(s.flag(2));
        assert!(s.has_anomaly());
        assert_eq!(s.flagged_channels(), vec![2]);
    }

    #[test]
    fn test_snapshot_flag_out_of_range() {
        let mut s = Snapshot::from_values(&[1.0]);
        assert!(!s.flag(5));
        assert!(!s.has_anomaly());
    }

    #[test]
    fn test_snapshot_encoding_is_compact() {
        let mut s = Snapshot::from_values(&[1023.0, 31.5]);
        s.flag(1);
        let encoded = s.encode().unwrap();
        assert_eq!(
            encoded,
            r#"[{"id":0,"value":1023.0,"anomaly":false},{"id":1,"value":31.5,"anomaly":true}]"#
        );
        assert_eq!(Snapshot::decode(&encoded).unwrap(), s);
    }

    #[test]
    fn test_snapshot_decode_renumbers_by_position() {
        let s = Snapshot::decode(r#"[{"id":9,"value":1},{"id":9,"value":2}]"#).unwrap();
        assert_eq!(s.readings()[0].channel, 0);
        assert_eq!(s.readings()[1].channel, 1);
        assert_eq!(s.value(1), Some(2.0));
    }

    // -----------------------------------------------------------------------
    // Timestamps
    // -----------------------------------------------------------------------

    #[test]
    fn test_decode_timestamp_variants() {
        assert_eq!(decode_timestamp("1700000000"), Some(1_700_000_000));
        assert_eq!(decode_timestamp("1700000000.9"), Some(1_700_000_000));
        assert_eq!(decode_timestamp(" 42 "), Some(42));
        assert_eq!(decode_timestamp("nope"), None);
        assert_eq!(decode_timestamp("NaN"), None);
    }

    #[test]
    fn test_record_age() {
        let r = TimestampedRecord {
            snapshot: Snapshot::from_values(&[0.0]),
            collected_at: 100,
        };
        assert_eq!(r.age(160), 60);
    }

    #[test]
    fn test_profile_empty() {
        assert!(EntityProfile::default().is_empty());
        let p = EntityProfile {
            firstname: Some("Janek".into()),
            ..Default::default()
        };
        assert!(!p.is_empty());
        assert_eq!(serde_json::to_string(&p).unwrap(), r#"{"firstname":"Janek"}"#);
    }
}
