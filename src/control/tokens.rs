//! Named value sets handed to the expected-temperature formula
//!
//! Smoothed readings are grouped by role in ascending sensor id order and
//! named positionally (`inner1`, `inner2`, ...), followed by the role mean
//! (`innerAvg`). The set is rebuilt from scratch every cycle.

use crate::config::Purpose;
use crate::error::{BoilerError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One sensor's smoothed value for the current cycle
#[derive(Debug, Clone, PartialEq)]
pub struct SmoothedReading {
    pub uid: String,
    pub purpose: Purpose,
    pub value: f64,
}

/// Token name to value mapping for one cycle
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenSet(BTreeMap<String, f64>);

impl TokenSet {
    /// Build the token set; every active role needs at least one sensor
    pub fn from_readings(readings: &[SmoothedReading]) -> Result<Self> {
        let mut tokens = BTreeMap::new();

        for purpose in Purpose::ACTIVE {
            let mut group: Vec<&SmoothedReading> =
                readings.iter().filter(|r| r.purpose == purpose).collect();
            if group.is_empty() {
                return Err(BoilerError::EmptyRoleGroup(purpose));
            }
            group.sort_by(|a, b| a.uid.cmp(&b.uid));

            let prefix = purpose.token_prefix();
            for (idx, reading) in group.iter().enumerate() {
                tokens.insert(format!("{prefix}{}", idx + 1), reading.value);
            }

            let mean = group.iter().map(|r| r.value).sum::<f64>() / group.len() as f64;
            tokens.insert(Self::average_name(purpose), mean);
        }

        Ok(Self(tokens))
    }

    /// Token name of a role's aggregate
    pub fn average_name(purpose: Purpose) -> String {
        format!("{}Avg", purpose.token_prefix())
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.get(name).copied()
    }

    /// Aggregate of a role, erroring if the role produced no tokens
    pub fn average(&self, purpose: Purpose) -> Result<f64> {
        self.get(&Self::average_name(purpose))
            .ok_or(BoilerError::EmptyRoleGroup(purpose))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn reading(uid: &str, purpose: Purpose, value: f64) -> SmoothedReading {
        SmoothedReading {
            uid: uid.to_string(),
            purpose,
            value,
        }
    }

    #[test]
    fn test_tokens_are_positional_by_sensor_id() {
        let readings = vec![
            reading("28-c", Purpose::Inner, 22.0),
            reading("28-a", Purpose::Inner, 20.0),
            reading("28-b", Purpose::Outer, -3.0),
            reading("28-d", Purpose::Water, 45.0),
        ];

        let tokens = TokenSet::from_readings(&readings).unwrap();

        assert_eq!(tokens.get("inner1"), Some(20.0));
        assert_eq!(tokens.get("inner2"), Some(22.0));
        assert_eq!(tokens.get("innerAvg"), Some(21.0));
        assert_eq!(tokens.get("outer1"), Some(-3.0));
        assert_eq!(tokens.get("outerAvg"), Some(-3.0));
        assert_eq!(tokens.average(Purpose::Water).unwrap(), 45.0);
        assert_eq!(tokens.len(), 7);
    }

    #[test]
    fn test_empty_role_is_an_error() {
        let readings = vec![
            reading("28-a", Purpose::Inner, 20.0),
            reading("28-d", Purpose::Water, 45.0),
        ];

        match TokenSet::from_readings(&readings) {
            Err(BoilerError::EmptyRoleGroup(purpose)) => assert_eq!(purpose, Purpose::Outer),
            other => panic!("Expected EmptyRoleGroup, got {other:?}"),
        }
    }

    #[test]
    fn test_serializes_as_flat_map() {
        let readings = vec![
            reading("a", Purpose::Inner, 1.0),
            reading("b", Purpose::Outer, 2.0),
            reading("c", Purpose::Water, 3.0),
        ];
        let tokens = TokenSet::from_readings(&readings).unwrap();

        let json = serde_json::to_value(&tokens).unwrap();
        assert_eq!(json["waterAvg"], 3.0);
        assert_eq!(json["inner1"], 1.0);
    }
}
