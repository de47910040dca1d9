use crate::{
    error::AppResult,
    types::{Fingerprint, Origin},
};
use serde::{Deserialize, Serialize};
use std::collections::{btree_map::Iter, BTreeMap};

/// Origin to fingerprint mapping, one record per origin.
///
/// Persisted as a flat JSON object: `{ "<origin>": "<fingerprint>", ... }`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct TrustRecordSet {
    records: BTreeMap<Origin, Fingerprint>,
}

impl TrustRecordSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a persisted payload, failing closed to an empty set.
    pub fn deserialize(bytes: &[u8]) -> Self {
        match Self::try_deserialize(bytes) {
            Ok(set) => set,
            Err(e) => {
                debug!("Discarding unreadable trust records: {}", e);
                Self::default()
            }
        }
    }

    pub fn try_deserialize(bytes: &[u8]) -> AppResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn serialize(&self) -> AppResult<Vec<u8>> {
        let mut bytes = serde_json::to_vec_pretty(self)?;
        bytes.push(b'\n');
        Ok(bytes)
    }

    pub fn get(&self, origin: &Origin) -> Option<&Fingerprint> {
        self.records.get(origin)
    }

    /// Inserts or replaces the record for `origin`, returning the replaced fingerprint.
    pub fn set(&mut self, origin: Origin, fingerprint: Fingerprint) -> Option<Fingerprint> {
        self.records.insert(origin, fingerprint)
    }

    pub fn remove(&mut self, origin: &Origin) -> Option<Fingerprint> {
        self.records.remove(origin)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> Iter<'_, Origin, Fingerprint> {
        self.records.iter()
    }
}

impl<'a> IntoIterator for &'a TrustRecordSet {
    type Item = (&'a Origin, &'a Fingerprint);
    type IntoIter = Iter<'a, Origin, Fingerprint>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl FromIterator<(Origin, Fingerprint)> for TrustRecordSet {
    fn from_iter<T: IntoIterator<Item = (Origin, Fingerprint)>>(iter: T) -> Self {
        Self {
            records: iter.into_iter().collect(),
        }
    }
}
