use dashmap::DashMap;

use super::types::{MissionPhase, MissionRecord};
use crate::error::{Result, SquadronError};

/// Process-wide mission records, independent of team state so post-mortems
/// survive team dissolution.
#[derive(Default)]
pub struct MissionRegistry {
    records: DashMap<String, MissionRecord>,
}

impl MissionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: MissionRecord) {
        self.records.insert(record.id.clone(), record);
    }

    pub fn get(&self, mission_id: &str) -> Result<MissionRecord> {
        self.records
            .get(mission_id)
            .map(|r| r.value().clone())
            .ok_or_else(|| SquadronError::NotFound(format!("mission '{}'", mission_id)))
    }

    pub fn remove(&self, mission_id: &str) -> Option<MissionRecord> {
        self.records.remove(mission_id).map(|(_, r)| r)
    }

    /// Applies a mutation to the record, if it still exists.
    pub fn update<F>(&self, mission_id: &str, mutate: F)
    where
        F: FnOnce(&mut MissionRecord),
    {
        if let Some(mut record) = self.records.get_mut(mission_id) {
            mutate(&mut record);
        }
    }

    pub fn set_phase(&self, mission_id: &str, phase: MissionPhase) {
        self.update(mission_id, |r| r.phase = phase);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
