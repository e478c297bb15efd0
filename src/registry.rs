//! In-memory bookkeeping of everything needed to undo a punishment.

use log::debug;
use std::collections::HashMap;

use crate::error::RegistryError;
use crate::platform::{MemberId, RoleId, SessionKey, VoiceChannelId};

/// Identifies one punishment. Timers carry it so they can tell whether the
/// record they were scheduled for still exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PunishmentToken(u64);

/// Backups taken when a member is imprisoned. The platform holds the live values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrisonerRecord {
    pub token: PunishmentToken,
    pub session: SessionKey,
    pub saved_roles: Vec<RoleId>,
    pub saved_voice: Option<VoiceChannelId>,
    pub saved_nickname: Option<String>,
    pub escape_phrase: Option<String>,
}

#[derive(Debug, Default)]
pub struct PrisonerRegistry {
    records: HashMap<MemberId, PrisonerRecord>,
    next_token: u64,
}

impl PrisonerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_token(&mut self) -> PunishmentToken {
        self.next_token += 1;
        PunishmentToken(self.next_token)
    }

    /// Insert a record. An existing record is never overwritten: that would lose
    /// the original backup.
    pub fn put(&mut self, member: MemberId, record: PrisonerRecord) -> Result<(), RegistryError> {
        if self.records.contains_key(&member) {
            return Err(RegistryError::AlreadyImprisoned(member));
        }
        debug!("Registering prisoner {} ({:?})", member, record.token);
        self.records.insert(member, record);
        Ok(())
    }

    pub fn get(&self, member: MemberId) -> Option<&PrisonerRecord> {
        self.records.get(&member)
    }

    pub fn contains(&self, member: MemberId) -> bool {
        self.records.contains_key(&member)
    }

    pub fn remove(&mut self, member: MemberId) -> Option<PrisonerRecord> {
        self.records.remove(&member)
    }

    pub fn has_escape_phrase(&self, member: MemberId) -> bool {
        self.escape_phrase(member).is_some()
    }

    pub fn escape_phrase(&self, member: MemberId) -> Option<&str> {
        self.records
            .get(&member)
            .and_then(|r| r.escape_phrase.as_deref())
    }

    pub fn clear_escape_phrase(&mut self, member: MemberId) -> Option<String> {
        self.records
            .get_mut(&member)
            .and_then(|r| r.escape_phrase.take())
    }

    /// Prisoners punished in `session`, in id order.
    pub fn members_in(&self, session: SessionKey) -> Vec<MemberId> {
        let mut members: Vec<MemberId> = self
            .records
            .iter()
            .filter(|(_, r)| r.session == session)
            .map(|(id, _)| *id)
            .collect();
        members.sort();
        members
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
