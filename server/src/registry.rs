//! Client registry and session bookkeeping for the relay server
//!
//! This module owns the authoritative in-memory mapping from connection id
//! to player metadata, including:
//! - Placeholder record creation on connect and removal on disconnect
//! - Display name registration with uniqueness validation
//! - Colour assignment drawn without replacement from a fixed palette
//! - Cursor accumulation, screen-size recording and the ready list
//!
//! Nothing here is persisted; the registry is rebuilt from scratch on every
//! process restart and cleared wholesale by a reset message.

use log::info;
use rand::seq::SliceRandom;
use shared::{CursorDelta, CursorPosition, RosterEntry, ScreenSize, PALETTE};
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;

/// Stable identifier assigned at accept time and never reused while the
/// process lives. Replaces positional indices so a disconnect can never
/// race with a slot being reassigned.
pub type ConnectionId = u64;

/// Why a name registration was rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("display name must not be empty")]
    EmptyName,
    #[error("display name is already taken")]
    DuplicateName,
    #[error("connection is not known to the registry")]
    UnknownConnection,
}

/// Per-connection metadata, created as an anonymous placeholder on connect
/// and populated when the name registration arrives.
#[derive(Debug, Clone)]
pub struct ClientRecord {
    pub id: ConnectionId,
    pub name: Option<String>,
    pub colour: Option<String>,
    pub screen: Option<ScreenSize>,
    pub cursor: Option<CursorPosition>,
}

impl ClientRecord {
    pub fn new(id: ConnectionId) -> Self {
        Self {
            id,
            name: None,
            colour: None,
            screen: None,
            cursor: None,
        }
    }

    /// Name shown in roster broadcasts before registration completes.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("anonymous")
    }

    pub fn is_registered(&self) -> bool {
        self.name.is_some()
    }
}

/// Authoritative session state for all connected players
///
/// The registry keeps records keyed by connection id in accept order, the
/// set of ready player names, and the remaining colour palette. It has no
/// knowledge of the transport; the relay mirrors every record insertion and
/// removal with the matching outbound-sender bookkeeping.
pub struct ClientRegistry {
    records: BTreeMap<ConnectionId, ClientRecord>,
    ready: HashSet<String>,
    palette: Vec<String>,
}

impl ClientRegistry {
    /// Creates an empty registry with a freshly shuffled colour palette.
    pub fn new() -> Self {
        Self {
            records: BTreeMap::new(),
            ready: HashSet::new(),
            palette: shuffled_palette(),
        }
    }

    /// Creates a placeholder record for a newly accepted connection.
    pub fn add(&mut self, id: ConnectionId) {
        info!("Connection {} accepted", id);
        self.records.insert(id, ClientRecord::new(id));
    }

    /// Registers a display name for a connection.
    ///
    /// On success the record receives the next colour from the remaining
    /// palette and the result carries the assigned colour plus the lead
    /// flag. The lead flag marks the earliest still-connected client and is
    /// informational only.
    pub fn register(
        &mut self,
        id: ConnectionId,
        name: &str,
    ) -> Result<(String, bool), RegistrationError> {
        if name.is_empty() {
            return Err(RegistrationError::EmptyName);
        }
        if self
            .records
            .values()
            .any(|r| r.name.as_deref() == Some(name))
        {
            return Err(RegistrationError::DuplicateName);
        }

        let lead = self.records.keys().next() == Some(&id);
        let record = self
            .records
            .get_mut(&id)
            .ok_or(RegistrationError::UnknownConnection)?;

        if self.palette.is_empty() {
            // Palette exhausted: recycle a fresh shuffle rather than refuse.
            self.palette = shuffled_palette();
        }
        let colour = self.palette.pop().expect("palette refilled above");

        record.name = Some(name.to_string());
        record.colour = Some(colour.clone());
        info!("Connection {} registered as {:?} ({})", id, name, colour);

        Ok((colour, lead))
    }

    /// Stores the screen size parsed out of a fingerprint payload.
    pub fn record_fingerprint(&mut self, id: ConnectionId, screen: ScreenSize) -> bool {
        match self.records.get_mut(&id) {
            Some(record) => {
                record.screen = Some(screen);
                true
            }
            None => false,
        }
    }

    /// Folds a relative cursor delta into the connection's absolute position.
    ///
    /// The first delta establishes the position from the origin. Returns the
    /// updated absolute position, or None for connections that never
    /// registered a name.
    pub fn accumulate_cursor(
        &mut self,
        id: ConnectionId,
        delta: CursorDelta,
    ) -> Option<CursorPosition> {
        let record = self.records.get_mut(&id).filter(|r| r.is_registered())?;
        let mut position = record.cursor.unwrap_or_default();
        position.x += delta.dx;
        position.y += delta.dy;
        record.cursor = Some(position);
        Some(position)
    }

    /// Adds a name to the ready list. Returns true only when the name was
    /// not already present, so repeated ready signals stay idempotent.
    pub fn mark_ready(&mut self, name: &str) -> bool {
        self.ready.insert(name.to_string())
    }

    pub fn ready_count(&self) -> usize {
        self.ready.len()
    }

    /// Display name of a connection, if it has registered one.
    pub fn name_of(&self, id: ConnectionId) -> Option<&str> {
        self.records.get(&id).and_then(|r| r.name.as_deref())
    }

    /// Removes the record for a closed connection. Returns false if the id
    /// was already gone, which happens after a server reset.
    pub fn remove(&mut self, id: ConnectionId) -> bool {
        match self.records.remove(&id) {
            Some(record) => {
                info!("Connection {} ({}) removed", id, record.display_name());
                true
            }
            None => false,
        }
    }

    /// Clears every record and the ready list, and restores the full
    /// palette in a new shuffle. Equivalent to a process restart.
    pub fn reset(&mut self) {
        info!("Registry reset; {} records dropped", self.records.len());
        self.records.clear();
        self.ready.clear();
        self.palette = shuffled_palette();
    }

    /// Snapshot of all records in connection order for broadcasting.
    pub fn roster(&self) -> Vec<RosterEntry> {
        self.records
            .values()
            .map(|record| RosterEntry {
                name: record.display_name().to_string(),
                colour: record.colour.clone(),
                cursor: record.cursor,
                screen: record.screen,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Colours not yet handed out, used by tests to verify exhaustion.
    #[cfg(test)]
    pub fn remaining_colours(&self) -> &[String] {
        &self.palette
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn shuffled_palette() -> Vec<String> {
    let mut palette: Vec<String> = PALETTE.iter().map(|c| c.to_string()).collect();
    palette.shuffle(&mut rand::thread_rng());
    palette
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_record_starts_anonymous() {
        let record = ClientRecord::new(7);
        assert_eq!(record.id, 7);
        assert_eq!(record.display_name(), "anonymous");
        assert!(!record.is_registered());
        assert!(record.colour.is_none());
        assert!(record.cursor.is_none());
        assert!(record.screen.is_none());
    }

    #[test]
    fn test_register_assigns_colour_and_lead() {
        let mut registry = ClientRegistry::new();
        registry.add(1);
        registry.add(2);

        let (colour, lead) = registry.register(1, "ada").unwrap();
        assert!(PALETTE.contains(&colour.as_str()));
        assert!(lead);

        let (_, lead) = registry.register(2, "grace").unwrap();
        assert!(!lead);
    }

    #[test]
    fn test_lead_follows_earliest_live_connection() {
        let mut registry = ClientRegistry::new();
        registry.add(1);
        registry.add(2);
        registry.remove(1);

        let (_, lead) = registry.register(2, "ada").unwrap();
        assert!(lead);
    }

    #[test]
    fn test_empty_name_rejected() {
        let mut registry = ClientRegistry::new();
        registry.add(1);
        assert_eq!(
            registry.register(1, ""),
            Err(RegistrationError::EmptyName)
        );
        assert!(!registry.records[&1].is_registered());
    }

    #[test]
    fn test_duplicate_name_rejected_first_keeps_colour() {
        let mut registry = ClientRegistry::new();
        registry.add(1);
        registry.add(2);

        let (colour, _) = registry.register(1, "ada").unwrap();
        assert_eq!(
            registry.register(2, "ada"),
            Err(RegistrationError::DuplicateName)
        );
        assert_eq!(registry.records[&1].colour.as_deref(), Some(colour.as_str()));
        assert!(registry.records[&2].colour.is_none());
    }

    #[test]
    fn test_unknown_connection_rejected() {
        let mut registry = ClientRegistry::new();
        assert_eq!(
            registry.register(99, "ada"),
            Err(RegistrationError::UnknownConnection)
        );
    }

    #[test]
    fn test_name_reusable_after_disconnect() {
        let mut registry = ClientRegistry::new();
        registry.add(1);
        registry.register(1, "ada").unwrap();
        registry.remove(1);

        registry.add(2);
        assert!(registry.register(2, "ada").is_ok());
    }

    #[test]
    fn test_palette_exhaustion_yields_distinct_colours() {
        let mut registry = ClientRegistry::new();
        let mut seen = HashSet::new();

        for i in 0..PALETTE.len() as ConnectionId {
            registry.add(i);
            let (colour, _) = registry.register(i, &format!("player-{}", i)).unwrap();
            assert!(seen.insert(colour), "colour handed out twice");
        }

        assert!(registry.remaining_colours().is_empty());
        assert_eq!(seen.len(), PALETTE.len());
    }

    #[test]
    fn test_palette_recycles_past_exhaustion() {
        let mut registry = ClientRegistry::new();
        for i in 0..PALETTE.len() as ConnectionId + 1 {
            registry.add(i);
            assert!(registry.register(i, &format!("player-{}", i)).is_ok());
        }
    }

    #[test]
    fn test_reset_restores_full_palette() {
        let mut registry = ClientRegistry::new();
        registry.add(1);
        registry.register(1, "ada").unwrap();
        registry.mark_ready("ada");

        registry.reset();

        assert!(registry.is_empty());
        assert_eq!(registry.ready_count(), 0);

        // Set equality with the canonical palette; order is shuffled.
        let remaining: HashSet<&str> = registry
            .remaining_colours()
            .iter()
            .map(|c| c.as_str())
            .collect();
        let full: HashSet<&str> = PALETTE.iter().copied().collect();
        assert_eq!(remaining, full);
    }

    #[test]
    fn test_cursor_accumulation() {
        let mut registry = ClientRegistry::new();
        registry.add(1);
        registry.register(1, "ada").unwrap();

        let pos = registry
            .accumulate_cursor(1, CursorDelta { dx: 3.0, dy: 4.0 })
            .unwrap();
        assert_eq!(pos, CursorPosition { x: 3.0, y: 4.0 });

        let pos = registry
            .accumulate_cursor(1, CursorDelta { dx: -1.0, dy: 2.0 })
            .unwrap();
        assert_eq!(pos, CursorPosition { x: 2.0, y: 6.0 });
    }

    #[test]
    fn test_cursor_requires_registration() {
        let mut registry = ClientRegistry::new();
        registry.add(1);
        assert!(registry
            .accumulate_cursor(1, CursorDelta { dx: 1.0, dy: 1.0 })
            .is_none());
        assert!(registry
            .accumulate_cursor(99, CursorDelta { dx: 1.0, dy: 1.0 })
            .is_none());
    }

    #[test]
    fn test_fingerprint_recording() {
        let mut registry = ClientRegistry::new();
        registry.add(1);

        let screen = ScreenSize {
            width: 1920,
            height: 1080,
        };
        assert!(registry.record_fingerprint(1, screen));
        assert_eq!(registry.records[&1].screen, Some(screen));
        assert!(!registry.record_fingerprint(99, screen));
    }

    #[test]
    fn test_ready_list_idempotence() {
        let mut registry = ClientRegistry::new();
        assert!(registry.mark_ready("ada"));
        assert!(!registry.mark_ready("ada"));
        assert_eq!(registry.ready_count(), 1);
    }

    #[test]
    fn test_remove_registered_and_anonymous() {
        let mut registry = ClientRegistry::new();
        registry.add(1);
        registry.add(2);
        registry.register(1, "ada").unwrap();

        assert!(registry.remove(1));
        assert_eq!(registry.len(), 1);

        assert!(registry.remove(2));
        assert!(registry.is_empty());

        assert!(!registry.remove(1));
    }

    #[test]
    fn test_roster_order_and_placeholders() {
        let mut registry = ClientRegistry::new();
        registry.add(10);
        registry.add(11);
        registry.add(12);
        registry.register(11, "grace").unwrap();

        let roster = registry.roster();
        assert_eq!(roster.len(), 3);
        assert_eq!(roster[0].name, "anonymous");
        assert_eq!(roster[1].name, "grace");
        assert!(roster[1].colour.is_some());
        assert_eq!(roster[2].name, "anonymous");
    }
}
