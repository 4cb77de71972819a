//! Routing entries and the mapping table.
//!
//! A [`RoutingEntry`] wires one signal source to one output topic through a
//! [`PathExpression`].  The [`MappingTable`] holds at most one entry per
//! [`SourceIdentity`]; inserting an entry for an identity that is already
//! present replaces it in place.
//!
//! The table shared between tasks is a [`SharedMappingTable`]: an immutable
//! snapshot behind a pointer swap.  Readers clone the current `Arc` and work
//! on a complete table; the reconciler builds a new table and publishes it
//! with a single [`SharedMappingTable::replace`].

use std::sync::Arc;

use busbridge_types::{MatchRule, RawSignal, SourceIdentity};
use parking_lot::RwLock;

use crate::path::PathExpression;

/// Where a routing entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryOrigin {
    /// Seeded from configuration at startup; never reconciled away.
    Static,
    /// Synthesized by the reconciler for a live entity.
    Discovered,
}

/// Declarative rule mapping one signal source to one output topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingEntry {
    pub source: SourceIdentity,
    /// Output topic on the broker.
    pub topic: String,
    /// Where to find the published value inside the signal body.
    pub path: PathExpression,
    /// Remove `"` characters from the formatted value before publishing.
    pub strip_quotes: bool,
    pub origin: EntryOrigin,
    /// Bus filter registered while this entry is installed.
    pub rule: MatchRule,
}

impl RoutingEntry {
    /// Create a [`EntryOrigin::Static`] entry whose match rule selects every
    /// signal of `source`.
    pub fn new(
        source: SourceIdentity,
        topic: impl Into<String>,
        path: PathExpression,
        strip_quotes: bool,
    ) -> Self {
        let rule = MatchRule::for_source(&source);
        Self {
            source,
            topic: topic.into(),
            path,
            strip_quotes,
            origin: EntryOrigin::Static,
            rule,
        }
    }

    /// Mark the entry as synthesized by discovery (builder-style).
    pub fn discovered(mut self) -> Self {
        self.origin = EntryOrigin::Discovered;
        self
    }

    /// Narrow the match rule to one signal name (builder-style).
    pub fn with_member(mut self, member: impl Into<String>) -> Self {
        self.rule = self.rule.with_member(member);
        self
    }
}

/// Ordered collection of routing entries, unique per source identity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MappingTable {
    entries: Vec<RoutingEntry>,
}

impl MappingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `entry`, replacing (at the same position) any entry with the
    /// same source identity.  Returns the replaced entry.
    pub fn insert(&mut self, entry: RoutingEntry) -> Option<RoutingEntry> {
        match self.entries.iter_mut().find(|e| e.source == entry.source) {
            Some(slot) => Some(std::mem::replace(slot, entry)),
            None => {
                self.entries.push(entry);
                None
            }
        }
    }

    /// Remove the entry for `source`.
    pub fn remove(&mut self, source: &SourceIdentity) -> Option<RoutingEntry> {
        let idx = self.entries.iter().position(|e| &e.source == source)?;
        Some(self.entries.remove(idx))
    }

    pub fn get(&self, source: &SourceIdentity) -> Option<&RoutingEntry> {
        self.entries.iter().find(|e| &e.source == source)
    }

    /// First entry, in insertion order, whose source matches `signal`'s path,
    /// interface and (when the entry names one) sender.
    ///
    /// `None` means "no route"; it is not an error.
    pub fn find_for(&self, signal: &RawSignal) -> Option<&RoutingEntry> {
        self.entries.iter().find(|e| e.source.matches(signal))
    }

    pub fn entries(&self) -> &[RoutingEntry] {
        &self.entries
    }

    /// Entries synthesized by discovery, in table order.
    pub fn discovered(&self) -> impl Iterator<Item = &RoutingEntry> {
        self.entries
            .iter()
            .filter(|e| e.origin == EntryOrigin::Discovered)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<RoutingEntry> for MappingTable {
    fn from_iter<I: IntoIterator<Item = RoutingEntry>>(iter: I) -> Self {
        let mut table = MappingTable::new();
        for entry in iter {
            table.insert(entry);
        }
        table
    }
}

/// The mapping table shared by every bridge task.
///
/// The lock only guards the pointer: [`snapshot`](Self::snapshot) holds it for
/// one `Arc` clone and [`replace`](Self::replace) for one store, so a reader
/// never sees a half-built table and never stalls the writer.
#[derive(Debug, Default)]
pub struct SharedMappingTable {
    current: RwLock<Arc<MappingTable>>,
}

impl SharedMappingTable {
    pub fn new(table: MappingTable) -> Self {
        Self {
            current: RwLock::new(Arc::new(table)),
        }
    }

    /// The table as of now.
    pub fn snapshot(&self) -> Arc<MappingTable> {
        self.current.read().clone()
    }

    /// Publish `table` as the new current table and return the previous one.
    pub fn replace(&self, table: MappingTable) -> Arc<MappingTable> {
        std::mem::replace(&mut *self.current.write(), Arc::new(table))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PATH: &str = "/org/mpris/MediaPlayer2";
    const IFACE: &str = "org.freedesktop.DBus.Properties";

    fn source(sender: Option<&str>) -> SourceIdentity {
        SourceIdentity::new(sender.map(str::to_string), PATH, IFACE)
    }

    fn entry(sender: Option<&str>, topic: &str) -> RoutingEntry {
        RoutingEntry::new(
            source(sender),
            topic,
            PathExpression::parse("[1].['PlaybackStatus']").expect("valid path"),
            true,
        )
    }

    fn signal(sender: &str) -> RawSignal {
        RawSignal::new(sender, PATH, IFACE, "PropertiesChanged", vec![])
    }

    #[test]
    fn insert_replaces_same_identity_in_place() {
        let mut table = MappingTable::new();
        table.insert(entry(Some("a"), "first"));
        table.insert(entry(Some("b"), "other"));
        let replaced = table.insert(entry(Some("a"), "second"));

        assert_eq!(replaced.map(|e| e.topic), Some("first".to_string()));
        assert_eq!(table.len(), 2);
        assert_eq!(table.entries()[0].topic, "second");
    }

    #[test]
    fn find_for_prefers_first_inserted_match() {
        let table: MappingTable = [entry(None, "wildcard"), entry(Some("a"), "specific")]
            .into_iter()
            .collect();
        assert_eq!(
            table.find_for(&signal("a")).map(|e| e.topic.as_str()),
            Some("wildcard")
        );
    }

    #[test]
    fn find_for_respects_sender() {
        let table: MappingTable = [entry(Some("a"), "a-topic")].into_iter().collect();
        assert!(table.find_for(&signal("a")).is_some());
        assert!(table.find_for(&signal("b")).is_none());
    }

    #[test]
    fn find_for_miss_on_other_path() {
        let table: MappingTable = [entry(None, "t")].into_iter().collect();
        let mut s = signal("a");
        s.path = "/org/other".to_string();
        assert!(table.find_for(&s).is_none());
    }

    #[test]
    fn remove_by_identity() {
        let mut table: MappingTable = [entry(Some("a"), "t"), entry(Some("b"), "t")]
            .into_iter()
            .collect();
        assert!(table.remove(&source(Some("a"))).is_some());
        assert!(table.remove(&source(Some("a"))).is_none());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn discovered_filters_by_origin() {
        let table: MappingTable = [entry(None, "static"), entry(Some("a"), "d").discovered()]
            .into_iter()
            .collect();
        let discovered: Vec<&str> = table.discovered().map(|e| e.topic.as_str()).collect();
        assert_eq!(discovered, vec!["d"]);
    }

    #[test]
    fn entry_rule_follows_source_and_member() {
        let e = entry(Some("a"), "t").with_member("PropertiesChanged");
        assert_eq!(e.rule.sender.as_deref(), Some("a"));
        assert_eq!(e.rule.member.as_deref(), Some("PropertiesChanged"));
    }

    #[test]
    fn snapshot_survives_replace() {
        let shared = SharedMappingTable::new([entry(Some("a"), "old")].into_iter().collect());
        let before = shared.snapshot();

        let previous = shared.replace([entry(Some("b"), "new")].into_iter().collect());

        assert_eq!(before.entries()[0].topic, "old");
        assert!(Arc::ptr_eq(&before, &previous));
        assert_eq!(shared.snapshot().entries()[0].topic, "new");
    }
}
