//! Write Sessions
//!
//! A session is one SQLite transaction over the shared connection. Saving an
//! anchor that was never persisted first saves the edges it participates in
//! (and an edge saves both endpoints), so a saved component is always
//! self-consistent. Persisted anchors are only rewritten when mutated.
//!
//! A removed edge is deleted only in a session that also leaves both of its
//! endpoints settled (written here, or clean in the graph). Saving a node that
//! lost an edge therefore saves the node on the other side too.
//!
//! The graph learns about a write only after `COMMIT` succeeds; dropping an
//! unfinished session rolls everything back.

use super::record::AnchorRecord;
use super::{AnchorStore, StoreError};
use crate::anchor::{Anchor, AnchorId, AnchorKind, Links};
use crate::graph::ObjectGraph;
use parking_lot::MutexGuard;
use rusqlite::{params, Connection};
use std::collections::HashSet;
use tracing::{error, trace};

/// An open write transaction.
pub struct StoreSession<'s> {
    store: &'s AnchorStore,
    conn: MutexGuard<'s, Connection>,
    visited: HashSet<AnchorId>,
    written: Vec<AnchorId>,
    inserts: u64,
    updates: u64,
    finished: bool,
}

impl<'s> StoreSession<'s> {
    pub(super) fn begin(store: &'s AnchorStore) -> Result<Self, StoreError> {
        let conn = store.connection()?;
        conn.execute_batch("BEGIN IMMEDIATE")?;
        trace!("Store session started");
        Ok(Self {
            store,
            conn,
            visited: HashSet::new(),
            written: Vec::new(),
            inserts: 0,
            updates: 0,
            finished: false,
        })
    }

    /// Write `id` (and what it requires) into this transaction.
    ///
    /// Anchors not loaded in `graph` are left alone. Saving the same anchor
    /// twice in one session is a no-op.
    pub fn save(&mut self, graph: &ObjectGraph, id: AnchorId) -> Result<(), StoreError> {
        if !self.visited.insert(id) {
            return Ok(());
        }
        let Some(anchor) = graph.get(id) else {
            return Ok(());
        };
        if anchor.kind() == AnchorKind::Walker {
            return Ok(());
        }

        let fresh = !anchor.is_persisted();
        if !fresh && !anchor.is_dirty() {
            return Ok(());
        }

        for linked in linked_ids(anchor) {
            self.save(graph, linked)?;
        }
        if anchor.is_node() {
            for partner in graph.removed_partners(id) {
                self.save(graph, partner)?;
            }
        }
        self.write(anchor, fresh)
    }

    /// Anchors written so far in this session
    pub fn written(&self) -> &[AnchorId] {
        &self.written
    }

    fn write(&mut self, anchor: &Anchor, fresh: bool) -> Result<(), StoreError> {
        let record = AnchorRecord::from_anchor(anchor);
        let document = serde_json::to_string(&record)?;
        self.conn.execute(
            "INSERT OR REPLACE INTO anchors (id, kind, name, access, document)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.id.to_string(),
                record.kind.as_str(),
                record.name,
                record.access.as_str(),
                document,
            ],
        )?;
        self.store.cache().invalidate(&record.id);

        if fresh {
            self.inserts += 1;
        } else {
            self.updates += 1;
        }
        self.written.push(record.id);
        trace!(
            "{} {} {}",
            if fresh { "Inserted" } else { "Updated" },
            record.kind.as_str(),
            record.id
        );
        Ok(())
    }

    /// Apply settled edge deletions, commit, then mark the graph saved.
    ///
    /// Deletions whose endpoints still wait for a write stay queued.
    /// Returns the number of rows written or deleted.
    pub fn commit(mut self, graph: &mut ObjectGraph) -> Result<usize, StoreError> {
        let mut deleted = Vec::new();
        for edge in graph.removed_edges() {
            if !(self.is_settled(graph, edge.source) && self.is_settled(graph, edge.target)) {
                trace!("Deferring deletion of edge {}", edge.id);
                continue;
            }
            self.conn
                .execute("DELETE FROM anchors WHERE id = ?1", [edge.id.to_string()])?;
            self.store.cache().invalidate(&edge.id);
            deleted.push(edge.id);
        }

        self.conn.execute_batch("COMMIT")?;
        self.finished = true;

        graph.mark_saved(&self.written, &deleted);
        self.store
            .record_commit(self.inserts, self.updates, deleted.len() as u64);
        trace!(
            "Store session committed: {} written, {} deleted",
            self.written.len(),
            deleted.len()
        );
        Ok(self.written.len() + deleted.len())
    }

    /// Written in this session, or loaded with nothing left to write.
    fn is_settled(&self, graph: &ObjectGraph, id: AnchorId) -> bool {
        self.written.contains(&id)
            || graph
                .get(id)
                .map_or(true, |anchor| anchor.is_persisted() && !anchor.is_dirty())
    }

    /// Abandon the transaction explicitly.
    pub fn rollback(mut self) -> Result<(), StoreError> {
        self.finished = true;
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }
}

impl Drop for StoreSession<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(err) = self.conn.execute_batch("ROLLBACK") {
            error!("Rollback failed: {}", err);
        }
    }
}

/// Anchors that must be saved before `anchor` itself.
fn linked_ids(anchor: &Anchor) -> Vec<AnchorId> {
    match &anchor.links {
        Links::Node(links) => links
            .incoming
            .iter()
            .chain(links.outgoing.iter())
            .map(|r| r.id)
            .collect(),
        Links::Edge(links) => vec![links.source.id, links.target.id],
    }
}
