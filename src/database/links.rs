//! Primitive access to the link (join) tables.
//!
//! Every link table has the same shape: `id`, an owner column and a member
//! column. [`LinkTable`] names those three things so one set of queries can
//! serve all seven relations.

use anyhow::Result;
use rusqlite::params;

use super::Database;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkTable {
    pub table: &'static str,
    pub owner: &'static str,
    pub member: &'static str,
}

/// Base link: species identified in a segment.
pub const BAT_SEGMENT: LinkTable = LinkTable {
    table: "bat_segment_links",
    owner: "segment_id",
    member: "bat_id",
};

/// Derived from [`BAT_SEGMENT`].
pub const BAT_RECORDING: LinkTable = LinkTable {
    table: "bat_recording_links",
    owner: "recording_id",
    member: "bat_id",
};

/// Derived from [`BAT_RECORDING`].
pub const BAT_SESSION: LinkTable = LinkTable {
    table: "bat_session_links",
    owner: "session_id",
    member: "bat_id",
};

pub const SEGMENT_CALL: LinkTable = LinkTable {
    table: "segment_calls",
    owner: "segment_id",
    member: "call_id",
};

pub const SEGMENT_IMAGE: LinkTable = LinkTable {
    table: "segment_images",
    owner: "segment_id",
    member: "image_id",
};

pub const BAT_IMAGE: LinkTable = LinkTable {
    table: "bat_images",
    owner: "bat_id",
    member: "image_id",
};

pub const CALL_IMAGE: LinkTable = LinkTable {
    table: "call_images",
    owner: "call_id",
    member: "image_id",
};

/// Every relation that can own an image.
pub const IMAGE_OWNERS: [LinkTable; 3] = [SEGMENT_IMAGE, BAT_IMAGE, CALL_IMAGE];

impl Database {
    /// Members linked to `owner`, in link insertion order, without duplicates.
    pub fn linked_members(&self, link: LinkTable, owner: i64) -> Result<Vec<i64>> {
        let sql = format!(
            "SELECT {m} FROM {t} WHERE {o} = ?1 GROUP BY {m} ORDER BY MIN(id)",
            t = link.table,
            o = link.owner,
            m = link.member
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let ids = stmt
            .query_map([owner], |row| row.get(0))?
            .collect::<Result<Vec<i64>, _>>()?;
        Ok(ids)
    }

    /// Owners that link to `member`, without duplicates.
    pub fn link_owners(&self, link: LinkTable, member: i64) -> Result<Vec<i64>> {
        let sql = format!(
            "SELECT DISTINCT {o} FROM {t} WHERE {m} = ?1 ORDER BY {o}",
            t = link.table,
            o = link.owner,
            m = link.member
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let ids = stmt
            .query_map([member], |row| row.get(0))?
            .collect::<Result<Vec<i64>, _>>()?;
        Ok(ids)
    }

    pub fn link_exists(&self, link: LinkTable, owner: i64, member: i64) -> Result<bool> {
        let sql = format!(
            "SELECT COUNT(*) FROM {t} WHERE {o} = ?1 AND {m} = ?2",
            t = link.table,
            o = link.owner,
            m = link.member
        );
        let count: i64 = self
            .conn
            .query_row(&sql, params![owner, member], |row| row.get(0))?;
        Ok(count > 0)
    }

    pub fn insert_link(&self, link: LinkTable, owner: i64, member: i64) -> Result<()> {
        let sql = format!(
            "INSERT INTO {t} ({o}, {m}) VALUES (?1, ?2)",
            t = link.table,
            o = link.owner,
            m = link.member
        );
        self.conn.execute(&sql, params![owner, member])?;
        Ok(())
    }

    /// Returns true when a link was added.
    pub fn insert_link_if_absent(&self, link: LinkTable, owner: i64, member: i64) -> Result<bool> {
        if self.link_exists(link, owner, member)? {
            return Ok(false);
        }
        self.insert_link(link, owner, member)?;
        Ok(true)
    }

    /// Removes every row linking `owner` to `member`; returns how many went.
    pub fn remove_link(&self, link: LinkTable, owner: i64, member: i64) -> Result<usize> {
        let sql = format!(
            "DELETE FROM {t} WHERE {o} = ?1 AND {m} = ?2",
            t = link.table,
            o = link.owner,
            m = link.member
        );
        Ok(self.conn.execute(&sql, params![owner, member])?)
    }

    pub fn remove_links_for_owner(&self, link: LinkTable, owner: i64) -> Result<usize> {
        let sql = format!("DELETE FROM {} WHERE {} = ?1", link.table, link.owner);
        Ok(self.conn.execute(&sql, [owner])?)
    }

    pub fn remove_links_for_member(&self, link: LinkTable, member: i64) -> Result<usize> {
        let sql = format!("DELETE FROM {} WHERE {} = ?1", link.table, link.member);
        Ok(self.conn.execute(&sql, [member])?)
    }

    /// Every row of a link table as `(row id, owner, member)`, ordered by row id.
    pub fn link_rows(&self, link: LinkTable) -> Result<Vec<(i64, i64, i64)>> {
        let sql = format!(
            "SELECT id, {o}, {m} FROM {t} ORDER BY id",
            t = link.table,
            o = link.owner,
            m = link.member
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn remove_link_row(&self, link: LinkTable, row_id: i64) -> Result<()> {
        let sql = format!("DELETE FROM {} WHERE id = ?1", link.table);
        self.conn.execute(&sql, [row_id])?;
        Ok(())
    }

    /// Number of links, across all owner relations, that keep an image alive.
    pub fn image_owner_count(&self, image_id: i64) -> Result<i64> {
        let mut total = 0;
        for link in IMAGE_OWNERS {
            let sql = format!("SELECT COUNT(*) FROM {} WHERE {} = ?1", link.table, link.member);
            let count: i64 = self.conn.query_row(&sql, [image_id], |row| row.get(0))?;
            total += count;
        }
        Ok(total)
    }
}
