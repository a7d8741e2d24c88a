use std::path::Path;

use log::debug;
use rusqlite::{Connection, OpenFlags, params};

use crate::error::{BgenError, Result};
use crate::reader::BgenReader;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS Variant (
    chromosome TEXT NOT NULL,
    position INT NOT NULL,
    rsid TEXT NOT NULL,
    number_of_alleles INT NOT NULL,
    allele1 TEXT NOT NULL,
    allele2 TEXT NULL,
    file_start_position INT NOT NULL,
    size_in_bytes INT NOT NULL,
    PRIMARY KEY (chromosome, position, rsid, allele1, allele2, file_start_position)
) WITHOUT ROWID";

/// Companion `.bgi` variant index: an SQLite table mapping descriptors to
/// file offsets, as produced by the standard indexing tools.
pub struct Index {
    conn: Connection,
}

impl Index {
    /// Opens an existing index read-only.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path.as_ref(),
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(Index { conn })
    }

    /// Builds an index for `reader`'s file by scanning every descriptor.
    /// The reader's iteration cursor is rewound on both sides of the scan.
    pub fn build(reader: &mut BgenReader, path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path.as_ref())?;
        conn.execute_batch(SCHEMA)?;

        reader.rewind()?;
        let tx = conn.transaction()?;
        {
            let mut insert = tx.prepare(
                "INSERT INTO Variant (chromosome, position, rsid, number_of_alleles, \
                 allele1, allele2, file_start_position, size_in_bytes) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            let mut count = 0u64;
            while let Some(variant) = reader.next() {
                let variant = variant?;
                let allele2 = match variant.alleles.len() {
                    0 | 1 => None,
                    _ => Some(variant.alleles[1..].join(",")),
                };
                insert.execute(params![
                    variant.chrom,
                    variant.pos,
                    variant.rsid,
                    variant.alleles.len() as u32,
                    variant.alleles.first().map(String::as_str).unwrap_or(""),
                    allele2,
                    variant.fileoffset as i64,
                    (variant.next_variant_offset - variant.fileoffset) as i64,
                ])?;
                count += 1;
            }
            debug!("indexed {count} variants into {}", path.as_ref().display());
        }
        tx.commit()?;
        reader.rewind()?;
        Ok(Index { conn })
    }

    /// File offsets of variants on `chrom`, optionally bounded by an
    /// inclusive position range.
    pub fn fetch(&self, chrom: &str, start: Option<u32>, stop: Option<u32>) -> Result<Vec<u64>> {
        let collect = |mut stmt: rusqlite::Statement<'_>,
                           p: &[&dyn rusqlite::ToSql]|
         -> Result<Vec<u64>> {
            let rows = stmt.query_map(p, |row| row.get::<_, i64>(0))?;
            let mut offsets = Vec::new();
            for row in rows {
                offsets.push(row? as u64);
            }
            Ok(offsets)
        };

        match (start, stop) {
            (None, _) => collect(
                self.conn
                    .prepare("SELECT file_start_position FROM Variant WHERE chromosome = ?1")?,
                &[&chrom],
            ),
            (Some(start), None) => collect(
                self.conn.prepare(
                    "SELECT file_start_position FROM Variant \
                     WHERE chromosome = ?1 AND position >= ?2",
                )?,
                &[&chrom, &start],
            ),
            (Some(start), Some(stop)) => collect(
                self.conn.prepare(
                    "SELECT file_start_position FROM Variant \
                     WHERE chromosome = ?1 AND position >= ?2 AND position <= ?3",
                )?,
                &[&chrom, &start, &stop],
            ),
        }
    }

    /// File offset of the one variant with this rsid.
    pub fn offset_by_rsid(&self, rsid: &str) -> Result<u64> {
        self.exactly_one(
            "SELECT file_start_position FROM Variant WHERE rsid = ?1",
            &[&rsid],
            rsid,
        )
    }

    /// File offset of the one variant at this position.
    pub fn offset_by_pos(&self, pos: u32) -> Result<u64> {
        self.exactly_one(
            "SELECT file_start_position FROM Variant WHERE position = ?1",
            &[&pos],
            &format!("position {pos}"),
        )
    }

    /// File offset of the variant at a 0-based ordinal.
    pub fn offset_by_index(&self, n: usize) -> Result<u64> {
        let mut stmt = self
            .conn
            .prepare("SELECT file_start_position FROM Variant LIMIT 1 OFFSET ?1")?;
        let offset = stmt
            .query_row([n as i64], |row| row.get::<_, i64>(0))
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => BgenError::NotFound {
                    query: format!("variant index {n}"),
                },
                other => BgenError::Index(other),
            })?;
        Ok(offset as u64)
    }

    pub fn rsids(&self) -> Result<Vec<String>> {
        self.column_text("SELECT rsid FROM Variant")
    }

    pub fn chroms(&self) -> Result<Vec<String>> {
        self.column_text("SELECT chromosome FROM Variant")
    }

    pub fn positions(&self) -> Result<Vec<u32>> {
        let mut stmt = self.conn.prepare("SELECT position FROM Variant")?;
        let rows = stmt.query_map([], |row| row.get::<_, i64>(0))?;
        let mut positions = Vec::new();
        for row in rows {
            positions.push(row? as u32);
        }
        Ok(positions)
    }

    fn exactly_one(
        &self,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
        query: impl std::fmt::Display,
    ) -> Result<u64> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, |row| row.get::<_, i64>(0))?;
        let mut offsets = Vec::new();
        for row in rows {
            offsets.push(row? as u64);
        }
        match offsets.len() {
            0 => Err(BgenError::NotFound {
                query: query.to_string(),
            }),
            1 => Ok(offsets[0]),
            _ => Err(BgenError::Ambiguous {
                query: query.to_string(),
            }),
        }
    }

    fn column_text(&self, sql: &str) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut values = Vec::new();
        for row in rows {
            values.push(row?);
        }
        Ok(values)
    }
}
