//!
//! src/sink.rs  Andrew Belles  Oct 2025
//!
//! File-backed cache tables: one zstd-compressed json snapshot per table,
//! always read and written whole. Writes go through a temp file and a
//! rename so a crash never leaves a half-written table behind
//!

use std::{fs, path::{Path, PathBuf}};

use async_trait::async_trait;

use crate::errors::SorterError;
use crate::persistent::{fill_columns, KeyedStore, Row, TableId, TableLocks};

pub struct SnapshotStore {
    root: PathBuf,
    level: i32,
    locks: TableLocks
}

impl SnapshotStore {
    pub fn new(root: impl AsRef<Path>, level: i32) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            level: level.clamp(0, 21),
            locks: TableLocks::default()
        }
    }

    pub fn path_for(&self, table: &TableId) -> PathBuf {
        self.root.join(format!("{}.json.zst", Self::sanitize_key(&table.name())))
    }

    fn sanitize_key(key: &str) -> String {
        key.chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }

    async fn read(&self, table: &TableId) -> Result<Vec<Row>, SorterError> {
        let path = self.path_for(table);
        tokio::task::spawn_blocking(move || read_snapshot(&path))
            .await
            .map_err(|e| SorterError::Io(std::io::Error::other(e)))?
    }

    async fn write(&self, table: &TableId, rows: Vec<Row>) -> Result<(), SorterError> {
        let path = self.path_for(table);
        let level = self.level;
        tokio::task::spawn_blocking(move || write_snapshot(&path, &rows, level))
            .await
            .map_err(|e| SorterError::Io(std::io::Error::other(e)))?
    }
}

fn read_snapshot(path: &Path) -> Result<Vec<Row>, SorterError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = fs::File::open(path).map_err(|e|
        SorterError::Db(format!("open {}: {e}", path.display())))?;
    let dec = zstd::stream::read::Decoder::new(file).map_err(|e|
        SorterError::Db(format!("zstd decoder: {e}")))?;
    serde_json::from_reader(dec).map_err(|e|
        SorterError::Db(format!("decode {}: {e}", path.display())))
}

fn write_snapshot(path: &Path, rows: &[Row], level: i32) -> Result<(), SorterError> {
    let parent = path.parent()
        .ok_or_else(|| SorterError::Db(format!("no parent dir for {}", path.display())))?;

    fs::create_dir_all(parent).map_err(|e|
        SorterError::Db(format!("create dir {}: {e}", parent.display())))?;

    let temp = tempfile::NamedTempFile::new_in(parent).map_err(|e|
        SorterError::Db(format!("tempfile in {}: {e}", parent.display())))?;

    {
        let mut enc = zstd::stream::write::Encoder::new(temp.as_file(), level)
            .map_err(|e| SorterError::Db(format!("zstd encoder: {e}")))?;

        serde_json::to_writer(&mut enc, rows)
            .map_err(|e| SorterError::Db(format!("serialize json: {e}")))?;
        enc.finish().map_err(|e| SorterError::Db(format!("zstd finish: {e}")))?;
    }

    temp.persist(path).map_err(|e|
        SorterError::Db(format!("persist {}: {e}", path.display())))?;

    Ok(())
}

#[async_trait]
impl KeyedStore for SnapshotStore {
    async fn load(&self, table: &TableId) -> Result<Vec<Row>, SorterError> {
        self.read(table).await
    }

    async fn get(&self, table: &TableId, key: &str) -> Result<Option<Row>, SorterError> {
        Ok( self.read(table).await?.into_iter().find(|r| r.key == key) )
    }

    async fn put(&self, table: &TableId, row: Row) -> Result<(), SorterError> {
        let _guard = self.locks.lock(table).await;
        let mut rows = self.read(table).await?;
        match rows.iter_mut().find(|r| r.key == row.key) {
            Some(existing) => *existing = row,
            None => rows.push(row)
        }
        self.write(table, rows).await
    }

    async fn merge(&self, table: &TableId, new_rows: Vec<Row>) -> Result<usize, SorterError> {
        if new_rows.is_empty() {
            return Ok(0);
        }

        let _guard = self.locks.lock(table).await;
        let mut rows = self.read(table).await?;
        let mut inserted = 0;
        for row in new_rows {
            if rows.iter().any(|r| r.key == row.key) {
                continue;
            }
            rows.push(row);
            inserted += 1;
        }

        if inserted > 0 {
            self.write(table, rows).await?;
        }
        Ok(inserted)
    }

    async fn merge_columns(&self, table: &TableId, updates: Vec<Row>) ->
        Result<usize, SorterError> {
        if updates.is_empty() {
            return Ok(0);
        }

        let _guard = self.locks.lock(table).await;
        let mut rows = self.read(table).await?;
        let mut changed = 0;
        for update in &updates {
            if let Some(existing) = rows.iter_mut().find(|r| r.key == update.key) {
                if fill_columns(&mut existing.fields, &update.fields) {
                    changed += 1;
                }
            }
        }

        if changed > 0 {
            self.write(table, rows).await?;
        }
        Ok(changed)
    }

    async fn count(&self, table: &TableId) -> Result<usize, SorterError> {
        Ok( self.read(table).await?.len() )
    }
}
