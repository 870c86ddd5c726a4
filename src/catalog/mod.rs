//! System catalog: `relcat`/`attrcat` bookkeeping and DDL

mod error;
mod records;

pub use error::{CatalogError, CatalogResult};
pub use records::{
    AttrInfo, AttrcatRecord, DataAttrInfo, RelcatRecord, ATTRCAT_NAME, MAX_ATTRS, MAX_NAME,
    RELCAT_NAME,
};

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use log::{debug, info};
use regex::Regex;

use crate::file::BufferManager;
use crate::index::{index_file_name, IndexManager};
use crate::record::{
    AttrType, CompOp, Predicate, Record, RecordManager, Rid, Value,
};

/// The system catalog and the managers beneath it.
///
/// Owns the record and index managers (and through them the shared buffer
/// pool). All DDL flows through here: the catalog tables are updated first
/// and file operations follow, with explicit reverse deletions rolling the
/// catalog back when a later step fails.
pub struct SystemCatalog {
    buffer: Arc<Mutex<BufferManager>>,
    records: RecordManager,
    indexes: IndexManager,
    data_dir: PathBuf,
    current_db: Option<String>,
    name_pattern: Regex,
}

impl SystemCatalog {
    /// Create a catalog rooted at `data_dir` (one subdirectory per database).
    pub fn new<P: AsRef<Path>>(data_dir: P, buffer: Arc<Mutex<BufferManager>>) -> CatalogResult<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&data_dir)?;

        Ok(Self {
            records: RecordManager::new(buffer.clone()),
            indexes: IndexManager::new(buffer.clone()),
            buffer,
            data_dir,
            current_db: None,
            name_pattern: Regex::new("^[A-Za-z][A-Za-z0-9_]*$").unwrap(),
        })
    }

    pub fn buffer(&self) -> Arc<Mutex<BufferManager>> {
        self.buffer.clone()
    }

    pub fn records(&self) -> &RecordManager {
        &self.records
    }

    pub fn records_mut(&mut self) -> &mut RecordManager {
        &mut self.records
    }

    pub fn indexes(&self) -> &IndexManager {
        &self.indexes
    }

    pub fn indexes_mut(&mut self) -> &mut IndexManager {
        &mut self.indexes
    }

    pub fn current_db(&self) -> Option<&str> {
        self.current_db.as_deref()
    }

    pub fn is_system_relation(rel: &str) -> bool {
        rel == RELCAT_NAME || rel == ATTRCAT_NAME
    }

    // ------------------------------------------------------------------
    // Database lifecycle
    // ------------------------------------------------------------------

    /// Create a database directory and bootstrap its self-describing
    /// catalog tables.
    pub fn create_database(&mut self, name: &str) -> CatalogResult<()> {
        self.check_name(name)?;
        let db_dir = self.data_dir.join(name);
        if db_dir.exists() {
            return Err(CatalogError::DatabaseExists(name.to_string()));
        }

        self.close_database()?;
        std::fs::create_dir_all(&db_dir)?;

        {
            let mut bm = self.buffer.lock().unwrap();
            bm.file_manager_mut()
                .quota_mut()
                .set_database(&db_dir, name)?;
        }

        let result = self.bootstrap_catalogs(&db_dir);
        if result.is_err() {
            let mut bm = self.buffer.lock().unwrap();
            let _ = bm.file_manager_mut().quota_mut().detach();
            drop(bm);
            let _ = std::fs::remove_dir_all(&db_dir);
        }
        result?;

        info!("created database {}", name);
        Ok(())
    }

    /// Bootstrap `relcat` and `attrcat`, including the rows that describe
    /// the catalog tables themselves.
    fn bootstrap_catalogs(&mut self, db_dir: &Path) -> CatalogResult<()> {
        let relcat_path = path_str(&db_dir.join(RELCAT_NAME));
        let attrcat_path = path_str(&db_dir.join(ATTRCAT_NAME));

        self.records.create_file(&relcat_path, RelcatRecord::SIZE)?;
        self.records
            .create_file(&attrcat_path, AttrcatRecord::SIZE)?;

        let name_len = (MAX_NAME + 1) as i32;
        let relcat_row = RelcatRecord {
            rel_name: RELCAT_NAME.into(),
            tuple_length: RelcatRecord::SIZE as i32,
            attr_count: 4,
            index_count: 0,
        };
        let attrcat_row = RelcatRecord {
            rel_name: ATTRCAT_NAME.into(),
            tuple_length: AttrcatRecord::SIZE as i32,
            attr_count: 6,
            index_count: 0,
        };
        self.records.insert_rec(&relcat_path, &relcat_row.serialize())?;
        self.records.insert_rec(&attrcat_path, &attrcat_self_row(RELCAT_NAME, "relName", 0, AttrType::String, name_len).serialize())?;
        self.records.insert_rec(&attrcat_path, &attrcat_self_row(RELCAT_NAME, "tupleLength", name_len, AttrType::Int, 4).serialize())?;
        self.records.insert_rec(&attrcat_path, &attrcat_self_row(RELCAT_NAME, "attrCount", name_len + 4, AttrType::Int, 4).serialize())?;
        self.records.insert_rec(&attrcat_path, &attrcat_self_row(RELCAT_NAME, "indexCount", name_len + 8, AttrType::Int, 4).serialize())?;

        self.records.insert_rec(&relcat_path, &attrcat_row.serialize())?;
        self.records.insert_rec(&attrcat_path, &attrcat_self_row(ATTRCAT_NAME, "relName", 0, AttrType::String, name_len).serialize())?;
        self.records.insert_rec(&attrcat_path, &attrcat_self_row(ATTRCAT_NAME, "attrName", name_len, AttrType::String, name_len).serialize())?;
        self.records.insert_rec(&attrcat_path, &attrcat_self_row(ATTRCAT_NAME, "offset", 2 * name_len, AttrType::Int, 4).serialize())?;
        self.records.insert_rec(&attrcat_path, &attrcat_self_row(ATTRCAT_NAME, "attrType", 2 * name_len + 4, AttrType::Int, 4).serialize())?;
        self.records.insert_rec(&attrcat_path, &attrcat_self_row(ATTRCAT_NAME, "attrLength", 2 * name_len + 8, AttrType::Int, 4).serialize())?;
        self.records.insert_rec(&attrcat_path, &attrcat_self_row(ATTRCAT_NAME, "indexNo", 2 * name_len + 12, AttrType::Int, 4).serialize())?;

        self.records.force_pages(&relcat_path)?;
        self.records.force_pages(&attrcat_path)?;
        self.records.close_file(&relcat_path)?;
        self.records.close_file(&attrcat_path)?;
        Ok(())
    }

    /// Open a database: attach the quota and open the catalog tables.
    pub fn open_database(&mut self, name: &str) -> CatalogResult<()> {
        if self.current_db.as_deref() == Some(name) {
            return Ok(());
        }
        self.close_database()?;

        let db_dir = self.data_dir.join(name);
        if !db_dir.is_dir() {
            return Err(CatalogError::DatabaseNotFound(name.to_string()));
        }

        {
            let mut bm = self.buffer.lock().unwrap();
            bm.file_manager_mut()
                .quota_mut()
                .set_database(&db_dir, name)?;
        }

        self.records.open_file(&path_str(&db_dir.join(RELCAT_NAME)))?;
        self.records.open_file(&path_str(&db_dir.join(ATTRCAT_NAME)))?;
        self.current_db = Some(name.to_string());
        info!("opened database {}", name);
        Ok(())
    }

    /// Close every open table and index and flush the quota record.
    pub fn close_database(&mut self) -> CatalogResult<()> {
        if self.current_db.is_none() {
            // Still flush stray files from a bootstrap
            self.records.close_all()?;
            self.indexes.close_all()?;
            return Ok(());
        }

        self.records.close_all()?;
        self.indexes.close_all()?;
        {
            let mut bm = self.buffer.lock().unwrap();
            bm.flush_all()?;
            bm.file_manager_mut().quota_mut().detach()?;
        }
        debug!("closed database {}", self.current_db.as_deref().unwrap_or(""));
        self.current_db = None;
        Ok(())
    }

    /// Set the open database's disk quota from a kilobyte budget.
    pub fn set_quota_kb(&mut self, kb: usize) -> CatalogResult<usize> {
        self.require_db()?;
        let mut bm = self.buffer.lock().unwrap();
        Ok(bm.file_manager_mut().quota_mut().set_limit_kb(kb)?)
    }

    // ------------------------------------------------------------------
    // DDL
    // ------------------------------------------------------------------

    /// Create a user table and its catalog rows.
    pub fn create_table(&mut self, rel: &str, attrs: &[AttrInfo]) -> CatalogResult<()> {
        self.require_db()?;
        self.check_name(rel)?;
        if Self::is_system_relation(rel) {
            return Err(CatalogError::SystemCatalog(rel.to_string()));
        }
        if attrs.is_empty() || attrs.len() > MAX_ATTRS {
            return Err(CatalogError::TooManyAttrs(attrs.len(), MAX_ATTRS));
        }
        for (i, attr) in attrs.iter().enumerate() {
            self.check_name(&attr.attr_name)?;
            if !attr.attr_type.valid_length(attr.attr_length) {
                return Err(CatalogError::BadAttrLength {
                    attr_type: attr.attr_type.to_string(),
                    length: attr.attr_length,
                });
            }
            if attrs[..i].iter().any(|a| a.attr_name == attr.attr_name) {
                return Err(CatalogError::DuplicateAttr(attr.attr_name.clone()));
            }
        }
        if self.find_relcat(rel)?.is_some() {
            return Err(CatalogError::RelationExists(rel.to_string()));
        }

        let tuple_length: usize = attrs.iter().map(|a| a.attr_length).sum();
        let table_path = self.table_path(rel)?;
        self.records.create_file(&table_path, tuple_length)?;

        // Catalog rows; explicit reverse deletions on any failure
        let mut inserted_relcat: Option<Rid> = None;
        let mut inserted_attrcat: Vec<Rid> = Vec::new();
        let result = (|| -> CatalogResult<()> {
            let relcat_path = self.catalog_path(RELCAT_NAME)?;
            let attrcat_path = self.catalog_path(ATTRCAT_NAME)?;

            let row = RelcatRecord {
                rel_name: rel.to_string(),
                tuple_length: tuple_length as i32,
                attr_count: attrs.len() as i32,
                index_count: 0,
            };
            inserted_relcat = Some(self.records.insert_rec(&relcat_path, &row.serialize())?);

            let mut offset = 0usize;
            for attr in attrs {
                let row = AttrcatRecord {
                    rel_name: rel.to_string(),
                    attr_name: attr.attr_name.clone(),
                    offset: offset as i32,
                    attr_type: attr.attr_type,
                    attr_length: attr.attr_length as i32,
                    index_no: -1,
                };
                inserted_attrcat.push(self.records.insert_rec(&attrcat_path, &row.serialize())?);
                offset += attr.attr_length;
            }

            self.records.force_pages(&relcat_path)?;
            self.records.force_pages(&attrcat_path)?;
            Ok(())
        })();

        if result.is_err() {
            let relcat_path = self.catalog_path(RELCAT_NAME)?;
            let attrcat_path = self.catalog_path(ATTRCAT_NAME)?;
            for rid in inserted_attrcat.iter().rev() {
                let _ = self.records.delete_rec(&attrcat_path, *rid);
            }
            if let Some(rid) = inserted_relcat {
                let _ = self.records.delete_rec(&relcat_path, rid);
            }
            let _ = self.records.destroy_file(&table_path);
            return result;
        }

        info!("created table {} ({} attributes)", rel, attrs.len());
        Ok(())
    }

    /// Drop a user table, its indexes and its catalog rows.
    pub fn drop_table(&mut self, rel: &str) -> CatalogResult<()> {
        self.require_db()?;
        if Self::is_system_relation(rel) {
            return Err(CatalogError::SystemCatalog(rel.to_string()));
        }

        let (relcat_rid, _) = self
            .find_relcat(rel)?
            .ok_or_else(|| CatalogError::RelationNotFound(rel.to_string()))?;
        let attr_rows = self.find_attrcat(rel)?;

        for (_, row) in &attr_rows {
            if row.index_no >= 0 {
                let path = self.index_path(rel, row.index_no)?;
                self.indexes.destroy_index(&path)?;
            }
        }

        let table_path = self.table_path(rel)?;
        self.records.destroy_file(&table_path)?;

        let relcat_path = self.catalog_path(RELCAT_NAME)?;
        let attrcat_path = self.catalog_path(ATTRCAT_NAME)?;
        self.records.delete_rec(&relcat_path, relcat_rid)?;
        for (rid, _) in &attr_rows {
            self.records.delete_rec(&attrcat_path, *rid)?;
        }
        self.records.force_pages(&relcat_path)?;
        self.records.force_pages(&attrcat_path)?;

        info!("dropped table {}", rel);
        Ok(())
    }

    /// Create a secondary index on one attribute and back-fill it from the
    /// table's live records.
    pub fn create_index(&mut self, rel: &str, attr_name: &str) -> CatalogResult<()> {
        self.require_db()?;
        if Self::is_system_relation(rel) {
            return Err(CatalogError::SystemCatalog(rel.to_string()));
        }

        let (relcat_rid, mut relcat_row) = self
            .find_relcat(rel)?
            .ok_or_else(|| CatalogError::RelationNotFound(rel.to_string()))?;
        let attr_rows = self.find_attrcat(rel)?;
        let (attr_rid, mut attr_row) = attr_rows
            .iter()
            .find(|(_, row)| row.attr_name == attr_name)
            .cloned()
            .ok_or_else(|| CatalogError::AttrNotFound(rel.to_string(), attr_name.to_string()))?;
        if attr_row.index_no >= 0 {
            return Err(CatalogError::IndexExists(attr_name.to_string()));
        }

        let index_no = attr_rows
            .iter()
            .map(|(_, row)| row.index_no)
            .max()
            .unwrap_or(-1)
            + 1;

        let index_path = self.index_path(rel, index_no)?;
        self.indexes
            .create_index(&index_path, attr_row.attr_type, attr_row.attr_length as usize)?;

        // Back-fill from a full scan; destroy the fresh index if it fails
        let result = (|| -> CatalogResult<()> {
            self.ensure_table_open(rel)?;
            let table_path = self.table_path(rel)?;
            let scan = self.records.scan(&table_path, Predicate::all())?;

            let offset = attr_row.offset as usize;
            let length = attr_row.attr_length as usize;
            for rec in scan {
                let rec = rec?;
                self.indexes
                    .insert_entry(&index_path, &rec.data[offset..offset + length], rec.rid)?;
            }
            self.indexes.force_pages(&index_path)?;
            Ok(())
        })();
        if let Err(e) = result {
            let _ = self.indexes.destroy_index(&index_path);
            return Err(e);
        }

        attr_row.index_no = index_no;
        self.update_attrcat(attr_rid, &attr_row)?;
        relcat_row.index_count += 1;
        self.update_relcat(relcat_rid, &relcat_row)?;

        info!("created index {} on {}.{}", index_no, rel, attr_name);
        Ok(())
    }

    /// Drop one attribute's index.
    pub fn drop_index(&mut self, rel: &str, attr_name: &str) -> CatalogResult<()> {
        self.require_db()?;
        if Self::is_system_relation(rel) {
            return Err(CatalogError::SystemCatalog(rel.to_string()));
        }

        let (relcat_rid, mut relcat_row) = self
            .find_relcat(rel)?
            .ok_or_else(|| CatalogError::RelationNotFound(rel.to_string()))?;
        let (attr_rid, mut attr_row) = self
            .find_attrcat(rel)?
            .into_iter()
            .find(|(_, row)| row.attr_name == attr_name)
            .ok_or_else(|| CatalogError::AttrNotFound(rel.to_string(), attr_name.to_string()))?;
        if attr_row.index_no < 0 {
            return Err(CatalogError::IndexNotFound(attr_name.to_string()));
        }

        let index_path = self.index_path(rel, attr_row.index_no)?;
        self.indexes.destroy_index(&index_path)?;

        attr_row.index_no = -1;
        self.update_attrcat(attr_rid, &attr_row)?;
        relcat_row.index_count -= 1;
        self.update_relcat(relcat_rid, &relcat_row)?;

        info!("dropped index on {}.{}", rel, attr_name);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Lookup API (executor-facing)
    // ------------------------------------------------------------------

    /// A relation's relcat row plus its attributes in declaration order.
    pub fn get_rel_info(&self, rel: &str) -> CatalogResult<(RelcatRecord, Vec<DataAttrInfo>)> {
        let (_, relcat_row) = self
            .find_relcat(rel)?
            .ok_or_else(|| CatalogError::RelationNotFound(rel.to_string()))?;

        let mut attrs: Vec<DataAttrInfo> = self
            .find_attrcat(rel)?
            .iter()
            .map(|(_, row)| DataAttrInfo::from_attrcat(row))
            .collect();
        attrs.sort_by_key(|a| a.offset);
        Ok((relcat_row, attrs))
    }

    /// One attribute's description.
    pub fn get_attr_info(&self, rel: &str, attr_name: &str) -> CatalogResult<DataAttrInfo> {
        let (_, attrs) = self.get_rel_info(rel)?;
        attrs
            .into_iter()
            .find(|a| a.attr_name == attr_name)
            .ok_or_else(|| CatalogError::AttrNotFound(rel.to_string(), attr_name.to_string()))
    }

    /// All relation names, catalog tables included.
    pub fn relations(&self) -> CatalogResult<Vec<String>> {
        self.require_db()?;
        let relcat_path = self.catalog_path(RELCAT_NAME)?;
        let scan = self.records.scan(&relcat_path, Predicate::all())?;
        let mut names = Vec::new();
        for rec in scan {
            names.push(RelcatRecord::deserialize(&rec?.data).rel_name);
        }
        Ok(names)
    }

    // ------------------------------------------------------------------
    // Bulk load
    // ------------------------------------------------------------------

    /// Load a headerless CSV file into a table, maintaining its indexes.
    ///
    /// The load stops at the first bad row; earlier rows stay loaded.
    pub fn load(&mut self, rel: &str, csv_path: &str) -> CatalogResult<usize> {
        self.require_db()?;
        if Self::is_system_relation(rel) {
            return Err(CatalogError::SystemCatalog(rel.to_string()));
        }

        let (_, attrs) = self.get_rel_info(rel)?;
        let tuple_length: usize = attrs.iter().map(|a| a.attr_length).sum();
        self.ensure_table_open(rel)?;
        let table_path = self.table_path(rel)?;

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .trim(csv::Trim::All)
            .from_path(csv_path)?;

        let mut loaded = 0usize;
        for row in reader.records() {
            let row = row?;
            if row.len() != attrs.len() {
                return Err(CatalogError::BadValue {
                    value: format!("row with {} fields", row.len()),
                    attr_type: format!("{} attributes", attrs.len()),
                });
            }

            let mut tuple = vec![0u8; tuple_length];
            for (field, attr) in row.iter().zip(&attrs) {
                let value = parse_value(field, attr.attr_type)?;
                let bytes = value
                    .to_bytes(attr.attr_length)
                    .map_err(CatalogError::from)?;
                tuple[attr.offset..attr.offset + attr.attr_length].copy_from_slice(&bytes);
            }

            let rid = self.records.insert_rec(&table_path, &tuple)?;
            for attr in &attrs {
                if attr.is_indexed() {
                    let index_path = self.index_path(rel, attr.index_no)?;
                    self.ensure_index_open(rel, attr.index_no)?;
                    self.indexes.insert_entry(
                        &index_path,
                        &tuple[attr.offset..attr.offset + attr.attr_length],
                        rid,
                    )?;
                }
            }
            loaded += 1;
        }

        info!("loaded {} rows into {}", loaded, rel);
        Ok(loaded)
    }

    // ------------------------------------------------------------------
    // Path helpers and open-file plumbing
    // ------------------------------------------------------------------

    pub fn table_path(&self, rel: &str) -> CatalogResult<String> {
        let db = self.require_db()?;
        Ok(path_str(&self.data_dir.join(db).join(rel)))
    }

    pub fn index_path(&self, rel: &str, index_no: i32) -> CatalogResult<String> {
        let db = self.require_db()?;
        Ok(path_str(
            &self.data_dir.join(db).join(index_file_name(rel, index_no)),
        ))
    }

    fn catalog_path(&self, which: &str) -> CatalogResult<String> {
        self.table_path(which)
    }

    /// Open a table's heap file if it is not already open.
    pub fn ensure_table_open(&mut self, rel: &str) -> CatalogResult<()> {
        let path = self.table_path(rel)?;
        if !self.records.is_open(&path) {
            self.records.open_file(&path)?;
        }
        Ok(())
    }

    /// Open an index file if it is not already open.
    pub fn ensure_index_open(&mut self, rel: &str, index_no: i32) -> CatalogResult<()> {
        let path = self.index_path(rel, index_no)?;
        if !self.indexes.is_open(&path) {
            self.indexes.open_index(&path)?;
        }
        Ok(())
    }

    fn require_db(&self) -> CatalogResult<&str> {
        self.current_db
            .as_deref()
            .ok_or(CatalogError::NoDatabaseOpen)
    }

    fn check_name(&self, name: &str) -> CatalogResult<()> {
        if name.is_empty() || name.len() > MAX_NAME || !self.name_pattern.is_match(name) {
            return Err(CatalogError::InvalidName(name.to_string()));
        }
        Ok(())
    }

    /// Equality scan of relcat on `rel_name`.
    fn find_relcat(&self, rel: &str) -> CatalogResult<Option<(Rid, RelcatRecord)>> {
        let relcat_path = self.catalog_path(RELCAT_NAME)?;
        let mut scan = self
            .records
            .scan(&relcat_path, name_predicate(RelcatRecord::REL_NAME_OFFSET, rel)?)?;
        match scan.next() {
            Some(rec) => {
                let rec = rec?;
                Ok(Some((rec.rid, RelcatRecord::deserialize(&rec.data))))
            }
            None => Ok(None),
        }
    }

    /// Equality scan of attrcat on `rel_name`; declaration order restored
    /// by the caller via `offset`.
    fn find_attrcat(&self, rel: &str) -> CatalogResult<Vec<(Rid, AttrcatRecord)>> {
        let attrcat_path = self.catalog_path(ATTRCAT_NAME)?;
        let scan = self
            .records
            .scan(&attrcat_path, name_predicate(AttrcatRecord::REL_NAME_OFFSET, rel)?)?;
        let mut rows = Vec::new();
        for rec in scan {
            let rec = rec?;
            rows.push((rec.rid, AttrcatRecord::deserialize(&rec.data)?));
        }
        rows.sort_by_key(|(_, row)| row.offset);
        Ok(rows)
    }

    fn update_relcat(&mut self, rid: Rid, row: &RelcatRecord) -> CatalogResult<()> {
        let path = self.catalog_path(RELCAT_NAME)?;
        self.records
            .update_rec(&path, &Record::new(rid, row.serialize()))?;
        self.records.force_pages(&path)?;
        Ok(())
    }

    fn update_attrcat(&mut self, rid: Rid, row: &AttrcatRecord) -> CatalogResult<()> {
        let path = self.catalog_path(ATTRCAT_NAME)?;
        self.records
            .update_rec(&path, &Record::new(rid, row.serialize()))?;
        self.records.force_pages(&path)?;
        Ok(())
    }
}

/// attrcat row describing one column of a catalog table.
fn attrcat_self_row(
    rel: &str,
    attr: &str,
    offset: i32,
    attr_type: AttrType,
    attr_length: i32,
) -> AttrcatRecord {
    AttrcatRecord {
        rel_name: rel.into(),
        attr_name: attr.into(),
        offset,
        attr_type,
        attr_length,
        index_no: -1,
    }
}

/// Equality predicate on a fixed-width name column.
fn name_predicate(offset: usize, name: &str) -> CatalogResult<Predicate> {
    let value = Value::Str(name.to_string()).to_bytes(MAX_NAME + 1)?;
    Ok(Predicate {
        attr_type: AttrType::String,
        attr_length: MAX_NAME + 1,
        attr_offset: offset,
        op: CompOp::Eq,
        value: Some(value),
    })
}

/// Parse one CSV field according to the column type.
fn parse_value(field: &str, attr_type: AttrType) -> CatalogResult<Value> {
    match attr_type {
        AttrType::Int => field
            .parse::<i32>()
            .map(Value::Int)
            .map_err(|_| CatalogError::BadValue {
                value: field.to_string(),
                attr_type: attr_type.to_string(),
            }),
        AttrType::Float => field
            .parse::<f32>()
            .map(Value::Float)
            .map_err(|_| CatalogError::BadValue {
                value: field.to_string(),
                attr_type: attr_type.to_string(),
            }),
        AttrType::String => Ok(Value::Str(field.to_string())),
    }
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::PagedFileManager;
    use tempfile::TempDir;

    fn setup_catalog() -> (TempDir, SystemCatalog) {
        let temp_dir = tempfile::tempdir().unwrap();
        let buffer = Arc::new(Mutex::new(BufferManager::new(PagedFileManager::new())));
        let catalog = SystemCatalog::new(temp_dir.path().join("data"), buffer).unwrap();
        (temp_dir, catalog)
    }

    fn emp_attrs() -> Vec<AttrInfo> {
        vec![
            AttrInfo::new("id", AttrType::Int, 4),
            AttrInfo::new("dept", AttrType::Int, 4),
            AttrInfo::new("name", AttrType::String, 16),
        ]
    }

    #[test]
    fn test_bootstrap_is_self_describing() {
        let (_temp_dir, mut catalog) = setup_catalog();
        catalog.create_database("db").unwrap();
        catalog.open_database("db").unwrap();

        let (relcat_row, relcat_attrs) = catalog.get_rel_info(RELCAT_NAME).unwrap();
        assert_eq!(relcat_row.attr_count, 4);
        assert_eq!(relcat_row.tuple_length as usize, RelcatRecord::SIZE);
        assert_eq!(relcat_attrs.len(), 4);
        assert_eq!(relcat_attrs[0].attr_name, "relName");

        let (attrcat_row, attrcat_attrs) = catalog.get_rel_info(ATTRCAT_NAME).unwrap();
        assert_eq!(attrcat_row.attr_count, 6);
        assert_eq!(attrcat_attrs.len(), 6);
        // Declared slices tile the tuple without overlap
        let mut expected_offset = 0;
        for attr in &attrcat_attrs {
            assert_eq!(attr.offset, expected_offset);
            expected_offset += attr.attr_length;
        }
        assert_eq!(expected_offset, AttrcatRecord::SIZE);
    }

    #[test]
    fn test_create_table_offsets_and_lookup() {
        let (_temp_dir, mut catalog) = setup_catalog();
        catalog.create_database("db").unwrap();
        catalog.open_database("db").unwrap();

        catalog.create_table("emp", &emp_attrs()).unwrap();

        let (row, attrs) = catalog.get_rel_info("emp").unwrap();
        assert_eq!(row.tuple_length, 24);
        assert_eq!(row.attr_count, 3);
        assert_eq!(row.index_count, 0);

        assert_eq!(attrs[0].offset, 0);
        assert_eq!(attrs[1].offset, 4);
        assert_eq!(attrs[2].offset, 8);
        assert_eq!(attrs[2].attr_length, 16);

        let dept = catalog.get_attr_info("emp", "dept").unwrap();
        assert_eq!(dept.offset, 4);
        assert_eq!(dept.attr_type, AttrType::Int);
        assert!(!dept.is_indexed());
    }

    #[test]
    fn test_create_table_validations() {
        let (_temp_dir, mut catalog) = setup_catalog();
        catalog.create_database("db").unwrap();
        catalog.open_database("db").unwrap();

        let attrs = emp_attrs();
        assert!(matches!(
            catalog.create_table("1bad", &attrs),
            Err(CatalogError::InvalidName(_))
        ));
        assert!(matches!(
            catalog.create_table("a_name_that_is_way_too_long_for_us", &attrs),
            Err(CatalogError::InvalidName(_))
        ));
        assert!(matches!(
            catalog.create_table(RELCAT_NAME, &attrs),
            Err(CatalogError::SystemCatalog(_))
        ));

        let dup = vec![
            AttrInfo::new("x", AttrType::Int, 4),
            AttrInfo::new("x", AttrType::Int, 4),
        ];
        assert!(matches!(
            catalog.create_table("t", &dup),
            Err(CatalogError::DuplicateAttr(_))
        ));

        let bad_len = vec![AttrInfo::new("x", AttrType::Int, 8)];
        assert!(matches!(
            catalog.create_table("t", &bad_len),
            Err(CatalogError::BadAttrLength { .. })
        ));

        let bad_str = vec![AttrInfo::new("x", AttrType::String, 300)];
        assert!(matches!(
            catalog.create_table("t", &bad_str),
            Err(CatalogError::BadAttrLength { .. })
        ));

        catalog.create_table("emp", &attrs).unwrap();
        assert!(matches!(
            catalog.create_table("emp", &attrs),
            Err(CatalogError::RelationExists(_))
        ));
    }

    #[test]
    fn test_create_and_drop_index() {
        let (_temp_dir, mut catalog) = setup_catalog();
        catalog.create_database("db").unwrap();
        catalog.open_database("db").unwrap();
        catalog.create_table("emp", &emp_attrs()).unwrap();

        catalog.create_index("emp", "id").unwrap();
        let id = catalog.get_attr_info("emp", "id").unwrap();
        assert_eq!(id.index_no, 0);
        let (row, _) = catalog.get_rel_info("emp").unwrap();
        assert_eq!(row.index_count, 1);
        let index_path = catalog.index_path("emp", 0).unwrap();
        assert!(std::path::Path::new(&index_path).exists());

        assert!(matches!(
            catalog.create_index("emp", "id"),
            Err(CatalogError::IndexExists(_))
        ));

        // Second index on another attribute gets the next number
        catalog.create_index("emp", "dept").unwrap();
        let dept = catalog.get_attr_info("emp", "dept").unwrap();
        assert_eq!(dept.index_no, 1);

        catalog.drop_index("emp", "id").unwrap();
        let id = catalog.get_attr_info("emp", "id").unwrap();
        assert_eq!(id.index_no, -1);
        let (row, _) = catalog.get_rel_info("emp").unwrap();
        assert_eq!(row.index_count, 1);
        assert!(!std::path::Path::new(&index_path).exists());

        assert!(matches!(
            catalog.drop_index("emp", "id"),
            Err(CatalogError::IndexNotFound(_))
        ));

        // Dropping dept and re-indexing id restarts numbering above the max
        catalog.create_index("emp", "id").unwrap();
        let id = catalog.get_attr_info("emp", "id").unwrap();
        assert_eq!(id.index_no, 2);
    }

    #[test]
    fn test_index_backfills_existing_records() {
        let (_temp_dir, mut catalog) = setup_catalog();
        catalog.create_database("db").unwrap();
        catalog.open_database("db").unwrap();
        catalog.create_table("emp", &emp_attrs()).unwrap();

        // Insert straight through the record manager
        catalog.ensure_table_open("emp").unwrap();
        let table_path = catalog.table_path("emp").unwrap();
        for i in 0..20i32 {
            let mut tuple = vec![0u8; 24];
            tuple[0..4].copy_from_slice(&i.to_le_bytes());
            tuple[4..8].copy_from_slice(&(i % 3).to_le_bytes());
            catalog.records_mut().insert_rec(&table_path, &tuple).unwrap();
        }

        catalog.create_index("emp", "id").unwrap();
        let index_path = catalog.index_path("emp", 0).unwrap();
        let scan = catalog
            .indexes()
            .scan(&index_path, CompOp::No, None)
            .unwrap();
        assert_eq!(scan.count(), 20);
    }

    #[test]
    fn test_drop_table_cleans_catalog_and_files() {
        let (_temp_dir, mut catalog) = setup_catalog();
        catalog.create_database("db").unwrap();
        catalog.open_database("db").unwrap();
        catalog.create_table("t", &[
            AttrInfo::new("a", AttrType::Int, 4),
            AttrInfo::new("b", AttrType::String, 8),
        ]).unwrap();
        catalog.create_index("t", "a").unwrap();

        let table_path = catalog.table_path("t").unwrap();
        let index_path = catalog.index_path("t", 0).unwrap();

        catalog.drop_table("t").unwrap();

        assert!(matches!(
            catalog.get_rel_info("t"),
            Err(CatalogError::RelationNotFound(_))
        ));
        // No attrcat rows left for "t"
        assert!(catalog.find_attrcat("t").unwrap().is_empty());
        assert!(!std::path::Path::new(&table_path).exists());
        assert!(!std::path::Path::new(&index_path).exists());
    }

    #[test]
    fn test_drop_table_rejects_catalogs_and_missing() {
        let (_temp_dir, mut catalog) = setup_catalog();
        catalog.create_database("db").unwrap();
        catalog.open_database("db").unwrap();

        assert!(matches!(
            catalog.drop_table(ATTRCAT_NAME),
            Err(CatalogError::SystemCatalog(_))
        ));
        assert!(matches!(
            catalog.drop_table("ghost"),
            Err(CatalogError::RelationNotFound(_))
        ));
    }

    #[test]
    fn test_catalog_persists_across_reopen() {
        let temp_dir = tempfile::tempdir().unwrap();
        let data_dir = temp_dir.path().join("data");

        {
            let buffer = Arc::new(Mutex::new(BufferManager::new(PagedFileManager::new())));
            let mut catalog = SystemCatalog::new(&data_dir, buffer).unwrap();
            catalog.create_database("db").unwrap();
            catalog.open_database("db").unwrap();
            catalog.create_table("emp", &emp_attrs()).unwrap();
            catalog.create_index("emp", "dept").unwrap();
            catalog.close_database().unwrap();
        }

        let buffer = Arc::new(Mutex::new(BufferManager::new(PagedFileManager::new())));
        let mut catalog = SystemCatalog::new(&data_dir, buffer).unwrap();
        catalog.open_database("db").unwrap();

        let (row, attrs) = catalog.get_rel_info("emp").unwrap();
        assert_eq!(row.attr_count, 3);
        assert_eq!(row.index_count, 1);
        assert_eq!(attrs.iter().filter(|a| a.is_indexed()).count(), 1);
        assert_eq!(catalog.get_attr_info("emp", "dept").unwrap().index_no, 0);
    }

    #[test]
    fn test_load_csv() {
        let (temp_dir, mut catalog) = setup_catalog();
        catalog.create_database("db").unwrap();
        catalog.open_database("db").unwrap();
        catalog.create_table("emp", &emp_attrs()).unwrap();
        catalog.create_index("emp", "id").unwrap();

        let csv_path = temp_dir.path().join("emp.csv");
        std::fs::write(&csv_path, "1,10,alice\n2,20,bob\n3,10,carol\n").unwrap();

        let loaded = catalog.load("emp", csv_path.to_str().unwrap()).unwrap();
        assert_eq!(loaded, 3);

        let table_path = catalog.table_path("emp").unwrap();
        let count = catalog
            .records()
            .scan(&table_path, Predicate::all())
            .unwrap()
            .count();
        assert_eq!(count, 3);

        let index_path = catalog.index_path("emp", 0).unwrap();
        let key = 2i32.to_le_bytes();
        let rids: Vec<_> = catalog
            .indexes()
            .scan(&index_path, CompOp::Eq, Some(&key))
            .unwrap()
            .map(|e| e.unwrap().1)
            .collect();
        assert_eq!(rids.len(), 1);
    }

    #[test]
    fn test_load_bad_row_stops() {
        let (temp_dir, mut catalog) = setup_catalog();
        catalog.create_database("db").unwrap();
        catalog.open_database("db").unwrap();
        catalog.create_table("emp", &emp_attrs()).unwrap();

        let csv_path = temp_dir.path().join("emp.csv");
        std::fs::write(&csv_path, "1,10,alice\nnot_an_int,20,bob\n").unwrap();

        let result = catalog.load("emp", csv_path.to_str().unwrap());
        assert!(matches!(result, Err(CatalogError::BadValue { .. })));

        // The good prefix stays
        let table_path = catalog.table_path("emp").unwrap();
        let count = catalog
            .records()
            .scan(&table_path, Predicate::all())
            .unwrap()
            .count();
        assert_eq!(count, 1);
    }
}
