//! Query executor: iterator operators, planning and DML

mod ast;
mod error;
mod plan;
mod planner;

pub use ast::{Condition, RelAttr, Rhs, Selector};
pub use error::{QueryError, QueryResult};
pub use plan::{CompiledCondition, CompiledRhs, PlanNode};
pub use planner::build_select_plan;

use log::debug;

use crate::catalog::{DataAttrInfo, SystemCatalog};
use crate::record::{Predicate, Record, Rid, Value};

/// DML entry point: owns the catalog (and through it the storage managers)
/// and turns statements into operator trees and record operations.
pub struct QueryEngine {
    catalog: SystemCatalog,
}

impl QueryEngine {
    pub fn new(catalog: SystemCatalog) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &SystemCatalog {
        &self.catalog
    }

    pub fn catalog_mut(&mut self) -> &mut SystemCatalog {
        &mut self.catalog
    }

    /// Run a SELECT and collect the result rows.
    pub fn select(
        &mut self,
        selector: &Selector,
        relations: &[String],
        conditions: &[Condition],
    ) -> QueryResult<(Vec<DataAttrInfo>, Vec<Vec<u8>>)> {
        let mut plan = build_select_plan(&mut self.catalog, selector, relations, conditions)?;

        plan.open()?;
        let mut rows = Vec::new();
        let outcome = loop {
            match plan.next() {
                Ok(Some(tuple)) => rows.push(tuple),
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            }
        };
        plan.close()?;
        outcome?;

        debug!("select returned {} row(s)", rows.len());
        Ok((plan.schema().to_vec(), rows))
    }

    /// Insert one tuple, maintaining every index on the relation.
    ///
    /// An index failure after the heap insert is surfaced with the
    /// already-assigned RID; neither the record nor earlier index entries
    /// are rolled back.
    pub fn insert(&mut self, rel: &str, values: &[Value]) -> QueryResult<Rid> {
        self.reject_system(rel)?;
        let (relcat, attrs) = self.catalog.get_rel_info(rel)?;

        if values.len() != attrs.len() {
            return Err(QueryError::InvalidValueCount {
                expected: attrs.len(),
                actual: values.len(),
            });
        }
        for (value, attr) in values.iter().zip(&attrs) {
            if value.attr_type() != attr.attr_type {
                return Err(QueryError::TypeMismatch(format!(
                    "attribute {} is {}, value is {}",
                    attr.attr_name,
                    attr.attr_type,
                    value.attr_type()
                )));
            }
        }

        let mut tuple = vec![0u8; relcat.tuple_length as usize];
        for (value, attr) in values.iter().zip(&attrs) {
            let bytes = value.to_bytes(attr.attr_length)?;
            tuple[attr.offset..attr.offset + attr.attr_length].copy_from_slice(&bytes);
        }

        self.catalog.ensure_table_open(rel)?;
        let table_path = self.catalog.table_path(rel)?;
        let rid = self.catalog.records_mut().insert_rec(&table_path, &tuple)?;

        for attr in attrs.iter().filter(|a| a.is_indexed()) {
            self.catalog.ensure_index_open(rel, attr.index_no)?;
            let index_path = self.catalog.index_path(rel, attr.index_no)?;
            let key = &tuple[attr.offset..attr.offset + attr.attr_length];
            self.catalog
                .indexes_mut()
                .insert_entry(&index_path, key, rid)
                .map_err(|source| QueryError::PartialInsert { rid, source })?;
        }

        Ok(rid)
    }

    /// Delete every record matching the conditions; returns the count.
    pub fn delete(&mut self, rel: &str, conditions: &[Condition]) -> QueryResult<usize> {
        self.reject_system(rel)?;
        let (attrs, victims) = self.matching_records(rel, conditions)?;
        let table_path = self.catalog.table_path(rel)?;

        for record in &victims {
            self.catalog.records_mut().delete_rec(&table_path, record.rid)?;
            for attr in attrs.iter().filter(|a| a.is_indexed()) {
                self.catalog.ensure_index_open(rel, attr.index_no)?;
                let index_path = self.catalog.index_path(rel, attr.index_no)?;
                let key = &record.data[attr.offset..attr.offset + attr.attr_length];
                self.catalog
                    .indexes_mut()
                    .delete_entry(&index_path, key, record.rid)?;
            }
        }

        debug!("deleted {} record(s) from {}", victims.len(), rel);
        Ok(victims.len())
    }

    /// Overwrite one attribute on every matching record; returns the count.
    pub fn update(
        &mut self,
        rel: &str,
        upd_attr: &RelAttr,
        value: &Value,
        conditions: &[Condition],
    ) -> QueryResult<usize> {
        self.reject_system(rel)?;
        let (attrs, matches) = self.matching_records(rel, conditions)?;
        let target = planner::resolve_single(&attrs, rel, upd_attr)?;

        if value.attr_type() != target.attr_type {
            return Err(QueryError::TypeMismatch(format!(
                "attribute {} is {}, value is {}",
                target.attr_name,
                target.attr_type,
                value.attr_type()
            )));
        }
        let new_bytes = value.to_bytes(target.attr_length)?;

        let table_path = self.catalog.table_path(rel)?;
        for record in &matches {
            let old_key = record.data
                [target.offset..target.offset + target.attr_length]
                .to_vec();
            if old_key == new_bytes {
                continue;
            }

            let mut data = record.data.clone();
            data[target.offset..target.offset + target.attr_length].copy_from_slice(&new_bytes);
            self.catalog
                .records_mut()
                .update_rec(&table_path, &Record::new(record.rid, data))?;

            if target.is_indexed() {
                self.catalog.ensure_index_open(rel, target.index_no)?;
                let index_path = self.catalog.index_path(rel, target.index_no)?;
                self.catalog
                    .indexes_mut()
                    .delete_entry(&index_path, &old_key, record.rid)?;
                self.catalog
                    .indexes_mut()
                    .insert_entry(&index_path, &new_bytes, record.rid)?;
            }
        }

        debug!("updated {} record(s) in {}", matches.len(), rel);
        Ok(matches.len())
    }

    /// Materialize the records matching a set of single-relation
    /// conditions, before any mutation happens.
    fn matching_records(
        &mut self,
        rel: &str,
        conditions: &[Condition],
    ) -> QueryResult<(Vec<DataAttrInfo>, Vec<Record>)> {
        let (_, attrs) = self.catalog.get_rel_info(rel)?;
        let compiled = planner::compile_conditions_for(&attrs, rel, conditions)?;

        self.catalog.ensure_table_open(rel)?;
        let table_path = self.catalog.table_path(rel)?;
        let scan = self.catalog.records().scan(&table_path, Predicate::all())?;

        let mut matches = Vec::new();
        for rec in scan {
            let rec = rec?;
            if compiled.iter().all(|c| c.holds(&rec.data)) {
                matches.push(rec);
            }
        }
        Ok((attrs, matches))
    }

    fn reject_system(&self, rel: &str) -> QueryResult<()> {
        if SystemCatalog::is_system_relation(rel) {
            return Err(QueryError::SystemCatalog(rel.to_string()));
        }
        Ok(())
    }
}

/// Decode one result row into typed values using its schema.
pub fn decode_row(schema: &[DataAttrInfo], tuple: &[u8]) -> QueryResult<Vec<Value>> {
    let mut values = Vec::with_capacity(schema.len());
    for attr in schema {
        let bytes = &tuple[attr.offset..attr.offset + attr.attr_length];
        values.push(Value::from_bytes(bytes, attr.attr_type)?);
    }
    Ok(values)
}
