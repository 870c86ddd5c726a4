use std::sync::{Arc, Mutex};

use crate::catalog::DataAttrInfo;
use crate::file::{BufferManager, FileHandle, PageId};
use crate::index::IndexScan;
use crate::record::{
    eval_comp, AttrType, CompOp, FileScan, Predicate, RecordReader,
};

use super::error::QueryResult;

/// A pull-based executor operator: `open`, then `next` until it yields
/// `None`, then `close`. Every operator exposes its output schema with
/// offsets valid for the tuples it emits.
pub trait PlanNode {
    fn open(&mut self) -> QueryResult<()>;
    fn next(&mut self) -> QueryResult<Option<Vec<u8>>>;
    fn close(&mut self) -> QueryResult<()>;
    fn schema(&self) -> &[DataAttrInfo];
    fn tuple_len(&self) -> usize;
}

/// A condition compiled against a concrete tuple layout.
#[derive(Debug, Clone)]
pub struct CompiledCondition {
    pub attr_type: AttrType,
    pub lhs_offset: usize,
    /// Width used for the comparison (the shorter side for attr-attr
    /// string conditions)
    pub compare_len: usize,
    pub op: CompOp,
    pub rhs: CompiledRhs,
}

#[derive(Debug, Clone)]
pub enum CompiledRhs {
    Offset(usize),
    Value(Vec<u8>),
}

impl CompiledCondition {
    pub fn holds(&self, tuple: &[u8]) -> bool {
        let lhs = &tuple[self.lhs_offset..self.lhs_offset + self.compare_len];
        let rhs = match &self.rhs {
            CompiledRhs::Offset(offset) => &tuple[*offset..*offset + self.compare_len],
            CompiledRhs::Value(value) => value.as_slice(),
        };
        eval_comp(lhs, rhs, self.attr_type, self.compare_len, self.op)
    }
}

/// Full scan of one relation's heap file.
pub struct ScanNode {
    reader: RecordReader,
    schema: Vec<DataAttrInfo>,
    tuple_len: usize,
    scan: Option<FileScan>,
}

impl ScanNode {
    pub fn new(reader: RecordReader, schema: Vec<DataAttrInfo>) -> Self {
        let tuple_len = reader.record_size();
        Self {
            reader,
            schema,
            tuple_len,
            scan: None,
        }
    }
}

impl PlanNode for ScanNode {
    fn open(&mut self) -> QueryResult<()> {
        self.scan = Some(FileScan::over_reader(&self.reader, Predicate::all())?);
        Ok(())
    }

    fn next(&mut self) -> QueryResult<Option<Vec<u8>>> {
        let scan = self.scan.as_mut().expect("scan node not open");
        match scan.next() {
            Some(rec) => Ok(Some(rec?.data)),
            None => Ok(None),
        }
    }

    fn close(&mut self) -> QueryResult<()> {
        self.scan = None;
        Ok(())
    }

    fn schema(&self) -> &[DataAttrInfo] {
        &self.schema
    }

    fn tuple_len(&self) -> usize {
        self.tuple_len
    }
}

/// Index-driven access path: scans the B+tree for matching RIDs and
/// fetches each full record from the heap file.
pub struct IndexScanNode {
    buffer: Arc<Mutex<BufferManager>>,
    index_handle: FileHandle,
    attr_type: AttrType,
    attr_length: usize,
    root_page: PageId,
    op: CompOp,
    value: Vec<u8>,
    reader: RecordReader,
    schema: Vec<DataAttrInfo>,
    tuple_len: usize,
    scan: Option<IndexScan>,
}

impl IndexScanNode {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        buffer: Arc<Mutex<BufferManager>>,
        index_handle: FileHandle,
        attr_type: AttrType,
        attr_length: usize,
        root_page: PageId,
        op: CompOp,
        value: Vec<u8>,
        reader: RecordReader,
        schema: Vec<DataAttrInfo>,
    ) -> Self {
        let tuple_len = reader.record_size();
        Self {
            buffer,
            index_handle,
            attr_type,
            attr_length,
            root_page,
            op,
            value,
            reader,
            schema,
            tuple_len,
            scan: None,
        }
    }
}

impl PlanNode for IndexScanNode {
    fn open(&mut self) -> QueryResult<()> {
        self.scan = Some(IndexScan::open_with(
            self.buffer.clone(),
            self.index_handle,
            self.attr_type,
            self.attr_length,
            self.root_page,
            self.op,
            Some(&self.value),
        )?);
        Ok(())
    }

    fn next(&mut self) -> QueryResult<Option<Vec<u8>>> {
        let scan = self.scan.as_mut().expect("index scan node not open");
        match scan.next() {
            Some(entry) => {
                let (_, rid) = entry?;
                let record = self.reader.get(rid)?;
                Ok(Some(record.data))
            }
            None => Ok(None),
        }
    }

    fn close(&mut self) -> QueryResult<()> {
        self.scan = None;
        Ok(())
    }

    fn schema(&self) -> &[DataAttrInfo] {
        &self.schema
    }

    fn tuple_len(&self) -> usize {
        self.tuple_len
    }
}

/// Emits the child's tuples for which every condition holds.
pub struct FilterNode {
    child: Box<dyn PlanNode>,
    conditions: Vec<CompiledCondition>,
}

impl FilterNode {
    pub fn new(child: Box<dyn PlanNode>, conditions: Vec<CompiledCondition>) -> Self {
        Self { child, conditions }
    }
}

impl PlanNode for FilterNode {
    fn open(&mut self) -> QueryResult<()> {
        self.child.open()
    }

    fn next(&mut self) -> QueryResult<Option<Vec<u8>>> {
        while let Some(tuple) = self.child.next()? {
            if self.conditions.iter().all(|c| c.holds(&tuple)) {
                return Ok(Some(tuple));
            }
        }
        Ok(None)
    }

    fn close(&mut self) -> QueryResult<()> {
        self.child.close()
    }

    fn schema(&self) -> &[DataAttrInfo] {
        self.child.schema()
    }

    fn tuple_len(&self) -> usize {
        self.child.tuple_len()
    }
}

/// Rewrites tuples to the projected attribute list, renumbering offsets.
pub struct ProjectNode {
    child: Box<dyn PlanNode>,
    /// `(source offset, length)` per projected attribute
    fields: Vec<(usize, usize)>,
    schema: Vec<DataAttrInfo>,
    tuple_len: usize,
}

impl ProjectNode {
    pub fn new(child: Box<dyn PlanNode>, attrs: Vec<DataAttrInfo>) -> Self {
        let fields: Vec<(usize, usize)> = attrs
            .iter()
            .map(|a| (a.offset, a.attr_length))
            .collect();

        let mut schema = attrs;
        let mut out_offset = 0;
        for attr in &mut schema {
            attr.offset = out_offset;
            attr.index_no = -1;
            out_offset += attr.attr_length;
        }

        Self {
            child,
            fields,
            schema,
            tuple_len: out_offset,
        }
    }
}

impl PlanNode for ProjectNode {
    fn open(&mut self) -> QueryResult<()> {
        self.child.open()
    }

    fn next(&mut self) -> QueryResult<Option<Vec<u8>>> {
        match self.child.next()? {
            Some(tuple) => {
                let mut out = Vec::with_capacity(self.tuple_len);
                for (offset, length) in &self.fields {
                    out.extend_from_slice(&tuple[*offset..*offset + *length]);
                }
                Ok(Some(out))
            }
            None => Ok(None),
        }
    }

    fn close(&mut self) -> QueryResult<()> {
        self.child.close()
    }

    fn schema(&self) -> &[DataAttrInfo] {
        &self.schema
    }

    fn tuple_len(&self) -> usize {
        self.tuple_len
    }
}

/// Tuple-nested-loop join. The outer (left) tuple is held while the inner
/// (right) operator runs to exhaustion, then the inner is restarted with a
/// fresh `close`/`open` cycle. Join conditions are compiled against the
/// concatenated layout, right offsets shifted by the left tuple length.
pub struct NestedLoopJoinNode {
    left: Box<dyn PlanNode>,
    right: Box<dyn PlanNode>,
    conditions: Vec<CompiledCondition>,
    schema: Vec<DataAttrInfo>,
    tuple_len: usize,
    current_left: Option<Vec<u8>>,
}

impl NestedLoopJoinNode {
    pub fn new(
        left: Box<dyn PlanNode>,
        right: Box<dyn PlanNode>,
        conditions: Vec<CompiledCondition>,
    ) -> Self {
        let left_len = left.tuple_len();
        let tuple_len = left_len + right.tuple_len();

        let mut schema = left.schema().to_vec();
        for attr in right.schema() {
            let mut attr = attr.clone();
            attr.offset += left_len;
            schema.push(attr);
        }

        Self {
            left,
            right,
            conditions,
            schema,
            tuple_len,
            current_left: None,
        }
    }
}

impl PlanNode for NestedLoopJoinNode {
    fn open(&mut self) -> QueryResult<()> {
        self.left.open()?;
        self.right.open()?;
        self.current_left = self.left.next()?;
        Ok(())
    }

    fn next(&mut self) -> QueryResult<Option<Vec<u8>>> {
        loop {
            let left_tuple = match &self.current_left {
                Some(t) => t,
                None => return Ok(None),
            };

            match self.right.next()? {
                Some(right_tuple) => {
                    let mut joined = Vec::with_capacity(self.tuple_len);
                    joined.extend_from_slice(left_tuple);
                    joined.extend_from_slice(&right_tuple);
                    if self.conditions.iter().all(|c| c.holds(&joined)) {
                        return Ok(Some(joined));
                    }
                }
                None => {
                    // Inner exhausted: restart it for the next outer tuple
                    self.right.close()?;
                    self.right.open()?;
                    self.current_left = self.left.next()?;
                }
            }
        }
    }

    fn close(&mut self) -> QueryResult<()> {
        self.left.close()?;
        self.right.close()?;
        self.current_left = None;
        Ok(())
    }

    fn schema(&self) -> &[DataAttrInfo] {
        &self.schema
    }

    fn tuple_len(&self) -> usize {
        self.tuple_len
    }
}
