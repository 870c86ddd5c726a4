use log::debug;

use crate::catalog::{CatalogError, DataAttrInfo, SystemCatalog};
use crate::record::CompOp;

use super::ast::{Condition, RelAttr, Rhs, Selector};
use super::error::{QueryError, QueryResult};
use super::plan::{
    CompiledCondition, CompiledRhs, FilterNode, IndexScanNode, NestedLoopJoinNode, PlanNode,
    ProjectNode, ScanNode,
};

/// A classified single-relation condition.
struct LocalCond {
    lhs: DataAttrInfo,
    op: CompOp,
    rhs: LocalRhs,
}

enum LocalRhs {
    /// Literal, already encoded at the lhs attribute's width
    Value(Vec<u8>),
    /// Another attribute of the same relation
    Attr(DataAttrInfo),
}

/// A classified two-relation condition.
struct JoinCond {
    left_rel: usize,
    left: DataAttrInfo,
    op: CompOp,
    right_rel: usize,
    right: DataAttrInfo,
}

/// Build the iterator tree for a SELECT.
///
/// Conditions are split into per-relation and join conditions; each
/// relation gets a scan (or an index scan when exactly one indexed
/// value-condition applies) plus a filter for the rest; relations combine
/// left-deep in FROM order; a projection tops it off unless the selector
/// is `*`. No cost model, no reordering after construction.
pub fn build_select_plan(
    catalog: &mut SystemCatalog,
    selector: &Selector,
    relations: &[String],
    conditions: &[Condition],
) -> QueryResult<Box<dyn PlanNode>> {
    if relations.is_empty() {
        return Err(QueryError::UnknownRelation("(empty FROM list)".into()));
    }
    for (i, rel) in relations.iter().enumerate() {
        if relations[..i].contains(rel) {
            return Err(QueryError::DuplicateRelation(rel.clone()));
        }
    }

    let mut schemas: Vec<(String, Vec<DataAttrInfo>)> = Vec::with_capacity(relations.len());
    for rel in relations {
        let (_, attrs) = catalog.get_rel_info(rel).map_err(|e| match e {
            CatalogError::RelationNotFound(name) => QueryError::UnknownRelation(name),
            other => QueryError::Catalog(other),
        })?;
        schemas.push((rel.clone(), attrs));
    }

    // Classify WHERE conditions
    let mut locals: Vec<Vec<LocalCond>> = (0..relations.len()).map(|_| Vec::new()).collect();
    let mut joins: Vec<JoinCond> = Vec::new();
    for cond in conditions {
        classify(&schemas, cond, &mut locals, &mut joins)?;
    }

    // Access path per relation, consuming its local conditions
    let mut nodes: Vec<Option<Box<dyn PlanNode>>> = Vec::with_capacity(relations.len());
    for (i, (rel, attrs)) in schemas.iter().enumerate() {
        let node = build_access_path(catalog, rel, attrs.clone(), std::mem::take(&mut locals[i]))?;
        nodes.push(Some(node));
    }

    // Left-deep joins in FROM order
    let mut acc = nodes[0].take().unwrap();
    let mut acc_rels = vec![0usize];
    for (i, node) in nodes.iter_mut().enumerate().skip(1) {
        let right = node.take().unwrap();

        let mut compiled = Vec::new();
        let left_len = acc.tuple_len();
        for join in joins.iter() {
            let (near, far) = if acc_rels.contains(&join.left_rel) && join.right_rel == i {
                (&join.left, &join.right)
            } else if acc_rels.contains(&join.right_rel) && join.left_rel == i {
                (&join.right, &join.left)
            } else {
                continue;
            };

            let near_offset = offset_in(acc.schema(), near);
            let far_offset = right
                .schema()
                .iter()
                .find(|a| a.rel_name == far.rel_name && a.attr_name == far.attr_name)
                .map(|a| a.offset + left_len)
                .unwrap_or(far.offset + left_len);

            // Orient the compiled comparison the way it was written
            let (lhs_offset, rhs_offset, op) = if std::ptr::eq(near, &join.left) {
                (near_offset, far_offset, join.op)
            } else {
                (far_offset, near_offset, join.op)
            };

            compiled.push(CompiledCondition {
                attr_type: join.left.attr_type,
                lhs_offset,
                compare_len: join.left.attr_length.min(join.right.attr_length),
                op,
                rhs: CompiledRhs::Offset(rhs_offset),
            });
        }
        // A condition used once is satisfied for good in a left-deep chain
        joins.retain(|join| {
            !((acc_rels.contains(&join.left_rel) && join.right_rel == i)
                || (acc_rels.contains(&join.right_rel) && join.left_rel == i))
        });

        acc = Box::new(NestedLoopJoinNode::new(acc, right, compiled));
        acc_rels.push(i);
    }

    // Terminal projection
    let plan: Box<dyn PlanNode> = match selector {
        Selector::Star => acc,
        Selector::Attrs(attrs) => {
            let mut projected = Vec::with_capacity(attrs.len());
            for attr in attrs {
                projected.push(find_in_schema(acc.schema(), attr)?.clone());
            }
            Box::new(ProjectNode::new(acc, projected))
        }
    };

    debug!(
        "planned select over {:?}: {} join condition(s) unconsumed",
        relations,
        joins.len()
    );
    Ok(plan)
}

/// Resolve an attribute reference against the relation schemas.
fn resolve<'a>(
    schemas: &'a [(String, Vec<DataAttrInfo>)],
    attr: &RelAttr,
) -> QueryResult<(usize, &'a DataAttrInfo)> {
    match &attr.rel {
        Some(rel) => {
            let (idx, (_, attrs)) = schemas
                .iter()
                .enumerate()
                .find(|(_, (name, _))| name == rel)
                .ok_or_else(|| QueryError::UnknownRelation(rel.clone()))?;
            let info = attrs
                .iter()
                .find(|a| a.attr_name == attr.attr)
                .ok_or_else(|| QueryError::UnknownAttr(attr.to_string()))?;
            Ok((idx, info))
        }
        None => {
            let mut matches = schemas.iter().enumerate().filter_map(|(i, (_, attrs))| {
                attrs
                    .iter()
                    .find(|a| a.attr_name == attr.attr)
                    .map(|a| (i, a))
            });
            let first = matches
                .next()
                .ok_or_else(|| QueryError::UnknownAttr(attr.attr.clone()))?;
            if matches.next().is_some() {
                return Err(QueryError::AmbiguousAttr(attr.attr.clone()));
            }
            Ok(first)
        }
    }
}

/// Attribute lookup in an operator's output schema.
fn find_in_schema<'a>(schema: &'a [DataAttrInfo], attr: &RelAttr) -> QueryResult<&'a DataAttrInfo> {
    let mut matches = schema.iter().filter(|a| {
        a.attr_name == attr.attr && attr.rel.as_deref().map_or(true, |rel| a.rel_name == rel)
    });
    let first = matches
        .next()
        .ok_or_else(|| QueryError::UnknownAttr(attr.to_string()))?;
    if matches.next().is_some() {
        return Err(QueryError::AmbiguousAttr(attr.to_string()));
    }
    Ok(first)
}

fn offset_in(schema: &[DataAttrInfo], attr: &DataAttrInfo) -> usize {
    schema
        .iter()
        .find(|a| a.rel_name == attr.rel_name && a.attr_name == attr.attr_name)
        .map(|a| a.offset)
        .unwrap_or(attr.offset)
}

fn classify(
    schemas: &[(String, Vec<DataAttrInfo>)],
    cond: &Condition,
    locals: &mut [Vec<LocalCond>],
    joins: &mut Vec<JoinCond>,
) -> QueryResult<()> {
    let (lhs_rel, lhs) = resolve(schemas, &cond.lhs)?;

    match &cond.rhs {
        Rhs::Value(value) => {
            if value.attr_type() != lhs.attr_type {
                return Err(QueryError::TypeMismatch(format!(
                    "{} is {}, literal is {}",
                    cond.lhs,
                    lhs.attr_type,
                    value.attr_type()
                )));
            }
            let encoded = value.to_bytes(lhs.attr_length)?;
            locals[lhs_rel].push(LocalCond {
                lhs: lhs.clone(),
                op: cond.op,
                rhs: LocalRhs::Value(encoded),
            });
        }
        Rhs::Attr(rhs_attr) => {
            let (rhs_rel, rhs) = resolve(schemas, rhs_attr)?;
            if rhs.attr_type != lhs.attr_type {
                return Err(QueryError::TypeMismatch(format!(
                    "{} is {}, {} is {}",
                    cond.lhs, lhs.attr_type, rhs_attr, rhs.attr_type
                )));
            }
            if lhs_rel == rhs_rel {
                locals[lhs_rel].push(LocalCond {
                    lhs: lhs.clone(),
                    op: cond.op,
                    rhs: LocalRhs::Attr(rhs.clone()),
                });
            } else {
                joins.push(JoinCond {
                    left_rel: lhs_rel,
                    left: lhs.clone(),
                    op: cond.op,
                    right_rel: rhs_rel,
                    right: rhs.clone(),
                });
            }
        }
    }
    Ok(())
}

/// Scan or index scan for one relation, filtered by its local conditions.
fn build_access_path(
    catalog: &mut SystemCatalog,
    rel: &str,
    schema: Vec<DataAttrInfo>,
    locals: Vec<LocalCond>,
) -> QueryResult<Box<dyn PlanNode>> {
    catalog.ensure_table_open(rel)?;
    let table_path = catalog.table_path(rel)?;
    let reader = catalog.records().reader(&table_path)?;

    // An index scan replaces the heap scan only when exactly one local
    // value-condition with a bounded operator targets an indexed attribute
    let index_candidates: Vec<usize> = locals
        .iter()
        .enumerate()
        .filter(|(_, c)| {
            c.lhs.is_indexed()
                && matches!(c.rhs, LocalRhs::Value(_))
                && matches!(
                    c.op,
                    CompOp::Eq | CompOp::Lt | CompOp::Le | CompOp::Gt | CompOp::Ge
                )
        })
        .map(|(i, _)| i)
        .collect();

    let (base, remaining): (Box<dyn PlanNode>, Vec<LocalCond>) = if index_candidates.len() == 1 {
        let chosen = index_candidates[0];
        let mut locals = locals;
        let cond = locals.remove(chosen);
        let value = match &cond.rhs {
            LocalRhs::Value(v) => v.clone(),
            LocalRhs::Attr(_) => unreachable!("index candidate is a value condition"),
        };

        catalog.ensure_index_open(rel, cond.lhs.index_no)?;
        let index_path = catalog.index_path(rel, cond.lhs.index_no)?;
        let index = catalog.indexes().index(&index_path)?;
        debug!("using index {} for {}.{}", cond.lhs.index_no, rel, cond.lhs.attr_name);

        let node = IndexScanNode::new(
            catalog.buffer(),
            index.handle(),
            index.attr_type(),
            index.attr_length(),
            index.root_page(),
            cond.op,
            value,
            reader,
            schema,
        );
        (Box::new(node), locals)
    } else {
        (Box::new(ScanNode::new(reader, schema)), locals)
    };

    if remaining.is_empty() {
        return Ok(base);
    }

    let compiled = remaining
        .into_iter()
        .map(|c| compile_local(&c))
        .collect::<Vec<_>>();
    Ok(Box::new(FilterNode::new(base, compiled)))
}

fn compile_local(cond: &LocalCond) -> CompiledCondition {
    match &cond.rhs {
        LocalRhs::Value(value) => CompiledCondition {
            attr_type: cond.lhs.attr_type,
            lhs_offset: cond.lhs.offset,
            compare_len: cond.lhs.attr_length,
            op: cond.op,
            rhs: CompiledRhs::Value(value.clone()),
        },
        LocalRhs::Attr(rhs) => CompiledCondition {
            attr_type: cond.lhs.attr_type,
            lhs_offset: cond.lhs.offset,
            compare_len: cond.lhs.attr_length.min(rhs.attr_length),
            op: cond.op,
            rhs: CompiledRhs::Offset(rhs.offset),
        },
    }
}

/// Compile conditions that are local to one relation, for the DML paths
/// (delete/update) that filter records themselves.
pub fn compile_conditions_for(
    schema: &[DataAttrInfo],
    rel: &str,
    conditions: &[Condition],
) -> QueryResult<Vec<CompiledCondition>> {
    let schemas = vec![(rel.to_string(), schema.to_vec())];
    let mut locals: Vec<Vec<LocalCond>> = vec![Vec::new()];
    let mut joins = Vec::new();
    for cond in conditions {
        classify(&schemas, cond, &mut locals, &mut joins)?;
    }
    Ok(locals[0].iter().map(compile_local).collect())
}

/// The attribute type used by a compiled predicate needs no re-checking,
/// but callers sometimes want the lhs info back; expose resolution for
/// a single relation.
pub fn resolve_single(
    schema: &[DataAttrInfo],
    rel: &str,
    attr: &RelAttr,
) -> QueryResult<DataAttrInfo> {
    if let Some(named) = &attr.rel {
        if named != rel {
            return Err(QueryError::UnknownRelation(named.clone()));
        }
    }
    schema
        .iter()
        .find(|a| a.attr_name == attr.attr)
        .cloned()
        .ok_or_else(|| QueryError::UnknownAttr(attr.to_string()))
}
