use std::io::{self, BufRead, Write};
use std::sync::{Arc, Mutex};

use minirel::catalog::{AttrInfo, SystemCatalog};
use minirel::query::{decode_row, Condition, QueryEngine, RelAttr, Rhs, Selector};
use minirel::record::{AttrType, CompOp, Value};
use minirel::{BufferManager, PagedFileManager};

fn main() {
    env_logger::init();

    let data_dir = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "./data".to_string());

    let buffer = Arc::new(Mutex::new(BufferManager::new(PagedFileManager::new())));
    let catalog = match SystemCatalog::new(&data_dir, buffer) {
        Ok(catalog) => catalog,
        Err(e) => {
            eprintln!("failed to initialize catalog: {}", e);
            std::process::exit(1);
        }
    };
    let mut engine = QueryEngine::new(catalog);

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(_) => break,
        };
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if line == "exit" || line == "quit" {
            break;
        }

        if let Err(e) = dispatch(&mut engine, line) {
            eprintln!("error: {}", e);
        }
        stdout.flush().ok();
    }

    if let Err(e) = engine.catalog_mut().close_database() {
        eprintln!("error on shutdown: {}", e);
    }
}

fn dispatch(engine: &mut QueryEngine, line: &str) -> Result<(), String> {
    let tokens: Vec<&str> = line.split_whitespace().collect();

    match tokens.as_slice() {
        ["createdb", name] => {
            engine.catalog_mut().create_database(name).map_err(err)?;
            println!("database {} created", name);
        }
        ["opendb", name] => {
            engine.catalog_mut().open_database(name).map_err(err)?;
            println!("database {} open", name);
        }
        ["closedb"] => {
            engine.catalog_mut().close_database().map_err(err)?;
            println!("database closed");
        }
        ["quota", kb] => {
            let kb: usize = kb.parse().map_err(|_| format!("bad number: {}", kb))?;
            let pages = engine.catalog_mut().set_quota_kb(kb).map_err(err)?;
            println!("quota set to {} pages", pages);
        }
        ["create", rel, columns @ ..] if !columns.is_empty() => {
            let attrs = columns
                .iter()
                .map(|c| parse_column(c))
                .collect::<Result<Vec<_>, _>>()?;
            engine.catalog_mut().create_table(rel, &attrs).map_err(err)?;
            println!("table {} created", rel);
        }
        ["drop", rel] => {
            engine.catalog_mut().drop_table(rel).map_err(err)?;
            println!("table {} dropped", rel);
        }
        ["index", rel, attr] => {
            engine.catalog_mut().create_index(rel, attr).map_err(err)?;
            println!("index created on {}.{}", rel, attr);
        }
        ["dropindex", rel, attr] => {
            engine.catalog_mut().drop_index(rel, attr).map_err(err)?;
            println!("index dropped from {}.{}", rel, attr);
        }
        ["tables"] => {
            for name in engine.catalog().relations().map_err(err)? {
                println!("{}", name);
            }
        }
        ["desc", rel] => {
            let (_, attrs) = engine.catalog().get_rel_info(rel).map_err(err)?;
            for a in attrs {
                let indexed = if a.is_indexed() { " indexed" } else { "" };
                println!("{} {}({}){}", a.attr_name, a.attr_type, a.attr_length, indexed);
            }
        }
        ["load", rel, path] => {
            let rows = engine.catalog_mut().load(rel, path).map_err(err)?;
            println!("loaded {} rows", rows);
        }
        ["stats"] => {
            let buffer = engine.catalog().buffer();
            let bm = buffer.lock().unwrap();
            let stats = bm.stats();
            println!(
                "buffer: {} hits, {} misses, {} reads, {} writes",
                stats.hits, stats.misses, stats.disk_reads, stats.disk_writes
            );
            let quota = bm.file_manager().quota();
            if quota.enabled() {
                println!("quota: {}/{} pages", quota.used_pages(), quota.limit_pages());
            }
        }
        ["insert", rel, values @ ..] if !values.is_empty() => {
            let values: Vec<Value> = values.iter().map(|v| parse_literal(v)).collect();
            let rid = engine.insert(rel, &values).map_err(err)?;
            println!("inserted at {}", rid);
        }
        ["delete", rel, rest @ ..] => {
            let conditions = parse_conditions(rest)?;
            let n = engine.delete(rel, &conditions).map_err(err)?;
            println!("{} rows deleted", n);
        }
        ["update", rel, assignment, rest @ ..] => {
            let (attr, value) = assignment
                .split_once('=')
                .ok_or_else(|| format!("expected attr=value, got {}", assignment))?;
            let conditions = parse_conditions(rest)?;
            let n = engine
                .update(rel, &parse_attr(attr), &parse_literal(value), &conditions)
                .map_err(err)?;
            println!("{} rows updated", n);
        }
        ["select", attrs, "from", rels, rest @ ..] => {
            let selector = if *attrs == "*" {
                Selector::Star
            } else {
                Selector::Attrs(attrs.split(',').map(parse_attr).collect())
            };
            let relations: Vec<String> = rels.split(',').map(str::to_string).collect();
            let conditions = parse_conditions(rest)?;

            let (schema, rows) = engine.select(&selector, &relations, &conditions).map_err(err)?;
            let header: Vec<String> = schema.iter().map(|a| a.attr_name.clone()).collect();
            println!("{}", header.join(","));
            for row in &rows {
                let values = decode_row(&schema, row).map_err(err)?;
                let fields: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                println!("{}", fields.join(","));
            }
        }
        ["help"] => {
            println!("commands:");
            println!("  createdb|opendb <db>   closedb   quota <kb>   tables   desc <rel>   stats");
            println!("  create <rel> <name:int|float|str<N>>...   drop <rel>");
            println!("  index <rel> <attr>   dropindex <rel> <attr>   load <rel> <csv>");
            println!("  insert <rel> <v>...   delete <rel> [where a op v ...]");
            println!("  update <rel> a=v [where a op v ...]");
            println!("  select <a,b|*> from <rel[,rel]> [where a op v [and ...]]");
        }
        _ => return Err(format!("unrecognized command: {} (try help)", line)),
    }
    Ok(())
}

fn err<E: std::fmt::Display>(e: E) -> String {
    e.to_string()
}

/// `name:int`, `name:float` or `name:strN`
fn parse_column(spec: &str) -> Result<AttrInfo, String> {
    let (name, ty) = spec
        .split_once(':')
        .ok_or_else(|| format!("expected name:type, got {}", spec))?;
    if ty == "int" {
        Ok(AttrInfo::new(name, AttrType::Int, 4))
    } else if ty == "float" {
        Ok(AttrInfo::new(name, AttrType::Float, 4))
    } else if let Some(len) = ty.strip_prefix("str") {
        let len: usize = len.parse().map_err(|_| format!("bad string length: {}", ty))?;
        Ok(AttrInfo::new(name, AttrType::String, len))
    } else {
        Err(format!("unknown type: {}", ty))
    }
}

fn parse_attr(token: &str) -> RelAttr {
    match token.split_once('.') {
        Some((rel, attr)) => RelAttr::qualified(rel, attr),
        None => RelAttr::unqualified(token),
    }
}

/// Integers and floats parse as themselves; everything else is a string
/// (surrounding quotes stripped).
fn parse_literal(token: &str) -> Value {
    if let Ok(i) = token.parse::<i32>() {
        return Value::Int(i);
    }
    if let Ok(f) = token.parse::<f32>() {
        return Value::Float(f);
    }
    Value::Str(token.trim_matches('\'').trim_matches('"').to_string())
}

fn parse_op(token: &str) -> Result<CompOp, String> {
    match token {
        "=" | "==" => Ok(CompOp::Eq),
        "<>" | "!=" => Ok(CompOp::Ne),
        "<" => Ok(CompOp::Lt),
        ">" => Ok(CompOp::Gt),
        "<=" => Ok(CompOp::Le),
        ">=" => Ok(CompOp::Ge),
        _ => Err(format!("unknown operator: {}", token)),
    }
}

/// `where a op v [and a op v]...`; a right-hand token with a dot or a
/// leading letter that is not a quoted string is taken as an attribute.
fn parse_conditions(tokens: &[&str]) -> Result<Vec<Condition>, String> {
    if tokens.is_empty() {
        return Ok(Vec::new());
    }
    if tokens[0] != "where" {
        return Err(format!("expected where, got {}", tokens[0]));
    }

    let mut conditions = Vec::new();
    let mut rest = &tokens[1..];
    loop {
        let [lhs, op, rhs, tail @ ..] = rest else {
            return Err("incomplete condition".to_string());
        };

        let rhs = if rhs.starts_with('\'') || rhs.starts_with('"') {
            Rhs::Value(parse_literal(rhs))
        } else if rhs.contains('.')
            || rhs.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
        {
            Rhs::Attr(parse_attr(rhs))
        } else {
            Rhs::Value(parse_literal(rhs))
        };

        conditions.push(Condition {
            lhs: parse_attr(lhs),
            op: parse_op(op)?,
            rhs,
        });

        match tail {
            [] => break,
            ["and", more @ ..] => rest = more,
            _ => return Err("conditions must be joined with and".to_string()),
        }
    }
    Ok(conditions)
}
