use std::cmp::Ordering;
use std::fmt;

use super::error::{RecordError, RecordResult};

/// Attribute type of a fixed-length column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrType {
    /// 4-byte signed integer
    Int,
    /// 4-byte float
    Float,
    /// Fixed-width byte string, 1..=255 bytes
    String,
}

impl AttrType {
    /// On-disk discriminant, shared with the catalog encoding
    pub fn code(&self) -> i32 {
        match self {
            AttrType::Int => 0,
            AttrType::Float => 1,
            AttrType::String => 2,
        }
    }

    pub fn from_code(code: i32) -> RecordResult<Self> {
        match code {
            0 => Ok(AttrType::Int),
            1 => Ok(AttrType::Float),
            2 => Ok(AttrType::String),
            _ => Err(RecordError::InvalidRecord(format!(
                "unknown attribute type code {}",
                code
            ))),
        }
    }

    /// Whether `length` is a legal attribute length for this type
    pub fn valid_length(&self, length: usize) -> bool {
        match self {
            AttrType::Int | AttrType::Float => length == 4,
            AttrType::String => (1..=255).contains(&length),
        }
    }
}

impl fmt::Display for AttrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrType::Int => write!(f, "int"),
            AttrType::Float => write!(f, "float"),
            AttrType::String => write!(f, "string"),
        }
    }
}

/// Comparison operator for scan predicates and query conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompOp {
    /// No predicate: every record matches
    No,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

impl CompOp {
    /// Apply the operator to an ordering result
    pub fn matches(&self, ord: Ordering) -> bool {
        match self {
            CompOp::No => true,
            CompOp::Eq => ord == Ordering::Equal,
            CompOp::Ne => ord != Ordering::Equal,
            CompOp::Lt => ord == Ordering::Less,
            CompOp::Gt => ord == Ordering::Greater,
            CompOp::Le => ord != Ordering::Greater,
            CompOp::Ge => ord != Ordering::Less,
        }
    }
}

impl fmt::Display for CompOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CompOp::No => "",
            CompOp::Eq => "=",
            CompOp::Ne => "<>",
            CompOp::Lt => "<",
            CompOp::Gt => ">",
            CompOp::Le => "<=",
            CompOp::Ge => ">=",
        };
        write!(f, "{}", s)
    }
}

/// A typed literal, convertible to and from the fixed-width byte encoding
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i32),
    Float(f32),
    Str(String),
}

impl Value {
    pub fn attr_type(&self) -> AttrType {
        match self {
            Value::Int(_) => AttrType::Int,
            Value::Float(_) => AttrType::Float,
            Value::Str(_) => AttrType::String,
        }
    }

    /// Encode to exactly `attr_length` bytes; strings are zero-padded.
    pub fn to_bytes(&self, attr_length: usize) -> RecordResult<Vec<u8>> {
        match self {
            Value::Int(i) => Ok(i.to_le_bytes().to_vec()),
            Value::Float(f) => Ok(f.to_le_bytes().to_vec()),
            Value::Str(s) => {
                let bytes = s.as_bytes();
                if bytes.len() > attr_length {
                    return Err(RecordError::InvalidRecord(format!(
                        "string of {} bytes exceeds attribute length {}",
                        bytes.len(),
                        attr_length
                    )));
                }
                let mut out = vec![0u8; attr_length];
                out[..bytes.len()].copy_from_slice(bytes);
                Ok(out)
            }
        }
    }

    /// Decode from a fixed-width byte slice.
    pub fn from_bytes(bytes: &[u8], attr_type: AttrType) -> RecordResult<Self> {
        match attr_type {
            AttrType::Int => {
                let buf: [u8; 4] = bytes[..4]
                    .try_into()
                    .map_err(|_| RecordError::InvalidRecord("short int field".into()))?;
                Ok(Value::Int(i32::from_le_bytes(buf)))
            }
            AttrType::Float => {
                let buf: [u8; 4] = bytes[..4]
                    .try_into()
                    .map_err(|_| RecordError::InvalidRecord("short float field".into()))?;
                Ok(Value::Float(f32::from_le_bytes(buf)))
            }
            AttrType::String => {
                let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
                let s = String::from_utf8_lossy(&bytes[..end]).into_owned();
                Ok(Value::Str(s))
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::Str(s) => write!(f, "{}", s),
        }
    }
}

/// Total-order two attribute encodings of the same type.
///
/// Strings compare bytewise over the fixed width (`strncmp` semantics);
/// numeric types compare natively. Float NaN sorts after everything so the
/// order stays total.
pub fn compare_attrs(lhs: &[u8], rhs: &[u8], attr_type: AttrType, attr_length: usize) -> Ordering {
    match attr_type {
        AttrType::Int => {
            let a = i32::from_le_bytes(lhs[..4].try_into().unwrap());
            let b = i32::from_le_bytes(rhs[..4].try_into().unwrap());
            a.cmp(&b)
        }
        AttrType::Float => {
            let a = f32::from_le_bytes(lhs[..4].try_into().unwrap());
            let b = f32::from_le_bytes(rhs[..4].try_into().unwrap());
            a.partial_cmp(&b).unwrap_or_else(|| {
                match (a.is_nan(), b.is_nan()) {
                    (true, false) => Ordering::Greater,
                    (false, true) => Ordering::Less,
                    _ => Ordering::Equal,
                }
            })
        }
        AttrType::String => {
            let n = attr_length.min(lhs.len()).min(rhs.len());
            lhs[..n].cmp(&rhs[..n])
        }
    }
}

/// Evaluate `lhs op rhs` over two attribute encodings of the same type.
pub fn eval_comp(
    lhs: &[u8],
    rhs: &[u8],
    attr_type: AttrType,
    attr_length: usize,
    op: CompOp,
) -> bool {
    op.matches(compare_attrs(lhs, rhs, attr_type, attr_length))
}
