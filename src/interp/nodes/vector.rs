//! `extractelement`, `insertelement`, `shufflevector`.

use super::{unsupported, Path, Specializer};
use crate::error::InterpError;
use crate::interp::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorOp {
    Extract,
    Insert,
    Shuffle,
}

impl VectorOp {
    pub fn name(self) -> &'static str {
        match self {
            VectorOp::Extract => "extractelement",
            VectorOp::Insert => "insertelement",
            VectorOp::Shuffle => "shufflevector",
        }
    }
}

pub type VectorImpl = fn(&[Value], &[&Value]) -> Result<Value, InterpError>;

#[derive(Debug)]
pub struct VectorNode {
    op: VectorOp,
    /// Lane count of the vector operand's declared type.
    lanes: usize,
    spec: Specializer<VectorImpl>,
}

impl VectorNode {
    pub fn new(op: VectorOp, lanes: usize) -> Self {
        Self {
            op,
            lanes,
            spec: Specializer::new(),
        }
    }

    fn opcode_name(&self) -> &'static str {
        self.op.name()
    }

    /// `operands[0]` is the vector; the rest follow the instruction's order.
    pub fn execute(&self, operands: &[&Value]) -> Result<Value, InterpError> {
        let Some(Value::Vector(lanes)) = operands.first().copied() else {
            return Err(unsupported(self.op.name(), operands));
        };
        if lanes.len() != self.lanes {
            return Err(InterpError::InvalidVectorShape {
                opcode: self.op.name().to_string(),
                expected: self.lanes,
                found: lanes.len(),
            });
        }
        let key = operands[0].key();
        let f = match self.spec.dispatch(key, || Some(select(self.op))) {
            Some(Path::Specialized(f)) => f,
            _ => select(self.op),
        };
        f(lanes, &operands[1..])
    }
}

super::impl_specializing!(VectorNode);

fn select(op: VectorOp) -> VectorImpl {
    match op {
        VectorOp::Extract => extract,
        VectorOp::Insert => insert,
        VectorOp::Shuffle => shuffle,
    }
}

fn lane_index(opcode: &str, index: &Value, len: usize) -> Result<usize, InterpError> {
    let i = index.as_u64().ok_or_else(|| unsupported(opcode, &[index]))? as usize;
    if i >= len {
        return Err(InterpError::Unsupported {
            detail: format!("{} lane index {} out of range for {} lanes", opcode, i, len),
        });
    }
    Ok(i)
}

fn extract(lanes: &[Value], rest: &[&Value]) -> Result<Value, InterpError> {
    let index = rest.first().ok_or_else(|| unsupported("extractelement", rest))?;
    let i = lane_index("extractelement", index, lanes.len())?;
    Ok(lanes[i].clone())
}

fn insert(lanes: &[Value], rest: &[&Value]) -> Result<Value, InterpError> {
    let [element, index] = rest else {
        return Err(unsupported("insertelement", rest));
    };
    let i = lane_index("insertelement", index, lanes.len())?;
    if lanes[i].tag() != element.tag() {
        return Err(unsupported("insertelement", &[&lanes[i], element]));
    }
    let mut out = lanes.to_vec();
    out[i] = (*element).clone();
    Ok(Value::Vector(out))
}

/// Lanes `0..n` pick from the first vector, `n..2n` from the second.
fn shuffle(lanes: &[Value], rest: &[&Value]) -> Result<Value, InterpError> {
    let [Value::Vector(second), Value::Vector(mask)] = rest else {
        return Err(unsupported("shufflevector", rest));
    };
    if second.len() != lanes.len() {
        return Err(InterpError::InvalidVectorShape {
            opcode: "shufflevector".into(),
            expected: lanes.len(),
            found: second.len(),
        });
    }
    let n = lanes.len();
    mask.iter()
        .map(|m| {
            let i = lane_index("shufflevector", m, 2 * n)?;
            Ok(if i < n { lanes[i].clone() } else { second[i - n].clone() })
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Value::Vector)
}
