//! `icmp` / `fcmp`.

use super::{unsupported, Path, Specializer};
use crate::error::InterpError;
use crate::interp::value::{sign_extend_128, TypeTag, Value};
use crate::ir::CmpPredicate;

pub type CompareImpl = fn(CmpPredicate, &Value, &Value) -> Result<bool, InterpError>;

#[derive(Debug)]
pub struct CompareNode {
    pred: CmpPredicate,
    spec: Specializer<CompareImpl>,
}

impl CompareNode {
    pub fn new(pred: CmpPredicate) -> Self {
        Self {
            pred,
            spec: Specializer::new(),
        }
    }

    fn opcode_name(&self) -> &'static str {
        if self.pred.is_float() {
            "fcmp"
        } else {
            "icmp"
        }
    }

    pub fn execute(&self, lhs: &Value, rhs: &Value) -> Result<Value, InterpError> {
        if let (Value::Vector(xs), Value::Vector(ys)) = (lhs, rhs) {
            if xs.len() != ys.len() {
                return Err(InterpError::InvalidVectorShape {
                    opcode: self.opcode_name().to_string(),
                    expected: xs.len(),
                    found: ys.len(),
                });
            }
            let lane: CompareImpl = match self.spec.dispatch(lhs.key(), || lane_select(self.pred, xs.first())) {
                Some(Path::Specialized(f)) => f,
                Some(Path::Generic) => compare,
                None => return Err(unsupported(self.opcode_name(), &[lhs, rhs])),
            };
            return xs
                .iter()
                .zip(ys)
                .map(|(x, y)| lane(self.pred, x, y).map(Value::I1))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Vector);
        }
        if lhs.key() != rhs.key() {
            return Err(unsupported(self.opcode_name(), &[lhs, rhs]));
        }
        let result = match self.spec.dispatch(lhs.key(), || select(self.pred, lhs.tag())) {
            Some(Path::Specialized(f)) => f(self.pred, lhs, rhs)?,
            Some(Path::Generic) => compare(self.pred, lhs, rhs)?,
            None => return Err(unsupported(self.opcode_name(), &[lhs, rhs])),
        };
        Ok(Value::I1(result))
    }
}

super::impl_specializing!(CompareNode);

fn lane_select(pred: CmpPredicate, first: Option<&Value>) -> Option<CompareImpl> {
    match first {
        Some(lane) => select(pred, lane.tag()),
        None => Some(compare),
    }
}

fn select(pred: CmpPredicate, tag: TypeTag) -> Option<CompareImpl> {
    let f: CompareImpl = match (tag, pred.is_float()) {
        (TypeTag::I32, false) => compare_i32,
        (TypeTag::I64, false) => compare_i64,
        (TypeTag::Pointer, false) => compare_pointer,
        (t, false) if t.is_integer() => compare,
        (TypeTag::Double, true) => compare_f64,
        (t, true) if t.is_float() => compare,
        _ => return None,
    };
    Some(f)
}

fn int_predicate<T: Ord, U: Ord>(pred: CmpPredicate, sx: T, sy: T, ux: U, uy: U) -> Option<bool> {
    Some(match pred {
        CmpPredicate::IEq => ux == uy,
        CmpPredicate::INe => ux != uy,
        CmpPredicate::IUgt => ux > uy,
        CmpPredicate::IUge => ux >= uy,
        CmpPredicate::IUlt => ux < uy,
        CmpPredicate::IUle => ux <= uy,
        CmpPredicate::ISgt => sx > sy,
        CmpPredicate::ISge => sx >= sy,
        CmpPredicate::ISlt => sx < sy,
        CmpPredicate::ISle => sx <= sy,
        _ => return None,
    })
}

fn float_predicate(pred: CmpPredicate, x: f64, y: f64) -> Option<bool> {
    let unordered = x.is_nan() || y.is_nan();
    Some(match pred {
        CmpPredicate::FFalse => false,
        CmpPredicate::FTrue => true,
        CmpPredicate::FOrd => !unordered,
        CmpPredicate::FUno => unordered,
        CmpPredicate::FOeq => !unordered && x == y,
        CmpPredicate::FOgt => !unordered && x > y,
        CmpPredicate::FOge => !unordered && x >= y,
        CmpPredicate::FOlt => !unordered && x < y,
        CmpPredicate::FOle => !unordered && x <= y,
        CmpPredicate::FOne => !unordered && x != y,
        CmpPredicate::FUeq => unordered || x == y,
        CmpPredicate::FUgt => unordered || x > y,
        CmpPredicate::FUge => unordered || x >= y,
        CmpPredicate::FUlt => unordered || x < y,
        CmpPredicate::FUle => unordered || x <= y,
        CmpPredicate::FUne => unordered || x != y,
        _ => return None,
    })
}

fn compare_i32(pred: CmpPredicate, a: &Value, b: &Value) -> Result<bool, InterpError> {
    match (a, b) {
        (Value::I32(x), Value::I32(y)) => int_predicate(pred, *x, *y, *x as u32, *y as u32),
        _ => None,
    }
    .ok_or_else(|| unsupported("icmp", &[a, b]))
}

fn compare_i64(pred: CmpPredicate, a: &Value, b: &Value) -> Result<bool, InterpError> {
    match (a, b) {
        (Value::I64(x), Value::I64(y)) => int_predicate(pred, *x, *y, *x as u64, *y as u64),
        _ => None,
    }
    .ok_or_else(|| unsupported("icmp", &[a, b]))
}

fn compare_pointer(pred: CmpPredicate, a: &Value, b: &Value) -> Result<bool, InterpError> {
    match (a, b) {
        (Value::Pointer(x), Value::Pointer(y)) => int_predicate(pred, *x as i64, *y as i64, *x, *y),
        _ => None,
    }
    .ok_or_else(|| unsupported("icmp", &[a, b]))
}

fn compare_f64(pred: CmpPredicate, a: &Value, b: &Value) -> Result<bool, InterpError> {
    match (a, b) {
        (Value::Double(x), Value::Double(y)) => float_predicate(pred, *x, *y),
        _ => None,
    }
    .ok_or_else(|| unsupported("fcmp", &[a, b]))
}

/// Generic path over every admissible operand combination.
pub fn compare(pred: CmpPredicate, a: &Value, b: &Value) -> Result<bool, InterpError> {
    let opcode = if pred.is_float() { "fcmp" } else { "icmp" };
    let result = if pred.is_float() {
        match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) if a.tag() == b.tag() => float_predicate(pred, x, y),
            _ => None,
        }
    } else {
        match (a.int_bits(), b.int_bits()) {
            (Some((bx, x)), Some((by, y))) if bx == by => {
                int_predicate(pred, sign_extend_128(bx, x), sign_extend_128(by, y), x, y)
            }
            _ => None,
        }
    };
    result.ok_or_else(|| unsupported(opcode, &[a, b]))
}
