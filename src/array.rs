// (C) 2020 Brandon Lewis
//
// Contiguous homogeneous segments. A segment holds either boxed values
// (streams) or raw floats (signals); the two never mix within one array.
// Segments are built by exactly one generator and immutable once a list
// exposes them.

use crate::error::{Error, Result};
use crate::value::{TypeTag, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ElemKind {
    V,
    Z,
}

#[derive(Clone, Debug)]
enum Cells {
    V(Vec<Value>),
    Z(Vec<f64>),
}

#[derive(Clone, Debug)]
pub struct Array {
    cells: Cells,
}

impl Array {
    pub fn new(kind: ElemKind, cap: usize) -> Array {
        Array {
            cells: match kind {
                ElemKind::V => Cells::V(Vec::with_capacity(cap)),
                ElemKind::Z => Cells::Z(Vec::with_capacity(cap)),
            },
        }
    }

    pub fn empty(kind: ElemKind) -> Array {
        Array::new(kind, 0)
    }

    pub fn from_values(values: Vec<Value>) -> Array {
        Array {
            cells: Cells::V(values),
        }
    }

    pub fn from_floats(floats: Vec<f64>) -> Array {
        Array {
            cells: Cells::Z(floats),
        }
    }

    pub fn kind(&self) -> ElemKind {
        match self.cells {
            Cells::V(_) => ElemKind::V,
            Cells::Z(_) => ElemKind::Z,
        }
    }

    pub fn len(&self) -> usize {
        match &self.cells {
            Cells::V(v) => v.len(),
            Cells::Z(z) => z.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn v(&self) -> &[Value] {
        match &self.cells {
            Cells::V(v) => v,
            Cells::Z(_) => &[],
        }
    }

    pub fn z(&self) -> &[f64] {
        match &self.cells {
            Cells::Z(z) => z,
            Cells::V(_) => &[],
        }
    }

    // Element read with the float <-> value coercion applied.
    pub fn at(&self, i: usize) -> Value {
        match &self.cells {
            Cells::V(v) => v[i].clone(),
            Cells::Z(z) => Value::Real(z[i]),
        }
    }

    pub fn atz(&self, i: usize) -> f64 {
        match &self.cells {
            Cells::V(v) => v[i].as_float(),
            Cells::Z(z) => z[i],
        }
    }

    pub fn add(&mut self, item: Value) -> Result<()> {
        match &mut self.cells {
            Cells::V(v) => v.push(item),
            Cells::Z(z) => match item {
                Value::Real(f) => z.push(f),
                other => {
                    return Err(Error::wrong_type(
                        "array add",
                        TypeTag::Real.into(),
                        other.kind(),
                    ))
                }
            },
        }
        Ok(())
    }

    pub fn addz(&mut self, item: f64) {
        match &mut self.cells {
            Cells::V(v) => v.push(Value::Real(item)),
            Cells::Z(z) => z.push(item),
        }
    }

    pub fn add_all(&mut self, other: &Array) -> Result<()> {
        match &mut self.cells {
            Cells::V(v) => match &other.cells {
                Cells::V(w) => v.extend_from_slice(w),
                Cells::Z(z) => v.extend(z.iter().map(|f| Value::Real(*f))),
            },
            Cells::Z(z) => match &other.cells {
                Cells::Z(w) => z.extend_from_slice(w),
                Cells::V(v) => {
                    for item in v {
                        match item {
                            Value::Real(f) => z.push(*f),
                            other => {
                                return Err(Error::wrong_type(
                                    "array add",
                                    TypeTag::Real.into(),
                                    other.kind(),
                                ))
                            }
                        }
                    }
                }
            },
        }
        Ok(())
    }

    pub fn put(&mut self, i: usize, item: Value) -> Result<()> {
        if i >= self.len() {
            return Err(Error::OutOfRange(i as i64));
        }
        match &mut self.cells {
            Cells::V(v) => v[i] = item,
            Cells::Z(z) => match item {
                Value::Real(f) => z[i] = f,
                other => {
                    return Err(Error::wrong_type(
                        "array put",
                        TypeTag::Real.into(),
                        other.kind(),
                    ))
                }
            },
        }
        Ok(())
    }

    pub fn truncate(&mut self, len: usize) {
        match &mut self.cells {
            Cells::V(v) => v.truncate(len),
            Cells::Z(z) => z.truncate(len),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coercion() {
        let mut a = Array::new(ElemKind::Z, 4);
        a.addz(1.0);
        a.add(Value::Real(2.0)).unwrap();
        assert_eq!(a.z(), &[1.0, 2.0]);
        assert_eq!(a.at(0), Value::Real(1.0));

        let mut b = Array::new(ElemKind::V, 4);
        b.addz(3.0);
        assert_eq!(b.v()[0], Value::Real(3.0));
        assert_eq!(b.atz(0), 3.0);
    }

    #[test]
    fn test_kind_mismatch() {
        let mut a = Array::new(ElemKind::Z, 1);
        let err = a.add(Value::string("nope")).unwrap_err();
        assert!(matches!(err, Error::WrongType { .. }));
    }

    #[test]
    fn test_put_bounds() {
        let mut a = Array::from_floats(vec![0.0; 2]);
        a.put(1, Value::Real(5.0)).unwrap();
        assert_eq!(a.z(), &[0.0, 5.0]);
        assert_eq!(a.put(2, Value::Real(1.0)), Err(Error::OutOfRange(2)));
    }
}
