// (C) 2020 Brandon Lewis
//
// Arithmetic over values, streams and signals. Operators are plain enums
// dispatched by a match over the operand kinds; lists turn into
// element-wise generators, and the identity elements of the basic
// operators rewrite declaratively at construction instead of running a
// generator at all.

use crate::array::{Array, ElemKind};
use crate::cursor::{VIn, VRun, ZIn, ZRun};
use crate::error::{Error, Result};
use crate::gen::{most_finite, GenInfo, Generate, Pulled};
use crate::list::List;
use crate::prim::Prim;
use crate::symbol::{sym, Symbol};
use crate::value::{TypeTag, Value};
use crate::vm::Thread;
use std::collections::HashMap;

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Unary {
    Neg,
    Abs,
    Sign,
    Floor,
    Ceil,
    Frac,
    Sqrt,
    Sin,
    Cos,
    Tan,
    Exp,
    Log,
    ToZero,
}

impl Unary {
    pub fn op(self, a: f64) -> f64 {
        match self {
            Unary::Neg => -a,
            Unary::Abs => a.abs(),
            Unary::Sign => {
                if a > 0.0 {
                    1.0
                } else if a < 0.0 {
                    -1.0
                } else {
                    0.0
                }
            }
            Unary::Floor => a.floor(),
            Unary::Ceil => a.ceil(),
            Unary::Frac => a - a.floor(),
            Unary::Sqrt => a.sqrt(),
            Unary::Sin => a.sin(),
            Unary::Cos => a.cos(),
            Unary::Tan => a.tan(),
            Unary::Exp => a.exp(),
            Unary::Log => a.ln(),
            Unary::ToZero => 0.0,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Binary {
    Add,
    // like Add, but acts as if the shorter operand were extended with
    // zeroes: the survivor's tail is spliced through unchanged
    AddLink,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Min,
    Max,
    Atan2,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl Binary {
    pub fn op(self, a: f64, b: f64) -> f64 {
        match self {
            Binary::Add | Binary::AddLink => a + b,
            Binary::Sub => a - b,
            Binary::Mul => a * b,
            Binary::Div => a / b,
            Binary::Mod => {
                if b == 0.0 {
                    0.0
                } else {
                    a - b * (a / b).floor()
                }
            }
            Binary::Pow => a.powf(b),
            Binary::Min => a.min(b),
            Binary::Max => a.max(b),
            Binary::Atan2 => a.atan2(b),
            Binary::Lt => bool_z(a < b),
            Binary::Le => bool_z(a <= b),
            Binary::Gt => bool_z(a > b),
            Binary::Ge => bool_z(a >= b),
            Binary::Eq => bool_z(a == b),
            Binary::Ne => bool_z(a != b),
        }
    }

    fn links(self) -> bool {
        matches!(self, Binary::AddLink)
    }
}

fn bool_z(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

pub fn unary_value(th: &mut Thread, op: Unary, a: &Value) -> Result<Value> {
    match a {
        Value::Real(x) => Ok(Value::Real(op.op(*x))),
        Value::List(l) => {
            let finite = l.is_finite();
            Ok(Value::List(match l.kind() {
                ElemKind::V => List::deferred(Box::new(UnaryGen {
                    info: GenInfo::stream(th, finite),
                    op,
                    a: VIn::new(a),
                })),
                ElemKind::Z => List::deferred(Box::new(UnaryZGen {
                    info: GenInfo::signal(th, finite),
                    op,
                    a: ZIn::new(a),
                })),
            }))
        }
        other => Err(Error::wrong_type(
            "unary op",
            TypeTag::Real | TypeTag::List,
            other.kind(),
        )),
    }
}

pub fn binary_value(th: &mut Thread, op: Binary, a: &Value, b: &Value) -> Result<Value> {
    if let (Value::Real(x), Value::Real(y)) = (a, b) {
        return Ok(Value::Real(op.op(*x, *y)));
    }
    if !a.is_list() && !b.is_list() {
        let got = if a.is_real() { b.kind() } else { a.kind() };
        return Err(Error::wrong_type(
            "binary op",
            TypeTag::Real | TypeTag::List,
            got,
        ));
    }
    if let Some(v) = rewrite_identity(th, op, a, b)? {
        return Ok(v);
    }
    // Pure float operands make a signal; a stream of boxed values on
    // either side makes a stream and recurses per element.
    let z_mode = (a.is_real() || a.is_zlist()) && (b.is_real() || b.is_zlist());
    if z_mode {
        let info = GenInfo::signal(th, most_finite(&[a, b]));
        let gen: Box<dyn Generate> = if op.links() {
            Box::new(BinaryLinkZGen {
                info,
                op,
                a: ZIn::new(a),
                b: ZIn::new(b),
            })
        } else {
            Box::new(BinaryZGen {
                info,
                op,
                a: ZIn::new(a),
                b: ZIn::new(b),
            })
        };
        Ok(Value::List(List::deferred(gen)))
    } else if a.is_vlist() || b.is_vlist() {
        let info = GenInfo::stream(th, most_finite(&[a, b]));
        let gen: Box<dyn Generate> = if op.links() {
            Box::new(BinaryLinkGen {
                info,
                op,
                a: VIn::new(a),
                b: VIn::new(b),
            })
        } else {
            Box::new(BinaryGen {
                info,
                op,
                a: VIn::new(a),
                b: VIn::new(b),
            })
        };
        Ok(Value::List(List::deferred(gen)))
    } else {
        let got = if a.is_list() { b.kind() } else { a.kind() };
        Err(Error::wrong_type(
            "binary op",
            TypeTag::Real | TypeTag::List,
            got,
        ))
    }
}

// Identity elements of the basic operators bypass generator
// construction entirely.
fn rewrite_identity(th: &mut Thread, op: Binary, a: &Value, b: &Value) -> Result<Option<Value>> {
    let scalar_a = match a {
        Value::Real(x) => Some(*x),
        _ => None,
    };
    let scalar_b = match b {
        Value::Real(x) => Some(*x),
        _ => None,
    };
    let out = match op {
        Binary::Add | Binary::AddLink => {
            if scalar_a == Some(0.0) {
                Some(b.clone())
            } else if scalar_b == Some(0.0) {
                Some(a.clone())
            } else {
                None
            }
        }
        Binary::Sub => {
            if scalar_b == Some(0.0) {
                Some(a.clone())
            } else if scalar_a == Some(0.0) {
                Some(unary_value(th, Unary::Neg, b)?)
            } else {
                None
            }
        }
        Binary::Mul => {
            if scalar_a == Some(1.0) {
                Some(b.clone())
            } else if scalar_b == Some(1.0) {
                Some(a.clone())
            } else if scalar_a == Some(0.0) {
                Some(unary_value(th, Unary::ToZero, b)?)
            } else if scalar_b == Some(0.0) {
                Some(unary_value(th, Unary::ToZero, a)?)
            } else if scalar_a == Some(-1.0) {
                Some(unary_value(th, Unary::Neg, b)?)
            } else if scalar_b == Some(-1.0) {
                Some(unary_value(th, Unary::Neg, a)?)
            } else {
                None
            }
        }
        _ => None,
    };
    Ok(out)
}

struct UnaryZGen {
    info: GenInfo,
    op: Unary,
    a: ZIn,
}

impl Generate for UnaryZGen {
    fn info(&self) -> &GenInfo {
        &self.info
    }

    fn pull(&mut self, th: &mut Thread) -> Result<Pulled> {
        let block = self.info.block_size;
        let mut out: Vec<f64> = Vec::with_capacity(block);
        while out.len() < block {
            let want = block - out.len();
            let n = {
                let run = self.a.next_run(th, want)?;
                if let ZRun::End = run {
                    return Ok(Pulled::Last(Array::from_floats(out)));
                }
                let n = run.len(want);
                for i in 0..n {
                    out.push(self.op.op(run.at(i)));
                }
                n
            };
            self.a.advance(n);
        }
        Ok(Pulled::Block(Array::from_floats(out)))
    }
}

struct UnaryGen {
    info: GenInfo,
    op: Unary,
    a: VIn,
}

impl Generate for UnaryGen {
    fn info(&self) -> &GenInfo {
        &self.info
    }

    fn pull(&mut self, th: &mut Thread) -> Result<Pulled> {
        let block = self.info.block_size;
        let op = self.op;
        let mut out: Vec<Value> = Vec::with_capacity(block);
        while out.len() < block {
            let want = block - out.len();
            let n = {
                let run = self.a.next_run(th, want)?;
                if let VRun::End = run {
                    return Ok(Pulled::Last(Array::from_values(out)));
                }
                let n = run.len(want);
                for i in 0..n {
                    match unary_value(th, op, &run.at(i)) {
                        Ok(v) => out.push(v),
                        Err(e) => return Ok(Pulled::Fail(Array::from_values(out), e)),
                    }
                }
                n
            };
            self.a.advance(n);
        }
        Ok(Pulled::Block(Array::from_values(out)))
    }
}

struct BinaryZGen {
    info: GenInfo,
    op: Binary,
    a: ZIn,
    b: ZIn,
}

impl Generate for BinaryZGen {
    fn info(&self) -> &GenInfo {
        &self.info
    }

    fn pull(&mut self, th: &mut Thread) -> Result<Pulled> {
        let block = self.info.block_size;
        let op = self.op;
        let mut out: Vec<f64> = Vec::with_capacity(block);
        while out.len() < block {
            let want = block - out.len();
            let n = {
                let ra = self.a.next_run(th, want)?;
                if let ZRun::End = ra {
                    return Ok(Pulled::Last(Array::from_floats(out)));
                }
                let rb = self.b.next_run(th, want)?;
                if let ZRun::End = rb {
                    return Ok(Pulled::Last(Array::from_floats(out)));
                }
                let n = ra.len(want).min(rb.len(want));
                for i in 0..n {
                    out.push(op.op(ra.at(i), rb.at(i)));
                }
                n
            };
            self.a.advance(n);
            self.b.advance(n);
        }
        Ok(Pulled::Block(Array::from_floats(out)))
    }
}

struct BinaryLinkZGen {
    info: GenInfo,
    op: Binary,
    a: ZIn,
    b: ZIn,
}

impl Generate for BinaryLinkZGen {
    fn info(&self) -> &GenInfo {
        &self.info
    }

    fn pull(&mut self, th: &mut Thread) -> Result<Pulled> {
        let block = self.info.block_size;
        let op = self.op;
        let mut out: Vec<f64> = Vec::with_capacity(block);
        while out.len() < block {
            let want = block - out.len();
            let n = {
                let ra = self.a.next_run(th, want)?;
                if let ZRun::End = ra {
                    return match self.b.rest(th)? {
                        Some(tail) => Ok(Pulled::Splice(Array::from_floats(out), tail)),
                        None => Ok(Pulled::Last(Array::from_floats(out))),
                    };
                }
                let rb = self.b.next_run(th, want)?;
                if let ZRun::End = rb {
                    return match self.a.rest(th)? {
                        Some(tail) => Ok(Pulled::Splice(Array::from_floats(out), tail)),
                        None => Ok(Pulled::Last(Array::from_floats(out))),
                    };
                }
                let n = ra.len(want).min(rb.len(want));
                for i in 0..n {
                    out.push(op.op(ra.at(i), rb.at(i)));
                }
                n
            };
            self.a.advance(n);
            self.b.advance(n);
        }
        Ok(Pulled::Block(Array::from_floats(out)))
    }
}

struct BinaryGen {
    info: GenInfo,
    op: Binary,
    a: VIn,
    b: VIn,
}

impl Generate for BinaryGen {
    fn info(&self) -> &GenInfo {
        &self.info
    }

    fn pull(&mut self, th: &mut Thread) -> Result<Pulled> {
        let block = self.info.block_size;
        let op = self.op;
        let mut out: Vec<Value> = Vec::with_capacity(block);
        while out.len() < block {
            let want = block - out.len();
            let n = {
                let ra = self.a.next_run(th, want)?;
                if let VRun::End = ra {
                    return Ok(Pulled::Last(Array::from_values(out)));
                }
                let rb = self.b.next_run(th, want)?;
                if let VRun::End = rb {
                    return Ok(Pulled::Last(Array::from_values(out)));
                }
                let n = ra.len(want).min(rb.len(want));
                for i in 0..n {
                    match binary_value(th, op, &ra.at(i), &rb.at(i)) {
                        Ok(v) => out.push(v),
                        Err(e) => return Ok(Pulled::Fail(Array::from_values(out), e)),
                    }
                }
                n
            };
            self.a.advance(n);
            self.b.advance(n);
        }
        Ok(Pulled::Block(Array::from_values(out)))
    }
}

struct BinaryLinkGen {
    info: GenInfo,
    op: Binary,
    a: VIn,
    b: VIn,
}

impl Generate for BinaryLinkGen {
    fn info(&self) -> &GenInfo {
        &self.info
    }

    fn pull(&mut self, th: &mut Thread) -> Result<Pulled> {
        let block = self.info.block_size;
        let op = self.op;
        let mut out: Vec<Value> = Vec::with_capacity(block);
        while out.len() < block {
            let want = block - out.len();
            let n = {
                let ra = self.a.next_run(th, want)?;
                if let VRun::End = ra {
                    return match self.b.rest(th)? {
                        Some(tail) => Ok(Pulled::Splice(Array::from_values(out), tail)),
                        None => Ok(Pulled::Last(Array::from_values(out))),
                    };
                }
                let rb = self.b.next_run(th, want)?;
                if let VRun::End = rb {
                    return match self.a.rest(th)? {
                        Some(tail) => Ok(Pulled::Splice(Array::from_values(out), tail)),
                        None => Ok(Pulled::Last(Array::from_values(out))),
                    };
                }
                let n = ra.len(want).min(rb.len(want));
                for i in 0..n {
                    match binary_value(th, op, &ra.at(i), &rb.at(i)) {
                        Ok(v) => out.push(v),
                        Err(e) => return Ok(Pulled::Fail(Array::from_values(out), e)),
                    }
                }
                n
            };
            self.a.advance(n);
            self.b.advance(n);
        }
        Ok(Pulled::Block(Array::from_values(out)))
    }
}

// One word per operator, in the teacher's macro style.
macro_rules! binop_prim {
    ($fname:ident, $op:expr) => {
        fn $fname(th: &mut Thread, _prim: &Prim) -> Result<()> {
            let b = th.pop_value()?;
            let a = th.pop_value()?;
            let r = binary_value(th, $op, &a, &b)?;
            th.push(r);
            Ok(())
        }
    };
}

macro_rules! unop_prim {
    ($fname:ident, $op:expr) => {
        fn $fname(th: &mut Thread, _prim: &Prim) -> Result<()> {
            let a = th.pop_value()?;
            let r = unary_value(th, $op, &a)?;
            th.push(r);
            Ok(())
        }
    };
}

binop_prim!(add_, Binary::Add);
binop_prim!(add_link_, Binary::AddLink);
binop_prim!(sub_, Binary::Sub);
binop_prim!(mul_, Binary::Mul);
binop_prim!(div_, Binary::Div);
binop_prim!(mod_, Binary::Mod);
binop_prim!(pow_, Binary::Pow);
binop_prim!(min_, Binary::Min);
binop_prim!(max_, Binary::Max);
binop_prim!(atan2_, Binary::Atan2);
binop_prim!(lt_, Binary::Lt);
binop_prim!(le_, Binary::Le);
binop_prim!(gt_, Binary::Gt);
binop_prim!(ge_, Binary::Ge);
binop_prim!(eq_, Binary::Eq);
binop_prim!(ne_, Binary::Ne);

unop_prim!(neg_, Unary::Neg);
unop_prim!(abs_, Unary::Abs);
unop_prim!(sign_, Unary::Sign);
unop_prim!(floor_, Unary::Floor);
unop_prim!(ceil_, Unary::Ceil);
unop_prim!(frac_, Unary::Frac);
unop_prim!(sqrt_, Unary::Sqrt);
unop_prim!(sin_, Unary::Sin);
unop_prim!(cos_, Unary::Cos);
unop_prim!(tan_, Unary::Tan);
unop_prim!(exp_, Unary::Exp);
unop_prim!(log_, Unary::Log);

pub fn install(builtins: &mut HashMap<Symbol, Value>) {
    let mut def = |name: &'static str, takes: usize, f| {
        builtins.insert(sym(name), Value::Prim(Prim::new(name, takes, 1, f)));
    };
    def("+", 2, add_);
    def("+>", 2, add_link_);
    def("-", 2, sub_);
    def("*", 2, mul_);
    def("/", 2, div_);
    def("%", 2, mod_);
    def("^", 2, pow_);
    def("min", 2, min_);
    def("max", 2, max_);
    def("atan2", 2, atan2_);
    def("<", 2, lt_);
    def("<=", 2, le_);
    def(">", 2, gt_);
    def(">=", 2, ge_);
    def("==", 2, eq_);
    def("!=", 2, ne_);
    def("neg", 1, neg_);
    def("abs", 1, abs_);
    def("sign", 1, sign_);
    def("floor", 1, floor_);
    def("ceil", 1, ceil_);
    def("frac", 1, frac_);
    def("sqrt", 1, sqrt_);
    def("sin", 1, sin_);
    def("cos", 1, cos_);
    def("tan", 1, tan_);
    def("exp", 1, exp_);
    def("log", 1, log_);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::tests::test_thread;
    use crate::Handle;

    fn zlist(values: &[f64]) -> Value {
        Value::List(List::from_array(Array::from_floats(values.to_vec())))
    }

    fn drain(th: &mut Thread, v: &Value) -> Vec<f64> {
        let list = v.as_list().expect("expected a list").clone();
        let mut out = vec![0.0; 64];
        let n = list.fillz(th, &mut out).unwrap();
        out.truncate(n);
        out
    }

    #[test]
    fn test_scalar_ops() {
        let mut th = test_thread();
        let r = binary_value(&mut th, Binary::Add, &Value::Real(3.0), &Value::Real(4.0)).unwrap();
        assert_eq!(r, Value::Real(7.0));
        let r = unary_value(&mut th, Unary::Neg, &Value::Real(2.0)).unwrap();
        assert_eq!(r, Value::Real(-2.0));
    }

    #[test]
    fn test_signal_plus_scalar() {
        let mut th = test_thread();
        let a = zlist(&[1.0, 2.0, 3.0]);
        let r = binary_value(&mut th, Binary::Add, &a, &Value::Real(10.0)).unwrap();
        assert_eq!(drain(&mut th, &r), vec![11.0, 12.0, 13.0]);
    }

    #[test]
    fn test_terminates_at_shortest() {
        let mut th = test_thread();
        let a = zlist(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let b = zlist(&[1.0, 1.0]);
        let r = binary_value(&mut th, Binary::Add, &a, &b).unwrap();
        assert_eq!(drain(&mut th, &r), vec![2.0, 3.0]);
    }

    // Identity elements hand the operand back untouched.
    #[test]
    fn test_identity_rewrites() {
        let mut th = test_thread();
        let a = zlist(&[1.0, 2.0, 3.0]);
        let al = a.as_list().unwrap();
        for r in &[
            binary_value(&mut th, Binary::Add, &a, &Value::Real(0.0)).unwrap(),
            binary_value(&mut th, Binary::Add, &Value::Real(0.0), &a).unwrap(),
            binary_value(&mut th, Binary::Sub, &a, &Value::Real(0.0)).unwrap(),
            binary_value(&mut th, Binary::Mul, &a, &Value::Real(1.0)).unwrap(),
            binary_value(&mut th, Binary::Mul, &Value::Real(1.0), &a).unwrap(),
        ] {
            assert!(Handle::ptr_eq(r.as_list().unwrap(), al));
        }
        let z = binary_value(&mut th, Binary::Mul, &a, &Value::Real(0.0)).unwrap();
        assert_eq!(drain(&mut th, &z), vec![0.0, 0.0, 0.0]);
        let n = binary_value(&mut th, Binary::Sub, &Value::Real(0.0), &a).unwrap();
        assert_eq!(drain(&mut th, &n), vec![-1.0, -2.0, -3.0]);
    }

    // The link-add extends the shorter operand with zeroes by splicing
    // the longer one's tail through.
    #[test]
    fn test_link_add_extends() {
        let mut th = test_thread();
        let a = zlist(&[1.0, 2.0]);
        let b = zlist(&[10.0, 20.0, 30.0, 40.0, 50.0]);
        let r = binary_value(&mut th, Binary::AddLink, &a, &b).unwrap();
        assert_eq!(drain(&mut th, &r), vec![11.0, 22.0, 30.0, 40.0, 50.0]);
        let r = binary_value(&mut th, Binary::AddLink, &b, &a).unwrap();
        assert_eq!(drain(&mut th, &r), vec![11.0, 22.0, 30.0, 40.0, 50.0]);
    }

    // [1,2,3] + 10 as a stream of boxed values.
    #[test]
    fn test_stream_plus_scalar() {
        let mut th = test_thread();
        let a = Value::List(List::from_array(Array::from_values(vec![
            Value::Real(1.0),
            Value::Real(2.0),
            Value::Real(3.0),
        ])));
        let r = binary_value(&mut th, Binary::Add, &a, &Value::Real(10.0)).unwrap();
        assert_eq!(drain(&mut th, &r), vec![11.0, 12.0, 13.0]);
    }

    // A stream element that is itself a signal recurses: the result is a
    // stream of signals.
    #[test]
    fn test_nested_broadcast() {
        let mut th = test_thread();
        let inner = zlist(&[1.0, 2.0]);
        let a = Value::List(List::from_array(Array::from_values(vec![
            inner,
            Value::Real(5.0),
        ])));
        let r = binary_value(&mut th, Binary::Add, &a, &Value::Real(10.0)).unwrap();
        let list = r.as_list().unwrap().clone();
        list.force(&mut th).unwrap();
        let (array, _) = list.segment().unwrap();
        assert_eq!(drain(&mut th, &array.at(0)), vec![11.0, 12.0]);
        assert_eq!(array.at(1), Value::Real(15.0));
    }

    #[test]
    fn test_comparison_ops() {
        let mut th = test_thread();
        let a = zlist(&[1.0, 5.0, 3.0]);
        let r = binary_value(&mut th, Binary::Gt, &a, &Value::Real(2.0)).unwrap();
        assert_eq!(drain(&mut th, &r), vec![0.0, 1.0, 1.0]);
    }

    #[test]
    fn test_wrong_type() {
        let mut th = test_thread();
        let err =
            binary_value(&mut th, Binary::Add, &Value::string("x"), &Value::Real(1.0)).unwrap_err();
        assert!(matches!(err, Error::WrongType { .. }));
    }
}
