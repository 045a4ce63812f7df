// (C) 2020 Brandon Lewis
//
// The broadcast engine: multichannel expansion lifts scalar words over
// lists of arguments, and the each-operator defers iteration to chosen
// nesting levels. Both produce ordinary stream generators, so broadcast
// results stay lazy and shareable like everything else.

use crate::array::Array;
use crate::cursor::BothIn;
use crate::error::{Error, Result};
use crate::gen::{GenInfo, Generate, Pulled};
use crate::list::List;
use crate::prim::{Prim, PrimFn};
use crate::value::Value;
use crate::vm::Thread;
use crate::Handle;

// Tags a value with a bitmask of nesting levels to iterate when a
// function is applied to it; the least-significant bit is the outermost
// level.
pub struct EachOp {
    pub value: Value,
    pub mask: u64,
}

pub fn each(value: Value, mask: u64) -> Value {
    Value::Each(Handle::new(EachOp { value, mask }))
}

const ALL_Z: &str = "zzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzz";

// Multichannel expansion with every argument mapped over value lists.
pub fn mcx(name: &'static str, takes: usize, f: PrimFn) -> Handle<Prim> {
    let inner = Value::Prim(Prim::new(name, takes, 1, f));
    Prim::wrapped(name, takes, 1, mcx_apply, inner, &ALL_Z[ALL_Z.len() - takes..])
}

// Multichannel expansion with a per-argument mask over {a, z, k}:
// a - as is, the argument is never mapped;
// z - map over value lists, but not float signals;
// k - map over any list, signals included.
pub fn automap(name: &'static str, mask: &'static str, f: PrimFn) -> Handle<Prim> {
    let takes = mask.len();
    let inner = Value::Prim(Prim::new(name, takes, 1, f));
    Prim::wrapped(name, takes, 1, automap_apply, inner, mask)
}

fn mcx_apply(th: &mut Thread, prim: &Prim) -> Result<()> {
    let n = prim.takes;
    let args = th.top_slice(n)?.to_vec();
    let mut mappable = false;
    let mut finite = false;
    for arg in &args {
        if arg.is_vlist() {
            mappable = true;
            if arg.is_finite() {
                finite = true;
            }
        }
    }
    if !mappable {
        return prim.payload.apply(th);
    }
    th.popn(n)?;
    let inputs = args.iter().map(BothIn::new_v).collect();
    let list = List::deferred(Box::new(TupleMapper {
        info: GenInfo::stream(th, finite),
        inputs,
        fun: prim.payload.clone(),
    }));
    th.push(Value::List(list));
    Ok(())
}

fn automap_apply(th: &mut Thread, prim: &Prim) -> Result<()> {
    let n = prim.takes;
    let mask = prim.mask;
    let args = th.top_slice(n)?.to_vec();
    let mut mappable = false;
    let mut finite = false;
    for (arg, letter) in args.iter().zip(mask.bytes()) {
        let maps = match letter {
            b'a' => false,
            b'z' => arg.is_vlist(),
            b'k' => arg.is_list(),
            other => {
                warn!("unrecognized automap mask char '{}'", other as char);
                return Err(Error::failed("unrecognized automap mask"));
            }
        };
        if maps {
            mappable = true;
            if arg.is_finite() {
                finite = true;
            }
        }
    }
    if !mappable {
        return prim.payload.apply(th);
    }
    th.popn(n)?;
    let inputs = args
        .iter()
        .zip(mask.bytes())
        .map(|(arg, letter)| match letter {
            b'a' => BothIn::constant(arg.clone()),
            b'z' => BothIn::new_v(arg),
            _ => BothIn::new(arg),
        })
        .collect();
    let list = List::deferred(Box::new(TupleMapper {
        info: GenInfo::stream(th, finite),
        inputs,
        fun: prim.payload.clone(),
    }));
    th.push(Value::List(list));
    Ok(())
}

// Applies the wrapped word once per tuple of synchronised inputs.
// Exhaustion of any input terminates the result.
struct TupleMapper {
    info: GenInfo,
    inputs: Vec<BothIn>,
    fun: Value,
}

impl Generate for TupleMapper {
    fn info(&self) -> &GenInfo {
        &self.info
    }

    fn pull(&mut self, th: &mut Thread) -> Result<Pulled> {
        let block = self.info.block_size;
        let mut out: Vec<Value> = Vec::with_capacity(block);
        for _ in 0..block {
            let mut tuple = Vec::with_capacity(self.inputs.len());
            for input in &mut self.inputs {
                match input.one(th)? {
                    None => return Ok(Pulled::Last(Array::from_values(out))),
                    Some(v) => tuple.push(v),
                }
            }
            match th.apply_tuple(&tuple, &self.fun) {
                Ok(v) => out.push(v),
                Err(e) => return Ok(Pulled::Fail(Array::from_values(out), e)),
            }
        }
        Ok(Pulled::Block(Array::from_values(out)))
    }
}

#[derive(Clone)]
struct ArgSpec {
    input: BothIn,
    mask: u64,
}

// One nesting level of each-operator iteration. Levels count down; at
// level zero the function is applied to the tuple, above it each
// element either descends one level or is broadcast along.
struct EachMapper {
    info: GenInfo,
    level: u32,
    num_levels: u32,
    args: Vec<ArgSpec>,
    fun: Value,
}

impl Generate for EachMapper {
    fn info(&self) -> &GenInfo {
        &self.info
    }

    fn pull(&mut self, th: &mut Thread) -> Result<Pulled> {
        let block = self.info.block_size;
        let mut out: Vec<Value> = Vec::with_capacity(block);
        if self.level == 0 {
            for _ in 0..block {
                let mut tuple = Vec::with_capacity(self.args.len());
                for spec in &mut self.args {
                    match spec.input.one(th)? {
                        None => return Ok(Pulled::Last(Array::from_values(out))),
                        Some(v) => tuple.push(v),
                    }
                }
                match th.apply_tuple(&tuple, &self.fun) {
                    Ok(v) => out.push(v),
                    Err(e) => return Ok(Pulled::Fail(Array::from_values(out), e)),
                }
            }
            return Ok(Pulled::Block(Array::from_values(out)));
        }

        let bit = 1u64 << (self.num_levels - self.level);
        let mut sub_finite = true;
        for _ in 0..block {
            let mut vals = Vec::with_capacity(self.args.len());
            let mut all_constant = true;
            for spec in &mut self.args {
                match spec.input.one(th)? {
                    None => return Ok(Pulled::Last(Array::from_values(out))),
                    Some(v) => {
                        if v.is_list() && spec.mask & bit != 0 {
                            all_constant = false;
                        }
                        vals.push(v);
                    }
                }
            }
            if all_constant {
                match th.apply_tuple(&vals, &self.fun) {
                    Ok(v) => out.push(v),
                    Err(e) => return Ok(Pulled::Fail(Array::from_values(out), e)),
                }
            } else {
                let subargs = self
                    .args
                    .iter()
                    .zip(vals.iter())
                    .map(|(spec, v)| {
                        let input = if spec.mask & bit != 0 {
                            if v.is_list() && !v.is_finite() {
                                sub_finite = false;
                            }
                            BothIn::new(v)
                        } else {
                            BothIn::constant(v.clone())
                        };
                        ArgSpec {
                            input,
                            mask: spec.mask,
                        }
                    })
                    .collect();
                out.push(Value::List(List::deferred(Box::new(EachMapper {
                    info: GenInfo::stream(th, sub_finite),
                    level: self.level - 1,
                    num_levels: self.num_levels,
                    args: subargs,
                    fun: self.fun.clone(),
                }))));
            }
        }
        Ok(Pulled::Block(Array::from_values(out)))
    }
}

// Called by primitive dispatch when any of the top num_args stack slots
// is an each-op. Consumes the arguments and returns the mapped stream.
pub fn handle_each_ops(th: &mut Thread, num_args: usize, fun: Value) -> Result<Handle<List>> {
    let mut specs: Vec<ArgSpec> = Vec::with_capacity(num_args);
    let mut max_mask = 0u64;
    let mut finite = true;
    for _ in 0..num_args {
        let v = th.pop()?;
        let spec = match &v {
            Value::Each(e) => {
                max_mask |= e.mask;
                if e.mask & 1 != 0 {
                    if !e.value.is_finite() {
                        finite = false;
                    }
                    ArgSpec {
                        input: BothIn::new(&e.value),
                        mask: e.mask,
                    }
                } else {
                    ArgSpec {
                        input: BothIn::constant(e.value.clone()),
                        mask: e.mask,
                    }
                }
            }
            _ => ArgSpec {
                input: BothIn::constant(v.clone()),
                mask: 0,
            },
        };
        specs.push(spec);
    }
    specs.reverse();

    // combined mask must be a contiguous run of low bits
    if max_mask > 1 && max_mask & (max_mask + 1) != 0 {
        return Err(Error::Syntax(format!(
            "there are empty levels of iteration. mask: {:x}",
            max_mask
        )));
    }
    let num_levels = if max_mask <= 1 {
        1
    } else {
        64 - max_mask.leading_zeros()
    };
    Ok(List::deferred(Box::new(EachMapper {
        info: GenInfo::stream(th, finite),
        level: num_levels - 1,
        num_levels,
        args: specs,
        fun,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::tests::test_thread;

    fn vlist(values: &[Value]) -> Value {
        Value::List(List::from_array(Array::from_values(values.to_vec())))
    }

    fn reals(values: &[f64]) -> Value {
        vlist(&values.iter().map(|f| Value::Real(*f)).collect::<Vec<_>>())
    }

    fn drain_v(th: &mut Thread, v: &Value) -> Vec<Value> {
        let mut out = Vec::new();
        let mut cursor = BothIn::new(v);
        while let Some(x) = cursor.one(th).unwrap() {
            out.push(x);
            if out.len() > 64 {
                panic!("runaway list");
            }
        }
        out
    }

    fn hypot_(th: &mut Thread, _prim: &Prim) -> Result<()> {
        let b = th.pop_float("hypot : b")?;
        let a = th.pop_float("hypot : a")?;
        th.push(Value::Real(a.hypot(b)));
        Ok(())
    }

    // On scalars the broadcast call equals the direct call.
    #[test]
    fn test_mcx_scalars_direct() {
        let mut th = test_thread();
        let p = mcx("hypot", 2, hypot_);
        th.push(Value::Real(3.0));
        th.push(Value::Real(4.0));
        Prim::apply(&p, &mut th).unwrap();
        assert_eq!(th.pop().unwrap(), Value::Real(5.0));
    }

    #[test]
    fn test_mcx_maps_lists() {
        let mut th = test_thread();
        let p = mcx("hypot", 2, hypot_);
        th.push(reals(&[3.0, 6.0]));
        th.push(Value::Real(4.0));
        Prim::apply(&p, &mut th).unwrap();
        let out = th.pop().unwrap();
        assert_eq!(
            drain_v(&mut th, &out),
            vec![Value::Real(5.0), Value::Real(6.0f64.hypot(4.0))]
        );
    }

    // A float signal under a z mask broadcasts whole instead of mapping.
    #[test]
    fn test_mcx_signal_broadcasts() {
        let mut th = test_thread();
        fn fst_(th: &mut Thread, _prim: &Prim) -> Result<()> {
            let b = th.pop_value()?;
            let _a = th.pop_value()?;
            th.push(b);
            Ok(())
        }
        let p = mcx("fst", 2, fst_);
        let sig = Value::List(List::from_array(Array::from_floats(vec![1.0, 2.0])));
        th.push(Value::Real(0.0));
        th.push(sig.clone());
        Prim::apply(&p, &mut th).unwrap();
        // no vlist argument anywhere: direct call, signal untouched
        assert_eq!(th.pop().unwrap(), sig);
    }

    // 5 * [1,2,3]@ -> [5,10,15]
    #[test]
    fn test_each_one_level() {
        let mut th = test_thread();
        let mul = th.ctx.builtin("*").unwrap();
        th.push(Value::Real(5.0));
        th.push(each(reals(&[1.0, 2.0, 3.0]), 1));
        mul.apply(&mut th).unwrap();
        let out = th.pop().unwrap();
        assert_eq!(
            drain_v(&mut th, &out),
            vec![Value::Real(5.0), Value::Real(10.0), Value::Real(15.0)]
        );
    }

    // 10 + [[1,2],[3,4]]@@ -> [[11,12],[13,14]]
    #[test]
    fn test_each_two_levels() {
        let mut th = test_thread();
        let add = th.ctx.builtin("+").unwrap();
        let nested = vlist(&[reals(&[1.0, 2.0]), reals(&[3.0, 4.0])]);
        th.push(Value::Real(10.0));
        th.push(each(nested, 3));
        add.apply(&mut th).unwrap();
        let rows = {
            let out = th.pop().unwrap();
            drain_v(&mut th, &out)
        };
        assert_eq!(rows.len(), 2);
        assert_eq!(
            drain_v(&mut th, &rows[0]),
            vec![Value::Real(11.0), Value::Real(12.0)]
        );
        assert_eq!(
            drain_v(&mut th, &rows[1]),
            vec![Value::Real(13.0), Value::Real(14.0)]
        );
    }

    #[test]
    fn test_empty_levels_rejected() {
        let mut th = test_thread();
        let add = th.ctx.builtin("+").unwrap();
        th.push(Value::Real(1.0));
        th.push(each(reals(&[1.0]), 0b10));
        let err = add.apply(&mut th).unwrap_err();
        assert!(matches!(err, Error::Syntax(_)));
    }
}
