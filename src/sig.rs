// (C) 2020 Brandon Lewis
//
// Leaf generators: just enough of an inventory to drive the engine, plus
// the control-rate machinery. Everything here is written against the
// canonical pull loop; the wider DSP library lives elsewhere.

use crate::array::Array;
use crate::broadcast::automap;
use crate::cursor::{BothIn, ZIn, ZRun};
use crate::error::{Error, Result};
use crate::gen::{GenInfo, Generate, Pulled};
use crate::list::List;
use crate::prim::Prim;
use crate::symbol::{sym, Symbol};
use crate::value::{TypeTag, Value};
use crate::vm::Thread;
use rand::Rng;
use std::collections::HashMap;

// The counting stream: 0 1 2 3 ...
struct Ord {
    info: GenInfo,
    next: f64,
}

impl Generate for Ord {
    fn info(&self) -> &GenInfo {
        &self.info
    }

    fn pull(&mut self, _th: &mut Thread) -> Result<Pulled> {
        let block = self.info.block_size;
        let mut out = Vec::with_capacity(block);
        for _ in 0..block {
            out.push(Value::Real(self.next));
            self.next += 1.0;
        }
        Ok(Pulled::Block(Array::from_values(out)))
    }
}

// A finite arithmetic ramp as a signal.
struct Series {
    info: GenInfo,
    remain: i64,
    value: f64,
    step: f64,
}

impl Generate for Series {
    fn info(&self) -> &GenInfo {
        &self.info
    }

    fn pull(&mut self, _th: &mut Thread) -> Result<Pulled> {
        if self.remain <= 0 {
            return Ok(Pulled::End);
        }
        let n = (self.remain as usize).min(self.info.block_size);
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            out.push(self.value);
            self.value += self.step;
        }
        self.remain -= n as i64;
        Ok(Pulled::Block(Array::from_floats(out)))
    }
}

struct SinOsc {
    info: GenInfo,
    freq: ZIn,
    phase: f64,
    radians_per_sample: f64,
}

impl Generate for SinOsc {
    fn info(&self) -> &GenInfo {
        &self.info
    }

    fn pull(&mut self, th: &mut Thread) -> Result<Pulled> {
        let block = self.info.block_size;
        let w = self.radians_per_sample;
        let mut out: Vec<f64> = Vec::with_capacity(block);
        while out.len() < block {
            let want = block - out.len();
            let n = {
                let run = self.freq.next_run(th, want)?;
                if let ZRun::End = run {
                    return Ok(Pulled::Last(Array::from_floats(out)));
                }
                let n = run.len(want);
                for i in 0..n {
                    out.push(self.phase.sin());
                    self.phase += run.at(i) * w;
                }
                n
            };
            self.freq.advance(n);
        }
        Ok(Pulled::Block(Array::from_floats(out)))
    }
}

// Uniform noise in [-1, 1). Draws happen in pull order, which keeps them
// monotonic with sample time.
struct White {
    info: GenInfo,
}

impl Generate for White {
    fn info(&self) -> &GenInfo {
        &self.info
    }

    fn pull(&mut self, th: &mut Thread) -> Result<Pulled> {
        let block = self.info.block_size;
        let mut out = Vec::with_capacity(block);
        for _ in 0..block {
            out.push(th.rng.gen_range(-1.0..1.0));
        }
        Ok(Pulled::Block(Array::from_floats(out)))
    }
}

// Up-samples a control-rate stream by linear interpolation, n output
// frames per input value.
struct K2A {
    info: GenInfo,
    vals: BothIn,
    n: usize,
    remain: usize,
    oldval: f64,
    newval: f64,
    slope: f64,
    once: bool,
}

impl Generate for K2A {
    fn info(&self) -> &GenInfo {
        &self.info
    }

    fn pull(&mut self, th: &mut Thread) -> Result<Pulled> {
        if self.once {
            self.once = false;
            self.oldval = self.vals.onez(th)?.unwrap_or(0.0);
        }
        let block = self.info.block_size;
        let mut out: Vec<f64> = Vec::with_capacity(block);
        while out.len() < block {
            if self.remain == 0 {
                match self.vals.onez(th)? {
                    None => return Ok(Pulled::Last(Array::from_floats(out))),
                    Some(v) => {
                        self.newval = v;
                        self.slope = (self.newval - self.oldval) / self.n as f64;
                        self.remain = self.n;
                    }
                }
            }
            let n = self.remain.min(block - out.len());
            for _ in 0..n {
                out.push(self.oldval);
                self.oldval += self.slope;
            }
            self.remain -= n;
        }
        Ok(Pulled::Block(Array::from_floats(out)))
    }
}

// Cubic flavour of the same, one segment of a Catmull-Rom spline per
// input value.
struct K2AC {
    info: GenInfo,
    vals: BothIn,
    n: usize,
    remain: usize,
    y: [f64; 4],
    c: [f64; 4],
    x: f64,
    dx: f64,
    once: bool,
}

impl Generate for K2AC {
    fn info(&self) -> &GenInfo {
        &self.info
    }

    fn pull(&mut self, th: &mut Thread) -> Result<Pulled> {
        if self.once {
            self.once = false;
            self.y[2] = self.vals.onez(th)?.unwrap_or(0.0);
            self.y[3] = self.vals.onez(th)?.unwrap_or(self.y[2]);
        }
        let block = self.info.block_size;
        let mut out: Vec<f64> = Vec::with_capacity(block);
        while out.len() < block {
            if self.remain == 0 {
                self.x = 0.0;
                self.y[0] = self.y[1];
                self.y[1] = self.y[2];
                self.y[2] = self.y[3];
                match self.vals.onez(th)? {
                    None => return Ok(Pulled::Last(Array::from_floats(out))),
                    Some(v) => self.y[3] = v,
                }
                let [y0, y1, y2, y3] = self.y;
                self.c[0] = y1;
                self.c[1] = 0.5 * (y2 - y0);
                self.c[2] = y0 - 2.5 * y1 + 2.0 * y2 - 0.5 * y3;
                self.c[3] = 1.5 * (y1 - y2) + 0.5 * (y3 - y0);
                self.remain = self.n;
            }
            let n = self.remain.min(block - out.len());
            let [c0, c1, c2, c3] = self.c;
            for _ in 0..n {
                let x = self.x;
                out.push(((c3 * x + c2) * x + c1) * x + c0);
                self.x += self.dx;
            }
            self.remain -= n;
        }
        Ok(Pulled::Block(Array::from_floats(out)))
    }
}

fn ord_(th: &mut Thread, _prim: &Prim) -> Result<()> {
    let list = List::deferred(Box::new(Ord {
        info: GenInfo::stream(th, false),
        next: 0.0,
    }));
    th.push(Value::List(list));
    Ok(())
}

fn series_(th: &mut Thread, _prim: &Prim) -> Result<()> {
    let step = th.pop_float("series : step")?;
    let value = th.pop_float("series : start")?;
    let remain = th.pop_int("series : n")?;
    let list = List::deferred(Box::new(Series {
        info: GenInfo::signal(th, true),
        remain,
        value,
        step,
    }));
    th.push(Value::List(list));
    Ok(())
}

fn white_(th: &mut Thread, _prim: &Prim) -> Result<()> {
    let list = List::deferred(Box::new(White {
        info: GenInfo::signal(th, false),
    }));
    th.push(Value::List(list));
    Ok(())
}

fn sinosc_(th: &mut Thread, _prim: &Prim) -> Result<()> {
    let phase = th.pop_float("sinosc : phase")?;
    let freq = th.pop_zin("sinosc : freq")?;
    let finite = freq.is_finite();
    let list = List::deferred(Box::new(SinOsc {
        info: GenInfo::signal(th, finite),
        freq: ZIn::new(&freq),
        phase,
        radians_per_sample: th.rate.radians_per_sample,
    }));
    th.push(Value::List(list));
    Ok(())
}

fn make_k2a(th: &mut Thread, vals: Value, n: usize) -> Value {
    Value::List(List::deferred(Box::new(K2A {
        info: GenInfo::signal(th, vals.is_finite()),
        vals: BothIn::new(&vals),
        n,
        remain: 0,
        oldval: 0.0,
        newval: 0.0,
        slope: 0.0,
        once: true,
    })))
}

fn k2a_(th: &mut Thread, _prim: &Prim) -> Result<()> {
    let n = th.pop_int("k2a : ratio")?;
    if n < 1 {
        return Err(Error::OutOfRange(n));
    }
    let vals = th.pop_zin_list("k2a : values")?;
    let out = make_k2a(th, vals, n as usize);
    th.push(out);
    Ok(())
}

fn k2ac_(th: &mut Thread, _prim: &Prim) -> Result<()> {
    let n = th.pop_int("k2ac : ratio")?;
    if n < 1 {
        return Err(Error::OutOfRange(n));
    }
    let vals = th.pop_zin_list("k2ac : values")?;
    let list = List::deferred(Box::new(K2AC {
        info: GenInfo::signal(th, vals.is_finite()),
        vals: BothIn::new(&vals),
        n: n as usize,
        remain: 0,
        y: [0.0; 4],
        c: [0.0; 4],
        x: 0.0,
        dx: 1.0 / n as f64,
        once: true,
    }));
    th.push(Value::List(list));
    Ok(())
}

// Evaluate a function under the control rate, then up-sample its result
// back to audio rate.
fn kr_(th: &mut Thread, _prim: &Prim) -> Result<()> {
    let fun = th.pop()?;
    if !fun.is_fun_or_prim() {
        return Err(Error::wrong_type(
            "kr : fun",
            TypeTag::Fun | TypeTag::Prim,
            fun.kind(),
        ));
    }
    let saved = th.rate;
    th.rate = th.ctx.kr;
    let result = th.apply_tuple(&[], &fun);
    th.rate = saved;
    let vals = result?;
    let ratio = th.ctx.settings.control_div.max(1);
    let out = make_k2a(th, vals, ratio);
    th.push(out);
    Ok(())
}

pub fn install(builtins: &mut HashMap<Symbol, Value>) {
    let mut def = |name: &'static str, prim| {
        builtins.insert(sym(name), Value::Prim(prim));
    };
    def("ord", Prim::new("ord", 0, 1, ord_));
    def("series", Prim::new("series", 3, 1, series_));
    def("white", Prim::new("white", 0, 1, white_));
    def("sinosc", automap("sinosc", "zz", sinosc_));
    def("k2a", Prim::new("k2a", 2, 1, k2a_));
    def("k2ac", Prim::new("k2ac", 2, 1, k2ac_));
    def("kr", Prim::new_no_each("kr", 1, 1, kr_));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::tests::test_thread;

    fn drain(th: &mut Thread, v: &Value, max: usize) -> Vec<f64> {
        let list = v.as_list().expect("expected a list").clone();
        let mut out = vec![0.0; max];
        let n = list.fillz(th, &mut out).unwrap();
        out.truncate(n);
        out
    }

    #[test]
    fn test_series() {
        let mut th = test_thread();
        th.push(Value::Real(5.0));
        th.push(Value::Real(10.0));
        th.push(Value::Real(2.0));
        th.ctx.builtin("series").unwrap().apply(&mut th).unwrap();
        let out = th.pop().unwrap();
        assert_eq!(drain(&mut th, &out, 16), vec![10.0, 12.0, 14.0, 16.0, 18.0]);
    }

    #[test]
    fn test_ord_is_lazy_and_counts() {
        let mut th = test_thread();
        th.ctx.builtin("ord").unwrap().apply(&mut th).unwrap();
        let out = th.pop().unwrap();
        assert!(!out.is_finite());
        let list = out.as_list().unwrap().clone();
        let mut buf = [0.0; 10];
        list.fillz(&mut th, &mut buf).unwrap();
        assert_eq!(buf, [0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0]);
    }

    #[test]
    fn test_sinosc_constant_freq() {
        let mut th = test_thread();
        th.push(Value::Real(1.0)); // one cycle per second at sr 8
        th.push(Value::Real(0.0));
        th.ctx.builtin("sinosc").unwrap().apply(&mut th).unwrap();
        let out = th.pop().unwrap();
        let got = drain(&mut th, &out, 8);
        let w = th.rate.radians_per_sample;
        for (i, x) in got.iter().enumerate() {
            assert!((x - (i as f64 * w).sin()).abs() < 1e-9);
        }
    }

    // sinosc is automapped: a stream of frequencies yields a stream of
    // oscillators.
    #[test]
    fn test_sinosc_multichannel() {
        let mut th = test_thread();
        let freqs = Value::List(List::from_array(Array::from_values(vec![
            Value::Real(1.0),
            Value::Real(2.0),
        ])));
        th.push(freqs);
        th.push(Value::Real(0.0));
        th.ctx.builtin("sinosc").unwrap().apply(&mut th).unwrap();
        let out = th.pop().unwrap();
        let list = out.as_list().unwrap().clone();
        list.force(&mut th).unwrap();
        let (array, _) = list.segment().unwrap();
        assert_eq!(array.len(), 2);
        assert!(array.at(0).is_zlist());
        assert!(array.at(1).is_zlist());
    }

    #[test]
    fn test_k2a_linear() {
        let mut th = test_thread();
        let vals = Value::List(List::from_array(Array::from_floats(vec![0.0, 4.0, 8.0])));
        th.push(vals);
        th.push(Value::Real(4.0));
        th.ctx.builtin("k2a").unwrap().apply(&mut th).unwrap();
        let out = th.pop().unwrap();
        assert_eq!(
            drain(&mut th, &out, 16),
            vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]
        );
    }

    // The cubic up-sampler interpolates between the two middle points of
    // its sliding window.
    #[test]
    fn test_k2ac_cubic() {
        let mut th = test_thread();
        let vals = Value::List(List::from_array(Array::from_floats(vec![0.0, 4.0, 8.0])));
        th.push(vals);
        th.push(Value::Real(2.0));
        th.ctx.builtin("k2ac").unwrap().apply(&mut th).unwrap();
        let out = th.pop().unwrap();
        let got = drain(&mut th, &out, 8);
        assert_eq!(got, vec![0.0, 1.75]);
    }

    #[test]
    fn test_kr_runs_at_control_rate() {
        let mut th = test_thread();
        // a control-rate white noise via kr: the result must be at the
        // audio block size and interpolate between control values
        let white = th.ctx.builtin("white").unwrap();
        th.push(white);
        th.ctx.builtin("kr").unwrap().apply(&mut th).unwrap();
        let out = th.pop().unwrap();
        let got = drain(&mut th, &out, 8);
        assert_eq!(got.len(), 8);
        assert_eq!(th.rate.block_size, th.ctx.ar.block_size);
    }

    #[test]
    fn test_white_in_range() {
        let mut th = test_thread();
        th.ctx.builtin("white").unwrap().apply(&mut th).unwrap();
        let out = th.pop().unwrap();
        for x in drain(&mut th, &out, 64) {
            assert!(x >= -1.0 && x < 1.0);
        }
    }
}
