// (C) 2020 Brandon Lewis
//
// Forward-only input cursors. A cursor is either a position inside a list
// or a scalar broadcast as an infinite stride-0 stream. Generators
// negotiate block runs through them: a run is at most the remainder of
// the current segment, never the whole request, and the generator
// advances by exactly what it consumed.

use crate::array::{Array, ElemKind};
use crate::error::{Error, Result};
use crate::gen::{GenInfo, Generate, Pulled};
use crate::list::List;
use crate::value::Value;
use crate::vm::Thread;
use crate::Handle;

// One contiguous run from a cursor: a broadcast constant, a borrowed
// slice, or exhaustion.
pub enum VRun<'a> {
    Const(&'a Value),
    Slice(&'a [Value]),
    End,
}

impl<'a> VRun<'a> {
    pub fn len(&self, want: usize) -> usize {
        match self {
            VRun::Const(_) => want,
            VRun::Slice(s) => s.len(),
            VRun::End => 0,
        }
    }

    pub fn at(&self, i: usize) -> Value {
        match self {
            VRun::Const(v) => (*v).clone(),
            VRun::Slice(s) => s[i].clone(),
            VRun::End => Value::Real(0.0),
        }
    }
}

pub enum ZRun<'a> {
    Const(f64),
    Slice(&'a [f64]),
    End,
}

impl<'a> ZRun<'a> {
    pub fn len(&self, want: usize) -> usize {
        match self {
            ZRun::Const(_) => want,
            ZRun::Slice(s) => s.len(),
            ZRun::End => 0,
        }
    }

    pub fn at(&self, i: usize) -> f64 {
        match self {
            ZRun::Const(c) => *c,
            ZRun::Slice(s) => s[i],
            ZRun::End => 0.0,
        }
    }
}

// Cursor over a stream of boxed values. Float-typed lists broadcast as a
// single constant here; mapping over signals is the k-mask cursor's job.
#[derive(Clone)]
pub struct VIn {
    list: Option<Handle<List>>,
    offset: usize,
    constant: Value,
    is_constant: bool,
    done: bool,
    held: Handle<Array>,
}

impl VIn {
    pub fn new(value: &Value) -> VIn {
        match value {
            Value::List(l) if l.kind() == ElemKind::V => VIn {
                list: Some(l.clone()),
                offset: 0,
                constant: Value::Real(0.0),
                is_constant: false,
                done: false,
                held: Handle::new(Array::empty(ElemKind::V)),
            },
            other => VIn::constant(other.clone()),
        }
    }

    pub fn constant(value: Value) -> VIn {
        VIn {
            list: None,
            offset: 0,
            constant: value,
            is_constant: true,
            done: false,
            held: Handle::new(Array::empty(ElemKind::V)),
        }
    }

    pub fn is_constant(&self) -> bool {
        self.is_constant
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn next_run(&mut self, th: &mut Thread, want: usize) -> Result<VRun> {
        if self.is_constant {
            return Ok(VRun::Const(&self.constant));
        }
        loop {
            let list = match &self.list {
                Some(l) => l.clone(),
                None => break,
            };
            list.force(th)?;
            let (array, next) = match list.segment() {
                Some(seg) => seg,
                None => return Err(Error::Internal("list did not resolve")),
            };
            let avail = array.len() - self.offset;
            if avail > 0 {
                let n = avail.min(want);
                let off = self.offset;
                self.held = array;
                return Ok(VRun::Slice(&self.held.v()[off..off + n]));
            }
            match next {
                Some(l) => {
                    self.list = Some(l);
                    self.offset = 0;
                }
                None => break,
            }
        }
        self.done = true;
        Ok(VRun::End)
    }

    pub fn advance(&mut self, n: usize) {
        if let Some(list) = &self.list {
            self.offset += n;
            if let Some((array, next)) = list.segment() {
                if self.offset >= array.len() {
                    self.offset = 0;
                    self.list = next;
                }
            }
        }
    }

    pub fn one(&mut self, th: &mut Thread) -> Result<Option<Value>> {
        if self.is_constant {
            return Ok(Some(self.constant.clone()));
        }
        let v = match self.next_run(th, 1)? {
            VRun::End => return Ok(None),
            run => run.at(0),
        };
        self.advance(1);
        Ok(Some(v))
    }

    // Hand the unconsumed remainder over as a list, copying at most the
    // partially-read head segment. This is the splice side of the link
    // optimisation. None means the cursor was a constant or exhausted.
    pub fn rest(&mut self, th: &mut Thread) -> Result<Option<Handle<List>>> {
        if self.is_constant {
            return Ok(None);
        }
        loop {
            let list = match self.list.take() {
                Some(l) => l,
                None => {
                    self.done = true;
                    return Ok(None);
                }
            };
            list.force(th)?;
            let (array, next) = match list.segment() {
                Some(seg) => seg,
                None => return Err(Error::Internal("list did not resolve")),
            };
            if self.offset == 0 {
                self.done = true;
                return Ok(Some(list));
            }
            if self.offset < array.len() {
                let tail = Array::from_values(array.v()[self.offset..].to_vec());
                self.done = true;
                return Ok(Some(List::from_array_next(tail, next)));
            }
            self.offset = 0;
            self.list = next;
        }
    }
}

// Cursor over a signal of floats. Scalars broadcast at stride 0; lists of
// boxed values are accepted and coerced element-wise.
#[derive(Clone)]
pub struct ZIn {
    list: Option<Handle<List>>,
    offset: usize,
    constant: f64,
    is_constant: bool,
    done: bool,
    held: Handle<Array>,
    scratch: Vec<f64>,
}

impl ZIn {
    pub fn new(value: &Value) -> ZIn {
        match value {
            Value::List(l) => ZIn {
                list: Some(l.clone()),
                offset: 0,
                constant: 0.0,
                is_constant: false,
                done: false,
                held: Handle::new(Array::empty(ElemKind::Z)),
                scratch: Vec::new(),
            },
            other => ZIn::constant(other.as_float()),
        }
    }

    pub fn constant(value: f64) -> ZIn {
        ZIn {
            list: None,
            offset: 0,
            constant: value,
            is_constant: true,
            done: false,
            held: Handle::new(Array::empty(ElemKind::Z)),
            scratch: Vec::new(),
        }
    }

    pub fn is_constant(&self) -> bool {
        self.is_constant
    }

    pub fn constant_value(&self) -> Option<f64> {
        if self.is_constant {
            Some(self.constant)
        } else {
            None
        }
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn next_run(&mut self, th: &mut Thread, want: usize) -> Result<ZRun> {
        if self.is_constant {
            return Ok(ZRun::Const(self.constant));
        }
        loop {
            let list = match &self.list {
                Some(l) => l.clone(),
                None => break,
            };
            list.force(th)?;
            let (array, next) = match list.segment() {
                Some(seg) => seg,
                None => return Err(Error::Internal("list did not resolve")),
            };
            let avail = array.len() - self.offset;
            if avail > 0 {
                let n = avail.min(want);
                let off = self.offset;
                self.held = array;
                return Ok(match self.held.kind() {
                    ElemKind::Z => ZRun::Slice(&self.held.z()[off..off + n]),
                    ElemKind::V => {
                        self.scratch.clear();
                        self.scratch
                            .extend(self.held.v()[off..off + n].iter().map(|v| v.as_float()));
                        ZRun::Slice(&self.scratch[..])
                    }
                });
            }
            match next {
                Some(l) => {
                    self.list = Some(l);
                    self.offset = 0;
                }
                None => break,
            }
        }
        self.done = true;
        Ok(ZRun::End)
    }

    pub fn advance(&mut self, n: usize) {
        if let Some(list) = &self.list {
            self.offset += n;
            if let Some((array, next)) = list.segment() {
                if self.offset >= array.len() {
                    self.offset = 0;
                    self.list = next;
                }
            }
        }
    }

    pub fn onez(&mut self, th: &mut Thread) -> Result<Option<f64>> {
        if self.is_constant {
            return Ok(Some(self.constant));
        }
        let z = match self.next_run(th, 1)? {
            ZRun::End => return Ok(None),
            run => run.at(0),
        };
        self.advance(1);
        Ok(Some(z))
    }

    // Read the head without advancing.
    pub fn peek(&mut self, th: &mut Thread) -> Result<Option<f64>> {
        if self.is_constant {
            return Ok(Some(self.constant));
        }
        Ok(match self.next_run(th, 1)? {
            ZRun::End => None,
            run => Some(run.at(0)),
        })
    }

    // Bulk materialise n frames at the given output stride. The
    // unwritten remainder is zeroed on exhaustion. Returns how many
    // frames were actually written and whether the source ended.
    pub fn fill(
        &mut self,
        th: &mut Thread,
        n: usize,
        out: &mut [f64],
        stride: usize,
    ) -> Result<(usize, bool)> {
        let mut filled = 0;
        while filled < n {
            let want = n - filled;
            let m = match self.next_run(th, want)? {
                ZRun::End => {
                    for i in filled..n {
                        out[i * stride] = 0.0;
                    }
                    return Ok((filled, true));
                }
                run => {
                    let m = run.len(want);
                    for i in 0..m {
                        out[(filled + i) * stride] = run.at(i);
                    }
                    m
                }
            };
            self.advance(m);
            filled += m;
        }
        Ok((filled, false))
    }

    // Same contract for device-format buffers.
    pub fn fill_f32(
        &mut self,
        th: &mut Thread,
        n: usize,
        out: &mut [f32],
        stride: usize,
    ) -> Result<(usize, bool)> {
        let mut filled = 0;
        while filled < n {
            let want = n - filled;
            let m = match self.next_run(th, want)? {
                ZRun::End => {
                    for i in filled..n {
                        out[i * stride] = 0.0;
                    }
                    return Ok((filled, true));
                }
                run => {
                    let m = run.len(want);
                    for i in 0..m {
                        out[(filled + i) * stride] = run.at(i) as f32;
                    }
                    m
                }
            };
            self.advance(m);
            filled += m;
        }
        Ok((filled, false))
    }

    // Bulk add-into accumulator.
    pub fn mix(&mut self, th: &mut Thread, out: &mut [f64]) -> Result<(usize, bool)> {
        let mut filled = 0;
        let n = out.len();
        while filled < n {
            let want = n - filled;
            let m = match self.next_run(th, want)? {
                ZRun::End => return Ok((filled, true)),
                run => {
                    let m = run.len(want);
                    for i in 0..m {
                        out[filled + i] += run.at(i);
                    }
                    m
                }
            };
            self.advance(m);
            filled += m;
        }
        Ok((filled, false))
    }

    // Advance without materialising.
    pub fn hop(&mut self, th: &mut Thread, frames: usize) -> Result<()> {
        if self.is_constant {
            return Ok(());
        }
        let mut n = frames;
        while n > 0 {
            let m = match self.next_run(th, n)? {
                ZRun::End => return Ok(()),
                run => run.len(n),
            };
            self.advance(m);
            n -= m;
        }
        Ok(())
    }

    // As VIn::rest. A remainder of boxed values cannot be spliced into a
    // float chain structurally, so it is re-emitted through a coercing
    // generator instead.
    pub fn rest(&mut self, th: &mut Thread) -> Result<Option<Handle<List>>> {
        if self.is_constant {
            return Ok(None);
        }
        loop {
            let list = match self.list.take() {
                Some(l) => l,
                None => {
                    self.done = true;
                    return Ok(None);
                }
            };
            list.force(th)?;
            let (array, next) = match list.segment() {
                Some(seg) => seg,
                None => return Err(Error::Internal("list did not resolve")),
            };
            if list.kind() == ElemKind::V {
                let finite = list.is_finite();
                let mut remainder = self.clone();
                remainder.list = Some(list);
                self.done = true;
                return Ok(Some(List::deferred(Box::new(CoerceZGen {
                    info: GenInfo::signal(th, finite),
                    a: remainder,
                }))));
            }
            if self.offset == 0 {
                self.done = true;
                return Ok(Some(list));
            }
            if self.offset < array.len() {
                let tail = Array::from_floats(array.z()[self.offset..].to_vec());
                self.done = true;
                return Ok(Some(List::from_array_next(tail, next)));
            }
            self.offset = 0;
            self.list = next;
        }
    }
}

// Re-emits the remainder of a float cursor as a proper float list.
struct CoerceZGen {
    info: GenInfo,
    a: ZIn,
}

impl Generate for CoerceZGen {
    fn info(&self) -> &GenInfo {
        &self.info
    }

    fn pull(&mut self, th: &mut Thread) -> Result<Pulled> {
        let block = self.info.block_size;
        let mut out = vec![0.0; block];
        let (n, ended) = self.a.fill(th, block, &mut out, 1)?;
        out.truncate(n);
        if ended {
            Ok(Pulled::Last(Array::from_floats(out)))
        } else {
            Ok(Pulled::Block(Array::from_floats(out)))
        }
    }
}

// Polymorphic cursor: iterates lists of either element kind and converts
// per element. The broadcast engine builds its argument cursors out of
// these, choosing per mask letter whether a list iterates at all.
#[derive(Clone)]
pub struct BothIn {
    list: Option<Handle<List>>,
    offset: usize,
    constant: Value,
    is_constant: bool,
    done: bool,
}

impl BothIn {
    // Iterate any list; broadcast anything else.
    pub fn new(value: &Value) -> BothIn {
        match value {
            Value::List(l) => BothIn {
                list: Some(l.clone()),
                offset: 0,
                constant: Value::Real(0.0),
                is_constant: false,
                done: false,
            },
            other => BothIn::constant(other.clone()),
        }
    }

    // Iterate value lists only; float signals broadcast whole.
    pub fn new_v(value: &Value) -> BothIn {
        if value.is_vlist() {
            BothIn::new(value)
        } else {
            BothIn::constant(value.clone())
        }
    }

    pub fn constant(value: Value) -> BothIn {
        BothIn {
            list: None,
            offset: 0,
            constant: value,
            is_constant: true,
            done: false,
        }
    }

    pub fn is_constant(&self) -> bool {
        self.is_constant
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    fn step(&mut self, th: &mut Thread) -> Result<Option<Handle<Array>>> {
        loop {
            let list = match &self.list {
                Some(l) => l.clone(),
                None => {
                    self.done = true;
                    return Ok(None);
                }
            };
            list.force(th)?;
            let (array, next) = match list.segment() {
                Some(seg) => seg,
                None => return Err(Error::Internal("list did not resolve")),
            };
            if self.offset < array.len() {
                return Ok(Some(array));
            }
            self.offset = 0;
            self.list = next;
        }
    }

    pub fn one(&mut self, th: &mut Thread) -> Result<Option<Value>> {
        if self.is_constant {
            return Ok(Some(self.constant.clone()));
        }
        match self.step(th)? {
            None => Ok(None),
            Some(array) => {
                let v = array.at(self.offset);
                self.offset += 1;
                Ok(Some(v))
            }
        }
    }

    pub fn onez(&mut self, th: &mut Thread) -> Result<Option<f64>> {
        if self.is_constant {
            return Ok(Some(self.constant.as_float()));
        }
        match self.step(th)? {
            None => Ok(None),
            Some(array) => {
                let z = array.atz(self.offset);
                self.offset += 1;
                Ok(Some(z))
            }
        }
    }

    pub fn onei(&mut self, th: &mut Thread) -> Result<Option<i64>> {
        Ok(self.onez(th)?.map(|z| z.floor() as i64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::tests::test_thread;

    fn zlist(values: &[f64]) -> Value {
        Value::List(List::from_array(Array::from_floats(values.to_vec())))
    }

    // Two segments of four, consumed through the run interface: the
    // contiguous output equals the input.
    #[test]
    fn test_two_block_consume() {
        let mut th = test_thread();
        let head = List::from_array_next(
            Array::from_floats(vec![0.0, 1.0, 2.0, 3.0]),
            Some(List::from_array(Array::from_floats(vec![
                4.0, 5.0, 6.0, 7.0,
            ]))),
        );
        let mut zin = ZIn::new(&Value::List(head));
        let mut out = [9.0; 8];
        let (n, ended) = zin.fill(&mut th, 8, &mut out, 1).unwrap();
        assert_eq!(n, 8);
        assert!(!ended);
        assert_eq!(out, [0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);
        let (n, ended) = zin.fill(&mut th, 4, &mut out[0..4], 1).unwrap();
        assert_eq!(n, 0);
        assert!(ended);
        assert!(out[0..4].iter().all(|&x| x == 0.0));
    }

    // Scalar broadcast: every consumed element is the scalar and the
    // cursor never reports done.
    #[test]
    fn test_scalar_broadcast_identity() {
        let mut th = test_thread();
        let mut zin = ZIn::new(&Value::Real(2.5));
        for _ in 0..1000 {
            assert_eq!(zin.onez(&mut th).unwrap(), Some(2.5));
        }
        assert!(!zin.is_done());

        let mut vin = VIn::new(&Value::Real(7.0));
        for _ in 0..100 {
            assert_eq!(vin.one(&mut th).unwrap(), Some(Value::Real(7.0)));
        }
        assert!(!vin.is_done());
    }

    #[test]
    fn test_mix_accumulates() {
        let mut th = test_thread();
        let mut a = ZIn::new(&zlist(&[1.0, 1.0, 1.0]));
        let mut out = [1.0, 2.0, 3.0, 4.0];
        let (n, ended) = a.mix(&mut th, &mut out).unwrap();
        assert_eq!(n, 3);
        assert!(ended);
        assert_eq!(out, [2.0, 3.0, 4.0, 4.0]);
    }

    #[test]
    fn test_fill_strided() {
        let mut th = test_thread();
        let mut a = ZIn::new(&zlist(&[1.0, 2.0]));
        let mut out = [0.0; 4];
        let (n, ended) = a.fill(&mut th, 2, &mut out, 2).unwrap();
        assert_eq!(n, 2);
        assert!(!ended);
        assert_eq!(out, [1.0, 0.0, 2.0, 0.0]);
    }

    #[test]
    fn test_hop_skips() {
        let mut th = test_thread();
        let mut a = ZIn::new(&zlist(&[0.0, 1.0, 2.0, 3.0, 4.0]));
        a.hop(&mut th, 3).unwrap();
        assert_eq!(a.onez(&mut th).unwrap(), Some(3.0));
    }

    #[test]
    fn test_peek_does_not_advance() {
        let mut th = test_thread();
        let mut a = ZIn::new(&zlist(&[8.0, 9.0]));
        assert_eq!(a.peek(&mut th).unwrap(), Some(8.0));
        assert_eq!(a.peek(&mut th).unwrap(), Some(8.0));
        assert_eq!(a.onez(&mut th).unwrap(), Some(8.0));
        assert_eq!(a.onez(&mut th).unwrap(), Some(9.0));
        assert_eq!(a.peek(&mut th).unwrap(), None);
    }

    #[test]
    fn test_coercing_cursor() {
        let mut th = test_thread();
        let vlist = Value::List(List::from_array(Array::from_values(vec![
            Value::Real(1.0),
            Value::Real(2.0),
        ])));
        let mut zin = ZIn::new(&vlist);
        assert_eq!(zin.onez(&mut th).unwrap(), Some(1.0));
        assert_eq!(zin.onez(&mut th).unwrap(), Some(2.0));
        assert_eq!(zin.onez(&mut th).unwrap(), None);
    }

    #[test]
    fn test_both_iterates_either_kind() {
        let mut th = test_thread();
        let mut b = BothIn::new(&zlist(&[5.0, 6.0]));
        assert_eq!(b.one(&mut th).unwrap(), Some(Value::Real(5.0)));
        assert_eq!(b.onez(&mut th).unwrap(), Some(6.0));
        assert_eq!(b.one(&mut th).unwrap(), None);
        assert!(b.is_done());

        // the z-mask flavour broadcasts a signal whole
        let sig = zlist(&[1.0, 2.0]);
        let mut b = BothIn::new_v(&sig);
        assert!(b.is_constant());
        assert_eq!(b.one(&mut th).unwrap(), Some(sig.clone()));
    }

    #[test]
    fn test_rest_splices_partial_segment() {
        let mut th = test_thread();
        let head = List::from_array_next(
            Array::from_floats(vec![0.0, 1.0, 2.0]),
            Some(List::from_array(Array::from_floats(vec![3.0, 4.0]))),
        );
        let mut zin = ZIn::new(&Value::List(head));
        assert_eq!(zin.onez(&mut th).unwrap(), Some(0.0));
        let rest = zin.rest(&mut th).unwrap().unwrap();
        let mut buf = [0.0; 4];
        assert_eq!(rest.fillz(&mut th, &mut buf).unwrap(), 4);
        assert_eq!(buf, [1.0, 2.0, 3.0, 4.0]);
    }
}
