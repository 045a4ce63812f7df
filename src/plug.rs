// (C) 2020 Brandon Lewis
//
// Mutable cells and live wiring. Refs hold one slot behind a spin lock;
// plugs hold a replaceable input cursor plus a change count, so a
// generator that re-reads a plug can tell the wiring moved under it and
// must not write a stale cursor position back.

use crate::array::Array;
use crate::cursor::{VIn, ZIn};
use crate::error::Result;
use crate::gen::{GenInfo, Generate, Pulled};
use crate::list::List;
use crate::lock::SpinLock;
use crate::value::Value;
use crate::vm::Thread;
use crate::Handle;

pub struct Ref {
    cell: SpinLock<Value>,
}

impl Ref {
    pub fn new(value: Value) -> Handle<Ref> {
        Handle::new(Ref {
            cell: SpinLock::new(value),
        })
    }

    pub fn get(&self) -> Value {
        self.cell.lock().clone()
    }

    pub fn set(&self, value: Value) {
        *self.cell.lock() = value;
    }
}

pub struct ZRef {
    cell: SpinLock<f64>,
}

impl ZRef {
    pub fn new(value: f64) -> Handle<ZRef> {
        Handle::new(ZRef {
            cell: SpinLock::new(value),
        })
    }

    pub fn get(&self) -> f64 {
        *self.cell.lock()
    }

    pub fn set(&self, value: f64) {
        *self.cell.lock() = value;
    }
}

pub struct Plug {
    state: SpinLock<(VIn, u64)>,
}

impl Plug {
    pub fn new(initial: &Value) -> Handle<Plug> {
        Handle::new(Plug {
            state: SpinLock::new((VIn::new(initial), 0)),
        })
    }

    pub fn get(&self) -> (VIn, u64) {
        let state = self.state.lock();
        (state.0.clone(), state.1)
    }

    // Rewire. Bumps the change count so in-flight consumers notice.
    pub fn set_input(&self, value: &Value) {
        let mut state = self.state.lock();
        state.0 = VIn::new(value);
        state.1 += 1;
    }

    // Persist a consumed cursor position, unless someone rewired the
    // plug since we read it.
    pub fn put_back(&self, cursor: VIn, count: u64) {
        let mut state = self.state.lock();
        if state.1 == count {
            state.0 = cursor;
        }
    }
}

pub struct ZPlug {
    state: SpinLock<(ZIn, u64)>,
}

impl ZPlug {
    pub fn new(initial: &Value) -> Handle<ZPlug> {
        Handle::new(ZPlug {
            state: SpinLock::new((ZIn::new(initial), 0)),
        })
    }

    pub fn get(&self) -> (ZIn, u64) {
        let state = self.state.lock();
        (state.0.clone(), state.1)
    }

    pub fn set_input(&self, value: &Value) {
        let mut state = self.state.lock();
        state.0 = ZIn::new(value);
        state.1 += 1;
    }

    pub fn put_back(&self, cursor: ZIn, count: u64) {
        let mut state = self.state.lock();
        if state.1 == count {
            state.0 = cursor;
        }
    }
}

// The audible face of a ZPlug: an endless signal that reads whatever the
// plug is wired to and falls back to silence when the wire runs dry.
struct ZPlugGen {
    info: GenInfo,
    plug: Handle<ZPlug>,
}

impl Generate for ZPlugGen {
    fn info(&self) -> &GenInfo {
        &self.info
    }

    fn pull(&mut self, th: &mut Thread) -> Result<Pulled> {
        let block = self.info.block_size;
        let (mut zin, count) = self.plug.get();
        let mut out = vec![0.0; block];
        zin.fill(th, block, &mut out, 1)?;
        self.plug.put_back(zin, count);
        Ok(Pulled::Block(Array::from_floats(out)))
    }
}

pub fn zplug_stream(th: &Thread, plug: &Handle<ZPlug>) -> Handle<List> {
    List::deferred(Box::new(ZPlugGen {
        info: GenInfo::signal(th, false),
        plug: plug.clone(),
    }))
}

// Same for a value plug: an endless stream, zeroes when unwired.
struct PlugGen {
    info: GenInfo,
    plug: Handle<Plug>,
}

impl Generate for PlugGen {
    fn info(&self) -> &GenInfo {
        &self.info
    }

    fn pull(&mut self, th: &mut Thread) -> Result<Pulled> {
        let block = self.info.block_size;
        let (mut vin, count) = self.plug.get();
        let mut out = Vec::with_capacity(block);
        for _ in 0..block {
            out.push(vin.one(th)?.unwrap_or(Value::Real(0.0)));
        }
        self.plug.put_back(vin, count);
        Ok(Pulled::Block(Array::from_values(out)))
    }
}

pub fn plug_stream(th: &Thread, plug: &Handle<Plug>) -> Handle<List> {
    List::deferred(Box::new(PlugGen {
        info: GenInfo::stream(th, false),
        plug: plug.clone(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::tests::test_thread;

    #[test]
    fn test_ref_cell() {
        let r = Ref::new(Value::Real(1.0));
        assert_eq!(r.get(), Value::Real(1.0));
        let two = Value::string("two");
        r.set(two.clone());
        assert_eq!(r.get(), two);
    }

    #[test]
    fn test_zplug_rewires_between_blocks() {
        let mut th = test_thread();
        let block = th.rate.block_size;
        let plug = ZPlug::new(&Value::Real(1.0));
        let stream = zplug_stream(&th, &plug);
        let mut zin = ZIn::new(&Value::List(stream));

        let mut out = vec![0.0; block];
        zin.fill(&mut th, block, &mut out, 1).unwrap();
        assert!(out.iter().all(|&x| x == 1.0));

        plug.set_input(&Value::Real(-1.0));
        let mut out = vec![0.0; block];
        zin.fill(&mut th, block, &mut out, 1).unwrap();
        assert!(out.iter().all(|&x| x == -1.0));
    }

    #[test]
    fn test_plug_stream_pads_when_unwired() {
        let mut th = test_thread();
        let block = th.ctx.v_block_size;
        let wire = Value::List(List::from_array(Array::from_values(vec![Value::Real(7.0)])));
        let plug = Plug::new(&wire);
        let stream = plug_stream(&th, &plug);
        stream.force(&mut th).unwrap();
        let (array, _) = stream.segment().unwrap();
        assert_eq!(array.len(), block);
        assert_eq!(array.at(0), Value::Real(7.0));
        assert_eq!(array.at(1), Value::Real(0.0));
    }

    #[test]
    fn test_put_back_respects_change_count() {
        let plug = ZPlug::new(&Value::Real(2.0));
        let (cursor, count) = plug.get();
        plug.set_input(&Value::Real(5.0));
        plug.put_back(cursor, count);
        let (current, _) = plug.get();
        assert_eq!(current.constant_value(), Some(5.0));
    }
}
