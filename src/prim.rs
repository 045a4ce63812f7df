// (C) 2020 Brandon Lewis
//
// Primitive words. A primitive declares its stack effect up front;
// invocation checks arity before any side effect, and unless the word is
// exempt, scans its arguments for each-ops and reroutes the call through
// the broadcast engine.

use crate::broadcast::handle_each_ops;
use crate::error::{Error, Result};
use crate::list::List;
use crate::plug::{Plug, Ref, ZPlug, ZRef};
use crate::symbol::{sym, Symbol};
use crate::value::{TypeTag, Value};
use crate::vm::Thread;
use crate::Handle;
use std::collections::HashMap;

pub type PrimFn = fn(&mut Thread, &Prim) -> Result<()>;

pub struct Prim {
    pub name: &'static str,
    pub takes: usize,
    pub leaves: usize,
    pub no_each: bool,
    // automap mask for broadcast-wrapped words, empty otherwise
    pub mask: &'static str,
    // the wrapped inner word for broadcast prims
    pub payload: Value,
    func: PrimFn,
}

impl Prim {
    pub fn new(name: &'static str, takes: usize, leaves: usize, func: PrimFn) -> Handle<Prim> {
        Handle::new(Prim {
            name,
            takes,
            leaves,
            no_each: false,
            mask: "",
            payload: Value::Real(0.0),
            func,
        })
    }

    pub fn new_no_each(
        name: &'static str,
        takes: usize,
        leaves: usize,
        func: PrimFn,
    ) -> Handle<Prim> {
        Handle::new(Prim {
            name,
            takes,
            leaves,
            no_each: true,
            mask: "",
            payload: Value::Real(0.0),
            func,
        })
    }

    pub fn wrapped(
        name: &'static str,
        takes: usize,
        leaves: usize,
        func: PrimFn,
        payload: Value,
        mask: &'static str,
    ) -> Handle<Prim> {
        Handle::new(Prim {
            name,
            takes,
            leaves,
            no_each: false,
            mask,
            payload,
            func,
        })
    }

    pub fn apply(this: &Handle<Prim>, th: &mut Thread) -> Result<()> {
        Prim::apply_n(this, th, this.takes)
    }

    pub fn apply_n(this: &Handle<Prim>, th: &mut Thread, n: usize) -> Result<()> {
        if th.depth() < n {
            return Err(Error::StackUnderflow);
        }
        if !this.no_each && n > 0 {
            let have_each = th
                .top_slice(n)?
                .iter()
                .any(|v| matches!(v, Value::Each(_)));
            if have_each {
                let list = handle_each_ops(th, n, Value::Prim(this.clone()))?;
                th.push(Value::List(list));
                return Ok(());
            }
        }
        (this.func)(th, this)
    }
}

fn dup_(th: &mut Thread, _prim: &Prim) -> Result<()> {
    let v = th.top()?.clone();
    th.push(v);
    Ok(())
}

fn drop_(th: &mut Thread, _prim: &Prim) -> Result<()> {
    th.pop()?;
    Ok(())
}

fn swap_(th: &mut Thread, _prim: &Prim) -> Result<()> {
    let b = th.pop()?;
    let a = th.pop()?;
    th.push(b);
    th.push(a);
    Ok(())
}

fn over_(th: &mut Thread, _prim: &Prim) -> Result<()> {
    let v = th.top_slice(2)?[0].clone();
    th.push(v);
    Ok(())
}

fn size_(th: &mut Thread, _prim: &Prim) -> Result<()> {
    let v = th.pop_value()?;
    let n = v.length(th)?;
    th.push(Value::Real(n as f64));
    Ok(())
}

fn pack_(th: &mut Thread, _prim: &Prim) -> Result<()> {
    let list = th.pop_list("pack : list")?;
    let limit = th.ctx.settings.pack_limit;
    match List::pack_limit(&list, th, limit)? {
        Some(packed) => {
            th.push(Value::List(packed));
            Ok(())
        }
        None => Err(Error::failed("pack : list is too long")),
    }
}

fn packz_(th: &mut Thread, _prim: &Prim) -> Result<()> {
    let list = th.pop_list("packz : list")?;
    let packed = List::packz(&list, th)?;
    th.push(Value::List(packed));
    Ok(())
}

fn chase_(th: &mut Thread, _prim: &Prim) -> Result<()> {
    let n = th.pop_int("chase : n")?;
    let v = th.pop_value()?;
    let r = v.chase(th, n)?;
    th.push(r);
    Ok(())
}

fn equals_(th: &mut Thread, _prim: &Prim) -> Result<()> {
    let b = th.pop_value()?;
    let a = th.pop_value()?;
    let eq = a.equals(th, &b)?;
    th.push(Value::Real(if eq { 1.0 } else { 0.0 }));
    Ok(())
}

fn ref_(th: &mut Thread, _prim: &Prim) -> Result<()> {
    let v = th.pop()?;
    th.push(Value::Ref(Ref::new(v)));
    Ok(())
}

fn zref_(th: &mut Thread, _prim: &Prim) -> Result<()> {
    let z = th.pop_float("zref : value")?;
    th.push(Value::ZRef(ZRef::new(z)));
    Ok(())
}

fn deref_(th: &mut Thread, _prim: &Prim) -> Result<()> {
    let v = th.pop()?;
    th.push(v.deref());
    Ok(())
}

fn setref_(th: &mut Thread, _prim: &Prim) -> Result<()> {
    let v = th.pop()?;
    let cell = th.pop()?;
    match &cell {
        Value::Ref(r) => {
            r.set(v);
            Ok(())
        }
        Value::ZRef(r) => {
            r.set(v.as_float());
            Ok(())
        }
        other => Err(Error::wrong_type(
            "setref : ref",
            TypeTag::Ref | TypeTag::ZRef,
            other.kind(),
        )),
    }
}

fn plug_(th: &mut Thread, _prim: &Prim) -> Result<()> {
    let v = th.pop()?;
    th.push(Value::Plug(Plug::new(&v)));
    Ok(())
}

fn zplug_(th: &mut Thread, _prim: &Prim) -> Result<()> {
    let v = th.pop()?;
    th.push(Value::ZPlug(ZPlug::new(&v)));
    Ok(())
}

fn setplug_(th: &mut Thread, _prim: &Prim) -> Result<()> {
    let v = th.pop()?;
    let plug = th.pop()?;
    match &plug {
        Value::Plug(p) => {
            p.set_input(&v);
            Ok(())
        }
        Value::ZPlug(p) => {
            p.set_input(&v);
            Ok(())
        }
        other => Err(Error::wrong_type(
            "setplug : plug",
            TypeTag::Plug | TypeTag::ZPlug,
            other.kind(),
        )),
    }
}

// Apply a body; on error, hand the error text to a handler and continue.
fn try_(th: &mut Thread, _prim: &Prim) -> Result<()> {
    let handler = th.pop()?;
    let body = th.pop()?;
    match body.apply(th) {
        Ok(()) => Ok(()),
        Err(Error::UserQuit) => Err(Error::UserQuit),
        Err(e) => {
            th.push(Value::string(&e.to_string()));
            handler.apply(th)
        }
    }
}

// Apply a body, then a cleanup that runs whether or not the body failed;
// the body's error is re-raised after the cleanup.
fn protect_(th: &mut Thread, _prim: &Prim) -> Result<()> {
    let cleanup = th.pop()?;
    let body = th.pop()?;
    let r = body.apply(th);
    let c = cleanup.apply(th);
    match r {
        Err(e) => Err(e),
        Ok(()) => c,
    }
}

// Spawn an audio thread of its own, sharing the context and capturing
// the workspace as of now.
fn go_(th: &mut Thread, _prim: &Prim) -> Result<()> {
    let fun = th.pop()?;
    if !fun.is_fun_or_prim() {
        return Err(Error::wrong_type(
            "go : fun",
            TypeTag::Fun | TypeTag::Prim,
            fun.kind(),
        ));
    }
    let mut child = th.child();
    debug!("go: spawning thread for {:?}", fun);
    std::thread::spawn(move || {
        if let Err(e) = fun.apply(&mut child) {
            warn!("go: thread ended with error: {}", e);
        }
    });
    Ok(())
}

pub fn install(builtins: &mut HashMap<Symbol, Value>) {
    let mut def = |name: &'static str, prim: Handle<Prim>| {
        builtins.insert(sym(name), Value::Prim(prim));
    };
    def("dup", Prim::new_no_each("dup", 1, 2, dup_));
    def("drop", Prim::new_no_each("drop", 1, 0, drop_));
    def("swap", Prim::new_no_each("swap", 2, 2, swap_));
    def("over", Prim::new_no_each("over", 2, 3, over_));
    def("size", Prim::new("size", 1, 1, size_));
    def("pack", Prim::new("pack", 1, 1, pack_));
    def("packz", Prim::new("packz", 1, 1, packz_));
    def("chase", Prim::new_no_each("chase", 2, 1, chase_));
    def("equals", Prim::new_no_each("equals", 2, 1, equals_));
    def("ref", Prim::new_no_each("ref", 1, 1, ref_));
    def("zref", Prim::new("zref", 1, 1, zref_));
    def("deref", Prim::new_no_each("deref", 1, 1, deref_));
    def("setref", Prim::new_no_each("setref", 2, 0, setref_));
    def("plug", Prim::new_no_each("plug", 1, 1, plug_));
    def("zplug", Prim::new_no_each("zplug", 1, 1, zplug_));
    def("setplug", Prim::new_no_each("setplug", 2, 0, setplug_));
    def("try", Prim::new_no_each("try", 2, 0, try_));
    def("protect", Prim::new_no_each("protect", 2, 0, protect_));
    def("go", Prim::new_no_each("go", 1, 0, go_));
}
