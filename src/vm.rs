// (C) 2020 Brandon Lewis
//
// The interpreter. A Thread owns the operand stack, locals, the current
// rate and the workspace snapshot; execution is a loop over a compiled
// code block. Nested blocks run under a saved stack base so list and
// form constructors see exactly what the block produced.
//
// All process-wide state except the symbol table lives in VmContext and
// is threaded through every entry point.

use crate::array::{Array, ElemKind};
use crate::broadcast::{handle_each_ops, EachOp};
use crate::config::Settings;
use crate::cursor::BothIn;
use crate::error::{Error, Result};
use crate::form::Form;
use crate::list::List;
use crate::plug::zplug_stream;
use crate::symbol::Symbol;
use crate::util::hash64;
use crate::value::{TypeTag, Value};
use crate::Handle;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Clone, Copy, Debug)]
pub struct Rate {
    pub sample_rate: f64,
    pub inv_sample_rate: f64,
    pub radians_per_sample: f64,
    pub block_size: usize,
}

impl Rate {
    pub fn new(sample_rate: f64, block_size: usize) -> Rate {
        Rate {
            sample_rate,
            inv_sample_rate: 1.0 / sample_rate,
            radians_per_sample: 2.0 * std::f64::consts::PI / sample_rate,
            block_size,
        }
    }
}

// Generator creation counters, visible to the host for leak hunting.
#[derive(Default)]
pub struct Stats {
    stream_gens: AtomicU64,
    signal_gens: AtomicU64,
}

impl Stats {
    pub fn count_stream(&self) {
        self.stream_gens.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count_signal(&self) {
        self.signal_gens.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stream_generators(&self) -> u64 {
        self.stream_gens.load(Ordering::Relaxed)
    }

    pub fn signal_generators(&self) -> u64 {
        self.signal_gens.load(Ordering::Relaxed)
    }
}

pub type Bindings = HashMap<Symbol, Value>;

pub struct VmContext {
    pub settings: Settings,
    pub ar: Rate,
    pub kr: Rate,
    pub v_block_size: usize,
    pub builtins: Bindings,
    pub stats: Stats,
}

impl VmContext {
    pub fn new(settings: Settings) -> Handle<VmContext> {
        let ar = Rate::new(settings.sample_rate, settings.block_size);
        let div = settings.control_div.max(1);
        let kr = Rate::new(
            settings.sample_rate / div as f64,
            (settings.block_size / div).max(1),
        );
        let mut builtins = Bindings::new();
        crate::prim::install(&mut builtins);
        crate::math::install(&mut builtins);
        crate::sig::install(&mut builtins);
        crate::spawn::install(&mut builtins);
        debug!("vm context: {} builtins", builtins.len());
        Handle::new(VmContext {
            v_block_size: settings.stream_block_size,
            settings,
            ar,
            kr,
            builtins,
            stats: Stats::default(),
        })
    }

    pub fn builtin(&self, name: &str) -> Option<Value> {
        self.builtins.get(&crate::symbol::sym(name)).cloned()
    }
}

static SEED_COUNTER: AtomicU64 = AtomicU64::new(77777);

fn timeseed() -> u64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    let counter = SEED_COUNTER.fetch_add(1, Ordering::Relaxed);
    hash64(nanos).wrapping_add(hash64(counter))
}

pub struct Thread {
    pub ctx: Handle<VmContext>,
    pub rate: Rate,
    pub rng: SmallRng,
    stack: Vec<Value>,
    local: Vec<Value>,
    stack_base: usize,
    local_base: usize,
    fun: Option<Handle<Fun>>,
    workspace: Handle<Bindings>,
}

impl Thread {
    pub fn new(ctx: Handle<VmContext>) -> Thread {
        let rate = ctx.ar;
        Thread {
            ctx,
            rate,
            rng: SmallRng::seed_from_u64(timeseed()),
            stack: Vec::new(),
            local: Vec::new(),
            stack_base: 0,
            local_base: 0,
            fun: None,
            workspace: Handle::new(Bindings::new()),
        }
    }

    // A thread sharing the context and capturing the workspace as of
    // now. Used by `go`.
    pub fn child(&self) -> Thread {
        Thread {
            ctx: self.ctx.clone(),
            rate: self.ctx.ar,
            rng: SmallRng::seed_from_u64(timeseed()),
            stack: Vec::new(),
            local: Vec::new(),
            stack_base: 0,
            local_base: 0,
            fun: None,
            workspace: self.workspace.clone(),
        }
    }

    // -- operand stack ---------------------------------------------------

    pub fn depth(&self) -> usize {
        self.stack.len() - self.stack_base
    }

    pub fn push(&mut self, v: Value) {
        self.stack.push(v);
    }

    pub fn pop(&mut self) -> Result<Value> {
        if self.depth() == 0 {
            return Err(Error::StackUnderflow);
        }
        self.stack.pop().ok_or(Error::StackUnderflow)
    }

    pub fn popn(&mut self, n: usize) -> Result<()> {
        if self.depth() < n {
            return Err(Error::StackUnderflow);
        }
        self.stack.truncate(self.stack.len() - n);
        Ok(())
    }

    pub fn top(&self) -> Result<&Value> {
        if self.depth() == 0 {
            return Err(Error::StackUnderflow);
        }
        self.stack.last().ok_or(Error::StackUnderflow)
    }

    pub fn top_slice(&self, n: usize) -> Result<&[Value]> {
        if self.depth() < n {
            return Err(Error::StackUnderflow);
        }
        Ok(&self.stack[self.stack.len() - n..])
    }

    // -- typed pops ------------------------------------------------------

    // Functions popped in argument position are applied first; their
    // result stands in for them.
    pub fn apply_if_fun(&mut self, v: Value) -> Result<Value> {
        if v.is_fun_or_prim() {
            self.apply_tuple(&[], &v)
        } else {
            Ok(v)
        }
    }

    pub fn pop_value(&mut self) -> Result<Value> {
        let v = self.pop()?.deref();
        self.apply_if_fun(v)
    }

    pub fn pop_float(&mut self, context: &'static str) -> Result<f64> {
        let v = self.pop_value()?;
        match v {
            Value::Real(f) => Ok(f),
            other => Err(Error::wrong_type(context, TypeTag::Real.into(), other.kind())),
        }
    }

    pub fn pop_int(&mut self, context: &'static str) -> Result<i64> {
        let f = self.pop_float(context)?;
        if f >= i64::MAX as f64 {
            Ok(i64::MAX)
        } else if f <= i64::MIN as f64 {
            Ok(i64::MIN)
        } else {
            Ok(f as i64)
        }
    }

    pub fn pop_list(&mut self, context: &'static str) -> Result<Handle<List>> {
        let v = self.pop_value()?;
        match v {
            Value::List(l) => Ok(l),
            other => Err(Error::wrong_type(context, TypeTag::List.into(), other.kind())),
        }
    }

    // A real or a signal; live plugs become endless signals here.
    pub fn pop_zin(&mut self, context: &'static str) -> Result<Value> {
        let v = self.pop_value()?;
        match &v {
            Value::Real(_) => Ok(v),
            Value::List(l) if l.kind() == ElemKind::Z => Ok(v),
            Value::ZPlug(p) => Ok(Value::List(zplug_stream(self, p))),
            other => Err(Error::wrong_type(
                context,
                TypeTag::Real | TypeTag::List | TypeTag::ZPlug,
                other.kind(),
            )),
        }
    }

    // A real, a signal, or a stream carrying either per element.
    pub fn pop_zin_list(&mut self, context: &'static str) -> Result<Value> {
        let v = self.pop_value()?;
        match &v {
            Value::Real(_) | Value::List(_) => Ok(v),
            Value::ZPlug(p) => Ok(Value::List(zplug_stream(self, p))),
            other => Err(Error::wrong_type(
                context,
                TypeTag::Real | TypeTag::List | TypeTag::ZPlug,
                other.kind(),
            )),
        }
    }

    // -- locals ----------------------------------------------------------

    pub fn get_local(&self, i: usize) -> Result<Value> {
        self.local
            .get(self.local_base + i)
            .cloned()
            .ok_or(Error::OutOfRange(i as i64))
    }

    pub fn set_local(&mut self, i: usize, v: Value) -> Result<()> {
        let at = self.local_base + i;
        match self.local.get_mut(at) {
            Some(slot) => {
                *slot = v;
                Ok(())
            }
            None => Err(Error::OutOfRange(i as i64)),
        }
    }

    // -- workspace -------------------------------------------------------

    pub fn workspace(&self) -> &Handle<Bindings> {
        &self.workspace
    }

    // Copy-on-bind: the map handle is swapped, so snapshots taken by
    // other threads keep reading what they captured.
    pub fn bind(&mut self, key: Symbol, value: Value) {
        if value.is_list() && !value.is_finite() {
            warn!(
                "binding a possibly infinite list to '{}' at the top level can leak unbounded memory",
                key
            );
        }
        let mut map = (*self.workspace).clone();
        map.insert(key, value);
        self.workspace = Handle::new(map);
    }

    pub fn lookup(&self, key: &Symbol) -> Option<Value> {
        self.workspace
            .get(key)
            .cloned()
            .or_else(|| self.ctx.builtins.get(key).cloned())
    }

    // -- framed application ----------------------------------------------

    // Apply a callable to an argument tuple inside its own stack frame
    // and take the single result. Anything else the callee leaves is
    // unwound, errors included.
    pub fn apply_tuple(&mut self, args: &[Value], fun: &Value) -> Result<Value> {
        fn run(th: &mut Thread, args: &[Value], fun: &Value) -> Result<Value> {
            for a in args {
                th.push(a.clone());
            }
            fun.apply(th)?;
            th.pop()
        }
        let saved = self.stack_base;
        self.stack_base = self.stack.len();
        let result = run(self, args, fun);
        let base = self.stack_base;
        self.stack.truncate(base);
        self.stack_base = saved;
        result
    }

    // Apply a callable in its own frame and collect everything it
    // produced.
    pub fn apply_collect(&mut self, fun: &Value) -> Result<Vec<Value>> {
        let saved = self.stack_base;
        self.stack_base = self.stack.len();
        let result = fun.apply(self);
        let base = self.stack_base;
        let items = self.stack.split_off(base);
        self.stack_base = saved;
        result.map(|_| items)
    }

    fn run_frame(&mut self, code: &Code) -> Result<Vec<Value>> {
        let saved = self.stack_base;
        self.stack_base = self.stack.len();
        let result = self.run(code);
        let base = self.stack_base;
        let items = self.stack.split_off(base);
        self.stack_base = saved;
        result.map(|_| items)
    }

    // -- the interpreter loop --------------------------------------------

    pub fn run(&mut self, code: &Code) -> Result<()> {
        for op in code.ops() {
            trace!("op {:?}  stack {:?}", op, &self.stack[self.stack_base..]);
            match op {
                Opcode::PushImmediate(v) => self.push(v.clone()),
                Opcode::PushLocal(i) => {
                    let v = self.get_local(*i)?;
                    self.push(v);
                }
                Opcode::PushFunVar(i) => {
                    let v = self.fun_var(*i)?;
                    self.push(v);
                }
                Opcode::PushWorkspace(key) => {
                    let v = self.lookup(key).ok_or_else(|| Error::NotFound(key.clone()))?;
                    self.push(v);
                }
                Opcode::PushFun(def) => {
                    let f = Fun::close(self, def.clone())?;
                    self.push(Value::Fun(f));
                }
                Opcode::CallImmediate(v) => v.clone().apply(self)?,
                Opcode::CallLocal(i) => {
                    let v = self.get_local(*i)?;
                    v.apply(self)?;
                }
                Opcode::CallFunVar(i) => {
                    let v = self.fun_var(*i)?;
                    v.apply(self)?;
                }
                Opcode::CallWorkspace(key) => {
                    let v = self.lookup(key).ok_or_else(|| Error::NotFound(key.clone()))?;
                    v.apply(self)?;
                }
                Opcode::Dot(key) => {
                    let v = self.pop()?;
                    let r = v.dot(self, key)?;
                    self.push(r);
                }
                Opcode::Comma(key) => {
                    let v = self.pop()?;
                    let r = v.comma(self, key)?;
                    self.push(r);
                }
                Opcode::BindLocal(i) => {
                    let v = self.pop()?;
                    self.set_local(*i, v)?;
                }
                Opcode::BindLocalFromList(indices) => {
                    let list = self.pop()?;
                    let mut input = BothIn::new(&list);
                    for i in indices {
                        match input.one(self)? {
                            Some(v) => self.set_local(*i, v)?,
                            None => return Err(Error::failed("not enough items in list to bind")),
                        }
                    }
                }
                Opcode::BindWorkspace(key) => {
                    let v = self.pop()?;
                    self.bind(key.clone(), v);
                }
                Opcode::BindWorkspaceFromList(keys) => {
                    let list = self.pop()?;
                    let mut input = BothIn::new(&list);
                    for key in keys {
                        match input.one(self)? {
                            Some(v) => self.bind(key.clone(), v),
                            None => return Err(Error::failed("not enough items in list to bind")),
                        }
                    }
                }
                Opcode::Parens(code) => {
                    let saved = self.stack_base;
                    self.stack_base = self.stack.len();
                    let r = self.run(code);
                    self.stack_base = saved;
                    r?;
                }
                Opcode::NewVList(code) => {
                    let items = self.run_frame(code)?;
                    let v = new_list(ElemKind::V, items)?;
                    self.push(v);
                }
                Opcode::NewZList(code) => {
                    let items = self.run_frame(code)?;
                    let v = new_list(ElemKind::Z, items)?;
                    self.push(v);
                }
                Opcode::NewForm(code) => {
                    let items = self.run_frame(code)?;
                    let v = new_form(self, items)?;
                    self.push(v);
                }
                Opcode::Inherit(code) => {
                    let items = self.run_frame(code)?;
                    let form = match items.len() {
                        0 => Form::empty(),
                        1 => Form::as_parent(self, &items[0])?,
                        _ => return Err(Error::failed("more arguments than keys for form")),
                    };
                    self.push(Value::Form(form));
                }
                Opcode::Each(mask) => {
                    let v = self.pop()?;
                    self.push(Value::Each(Handle::new(EachOp {
                        value: v,
                        mask: *mask,
                    })));
                }
                Opcode::Return => return Ok(()),
            }
        }
        Ok(())
    }

    fn fun_var(&self, i: usize) -> Result<Value> {
        match &self.fun {
            Some(f) => f.vars.get(i).cloned().ok_or(Error::OutOfRange(i as i64)),
            None => Err(Error::Internal("no function context")),
        }
    }
}

fn new_list(kind: ElemKind, items: Vec<Value>) -> Result<Value> {
    if items.is_empty() {
        return Ok(Value::List(List::nil(kind)));
    }
    let mut array = Array::new(kind, items.len());
    for item in items {
        array.add(item)?;
    }
    Ok(Value::List(List::from_array(array)))
}

// The code block leaves the key set on top and one value per key under
// it, with an optional parent at the bottom.
fn new_form(th: &mut Thread, mut items: Vec<Value>) -> Result<Value> {
    let keys = match items.pop() {
        Some(Value::Keys(map)) => map,
        Some(other) => {
            return Err(Error::wrong_type(
                "form keys",
                TypeTag::Keys.into(),
                other.kind(),
            ))
        }
        None => return Err(Error::StackUnderflow),
    };
    let n = keys.size();
    let parent = if items.len() == n {
        Form::empty()
    } else if items.len() == n + 1 {
        let head = items.remove(0);
        Form::as_parent(th, &head)?
    } else if items.len() < n {
        return Err(Error::StackUnderflow);
    } else {
        return Err(Error::failed("more arguments than keys for form"));
    };
    let table = crate::form::Table::new(keys, items)?;
    Ok(Value::Form(Form::cons(table, parent)))
}

// -- code, functions ----------------------------------------------------

#[derive(Clone, Debug)]
pub enum Opcode {
    PushImmediate(Value),
    PushLocal(usize),
    PushFunVar(usize),
    PushWorkspace(Symbol),
    PushFun(Handle<FunDef>),
    CallImmediate(Value),
    CallLocal(usize),
    CallFunVar(usize),
    CallWorkspace(Symbol),
    Dot(Symbol),
    Comma(Symbol),
    BindLocal(usize),
    BindLocalFromList(Vec<usize>),
    BindWorkspace(Symbol),
    BindWorkspaceFromList(Vec<Symbol>),
    Parens(Handle<Code>),
    NewVList(Handle<Code>),
    NewZList(Handle<Code>),
    NewForm(Handle<Code>),
    Inherit(Handle<Code>),
    Each(u64),
    Return,
}

#[derive(Debug, Default)]
pub struct Code {
    ops: Vec<Opcode>,
}

impl Code {
    pub fn new() -> Code {
        Code { ops: Vec::new() }
    }

    pub fn of(ops: Vec<Opcode>) -> Handle<Code> {
        Handle::new(Code { ops })
    }

    pub fn add(&mut self, op: Opcode) {
        self.ops.push(op);
    }

    pub fn ops(&self) -> &[Opcode] {
        &self.ops
    }
}

#[derive(Debug)]
pub struct FunDef {
    pub code: Handle<Code>,
    pub num_args: u16,
    pub num_locals: u16,
    pub num_vars: u16,
}

impl FunDef {
    pub fn new(code: Handle<Code>, num_args: u16, num_locals: u16, num_vars: u16) -> Handle<FunDef> {
        debug_assert!(num_locals >= num_args);
        Handle::new(FunDef {
            code,
            num_args,
            num_locals,
            num_vars,
        })
    }
}

pub struct Fun {
    pub def: Handle<FunDef>,
    pub vars: Vec<Value>,
}

impl Fun {
    // Close over captured variables, taken off the stack.
    pub fn close(th: &mut Thread, def: Handle<FunDef>) -> Result<Handle<Fun>> {
        let n = def.num_vars as usize;
        if th.depth() < n {
            return Err(Error::StackUnderflow);
        }
        let mut vars = Vec::with_capacity(n);
        for _ in 0..n {
            vars.push(th.pop()?);
        }
        vars.reverse();
        Ok(Handle::new(Fun { def, vars }))
    }

    pub fn plain(def: Handle<FunDef>) -> Handle<Fun> {
        Handle::new(Fun {
            def,
            vars: Vec::new(),
        })
    }

    pub fn apply(this: &Handle<Fun>, th: &mut Thread) -> Result<()> {
        let num_args = this.def.num_args as usize;
        if th.depth() < num_args {
            return Err(Error::StackUnderflow);
        }
        if num_args > 0 {
            let have_each = th
                .top_slice(num_args)?
                .iter()
                .any(|v| matches!(v, Value::Each(_)));
            if have_each {
                let list = handle_each_ops(th, num_args, Value::Fun(this.clone()))?;
                th.push(Value::List(list));
                return Ok(());
            }
        }
        Fun::run(this, th)
    }

    // Arguments become the first locals; the remaining locals start at
    // zero. The stack base moves so the body sees an empty stack.
    fn run(this: &Handle<Fun>, th: &mut Thread) -> Result<()> {
        let def = this.def.clone();
        let num_args = def.num_args as usize;
        let saved_fun = th.fun.replace(this.clone());
        let saved_stack_base = th.stack_base;
        let saved_local_base = th.local_base;
        th.local_base = th.local.len();
        let split = th.stack.len() - num_args;
        let args = th.stack.split_off(split);
        th.local.extend(args);
        for _ in num_args..def.num_locals as usize {
            th.local.push(Value::Real(0.0));
        }
        th.stack_base = th.stack.len();

        let result = th.run(&def.code);

        let local_base = th.local_base;
        th.local.truncate(local_base);
        th.local_base = saved_local_base;
        th.stack_base = saved_stack_base;
        th.fun = saved_fun;
        result
    }
}

// Apply a callable slot to a receiver, message-send style.
pub fn msg_send(th: &mut Thread, fun: &Value, receiver: Value) -> Result<Value> {
    th.apply_tuple(&[receiver], fun)
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::form::TableMap;
    use crate::symbol::sym;

    pub fn test_thread() -> Thread {
        Thread::new(VmContext::new(Settings::small()))
    }

    fn real(f: f64) -> Opcode {
        Opcode::PushImmediate(Value::Real(f))
    }

    fn call(th: &Thread, name: &str) -> Opcode {
        Opcode::CallImmediate(th.ctx.builtin(name).unwrap())
    }

    // stack [3, 4], apply + -> [7]
    #[test]
    fn test_add_program() {
        let mut th = test_thread();
        let code = Code::of(vec![real(3.0), real(4.0), call(&th, "+"), Opcode::Return]);
        th.run(&code).unwrap();
        assert_eq!(th.depth(), 1);
        assert_eq!(th.pop().unwrap(), Value::Real(7.0));
    }

    // Applying a non-callable leaves it on the stack unchanged.
    #[test]
    fn test_apply_non_callable() {
        let mut th = test_thread();
        let code = Code::of(vec![Opcode::CallImmediate(Value::Real(9.0))]);
        th.run(&code).unwrap();
        assert_eq!(th.depth(), 1);
        assert_eq!(th.pop().unwrap(), Value::Real(9.0));
    }

    #[test]
    fn test_underflow() {
        let mut th = test_thread();
        let code = Code::of(vec![real(3.0), call(&th, "+")]);
        assert_eq!(th.run(&code), Err(Error::StackUnderflow));
    }

    #[test]
    fn test_workspace_bind_and_call() {
        let mut th = test_thread();
        let x = sym("x");
        let code = Code::of(vec![real(42.0), Opcode::BindWorkspace(x.clone())]);
        th.run(&code).unwrap();
        let code = Code::of(vec![Opcode::PushWorkspace(x)]);
        th.run(&code).unwrap();
        assert_eq!(th.pop().unwrap(), Value::Real(42.0));
        assert!(matches!(
            th.run(&Code::of(vec![Opcode::PushWorkspace(sym("missing"))])),
            Err(Error::NotFound(_))
        ));
    }

    // Workspace snapshots are per bind: a captured handle keeps reading
    // the bindings it saw.
    #[test]
    fn test_workspace_copy_on_bind() {
        let mut th = test_thread();
        th.bind(sym("y"), Value::Real(1.0));
        let snapshot = th.workspace().clone();
        th.bind(sym("y"), Value::Real(2.0));
        assert_eq!(snapshot.get(&sym("y")), Some(&Value::Real(1.0)));
        assert_eq!(th.lookup(&sym("y")), Some(Value::Real(2.0)));
    }

    #[test]
    fn test_fun_args_and_locals() {
        let mut th = test_thread();
        // fun (a b) { a b + a + }  -- locals: a=0, b=1
        let body = Code::of(vec![
            Opcode::PushLocal(0),
            Opcode::PushLocal(1),
            call(&th, "+"),
            Opcode::PushLocal(0),
            call(&th, "+"),
            Opcode::Return,
        ]);
        let def = FunDef::new(body, 2, 2, 0);
        let f = Fun::plain(def);
        th.push(Value::Real(10.0));
        th.push(Value::Real(5.0));
        Fun::apply(&f, &mut th).unwrap();
        assert_eq!(th.pop().unwrap(), Value::Real(25.0));
        assert_eq!(th.depth(), 0);
    }

    #[test]
    fn test_fun_captures_vars() {
        let mut th = test_thread();
        let body = Code::of(vec![Opcode::PushFunVar(0)]);
        let def = FunDef::new(body, 0, 0, 1);
        th.push(Value::Real(7.0));
        let f = Fun::close(&mut th, def).unwrap();
        assert_eq!(th.depth(), 0);
        Fun::apply(&f, &mut th).unwrap();
        assert_eq!(th.pop().unwrap(), Value::Real(7.0));
    }

    // [1 2 3] 10 + -> [11 12 13]
    #[test]
    fn test_list_constructor_and_broadcast() {
        let mut th = test_thread();
        let inner = Code::of(vec![real(1.0), real(2.0), real(3.0)]);
        let code = Code::of(vec![
            Opcode::NewVList(inner),
            real(10.0),
            call(&th, "+"),
        ]);
        th.run(&code).unwrap();
        let out = th.pop_list("test").unwrap();
        let mut buf = [0.0; 3];
        assert_eq!(out.fillz(&mut th, &mut buf).unwrap(), 3);
        assert_eq!(buf, [11.0, 12.0, 13.0]);
    }

    #[test]
    fn test_zlist_constructor_rejects_objects() {
        let mut th = test_thread();
        let inner = Code::of(vec![Opcode::PushImmediate(Value::string("no"))]);
        let code = Code::of(vec![Opcode::NewZList(inner)]);
        assert!(matches!(th.run(&code), Err(Error::WrongType { .. })));
    }

    #[test]
    fn test_form_constructor_and_dot() {
        let mut th = test_thread();
        let freq = sym("freq");
        let amp = sym("amp");
        let keys = TableMap::new(vec![freq.clone(), amp.clone()]);
        let inner = Code::of(vec![
            real(440.0),
            real(0.5),
            Opcode::PushImmediate(Value::Keys(keys)),
        ]);
        let code = Code::of(vec![Opcode::NewForm(inner), Opcode::Dot(freq)]);
        th.run(&code).unwrap();
        assert_eq!(th.pop().unwrap(), Value::Real(440.0));
    }

    #[test]
    fn test_dot_missing_key_fails() {
        let mut th = test_thread();
        let keys = TableMap::new(vec![sym("a")]);
        let inner = Code::of(vec![real(1.0), Opcode::PushImmediate(Value::Keys(keys))]);
        let code = Code::of(vec![Opcode::NewForm(inner), Opcode::Dot(sym("b"))]);
        assert_eq!(th.run(&code), Err(Error::NotFound(sym("b"))));
    }

    #[test]
    fn test_inherit_opcode() {
        let mut th = test_thread();
        let keys = TableMap::new(vec![sym("a")]);
        let parent_code = Code::of(vec![real(1.0), Opcode::PushImmediate(Value::Keys(keys))]);
        // { a: 1 } as parent of { b: 2 }
        let keys2 = TableMap::new(vec![sym("b")]);
        let child_inner = Code::of(vec![
            Opcode::NewForm(parent_code),
            real(2.0),
            Opcode::PushImmediate(Value::Keys(keys2)),
        ]);
        let code = Code::of(vec![Opcode::NewForm(child_inner)]);
        th.run(&code).unwrap();
        let form = match th.pop().unwrap() {
            Value::Form(f) => f,
            other => panic!("expected form, got {:?}", other),
        };
        assert_eq!(form.get(&sym("a")), Some(Value::Real(1.0)));
        assert_eq!(form.get(&sym("b")), Some(Value::Real(2.0)));
    }

    #[test]
    fn test_parens_isolate_underflow() {
        let mut th = test_thread();
        th.push(Value::Real(1.0));
        let inner = Code::of(vec![call(&th, "drop")]);
        let code = Code::of(vec![Opcode::Parens(inner)]);
        // the paren block cannot see the outer item
        assert_eq!(th.run(&code), Err(Error::StackUnderflow));
        assert_eq!(th.depth(), 1);
    }

    #[test]
    fn test_each_opcode_wraps() {
        let mut th = test_thread();
        let code = Code::of(vec![real(5.0), Opcode::Each(3)]);
        th.run(&code).unwrap();
        match th.pop().unwrap() {
            Value::Each(e) => {
                assert_eq!(e.mask, 3);
                assert_eq!(e.value, Value::Real(5.0));
            }
            other => panic!("expected each-op, got {:?}", other),
        }
    }

    #[test]
    fn test_bind_local_from_list() {
        let mut th = test_thread();
        let body = Code::of(vec![
            Opcode::PushLocal(0),
            Opcode::BindLocalFromList(vec![0, 1]),
            Opcode::PushLocal(0),
            Opcode::PushLocal(1),
            call(&th, "-"),
        ]);
        let def = FunDef::new(body, 1, 2, 0);
        let f = Fun::plain(def);
        let list = new_list(
            ElemKind::V,
            vec![Value::Real(9.0), Value::Real(4.0)],
        )
        .unwrap();
        th.push(list);
        Fun::apply(&f, &mut th).unwrap();
        assert_eq!(th.pop().unwrap(), Value::Real(5.0));
    }
}
