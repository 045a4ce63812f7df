// (C) 2020 Brandon Lewis
//
// The universal value type. A value is a finite real or a shared handle to
// one of the heap variants; the enum discriminant is the only type tag the
// language has. Heap objects are shared, never cycle in well-formed
// graphs, and may cross audio threads.

use crate::array::ElemKind;
use crate::broadcast::EachOp;
use crate::error::{Error, Result};
use crate::form::{Form, Table, TableMap};
use crate::list::List;
use crate::plug::{Plug, Ref, ZPlug, ZRef};
use crate::prim::Prim;
use crate::symbol::Symbol;
use crate::util::hash64;
use crate::vm::{Code, Fun, FunDef, Thread};
use crate::Handle;
use enumflags2::BitFlags;
use std::fmt;

// Discriminants, usable in sets for type errors.
#[derive(BitFlags, Copy, Clone, Debug, PartialEq)]
#[repr(u16)]
pub enum TypeTag {
    Real = 0x0001,
    List = 0x0002,
    Form = 0x0004,
    Table = 0x0008,
    Fun = 0x0010,
    Prim = 0x0020,
    Ref = 0x0040,
    ZRef = 0x0080,
    Plug = 0x0100,
    ZPlug = 0x0200,
    Str = 0x0400,
    Sym = 0x0800,
    Each = 0x1000,
    Keys = 0x2000,
    Code = 0x4000,
    FunDef = 0x8000,
}

pub type TypeSet = BitFlags<TypeTag>;

#[derive(Clone)]
pub enum Value {
    Real(f64),
    List(Handle<List>),
    Form(Handle<Form>),
    Table(Handle<Table>),
    Fun(Handle<Fun>),
    Prim(Handle<Prim>),
    Ref(Handle<Ref>),
    ZRef(Handle<ZRef>),
    Plug(Handle<Plug>),
    ZPlug(Handle<ZPlug>),
    Str(Handle<String>),
    Sym(Symbol),
    Each(Handle<EachOp>),
    Keys(Handle<TableMap>),
    Code(Handle<Code>),
    FunDef(Handle<FunDef>),
}

impl Value {
    pub fn string(s: &str) -> Value {
        Value::Str(Handle::new(s.to_string()))
    }

    pub fn kind(&self) -> TypeTag {
        match self {
            Value::Real(_) => TypeTag::Real,
            Value::List(_) => TypeTag::List,
            Value::Form(_) => TypeTag::Form,
            Value::Table(_) => TypeTag::Table,
            Value::Fun(_) => TypeTag::Fun,
            Value::Prim(_) => TypeTag::Prim,
            Value::Ref(_) => TypeTag::Ref,
            Value::ZRef(_) => TypeTag::ZRef,
            Value::Plug(_) => TypeTag::Plug,
            Value::ZPlug(_) => TypeTag::ZPlug,
            Value::Str(_) => TypeTag::Str,
            Value::Sym(_) => TypeTag::Sym,
            Value::Each(_) => TypeTag::Each,
            Value::Keys(_) => TypeTag::Keys,
            Value::Code(_) => TypeTag::Code,
            Value::FunDef(_) => TypeTag::FunDef,
        }
    }

    pub fn is_real(&self) -> bool {
        matches!(self, Value::Real(_))
    }

    pub fn is_list(&self) -> bool {
        matches!(self, Value::List(_))
    }

    pub fn is_vlist(&self) -> bool {
        matches!(self, Value::List(l) if l.kind() == ElemKind::V)
    }

    pub fn is_zlist(&self) -> bool {
        matches!(self, Value::List(l) if l.kind() == ElemKind::Z)
    }

    pub fn is_fun_or_prim(&self) -> bool {
        matches!(self, Value::Fun(_) | Value::Prim(_))
    }

    pub fn as_list(&self) -> Option<&Handle<List>> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_float(&self) -> f64 {
        match self {
            Value::Real(f) => *f,
            Value::ZRef(r) => r.get(),
            _ => 0.0,
        }
    }

    // Finiteness of the value seen as a stream. A scalar broadcasts
    // forever; only a list can promise termination.
    pub fn is_finite(&self) -> bool {
        match self {
            Value::List(l) => l.is_finite(),
            _ => false,
        }
    }

    // Pointer identity (bit identity for reals). This is the equivalence
    // used by table keys and the inheritance merge.
    pub fn identical(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Real(a), Value::Real(b)) => a.to_bits() == b.to_bits(),
            (Value::List(a), Value::List(b)) => Handle::ptr_eq(a, b),
            (Value::Form(a), Value::Form(b)) => Handle::ptr_eq(a, b),
            (Value::Table(a), Value::Table(b)) => Handle::ptr_eq(a, b),
            (Value::Fun(a), Value::Fun(b)) => Handle::ptr_eq(a, b),
            (Value::Prim(a), Value::Prim(b)) => Handle::ptr_eq(a, b),
            (Value::Ref(a), Value::Ref(b)) => Handle::ptr_eq(a, b),
            (Value::ZRef(a), Value::ZRef(b)) => Handle::ptr_eq(a, b),
            (Value::Plug(a), Value::Plug(b)) => Handle::ptr_eq(a, b),
            (Value::ZPlug(a), Value::ZPlug(b)) => Handle::ptr_eq(a, b),
            (Value::Str(a), Value::Str(b)) => Handle::ptr_eq(a, b),
            (Value::Sym(a), Value::Sym(b)) => a == b,
            (Value::Each(a), Value::Each(b)) => Handle::ptr_eq(a, b),
            (Value::Keys(a), Value::Keys(b)) => Handle::ptr_eq(a, b),
            (Value::Code(a), Value::Code(b)) => Handle::ptr_eq(a, b),
            (Value::FunDef(a), Value::FunDef(b)) => Handle::ptr_eq(a, b),
            _ => false,
        }
    }

    // Structural hash. Reals hash by bit pattern, symbols by identity,
    // forms recursively over key-sorted slots; everything else by the
    // identity of its handle.
    pub fn hash(&self) -> i64 {
        match self {
            Value::Real(f) => hash64(f.to_bits()) as i64,
            Value::Sym(s) => hash64(s.as_str().as_ptr() as u64) as i64,
            Value::Str(s) => {
                let mut h: u64 = 0;
                for b in s.bytes() {
                    h = hash64(h ^ b as u64);
                }
                h as i64
            }
            Value::Form(form) => form.hash(),
            Value::Table(table) => table.hash(),
            Value::List(l) => hash64(Handle::as_ptr(l) as u64) as i64,
            Value::Fun(f) => hash64(Handle::as_ptr(f) as u64) as i64,
            Value::Prim(p) => hash64(Handle::as_ptr(p) as u64) as i64,
            Value::Ref(r) => hash64(Handle::as_ptr(r) as u64) as i64,
            Value::ZRef(r) => hash64(Handle::as_ptr(r) as u64) as i64,
            Value::Plug(p) => hash64(Handle::as_ptr(p) as u64) as i64,
            Value::ZPlug(p) => hash64(Handle::as_ptr(p) as u64) as i64,
            Value::Each(e) => hash64(Handle::as_ptr(e) as u64) as i64,
            Value::Keys(k) => hash64(Handle::as_ptr(k) as u64) as i64,
            Value::Code(c) => hash64(Handle::as_ptr(c) as u64) as i64,
            Value::FunDef(d) => hash64(Handle::as_ptr(d) as u64) as i64,
        }
    }

    // Deep structural equality. May not terminate on indefinite lists;
    // callers restrict use (list comparison refuses unproven-finite
    // operands instead of spinning).
    pub fn equals(&self, th: &mut Thread, other: &Value) -> Result<bool> {
        if self.identical(other) {
            return Ok(true);
        }
        match (self, other) {
            (Value::Real(a), Value::Real(b)) => Ok(a == b),
            (Value::Str(a), Value::Str(b)) => Ok(a == b),
            (Value::List(a), Value::List(b)) => List::equals(a, th, b),
            (Value::Form(a), Value::Form(b)) => a.equals(th, b),
            (Value::Table(a), Value::Table(b)) => a.equals(th, b),
            // cells compare by what they currently hold
            (Value::Ref(a), Value::Ref(b)) => a.get().equals(th, &b.get()),
            (Value::ZRef(a), Value::ZRef(b)) => Ok(a.get() == b.get()),
            _ => Ok(false),
        }
    }

    // Function application. A non-callable applied to the stack is left
    // there unchanged.
    pub fn apply(&self, th: &mut Thread) -> Result<()> {
        match self {
            Value::Prim(p) => Prim::apply(p, th),
            Value::Fun(f) => Fun::apply(f, th),
            other => {
                th.push(other.clone());
                Ok(())
            }
        }
    }

    pub fn deref(&self) -> Value {
        match self {
            Value::Ref(r) => r.get(),
            Value::ZRef(r) => Value::Real(r.get()),
            other => other.clone(),
        }
    }

    // `.key` — slot access. Missing keys fail with NotFound; applied to a
    // stream of forms it lifts to a stream of the slot values.
    pub fn dot(&self, th: &mut Thread, key: &Symbol) -> Result<Value> {
        match self {
            Value::Form(form) => form
                .get(key)
                .ok_or_else(|| Error::NotFound(key.clone())),
            Value::Table(table) => table
                .get(key)
                .ok_or_else(|| Error::NotFound(key.clone())),
            Value::List(list) => Ok(Value::List(List::dot_stream(
                list,
                th,
                key.clone(),
                Value::Real(0.0),
            ))),
            Value::Ref(r) => r.get().dot(th, key),
            _ => Err(Error::NotFound(key.clone())),
        }
    }

    // `,key` — slot send. Like dot, but a callable slot is invoked with
    // the receiver pushed.
    pub fn comma(&self, th: &mut Thread, key: &Symbol) -> Result<Value> {
        match self {
            Value::List(list) => Ok(Value::List(List::comma_stream(list, th, key.clone()))),
            Value::Ref(r) => r.get().comma(th, key),
            Value::Form(_) | Value::Table(_) => {
                let slot = self.dot(th, key)?;
                if slot.is_fun_or_prim() {
                    crate::vm::msg_send(th, &slot, self.clone())
                } else {
                    Ok(slot)
                }
            }
            _ => Err(Error::NotFound(key.clone())),
        }
    }

    pub fn length(&self, th: &mut Thread) -> Result<i64> {
        match self {
            Value::List(l) => l.length(th),
            Value::Str(s) => Ok(s.chars().count() as i64),
            other => Err(Error::wrong_type(
                "length",
                TypeTag::List | TypeTag::Str,
                other.kind(),
            )),
        }
    }

    // Advance every lazy stream reachable from this value by n elements.
    // Scalars are unchanged; lists skip; forms recurse.
    pub fn chase(&self, th: &mut Thread, n: i64) -> Result<Value> {
        match self {
            Value::List(l) => List::chase(l, th, n),
            Value::Form(f) => Ok(Value::Form(f.chase(th, n)?)),
            other => Ok(other.clone()),
        }
    }
}

// Shallow equality for tests and assertions: reals and strings by content,
// heap values by identity. Deep elementwise comparison goes through
// Value::equals, which needs a thread.
impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Real(a), Value::Real(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            _ => self.identical(other),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Real(x) => write!(f, "{:?}", x),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Sym(s) => write!(f, "{:?}", s),
            Value::List(l) => write!(f, "{:?}", l),
            Value::Form(_) => write!(f, "Form"),
            Value::Table(_) => write!(f, "Table"),
            Value::Fun(_) => write!(f, "Fun"),
            Value::Prim(p) => write!(f, "Prim({})", p.name),
            Value::Ref(_) => write!(f, "Ref"),
            Value::ZRef(r) => write!(f, "ZRef({})", r.get()),
            Value::Plug(_) => write!(f, "Plug"),
            Value::ZPlug(_) => write!(f, "ZPlug"),
            Value::Each(e) => write!(f, "@{:b} {:?}", e.mask, e.value),
            Value::Keys(_) => write!(f, "Keys"),
            Value::Code(_) => write!(f, "Code"),
            Value::FunDef(_) => write!(f, "FunDef"),
        }
    }
}
