// (C) 2020 Brandon Lewis
//
// The lazy list: one forced segment, a successor, and (until forced) the
// generator that will produce them. Lists are the representation of both
// streams of values and signals of floats; consumers share them freely
// because forcing is idempotent and caches its result.

use crate::array::{Array, ElemKind};
use crate::cursor::{VIn, VRun, ZIn};
use crate::error::{Error, Result};
use crate::gen::{GenInfo, Generate, Pulled};
use crate::lock::SpinLock;
use crate::symbol::Symbol;
use crate::value::Value;
use crate::vm::Thread;
use crate::Handle;
use std::fmt;

enum ListState {
    // Construction: the generator has not yet fulfilled this link.
    Deferred(Box<dyn Generate>),
    // Steady state after forcing. The terminal state is an empty array
    // with no successor.
    Done {
        array: Handle<Array>,
        next: Option<Handle<List>>,
    },
}

impl ListState {
    fn terminal(kind: ElemKind) -> ListState {
        ListState::Done {
            array: Handle::new(Array::empty(kind)),
            next: None,
        }
    }
}

pub struct List {
    kind: ElemKind,
    finite: bool,
    state: SpinLock<ListState>,
}

impl List {
    pub fn nil(kind: ElemKind) -> Handle<List> {
        Handle::new(List {
            kind,
            finite: true,
            state: SpinLock::new(ListState::terminal(kind)),
        })
    }

    pub fn from_array(array: Array) -> Handle<List> {
        Handle::new(List {
            kind: array.kind(),
            finite: true,
            state: SpinLock::new(ListState::Done {
                array: Handle::new(array),
                next: None,
            }),
        })
    }

    pub fn from_array_next(array: Array, next: Option<Handle<List>>) -> Handle<List> {
        debug_assert!(next.as_ref().map_or(true, |n| n.kind == array.kind()));
        Handle::new(List {
            kind: array.kind(),
            finite: next.as_ref().map_or(true, |n| n.finite),
            state: SpinLock::new(ListState::Done {
                array: Handle::new(array),
                next,
            }),
        })
    }

    pub fn deferred(gen: Box<dyn Generate>) -> Handle<List> {
        let info = *gen.info();
        Handle::new(List {
            kind: info.kind,
            finite: info.finite,
            state: SpinLock::new(ListState::Deferred(gen)),
        })
    }

    pub fn kind(&self) -> ElemKind {
        self.kind
    }

    pub fn is_finite(&self) -> bool {
        self.finite
    }

    // Run the pending generator, if any. The spin lock is held for the
    // duration of the pull; racing consumers wait and then observe the
    // produced state. Forcing an already-forced list is a no-op.
    pub fn force(&self, th: &mut Thread) -> Result<()> {
        let mut state = self.state.lock();
        if let ListState::Done { .. } = &*state {
            return Ok(());
        }
        let mut gen = match std::mem::replace(&mut *state, ListState::terminal(self.kind)) {
            ListState::Deferred(gen) => gen,
            done => {
                *state = done;
                return Ok(());
            }
        };
        match gen.pull(th) {
            Ok(Pulled::Block(array)) => {
                // A pull that produced nothing is equivalent to end.
                if !array.is_empty() {
                    *state = ListState::Done {
                        array: Handle::new(array),
                        next: Some(List::deferred(gen)),
                    };
                }
                Ok(())
            }
            Ok(Pulled::Last(array)) => {
                if !array.is_empty() {
                    *state = ListState::Done {
                        array: Handle::new(array),
                        next: Some(List::nil(self.kind)),
                    };
                }
                Ok(())
            }
            Ok(Pulled::Splice(array, tail)) => {
                *state = ListState::Done {
                    array: Handle::new(array),
                    next: Some(tail),
                };
                Ok(())
            }
            Ok(Pulled::End) => Ok(()),
            Ok(Pulled::Fail(array, err)) => {
                if !array.is_empty() {
                    *state = ListState::Done {
                        array: Handle::new(array),
                        next: Some(List::nil(self.kind)),
                    };
                }
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    // The produced segment and successor; None while still deferred.
    pub fn segment(&self) -> Option<(Handle<Array>, Option<Handle<List>>)> {
        match &*self.state.lock() {
            ListState::Done { array, next } => Some((array.clone(), next.clone())),
            ListState::Deferred(_) => None,
        }
    }

    fn forced_segment(&self, th: &mut Thread) -> Result<(Handle<Array>, Option<Handle<List>>)> {
        self.force(th)?;
        self.segment().ok_or(Error::Internal("list did not resolve"))
    }

    // True once the whole list is one contiguous segment.
    pub fn is_packed(&self) -> bool {
        matches!(&*self.state.lock(), ListState::Done { next: None, .. })
    }

    pub fn length(&self, th: &mut Thread) -> Result<i64> {
        if !self.finite {
            return Err(Error::Indefinite("length"));
        }
        let (array, mut next) = self.forced_segment(th)?;
        let mut sum = array.len() as i64;
        while let Some(list) = next {
            let (array, n) = list.forced_segment(th)?;
            sum += array.len() as i64;
            next = n;
        }
        Ok(sum)
    }

    // Reify a finite list into a single contiguous segment. Already
    // packed lists are returned as-is.
    pub fn pack(this: &Handle<List>, th: &mut Thread) -> Result<Handle<List>> {
        if !this.finite {
            return Err(Error::Indefinite("pack"));
        }
        this.force(th)?;
        if this.is_packed() {
            return Ok(this.clone());
        }
        let mut out = Array::new(this.kind, 0);
        let (array, mut next) = this.forced_segment(th)?;
        out.add_all(&array)?;
        while let Some(list) = next {
            let (array, n) = list.forced_segment(th)?;
            out.add_all(&array)?;
            next = n;
        }
        Ok(List::from_array(out))
    }

    // Like pack, but always yields a float segment.
    pub fn packz(this: &Handle<List>, th: &mut Thread) -> Result<Handle<List>> {
        if !this.finite {
            return Err(Error::Indefinite("pack"));
        }
        this.force(th)?;
        if this.is_packed() && this.kind == ElemKind::Z {
            return Ok(this.clone());
        }
        let mut out = Array::new(ElemKind::Z, 0);
        let (array, mut next) = this.forced_segment(th)?;
        out.add_all(&array)?;
        while let Some(list) = next {
            let (array, n) = list.forced_segment(th)?;
            out.add_all(&array)?;
            next = n;
        }
        Ok(List::from_array(out))
    }

    // Refuses (None) when the list holds more than limit elements, so
    // operations that need the whole list in memory can bail out.
    pub fn pack_limit(
        this: &Handle<List>,
        th: &mut Thread,
        limit: usize,
    ) -> Result<Option<Handle<List>>> {
        let mut count = 0usize;
        let (array, mut next) = this.forced_segment(th)?;
        count += array.len();
        while let Some(list) = next {
            if count > limit {
                return Ok(None);
            }
            let (array, n) = list.forced_segment(th)?;
            count += array.len();
            next = n;
        }
        if count > limit {
            return Ok(None);
        }
        Ok(Some(List::pack(this, th)?))
    }

    // Destructively evaluate up to out.len() floats into a buffer.
    // Returns how many were written.
    pub fn fillz(&self, th: &mut Thread, out: &mut [f64]) -> Result<usize> {
        let mut k = 0;
        let (mut array, mut next) = self.forced_segment(th)?;
        loop {
            let m = (out.len() - k).min(array.len());
            for i in 0..m {
                out[k] = array.atz(i);
                k += 1;
            }
            if k == out.len() {
                return Ok(k);
            }
            match next {
                Some(list) => {
                    let (a, n) = list.forced_segment(th)?;
                    array = a;
                    next = n;
                }
                None => return Ok(k),
            }
        }
    }

    // Advance by n elements without materialising a result. Signals skip
    // structurally (sharing the tail); streams of values chase each
    // element, which is what keeps a form's slots aligned in time.
    pub fn chase(this: &Handle<List>, th: &mut Thread, n: i64) -> Result<Value> {
        if n <= 0 {
            return Ok(Value::List(this.clone()));
        }
        match this.kind {
            ElemKind::Z => chase_z(this, th, n),
            ElemKind::V => chase_v(this, th, n),
        }
    }

    // Element-wise comparison. Indefinite operands are refused rather
    // than risking non-termination.
    pub fn equals(this: &Handle<List>, th: &mut Thread, other: &Handle<List>) -> Result<bool> {
        if Handle::ptr_eq(this, other) {
            return Ok(true);
        }
        if !this.finite {
            return Err(Error::Indefinite("equals"));
        }
        if !other.finite {
            return Err(Error::Indefinite("equals"));
        }
        if this.kind != other.kind {
            return Ok(false);
        }
        match this.kind {
            ElemKind::V => {
                let mut a = VIn::new(&Value::List(this.clone()));
                let mut b = VIn::new(&Value::List(other.clone()));
                loop {
                    match (a.one(th)?, b.one(th)?) {
                        (None, None) => return Ok(true),
                        (Some(x), Some(y)) => {
                            if !x.equals(th, &y)? {
                                return Ok(false);
                            }
                        }
                        _ => return Ok(false),
                    }
                }
            }
            ElemKind::Z => {
                let mut a = ZIn::new(&Value::List(this.clone()));
                let mut b = ZIn::new(&Value::List(other.clone()));
                loop {
                    match (a.onez(th)?, b.onez(th)?) {
                        (None, None) => return Ok(true),
                        (Some(x), Some(y)) => {
                            if x != y {
                                return Ok(false);
                            }
                        }
                        _ => return Ok(false),
                    }
                }
            }
        }
    }

    // `.key` over a stream of forms: a stream of the slot values, with
    // missing slots yielding the default.
    pub fn dot_stream(
        this: &Handle<List>,
        th: &Thread,
        key: Symbol,
        default: Value,
    ) -> Handle<List> {
        List::deferred(Box::new(DotGen {
            info: GenInfo::stream(th, this.finite),
            a: VIn::new(&Value::List(this.clone())),
            key,
            default,
        }))
    }

    // `,key` over a stream: slot send per element; missing slots fail.
    pub fn comma_stream(this: &Handle<List>, th: &Thread, key: Symbol) -> Handle<List> {
        List::deferred(Box::new(CommaGen {
            info: GenInfo::stream(th, this.finite),
            a: VIn::new(&Value::List(this.clone())),
            key,
        }))
    }
}

fn chase_z(this: &Handle<List>, th: &mut Thread, mut n: i64) -> Result<Value> {
    let mut cur = this.clone();
    loop {
        let (array, next) = cur.forced_segment(th)?;
        let size = array.len() as i64;
        if size > n {
            let rest = array.z()[n as usize..].to_vec();
            return Ok(Value::List(List::from_array_next(
                Array::from_floats(rest),
                next,
            )));
        }
        n -= size;
        match next {
            Some(list) => cur = list,
            None => return Ok(Value::List(List::nil(ElemKind::Z))),
        }
        if n == 0 {
            return Ok(Value::List(cur));
        }
    }
}

fn chase_v(this: &Handle<List>, th: &mut Thread, n: i64) -> Result<Value> {
    if !this.is_finite() {
        return Err(Error::Indefinite("chase"));
    }
    let mut out = Vec::new();
    let (mut array, mut next) = this.forced_segment(th)?;
    loop {
        for i in 0..array.len() {
            out.push(array.at(i).chase(th, n)?);
        }
        match next {
            Some(list) => {
                let (a, nn) = list.forced_segment(th)?;
                array = a;
                next = nn;
            }
            None => break,
        }
    }
    Ok(Value::List(List::from_array(Array::from_values(out))))
}

struct DotGen {
    info: GenInfo,
    a: VIn,
    key: Symbol,
    default: Value,
}

impl Generate for DotGen {
    fn info(&self) -> &GenInfo {
        &self.info
    }

    fn pull(&mut self, th: &mut Thread) -> Result<Pulled> {
        let block = self.info.block_size;
        let mut out: Vec<Value> = Vec::with_capacity(block);
        while out.len() < block {
            let want = block - out.len();
            let n = match self.a.next_run(th, want)? {
                VRun::End => return Ok(Pulled::Last(Array::from_values(out))),
                run => {
                    let n = run.len(want);
                    for i in 0..n {
                        match run.at(i).dot(th, &self.key) {
                            Ok(v) => out.push(v),
                            Err(Error::NotFound(_)) => out.push(self.default.clone()),
                            Err(e) => return Ok(Pulled::Fail(Array::from_values(out), e)),
                        }
                    }
                    n
                }
            };
            self.a.advance(n);
        }
        Ok(Pulled::Block(Array::from_values(out)))
    }
}

struct CommaGen {
    info: GenInfo,
    a: VIn,
    key: Symbol,
}

impl Generate for CommaGen {
    fn info(&self) -> &GenInfo {
        &self.info
    }

    fn pull(&mut self, th: &mut Thread) -> Result<Pulled> {
        let block = self.info.block_size;
        let mut out: Vec<Value> = Vec::with_capacity(block);
        while out.len() < block {
            let want = block - out.len();
            let n = match self.a.next_run(th, want)? {
                VRun::End => return Ok(Pulled::Last(Array::from_values(out))),
                run => {
                    let n = run.len(want);
                    for i in 0..n {
                        match run.at(i).comma(th, &self.key) {
                            Ok(v) => out.push(v),
                            Err(e) => return Ok(Pulled::Fail(Array::from_values(out), e)),
                        }
                    }
                    n
                }
            };
            self.a.advance(n);
        }
        Ok(Pulled::Block(Array::from_values(out)))
    }
}

// Long linear tails would otherwise free recursively, one stack frame per
// segment. Detach uniquely-owned successors iteratively instead.
impl Drop for List {
    fn drop(&mut self) {
        let mut next = match &mut *self.state.lock() {
            ListState::Done { next, .. } => next.take(),
            ListState::Deferred(_) => None,
        };
        while let Some(list) = next {
            if Handle::strong_count(&list) > 1 {
                break;
            }
            next = match &mut *list.state.lock() {
                ListState::Done { next, .. } => next.take(),
                ListState::Deferred(_) => None,
            };
        }
    }
}

// Shows whatever has been forced so far; never runs generators.
impl fmt::Debug for List {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[")?;
        let (mut array, mut next) = match self.segment() {
            None => return write!(f, "..]"),
            Some(seg) => seg,
        };
        let mut sep = "";
        let mut shown = 0;
        loop {
            for i in 0..array.len() {
                if shown == 16 {
                    return write!(f, "{}..]", sep);
                }
                write!(f, "{}{:?}", sep, array.at(i))?;
                sep = " ";
                shown += 1;
            }
            match next {
                None => return write!(f, "]"),
                Some(list) => match list.segment() {
                    None => return write!(f, "{}..]", sep),
                    Some((a, n)) => {
                        array = a;
                        next = n;
                    }
                },
            }
        }
    }
}
