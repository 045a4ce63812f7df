// (C) 2020 Brandon Lewis
//
// The generator contract.
//
// A generator is a stateful node that fills one block of its output list
// per pull. Forcing a list runs its generator exactly once; the result
// says how the list resolves: a produced block with a lazy successor, a
// final block, a splice onto an existing tail, or the end. Generators
// never see their output list; the forcing site owns the state
// transition, which keeps ownership flowing strictly list -> generator ->
// inputs -> upstream lists.

use crate::array::{Array, ElemKind};
use crate::error::{Error, Result};
use crate::list::List;
use crate::value::Value;
use crate::vm::Thread;
use crate::Handle;

#[derive(Clone, Copy, Debug)]
pub struct GenInfo {
    pub kind: ElemKind,
    pub finite: bool,
    pub block_size: usize,
}

impl GenInfo {
    // Stream generators produce boxed values at the stream block size.
    pub fn stream(th: &Thread, finite: bool) -> GenInfo {
        th.ctx.stats.count_stream();
        GenInfo {
            kind: ElemKind::V,
            finite,
            block_size: th.ctx.v_block_size,
        }
    }

    // Signal generators produce floats at the block size of the thread's
    // current rate, so control-rate subgraphs get smaller blocks.
    pub fn signal(th: &Thread, finite: bool) -> GenInfo {
        th.ctx.stats.count_signal();
        GenInfo {
            kind: ElemKind::Z,
            finite,
            block_size: th.rate.block_size,
        }
    }
}

// What one pull did.
pub enum Pulled {
    // A full block; the successor list keeps the generator.
    Block(Array),
    // A final (possibly truncated) block; the list ends after it.
    Last(Array),
    // A final block followed by an existing tail spliced in as-is. This
    // is the linking path that lets identity-element operators forward
    // long tails without copying them.
    Splice(Array, Handle<List>),
    // No elements at all.
    End,
    // The generator failed mid-block. The partial block is still
    // delivered, the list ends, and the error propagates to the forcing
    // consumer.
    Fail(Array, Error),
}

pub trait Generate: Send {
    fn info(&self) -> &GenInfo;
    fn pull(&mut self, th: &mut Thread) -> Result<Pulled>;
}

// Finiteness of a generator fed by several inputs that terminate it when
// the first of them ends: finite if any input is.
pub fn most_finite(args: &[&Value]) -> bool {
    args.iter().any(|v| v.is_finite())
}
