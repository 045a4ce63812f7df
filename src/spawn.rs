// (C) 2020 Brandon Lewis
//
// Overlap-add spawn, the polyphonic construct: a stream of event
// templates is scheduled against a beat clock integrated from a tempo
// signal, each event's channels are mixed into the outputs at its
// within-block offset, and a form of chased signals is advanced in
// lockstep with sample time so later events read their slots at the
// right moment.
//
// All output channels are faces of one shared engine; whichever channel
// is forced first runs the next step, and the others drain their block
// queues.

use crate::array::{Array, ElemKind};
use crate::cursor::{BothIn, VIn, ZIn};
use crate::error::{Error, Result};
use crate::form::Form;
use crate::gen::{GenInfo, Generate, Pulled};
use crate::list::List;
use crate::lock::SpinLock;
use crate::prim::Prim;
use crate::symbol::{sym, Symbol};
use crate::value::Value;
use crate::vm::Thread;
use crate::Handle;
use std::collections::HashMap;
use std::collections::VecDeque;

const MAX_CHANNELS: i64 = 10000;

struct ActiveSource {
    inputs: Vec<ZIn>,
    offset: usize,
    done: bool,
}

struct OlaEngine {
    sounds: VIn,
    hops: BothIn,
    rate: ZIn,
    beat: f64,
    next_event_beat: f64,
    event_counter: f64,
    rate_mul: f64,
    sample_time: i64,
    prev_chase_time: i64,
    chased: Option<Handle<Form>>,
    actives: Vec<ActiveSource>,
    queues: Vec<VecDeque<Array>>,
    num_channels: usize,
    block_size: usize,
    no_more_sources: bool,
    finished: bool,
    s_out: Symbol,
    s_dt: Symbol,
}

impl OlaEngine {
    fn chase_to_time(&mut self, th: &mut Thread, time: i64) -> Result<()> {
        let n = time - self.prev_chase_time;
        self.prev_chase_time = time;
        if n > 0 {
            if let Some(chased) = self.chased.take() {
                self.chased = Some(chased.chase(th, n)?);
            }
        }
        Ok(())
    }

    // Integrate the tempo sample by sample and start every event whose
    // beat has arrived, aligned at its offset within this block.
    fn add_new_sources(&mut self, th: &mut Thread) -> Result<()> {
        if self.no_more_sources {
            return Ok(());
        }
        let bs = self.block_size;
        let mut i = 0;
        while i < bs {
            let chunk: Vec<f64> = match self.rate.next_run(th, bs - i)? {
                crate::cursor::ZRun::End => {
                    self.no_more_sources = true;
                    return Ok(());
                }
                run => {
                    let n = run.len(bs - i);
                    (0..n).map(|k| run.at(k)).collect()
                }
            };
            self.rate.advance(chunk.len());
            for (k, rate) in chunk.iter().enumerate() {
                while self.beat >= self.next_event_beat && !self.no_more_sources {
                    self.chase_to_time(th, self.sample_time + (i + k) as i64)?;

                    let mut source = match self.sounds.one(th)? {
                        None => {
                            self.no_more_sources = true;
                            break;
                        }
                        Some(v) => v,
                    };
                    if source.is_fun_or_prim() {
                        source = th.apply_tuple(&[Value::Real(self.event_counter)], &source)?;
                    }
                    let mut dt = match self.hops.onez(th)? {
                        None => {
                            self.no_more_sources = true;
                            break;
                        }
                        Some(z) => z,
                    };

                    let out = if let Value::Form(_) = &source {
                        let merged = match &self.chased {
                            Some(chased) => Form::linearize(
                                th,
                                &[Value::Form(chased.clone()), source.clone()],
                            )?,
                            None => match &source {
                                Value::Form(f) => f.clone(),
                                _ => Form::empty(),
                            },
                        };
                        if let Some(Value::Real(hop)) = merged.get(&self.s_dt) {
                            dt = hop;
                        }
                        merged.get(&self.s_out).unwrap_or(Value::Real(0.0))
                    } else {
                        source
                    };

                    // only bounded sounds can be spawned
                    if out.is_zlist() || (out.is_vlist() && out.is_finite()) {
                        let inputs = channel_inputs(th, &out)?;
                        self.actives.push(ActiveSource {
                            inputs,
                            offset: i + k,
                            done: false,
                        });
                    }

                    self.next_event_beat += dt;
                    self.event_counter += 1.0;
                }
                self.beat += rate * self.rate_mul;
            }
            i += chunk.len();
        }
        self.sample_time += bs as i64;
        self.chase_to_time(th, self.sample_time)
    }

    // One block for every channel at once.
    fn step(&mut self, th: &mut Thread) -> Result<()> {
        let bs = self.block_size;
        self.add_new_sources(th)?;

        let mut outs = vec![vec![0.0f64; bs]; self.num_channels];
        let mut any_done = false;
        let mut max_produced = 0;
        for source in self.actives.iter_mut() {
            let offset = source.offset;
            let mut all_done = true;
            let nch = source.inputs.len().min(self.num_channels);
            for (j, zin) in source.inputs.iter_mut().enumerate().take(nch) {
                if zin.constant_value() == Some(0.0) {
                    continue;
                }
                let (n, ended) = zin.mix(th, &mut outs[j][offset..])?;
                if !ended {
                    all_done = false;
                }
                max_produced = max_produced.max(n);
            }
            source.offset = 0;
            if all_done {
                source.done = true;
                any_done = true;
            }
        }

        // finished only once no event was live entering this block
        self.finished = self.no_more_sources && self.actives.is_empty();
        let shrink = if self.finished { bs - max_produced } else { 0 };
        for (queue, mut out) in self.queues.iter_mut().zip(outs) {
            out.truncate(bs - shrink);
            queue.push_back(Array::from_floats(out));
        }
        if any_done {
            self.actives.retain(|s| !s.done);
        }
        Ok(())
    }
}

// A finite stream of channels becomes one cursor per channel; a bare
// signal is a single channel.
fn channel_inputs(th: &mut Thread, out: &Value) -> Result<Vec<ZIn>> {
    match out {
        Value::List(l) if l.kind() == ElemKind::V => {
            let packed = List::pack(l, th)?;
            let (array, _) = packed
                .segment()
                .ok_or(Error::Internal("packed list did not resolve"))?;
            Ok(array.v().iter().map(ZIn::new).collect())
        }
        _ => Ok(vec![ZIn::new(out)]),
    }
}

struct OlaChannel {
    info: GenInfo,
    engine: Handle<SpinLock<OlaEngine>>,
    index: usize,
}

impl Generate for OlaChannel {
    fn info(&self) -> &GenInfo {
        &self.info
    }

    fn pull(&mut self, th: &mut Thread) -> Result<Pulled> {
        let mut engine = self.engine.lock();
        if engine.queues[self.index].is_empty() {
            if engine.finished {
                return Ok(Pulled::End);
            }
            engine.step(th)?;
        }
        let array = match engine.queues[self.index].pop_front() {
            Some(a) => a,
            None => return Ok(Pulled::End),
        };
        if engine.finished && engine.queues[self.index].is_empty() {
            Ok(Pulled::Last(array))
        } else {
            Ok(Pulled::Block(array))
        }
    }
}

pub fn ola(
    th: &mut Thread,
    sounds: Value,
    hops: Value,
    rate: Value,
    num_channels: usize,
) -> Result<Value> {
    let s_tempo = sym("tempo");
    let (rate, chased) = match &rate {
        Value::Form(form) => {
            let tempo = form.get(&s_tempo).unwrap_or(Value::Real(1.0));
            (tempo, Some(form.clone()))
        }
        other => (other.clone(), None),
    };
    let block_size = th.rate.block_size;
    let engine = Handle::new(SpinLock::new(OlaEngine {
        sounds: VIn::new(&sounds),
        hops: BothIn::new(&hops),
        rate: ZIn::new(&rate),
        beat: 0.0,
        next_event_beat: 0.0,
        event_counter: 0.0,
        rate_mul: th.rate.inv_sample_rate,
        sample_time: 0,
        prev_chase_time: 0,
        chased,
        actives: Vec::new(),
        queues: vec![VecDeque::new(); num_channels],
        num_channels,
        block_size,
        no_more_sources: false,
        finished: false,
        s_out: sym("out"),
        s_dt: sym("dt"),
    }));
    let mut channels = Array::new(ElemKind::V, num_channels);
    for index in 0..num_channels {
        let gen = OlaChannel {
            info: GenInfo::signal(th, false),
            engine: engine.clone(),
            index,
        };
        channels.add(Value::List(List::deferred(Box::new(gen))))?;
    }
    Ok(Value::List(List::from_array(channels)))
}

fn ola_(th: &mut Thread, _prim: &Prim) -> Result<()> {
    let num_channels = th.pop_int("ola : channels")?;
    if num_channels < 1 || num_channels > MAX_CHANNELS {
        return Err(Error::OutOfRange(num_channels));
    }
    let rate = th.pop_value()?;
    let hops = th.pop_zin_list("ola : hops")?;
    let sounds = th.pop_value()?;
    let out = ola(th, sounds, hops, rate, num_channels as usize)?;
    th.push(out);
    Ok(())
}

pub fn install(builtins: &mut HashMap<Symbol, Value>) {
    builtins.insert(
        sym("ola"),
        Value::Prim(Prim::new_no_each("ola", 4, 1, ola_)),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::form::{Table, TableMap};
    use crate::vm::tests::test_thread;

    fn zlist(values: &[f64]) -> Value {
        Value::List(List::from_array(Array::from_floats(values.to_vec())))
    }

    fn vlist(values: Vec<Value>) -> Value {
        Value::List(List::from_array(Array::from_values(values)))
    }

    fn channel(th: &mut Thread, outputs: &Value, index: usize) -> Handle<List> {
        let list = outputs.as_list().unwrap().clone();
        let packed = List::pack(&list, th).unwrap();
        let (array, _) = packed.segment().unwrap();
        match array.at(index) {
            Value::List(l) => l,
            other => panic!("expected channel list, got {:?}", other),
        }
    }

    fn blocks(th: &mut Thread, list: &Handle<List>, max: usize) -> Vec<Vec<f64>> {
        let mut out = Vec::new();
        let mut cur = list.clone();
        for _ in 0..max {
            cur.force(th).unwrap();
            let (array, next) = cur.segment().unwrap();
            if array.len() > 0 {
                out.push(array.z().to_vec());
            }
            match next {
                Some(n) => cur = n,
                None => break,
            }
        }
        out
    }

    // events [1,1,1,1] at beat 0 and [1,1] at beat 2, tempo one beat
    // per sample, one channel, block size 4: the second event overlaps
    // samples 2 and 3 of the first.
    #[test]
    fn test_overlap_add_mixes_at_offsets() {
        let mut th = test_thread();
        let sounds = vlist(vec![zlist(&[1.0, 1.0, 1.0, 1.0]), zlist(&[1.0, 1.0])]);
        let hops = zlist(&[2.0, 2.0]);
        let tempo = Value::Real(th.rate.sample_rate); // 1 beat/sample
        let outputs = ola(&mut th, sounds, hops, tempo, 1).unwrap();

        let ch = channel(&mut th, &outputs, 0);
        let got = blocks(&mut th, &ch, 8);
        assert_eq!(got[0], vec![1.0, 1.0, 2.0, 2.0]);
        assert_eq!(got[1], vec![0.0, 0.0, 0.0, 0.0]);
        assert_eq!(got.len(), 2);
    }

    // A two-channel event mixes each channel into its own output; the
    // second output channel pulls later and reads from the queue.
    #[test]
    fn test_multichannel_event() {
        let mut th = test_thread();
        let event = vlist(vec![zlist(&[1.0, 2.0]), zlist(&[3.0, 4.0])]);
        let sounds = vlist(vec![event]);
        let hops = Value::Real(10.0);
        let tempo = Value::Real(th.rate.sample_rate);
        let outputs = ola(&mut th, sounds, hops, tempo, 2).unwrap();

        let left = channel(&mut th, &outputs, 0);
        let right = channel(&mut th, &outputs, 1);
        let lb = blocks(&mut th, &left, 8);
        assert_eq!(lb[0], vec![1.0, 2.0, 0.0, 0.0]);
        let rb = blocks(&mut th, &right, 8);
        assert_eq!(rb[0], vec![3.0, 4.0, 0.0, 0.0]);
    }

    // Form templates against chased signals: an event spawned at sample
    // time t reads the chased slots advanced by t.
    #[test]
    fn test_chased_template_alignment() {
        let mut th = test_thread();
        let chased = Form::cons(
            Table::new(
                TableMap::new(vec![sym("tempo"), sym("out")]),
                vec![
                    Value::Real(th.rate.sample_rate),
                    zlist(&[10.0, 20.0, 30.0, 40.0, 50.0, 60.0, 70.0, 80.0]),
                ],
            )
            .unwrap(),
            Form::empty(),
        );
        let tag = Table::new(TableMap::new(vec![sym("tag")]), vec![Value::Real(1.0)]).unwrap();
        let event = || Value::Form(Form::cons(tag.clone(), Form::empty()));
        let sounds = vlist(vec![event(), event()]);
        let hops = zlist(&[2.0, 2.0]);
        let outputs = ola(&mut th, sounds, hops, Value::Form(chased), 1).unwrap();

        let ch = channel(&mut th, &outputs, 0);
        let got = blocks(&mut th, &ch, 8);
        // event 1 plays [10..] from sample 0; event 2 plays [30..] from
        // sample 2
        assert_eq!(got[0], vec![10.0, 20.0, 30.0 + 30.0, 40.0 + 40.0]);
        assert_eq!(got[1], vec![50.0 + 50.0, 60.0 + 60.0, 70.0 + 70.0, 80.0 + 80.0]);
        assert_eq!(got[2], vec![0.0, 0.0, 0.0, 0.0]);
        assert_eq!(got.len(), 3);
    }
}
