// (C) 2020 Brandon Lewis
//
// The host-facing audio seams. A device or file writer drives float
// cursors at its own block size; readers appear to the engine as
// ordinary generators, one output list per channel fed from a shared
// pull over the underlying file.

use crate::array::{Array, ElemKind};
use crate::cursor::ZIn;
use crate::error::{Error, Result};
use crate::gen::{GenInfo, Generate, Pulled};
use crate::list::List;
use crate::lock::SpinLock;
use crate::value::Value;
use crate::vm::Thread;
use crate::Handle;
use std::collections::VecDeque;

// A bundle of per-channel cursors the host pulls at its device block
// size, interleaved or not by choosing the stride.
pub struct AudioOut {
    channels: Vec<ZIn>,
}

impl AudioOut {
    // A stream of channels fans out; a signal or scalar is one channel.
    pub fn new(th: &mut Thread, source: &Value) -> Result<AudioOut> {
        let channels = match source {
            Value::List(l) if l.kind() == ElemKind::V => {
                let packed = List::pack(l, th)?;
                let (array, _) = packed
                    .segment()
                    .ok_or(Error::Internal("packed list did not resolve"))?;
                array.v().iter().map(ZIn::new).collect()
            }
            other => vec![ZIn::new(other)],
        };
        Ok(AudioOut { channels })
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    // Fill `frames` frames into the destination. Interleaved delivery
    // lays channels out side by side per frame; non-interleaved delivery
    // expects one contiguous span per channel. Returns how many frames
    // the longest channel produced and whether every channel is done.
    pub fn render(
        &mut self,
        th: &mut Thread,
        frames: usize,
        out: &mut [f32],
        interleaved: bool,
    ) -> Result<(usize, bool)> {
        let nch = self.channels.len();
        if out.len() < frames * nch {
            return Err(Error::OutOfRange((frames * nch) as i64));
        }
        let mut produced = 0;
        let mut all_done = true;
        for (c, cursor) in self.channels.iter_mut().enumerate() {
            let (n, ended) = if interleaved {
                cursor.fill_f32(th, frames, &mut out[c..], nch)?
            } else {
                cursor.fill_f32(th, frames, &mut out[c * frames..(c + 1) * frames], 1)?
            };
            produced = produced.max(n);
            if !ended {
                all_done = false;
            }
        }
        Ok((produced, all_done))
    }
}

// Narrow seams for file-format bindings, implemented outside the core.
pub trait SoundFileReader: Send {
    fn channel_count(&self) -> usize;
    // Read up to `frames` frames into one buffer per channel. Returns
    // the number of frames actually read; zero means end of file.
    fn pull(&mut self, frames: usize, bufs: &mut [Vec<f32>]) -> Result<usize>;
}

pub trait SoundFileWriter: Send {
    fn channel_count(&self) -> usize;
    fn push(&mut self, frames: usize, bufs: &[Vec<f32>]) -> Result<()>;
}

pub trait SoundFileSystem: Send {
    fn open(&self, path: &str) -> Result<Box<dyn SoundFileReader>>;
    fn create(
        &self,
        path: &str,
        channels: usize,
        thread_sample_rate: f64,
        file_sample_rate: f64,
        interleaved: bool,
    ) -> Result<Box<dyn SoundFileWriter>>;
}

// One shared file pull feeding a queue per channel, fanned out exactly
// like the overlap-add outputs.
struct ReaderEngine {
    reader: Box<dyn SoundFileReader>,
    queues: Vec<VecDeque<Array>>,
    block_size: usize,
    finished: bool,
}

impl ReaderEngine {
    fn step(&mut self, _th: &mut Thread) -> Result<()> {
        let nch = self.queues.len();
        let mut bufs: Vec<Vec<f32>> = vec![Vec::with_capacity(self.block_size); nch];
        let n = self.reader.pull(self.block_size, &mut bufs)?;
        if n == 0 {
            self.finished = true;
        }
        for (queue, buf) in self.queues.iter_mut().zip(bufs) {
            let floats: Vec<f64> = buf.iter().take(n).map(|x| *x as f64).collect();
            queue.push_back(Array::from_floats(floats));
        }
        Ok(())
    }
}

struct ReaderChannel {
    info: GenInfo,
    engine: Handle<SpinLock<ReaderEngine>>,
    index: usize,
}

impl Generate for ReaderChannel {
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

// Wrap an opened reader as a stream of channel signals.
pub fn reader_channels(th: &Thread, reader: Box<dyn SoundFileReader>) -> Result<Value> {
    let nch = reader.channel_count();
    let engine = Handle::new(SpinLock::new(ReaderEngine {
        reader,
        queues: vec![VecDeque::new(); nch],
        block_size: th.rate.block_size,
        finished: false,
    }));
    let mut channels = Array::new(ElemKind::V, nch);
    for index in 0..nch {
        channels.add(Value::List(List::deferred(Box::new(ReaderChannel {
            info: GenInfo::signal(th, true),
            engine: engine.clone(),
            index,
        }))))?;
    }
    Ok(Value::List(List::from_array(channels)))
}

// Drain a sound into a writer, at most max_frames. Returns the frame
// count actually written.
pub fn write_sound(
    th: &mut Thread,
    writer: &mut dyn SoundFileWriter,
    source: &Value,
    max_frames: u64,
) -> Result<u64> {
    let mut out = AudioOut::new(th, source)?;
    let nch = out.channel_count().min(writer.channel_count());
    let block = th.rate.block_size;
    let mut scratch = vec![0.0f32; block * out.channel_count()];
    let mut written = 0u64;
    while written < max_frames {
        let want = block.min((max_frames - written) as usize);
        let (n, done) = out.render(th, want, &mut scratch, false)?;
        if n > 0 {
            let bufs: Vec<Vec<f32>> = (0..nch)
                .map(|c| scratch[c * want..c * want + n].to_vec())
                .collect();
            writer.push(n, &bufs)?;
            written += n as u64;
        }
        if done {
            break;
        }
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::tests::test_thread;

    fn zlist(values: &[f64]) -> Value {
        Value::List(List::from_array(Array::from_floats(values.to_vec())))
    }

    struct MemReader {
        channels: Vec<Vec<f32>>,
        pos: usize,
    }

    impl SoundFileReader for MemReader {
        fn channel_count(&self) -> usize {
            self.channels.len()
        }

        fn pull(&mut self, frames: usize, bufs: &mut [Vec<f32>]) -> Result<usize> {
            let avail = self.channels[0].len() - self.pos;
            let n = frames.min(avail);
            for (c, buf) in bufs.iter_mut().enumerate() {
                buf.extend_from_slice(&self.channels[c][self.pos..self.pos + n]);
            }
            self.pos += n;
            Ok(n)
        }
    }

    #[derive(Default)]
    struct MemWriter {
        frames: Vec<Vec<f32>>,
    }

    impl SoundFileWriter for MemWriter {
        fn channel_count(&self) -> usize {
            2
        }

        fn push(&mut self, frames: usize, bufs: &[Vec<f32>]) -> Result<()> {
            for i in 0..frames {
                self.frames.push(bufs.iter().map(|b| b[i]).collect());
            }
            Ok(())
        }
    }

    #[test]
    fn test_render_interleaved() {
        let mut th = test_thread();
        let stereo = Value::List(List::from_array(Array::from_values(vec![
            zlist(&[1.0, 2.0]),
            zlist(&[10.0, 20.0]),
        ])));
        let mut out = AudioOut::new(&mut th, &stereo).unwrap();
        assert_eq!(out.channel_count(), 2);
        let mut buf = [9.0f32; 8];
        let (n, done) = out.render(&mut th, 4, &mut buf, true).unwrap();
        assert_eq!(n, 2);
        assert!(done);
        assert_eq!(buf, [1.0, 10.0, 2.0, 20.0, 0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_reader_as_generator() {
        let mut th = test_thread();
        let reader = MemReader {
            channels: vec![
                vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
                vec![-1.0, -2.0, -3.0, -4.0, -5.0, -6.0],
            ],
            pos: 0,
        };
        let channels = reader_channels(&th, Box::new(reader)).unwrap();
        let list = channels.as_list().unwrap().clone();
        let packed = List::pack(&list, &mut th).unwrap();
        let (array, _) = packed.segment().unwrap();
        let left = array.at(0);
        let right = array.at(1);
        let mut buf = [0.0; 6];
        assert_eq!(left.as_list().unwrap().fillz(&mut th, &mut buf).unwrap(), 6);
        assert_eq!(buf, [1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(
            right.as_list().unwrap().fillz(&mut th, &mut buf).unwrap(),
            6
        );
        assert_eq!(buf, [-1.0, -2.0, -3.0, -4.0, -5.0, -6.0]);
    }

    #[test]
    fn test_write_sound() {
        let mut th = test_thread();
        let stereo = Value::List(List::from_array(Array::from_values(vec![
            zlist(&[1.0, 2.0, 3.0]),
            zlist(&[4.0, 5.0, 6.0]),
        ])));
        let mut writer = MemWriter::default();
        let n = write_sound(&mut th, &mut writer, &stereo, 100).unwrap();
        assert_eq!(n, 3);
        assert_eq!(writer.frames.len(), 3);
        assert_eq!(writer.frames[0], vec![1.0, 4.0]);
        assert_eq!(writer.frames[2], vec![3.0, 6.0]);
    }
}
