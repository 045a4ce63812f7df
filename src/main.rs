// uSonic: featherweight stack language for lazy sound synthesis.
//
// Copyright (C) 2020  Brandon Lewis
//
// This program is free software: you can redistribute it and/or
// modify it under the terms of the GNU Lesser General Public License
// as published by the Free Software Foundation, either version 3 of
// the License, or (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// Lesser General Public License for more details.
//
// You should have received a copy of the GNU Lesser General Public
// License along with this program.  If not, see
// <https://www.gnu.org/licenses/>.

// A tiny offline driver: evaluates a hand-assembled program (the
// compiler is an external collaborator) and renders the resulting sound
// through the audio sink interface.

use std::env::args;

use log::debug;
use usonic::config::Settings;
use usonic::sound::AudioOut;
use usonic::value::Value;
use usonic::vm::{Code, Opcode, Thread, VmContext};

fn main() {
    env_logger::init();

    let settings = match args().nth(1) {
        Some(path) => Settings::load(&path).expect("couldn't load settings"),
        None => Settings::default(),
    };
    let print_length = settings.print_length;
    let ctx = VmContext::new(settings);
    let mut th = Thread::new(ctx);

    // 440 0 sinosc 0.3 *
    let code = Code::of(vec![
        Opcode::PushImmediate(Value::Real(440.0)),
        Opcode::PushImmediate(Value::Real(0.0)),
        Opcode::CallImmediate(th.ctx.builtin("sinosc").expect("no sinosc")),
        Opcode::PushImmediate(Value::Real(0.3)),
        Opcode::CallImmediate(th.ctx.builtin("*").expect("no *")),
        Opcode::Return,
    ]);
    th.run(&code).expect("evaluation failed");

    let sound = th.pop().expect("nothing on the stack");
    println!("result: {:?}", sound);

    let mut out = AudioOut::new(&mut th, &sound).expect("not a sound");
    let mut buf = vec![0.0f32; print_length * out.channel_count()];
    let (n, _) = out
        .render(&mut th, print_length, &mut buf, true)
        .expect("render failed");
    println!("first {} frames:", n);
    for frame in buf.chunks(out.channel_count()).take(n) {
        println!("  {:?}", frame);
    }
    debug!(
        "generators created: {} stream, {} signal",
        th.ctx.stats.stream_generators(),
        th.ctx.stats.signal_generators()
    );
}
