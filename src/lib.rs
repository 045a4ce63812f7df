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

extern crate enumflags2;
extern crate rand;
extern crate ron;
extern crate serde;
#[macro_use]
extern crate log;
#[macro_use]
extern crate lazy_static;

#[macro_use]
pub mod util;
pub mod array;
pub mod broadcast;
pub mod config;
pub mod cursor;
pub mod error;
pub mod form;
pub mod gen;
pub mod list;
pub mod lock;
pub mod math;
pub mod plug;
pub mod prim;
pub mod sig;
pub mod sound;
pub mod spawn;
pub mod symbol;
pub mod value;
pub mod vm;

use std::sync::Arc;

// Abstract over the shared-ownership strategy. Everything on the heap is
// reference counted and may cross audio threads.
pub type Handle<T> = Arc<T>;
