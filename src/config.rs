// (C) 2020 Brandon Lewis
//
// Engine settings, loadable from a RON file.

use crate::error::{Error, Result};
use ron::de::from_reader;
use serde::Deserialize;
use std::fs::File;

#[derive(Deserialize, Debug, Clone)]
pub struct Settings {
    pub sample_rate: f64,
    // audio-rate block size, in frames
    pub block_size: usize,
    // the control rate runs this many times slower
    pub control_div: usize,
    // block size for streams of boxed values
    pub stream_block_size: usize,
    // how many elements printing shows before truncating
    pub print_length: usize,
    // refusal threshold for operations that must hold a whole list
    pub pack_limit: usize,
}

impl Default for Settings {
    fn default() -> Settings {
        Settings {
            sample_rate: 48000.0,
            block_size: 256,
            control_div: 8,
            stream_block_size: 32,
            print_length: 20,
            pack_limit: 1 << 24,
        }
    }
}

impl Settings {
    pub fn load(path: &str) -> Result<Settings> {
        let file =
            File::open(path).map_err(|e| Error::failed(format!("couldn't open '{}': {}", path, e)))?;
        from_reader(file).map_err(|e| Error::Syntax(format!("{}: {}", path, e)))
    }

    // Tiny blocks: handy for tests and for watching the scheduler work.
    pub fn small() -> Settings {
        Settings {
            sample_rate: 8.0,
            block_size: 4,
            control_div: 2,
            stream_block_size: 4,
            print_length: 20,
            pack_limit: 1 << 16,
        }
    }
}
