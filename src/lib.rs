extern crate chrono;
extern crate rand;
extern crate toml;

pub mod configs;
pub mod experiment;
pub mod mock;
pub mod peak_search;
pub mod power_units;
pub mod scope;
pub mod scpi;
pub mod synth;
pub mod trace;
pub mod transport;
pub mod util;
