pub mod poller;

pub use poller::{run, sweep_once, SweepStats};
