mod sweeps;

pub use sweeps::SweepTask;
