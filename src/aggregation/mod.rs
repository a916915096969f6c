mod fedavg;

pub use fedavg::{TOLERANCE, aggregate};
