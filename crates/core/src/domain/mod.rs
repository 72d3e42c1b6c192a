pub mod company;
pub mod snapshot;
