pub mod connection;
pub mod sink;

pub use sink::Sink;
