pub mod bootstrap;

pub use bootstrap::{assemble, Assembled};
