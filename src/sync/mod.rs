//! Synchronization protocol
//!
//! Mutation payload parsers, the logic applying remote mutations to local
//! objects and the request/response correlation used by remote fetches.

mod mutation;
mod parsers;
mod request;

pub use mutation::*;
pub use parsers::*;
pub use request::*;
