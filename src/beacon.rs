//! The harvester's view of the attached beacon node: the wallclock of
//! the network, the block shape consumed by the derivers, and the
//! façade trait real transports implement.

pub mod block;
pub mod node;
pub mod wallclock;
