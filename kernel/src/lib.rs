// Kvfeed Kernel
//
// Catch-up scan core for rangefeeds over a multi-version store.

pub mod adapters;
pub mod mvcc;
pub mod rangefeed;
