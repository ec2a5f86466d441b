// Adapters
//
// Bridges between external data formats and the kernel's types.

pub mod dump;
