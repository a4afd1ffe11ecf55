//! # Architecture Abstraction Layer
//!
//! Hardware side of the scheduler's two external seams: the tick
//! interrupt and the context-switch primitive. Currently implements the
//! Cortex-M4 port; extensible to other architectures by adding sibling
//! modules. Host builds compile none of this — tests stand in for the
//! switch by driving the scheduler directly.

#[cfg(all(target_arch = "arm", target_os = "none"))]
pub mod cortex_m4;
