//! Crate-level tests: scheduling scenarios, randomized invariant checks and
//! real context switches on the host.

mod helpers;
mod integration;
