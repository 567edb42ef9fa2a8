//! Core address types, logging, and synchronization primitives for the
//! Hadron kernel.
//!
//! This crate contains host-testable abstractions shared by every other
//! `hadron-*` crate: physical/virtual address newtypes, a leveled logging
//! facade forwarded to a boot-installed sink, and the spin-lock primitives
//! used for single-CPU interior mutability.
//!
//! By living outside the kernel crate, these types can be tested with
//! `cargo test` on the host without a kernel target.

#![cfg_attr(not(test), no_std)]
#![feature(negative_impls)]
#![warn(missing_docs)]

extern crate alloc;

pub mod addr;
pub mod cell;
pub mod error;
pub mod id;
pub mod log;
pub mod safety;
pub mod static_assert;
pub mod sync;
