//! Integration test crate for LiveCast.
//!
//! This crate exists solely to hold cross-crate integration tests.
//! It depends on every livecast crate to verify they work together.

#[cfg(test)]
mod support;

#[cfg(test)]
mod rotation;

#[cfg(test)]
mod controllers;

#[cfg(test)]
mod session;
