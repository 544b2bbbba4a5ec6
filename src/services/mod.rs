//! # Worked-Example Services
//!
//! `echo`, `math`, `health`, and `file` exercise the command protocol end to
//! end (unary, output-streaming, input-streaming) for the demo binary and
//! integration tests. They carry no special-cased dispatcher logic and are
//! never grown into general-purpose product surfaces.

pub mod echo;
pub mod file;
pub mod health;
pub mod math;
