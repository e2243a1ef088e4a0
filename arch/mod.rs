//! Architecture support
//!
//! The register layer targets Intel VT-x. The register model itself is
//! plain data and builds on any host so it can be unit tested; only the
//! hardware accessors are restricted to x86_64 targets.

pub mod x86_64;
