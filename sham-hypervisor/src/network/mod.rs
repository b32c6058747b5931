//! Virtual NIC value objects.
//!
//! A [`NetworkInterface`] is read from, and written back into, the
//! `<interface>` elements of a domain descriptor.

mod types;

pub use types::*;
