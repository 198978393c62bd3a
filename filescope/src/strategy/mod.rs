//! Batch input strategies.
//!
//! Only the filesystem strategy exists today. It is exposed through
//! [`crate::discover`] and [`crate::characterize_fs`].

pub mod fs;
