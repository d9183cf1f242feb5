//! HTTP middleware.

pub mod gate;
