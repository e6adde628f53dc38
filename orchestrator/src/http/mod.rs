//! HTTP plumbing for device access

pub mod vapix;
