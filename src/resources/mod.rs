//! Builders and idempotent create/delete helpers for the objects of one instance.

pub mod deployment;
pub mod gateway;
pub mod labels;
pub mod service;
