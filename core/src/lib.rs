//! Document access control and workflow scheduling primitives.

pub mod access;
pub mod config;
pub mod db;
pub mod document;
pub mod ids;
pub mod notification;
pub mod workflow;
