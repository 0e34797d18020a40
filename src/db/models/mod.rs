//! Database models split into separate files.
//! This module re-exports individual model modules so existing imports like
//! `use crate::db::models::*;` continue to work.

pub mod notification;
pub mod task;

pub use self::notification::*;
pub use self::task::*;
