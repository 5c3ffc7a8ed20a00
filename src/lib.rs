#![warn(clippy::missing_docs_in_private_items)]
#![warn(rustdoc::missing_crate_level_docs)]
#![doc = include_str!("../README.md")]

pub mod assets;
pub mod backup;
pub mod error;
pub mod patcher;
pub mod platform;
pub mod product;
pub mod signature;
pub mod table;
pub mod unlocker;

pub use error::{Error, Result};
pub use patcher::{PatchEngine, PatchResult, Status};
pub use table::{TableDescriptor, TableKind};
pub use unlocker::{check_status, StatusReport, Unlocker};
