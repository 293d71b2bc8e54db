//! adfotg - ADF images over USB OTG
//!
//! This crate packs Amiga disk images into FAT mount images and exposes
//! them to a USB host (typically a Gotek floppy emulator) through the
//! Linux mass-storage gadget.

pub mod config;
pub mod error;
pub mod msd;
pub mod otg;
pub mod utils;

#[cfg(test)]
mod test_util;

pub use error::{AppError, Result};
