//! MSD (Mass Storage Device) module
//!
//! Builds FAT mount images out of host files and exposes them to a USB host
//! through the mass-storage gadget.
//!
//! Architecture:
//! ```text
//! CLI --> MountController --> Mount --> GadgetMounter --> USB host
//!              |                |
//!        ImageManager      MountImage --> mtools (mdir/mcopy/mkdosfs)
//!      (mount_images/)
//! ```

pub mod controller;
pub mod image;
pub mod listing;
pub mod mount;
pub mod mount_image;
pub mod types;

pub use controller::{MountController, PackOptions, QUICKMOUNT_IMAGE};
pub use image::ImageManager;
pub use listing::{parse_entry, parse_listing, ListingError, ListingParser};
pub use mount::Mount;
pub use mount_image::{packed_image_size, MountImage};
pub use types::{FileEntry, ImageInfo, MountReport, MountStatus};
