//! OTG USB Gadget mass storage binding
//!
//! Three interchangeable backends bind one image file to the gadget:
//! - Modprobe: loads `g_mass_storage` with the image as its `file` parameter
//! - ConfigFS: writes the image path into an existing mass storage LUN
//! - Fake: in-memory state for development machines and tests
//!
//! ```text
//! Mount --> GadgetMounter ─┬─ ModprobeMounter (sudo modprobe g_mass_storage)
//!                          ├─ ConfigfsMounter (functions/mass_storage.*/lun.0/file)
//!                          └─ FakeMounter     (FakeGadgetState)
//! ```

pub mod configfs;
pub mod mounter;

pub use mounter::{
    create_mounter, host_supports_gadget, resolve_backend, ConfigfsMounter, FakeGadgetState,
    FakeMounter, GadgetMounter, ModprobeMounter, FAKE_ENV,
};
