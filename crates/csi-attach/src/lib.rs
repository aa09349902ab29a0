//! # csi-attach
//!
//! The attachment manager: in-memory attachment state for every
//! tracked volume, a persistent mirror to recover from restarts and
//! crashes, and the per-volume lock registry the controller and
//! reconciler serialize their mutations through.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod locks;
pub mod manager;
pub mod mirror;

pub use error::{Error, Result};
pub use locks::KeyedLockRegistry;
pub use manager::{AttachmentManager, AttachmentManagerStats};
pub use mirror::{PersistentMirror, ANNOTATION_KEY};
