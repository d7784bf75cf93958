//! meidc — configuration utility for the ME-iDS driver system.
//!
//! The crate models the driver's XML configuration document, discovers
//! installed hardware through the driver's query interface, reconciles
//! the two at startup and applies user edits (extension registration,
//! device reordering) under the document's locking invariants.

pub mod allocator;
pub mod conf;
pub mod defines;
pub mod document;
pub mod driver;
pub mod error;
#[cfg(feature = "medriver")]
pub mod ffi;
pub mod inventory;
pub mod outline;
pub mod reconcile;
pub mod session;
pub mod topology;
pub mod tui;
pub mod xml;

pub use conf::Conf;
pub use defines::ExtensionKind;
pub use document::ConfigDocument;
pub use driver::{Driver, MockDriver};
pub use error::{ConfigError, Result};
pub use session::Session;
pub use topology::Direction;
