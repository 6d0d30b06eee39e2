//! ProBridge — bridges a USB Nintendo Switch Pro controller to the XInput
//! gamepad model.
//!
//! The crate hosts the controller agent: device discovery, the controller's
//! private USB handshake, an overlapped-I/O polling worker, and a
//! concurrently readable state cache in Xbox conventions. Frontends (an
//! XInput export shim, diagnostics) sit on top of
//! [`agent::ControllerAgent`]'s small public surface.

pub mod agent;
pub mod device;
pub mod diag;
pub mod gamepad;
pub mod mapping;
pub mod pipe;
pub mod protocol;
pub mod timer;

pub use agent::ControllerAgent;
