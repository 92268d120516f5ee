//! Complex modules with business logic related to the problem
//! domain, that lay on top of abstract drivers. Devices are
//! generic, while board specifics are handled in the `ports`
//! module.

pub mod metadata;
pub mod programming;
pub mod image;
pub mod verification;
pub mod selection;
pub mod safety_net;
pub mod services;
#[macro_use]
pub mod dispatch;
pub mod bootloader;
