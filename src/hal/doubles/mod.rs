//! Host-side test doubles for every HAL interface.
pub mod error;
pub mod flash;
pub mod layout;
pub mod watchdog;
pub mod reset;
