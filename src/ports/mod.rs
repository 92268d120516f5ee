//! Full project ports for specific targets. They mainly
//! provide a method to construct a generic bootloader from
//! specific parts.

/// Memory map generated at build time from the layout file.
pub mod layout {
    use crate::utilities::memory::*;
    include!(concat!(env!("OUT_DIR"), "/memory_layout.rs"));
}

#[cfg(feature = "stm32g071")]
port!(stm32g071: [bootloader, dispatch,]);
