//! Convenience macros for the bootloader project

/// Define and export a specific port module (transparently pulls
/// its namespace to the current one).
///
/// Used mostly to conveniently fit the module declaration and reexport
/// under a single configuration flag.
///
/// # Example
/// ```ignore
/// #[cfg(feature = "stm32g071")]
/// port!(stm32g071: [bootloader, dispatch,]);
/// // Expands into:
/// pub mod stm32g071 { pub mod bootloader; pub mod dispatch; }
/// pub use self::stm32g071::bootloader;
/// pub use self::stm32g071::dispatch;
/// ```
#[macro_export]
macro_rules! port {
    ($mod:ident) => {
        pub mod $mod;
        pub use self::$mod::*;
    };
    ($outer:ident: [$($inner:ident,)+]) => {
        pub mod $outer {
        $(
            pub mod $inner;
        )+
        }
        $(
            pub use self::$outer::$inner;
        )+
    };
}

// Logging goes through `defmt` on the target and through the `log`
// facade on the host, so the same call sites work in unit tests.
// Format strings must stick to `{}`, `{:?}` and `{:#x}`, which both
// backends understand.

#[macro_export]
macro_rules! info {
    ($($arg:tt)+) => {{
        #[cfg(target_arch = "arm")]
        defmt::info!($($arg)+);
        #[cfg(not(target_arch = "arm"))]
        log::info!($($arg)+);
    }};
}

#[macro_export]
macro_rules! warn {
    ($($arg:tt)+) => {{
        #[cfg(target_arch = "arm")]
        defmt::warn!($($arg)+);
        #[cfg(not(target_arch = "arm"))]
        log::warn!($($arg)+);
    }};
}

#[macro_export]
macro_rules! error {
    ($($arg:tt)+) => {{
        #[cfg(target_arch = "arm")]
        defmt::error!($($arg)+);
        #[cfg(not(target_arch = "arm"))]
        log::error!($($arg)+);
    }};
}

#[macro_export]
macro_rules! debug {
    ($($arg:tt)+) => {{
        #[cfg(target_arch = "arm")]
        defmt::debug!($($arg)+);
        #[cfg(not(target_arch = "arm"))]
        log::debug!($($arg)+);
    }};
}
