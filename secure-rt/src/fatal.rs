use core::fmt::Display;

/// Stops the secure image. Used for every configuration or upstream failure: the
/// boundary is either fully programmed or nothing runs past this point.
#[cfg(all(target_arch = "arm", target_os = "none"))]
pub fn halt(error: &dyn Display) -> ! {
    cortex_m::interrupt::disable();
    log::error!("Fatal: {}", error);
    cortex_m::asm::udf();
}

#[cfg(not(all(target_arch = "arm", target_os = "none")))]
pub fn halt(error: &dyn Display) -> ! {
    log::error!("Fatal: {}", error);
    panic!("fatal: {error}");
}

/// Unwraps a configuration result, halting on failure.
pub fn check<T, E: Display>(result: Result<T, E>) -> T {
    match result {
        Ok(value) => value,
        Err(e) => halt(&e),
    }
}
