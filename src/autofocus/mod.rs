//! Contrast-based (`AutoFocusController`) and reflection-based
//! (`LaserAutofocusController`) autofocus (spec §4.5, §4.6).

pub mod contrast;
pub mod laser;
pub mod spot;

pub use contrast::AutoFocusController;
pub use laser::LaserAutofocusController;
