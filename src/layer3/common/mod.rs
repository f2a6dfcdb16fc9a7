// Common utilities shared by layer 3 components

pub mod time_windows;

pub use time_windows::TimeWindow;
