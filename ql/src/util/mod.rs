pub mod format;
pub mod immutable;
