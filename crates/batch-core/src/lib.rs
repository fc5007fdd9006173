//! Shared configuration types for `microbatch`.

pub mod settings;
