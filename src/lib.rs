pub mod cli;
pub mod config;
pub mod enums;
pub mod error;
pub mod ip_address;
pub mod logging;
pub mod pipeline;
pub mod power;
pub mod scope;
pub mod servers;
pub mod upstream;
pub mod wire;

/// Internal limit of in-flight pipeline tasks, mirroring the teacher's own
/// constant of the same name (SPEC_FULL.md §5, §9 REDESIGN FLAGS).
pub const MAX_IN_FLIGHT: usize = 512;

/// The default "cancel a pipeline response" timeout, mirroring the
/// teacher's own `REPLY_TIMEOUT_MS` (SPEC_FULL.md §5).
pub const REPLY_TIMEOUT_MS: u64 = 5000;

/// The maximum size of a UDP packet <https://dnsflagday.net/2020/#dns-flag-day-2020>
pub const UDP_BUFFER_SIZE: usize = 1232;
