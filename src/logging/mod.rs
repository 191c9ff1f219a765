pub mod events;
pub mod logger;

pub use self::events::{Event, EventKind};
pub use self::logger::{DebugLogger, Logger, LoggerRef, MemoryLogger};
