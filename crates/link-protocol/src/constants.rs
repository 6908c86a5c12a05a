//! Default timing and sizing values for the device link
//!
//! Every value here is the default of a [`LinkConfig`](crate::LinkConfig)
//! field and can be overridden per link. The firmware side is an Arduino-class
//! board on a USB-UART bridge running `Serial.begin(9600)`.

/// Port opening
pub mod connect {
    /// Line speed expected by the firmware
    ///
    /// **Value**: 9600 baud
    ///
    /// Must match the sketch's `Serial.begin()`. A mismatch does not fail the
    /// open, it shows up as malformed frames.
    pub const BAUD_RATE: u32 = 9600;

    /// Open attempts per `connect()` call
    ///
    /// **Value**: 3 attempts
    ///
    /// Covers a board that is still resetting after the port was touched
    /// (DTR toggles reset most Arduino boards, ~1.5 s bootloader window).
    pub const MAX_RETRIES: u32 = 3;

    /// Pause between two open attempts (milliseconds)
    ///
    /// **Value**: 1000ms
    ///
    /// No pause follows the last attempt.
    pub const RETRY_DELAY_MS: u64 = 1000;
}

/// Health monitor
pub mod monitor {
    /// Poll period (milliseconds)
    ///
    /// **Value**: 1000ms
    ///
    /// A dropped link is noticed within one period.
    pub const INTERVAL_MS: u64 = 1000;

    /// Backoff after a failed reconnect (milliseconds)
    ///
    /// **Value**: 5000ms
    ///
    /// Added on top of the `connect()` retries themselves, so an unplugged
    /// board costs `MAX_RETRIES` opens every ~8 s instead of continuously.
    pub const RECONNECT_INTERVAL_MS: u64 = 5000;
}

/// Command queue and writer
pub mod writer {
    /// How long a command may wait for the port (milliseconds)
    ///
    /// **Value**: 2000ms
    ///
    /// LED updates older than this are stale; the next classification will
    /// send a fresh value anyway.
    pub const COMMAND_TIMEOUT_MS: u64 = 2000;

    /// Retry granularity while the port is unavailable (milliseconds)
    ///
    /// **Value**: 100ms
    pub const SEND_POLL_INTERVAL_MS: u64 = 100;

    /// Bounded wait on an empty queue (milliseconds)
    ///
    /// **Value**: 1000ms
    ///
    /// Upper bound on how late the writer notices a shutdown when idle.
    pub const QUEUE_POLL_MS: u64 = 1000;

    /// Commands that may be pending at once
    ///
    /// **Value**: 64
    ///
    /// At most three commands per classification, so 64 only fills when the
    /// port has been gone for a while.
    pub const QUEUE_CAPACITY: usize = 64;
}

/// Receiver loop
pub mod receiver {
    /// Sleep when no bytes are pending (milliseconds)
    ///
    /// **Value**: 10ms
    ///
    /// At 9600 baud a 10 ms gap is ~10 characters, far below any buffer limit.
    pub const READ_IDLE_MS: u64 = 10;

    /// Sleep after a read error (milliseconds)
    ///
    /// **Value**: 100ms
    pub const ERROR_BACKOFF_MS: u64 = 100;

    /// Longest accepted inbound line, terminator included (bytes)
    ///
    /// **Value**: 256 bytes
    ///
    /// The longest valid line is `STYLE:255\r\n` (11 bytes); anything near
    /// the limit is line noise.
    pub const MAX_FRAME_LEN: usize = 256;
}

/// Event channel depth
///
/// **Value**: 256 events
///
/// Events beyond this are dropped (and logged) rather than stalling the
/// receiver when the subscriber stops reading.
pub const EVENT_CAPACITY: usize = 256;
