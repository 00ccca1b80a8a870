//! Application-wide constants for the fanout broker.
//!
//! This module centralizes the deadlines, intervals, and channel capacities
//! that govern the broker's backpressure behavior. Constants are grouped by
//! domain with documentation explaining their purpose.

use std::time::Duration;

// ============================================================================
// Socket deadlines
// ============================================================================

/// Per-frame read deadline on broker-side connections.
///
/// A client that sends no complete frame for this long is considered dead
/// and its connection is closed.
pub const READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Per-frame write deadline on broker-side connections.
///
/// A peer that cannot absorb a frame within this window is closed rather
/// than allowed to wedge the writer thread.
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Write deadline for client-side command sends.
pub const CLIENT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Read deadline for client-side responses and pushed messages.
pub const CLIENT_READ_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// Fan-out backpressure
// ============================================================================

/// Delivery buffer capacity of a single subscription.
pub const SUBSCRIPTION_BUFFER: usize = 100;

/// Outbound command channel capacity of a single connection.
///
/// When full, further commands are dropped with a log line; the channel is
/// the per-connection backpressure point and must never block the reader
/// or the topic distributors.
pub const OUTBOUND_BUFFER: usize = 100;

/// How long the distributor waits on one subscription's buffer before
/// dropping the message for that subscriber only.
///
/// This bounds the damage a slow subscriber can do: it costs the topic at
/// most this long per message, and nothing is redelivered.
pub const SUBSCRIPTION_SEND_TIMEOUT: Duration = Duration::from_millis(50);

// ============================================================================
// Idle waits
// ============================================================================

/// Upper bound on one distributor wait for a queued message.
///
/// Publishes wake the distributor immediately; this timeout only bounds how
/// long shutdown can lag behind the shutdown flag.
pub const DISTRIBUTOR_WAIT: Duration = Duration::from_millis(100);

/// Distributor back-off while the topic has no subscribers.
///
/// Queued messages are retained for future subscribers (or the TTL sweep)
/// instead of being drained into the void.
pub const NO_SUBSCRIBER_WAIT: Duration = Duration::from_millis(10);

/// Upper bound on one delivery-thread wait for a buffered message, between
/// checks of the subscription and connection liveness flags.
pub const DELIVERY_WAIT: Duration = Duration::from_millis(100);

/// Accept-loop poll interval while no connection is pending.
pub const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(100);
