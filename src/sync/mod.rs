//! Peer tempo synchronisation.
//!
//! [`PeerSession`] is the capability a session implementation provides;
//! [`LocalPeerSession`] simulates one in-process. [`TempoSync`] arbitrates
//! between a session and the transport.
mod local;
mod peer;
mod tempo_sync;

pub use local::LocalPeerSession;
pub use peer::{PeerCountCallback, PeerSession, PlayStateCallback, TempoCallback};
pub use tempo_sync::{tempo_diverges, SyncState, TempoSync, TempoSyncStatus};
