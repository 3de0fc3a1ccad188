//! Replica Routing Module
//!
//! Decides where data goes and puts it on the wire.
//!
//! ## Core Concepts
//! - **Placement**: `ReplicaPlacement` picks a uniformly random primary and uses the next
//!   node in the list, circularly, as its backup.
//! - **Router**: a stateless relay that forwards every incoming frame, unmodified, to a
//!   freshly chosen primary/backup pair. There is no session affinity.
//! - **Distributor**: splits a buffer into chunks and sends each chunk twice as a
//!   `StoredChunkFrame`, once tagged primary and once tagged backup.

pub mod distributor;
pub mod placement;
pub mod router;
