pub mod inbox;
pub mod protocol;
pub mod reconcile;
pub mod replication;
pub mod transport;
