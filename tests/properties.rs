#[path = "properties/amounts.rs"]
mod amounts;

#[path = "properties/partition.rs"]
mod partition;

#[path = "properties/reconcile.rs"]
mod reconcile;

#[path = "properties/sampling.rs"]
mod sampling;
