pub mod activity;
pub mod destination;
pub mod item;
pub mod layer;
