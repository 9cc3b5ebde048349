pub mod audit;
pub mod booking_dedup;
pub mod fees;
pub mod finalize;
pub mod line_items;
pub mod revenue;
