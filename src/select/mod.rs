pub mod median;

pub use median::select;
