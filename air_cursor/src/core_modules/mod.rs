pub mod detector;
pub mod gesture;
pub mod hand_data;
pub mod observation;
pub mod parameters;
pub mod pointer;
