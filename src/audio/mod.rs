pub mod quality;
pub mod wav;
